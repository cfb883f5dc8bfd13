use crate::config::Config;
use crate::error::Result;
use crate::event::SourceFile;
use crate::gdal::GdalBinaries;
use crate::storage::{s3_uri, ObjectUploader};
use crate::tool::ToolRunner;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Converts one band and stores the result, returning its destination location
#[async_trait]
pub trait BandProcessor: Send + Sync {
    async fn process_band(&self, band: &str, subdataset_path: &str) -> Result<String>;
}

/// Fixed settings for every band converted in one invocation
#[derive(Debug, Clone)]
pub struct ConversionSettings {
    /// Destination bucket
    pub bucket: String,
    /// Canned ACL for uploads
    pub acl: String,
    /// Scratch directory for local artifacts
    pub temp_dir: PathBuf,
    /// Artifact file extension
    pub extension: String,
    /// Conversion command timeout
    pub timeout: Duration,
    /// GDAL block cache size in MB
    pub cache_max_mb: u32,
}

impl ConversionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.destination.bucket.clone(),
            acl: config.destination.acl.clone(),
            temp_dir: PathBuf::from(&config.processing.temp_dir),
            extension: config.processing.output_extension.clone(),
            timeout: config.command_timeout(),
            cache_max_mb: config.gdal.cache_max_mb,
        }
    }
}

/// Band → COG → destination bucket
pub struct BandConverter {
    runner: Arc<dyn ToolRunner>,
    uploader: Arc<dyn ObjectUploader>,
    binaries: GdalBinaries,
    settings: ConversionSettings,
    stem: String,
}

impl BandConverter {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        uploader: Arc<dyn ObjectUploader>,
        binaries: GdalBinaries,
        settings: ConversionSettings,
        source: &SourceFile,
    ) -> Self {
        Self {
            runner,
            uploader,
            binaries,
            settings,
            stem: source.stem(),
        }
    }

    /// Destination key: `{stem}/{band}_cog.{extension}`
    pub fn artifact_key(&self, band: &str) -> String {
        format!("{}/{}_cog.{}", self.stem, band, self.settings.extension)
    }

    /// Local scratch path, one per band so concurrent conversions never collide.
    ///
    /// The band is percent-encoded, so distinct identifiers always map to
    /// distinct file names and none can escape `temp_dir`.
    pub fn temp_path(&self, band: &str) -> PathBuf {
        self.settings.temp_dir.join(format!(
            "{}_cog.{}",
            encode_path_component(band),
            self.settings.extension
        ))
    }

    async fn convert_and_upload(&self, subdataset_path: &str, artifact: &Path, key: &str) -> Result<()> {
        let command =
            self.binaries
                .translate_to_cog(subdataset_path, artifact, self.settings.cache_max_mb);
        self.runner.run(&command, self.settings.timeout).await?;

        debug!(artifact = %artifact.display(), "Band converted");

        self.uploader
            .upload_file(artifact, &self.settings.bucket, key, &self.settings.acl)
            .await
    }
}

#[async_trait]
impl BandProcessor for BandConverter {
    #[instrument(skip_all, fields(band = %band))]
    async fn process_band(&self, band: &str, subdataset_path: &str) -> Result<String> {
        let key = self.artifact_key(band);

        tokio::fs::create_dir_all(&self.settings.temp_dir).await?;
        let artifact = TempArtifact::new(self.temp_path(band));

        let outcome = self
            .convert_and_upload(subdataset_path, artifact.path(), &key)
            .await;
        artifact.remove().await;
        outcome?;

        info!(s3_key = %key, "Successfully processed and uploaded {}", key);
        Ok(s3_uri(&self.settings.bucket, &key))
    }
}

/// Local file removed on every exit path.
///
/// [`remove`](Self::remove) cleans up on the normal paths; `Drop` only runs the
/// removal when the conversion future is cancelled or panics.
struct TempArtifact {
    path: PathBuf,
    removed: bool,
}

impl TempArtifact {
    fn new(path: PathBuf) -> Self {
        Self { path, removed: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) {
        log_removal(&self.path, tokio::fs::remove_file(&self.path).await);
        self.removed = true;
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.removed {
            // Cancellation and panic paths only; a single unlink may block here
            log_removal(&self.path, std::fs::remove_file(&self.path));
        }
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!(artifact = %path.display(), "Removed local artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            artifact = %path.display(),
            error = %e,
            "Failed to remove local artifact"
        ),
    }
}

/// Percent-encode a band identifier for use as a file name
fn encode_path_component(component: &str) -> String {
    utf8_percent_encode(component, NON_ALPHANUMERIC).to_string()
}
