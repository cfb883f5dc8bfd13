//! GDAL command construction.

use crate::tool::ToolCommand;
use std::path::{Path, PathBuf};
use tracing::debug;

const GDALINFO: &str = "gdalinfo";
const GDAL_TRANSLATE: &str = "gdal_translate";

/// COG tile edge in pixels
pub const COG_BLOCK_SIZE: u32 = 256;

/// Resolved locations of the GDAL binaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdalBinaries {
    pub gdalinfo: PathBuf,
    pub gdal_translate: PathBuf,
}

impl GdalBinaries {
    /// Resolve each binary against `search_paths` in order.
    ///
    /// Falls back to the bare program name (found through `PATH`) when no
    /// search path holds it.
    pub fn resolve<S: AsRef<str>>(search_paths: &[S]) -> Self {
        let binaries = Self {
            gdalinfo: find_binary(search_paths, GDALINFO),
            gdal_translate: find_binary(search_paths, GDAL_TRANSLATE),
        };

        debug!(
            gdalinfo = %binaries.gdalinfo.display(),
            gdal_translate = %binaries.gdal_translate.display(),
            "Resolved GDAL binaries"
        );

        binaries
    }

    /// Human-readable listing of a dataset, including its subdatasets
    pub fn info(&self, source: &str) -> ToolCommand {
        ToolCommand::new(self.gdalinfo.clone()).arg(source)
    }

    /// Machine-readable dataset description
    pub fn info_json(&self, source: &str) -> ToolCommand {
        ToolCommand::new(self.gdalinfo.clone()).arg("-json").arg(source)
    }

    /// Convert one subdataset into a tiled, DEFLATE-compressed COG
    pub fn translate_to_cog(&self, subdataset: &str, output: &Path, cache_max_mb: u32) -> ToolCommand {
        let block = COG_BLOCK_SIZE.to_string();

        ToolCommand::new(self.gdal_translate.clone())
            .args(["-of", "COG"])
            .args(["-co", "TILED=YES"])
            .args(["-co".to_string(), format!("BLOCKXSIZE={}", block)])
            .args(["-co".to_string(), format!("BLOCKYSIZE={}", block)])
            .args(["-co", "COMPRESS=DEFLATE"])
            .args(["-co", "NUM_THREADS=ALL_CPUS"])
            .args(["--config".to_string(), "GDAL_CACHEMAX".to_string(), cache_max_mb.to_string()])
            .arg(subdataset)
            .arg(output.display().to_string())
    }
}

fn find_binary<S: AsRef<str>>(search_paths: &[S], name: &str) -> PathBuf {
    search_paths
        .iter()
        .map(|dir| Path::new(dir.as_ref()).join(name))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(name))
}
