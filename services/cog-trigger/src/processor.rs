use crate::config::Config;
use crate::converter::{BandConverter, ConversionSettings};
use crate::discovery::discover_subdatasets;
use crate::event::SourceFile;
use crate::gdal::GdalBinaries;
use crate::metadata::{MetadataTable, MetadataUploader};
use crate::orchestrator::{BandOrchestrator, ConversionResults};
use crate::storage::ObjectUploader;
use crate::tool::ToolRunner;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument};

/// Aggregate result of one invocation
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    /// Whether the metadata record was written
    pub metadata_processed: bool,
    /// Successfully converted bands and their destination locations
    pub results: ConversionResults,
    /// Wall-clock time spent processing
    pub duration: Duration,
}

impl ProcessingOutcome {
    pub fn processed_bands(&self) -> Vec<String> {
        self.results.keys().cloned().collect()
    }
}

/// INSAT-3D HDF5 processor: metadata first, then every image band as a COG.
///
/// Built once per cold start; [`process`](Self::process) runs once per trigger.
pub struct Insat3dProcessor {
    config: Config,
    runner: Arc<dyn ToolRunner>,
    uploader: Arc<dyn ObjectUploader>,
    table: Arc<dyn MetadataTable>,
    binaries: GdalBinaries,
}

impl Insat3dProcessor {
    pub fn new(
        config: Config,
        runner: Arc<dyn ToolRunner>,
        uploader: Arc<dyn ObjectUploader>,
        table: Arc<dyn MetadataTable>,
    ) -> Self {
        let binaries = GdalBinaries::resolve(&config.gdal.search_paths);
        Self {
            config,
            runner,
            uploader,
            table,
            binaries,
        }
    }

    /// Use explicit binary locations instead of searching for them
    pub fn with_binaries(mut self, binaries: GdalBinaries) -> Self {
        self.binaries = binaries;
        self
    }

    #[instrument(skip_all, fields(bucket = %source.bucket, key = %source.key))]
    pub async fn process(&self, source: &SourceFile) -> ProcessingOutcome {
        let started = Instant::now();
        let input_path = source.vsi_path();
        info!("Processing file: {}", input_path);

        // A metadata failure never blocks band processing
        let metadata = MetadataUploader::new(
            self.runner.clone(),
            self.table.clone(),
            self.binaries.clone(),
            &self.config.metadata,
            self.config.command_timeout(),
        );
        let metadata_processed = metadata.upload_metadata(&input_path).await;

        let subdatasets = discover_subdatasets(
            self.runner.as_ref(),
            &self.binaries,
            &input_path,
            self.config.command_timeout(),
        )
        .await;

        let converter = BandConverter::new(
            self.runner.clone(),
            self.uploader.clone(),
            self.binaries.clone(),
            ConversionSettings::from_config(&self.config),
            source,
        );
        let results = BandOrchestrator::new(Arc::new(converter), self.config.processing.max_workers)
            .run(subdatasets)
            .await;

        let duration = started.elapsed();
        info!(
            metadata_processed,
            bands = results.len(),
            "Total processing completed in {:.2} seconds",
            duration.as_secs_f64()
        );

        ProcessingOutcome {
            metadata_processed,
            results,
            duration,
        }
    }
}
