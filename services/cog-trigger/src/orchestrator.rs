//! Bounded fan-out of band conversions.

use crate::converter::BandProcessor;
use crate::discovery::Subdatasets;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Band identifier → destination location, successes only
pub type ConversionResults = BTreeMap<String, String>;

/// Runs a [`BandProcessor`] over every discovered band with at most
/// `max_workers` conversions in flight.
///
/// A failing or panicking band is logged and left out of the results; it never
/// cancels the others. `run` returns only once every band has finished.
pub struct BandOrchestrator {
    processor: Arc<dyn BandProcessor>,
    max_workers: usize,
}

impl BandOrchestrator {
    pub fn new(processor: Arc<dyn BandProcessor>, max_workers: usize) -> Self {
        Self {
            processor,
            max_workers: max_workers.max(1),
        }
    }

    #[instrument(skip_all, fields(bands = subdatasets.len(), max_workers = self.max_workers))]
    pub async fn run(&self, subdatasets: Subdatasets) -> ConversionResults {
        let mut results = ConversionResults::new();

        if subdatasets.is_empty() {
            info!("No subdatasets to process");
            return results;
        }

        let processor = self.processor.clone();
        let mut completions = stream::iter(subdatasets)
            .map(move |(band, path)| {
                let processor = processor.clone();
                async move {
                    let outcome = AssertUnwindSafe(processor.process_band(&band, &path))
                        .catch_unwind()
                        .await;
                    (band, outcome)
                }
            })
            .buffer_unordered(self.max_workers);

        while let Some((band, outcome)) = completions.next().await {
            match outcome {
                Ok(Ok(location)) => {
                    metrics::counter!("cog_trigger.bands.converted").increment(1);
                    results.insert(band, location);
                }
                Ok(Err(e)) => {
                    metrics::counter!("cog_trigger.bands.failed").increment(1);
                    error!(band = %band, error = %e, "Failed to process band {}", band);
                }
                Err(panic) => {
                    metrics::counter!("cog_trigger.bands.failed").increment(1);
                    error!(
                        band = %band,
                        panic = %panic_message(panic.as_ref()),
                        "Band {} failed", band
                    );
                }
            }
        }

        info!(converted = results.len(), "Band processing finished");
        results
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
