use crate::event::SourceFile;
use crate::processor::{Insat3dProcessor, ProcessingOutcome};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, instrument};

/// Function response returned to the invoking runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// JSON document serialized as a string
    pub body: String,
}

impl InvocationResponse {
    pub fn success(outcome: &ProcessingOutcome) -> Self {
        let bands = outcome.processed_bands();
        let body = json!({
            "message": "Processing completed successfully",
            "metadata_processed": outcome.metadata_processed,
            "processed_bands": bands,
            "files_processed": bands,
            "duration_seconds": outcome.duration.as_secs_f64(),
        });

        Self {
            status_code: 200,
            body: body.to_string(),
        }
    }

    pub fn failure(message: impl std::fmt::Display) -> Self {
        Self {
            status_code: 500,
            body: json!({ "error": message.to_string() }).to_string(),
        }
    }
}

/// Handle one trigger payload; every error becomes a 500 response
#[instrument(skip_all)]
pub async fn handle_event(processor: &Insat3dProcessor, payload: &Value) -> InvocationResponse {
    match process_event(processor, payload).await {
        Ok(outcome) => InvocationResponse::success(&outcome),
        Err(e) => {
            error!(error = %e, "Processing failed: {:#}", e);
            InvocationResponse::failure(format!("{:#}", e))
        }
    }
}

async fn process_event(processor: &Insat3dProcessor, payload: &Value) -> Result<ProcessingOutcome> {
    let source = SourceFile::from_json(payload)?;
    let outcome = processor.process(&source).await;

    if outcome.results.is_empty() {
        bail!("No output files generated");
    }

    Ok(outcome)
}
