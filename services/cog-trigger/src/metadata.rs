//! Instrument and acquisition metadata: extraction with `gdalinfo -json`,
//! normalization into a flat record, and a single write to the metadata table.

use crate::config::{AwsConfig, ConfigError, MetadataConfig};
use crate::error::{Result, TriggerError};
use crate::gdal::GdalBinaries;
use crate::tool::ToolRunner;
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_types::SdkConfig;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const DATE_FIELD: &str = "Acquisition_Date";
const TIME_FIELD: &str = "Acquisition_Time_in_GMT";
const TIMESTAMP_FIELD: &str = "acquisition_timestamp";

/// A metadata field value as stored in the table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
}

impl MetadataValue {
    /// Table attribute; non-finite numbers have no numeric encoding and are stored as text
    pub fn to_attribute(&self) -> AttributeValue {
        match self {
            MetadataValue::Text(s) => AttributeValue::S(s.clone()),
            MetadataValue::Number(n) if n.is_finite() => AttributeValue::N(n.to_string()),
            MetadataValue::Number(n) => AttributeValue::S(n.to_string()),
        }
    }
}

/// Flat field name → value mapping written once per source file
pub type MetadataRecord = BTreeMap<String, MetadataValue>;

/// Raw metadata as reported by the tool, after domain flattening
pub type RawMetadata = Map<String, Value>;

/// Key-value store receiving metadata records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataTable: Send + Sync {
    async fn put_record(&self, table: &str, record: &MetadataRecord) -> Result<()>;
}

/// DynamoDB-backed [`MetadataTable`]
pub struct DynamoDbTable {
    client: DynamoDbClient,
}

impl DynamoDbTable {
    /// Create a table client, refusing regions outside the allowed list
    pub fn new(sdk_config: &SdkConfig, aws: &AwsConfig) -> std::result::Result<Self, ConfigError> {
        if !aws.allowed_regions.iter().any(|r| r == &aws.region) {
            return Err(ConfigError::InvalidValue {
                key: "aws.region".to_string(),
                message: format!("Invalid region. Must be one of {:?}", aws.allowed_regions),
            });
        }

        let client = DynamoDbClient::new(sdk_config);
        info!(region = %aws.region, "DynamoDB metadata table client initialized");

        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataTable for DynamoDbTable {
    async fn put_record(&self, table: &str, record: &MetadataRecord) -> Result<()> {
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(to_item(record)))
            .send()
            .await
            .map_err(|e| TriggerError::Store(DisplayErrorContext(e).to_string()))?;

        Ok(())
    }
}

/// Convert a record into table attributes
pub fn to_item(record: &MetadataRecord) -> HashMap<String, AttributeValue> {
    record
        .iter()
        .map(|(k, v)| (k.clone(), v.to_attribute()))
        .collect()
}

/// Flatten the `metadata` section of `gdalinfo -json` output.
///
/// Entries of the default (unnamed) domain land at the top level; every named
/// domain becomes a single entry holding that domain's object.
pub fn flatten_metadata(info: &Value) -> RawMetadata {
    let mut flattened = RawMetadata::new();

    let Some(domains) = info.get("metadata").and_then(Value::as_object) else {
        return flattened;
    };

    for (domain, values) in domains {
        if domain.is_empty() {
            if let Some(entries) = values.as_object() {
                flattened.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        } else {
            flattened.insert(domain.clone(), values.clone());
        }
    }

    flattened
}

/// Normalize raw metadata into a storable record.
///
/// - null values are dropped
/// - floats stay numeric
/// - a single-element list is replaced by its element
/// - everything else is stringified (containers as compact JSON)
/// - `required_fields` are always stored as text
/// - `acquisition_timestamp` is `{date}T{time}Z` when both parts are present
pub fn process_metadata(raw: &RawMetadata, required_fields: &[String]) -> MetadataRecord {
    let mut processed = MetadataRecord::new();

    for (key, value) in raw {
        if let Some(value) = normalize_value(value) {
            processed.insert(key.clone(), value);
        }
    }

    for field in required_fields {
        if let Some(value) = raw.get(field).filter(|v| !v.is_null()) {
            processed.insert(field.clone(), MetadataValue::Text(stringify(value)));
        }
    }

    let date = raw.get(DATE_FIELD).map(stringify).unwrap_or_default();
    let time = raw.get(TIME_FIELD).map(stringify).unwrap_or_default();
    if !date.is_empty() && !time.is_empty() {
        processed.insert(
            TIMESTAMP_FIELD.to_string(),
            MetadataValue::Text(format!("{}T{}Z", date, time)),
        );
    }

    processed
}

/// Required fields absent from `record`
pub fn missing_required<'a>(record: &MetadataRecord, required_fields: &'a [String]) -> Vec<&'a str> {
    required_fields
        .iter()
        .filter(|field| !record.contains_key(field.as_str()))
        .map(String::as_str)
        .collect()
}

fn normalize_value(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::Null => None,
        Value::Number(n) if n.is_f64() => n.as_f64().map(MetadataValue::Number),
        Value::Array(items) if items.len() == 1 => match &items[0] {
            Value::Null => None,
            Value::String(s) => Some(MetadataValue::Text(s.clone())),
            Value::Number(n) => n.as_f64().map(MetadataValue::Number),
            other => Some(MetadataValue::Text(stringify(other))),
        },
        other => Some(MetadataValue::Text(stringify(other))),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Extracts metadata from a source file and writes it to the table
pub struct MetadataUploader {
    runner: Arc<dyn ToolRunner>,
    table: Arc<dyn MetadataTable>,
    binaries: GdalBinaries,
    table_name: String,
    required_fields: Vec<String>,
    timeout: Duration,
}

impl MetadataUploader {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        table: Arc<dyn MetadataTable>,
        binaries: GdalBinaries,
        config: &MetadataConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            table,
            binaries,
            table_name: config.table_name.clone(),
            required_fields: config.required_fields.clone(),
            timeout,
        }
    }

    /// Run `gdalinfo -json` and flatten its metadata; empty on any failure
    pub async fn extract(&self, source: &str) -> RawMetadata {
        let output = match self.runner.run(&self.binaries.info_json(source), self.timeout).await {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to run gdalinfo");
                return RawMetadata::new();
            }
        };

        match serde_json::from_str::<Value>(&output) {
            Ok(info) => flatten_metadata(&info),
            Err(e) => {
                error!(error = %e, "Failed to parse gdalinfo JSON output");
                RawMetadata::new()
            }
        }
    }

    /// Extract, validate and store metadata for `source`; `true` once written
    #[instrument(skip(self))]
    pub async fn upload_metadata(&self, source: &str) -> bool {
        match self.try_upload(source).await {
            Ok(fields) => {
                metrics::counter!("cog_trigger.metadata.uploaded").increment(1);
                info!(fields, "Successfully uploaded metadata for {}", source);
                true
            }
            Err(e) => {
                metrics::counter!("cog_trigger.metadata.failed").increment(1);
                error!(error = %e, "Failed to upload metadata");
                false
            }
        }
    }

    async fn try_upload(&self, source: &str) -> Result<usize> {
        info!("Extracting metadata from {}", source);

        let raw = self.extract(source).await;
        if raw.is_empty() {
            return Err(TriggerError::Metadata("No metadata extracted".to_string()));
        }

        let record = process_metadata(&raw, &self.required_fields);
        if record.is_empty() {
            return Err(TriggerError::Metadata("Failed to process metadata".to_string()));
        }

        let missing = missing_required(&record, &self.required_fields);
        if !missing.is_empty() {
            warn!(missing = ?missing, "Metadata record rejected");
            return Err(TriggerError::Metadata(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        debug!(fields = record.len(), table = %self.table_name, "Writing metadata record");
        self.table.put_record(&self.table_name, &record).await?;

        Ok(record.len())
    }
}
