use crate::error::{Result, TriggerError};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Object-created notification delivered by the storage service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

/// One object change inside an [`S3Event`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3EventRecord {
    #[serde(rename = "eventName", default)]
    pub event_name: Option<String>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Object {
    /// URL-encoded object key
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// The object that triggered this invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub bucket: String,
    pub key: String,
}

impl SourceFile {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Build the source file from the first record of a notification
    pub fn from_event(event: &S3Event) -> Result<Self> {
        let record = event
            .records
            .first()
            .ok_or_else(|| TriggerError::InvalidEvent("event contains no records".to_string()))?;

        if record.s3.bucket.name.is_empty() {
            return Err(TriggerError::InvalidEvent("bucket name is empty".to_string()));
        }

        let key = decode_object_key(&record.s3.object.key)?;
        if key.is_empty() {
            return Err(TriggerError::InvalidEvent("object key is empty".to_string()));
        }

        Ok(Self::new(record.s3.bucket.name.clone(), key))
    }

    /// Parse a raw notification payload
    pub fn from_json(payload: &serde_json::Value) -> Result<Self> {
        let event: S3Event = serde_json::from_value(payload.clone())
            .map_err(|e| TriggerError::InvalidEvent(e.to_string()))?;
        Self::from_event(&event)
    }

    /// GDAL virtual filesystem path reading the object straight from S3
    pub fn vsi_path(&self) -> String {
        format!("/vsis3/{}/{}", self.bucket, self.key)
    }

    /// File name without directories or its last extension
    pub fn stem(&self) -> String {
        Path::new(&self.key)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.key.clone())
    }
}

/// Notification keys are form-encoded: `+` is a space, the rest is percent-encoded
fn decode_object_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|e| TriggerError::InvalidEvent(format!("object key is not valid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(bucket: &str, key: &str) -> serde_json::Value {
        json!({
            "Records": [{
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": bucket, "arn": "arn:aws:s3:::raw" },
                    "object": { "key": key, "size": 1024 }
                }
            }]
        })
    }

    #[test]
    fn test_source_from_event() {
        let source =
            SourceFile::from_json(&event("raw-insat", "L1B/3RIMG_04JAN2024_0015_L1B_STD_V01R00.h5"))
                .unwrap();

        assert_eq!(source.bucket, "raw-insat");
        assert_eq!(source.key, "L1B/3RIMG_04JAN2024_0015_L1B_STD_V01R00.h5");
        assert_eq!(
            source.vsi_path(),
            "/vsis3/raw-insat/L1B/3RIMG_04JAN2024_0015_L1B_STD_V01R00.h5"
        );
        assert_eq!(source.stem(), "3RIMG_04JAN2024_0015_L1B_STD_V01R00");
    }

    #[test]
    fn test_key_is_url_decoded() {
        let source = SourceFile::from_json(&event("raw", "daily+drop/file%3Dv2.h5")).unwrap();
        assert_eq!(source.key, "daily drop/file=v2.h5");
        assert_eq!(source.stem(), "file=v2");
    }

    #[test]
    fn test_empty_records_rejected() {
        let err = SourceFile::from_json(&json!({ "Records": [] })).unwrap_err();
        assert!(matches!(err, TriggerError::InvalidEvent(_)));
    }

    #[test]
    fn test_malformed_event_rejected() {
        let err = SourceFile::from_json(&json!({ "Records": [{ "s3": {} }] })).unwrap_err();
        assert!(matches!(err, TriggerError::InvalidEvent(_)));
    }

    #[test]
    fn test_only_first_record_used() {
        let mut payload = event("first", "a.h5");
        payload["Records"]
            .as_array_mut()
            .unwrap()
            .push(event("second", "b.h5")["Records"][0].clone());

        let source = SourceFile::from_json(&payload).unwrap();
        assert_eq!(source.bucket, "first");
    }
}
