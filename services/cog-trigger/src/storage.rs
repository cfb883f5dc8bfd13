use crate::config::{Config, DestinationConfig};
use crate::error::{Result, TriggerError};
use async_trait::async_trait;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client as S3Client;
use aws_types::SdkConfig;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

const COG_CONTENT_TYPE: &str = "image/tiff";

/// Destination object store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    /// Upload a local file to `bucket/key` with the given canned ACL
    async fn upload_file(&self, local_path: &Path, bucket: &str, key: &str, acl: &str) -> Result<()>;
}

/// `s3://bucket/key` location string
pub fn s3_uri(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

/// S3 uploader for converted artifacts
pub struct S3Uploader {
    client: S3Client,
    multipart_threshold_bytes: u64,
    part_size_bytes: usize,
}

impl S3Uploader {
    /// Create a new S3 uploader
    pub fn new(sdk_config: &SdkConfig, config: &Config) -> Self {
        let mut s3_config_builder = S3ConfigBuilder::from(sdk_config);

        // Force path-style access for LocalStack/MinIO
        if config.aws.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.destination.bucket,
            region = %config.aws.region,
            "S3 uploader initialized"
        );

        Self::with_client(client, &config.destination)
    }

    pub fn with_client(client: S3Client, destination: &DestinationConfig) -> Self {
        Self {
            client,
            multipart_threshold_bytes: destination.multipart_threshold_bytes,
            part_size_bytes: destination.part_size_bytes,
        }
    }

    /// Single-request upload for artifacts below the multipart threshold
    async fn simple_upload(&self, local_path: &Path, bucket: &str, key: &str, acl: &str) -> Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| upload_error(key, e))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(COG_CONTENT_TYPE)
            .acl(ObjectCannedAcl::from(acl))
            .send()
            .await
            .map_err(|e| upload_error(key, DisplayErrorContext(e)))?;

        Ok(())
    }

    /// Multipart upload for large artifacts; aborted on any part failure
    async fn multipart_upload(&self, local_path: &Path, bucket: &str, key: &str, acl: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(COG_CONTENT_TYPE)
            .acl(ObjectCannedAcl::from(acl))
            .send()
            .await
            .map_err(|e| upload_error(key, DisplayErrorContext(e)))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| upload_error(key, "no upload ID in response"))?
            .to_string();

        match self.upload_parts(local_path, bucket, key, &upload_id).await {
            Ok(parts) => {
                let completed_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await
                    .map_err(|e| upload_error(key, DisplayErrorContext(e)))?;

                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key = %key,
                        error = %DisplayErrorContext(abort_err),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>> {
        let mut file = File::open(local_path).await?;
        let mut completed_parts = Vec::new();
        let mut part_number = 1;
        let mut buf = Vec::with_capacity(self.part_size_bytes);

        loop {
            let read = read_part(&mut file, &mut buf, self.part_size_bytes).await?;
            if read == 0 {
                break;
            }

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buf.clone()))
                .send()
                .await
                .map_err(|e| upload_error(key, DisplayErrorContext(e)))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
            part_number += 1;
        }

        debug!(key = %key, parts = completed_parts.len(), "Uploaded multipart parts");
        Ok(completed_parts)
    }
}

#[async_trait]
impl ObjectUploader for S3Uploader {
    #[instrument(skip_all, fields(bucket = %bucket, key = %key))]
    async fn upload_file(&self, local_path: &Path, bucket: &str, key: &str, acl: &str) -> Result<()> {
        let size_bytes = tokio::fs::metadata(local_path).await?.len();

        debug!(size_bytes, "Uploading artifact to S3");

        if size_bytes > self.multipart_threshold_bytes {
            self.multipart_upload(local_path, bucket, key, acl).await?;
        } else {
            self.simple_upload(local_path, bucket, key, acl).await?;
        }

        info!(size_bytes, "Artifact uploaded successfully");
        Ok(())
    }
}

/// Fill `buf` with up to `part_size` bytes from `file`; returns the byte count
async fn read_part(file: &mut File, buf: &mut Vec<u8>, part_size: usize) -> std::io::Result<usize> {
    buf.clear();
    let mut limited = (&mut *file).take(part_size as u64);
    limited.read_to_end(buf).await
}

fn upload_error(key: &str, error: impl std::fmt::Display) -> TriggerError {
    TriggerError::Upload {
        key: key.to_string(),
        message: error.to_string(),
    }
}
