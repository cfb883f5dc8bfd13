use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Tool-runtime tuning flags applied to every GDAL child process.
///
/// `GDAL_CACHEMAX` is not listed here; it comes from [`GdalConfig::cache_max_mb`].
const DEFAULT_TOOL_OPTIONS: &[(&str, &str)] = &[
    ("GDAL_DISABLE_READDIR_ON_OPEN", "EMPTY_DIR"),
    ("VSI_CACHE", "TRUE"),
    ("VSI_CACHE_SIZE", "5242880"),
    ("GDAL_HTTP_TIMEOUT", "3600"),
    ("CPL_VSIL_CURL_ALLOWED_EXTENSIONS", ".tif,.tiff,.h5"),
    ("VSI_MALLOC_TRIM_THRESHOLD_BYTES", "5000000"),
    ("GDAL_MAX_DATASET_POOL_SIZE", "256"),
    ("CPL_VSIL_USE_TEMP_FILE_FOR_RANDOM_WRITE", "YES"),
];

/// Main configuration for the trigger function
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// AWS client configuration
    #[serde(default)]
    pub aws: AwsConfig,
    /// Destination bucket for COG artifacts
    #[serde(default)]
    pub destination: DestinationConfig,
    /// Metadata table configuration
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Band processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// GDAL tool configuration
    #[serde(default)]
    pub gdal: GdalConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// AWS client configuration shared by the S3 and DynamoDB clients
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Regions the metadata table may live in
    #[serde(default = "default_allowed_regions")]
    pub allowed_regions: Vec<String>,
    /// Upper bound accepted for `processing.max_workers`.
    ///
    /// Checked by [`Config::validate`] only; the SDK clients keep their own
    /// connection pooling.
    #[serde(default = "default_max_pool_connections")]
    pub max_pool_connections: usize,
    /// SDK retry attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Custom endpoint URL (for LocalStack, MinIO, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style S3 access
    #[serde(default)]
    pub force_path_style: bool,
}

/// Destination storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    /// Bucket receiving the converted bands
    #[serde(default = "default_destination_bucket")]
    pub bucket: String,
    /// Canned ACL applied to every upload
    #[serde(default = "default_acl")]
    pub acl: String,
    /// Multipart upload threshold in bytes (64MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: u64,
    /// Part size for multipart uploads in bytes (16MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Metadata table configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// DynamoDB table name
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// Fields that must be present before a record is written
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
}

/// Band processing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum number of bands converted concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Scratch directory for local COG artifacts
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    /// Extension of the uploaded artifacts
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
    /// Per-command timeout in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// GDAL tool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GdalConfig {
    /// Directories searched for the GDAL binaries, in order
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<String>,
    /// GDAL block cache size in MB
    #[serde(default = "default_cache_max_mb")]
    pub cache_max_mb: u32,
    /// Overrides and additions to the built-in tuning flags
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

// Default value functions
fn default_service_name() -> String {
    "cog-trigger".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_region() -> String {
    "ap-south-1".to_string()
}

fn default_allowed_regions() -> Vec<String> {
    vec![
        "ap-south-1".to_string(),
        "us-east-1".to_string(),
        "us-west-2".to_string(),
    ]
}

fn default_max_pool_connections() -> usize {
    50
}

fn default_max_attempts() -> u32 {
    3
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_destination_bucket() -> String {
    "final-cog".to_string()
}

fn default_acl() -> String {
    "bucket-owner-full-control".to_string()
}

fn default_multipart_threshold() -> u64 {
    64 * 1024 * 1024 // 64MB
}

fn default_part_size() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn default_table_name() -> String {
    "Files".to_string()
}

fn default_required_fields() -> Vec<String> {
    vec![
        "Unique_Id".to_string(),
        "Acquisition_Date".to_string(),
        "Acquisition_Time_in_GMT".to_string(),
    ]
}

fn default_max_workers() -> usize {
    5
}

fn default_temp_dir() -> String {
    "/tmp".to_string()
}

fn default_output_extension() -> String {
    "tiff".to_string()
}

fn default_command_timeout_secs() -> u64 {
    600
}

fn default_search_paths() -> Vec<String> {
    let task_root = std::env::var("LAMBDA_TASK_ROOT").unwrap_or_default();
    vec![
        "/usr/bin".to_string(),
        format!("{}/miniconda3/bin", task_root),
    ]
}

fn default_cache_max_mb() -> u32 {
    256
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            allowed_regions: default_allowed_regions(),
            max_pool_connections: default_max_pool_connections(),
            max_attempts: default_max_attempts(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            bucket: default_destination_bucket(),
            acl: default_acl(),
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            required_fields: default_required_fields(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            temp_dir: default_temp_dir(),
            output_extension: default_output_extension(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl Default for GdalConfig {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
            cache_max_mb: default_cache_max_mb(),
            options: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from config files and the environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/cog-trigger").required(false))
            .add_source(config::File::with_name("/etc/cog-trigger/config").required(false))
            // COG_TRIGGER__PROCESSING__MAX_WORKERS -> processing.max_workers
            .add_source(
                config::Environment::with_prefix("COG_TRIGGER")
                    .separator("__")
                    .try_parsing(true),
            )
            // Plain variables set on the deployed function win over everything else
            .set_override_option("destination.bucket", std::env::var("DESTINATION_BUCKET").ok())?
            .set_override_option("aws.region", std::env::var("AWS_DEFAULT_REGION").ok())?
            .set_override_option(
                "processing.max_workers",
                std::env::var("MAX_WORKERS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )?
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destination.bucket.is_empty() {
            return Err(ConfigError::MissingRequired("destination.bucket".to_string()));
        }

        if self.metadata.table_name.is_empty() {
            return Err(ConfigError::MissingRequired("metadata.table_name".to_string()));
        }

        if !self.aws.allowed_regions.iter().any(|r| r == &self.aws.region) {
            return Err(ConfigError::InvalidValue {
                key: "aws.region".to_string(),
                message: format!(
                    "{} is not one of {:?}",
                    self.aws.region, self.aws.allowed_regions
                ),
            });
        }

        if self.processing.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "processing.max_workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.processing.max_workers > self.aws.max_pool_connections {
            return Err(ConfigError::InvalidValue {
                key: "processing.max_workers".to_string(),
                message: format!(
                    "{} exceeds aws.max_pool_connections ({})",
                    self.processing.max_workers, self.aws.max_pool_connections
                ),
            });
        }

        if self.processing.command_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "processing.command_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.destination.part_size_bytes < 5 * 1024 * 1024 {
            return Err(ConfigError::InvalidValue {
                key: "destination.part_size_bytes".to_string(),
                message: "multipart parts must be at least 5MB".to_string(),
            });
        }

        Ok(())
    }

    /// Per-command tool timeout as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.processing.command_timeout_secs)
    }

    /// SDK connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.aws.connect_timeout_secs)
    }

    /// SDK read timeout as Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.aws.read_timeout_secs)
    }

    /// Full child-process environment for GDAL, including the region used by `/vsis3/`
    pub fn tool_environment(&self) -> BTreeMap<String, String> {
        let mut env = self.gdal.runtime_options();
        env.insert("AWS_REGION".to_string(), self.aws.region.clone());
        env
    }
}

impl GdalConfig {
    /// Environment applied to each GDAL child process.
    ///
    /// Built-in flags first, then `GDAL_CACHEMAX`, then user overrides. Keys are
    /// upper-cased because environment-sourced config keys arrive lower-cased.
    pub fn runtime_options(&self) -> BTreeMap<String, String> {
        let mut options: BTreeMap<String, String> = DEFAULT_TOOL_OPTIONS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        options.insert("GDAL_CACHEMAX".to_string(), self.cache_max_mb.to_string());

        for (key, value) in &self.options {
            options.insert(key.to_ascii_uppercase(), value.clone());
        }

        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.destination.bucket, "final-cog");
        assert_eq!(config.aws.region, "ap-south-1");
        assert_eq!(config.metadata.table_name, "Files");
        assert_eq!(config.processing.max_workers, 5);
        assert_eq!(config.command_timeout(), Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_workers_bounded_by_pool_connections() {
        let mut config = Config::default();
        config.aws.max_pool_connections = 4;
        config.processing.max_workers = 5;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "processing.max_workers"));
    }

    #[test]
    fn test_workers_equal_to_pool_connections_accepted() {
        let mut config = Config::default();
        config.aws.max_pool_connections = 5;
        config.processing.max_workers = 5;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.processing.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_region_rejected() {
        let mut config = Config::default();
        config.aws.region = "eu-central-1".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("aws.region"));
    }

    #[test]
    fn test_empty_bucket_rejected() {
        let mut config = Config::default();
        config.destination.bucket.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_runtime_options_defaults() {
        let gdal = GdalConfig::default();
        let options = gdal.runtime_options();

        assert_eq!(options.get("GDAL_CACHEMAX").map(String::as_str), Some("256"));
        assert_eq!(options.get("VSI_CACHE").map(String::as_str), Some("TRUE"));
        assert_eq!(
            options.get("CPL_VSIL_CURL_ALLOWED_EXTENSIONS").map(String::as_str),
            Some(".tif,.tiff,.h5")
        );
        assert_eq!(options.len(), DEFAULT_TOOL_OPTIONS.len() + 1);
    }

    #[test]
    fn test_tool_environment_carries_region() {
        let mut config = Config::default();
        config.aws.region = "us-west-2".to_string();

        let env = config.tool_environment();
        assert_eq!(env.get("AWS_REGION").map(String::as_str), Some("us-west-2"));
        assert!(env.contains_key("GDAL_DISABLE_READDIR_ON_OPEN"));
    }

    #[test]
    fn test_runtime_options_overrides() {
        let mut gdal = GdalConfig::default();
        gdal.cache_max_mb = 512;
        gdal.options.insert("vsi_cache".to_string(), "FALSE".to_string());
        gdal.options.insert("CPL_DEBUG".to_string(), "ON".to_string());

        let options = gdal.runtime_options();
        assert_eq!(options.get("GDAL_CACHEMAX").map(String::as_str), Some("512"));
        assert_eq!(options.get("VSI_CACHE").map(String::as_str), Some("FALSE"));
        assert_eq!(options.get("CPL_DEBUG").map(String::as_str), Some("ON"));
        assert!(!options.contains_key("vsi_cache"));
    }
}
