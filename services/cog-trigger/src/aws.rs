use crate::config::Config;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_types::SdkConfig;
use tracing::info;

/// Shared SDK configuration for the S3 and DynamoDB clients
pub async fn load_sdk_config(config: &Config) -> SdkConfig {
    let timeouts = TimeoutConfig::builder()
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.read_timeout())
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws.region.clone()))
        .retry_config(RetryConfig::standard().with_max_attempts(config.aws.max_attempts))
        .timeout_config(timeouts);

    if let Some(ref endpoint_url) = config.aws.endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }

    let sdk_config = loader.load().await;

    info!(
        region = %config.aws.region,
        max_attempts = config.aws.max_attempts,
        "AWS SDK configuration loaded"
    );

    sdk_config
}
