//! lifeline-aws — AWS implementations of the lifeline collaborator traits.
//!
//! | Trait | Implementation | Service |
//! |---|---|---|
//! | `QueueBackend` | [`SqsQueue`] | SQS |
//! | `TopicBackend` | [`SnsTopic`] | SNS |
//! | `AutoScalingApi` | [`AwsAutoScaling`] | EC2 Auto Scaling |
//! | `MetricsSink` | [`CloudWatchMetrics`] | CloudWatch |
//! | `LogUploader` | [`S3LogUploader`] | S3 |
//!
//! [`ImdsClient`] reads the instance identity when it is not configured.

pub mod autoscaling;
pub mod cloudwatch;
pub mod error;
pub mod imds;
pub mod s3;
pub mod sns;
pub mod sqs;

pub use autoscaling::AwsAutoScaling;
pub use cloudwatch::CloudWatchMetrics;
pub use error::{AwsError, AwsResult};
pub use imds::{ImdsClient, InstanceIdentity};
pub use s3::S3LogUploader;
pub use sns::SnsTopic;
pub use sqs::SqsQueue;

/// Shared SDK configuration for `region`, credentials from the default
/// provider chain.
pub async fn load_sdk_config(region: &str) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}
