use async_trait::async_trait;
use aws_sdk_cloudwatch::Client;
use aws_sdk_cloudwatch::error::DisplayErrorContext;
use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};
use lifeline_agent::{AgentError, AgentResult, MetricDimensions, MetricsSink};

/// Publishes each notification as a count of one.
pub struct CloudWatchMetrics {
    client: Client,
    namespace: String,
}

impl CloudWatchMetrics {
    pub fn new(config: &aws_config::SdkConfig, namespace: impl Into<String>) -> Self {
        Self {
            client: Client::new(config),
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl MetricsSink for CloudWatchMetrics {
    async fn send_metric(&self, dimensions: &MetricDimensions, name: &str) -> AgentResult<()> {
        let datum = dimensions
            .pairs()
            .into_iter()
            .fold(MetricDatum::builder().metric_name(name), |b, (k, v)| {
                b.dimensions(Dimension::builder().name(k).value(v).build())
            })
            .value(1.0)
            .unit(StandardUnit::Count)
            .build();

        self.client
            .put_metric_data()
            .namespace(&self.namespace)
            .metric_data(datum)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| AgentError::Metrics(DisplayErrorContext(&e).to_string()))
    }
}
