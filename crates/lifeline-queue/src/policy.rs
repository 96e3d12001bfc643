//! Queue access policy.

use serde_json::json;

/// Policy letting only `topic_arn` deliver messages into `queue_arn`.
pub fn access_policy(queue_arn: &str, topic_arn: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Id": format!("{queue_arn}/SendFromTopic"),
        "Statement": [{
            "Sid": "AllowTopicDelivery",
            "Effect": "Allow",
            "Principal": { "Service": "sns.amazonaws.com" },
            "Action": "sqs:SendMessage",
            "Resource": queue_arn,
            "Condition": {
                "ArnEquals": { "aws:SourceArn": topic_arn }
            }
        }]
    })
    .to_string()
}
