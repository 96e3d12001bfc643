//! ARN construction for queue and topic names.
//!
//! Config may name a topic either by bare name or by full ARN; everything
//! downstream wants the ARN.

/// Whether `name` is already an ARN for `service`.
pub fn is_arn(name: &str, service: &str) -> bool {
    name.strip_prefix("arn:aws:")
        .and_then(|rest| rest.strip_prefix(service))
        .is_some_and(|rest| rest.starts_with(':'))
}

/// Build `arn:aws:<service>:<region>:<account>:<name>`, or return `name`
/// unchanged if it already is an ARN for that service.
pub fn arn_for(service: &str, region: &str, account_id: &str, name: &str) -> String {
    if is_arn(name, service) {
        name.to_string()
    } else {
        format!("arn:aws:{service}:{region}:{account_id}:{name}")
    }
}

/// Region and account that bare resource names are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArnScope {
    pub region: String,
    pub account_id: String,
}

impl ArnScope {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    pub fn normalize(&self, name: &str, service: &str) -> String {
        arn_for(service, &self.region, &self.account_id, name)
    }

    pub fn topic(&self, name: &str) -> String {
        self.normalize(name, "sns")
    }

    pub fn queue(&self, name: &str) -> String {
        self.normalize(name, "sqs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_is_expanded() {
        assert_eq!(
            arn_for("sns", "us-east-1", "123456789012", "lifecycle-events"),
            "arn:aws:sns:us-east-1:123456789012:lifecycle-events"
        );
    }

    #[test]
    fn existing_arn_is_kept() {
        let arn = "arn:aws:sns:eu-west-1:999:events";
        assert_eq!(arn_for("sns", "us-east-1", "123", arn), arn);
    }

    #[test]
    fn arn_for_other_service_is_treated_as_name() {
        assert!(!is_arn("arn:aws:sqs:eu-west-1:999:q", "sns"));
        assert!(!is_arn("arn:aws:snsx:eu-west-1:999:q", "sns"));
    }

    #[test]
    fn scope_helpers() {
        let scope = ArnScope::new("us-west-2", "42");
        assert_eq!(scope.queue("q-1"), "arn:aws:sqs:us-west-2:42:q-1");
        assert_eq!(scope.topic("t"), "arn:aws:sns:us-west-2:42:t");
    }
}
