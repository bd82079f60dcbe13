//! Error classification
//!
//! Every provider failure is turned into an immutable [`ErrorRecord`] before
//! it leaves the provider wrapper. Classification walks an ordered rule list
//! and the first matching rule decides the [`ErrorKind`]; retryability and
//! the default severity are derived from the kind alone so the mapping stays
//! deterministic.

use crate::provider::{CapabilityType, ProviderFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Error taxonomy shared by classification, recovery and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Auth,
    Authorization,
    Validation,
    RateLimit,
    Server,
    Application,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Network,
        ErrorKind::Auth,
        ErrorKind::Authorization,
        ErrorKind::Validation,
        ErrorKind::RateLimit,
        ErrorKind::Server,
        ErrorKind::Application,
    ];

    /// Validation and Application errors will not succeed on retry
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Validation | ErrorKind::Application)
    }

    /// Whether a failure of this kind should count against a provider's circuit.
    ///
    /// A validation failure means the provider answered and rejected the input.
    pub fn counts_against_circuit(self) -> bool {
        self != ErrorKind::Validation
    }

    pub fn default_severity(self) -> Severity {
        match self {
            ErrorKind::Validation => Severity::Info,
            ErrorKind::Network | ErrorKind::RateLimit => Severity::Warning,
            ErrorKind::Auth
            | ErrorKind::Authorization
            | ErrorKind::Server
            | ErrorKind::Application => Severity::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Server => "server",
            ErrorKind::Application => "application",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an error happened
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub component: Option<String>,
    pub operation: Option<String>,
    pub provider_id: Option<String>,
    pub user_id: Option<String>,
    pub capability: Option<CapabilityType>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_capability(mut self, capability: CapabilityType) -> Self {
        self.capability = Some(capability);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A classified failure. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub status_code: Option<u16>,
    pub message: String,
    pub context: ErrorContext,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    /// Build a record for `kind` with the kind's default severity and retryability
    pub fn new(kind: ErrorKind, message: impl Into<String>, context: ErrorContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            severity: kind.default_severity(),
            retryable: kind.is_retryable(),
            status_code: None,
            message: message.into(),
            context,
            timestamp: Utc::now(),
        }
    }

    /// A new critical record derived from this one, used when a whole call
    /// could not be served.
    #[must_use]
    pub fn escalated(&self, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            severity: Severity::Critical,
            message: message.into(),
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    pub fn provider_id(&self) -> Option<&str> {
        self.context.provider_id.as_deref()
    }
}

/// One entry of the ordered classification rule list
#[derive(Clone)]
pub struct ClassificationRule {
    pub name: &'static str,
    pub kind: ErrorKind,
    matcher: fn(&ProviderFailure) -> bool,
}

impl ClassificationRule {
    pub fn new(name: &'static str, kind: ErrorKind, matcher: fn(&ProviderFailure) -> bool) -> Self {
        Self {
            name,
            kind,
            matcher,
        }
    }

    pub fn matches(&self, failure: &ProviderFailure) -> bool {
        (self.matcher)(failure)
    }
}

impl fmt::Debug for ClassificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationRule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

fn mentions(failure: &ProviderFailure, needles: &[&str]) -> bool {
    match failure {
        ProviderFailure::Other { message } => {
            let message = message.to_ascii_lowercase();
            needles.iter().any(|needle| message.contains(needle))
        }
        _ => false,
    }
}

fn is_rate_limit_signal(failure: &ProviderFailure) -> bool {
    matches!(
        failure,
        ProviderFailure::RateLimited { .. } | ProviderFailure::Status { status: 429, .. }
    )
}

fn is_auth_failure(failure: &ProviderFailure) -> bool {
    matches!(failure, ProviderFailure::Status { status: 401, .. })
}

fn is_permission_denied(failure: &ProviderFailure) -> bool {
    matches!(failure, ProviderFailure::Status { status: 403, .. })
}

fn is_malformed_input(failure: &ProviderFailure) -> bool {
    matches!(
        failure,
        ProviderFailure::Status {
            status: 400 | 413 | 422,
            ..
        }
    )
}

fn is_server_error(failure: &ProviderFailure) -> bool {
    match failure {
        ProviderFailure::Status { status, .. } => (500..=599).contains(status),
        ProviderFailure::Unavailable { .. } => true,
        _ => false,
    }
}

fn is_transport_failure(failure: &ProviderFailure) -> bool {
    matches!(
        failure,
        ProviderFailure::Timeout { .. } | ProviderFailure::Connection { .. }
    )
}

fn mentions_rate_limit(failure: &ProviderFailure) -> bool {
    mentions(failure, &["rate limit", "throttl", "too many requests"])
}

fn mentions_auth(failure: &ProviderFailure) -> bool {
    mentions(failure, &["unauthorized", "unauthenticated", "invalid api key"])
}

fn mentions_permission(failure: &ProviderFailure) -> bool {
    mentions(failure, &["forbidden", "permission denied", "access denied"])
}

fn mentions_invalid_input(failure: &ProviderFailure) -> bool {
    mentions(failure, &["invalid", "malformed", "validation"])
}

fn mentions_transport(failure: &ProviderFailure) -> bool {
    mentions(failure, &["timeout", "timed out", "connection", "network"])
}

/// The built-in rule list, in evaluation order
pub fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new("rate_limit_signal", ErrorKind::RateLimit, is_rate_limit_signal),
        ClassificationRule::new("auth_failure", ErrorKind::Auth, is_auth_failure),
        ClassificationRule::new("permission_denied", ErrorKind::Authorization, is_permission_denied),
        ClassificationRule::new("malformed_input", ErrorKind::Validation, is_malformed_input),
        ClassificationRule::new("server_error", ErrorKind::Server, is_server_error),
        ClassificationRule::new("transport_failure", ErrorKind::Network, is_transport_failure),
        ClassificationRule::new("message_rate_limit", ErrorKind::RateLimit, mentions_rate_limit),
        ClassificationRule::new("message_auth", ErrorKind::Auth, mentions_auth),
        ClassificationRule::new("message_permission", ErrorKind::Authorization, mentions_permission),
        ClassificationRule::new("message_invalid_input", ErrorKind::Validation, mentions_invalid_input),
        ClassificationRule::new("message_transport", ErrorKind::Network, mentions_transport),
    ]
}

/// Maps raw failures to [`ErrorRecord`]s. Unmatched failures become
/// [`ErrorKind::Application`].
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl ErrorClassifier {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Insert a rule ahead of every existing rule
    #[must_use]
    pub fn with_leading_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn kind_of(&self, failure: &ProviderFailure) -> ErrorKind {
        self.rules
            .iter()
            .find(|rule| rule.matches(failure))
            .map(|rule| rule.kind)
            .unwrap_or(ErrorKind::Application)
    }

    pub fn classify(&self, failure: &ProviderFailure, context: ErrorContext) -> ErrorRecord {
        let kind = self.kind_of(failure);
        let mut record = ErrorRecord::new(kind, failure.to_string(), context);
        record.status_code = failure.status_code();
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ProviderFailure {
        ProviderFailure::Status {
            status: code,
            message: "upstream said no".into(),
        }
    }

    #[test]
    fn test_status_mapping() {
        let classifier = ErrorClassifier::default();
        assert_eq!(classifier.kind_of(&status(429)), ErrorKind::RateLimit);
        assert_eq!(classifier.kind_of(&status(401)), ErrorKind::Auth);
        assert_eq!(classifier.kind_of(&status(403)), ErrorKind::Authorization);
        assert_eq!(classifier.kind_of(&status(400)), ErrorKind::Validation);
        assert_eq!(classifier.kind_of(&status(422)), ErrorKind::Validation);
        assert_eq!(classifier.kind_of(&status(500)), ErrorKind::Server);
        assert_eq!(classifier.kind_of(&status(503)), ErrorKind::Server);
        assert_eq!(classifier.kind_of(&status(404)), ErrorKind::Application);
    }

    #[test]
    fn test_transport_mapping() {
        let classifier = ErrorClassifier::default();
        let timeout = ProviderFailure::Timeout {
            message: "no answer".into(),
        };
        let refused = ProviderFailure::Connection {
            message: "refused".into(),
        };
        assert_eq!(classifier.kind_of(&timeout), ErrorKind::Network);
        assert_eq!(classifier.kind_of(&refused), ErrorKind::Network);
    }

    #[test]
    fn test_message_fallbacks() {
        let classifier = ErrorClassifier::default();
        let cases = [
            ("Rate limit exceeded", ErrorKind::RateLimit),
            ("request throttled", ErrorKind::RateLimit),
            ("Unauthorized access", ErrorKind::Auth),
            ("forbidden resource", ErrorKind::Authorization),
            ("invalid parameter", ErrorKind::Validation),
            ("operation timed out", ErrorKind::Network),
            ("connection reset", ErrorKind::Network),
            ("random error", ErrorKind::Application),
        ];
        for (message, expected) in cases {
            let failure = ProviderFailure::Other {
                message: message.into(),
            };
            assert_eq!(classifier.kind_of(&failure), expected, "{message}");
        }
    }

    #[test]
    fn test_first_rule_wins() {
        // A rate-limit status wins over the keyword rules for the same failure
        let classifier = ErrorClassifier::default();
        let failure = ProviderFailure::RateLimited {
            message: "invalid quota".into(),
            retry_after_ms: Some(500),
        };
        assert_eq!(classifier.kind_of(&failure), ErrorKind::RateLimit);
    }

    #[test]
    fn test_leading_rule_overrides_defaults() {
        fn teapot(failure: &ProviderFailure) -> bool {
            matches!(failure, ProviderFailure::Status { status: 418, .. })
        }
        let classifier = ErrorClassifier::default()
            .with_leading_rule(ClassificationRule::new("teapot", ErrorKind::Validation, teapot));
        assert_eq!(classifier.kind_of(&status(418)), ErrorKind::Validation);
        assert_eq!(classifier.rules()[0].name, "teapot");
    }

    #[test]
    fn test_retryable_derived_from_kind() {
        let classifier = ErrorClassifier::default();
        let ctx = ErrorContext::new().with_provider("a");
        assert!(classifier.classify(&status(500), ctx.clone()).retryable);
        assert!(classifier.classify(&status(429), ctx.clone()).retryable);
        assert!(!classifier.classify(&status(400), ctx.clone()).retryable);
        assert!(!classifier.classify(&status(404), ctx).retryable);
    }

    #[test]
    fn test_record_fields() {
        let classifier = ErrorClassifier::default();
        let ctx = ErrorContext::new()
            .with_component("provider")
            .with_provider("alpha")
            .with_user("user-1")
            .with_detail("region", "eu");
        let record = classifier.classify(&status(502), ctx);
        assert_eq!(record.kind, ErrorKind::Server);
        assert_eq!(record.severity, Severity::Error);
        assert_eq!(record.status_code, Some(502));
        assert_eq!(record.provider_id(), Some("alpha"));
        assert_eq!(record.context.extra.get("region").map(String::as_str), Some("eu"));
        assert!(record.message.contains("502"));
    }

    #[test]
    fn test_escalated_copy() {
        let record = ErrorRecord::new(ErrorKind::Network, "boom", ErrorContext::new());
        let escalated = record.escalated("all providers failed");
        assert_ne!(escalated.id, record.id);
        assert_eq!(escalated.severity, Severity::Critical);
        assert_eq!(escalated.kind, ErrorKind::Network);
        assert_eq!(escalated.message, "all providers failed");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
