use thiserror::Error;

use crate::domain::policy::PolicyCode;

/// Problems with a policy set that make it unusable. Detected once, when the set is loaded.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("policy set has no default policy")]
    MissingDefaultPolicy,
    #[error("policy set has more than one default policy: {}", join_codes(codes))]
    MultipleDefaultPolicies { codes: Vec<PolicyCode> },
    #[error("default policy `{policy_code}` must apply to every order: {reason}")]
    RestrictedDefaultPolicy { policy_code: PolicyCode, reason: String },
    #[error("policy code `{0}` is declared more than once")]
    DuplicatePolicyCode(PolicyCode),
    #[error("policy `{policy_code}` has invalid tiers: {reason}")]
    InvalidTiers { policy_code: PolicyCode, reason: String },
    #[error(
        "policy `{policy_code}` excludes `{excluded}` but `{excluded}` does not exclude it back"
    )]
    AsymmetricExclusivity { policy_code: PolicyCode, excluded: PolicyCode },
    #[error("policy `{0}` lists itself in exclusive_with")]
    SelfExclusion(PolicyCode),
    #[error("policy `{0}` has valid_from after valid_until")]
    InvalidValidityWindow(PolicyCode),
    #[error("policy `{policy_code}` has {lower} greater than {upper}")]
    InvertedBounds { policy_code: PolicyCode, lower: &'static str, upper: &'static str },
    #[error("policy `{policy_code}` has a negative {field}")]
    NegativeValue { policy_code: PolicyCode, field: &'static str },
    #[error("policy `{policy_code}` has usage {current} above its total cap {cap}")]
    UsageOverCap { policy_code: PolicyCode, current: u64, cap: u64 },
}

fn join_codes(codes: &[PolicyCode]) -> String {
    codes.iter().map(PolicyCode::as_str).collect::<Vec<_>>().join(", ")
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("usage quota exceeded for policy `{policy_code}`")]
    QuotaExceeded { policy_code: PolicyCode },
    #[error("usage storage failure: {0}")]
    Storage(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("invalid order context: {0}")]
    InvalidOrder(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApplicationError {
    /// Stable machine-readable class for operator tooling.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "policy_configuration",
            Self::InvalidOrder(_) => "invalid_order",
            Self::Persistence(_) => "persistence",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::policy::PolicyCode;
    use crate::errors::{ApplicationError, ConfigurationError};

    #[test]
    fn configuration_error_lifts_into_application_error() {
        let error = ApplicationError::from(ConfigurationError::MissingDefaultPolicy);

        assert_eq!(error.error_class(), "policy_configuration");
        assert_eq!(error.to_string(), "policy set has no default policy");
    }

    #[test]
    fn multiple_defaults_message_lists_every_code() {
        let error = ConfigurationError::MultipleDefaultPolicies {
            codes: vec![PolicyCode::from("BASE-A"), PolicyCode::from("BASE-B")],
        };

        assert_eq!(
            error.to_string(),
            "policy set has more than one default policy: BASE-A, BASE-B"
        );
    }

    #[test]
    fn persistence_error_has_its_own_class() {
        let error = ApplicationError::Persistence("database is locked".to_owned());
        assert_eq!(error.error_class(), "persistence");
    }
}
