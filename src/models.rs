//! Model selection against the fixed Bedrock allow-list.
//!
//! Inbound requests name a model freely; only the identifiers in
//! [`SUPPORTED_MODELS`] are forwarded to Bedrock. What happens to anything else
//! is decided by the configured [`ModelPolicy`].

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};

/// Bedrock model identifiers the proxy forwards. The first entry is the default.
///
/// See <https://docs.aws.amazon.com/bedrock/latest/userguide/model-ids.html>.
pub const SUPPORTED_MODELS: &[&str] = &[
    "anthropic.claude-3-sonnet-20240229-v1:0",
    "anthropic.claude-3-haiku-20240307-v1:0",
    "anthropic.claude-3-5-sonnet-20240620-v1:0",
    "anthropic.claude-3-opus-20240229-v1:0",
];

/// The allow-list entry used when a requested model is not supported.
#[must_use]
pub fn default_model() -> &'static str {
    SUPPORTED_MODELS[0]
}

/// Return `requested` if it is on the allow-list, otherwise the default model.
#[must_use]
pub fn choose_model(requested: &str) -> &'static str {
    SUPPORTED_MODELS
        .iter()
        .copied()
        .find(|m| *m == requested)
        .unwrap_or_else(default_model)
}

/// What to do with a request naming a model outside the allow-list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelPolicy {
    /// Substitute the default model and flag the substitution on the response.
    #[default]
    Fallback,
    /// Refuse the request with a client error.
    Reject,
}

/// Outcome of model selection for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChoice {
    pub model_id: &'static str,
    /// The originally requested id when it was replaced by the default.
    pub substituted_for: Option<String>,
}

impl ModelPolicy {
    /// Resolve `requested` to a Bedrock model id under this policy.
    ///
    /// # Errors
    /// Returns `ProxyError::UnsupportedModel` under [`ModelPolicy::Reject`] when
    /// `requested` is not on the allow-list.
    pub fn select(self, requested: &str) -> Result<ModelChoice> {
        let model_id = choose_model(requested);
        if model_id == requested {
            return Ok(ModelChoice {
                model_id,
                substituted_for: None,
            });
        }

        match self {
            Self::Fallback => {
                tracing::warn!(
                    requested,
                    fallback = model_id,
                    "Unsupported model requested, using default"
                );
                Ok(ModelChoice {
                    model_id,
                    substituted_for: Some(requested.to_string()),
                })
            }
            Self::Reject => Err(ProxyError::UnsupportedModel {
                model: requested.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_models_pass_through() {
        for model in SUPPORTED_MODELS {
            assert_eq!(choose_model(model), *model);
        }
    }

    #[test]
    fn test_unknown_models_fall_back_to_first_entry() {
        let samples = [
            "",
            "unknown-model",
            "gpt-4o",
            "anthropic.claude-3-sonnet-20240229-v1",
            "ANTHROPIC.CLAUDE-3-HAIKU-20240307-V1:0",
            " anthropic.claude-3-opus-20240229-v1:0",
        ];
        for sample in samples {
            assert_eq!(choose_model(sample), default_model(), "{sample:?}");
        }
    }

    #[test]
    fn test_fallback_policy_records_substitution() {
        let choice = ModelPolicy::Fallback.select("unknown-model").unwrap();
        assert_eq!(choice.model_id, "anthropic.claude-3-sonnet-20240229-v1:0");
        assert_eq!(choice.substituted_for.as_deref(), Some("unknown-model"));

        let choice = ModelPolicy::Fallback
            .select("anthropic.claude-3-haiku-20240307-v1:0")
            .unwrap();
        assert_eq!(choice.model_id, "anthropic.claude-3-haiku-20240307-v1:0");
        assert!(choice.substituted_for.is_none());
    }

    #[test]
    fn test_reject_policy_refuses_unknown_model() {
        let err = ModelPolicy::Reject.select("unknown-model").unwrap_err();
        assert!(matches!(err, ProxyError::UnsupportedModel { ref model } if model == "unknown-model"));

        assert!(ModelPolicy::Reject
            .select("anthropic.claude-3-opus-20240229-v1:0")
            .is_ok());
    }

    #[test]
    fn test_policy_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: ModelPolicy,
        }
        let w: Wrapper = toml::from_str(r#"policy = "reject""#).unwrap();
        assert_eq!(w.policy, ModelPolicy::Reject);
    }
}
