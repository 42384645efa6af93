//! Turns source flag definitions into destination gate payloads.
//!
//! Nothing in here performs I/O: the translators are plain functions over the
//! extracted flags, so every targeting decision can be tested in isolation.
use std::fmt;

use thiserror::Error;

mod flags;
mod rules;

pub use flags::{FlagTranslator, TranslatedFlag, Translation, TranslationSettings};
pub use rules::{AttributeMapping, RuleTranslator, SourceOperator, FALLTHROUGH_RULE_NAME};

/// Which rule of an environment a percentage was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    Rule(usize),
    Fallthrough,
}

impl fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleTarget::Rule(index) => write!(f, "rule {index}"),
            RuleTarget::Fallthrough => write!(f, "fallthrough"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslationError {
    #[error("unsupported clause operator '{0}'")]
    UnsupportedOperator(String),
    #[error("{target} in environment '{environment}' has neither a variation nor a rollout")]
    MissingVariationOrRollout {
        environment: String,
        target: RuleTarget,
    },
    #[error("{target} in environment '{environment}' has a rollout without variations")]
    EmptyRollout {
        environment: String,
        target: RuleTarget,
    },
    #[error("{target} in environment '{environment}' serves variation {index}, boolean flags only have 0 and 1")]
    UnsupportedVariation {
        environment: String,
        target: RuleTarget,
        index: u32,
    },
    #[error("targets in environment '{environment}' serve variation {index}, boolean flags only have 0 and 1")]
    UnsupportedTargetVariation { environment: String, index: u32 },
    #[error("variation {index} is expected to be {expected}")]
    VariationPolarityMismatch { index: usize, expected: bool },
}
