use std::collections::{HashMap, HashSet};

use migration_common::destination::{
    DestinationFlag, DestinationOverride, DestinationRule, GateType,
};
use migration_common::source::{SourceFlag, SourceTarget};
use serde_json::Value;
use tracing::debug;

use super::rules::{AttributeMapping, RuleTranslator};
use super::TranslationError;

pub const PRODUCTION_ENVIRONMENT: &str = "production";

#[derive(Debug, Clone, Default)]
pub struct TranslationSettings {
    /// Added to every gate so a rerun can find and delete what it created.
    pub migration_tag: String,
    pub attributes: AttributeMapping,
    /// Project key to (source environment to destination environment).
    pub environment_renames: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Gate {
        flag: DestinationFlag,
        overrides: Vec<DestinationOverride>,
    },
    /// Only boolean flags map onto gates.
    NeedsManualMigration,
}

/// A source flag paired with what it translated into.
#[derive(Debug, Clone)]
pub struct TranslatedFlag {
    pub source: SourceFlag,
    pub translation: Result<Translation, TranslationError>,
}

pub struct FlagTranslator {
    rules: RuleTranslator,
    migration_tag: String,
    environment_renames: HashMap<String, HashMap<String, String>>,
}

impl FlagTranslator {
    pub fn new(settings: TranslationSettings) -> Self {
        Self {
            rules: RuleTranslator::new(settings.attributes),
            migration_tag: settings.migration_tag,
            environment_renames: settings.environment_renames,
        }
    }

    pub fn migration_tag(&self) -> &str {
        &self.migration_tag
    }

    pub fn translate_all(&self, flags: Vec<SourceFlag>) -> Vec<TranslatedFlag> {
        flags
            .into_iter()
            .map(|source| {
                let translation = self.translate(&source);
                if let Err(e) = &translation {
                    debug!("could not translate flag {}: {}", source.key, e);
                }
                TranslatedFlag {
                    source,
                    translation,
                }
            })
            .collect()
    }

    pub fn translate(&self, flag: &SourceFlag) -> Result<Translation, TranslationError> {
        if !flag.is_boolean() {
            return Ok(Translation::NeedsManualMigration);
        }
        check_variation_polarity(flag)?;

        let mut rules = Vec::new();
        let mut overrides = Vec::new();
        for (source_name, environment) in &flag.environments {
            let environment_name = self.destination_environment(&flag.project, source_name);

            if !environment.targets.is_empty() {
                overrides.push(build_override(environment_name, &environment.targets)?);
            }
            for (index, rule) in environment.rules.iter().enumerate() {
                rules.push(
                    self.rules
                        .translate_rule(rule, environment_name, environment, index)?,
                );
            }
            rules.push(
                self.rules
                    .translate_fallthrough(environment_name, environment)?,
            );
        }

        let gate = DestinationFlag {
            name: flag.key.clone(),
            description: flag.description.clone().unwrap_or_default(),
            gate_type: if flag.temporary {
                GateType::Temporary
            } else {
                GateType::Permanent
            },
            is_enabled: flag.environments.values().any(|e| e.enabled),
            rules: production_first(rules),
            tags: self.gate_tags(flag),
        };

        Ok(Translation::Gate {
            flag: gate,
            overrides,
        })
    }

    fn destination_environment<'a>(&'a self, project: &str, environment: &'a str) -> &'a str {
        self.environment_renames
            .get(project)
            .and_then(|renames| renames.get(environment))
            .map_or(environment, String::as_str)
    }

    fn gate_tags(&self, flag: &SourceFlag) -> Vec<String> {
        let mut seen = HashSet::new();
        std::iter::once(&self.migration_tag)
            .chain(&flag.tags)
            .filter(|tag| seen.insert(tag.as_str()))
            .cloned()
            .collect()
    }
}

/// Gates pass for variation 0 and fail for variation 1, so a flag serving
/// `false` first would come out inverted.
fn check_variation_polarity(flag: &SourceFlag) -> Result<(), TranslationError> {
    for (index, expected) in [(0, true), (1, false)] {
        match flag.variations.get(index) {
            Some(variation) if variation.value != Value::Bool(expected) => {
                return Err(TranslationError::VariationPolarityMismatch { index, expected })
            }
            _ => {}
        }
    }
    Ok(())
}

fn build_override(
    environment_name: &str,
    targets: &[SourceTarget],
) -> Result<DestinationOverride, TranslationError> {
    let mut environment_override = DestinationOverride::for_users(environment_name);
    for target in targets {
        let ids = match target.variation {
            0 => &mut environment_override.passing_ids,
            1 => &mut environment_override.failing_ids,
            index => {
                return Err(TranslationError::UnsupportedTargetVariation {
                    environment: environment_name.to_owned(),
                    index,
                })
            }
        };
        ids.extend(target.values.iter().cloned());
    }
    Ok(environment_override)
}

fn production_first(rules: Vec<DestinationRule>) -> Vec<DestinationRule> {
    let (production, others): (Vec<_>, Vec<_>) = rules
        .into_iter()
        .partition(|rule| rule.targets_environment(PRODUCTION_ENVIRONMENT));
    production.into_iter().chain(others).collect()
}
