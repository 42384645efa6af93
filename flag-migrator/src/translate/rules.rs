use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use migration_common::destination::{
    ConditionOperator, ConditionType, DestinationCondition, DestinationRule,
};
use migration_common::source::{Rollout, SourceClause, SourceEnvironment, SourceRule};
use serde_json::Value;

use super::{RuleTarget, TranslationError};

pub const FALLTHROUGH_RULE_NAME: &str = "Fall through imported rule";

const REGEX_METACHARACTERS: [char; 14] = [
    '.', '*', '+', '?', '^', '$', '{', '}', '(', ')', '|', '[', ']', '\\',
];

/// Where a source attribute lands on the destination side.
///
/// The built-in table covers the attributes both services understand natively.
/// Unit id attributes win over the table; anything unknown becomes a custom field.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMapping {
    condition_types: HashMap<String, ConditionType>,
    unit_id_attributes: HashSet<String>,
}

impl Default for AttributeMapping {
    fn default() -> Self {
        let condition_types = [
            ("country", ConditionType::Country),
            ("email", ConditionType::Email),
            ("key", ConditionType::UserId),
            ("ip", ConditionType::IpAddress),
            ("segmentMatch", ConditionType::PassesSegment),
        ]
        .into_iter()
        .map(|(attribute, condition_type)| (attribute.to_owned(), condition_type))
        .collect();

        Self {
            condition_types,
            unit_id_attributes: HashSet::new(),
        }
    }
}

impl AttributeMapping {
    pub fn with_condition_type(mut self, attribute: &str, condition_type: ConditionType) -> Self {
        self.condition_types.insert(attribute.to_owned(), condition_type);
        self
    }

    pub fn with_unit_id_attribute(mut self, attribute: &str) -> Self {
        self.unit_id_attributes.insert(attribute.to_owned());
        self
    }

    /// Condition type plus the `field` / `customID` the condition needs.
    fn resolve(&self, attribute: &str) -> (ConditionType, Option<String>, Option<String>) {
        if self.unit_id_attributes.contains(attribute) {
            return (ConditionType::UnitId, None, Some(attribute.to_owned()));
        }
        match self.condition_types.get(attribute) {
            Some(condition_type) => (condition_type.clone(), None, None),
            None => (ConditionType::CustomField, Some(attribute.to_owned()), None),
        }
    }
}

/// Clause operators the source service can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOperator {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Before,
    After,
    In,
    Matches,
    Contains,
    SemVerEqual,
    StartsWith,
    EndsWith,
    SegmentMatch,
}

impl FromStr for SourceOperator {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lessThan" => Ok(SourceOperator::LessThan),
            "lessThanOrEqual" => Ok(SourceOperator::LessThanOrEqual),
            "greaterThan" => Ok(SourceOperator::GreaterThan),
            "greaterThanOrEqual" => Ok(SourceOperator::GreaterThanOrEqual),
            "before" => Ok(SourceOperator::Before),
            "after" => Ok(SourceOperator::After),
            "in" => Ok(SourceOperator::In),
            "matches" => Ok(SourceOperator::Matches),
            "contains" => Ok(SourceOperator::Contains),
            "semVerEqual" => Ok(SourceOperator::SemVerEqual),
            "startsWith" => Ok(SourceOperator::StartsWith),
            "endsWith" => Ok(SourceOperator::EndsWith),
            "segmentMatch" => Ok(SourceOperator::SegmentMatch),
            unknown => Err(TranslationError::UnsupportedOperator(unknown.to_owned())),
        }
    }
}

impl SourceOperator {
    /// Negations without an exact destination counterpart keep the closest
    /// operator, or collapse to `none` when nothing close exists.
    pub fn destination_operator(self, negate: bool) -> ConditionOperator {
        match (self, negate) {
            (SourceOperator::LessThan, false) => ConditionOperator::Lt,
            (SourceOperator::LessThan, true) => ConditionOperator::Gte,
            (SourceOperator::LessThanOrEqual, _) => ConditionOperator::Lte,
            (SourceOperator::GreaterThan, false) => ConditionOperator::Gt,
            (SourceOperator::GreaterThan, true) => ConditionOperator::Lte,
            (SourceOperator::GreaterThanOrEqual, _) => ConditionOperator::Gte,
            (SourceOperator::Before, _) => ConditionOperator::Before,
            (SourceOperator::After, _) => ConditionOperator::After,
            (SourceOperator::In, false) => ConditionOperator::Any,
            (SourceOperator::In, true) => ConditionOperator::Unsatisfiable,
            (SourceOperator::Matches, false) => ConditionOperator::StrMatches,
            (SourceOperator::Matches, true) => ConditionOperator::Unsatisfiable,
            (SourceOperator::Contains, false) => ConditionOperator::StrContainsAny,
            (SourceOperator::Contains, true) => ConditionOperator::StrContainsNone,
            (SourceOperator::SemVerEqual, _) => ConditionOperator::VersionEq,
            (SourceOperator::StartsWith, _) | (SourceOperator::EndsWith, _) => {
                ConditionOperator::StrMatches
            }
            (SourceOperator::SegmentMatch, _) => ConditionOperator::PassesSegment,
        }
    }

    fn rewrite_values(self, values: &[Value]) -> Vec<Value> {
        match self {
            SourceOperator::StartsWith => values
                .iter()
                .map(|v| Value::String(format!("^{}", escape_regex(&value_text(v)))))
                .collect(),
            SourceOperator::EndsWith => values
                .iter()
                .map(|v| Value::String(format!("{}$", escape_regex(&value_text(v)))))
                .collect(),
            SourceOperator::SegmentMatch => values
                .iter()
                .map(|v| Value::String(format!("segment:{}", value_text(v))))
                .collect(),
            SourceOperator::In => values
                .iter()
                .map(|v| match v {
                    Value::String(_) | Value::Number(_) => v.clone(),
                    other => Value::String(other.to_string()),
                })
                .collect(),
            _ => values.to_vec(),
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if REGEX_METACHARACTERS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Pass percentage for one rule of an environment, in [0, 100].
fn pass_percentage(
    environment_name: &str,
    environment: &SourceEnvironment,
    variation: Option<u32>,
    rollout: Option<&Rollout>,
    target: RuleTarget,
) -> Result<f64, TranslationError> {
    // A disabled environment serves its off variation to everyone.
    if !environment.enabled {
        return Ok(if environment.off_variation == Some(0) {
            100.0
        } else {
            0.0
        });
    }

    let percentage = match (rollout, variation) {
        (Some(rollout), _) => {
            let first = rollout
                .variations
                .first()
                .ok_or_else(|| TranslationError::EmptyRollout {
                    environment: environment_name.to_owned(),
                    target,
                })?;
            f64::from(first.weight) / 1000.0
        }
        (None, Some(0)) => 100.0,
        (None, Some(1)) => 0.0,
        (None, Some(index)) => {
            return Err(TranslationError::UnsupportedVariation {
                environment: environment_name.to_owned(),
                target,
                index,
            })
        }
        (None, None) => {
            return Err(TranslationError::MissingVariationOrRollout {
                environment: environment_name.to_owned(),
                target,
            })
        }
    };

    Ok(percentage.clamp(0.0, 100.0))
}

fn rule_name(environment_name: &str, description: Option<&str>, index: usize) -> String {
    match description.filter(|d| !d.is_empty()) {
        Some(description) => format!("({environment_name}) {description} import{index}"),
        None => format!("({environment_name}) import{index}"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleTranslator {
    attributes: AttributeMapping,
}

impl RuleTranslator {
    pub fn new(attributes: AttributeMapping) -> Self {
        Self { attributes }
    }

    pub fn translate_clause(
        &self,
        clause: &SourceClause,
    ) -> Result<DestinationCondition, TranslationError> {
        let operator: SourceOperator = clause.op.parse()?;
        let (condition_type, field, custom_id) = self.attributes.resolve(&clause.attribute);

        Ok(DestinationCondition {
            condition_type,
            operator: Some(operator.destination_operator(clause.negate)),
            target_value: Some(operator.rewrite_values(&clause.values)),
            field,
            custom_id,
        })
    }

    /// Clauses are translated even when the environment is disabled, so that
    /// unsupported operators surface regardless of the environment's state.
    pub fn translate_rule(
        &self,
        rule: &SourceRule,
        environment_name: &str,
        environment: &SourceEnvironment,
        rule_index: usize,
    ) -> Result<DestinationRule, TranslationError> {
        let conditions = rule
            .clauses
            .iter()
            .map(|clause| self.translate_clause(clause))
            .collect::<Result<Vec<_>, _>>()?;
        let pass_percentage = pass_percentage(
            environment_name,
            environment,
            rule.variation,
            rule.rollout.as_ref(),
            RuleTarget::Rule(rule_index),
        )?;

        Ok(DestinationRule {
            name: rule_name(environment_name, rule.description.as_deref(), rule_index),
            pass_percentage,
            conditions,
            environments: vec![environment_name.to_owned()],
        })
    }

    pub fn translate_fallthrough(
        &self,
        environment_name: &str,
        environment: &SourceEnvironment,
    ) -> Result<DestinationRule, TranslationError> {
        let pass_percentage = pass_percentage(
            environment_name,
            environment,
            environment.fallthrough.variation,
            environment.fallthrough.rollout.as_ref(),
            RuleTarget::Fallthrough,
        )?;

        Ok(DestinationRule {
            name: format!("({environment_name}) {FALLTHROUGH_RULE_NAME}"),
            pass_percentage,
            conditions: vec![DestinationCondition::public()],
            environments: vec![environment_name.to_owned()],
        })
    }
}
