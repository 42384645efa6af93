//! Gate definitions in the shape the destination service (Statsig console API) accepts.
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

pub mod statsig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateType {
    Temporary,
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Public,
    UserId,
    Email,
    Country,
    IpAddress,
    PassesSegment,
    CustomField,
    UnitId,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseConditionTypeError(pub String);

/// Allow casting `ConditionType` from the same strings the console API uses.
impl FromStr for ConditionType {
    type Err = ParseConditionTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "public" => Ok(ConditionType::Public),
            "user_id" => Ok(ConditionType::UserId),
            "email" => Ok(ConditionType::Email),
            "country" => Ok(ConditionType::Country),
            "ip_address" => Ok(ConditionType::IpAddress),
            "passes_segment" => Ok(ConditionType::PassesSegment),
            "custom_field" => Ok(ConditionType::CustomField),
            "unit_id" => Ok(ConditionType::UnitId),
            invalid => Err(ParseConditionTypeError(invalid.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Never passes. Used where the source operator has no faithful equivalent.
    #[serde(rename = "none")]
    Unsatisfiable,
    Any,
    StrMatches,
    StrContainsAny,
    StrContainsNone,
    VersionEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Before,
    After,
    PassesSegment,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DestinationCondition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operator: Option<ConditionOperator>,
    #[serde(
        rename = "targetValue",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub target_value: Option<Vec<Value>>,
    /// Attribute name, for `custom_field` conditions.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field: Option<String>,
    /// Unit id type, for `unit_id` conditions.
    #[serde(rename = "customID", skip_serializing_if = "Option::is_none", default)]
    pub custom_id: Option<String>,
}

impl DestinationCondition {
    /// The unconditional audience.
    pub fn public() -> Self {
        Self {
            condition_type: ConditionType::Public,
            operator: None,
            target_value: None,
            field: None,
            custom_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DestinationRule {
    pub name: String,
    #[serde(rename = "passPercentage")]
    pub pass_percentage: f64,
    pub conditions: Vec<DestinationCondition>,
    pub environments: Vec<String>,
}

impl DestinationRule {
    pub fn targets_environment(&self, environment: &str) -> bool {
        self.environments.iter().any(|e| e == environment)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DestinationFlag {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub gate_type: GateType,
    #[serde(rename = "isEnabled")]
    pub is_enabled: bool,
    pub rules: Vec<DestinationRule>,
    pub tags: Vec<String>,
}

pub const USER_ID_UNIT: &str = "userID";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DestinationOverride {
    pub environment: String,
    #[serde(rename = "unitID")]
    pub unit_id: String,
    #[serde(rename = "passingIDs")]
    pub passing_ids: Vec<String>,
    #[serde(rename = "failingIDs")]
    pub failing_ids: Vec<String>,
}

impl DestinationOverride {
    pub fn for_users(environment: &str) -> Self {
        Self {
            environment: environment.to_owned(),
            unit_id: USER_ID_UNIT.to_owned(),
            passing_ids: Vec::new(),
            failing_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Tag {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTag {
    pub name: String,
    pub description: String,
}

/// A gate as listed by the destination; only what's needed to delete it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GateSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// What the destination assigned to a freshly created gate.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CreatedGate {
    pub id: String,
    pub name: String,
    /// Milliseconds since epoch.
    #[serde(rename = "createdTime", default)]
    pub created_time: Option<i64>,
}

/// Write access to the destination flag service.
#[async_trait]
pub trait DestinationClient: Send + Sync {
    async fn list_tags(&self) -> Result<Vec<Tag>, ClientError>;
    async fn create_tag(&self, tag: &NewTag) -> Result<Tag, ClientError>;
    async fn list_gates_by_tag(&self, tag: &str) -> Result<Vec<GateSummary>, ClientError>;
    async fn create_gate(&self, gate: &DestinationFlag) -> Result<CreatedGate, ClientError>;
    async fn delete_gate(&self, id: &str) -> Result<(), ClientError>;
    async fn create_overrides(
        &self,
        gate_id: &str,
        overrides: &[DestinationOverride],
    ) -> Result<(), ClientError>;
}
