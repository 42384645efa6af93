//! Flag definitions as the source service (LaunchDarkly) serves them.
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

pub mod launchdarkly;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    Boolean,
    Multivariate,
    #[serde(other)]
    Unknown,
}

/// A flag as returned by the project listing. Only the fields needed to fetch
/// the full definition are kept.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceFlagSummary {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Maintainer {
    #[serde(rename = "firstName", default)]
    pub first_name: Option<String>,
    #[serde(rename = "lastName", default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Maintainer {
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Variation {
    pub value: Value,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceFlag {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: FlagKind,
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Not part of the source payload: set when the flag is extracted.
    #[serde(default)]
    pub project: String,
    #[serde(rename = "creationDate", default)]
    pub creation_date: Option<i64>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(rename = "_maintainer", default)]
    pub maintainer: Option<Maintainer>,
    #[serde(default)]
    pub environments: IndexMap<String, SourceEnvironment>,
}

impl SourceFlag {
    pub fn is_boolean(&self) -> bool {
        self.kind == FlagKind::Boolean
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SiteLink {
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceEnvironment {
    #[serde(rename = "on", default)]
    pub enabled: bool,
    #[serde(rename = "offVariation", default)]
    pub off_variation: Option<u32>,
    #[serde(default)]
    pub rules: Vec<SourceRule>,
    #[serde(default)]
    pub fallthrough: Fallthrough,
    #[serde(default)]
    pub targets: Vec<SourceTarget>,
    #[serde(rename = "_site", default)]
    pub site: Option<SiteLink>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WeightedVariation {
    pub variation: u32,
    /// Thousandths of a percent: 100000 is the whole population.
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Rollout {
    #[serde(default)]
    pub variations: Vec<WeightedVariation>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Fallthrough {
    #[serde(default)]
    pub variation: Option<u32>,
    #[serde(default)]
    pub rollout: Option<Rollout>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceRule {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub clauses: Vec<SourceClause>,
    #[serde(default)]
    pub variation: Option<u32>,
    #[serde(default)]
    pub rollout: Option<Rollout>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceClause {
    pub attribute: String,
    pub op: String,
    #[serde(default)]
    pub negate: bool,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(rename = "contextKind", default)]
    pub context_kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceTarget {
    #[serde(default)]
    pub values: Vec<String>,
    pub variation: u32,
}

/// Read access to the source flag service.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Every flag in a project, across all pages.
    async fn list_flags(&self, project: &str) -> Result<Vec<SourceFlagSummary>, ClientError>;
    /// The full definition of one flag, including per-environment targeting.
    async fn get_flag(&self, project: &str, key: &str) -> Result<SourceFlag, ClientError>;
}
