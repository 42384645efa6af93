//! In-memory flag services and flag builders for tests.
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::IndexMap;
use migration_common::destination::{
    CreatedGate, DestinationClient, DestinationFlag, DestinationOverride, GateSummary, NewTag, Tag,
};
use migration_common::error::ClientError;
use migration_common::source::{
    Fallthrough, FlagKind, Rollout, SourceClause, SourceClient, SourceEnvironment, SourceFlag,
    SourceFlagSummary, SourceRule, SourceTarget, Variation, WeightedVariation,
};
use reqwest::Url;
use serde_json::{json, Value};

fn api_error(status: u16, path: &str, message: &str) -> ClientError {
    let url = Url::parse("http://flags.test/")
        .and_then(|base| base.join(path))
        .expect("test url is valid");
    let body = json!({"message": message}).to_string();
    ClientError::ApiError(status, Box::new(url), body)
}

pub fn boolean_flag(key: &str) -> SourceFlag {
    SourceFlag {
        key: key.to_string(),
        name: Some(key.replace('-', " ")),
        description: None,
        kind: FlagKind::Boolean,
        temporary: false,
        tags: Vec::new(),
        project: String::new(),
        creation_date: None,
        variations: vec![
            Variation {
                value: Value::Bool(true),
                name: None,
            },
            Variation {
                value: Value::Bool(false),
                name: None,
            },
        ],
        maintainer: None,
        environments: IndexMap::new(),
    }
}

pub fn multivariate_flag(key: &str) -> SourceFlag {
    let mut flag = boolean_flag(key);
    flag.kind = FlagKind::Multivariate;
    flag.variations = ["red", "green", "blue"]
        .into_iter()
        .map(|colour| Variation {
            value: json!(colour),
            name: None,
        })
        .collect();
    flag
}

/// Serves variation 0 by default, variation 1 when switched off.
pub fn environment(enabled: bool) -> SourceEnvironment {
    SourceEnvironment {
        enabled,
        off_variation: Some(1),
        rules: Vec::new(),
        fallthrough: Fallthrough {
            variation: Some(0),
            rollout: None,
        },
        targets: Vec::new(),
        site: None,
    }
}

pub fn rule(
    description: Option<&str>,
    clauses: Vec<SourceClause>,
    variation: Option<u32>,
) -> SourceRule {
    SourceRule {
        id: None,
        description: description.map(str::to_string),
        clauses,
        variation,
        rollout: None,
    }
}

pub fn clause(attribute: &str, op: &str, negate: bool, values: Vec<Value>) -> SourceClause {
    SourceClause {
        attribute: attribute.to_string(),
        op: op.to_string(),
        negate,
        values,
        context_kind: None,
    }
}

pub fn rollout(weights: &[(u32, u32)]) -> Rollout {
    Rollout {
        variations: weights
            .iter()
            .map(|(variation, weight)| WeightedVariation {
                variation: *variation,
                weight: *weight,
            })
            .collect(),
    }
}

pub fn target(variation: u32, users: &[&str]) -> SourceTarget {
    SourceTarget {
        values: users.iter().map(|u| u.to_string()).collect(),
        variation,
    }
}

/// Source service holding flags per project, in insertion order.
#[derive(Default)]
pub struct InMemorySource {
    projects: IndexMap<String, Vec<SourceFlag>>,
    failing_projects: HashSet<String>,
    failing_flags: HashSet<String>,
}

impl InMemorySource {
    pub fn with_flag(mut self, project: &str, flag: SourceFlag) -> Self {
        self.projects.entry(project.to_string()).or_default().push(flag);
        self
    }

    pub fn with_failing_project(mut self, project: &str) -> Self {
        self.failing_projects.insert(project.to_string());
        self
    }

    pub fn with_failing_flag(mut self, key: &str) -> Self {
        self.failing_flags.insert(key.to_string());
        self
    }
}

#[async_trait]
impl SourceClient for InMemorySource {
    async fn list_flags(&self, project: &str) -> Result<Vec<SourceFlagSummary>, ClientError> {
        let path = format!("api/v2/flags/{project}");
        if self.failing_projects.contains(project) {
            return Err(api_error(503, &path, "Service unavailable"));
        }
        let flags = self
            .projects
            .get(project)
            .ok_or_else(|| api_error(404, &path, "Unknown project"))?;

        Ok(flags
            .iter()
            .map(|flag| SourceFlagSummary {
                key: flag.key.clone(),
                name: flag.name.clone(),
            })
            .collect())
    }

    async fn get_flag(&self, project: &str, key: &str) -> Result<SourceFlag, ClientError> {
        let path = format!("api/v2/flags/{project}/{key}");
        if self.failing_flags.contains(key) {
            return Err(api_error(500, &path, "Internal error"));
        }
        self.projects
            .get(project)
            .and_then(|flags| flags.iter().find(|flag| flag.key == key))
            .cloned()
            .ok_or_else(|| api_error(404, &path, "Unknown flag"))
    }
}

/// A gate as the in-memory destination stores it.
#[derive(Debug, Clone)]
pub struct StoredGate {
    pub id: String,
    pub gate: DestinationFlag,
}

#[derive(Default)]
struct DestinationState {
    tags: Vec<Tag>,
    gates: Vec<StoredGate>,
    overrides: HashMap<String, Vec<DestinationOverride>>,
    create_gate_calls: Vec<String>,
    created_tags: usize,
    next_id: u64,
}

/// Destination service backed by a mutex-guarded in-memory store.
#[derive(Default)]
pub struct InMemoryDestination {
    state: Mutex<DestinationState>,
    failing_gates: HashSet<String>,
    failing_overrides: HashSet<String>,
    unreachable: bool,
    racing_tag_creation: bool,
    failing_tag_listing: bool,
}

impl InMemoryDestination {
    pub fn with_tag(self, name: &str) -> Self {
        self.lock().tags.push(Tag {
            id: Some(format!("tag-{name}")),
            name: name.to_string(),
            description: None,
        });
        self
    }

    pub fn with_gate(self, gate: DestinationFlag) -> Self {
        {
            let mut state = self.lock();
            state.next_id += 1;
            let id = format!("existing-{}", state.next_id);
            state.gates.push(StoredGate { id, gate });
        }
        self
    }

    pub fn with_failing_gate(mut self, name: &str) -> Self {
        self.failing_gates.insert(name.to_string());
        self
    }

    pub fn with_failing_overrides(mut self, name: &str) -> Self {
        self.failing_overrides.insert(name.to_string());
        self
    }

    /// Every call fails as if the service were down.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Tags never show up in listings and every creation reports a conflict,
    /// as when another writer creates them concurrently.
    pub fn with_racing_tag_creation(mut self) -> Self {
        self.racing_tag_creation = true;
        self
    }

    /// Listing tags fails while every other call keeps working.
    pub fn with_failing_tag_listing(mut self) -> Self {
        self.failing_tag_listing = true;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DestinationState> {
        self.state.lock().expect("destination state lock poisoned")
    }

    fn check_reachable(&self, path: &str) -> Result<(), ClientError> {
        if self.unreachable {
            return Err(api_error(503, path, "Service unavailable"));
        }
        Ok(())
    }

    pub fn gates(&self) -> Vec<StoredGate> {
        self.lock().gates.clone()
    }

    pub fn gates_with_tag(&self, tag: &str) -> Vec<StoredGate> {
        self.gates()
            .into_iter()
            .filter(|stored| stored.gate.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Sorted, so assertions do not depend on creation order.
    pub fn gate_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.gates().into_iter().map(|s| s.gate.name).collect();
        names.sort();
        names
    }

    /// Sorted, so assertions do not depend on creation order.
    pub fn tag_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().tags.iter().map(|t| t.name.clone()).collect();
        names.sort();
        names
    }

    pub fn created_tag_count(&self) -> usize {
        self.lock().created_tags
    }

    pub fn create_gate_calls(&self) -> Vec<String> {
        self.lock().create_gate_calls.clone()
    }

    pub fn overrides_for(&self, gate_id: &str) -> Vec<DestinationOverride> {
        self.lock()
            .overrides
            .get(gate_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DestinationClient for InMemoryDestination {
    async fn list_tags(&self) -> Result<Vec<Tag>, ClientError> {
        self.check_reachable("tags")?;
        if self.failing_tag_listing {
            return Err(api_error(500, "tags", "Internal error"));
        }
        if self.racing_tag_creation {
            return Ok(Vec::new());
        }
        Ok(self.lock().tags.clone())
    }

    async fn create_tag(&self, tag: &NewTag) -> Result<Tag, ClientError> {
        self.check_reachable("tags")?;
        let mut state = self.lock();
        if self.racing_tag_creation || state.tags.iter().any(|t| t.name == tag.name) {
            return Err(api_error(400, "tags", "Tag already exists"));
        }
        let created = Tag {
            id: Some(format!("tag-{}", tag.name)),
            name: tag.name.clone(),
            description: Some(tag.description.clone()),
        };
        state.tags.push(created.clone());
        state.created_tags += 1;
        Ok(created)
    }

    async fn list_gates_by_tag(&self, tag: &str) -> Result<Vec<GateSummary>, ClientError> {
        self.check_reachable("gates")?;
        Ok(self
            .gates_with_tag(tag)
            .into_iter()
            .map(|stored| GateSummary {
                id: stored.id,
                name: Some(stored.gate.name),
            })
            .collect())
    }

    async fn create_gate(&self, gate: &DestinationFlag) -> Result<CreatedGate, ClientError> {
        self.check_reachable("gates")?;
        let mut state = self.lock();
        state.create_gate_calls.push(gate.name.clone());
        if self.failing_gates.contains(&gate.name) {
            return Err(api_error(400, "gates", "Invalid gate"));
        }
        state.next_id += 1;
        let id = format!("gate-{}", state.next_id);
        state.gates.push(StoredGate {
            id: id.clone(),
            gate: gate.clone(),
        });
        Ok(CreatedGate {
            id,
            name: gate.name.clone(),
            created_time: Some(1_700_000_000_000),
        })
    }

    async fn delete_gate(&self, id: &str) -> Result<(), ClientError> {
        let path = format!("gates/{id}");
        self.check_reachable(&path)?;
        let mut state = self.lock();
        let before = state.gates.len();
        state.gates.retain(|stored| stored.id != id);
        if state.gates.len() == before {
            return Err(api_error(404, &path, "Gate not found"));
        }
        Ok(())
    }

    async fn create_overrides(
        &self,
        gate_id: &str,
        overrides: &[DestinationOverride],
    ) -> Result<(), ClientError> {
        let path = format!("gates/{gate_id}/overrides");
        self.check_reachable(&path)?;
        let mut state = self.lock();
        let name = state
            .gates
            .iter()
            .find(|stored| stored.id == gate_id)
            .map(|stored| stored.gate.name.clone())
            .ok_or_else(|| api_error(404, &path, "Gate not found"))?;
        if self.failing_overrides.contains(&name) {
            return Err(api_error(400, &path, "Invalid overrides"));
        }
        state
            .overrides
            .entry(gate_id.to_string())
            .or_default()
            .extend(overrides.iter().cloned());
        Ok(())
    }
}
