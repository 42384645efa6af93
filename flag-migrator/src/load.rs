use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use migration_common::destination::{
    CreatedGate, DestinationClient, DestinationFlag, DestinationOverride, NewTag,
};
use migration_common::error::ClientError;
use migration_common::source::SourceFlag;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::translate::{TranslatedFlag, Translation, TranslationError};

pub const TAG_DESCRIPTION: &str = "Tag created by the flag migration";

/// Why a single flag could not be migrated. Never aborts the batch.
#[derive(Error, Debug)]
pub enum FlagMigrationError {
    #[error("translation failed: {0}")]
    Translation(#[from] TranslationError),
    #[error("gate creation failed: {0}")]
    CreateGate(#[source] ClientError),
    #[error("gate {gate_id} was created but its overrides were rejected: {error}")]
    CreateOverrides {
        gate_id: String,
        #[source]
        error: ClientError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationStatus {
    Successful,
    Failed,
    NeedsManualMigration,
}

impl MigrationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            MigrationStatus::Successful => "SUCCESSFUL MIGRATION",
            MigrationStatus::Failed => "FAILED MIGRATION",
            MigrationStatus::NeedsManualMigration => "NEEDS MANUAL MIGRATION FOR NON-BOOLEAN FLAGS",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug)]
pub enum MigrationOutcome {
    Migrated(CreatedGate),
    NeedsManualMigration,
    Failed(FlagMigrationError),
}

#[derive(Debug)]
pub struct MigrationResult {
    pub source: SourceFlag,
    pub outcome: MigrationOutcome,
}

impl MigrationResult {
    pub fn status(&self) -> MigrationStatus {
        match self.outcome {
            MigrationOutcome::Migrated(_) => MigrationStatus::Successful,
            MigrationOutcome::NeedsManualMigration => MigrationStatus::NeedsManualMigration,
            MigrationOutcome::Failed(_) => MigrationStatus::Failed,
        }
    }

    pub fn gate(&self) -> Option<&CreatedGate> {
        match &self.outcome {
            MigrationOutcome::Migrated(gate) => Some(gate),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FlagMigrationError> {
        match &self.outcome {
            MigrationOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Writes translated flags to the destination.
pub struct Loader {
    destination: Arc<dyn DestinationClient>,
    migration_tag: String,
}

impl Loader {
    pub fn new(destination: Arc<dyn DestinationClient>, migration_tag: &str) -> Self {
        Self {
            destination,
            migration_tag: migration_tag.to_owned(),
        }
    }

    /// Make the destination safe for a fresh load: ensure the migration tag
    /// exists and delete every gate a previous run tagged with it.
    /// Returns how many gates were deleted.
    #[instrument(skip_all)]
    pub async fn prepare(&self) -> Result<usize, ClientError> {
        self.ensure_tags(std::slice::from_ref(&self.migration_tag))
            .await?;

        let gates = self
            .destination
            .list_gates_by_tag(&self.migration_tag)
            .await?;
        info!(
            "deleting {} gates tagged with \"{}\"",
            gates.len(),
            self.migration_tag
        );
        try_join_all(gates.iter().map(|gate| self.destination.delete_gate(&gate.id))).await?;

        Ok(gates.len())
    }

    /// One listing, then the missing tags are created concurrently.
    /// Another writer creating the same tag in between is not an error.
    #[instrument(skip_all, fields(tags = names.len()))]
    pub async fn ensure_tags(&self, names: &[String]) -> Result<(), ClientError> {
        let existing: HashSet<String> = self
            .destination
            .list_tags()
            .await?
            .into_iter()
            .map(|tag| tag.name)
            .collect();

        let mut seen = HashSet::new();
        let missing = names
            .iter()
            .filter(|name| !existing.contains(*name) && seen.insert(name.as_str()));
        try_join_all(missing.map(|name| self.create_tag(name))).await?;

        Ok(())
    }

    async fn create_tag(&self, name: &str) -> Result<(), ClientError> {
        let tag = NewTag {
            name: name.to_owned(),
            description: TAG_DESCRIPTION.to_owned(),
        };
        match self.destination.create_tag(&tag).await {
            Ok(_) => {
                info!("created tag \"{}\"", name);
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                debug!("tag \"{}\" already exists", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Create a gate per translated flag. Results keep the input order and
    /// every flag gets exactly one result.
    #[instrument(skip_all, fields(flags = translated.len()))]
    pub async fn load(&self, translated: Vec<TranslatedFlag>) -> Vec<MigrationResult> {
        let tags = referenced_tags(&translated);
        if let Err(e) = self.ensure_tags(&tags).await {
            error!("failed to ensure gate tags exist: {}", e);
        }

        join_all(translated.into_iter().map(|flag| self.load_one(flag))).await
    }

    async fn load_one(&self, translated: TranslatedFlag) -> MigrationResult {
        let TranslatedFlag {
            source,
            translation,
        } = translated;

        let outcome = match translation {
            Err(e) => MigrationOutcome::Failed(e.into()),
            Ok(Translation::NeedsManualMigration) => MigrationOutcome::NeedsManualMigration,
            Ok(Translation::Gate { flag, overrides }) => {
                match self.create_gate(&flag, &overrides).await {
                    Ok(gate) => MigrationOutcome::Migrated(gate),
                    Err(e) => MigrationOutcome::Failed(e),
                }
            }
        };

        MigrationResult { source, outcome }
    }

    async fn create_gate(
        &self,
        flag: &DestinationFlag,
        overrides: &[DestinationOverride],
    ) -> Result<CreatedGate, FlagMigrationError> {
        let gate = self
            .destination
            .create_gate(flag)
            .await
            .map_err(FlagMigrationError::CreateGate)?;

        if !overrides.is_empty() {
            self.destination
                .create_overrides(&gate.id, overrides)
                .await
                .map_err(|error| FlagMigrationError::CreateOverrides {
                    gate_id: gate.id.clone(),
                    error,
                })?;
        }

        Ok(gate)
    }
}

fn referenced_tags(translated: &[TranslatedFlag]) -> Vec<String> {
    let mut seen = HashSet::new();
    translated
        .iter()
        .filter_map(|t| match &t.translation {
            Ok(Translation::Gate { flag, .. }) => Some(&flag.tags),
            _ => None,
        })
        .flatten()
        .filter(|tag| seen.insert(tag.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{boolean_flag, multivariate_flag, InMemoryDestination};
    use crate::translate::{FlagTranslator, TranslationSettings};
    use migration_common::destination::GateType;

    const TAG: &str = "Migration Script";

    fn destination_flag(name: &str, tags: &[&str]) -> DestinationFlag {
        DestinationFlag {
            name: name.to_string(),
            description: String::new(),
            gate_type: GateType::Permanent,
            is_enabled: true,
            rules: Vec::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn translate(flags: Vec<SourceFlag>) -> Vec<TranslatedFlag> {
        FlagTranslator::new(TranslationSettings {
            migration_tag: TAG.to_string(),
            ..Default::default()
        })
        .translate_all(flags)
    }

    #[tokio::test]
    async fn test_prepare_twice_leaves_no_tagged_gates() {
        let destination = Arc::new(
            InMemoryDestination::default()
                .with_gate(destination_flag("old-a", &[TAG]))
                .with_gate(destination_flag("old-b", &[TAG, "payments"]))
                .with_gate(destination_flag("hand-made", &["payments"])),
        );
        let loader = Loader::new(destination.clone(), TAG);

        assert_eq!(loader.prepare().await.unwrap(), 2);
        assert_eq!(loader.prepare().await.unwrap(), 0);

        assert!(destination.gates_with_tag(TAG).is_empty());
        assert_eq!(destination.gate_names(), vec!["hand-made"]);
        assert_eq!(destination.tag_names(), vec![TAG]);
    }

    #[tokio::test]
    async fn test_tag_conflicts_are_tolerated() {
        let destination = Arc::new(InMemoryDestination::default().with_racing_tag_creation());
        let loader = Loader::new(destination.clone(), TAG);

        loader
            .ensure_tags(&[TAG.to_string(), "payments".to_string()])
            .await
            .unwrap();
        assert_eq!(loader.prepare().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ensure_tags_creates_only_missing_tags_once() {
        let destination = Arc::new(InMemoryDestination::default().with_tag("payments"));
        let loader = Loader::new(destination.clone(), TAG);

        loader
            .ensure_tags(&[
                "payments".to_string(),
                "search".to_string(),
                "search".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(destination.tag_names(), vec!["payments", "search"]);
        assert_eq!(destination.created_tag_count(), 1);
    }

    #[tokio::test]
    async fn test_prepare_fails_when_destination_is_unreachable() {
        let destination = Arc::new(InMemoryDestination::default().unreachable());
        let loader = Loader::new(destination, TAG);

        assert!(loader.prepare().await.is_err());
    }

    #[tokio::test]
    async fn test_multivariate_flags_never_reach_gate_creation() {
        let destination = Arc::new(InMemoryDestination::default());
        let loader = Loader::new(destination.clone(), TAG);

        let results = loader
            .load(translate(vec![multivariate_flag("theme"), boolean_flag("checkout")]))
            .await;

        assert_eq!(results[0].status(), MigrationStatus::NeedsManualMigration);
        assert!(results[0].gate().is_none());
        assert_eq!(results[1].status(), MigrationStatus::Successful);
        assert_eq!(destination.create_gate_calls(), vec!["checkout"]);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_flag() {
        let destination = Arc::new(
            InMemoryDestination::default()
                .with_failing_gate("broken")
                .with_failing_overrides("half-done"),
        );
        let loader = Loader::new(destination.clone(), TAG);
        let mut with_targets = boolean_flag("half-done");
        let mut production = crate::test_utils::environment(true);
        production.targets = vec![crate::test_utils::target(0, &["alice"])];
        with_targets
            .environments
            .insert("production".to_string(), production);

        let results = loader
            .load(translate(vec![
                boolean_flag("first"),
                boolean_flag("broken"),
                with_targets,
                boolean_flag("last"),
            ]))
            .await;

        let statuses: Vec<MigrationStatus> = results.iter().map(|r| r.status()).collect();
        assert_eq!(
            statuses,
            vec![
                MigrationStatus::Successful,
                MigrationStatus::Failed,
                MigrationStatus::Failed,
                MigrationStatus::Successful,
            ]
        );
        assert!(matches!(
            results[1].error(),
            Some(FlagMigrationError::CreateGate(_))
        ));
        assert!(matches!(
            results[2].error(),
            Some(FlagMigrationError::CreateOverrides { .. })
        ));
        // The gate itself was created before its overrides were rejected.
        assert_eq!(destination.gates_with_tag(TAG).len(), 3);
    }

    #[tokio::test]
    async fn test_overrides_are_created_with_the_assigned_id() {
        let destination = Arc::new(InMemoryDestination::default());
        let loader = Loader::new(destination.clone(), TAG);
        let mut flag = boolean_flag("checkout");
        let mut staging = crate::test_utils::environment(true);
        staging.targets = vec![crate::test_utils::target(1, &["mallory"])];
        flag.environments.insert("staging".to_string(), staging);

        let results = loader.load(translate(vec![flag])).await;

        let gate = results[0].gate().unwrap();
        let overrides = destination.overrides_for(&gate.id);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].failing_ids, vec!["mallory"]);
    }

    #[tokio::test]
    async fn test_translation_errors_are_recorded() {
        let destination = Arc::new(InMemoryDestination::default());
        let loader = Loader::new(destination.clone(), TAG);
        let mut flag = boolean_flag("broken");
        let mut production = crate::test_utils::environment(true);
        production.fallthrough.variation = None;
        flag.environments.insert("production".to_string(), production);

        let results = loader.load(translate(vec![flag])).await;

        assert!(matches!(
            results[0].error(),
            Some(FlagMigrationError::Translation(_))
        ));
        assert!(destination.create_gate_calls().is_empty());
    }

    #[tokio::test]
    async fn test_tag_listing_failure_does_not_stop_gate_creation() {
        let destination = Arc::new(InMemoryDestination::default().with_failing_tag_listing());
        let loader = Loader::new(destination.clone(), TAG);
        let mut flag = boolean_flag("checkout");
        flag.tags = vec!["payments".to_string()];

        let results = loader
            .load(translate(vec![flag, boolean_flag("search")]))
            .await;

        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| r.status() == MigrationStatus::Successful));
        assert_eq!(destination.create_gate_calls(), vec!["checkout", "search"]);
        assert_eq!(destination.created_tag_count(), 0);
    }

    #[tokio::test]
    async fn test_load_creates_referenced_tags() {
        let destination = Arc::new(InMemoryDestination::default());
        let loader = Loader::new(destination.clone(), TAG);
        let mut flag = boolean_flag("checkout");
        flag.tags = vec!["payments".to_string()];

        loader.load(translate(vec![flag])).await;

        assert_eq!(destination.tag_names(), vec![TAG, "payments"]);
    }
}
