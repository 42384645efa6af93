use std::sync::Arc;

use indexmap::IndexSet;
use migration_common::destination::DestinationClient;
use migration_common::error::ClientError;
use migration_common::source::SourceClient;
use thiserror::Error;
use tracing::{info, instrument};

use crate::extract::{extract, Extraction};
use crate::load::{Loader, MigrationResult};
use crate::translate::{FlagTranslator, TranslationSettings};

/// Failures that stop the run before any gate is created.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("failed to extract flags")]
    Extraction(#[source] ClientError),
    #[error("failed to clear previously migrated gates")]
    Reset(#[source] ClientError),
}

#[derive(Debug)]
pub struct MigrationReport {
    pub environments: IndexSet<String>,
    /// One entry per extracted flag, in extraction order.
    pub results: Vec<MigrationResult>,
}

pub struct Migration {
    source: Arc<dyn SourceClient>,
    translator: FlagTranslator,
    loader: Loader,
}

impl Migration {
    pub fn new(
        source: Arc<dyn SourceClient>,
        destination: Arc<dyn DestinationClient>,
        settings: TranslationSettings,
    ) -> Self {
        let translator = FlagTranslator::new(settings);
        let loader = Loader::new(destination, translator.migration_tag());
        Self {
            source,
            translator,
            loader,
        }
    }

    /// The destination is only reset once extraction has succeeded, so a
    /// source outage never leaves it emptied.
    #[instrument(skip_all)]
    pub async fn run(&self, projects: &[String]) -> Result<MigrationReport, MigrationError> {
        let Extraction {
            flags,
            environments,
        } = extract(self.source.as_ref(), projects)
            .await
            .map_err(MigrationError::Extraction)?;
        info!(
            "extracted {} flags across {} environments",
            flags.len(),
            environments.len()
        );

        let translated = self.translator.translate_all(flags);

        let deleted = self.loader.prepare().await.map_err(MigrationError::Reset)?;
        info!("removed {} gates from a previous migration", deleted);

        let results = self.loader.load(translated).await;

        Ok(MigrationReport {
            environments,
            results,
        })
    }
}
