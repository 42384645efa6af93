use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::load::{MigrationResult, MigrationStatus};
use crate::migration::MigrationReport;

pub const UNKNOWN_MAINTAINER: &str = "Unknown";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to write report file: {0}")]
    Io(#[from] io::Error),
}

/// One line of the migration tracker. Field order is column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub migration_status: String,
    pub source_flag_name: String,
    pub source_project: String,
    pub destination_gate_name: String,
    pub source_url: String,
    pub destination_url: String,
    pub source_flag_key: String,
    pub destination_id: String,
    pub source_creation_date: String,
    pub destination_created_time: String,
    pub maintainer: String,
    pub error: String,
}

/// Base urls used to link each row back to both services' UIs.
#[derive(Debug, Clone)]
pub struct ReportLinks {
    pub source_base_url: String,
    pub destination_console_url: String,
}

pub struct Reporter {
    links: ReportLinks,
}

impl Reporter {
    pub fn new(links: ReportLinks) -> Self {
        Self { links }
    }

    pub fn rows(&self, report: &MigrationReport) -> Vec<ReportRow> {
        report
            .results
            .iter()
            .map(|result| self.row(result, &report.environments))
            .collect()
    }

    pub fn row<'a>(
        &self,
        result: &MigrationResult,
        environments: impl IntoIterator<Item = &'a String>,
    ) -> ReportRow {
        let flag = &result.source;
        let gate = result.gate();

        let source_url = environments
            .into_iter()
            .filter_map(|environment| flag.environments.get(environment))
            .filter_map(|environment| environment.site.as_ref())
            .map(|site| join_url(&self.links.source_base_url, &site.href))
            .collect::<Vec<_>>()
            .join(" ");

        ReportRow {
            migration_status: result.status().label().to_owned(),
            source_flag_name: flag.name.clone().unwrap_or_default(),
            source_project: flag.project.clone(),
            destination_gate_name: gate.map(|g| g.name.clone()).unwrap_or_default(),
            source_url,
            destination_url: gate
                .map(|g| join_url(&self.links.destination_console_url, &format!("gates/{}", g.id)))
                .unwrap_or_default(),
            source_flag_key: flag.key.clone(),
            destination_id: gate.map(|g| g.id.clone()).unwrap_or_default(),
            source_creation_date: format_timestamp(flag.creation_date),
            destination_created_time: format_timestamp(gate.and_then(|g| g.created_time)),
            maintainer: flag
                .maintainer
                .as_ref()
                .and_then(|m| m.display_name())
                .unwrap_or_else(|| UNKNOWN_MAINTAINER.to_owned()),
            error: result.error().map(|e| e.to_string()).unwrap_or_default(),
        }
    }

    pub fn write<W: io::Write>(&self, rows: &[ReportRow], writer: W) -> Result<(), ReportError> {
        let mut writer = csv::Writer::from_writer(writer);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_to_path(&self, rows: &[ReportRow], path: &Path) -> Result<(), ReportError> {
        self.write(rows, File::create(path)?)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn format_timestamp(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|timestamp| timestamp.to_rfc3339())
        .unwrap_or_default()
}

/// One log line per flag, then how many flags ended up in each status.
pub fn log_results(results: &[MigrationResult]) {
    let mut counts: HashMap<MigrationStatus, usize> = HashMap::new();
    for result in results {
        let status = result.status();
        *counts.entry(status).or_default() += 1;
        match result.error() {
            Some(e) => error!("{}: {} ({})", result.source.key, status, e),
            None if status == MigrationStatus::NeedsManualMigration => {
                warn!("{}: {}", result.source.key, status)
            }
            None => info!("{}: {}", result.source.key, status),
        }
    }

    info!(
        "migrated {} of {} flags, {} failed, {} need manual migration",
        counts.get(&MigrationStatus::Successful).unwrap_or(&0),
        results.len(),
        counts.get(&MigrationStatus::Failed).unwrap_or(&0),
        counts.get(&MigrationStatus::NeedsManualMigration).unwrap_or(&0),
    );
}
