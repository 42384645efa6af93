use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use envconfig::Envconfig;
use flag_migrator::config::{Cli, Config};
use flag_migrator::migration::Migration;
use flag_migrator::report::{log_results, Reporter};
use migration_common::destination::statsig::StatsigClient;
use migration_common::source::launchdarkly::LaunchDarklyClient;
use tracing::info;

async fn run(cli: Cli) -> Result<()> {
    let config = Config::init_from_env().context("Invalid configuration")?;

    let source = LaunchDarklyClient::new(
        &config.launchdarkly_base_url,
        config.launchdarkly_api_key.as_str(),
        &config.source_settings(),
    )
    .context("Failed to create LaunchDarkly client")?;
    let destination = StatsigClient::new(
        &config.statsig_base_url,
        config.statsig_api_key.as_str(),
        &config.destination_settings(),
    )
    .context("Failed to create Statsig client")?;

    let migration = Migration::new(
        Arc::new(source),
        Arc::new(destination),
        config.translation_settings(),
    );
    let report = migration.run(&cli.projects).await?;
    log_results(&report.results);

    let reporter = Reporter::new(config.report_links());
    let rows = reporter.rows(&report);
    reporter
        .write_to_path(&rows, Path::new(&config.report_path))
        .with_context(|| format!("Failed to write report to {}", config.report_path))?;
    info!("Wrote {} rows to {}", rows.len(), config.report_path);

    Ok(())
}

#[tokio::main]
async fn main() {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => info!("Flag migration finished"),
        Err(e) => {
            eprintln!("Oops! {e}");

            let mut causes = e.chain().skip(1).peekable();
            if causes.peek().is_some() {
                eprintln!("\nCaused by:");
                for (index, cause) in causes.enumerate() {
                    eprintln!("    {index}: {cause}");
                }
            }
            std::process::exit(1);
        }
    }
}
