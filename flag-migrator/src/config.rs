use std::collections::HashMap;
use std::str::FromStr;
use std::time;

use clap::Parser;
use envconfig::Envconfig;
use migration_common::destination::ConditionType;
use migration_common::http::ClientSettings;
use migration_common::retry::RetryPolicy;

use crate::report::ReportLinks;
use crate::translate::{AttributeMapping, TranslationSettings};

/// Move boolean flags from LaunchDarkly projects into Statsig gates.
#[derive(Parser, Debug)]
#[command(name = "flag-migrator", version)]
pub struct Cli {
    /// Source project keys to migrate
    #[arg(required = true, num_args = 1..)]
    pub projects: Vec<String>,
}

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "LAUNCHDARKLY_API_KEY")]
    pub launchdarkly_api_key: NonEmptyString,

    #[envconfig(from = "LAUNCHDARKLY_BASE_URL", default = "https://app.launchdarkly.com")]
    pub launchdarkly_base_url: String,

    #[envconfig(from = "STATSIG_API_KEY")]
    pub statsig_api_key: NonEmptyString,

    #[envconfig(from = "STATSIG_BASE_URL", default = "https://statsigapi.net/console/v1")]
    pub statsig_base_url: String,

    #[envconfig(from = "STATSIG_CONSOLE_URL", default = "https://console.statsig.com")]
    pub statsig_console_url: String,

    #[envconfig(from = "MIGRATION_TAG", default = "Migration Script")]
    pub migration_tag: NonEmptyString,

    #[envconfig(from = "REPORT_PATH", default = "flag_migration_tracker.csv")]
    pub report_path: String,

    #[envconfig(default = "30000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "100")]
    pub page_size: usize,

    // LaunchDarkly allows far fewer requests than Statsig before answering 429
    #[envconfig(default = "5")]
    pub source_requests_per_second: u32,

    #[envconfig(default = "10")]
    pub destination_requests_per_second: u32,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,

    #[envconfig(default = "")]
    pub unit_id_attributes: CommaSeparated,

    #[envconfig(default = "")]
    pub attribute_types: AttributeTypes,

    #[envconfig(default = "")]
    pub environment_renames: EnvironmentRenames,
}

impl Config {
    pub fn source_settings(&self) -> ClientSettings {
        self.client_settings(self.source_requests_per_second)
    }

    pub fn destination_settings(&self) -> ClientSettings {
        self.client_settings(self.destination_requests_per_second)
    }

    fn client_settings(&self, requests_per_second: u32) -> ClientSettings {
        ClientSettings {
            timeout: self.request_timeout.0,
            requests_per_second,
            page_size: self.page_size,
            retry_policy: self.retry_policy.policy(),
        }
    }

    pub fn translation_settings(&self) -> TranslationSettings {
        let mut attributes = AttributeMapping::default();
        for (attribute, condition_type) in &self.attribute_types.0 {
            attributes = attributes.with_condition_type(attribute, condition_type.clone());
        }
        for attribute in &self.unit_id_attributes.0 {
            attributes = attributes.with_unit_id_attribute(attribute);
        }

        TranslationSettings {
            migration_tag: self.migration_tag.as_str().to_owned(),
            attributes,
            environment_renames: self.environment_renames.0.clone(),
        }
    }

    pub fn report_links(&self) -> ReportLinks {
        ReportLinks {
            source_base_url: self.launchdarkly_base_url.clone(),
            destination_console_url: self.statsig_console_url.clone(),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    #[envconfig(from = "RETRY_BACKOFF_COEFFICIENT", default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(from = "RETRY_INITIAL_INTERVAL", default = "1000")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(from = "RETRY_MAXIMUM_INTERVAL", default = "30000")]
    pub maximum_interval: EnvMsDuration,

    #[envconfig(from = "RETRY_MAX_ATTEMPTS", default = "5")]
    pub max_attempts: u32,
}

impl RetryPolicyConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.backoff_coefficient,
            self.initial_interval.0,
            Some(self.maximum_interval.0),
            self.max_attempts,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// `a, b,c` -> `["a", "b", "c"]`. Blank entries are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommaSeparated(pub Vec<String>);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseListError(pub String);

impl FromStr for CommaSeparated {
    type Err = ParseListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CommaSeparated(entries(s).map(str::to_owned).collect()))
    }
}

/// `attribute=condition_type,...`, e.g. `region=country,tenant=user_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeTypes(pub Vec<(String, ConditionType)>);

impl FromStr for AttributeTypes {
    type Err = ParseListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mappings = Vec::new();
        for entry in entries(s) {
            let (attribute, condition_type) = split_pair(entry)?;
            let condition_type = match condition_type.parse::<ConditionType>() {
                // These need a field name or unit id type, which the table cannot carry
                Ok(ConditionType::Public | ConditionType::CustomField | ConditionType::UnitId)
                | Err(_) => return Err(ParseListError(entry.to_owned())),
                Ok(condition_type) => condition_type,
            };
            mappings.push((attribute.to_owned(), condition_type));
        }
        Ok(AttributeTypes(mappings))
    }
}

/// `project:source_env=destination_env,...`, e.g. `web:prod=production`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentRenames(pub HashMap<String, HashMap<String, String>>);

impl FromStr for EnvironmentRenames {
    type Err = ParseListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut renames: HashMap<String, HashMap<String, String>> = HashMap::new();
        for entry in entries(s) {
            let (project, rename) = entry
                .split_once(':')
                .ok_or_else(|| ParseListError(entry.to_owned()))?;
            let (from, to) = split_pair(rename).map_err(|_| ParseListError(entry.to_owned()))?;
            if project.trim().is_empty() {
                return Err(ParseListError(entry.to_owned()));
            }
            renames
                .entry(project.trim().to_owned())
                .or_default()
                .insert(from.to_owned(), to.to_owned());
        }
        Ok(EnvironmentRenames(renames))
    }
}

fn entries(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|entry| !entry.is_empty())
}

fn split_pair(entry: &str) -> Result<(&str, &str), ParseListError> {
    match entry.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok((key.trim(), value.trim()))
        }
        _ => Err(ParseListError(entry.to_owned())),
    }
}
