use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{SourceClient, SourceFlag, SourceFlagSummary};
use crate::error::ClientError;
use crate::http::{ApiClient, ClientSettings};

pub const DEFAULT_BASE_URL: &str = "https://app.launchdarkly.com";

#[derive(Deserialize, Debug)]
struct FlagPage {
    #[serde(default)]
    items: Vec<SourceFlagSummary>,
    #[serde(rename = "totalCount", default)]
    total_count: Option<usize>,
}

/// LaunchDarkly REST API (v2) client.
pub struct LaunchDarklyClient {
    api: ApiClient,
    page_size: usize,
}

impl LaunchDarklyClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        settings: &ClientSettings,
    ) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(api_key)
            .map_err(|_| ClientError::InvalidConfig("invalid LaunchDarkly API key".to_owned()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        Ok(Self {
            api: ApiClient::new(base_url, headers, "flag-migrator", settings)?,
            page_size: settings.page_size.max(1),
        })
    }
}

#[async_trait]
impl SourceClient for LaunchDarklyClient {
    #[instrument(skip(self))]
    async fn list_flags(&self, project: &str) -> Result<Vec<SourceFlagSummary>, ClientError> {
        let url = self.api.endpoint(&["api", "v2", "flags", project])?;
        let mut flags = Vec::new();

        loop {
            let query = [
                ("summary", "0".to_string()),
                ("limit", self.page_size.to_string()),
                ("offset", flags.len().to_string()),
            ];
            let page: FlagPage = self.api.get_json(url.clone(), &query).await?;
            debug!("fetched page of {} flags at offset {}", page.items.len(), flags.len());

            let exhausted = page.items.is_empty();
            flags.extend(page.items);
            if exhausted || page.total_count.is_some_and(|total| flags.len() >= total) {
                break;
            }
        }

        Ok(flags)
    }

    #[instrument(skip(self))]
    async fn get_flag(&self, project: &str, key: &str) -> Result<SourceFlag, ClientError> {
        let url = self.api.endpoint(&["api", "v2", "flags", project, key])?;
        self.api.get_json(url, &[]).await
    }
}
