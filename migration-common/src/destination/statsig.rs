use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{
    CreatedGate, DestinationClient, DestinationFlag, DestinationOverride, GateSummary, NewTag, Tag,
};
use crate::error::ClientError;
use crate::http::{ApiClient, ClientSettings};

pub const DEFAULT_BASE_URL: &str = "https://statsigapi.net/console/v1";
pub const DEFAULT_CONSOLE_URL: &str = "https://console.statsig.com";

const API_KEY_HEADER: &str = "statsig-api-key";

#[derive(Deserialize, Debug, Default)]
struct Pagination {
    #[serde(rename = "nextPage", default)]
    next_page: Option<String>,
}

/// Every console API response wraps its payload in `data`.
#[derive(Deserialize, Debug)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Serialize, Debug)]
struct OverridesPayload<'a> {
    #[serde(rename = "passingUserIDs")]
    passing_user_ids: Vec<String>,
    #[serde(rename = "failingUserIDs")]
    failing_user_ids: Vec<String>,
    #[serde(rename = "environmentOverrides")]
    environment_overrides: &'a [DestinationOverride],
}

/// Statsig console API (v1) client.
pub struct StatsigClient {
    api: ApiClient,
    page_size: usize,
}

impl StatsigClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        settings: &ClientSettings,
    ) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| ClientError::InvalidConfig("invalid Statsig API key".to_owned()))?;
        key.set_sensitive(true);
        headers.insert(HeaderName::from_static(API_KEY_HEADER), key);

        Ok(Self {
            api: ApiClient::new(base_url, headers, "flag-migrator", settings)?,
            page_size: settings.page_size.max(1),
        })
    }

    /// Walk `page=1,2,...` until the service reports no next page.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        url: Url,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, ClientError> {
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            let mut query: Vec<(&str, String)> = filters.to_vec();
            query.push(("page", page.to_string()));
            query.push(("limit", self.page_size.to_string()));

            let envelope: Envelope<Vec<T>> = self.api.get_json(url.clone(), &query).await?;
            debug!("fetched page {} with {} items from {}", page, envelope.data.len(), url);

            let exhausted = envelope.data.is_empty();
            items.extend(envelope.data);
            let has_next = envelope
                .pagination
                .is_some_and(|p| p.next_page.is_some());
            if exhausted || !has_next {
                break;
            }
            page += 1;
        }

        Ok(items)
    }
}

#[async_trait]
impl DestinationClient for StatsigClient {
    #[instrument(skip(self))]
    async fn list_tags(&self) -> Result<Vec<Tag>, ClientError> {
        let url = self.api.endpoint(&["tags"])?;
        self.get_all_pages(url, &[]).await
    }

    #[instrument(skip_all, fields(tag = %tag.name))]
    async fn create_tag(&self, tag: &NewTag) -> Result<Tag, ClientError> {
        let url = self.api.endpoint(&["tags"])?;
        let envelope: Envelope<Tag> = self.api.post_json(url, tag).await?;
        Ok(envelope.data)
    }

    #[instrument(skip(self))]
    async fn list_gates_by_tag(&self, tag: &str) -> Result<Vec<GateSummary>, ClientError> {
        let url = self.api.endpoint(&["gates"])?;
        self.get_all_pages(url, &[("tags", tag.to_owned())]).await
    }

    #[instrument(skip_all, fields(gate = %gate.name))]
    async fn create_gate(&self, gate: &DestinationFlag) -> Result<CreatedGate, ClientError> {
        let url = self.api.endpoint(&["gates"])?;
        let envelope: Envelope<CreatedGate> = self.api.post_json(url, gate).await?;
        Ok(envelope.data)
    }

    #[instrument(skip(self))]
    async fn delete_gate(&self, id: &str) -> Result<(), ClientError> {
        let url = self.api.endpoint(&["gates", id])?;
        self.api.delete(url).await
    }

    #[instrument(skip(self, overrides))]
    async fn create_overrides(
        &self,
        gate_id: &str,
        overrides: &[DestinationOverride],
    ) -> Result<(), ClientError> {
        let url = self.api.endpoint(&["gates", gate_id, "overrides"])?;
        let payload = OverridesPayload {
            passing_user_ids: Vec::new(),
            failing_user_ids: Vec::new(),
            environment_overrides: overrides,
        };
        self.api.post(url, &payload).await
    }
}
