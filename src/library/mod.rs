use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::library::model::ChangesResp;
use crate::model::{ChangeRecord, ChangeToken, ChangeType};

pub mod model;

const ODATA_JSON: &str = "application/json;odata=nometadata";
/// `FetchLimit` of every change query. A full page means more may follow.
const CHANGE_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The collection or item does not exist. Also used for a change log we
    /// are not allowed to read.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("library returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid library response: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound(_))
    }
}

/// Query and update operations on a document library.
#[async_trait]
pub trait LibrarySource: Send + Sync {
    /// Item changes strictly after `since`, in the order the library reports them.
    async fn get_changes(
        &self,
        collection_id: &str,
        since: &ChangeToken,
    ) -> Result<Vec<ChangeRecord>, SourceError>;

    /// Selected column values of one item.
    async fn get_item_fields(
        &self,
        collection_id: &str,
        item_id: i64,
        fields: &[&str],
    ) -> Result<Map<String, Value>, SourceError>;

    /// Binary content of the file behind an item.
    async fn download_file(&self, collection_id: &str, item_id: i64)
        -> Result<Vec<u8>, SourceError>;

    async fn update_item_fields(
        &self,
        collection_id: &str,
        item_id: i64,
        fields: &Map<String, Value>,
    ) -> Result<(), SourceError>;
}

#[derive(Clone)]
pub struct SharePointClient {
    http: Client,
    site_url: Url,
    access_token: String,
}

impl fmt::Debug for SharePointClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharePointClient")
            .field("site_url", &self.site_url)
            .finish_non_exhaustive()
    }
}

impl SharePointClient {
    pub fn new(site_url: Url, access_token: String, timeout: Duration) -> Result<Self, SourceError> {
        let http = Client::builder()
            .user_agent("photo-tagger/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            site_url,
            access_token,
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let site_url = Url::parse(&cfg.library.site_url)?;
        Ok(Self::new(
            site_url,
            cfg.library.access_token.clone(),
            Duration::from_secs(cfg.library.request_timeout_seconds),
        )?)
    }

    /// `{site}/_api/web/lists(guid'{id}'){suffix}`. A collection id that is not
    /// a GUID cannot name a list, so it is reported as not found.
    fn list_url(&self, collection_id: &str, suffix: &str) -> Result<Url, SourceError> {
        let list_id = Uuid::parse_str(collection_id)
            .map_err(|_| SourceError::NotFound(format!("list {}", collection_id)))?;
        let raw = format!(
            "{}/_api/web/lists(guid'{}'){}",
            self.site_url.as_str().trim_end_matches('/'),
            list_id.hyphenated(),
            suffix
        );
        Url::parse(&raw).map_err(|e| SourceError::Decode(format!("bad list url {}: {}", raw, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.access_token)
            .header(header::ACCEPT, ODATA_JSON)
    }

    /// One page of changes after the raw token `start`.
    pub fn build_get_changes_request(
        &self,
        collection_id: &str,
        start: &str,
    ) -> Result<reqwest::Request, SourceError> {
        let url = self.list_url(collection_id, "/GetChanges")?;
        let body = json!({
            "query": {
                "Add": true,
                "Update": true,
                "DeleteObject": true,
                "Item": true,
                "FetchLimit": CHANGE_PAGE_SIZE,
                "ChangeTokenStart": { "StringValue": start },
            }
        });
        Ok(self
            .request(Method::POST, url)
            .header(header::CONTENT_TYPE, ODATA_JSON)
            .json(&body)
            .build()?)
    }

    pub fn build_update_request(
        &self,
        collection_id: &str,
        item_id: i64,
        fields: &Map<String, Value>,
    ) -> Result<reqwest::Request, SourceError> {
        let url = self.list_url(collection_id, &format!("/items({})", item_id))?;
        let mut body = Map::new();
        for (name, value) in fields {
            if value.is_array() {
                body.insert(
                    format!("{}@odata.type", name),
                    Value::String("Collection(Edm.String)".into()),
                );
            }
            body.insert(name.clone(), value.clone());
        }
        Ok(self
            .request(Method::POST, url)
            .header(header::CONTENT_TYPE, ODATA_JSON)
            .header("X-HTTP-Method", "MERGE")
            .header(header::IF_MATCH, "*")
            .json(&Value::Object(body))
            .build()?)
    }

    async fn execute(&self, request: reqwest::Request, what: &str) -> Result<Response, SourceError> {
        debug!(method = %request.method(), url = %request.url(), "library request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, what, "library error: {}", body);
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(res)
    }
}

#[async_trait]
impl LibrarySource for SharePointClient {
    async fn get_changes(
        &self,
        collection_id: &str,
        since: &ChangeToken,
    ) -> Result<Vec<ChangeRecord>, SourceError> {
        let mut start = since.to_string();
        let mut records = Vec::new();
        let mut pages = 0usize;
        loop {
            let request = self.build_get_changes_request(collection_id, &start)?;
            let res = match self
                .execute(request, &format!("list {}", collection_id))
                .await
            {
                Err(SourceError::Status { status: 403, body }) => {
                    return Err(SourceError::NotFound(format!(
                        "list {} is not accessible: {}",
                        collection_id, body
                    )));
                }
                other => other?,
            };
            let body = res.text().await?;
            let page: ChangesResp =
                serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))?;
            pages += 1;

            let full = page.value.len() >= CHANGE_PAGE_SIZE;
            let next = page
                .value
                .last()
                .and_then(|entry| entry.change_token.as_ref())
                .map(|token| token.string_value.clone());
            records.extend(page.value.into_iter().filter_map(|entry| {
                let item_id = entry.item_id?;
                Some(ChangeRecord {
                    collection_id: collection_id.to_string(),
                    item_id,
                    change_type: ChangeType::from_code(entry.change_type),
                    changed_at: entry.time,
                })
            }));

            if !full {
                break;
            }
            match next {
                Some(next) if next != start => start = next,
                _ => {
                    return Err(SourceError::Decode(format!(
                        "full page of changes for {} without a token to continue from",
                        collection_id
                    )))
                }
            }
        }
        info!(collection_id, since = %since, pages, count = records.len(), "fetched changes");
        Ok(records)
    }

    async fn get_item_fields(
        &self,
        collection_id: &str,
        item_id: i64,
        fields: &[&str],
    ) -> Result<Map<String, Value>, SourceError> {
        let mut url = self.list_url(collection_id, &format!("/items({})", item_id))?;
        url.query_pairs_mut().append_pair("$select", &fields.join(","));
        let request = self.request(Method::GET, url).build()?;
        let res = self
            .execute(request, &format!("item {} in {}", item_id, collection_id))
            .await?;
        match res.json::<Value>().await? {
            Value::Object(map) => Ok(map),
            other => Err(SourceError::Decode(format!(
                "expected an object for item {}, got {}",
                item_id, other
            ))),
        }
    }

    async fn download_file(
        &self,
        collection_id: &str,
        item_id: i64,
    ) -> Result<Vec<u8>, SourceError> {
        let url = self.list_url(collection_id, &format!("/items({})/File/$value", item_id))?;
        let request = self.http.get(url).bearer_auth(&self.access_token).build()?;
        let res = self
            .execute(request, &format!("file of item {} in {}", item_id, collection_id))
            .await?;
        let bytes = res.bytes().await?;
        info!(collection_id, item_id, size = bytes.len(), "downloaded file");
        Ok(bytes.to_vec())
    }

    async fn update_item_fields(
        &self,
        collection_id: &str,
        item_id: i64,
        fields: &Map<String, Value>,
    ) -> Result<(), SourceError> {
        let request = self.build_update_request(collection_id, item_id, fields)?;
        self.execute(request, &format!("item {} in {}", item_id, collection_id))
            .await?;
        Ok(())
    }
}
