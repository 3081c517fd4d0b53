use async_trait::async_trait;
use reqwest::{header, Client, Url};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;

pub mod model;

pub use model::VisionResponse;

const VISUAL_FEATURES: &str = "Categories,Tags,Adult,Color,Description";
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("vision service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed vision response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid vision endpoint: {0}")]
    Endpoint(String),
}

/// Image classification service.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn analyze(&self, image: Vec<u8>) -> Result<VisionResponse, VisionError>;
}

#[derive(Clone)]
pub struct VisionClient {
    http: Client,
    api_url: Url,
    subscription_key: String,
}

impl fmt::Debug for VisionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl VisionClient {
    pub fn new(api_url: Url, subscription_key: String, timeout: Duration) -> Result<Self, VisionError> {
        let http = Client::builder()
            .user_agent("photo-tagger/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_url,
            subscription_key,
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let api_url = Url::parse(&cfg.vision.api_url)?;
        Ok(Self::new(
            api_url,
            cfg.vision.subscription_key.clone(),
            Duration::from_secs(cfg.vision.request_timeout_seconds),
        )?)
    }

    pub fn build_request(&self, image: Vec<u8>) -> Result<reqwest::Request, VisionError> {
        let raw = format!("{}/analyze", self.api_url.as_str().trim_end_matches('/'));
        let mut url = Url::parse(&raw).map_err(|e| VisionError::Endpoint(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("visualFeatures", VISUAL_FEATURES);
        Ok(self
            .http
            .post(url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .build()?)
    }
}

#[async_trait]
impl ImageClassifier for VisionClient {
    async fn analyze(&self, image: Vec<u8>) -> Result<VisionResponse, VisionError> {
        let size = image.len();
        let request = self.build_request(image)?;
        info!(url = %request.url(), size, "analyzing photo");

        let res = self.http.execute(request).await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            warn!(%status, "vision service error: {}", body);
            return Err(VisionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("analysis results: {}", body);
        Ok(serde_json::from_str(&body)?)
    }
}
