//! Configuration loader and validator for the photo tagging pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub server: Server,
    pub library: Library,
    pub vision: Vision,
}

/// Process-level settings: storage location and queue redelivery policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
    /// Deliveries after which a message is dead-lettered.
    pub max_attempts: u32,
}

/// Webhook listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub bind: String,
}

/// Document library (SharePoint site) settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Library {
    pub site_url: String,
    /// Bearer token issued by the external auth provider.
    pub access_token: String,
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub fields: LibraryFields,
}

/// Internal names of the item columns the pipeline reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LibraryFields {
    pub analyzed: String,
    pub last_analyzed: String,
    pub tags: String,
    pub inappropriate: String,
    pub colors: String,
}

impl Default for LibraryFields {
    fn default() -> Self {
        Self {
            analyzed: "Analyzed".into(),
            last_analyzed: "LastAnalyzed".into(),
            tags: "Tags".into(),
            inappropriate: "Inappropriate".into(),
            colors: "Colors".into(),
        }
    }
}

/// Image classification service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vision {
    pub api_url: String,
    pub subscription_key: String,
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// SQLite URL for the cursor store and queue, honouring `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/photo-tagger.db", self.app.data_dir))
    }

    /// Replace secrets with values from the environment when present.
    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("LIBRARY_ACCESS_TOKEN") {
            self.library.access_token = token;
        }
        if let Ok(key) = std::env::var("VISION_SUBSCRIPTION_KEY") {
            self.vision.subscription_key = key;
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.max_attempts == 0 {
        return Err(ConfigError::Invalid("app.max_attempts must be > 0"));
    }

    if cfg.server.bind.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid("server.bind must be a socket address"));
    }

    if reqwest::Url::parse(&cfg.library.site_url).is_err() {
        return Err(ConfigError::Invalid("library.site_url must be an absolute URL"));
    }
    if cfg.library.access_token.trim().is_empty() {
        return Err(ConfigError::Invalid("library.access_token must be non-empty"));
    }
    let f = &cfg.library.fields;
    for (value, msg) in [
        (&f.analyzed, "library.fields.analyzed must be non-empty"),
        (&f.last_analyzed, "library.fields.last_analyzed must be non-empty"),
        (&f.tags, "library.fields.tags must be non-empty"),
        (&f.inappropriate, "library.fields.inappropriate must be non-empty"),
        (&f.colors, "library.fields.colors must be non-empty"),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(msg));
        }
    }

    if reqwest::Url::parse(&cfg.vision.api_url).is_err() {
        return Err(ConfigError::Invalid("vision.api_url must be an absolute URL"));
    }
    if cfg.vision.subscription_key.trim().is_empty() {
        return Err(ConfigError::Invalid("vision.subscription_key must be non-empty"));
    }

    Ok(())
}

/// Returns a sample configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500
  max_backoff_seconds: 300
  max_attempts: 5

server:
  bind: "0.0.0.0:7071"

library:
  site_url: "https://contoso.sharepoint.com/sites/photos"
  access_token: "YOUR_LIBRARY_ACCESS_TOKEN"
  fields:
    analyzed: "Analyzed"
    last_analyzed: "LastAnalyzed"
    tags: "Tags"
    inappropriate: "Inappropriate"
    colors: "Colors"

vision:
  api_url: "https://westus.api.cognitive.microsoft.com/vision/v1.0"
  subscription_key: "YOUR_VISION_SUBSCRIPTION_KEY"
"#
}
