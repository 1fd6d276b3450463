//! Proxy-list sources.

use crate::config::ProxyPoolConfig;
use crate::error::SourceError;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Something that yields the raw text of a proxy list.
#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Human-readable origin, used in logs.
    fn name(&self) -> &str;

    /// Fetch the raw list body.
    async fn fetch_list(&self) -> Result<String, SourceError>;
}

/// A proxy list served over HTTP.
pub struct HttpSource {
    url: String,
    client: Client,
}

impl HttpSource {
    /// Create a source for `url`, giving up on a request after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ProxySource for HttpSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch_list(&self) -> Result<String, SourceError> {
        let response = self.client.get(&self.url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(SourceError::Status(response.status()));
        }
        Ok(response.text().await?)
    }
}

/// A proxy list kept in a local file.
pub struct FileSource {
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }
}

#[async_trait]
impl ProxySource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_list(&self) -> Result<String, SourceError> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }
}

/// Build a source for every entry of `config.sources`.
///
/// Entries starting with `http` are fetched over the network, anything else is
/// read as a file path.
pub fn sources_from_config(config: &ProxyPoolConfig) -> Result<Vec<Arc<dyn ProxySource>>, SourceError> {
    config
        .sources
        .iter()
        .map(|source| -> Result<Arc<dyn ProxySource>, SourceError> {
            if source.starts_with("http") {
                Ok(Arc::new(HttpSource::new(source.clone(), config.source_timeout)?))
            } else {
                Ok(Arc::new(FileSource::new(source)))
            }
        })
        .collect()
}
