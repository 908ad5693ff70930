//! Network side of the asset cache.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use url::Url;

use super::CacheError;
use crate::vfs::BoxFuture;

/// Source of bytes on a cache miss.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, CacheError>>;
}

/// Fetches keys over HTTP, resolved against a base URL.
///
/// Absolute URL keys pass through untouched; path keys such as
/// `/prebuilt/fmt.a` are joined onto the base.
pub struct HttpFetcher {
    client: Client,
    base: Url,
}

impl HttpFetcher {
    pub fn new(base: Url, timeout: Duration) -> io::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| io::Error::other(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base })
    }

    /// Resolve a cache key into the URL to request.
    pub fn resolve(&self, key: &str) -> Result<Url, CacheError> {
        if let Ok(url) = Url::parse(key) {
            return Ok(url);
        }
        // Keys are absolute paths; join relative to the base so a base with
        // a path component (e.g. https://host/play/) keeps it.
        self.base
            .join(key.trim_start_matches('/'))
            .map_err(|_| CacheError::InvalidKey(key.to_string()))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, CacheError>> {
        Box::pin(async move {
            let url = self.resolve(key)?;
            let network = |reason: String| CacheError::Network {
                key: key.to_string(),
                reason,
            };

            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| network(e.to_string()))?;

            match response.status() {
                StatusCode::NOT_FOUND => return Err(CacheError::NotFound(key.to_string())),
                status if !status.is_success() => {
                    return Err(network(format!("HTTP {} fetching '{}'", status, url)));
                }
                _ => {}
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| network(format!("failed to read response body: {}", e)))?;
            Ok(body.to_vec())
        })
    }
}

/// Reads keys from a local directory.
///
/// Used after a local precompile, where the package store sits on disk
/// rather than behind a web server.
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        let relative = key.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|seg| seg == "..") {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl Fetcher for DirFetcher {
    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, CacheError>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    Err(CacheError::NotFound(key.to_string()))
                }
                Err(e) => Err(CacheError::Network {
                    key: key.to_string(),
                    reason: format!("failed to read '{}': {}", path.display(), e),
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_joins_base_path() {
        let base = Url::parse("https://play.example/app/").unwrap();
        let fetcher = HttpFetcher::new(base, Duration::from_secs(5)).unwrap();
        assert_eq!(
            fetcher.resolve("/prebuilt/fmt.a").unwrap().as_str(),
            "https://play.example/app/prebuilt/fmt.a"
        );
    }

    #[test]
    fn test_resolve_absolute_url_passes_through() {
        let base = Url::parse("https://play.example/").unwrap();
        let fetcher = HttpFetcher::new(base, Duration::from_secs(5)).unwrap();
        assert_eq!(
            fetcher.resolve("https://cdn.example/x.wasm").unwrap().as_str(),
            "https://cdn.example/x.wasm"
        );
    }

    #[tokio::test]
    async fn test_dir_fetcher_reads_relative_to_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("prebuilt")).unwrap();
        std::fs::write(dir.path().join("prebuilt/manifest.txt"), "fmt -> /prebuilt/fmt.a\n")
            .unwrap();
        let fetcher = DirFetcher::new(dir.path().to_path_buf());
        let bytes = fetcher.fetch("/prebuilt/manifest.txt").await.unwrap();
        assert_eq!(bytes, b"fmt -> /prebuilt/fmt.a\n");
    }

    #[tokio::test]
    async fn test_dir_fetcher_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let fetcher = DirFetcher::new(dir.path().to_path_buf());
        let err = fetcher.fetch("/prebuilt/nope.a").await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dir_fetcher_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let fetcher = DirFetcher::new(dir.path().to_path_buf());
        let err = fetcher.fetch("/../etc/passwd").await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidKey(_)));
    }
}
