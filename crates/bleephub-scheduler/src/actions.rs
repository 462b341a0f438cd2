//! Action tarball proxy cache.
//!
//! Runners download `uses:` actions through us. The first request for an
//! `owner/repo@ref` fetches the tarball upstream; later requests are served
//! from memory.

use async_trait::async_trait;
use bleephub_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const USER_AGENT: &str = "bleephub/1.0";

/// A downloaded action archive.
#[derive(Debug, Clone)]
pub struct Tarball {
    pub bytes: Arc<Vec<u8>>,
    /// Commit sha, when the upstream ETag carried one.
    pub sha: Option<String>,
}

/// Where tarballs come from.
#[async_trait]
pub trait TarballSource: Send + Sync {
    async fn fetch(&self, name_with_owner: &str, git_ref: &str) -> Result<Tarball>;
}

/// Fetches `/repos/{nwo}/tarball/{ref}` from a GitHub-compatible API.
pub struct GithubTarballSource {
    client: reqwest::Client,
    api_url: String,
}

impl GithubTarballSource {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::ActionFetch(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TarballSource for GithubTarballSource {
    async fn fetch(&self, name_with_owner: &str, git_ref: &str) -> Result<Tarball> {
        let url = format!("{}/repos/{name_with_owner}/tarball/{git_ref}", self.api_url);
        debug!(%url, "fetching action tarball");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| Error::ActionFetch(format!("{name_with_owner}@{git_ref}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ActionFetch(format!(
                "{name_with_owner}@{git_ref}: upstream returned {status}"
            )));
        }

        let sha = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .and_then(sha_from_etag);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::ActionFetch(format!("{name_with_owner}@{git_ref}: {e}")))?;

        Ok(Tarball {
            bytes: Arc::new(bytes.to_vec()),
            sha,
        })
    }
}

/// A 40-character hex ETag is the commit sha of the archive.
fn sha_from_etag(etag: &str) -> Option<String> {
    let tag = etag.trim_start_matches("W/").trim_matches('"');
    (tag.len() == 40 && tag.chars().all(|c| c.is_ascii_hexdigit())).then(|| tag.to_string())
}

pub fn cache_key(name_with_owner: &str, git_ref: &str) -> String {
    format!("{name_with_owner}@{git_ref}")
}

/// Tarballs keyed by `owner/repo@ref`.
pub struct ActionCache {
    source: Arc<dyn TarballSource>,
    entries: RwLock<HashMap<String, Tarball>>,
}

impl ActionCache {
    pub fn new(source: Arc<dyn TarballSource>) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Serve from cache or fetch upstream. Failures are not cached.
    pub async fn tarball(&self, name_with_owner: &str, git_ref: &str) -> Result<Tarball> {
        let key = cache_key(name_with_owner, git_ref);
        if let Some(hit) = self.entries.read().await.get(&key) {
            debug!(%key, "action tarball cache hit");
            return Ok(hit.clone());
        }

        let tarball = match self.source.fetch(name_with_owner, git_ref).await {
            Ok(tarball) => tarball,
            Err(e) => {
                warn!(%key, error = %e, "action tarball fetch failed");
                return Err(e);
            }
        };
        info!(%key, size = tarball.bytes.len(), sha = ?tarball.sha, "action tarball cached");
        self.entries.write().await.insert(key, tarball.clone());
        Ok(tarball)
    }

    /// Sha recorded for a cached action, if any.
    pub async fn resolved_sha(&self, name_with_owner: &str, git_ref: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .get(&cache_key(name_with_owner, git_ref))
            .and_then(|t| t.sha.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn etag_parsing() {
        assert_eq!(sha_from_etag(&format!("\"{SHA}\"")).as_deref(), Some(SHA));
        assert_eq!(sha_from_etag(&format!("W/\"{SHA}\"")).as_deref(), Some(SHA));
        assert_eq!(sha_from_etag("\"abc\""), None);
    }

    #[tokio::test]
    async fn fetches_once_then_serves_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/actions/checkout/tarball/v4"))
            .and(header("user-agent", USER_AGENT))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", format!("\"{SHA}\"").as_str())
                    .set_body_bytes(b"tarball-bytes".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let source = GithubTarballSource::new(server.uri()).unwrap();
        let cache = ActionCache::new(Arc::new(source));

        let first = cache.tarball("actions/checkout", "v4").await.unwrap();
        let second = cache.tarball("actions/checkout", "v4").await.unwrap();
        assert_eq!(first.bytes.as_slice(), b"tarball-bytes");
        assert_eq!(second.sha.as_deref(), Some(SHA));
        assert_eq!(
            cache.resolved_sha("actions/checkout", "v4").await.as_deref(),
            Some(SHA)
        );
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn upstream_errors_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cache = ActionCache::new(Arc::new(GithubTarballSource::new(server.uri()).unwrap()));
        let err = cache.tarball("missing/action", "v1").await.unwrap_err();
        assert!(matches!(err, Error::ActionFetch(_)));
        assert_eq!(cache.len().await, 0);
    }
}
