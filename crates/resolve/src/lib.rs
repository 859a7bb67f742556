//! # Source Resolver
//!
//! Classifies an incoming URL and produces a directly fetchable location for
//! it, without downloading any content itself.
//!
//! Classification is data-driven: an ordered registry of regex rules maps a
//! URL to a [`SourceKind`]. Direct media links pass through untouched,
//! public cloud-share links are exchanged for a direct download href via the
//! provider's public API, and everything else is handed to the external
//! extractor as a last resort.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

mod cloud;
mod naming;
mod rules;

pub use naming::sanitize_filename;
pub use rules::classify;

use rules::RuleOutcome;

/// How a source URL should be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// A direct media-file link, fetchable as-is.
    Direct,
    /// A public cloud-share link, exchanged for a direct href.
    CloudPublic,
    /// No direct strategy applies; the general-purpose extractor owns it.
    NeedsExtractor,
}

/// A classified, fetchable source produced by [`Resolver::resolve`].
///
/// Consumed exactly once, by the fetcher or the extractor.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    /// Direct fetch URL (for `NeedsExtractor`, the original URL).
    pub url: String,
    /// Sanitized display name inferred from the URL, used to name outputs.
    pub display_name: String,
    pub kind: SourceKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid url `{0}`")]
    InvalidUrl(String),

    #[error("cloud provider responded with HTTP {status}")]
    BadStatus { status: reqwest::StatusCode },

    #[error("cloud provider response carried no download href")]
    MissingHref,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Pure classification plus provider metadata lookup.
pub struct Resolver {
    client: Client,
}

impl Resolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Resolve `url` into a fetchable source.
    ///
    /// `access_token` is passed through to the cloud provider when one is
    /// required; it is never used for anything else.
    pub async fn resolve(
        &self,
        url: &str,
        access_token: Option<&str>,
    ) -> Result<ResolvedSource, ResolveError> {
        let parsed = Url::parse(url).map_err(|_| ResolveError::InvalidUrl(url.to_owned()))?;
        let display_name = naming::display_name_from_url(&parsed);

        match rules::match_rule(url) {
            RuleOutcome::Direct => {
                debug!(url = %url, "classified as direct media link");
                Ok(ResolvedSource {
                    url: url.to_owned(),
                    display_name,
                    kind: SourceKind::Direct,
                })
            }
            RuleOutcome::CloudPublic(provider) => {
                debug!(url = %url, provider = %provider.name(), "classified as cloud public share");
                let href = cloud::resolve_public_href(&self.client, provider, url, access_token)
                    .await?;
                Ok(ResolvedSource {
                    url: href,
                    display_name,
                    kind: SourceKind::CloudPublic,
                })
            }
            RuleOutcome::NeedsExtractor => {
                debug!(url = %url, "no direct strategy, deferring to extractor");
                Ok(ResolvedSource {
                    url: url.to_owned(),
                    display_name,
                    kind: SourceKind::NeedsExtractor,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Install the process-wide rustls crypto provider so `Client::new()`
    /// can build without panicking in the test harness.
    fn ensure_crypto_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    #[tokio::test]
    async fn direct_link_resolves_without_network() {
        ensure_crypto_provider();
        let resolver = Resolver::new(Client::new());
        let source = resolver
            .resolve("https://host.example/path/clip.mp4?sig=abc", None)
            .await
            .unwrap();
        assert_eq!(source.kind, SourceKind::Direct);
        assert_eq!(source.url, "https://host.example/path/clip.mp4?sig=abc");
        assert_eq!(source.display_name, "clip.mp4");
    }

    #[tokio::test]
    async fn unknown_host_defers_to_extractor() {
        ensure_crypto_provider();
        let resolver = Resolver::new(Client::new());
        let source = resolver
            .resolve("https://videos.example/watch?v=123", None)
            .await
            .unwrap();
        assert_eq!(source.kind, SourceKind::NeedsExtractor);
        assert_eq!(source.url, "https://videos.example/watch?v=123");
    }

    #[tokio::test]
    async fn garbage_input_is_an_invalid_url() {
        ensure_crypto_provider();
        let resolver = Resolver::new(Client::new());
        let err = resolver.resolve("not a url", None).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidUrl(_)));
    }
}
