//! Public-share resolution against cloud provider APIs.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{ResolveError, rules::CloudProvider};

const YANDEX_PUBLIC_API: &str = "https://cloud-api.yandex.net/v1/disk/public/resources/download";

#[derive(Debug, Deserialize)]
struct DownloadHref {
    href: Option<String>,
}

/// Exchange a public share link for a direct download href.
pub(crate) async fn resolve_public_href(
    client: &Client,
    provider: CloudProvider,
    public_url: &str,
    access_token: Option<&str>,
) -> Result<String, ResolveError> {
    let endpoint = match provider {
        CloudProvider::YandexDisk => YANDEX_PUBLIC_API,
    };

    let mut request = client
        .get(endpoint)
        .query(&[("public_key", public_url)]);
    if let Some(token) = access_token {
        request = request.header(reqwest::header::AUTHORIZATION, format!("OAuth {token}"));
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ResolveError::BadStatus { status });
    }

    let body: DownloadHref = response.json().await?;
    let href = body.href.ok_or(ResolveError::MissingHref)?;
    debug!(provider = %provider.name(), "exchanged public link for direct href");
    Ok(href)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn href_is_extracted_from_provider_body() {
        let body: DownloadHref =
            serde_json::from_str(r#"{"href":"https://downloader.example/f/abc","method":"GET"}"#)
                .unwrap();
        assert_eq!(body.href.as_deref(), Some("https://downloader.example/f/abc"));
    }

    #[test]
    fn missing_href_field_deserializes_to_none() {
        let body: DownloadHref = serde_json::from_str(r#"{"error":"NotFound"}"#).unwrap();
        assert!(body.href.is_none());
    }
}
