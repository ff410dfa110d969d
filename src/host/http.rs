//! HTTP downloads for metadata, file contents and archives.

use super::credentials;
use super::sigv4::{self, Signer};
use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use metadata::{AuthType, Authentication};
use std::path::Path;
use std::time::Duration;

/// Largest body accepted for a single download
pub const MAX_DOWNLOAD_SIZE: u64 = 1024 * 1024 * 1024;

const USER_AGENT: &str = concat!("cfn-init/", env!("CARGO_PKG_VERSION"));
const TIMEOUT: Duration = Duration::from_secs(300);

/// Signing region of the global S3 endpoint
const S3_DEFAULT_REGION: &str = "us-east-1";

/// Proxies selected per request by URL scheme
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proxies {
    pub http: Option<String>,
    pub https: Option<String>,
}

impl Proxies {
    fn for_url(&self, url: &str) -> Option<&str> {
        if url.starts_with("https://") {
            self.https.as_deref()
        } else {
            self.http.as_deref()
        }
    }
}

/// Blocking HTTP client
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
    proxies: Proxies,
}

impl HttpClient {
    pub fn new(proxies: Proxies) -> Self {
        Self { proxies }
    }

    fn agent(&self, url: &str) -> Result<ureq::Agent> {
        let proxy = match self.proxies.for_url(url) {
            Some(proxy) => Some(
                ureq::Proxy::new(proxy).with_context(|| format!("Invalid proxy: {proxy}"))?,
            ),
            None => ureq::Proxy::try_from_env(),
        };
        let config = ureq::Agent::config_builder()
            .proxy(proxy)
            .timeout_global(Some(TIMEOUT))
            .build();
        Ok(ureq::Agent::new_with_config(config))
    }

    /// Download `uri`, or read it when it is a local path or `file://` URL.
    pub fn get_bytes(&self, uri: &str, auth: Option<&Authentication>) -> Result<Vec<u8>> {
        if let Some(path) = local_path(uri) {
            return std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()));
        }

        let agent = self.agent(uri)?;
        let mut request = agent.get(uri).header("User-Agent", USER_AGENT);
        if let Some(auth) = auth {
            for (name, value) in auth_headers(uri, auth)? {
                request = request.header(name, value);
            }
        }

        log::debug!("Downloading {uri}");
        let mut response = request
            .call()
            .with_context(|| format!("Failed to download {uri}"))?;

        response
            .body_mut()
            .with_config()
            .limit(MAX_DOWNLOAD_SIZE)
            .read_to_vec()
            .with_context(|| format!("Failed to read response body from {uri}"))
    }

    /// GET `url` with query parameters and decode the JSON response.
    ///
    /// With a signer the request carries a SigV4 signature over the exact URL
    /// sent.
    pub fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        signer: Option<&Signer>,
    ) -> Result<serde_json::Value> {
        let full = if query.is_empty() {
            url.to_string()
        } else {
            format!("{url}?{}", sigv4::encode_query(query))
        };

        let agent = self.agent(&full)?;
        let mut request = agent
            .get(&full)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json");
        if let Some(signer) = signer {
            for (name, value) in signer.sign_get(&full, Utc::now())? {
                request = request.header(name, value);
            }
        }

        log::debug!("Querying {url}");
        let mut response = request
            .call()
            .with_context(|| format!("Request to {url} failed"))?;

        response
            .body_mut()
            .read_json()
            .with_context(|| format!("Invalid JSON response from {url}"))
    }
}

/// Headers for a download covered by an authentication profile
fn auth_headers(uri: &str, auth: &Authentication) -> Result<Vec<(&'static str, String)>> {
    match auth.auth_type {
        AuthType::Basic => Ok(basic_authorization(auth)
            .map(|header| vec![("authorization", header)])
            .unwrap_or_default()),
        AuthType::S3 => {
            let Some(credentials) = credentials::for_profile(auth) else {
                log::warn!("No credentials found for {uri}; sending it unsigned");
                return Ok(Vec::new());
            };
            let region = url::Url::parse(uri)
                .ok()
                .and_then(|url| url.host_str().and_then(sigv4::s3_region).map(str::to_string))
                .unwrap_or_else(|| S3_DEFAULT_REGION.to_string());
            Signer::new(credentials, &region, "s3").sign_get(uri, Utc::now())
        }
    }
}

/// Basic `Authorization` header value for a profile with a username
fn basic_authorization(auth: &Authentication) -> Option<String> {
    let user = auth.username.as_deref()?;
    let password = auth.password.as_deref().unwrap_or_default();
    Some(format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))))
}

fn local_path(uri: &str) -> Option<&Path> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Some(Path::new(path));
    }
    let path = Path::new(uri);
    (!uri.contains("://") && path.is_absolute()).then_some(path)
}
