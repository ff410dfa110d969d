//! Credential discovery for signed requests.
//!
//! Looked up in order: the environment, then the instance role through the
//! instance metadata service (IMDSv2).

use super::sigv4::Credentials;
use anyhow::{Context, Result, bail};
use metadata::Authentication;
use serde::Deserialize;
use std::time::Duration;

const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const IMDS_TIMEOUT: Duration = Duration::from_secs(2);
const IMDS_TOKEN_TTL: &str = "21600";

/// Credentials for an S3 authentication profile: its own keys, else the
/// named role, else the default chain
pub fn for_profile(auth: &Authentication) -> Option<Credentials> {
    if let (Some(access_key_id), Some(secret_key)) = (&auth.access_key_id, &auth.secret_key) {
        return Some(Credentials {
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_key.clone(),
            session_token: None,
        });
    }
    discover(auth.role_name.as_deref())
}

/// Credentials from the environment or the instance role
pub fn discover(role: Option<&str>) -> Option<Credentials> {
    if role.is_none()
        && let Some(credentials) = from_vars(|name| std::env::var(name).ok())
    {
        log::debug!("Using credentials from the environment");
        return Some(credentials);
    }

    if std::env::var("AWS_EC2_METADATA_DISABLED").is_ok_and(|v| v.eq_ignore_ascii_case("true")) {
        return None;
    }
    let endpoint = std::env::var("AWS_EC2_METADATA_SERVICE_ENDPOINT")
        .unwrap_or_else(|_| IMDS_ENDPOINT.to_string());
    match from_instance_metadata(endpoint.trim_end_matches('/'), role) {
        Ok(credentials) => {
            log::debug!("Using instance role credentials");
            Some(credentials)
        }
        Err(err) => {
            log::debug!("No instance role credentials: {err:#}");
            None
        }
    }
}

fn from_vars(var: impl Fn(&str) -> Option<String>) -> Option<Credentials> {
    let non_empty = |name| var(name).filter(|value| !value.is_empty());
    Some(Credentials {
        access_key_id: non_empty("AWS_ACCESS_KEY_ID")?,
        secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY")?,
        session_token: non_empty("AWS_SESSION_TOKEN"),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoleCredentials {
    #[serde(default)]
    code: Option<String>,
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
}

fn from_instance_metadata(endpoint: &str, role: Option<&str>) -> Result<Credentials> {
    let config = ureq::Agent::config_builder()
        .proxy(None)
        .timeout_global(Some(IMDS_TIMEOUT))
        .build();
    let agent = ureq::Agent::new_with_config(config);

    let token = agent
        .put(format!("{endpoint}/latest/api/token"))
        .header("X-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL)
        .send_empty()
        .context("Failed to get an IMDS session token")?
        .body_mut()
        .read_to_string()?;

    let get = |path: &str| -> Result<String> {
        let url = format!("{endpoint}/latest/meta-data/iam/security-credentials/{path}");
        Ok(agent
            .get(&url)
            .header("X-aws-ec2-metadata-token", token.trim())
            .call()
            .with_context(|| format!("Request to {url} failed"))?
            .body_mut()
            .read_to_string()?)
    };

    let role = match role {
        Some(role) => role.to_string(),
        None => get("")?
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .context("The instance has no role")?
            .to_string(),
    };

    let raw = get(&role)?;
    let credentials: RoleCredentials = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid credentials for role {role}"))?;
    if let Some(code) = credentials.code.as_deref()
        && code != "Success"
    {
        bail!("Credentials for role {role} unavailable: {code}");
    }

    Ok(Credentials {
        access_key_id: credentials.access_key_id,
        secret_access_key: credentials.secret_access_key,
        session_token: credentials.token,
    })
}
