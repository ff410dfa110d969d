//! AWS Signature Version 4 for the GET requests the agent makes.
//!
//! Only what a bodiless GET needs: the canonical request, the derived signing
//! key and the headers to attach. Payloads are always empty.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of the empty payload
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Everything but the RFC 3986 unreserved characters is escaped
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// An access key pair, with the session token of temporary credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Signs requests for one service in one region
#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Credentials,
    region: String,
    service: String,
}

impl Signer {
    pub fn new(credentials: Credentials, region: &str, service: &str) -> Self {
        Self {
            credentials,
            region: region.to_string(),
            service: service.to_string(),
        }
    }

    /// Headers to attach to a GET of `url` sent at `now`.
    ///
    /// `host` is signed but not returned; the HTTP client sets it from the
    /// URL.
    pub fn sign_get(&self, url: &str, now: DateTime<Utc>) -> Result<Vec<(&'static str, String)>> {
        let url = Url::parse(url).with_context(|| format!("Invalid URL: {url}"))?;
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let s3 = self.service == "s3";

        let mut headers = vec![("host", host_header(&url)?), ("x-amz-date", amz_date.clone())];
        if s3 {
            headers.push(("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256.to_string()));
        }
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token", token.clone()));
        }
        headers.sort_by_key(|(name, _)| *name);

        let signed_headers = headers
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect();
        let canonical_request = format!(
            "GET\n{}\n{}\n{canonical_headers}\n{signed_headers}\n{EMPTY_PAYLOAD_SHA256}",
            canonical_uri(url.path(), !s3),
            canonical_query(&url),
        );

        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let key = signing_key(
            &self.credentials.secret_access_key,
            &date,
            &self.region,
            &self.service,
        )?;
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

        let mut signed: Vec<_> = headers
            .into_iter()
            .filter(|(name, _)| *name != "host")
            .collect();
        signed.push((
            "authorization",
            format!(
                "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                self.credentials.access_key_id
            ),
        ));
        Ok(signed)
    }
}

/// Query string with every key and value escaped the way signing expects,
/// so the URL sent is the URL signed
pub fn encode_query(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, UNRESERVED),
                utf8_percent_encode(value, UNRESERVED)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Region of an S3 endpoint host; `None` for the global endpoint
pub fn s3_region(host: &str) -> Option<&str> {
    let domain = host
        .strip_suffix(".amazonaws.com")
        .or_else(|| host.strip_suffix(".amazonaws.com.cn"))?;
    let labels: Vec<&str> = domain.split('.').collect();

    let at = labels.iter().rposition(|label| *label == "s3" || label.starts_with("s3-"))?;
    match labels[at].strip_prefix("s3-") {
        Some("external-1") => None,
        Some(region) => Some(region),
        None => labels
            .get(at + 1)
            .copied()
            .filter(|label| *label != "dualstack")
            .or_else(|| labels.get(at + 2).copied()),
    }
}

fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .with_context(|| format!("URL has no host: {url}"))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// S3 signs the path escaped once; other services escape the sent path again
fn canonical_uri(path: &str, double_escape: bool) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| {
            if double_escape {
                utf8_percent_encode(segment, UNRESERVED).to_string()
            } else {
                let decoded = percent_decode_str(segment).decode_utf8_lossy();
                utf8_percent_encode(&decoded, UNRESERVED).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            (
                utf8_percent_encode(&key, UNRESERVED).to_string(),
                utf8_percent_encode(&value, UNRESERVED).to_string(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let key = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let key = hmac(&key, region.as_bytes())?;
    let key = hmac(&key, service.as_bytes())?;
    hmac(&key, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|err| anyhow!("Invalid signing key: {err}"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn example_credentials() -> Credentials {
        Credentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        }
    }

    fn example_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    fn header<'a>(headers: &'a [(&str, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, value)| value.as_str())
    }

    #[test]
    fn test_get_vanilla() {
        let signer = Signer::new(example_credentials(), "us-east-1", "service");
        let headers = signer
            .sign_get("https://example.amazonaws.com/", example_time())
            .unwrap();

        assert_eq!(header(&headers, "x-amz-date"), Some("20150830T123600Z"));
        assert_eq!(
            header(&headers, "authorization"),
            Some(
                "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
                 SignedHeaders=host;x-amz-date, \
                 Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
            )
        );
        assert_eq!(header(&headers, "host"), None);
    }

    #[test]
    fn test_query_parameters_are_sorted() {
        let signer = Signer::new(example_credentials(), "us-east-1", "service");
        let headers = signer
            .sign_get(
                "https://example.amazonaws.com/?Param2=value2&Param1=value1",
                example_time(),
            )
            .unwrap();

        let authorization = header(&headers, "authorization").unwrap();
        assert!(authorization.ends_with(
            "Signature=b97d918cfa904a5beff61c982a1b6f458b799221646efd99d3219ec94cdf2500"
        ));
    }

    #[test]
    fn test_session_token_and_s3_payload_are_signed() {
        let credentials = Credentials {
            session_token: Some("token".to_string()),
            ..example_credentials()
        };
        let signer = Signer::new(credentials, "eu-west-1", "s3");
        let headers = signer
            .sign_get("https://bucket.s3.eu-west-1.amazonaws.com/app.zip", example_time())
            .unwrap();

        assert_eq!(header(&headers, "x-amz-security-token"), Some("token"));
        assert_eq!(
            header(&headers, "x-amz-content-sha256"),
            Some(EMPTY_PAYLOAD_SHA256)
        );
        let authorization = header(&headers, "authorization").unwrap();
        assert!(authorization.contains("/20150830/eu-west-1/s3/aws4_request"));
        assert!(authorization.contains(
            "SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token,"
        ));
    }

    #[test]
    fn test_encoded_query_signs_as_sent() {
        let query = encode_query(&[("StackName", "my stack"), ("Action", "Describe+")]);
        assert_eq!(query, "StackName=my%20stack&Action=Describe%2B");

        let url = Url::parse(&format!("https://example.amazonaws.com/?{query}")).unwrap();
        assert_eq!(
            canonical_query(&url),
            "Action=Describe%2B&StackName=my%20stack"
        );
    }

    #[test]
    fn test_canonical_uri() {
        assert_eq!(canonical_uri("", true), "/");
        assert_eq!(canonical_uri("/", true), "/");
        assert_eq!(canonical_uri("/a%20b/c", false), "/a%20b/c");
        assert_eq!(canonical_uri("/a%20b/c", true), "/a%2520b/c");
    }

    #[test]
    fn test_s3_region() {
        assert_eq!(s3_region("bucket.s3.amazonaws.com"), None);
        assert_eq!(s3_region("bucket.s3.eu-west-1.amazonaws.com"), Some("eu-west-1"));
        assert_eq!(s3_region("bucket.s3-ap-southeast-2.amazonaws.com"), Some("ap-southeast-2"));
        assert_eq!(s3_region("s3.us-west-2.amazonaws.com"), Some("us-west-2"));
        assert_eq!(
            s3_region("bucket.s3.dualstack.eu-central-1.amazonaws.com"),
            Some("eu-central-1")
        );
        assert_eq!(s3_region("s3-external-1.amazonaws.com"), None);
        assert_eq!(s3_region("example.com"), None);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let credentials = Credentials {
            session_token: Some("FQoGZXIvYXdzEXAMPLE".to_string()),
            ..example_credentials()
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("AKIDEXAMPLE"));
        assert!(!debug.contains("EXAMPLEKEY"));
        assert!(!debug.contains("FQoGZXIvYXdzEXAMPLE"));
    }
}
