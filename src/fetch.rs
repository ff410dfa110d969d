//! Retrieve the raw metadata document from a local file or a stack resource.

use crate::config::{MetadataOrigin, RunConfig};
use crate::host::credentials;
use crate::host::http::HttpClient;
use crate::host::sigv4::Signer;
use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::fs;

const API_VERSION: &str = "2010-05-15";
const SERVICE: &str = "cloudformation";
const METADATA_POINTER: &str =
    "/DescribeStackResourceResponse/DescribeStackResourceResult/StackResourceDetail/Metadata";

/// Fetch and parse the metadata document `config` points at
pub fn fetch(config: &RunConfig) -> Result<Value> {
    match &config.origin {
        MetadataOrigin::Local(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON in {}", path.display()))
        }
        MetadataOrigin::Stack {
            stack,
            resource,
            region,
            url,
        } => {
            let endpoint = endpoint(url.as_deref(), region)?;
            let client = HttpClient::new(config.proxies.clone());
            let signer = match credentials::discover(None) {
                Some(credentials) => Some(Signer::new(credentials, region, SERVICE)),
                None => {
                    log::warn!("No AWS credentials found; querying {endpoint} unsigned");
                    None
                }
            };

            log::info!("Fetching metadata for {resource} in stack {stack}");
            describe_stack_resource(&client, &endpoint, stack, resource, signer.as_ref())
        }
    }
}

fn describe_stack_resource(
    client: &HttpClient,
    endpoint: &str,
    stack: &str,
    resource: &str,
    signer: Option<&Signer>,
) -> Result<Value> {
    let response = client.get_json(
        endpoint,
        &[
            ("Action", "DescribeStackResource"),
            ("StackName", stack),
            ("LogicalResourceId", resource),
            ("Version", API_VERSION),
        ],
        signer,
    )?;
    extract_metadata(&response)
        .with_context(|| format!("No metadata for {resource} in stack {stack}"))
}

/// Endpoint URL for a region, or the validated override
fn endpoint(url: Option<&str>, region: &str) -> Result<String> {
    match url {
        Some(url) if url.contains("://") => Ok(url.to_string()),
        Some(url) => bail!("Invalid endpoint url: {url}"),
        None => Ok(format!("https://cloudformation.{region}.amazonaws.com/")),
    }
}

/// Pull the resource metadata out of a `DescribeStackResource` response.
///
/// The service returns it as a JSON string; an already-decoded object is
/// accepted as well.
fn extract_metadata(response: &Value) -> Result<Value> {
    match response.pointer(METADATA_POINTER) {
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).context("Resource metadata is not valid JSON")
        }
        Some(value @ Value::Object(_)) => Ok(value.clone()),
        Some(Value::Null) | None => bail!("Resource has no metadata"),
        Some(other) => bail!("Unexpected metadata value: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::http::Proxies;
    use crate::host::sigv4::Credentials;
    use serde_json::json;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn response(metadata: Value) -> Value {
        json!({
            "DescribeStackResourceResponse": {
                "DescribeStackResourceResult": {
                    "StackResourceDetail": { "LogicalResourceId": "Host", "Metadata": metadata }
                }
            }
        })
    }

    #[test]
    fn test_metadata_string_is_decoded() {
        let raw = r#"{"AWS::CloudFormation::Init":{"config":{}}}"#;
        let meta = extract_metadata(&response(Value::String(raw.to_string()))).unwrap();
        assert_eq!(meta, json!({ "AWS::CloudFormation::Init": { "config": {} } }));
    }

    #[test]
    fn test_metadata_object_is_accepted() {
        let meta = extract_metadata(&response(json!({ "a": 1 }))).unwrap();
        assert_eq!(meta, json!({ "a": 1 }));
    }

    #[test]
    fn test_missing_metadata() {
        assert!(extract_metadata(&response(Value::Null)).is_err());
        assert!(extract_metadata(&json!({})).is_err());
        assert!(extract_metadata(&response(Value::String("{broken".into()))).is_err());
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            endpoint(None, "eu-west-1").unwrap(),
            "https://cloudformation.eu-west-1.amazonaws.com/"
        );
        assert_eq!(
            endpoint(Some("http://localhost:8080"), "us-east-1").unwrap(),
            "http://localhost:8080"
        );
        assert!(endpoint(Some("localhost"), "us-east-1").is_err());
    }

    #[test]
    fn test_describe_stack_resource_is_signed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/", listener.local_addr().unwrap());

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = Vec::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                head.push(line.trim_end().to_ascii_lowercase());
            }
            let body = response(Value::String(r#"{"AWS::CloudFormation::Init":{}}"#.into()))
                .to_string();
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            head
        });

        let signer = Signer::new(
            Credentials {
                access_key_id: "AKIDHOST".to_string(),
                secret_access_key: "host-secret".to_string(),
                session_token: Some("session".to_string()),
            },
            "ap-southeast-2",
            SERVICE,
        );
        let meta =
            describe_stack_resource(&HttpClient::default(), &endpoint, "app", "Host", Some(&signer))
                .unwrap();
        assert_eq!(meta, json!({ "AWS::CloudFormation::Init": {} }));

        let head = server.join().unwrap();
        assert!(head[0].contains("action=describestackresource"));
        assert!(head[0].contains("logicalresourceid=host"));
        assert!(head.iter().any(|line| line.starts_with(
            "authorization: aws4-hmac-sha256 credential=akidhost/"
        ) && line.contains("/ap-southeast-2/cloudformation/aws4_request")));
        assert!(head.iter().any(|line| line == "x-amz-security-token: session"));
    }

    #[test]
    fn test_fetch_local() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("meta.json");
        fs::write(&path, r#"{"AWS::CloudFormation::Init":{}}"#).unwrap();

        let config = RunConfig {
            origin: MetadataOrigin::Local(path),
            data_dir: temp.path().join("data"),
            proxies: Proxies::default(),
        };
        assert_eq!(fetch(&config).unwrap(), json!({ "AWS::CloudFormation::Init": {} }));

        let missing = RunConfig {
            origin: MetadataOrigin::Local(PathBuf::from("/nonexistent/meta.json")),
            data_dir: temp.path().join("data"),
            proxies: Proxies::default(),
        };
        assert!(fetch(&missing).is_err());
    }
}
