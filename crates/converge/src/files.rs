//! File spec interpretation: mode bits and content resolution.

use crate::error::ApplyError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use metadata::{Encoding, File};

/// File-type bits of a mode
const S_IFMT: u32 = 0o170_000;
/// File-type value marking a symbolic link
const S_IFLNK: u32 = 0o120_000;

/// A parsed `mode` string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode {
    /// Permission bits, including setuid/setgid/sticky
    pub permissions: u32,
    pub symlink: bool,
}

/// Parse an octal mode such as `"000644"` or `"120000"`.
pub fn parse_mode(path: &str, mode: &str) -> Result<FileMode, ApplyError> {
    let raw = u32::from_str_radix(mode.trim(), 8).map_err(|_| ApplyError::InvalidSpec {
        unit: path.to_string(),
        reason: format!("mode '{mode}' is not an octal number"),
    })?;
    Ok(FileMode {
        permissions: raw & 0o7777,
        symlink: raw & S_IFMT == S_IFLNK,
    })
}

/// Where a file's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource<'a> {
    Inline(Vec<u8>),
    Remote(&'a str),
}

/// Decide where the contents of `spec` come from.
///
/// Inline `content` wins over `source`; a spec with neither yields an empty
/// file.
pub fn content_source<'a>(path: &str, spec: &'a File) -> Result<ContentSource<'a>, ApplyError> {
    if let Some(content) = &spec.content {
        let text = content.render();
        let bytes = match spec.encoding {
            Encoding::Plain => text.into_bytes(),
            Encoding::Base64 => {
                let compact: String = text.split_whitespace().collect();
                STANDARD
                    .decode(compact)
                    .map_err(|e| ApplyError::InvalidSpec {
                        unit: path.to_string(),
                        reason: format!("invalid base64 content: {e}"),
                    })?
            }
        };
        if spec.source.is_some() {
            log::warn!("{path}: both content and source given, using content");
        }
        return Ok(ContentSource::Inline(bytes));
    }

    Ok(match spec.source.as_deref() {
        Some(uri) => ContentSource::Remote(uri),
        None => ContentSource::Inline(Vec::new()),
    })
}

/// The link target of a symlink spec
pub fn link_target(path: &str, spec: &File) -> Result<String, ApplyError> {
    match &spec.content {
        Some(content) => {
            let target = content.render();
            let target = target.trim();
            if target.is_empty() {
                Err(missing_target(path))
            } else {
                Ok(target.to_string())
            }
        }
        None => Err(missing_target(path)),
    }
}

fn missing_target(path: &str) -> ApplyError {
    ApplyError::InvalidSpec {
        unit: path.to_string(),
        reason: "symlink mode requires the link target in content".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> File {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(
            parse_mode("/f", "000644").unwrap(),
            FileMode {
                permissions: 0o644,
                symlink: false
            }
        );
        assert_eq!(parse_mode("/f", "100755").unwrap().permissions, 0o755);
        assert_eq!(parse_mode("/f", "4755").unwrap().permissions, 0o4755);

        let link = parse_mode("/f", "120000").unwrap();
        assert!(link.symlink);
        assert_eq!(link.permissions, 0);

        assert!(matches!(
            parse_mode("/f", "rw-r--r--"),
            Err(ApplyError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_plain_and_document_content() {
        let file = spec(json!({ "content": "hello\n" }));
        assert_eq!(
            content_source("/f", &file).unwrap(),
            ContentSource::Inline(b"hello\n".to_vec())
        );

        let file = spec(json!({ "content": { "a": 1 } }));
        let ContentSource::Inline(bytes) = content_source("/f", &file).unwrap() else {
            panic!("expected inline content");
        };
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, json!({ "a": 1 }));
    }

    #[test]
    fn test_base64_content() {
        let file = spec(json!({ "content": "aGVs\nbG8=", "encoding": "base64" }));
        assert_eq!(
            content_source("/f", &file).unwrap(),
            ContentSource::Inline(b"hello".to_vec())
        );

        let file = spec(json!({ "content": "!!!", "encoding": "base64" }));
        assert!(content_source("/f", &file).is_err());
    }

    #[test]
    fn test_content_wins_over_source() {
        let file = spec(json!({ "content": "inline", "source": "https://example.com/f" }));
        assert_eq!(
            content_source("/f", &file).unwrap(),
            ContentSource::Inline(b"inline".to_vec())
        );

        let file = spec(json!({ "source": "https://example.com/f" }));
        assert_eq!(
            content_source("/f", &file).unwrap(),
            ContentSource::Remote("https://example.com/f")
        );

        let file = spec(json!({}));
        assert_eq!(
            content_source("/f", &file).unwrap(),
            ContentSource::Inline(Vec::new())
        );
    }

    #[test]
    fn test_link_target() {
        let file = spec(json!({ "content": "/opt/app/v2", "mode": "120000" }));
        assert_eq!(link_target("/f", &file).unwrap(), "/opt/app/v2");
        assert!(link_target("/f", &spec(json!({ "mode": "120000" }))).is_err());
    }
}
