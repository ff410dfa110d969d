//! Typed model of a CloudFormation::Init metadata document.
//!
//! Every resource category is an [`IndexMap`] so the declaration order of the
//! source document survives decoding: commands and services are applied in
//! the order their authors wrote them.

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Key holding the init section
pub const INIT_KEY: &str = "AWS::CloudFormation::Init";

/// Key holding named authentication profiles
pub const AUTHENTICATION_KEY: &str = "AWS::CloudFormation::Authentication";

/// Reserved key inside the init section listing run-lists
pub const CONFIG_SETS_KEY: &str = "configSets";

/// Name of the single config used when no configSets are declared
pub const DEFAULT_CONFIG: &str = "config";

/// configSet name reported for single-config documents
pub const DEFAULT_CONFIG_SET: &str = "default";

// ============================================================================
// Document
// ============================================================================

/// A decoded metadata document
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Named authentication profiles, used when fetching files and sources
    pub authentication: IndexMap<String, Authentication>,
    /// The init section
    pub init: Init,
}

impl Metadata {
    /// Look up a named authentication profile
    pub fn authentication(&self, name: &str) -> Option<&Authentication> {
        self.authentication.get(name)
    }

    /// Find the first profile whose URI prefixes or buckets cover `uri`
    pub fn authentication_for_uri(&self, uri: &str) -> Option<(&str, &Authentication)> {
        self.authentication
            .iter()
            .find(|(_, auth)| auth.covers(uri))
            .map(|(name, auth)| (name.as_str(), auth))
    }
}

/// The init section, normalized to one of its two document shapes
#[derive(Debug, Clone, PartialEq)]
pub enum Init {
    /// No `configSets` key: a single config under `"config"`
    Single(Config),
    /// Named run-lists plus every other key of the section as a config
    Sets {
        /// configSet name -> ordered entries
        config_sets: IndexMap<String, Vec<SetEntry>>,
        /// config name -> config, excluding `configSets` itself
        configs: IndexMap<String, Config>,
    },
}

impl Init {
    /// Look up a config by name.
    ///
    /// A single-config document only answers to [`DEFAULT_CONFIG`].
    pub fn config(&self, name: &str) -> Option<&Config> {
        match self {
            Init::Single(config) => (name == DEFAULT_CONFIG).then_some(config),
            Init::Sets { configs, .. } => configs.get(name),
        }
    }

    /// The declared configSets, if the document uses them
    pub fn config_sets(&self) -> Option<&IndexMap<String, Vec<SetEntry>>> {
        match self {
            Init::Single(_) => None,
            Init::Sets { config_sets, .. } => Some(config_sets),
        }
    }
}

/// One entry of a configSet run-list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SetEntry {
    /// A literal config name
    Config(String),
    /// `{ "ConfigSet": "other" }`, expanded in place
    Set {
        #[serde(rename = "ConfigSet")]
        config_set: String,
    },
}

// ============================================================================
// Authentication
// ============================================================================

/// Kind of credentials an authentication profile carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    /// HTTP basic authentication
    #[serde(rename = "basic", alias = "Basic")]
    Basic,
    /// S3 bucket access
    #[serde(rename = "S3", alias = "s3")]
    S3,
}

/// A named authentication profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uris: Vec<String>,
}

impl Authentication {
    /// Whether this profile applies to `uri`, by URI prefix or S3 bucket name
    pub fn covers(&self, uri: &str) -> bool {
        if self.uris.iter().any(|prefix| uri.starts_with(prefix.as_str())) {
            return true;
        }
        match s3_bucket(uri) {
            Some(bucket) => self.buckets.iter().any(|b| b == bucket),
            None => false,
        }
    }
}

/// Extract the bucket from virtual-hosted (`bucket.s3...`) or path-style
/// (`s3.../bucket/key`) S3 URLs.
fn s3_bucket(uri: &str) -> Option<&str> {
    let rest = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    let (host, path) = rest.split_once('/').unwrap_or((rest, ""));

    if let Some((bucket, domain)) = host.split_once(".s3")
        && domain.ends_with("amazonaws.com")
    {
        return Some(bucket);
    }
    if host.starts_with("s3") && host.ends_with("amazonaws.com") {
        return path.split('/').next().filter(|b| !b.is_empty());
    }
    None
}

// ============================================================================
// Config
// ============================================================================

/// A bundle of resources applied as one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub packages: IndexMap<PackageManager, IndexMap<String, VersionSpec>>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub groups: IndexMap<String, Group>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub users: IndexMap<String, User>,
    /// target directory -> archive URI
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub sources: IndexMap<String, String>,
    /// target path -> file spec
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub files: IndexMap<String, File>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub commands: IndexMap<String, Command>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub services: IndexMap<InitSystem, IndexMap<String, Service>>,
}

impl Config {
    /// Whether the config declares no resources at all
    pub fn is_empty(&self) -> bool {
        self.packages.values().all(IndexMap::is_empty)
            && self.groups.is_empty()
            && self.users.is_empty()
            && self.sources.is_empty()
            && self.files.is_empty()
            && self.commands.is_empty()
            && self.services.values().all(IndexMap::is_empty)
    }
}

// ============================================================================
// Packages
// ============================================================================

/// Package manager kinds understood in `packages`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Msi,
    Rpm,
    Yum,
    Apt,
    Python,
    Rubygems,
}

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Msi => "msi",
            Self::Rpm => "rpm",
            Self::Yum => "yum",
            Self::Apt => "apt",
            Self::Python => "python",
            Self::Rubygems => "rubygems",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested version(s) of a package.
///
/// An empty string or empty list means "any version, ensure present".
/// For `msi` and `rpm` the value may also be a package location (URL or path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionSpec {
    Version(String),
    Versions(Vec<String>),
}

impl Default for VersionSpec {
    fn default() -> Self {
        Self::Versions(Vec::new())
    }
}

impl VersionSpec {
    /// Non-empty requested versions, in declaration order
    pub fn versions(&self) -> Vec<&str> {
        match self {
            Self::Version(v) => vec![v.as_str()],
            Self::Versions(vs) => vs.iter().map(String::as_str).collect(),
        }
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect()
    }

    /// Whether any installed version is acceptable
    pub fn is_any(&self) -> bool {
        self.versions().is_empty()
    }

    /// The version to install when the package is missing or mismatched
    pub fn preferred(&self) -> Option<&str> {
        self.versions().first().copied()
    }

    /// Whether `installed` is one of the requested versions.
    ///
    /// A requested version matches exactly, or as a prefix of a longer
    /// `version-release` / dotted string (`1.18` accepts `1.18.0-1`).
    pub fn accepts(&self, installed: &str) -> bool {
        let versions = self.versions();
        versions.is_empty()
            || versions.iter().any(|want| {
                installed == *want
                    || installed
                        .strip_prefix(want)
                        .is_some_and(|rest| rest.starts_with(['-', '.', '+', '~']))
            })
    }
}

// ============================================================================
// Groups & Users
// ============================================================================

/// A local group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    #[serde(
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub gid: Option<String>,
}

/// A local user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    #[serde(
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub uid: Option<String>,
    /// Supplementary groups; each must exist or be declared in `groups`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<String>,
}

/// Accept ids written either as `"501"` or `501`.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string or number id, found {other}"
        ))),
    }
}

// ============================================================================
// Files
// ============================================================================

/// A file, symlink or fetched document at an absolute path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct File {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<FileContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub encoding: Encoding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Octal mode string, e.g. `"000644"`; `120000` file-type bits mean symlink
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Name of an authentication profile used to fetch `source`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    /// Reserved for templating; carried through uninterpreted
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub context: IndexMap<String, Value>,
}

/// Inline file content: literal text, or a JSON document written as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileContent {
    Text(String),
    Document(Value),
}

impl FileContent {
    /// The text that ends up in the file
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Document(value) => format!("{value:#}"),
        }
    }
}

/// Encoding of inline content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Plain,
    Base64,
}

// ============================================================================
// Commands
// ============================================================================

/// A command to run during convergence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command: CommandLine,
    /// Merged over the agent's own environment
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Guard command; a nonzero exit skips `command`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(default, with = "crate::truthy")]
    pub ignore_errors: bool,
    #[serde(default)]
    pub wait_after_completion: WaitPolicy,
}

/// A command line, given either to the shell or as an argv list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Shell(String),
    Argv(Vec<String>),
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(line) => f.write_str(line),
            Self::Argv(argv) => f.write_str(&argv.join(" ")),
        }
    }
}

/// What to do once a command has been launched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Wait for the process to exit
    #[default]
    Complete,
    /// Launch and continue without waiting
    Forever,
    /// Wait for the process, then pause this many seconds
    Seconds(u64),
}

impl<'de> Deserialize<'de> for WaitPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Bool(true) => Ok(Self::Forever),
            Value::Bool(false) => Ok(Self::Complete),
            Value::Number(n) => n
                .as_u64()
                .map(Self::from_seconds)
                .ok_or_else(|| D::Error::custom(format!("invalid waitAfterCompletion {value}"))),
            Value::String(s) => {
                let s = s.trim().to_ascii_lowercase();
                match s.as_str() {
                    "forever" | "true" => Ok(Self::Forever),
                    "false" => Ok(Self::Complete),
                    _ => s.parse::<u64>().map(Self::from_seconds).map_err(|_| {
                        D::Error::custom(format!("invalid waitAfterCompletion {value}"))
                    }),
                }
            }
            _ => Err(D::Error::custom(format!(
                "invalid waitAfterCompletion {value}"
            ))),
        }
    }
}

impl Serialize for WaitPolicy {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Complete => serializer.serialize_bool(false),
            Self::Forever => serializer.serialize_str("forever"),
            Self::Seconds(secs) => serializer.serialize_u64(*secs),
        }
    }
}

impl WaitPolicy {
    fn from_seconds(secs: u64) -> Self {
        if secs == 0 {
            Self::Complete
        } else {
            Self::Seconds(secs)
        }
    }
}

// ============================================================================
// Services
// ============================================================================

/// Init system a service block targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitSystem {
    Sysvinit,
    Systemd,
    Windows,
}

impl fmt::Display for InitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sysvinit => "sysvinit",
            Self::Systemd => "systemd",
            Self::Windows => "windows",
        })
    }
}

/// Desired state of one service, plus the resources that force a restart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Service {
    #[serde(with = "crate::truthy::option", skip_serializing_if = "Option::is_none")]
    pub ensure_running: Option<bool>,
    #[serde(with = "crate::truthy::option", skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub packages: IndexMap<PackageManager, Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
}
