//! Error types for decoding metadata and resolving configSets.

use thiserror::Error;

/// Errors raised while turning a raw metadata document into [`crate::Metadata`].
///
/// Any of these is fatal: nothing is applied to the host.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The document is not valid JSON, or a section has the wrong shape
    #[error("invalid metadata JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The top-level document is not a JSON object
    #[error("metadata must be a JSON object")]
    NotAnObject,

    /// The mandatory init key is absent
    #[error("could not find 'AWS::CloudFormation::Init' key in metadata")]
    MissingInit,

    /// The init section is present but is not an object
    #[error("'AWS::CloudFormation::Init' must be a JSON object")]
    InvalidInit,

    /// A truthy field holds something other than true/false/1/0
    #[error("invalid boolean value {value}: expected true, false, \"1\" or \"0\"")]
    InvalidBoolean {
        /// The offending JSON value, rendered as JSON
        value: String,
    },

    /// The authentication section could not be decoded
    #[error("invalid 'AWS::CloudFormation::Authentication' section: {0}")]
    Authentication(#[source] serde_json::Error),

    /// A configSet is not a list, or one of its entries is neither a name nor a reference
    #[error("invalid entry in configSet '{set}': {entry}")]
    InvalidSetEntry {
        /// Name of the configSet holding the entry
        set: String,
        /// The offending JSON value
        entry: String,
    },

    /// A config block failed to decode
    #[error("invalid config '{name}': {source}")]
    InvalidConfig {
        /// Name of the config block
        name: String,
        /// Underlying decode failure
        #[source]
        source: serde_json::Error,
    },

    /// A dotted key did not resolve to a value
    #[error("key not found in metadata: {0}")]
    KeyNotFound(String),
}

/// Errors raised while flattening configSets into an execution plan.
///
/// Resolution happens before any apply begins, so these are fatal too.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// A requested or referenced configSet does not exist
    #[error("unknown configSet '{name}'{}", referenced_from.as_ref().map(|from| format!(" (referenced from '{from}')")).unwrap_or_default())]
    UnknownSet {
        /// The missing configSet
        name: String,
        /// The configSet that referenced it, if it was not requested directly
        referenced_from: Option<String>,
    },

    /// A configSet lists a config that is not defined
    #[error("configSet '{set}' references unknown config '{config}'")]
    UnknownConfig {
        /// configSet listing the name
        set: String,
        /// The missing config name
        config: String,
    },

    /// configSet references loop back on themselves
    #[error("configSet cycle: {}", path.join(" -> "))]
    Cycle {
        /// The cycle, starting and ending at the re-entered set
        path: Vec<String>,
    },
}

/// Result type for metadata decoding.
pub type Result<T> = std::result::Result<T, DecodeError>;
