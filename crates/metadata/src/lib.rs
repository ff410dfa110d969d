//! CloudFormation::Init metadata
//!
//! Decodes the JSON metadata a host is bootstrapped from into a typed model,
//! and flattens its configSets into an ordered execution plan.
//!
//! # Example
//!
//! ```
//! let raw = r#"{
//!     "AWS::CloudFormation::Init": {
//!         "configSets": { "default": ["base"] },
//!         "base": { "commands": { "hello": { "command": "echo hello" } } }
//!     }
//! }"#;
//!
//! let metadata = metadata::decode(raw).unwrap();
//! let plan = metadata::resolve(&metadata.init, &["default"]).unwrap();
//! assert_eq!(plan.steps()[0].config, "base");
//! ```

pub mod decode;
pub mod error;
pub mod resolve;
pub mod select;
pub mod truthy;
pub mod types;

pub use decode::{decode, decode_value};
pub use error::{DecodeError, ResolutionError, Result};
pub use resolve::{ExecutionPlan, PlanStep, resolve};
pub use select::{lookup, select};
pub use types::{
    AUTHENTICATION_KEY, AuthType, Authentication, CONFIG_SETS_KEY, Command, CommandLine, Config,
    DEFAULT_CONFIG, DEFAULT_CONFIG_SET, Encoding, File, FileContent, Group, INIT_KEY, Init,
    InitSystem, Metadata, PackageManager, Service, SetEntry, User, VersionSpec, WaitPolicy,
};
