use crate::cli::SourceArgs;
use crate::host::http::Proxies;
use anyhow::{Result, bail};
use std::path::PathBuf;

/// Where the metadata document is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOrigin {
    /// A JSON file on this host
    Local(PathBuf),
    /// The metadata of a resource in a stack
    Stack {
        stack: String,
        resource: String,
        region: String,
        /// Endpoint override; defaults to the regional endpoint
        url: Option<String>,
    },
}

/// Resolved settings for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub origin: MetadataOrigin,
    pub data_dir: PathBuf,
    /// Used for the metadata query and for every download
    pub proxies: Proxies,
}

impl RunConfig {
    /// Build the run settings from parsed flags.
    ///
    /// `--local` wins over `--stack`/`--resource`; one of the two forms is
    /// required.
    pub fn from_args(args: &SourceArgs) -> Result<Self> {
        warn_obsolete(args);

        let origin = match (&args.local, &args.stack, &args.resource) {
            (Some(path), _, _) => MetadataOrigin::Local(path.clone()),
            (None, Some(stack), Some(resource)) => MetadataOrigin::Stack {
                stack: stack.clone(),
                resource: resource.clone(),
                region: args.region.clone(),
                url: args.url.clone(),
            },
            _ => bail!("You must pass --local, or --stack and --resource"),
        };

        Ok(Self {
            origin,
            data_dir: args.data_dir.clone().unwrap_or_else(default_data_dir),
            proxies: Proxies {
                http: args.http_proxy.clone(),
                https: args.https_proxy.clone(),
            },
        })
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.data_dir.join("metadata.json")
    }
}

fn warn_obsolete(args: &SourceArgs) {
    let obsolete = [
        ("--credential-file", args.credential_file.is_some()),
        ("--role", args.role.is_some()),
        ("--access-key", args.access_key.is_some()),
        ("--secret-key", args.secret_key.is_some()),
    ];
    for (flag, given) in obsolete {
        if given {
            log::warn!("{flag} is obsolete and ignored");
        }
    }
}

/// Platform default for the data directory
#[cfg(not(windows))]
pub fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/cfn-init/data")
}

/// Platform default for the data directory
#[cfg(windows)]
pub fn default_data_dir() -> PathBuf {
    let drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".to_string());
    PathBuf::from(format!(r"{drive}\cfn\cfn-init\data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_origin() {
        let args = SourceArgs {
            local: Some(PathBuf::from("/tmp/meta.json")),
            stack: Some("ignored".to_string()),
            data_dir: Some(PathBuf::from("/tmp/data")),
            ..SourceArgs::default()
        };
        let config = RunConfig::from_args(&args).unwrap();
        assert_eq!(
            config.origin,
            MetadataOrigin::Local(PathBuf::from("/tmp/meta.json"))
        );
        assert_eq!(config.metadata_file(), PathBuf::from("/tmp/data/metadata.json"));
    }

    #[test]
    fn test_stack_origin() {
        let args = SourceArgs {
            stack: Some("app".to_string()),
            resource: Some("Host".to_string()),
            region: "eu-west-1".to_string(),
            https_proxy: Some("http://proxy:3128".to_string()),
            ..SourceArgs::default()
        };
        let config = RunConfig::from_args(&args).unwrap();
        assert_eq!(config.proxies.https.as_deref(), Some("http://proxy:3128"));
        assert_eq!(config.proxies.http, None);
        assert!(matches!(
            config.origin,
            MetadataOrigin::Stack { ref region, ref url, .. } if region == "eu-west-1" && url.is_none()
        ));
        assert_eq!(config.data_dir, default_data_dir());
    }

    #[test]
    fn test_missing_origin() {
        let args = SourceArgs {
            stack: Some("app".to_string()),
            ..SourceArgs::default()
        };
        let err = RunConfig::from_args(&args).unwrap_err();
        assert!(err.to_string().contains("--local, or --stack and --resource"));
    }
}
