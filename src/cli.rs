use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cfn")]
#[command(version)]
#[command(about = "Bootstrap a host from its CloudFormation::Init metadata", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Where the metadata comes from and where run data is kept
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Read metadata from a local JSON file instead of a stack
    #[arg(long, global = true, value_name = "FILE")]
    pub local: Option<PathBuf>,

    /// Name of the stack holding the resource
    #[arg(short, long, global = true)]
    pub stack: Option<String>,

    /// Logical ID of the resource whose metadata to read
    #[arg(short, long, global = true)]
    pub resource: Option<String>,

    /// Region of the stack
    #[arg(long, global = true, default_value = "us-east-1")]
    pub region: String,

    /// Endpoint to query instead of the regional default
    #[arg(short, long, global = true)]
    pub url: Option<String>,

    /// Proxy for plain HTTP requests
    #[arg(long, global = true, env = "HTTP_PROXY")]
    pub http_proxy: Option<String>,

    /// Proxy for HTTPS requests
    #[arg(long, global = true, env = "HTTPS_PROXY")]
    pub https_proxy: Option<String>,

    /// Directory for the metadata copy, run-state and lock file
    #[arg(long, global = true, env = "CFN_INIT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Obsolete: credentials are no longer read from a file
    #[arg(short = 'f', long, global = true, hide = true)]
    pub credential_file: Option<PathBuf>,

    /// Obsolete: requests are no longer signed
    #[arg(long, global = true, hide = true)]
    pub role: Option<String>,

    /// Obsolete: requests are no longer signed
    #[arg(long, global = true, hide = true)]
    pub access_key: Option<String>,

    /// Obsolete: requests are no longer signed
    #[arg(long, global = true, hide = true)]
    pub secret_key: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Converge this host to the resource's metadata
    Init(InitArgs),

    /// Print the resource's metadata, or one key of it
    GetMetadata(GetMetadataArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// configSets to run, in order
    #[arg(
        short = 'c',
        long = "configsets",
        value_delimiter = ',',
        default_value = "default"
    )]
    pub config_sets: Vec<String>,

    /// Continue an interrupted run from its saved run-state
    #[arg(long)]
    pub resume: bool,
}

#[derive(Args, Debug)]
pub struct GetMetadataArgs {
    /// Dotted key to print, e.g. AWS::CloudFormation::Init.config
    #[arg(short, long)]
    pub key: Option<String>,
}

/// Names under which the binary selects a subcommand by itself
const MULTI_CALL: &[(&str, &str)] = &[("cfn-init", "init"), ("cfn-get-metadata", "get-metadata")];

/// Rewrite argv so `cfn-init ...` behaves like `cfn init ...`.
pub fn multi_call_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut args: Vec<String> = args.into_iter().collect();
    let invoked_as = args
        .first()
        .and_then(|arg0| std::path::Path::new(arg0).file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some((_, subcommand)) = MULTI_CALL.iter().find(|(name, _)| *name == invoked_as) {
        args.insert(1, (*subcommand).to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(multi_call_args(args.iter().map(|s| s.to_string()))).unwrap()
    }

    #[test]
    fn test_configsets_default_and_list() {
        let cli = parse(&["cfn", "init", "--local", "meta.json"]);
        let Command::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert_eq!(args.config_sets, ["default"]);
        assert!(!args.resume);
        assert_eq!(cli.source.local, Some(PathBuf::from("meta.json")));

        let cli = parse(&["cfn", "init", "-c", "base,web", "--resume", "-s", "app", "-r", "Host"]);
        let Command::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert_eq!(args.config_sets, ["base", "web"]);
        assert!(args.resume);
        assert_eq!(cli.source.stack.as_deref(), Some("app"));
        assert_eq!(cli.source.resource.as_deref(), Some("Host"));
        assert_eq!(cli.source.region, "us-east-1");
    }

    #[test]
    fn test_multi_call_init() {
        let cli = parse(&["/usr/local/bin/cfn-init", "-v", "--local", "m.json", "-c", "web"]);
        assert_eq!(cli.verbose, 1);
        let Command::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert_eq!(args.config_sets, ["web"]);
    }

    #[test]
    fn test_multi_call_get_metadata() {
        let cli = parse(&["cfn-get-metadata", "--local", "m.json", "-k", "a.b"]);
        let Command::GetMetadata(args) = cli.command else {
            panic!("expected get-metadata");
        };
        assert_eq!(args.key.as_deref(), Some("a.b"));
    }

    #[test]
    fn test_plain_name_is_not_rewritten() {
        let args = multi_call_args(["cfn".to_string(), "init".to_string()]);
        assert_eq!(args, ["cfn", "init"]);
    }

    #[test]
    fn test_obsolete_flags_are_accepted() {
        let cli = parse(&[
            "cfn",
            "init",
            "--local",
            "m.json",
            "--role",
            "app-role",
            "--access-key",
            "AKIA",
        ]);
        assert_eq!(cli.source.role.as_deref(), Some("app-role"));
    }
}
