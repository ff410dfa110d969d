use anyhow::{Context as _, Result, bail};
use converge::{ApplyError, Converger, RunTracker};
use serde_json::Value;
use std::path::Path;

use crate::Context;
use crate::cli::{InitArgs, SourceArgs};
use crate::config::{MetadataOrigin, RunConfig};
use crate::fetch;
use crate::host::SystemHost;
use crate::host::http::HttpClient;
use crate::lock::RunLock;
use crate::ui;

/// Mode of the metadata copy kept in the data directory
const METADATA_COPY_MODE: u32 = 0o600;

pub fn run(ctx: &Context, source: &SourceArgs, args: &InitArgs) -> Result<()> {
    let config = RunConfig::from_args(source)?;
    converge_host(ctx, &config, args)
}

fn converge_host(ctx: &Context, config: &RunConfig, args: &InitArgs) -> Result<()> {
    let _lock = RunLock::acquire(&config.data_dir, &invocation())?;

    let raw = fetch::fetch(config)?;
    save_copy(&config.metadata_file(), &raw)?;

    let doc = metadata::decode_value(raw).context("Invalid metadata")?;
    let plan = metadata::resolve(&doc.init, &args.config_sets)?;

    if !ctx.quiet {
        ui::header("cfn-init");
        ui::kv("Metadata", &describe(&config.origin));
        ui::kv("configSets", &args.config_sets.join(", "));
        ui::kv("Plan", &plan.labels().join(" → "));
        if args.resume {
            ui::info("Resuming from saved run-state");
        }
    }

    let host = SystemHost::new(HttpClient::new(config.proxies.clone()));
    let mut tracker = RunTracker::open(&config.data_dir, args.resume)?;

    let result = Converger::new(&host, &mut tracker).apply(&plan, &doc);
    match result {
        Ok(report) => {
            ui::print_report(&report, ctx.quiet);
            if report.cancelled {
                bail!("Run cancelled; continue with `cfn init --resume`");
            }
            if !report.is_success() {
                bail!("{} resource(s) failed", report.failures.len());
            }
            Ok(())
        }
        Err(err) => {
            ui::print_report(&err.report, ctx.quiet);
            match err.source {
                ApplyError::StaleState(_) => {
                    ui::dim("The saved run-state does not match this plan; run without --resume")
                }
                _ => ui::dim(&format!(
                    "Fix the problem and continue with `cfn init --resume`; run-state: {}",
                    tracker.path().display()
                )),
            }
            Err(err.into())
        }
    }
}

/// Keep a pretty-printed copy of the fetched document for auditing
fn save_copy(path: &Path, raw: &Value) -> Result<()> {
    let pretty = metadata::select(raw, None)?;
    converge::fs::write_atomic(path, pretty.as_bytes(), Some(METADATA_COPY_MODE))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::debug!("Saved metadata to {}", path.display());
    Ok(())
}

fn describe(origin: &MetadataOrigin) -> String {
    match origin {
        MetadataOrigin::Local(path) => path.display().to_string(),
        MetadataOrigin::Stack {
            stack,
            resource,
            region,
            ..
        } => format!("{stack}/{resource} ({region})"),
    }
}

/// The command line recorded in the lock file
fn invocation() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use converge::STATE_FILE;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn quiet() -> Context {
        Context { quiet: true }
    }

    fn setup(temp: &TempDir, init: &Value) -> RunConfig {
        let meta = temp.path().join("meta.json");
        let doc = json!({ "AWS::CloudFormation::Init": init });
        fs::write(&meta, serde_json::to_vec(&doc).unwrap()).unwrap();
        RunConfig {
            origin: MetadataOrigin::Local(meta),
            data_dir: temp.path().join("data"),
            proxies: Default::default(),
        }
    }

    fn args(config_sets: &[&str], resume: bool) -> InitArgs {
        InitArgs {
            config_sets: config_sets.iter().map(|s| s.to_string()).collect(),
            resume,
        }
    }

    #[test]
    fn test_converges_local_metadata() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().display().to_string();
        let init = json!({
            "config": {
                "files": {
                    format!("{root}/etc/app.conf"): { "content": "port=80\n", "mode": "000600" }
                },
                "commands": {
                    "marker": { "command": format!("touch {root}/ran") }
                }
            }
        });
        let config = setup(&temp, &init);

        converge_host(&quiet(), &config, &args(&["default"], false)).unwrap();

        assert_eq!(
            fs::read_to_string(temp.path().join("etc/app.conf")).unwrap(),
            "port=80\n"
        );
        assert!(temp.path().join("ran").exists());
        assert!(config.metadata_file().exists());
        assert!(!config.data_dir.join(STATE_FILE).exists());
        assert!(RunLock::acquire(&config.data_dir, "cfn init").is_ok());
    }

    #[test]
    fn test_failed_command_keeps_run_state() {
        let temp = TempDir::new().unwrap();
        let init = json!({
            "configSets": { "default": ["base"] },
            "base": { "commands": { "broken": { "command": "exit 4" } } }
        });
        let config = setup(&temp, &init);

        let err = converge_host(&quiet(), &config, &args(&["default"], false)).unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert!(config.data_dir.join(STATE_FILE).exists());
        assert!(RunLock::acquire(&config.data_dir, "cfn init --resume").is_ok());
    }

    #[test]
    fn test_unknown_config_set() {
        let temp = TempDir::new().unwrap();
        let init = json!({ "configSets": { "default": [] } });
        let config = setup(&temp, &init);

        let err = converge_host(&quiet(), &config, &args(&["web"], false)).unwrap_err();
        assert!(err.to_string().contains("web"));
    }

    #[test]
    fn test_describe_origin() {
        let origin = MetadataOrigin::Stack {
            stack: "app".to_string(),
            resource: "Host".to_string(),
            region: "eu-west-1".to_string(),
            url: None,
        };
        assert_eq!(describe(&origin), "app/Host (eu-west-1)");
    }
}
