use anyhow::{Context as _, Result};

use crate::Context;
use crate::cli::{GetMetadataArgs, SourceArgs};
use crate::config::RunConfig;
use crate::fetch;

/// Print the whole metadata document, or the value at `--key`
pub fn run(_ctx: &Context, source: &SourceArgs, args: &GetMetadataArgs) -> Result<()> {
    let config = RunConfig::from_args(source)?;
    let raw = fetch::fetch(&config)?;

    let out = metadata::select(&raw, args.key.as_deref())
        .with_context(|| format!("Failed to read {}", args.key.as_deref().unwrap_or("metadata")))?;
    println!("{out}");
    Ok(())
}
