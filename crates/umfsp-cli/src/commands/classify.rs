//! Classify command - show how a mount target would be registered.
//!
//! # Examples
//!
//! ```bash
//! umfsp classify 'E:'
//! umfsp classify '\\?\C:\mnt' --json
//! ```

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use umfsp_mount::{MountEndpoint, classify};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Mount target: `X:`, `\\?\X:`, `\\?\X:\dir` or a directory path
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct Classification<'a> {
    target: &'a str,
    endpoint: &'a MountEndpoint,
    mount_point: String,
    registration: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    leaf: Option<&'a str>,
}

#[instrument(level = "debug", name = "cmd::classify", skip_all, fields(target = %args.target))]
pub fn execute(args: &Args) -> Result<()> {
    let endpoint = classify(&args.target)
        .with_context(|| format!("Cannot classify mount target {:?}", args.target))?;
    let (parent, leaf) = endpoint.directory_parts().unzip();
    let out = Classification {
        target: &args.target,
        endpoint: &endpoint,
        mount_point: endpoint.mount_point(),
        registration: if endpoint.is_drive() {
            "create_drive"
        } else {
            "notify_create_directory"
        },
        parent,
        leaf,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{endpoint}");
        println!("mount point:  {}", out.mount_point);
        println!("registration: {}", out.registration);
        if let (Some(parent), Some(leaf)) = (out.parent, out.leaf) {
            println!("parent:       {parent}");
            println!("leaf:         {leaf}");
        }
    }
    Ok(())
}
