//! `toolwright manifest`: print the tool catalogue.

use anyhow::Context;
use toolwright_tools::{M365_NAMESPACE, POSTGRES_NAMESPACE, m365_manifest, postgres_manifest};

pub fn run(namespace: &str, names_only: bool) -> anyhow::Result<()> {
    let manifest = match namespace {
        M365_NAMESPACE => m365_manifest(),
        POSTGRES_NAMESPACE => postgres_manifest(),
        other => anyhow::bail!(
            "Unknown tool namespace '{other}' (expected {M365_NAMESPACE} or {POSTGRES_NAMESPACE})"
        ),
    };
    if names_only {
        for name in manifest.names() {
            println!("{name}");
        }
        return Ok(());
    }
    let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;
    println!("{json}");
    Ok(())
}
