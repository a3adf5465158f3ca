//! `tripctl health` command implementation

use anyhow::{Context, Result};

use crate::api::TripClient;
use crate::config::Config;

pub async fn run(config: &Config) -> Result<()> {
    let client = TripClient::new(config)?;
    let status = client
        .health_check()
        .await
        .with_context(|| format!("Planning service at {} is unreachable", client.base_url()))?;

    println!("✓ {} is up", client.base_url());
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
