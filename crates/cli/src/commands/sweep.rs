use stratum_core::now_ms;
use stratum_gateway::StorageFactory;

use crate::OutputFormat;

pub async fn run(factory: &StorageFactory, format: &OutputFormat) -> anyhow::Result<()> {
    let retention = factory.retention();
    let deleted = retention.sweep_expired(now_ms()).await;
    retention.refresh().await;
    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({ "deleted": deleted, "tracked": retention.len() });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("Deleted {deleted} expired blobs, {} still tracked", retention.len());
        }
    }
    Ok(())
}
