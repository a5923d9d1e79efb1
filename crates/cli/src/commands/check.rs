use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tokio::io::AsyncWriteExt;

use stratum_checker::{CheckSummary, ConsistencyChecker};
use stratum_gateway::StorageGateway;
use stratum_storage::BlobStorage;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Verify this blob only and record the result on its description.
    #[arg(long)]
    pub blob: Option<String>,
    /// Write the audit report to this file instead of stdout.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

pub async fn run(
    gateway: &StorageGateway,
    args: &CheckArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    if let Some(id) = &args.blob {
        let info = gateway.check_blob(id).await?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
            OutputFormat::Text if info.healthy => println!("{id}: healthy"),
            OutputFormat::Text => println!("{id}: UNHEALTHY {}", info.message),
        }
        return Ok(());
    }

    let checker = ConsistencyChecker::new(
        gateway.tenant(),
        Arc::clone(gateway.primary()),
        gateway.backup().cloned(),
        gateway.cache().cloned(),
    );
    let cancel = checker.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let summary = match &args.output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path).await?;
            let summary = checker.run(&mut file).await?;
            file.sync_all().await?;
            summary
        }
        None => {
            let mut stdout = tokio::io::stdout();
            let summary = checker.run(&mut stdout).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
            summary
        }
    };
    interrupt.abort();

    report_summary(&summary)
}

fn report_summary(summary: &CheckSummary) -> anyhow::Result<()> {
    if summary.cancelled {
        anyhow::bail!("check interrupted, report is partial");
    }
    if summary.errors > 0 {
        anyhow::bail!(
            "{} inconsistent entries across {} cached, {} primary and {} orphaned backup blobs",
            summary.errors,
            summary.cache,
            summary.primary,
            summary.backup
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_summary_succeeds() {
        let summary = CheckSummary {
            primary: 3,
            ..CheckSummary::default()
        };
        assert!(report_summary(&summary).is_ok());
    }

    #[test]
    fn errors_and_interruptions_fail() {
        let dirty = CheckSummary {
            primary: 3,
            errors: 1,
            ..CheckSummary::default()
        };
        assert!(report_summary(&dirty).is_err());

        let partial = CheckSummary {
            cancelled: true,
            ..CheckSummary::default()
        };
        let err = report_summary(&partial).unwrap_err();
        assert!(err.to_string().contains("partial"));
    }
}
