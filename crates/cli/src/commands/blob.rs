use std::path::{Path, PathBuf};

use clap::Args;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use stratum_core::BlobDescription;
use stratum_gateway::StorageGateway;
use stratum_storage::{BlobStorage, list_blob_ids};

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// File to store, or `-` for stdin.
    pub path: PathBuf,
    /// Blob id. Generated when omitted.
    #[arg(long)]
    pub id: Option<String>,
    /// Filename recorded on the blob. Defaults to the file's name.
    #[arg(long)]
    pub filename: Option<String>,
    #[arg(long, default_value = "application/octet-stream")]
    pub content_type: String,
    /// Minutes until the blob expires. `0` keeps it forever.
    #[arg(long, default_value_t = 0)]
    pub retention: u64,
    /// Attach a property as `key=value`. JSON values are parsed, anything
    /// else is stored as a string. Repeatable.
    #[arg(long = "property", value_parser = parse_property)]
    pub properties: Vec<(String, Value)>,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    pub id: String,
    /// Write to this file instead of stdout.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct IdArgs {
    pub id: String,
}

fn parse_property(input: &str) -> Result<(String, Value), String> {
    let (key, raw) = input
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {input:?}"))?;
    if key.is_empty() {
        return Err("property key is empty".to_owned());
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
    Ok((key.to_owned(), value))
}

fn print_description(desc: &BlobDescription, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(desc)?),
        OutputFormat::Text => {
            println!("ID:           {}", desc.blob_id);
            println!("Tenant:       {}", desc.tenant_id);
            println!("Filename:     {}", desc.filename);
            println!("Content-Type: {}", desc.content_type);
            println!("Length:       {}", desc.content_length);
            println!("Hash:         {}", desc.hash);
            if desc.retention > 0 {
                println!("Retention:    {} min", desc.retention);
            }
            if let Some(check) = &desc.check {
                let state = if check.healthy { "healthy" } else { "UNHEALTHY" };
                println!("Last check:   {state} {}", check.message);
            }
            for (key, value) in &desc.properties {
                println!("  {key} = {value}");
            }
        }
    }
    Ok(())
}

pub async fn store(
    gateway: &StorageGateway,
    args: &StoreArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let filename = args
        .filename
        .clone()
        .or_else(|| {
            args.path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_default();
    let mut desc = BlobDescription::new(gateway.tenant(), filename, &args.content_type)
        .with_retention(args.retention);
    if let Some(id) = &args.id {
        desc.blob_id.clone_from(id);
    }
    for (key, value) in &args.properties {
        desc.properties.insert(key.clone(), value.clone());
    }

    if args.path == Path::new("-") {
        gateway.store_blob(&mut desc, &mut tokio::io::stdin()).await?;
    } else {
        let mut file = tokio::fs::File::open(&args.path).await?;
        gateway.store_blob(&mut desc, &mut file).await?;
    }
    print_description(&desc, format)
}

pub async fn fetch(gateway: &StorageGateway, args: &FetchArgs) -> anyhow::Result<()> {
    match &args.output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path).await?;
            gateway.retrieve_blob(&args.id, &mut file).await?;
            file.sync_all().await?;
        }
        None => {
            let mut stdout = tokio::io::stdout();
            gateway.retrieve_blob(&args.id, &mut stdout).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

pub async fn delete(gateway: &StorageGateway, args: &IdArgs) -> anyhow::Result<()> {
    gateway.delete_blob(&args.id).await?;
    println!("Deleted {}", args.id);
    Ok(())
}

pub async fn info(
    gateway: &StorageGateway,
    args: &IdArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let desc = gateway.get_blob_description(&args.id).await?;
    print_description(&desc, format)
}

pub async fn list(gateway: &StorageGateway, format: &OutputFormat) -> anyhow::Result<()> {
    let mut ids = list_blob_ids(gateway).await?;
    ids.sort();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ids)?),
        OutputFormat::Text => {
            println!("{} blobs:", ids.len());
            for id in &ids {
                println!("  {id}");
            }
        }
    }
    Ok(())
}
