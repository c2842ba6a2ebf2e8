use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use cas_crypto::digest;
use cas_store::{DirectoryBackend, GetRequest, ObjectStoreClient, StoreConfig};
use cas_types::ObjectId;
use colored::Colorize;
use serde::Serialize;
use walkdir::WalkDir;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Hash(args) => cmd_hash(&cli, args),
        Command::Put(args) => cmd_put(&cli, args).await,
        Command::Get(args) => cmd_get(&cli, args).await,
        Command::Cat(args) => cmd_cat(&cli, args).await,
        Command::Config(_) => cmd_config(&cli),
    }
}

/// One line of `hash`/`put`/`get` output.
#[derive(Debug, Serialize)]
struct ObjectRow {
    id: ObjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn print_rows(format: &OutputFormat, rows: &[ObjectRow]) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Text => {
            for row in rows {
                let target = row
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                match &row.error {
                    Some(err) => println!(
                        "{} {}  {}",
                        "✗".red().bold(),
                        row.id.to_string().yellow(),
                        err.red()
                    ),
                    None => println!("{}  {}", row.id.to_string().yellow(), target),
                }
            }
        }
    }
    Ok(())
}

/// Merge the configuration file (or environment) with command-line overrides.
fn resolve_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = match (&cli.config, &cli.address) {
        (Some(path), _) => StoreConfig::load(path)?,
        (None, Some(address)) => StoreConfig::new(address.clone()),
        (None, None) => StoreConfig::from_env()
            .context("no store configured: pass --config or --address, or set CAS_STORE_ADDRESS")?,
    };
    if let Some(address) = &cli.address {
        config.address = address.clone();
    }
    if cli.no_head_check {
        config.options.disable_head_check = true;
    }
    if let Some(concurrency) = cli.concurrency {
        config.options.get_concurrency = concurrency;
    }
    config.validate()?;
    Ok(config)
}

fn open_client(cli: &Cli) -> anyhow::Result<ObjectStoreClient> {
    let config = resolve_config(cli)?;
    let backend = Arc::new(DirectoryBackend::new(&cli.root));
    tracing::debug!(address = %config.address, root = %cli.root.display(), "opening store");
    Ok(ObjectStoreClient::from_config(backend, &config)?)
}

/// Expand `paths` into regular files, walking directories when `recursive`.
fn collect_files(paths: &[PathBuf], recursive: bool) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            if !recursive {
                bail!("{} is a directory (use --recursive)", path.display());
            }
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn parse_ids(raw: &[String]) -> anyhow::Result<Vec<ObjectId>> {
    raw.iter()
        .map(|s| s.parse::<ObjectId>().with_context(|| format!("invalid object ID {s:?}")))
        .collect()
}

fn cmd_hash(cli: &Cli, args: &HashArgs) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for path in &args.paths {
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        rows.push(ObjectRow {
            id: digest(&data),
            path: Some(path.clone()),
            bytes: Some(data.len()),
            error: None,
        });
    }
    print_rows(&cli.format, &rows)
}

async fn cmd_put(cli: &Cli, args: &PutArgs) -> anyhow::Result<()> {
    let client = open_client(cli)?;
    let mut rows = Vec::new();
    for path in collect_files(&args.paths, args.recursive)? {
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let bytes = data.len();
        let id = client
            .store(data)
            .await
            .with_context(|| format!("storing {}", path.display()))?;
        rows.push(ObjectRow {
            id,
            path: Some(path),
            bytes: Some(bytes),
            error: None,
        });
    }
    print_rows(&cli.format, &rows)
}

async fn cmd_get(cli: &Cli, args: &GetArgs) -> anyhow::Result<()> {
    let client = open_client(cli)?;
    let mut gets: Vec<GetRequest> = parse_ids(&args.ids)?
        .into_iter()
        .map(GetRequest::new)
        .collect();
    client.get_objects(&mut gets).await;

    tokio::fs::create_dir_all(&args.out)
        .await
        .with_context(|| format!("creating {}", args.out.display()))?;

    let mut rows = Vec::with_capacity(gets.len());
    let mut failed = 0;
    for get in gets {
        let id = get.id;
        match get.into_result() {
            Some(Ok(data)) => {
                let path = output_path(&args.out, &id);
                tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                rows.push(ObjectRow {
                    id,
                    path: Some(path),
                    bytes: Some(data.len()),
                    error: None,
                });
            }
            Some(Err(err)) => {
                failed += 1;
                rows.push(ObjectRow {
                    id,
                    path: None,
                    bytes: None,
                    error: Some(err.to_string()),
                });
            }
            None => bail!("object {id} was not attempted"),
        }
    }
    print_rows(&cli.format, &rows)?;
    if failed > 0 {
        bail!("{failed} of {} objects could not be retrieved", rows.len());
    }
    Ok(())
}

fn output_path(out: &Path, id: &ObjectId) -> PathBuf {
    out.join(id.to_hex())
}

async fn cmd_cat(cli: &Cli, args: &CatArgs) -> anyhow::Result<()> {
    let client = open_client(cli)?;
    let id: ObjectId = args
        .id
        .parse()
        .with_context(|| format!("invalid object ID {:?}", args.id))?;
    let data = client.get_object(&id).await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

fn cmd_config(cli: &Cli) -> anyhow::Result<()> {
    let config = resolve_config(cli)?;
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => {
            println!("{}", format!("# backend root: {}", cli.root.display()).dimmed());
            print!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}
