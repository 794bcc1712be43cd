use std::path::PathBuf;

use gdrive_core::DriveClient;
use gdriveup::config::UploaderConfig;
use gdriveup::sync::engine::{CopyOptions, Uploader};
use gdriveup::sync::index::IndexStore;
use tokio_util::sync::CancellationToken;

const TOKEN_KEY: &str = "oauth_token";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Upload(UploadArgs),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct UploadArgs {
    source: Option<PathBuf>,
    target: Option<String>,
    base: Option<PathBuf>,
    parallelism: Option<usize>,
    remains_only: bool,
    estimate_only: bool,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let verb = match args.next() {
        Some(verb) => verb,
        None => return Ok(CliMode::Help),
    };
    match verb.as_str() {
        "--help" | "-h" | "help" => return Ok(CliMode::Help),
        "upload" => {}
        other => anyhow::bail!("unknown command: {other}"),
    }

    let mut upload = UploadArgs::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--source" => upload.source = Some(PathBuf::from(take_value(&mut args, &arg)?)),
            "--target" => upload.target = Some(take_value(&mut args, &arg)?),
            "--base" => upload.base = Some(PathBuf::from(take_value(&mut args, &arg)?)),
            "--parallelism" => {
                let raw = take_value(&mut args, &arg)?;
                let value: usize = raw
                    .parse()
                    .ok()
                    .filter(|value| *value > 0)
                    .ok_or_else(|| anyhow::anyhow!("--parallelism needs a positive number, got {raw}"))?;
                upload.parallelism = Some(value);
            }
            "--remains-only" => upload.remains_only = true,
            "--estimate-only" => upload.estimate_only = true,
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    if upload.source.is_none() {
        anyhow::bail!("upload needs --source");
    }
    if upload.target.is_none() {
        anyhow::bail!("upload needs --target");
    }
    Ok(CliMode::Upload(upload))
}

// An absent --base means keys are relative to the working directory, so
// `upload --source photos` indexes under "photos/".
fn cli_base(base: Option<PathBuf>) -> std::io::Result<PathBuf> {
    match base {
        Some(base) => Ok(base),
        None => std::env::current_dir(),
    }
}

fn take_value<I>(args: &mut I, flag: &str) -> anyhow::Result<String>
where
    I: Iterator<Item = String>,
{
    args.next()
        .ok_or_else(|| anyhow::anyhow!("{flag} needs a value"))
}

fn print_help() {
    println!("Usage: gdriveup upload --source <dir> --target <remote-path> [options]");
    println!("  --source <dir>         Local directory to mirror");
    println!("  --target <path>        Remote folder path, created if missing");
    println!("  --base <dir>           Base for identity keys (default: the source)");
    println!("  --parallelism <n>      Concurrent uploads (default: 2)");
    println!("  --remains-only         Skip files already marked uploaded");
    println!("  --estimate-only        Count pending bytes, change nothing");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let upload = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            print_help();
            return Ok(());
        }
        CliMode::Upload(upload) => upload,
    };

    let config = UploaderConfig::from_env();
    let index = match &config.database_url {
        Some(url) => IndexStore::new(url).await?,
        None => IndexStore::new_default().await?,
    };
    let token = match &config.token {
        Some(token) => {
            index.kv_set(TOKEN_KEY, token).await?;
            token.clone()
        }
        None => match index.kv_get(TOKEN_KEY).await? {
            Some(token) => token,
            None => anyhow::bail!(
                "no access token; set GDRIVE_TOKEN in the environment or a .env file"
            ),
        },
    };

    let client = DriveClient::new(token)?;
    let uploader = Uploader::new(client, index);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[gdriveup] interrupt received, draining in-flight work");
            signal_cancel.cancel();
        }
    });

    let source = upload.source.unwrap_or_default();
    let target = upload.target.unwrap_or_default();
    let options = CopyOptions {
        base_dir: Some(cli_base(upload.base)?),
        remains_only: upload.remains_only,
        estimate_only: upload.estimate_only,
        upload_concurrency: upload.parallelism.unwrap_or(config.upload_concurrency),
        file_concurrency: config.file_concurrency,
        cancel,
    };
    // Per-file and per-folder failures are already reported and counted; the
    // process still exits zero so scheduled re-runs can pick up the remains.
    uploader.copy(&source, &target, options).await?;
    Ok(())
}
