use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use photoflow::cli::{Cli, Command};
use photoflow::config::FlowConfig;
use photoflow::session::Session;
use photoflow::state_machine::Upload;
use photoflow::ui::{self, SessionProgress};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => FlowConfig::load_from(path)?,
        None => FlowConfig::load()?,
    };
    cli.apply_overrides(&mut config);
    config.validate()?;

    match &cli.command {
        Command::Upload { files } => {
            let uploads = files
                .iter()
                .map(|path| read_upload(path.as_path()))
                .collect::<Result<Vec<_>>>()?;
            run_session(&cli, config, uploads).await
        }
        Command::Demo { count, size } => {
            run_session(&cli, config, demo_uploads(*count, *size)).await
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default = if verbose { "photoflow=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let label = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Upload::new(label, bytes))
}

fn demo_uploads(count: usize, size: usize) -> Vec<Upload> {
    const EXTENSIONS: [&str; 4] = ["jpg", "png", "gif", "webp"];
    (0..count)
        .map(|i| {
            let ext = EXTENSIONS[i % EXTENSIONS.len()];
            Upload::new(format!("demo-{i:03}.{ext}"), vec![(i % 256) as u8; size])
        })
        .collect()
}

async fn run_session(cli: &Cli, config: FlowConfig, uploads: Vec<Upload>) -> Result<()> {
    let progress = SessionProgress::start(uploads.len(), !cli.json);
    let session = Session::new(config);
    let report = session
        .run(uploads, |counts, fresh| progress.update(counts, fresh))
        .await?;

    if cli.json {
        ui::print_json(&report)?;
    } else {
        progress.complete(&report);
        progress.print_items(&report);
    }

    if cli.cleanup {
        let removed = session.cleanup(&report);
        if !cli.json {
            println!("\n  Removed {removed} item(s)");
        }
    }
    Ok(())
}
