use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use archiscribe::cli::{Cli, Command};
use archiscribe::commands;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    archiscribe::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let mut config = archiscribe::config::Config::from_env().context("load config")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    if let Some(dir) = cli.repo_dir {
        config.repo_dir = dir;
    }

    match cli.command {
        Command::Scrape => commands::scrape(&config).await.context("scrape")?,
        Command::Task(args) => commands::task(&config, args).await.context("task")?,
        Command::Save(args) => commands::save(&config, args).await.context("save")?,
        Command::Show(args) => commands::show(&config, args).await.context("show")?,
        Command::List => commands::list(&config).context("list")?,
        Command::Evict => commands::evict(&config).context("evict")?,
    }

    Ok(())
}
