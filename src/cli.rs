use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::warn;

use crate::commands::{self, CommandReport};
use crate::harvest::config;
use crate::logging;

#[derive(Debug, Parser)]
#[command(name = "chat-harvest", version, about = "Harvest live chat replay messages into CSV")]
struct Cli {
    /// Print the command report as JSON. Message echo is disabled.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Play a stream in a browser and record its chat until the stream ends.
    Harvest {
        url: String,
        #[arg(default_value = "output.csv")]
        output: PathBuf,
    },
    /// Run the harvest loop against a recorded JSON fixture.
    Replay {
        fixture: PathBuf,
        #[arg(default_value = "output.csv")]
        output: PathBuf,
    },
    /// Show the effective configuration.
    Config,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    let mut rendered = report.render(json)?;
    if json {
        rendered.push('\n');
    }
    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(rendered.as_bytes())
        .and_then(|()| stdout.flush())
    {
        warn!("could not print {} report: {err}", report.command);
    }
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    // clap exits with 2 on bad usage, which is reserved for mid-run failures.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            err.print()?;
            return Ok(());
        }
        Err(err) => {
            err.print()?;
            anyhow::bail!("invalid command line");
        }
    };
    let cfg = config::load_config()?;
    logging::init(&cfg.logging);

    let echo = !cli.json;
    let report = match cli.command {
        Command::Harvest { url, output } => commands::harvest::run(
            &cfg,
            &commands::harvest::HarvestOptions { url, output, echo },
        )?,
        Command::Replay { fixture, output } => commands::replay::run(
            &cfg,
            &commands::replay::ReplayOptions {
                fixture,
                output,
                echo,
            },
        )?,
        Command::Config => commands::config::run(&cfg)?,
    };
    print_report(&report, cli.json)
}
