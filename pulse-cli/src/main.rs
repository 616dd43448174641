mod cli;
mod commands;
mod config;
mod terminal;

use std::process;

use anyhow::Result;
use clap::Parser;
use colored::*;
use pulse::NotificationRequest;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands, LogFormat},
    commands::CommandExecutor,
    config::AppConfig,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet, args.log_format);

    let config = AppConfig::load(args.config.as_deref())?;
    let executor = CommandExecutor::new(config);

    match args.command {
        Commands::Watch {
            endpoint,
            subscriber,
            token,
        } => executor.watch(endpoint, subscriber, token).await?,

        Commands::History { command } => executor.history_command(command).await?,

        Commands::Config { show, reset } => executor.config_command(args.config, show, reset)?,

        Commands::Notify {
            title,
            message,
            kind,
            priority,
            duration,
        } => {
            let mut request = NotificationRequest::new(title, message)
                .with_kind(kind)
                .with_priority(priority);
            if let Some(duration) = duration {
                request = request.with_duration_ms(duration);
            }
            executor.notify(request).await?
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, format: LogFormat) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => subscriber
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(verbose)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
