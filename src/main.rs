mod cli;
mod commands;
mod config;
mod logging;
mod model;
mod remote;
mod session;
mod storage;
mod sync;
mod ui;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config = config::AppConfig::load(args.config.as_deref())?;
    let _log_guard = logging::init(&storage::global_data_dir()?, &config.logging.filter)?;

    let command = args.command.unwrap_or(cli::Command::Tui);
    match command {
        cli::Command::Init => commands::init(),
        cli::Command::List { filter } => commands::list(&config, filter),
        cli::Command::Add { title } => commands::add(&config, title),
        cli::Command::Toggle { id } => commands::toggle(&config, id),
        cli::Command::Edit { id, title } => commands::edit(&config, id, title),
        cli::Command::Remove { id } => commands::remove(&config, id),
        cli::Command::ClearCompleted => commands::clear_completed(&config),
        cli::Command::Filter { filter } => commands::filter(&config, filter),
        cli::Command::Login { email } => commands::login(&config, email),
        cli::Command::Verify { email, code } => commands::verify(&config, email, code),
        cli::Command::Logout => commands::logout(&config),
        cli::Command::Whoami => commands::whoami(&config),
        cli::Command::Tui => commands::tui(&config),
    }
}
