use crate::model::Filter;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "checkit", version, about = "Terminal to-do list with optional cloud sync")]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Keep tasks for the current directory in ./.checkit
    Init,
    /// List tasks
    List {
        /// Override the saved filter (all, active, done)
        #[arg(long)]
        filter: Option<Filter>,
    },
    /// Add a new task
    Add {
        /// Title of the task
        title: String,
    },
    /// Flip a task between active and done
    Toggle {
        /// Task id
        id: i64,
    },
    /// Change a task's title
    Edit {
        /// Task id
        id: i64,
        /// New title
        title: String,
    },
    /// Delete a task
    Remove {
        /// Task id
        id: i64,
    },
    /// Delete every completed task
    ClearCompleted,
    /// Show or set the saved filter
    Filter {
        /// all, active or done
        filter: Option<Filter>,
    },
    /// E-mail a sign-in link and code
    Login {
        /// Address to send the link to
        email: String,
    },
    /// Finish signing in with the code from the e-mail
    Verify {
        /// Address the link was sent to
        email: String,
        /// One-time code from the e-mail
        code: String,
    },
    /// Sign out and go back to local tasks
    Logout,
    /// Show who is signed in
    Whoami,
    /// Launch the interactive TUI
    Tui,
}
