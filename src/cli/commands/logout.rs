//! Logout command - forget the signed-in profile.
//!
//! Sessions are kept; only the stored profile is removed.

use anyhow::Result;
use colored::Colorize;

use crate::app::{App, Event};
use crate::config::Config;

/// Arguments for the logout command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    metgpt logout              Sign out of MetGPT")]
pub struct Args {}

/// Executes the logout command.
pub fn run(_args: Args) -> Result<()> {
    let config = Config::load()?;
    let mut app = App::open(&config)?;

    match app.state.user.clone() {
        Some(user) => {
            app.apply(Event::Logout)?;
            println!("Logged out {} ({} tier)", user.email.cyan(), user.tier);
        }
        None => {
            println!("{}", "Not currently logged in.".yellow());
        }
    }

    Ok(())
}
