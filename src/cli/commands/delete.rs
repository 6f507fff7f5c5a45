//! Delete command - permanently remove a session.

use std::io::{self, Write};

use anyhow::Result;
use colored::Colorize;

use crate::app::{App, Event};
use crate::cli::format::{format_timestamp, short_id};
use crate::cli::resolve_session;
use crate::config::Config;

/// Arguments for the delete command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    metgpt delete abc123             Delete session (prompts for confirmation)\n    \
    metgpt delete abc123 --force     Delete without confirmation")]
pub struct Args {
    /// Session ID prefix to delete
    #[arg(value_name = "SESSION")]
    #[arg(
        long_help = "The session ID prefix to delete. Must uniquely identify a\n\
        single session. Use 'metgpt sessions' to find session IDs."
    )]
    pub session: String,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub force: bool,
}

/// Executes the delete command.
pub fn run(args: Args) -> Result<()> {
    let config = Config::load()?;
    let mut app = App::open(&config)?;
    let id = resolve_session(&app.state, &args.session)?;
    let Some(session) = app.state.sessions.get(&id) else {
        anyhow::bail!("Session {id} disappeared while reading");
    };
    let session_short = short_id(&id);

    println!();
    println!("{} {}", "Session".bold(), id.to_string().cyan());
    println!("  {}  {}", "Title:".dimmed(), session.title);
    println!("  {}  {}", "Updated:".dimmed(), format_timestamp(session.updated_at));
    println!();
    println!(
        "{}",
        format!("This will permanently delete {} messages.", session.messages.len()).yellow()
    );

    if !args.force {
        print!("Delete session {}? [y/N] ", session_short.cyan());
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", "Cancelled".dimmed());
            return Ok(());
        }
    }

    app.apply(Event::DeleteSession(id))?;
    println!("{} session {}", "Deleted".green(), session_short.cyan());

    Ok(())
}
