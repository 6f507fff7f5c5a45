//! Sessions command - list stored chat sessions.

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use crate::app::App;
use crate::cli::format::{format_relative, short_id};
use crate::cli::OutputFormat;
use crate::config::Config;
use crate::storage::models::{AgentType, Session};

/// Arguments for the sessions command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    metgpt sessions                  List recent sessions (default 20)\n    \
    metgpt sessions --limit 50       Show up to 50 sessions\n    \
    metgpt sessions --format json    Output as JSON")]
pub struct Args {
    /// Maximum number of sessions to display
    #[arg(short, long, default_value = "20", value_name = "N")]
    pub limit: usize,

    /// Output format: text (default), json
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// One row of `metgpt sessions --format json`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRow<'a> {
    id: String,
    title: &'a str,
    agent_id: AgentType,
    updated_at: i64,
    message_count: usize,
    current: bool,
}

/// Executes the sessions command.
pub fn run(args: Args) -> Result<()> {
    let config = Config::load()?;
    let app = App::open(&config)?;
    let state = &app.state;
    let sessions: Vec<&Session> = state.sessions.sessions().iter().take(args.limit).collect();

    if args.format == OutputFormat::Json {
        let rows: Vec<SessionRow> = sessions
            .iter()
            .map(|s| SessionRow {
                id: s.id.to_string(),
                title: &s.title,
                agent_id: s.agent_id,
                updated_at: s.updated_at,
                message_count: s.messages.len(),
                current: state.current_session == Some(s.id),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("{}", "No sessions found.".dimmed());
        println!();
        println!("Run 'metgpt chat' to start a conversation.");
        return Ok(());
    }

    const ID_WIDTH: usize = 10;
    const UPDATED_WIDTH: usize = 10;
    const MESSAGES_WIDTH: usize = 8;
    const AGENT_WIDTH: usize = 12;

    println!(
        "{}",
        format!(
            "{:<ID_WIDTH$}  {:<UPDATED_WIDTH$}  {:>MESSAGES_WIDTH$}  {:<AGENT_WIDTH$}  {}",
            "ID", "UPDATED", "MESSAGES", "AGENT", "TITLE"
        )
        .bold()
    );

    let now = chrono::Utc::now();
    for session in &sessions {
        let marker = if state.current_session == Some(session.id) {
            "*"
        } else {
            " "
        };
        let id_display = format!("{} {}", short_id(&session.id), marker);
        println!(
            "{:<ID_WIDTH$}  {:<UPDATED_WIDTH$}  {:>MESSAGES_WIDTH$}  {:<AGENT_WIDTH$}  {}",
            id_display.cyan(),
            format_relative(session.updated_at, now).dimmed(),
            session.messages.len(),
            session.agent_id.to_string().yellow(),
            truncate_title(&session.title, 60)
        );
    }

    if state.sessions.len() > sessions.len() {
        println!();
        println!(
            "{}",
            format!("{} more; use --limit to see them.", state.sessions.len() - sessions.len())
                .dimmed()
        );
    }

    Ok(())
}

/// Shortens a title to at most `max_chars` characters.
fn truncate_title(title: &str, max_chars: usize) -> String {
    if title.chars().count() <= max_chars {
        title.to_string()
    } else {
        let cut: String = title.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
