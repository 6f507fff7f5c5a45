//! Show command - display one session's conversation.
//!
//! Supports multiple output formats:
//! - Text: colored terminal output (default)
//! - JSON: the stored session record
//! - Markdown: formatted for notes or issue trackers

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;

use crate::app::App;
use crate::cli::format::format_timestamp;
use crate::cli::render::{print_sources, save_image};
use crate::cli::{resolve_session, OutputFormat};
use crate::config::Config;
use crate::storage::models::{Message, Role, Session};

/// Messages longer than this are cut unless `--full` is given.
const PREVIEW_CHARS: usize = 500;

/// Arguments for the show command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    metgpt show abc123                      View session by ID prefix\n    \
    metgpt show abc123 --full               Show full message content\n    \
    metgpt show abc123 -f markdown          Output as markdown\n    \
    metgpt show abc123 --export-images out  Write attached and generated images")]
pub struct Args {
    /// Session ID prefix
    #[arg(value_name = "ID")]
    pub session: String,

    /// Show full message content without truncation
    #[arg(long)]
    pub full: bool,

    /// Output format: text (default), json, or markdown
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Write every image in the session to this directory
    #[arg(long, value_name = "DIR")]
    pub export_images: Option<PathBuf>,
}

/// Executes the show command.
pub fn run(args: Args) -> Result<()> {
    let config = Config::load()?;
    let app = App::open(&config)?;
    let id = resolve_session(&app.state, &args.session)?;
    let Some(session) = app.state.sessions.get(&id) else {
        anyhow::bail!("Session {id} disappeared while reading");
    };

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(session)?),
        OutputFormat::Markdown => print_session_markdown(session),
        OutputFormat::Text => print_session_text(session, args.full),
    }

    if let Some(dir) = &args.export_images {
        let mut written = 0;
        for (index, message) in session.messages.iter().enumerate() {
            if let Some(image) = &message.image {
                let stem = format!("{:03}-{}", index + 1, message.role);
                let path = save_image(image, dir, &stem)?;
                eprintln!("{} {}", "Wrote".green(), path.display());
                written += 1;
            }
        }
        if written == 0 {
            eprintln!("{}", "No images in this session.".dimmed());
        }
    }

    Ok(())
}

/// Prints a session header and its conversation with colors.
pub fn print_session_text(session: &Session, full: bool) {
    let agent = session.agent_id.info();
    println!("{} {}", "Session".bold(), session.id.to_string().cyan());
    println!();
    println!("  {}  {}", "Title:".dimmed(), session.title);
    println!("  {}  {} {}", "Agent:".dimmed(), agent.icon, agent.name);
    println!("  {}  {}", "Updated:".dimmed(), format_timestamp(session.updated_at));
    println!("  {}  {}", "Messages:".dimmed(), session.messages.len());
    println!();

    for message in &session.messages {
        print_message_text(message, full);
        println!();
    }
}

/// Prints one message with a role header.
pub fn print_message_text(message: &Message, full: bool) {
    let role = match message.role {
        Role::User => "You".green().bold(),
        Role::Assistant => "MetGPT".blue().bold(),
    };
    let time = format_timestamp(message.timestamp);
    println!("[{} {}]", role, time.dimmed());

    let content = if full || message.content.chars().count() <= PREVIEW_CHARS {
        message.content.clone()
    } else {
        let cut: String = message.content.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    };
    if !content.is_empty() {
        println!("{content}");
    }
    if let Some(image) = &message.image {
        println!(
            "{}",
            format!("[image: {}, {} KB]", image.mime_type, image.decoded_len() / 1024).magenta()
        );
    }
    if let Some(sources) = &message.sources {
        print_sources(sources);
    }
}

/// Prints a session as markdown.
fn print_session_markdown(session: &Session) {
    let agent = session.agent_id.info();
    println!("# {}", session.title);
    println!();
    println!("| Property | Value |");
    println!("|----------|-------|");
    println!("| Session | `{}` |", session.id);
    println!("| Agent | {} {} |", agent.icon, agent.name);
    println!("| Updated | {} |", format_timestamp(session.updated_at));
    println!("| Messages | {} |", session.messages.len());
    println!();

    for message in &session.messages {
        let role = match message.role {
            Role::User => "You",
            Role::Assistant => "MetGPT",
        };
        println!("### {role} ({})", format_timestamp(message.timestamp));
        println!();
        if !message.content.is_empty() {
            println!("{}", message.content);
            println!();
        }
        if let Some(image) = &message.image {
            println!("_[{} image]_", image.mime_type);
            println!();
        }
        if let Some(sources) = message.sources.as_deref().filter(|s| !s.is_empty()) {
            println!("**Sources:**");
            for source in sources {
                println!("- [{}]({})", source.title, source.uri);
            }
            println!();
        }
    }
}
