//! Chat command - interactive conversation in the terminal.
//!
//! Plain lines are sent as prompts; lines starting with `/` are commands.
//! Ctrl-C while a reply is streaming cancels it; Ctrl-C at the prompt
//! leaves the chat. While a reply streams, `/select`, `/delete` and `/new`
//! are still accepted and reach the client immediately.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::send::{rejection, send_and_print};
use super::show::print_session_text;
use crate::app::{App, Dispatcher, Event};
use crate::cli::format::{format_relative, short_id};
use crate::cli::render::load_attachment;
use crate::cli::resolve_session;
use crate::config::Config;
use crate::service::{GeminiService, GenerationService};
use crate::storage::models::{
    AgentType, AspectRatio, LanguageCode, MessageImage, SessionId, SubscriptionTier, AGENTS,
};

/// Prompt sent when an agent is picked from the welcome screen.
const GREETING: &str = "Hello!";

/// Arguments for the chat command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    metgpt chat                    Continue the latest session\n    \
    metgpt chat --new              Start on the welcome screen\n    \
    metgpt chat --agent coder      Use the Logic Architect for new sessions\n    \
    metgpt chat --session abc123   Resume a specific session\n\n\
    Type /help inside the chat for the list of commands.")]
pub struct Args {
    /// Agent for new sessions
    #[arg(long, value_name = "AGENT")]
    pub agent: Option<AgentType>,

    /// Resume the session with this ID prefix
    #[arg(long, value_name = "ID", conflicts_with = "new")]
    pub session: Option<String>,

    /// Start without a selected session
    #[arg(long)]
    pub new: bool,
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    New,
    Sessions,
    Select(String),
    Delete(String),
    Rename(String),
    Agent(String),
    Lang(String),
    Aspect(String),
    Attach(String),
    Upgrade,
    Sidebar,
    Help,
    Quit,
    Unknown(String),
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<ReplCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(ReplCommand::Send(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim().to_string()),
        None => (rest, String::new()),
    };
    let command = match name.to_lowercase().as_str() {
        // Image prompts keep their prefix; intent detection strips it.
        "imagine" => ReplCommand::Send(line.to_string()),
        "new" => ReplCommand::New,
        "sessions" | "ls" => ReplCommand::Sessions,
        "select" | "open" => ReplCommand::Select(arg),
        "delete" | "rm" => ReplCommand::Delete(arg),
        "rename" => ReplCommand::Rename(arg),
        "agent" => ReplCommand::Agent(arg),
        "lang" => ReplCommand::Lang(arg),
        "aspect" => ReplCommand::Aspect(arg),
        "attach" => ReplCommand::Attach(arg),
        "upgrade" => ReplCommand::Upgrade,
        "sidebar" => ReplCommand::Sidebar,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        other => ReplCommand::Unknown(other.to_string()),
    };
    Some(command)
}

/// Executes the chat command.
pub fn run(args: Args) -> Result<()> {
    let config = Config::load()?;
    let mut app = App::open(&config)?;
    let service = GeminiService::from_config(&config)?;

    if app.state.user.is_none() {
        anyhow::bail!("Not logged in. Run 'metgpt login --email <EMAIL> --name <NAME>' first.");
    }
    if let Some(prefix) = &args.session {
        let id = resolve_session(&app.state, prefix)?;
        app.apply(Event::SelectSession(id))?;
    } else if args.new {
        app.apply(Event::NewChat)?;
    }
    if let Some(agent) = args.agent {
        if let Some(reason) = rejection(&app.apply(Event::SelectAgent(agent))?) {
            println!("{} {reason}", "Agent not selected:".yellow());
        }
    }
    app.apply(Event::SetAspectRatio(config.aspect_ratio))?;

    let runtime = tokio::runtime::Runtime::new()?;
    let (events, event_rx) = mpsc::unbounded_channel();
    let mut dispatcher = Dispatcher::new(service)
        .with_ctrl_c()
        .with_events(event_rx);
    let result = runtime.block_on(repl(&mut dispatcher, &mut app, events));
    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_background();
    result
}

/// Reads stdin on its own task so input keeps arriving during a reply.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn repl<S: GenerationService>(
    dispatcher: &mut Dispatcher<S>,
    app: &mut App,
    events: mpsc::UnboundedSender<Event>,
) -> Result<()> {
    print_banner(app);
    let mut lines = spawn_stdin_reader();
    let mut attachment: Option<MessageImage> = None;

    loop {
        print_prompt(app, attachment.is_some()).await?;
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else { break };
        let Some(command) = parse_line(&line) else {
            continue;
        };

        match command {
            ReplCommand::Send(text) => {
                let image = attachment.take();
                if let Err(e) = reply(dispatcher, app, &text, image, &mut lines, &events).await {
                    println!("{} {e:#}", "Error:".red());
                }
            }
            ReplCommand::Quit => break,
            ReplCommand::Attach(path) => match load_attachment(&PathBuf::from(&path)) {
                Ok(image) => {
                    println!(
                        "{} {} ({} KB), sent with your next message",
                        "Attached".green(),
                        path,
                        image.decoded_len() / 1024
                    );
                    attachment = Some(image);
                }
                Err(e) => println!("{} {e:#}", "Error:".red()),
            },
            ReplCommand::Agent(name) => {
                let greet = match select_agent(app, &name) {
                    Ok(greet) => greet,
                    Err(e) => {
                        println!("{} {e:#}", "Error:".red());
                        false
                    }
                };
                if greet {
                    let sent = reply(dispatcher, app, GREETING, None, &mut lines, &events).await;
                    if let Err(e) = sent {
                        println!("{} {e:#}", "Error:".red());
                    }
                }
            }
            other => {
                if let Err(e) = handle_command(app, other) {
                    println!("{} {e:#}", "Error:".red());
                }
            }
        }

        if app.state.upgrade_prompt_open {
            print_upgrade_prompt();
            app.apply(Event::CloseUpgradePrompt)?;
        }
    }

    println!("{}", "Bye.".dimmed());
    Ok(())
}

/// Sends a prompt and keeps reading input until the reply is done.
async fn reply<S: GenerationService>(
    dispatcher: &mut Dispatcher<S>,
    app: &mut App,
    text: &str,
    image: Option<MessageImage>,
    lines: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<Event>,
) -> Result<()> {
    let sessions: Vec<SessionId> = app.state.sessions.sessions().iter().map(|s| s.id).collect();
    let send = send_and_print(dispatcher, app, text, image);
    tokio::pin!(send);

    loop {
        tokio::select! {
            result = &mut send => return result,
            Some(line) = lines.recv() => {
                if line.trim().is_empty() {
                    continue;
                }
                match event_for_line(&line, &sessions) {
                    Some(event) => {
                        println!("\n{}", format!("{} (applied)", line.trim()).dimmed());
                        let _ = events.send(event);
                    }
                    None => println!(
                        "\n{}",
                        "Still replying. Use /select, /delete or /new, or Ctrl-C to stop.".dimmed()
                    ),
                }
            }
        }
    }
}

/// The event for a line typed while a reply streams. Only session
/// switches are accepted; prefixes must match exactly one of `sessions`.
pub fn event_for_line(line: &str, sessions: &[SessionId]) -> Option<Event> {
    let unique = |prefix: &str| {
        let mut matches = sessions
            .iter()
            .filter(|id| id.to_string().starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Some(*id),
            _ => None,
        }
    };
    match parse_line(line)? {
        ReplCommand::New => Some(Event::NewChat),
        ReplCommand::Select(prefix) => unique(&prefix).map(Event::SelectSession),
        ReplCommand::Delete(prefix) => unique(&prefix).map(Event::DeleteSession),
        _ => None,
    }
}

/// Applies a command that does not talk to the model.
fn handle_command(app: &mut App, command: ReplCommand) -> Result<()> {
    match command {
        ReplCommand::New => {
            app.apply(Event::NewChat)?;
            print_welcome();
        }
        ReplCommand::Sessions => print_sessions(app),
        ReplCommand::Select(prefix) => {
            let id = resolve_session(&app.state, &prefix)?;
            app.apply(Event::SelectSession(id))?;
            if let Some(session) = app.state.current() {
                print_session_text(session, false);
            }
        }
        ReplCommand::Delete(prefix) => {
            let id = resolve_session(&app.state, &prefix)?;
            app.apply(Event::DeleteSession(id))?;
            println!("{} session {}", "Deleted".green(), short_id(&id).cyan());
        }
        ReplCommand::Rename(title) => {
            let title = title.trim();
            if title.is_empty() {
                anyhow::bail!("Usage: /rename <title>");
            }
            let id = app
                .state
                .current_session
                .ok_or_else(|| anyhow!("No session selected"))?;
            app.apply(Event::RenameSession {
                id,
                title: title.to_string(),
            })?;
            println!("Renamed to {}", title.bold());
        }
        ReplCommand::Lang(code) => {
            let language: LanguageCode = code.parse().map_err(|e: String| anyhow!(e))?;
            app.apply(Event::SetLanguage(language))?;
            println!("Replies will be in {}.", language.name().bold());
        }
        ReplCommand::Aspect(ratio) => {
            let ratio: AspectRatio = ratio.parse().map_err(|e: String| anyhow!(e))?;
            app.apply(Event::SetAspectRatio(ratio))?;
            println!("Images will be {}.", ratio.to_string().bold());
        }
        ReplCommand::Upgrade => {
            app.apply(Event::Upgrade)?;
            println!("{} Upgraded to {}.", "✓".green(), "MetGPT Pro".bold());
        }
        ReplCommand::Sidebar => {
            app.apply(Event::ToggleSidebar)?;
            if app.state.sidebar_open {
                print_sessions(app);
            } else {
                println!("{}", "Session list hidden.".dimmed());
            }
        }
        ReplCommand::Help => print_help(),
        ReplCommand::Unknown(name) => {
            anyhow::bail!("Unknown command '/{name}'. Type /help for the list.")
        }
        ReplCommand::Send(_)
        | ReplCommand::Agent(_)
        | ReplCommand::Attach(_)
        | ReplCommand::Quit => {}
    }
    Ok(())
}

/// Selects an agent. Returns whether the greeting should be sent, which
/// is the case on the welcome screen.
fn select_agent(app: &mut App, name: &str) -> Result<bool> {
    if name.is_empty() {
        print_agents(app);
        return Ok(false);
    }
    let agent: AgentType = name.parse().map_err(|e: String| anyhow!(e))?;
    let effects = app.apply(Event::SelectAgent(agent))?;
    if let Some(reason) = rejection(&effects) {
        anyhow::bail!("{reason}");
    }
    let info = agent.info();
    println!("{} {} selected", info.icon, info.name.bold());
    if app.state.current_session.is_some() {
        let hint = "It applies to new sessions. Type /new to start one.";
        println!("{}", hint.dimmed());
        return Ok(false);
    }
    Ok(true)
}

async fn print_prompt(app: &App, has_attachment: bool) -> Result<()> {
    let title = app
        .state
        .current()
        .map(|s| s.title.clone())
        .unwrap_or_else(|| "new chat".to_string());
    let clip = if has_attachment { " 📎" } else { "" };
    let prompt = format!("{}{} {} ", title.dimmed(), clip, ">".cyan().bold());
    let mut stdout = tokio::io::stdout();
    stdout.write_all(prompt.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

fn print_banner(app: &App) {
    println!("{}", "MetGPT".bold().cyan());
    if let Some(user) = &app.state.user {
        let tier = match user.tier {
            SubscriptionTier::Pro => "pro".green(),
            SubscriptionTier::Free => "free".yellow(),
        };
        println!("{} {} ({tier})", "Signed in as".dimmed(), user.name);
    }
    if app.state.sidebar_open && !app.state.sessions.is_empty() {
        println!();
        print_sessions(app);
    }
    match app.state.current() {
        Some(session) => print_session_text(session, false),
        None => print_welcome(),
    }
}

fn print_welcome() {
    println!();
    println!("{}", "Welcome to MetGPT".bold());
    println!(
        "{}",
        "Your empathetic and intelligent AI companion powered by Gemini.".dimmed()
    );
    println!();
    for agent in AGENTS.iter() {
        let badge = if agent.pro_only { " PRO".yellow() } else { "".normal() };
        println!(
            "  {} {:18} {}{badge}  {}",
            agent.icon,
            agent.name.bold(),
            agent.id.to_string().cyan(),
            agent.description.dimmed()
        );
    }
    println!();
    println!("{}", "Type a message, or /agent <name> to start with an agent.".dimmed());
}

fn print_agents(app: &App) {
    for agent in AGENTS.iter() {
        let marker = if agent.id == app.state.selected_agent { "*" } else { " " };
        println!("{} {} {} ({})", marker.green(), agent.icon, agent.name, agent.id);
    }
}

fn print_sessions(app: &App) {
    if app.state.sessions.is_empty() {
        println!("{}", "No sessions yet.".dimmed());
        return;
    }
    let now = chrono::Utc::now();
    for session in app.state.sessions.sessions() {
        let marker = if app.state.current_session == Some(session.id) { "*" } else { " " };
        println!(
            "{} {}  {:8}  {} {}",
            marker.green(),
            short_id(&session.id).cyan(),
            format_relative(session.updated_at, now).dimmed(),
            session.agent_id.info().icon,
            session.title
        );
    }
}

fn print_upgrade_prompt() {
    println!();
    println!("{}", "Upgrade to MetGPT Pro".bold().yellow());
    println!("  Unlimited access to the Researcher, Designer, Coder and Analyst agents");
    println!("  and the pro chat model. Type /upgrade to unlock.");
    println!();
}

fn print_help() {
    let rows = [
        ("<text>", "Send a message"),
        ("/imagine <prompt>", "Generate an image"),
        ("/new", "Start a new chat"),
        ("/sessions", "List sessions"),
        ("/select <id>", "Switch to a session"),
        ("/delete <id>", "Delete a session"),
        ("/rename <title>", "Rename the current session"),
        ("/agent [name]", "Pick an agent (list when no name)"),
        ("/lang <code>", "Reply language"),
        ("/aspect <ratio>", "Image aspect ratio: 1:1 3:4 4:3 9:16 16:9"),
        ("/attach <path>", "Attach an image to the next message"),
        ("/upgrade", "Switch to the pro tier"),
        ("/sidebar", "Show or hide the session list"),
        ("/quit", "Leave"),
    ];
    for (usage, what) in rows {
        println!("  {:20} {}", usage.cyan(), what);
    }
    println!("  {}", "Ctrl-C stops a reply that is still streaming.".dimmed());
}
