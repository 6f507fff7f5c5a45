//! Send command - submit one prompt and stream the reply.

use std::path::PathBuf;

use anyhow::{bail, Result};
use colored::Colorize;

use crate::app::{App, Dispatcher, Effect, Event, RejectReason, SendOutcome};
use crate::cli::render::{images_dir, load_attachment, StreamPrinter};
use crate::cli::resolve_session;
use crate::config::Config;
use crate::service::{GeminiService, GenerationService};
use crate::storage::models::{AgentType, AspectRatio, MessageImage};

/// Arguments for the send command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    metgpt send \"Explain ownership in Rust\"\n    \
    metgpt send --new --agent coder \"Write a CSV parser\"\n    \
    metgpt send --image chart.png \"What does this show?\"\n    \
    metgpt send --aspect 16:9 \"Generate an image of a neon city\"\n    \
    metgpt send --session abc123 \"And in Go?\"")]
pub struct Args {
    /// Prompt text
    #[arg(value_name = "TEXT")]
    pub text: String,

    /// Attach an image file
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,

    /// Continue the session with this ID prefix
    #[arg(long, value_name = "ID", conflicts_with = "new")]
    pub session: Option<String>,

    /// Start a new session instead of continuing the latest one
    #[arg(long)]
    pub new: bool,

    /// Agent for a new session: core, researcher, designer, coder, analyst
    #[arg(long, value_name = "AGENT")]
    pub agent: Option<AgentType>,

    /// Aspect ratio for generated images
    #[arg(long, value_name = "RATIO")]
    pub aspect: Option<AspectRatio>,
}

/// Executes the send command.
pub fn run(args: Args) -> Result<()> {
    let config = Config::load()?;
    let mut app = App::open(&config)?;
    let service = GeminiService::from_config(&config)?;

    if let Some(prefix) = &args.session {
        let id = resolve_session(&app.state, prefix)?;
        app.apply(Event::SelectSession(id))?;
    } else if args.new {
        app.apply(Event::NewChat)?;
    }
    if let Some(agent) = args.agent {
        let effects = app.apply(Event::SelectAgent(agent))?;
        if let Some(reason) = rejection(&effects) {
            bail!("Cannot use the {} agent: {reason}", agent.info().name);
        }
    }
    app.apply(Event::SetAspectRatio(args.aspect.unwrap_or(config.aspect_ratio)))?;

    let image = args.image.as_deref().map(load_attachment).transpose()?;

    let runtime = tokio::runtime::Runtime::new()?;
    let mut dispatcher = Dispatcher::new(service).with_ctrl_c();
    runtime.block_on(send_and_print(&mut dispatcher, &mut app, &args.text, image))
}

/// Sends one prompt, printing the reply as it arrives.
pub async fn send_and_print<S: GenerationService>(
    dispatcher: &mut Dispatcher<S>,
    app: &mut App,
    text: &str,
    image: Option<MessageImage>,
) -> Result<()> {
    let mut printer = StreamPrinter::new(Some(images_dir()?));
    let outcome = dispatcher
        .send(app, text, image, |message| printer.update(message))
        .await?;

    match outcome {
        SendOutcome::Completed { .. } => {
            printer.finish()?;
            Ok(())
        }
        SendOutcome::Cancelled { .. } => {
            printer.finish()?;
            println!("{}", "Cancelled.".dimmed());
            Ok(())
        }
        SendOutcome::Failed { error, .. } => {
            printer.finish()?;
            bail!("Generation failed: {error}")
        }
        SendOutcome::Rejected(RejectReason::ProLimitReached) => bail!(
            "Free allowance for pro agents used up. Run 'metgpt upgrade' to unlock them."
        ),
        SendOutcome::Rejected(reason) => bail!("Prompt not sent: {reason}"),
    }
}

/// The rejection carried by a set of effects, if any.
pub fn rejection(effects: &[Effect]) -> Option<RejectReason> {
    effects.iter().find_map(|e| match e {
        Effect::Rejected(reason) => Some(*reason),
        _ => None,
    })
}
