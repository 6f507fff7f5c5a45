use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metgpt_cli::cli::commands;
use metgpt_cli::config::metgpt_home;

/// The main CLI command line interface.
#[derive(Parser)]
#[command(name = "metgpt")]
#[command(version)]
#[command(about = "Chat with Gemini from your terminal")]
#[command(long_about = "MetGPT is a terminal chat client for Google's Gemini models.\n\n\
    Replies stream in as they are generated, image prompts produce\n\
    pictures, and every conversation is kept as a session you can\n\
    resume, rename, export or delete.")]
#[command(after_help = "EXAMPLES:\n    \
    metgpt login --email me@example.com --name Me   Sign in\n    \
    metgpt chat                                     Start chatting\n    \
    metgpt send \"Summarize RFC 9110\"                One-shot prompt\n    \
    metgpt sessions                                 List sessions\n    \
    metgpt show abc123                              View a session\n\n\
    For more information about a command, run 'metgpt <command> --help'.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Interactive chat in the terminal
    #[command(long_about = "Opens an interactive chat. Plain lines are sent to the model,\n\
        lines starting with '/' are commands (type /help for the list).\n\
        Ctrl-C stops a reply that is still streaming.")]
    Chat(commands::chat::Args),

    /// Send one prompt and print the reply
    #[command(long_about = "Sends a single prompt to the current session (or a new one)\n\
        and streams the reply to stdout. Prompts asking for a picture\n\
        generate an image, which is saved under ~/.metgpt/images.")]
    Send(commands::send::Args),

    /// List chat sessions
    Sessions(commands::sessions::Args),

    /// Show a session's conversation
    #[command(long_about = "Displays the full conversation of a session.\n\
        \n\
        Supports multiple output formats:\n\
        - text: colored terminal output (default)\n\
        - json: the stored session record\n\
        - markdown: formatted for notes")]
    Show(commands::show::Args),

    /// Delete a session
    Delete(commands::delete::Args),

    /// Sign in
    Login(commands::login::Args),

    /// Sign out
    Logout(commands::logout::Args),

    /// Switch to MetGPT Pro
    Upgrade(commands::upgrade::Args),

    /// Show account, settings and recent sessions
    Status(commands::status::Args),

    /// Show or set the reply language
    Lang(commands::lang::Args),

    /// View and manage configuration settings
    #[command(long_about = "Provides subcommands to show, get, and set configuration values.\n\
        Configuration is stored in ~/.metgpt/config.yaml.")]
    Config(commands::config::Args),

    /// Generate shell completion scripts
    Completions(commands::completions::Args),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "metgpt_cli=debug"
    } else {
        "metgpt_cli=info"
    };

    // The chat screen is interactive, so its logs go to a file instead.
    let (file_layer, _guard) = if matches!(cli.command, Commands::Chat(_)) {
        let dir = metgpt_home()?;
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::never(dir, "metgpt.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };
    let stderr_layer = file_layer.is_none().then(|| {
        tracing_subscriber::fmt::layer()
            .without_time()
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(file_layer)
        .with(stderr_layer)
        .init();

    match cli.command {
        Commands::Chat(args) => commands::chat::run(args),
        Commands::Send(args) => commands::send::run(args),
        Commands::Sessions(args) => commands::sessions::run(args),
        Commands::Show(args) => commands::show::run(args),
        Commands::Delete(args) => commands::delete::run(args),
        Commands::Login(args) => commands::login::run(args),
        Commands::Logout(args) => commands::logout::run(args),
        Commands::Upgrade(args) => commands::upgrade::run(args),
        Commands::Status(args) => commands::status::run(args),
        Commands::Lang(args) => commands::lang::run(args),
        Commands::Config(args) => commands::config::run(args),
        Commands::Completions(args) => {
            commands::completions::generate_completions(&mut Cli::command(), args.shell);
            Ok(())
        }
    }
}
