//! Login command - sign in with a local profile.
//!
//! There is no identity provider behind this: the profile is stored as
//! given and starts on the free tier.

use anyhow::Result;
use colored::Colorize;

use crate::app::{App, Event};
use crate::config::Config;
use crate::storage::models::{AuthProvider, User};

/// Arguments for the login command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    metgpt login --email ada@example.com --name Ada\n    \
    metgpt login --email ada@gmail.com --name Ada --provider google")]
pub struct Args {
    /// Email address of the profile
    #[arg(long)]
    pub email: String,

    /// Display name
    #[arg(long)]
    pub name: String,

    /// Sign-in method: email (default) or google
    #[arg(long, default_value = "email")]
    pub provider: AuthProvider,

    /// Avatar URL
    #[arg(long, value_name = "URL")]
    pub picture: Option<String>,
}

/// Executes the login command.
pub fn run(args: Args) -> Result<()> {
    let email = args.email.trim();
    if !email.contains('@') {
        anyhow::bail!("'{email}' is not an email address");
    }

    let config = Config::load()?;
    let mut app = App::open(&config)?;

    if let Some(user) = &app.state.user {
        if user.email == email {
            println!("Already logged in as {} ({} tier)", user.email.cyan(), user.tier);
            return Ok(());
        }
        println!("{} {}", "Replacing profile".dimmed(), user.email);
    }

    let mut user = User::new(email, args.name.trim(), args.provider);
    user.picture = args.picture;
    app.apply(Event::Login(user))?;

    println!("Logged in as {} via {}", email.cyan(), args.provider);
    if config.resolved_api_key().is_none() {
        println!();
        println!(
            "{}",
            "No Gemini API key configured. Run 'metgpt config set api_key <KEY>'.".yellow()
        );
    }

    Ok(())
}
