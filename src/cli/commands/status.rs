//! Status command - show the signed-in profile, settings and recent sessions.

use anyhow::Result;
use colored::Colorize;

use crate::app::App;
use crate::cli::format::{format_relative, short_id};
use crate::config::Config;
use crate::storage::db::default_db_path;
use crate::storage::models::SubscriptionTier;

/// Arguments for the status command.
#[derive(clap::Args)]
pub struct Args {}

/// Executes the status command.
pub fn run(_args: Args) -> Result<()> {
    let config = Config::load()?;
    let app = App::open(&config)?;
    let state = &app.state;

    println!("{}", "MetGPT".bold().cyan());
    println!("{}", "Your empathetic and intelligent AI companion".dimmed());
    println!();

    println!("{}", "Account:".bold());
    match &state.user {
        Some(user) => {
            println!("  {} <{}> via {}", user.name, user.email.cyan(), user.provider);
            let tier = match user.tier {
                SubscriptionTier::Pro => "pro".green(),
                SubscriptionTier::Free => "free".yellow(),
            };
            println!("  Tier:      {tier}");
            if user.tier == SubscriptionTier::Free {
                println!(
                    "  Pro agent uses: {}/{}",
                    user.pro_usage_count, config.pro_usage_limit
                );
            }
        }
        None => println!("  {}", "Not logged in. Run 'metgpt login'.".yellow()),
    }

    let tier = state.user.as_ref().map(|u| u.tier).unwrap_or_default();
    println!();
    println!("{}", "Settings:".bold());
    println!("  Language:  {} ({})", state.language.name(), state.language.code());
    println!("  Model:     {}", config.chat_model(tier));
    println!("  Images:    {} at {}", config.resolved_image_model(), config.aspect_ratio);
    let key_status = if config.resolved_api_key().is_some() {
        "configured".green()
    } else {
        "missing".red()
    };
    println!("  API key:   {key_status}");
    println!("  Database:  {}", default_db_path()?.display());

    println!();
    println!("{}", "Sessions:".bold());
    println!("  Stored: {}", state.sessions.len());

    let now = chrono::Utc::now();
    for session in state.sessions.sessions().iter().take(5) {
        let current = if state.current_session == Some(session.id) {
            "*".green()
        } else {
            " ".normal()
        };
        println!(
            "  {current} {}  {:10}  {} {}",
            short_id(&session.id).cyan(),
            format_relative(session.updated_at, now).dimmed(),
            session.agent_id.info().icon,
            session.title
        );
    }

    Ok(())
}
