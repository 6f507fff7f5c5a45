//! Upgrade command - move the signed-in profile to the pro tier.

use anyhow::{bail, Result};
use colored::Colorize;

use crate::app::{App, Effect, Event};
use crate::config::Config;
use crate::storage::models::{SubscriptionTier, AGENTS};

/// Arguments for the upgrade command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    metgpt upgrade             Unlock pro agents and the pro model")]
pub struct Args {}

/// Executes the upgrade command.
pub fn run(_args: Args) -> Result<()> {
    let config = Config::load()?;
    let mut app = App::open(&config)?;

    if app.state.user.as_ref().map(|u| u.tier) == Some(SubscriptionTier::Pro) {
        println!("Already on the {} tier.", "pro".green());
        return Ok(());
    }

    let effects = app.apply(Event::Upgrade)?;
    if effects.iter().any(|e| matches!(e, Effect::Rejected(_))) {
        bail!("Not logged in. Run 'metgpt login' first.");
    }

    println!("{} Upgraded to {}.", "✓".green(), "MetGPT Pro".bold());
    println!("Unlocked agents:");
    for agent in AGENTS.iter().filter(|a| a.pro_only) {
        println!("  {} {} ({})", agent.icon, agent.name, agent.id.to_string().cyan());
    }
    println!("Chat model: {}", config.chat_model(SubscriptionTier::Pro));

    Ok(())
}
