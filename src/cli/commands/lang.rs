//! Lang command - show or set the language replies are written in.

use anyhow::{anyhow, Result};
use colored::Colorize;

use crate::app::{App, Event};
use crate::config::Config;
use crate::storage::models::LanguageCode;

/// Arguments for the lang command.
#[derive(clap::Args)]
#[command(after_help = "EXAMPLES:\n    \
    metgpt lang                Show the current language and the choices\n    \
    metgpt lang ur             Reply in Urdu\n    \
    metgpt lang spanish        Language names work too")]
pub struct Args {
    /// Language code or English name
    #[arg(value_name = "LANG")]
    pub language: Option<String>,
}

/// Executes the lang command.
pub fn run(args: Args) -> Result<()> {
    let config = Config::load()?;
    let mut app = App::open(&config)?;

    let Some(requested) = args.language else {
        let current = app.state.language;
        for lang in LanguageCode::ALL {
            let marker = if lang == current { "*".green() } else { " ".normal() };
            println!("{marker} {}  {}", lang.code().cyan(), lang.name());
        }
        return Ok(());
    };

    let language: LanguageCode = requested.parse().map_err(|e: String| anyhow!(e))?;
    app.apply(Event::SetLanguage(language))?;
    println!("Replies will be in {} ({}).", language.name().bold(), language.code());
    Ok(())
}
