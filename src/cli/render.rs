//! Terminal rendering of assistant replies and image files.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use colored::Colorize;

use crate::config::metgpt_home;
use crate::storage::models::{GroundingSource, Message, MessageId, MessageImage};

/// Largest attachment accepted by `--image` and `/attach`.
const MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

/// Directory generated images are written to.
pub fn images_dir() -> Result<PathBuf> {
    Ok(metgpt_home()?.join("images"))
}

/// Reads an image file into an inline attachment.
pub fn load_attachment(path: &Path) -> Result<MessageImage> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() != mime_guess::mime::IMAGE {
        bail!("'{}' does not look like an image ({mime})", path.display());
    }
    let size = std::fs::metadata(path)
        .with_context(|| format!("Cannot read {}", path.display()))?
        .len();
    if size > MAX_ATTACHMENT_BYTES {
        bail!(
            "'{}' is {} MB; attachments are limited to {} MB",
            path.display(),
            size / (1024 * 1024),
            MAX_ATTACHMENT_BYTES / (1024 * 1024)
        );
    }
    let bytes =
        std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;
    Ok(MessageImage {
        data: STANDARD.encode(bytes),
        mime_type: mime.essence_str().to_string(),
    })
}

/// Decodes an image and writes it as `<dir>/<stem>.<ext>`.
pub fn save_image(image: &MessageImage, dir: &Path, stem: &str) -> Result<PathBuf> {
    let bytes = STANDARD
        .decode(image.data.as_bytes())
        .context("Image data is not valid base64")?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create {}", dir.display()))?;
    let path = dir.join(format!("{stem}.{}", image.extension()));
    std::fs::write(&path, bytes).with_context(|| format!("Cannot write {}", path.display()))?;
    Ok(path)
}

/// Prints a numbered list of grounding sources.
pub fn print_sources(sources: &[GroundingSource]) {
    if sources.is_empty() {
        return;
    }
    println!("{}", "Sources:".dimmed());
    for (i, source) in sources.iter().enumerate() {
        println!(
            "  {} {} {}",
            format!("[{}]", i + 1).dimmed(),
            source.title,
            source.uri.dimmed()
        );
    }
}

/// Prints cumulative message updates as a growing block of text.
///
/// Each update carries the full content so far; only the new suffix is
/// written. A content that does not extend what was printed (the image
/// placeholder being replaced) starts a fresh line.
pub struct StreamPrinter {
    message_id: Option<MessageId>,
    printed: String,
    last: Option<Message>,
    images_dir: Option<PathBuf>,
}

impl StreamPrinter {
    pub fn new(images_dir: Option<PathBuf>) -> Self {
        Self {
            message_id: None,
            printed: String::new(),
            last: None,
            images_dir,
        }
    }

    /// Renders one update.
    pub fn update(&mut self, message: &Message) {
        let delta = self.delta(message);
        print!("{delta}");
        let _ = io::stdout().flush();
        self.last = Some(message.clone());
    }

    /// Text to print for `message` given what is already on screen.
    fn delta(&mut self, message: &Message) -> String {
        if self.message_id != Some(message.id) {
            self.message_id = Some(message.id);
            self.printed = message.content.clone();
            return message.content.clone();
        }
        if let Some(rest) = message.content.strip_prefix(self.printed.as_str()) {
            let rest = rest.to_string();
            self.printed = message.content.clone();
            return rest;
        }
        self.printed = message.content.clone();
        format!("\n{}", message.content)
    }

    /// Ends the block: saves an attached image and lists sources.
    pub fn finish(&mut self) -> Result<Option<PathBuf>> {
        println!();
        let Some(message) = self.last.take() else {
            return Ok(None);
        };
        self.message_id = None;
        self.printed.clear();

        let mut saved = None;
        if let (Some(image), Some(dir)) = (&message.image, &self.images_dir) {
            let stem = message.id.to_string();
            let path = save_image(image, dir, &stem)?;
            println!("{} {}", "Image saved to".dimmed(), path.display());
            saved = Some(path);
        }
        if let Some(sources) = &message.sources {
            print_sources(sources);
        }
        Ok(saved)
    }
}
