//! User-facing terminal output
//!
//! Messages for people go through here instead of the logger, so they
//! carry no timestamps, levels or module paths.

use owo_colors::OwoColorize;

use crate::events::EngineEvent;
use crate::models::FileRecord;

/// Yellow warning on stderr, padded with blank lines
pub fn warn(message: &str) {
    eprintln!("\n{}\n", message.yellow());
}

/// Red error on stderr, padded with blank lines
pub fn error(message: &str) {
    eprintln!("\n{}\n", message.red());
}

pub fn info(message: &str) {
    eprintln!("\n{}\n", message);
}

/// Human-readable byte count (1024-based)
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// One search result line: name, size, modification date, location
pub fn record_line(record: &FileRecord) -> String {
    let modified = record.modified_at.format("%Y-%m-%d %H:%M");
    if record.is_directory {
        format!(
            "{}/  {:>12}  {}  {}",
            record.name.blue().bold(),
            "-",
            modified,
            record.absolute_path.dimmed()
        )
    } else {
        format!(
            "{}  {:>12}  {}  {}",
            record.name.bold(),
            format_bytes(record.size_bytes),
            modified,
            record.absolute_path.dimmed()
        )
    }
}

/// Live watch output; `None` for events that are not worth a line
pub fn event_line(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::FileAdded { record } => Some(format!("{} {}", "+".green(), record.absolute_path)),
        EngineEvent::DirectoryAdded { record } => {
            Some(format!("{} {}/", "+".green(), record.absolute_path))
        }
        EngineEvent::FileChanged { record } => Some(format!("{} {}", "~".yellow(), record.absolute_path)),
        EngineEvent::FileRemoved { path } => Some(format!("{} {}", "-".red(), path)),
        EngineEvent::DirectoryRemoved { path } => Some(format!("{} {}/", "-".red(), path)),
        EngineEvent::WatcherReady { root } => Some(format!("Watching {}", root)),
        EngineEvent::WatchingStopped => Some("Watching stopped".to_string()),
        EngineEvent::Error { message } => Some(format!("{}", message.red())),
        EngineEvent::Progress(_) | EngineEvent::Complete { .. } => None,
    }
}
