use std::path::PathBuf;

use crate::error::{AppError, Result};

pub const HELP_TEXT: &str = "/clear  /export [path]  /import <path>  /server <url>  /temp <value>  \
/stream on|off  /history  /resume <id>  /cancel  /info  /help";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Clear,
    Export(Option<PathBuf>),
    Import(PathBuf),
    Server(String),
    Temperature(f64),
    Streaming(bool),
    History,
    Resume(String),
    Cancel,
    Info,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Message(String),
    Command(Command),
}

/// Anything starting with `/` is a command; `//` escapes a literal slash.
pub fn parse_input(input: &str) -> Result<Input> {
    let trimmed = input.trim();
    if let Some(escaped) = trimmed.strip_prefix("//") {
        return Ok(Input::Message(format!("/{}", escaped)));
    }
    let Some(command_line) = trimmed.strip_prefix('/') else {
        return Ok(Input::Message(input.to_string()));
    };

    let (name, argument) = match command_line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command_line, ""),
    };

    let command = match (name.to_ascii_lowercase().as_str(), argument) {
        ("clear", _) => Command::Clear,
        ("export", "") => Command::Export(None),
        ("export", path) => Command::Export(Some(PathBuf::from(path))),
        ("import", "") => return Err(usage("/import <path>")),
        ("import", path) => Command::Import(PathBuf::from(path)),
        ("server", "") => return Err(usage("/server <url>")),
        ("server", url) => Command::Server(url.to_string()),
        ("temp" | "temperature", raw) => Command::Temperature(
            raw.parse()
                .map_err(|_| AppError::Command(format!("Not a number: '{}'", raw)))?,
        ),
        ("stream", "on" | "true" | "yes") => Command::Streaming(true),
        ("stream", "off" | "false" | "no") => Command::Streaming(false),
        ("stream", _) => return Err(usage("/stream on|off")),
        ("history", _) => Command::History,
        ("resume", "") => return Err(usage("/resume <conversation id>")),
        ("resume", id) => Command::Resume(id.to_string()),
        ("cancel", _) => Command::Cancel,
        ("info", _) => Command::Info,
        ("help" | "?", _) => Command::Help,
        (other, _) => return Err(AppError::Command(format!("Unknown command '/{}'. {}", other, HELP_TEXT))),
    };
    Ok(Input::Command(command))
}

fn usage(text: &str) -> AppError {
    AppError::Command(format!("Usage: {}", text))
}
