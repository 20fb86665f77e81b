//! Parsing of root-level command lines.
//!
//! A line is a command name followed by parameters, either positional
//! (`saveconfig /tmp/x.json`) or keyword (`saveconfig savefile=/tmp/x.json`).
//! Values may be single- or double-quoted.

use std::collections::HashMap;
use thiserror::Error;

use crate::sessions::{parse_sid, InspectError, SessionAction};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command}: unknown parameter '{param}'")]
    UnknownParameter { command: &'static str, param: String },

    #[error("{command}: parameter '{param}' given more than once")]
    DuplicateParameter { command: &'static str, param: String },

    #[error("{command}: takes at most {max} parameters")]
    TooManyArguments { command: &'static str, max: usize },

    #[error("{param} must be a boolean, '{value}' given")]
    InvalidBool { param: &'static str, value: String },

    #[error("{param} must be a number, '{value}' given")]
    InvalidNumber { param: &'static str, value: String },

    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error(transparent)]
    Inspect(#[from] InspectError),
}

/// A validated root command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootCommand {
    SaveConfig { savefile: Option<String> },
    RestoreConfig { savefile: Option<String>, clear_existing: bool },
    ClearConfig { confirm: bool },
    Version,
    Sessions { action: SessionAction, sid: Option<i64> },
    Refresh,
    Status,
    Ls { path: Option<String>, depth: Option<usize> },
    Help,
    Exit,
}

/// Name, parameter names, and one-line description of every root command.
pub const COMMANDS: &[(&str, &[&str], &str)] = &[
    ("saveconfig", &["savefile"], "Save the current configuration to a file."),
    ("restoreconfig", &["savefile", "clear_existing"], "Restore configuration from a file."),
    ("clearconfig", &["confirm"], "Remove the entire configuration of backstores and targets."),
    ("version", &[], "Display the version of this tool."),
    ("sessions", &["action", "sid"], "Display open sessions (action=list|details)."),
    ("refresh", &[], "Rebuild the configuration tree from the live state."),
    ("status", &[], "Display a summary of the root node."),
    ("ls", &["path", "depth"], "Display the configuration tree."),
    ("help", &[], "List the available commands."),
    ("exit", &[], "Leave the shell."),
];

/// Split a line into words, honouring single and double quotes.
fn tokenize(line: &str) -> Result<Vec<String>, CommandError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err(CommandError::UnterminatedQuote);
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Bind positional and keyword arguments to the command's parameter names.
fn bind(
    command: &'static str,
    names: &[&'static str],
    args: &[String],
) -> Result<HashMap<&'static str, String>, CommandError> {
    let mut bound = HashMap::new();
    let mut position = 0;

    for arg in args {
        let (name, value) = match arg.split_once('=') {
            Some((key, value)) => {
                let name = names
                    .iter()
                    .copied()
                    .find(|n| *n == key)
                    .ok_or_else(|| CommandError::UnknownParameter {
                        command,
                        param: key.to_string(),
                    })?;
                (name, value.to_string())
            }
            None => {
                let name = *names.get(position).ok_or(CommandError::TooManyArguments {
                    command,
                    max: names.len(),
                })?;
                position += 1;
                (name, arg.clone())
            }
        };

        if bound.insert(name, value).is_some() {
            return Err(CommandError::DuplicateParameter {
                command,
                param: name.to_string(),
            });
        }
    }

    Ok(bound)
}

/// Interpret a boolean parameter value.
pub fn parse_bool(param: &'static str, value: &str) -> Result<bool, CommandError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(CommandError::InvalidBool {
            param,
            value: value.to_string(),
        }),
    }
}

fn bool_param(
    bound: &mut HashMap<&'static str, String>,
    param: &'static str,
) -> Result<bool, CommandError> {
    match bound.remove(param) {
        Some(value) => parse_bool(param, &value),
        None => Ok(false),
    }
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<RootCommand>, CommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let words = tokenize(trimmed)?;
    let Some((name, args)) = words.split_first() else {
        return Ok(None);
    };

    let &(command, params, _) = COMMANDS
        .iter()
        .find(|(n, _, _)| *n == name.as_str())
        .ok_or_else(|| CommandError::UnknownCommand(name.clone()))?;
    let mut bound = bind(command, params, args)?;

    let parsed = match command {
        "saveconfig" => RootCommand::SaveConfig {
            savefile: bound.remove("savefile"),
        },
        "restoreconfig" => RootCommand::RestoreConfig {
            savefile: bound.remove("savefile"),
            clear_existing: bool_param(&mut bound, "clear_existing")?,
        },
        "clearconfig" => RootCommand::ClearConfig {
            confirm: bool_param(&mut bound, "confirm")?,
        },
        "version" => RootCommand::Version,
        "sessions" => {
            let action = match bound.remove("action") {
                Some(raw) => raw.parse()?,
                None => SessionAction::List,
            };
            let sid = bound.remove("sid").map(|raw| parse_sid(&raw)).transpose()?;
            RootCommand::Sessions { action, sid }
        }
        "refresh" => RootCommand::Refresh,
        "status" => RootCommand::Status,
        "ls" => {
            let depth = bound
                .remove("depth")
                .map(|raw| {
                    raw.parse::<usize>().map_err(|_| CommandError::InvalidNumber {
                        param: "depth",
                        value: raw.clone(),
                    })
                })
                .transpose()?;
            RootCommand::Ls {
                path: bound.remove("path"),
                depth,
            }
        }
        "help" => RootCommand::Help,
        "exit" => RootCommand::Exit,
        other => return Err(CommandError::UnknownCommand(other.to_string())),
    };

    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("# saveconfig").unwrap(), None);
    }

    #[test]
    fn keyword_and_positional_parameters() {
        assert_eq!(
            parse_line("saveconfig savefile=/tmp/a.json").unwrap(),
            Some(RootCommand::SaveConfig {
                savefile: Some("/tmp/a.json".into())
            })
        );
        assert_eq!(
            parse_line("restoreconfig /tmp/a.json true").unwrap(),
            Some(RootCommand::RestoreConfig {
                savefile: Some("/tmp/a.json".into()),
                clear_existing: true,
            })
        );
        assert_eq!(
            parse_line("restoreconfig clear_existing=yes").unwrap(),
            Some(RootCommand::RestoreConfig {
                savefile: None,
                clear_existing: true,
            })
        );
    }

    #[test]
    fn defaults_apply() {
        assert_eq!(
            parse_line("clearconfig").unwrap(),
            Some(RootCommand::ClearConfig { confirm: false })
        );
        assert_eq!(
            parse_line("sessions").unwrap(),
            Some(RootCommand::Sessions {
                action: SessionAction::List,
                sid: None,
            })
        );
    }

    #[test]
    fn quoted_values_keep_spaces() {
        assert_eq!(
            parse_line("saveconfig savefile=\"/tmp/my config.json\"").unwrap(),
            Some(RootCommand::SaveConfig {
                savefile: Some("/tmp/my config.json".into())
            })
        );
        assert_eq!(
            parse_line("saveconfig 'a b"),
            Err(CommandError::UnterminatedQuote)
        );
    }

    #[test]
    fn sessions_validation() {
        assert_eq!(
            parse_line("sessions details 2").unwrap(),
            Some(RootCommand::Sessions {
                action: SessionAction::Details,
                sid: Some(2),
            })
        );
        let err = parse_line("sessions action=bogus").unwrap_err();
        assert_eq!(err.to_string(), "action must be one of: list, details");
        let err = parse_line("sessions sid=two").unwrap_err();
        assert_eq!(err.to_string(), "sid must be a number, 'two' given");
    }

    #[test]
    fn argument_errors() {
        assert_eq!(
            parse_line("frobnicate"),
            Err(CommandError::UnknownCommand("frobnicate".into()))
        );
        assert!(matches!(
            parse_line("saveconfig file=/tmp/x"),
            Err(CommandError::UnknownParameter { .. })
        ));
        assert!(matches!(
            parse_line("version now"),
            Err(CommandError::TooManyArguments { max: 0, .. })
        ));
        assert!(matches!(
            parse_line("saveconfig /a savefile=/b"),
            Err(CommandError::DuplicateParameter { .. })
        ));
        assert!(matches!(
            parse_line("clearconfig confirm=maybe"),
            Err(CommandError::InvalidBool { .. })
        ));
        assert!(matches!(
            parse_line("ls / deep"),
            Err(CommandError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn bool_spellings() {
        for yes in ["true", "TRUE", "yes", "on", "1"] {
            assert!(parse_bool("confirm", yes).unwrap());
        }
        for no in ["false", "No", "off", "0"] {
            assert!(!parse_bool("confirm", no).unwrap());
        }
    }
}
