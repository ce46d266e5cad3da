//! Minimal CLI parsing.

use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::config::LogFormat;

pub const USAGE: &str = "\
Usage:
  curator import <path>...   Import files or directories into the library
  curator parse <filename>   Print the parsed identity as JSON
  curator plan <filename>    Print the planned library path

Options:
  --json-logs                Log as JSON regardless of LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Command {
    Import(Vec<PathBuf>),
    Parse(String),
    Plan(String),
    #[default]
    Help,
}

#[derive(Debug, Default)]
pub struct CliOptions {
    pub command: Command,
    pub log_format_override: Option<LogFormat>,
}

impl CliOptions {
    pub fn from_args() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut options = CliOptions::default();
        let mut positional = Vec::new();
        for arg in args {
            match arg.as_str() {
                "--json-logs" => options.log_format_override = Some(LogFormat::Json),
                "-h" | "--help" => return Ok(options),
                _ if arg.starts_with("--") => bail!("Unknown option: {}", arg),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        options.command = match positional.next().as_deref() {
            None | Some("help") => Command::Help,
            Some("import") => {
                let paths: Vec<PathBuf> = positional.map(PathBuf::from).collect();
                if paths.is_empty() {
                    bail!("import needs at least one path");
                }
                Command::Import(paths)
            }
            Some(name @ ("parse" | "plan")) => {
                let Some(filename) = positional.next() else {
                    bail!("{} needs a filename", name);
                };
                if positional.next().is_some() {
                    bail!("{} takes exactly one filename", name);
                }
                if name == "parse" {
                    Command::Parse(filename)
                } else {
                    Command::Plan(filename)
                }
            }
            Some(other) => bail!("Unknown command: {}", other),
        };
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Result<CliOptions> {
        CliOptions::parse(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse(&[]).unwrap().command, Command::Help);
        assert_eq!(
            parse(&["import", "a.mkv", "incoming"]).unwrap().command,
            Command::Import(vec![PathBuf::from("a.mkv"), PathBuf::from("incoming")])
        );
        assert_eq!(
            parse(&["parse", "Alien (1979) [DVD].mkv"]).unwrap().command,
            Command::Parse("Alien (1979) [DVD].mkv".to_string())
        );
        assert_eq!(
            parse(&["plan", "x.mkv"]).unwrap().command,
            Command::Plan("x.mkv".to_string())
        );
    }

    #[test]
    fn test_json_logs_flag() {
        let options = parse(&["--json-logs", "parse", "x.mkv"]).unwrap();
        assert_eq!(options.log_format_override, Some(LogFormat::Json));
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(parse(&["import"]).is_err());
        assert!(parse(&["parse"]).is_err());
        assert!(parse(&["plan", "a", "b"]).is_err());
        assert!(parse(&["frobnicate"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }
}
