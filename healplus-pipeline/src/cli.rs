//! Argument parsing for the `healplus` binary.

use crate::error::CliError;
use std::path::PathBuf;

pub const USAGE: &str = "\
usage: healplus [--config <path>] <command>

commands:
  assess --wound <id> --image <uri> [--payload <json file>] [--sync]
  fhir-pull --patient <id>
  watch --path <collection path>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Assess {
        wound_id: String,
        image_uri: String,
        payload: Option<PathBuf>,
        sync_fhir: bool,
    },
    FhirPull {
        patient_id: String,
    },
    Watch {
        path: String,
    },
}

/// Parse arguments after the program name. `--config <path>` may appear
/// anywhere and is skipped; configuration loading reads it separately.
pub fn parse_args<I>(args: I) -> Result<Command, CliError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut command = None;
    let mut flags: Vec<(String, Option<String>)> = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                args.next();
            }
            "--sync" => flags.push((arg, None)),
            "-h" | "--help" => return Err(CliError::Usage("help requested".to_string())),
            flag if flag.starts_with("--") => {
                let value = args
                    .next()
                    .ok_or_else(|| CliError::Usage(format!("{} needs a value", flag)))?;
                flags.push((arg, Some(value)));
            }
            _ if command.is_none() => command = Some(arg),
            _ => return Err(CliError::Usage(format!("unexpected argument {}", arg))),
        }
    }

    let take = |name: &str| -> Option<String> {
        flags
            .iter()
            .find(|(flag, _)| flag == name)
            .and_then(|(_, value)| value.clone())
    };
    let require = |name: &str| -> Result<String, CliError> {
        take(name).ok_or_else(|| CliError::Usage(format!("missing {}", name)))
    };

    match command.as_deref() {
        Some("assess") => Ok(Command::Assess {
            wound_id: require("--wound")?,
            image_uri: require("--image")?,
            payload: take("--payload").map(PathBuf::from),
            sync_fhir: flags.iter().any(|(flag, _)| flag == "--sync"),
        }),
        Some("fhir-pull") => Ok(Command::FhirPull {
            patient_id: require("--patient")?,
        }),
        Some("watch") => Ok(Command::Watch {
            path: require("--path")?,
        }),
        Some(other) => Err(CliError::Usage(format!("unknown command {}", other))),
        None => Err(CliError::Usage("missing command".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_assess() {
        let command = parse_args(args(
            "--config healplus.toml assess --wound w1 --image gs://b/w1.jpg --sync",
        ))
        .unwrap();
        assert_eq!(
            command,
            Command::Assess {
                wound_id: "w1".to_string(),
                image_uri: "gs://b/w1.jpg".to_string(),
                payload: None,
                sync_fhir: true,
            }
        );
    }

    #[test]
    fn test_parse_watch_and_pull() {
        assert_eq!(
            parse_args(args("watch --path users/u1/reports")).unwrap(),
            Command::Watch {
                path: "users/u1/reports".to_string()
            }
        );
        assert_eq!(
            parse_args(args("fhir-pull --patient p1")).unwrap(),
            Command::FhirPull {
                patient_id: "p1".to_string()
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_args(args("assess --wound w1")), Err(CliError::Usage(_))));
        assert!(matches!(parse_args(args("teleport")), Err(CliError::Usage(_))));
        assert!(matches!(parse_args(args("watch --path")), Err(CliError::Usage(_))));
        assert!(matches!(parse_args(Vec::new()), Err(CliError::Usage(_))));
    }
}
