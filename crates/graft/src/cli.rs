//! Command-line interface handling for the Graft launcher.
//!
//! This module provides command-line argument parsing using the `clap`
//! crate. Global options override the configuration file; subcommands pick
//! what the launcher does.

use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command};

/// What the launcher was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Boot the pipeline and run the entrypoint
    Run,
    /// Discover definitions and report every error
    Check,
    /// Print the transformation plan of one class
    Plan { class: String },
    /// Encode a JSON class description into a class image
    Assemble { input: PathBuf, output: PathBuf },
    /// Print a class image as JSON
    Dump { input: PathBuf },
}

impl CliCommand {
    /// Whether the command needs the configuration file.
    pub fn needs_config(&self) -> bool {
        !matches!(self, CliCommand::Assemble { .. } | CliCommand::Dump { .. })
    }
}

/// Command line arguments parsed from user input.
///
/// This structure holds all the command-line options that can be used to
/// override configuration file settings.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the debug export directory
    pub export_dir: Option<PathBuf>,
    /// Disable binary compatibility verification
    pub no_verify: bool,
    /// Load every host class before running the entrypoint
    pub preload: bool,
    pub command: CliCommand,
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on invalid input.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list, first item being the binary name.
    #[cfg(test)]
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        let path = |m: &ArgMatches, id: &str| m.get_one::<String>(id).map(PathBuf::from).unwrap_or_default();
        let command = match matches.subcommand() {
            Some(("check", _)) => CliCommand::Check,
            Some(("plan", sub)) => CliCommand::Plan {
                class: sub.get_one::<String>("class").cloned().unwrap_or_default(),
            },
            Some(("assemble", sub)) => CliCommand::Assemble {
                input: path(sub, "input"),
                output: path(sub, "output"),
            },
            Some(("dump", sub)) => CliCommand::Dump {
                input: path(sub, "input"),
            },
            _ => CliCommand::Run,
        };

        Self {
            config_path: path(matches, "config"),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            export_dir: matches.get_one::<String>("export-dir").map(PathBuf::from),
            no_verify: matches.get_flag("no-verify"),
            preload: matches.get_flag("preload"),
            command,
        }
    }
}

fn command() -> Command {
    Command::new("graft")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Load-time class transformation pipeline for closed host applications")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("graft.toml")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .global(true),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("export-dir")
                .long("export-dir")
                .value_name("DIR")
                .help("Write transformed classes to DIR for inspection"),
        )
        .arg(
            Arg::new("no-verify")
                .long("no-verify")
                .help("Skip binary compatibility verification")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("preload")
                .long("preload")
                .help("Load every host class in parallel before running the entrypoint")
                .action(ArgAction::SetTrue),
        )
        .subcommand(Command::new("run").about("Boot the pipeline and run the entrypoint (default)"))
        .subcommand(Command::new("check").about("Validate every transformation definition"))
        .subcommand(
            Command::new("plan")
                .about("Print the transformation plan of a class")
                .arg(Arg::new("class").required(true).value_name("CLASS")),
        )
        .subcommand(
            Command::new("assemble")
                .about("Encode a JSON class description into a class image")
                .arg(Arg::new("input").required(true).value_name("JSON"))
                .arg(Arg::new("output").required(true).value_name("OUT")),
        )
        .subcommand(
            Command::new("dump")
                .about("Print a class image as JSON")
                .arg(Arg::new("input").required(true).value_name("IMAGE")),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let args = CliArgs::try_parse_from(["graft"]).unwrap();
        assert_eq!(args.command, CliCommand::Run);
        assert_eq!(args.config_path, PathBuf::from("graft.toml"));
        assert!(!args.json_logs);
        assert!(!args.no_verify);
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_global_options_and_subcommands() {
        let args = CliArgs::try_parse_from(["graft", "--no-verify", "plan", "net/example/Foo", "-c", "other.toml"])
            .unwrap();
        assert!(args.no_verify);
        assert_eq!(args.config_path, PathBuf::from("other.toml"));
        assert_eq!(
            args.command,
            CliCommand::Plan {
                class: "net/example/Foo".to_string()
            }
        );
        assert!(args.command.needs_config());

        let args = CliArgs::try_parse_from(["graft", "assemble", "Foo.json", "Foo.gclass"]).unwrap();
        assert_eq!(
            args.command,
            CliCommand::Assemble {
                input: PathBuf::from("Foo.json"),
                output: PathBuf::from("Foo.gclass"),
            }
        );
        assert!(!args.command.needs_config());
    }

    #[test]
    fn test_plan_requires_a_class() {
        assert!(CliArgs::try_parse_from(["graft", "plan"]).is_err());
    }
}
