use crate::config::SpawnConfig;
use crate::error::{Result, SubprocError};
use crate::redirect::Redirect;
use clap::Parser;
use std::path::PathBuf;

/// subproc - run a command with redirected standard streams
///
/// Thin command-line front end over the spawn engine: pick a source or
/// sink for each standard stream, then execute the command and exit with
/// its exit code.
#[derive(Parser, Debug)]
#[command(
    name = "subproc",
    version = "0.1.0",
    about = "Run a command with redirected standard streams"
)]
pub struct Cli {
    /// Read the command's stdin from this file
    #[arg(short = 'i', long = "stdin", value_name = "file")]
    pub stdin_path: Option<PathBuf>,

    /// Write the command's stdout to this file
    #[arg(short = 'o', long = "stdout", value_name = "file")]
    pub stdout_path: Option<PathBuf>,

    /// Write the command's stderr to this file
    #[arg(short = 'e', long = "stderr", value_name = "file", conflicts_with = "merge_stderr")]
    pub stderr_path: Option<PathBuf>,

    /// Append to output files instead of truncating them
    #[arg(short = 'a', long = "append")]
    pub append: bool,

    /// Merge the command's stderr into its stdout
    #[arg(long = "merge-stderr")]
    pub merge_stderr: bool,

    /// Discard the command's stdout
    #[arg(long = "null-stdout", conflicts_with = "stdout_path")]
    pub null_stdout: bool,

    /// Discard the command's stderr
    #[arg(long = "null-stderr", conflicts_with_all = ["stderr_path", "merge_stderr"])]
    pub null_stderr: bool,

    /// Change to this directory before executing the command
    #[arg(short = 'C', long = "cwd", value_name = "dir")]
    pub cwd: Option<PathBuf>,

    /// Replace the environment with the given KEY=VALUE entries; the
    /// command is then resolved as an exact path, not searched on PATH
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Start the command in a new session, detached from the terminal
    #[arg(long = "detach")]
    pub detach: bool,

    /// Keep descriptors above stderr open in the command
    #[arg(long = "inherit-fds")]
    pub inherit_fds: bool,

    /// Report the command's exit status on stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Command and its arguments to execute
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Validate the parsed arguments
    pub fn validate(&self) -> Result<()> {
        for entry in &self.env {
            if !entry.contains('=') {
                return Err(SubprocError::InvalidArguments(format!(
                    "environment entry is not KEY=VALUE: {:?}",
                    entry
                )));
            }
        }
        Ok(())
    }

    /// Build the spawn configuration described by the flags.
    pub fn to_config(&self) -> SpawnConfig {
        let output = |path: &Option<PathBuf>, null: bool| {
            if null {
                Redirect::DevNull
            } else {
                match path {
                    Some(p) if self.append => Redirect::Append(p.clone()),
                    Some(p) => Redirect::Path(p.clone()),
                    None => Redirect::Inherit,
                }
            }
        };
        SpawnConfig {
            cwd: self.cwd.clone(),
            env: if self.env.is_empty() {
                None
            } else {
                Some(self.env.clone())
            },
            stdin: match &self.stdin_path {
                Some(p) => Redirect::Path(p.clone()),
                None => Redirect::Inherit,
            },
            stdout: output(&self.stdout_path, self.null_stdout),
            stderr: if self.merge_stderr {
                Redirect::ToStdout
            } else {
                output(&self.stderr_path, self.null_stderr)
            },
            detach: self.detach,
            inherit_fds: self.inherit_fds,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn minimal_invocation_inherits_streams() {
        let cli = parse(&["subproc", "ls", "-l"]);
        assert_eq!(cli.command, vec!["ls", "-l"]);
        let config = cli.to_config();
        assert!(matches!(config.stdin, Redirect::Inherit));
        assert!(matches!(config.stdout, Redirect::Inherit));
        assert!(matches!(config.stderr, Redirect::Inherit));
    }

    #[test]
    fn append_applies_to_output_paths() {
        let cli = parse(&["subproc", "-a", "-o", "out.log", "ls"]);
        let config = cli.to_config();
        assert!(matches!(config.stdout, Redirect::Append(_)));
    }

    #[test]
    fn merge_stderr_maps_to_follow_kind() {
        let cli = parse(&["subproc", "--merge-stderr", "ls"]);
        let config = cli.to_config();
        assert!(matches!(config.stderr, Redirect::ToStdout));
    }

    #[test]
    fn merge_conflicts_with_stderr_path() {
        assert!(Cli::try_parse_from(["subproc", "--merge-stderr", "-e", "err.log", "ls"]).is_err());
    }

    #[test]
    fn malformed_env_entry_is_rejected() {
        let cli = parse(&["subproc", "--env", "NOVALUE", "ls"]);
        assert!(cli.validate().is_err());
        let cli = parse(&["subproc", "--env", "KEY=value", "ls"]);
        assert!(cli.validate().is_ok());
    }
}
