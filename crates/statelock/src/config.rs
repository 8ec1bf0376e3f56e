use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use statelock::{ConfigFile, LockSpec};

/// Command line of the statelock binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "statelock")]
#[command(about = "Acquire and release distributed locks around infrastructure state files")]
pub struct Config {
    /// JSON configuration file with a `lock` section
    #[arg(long, global = true, env = "STATELOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Lock backend name (azure, dynamodb), when no config file is given
    #[arg(long, global = true, env = "STATELOCK_BACKEND")]
    pub backend: Option<String>,

    /// Backend option as key=value, repeatable
    #[arg(short = 'o', long = "option", global = true, value_parser = parse_option)]
    pub options: Vec<(String, String)>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print a description of the configured lock
    Describe,
    /// Acquire the lock and print the lease id, if the backend issues one
    Acquire,
    /// Release the lock
    Release,
    /// Run a command while holding the lock
    Run {
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

impl Config {
    /// The lock section, from the config file or from `--backend` and `-o`.
    pub fn lock_spec(&self) -> anyhow::Result<LockSpec> {
        if let Some(path) = &self.config {
            if self.backend.is_some() || !self.options.is_empty() {
                bail!("--config cannot be combined with --backend or --option");
            }
            let file = ConfigFile::read(path)?;
            return file
                .lock
                .with_context(|| format!("{} has no lock section", path.display()));
        }

        let Some(backend) = &self.backend else {
            bail!("either --config or --backend must be given");
        };
        Ok(self
            .options
            .iter()
            .fold(LockSpec::new(backend.clone()), |spec, (key, value)| {
                spec.with_option(key.clone(), value.clone())
            }))
    }
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got {:?}", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("statelock").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_backend_with_options() {
        let config = parse(&[
            "--backend",
            "dynamodb",
            "-o",
            "state_file_id=prod/terraform.tfstate",
            "--option",
            "max_lock_retries=5",
            "describe",
        ]);
        let spec = config.lock_spec().unwrap();
        assert_eq!(spec.backend, "dynamodb");
        assert_eq!(spec.config["state_file_id"], "prod/terraform.tfstate");
        assert_eq!(spec.config["max_lock_retries"], "5");
    }

    #[test]
    fn test_run_keeps_child_arguments() {
        let config = parse(&["--backend", "dynamodb", "run", "--", "terraform", "apply", "-auto-approve"]);
        match config.command {
            Command::Run { command } => assert_eq!(command, ["terraform", "apply", "-auto-approve"]),
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_option_without_equals_is_rejected() {
        let result = Config::try_parse_from(["statelock", "-o", "state_file_id", "describe"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_file_lock_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statelock.json");
        std::fs::write(
            &path,
            r#"{"lock": {"backend": "azure", "config": {"storage_account_name": "acct", "container_name": "tfstate", "key": "prod.tfstate"}}}"#,
        )
        .unwrap();

        let config = parse(&["--config", path.to_str().unwrap(), "describe"]);
        let spec = config.lock_spec().unwrap();
        assert_eq!(spec.backend, "azure");
        assert_eq!(spec.config.len(), 3);
    }

    #[test]
    fn test_config_file_without_lock_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statelock.json");
        std::fs::write(&path, r#"{"remote_state": {"backend": "s3"}}"#).unwrap();

        let config = parse(&["--config", path.to_str().unwrap(), "describe"]);
        let err = config.lock_spec().unwrap_err();
        assert!(err.to_string().contains("has no lock section"));
    }
}
