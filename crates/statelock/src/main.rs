mod config;

use anyhow::Context;
use clap::Parser;
use statelock::{resolve_lock, BackendLock, Lock, LockError, LockGrant};
use tokio::process::Command as ChildCommand;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Command, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    let lock = resolve_lock(&config.lock_spec()?)?;

    match config.command {
        Command::Describe => println!("{}", lock.describe()),
        Command::Acquire => {
            let grant = lock.acquire().await?;
            if let Some(lease) = grant.lease() {
                println!("{}", lease);
            }
            if let Some(backup) = grant.backup_key() {
                info!("State backed up to {}", backup);
            }
        }
        Command::Release => lock.release().await?,
        Command::Run { command } => {
            let code = run_locked(&lock, &command).await?;
            std::process::exit(code);
        }
    }

    Ok(())
}

/// Run `argv` while holding `lock`. The lock is released on every path once
/// it was acquired. Returns the exit code to propagate.
async fn run_locked(lock: &BackendLock, argv: &[String]) -> anyhow::Result<i32> {
    let (program, args) = argv.split_first().context("no command given")?;

    let grant = match lock.acquire().await {
        Ok(grant) => grant,
        Err(LockError::BackupFailed { lease, reason }) => {
            warn!("Backup failed while holding lease {}, releasing", lease);
            lock.release().await?;
            anyhow::bail!("unable to backup state: {}", reason);
        }
        Err(e) => return Err(e.into()),
    };

    let outcome = run_child(lock, &grant, program, args).await;

    info!("Releasing {}", lock.describe());
    let released = lock.release().await;

    let code = outcome?;
    released?;
    Ok(code)
}

async fn run_child(
    lock: &BackendLock,
    grant: &LockGrant,
    program: &str,
    args: &[String],
) -> anyhow::Result<i32> {
    let mut child = ChildCommand::new(program)
        .args(args)
        .envs(lock.handoff_env(grant))
        .spawn()
        .with_context(|| format!("failed to start {}", program))?;

    // The child shares our process group and sees Ctrl+C too; wait for it so
    // the lock is only released after it is gone.
    let status = tokio::select! {
        status = child.wait() => status,
        _ = signal::ctrl_c() => {
            warn!("Interrupted, waiting for {} to exit", program);
            child.wait().await
        }
    }
    .with_context(|| format!("failed to wait for {}", program))?;

    Ok(exit_code(status))
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
