//! Terminal I/O for the CLI: results on stdout, prompts and notices on stderr.

use crate::errors::{ErrorReport, WalletError};
use eyre::Context as _;
use serde::Serialize;
use std::io::{BufRead as _, IsTerminal as _, Write as _};
use zeroize::Zeroizing;

pub fn stderr_write(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    let _flush = stderr.flush();
}

pub fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

pub fn stdout_line(s: &str) -> eyre::Result<()> {
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")
}

pub fn emit_json<T: Serialize>(v: &T) -> eyre::Result<()> {
    let s = serde_json::to_string(v).context("serialize output")?;
    stdout_line(&s)
}

/// Report a domain error the way the caller asked for it, then hand it back for the exit code.
pub fn fail(json: bool, e: WalletError) -> eyre::Report {
    if json {
        if let Err(write_err) = emit_json(&serde_json::json!({ "error": ErrorReport::from(&e) })) {
            tracing::warn!(error = %write_err, "could not write error report");
        }
    } else {
        stderr_writeln(&e.user_message());
    }
    eyre::Report::new(e)
}

/// Read a recovery phrase without echo on a terminal, or as the first line of piped stdin.
pub fn read_phrase(prompt: &str) -> eyre::Result<Zeroizing<String>> {
    if std::io::stdin().is_terminal() {
        let s = rpassword::prompt_password(prompt).context("read recovery phrase")?;
        return Ok(Zeroizing::new(s));
    }
    let mut buf = Zeroizing::new(String::new());
    std::io::stdin()
        .lock()
        .read_line(&mut buf)
        .context("read recovery phrase from stdin")?;
    Ok(buf)
}

fn ask_yes_no(question: &str) -> eyre::Result<()> {
    let interactive = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
    if !interactive {
        eyre::bail!("refusing to continue non-interactively; pass --yes");
    }

    stderr_write(&format!("{question} [y/N] "));
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read confirmation")?;
    let ans = line.trim().to_ascii_lowercase();
    if ans == "y" || ans == "yes" {
        Ok(())
    } else {
        eyre::bail!("cancelled")
    }
}

/// Ask on stderr before a destructive or irreversible step, or bail if non-interactive.
///
/// The prompt blocks on stdin, so it runs on the blocking pool and timers keep firing meanwhile.
pub async fn confirm_or_bail(yes: bool, question: &str) -> eyre::Result<()> {
    if yes {
        return Ok(());
    }
    let question = question.to_owned();
    tokio::task::spawn_blocking(move || ask_yes_no(&question))
        .await
        .context("confirmation prompt")?
}
