// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal input routing and the two session prompts.
//!
//! Stdin is a single stream, so each typed line goes either to an open
//! prompt or to the command queue, never both.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_session::{AlertGateway, WarningChoice};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

pub struct LineRouter {
    pending: Mutex<Option<oneshot::Sender<String>>>,
    commands: mpsc::Sender<String>,
}

impl LineRouter {
    pub fn new(commands: mpsc::Sender<String>) -> Self {
        Self { pending: Mutex::new(None), commands }
    }

    /// Deliver a typed line to the open prompt, or else to the command queue.
    ///
    /// Fails once the command queue is closed.
    pub async fn route(&self, line: String) -> Result<(), mpsc::error::SendError<String>> {
        let pending = self.pending.lock().take();
        let line = match pending {
            Some(tx) => match tx.send(line) {
                Ok(()) => return Ok(()),
                // The prompt was abandoned (countdown elapsed); treat as a command.
                Err(line) => line,
            },
            None => line,
        };
        self.commands.send(line).await
    }

    /// Claim the next typed line. Replaces any older claim.
    pub fn next_line(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(tx);
        rx
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Print `prompt` and wait for the answer. `None` when input ended.
    pub async fn ask(&self, prompt: &str) -> Option<String> {
        eprint!("{prompt}");
        self.next_line().await.ok().map(|s| s.trim().to_owned())
    }
}

/// Feed lines from `reader` into `router` until EOF or the queue closes.
pub async fn pump_lines<R>(reader: R, router: Arc<LineRouter>) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if router.route(line).await.is_err() {
            debug!("command queue closed, stopping input");
            break;
        }
    }
    Ok(())
}

pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// [`AlertGateway`] rendered on stderr, answered on stdin.
pub struct TerminalAlerts {
    router: Arc<LineRouter>,
}

impl TerminalAlerts {
    pub fn new(router: Arc<LineRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl AlertGateway for TerminalAlerts {
    async fn warn_and_await_choice(&self, remaining: Duration) -> WarningChoice {
        eprintln!();
        eprintln!(
            "Your session will expire in {}s due to inactivity. Stay signed in? [y/N]",
            remaining.as_secs()
        );
        match self.router.next_line().await {
            Ok(answer) if is_affirmative(&answer) => WarningChoice::CONTINUE,
            _ => WarningChoice::END,
        }
    }

    async fn notify_expired(&self) {
        eprintln!();
        eprintln!("Your session has expired. Press Enter to continue.");
        let _ = self.router.next_line().await;
    }
}

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;
