// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Interactive stop listener for foreground runs.

use std::future::Future;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info};

pub const PROMPT: &str = "Hit ENTER on the console to stop Cassandra and continue the build.";

/// What ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    Enter,
    EndOfInput,
    Interrupt,
}

/// Wait for a line on `input`, the end of `input`, or `interrupt`.
pub async fn wait_for_stop<R, F>(input: R, interrupt: F) -> StopTrigger
where
    R: AsyncRead + Unpin,
    F: Future<Output = ()>,
{
    let mut lines = BufReader::new(input).lines();
    tokio::pin!(interrupt);

    tokio::select! {
        biased;

        _ = &mut interrupt => StopTrigger::Interrupt,

        line = lines.next_line() => match line {
            Ok(Some(_)) => StopTrigger::Enter,
            Ok(None) => StopTrigger::EndOfInput,
            Err(e) => {
                debug!(error = %e, "Console read failed");
                StopTrigger::EndOfInput
            }
        },
    }
}

/// Prompt, then wait for ENTER on stdin or Ctrl-C.
pub async fn wait_for_console_stop() -> StopTrigger {
    info!("{PROMPT}");
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            debug!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    let trigger = wait_for_stop(tokio::io::stdin(), interrupt).await;
    debug!(trigger = ?trigger, "Console stop requested");
    trigger
}
