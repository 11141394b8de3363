// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Non-blocking terminal interrupt detection.
//!
//! Raw mode is enabled only for the duration of a zero-timeout poll and
//! restored immediately, so the terminal behaves normally between polls.
//! ESC (0x1B) constitutes the interrupt.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode};
use crossterm::terminal;
use tracing::debug;

enum Source {
    /// Poll the controlling terminal for ESC.
    Terminal,
    /// Never fires (headless runs).
    Never,
    /// Fires when the shared flag is set; the flag is consumed on read.
    /// Used by tests and embedding UIs that detect cancellation themselves.
    Flag(Arc<AtomicBool>),
}

pub struct InterruptDetector {
    source: Source,
}

impl Default for InterruptDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptDetector {
    /// Terminal-backed detector; inert when stdin is not a terminal.
    pub fn new() -> Self {
        let source = if std::io::stdin().is_terminal() {
            Source::Terminal
        } else {
            Source::Never
        };
        Self { source }
    }

    /// Detector that never fires; used in headless runs.
    pub fn disabled() -> Self {
        Self {
            source: Source::Never,
        }
    }

    /// Detector driven by an external flag instead of the terminal.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self {
            source: Source::Flag(flag),
        }
    }

    /// Poll for a pending interrupt without blocking.
    pub fn poll(&self) -> bool {
        match &self.source {
            Source::Never => false,
            Source::Flag(flag) => {
                let hit = flag.swap(false, Ordering::SeqCst);
                if hit {
                    debug!("user interrupt raised via flag");
                }
                hit
            }
            Source::Terminal => match poll_escape() {
                Ok(hit) => {
                    if hit {
                        debug!("user interrupt detected");
                    }
                    hit
                }
                Err(e) => {
                    debug!(error = %e, "interrupt poll failed; treating as no interrupt");
                    false
                }
            },
        }
    }
}

fn poll_escape() -> std::io::Result<bool> {
    terminal::enable_raw_mode()?;
    let result = drain_pending_escape();
    // Restore the previous mode even when the poll errored.
    let _ = terminal::disable_raw_mode();
    result
}

fn drain_pending_escape() -> std::io::Result<bool> {
    let mut hit = false;
    while event::poll(Duration::ZERO)? {
        if let Event::Key(key) = event::read()? {
            if key.code == KeyCode::Esc {
                hit = true;
            }
        }
    }
    Ok(hit)
}
