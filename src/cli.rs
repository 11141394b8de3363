// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
use clap::Parser;
use std::path::PathBuf;

/// An interactive tool-calling AI coding agent.
///
/// With a prompt argument, runs one request to completion and prints the
/// streamed answer.  Without one, the prompt is read from stdin.
#[derive(Parser, Debug)]
#[command(name = "runa", version, about)]
pub struct Cli {
    /// The request to process.  Read from stdin when omitted.
    pub prompt: Option<String>,

    /// Explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Provider id or base URL (overrides config).
    #[arg(long)]
    pub provider: Option<String>,

    /// Model name (overrides config).
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// API base URL (overrides config and the provider default).
    #[arg(long)]
    pub api_base: Option<String>,

    /// System prompt override.
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Files injected as context after the system prompt (repeatable).
    #[arg(long = "context-file")]
    pub context_files: Vec<PathBuf>,

    /// Cap on model-call iterations for this request.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Disable streaming (one complete response per model call).
    #[arg(long)]
    pub no_stream: bool,

    /// List the registered providers and exit.
    #[arg(long)]
    pub list_providers: bool,

    /// Log to stderr (RUST_LOG still applies).
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
