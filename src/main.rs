// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use runa_core::{
    AgentEvent, InterruptDetector, MemorySession, Orchestrator, SessionSink, WorkflowConfig,
};
use runa_tools::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.list_providers {
        for profile in runa_model::registry::PROFILES {
            println!("{:12} tools={}", profile.name, profile.supports_tools);
        }
        return Ok(());
    }

    let mut config = runa_config::load(cli.config.as_deref())?;
    if let Some(provider) = &cli.provider {
        config.model.provider = provider.clone();
    }
    if let Some(model) = &cli.model {
        config.model.model = model.clone();
    }
    if let Some(base) = &cli.api_base {
        config.model.api_base = Some(base.clone());
    }
    if let Some(prompt) = &cli.system_prompt {
        config.agent.system_prompt = Some(prompt.clone());
    }
    if let Some(max) = cli.max_iterations {
        config.agent.max_iterations = max;
    }

    // Warn early when no CA bundle is available; rustls falls back to its
    // built-in roots.
    let _ = runa_config::find_ca_bundle();

    let prompt = match &cli.prompt {
        Some(p) => p.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading prompt from stdin")?;
            buf.trim().to_string()
        }
    };
    anyhow::ensure!(!prompt.is_empty(), "no prompt given");

    let provider = runa_model::from_config(&config.model).map_err(|e| anyhow::anyhow!("{e}"))?;
    let tools = Arc::new(ToolRegistry::new());

    let mut session = MemorySession::new(&config.model.model);
    let mut context_files = config.agent.context_files.iter().map(Into::into).collect::<Vec<_>>();
    context_files.extend(cli.context_files.iter().cloned());
    session.state().context_files = context_files;

    let system_prompt = config
        .agent
        .system_prompt
        .clone()
        .unwrap_or_else(|| "You are a careful software engineering assistant.".to_string());

    let mut orchestrator = Orchestrator::new(provider, tools)
        .with_config(WorkflowConfig {
            max_iterations: config.agent.max_iterations,
            stream: !cli.no_stream,
            ..WorkflowConfig::default()
        })
        .with_system_prompt(system_prompt)
        .with_sampling(config.model.temperature, config.model.top_p)
        .with_interrupts(InterruptDetector::new());

    let (tx, mut rx) = tokio::sync::mpsc::channel::<AgentEvent>(256);
    let printer = tokio::spawn(async move {
        let mut streamed = false;
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::Chunk { delta, .. } => {
                    streamed = true;
                    print!("{delta}");
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::Thinking(_) => {}
                AgentEvent::ToolCallStarted(name) => {
                    eprintln!("→ {name}");
                }
                AgentEvent::ToolCallFinished {
                    tool_name,
                    is_error,
                    ..
                } => {
                    eprintln!("← {tool_name}{}", if is_error { " (error)" } else { "" });
                }
                AgentEvent::SystemMessage(message) => {
                    eprintln!("* {message}");
                }
                AgentEvent::TurnComplete => {}
            }
        }
        streamed
    });

    let result = orchestrator.process_input(&prompt, &mut session, &tx).await;
    drop(tx);
    let streamed = printer.await.unwrap_or(false);

    if result.success {
        // Streaming already printed the content; print it once otherwise.
        if !streamed && !result.content.is_empty() {
            println!("{}", result.content);
        } else {
            println!();
        }
        Ok(())
    } else {
        let error = result
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown failure".into());
        anyhow::bail!(
            "request failed after {} iteration(s): {error}",
            result.iterations
        );
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "runa=debug,info" } else { "warn" })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
