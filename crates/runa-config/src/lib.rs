// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
mod schema;
mod loader;
mod ca;

pub use schema::{AgentConfig, Config, ModelConfig, ToolsConfig};
pub use loader::load;
pub use ca::find_ca_bundle;
