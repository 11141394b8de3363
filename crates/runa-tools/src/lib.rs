// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
mod registry;
mod tool;

pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{
    classify_call, order_calls, ExecContext, ExecutionMode, Tool, ToolFlags, ToolInvocation,
    ToolOutcome,
};
