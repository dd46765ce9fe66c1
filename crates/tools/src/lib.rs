//! Investigation capabilities for Triage.
//!
//! Twelve tools over three downstream HTTP services (Metrics Explorer,
//! Logs Explorer, Code Parser), the invoker that runs them with a hard size
//! cap, and turn-context construction from an organization's mappings.

pub mod client;
pub mod code;
pub mod context;
pub mod format;
pub mod invoker;
pub mod logs;
pub mod metrics;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use triage_core::tool::ToolRegistry;

pub use client::HttpServiceClient;
pub use context::build_turn_context;
pub use invoker::{TRUNCATION_MARKER, ToolInvoker, ToolOutcome, cap_result};

/// The registry of every built-in capability.
///
/// `max_chars` is the tool response budget; flow and file documents are
/// formatted up to it instead of the default JSON limit.
pub fn default_registry(max_chars: usize) -> ToolRegistry {
    ToolRegistry::new()
        // Metrics Explorer
        .with(Arc::new(metrics::MetricsOverviewTool))
        .with(Arc::new(metrics::MetricsSearchDashboardsTool))
        .with(Arc::new(metrics::MetricsExploreDashboardTool))
        .with(Arc::new(metrics::MetricsVariableValuesTool))
        .with(Arc::new(metrics::MetricsQueryTool))
        // Logs Explorer
        .with(Arc::new(logs::LogsOverviewTool))
        .with(Arc::new(logs::LogsSearchSourcesTool))
        .with(Arc::new(logs::LogsSearchTool))
        // Code Parser
        .with(Arc::new(code::CodeSearchEntryPointsTool))
        .with(Arc::new(code::CodeGetFlowsTool::new(max_chars)))
        .with(Arc::new(code::CodeSearchFilesTool))
        .with(Arc::new(code::CodeGetFileTool::new(max_chars)))
}
