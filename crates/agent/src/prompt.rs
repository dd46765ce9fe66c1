//! Prompt text and the user-supplied context hint.

use serde::{Deserialize, Serialize};

/// Main system prompt for every investigation turn.
pub const SYSTEM_PROMPT: &str = "\
You are Triage, an on-call SRE assistant. You can read three data sources through tools: \
code (Code Parser), metrics (Metrics Explorer), and logs (Logs Explorer). Use only the tools \
the question needs. Every claim must be backed by tool data; never fabricate.

Match the answer to the question. A narrow question gets a short, direct answer. A broad \
investigation (\"is service X healthy?\", \"debug this endpoint\") gets a structured report.

Work discovery first:
- Metrics: call metrics_get_overview and prefer its used dashboards. Explore a dashboard with \
its db_id, then run metrics_query with its provider dashboard id and the metric names and tag \
keys you found.
- Logs: call logs_get_overview, pick a used index, find the source with logs_search_sources, \
then run logs_search.
- Code: search entry points or files, then read flows or files to explain why something happens.

Read each tool result before choosing the next call. Metrics and logs say what is happening; \
code says why. Many `.count` metrics are cumulative counters: if recent datapoints steadily \
increase, report the delta over the window, not the average.

Tool errors such as 401 or connection failures mean a source is unavailable, not that a \
problem exists. No data is an observability gap. Quantify findings with counts, rates and \
latencies. Stop calling tools once you have enough evidence.

For broad investigations structure the report as: Summary, Metrics, Logs, Code (if relevant), \
Root Cause Analysis, Recommendations. Omit sections without data.";

/// Appended, for one call only, when the turn must produce its final answer.
pub const SYNTHESIS_DIRECTIVE: &str = "\
The investigation budget is spent. Write your final answer now from the data collected above. \
Do not request tools and do not say you will check anything further.

For a broad investigation use these sections: Summary (healthy, degraded, or impaired), \
Metrics, Logs, Code Architecture (only if relevant), Root Cause Analysis, Recommendations. \
For a narrow question answer it directly.

Report only what the data shows. Treat tool errors as unavailable sources and missing data as \
an observability gap. Quantify everything.";

/// System directive for summarizing older conversation turns.
pub const SUMMARY_SYSTEM: &str = "\
You are summarizing a prior SRE on-call debugging chat session. Produce a single short \
paragraph (2-4 sentences) that captures what the user asked and which services or endpoints \
were mentioned, what was investigated with which tools and the key findings, and any \
conclusions or open questions. Keep it factual. No markdown. Write in past tense.";

pub fn summary_prompt(transcript: &str) -> String {
    format!("Summarize the following conversation between the user and the SRE assistant.\n\n---\n{transcript}\n---")
}

/// Optional context a user attaches to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl UserContext {
    /// Render as an extra system message, or `None` when every field is empty.
    pub fn hint(&self) -> Option<String> {
        let parts: Vec<String> = [
            ("Service", &self.service),
            ("Environment", &self.environment),
            ("File path", &self.file_path),
        ]
        .into_iter()
        .filter_map(|(label, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| format!("{label}: {v}"))
        })
        .collect();

        if parts.is_empty() {
            None
        } else {
            Some(format!("User provided context:\n{}", parts.join("\n")))
        }
    }
}
