//! API key resolution.
//!
//! Order: per-organization override, then the configured key, then the output
//! of a helper executable.

use std::path::Path;
use std::time::Duration;

use triage_core::error::ProviderError;
use tracing::{debug, error};

const HELPER_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn resolve_api_key(
    override_key: Option<&str>,
    configured: Option<&str>,
    helper: Option<&Path>,
) -> Result<String, ProviderError> {
    if let Some(key) = override_key.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    if let Some(key) = configured.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    let Some(helper) = helper else {
        return Err(ProviderError::NotConfigured(
            "no API key configured and no key helper set".into(),
        ));
    };

    run_helper(helper, HELPER_TIMEOUT).await
}

async fn run_helper(helper: &Path, timeout: Duration) -> Result<String, ProviderError> {
    debug!(helper = %helper.display(), "Obtaining API key from helper");
    let mut command = tokio::process::Command::new(helper);
    command.kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| {
            error!(helper = %helper.display(), "API key helper timed out");
            ProviderError::Timeout(format!("API key helper {} timed out", helper.display()))
        })?
        .map_err(|e| {
            error!(helper = %helper.display(), error = %e, "API key helper failed");
            ProviderError::NotConfigured(format!("cannot run API key helper: {e}"))
        })?;

    let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if key.is_empty() {
        error!(helper = %helper.display(), status = %output.status, "API key helper printed nothing");
        return Err(ProviderError::NotConfigured("API key helper returned an empty key".into()));
    }
    Ok(key)
}
