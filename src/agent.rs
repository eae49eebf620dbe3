//! Agent identity resolution.
//!
//! Resolution order:
//! 1) CLI --agent (explicit)
//! 2) FCOORD_AGENT environment variable
//! 3) Config default (agent.default) or "unknown"

use crate::config::Config;

/// Environment variable naming the calling agent
pub const AGENT_ENV: &str = "FCOORD_AGENT";

/// Resolve the calling agent from the CLI flag, environment and config.
pub fn resolve_agent(cli_agent: Option<&str>, config: &Config) -> String {
    let env_agent = std::env::var(AGENT_ENV).ok();
    pick_agent(cli_agent, env_agent.as_deref(), &config.agent.default)
}

fn pick_agent(cli_agent: Option<&str>, env_agent: Option<&str>, default: &str) -> String {
    non_empty(cli_agent)
        .or_else(|| non_empty(env_agent))
        .or_else(|| non_empty(Some(default)))
        .unwrap_or("unknown")
        .to_string()
}

fn non_empty(input: Option<&str>) -> Option<&str> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}
