//! fcoord coordinate command implementation
//!
//! The cross-process form of the coordination handshake: the request is
//! broadcast through the shared store, then the caller's mailbox is polled
//! for a matching response until the coordination timeout. An unanswered or
//! denied request exits with the policy-blocked code.

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::cli::{absolute_arg, GlobalOptions, Session};
use crate::config::parse_std_duration;
use crate::conflict::ConflictDetection;
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::paths::resource_key;

/// Options for `fcoord coordinate`
pub struct CoordinateOptions {
    pub path: String,
    pub operation: String,
    pub timeout: Option<String>,
}

#[derive(Serialize)]
struct CoordinateReport {
    path: String,
    operation: String,
    approved: bool,
    conflicts: Vec<ConflictDetection>,
}

pub async fn run(globals: &GlobalOptions, options: CoordinateOptions) -> Result<()> {
    let (mut settings, agent) = globals.resolve()?;
    if let Some(raw) = options.timeout.as_deref() {
        settings.coordination_timeout = parse_std_duration(raw)?;
    }
    let path = absolute_arg(&options.path)?;
    let key = resource_key(&path)?;

    let conflicts = {
        let session = Session::open_with(settings.clone(), agent.clone())?;
        session
            .service
            .request_coordination(&path, &agent, &options.operation)?
    };

    let approved = if conflicts.is_empty() {
        true
    } else {
        wait_for_verdict(&settings, &agent, &key).await?.unwrap_or(false)
    };

    if !approved {
        return Err(Error::CoordinationDenied(key));
    }

    let report = CoordinateReport {
        path: key.clone(),
        operation: options.operation,
        approved,
        conflicts,
    };

    let mut human = HumanOutput::new(format!("fcoord coordinate: {key} approved"));
    if report.conflicts.is_empty() {
        human.push_summary("conflicts", "none");
    }
    for conflict in &report.conflicts {
        human.push_detail(conflict.description.clone());
    }
    human.push_next_step(format!("fcoord lock {key} --kind write"));

    emit_success(globals.output(), "coordinate", &report, Some(&human))
}

/// Poll the store for a response until the coordination timeout.
async fn wait_for_verdict(
    settings: &crate::config::Settings,
    agent: &str,
    key: &str,
) -> Result<Option<bool>> {
    let deadline = Instant::now() + settings.coordination_timeout;
    loop {
        {
            let session = Session::open_with(settings.clone(), agent.to_string())?;
            if let Some(verdict) = session.service.take_coordination_verdict(agent, key)? {
                return Ok(Some(verdict));
            }
        }
        let now = Instant::now();
        if now >= deadline {
            debug!(path = key, agent, "coordination timed out");
            return Ok(None);
        }
        sleep(settings.poll_interval.min(deadline - now)).await;
    }
}
