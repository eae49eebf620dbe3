//! fcoord lock/release command implementation
//!
//! A denied lock exits with the policy-blocked code and names the holder.

use serde::Serialize;

use crate::cli::{absolute_arg, GlobalOptions, Session};
use crate::error::{Error, Result};
use crate::lease::LockKind;
use crate::output::{emit_success, HumanOutput};
use crate::paths::resource_key;

#[derive(Serialize)]
struct LockReport {
    path: String,
    agent: String,
    kind: LockKind,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize)]
struct ReleaseReport {
    path: String,
    agent: String,
    released: bool,
}

pub fn run_lock(globals: &GlobalOptions, path: &str, kind: &str) -> Result<()> {
    let kind: LockKind = kind.parse()?;
    let path = absolute_arg(path)?;
    let key = resource_key(&path)?;
    let session = Session::open(globals)?;
    let granted = session.service.request_file_lock(&path, &session.agent, kind)?;
    let state = session.service.file_state(&path);

    if !granted {
        let (holder, held) = state
            .map(|file| {
                (
                    file.lock_holder.unwrap_or_default(),
                    file.lock_status.to_string(),
                )
            })
            .unwrap_or_default();
        return Err(Error::LockDenied {
            path: key,
            holder,
            kind: held,
        });
    }

    let report = LockReport {
        path: key,
        agent: session.agent.clone(),
        kind,
        expires_at: state.and_then(|file| file.lock_expires_at),
    };

    let mut human = HumanOutput::new(format!("fcoord lock: {} ({kind})", report.path));
    human.push_summary("agent", report.agent.clone());
    if let Some(expires_at) = report.expires_at {
        human.push_summary("expires", expires_at.to_rfc3339());
    }
    human.push_next_step(format!("fcoord release {}", report.path));

    emit_success(globals.output(), "lock", &report, Some(&human))
}

pub fn run_release(globals: &GlobalOptions, path: &str) -> Result<()> {
    let path = absolute_arg(path)?;
    let session = Session::open(globals)?;
    let released = session.service.release_file_lock(&path, &session.agent)?;

    let report = ReleaseReport {
        path: resource_key(&path)?,
        agent: session.agent.clone(),
        released,
    };

    let header = if released {
        format!("fcoord release: {}", report.path)
    } else {
        format!("fcoord release: nothing to release on {}", report.path)
    };
    let mut human = HumanOutput::new(header);
    if !released {
        human.push_warning(format!("{} holds no lock on {}", report.agent, report.path));
    }

    emit_success(globals.output(), "release", &report, Some(&human))
}
