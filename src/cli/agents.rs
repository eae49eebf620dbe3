//! fcoord agent command implementation
//!
//! Registration, unregistration and identity display.

use serde::Serialize;

use crate::cli::{GlobalOptions, Session};
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};

#[derive(Serialize)]
struct RegisterReport {
    agent: String,
    registered: bool,
    already_registered: bool,
}

#[derive(Serialize)]
struct UnregisterReport {
    agent: String,
    unregistered: bool,
    released_locks: Vec<String>,
}

#[derive(Serialize)]
struct ShowReport {
    agent: String,
    registered: bool,
    pending_messages: usize,
    locks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    intent: Option<String>,
}

#[derive(Serialize)]
struct ListReport {
    agents: Vec<String>,
}

pub fn run_register(globals: &GlobalOptions) -> Result<()> {
    let session = Session::open(globals)?;
    let added = session.service.register_agent(&session.agent)?;

    let report = RegisterReport {
        agent: session.agent.clone(),
        registered: true,
        already_registered: !added,
    };

    let header = if added {
        format!("fcoord agent register: {}", session.agent)
    } else {
        format!("fcoord agent register: {} (already registered)", session.agent)
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("agent", session.agent.clone());
    human.push_summary("state", session.settings.state_dir.display().to_string());
    if session.agent == "unknown" {
        human.push_warning("agent not set; pass --agent or set FCOORD_AGENT");
    }
    human.push_next_step("fcoord intent declare <targets> --description \"...\"");

    emit_success(globals.output(), "agent register", &report, Some(&human))
}

pub fn run_unregister(globals: &GlobalOptions) -> Result<()> {
    let session = Session::open(globals)?;
    let released_locks: Vec<String> = session
        .service
        .files()
        .into_iter()
        .filter(|file| file.is_held_by(&session.agent))
        .map(|file| file.path)
        .collect();
    let removed = session.service.unregister_agent(&session.agent)?;

    let report = UnregisterReport {
        agent: session.agent.clone(),
        unregistered: removed,
        released_locks: released_locks.clone(),
    };

    let header = if removed {
        format!("fcoord agent unregister: {}", session.agent)
    } else {
        format!("fcoord agent unregister: {} was not registered", session.agent)
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("released locks", released_locks.len().to_string());
    for path in released_locks {
        human.push_detail(path);
    }

    emit_success(globals.output(), "agent unregister", &report, Some(&human))
}

pub fn run_show(globals: &GlobalOptions) -> Result<()> {
    let session = Session::open(globals)?;
    let service = &session.service;
    let agent = session.agent.clone();

    let locks: Vec<String> = service
        .files()
        .into_iter()
        .filter(|file| file.is_held_by(&agent))
        .map(|file| format!("{} ({})", file.path, file.lock_status))
        .collect();
    let intent = service
        .intents()
        .into_iter()
        .find(|intent| intent.agent_id == agent)
        .map(|intent| intent.target_resources.join(", "));

    let report = ShowReport {
        agent: agent.clone(),
        registered: service.is_registered(&agent),
        pending_messages: service.pending_messages(&agent),
        locks: locks.clone(),
        intent: intent.clone(),
    };

    let mut human = HumanOutput::new(format!("fcoord agent: {agent}"));
    human.push_summary("registered", report.registered.to_string());
    human.push_summary("pending messages", report.pending_messages.to_string());
    if let Some(intent) = intent {
        human.push_summary("intent", intent);
    }
    for lock in locks {
        human.push_detail(lock);
    }
    if !report.registered {
        human.push_next_step("fcoord agent register");
    } else if report.pending_messages > 0 {
        human.push_next_step("fcoord inbox");
    }

    emit_success(globals.output(), "agent show", &report, Some(&human))
}

pub fn run_list(globals: &GlobalOptions) -> Result<()> {
    let session = Session::open(globals)?;
    let agents = session.service.agents();

    let mut human = HumanOutput::new(format!("fcoord agent ls: {} registered", agents.len()));
    for agent in &agents {
        human.push_detail(agent.clone());
    }

    emit_success(
        globals.output(),
        "agent ls",
        &ListReport { agents },
        Some(&human),
    )
}
