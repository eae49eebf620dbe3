//! fcoord intent command implementation
//!
//! Declaring reports overlaps with other agents' intents but never fails
//! because of them.

use serde::Serialize;

use crate::cli::{absolute_arg, GlobalOptions, Session};
use crate::config::parse_duration;
use crate::conflict::ConflictDetection;
use crate::error::Result;
use crate::intent::AgentIntent;
use crate::output::{emit_success, HumanOutput};

/// Options for `fcoord intent declare`
pub struct DeclareOptions {
    pub targets: Vec<String>,
    pub description: String,
    pub priority: u8,
    pub duration: Option<String>,
    pub depends_on: Vec<String>,
}

#[derive(Serialize)]
struct DeclareReport {
    intent: AgentIntent,
    conflicts: Vec<ConflictDetection>,
}

#[derive(Serialize)]
struct WithdrawReport {
    agent: String,
    withdrawn: bool,
}

#[derive(Serialize)]
struct ListReport {
    intents: Vec<AgentIntent>,
}

pub fn run_declare(globals: &GlobalOptions, options: DeclareOptions) -> Result<()> {
    let estimated = match options.duration.as_deref() {
        Some(raw) => parse_duration(raw)?.num_seconds().max(0) as u64,
        None => 0,
    };

    let targets = options
        .targets
        .iter()
        .map(|target| absolute_arg(target))
        .collect::<Result<Vec<_>>>()?;

    let session = Session::open(globals)?;
    let mut builder = AgentIntent::builder(session.agent.clone())
        .description(options.description)
        .targets(targets)
        .priority(options.priority)
        .estimated_duration(estimated);
    for dependency in options.depends_on {
        builder = builder.depends_on(dependency);
    }
    let intent = builder.build()?;
    let conflicts = session.service.declare_intent(intent.clone())?;

    let mut human = HumanOutput::new(format!(
        "fcoord intent declare: {} target(s)",
        intent.target_resources.len()
    ));
    human.push_summary("agent", intent.agent_id.clone());
    if !intent.description.is_empty() {
        human.push_summary("description", intent.description.clone());
    }
    for target in &intent.target_resources {
        human.push_detail(target.clone());
    }
    for conflict in &conflicts {
        human.push_warning(conflict.description.clone());
    }
    if !conflicts.is_empty() {
        human.push_next_step("fcoord coordinate <path> --operation <op>");
    }

    emit_success(
        globals.output(),
        "intent declare",
        &DeclareReport { intent, conflicts },
        Some(&human),
    )
}

pub fn run_withdraw(globals: &GlobalOptions) -> Result<()> {
    let session = Session::open(globals)?;
    let withdrawn = session.service.withdraw_intent(&session.agent)?;

    let header = if withdrawn {
        format!("fcoord intent withdraw: {}", session.agent)
    } else {
        format!("fcoord intent withdraw: {} had no intent", session.agent)
    };
    let human = HumanOutput::new(header);

    emit_success(
        globals.output(),
        "intent withdraw",
        &WithdrawReport {
            agent: session.agent.clone(),
            withdrawn,
        },
        Some(&human),
    )
}

pub fn run_list(globals: &GlobalOptions) -> Result<()> {
    let session = Session::open(globals)?;
    let intents = session.service.intents();

    let mut human = HumanOutput::new(format!("fcoord intent ls: {} active", intents.len()));
    for intent in &intents {
        let mut line = format!("{}: {}", intent.agent_id, intent.target_resources.join(", "));
        if !intent.description.is_empty() {
            line.push_str(&format!(" ({})", intent.description));
        }
        human.push_detail(line);
    }

    emit_success(globals.output(), "intent ls", &ListReport { intents }, Some(&human))
}
