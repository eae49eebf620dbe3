//! fcoord send/inbox/respond command implementation

use serde::Serialize;

use crate::bus::{AgentMessage, MessageKind, Payload};
use crate::cli::{absolute_arg, GlobalOptions, Session};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::paths::resource_key;

/// Options for `fcoord send`
pub struct SendOptions {
    pub to: String,
    pub kind: String,
    pub text: Option<String>,
    pub data: Option<String>,
}

#[derive(Serialize)]
struct SendReport {
    message: AgentMessage,
}

#[derive(Serialize)]
struct InboxReport {
    agent: String,
    messages: Vec<AgentMessage>,
}

pub fn run_send(globals: &GlobalOptions, options: SendOptions) -> Result<()> {
    let kind: MessageKind = options.kind.parse()?;
    let payload = match (options.text, options.data) {
        (_, Some(raw)) => Payload::Data(serde_json::from_str(&raw).map_err(|err| {
            Error::InvalidArgument(format!("--data is not valid JSON: {err}"))
        })?),
        (Some(text), None) => Payload::Text(text),
        (None, None) => {
            return Err(Error::InvalidArgument(
                "send needs --text or --data".to_string(),
            ))
        }
    };

    let session = Session::open(globals)?;
    let message = session
        .service
        .send_message(&session.agent, options.to.as_str(), kind, payload)?;

    let mut human = HumanOutput::new(format!("fcoord send: {} -> {}", message.from, message.to));
    human.push_summary("kind", message.kind.to_string());
    human.push_summary("id", message.id.to_string());
    if !message.to.is_broadcast() && !session.service.is_registered(&options.to) {
        human.push_warning(format!("{} is not registered; message dropped", options.to));
    }

    emit_success(globals.output(), "send", &SendReport { message }, Some(&human))
}

pub fn run_inbox(globals: &GlobalOptions) -> Result<()> {
    let session = Session::open(globals)?;
    if !session.service.is_registered(&session.agent) {
        return Err(Error::AgentNotRegistered(session.agent.clone()));
    }
    let messages = session.service.get_messages(&session.agent)?;

    let mut human = HumanOutput::new(format!(
        "fcoord inbox: {} message(s) for {}",
        messages.len(),
        session.agent
    ));
    for message in &messages {
        human.push_detail(format!(
            "[{}] {} from {}: {}",
            message.sent_at.format("%H:%M:%S"),
            message.kind,
            message.from,
            describe(&message.payload)
        ));
        if let Payload::CoordinationRequest { path, .. } = &message.payload {
            human.push_next_step(format!(
                "fcoord respond {} {} --approve|--deny",
                message.from, path
            ));
        }
    }

    emit_success(
        globals.output(),
        "inbox",
        &InboxReport {
            agent: session.agent.clone(),
            messages,
        },
        Some(&human),
    )
}

pub fn run_respond(globals: &GlobalOptions, to: &str, path: &str, approved: bool) -> Result<()> {
    let path = absolute_arg(path)?;
    let session = Session::open(globals)?;
    let message = session
        .service
        .respond_to_coordination(&session.agent, to, &path, approved)?;

    let verdict = if approved { "approved" } else { "denied" };
    let mut human = HumanOutput::new(format!(
        "fcoord respond: {verdict} {} for {to}",
        resource_key(&path)?
    ));
    human.push_summary("id", message.id.to_string());

    emit_success(globals.output(), "respond", &SendReport { message }, Some(&human))
}

fn describe(payload: &Payload) -> String {
    match payload {
        Payload::LockAcquired { path, kind } => format!("{kind} lock acquired on {path}"),
        Payload::LockReleased { path } => format!("lock released on {path}"),
        Payload::CoordinationRequest {
            path,
            operation,
            conflicts,
        } => format!(
            "asks to {operation} {path} ({} conflict(s))",
            conflicts.len()
        ),
        Payload::CoordinationResponse { path, approved } => {
            let verdict = if *approved { "approved" } else { "denied" };
            format!("{verdict} access to {path}")
        }
        Payload::ConflictNotice { conflict } => conflict.description.clone(),
        Payload::Text(text) => text.clone(),
        Payload::Data(value) => value.to_string(),
    }
}
