//! fcoord global command implementation
//!
//! Values are JSON; anything that does not parse as JSON is stored as a
//! string.

use serde::Serialize;

use crate::cli::{GlobalOptions, Session};
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};

#[derive(Serialize)]
struct GlobalReport {
    key: String,
    value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous: Option<serde_json::Value>,
}

pub fn run_set(globals: &GlobalOptions, key: &str, raw: &str) -> Result<()> {
    let value = parse_value(raw);
    let session = Session::open(globals)?;
    let previous = session.service.set_global(key, Some(value.clone()))?;

    let human = HumanOutput::new(format!("fcoord global set: {key} = {value}"));
    emit_success(
        globals.output(),
        "global set",
        &GlobalReport {
            key: key.to_string(),
            value: Some(value),
            previous,
        },
        Some(&human),
    )
}

pub fn run_get(globals: &GlobalOptions, key: &str) -> Result<()> {
    let session = Session::open(globals)?;
    let value = session.service.global(key);

    let header = match &value {
        Some(value) => format!("fcoord global: {key} = {value}"),
        None => format!("fcoord global: {key} is not set"),
    };
    emit_success(
        globals.output(),
        "global get",
        &GlobalReport {
            key: key.to_string(),
            value,
            previous: None,
        },
        Some(&HumanOutput::new(header)),
    )
}

pub fn run_unset(globals: &GlobalOptions, key: &str) -> Result<()> {
    let session = Session::open(globals)?;
    let previous = session.service.set_global(key, None)?;

    let human = HumanOutput::new(format!("fcoord global unset: {key}"));
    emit_success(
        globals.output(),
        "global unset",
        &GlobalReport {
            key: key.to_string(),
            value: None,
            previous,
        },
        Some(&human),
    )
}

fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
