//! fcoord track/untrack command implementation

use serde::Serialize;

use crate::cli::{absolute_arg, GlobalOptions, Session};
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};
use crate::registry::FileState;

#[derive(Serialize)]
struct TrackReport {
    tracked: Vec<FileState>,
}

#[derive(Serialize)]
struct UntrackReport {
    untracked: Vec<String>,
    not_tracked: Vec<String>,
}

pub fn run_track(globals: &GlobalOptions, paths: Vec<String>) -> Result<()> {
    let session = Session::open(globals)?;
    let mut tracked = Vec::new();
    for path in &paths {
        let path = absolute_arg(path)?;
        tracked.push(session.service.track_file(&path, &session.agent)?);
    }

    let mut human = HumanOutput::new(format!("fcoord track: {} file(s)", tracked.len()));
    for file in &tracked {
        let hash = if file.content_hash.is_empty() {
            "absent".to_string()
        } else {
            file.content_hash.chars().take(12).collect()
        };
        human.push_detail(format!("{} v{} {}", file.path, file.version, hash));
    }
    human.push_next_step("fcoord lock <path> --kind write");

    emit_success(globals.output(), "track", &TrackReport { tracked }, Some(&human))
}

pub fn run_untrack(globals: &GlobalOptions, paths: Vec<String>) -> Result<()> {
    let session = Session::open(globals)?;
    let mut untracked = Vec::new();
    let mut not_tracked = Vec::new();
    for path in paths {
        let path = absolute_arg(&path)?;
        if session.service.untrack_file(&path)? {
            untracked.push(path);
        } else {
            not_tracked.push(path);
        }
    }

    let mut human = HumanOutput::new(format!("fcoord untrack: {} file(s)", untracked.len()));
    for path in &untracked {
        human.push_detail(path.clone());
    }
    for path in &not_tracked {
        human.push_warning(format!("{path} was not tracked"));
    }

    emit_success(
        globals.output(),
        "untrack",
        &UntrackReport {
            untracked,
            not_tracked,
        },
        Some(&human),
    )
}
