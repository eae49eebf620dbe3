//! fcoord stats command implementation

use crate::cli::{GlobalOptions, Session};
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};

pub fn run(globals: &GlobalOptions) -> Result<()> {
    let session = Session::open(globals)?;
    let stats = session.service.get_conflict_stats();

    let mut human = HumanOutput::new("fcoord stats");
    human.push_summary("tracked files", stats.tracked_files.to_string());
    human.push_summary("active agents", stats.active_agents.to_string());
    human.push_summary("active locks", stats.active_locks.to_string());
    human.push_summary("active intents", stats.active_intents.to_string());

    emit_success(globals.output(), "stats", &stats, Some(&human))
}
