//! fcoord init command implementation
//!
//! Writes a default `.fcoord.toml` and creates the state directory so that
//! every agent started below the project root shares one coordination state.

use std::path::{Path, PathBuf};

use crate::cli::GlobalOptions;
use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};

#[derive(serde::Serialize)]
struct InitReport {
    root: PathBuf,
    config: PathBuf,
    state_dir: PathBuf,
    created: InitCreated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    state_dir: bool,
}

pub fn run(globals: &GlobalOptions, dir: Option<PathBuf>) -> Result<()> {
    let root = match dir {
        Some(path) => std::path::absolute(path)?,
        None => std::env::current_dir()?,
    };
    if !root.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let config_path = root.join(CONFIG_FILE);
    let (config, created_config) = ensure_config(&config_path)?;

    let state_dir = match &globals.state_dir {
        Some(state_dir) => state_dir.clone(),
        None => config.settings(&root)?.state_dir,
    };
    let created_state_dir = ensure_dir(&state_dir)?;

    let report = InitReport {
        root: root.clone(),
        config: config_path,
        state_dir: state_dir.clone(),
        created: InitCreated {
            config: created_config,
            state_dir: created_state_dir,
        },
    };

    let mut created = Vec::new();
    if created_config {
        created.push(CONFIG_FILE.to_string());
    }
    if created_state_dir {
        created.push(state_dir.display().to_string());
    }

    let header = if created.is_empty() {
        "fcoord init: nothing to do".to_string()
    } else {
        "fcoord init: initialized project".to_string()
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("root", root.display().to_string());
    human.push_summary(
        "created",
        if created.is_empty() {
            "none".to_string()
        } else {
            created.join(", ")
        },
    );
    human.push_next_step("fcoord --agent <name> agent register");

    emit_success(globals.output(), "init", &report, Some(&human))
}

/// Load an existing config or write the defaults. Returns whether it was written.
fn ensure_config(path: &Path) -> Result<(Config, bool)> {
    if path.exists() {
        if !path.is_file() {
            return Err(Error::OperationFailed(format!(
                "{} exists but is not a file",
                path.display()
            )));
        }
        return Ok((Config::load(path)?, false));
    }
    let config = Config::default();
    config.save(path)?;
    Ok((config, true))
}

fn ensure_dir(path: &Path) -> Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    std::fs::create_dir_all(path)?;
    Ok(true)
}
