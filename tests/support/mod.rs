#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_cmd::Command;
use fcoord::config::Settings;
use fcoord::CoordinationService;
use tempfile::TempDir;

/// A scratch project directory with its own fcoord state directory.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::in_dir(self.state_dir());
        settings.coordination_timeout = Duration::from_millis(300);
        settings.poll_interval = Duration::from_millis(20);
        settings.sync_interval = Duration::from_millis(50);
        settings
    }

    /// A service persisted under this project's state directory.
    pub fn service(&self) -> CoordinationService {
        CoordinationService::open(self.settings()).expect("open service")
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> String {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path.to_string_lossy().into_owned()
    }

    /// `fcoord` invocation acting as `agent` against this project's state.
    pub fn fcoord(&self, agent: &str) -> Command {
        let mut cmd = Command::cargo_bin("fcoord").expect("binary");
        cmd.current_dir(self.dir.path())
            .env_remove("FCOORD_STATE_DIR")
            .env_remove("FCOORD_AGENT")
            .env_remove("RUST_LOG")
            .arg("--state-dir")
            .arg(self.state_dir())
            .arg("--agent")
            .arg(agent);
        cmd
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
