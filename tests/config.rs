use std::fs;
use std::time::Duration;

use fcoord::config::{Config, CONFIG_FILE};

#[test]
fn config_defaults_when_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::load_from_dir(dir.path());

    assert_eq!(config.coordination.lease_ttl, "5m");
    assert_eq!(config.coordination.coordination_timeout, "10s");
    assert_eq!(config.storage.state_dir, ".fcoord");
    assert_eq!(config.agent.default, "unknown");
}

#[test]
fn config_overrides_from_toml() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let toml = r#"
[coordination]
lease_ttl = "2m"
coordination_timeout = "3s"
poll_interval = "250ms"

[storage]
state_dir = "var/coord"
lock_timeout_ms = 750

[agent]
default = "builder-1"
"#;
    fs::write(dir.path().join(CONFIG_FILE), toml)?;

    let config = Config::load_from_dir(dir.path());
    assert_eq!(config.agent.default, "builder-1");

    let settings = config.settings(dir.path())?;
    assert_eq!(settings.lease_ttl, chrono::Duration::minutes(2));
    assert_eq!(settings.coordination_timeout, Duration::from_secs(3));
    assert_eq!(settings.poll_interval, Duration::from_millis(250));
    assert_eq!(settings.sync_interval, Duration::from_secs(5));
    assert_eq!(settings.state_dir, dir.path().join("var/coord"));
    assert_eq!(settings.backup_dir, dir.path().join("var/coord").join("backups"));
    assert_eq!(settings.lock_timeout_ms, 750);
    Ok(())
}

#[test]
fn invalid_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join(CONFIG_FILE),
        "[coordination]\nlease_ttl = \"forever\"\n",
    )
    .expect("write invalid config");

    let config = Config::load_from_dir(dir.path());
    assert_eq!(config.coordination.lease_ttl, "5m");
}

#[test]
fn invalid_config_is_a_user_error_when_loaded_directly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(CONFIG_FILE);
    fs::write(&path, "[agent]\ndefault = \"  \"\n").expect("write invalid config");

    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, fcoord::Error::InvalidConfig(_)));
    assert_eq!(err.exit_code(), 2);
}
