use std::io::Write;

use swarm_config::{load_config, SwarmConfig};
use swarm_domain::types::{MigrationStrategy, ProviderType};

#[test]
fn load_config_merges_onto_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
general:
  stateDir: /tmp/swarm-state
  defaultProviderType: flyio
healthMonitor:
  checkIntervalMs: 15000
migration:
  defaultStrategy: create_then_stop
"#
    )
    .unwrap();

    let config = load_config(file.path()).expect("should load");
    assert_eq!(config.general.state_dir, std::path::PathBuf::from("/tmp/swarm-state"));
    assert_eq!(config.general.default_provider_type, ProviderType::Flyio);
    assert_eq!(config.health_monitor.check_interval_ms, 15000);
    assert_eq!(config.migration.default_strategy, MigrationStrategy::CreateThenStop);
    // Fields absent from the file keep their defaults.
    assert_eq!(config.health_monitor.history_size, 10);
    assert!(config.general.load_state_on_startup);
}

#[test]
fn missing_file_returns_error() {
    let result = load_config(std::path::Path::new("/nonexistent/path/does/not/exist.yml"));
    assert!(result.is_err());
}

#[test]
fn empty_mapping_yields_default_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{{}}").unwrap();
    let config = load_config(file.path()).expect("empty mapping is a valid no-op override");
    assert_eq!(config, SwarmConfig::default());
}
