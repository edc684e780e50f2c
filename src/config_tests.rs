use super::*;
use std::io::Write;

#[test]
fn test_default_config_validates() {
    let config = DaemonConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.service_name, "PerfStatRemoteHost");
    assert_eq!(config.registry_port, 1099);
    assert!(config.auto_create_registry);
    assert_eq!(config.session_lease(), Duration::from_secs(600));
}

#[test]
fn test_empty_yaml_gives_defaults() {
    let config = DaemonConfig::from_yaml("{}").unwrap();
    assert_eq!(config, DaemonConfig::default());
}

#[test]
fn test_partial_yaml_overrides_fields() {
    let yaml = r#"
service_name: "//:2020/Custom"
auto_create_registry: false
session_port: 7000
bind_address: "127.0.0.1"
advertise_host: "perf.example"
perfdata_root: "/var/tmp"
log_level: debug
log_format: json
"#;
    let config = DaemonConfig::from_yaml(yaml).unwrap();

    assert_eq!(config.service_name, "//:2020/Custom");
    assert!(!config.auto_create_registry);
    assert_eq!(config.session_port, 7000);
    assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(config.advertised_host(), "perf.example");
    assert_eq!(config.perfdata_root(), PathBuf::from("/var/tmp"));
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(config.registry_port, 1099);
}

#[test]
fn test_unknown_keys_are_rejected() {
    let err = DaemonConfig::from_yaml("registry_prot: 1100\n").unwrap_err();
    assert!(format!("{:#}", err).contains("registry_prot"));
}

#[test]
fn test_validation_failures() {
    assert!(DaemonConfig::from_yaml("service_name: \"  \"\n").is_err());
    assert!(DaemonConfig::from_yaml("poll_interval_ms: 0\n").is_err());
    assert!(DaemonConfig::from_yaml("registry_port: 0\n").is_err());
}

#[test]
fn test_advertised_host_defaults_to_hostname() {
    let config = DaemonConfig::default();
    assert!(!config.advertised_host().is_empty());
}

#[test]
fn test_bootstrap_config_mirrors_fields() {
    let config = DaemonConfig {
        registry_host: "10.0.0.1".to_string(),
        registry_port: 2099,
        auto_create_registry: false,
        ..Default::default()
    };

    let bootstrap = config.bootstrap_config();
    assert_eq!(bootstrap.registry_host, "10.0.0.1");
    assert_eq!(bootstrap.registry_port, 2099);
    assert!(!bootstrap.auto_create_registry);
}

#[test]
fn test_load_explicit_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "poll_interval_ms: 250").unwrap();

    let config = DaemonConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.poll_interval(), Duration::from_millis(250));
}

#[test]
fn test_load_missing_explicit_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DaemonConfig::load(Some(&dir.path().join("absent.yaml"))).is_err());
}
