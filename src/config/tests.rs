use super::load_config;
use super::settings::Settings;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.broker.ack_deadline_secs, 10);
    assert_eq!(settings.broker.max_delivery_attempts, 5);
    assert_eq!(settings.broker.push_max_outstanding, 10);
    assert_eq!(settings.demo.events, 15);
    assert!((settings.demo.failure_rate - 0.4).abs() < f64::EPSILON);
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    // load_config reads config/default.toml relative to the working directory
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [broker]
        ack_deadline_secs = 30
        max_delivery_attempts = 3

        [demo]
        failure_rate = 0.1
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");
    let cfg = cfg.expect("load_config failed");

    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.broker.ack_deadline_secs, 30);
    assert_eq!(cfg.broker.max_delivery_attempts, 3);
    // untouched keys keep their defaults
    assert_eq!(cfg.broker.push_max_outstanding, 10);
    assert_eq!(cfg.demo.events, 15);
    assert!((cfg.demo.failure_rate - 0.1).abs() < f64::EPSILON);
}

#[test]
#[serial]
fn test_load_config_from_environment() {
    temp_env::with_vars(
        [
            ("ACKBUS__SERVER__PORT", Some("7070")),
            ("ACKBUS__BROKER__PUSH_MAX_OUTSTANDING", Some("2")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.server.port, 7070);
            assert_eq!(cfg.broker.push_max_outstanding, 2);
            assert_eq!(cfg.server.host, "127.0.0.1");
        },
    );
}
