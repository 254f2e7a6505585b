use chrono::{TimeZone, Utc};
use entity_events_connector::{feed::BufferedUpdate, events::parse_frame, Update};
use entity_events_watch::{
    cli::RunCmd,
    config::{load_config, BatchSettings},
    load_config_from_cli,
    output::render,
};
use serde_json::json;
use std::{io::Write, time::Duration};
use tempfile::NamedTempFile;

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_file_settings_are_loaded() -> anyhow::Result<()> {
    let file = toml_file(
        r#"
        [connector.endpoint]
        host = "api.example.com:8443"
        secure = true

        [connector.reconnect]
        max-attempts = 8

        [watch]
        event-types = ["entity_created", "entity_updated"]
        tenant-id = "t-1"
        throttle-ms = 250

        [watch.filters]
        entityType = "company"

        [watch.log]
        level = "debug"
        format = "json"
        "#,
    );

    let config = load_config(file.path().to_str())?;

    assert_eq!(config.connector.endpoint.host, "api.example.com:8443");
    assert!(config.connector.endpoint.secure);
    assert_eq!(config.connector.reconnect.max_attempts, 8);
    assert_eq!(config.connector.reconnect.base_delay_ms, 1000);
    assert_eq!(config.watch.event_types, vec!["entity_created", "entity_updated"]);
    assert_eq!(config.watch.tenant_id.as_deref(), Some("t-1"));
    assert_eq!(config.watch.log.level, "debug");

    let policy = config.watch.update_policy()?;
    assert_eq!(policy.throttle, Duration::from_millis(250));
    assert!(policy.selective_updates);
    assert_eq!(policy.update_filters.len(), 1);
    assert_eq!(policy.interval, Duration::from_millis(5000));
    Ok(())
}

#[test]
fn test_defaults_watch_everything() -> anyhow::Result<()> {
    let file = toml_file("");
    let config = load_config(file.path().to_str())?;

    assert_eq!(config.watch.event_types, vec!["*"]);
    assert_eq!(config.connector.endpoint.path, "/ws");
    assert_eq!(config.watch.batch, None);
    assert!(!config.watch.update_policy()?.selective_updates);
    Ok(())
}

#[test]
fn test_command_line_overrides_file() -> anyhow::Result<()> {
    let file = toml_file(
        r#"
        [watch]
        event-types = ["entity_deleted"]
        token = "from-file"
        "#,
    );
    let cmd = RunCmd {
        config: file.path().to_str().map(str::to_string),
        token: Some("from-cli".to_string()),
        events: vec!["user_notification".to_string()],
        batch_size: Some(25),
        ..RunCmd::default()
    };

    let config = load_config_from_cli(&cmd)?;

    assert_eq!(config.watch.token.as_deref(), Some("from-cli"));
    assert_eq!(config.watch.event_types, vec!["user_notification"]);
    assert_eq!(
        config.watch.batch,
        Some(BatchSettings {
            size: 25,
            timeout_ms: 1000
        })
    );
    assert_eq!(config.watch.credentials().token.as_deref(), Some("from-cli"));
    Ok(())
}

#[test]
fn test_environment_reaches_multi_word_keys() -> anyhow::Result<()> {
    let file = toml_file(
        r#"
        [connector.reconnect]
        max-jitter-ms = 250
        "#,
    );
    // Only keys no other test in this binary asserts on.
    std::env::set_var("ENTITY_EVENTS__CONNECTOR__ENDPOINT__CONNECT_TIMEOUT_MS", "2500");
    std::env::set_var("ENTITY_EVENTS__CONNECTOR__HEARTBEAT__INTERVAL_SECS", "7");

    let config = load_config(file.path().to_str());
    std::env::remove_var("ENTITY_EVENTS__CONNECTOR__ENDPOINT__CONNECT_TIMEOUT_MS");
    std::env::remove_var("ENTITY_EVENTS__CONNECTOR__HEARTBEAT__INTERVAL_SECS");
    let config = config?;

    assert_eq!(config.connector.endpoint.connect_timeout_ms, 2500);
    assert_eq!(config.connector.heartbeat.interval_secs, 7);
    assert_eq!(config.connector.reconnect.max_jitter_ms, 250);
    Ok(())
}

#[test]
fn test_throttle_with_batch_is_rejected() {
    let file = toml_file(
        r#"
        [watch]
        throttle-ms = 100

        [watch.batch]
        size = 5
        "#,
    );
    let config = load_config(file.path().to_str()).unwrap();
    assert!(config.watch.update_policy().is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(load_config(Some("/definitely/not/here.toml")).is_err());
}

#[test]
fn test_token_is_not_printed() {
    let file = toml_file(
        r#"
        [watch]
        token = "super-secret"
        "#,
    );
    let config = load_config(file.path().to_str()).unwrap();
    assert!(!format!("{:?}", config).contains("super-secret"));
}

#[test]
fn test_render_updates() {
    let message = parse_frame(r#"{"type":"entity_created","data":{"id":"e1"},"timestamp":17}"#).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let single = render(
        &Update::Single {
            data: message.data.clone(),
            message: message.clone(),
        },
        now,
    );
    assert_eq!(
        single,
        json!({"type": "entity_created", "data": {"id": "e1"}, "timestamp": 17})
    );

    let batch = render(
        &Update::Batch(vec![BufferedUpdate {
            data: message.data.clone(),
            message,
            received_at: now,
        }]),
        now,
    );
    assert_eq!(batch["batch"][0]["type"], "entity_created");
    assert_eq!(batch["batch"][0]["receivedAt"], "2024-05-01T12:00:00.000Z");

    assert_eq!(
        render(&Update::Poll, now),
        json!({"poll": "2024-05-01T12:00:00.000Z"})
    );
}
