use entity_events_connector::{
    config::{ConnectorConfig, EndpointConfig},
    endpoint::build_url,
    error::ConnectError,
    events::{parse_frame, ClientFrame},
    Credentials, Severity,
};
use serde_json::json;

fn endpoint(host: &str) -> EndpointConfig {
    EndpointConfig {
        host: host.to_string(),
        ..EndpointConfig::default()
    }
}

#[test]
fn test_plain_and_secure_schemes() {
    let plain = build_url(&endpoint("api.example.com:3000"), &Credentials::anonymous()).unwrap();
    assert_eq!(plain.as_str(), "ws://api.example.com:3000/ws");

    let secure = EndpointConfig {
        secure: true,
        ..endpoint("api.example.com")
    };
    let url = build_url(&secure, &Credentials::anonymous()).unwrap();
    assert_eq!(url.as_str(), "wss://api.example.com/ws");
}

#[test]
fn test_only_supplied_parameters_are_added() {
    let config = endpoint("api.example.com");

    let token_only = build_url(&config, &Credentials::new(Some("abc".to_string()), None)).unwrap();
    assert_eq!(token_only.query(), Some("token=abc"));

    let tenant_only = build_url(&config, &Credentials::new(None, Some("t-9".to_string()))).unwrap();
    assert_eq!(tenant_only.query(), Some("tenant_id=t-9"));

    let neither = build_url(&config, &Credentials::anonymous()).unwrap();
    assert_eq!(neither.query(), None);
}

#[test]
fn test_parameters_are_encoded() {
    let url = build_url(
        &endpoint("api.example.com"),
        &Credentials::new(Some("a b&c=d".to_string()), Some("tenant/1".to_string())),
    )
    .unwrap();

    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(
        pairs,
        vec![
            ("token".to_string(), "a b&c=d".to_string()),
            ("tenant_id".to_string(), "tenant/1".to_string()),
        ]
    );
}

#[test]
fn test_path_gets_a_leading_slash() {
    let config = EndpointConfig {
        path: "realtime/events".to_string(),
        ..endpoint("localhost:3000")
    };
    let url = build_url(&config, &Credentials::anonymous()).unwrap();
    assert_eq!(url.path(), "/realtime/events");
}

#[test]
fn test_invalid_hosts_are_rejected() {
    for host in ["", "  ", "not a host", "[::1"] {
        let result = build_url(&endpoint(host), &Credentials::anonymous());
        assert!(
            matches!(result, Err(ConnectError::InvalidEndpoint(_))),
            "host {:?} should be rejected",
            host
        );
    }
}

#[test]
fn test_credentials_debug_hides_token() {
    let credentials = Credentials::new(Some("secret-token".to_string()), Some("t-1".to_string()));
    let printed = format!("{:?}", credentials);
    assert!(!printed.contains("secret-token"));
    assert!(printed.contains("t-1"));
}

#[test]
fn test_control_frames_wire_format() {
    let subscribe = ClientFrame::Subscribe {
        event_type: "entity_created".to_string(),
    };
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&subscribe.to_json()).unwrap(),
        json!({"type": "subscribe", "eventType": "entity_created"})
    );
    let unsubscribe = ClientFrame::Unsubscribe {
        event_type: "*".to_string(),
    };
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&unsubscribe.to_json()).unwrap(),
        json!({"type": "unsubscribe", "eventType": "*"})
    );
    assert_eq!(ClientFrame::Ping.to_json(), r#"{"type":"ping"}"#);
}

#[test]
fn test_inbound_message_fields() {
    let message = parse_frame(
        r#"{
            "type": "user_notification",
            "data": {"title": "Hello"},
            "id": "n-1",
            "user": {"id": "u1"},
            "entity": {"id": "e1", "type": "company"},
            "tenant": {"id": "t1"},
            "severity": "warning",
            "description": "Check this out",
            "extra": true
        }"#,
    )
    .unwrap();

    assert_eq!(message.event_type, "user_notification");
    assert_eq!(message.data, json!({"title": "Hello"}));
    assert_eq!(message.id.as_deref(), Some("n-1"));
    assert_eq!(message.entity, Some(json!({"id": "e1", "type": "company"})));
    assert_eq!(message.severity, Some(Severity::Warning));
    assert_eq!(message.timestamp, None);

    let odd = parse_frame(r#"{"type":"x","severity":"critical"}"#).unwrap();
    assert_eq!(odd.severity, Some(Severity::Unknown));
}

#[test]
fn test_config_defaults() {
    let config = ConnectorConfig::default();
    assert_eq!(config.endpoint.path, "/ws");
    assert!(!config.endpoint.secure);
    assert_eq!(config.reconnect.max_attempts, 5);
    assert_eq!(config.reconnect.base_delay_ms, 1000);
    assert_eq!(config.heartbeat.interval_secs, 30);
}
