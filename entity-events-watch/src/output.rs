use chrono::{DateTime, SecondsFormat, Utc};
use entity_events_connector::{feed::BufferedUpdate, InboundMessage, Update};
use serde_json::{json, Value};
use std::io::{self, Write};

/// Renders one feed delivery as the JSON object printed on stdout.
pub fn render(update: &Update, now: DateTime<Utc>) -> Value {
    match update {
        Update::Single { message, .. } => message_json(message),
        Update::Batch(items) => json!({
            "batch": items.iter().map(buffered_json).collect::<Vec<_>>(),
        }),
        Update::Poll => json!({ "poll": now.to_rfc3339_opts(SecondsFormat::Millis, true) }),
    }
}

fn message_json(message: &InboundMessage) -> Value {
    serde_json::to_value(message).unwrap_or_else(|_| json!({ "type": message.event_type }))
}

fn buffered_json(item: &BufferedUpdate) -> Value {
    let mut value = message_json(&item.message);
    if let Value::Object(fields) = &mut value {
        fields.insert(
            "receivedAt".to_string(),
            Value::String(item.received_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    value
}

/// Prints `update` as a single line on stdout.
pub fn print_update(update: Update) {
    let line = render(&update, Utc::now());
    let mut stdout = io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{}", line) {
        tracing::warn!("Failed to write update: {}", e);
    }
}
