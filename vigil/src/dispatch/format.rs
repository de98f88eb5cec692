// vigil/src/dispatch/format.rs
//
// Severity-keyed block formatting for outbound alerts.
//
// Color encoding is stable: Critical → red, High → orange, Medium →
// amber, Low → green. Unrecognized severities arrive as Medium from the
// lenient payload parse, so they render amber.

use serde_json::{json, Value};

use crate::events::{Alert, AlertSeverity};

pub const COLOR_RED:    &str = "#d32f2f";
pub const COLOR_ORANGE: &str = "#f57c00";
pub const COLOR_AMBER:  &str = "#ffc107";
pub const COLOR_GREEN:  &str = "#43a047";

pub fn severity_color(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Critical => COLOR_RED,
        AlertSeverity::High     => COLOR_ORANGE,
        AlertSeverity::Medium   => COLOR_AMBER,
        AlertSeverity::Low      => COLOR_GREEN,
    }
}

/// Header emoji keyed by alert-type category.
pub fn type_emoji(alert_type: &str) -> &'static str {
    let t = alert_type.to_lowercase();
    if t.contains("outbreak") {
        "🦠"
    } else if t.contains("hospital") {
        "🏥"
    } else if t.contains("compliance") || t.contains("audit") {
        "📋"
    } else if t.contains("conflict") || t.contains("data") {
        "🔀"
    } else if t.contains("retention") {
        "🗄️"
    } else {
        "🚨"
    }
}

/// Structured block message: header, body, location/timestamp context
/// row, and a metadata row only when metadata is non-empty.
#[derive(Debug, Clone)]
pub struct BlockMessage {
    pub color:   &'static str,
    pub header:  String,
    pub body:    String,
    pub context: String,
    pub fields:  Vec<(String, String)>,
}

impl BlockMessage {
    pub fn render(&self) -> Value {
        let mut blocks = vec![
            json!({ "type": "header",  "text": self.header }),
            json!({ "type": "section", "text": self.body }),
            json!({ "type": "context", "text": self.context }),
        ];
        if !self.fields.is_empty() {
            let fields: Vec<Value> = self
                .fields
                .iter()
                .map(|(k, v)| json!({ "label": k, "value": v }))
                .collect();
            blocks.push(json!({ "type": "fields", "fields": fields }));
        }
        json!({ "color": self.color, "blocks": blocks })
    }
}

pub fn format_alert(alert: &Alert) -> BlockMessage {
    let title = if alert.title.is_empty() { &alert.alert_type } else { &alert.title };
    BlockMessage {
        color:   severity_color(alert.severity),
        header:  format!("{} {} — {}", type_emoji(&alert.alert_type), alert.severity, title),
        body:    alert.message.clone(),
        context: format!(
            "{} · {}",
            alert.location,
            alert.timestamp.format("%Y-%m-%dT%H:%M:%SZ")
        ),
        fields: alert
            .metadata
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other            => other.to_string(),
                };
                (k.clone(), rendered)
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn alert(severity: AlertSeverity, metadata: BTreeMap<String, serde_json::Value>) -> Alert {
        Alert {
            alert_id:   "a1".to_string(),
            alert_type: "outbreak".to_string(),
            severity,
            title:      "Cholera cluster".to_string(),
            message:    "Three confirmed records in 24h".to_string(),
            location:   "Kisumu".to_string(),
            timestamp:  Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
            metadata,
        }
    }

    #[test]
    fn color_table_is_stable() {
        assert_eq!(severity_color(AlertSeverity::Critical), COLOR_RED);
        assert_eq!(severity_color(AlertSeverity::High), COLOR_ORANGE);
        assert_eq!(severity_color(AlertSeverity::Medium), COLOR_AMBER);
        assert_eq!(severity_color(AlertSeverity::Low), COLOR_GREEN);
    }

    #[test]
    fn header_keys_emoji_by_type() {
        let msg = format_alert(&alert(AlertSeverity::Critical, BTreeMap::new()));
        assert!(msg.header.starts_with("🦠"));
        assert!(msg.header.contains("CRITICAL"));
        assert!(msg.header.contains("Cholera cluster"));
    }

    #[test]
    fn metadata_row_only_when_non_empty() {
        let empty = format_alert(&alert(AlertSeverity::Low, BTreeMap::new())).render();
        assert_eq!(empty["blocks"].as_array().unwrap().len(), 3);

        let mut meta = BTreeMap::new();
        meta.insert("record_id".to_string(), json!("r-9"));
        let full = format_alert(&alert(AlertSeverity::Low, meta)).render();
        assert_eq!(full["blocks"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn context_row_carries_location_and_timestamp() {
        let msg = format_alert(&alert(AlertSeverity::Medium, BTreeMap::new()));
        assert_eq!(msg.context, "Kisumu · 2025-03-01T09:00:00Z");
    }
}
