// vigil/src/dispatch/mod.rs
//
// Alert Distributor — validate, format, fan out, report per-channel.
//
// The distributor owns no durable state: a dedup map for alert-id
// idempotence and a bounded delivery log, nothing else. A channel
// failure never prevents the remaining channels from being attempted;
// retries belong to the broker (at-least-once delivery upstream).

pub mod channels;
pub mod format;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::{Result, VigilError};
use crate::events::{parse_timestamp, Alert, AlertSeverity, DEFAULT_LOCATION};
use self::format::BlockMessage;

/// Metadata keys that would carry a direct subject identifier. Payloads
/// using any of these are rejected before a single channel is touched.
pub const RESERVED_IDENTIFIER_KEYS: &[&str] = &[
    "subject_id",
    "subject_name",
    "patient_id",
    "patient_name",
    "national_id",
    "passport_no",
    "phone_number",
    "dob",
];

const DELIVERY_LOG_CAP: usize = 512;

// ── Broker payload ────────────────────────────────────────────────────────────

/// Alert message as it arrives off the topic. Unknown fields pass
/// through opaquely into metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAlertMessage {
    pub alert_type: Option<String>,
    pub severity:   Option<String>,
    pub title:      Option<String>,
    pub message:    Option<String>,
    pub location:   Option<String>,
    pub timestamp:  Option<Value>,
    pub alert_id:   Option<String>,
    pub metadata:   Option<BTreeMap<String, Value>>,
    #[serde(flatten)]
    pub extra:      BTreeMap<String, Value>,
}

impl RawAlertMessage {
    /// Validate into a dispatchable Alert. Missing `alert_type` or
    /// `message`, or a reserved identifier key in the metadata, is a
    /// `Validation` error with no side effect.
    pub fn validate(self) -> Result<Alert> {
        let alert_type = self
            .alert_type
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| VigilError::Validation("alert_type is required".into()))?;
        let message = self
            .message
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| VigilError::Validation("message is required".into()))?;

        let mut metadata = self.metadata.unwrap_or_default();
        for (k, v) in self.extra {
            metadata.entry(k).or_insert(v);
        }
        for key in metadata.keys() {
            if RESERVED_IDENTIFIER_KEYS.contains(&key.to_lowercase().as_str()) {
                return Err(VigilError::Validation(format!(
                    "metadata key {key} is a direct subject identifier"
                )));
            }
        }

        let timestamp = match self.timestamp {
            Some(raw) => parse_timestamp(&raw)?,
            None => Utc::now(),
        };

        Ok(Alert {
            alert_id:   self.alert_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            severity:   AlertSeverity::parse(self.severity.as_deref()),
            title:      self.title.unwrap_or_else(|| alert_type.clone()),
            alert_type,
            message,
            location:   self.location.unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            timestamp,
            metadata,
        })
    }
}

// ── Channel contract ──────────────────────────────────────────────────────────

#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn id(&self) -> &str;

    fn enabled(&self) -> bool {
        true
    }

    /// Channels that are idempotent at the alert-id level opt into the
    /// dedup window.
    fn dedup(&self) -> bool {
        false
    }

    async fn deliver(&self, alert: &Alert, message: &BlockMessage) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub alert_id: String,
    pub channel:  String,
    pub ok:       bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:    Option<String>,
    #[serde(with = "crate::events::iso8601")]
    pub at:       DateTime<Utc>,
}

// ── Distributor ───────────────────────────────────────────────────────────────

pub struct Distributor {
    channels:     Vec<Arc<dyn AlertChannel>>,
    config:       DispatchConfig,
    recent:       DashMap<String, DateTime<Utc>>, // alert_id → first dispatch
    delivery_log: Mutex<VecDeque<DeliveryRecord>>,
}

impl Distributor {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            channels:     Vec::new(),
            config,
            recent:       DashMap::new(),
            delivery_log: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Validate a raw broker payload and dispatch it. Validation errors
    /// surface before any channel is invoked.
    pub async fn dispatch_raw(&self, payload: &Value) -> Result<BTreeMap<String, bool>> {
        let raw: RawAlertMessage = serde_json::from_value(payload.clone())
            .map_err(|e| VigilError::Validation(format!("alert payload: {e}")))?;
        let alert = raw.validate()?;
        Ok(self.dispatch(&alert).await)
    }

    /// Fan one alert out to every enabled channel. One attempt per
    /// channel under the configured timeout; the per-channel map is the
    /// whole story — an all-false map is a complete failure, but the
    /// call itself never errors on transport.
    pub async fn dispatch(&self, alert: &Alert) -> BTreeMap<String, bool> {
        let message = format::format_alert(alert);
        let timeout = std::time::Duration::from_secs(self.config.channel_timeout_seconds);
        let mut results = BTreeMap::new();

        for channel in &self.channels {
            if !channel.enabled() {
                continue;
            }

            let (ok, error) = if channel.dedup() && self.recently_dispatched(&alert.alert_id) {
                debug!(alert = %alert.alert_id, channel = channel.id(), "dedup window hit");
                (true, None)
            } else {
                match tokio::time::timeout(timeout, channel.deliver(alert, &message)).await {
                    Ok(Ok(())) => (true, None),
                    Ok(Err(e)) => {
                        warn!(channel = channel.id(), "delivery failed: {e}");
                        (false, Some(e.to_string()))
                    }
                    Err(_elapsed) => {
                        warn!(channel = channel.id(), "delivery timed out");
                        (false, Some("timed out".to_string()))
                    }
                }
            };

            results.insert(channel.id().to_string(), ok);
            self.log_delivery(DeliveryRecord {
                alert_id: alert.alert_id.clone(),
                channel:  channel.id().to_string(),
                ok,
                error,
                at: Utc::now(),
            });
        }

        self.remember(&alert.alert_id);
        info!(
            alert = %alert.alert_id,
            severity = %alert.severity,
            delivered = results.values().filter(|ok| **ok).count(),
            channels = results.len(),
            "dispatched"
        );
        results
    }

    /// Recent per-channel outcomes, newest last.
    pub fn delivery_log(&self) -> Vec<DeliveryRecord> {
        self.delivery_log.lock().iter().cloned().collect()
    }

    fn recently_dispatched(&self, alert_id: &str) -> bool {
        let window = Duration::seconds(self.config.dedup_window_seconds);
        self.recent
            .get(alert_id)
            .map(|first| Utc::now() - *first < window)
            .unwrap_or(false)
    }

    fn remember(&self, alert_id: &str) {
        let window = Duration::seconds(self.config.dedup_window_seconds);
        let now = Utc::now();
        self.recent
            .entry(alert_id.to_string())
            .or_insert(now);
        if self.recent.len() > 1024 {
            self.recent.retain(|_, first| now - *first < window);
        }
    }

    fn log_delivery(&self, record: DeliveryRecord) {
        let mut log = self.delivery_log.lock();
        if log.len() >= DELIVERY_LOG_CAP {
            log.pop_front();
        }
        log.push_back(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingChannel {
        name:  String,
        calls: AtomicUsize,
        fail:  bool,
        dedup: bool,
    }

    impl RecordingChannel {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name:  name.to_string(),
                calls: AtomicUsize::new(0),
                fail:  false,
                dedup: false,
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name:  name.to_string(),
                calls: AtomicUsize::new(0),
                fail:  true,
                dedup: false,
            })
        }

        fn deduping(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name:  name.to_string(),
                calls: AtomicUsize::new(0),
                fail:  false,
                dedup: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        fn id(&self) -> &str {
            &self.name
        }

        fn dedup(&self) -> bool {
            self.dedup
        }

        async fn deliver(&self, _alert: &Alert, _message: &BlockMessage) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(VigilError::Channel {
                    channel: self.name.clone(),
                    reason:  "transport refused".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct HangingChannel;

    #[async_trait]
    impl AlertChannel for HangingChannel {
        fn id(&self) -> &str {
            "slow"
        }

        async fn deliver(&self, _alert: &Alert, _message: &BlockMessage) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn distributor(channels: Vec<Arc<dyn AlertChannel>>) -> Distributor {
        let mut d = Distributor::new(DispatchConfig::default());
        for ch in channels {
            d = d.with_channel(ch);
        }
        d
    }

    #[tokio::test]
    async fn missing_type_and_message_is_validation_without_sends() {
        let chan = RecordingChannel::new("chat");
        let d = distributor(vec![chan.clone()]);

        let err = d
            .dispatch_raw(&json!({ "severity": "critical" }))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));
        assert_eq!(chan.calls(), 0);
    }

    #[tokio::test]
    async fn reserved_metadata_key_rejected() {
        let chan = RecordingChannel::new("chat");
        let d = distributor(vec![chan.clone()]);

        let err = d
            .dispatch_raw(&json!({
                "alert_type": "outbreak",
                "message": "cluster detected",
                "metadata": { "national_id": "12345678" }
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));
        assert_eq!(chan.calls(), 0);
    }

    #[tokio::test]
    async fn fan_out_reports_per_channel_outcomes() {
        let ok_chan = RecordingChannel::new("a");
        let bad_chan = RecordingChannel::failing("b");
        let d = distributor(vec![ok_chan.clone(), bad_chan.clone()]);

        let results = d
            .dispatch_raw(&json!({
                "alert_type": "outbreak",
                "severity": "high",
                "message": "cluster detected"
            }))
            .await
            .unwrap();

        assert_eq!(results.get("a"), Some(&true));
        assert_eq!(results.get("b"), Some(&false));
        assert_eq!(ok_chan.calls(), 1);
        assert_eq!(bad_chan.calls(), 1);
    }

    #[tokio::test]
    async fn channel_timeout_is_a_false_not_an_error() {
        let mut config = DispatchConfig::default();
        config.channel_timeout_seconds = 0;
        let ok_chan = RecordingChannel::new("a");
        let d = Distributor::new(config)
            .with_channel(ok_chan.clone())
            .with_channel(Arc::new(HangingChannel));

        let results = d
            .dispatch_raw(&json!({
                "alert_type": "outbreak",
                "message": "cluster detected"
            }))
            .await
            .unwrap();

        assert_eq!(results.get("a"), Some(&true));
        assert_eq!(results.get("slow"), Some(&false));
    }

    #[tokio::test]
    async fn dedup_window_is_idempotent_for_opted_in_channels() {
        let chat = RecordingChannel::deduping("chat");
        let plain = RecordingChannel::new("webhook");
        let d = distributor(vec![chat.clone(), plain.clone()]);

        let payload = json!({
            "alert_id": "fixed-id",
            "alert_type": "outbreak",
            "message": "cluster detected"
        });
        let first = d.dispatch_raw(&payload).await.unwrap();
        let second = d.dispatch_raw(&payload).await.unwrap();

        assert_eq!(first.get("chat"), Some(&true));
        assert_eq!(second.get("chat"), Some(&true)); // idempotent success
        assert_eq!(chat.calls(), 1);                 // but only one real send
        assert_eq!(plain.calls(), 2);                // non-dedup channels resend
    }

    #[tokio::test]
    async fn extra_payload_fields_pass_through_opaquely() {
        let raw: RawAlertMessage = serde_json::from_value(json!({
            "alert_type": "outbreak",
            "message": "m",
            "facility_count": 3
        }))
        .unwrap();
        let alert = raw.validate().unwrap();
        assert_eq!(alert.metadata.get("facility_count"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn delivery_log_records_outcomes() {
        let d = distributor(vec![RecordingChannel::new("a"), RecordingChannel::failing("b")]);
        d.dispatch_raw(&json!({ "alert_type": "t", "message": "m" }))
            .await
            .unwrap();
        let log = d.delivery_log();
        assert_eq!(log.len(), 2);
        assert!(log.iter().any(|r| r.channel == "b" && !r.ok && r.error.is_some()));
    }
}
