// vigil/src/events.rs
//
// Shared domain types flowing through the surveillance core.
//
// Raw ingest shapes (RawCbsSignal, RawEmrEvent) mirror the JSON the
// collectors emit; validated shapes carry parsed UTC instants and
// documented defaults. Timestamp parsing is a tagged result, never a
// panic: ISO-8601 is attempted first, then numeric epoch seconds.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VigilError};

// ── Timestamps ────────────────────────────────────────────────────────────────

/// ISO-8601 UTC with second precision — the one wire format for instants.
pub mod iso8601 {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(
        dt: &DateTime<Utc>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Optional variant of [`iso8601`] — `null` when absent.
pub mod iso8601_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => s.serialize_str(&dt.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

/// Parse a timestamp from a raw JSON value.
///
/// Accepts ISO-8601 strings and numeric epoch seconds (integer or float,
/// also as a numeric string). Ambiguity is resolved by attempting ISO
/// first. Anything else is `InvalidTimestamp` — no silent coercion.
pub fn parse_timestamp(raw: &Value) -> Result<DateTime<Utc>> {
    match raw {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(epoch) = s.parse::<f64>() {
                return from_epoch(epoch, s);
            }
            Err(VigilError::InvalidTimestamp(s.clone()))
        }
        Value::Number(n) => {
            let epoch = n
                .as_f64()
                .ok_or_else(|| VigilError::InvalidTimestamp(n.to_string()))?;
            from_epoch(epoch, &n.to_string())
        }
        other => Err(VigilError::InvalidTimestamp(other.to_string())),
    }
}

fn from_epoch(epoch: f64, raw: &str) -> Result<DateTime<Utc>> {
    if !epoch.is_finite() {
        return Err(VigilError::InvalidTimestamp(raw.to_string()));
    }
    let secs = epoch.trunc() as i64;
    let nanos = ((epoch - epoch.trunc()) * 1e9) as u32;
    match Utc.timestamp_opt(secs, nanos) {
        chrono::LocalResult::Single(dt) => Ok(dt),
        _ => Err(VigilError::InvalidTimestamp(raw.to_string())),
    }
}

// ── Symptom vocabulary ────────────────────────────────────────────────────────

/// Closed vocabulary for community-reported symptoms. Anything outside it
/// normalizes to the documented default, `unknown`.
pub const SYMPTOM_VOCABULARY: &[&str] = &[
    "fever",
    "cough",
    "rash",
    "headache",
    "watery_stool",
    "vomiting",
    "bleeding",
    "jaundice",
    "fatigue",
    "joint_pain",
    "unknown",
];

pub fn normalize_symptom(raw: Option<&str>) -> String {
    let sym = raw.unwrap_or("unknown").trim().to_lowercase().replace(' ', "_");
    if SYMPTOM_VOCABULARY.contains(&sym.as_str()) {
        sym
    } else {
        "unknown".to_string()
    }
}

pub const DEFAULT_LOCATION: &str = "UNKNOWN";

// ── Raw ingest shapes ─────────────────────────────────────────────────────────

/// CBS signal as the community collectors emit it. `timestamp` is kept as
/// a raw JSON value until the tagged parser has seen it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCbsSignal {
    pub location:   Option<String>,
    pub symptom:    Option<String>,
    pub timestamp:  Option<Value>,
    pub subject_id: Option<String>,
    #[serde(flatten)]
    pub extra:      BTreeMap<String, Value>,
}

/// EMR event as exported by the clinical system.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEmrEvent {
    pub location:    Option<String>,
    pub diagnosis:   Option<String>,
    pub timestamp:   Option<Value>,
    pub subject_id:  Option<String>,
    pub lab_results: Option<BTreeMap<String, Value>>,
    #[serde(flatten)]
    pub extra:       BTreeMap<String, Value>,
}

// ── Validated ingest types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CbsSignal {
    #[serde(with = "iso8601")]
    pub timestamp:  DateTime<Utc>,
    pub location:   String,
    pub symptom:    String,
    pub subject_id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub extra:      BTreeMap<String, Value>,
}

impl CbsSignal {
    pub fn from_raw(raw: RawCbsSignal) -> Result<Self> {
        let ts_raw = raw
            .timestamp
            .ok_or_else(|| VigilError::InvalidTimestamp("missing".into()))?;
        Ok(Self {
            timestamp:  parse_timestamp(&ts_raw)?,
            location:   raw.location.unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            symptom:    normalize_symptom(raw.symptom.as_deref()),
            subject_id: raw.subject_id,
            extra:      raw.extra,
        })
    }

    pub fn from_value(v: &Value) -> Result<Self> {
        let raw: RawCbsSignal = serde_json::from_value(v.clone())
            .map_err(|e| VigilError::Validation(format!("cbs signal: {e}")))?;
        Self::from_raw(raw)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmrEvent {
    #[serde(with = "iso8601")]
    pub timestamp:   DateTime<Utc>,
    pub location:    String,
    /// May be empty — an encounter without a coded diagnosis.
    pub diagnosis:   String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub lab_results: BTreeMap<String, Value>,
    pub subject_id:  Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub extra:       BTreeMap<String, Value>,
}

impl EmrEvent {
    pub fn from_raw(raw: RawEmrEvent) -> Result<Self> {
        let ts_raw = raw
            .timestamp
            .ok_or_else(|| VigilError::InvalidTimestamp("missing".into()))?;
        Ok(Self {
            timestamp:   parse_timestamp(&ts_raw)?,
            location:    raw.location.unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            diagnosis:   raw.diagnosis.unwrap_or_default(),
            lab_results: raw.lab_results.unwrap_or_default(),
            subject_id:  raw.subject_id,
            extra:       raw.extra,
        })
    }

    pub fn from_value(v: &Value) -> Result<Self> {
        let raw: RawEmrEvent = serde_json::from_value(v.clone())
            .map_err(|e| VigilError::Validation(format!("emr event: {e}")))?;
        Self::from_raw(raw)
    }
}

// ── Fused record ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SymptomReport,
    Diagnosis,
    LabResult,
    Hospitalization,
    OutbreakAlert,
    Unknown,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SymptomReport   => write!(f, "symptom_report"),
            Self::Diagnosis       => write!(f, "diagnosis"),
            Self::LabResult       => write!(f, "lab_result"),
            Self::Hospitalization => write!(f, "hospitalization"),
            Self::OutbreakAlert   => write!(f, "outbreak_alert"),
            Self::Unknown         => write!(f, "unknown"),
        }
    }
}

/// Six-tier verification ladder from cross-source comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VerificationTier {
    Conflict,
    Unverified,
    Possible,
    Probable,
    Entangled,
    Confirmed,
}

impl VerificationTier {
    pub fn score(self) -> f64 {
        match self {
            Self::Confirmed  => 1.0,
            Self::Entangled  => 0.9,
            Self::Probable   => 0.7,
            Self::Possible   => 0.4,
            Self::Unverified => 0.3,
            Self::Conflict   => 0.0,
        }
    }
}

impl std::fmt::Display for VerificationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confirmed  => write!(f, "Confirmed"),
            Self::Entangled  => write!(f, "Entangled"),
            Self::Probable   => write!(f, "Probable"),
            Self::Possible   => write!(f, "Possible"),
            Self::Unverified => write!(f, "Unverified"),
            Self::Conflict   => write!(f, "Conflict"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionTier {
    Hot,
    Cold,
}

/// One entry in a record's fusion audit trail. `step` is strictly
/// monotonic within a record — enforced by `FusedRecord::push_step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceStep {
    pub step:   u32,
    pub stage:  String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub score:  Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedRecord {
    pub record_id:           String,
    pub subject_id:          String,
    pub event_type:          EventType,
    pub location:            String,
    #[serde(with = "iso8601")]
    pub canonical_timestamp: DateTime<Utc>,
    /// Source name → canonical serialization of the contributing source.
    pub sources:             BTreeMap<String, Value>,
    pub verification:        VerificationTier,
    pub canonical_payload:   Value,
    pub confidence_chain:    Vec<ConfidenceStep>,
    pub retention:           RetentionTier,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub idsr_report:         Option<IdsrReport>,
}

impl FusedRecord {
    /// Append an audit-trail step with the next monotonic index.
    pub fn push_step(&mut self, stage: &str, detail: String, score: Option<f64>) {
        let step = self.confidence_chain.last().map(|s| s.step + 1).unwrap_or(1);
        self.confidence_chain.push(ConfidenceStep {
            step,
            stage: stage.to_string(),
            detail,
            score,
        });
    }
}

// ── IDSR report ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdsrVerification {
    pub tier:    String,
    pub score:   f64,
    pub sources: Vec<String>,
}

/// Regulatory-shaped view of a FusedRecord. Derivation is deterministic:
/// re-deriving from an unchanged record yields byte-identical JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdsrReport {
    pub disease_code:          String,
    pub clinical_summary:      String,
    pub verification_metadata: IdsrVerification,
    pub submission_status:     String,
}

// ── Alerts ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Lenient parse for broker payloads. Unrecognized values fall back to
    /// Medium, which the formatter renders amber.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("critical") => Self::Critical,
            Some("high")     => Self::High,
            Some("low")      => Self::Low,
            _                => Self::Medium,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::High     => write!(f, "HIGH"),
            Self::Medium   => write!(f, "MEDIUM"),
            Self::Low      => write!(f, "LOW"),
        }
    }
}

/// Dispatchable event on the alert topic. `metadata` carries no direct
/// subject identifiers — the distributor enforces the reserved-key set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id:   String,
    pub alert_type: String,
    pub severity:   AlertSeverity,
    pub title:      String,
    pub message:    String,
    pub location:   String,
    #[serde(with = "iso8601")]
    pub timestamp:  DateTime<Utc>,
    pub metadata:   BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_timestamp_iso_first() {
        let dt = parse_timestamp(&json!("2025-01-10T10:00:00Z")).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 1, 10, 10, 0, 0).unwrap());
    }

    #[test]
    fn parse_timestamp_epoch_number() {
        let dt = parse_timestamp(&json!(1736503200)).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 1, 10, 10, 0, 0).unwrap());
    }

    #[test]
    fn parse_timestamp_epoch_string() {
        let dt = parse_timestamp(&json!("1736503200")).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 1, 10, 10, 0, 0).unwrap());
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        assert!(matches!(
            parse_timestamp(&json!("tomorrow-ish")),
            Err(VigilError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            parse_timestamp(&json!(null)),
            Err(VigilError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn symptom_vocabulary_is_closed() {
        assert_eq!(normalize_symptom(Some("Fever")), "fever");
        assert_eq!(normalize_symptom(Some("watery stool")), "watery_stool");
        assert_eq!(normalize_symptom(Some("levitation")), "unknown");
        assert_eq!(normalize_symptom(None), "unknown");
    }

    #[test]
    fn cbs_defaults_applied() {
        let sig = CbsSignal::from_value(&json!({
            "timestamp": "2025-01-10T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(sig.location, DEFAULT_LOCATION);
        assert_eq!(sig.symptom, "unknown");
        assert!(sig.subject_id.is_none());
    }

    #[test]
    fn cbs_missing_timestamp_is_invalid() {
        let err = CbsSignal::from_value(&json!({ "symptom": "fever" })).unwrap_err();
        assert!(matches!(err, VigilError::InvalidTimestamp(_)));
    }

    #[test]
    fn iso8601_second_precision() {
        let sig = CbsSignal::from_value(&json!({
            "timestamp": "2025-01-10T10:00:00.123456Z",
            "symptom": "fever"
        }))
        .unwrap();
        let out = serde_json::to_value(&sig).unwrap();
        assert_eq!(out["timestamp"], json!("2025-01-10T10:00:00Z"));
    }

    #[test]
    fn alert_severity_lenient_parse() {
        assert_eq!(AlertSeverity::parse(Some("CRITICAL")), AlertSeverity::Critical);
        assert_eq!(AlertSeverity::parse(Some("whatever")), AlertSeverity::Medium);
        assert_eq!(AlertSeverity::parse(None), AlertSeverity::Medium);
    }
}
