// vigil/src/engine/fusion.rs
//
// Probabilistic entanglement of CBS signals with EMR events.
//
//   score = W_T · exp(λ · Δh) + W_C · c
//
// Δh — absolute time delta in hours between the two sources
// λ  — negative temporal decay (default −0.05)
// c  — content alignment: 1.0 when the CBS symptom maps to the EMR
//      diagnosis in the configured table, else 0.1
//
// Verification tiers from the cross-source comparison:
//   Confirmed  1.0 — same location, |Δt| < 24h, subject ids agree
//   Entangled  0.9 — score above the high threshold
//   Probable   0.7 — score above the medium threshold
//   Possible   0.4 — both sources present, none of the above
//   Unverified 0.3 — single source
//   Conflict   0.0 — locations mismatch and score below medium
//
// Canonical synthesis: EMR overrides CBS on overlapping fields; an IDSR
// input populates only the generated idsr_report.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::idsr;
use crate::engine::store::{RecordStore, StoreStats};
use crate::error::{Result, VigilError};
use crate::events::{
    parse_timestamp, Alert, AlertSeverity, CbsSignal, EmrEvent, EventType, FusedRecord,
    RetentionTier, VerificationTier,
};

const FUSION_LOG: &str = "fusion_log.jsonl";
const CONFIRM_WINDOW_HOURS: i64 = 24;

pub struct FusionEngine {
    config:   Config,
    store:    RecordStore,
    log_path: Option<PathBuf>,
    log_lock: Mutex<()>,
    alert_tx: Option<mpsc::Sender<Alert>>,
}

/// One row of offline stream scoring — pure with respect to the store.
#[derive(Debug, Clone, Serialize)]
pub struct StreamMatch {
    pub cbs:                 CbsSignal,
    pub best_match_emr:      Option<EmrEvent>,
    pub score:               f64,
    pub status:              VerificationTier,
    pub predicted_diagnosis: String,
}

impl FusionEngine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store:    RecordStore::new(),
            log_path: None,
            log_lock: Mutex::new(()),
            alert_tx: None,
        }
    }

    /// Enable the JSONL fusion log under `dir`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir: PathBuf = dir.into();
        std::fs::create_dir_all(&dir)?;
        self.log_path = Some(dir.join(FUSION_LOG));
        Ok(self)
    }

    /// Wire the engine to the alert topic.
    pub fn with_alert_sender(mut self, tx: mpsc::Sender<Alert>) -> Self {
        self.alert_tx = Some(tx);
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    // ── Scoring ───────────────────────────────────────────────────────────────

    /// Entanglement score in [0, 1], rounded to 4 decimals.
    pub fn entanglement_score(&self, cbs: &CbsSignal, emr: &EmrEvent) -> f64 {
        let ent = &self.config.entanglement;
        let dh = (cbs.timestamp - emr.timestamp).num_seconds().abs() as f64 / 3600.0;
        let c = if self
            .config
            .symptom_matches_diagnosis(&cbs.symptom, &emr.diagnosis)
        {
            1.0
        } else {
            0.1
        };
        let (w_t, w_c) = ent.weights;
        let score = w_t * (ent.temporal_decay * dh).exp() + w_c * c;
        ((score.clamp(0.0, 1.0)) * 10000.0).round() / 10000.0
    }

    /// Verification tier for a CBS/EMR pair given its entanglement score.
    pub fn classify(&self, cbs: &CbsSignal, emr: &EmrEvent, score: f64) -> VerificationTier {
        let ent = &self.config.entanglement;
        let same_location = cbs.location == emr.location;
        let within_window =
            (cbs.timestamp - emr.timestamp).num_hours().abs() < CONFIRM_WINDOW_HOURS;
        let subjects_agree = match (&cbs.subject_id, &emr.subject_id) {
            (Some(a), Some(b)) => a == b,
            (None, None)       => true,
            _                  => false,
        };

        if same_location && within_window && subjects_agree {
            VerificationTier::Confirmed
        } else if score > ent.threshold_high {
            VerificationTier::Entangled
        } else if score > ent.threshold_medium {
            VerificationTier::Probable
        } else if !same_location && score < ent.threshold_medium {
            VerificationTier::Conflict
        } else {
            VerificationTier::Possible
        }
    }

    // ── Fusion ────────────────────────────────────────────────────────────────

    /// Fuse the provided sources into one canonical record, store it, and
    /// append to the fusion log. At least one of {cbs, emr, idsr} is
    /// required; unparseable timestamps surface as `InvalidTimestamp`.
    pub fn fuse(
        &self,
        cbs: Option<CbsSignal>,
        emr: Option<EmrEvent>,
        idsr: Option<Value>,
        subject_id: Option<&str>,
    ) -> Result<FusedRecord> {
        if cbs.is_none() && emr.is_none() && idsr.is_none() {
            return Err(VigilError::Validation(
                "fusion requires at least one of cbs, emr, idsr".into(),
            ));
        }

        // Canonical timestamp — minimum over the non-null source instants.
        let mut timestamps: Vec<DateTime<Utc>> = Vec::new();
        if let Some(ref c) = cbs {
            timestamps.push(c.timestamp);
        }
        if let Some(ref e) = emr {
            timestamps.push(e.timestamp);
        }
        if let Some(ref i) = idsr {
            if let Some(ts_raw) = i.get("timestamp") {
                timestamps.push(parse_timestamp(ts_raw)?);
            }
        }
        let canonical_timestamp = timestamps
            .iter()
            .min()
            .copied()
            .ok_or_else(|| VigilError::Validation("no source carries a timestamp".into()))?;

        let subject = subject_id
            .map(str::to_string)
            .or_else(|| cbs.as_ref().and_then(|c| c.subject_id.clone()))
            .or_else(|| emr.as_ref().and_then(|e| e.subject_id.clone()))
            .or_else(|| {
                idsr.as_ref()
                    .and_then(|i| i.get("subject_id"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown".to_string());

        // Canonical payload — CBS first, EMR overrides overlapping fields.
        let mut payload = serde_json::Map::new();
        if let Some(ref c) = cbs {
            payload.insert("location".into(), json!(c.location));
            payload.insert("symptom".into(), json!(c.symptom));
            for (k, v) in &c.extra {
                payload.insert(k.clone(), v.clone());
            }
        }
        if let Some(ref e) = emr {
            payload.insert("location".into(), json!(e.location));
            payload.insert("diagnosis".into(), json!(e.diagnosis));
            if !e.lab_results.is_empty() {
                payload.insert("lab_results".into(), json!(e.lab_results));
            }
            for (k, v) in &e.extra {
                payload.insert(k.clone(), v.clone());
            }
        }

        let location = emr
            .as_ref()
            .map(|e| e.location.clone())
            .or_else(|| cbs.as_ref().map(|c| c.location.clone()))
            .unwrap_or_else(|| crate::events::DEFAULT_LOCATION.to_string());

        let event_type = infer_event_type(&payload, cbs.as_ref());

        let mut sources = BTreeMap::new();
        if let Some(ref c) = cbs {
            sources.insert("cbs".to_string(), serde_json::to_value(c).unwrap_or(Value::Null));
        }
        if let Some(ref e) = emr {
            sources.insert("emr".to_string(), serde_json::to_value(e).unwrap_or(Value::Null));
        }
        if let Some(ref i) = idsr {
            sources.insert("idsr".to_string(), i.clone());
        }

        let mut record = FusedRecord {
            record_id:           uuid::Uuid::new_v4().to_string(),
            subject_id:          subject,
            event_type,
            location,
            canonical_timestamp,
            sources,
            verification:        VerificationTier::Unverified,
            canonical_payload:   Value::Object(payload),
            confidence_chain:    Vec::new(),
            retention:           RetentionTier::Hot,
            idsr_report:         None,
        };

        for name in record.sources.keys().cloned().collect::<Vec<_>>() {
            record.push_step("ingest", name, None);
        }

        // Cross-source verification needs both observational sources.
        match (&cbs, &emr) {
            (Some(c), Some(e)) => {
                let score = self.entanglement_score(c, e);
                record.push_step("entanglement", "cbs-emr".to_string(), Some(score));
                let tier = self.classify(c, e, score);
                record.verification = tier;
                record.push_step("classification", tier.to_string(), Some(tier.score()));
            }
            _ => {
                record.verification = VerificationTier::Unverified;
                record.push_step(
                    "classification",
                    VerificationTier::Unverified.to_string(),
                    Some(VerificationTier::Unverified.score()),
                );
            }
        }

        record.push_step("synthesis", record.event_type.to_string(), None);

        let report = idsr::derive(&record);
        record.push_step("idsr", report.disease_code.clone(), None);
        record.idsr_report = Some(report);

        self.store.insert(record.clone())?;
        self.store
            .fusion_events
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.append_log(&record);

        info!(
            record_id = %record.record_id,
            subject = %record.subject_id,
            tier = %record.verification,
            event_type = %record.event_type,
            "fused"
        );

        self.maybe_alert(&record);
        Ok(record)
    }

    /// Score a CBS batch against EMR candidates without touching the
    /// store. Deterministic: identical inputs yield identical outputs.
    pub fn fuse_streams(
        &self,
        cbs_batch: &[CbsSignal],
        emr_batch: &[EmrEvent],
    ) -> Vec<StreamMatch> {
        cbs_batch
            .iter()
            .map(|cbs| {
                let mut best: Option<(usize, f64, VerificationTier, i64)> = None;
                for (idx, emr) in emr_batch.iter().enumerate() {
                    let score = self.entanglement_score(cbs, emr);
                    let tier = self.classify(cbs, emr, score);
                    let dt = (cbs.timestamp - emr.timestamp).num_seconds().abs();
                    let candidate = (idx, score, tier, dt);
                    best = Some(match best {
                        None => candidate,
                        Some(current) => pick_better(current, candidate),
                    });
                }

                match best {
                    Some((idx, score, tier, _)) => {
                        let emr = emr_batch[idx].clone();
                        let predicted = if !emr.diagnosis.is_empty() {
                            emr.diagnosis.clone()
                        } else {
                            self.config
                                .symptom_diagnosis_map
                                .get(&cbs.symptom)
                                .and_then(|dxs| dxs.first().cloned())
                                .unwrap_or_else(|| "Unknown".to_string())
                        };
                        StreamMatch {
                            cbs: cbs.clone(),
                            best_match_emr: Some(emr),
                            score,
                            status: tier,
                            predicted_diagnosis: predicted,
                        }
                    }
                    None => StreamMatch {
                        cbs:                 cbs.clone(),
                        best_match_emr:      None,
                        score:               0.0,
                        status:              VerificationTier::Unverified,
                        predicted_diagnosis: "Unknown".to_string(),
                    },
                }
            })
            .collect()
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Timeline for one subject, ascending canonical_timestamp.
    pub fn get_timeline(&self, subject_id: &str) -> Vec<FusedRecord> {
        self.store.timeline(subject_id)
    }

    pub fn statistics(&self) -> StoreStats {
        self.store.statistics()
    }

    /// Hot → Cold sweep against the wall clock.
    pub fn sweep_retention(&self) -> Vec<String> {
        self.sweep_retention_at(Utc::now())
    }

    /// Hot records already past the retention threshold — the audit
    /// agent's retention-conformance probe.
    pub fn over_age_hot(&self, now: DateTime<Utc>) -> Vec<String> {
        self.store.over_age_hot(now, self.config.retention_days)
    }

    /// Share of Hot records in the Conflict tier.
    pub fn conflict_share(&self) -> f64 {
        self.store.conflict_share()
    }

    /// Clock-injected sweep, for tests and replay.
    pub fn sweep_retention_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let moved = self.store.sweep_retention(now, self.config.retention_days);
        if !moved.is_empty() {
            info!(count = moved.len(), "retention sweep: hot → cold");
        }
        moved
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn append_log(&self, record: &FusedRecord) {
        let Some(ref path) = self.log_path else { return };
        let line = json!({
            "record_id":  record.record_id,
            "subject_id": record.subject_id,
            "tier":       record.verification.to_string(),
            "event_type": record.event_type.to_string(),
            "canonical_timestamp": record.canonical_timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        });
        let _guard = self.log_lock.lock();
        let appended = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                writeln!(f, "{line}")
            });
        if let Err(e) = appended {
            warn!("fusion log append failed: {e}");
        }
    }

    /// Publish to the alert topic when a record crosses the risk
    /// threshold or lands in Conflict. Metadata carries no subject
    /// identifiers.
    fn maybe_alert(&self, record: &FusedRecord) {
        let Some(ref tx) = self.alert_tx else { return };

        let (severity, alert_type, title) = match (record.verification, record.event_type) {
            (_, EventType::OutbreakAlert) => (
                AlertSeverity::Critical,
                "outbreak",
                "Outbreak signal in fused timeline",
            ),
            (_, EventType::Hospitalization) => (
                AlertSeverity::High,
                "hospitalization",
                "Hospitalization recorded",
            ),
            (VerificationTier::Conflict, _) => (
                AlertSeverity::Medium,
                "data_conflict",
                "Cross-source conflict in fused record",
            ),
            _ => return,
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("record_id".to_string(), json!(record.record_id));
        metadata.insert("verification".to_string(), json!(record.verification.to_string()));
        metadata.insert("event_type".to_string(), json!(record.event_type.to_string()));

        let alert = Alert {
            alert_id:   uuid::Uuid::new_v4().to_string(),
            alert_type: alert_type.to_string(),
            severity,
            title:      title.to_string(),
            message:    format!(
                "{} ({}) at {}",
                title, record.verification, record.location
            ),
            location:   record.location.clone(),
            timestamp:  record.canonical_timestamp,
            metadata,
        };

        if let Err(e) = tx.try_send(alert) {
            warn!("alert topic full or closed: {e}");
        }
    }
}

/// Lexicographic preference: score desc, then tier desc, then Δt asc.
/// Higher tier wins on exact score ties; on tier ties the smaller time
/// delta wins.
fn pick_better(
    current: (usize, f64, VerificationTier, i64),
    candidate: (usize, f64, VerificationTier, i64),
) -> (usize, f64, VerificationTier, i64) {
    let (_, cur_score, cur_tier, cur_dt) = current;
    let (_, cand_score, cand_tier, cand_dt) = candidate;
    if cand_score > cur_score {
        candidate
    } else if cand_score < cur_score {
        current
    } else if cand_tier > cur_tier {
        candidate
    } else if cand_tier < cur_tier {
        current
    } else if cand_dt < cur_dt {
        candidate
    } else {
        current
    }
}

fn infer_event_type(payload: &serde_json::Map<String, Value>, cbs: Option<&CbsSignal>) -> EventType {
    let truthy = |key: &str| payload.get(key).map(is_truthy).unwrap_or(false);

    let has_diagnosis = payload
        .get("diagnosis")
        .and_then(|v| v.as_str())
        .map(|d| !d.is_empty())
        .unwrap_or(false);

    if has_diagnosis {
        EventType::Diagnosis
    } else if payload.get("lab_results").is_some() {
        EventType::LabResult
    } else if truthy("hospitalization") {
        EventType::Hospitalization
    } else if cbs.map(|c| c.symptom != "unknown").unwrap_or(false) {
        EventType::SymptomReport
    } else if truthy("outbreak") {
        EventType::OutbreakAlert
    } else {
        EventType::Unknown
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b)   => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Null      => false,
        _                => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn engine() -> FusionEngine {
        FusionEngine::new(Config::default())
    }

    fn cbs(location: &str, symptom: &str, ts: &str, subject: Option<&str>) -> CbsSignal {
        CbsSignal {
            timestamp:  DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc),
            location:   location.to_string(),
            symptom:    symptom.to_string(),
            subject_id: subject.map(str::to_string),
            extra:      BTreeMap::new(),
        }
    }

    fn emr(location: &str, diagnosis: &str, ts: &str, subject: Option<&str>) -> EmrEvent {
        EmrEvent {
            timestamp:   DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc),
            location:    location.to_string(),
            diagnosis:   diagnosis.to_string(),
            lab_results: BTreeMap::new(),
            subject_id:  subject.map(str::to_string),
            extra:       BTreeMap::new(),
        }
    }

    #[test]
    fn confirmed_fusion_scenario() {
        let e = engine();
        let record = e
            .fuse(
                Some(cbs("Nairobi", "fever", "2025-01-10T10:00:00Z", None)),
                Some(emr("Nairobi", "Malaria", "2025-01-10T09:45:00Z", None)),
                None,
                Some("P12345"),
            )
            .unwrap();

        assert_eq!(record.verification, VerificationTier::Confirmed);
        assert_eq!(record.event_type, EventType::Diagnosis);
        assert_eq!(record.subject_id, "P12345");
        assert_eq!(
            record.canonical_timestamp,
            Utc.with_ymd_and_hms(2025, 1, 10, 9, 45, 0).unwrap()
        );
        assert_eq!(
            record.idsr_report.as_ref().unwrap().disease_code,
            "MAL001"
        );
        assert_eq!(record.retention, RetentionTier::Hot);
    }

    #[test]
    fn entangled_match_scenario() {
        let e = engine();
        let c = cbs("UNKNOWN", "watery_stool", "2025-03-01T08:00:00Z", None);
        let m = emr("Kisumu", "Cholera", "2025-03-01T09:00:00Z", None);

        let score = e.entanglement_score(&c, &m);
        assert!((score - 0.9659).abs() < 1e-3, "score was {score}");
        assert_eq!(e.classify(&c, &m, score), VerificationTier::Entangled);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let e = engine();
        let c = cbs("A", "fever", "2025-01-01T00:00:00Z", None);
        let far = emr("B", "Fracture", "1995-01-01T00:00:00Z", None);
        let near = emr("A", "Malaria", "2025-01-01T00:00:00Z", None);
        for m in [&far, &near] {
            let s = e.entanglement_score(&c, m);
            assert!((0.0..=1.0).contains(&s), "score {s} out of range");
        }
    }

    #[test]
    fn mismatched_locations_low_score_is_conflict() {
        let e = engine();
        let c = cbs("Nairobi", "fever", "2025-01-01T00:00:00Z", None);
        let m = emr("Mombasa", "Fracture", "2025-01-05T00:00:00Z", None);
        let score = e.entanglement_score(&c, &m);
        assert!(score < 0.5);
        assert_eq!(e.classify(&c, &m, score), VerificationTier::Conflict);
    }

    #[test]
    fn single_source_is_unverified() {
        let e = engine();
        let record = e
            .fuse(
                Some(cbs("Nairobi", "fever", "2025-01-10T10:00:00Z", Some("P1"))),
                None,
                None,
                None,
            )
            .unwrap();
        assert_eq!(record.verification, VerificationTier::Unverified);
        assert_eq!(record.event_type, EventType::SymptomReport);
        assert_eq!(record.subject_id, "P1");
    }

    #[test]
    fn subject_id_mismatch_blocks_confirmed() {
        let e = engine();
        let c = cbs("Nairobi", "fever", "2025-01-10T10:00:00Z", Some("P1"));
        let m = emr("Nairobi", "Malaria", "2025-01-10T09:45:00Z", Some("P2"));
        let score = e.entanglement_score(&c, &m);
        // still a strong match, just not Confirmed
        assert_eq!(e.classify(&c, &m, score), VerificationTier::Entangled);
    }

    #[test]
    fn confidence_chain_strictly_monotonic() {
        let e = engine();
        let record = e
            .fuse(
                Some(cbs("Nairobi", "fever", "2025-01-10T10:00:00Z", None)),
                Some(emr("Nairobi", "Malaria", "2025-01-10T09:45:00Z", None)),
                None,
                Some("P1"),
            )
            .unwrap();
        let steps: Vec<u32> = record.confidence_chain.iter().map(|s| s.step).collect();
        assert!(!steps.is_empty());
        assert!(steps.windows(2).all(|w| w[1] > w[0]), "steps {steps:?}");
    }

    #[test]
    fn fuse_requires_a_source() {
        let e = engine();
        let err = e.fuse(None, None, None, Some("P1")).unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));
    }

    #[test]
    fn idsr_input_populates_sources_and_report_only() {
        let e = engine();
        let record = e
            .fuse(
                None,
                Some(emr("Nairobi", "Cholera", "2025-01-10T09:45:00Z", Some("P1"))),
                Some(json!({ "program": "IDSR", "week": 2 })),
                None,
            )
            .unwrap();
        assert!(record.sources.contains_key("idsr"));
        assert_eq!(record.idsr_report.unwrap().disease_code, "CHOL001");
        // IDSR input never leaks into the canonical payload
        assert!(record.canonical_payload.get("program").is_none());
    }

    #[test]
    fn stream_scoring_with_empty_candidates() {
        let e = engine();
        let matches = e.fuse_streams(
            &[cbs("Nairobi", "fever", "2025-01-10T10:00:00Z", None)],
            &[],
        );
        assert_eq!(matches.len(), 1);
        assert!(matches[0].best_match_emr.is_none());
        assert_eq!(matches[0].status, VerificationTier::Unverified);
        assert_eq!(matches[0].predicted_diagnosis, "Unknown");
    }

    #[test]
    fn stream_scoring_prefers_higher_tier_on_score_tie() {
        let e = engine();
        let c = cbs("Nairobi", "watery_stool", "2025-03-01T08:00:00Z", None);
        // identical timestamps and diagnoses — identical scores; only the
        // location (and therefore the tier) differs
        let away = emr("Mombasa", "Cholera", "2025-03-01T09:00:00Z", None);
        let home = emr("Nairobi", "Cholera", "2025-03-01T09:00:00Z", None);
        let matches = e.fuse_streams(&[c], &[away, home]);
        assert_eq!(matches[0].status, VerificationTier::Confirmed);
        assert_eq!(
            matches[0].best_match_emr.as_ref().unwrap().location,
            "Nairobi"
        );
    }

    #[test]
    fn stream_scoring_is_deterministic() {
        let e = engine();
        let cbs_batch = vec![
            cbs("Nairobi", "fever", "2025-01-10T10:00:00Z", None),
            cbs("Kisumu", "watery_stool", "2025-01-11T08:00:00Z", None),
        ];
        let emr_batch = vec![
            emr("Nairobi", "Malaria", "2025-01-10T09:00:00Z", None),
            emr("Kisumu", "Cholera", "2025-01-11T10:00:00Z", None),
        ];
        let a = serde_json::to_string(&e.fuse_streams(&cbs_batch, &emr_batch)).unwrap();
        let b = serde_json::to_string(&e.fuse_streams(&cbs_batch, &emr_batch)).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn outbreak_record_publishes_critical_alert() {
        let (tx, mut rx) = mpsc::channel(8);
        let e = FusionEngine::new(Config::default()).with_alert_sender(tx);

        let mut c = cbs("Nairobi", "unknown", "2025-01-10T10:00:00Z", Some("P1"));
        c.extra.insert("outbreak".to_string(), json!(true));
        e.fuse(Some(c), None, None, None).unwrap();

        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(alert.alert_type, "outbreak");
        // redaction rule: no direct subject identifiers in metadata
        assert!(alert.metadata.get("subject_id").is_none());
    }

    #[test]
    fn timeline_orders_by_canonical_timestamp() {
        let e = engine();
        e.fuse(
            Some(cbs("Nairobi", "fever", "2025-02-01T10:00:00Z", Some("P1"))),
            None,
            None,
            None,
        )
        .unwrap();
        e.fuse(
            Some(cbs("Nairobi", "cough", "2025-01-01T10:00:00Z", Some("P1"))),
            None,
            None,
            None,
        )
        .unwrap();
        let timeline = e.get_timeline("P1");
        assert_eq!(timeline.len(), 2);
        assert!(timeline[0].canonical_timestamp < timeline[1].canonical_timestamp);
    }

    #[test]
    fn retention_scenario_181_days() {
        let e = engine();
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let old_ts = (now - chrono::Duration::days(181)).to_rfc3339();
        let young_ts = (now - chrono::Duration::days(179)).to_rfc3339();

        let old = e
            .fuse(Some(cbs("Nairobi", "fever", &old_ts, Some("P1"))), None, None, None)
            .unwrap();
        let young = e
            .fuse(Some(cbs("Nairobi", "fever", &young_ts, Some("P1"))), None, None, None)
            .unwrap();

        let moved = e.sweep_retention_at(now);
        assert_eq!(moved, vec![old.record_id.clone()]);
        assert_eq!(
            e.store().get(&old.record_id).unwrap().retention,
            RetentionTier::Cold
        );
        assert_eq!(
            e.store().get(&young.record_id).unwrap().retention,
            RetentionTier::Hot
        );
    }
}
