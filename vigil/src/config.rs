// vigil/src/config.rs
//
// Typed configuration record for the surveillance core.
//
// One struct per section, serde `deny_unknown_fields` throughout — an
// unrecognized key is rejected at load time, not discovered in
// production. Every option has the documented default, so an empty file
// (or no file) yields a fully working config.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Hot → Cold threshold in days.
    pub retention_days: i64,
    pub entanglement: EntanglementConfig,
    /// Content-matching table: CBS symptom → plausible EMR diagnoses.
    pub symptom_diagnosis_map: BTreeMap<String, Vec<String>>,
    pub audit: AuditConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EntanglementConfig {
    /// λ in the score formula. Negative — larger time deltas decay the score.
    pub temporal_decay: f64,
    /// (W_T, W_C) — temporal and content weights.
    pub weights: (f64, f64),
    /// Entangled cutoff.
    pub threshold_high: f64,
    /// Probable cutoff.
    pub threshold_medium: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuditConfig {
    /// Scheduler granularity in seconds.
    pub tick_seconds: u64,
    /// Per-check soft deadline in seconds.
    pub check_deadline_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DispatchConfig {
    /// Per-channel send timeout in seconds.
    pub channel_timeout_seconds: u64,
    /// Alert-id dedup window for the chat channel, in seconds.
    pub dedup_window_seconds: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retention_days:        180,
            entanglement:          EntanglementConfig::default(),
            symptom_diagnosis_map: seed_symptom_map(),
            audit:                 AuditConfig::default(),
            dispatch:              DispatchConfig::default(),
        }
    }
}

impl Default for EntanglementConfig {
    fn default() -> Self {
        Self {
            temporal_decay:   -0.05,
            weights:          (0.7, 0.3),
            threshold_high:   0.85,
            threshold_medium: 0.5,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { tick_seconds: 300, check_deadline_seconds: 30 }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { channel_timeout_seconds: 60, dedup_window_seconds: 600 }
    }
}

/// Built-in seed for the symptom → diagnosis table. Operators extend it
/// via `symptom_diagnosis_map` in the config file.
fn seed_symptom_map() -> BTreeMap<String, Vec<String>> {
    let seed: &[(&str, &[&str])] = &[
        ("fever",        &["Malaria", "Typhoid", "Yellow Fever"]),
        ("watery_stool", &["Cholera", "Acute Diarrhea"]),
        ("cough",        &["Tuberculosis", "Pneumonia", "Influenza"]),
        ("rash",         &["Measles"]),
        ("headache",     &["Malaria", "Meningitis"]),
        ("jaundice",     &["Yellow Fever", "Hepatitis"]),
        ("bleeding",     &["Ebola", "Dengue"]),
        ("vomiting",     &["Cholera", "Typhoid"]),
    ];
    seed.iter()
        .map(|(sym, dxs)| {
            (sym.to_string(), dxs.iter().map(|d| d.to_string()).collect())
        })
        .collect()
}

impl Config {
    /// Load from a JSON file. Unknown keys are a `Validation` error.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| VigilError::Validation(format!("config {}: {e}", path.display())))
    }

    /// True when the CBS symptom maps to the EMR diagnosis in the table.
    pub fn symptom_matches_diagnosis(&self, symptom: &str, diagnosis: &str) -> bool {
        if diagnosis.is_empty() {
            return false;
        }
        let dx = diagnosis.to_lowercase();
        self.symptom_diagnosis_map
            .get(symptom)
            .map(|cands| cands.iter().any(|c| dx.contains(&c.to_lowercase())))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_table() {
        let c = Config::default();
        assert_eq!(c.retention_days, 180);
        assert_eq!(c.entanglement.temporal_decay, -0.05);
        assert_eq!(c.entanglement.weights, (0.7, 0.3));
        assert_eq!(c.entanglement.threshold_high, 0.85);
        assert_eq!(c.entanglement.threshold_medium, 0.5);
        assert_eq!(c.audit.tick_seconds, 300);
        assert_eq!(c.audit.check_deadline_seconds, 30);
        assert_eq!(c.dispatch.channel_timeout_seconds, 60);
        assert_eq!(c.dispatch.dedup_window_seconds, 600);
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = serde_json::from_str::<Config>(r#"{"retension_days": 90}"#);
        assert!(err.is_err());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let c: Config = serde_json::from_str(r#"{"retention_days": 30}"#).unwrap();
        assert_eq!(c.retention_days, 30);
        assert_eq!(c.audit.tick_seconds, 300);
    }

    #[test]
    fn symptom_diagnosis_matching() {
        let c = Config::default();
        assert!(c.symptom_matches_diagnosis("watery_stool", "Cholera"));
        assert!(c.symptom_matches_diagnosis("fever", "Severe Malaria"));
        assert!(!c.symptom_matches_diagnosis("fever", "Fracture"));
        assert!(!c.symptom_matches_diagnosis("fever", ""));
        assert!(!c.symptom_matches_diagnosis("unknown", "Malaria"));
    }
}
