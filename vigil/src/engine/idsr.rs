// vigil/src/engine/idsr.rs
//
// IDSR report derivation — the regulatory-shaped view of a FusedRecord.
//
// Disease code selection is a keyword match on the lowercased diagnosis
// (leftmost match wins; the dictionary order breaks position ties).
// Derivation reads only the record, so re-deriving from an unchanged
// record yields byte-identical JSON.

use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, MatchKind};

use crate::events::{FusedRecord, IdsrReport, IdsrVerification};

/// Keyword → IDSR disease code. Order matters: it is the tie-break when
/// two keywords match at the same position.
const DISEASE_CODES: &[(&str, &str)] = &[
    ("malaria",      "MAL001"),
    ("cholera",      "CHOL001"),
    ("measles",      "MEAS001"),
    ("tuberculosis", "TB001"),
    ("typhoid",      "TYPH001"),
    ("meningitis",   "MEN001"),
    ("yellow fever", "YF001"),
    ("polio",        "POLIO001"),
    ("influenza",    "FLU001"),
    ("covid",        "COV001"),
    ("dengue",       "DEN001"),
    ("ebola",        "EBO001"),
    ("hepatitis",    "HEP001"),
];

pub const UNKNOWN_CODE: &str = "UNKNOWN";
pub const INITIAL_STATUS: &str = "PENDING_REVIEW";

fn matcher() -> &'static AhoCorasick {
    static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
    MATCHER.get_or_init(|| {
        AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .build(DISEASE_CODES.iter().map(|(kw, _)| *kw))
            .expect("disease keyword set is static and valid")
    })
}

pub fn disease_code(diagnosis: &str) -> &'static str {
    let haystack = diagnosis.to_lowercase();
    matcher()
        .find(&haystack)
        .map(|m| DISEASE_CODES[m.pattern().as_usize()].1)
        .unwrap_or(UNKNOWN_CODE)
}

/// Derive the IDSR report from a fused record (the record's own
/// `idsr_report` field is ignored).
pub fn derive(record: &FusedRecord) -> IdsrReport {
    let diagnosis = record
        .canonical_payload
        .get("diagnosis")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let summary_diagnosis = if diagnosis.is_empty() { "none recorded" } else { diagnosis };
    let clinical_summary = format!(
        "{} at {} on {}; diagnosis: {}",
        record.event_type,
        record.location,
        record.canonical_timestamp.format("%Y-%m-%d"),
        summary_diagnosis
    );

    IdsrReport {
        disease_code: disease_code(diagnosis).to_string(),
        clinical_summary,
        verification_metadata: IdsrVerification {
            tier:    record.verification.to_string(),
            score:   record.verification.score(),
            sources: record.sources.keys().cloned().collect(),
        },
        submission_status: INITIAL_STATUS.to_string(),
    }
}
