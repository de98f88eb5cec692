// vigil/src/audit/report.rs
//
// Atomic audit-report persistence: write to a dotfile, then rename.
// Consumers reading the reports directory never observe a half-written
// `audit_report_<audit_id>.json`.

use std::path::{Path, PathBuf};

use crate::audit::AuditReport;
use crate::error::{Result, VigilError};

pub fn report_file_name(audit_id: &str) -> String {
    format!("audit_report_{audit_id}.json")
}

pub fn persist_report(dir: &Path, report: &AuditReport) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let final_path = dir.join(report_file_name(&report.audit_id));
    let tmp_path = dir.join(format!(".audit_report_{}.json.tmp", report.audit_id));

    let body = serde_json::to_vec_pretty(report)
        .map_err(|e| VigilError::Integrity(format!("report serialization: {e}")))?;
    std::fs::write(&tmp_path, &body)?;
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(final_path)
}

pub fn load_report(path: &Path) -> Result<AuditReport> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| VigilError::Validation(format!("report {}: {e}", path.display())))
}
