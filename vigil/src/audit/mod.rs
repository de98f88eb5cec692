// vigil/src/audit/mod.rs
//
// Scheduled Audit Agent — periodic compliance checks with a remediation
// lifecycle.
//
// A check is data-driven: {id, description, function, frequency,
// default_severity}. Checks run in catalog order under a per-check soft
// deadline; a panicked, failed or timed-out check becomes one synthetic
// High finding (category "System Error") and the run continues.
//
// Remediation routing by severity:
//   Critical  +4h  deadline, immediate alert publish
//   High      +1d  deadline, remediation queue
//   Medium    +7d  deadline, remediation queue
//   Low       +30d deadline, logged only
//   Info      no deadline,   logged only

pub mod checks;
pub mod report;
pub mod scheduler;

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::FusionEngine;
use crate::error::{Result, VigilError};
use crate::events::{iso8601, iso8601_opt, Alert, AlertSeverity};

// ── Severity and lifecycle ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn weight(self) -> f64 {
        match self {
            Self::Critical => 10.0,
            Self::High     => 5.0,
            Self::Medium   => 2.0,
            Self::Low      => 1.0,
            Self::Info     => 0.5,
        }
    }

    /// Default remediation deadline relative to detection. Info findings
    /// carry none.
    pub fn deadline_from(self, detected_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Critical => Some(detected_at + Duration::hours(4)),
            Self::High     => Some(detected_at + Duration::days(1)),
            Self::Medium   => Some(detected_at + Duration::days(7)),
            Self::Low      => Some(detected_at + Duration::days(30)),
            Self::Info     => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "Critical"),
            Self::High     => write!(f, "High"),
            Self::Medium   => write!(f, "Medium"),
            Self::Low      => write!(f, "Low"),
            Self::Info     => write!(f, "Info"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemediationStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub finding_id:        String,
    pub title:             String,
    pub severity:          Severity,
    pub category:          String,
    pub standard:          String,
    pub evidence_location: String,
    #[serde(with = "iso8601")]
    pub detected_at:       DateTime<Utc>,
    #[serde(with = "iso8601_opt", default)]
    pub deadline:          Option<DateTime<Utc>>,
    pub status:            RemediationStatus,
    pub actions:           Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub audit_id:         String,
    pub scope:            Vec<String>,
    #[serde(with = "iso8601")]
    pub started_at:       DateTime<Utc>,
    #[serde(with = "iso8601")]
    pub ended_at:         DateTime<Utc>,
    pub compliance_score: f64,
    pub findings:         Vec<Finding>,
    pub recommendations:  BTreeMap<String, Vec<String>>,
    pub status:           AuditStatus,
}

/// What a check function reports. Severity defaults to the check's
/// registered default when unset.
#[derive(Debug, Clone)]
pub struct FindingDraft {
    pub title:             String,
    pub category:          String,
    pub standard:          String,
    pub severity:          Option<Severity>,
    pub evidence_location: String,
    pub actions:           Vec<String>,
}

// ── Check catalog ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckFrequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Continuous,
}

pub type CheckFuture = Pin<Box<dyn Future<Output = Result<Vec<FindingDraft>>> + Send>>;
pub type CheckFn = Arc<dyn Fn(Arc<CheckContext>) -> CheckFuture + Send + Sync>;

pub struct ComplianceCheck {
    pub id:               String,
    pub description:      String,
    pub frequency:        CheckFrequency,
    pub default_severity: Severity,
    func:                 CheckFn,
}

impl ComplianceCheck {
    pub fn new(
        id: &str,
        description: &str,
        frequency: CheckFrequency,
        default_severity: Severity,
        func: impl Fn(Arc<CheckContext>) -> CheckFuture + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            frequency,
            default_severity,
            func: Arc::new(func),
        }
    }
}

/// Everything a check function may look at: the fusion engine's
/// statistics surface and the artifact directories.
pub struct CheckContext {
    pub engine:       Arc<FusionEngine>,
    pub evidence_dir: PathBuf,
    pub policy_dir:   PathBuf,
    pub reports_dir:  PathBuf,
}

// ── Agent ─────────────────────────────────────────────────────────────────────

pub struct AuditAgent {
    catalog:           Vec<ComplianceCheck>,
    ctx:               Arc<CheckContext>,
    reports_dir:       PathBuf,
    check_deadline:    std::time::Duration,
    alert_tx:          Option<mpsc::Sender<Alert>>,
    /// Append-only finding store; the agent is the single writer.
    findings:          Mutex<Vec<Finding>>,
    remediation_queue: Mutex<VecDeque<String>>,
}

impl AuditAgent {
    pub fn new(config: &Config, ctx: CheckContext) -> Self {
        Self::with_catalog(config, ctx, checks::seed_catalog())
    }

    /// Build with an explicit catalog instead of the seed set.
    pub fn with_catalog(
        config: &Config,
        ctx: CheckContext,
        catalog: Vec<ComplianceCheck>,
    ) -> Self {
        let reports_dir = ctx.reports_dir.clone();
        Self {
            catalog,
            ctx: Arc::new(ctx),
            reports_dir,
            check_deadline: std::time::Duration::from_secs(config.audit.check_deadline_seconds),
            alert_tx: None,
            findings: Mutex::new(Vec::new()),
            remediation_queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_alert_sender(mut self, tx: mpsc::Sender<Alert>) -> Self {
        self.alert_tx = Some(tx);
        self
    }

    /// Register an additional check. Execution order is registration
    /// order, so runs stay deterministic given the catalog.
    pub fn register(&mut self, check: ComplianceCheck) {
        self.catalog.push(check);
    }

    pub fn catalog_summary(&self) -> Vec<(String, CheckFrequency)> {
        self.catalog
            .iter()
            .map(|c| (c.id.clone(), c.frequency))
            .collect()
    }

    /// All findings accumulated so far, across runs.
    pub fn findings(&self) -> Vec<Finding> {
        self.findings.lock().clone()
    }

    pub fn remediation_queue(&self) -> Vec<String> {
        self.remediation_queue.lock().iter().cloned().collect()
    }

    /// Run every check in the catalog.
    pub async fn run_all(&self) -> Result<AuditReport> {
        self.run_scope(None).await
    }

    /// Run the named checks (or all when `scope` is None), accumulate
    /// findings, persist the report atomically, and return it.
    pub async fn run_scope(&self, scope: Option<&[String]>) -> Result<AuditReport> {
        let started_at = Utc::now();
        let audit_id = uuid::Uuid::new_v4().to_string();

        let selected: Vec<&ComplianceCheck> = self
            .catalog
            .iter()
            .filter(|c| scope.map(|ids| ids.contains(&c.id)).unwrap_or(true))
            .collect();

        if let Some(ids) = scope {
            for id in ids {
                if !self.catalog.iter().any(|c| &c.id == id) {
                    return Err(VigilError::Validation(format!("unknown check id {id}")));
                }
            }
        }

        info!(audit_id = %audit_id, checks = selected.len(), "audit run started");

        let mut findings = Vec::new();
        for check in &selected {
            let drafts = self.execute_check(check).await;
            for draft in drafts {
                findings.push(self.materialize(check, draft));
            }
        }

        let compliance_score = compliance_score(&findings);
        let mut recommendations: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for finding in &findings {
            recommendations
                .entry(finding.category.clone())
                .or_insert_with(|| checks::recommendations_for(&finding.category));
        }

        let report = AuditReport {
            audit_id,
            scope: selected.iter().map(|c| c.id.clone()).collect(),
            started_at,
            ended_at: Utc::now(),
            compliance_score,
            findings: findings.clone(),
            recommendations,
            status: AuditStatus::Completed,
        };

        report::persist_report(&self.reports_dir, &report)?;
        self.findings.lock().extend(findings);

        info!(
            audit_id = %report.audit_id,
            score = report.compliance_score,
            findings = report.findings.len(),
            "audit run completed"
        );
        Ok(report)
    }

    /// Run one check, swallowing its `Check` error into finding drafts.
    /// Never errors — that is the point: the run continues.
    async fn execute_check(&self, check: &ComplianceCheck) -> Vec<FindingDraft> {
        match self.run_check(check).await {
            Ok(drafts) => drafts,
            Err(err) => {
                let reason = match &err {
                    VigilError::Check { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                error!(check = %check.id, "{err}");
                vec![synthetic_failure(&check.id, &reason)]
            }
        }
    }

    /// Drive one check under the soft deadline. A check that fails,
    /// panics or exceeds its deadline is a `Check` error.
    async fn run_check(&self, check: &ComplianceCheck) -> Result<Vec<FindingDraft>> {
        let fut = (check.func)(self.ctx.clone());
        let mut handle = tokio::spawn(fut);

        match tokio::time::timeout(self.check_deadline, &mut handle).await {
            Ok(Ok(Ok(drafts))) => Ok(drafts),
            Ok(Ok(Err(e))) => Err(VigilError::Check {
                check_id: check.id.clone(),
                reason:   format!("check failed: {e}"),
            }),
            Ok(Err(join_err)) => Err(VigilError::Check {
                check_id: check.id.clone(),
                reason:   if join_err.is_panic() {
                    "check panicked".to_string()
                } else {
                    "check aborted".to_string()
                },
            }),
            Err(_elapsed) => {
                handle.abort();
                Err(VigilError::Check {
                    check_id: check.id.clone(),
                    reason:   "check exceeded soft deadline".to_string(),
                })
            }
        }
    }

    fn materialize(&self, check: &ComplianceCheck, draft: FindingDraft) -> Finding {
        let detected_at = Utc::now();
        let severity = draft.severity.unwrap_or(check.default_severity);
        let finding = Finding {
            finding_id: uuid::Uuid::new_v4().to_string(),
            title: draft.title,
            severity,
            category: draft.category,
            standard: draft.standard,
            evidence_location: draft.evidence_location,
            detected_at,
            deadline: severity.deadline_from(detected_at),
            status: RemediationStatus::NotStarted,
            actions: draft.actions,
        };

        match severity {
            Severity::Critical => self.publish_alert(&finding),
            Severity::High | Severity::Medium => {
                self.remediation_queue.lock().push_back(finding.finding_id.clone());
                info!(finding = %finding.finding_id, severity = %severity, "queued for remediation");
            }
            Severity::Low | Severity::Info => {
                info!(finding = %finding.finding_id, severity = %severity, "{}", finding.title);
            }
        }
        finding
    }

    fn publish_alert(&self, finding: &Finding) {
        let Some(ref tx) = self.alert_tx else {
            warn!(finding = %finding.finding_id, "critical finding with no alert topic wired");
            return;
        };
        let mut metadata = BTreeMap::new();
        metadata.insert("finding_id".to_string(), json!(finding.finding_id));
        metadata.insert("category".to_string(), json!(finding.category));
        metadata.insert("standard".to_string(), json!(finding.standard));

        let alert = Alert {
            alert_id:   uuid::Uuid::new_v4().to_string(),
            alert_type: "compliance".to_string(),
            severity:   AlertSeverity::Critical,
            title:      finding.title.clone(),
            message:    format!("{} [{}]", finding.title, finding.standard),
            location:   finding.evidence_location.clone(),
            timestamp:  finding.detected_at,
            metadata,
        };
        if let Err(e) = tx.try_send(alert) {
            warn!("alert topic full or closed: {e}");
        }
    }
}

fn synthetic_failure(check_id: &str, reason: &str) -> FindingDraft {
    FindingDraft {
        title:             format!("{check_id}: {reason}"),
        category:          "System Error".to_string(),
        standard:          "internal".to_string(),
        severity:          Some(Severity::High),
        evidence_location: format!("check:{check_id}"),
        actions:           vec!["Inspect the check implementation and its inputs".to_string()],
    }
}

/// Score a single run's findings:
///   100 − (Σ weight / (10·|F|)) · 100, floored at 0; 100 when empty.
pub fn compliance_score(findings: &[Finding]) -> f64 {
    if findings.is_empty() {
        return 100.0;
    }
    let total: f64 = findings.iter().map(|f| f.severity.weight()).sum();
    (100.0 - (total / (10.0 * findings.len() as f64)) * 100.0).max(0.0)
}
