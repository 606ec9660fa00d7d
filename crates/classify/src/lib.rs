//! dsaudit_classify
//!
//! Classifier (C3, §4.3): a pure function over a target, its evidence, and
//! the policy snapshot, producing a `QueueRow` plus an `EvaluationManifest`
//! with no I/O besides the manifest write and (for RED rows) the
//! `red_rejected.jsonl` ledger append. Network access, evidence fetching,
//! and file layout live one level up, in the evidence crate and the
//! orchestrator — this crate never dials a socket.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dsaudit_kernel::atomic::write_atomic;
use dsaudit_ledger::LedgerAppender;
use dsaudit_model::{Bucket, DenylistHit, EvidenceSnapshot, LicensePool, QueueRow, Target};
use dsaudit_policy::PolicySnapshot;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("kernel error: {0}")]
    Kernel(#[from] dsaudit_kernel::KernelError),
    #[error("ledger error: {0}")]
    Ledger(#[from] dsaudit_ledger::LedgerError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// §4.4: an enabled target whose strategy is absent from the
    /// acquisition registry is a classify-time error, not a silent noop.
    #[error("target declares unsupported download strategy: {0}")]
    UnsupportedStrategy(String),
}

/// Everything the classifier needs about a target's evidence that is not
/// already in `dsaudit_model::Target`. `evidence_text` is the extracted,
/// not-yet-normalized text from the evidence fetch (see
/// `dsaudit_evidence::extract`); `None` means extraction failed or no
/// evidence was fetched at all.
pub struct ClassificationInput<'a> {
    pub target: &'a Target,
    pub evidence_snapshot: Option<&'a EvidenceSnapshot>,
    pub evidence_text: Option<&'a str>,
    /// Set when C2 ran in offline (`no-fetch`) mode and no prior snapshot
    /// existed to reuse (`EvidenceError::OfflineNoSnapshot`).
    pub offline_no_snapshot: bool,
    pub manifest_dir: String,
    pub evidence_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationManifest {
    pub target_id: String,
    pub bucket: Bucket,
    pub license_profile: dsaudit_model::LicenseProfile,
    pub license_pool: LicensePool,
    pub resolved_spdx: Option<String>,
    pub spdx_confidence: f64,
    pub restriction_hits: Vec<String>,
    pub denylist_hits: Vec<DenylistHit>,
    pub bucket_reasons: Vec<String>,
    pub policy_snapshot_hash: String,
    pub evaluated_at_utc: String,
}

/// Compute the queue row and its evaluation manifest. Calling this twice
/// with unchanged inputs produces byte-identical output (§9's
/// "classify(evidence) twice with unchanged evidence → identical queue
/// row bytes" invariant), since nothing here reads the clock or touches
/// the filesystem.
pub fn classify_target(
    input: &ClassificationInput,
    policy: &PolicySnapshot,
    evaluated_at_utc: &str,
) -> (QueueRow, EvaluationManifest) {
    let target = input.target;

    let mut denylist_hits = Vec::new();
    let mut urls: Vec<String> = target.download.declared_urls();
    urls.push(target.license_evidence.url.clone());
    for url in &urls {
        denylist_hits.extend(policy.denylist_match("url", url));
    }
    if let Some(publisher) = target.routing.subject.as_deref() {
        denylist_hits.extend(policy.denylist_match("publisher", publisher));
    }
    denylist_hits.extend(policy.denylist_match("id", &target.id.0));

    let hard_red = denylist_hits
        .iter()
        .any(|h| h.severity == dsaudit_model::Severity::HardRed);
    let force_yellow = denylist_hits
        .iter()
        .any(|h| h.severity == dsaudit_model::Severity::ForceYellow);

    let evidence_quality_weight = match input.evidence_snapshot {
        Some(snap) if snap.text_extraction_failed => 0.5,
        Some(_) => 1.0,
        None => 0.0,
    };
    let spdx_resolution = match input.evidence_text {
        Some(text) => policy.normalize_spdx(text, evidence_quality_weight),
        None => dsaudit_policy::SpdxResolution { spdx: None, confidence: 0.0, evidence_snippet: None },
    };
    let restriction_hits = match input.evidence_text {
        Some(text) => policy.scan_restriction_phrases(text),
        None => Vec::new(),
    };

    let resolved_spdx = spdx_resolution.spdx.clone();
    let confidence = spdx_resolution.confidence;
    let threshold = policy.screening_thresholds().spdx_confidence_threshold;

    let deny_prefix_hit = resolved_spdx
        .as_deref()
        .map(|s| policy.deny_spdx_prefixes().iter().any(|p| s.starts_with(p.as_str())))
        .unwrap_or(false);
    let allow_hit = resolved_spdx
        .as_deref()
        .map(|s| policy.allow_spdx().iter().any(|a| a == s))
        .unwrap_or(false);
    let conditional_hit = resolved_spdx
        .as_deref()
        .map(|s| policy.conditional_spdx().iter().any(|c| c == s))
        .unwrap_or(false);

    let profile = target.license_profile;
    let profile_default = policy.profile_default_bucket(profile);

    let mut reasons = Vec::new();
    let bucket = if hard_red {
        reasons.push("denylist_hard_red".to_string());
        Bucket::Red
    } else if deny_prefix_hit {
        reasons.push("spdx_deny_prefix".to_string());
        Bucket::Red
    } else if !restriction_hits.is_empty()
        || force_yellow
        || profile == dsaudit_model::LicenseProfile::RecordLevel
        || input.offline_no_snapshot
    {
        if !restriction_hits.is_empty() {
            reasons.push("restriction_phrase_hit".to_string());
        }
        if force_yellow {
            reasons.push("denylist_force_yellow".to_string());
        }
        if profile == dsaudit_model::LicenseProfile::RecordLevel {
            reasons.push("profile_record_level".to_string());
        }
        if input.offline_no_snapshot {
            reasons.push("evidence_missing_offline".to_string());
        }
        Bucket::Yellow
    } else if conditional_hit || confidence < threshold {
        if conditional_hit {
            reasons.push("spdx_conditional".to_string());
        }
        if confidence < threshold {
            reasons.push("spdx_confidence_below_threshold".to_string());
        }
        Bucket::Yellow
    } else if allow_hit && confidence >= threshold && profile_default == Bucket::Green {
        reasons.push("spdx_allow_high_confidence".to_string());
        Bucket::Green
    } else {
        reasons.push("profile_default".to_string());
        profile_default
    };

    let license_pool = target
        .output
        .pool
        .unwrap_or_else(|| match (profile, bucket) {
            (dsaudit_model::LicenseProfile::Copyleft, _) => LicensePool::Copyleft,
            (_, Bucket::Green) => LicensePool::Permissive,
            _ => LicensePool::Quarantine,
        });

    let row = QueueRow {
        target_id: target.id.clone(),
        bucket,
        license_profile: profile,
        license_pool,
        resolved_spdx: resolved_spdx.clone(),
        spdx_confidence: confidence,
        restriction_hits: restriction_hits.clone(),
        denylist_hits: denylist_hits.clone(),
        routing: target.routing.clone(),
        download: target.download.clone(),
        manifest_dir: input.manifest_dir.clone(),
        evidence_ref: input.evidence_ref.clone(),
        policy_snapshot_hash: policy.policy_hash().to_string(),
    };

    let manifest = EvaluationManifest {
        target_id: target.id.0.clone(),
        bucket,
        license_profile: profile,
        license_pool,
        resolved_spdx,
        spdx_confidence: confidence,
        restriction_hits,
        denylist_hits,
        bucket_reasons: reasons,
        policy_snapshot_hash: policy.policy_hash().to_string(),
        evaluated_at_utc: evaluated_at_utc.to_string(),
    };

    (row, manifest)
}

/// Classify `input`, write `evaluation.json` under `input.manifest_dir`,
/// and (for RED rows) append the row to `red_rejected.jsonl` so it never
/// reaches an acquire queue.
///
/// `registry` is the acquisition registry (`dsaudit_acquire::registry()`):
/// an enabled target naming a strategy absent from it is rejected here,
/// before any manifest is written, rather than left to fail later in the
/// acquire stage or pass through as a silent noop.
pub fn classify_and_persist(
    input: &ClassificationInput,
    policy: &PolicySnapshot,
    evaluated_at_utc: &str,
    manifest_dir: &Path,
    red_ledger: &mut LedgerAppender,
    registry: &dsaudit_acquire::StrategyRegistry,
) -> Result<QueueRow, ClassifyError> {
    if input.target.enabled {
        let strategy_name = input.target.download.strategy_name();
        if !registry.contains_key(strategy_name) {
            return Err(ClassifyError::UnsupportedStrategy(strategy_name.to_string()));
        }
    }

    let (row, manifest) = classify_target(input, policy, evaluated_at_utc);

    let manifest_path = manifest_dir.join("evaluation.json");
    write_atomic(&manifest_path, &serde_json::to_vec_pretty(&manifest)?)?;

    if row.bucket == Bucket::Red {
        red_ledger.append(&row)?;
    }

    Ok(row)
}
