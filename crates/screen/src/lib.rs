//! YELLOW screener (C5, §4.5): signoff gating, field-selection
//! canonicalization, and strict pitch rules for raw YELLOW records.
//! "Anything unclear is pitched" is the governing rule, so every check
//! below has exactly one way to pass and every other outcome is a named
//! pitch reason — there is no best-effort fallback the way the evidence
//! fetcher's text extraction has one.
//!
//! The canonicalization core (`canonicalize_record`, `signoff_gate`) is
//! pure: no I/O, no clock reads, same shape as the classifier's pure core
//! in `dsaudit_classify`. `runner` does the directory walk, shard writing,
//! and ledger appends around it.

pub mod runner;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dsaudit_model::{
    CanonicalRecord, QueueRow, RecordHash, RecordLicense, RecordSource, RoutingSpec,
    SignoffRecord, SignoffStatus, Target,
};
use dsaudit_policy::config::ScreeningConfig;

#[derive(Debug, Error)]
pub enum ScreenError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("kernel error: {0}")]
    Kernel(#[from] dsaudit_kernel::KernelError),
    #[error("ledger error: {0}")]
    Ledger(#[from] dsaudit_ledger::LedgerError),
}

/// Per-(target,reason) cap on full-payload samples written to
/// `_pitches/yellow_pitch.jsonl` (§4.5 "Pitch accounting"). Beyond this,
/// only the ledger row is kept.
pub const DEFAULT_PITCH_SAMPLE_CAP: usize = 25;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YellowPassedRow {
    pub target_id: String,
    pub record_id: String,
    pub shard: String,
    pub content_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YellowPitchedRow {
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub reason: String,
    pub sample_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YellowPitchSample {
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub reason: String,
    pub payload: serde_json::Value,
}

/// Evaluate the signoff gate (§4.5 "Signoff gating"). `Some(reason)` means
/// the entire target must be pitched without inspecting any of its
/// records; `None` means screening may proceed record-by-record.
///
/// A `pending` signoff is treated the same as no signoff file at all —
/// the spec names `signoff_missing`/`signoff_rejected`/`signoff_stale` but
/// is silent on `pending`, and "anything unclear is pitched" resolves that
/// silence towards blocking rather than passing through.
pub fn signoff_gate(
    require_yellow_signoff: bool,
    target: &Target,
    signoff: Option<&SignoffRecord>,
    current_evidence_hash: &str,
) -> Option<&'static str> {
    if !require_yellow_signoff || target.yellow_screen.allow_without_signoff {
        return None;
    }
    match signoff {
        None => Some("signoff_missing"),
        Some(s) => match s.status {
            SignoffStatus::Rejected => Some("signoff_rejected"),
            SignoffStatus::Pending => Some("signoff_missing"),
            SignoffStatus::Approved => {
                if s.evidence_hash_at_signoff != current_evidence_hash {
                    Some("signoff_stale")
                } else {
                    None
                }
            }
        },
    }
}

pub enum CanonicalizeOutcome {
    Passed(CanonicalRecord),
    Pitched {
        record_id: Option<String>,
        reason: String,
        payload: serde_json::Value,
    },
}

/// Canonicalize one raw record against its queue row (§4.5
/// "Canonicalization", steps 1-6). `record_id` is assigned by the caller —
/// a raw record is not guaranteed to carry its own identifier, so the
/// runner derives one from sorted input position for determinism.
pub fn canonicalize_record(
    raw: &serde_json::Value,
    record_id: &str,
    row: &QueueRow,
    screening: &ScreeningConfig,
    require_record_license: bool,
    target_allowlist: &[String],
    source: RecordSource,
) -> CanonicalizeOutcome {
    let pitch = |reason: String| CanonicalizeOutcome::Pitched {
        record_id: Some(record_id.to_string()),
        reason,
        payload: raw.clone(),
    };

    let text = match select_field(raw, &screening.text_field_candidates) {
        Some(t) if !t.trim().is_empty() => t,
        _ => return pitch("missing_text_field".into()),
    };

    let len = text.chars().count();
    if len < screening.min_chars {
        return pitch("text_too_short".into());
    }
    if len > screening.max_chars {
        return pitch("text_too_long".into());
    }

    let record_license = select_field(raw, &screening.record_license_field_candidates);
    if require_record_license {
        match &record_license {
            Some(spdx) if is_allowed_license(spdx, &screening.allow_spdx, target_allowlist) => {}
            _ => return pitch("record_license_not_allowed".into()),
        }
    }

    let mut scan_fields: Vec<String> = vec![text.clone()];
    for field in screening
        .text_field_candidates
        .iter()
        .chain(screening.record_license_field_candidates.iter())
    {
        if let Some(v) = raw.get(field).and_then(|v| v.as_str()) {
            scan_fields.push(v.to_string());
        }
    }

    for phrase in &screening.deny_phrases {
        let needle = phrase.to_lowercase();
        if scan_fields.iter().any(|f| f.to_lowercase().contains(&needle)) {
            return pitch(format!("deny_phrase_hit:{phrase}"));
        }
    }

    let content_sha256 = dsaudit_kernel::sha256_normalized_text(&text);
    let routing = merge_routing(raw.get("routing"), &row.routing);

    let record = CanonicalRecord {
        record_id: record_id.to_string(),
        text,
        license: RecordLicense {
            spdx: record_license,
            profile: row.license_profile,
        },
        routing,
        source,
        hash: RecordHash { content_sha256 },
        metadata: raw.get("metadata").cloned(),
    };

    CanonicalizeOutcome::Passed(record)
}

/// Select the first non-empty string field present in `raw` from
/// `candidates`, in order. Shared with the merger's GREEN canonicalization
/// pass, which selects `text` the same way but without any pitch rules.
pub fn select_field(raw: &serde_json::Value, candidates: &[String]) -> Option<String> {
    candidates.iter().find_map(|field| {
        raw.get(field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    })
}

fn is_allowed_license(spdx: &str, allow_spdx: &[String], target_allowlist: &[String]) -> bool {
    allow_spdx.iter().any(|a| a.eq_ignore_ascii_case(spdx))
        || target_allowlist.iter().any(|a| a.eq_ignore_ascii_case(spdx))
}

/// Stamp `routing` from the queue row wherever the raw record's own
/// `routing` object (if any) leaves a subfield null/absent.
fn merge_routing(raw_routing: Option<&serde_json::Value>, fallback: &RoutingSpec) -> RoutingSpec {
    let Some(raw_routing) = raw_routing else {
        return fallback.clone();
    };
    let parsed: RoutingSpec = serde_json::from_value(raw_routing.clone()).unwrap_or_default();
    RoutingSpec {
        subject: parsed.subject.or_else(|| fallback.subject.clone()),
        domain: parsed.domain.or_else(|| fallback.domain.clone()),
        category: parsed.category.or_else(|| fallback.category.clone()),
        granularity: parsed.granularity.or_else(|| fallback.granularity.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsaudit_model::{Bucket, DownloadSpec, LicensePool, LicenseProfile, YellowScreenSpec};
    use serde_json::json;

    fn screening() -> ScreeningConfig {
        ScreeningConfig {
            min_chars: 5,
            max_chars: 1000,
            text_field_candidates: vec!["text".into(), "body".into()],
            record_license_field_candidates: vec!["license".into()],
            require_record_license: false,
            allow_spdx: vec!["MIT".into(), "CC0-1.0".into()],
            deny_phrases: vec!["no ai training".into()],
            spdx_confidence_threshold: 0.8,
        }
    }

    fn row() -> QueueRow {
        QueueRow {
            target_id: dsaudit_model::TargetId("t1".into()),
            bucket: Bucket::Yellow,
            license_profile: LicenseProfile::RecordLevel,
            license_pool: LicensePool::Quarantine,
            resolved_spdx: None,
            spdx_confidence: 0.0,
            restriction_hits: vec![],
            denylist_hits: vec![],
            routing: RoutingSpec { subject: Some("science".into()), domain: None, category: None, granularity: None },
            download: DownloadSpec::Http { urls: vec![], checksum_sha256: None, max_bytes: None },
            manifest_dir: "t1".into(),
            evidence_ref: "manifests/t1/license_evidence.json".into(),
            policy_snapshot_hash: "sha256:deadbeef".into(),
        }
    }

    fn source() -> RecordSource {
        RecordSource {
            target_id: dsaudit_model::TargetId("t1".into()),
            url: Some("https://example.com/data.jsonl".into()),
            retrieved_at_utc: "2026-01-01T00:00:00Z".into(),
            content_type: Some("application/jsonl".into()),
            publisher: None,
        }
    }

    #[test]
    fn record_with_valid_text_and_no_license_requirement_passes() {
        let raw = json!({"text": "A reasonably long passage of text."});
        let outcome = canonicalize_record(&raw, "t1#0", &row(), &screening(), false, &[], source());
        assert!(matches!(outcome, CanonicalizeOutcome::Passed(_)));
    }

    #[test]
    fn missing_text_field_is_pitched() {
        let raw = json!({"other": "value"});
        let outcome = canonicalize_record(&raw, "t1#0", &row(), &screening(), false, &[], source());
        match outcome {
            CanonicalizeOutcome::Pitched { reason, .. } => assert_eq!(reason, "missing_text_field"),
            _ => panic!("expected pitch"),
        }
    }

    #[test]
    fn text_below_min_chars_is_pitched() {
        let raw = json!({"text": "hi"});
        let outcome = canonicalize_record(&raw, "t1#0", &row(), &screening(), false, &[], source());
        match outcome {
            CanonicalizeOutcome::Pitched { reason, .. } => assert_eq!(reason, "text_too_short"),
            _ => panic!("expected pitch"),
        }
    }

    #[test]
    fn deny_phrase_hit_is_pitched_case_insensitively() {
        let raw = json!({"text": "No AI Training permitted for this corpus ever."});
        let outcome = canonicalize_record(&raw, "t1#0", &row(), &screening(), false, &[], source());
        match outcome {
            CanonicalizeOutcome::Pitched { reason, .. } => assert!(reason.starts_with("deny_phrase_hit:")),
            _ => panic!("expected pitch"),
        }
    }

    #[test]
    fn required_record_license_must_be_in_allow_set() {
        let mut screening = screening();
        screening.require_record_license = true;
        let raw = json!({"text": "A reasonably long passage of text.", "license": "GPL-3.0"});
        let outcome = canonicalize_record(&raw, "t1#0", &row(), &screening, true, &[], source());
        match outcome {
            CanonicalizeOutcome::Pitched { reason, .. } => assert_eq!(reason, "record_license_not_allowed"),
            _ => panic!("expected pitch"),
        }
    }

    #[test]
    fn target_allowlist_extends_global_allow_spdx() {
        let mut screening = screening();
        screening.require_record_license = true;
        let raw = json!({"text": "A reasonably long passage of text.", "license": "CC-BY-4.0"});
        let outcome = canonicalize_record(&raw, "t1#0", &row(), &screening, true, &["CC-BY-4.0".to_string()], source());
        assert!(matches!(outcome, CanonicalizeOutcome::Passed(_)));
    }

    #[test]
    fn routing_falls_back_to_queue_row_when_raw_record_has_none() {
        let raw = json!({"text": "A reasonably long passage of text."});
        let outcome = canonicalize_record(&raw, "t1#0", &row(), &screening(), false, &[], source());
        match outcome {
            CanonicalizeOutcome::Passed(record) => assert_eq!(record.routing.subject.as_deref(), Some("science")),
            _ => panic!("expected pass"),
        }
    }

    #[test]
    fn signoff_gate_blocks_on_missing_signoff() {
        let target = Target {
            id: dsaudit_model::TargetId("t1".into()),
            enabled: true,
            license_profile: LicenseProfile::RecordLevel,
            license_evidence: dsaudit_model::LicenseEvidenceRef { spdx_hint: None, url: "https://example.com".into() },
            download: DownloadSpec::Http { urls: vec![], checksum_sha256: None, max_bytes: None },
            routing: Default::default(),
            output: Default::default(),
            yellow_screen: YellowScreenSpec::default(),
        };
        let reason = signoff_gate(true, &target, None, "sha256:abc");
        assert_eq!(reason, Some("signoff_missing"));
    }

    #[test]
    fn signoff_gate_detects_stale_evidence() {
        let target = Target {
            id: dsaudit_model::TargetId("t1".into()),
            enabled: true,
            license_profile: LicenseProfile::RecordLevel,
            license_evidence: dsaudit_model::LicenseEvidenceRef { spdx_hint: None, url: "https://example.com".into() },
            download: DownloadSpec::Http { urls: vec![], checksum_sha256: None, max_bytes: None },
            routing: Default::default(),
            output: Default::default(),
            yellow_screen: YellowScreenSpec::default(),
        };
        let signoff = SignoffRecord {
            status: SignoffStatus::Approved,
            reviewer: "alice".into(),
            reviewer_contact: "alice@example.com".into(),
            reviewed_at_utc: "2026-01-01T00:00:00Z".into(),
            evidence_links_checked: vec![],
            constraints: vec![],
            notes: String::new(),
            evidence_hash_at_signoff: "sha256:old".into(),
        };
        let reason = signoff_gate(true, &target, Some(&signoff), "sha256:new");
        assert_eq!(reason, Some("signoff_stale"));
    }

    #[test]
    fn signoff_gate_passes_when_approved_and_fresh() {
        let target = Target {
            id: dsaudit_model::TargetId("t1".into()),
            enabled: true,
            license_profile: LicenseProfile::RecordLevel,
            license_evidence: dsaudit_model::LicenseEvidenceRef { spdx_hint: None, url: "https://example.com".into() },
            download: DownloadSpec::Http { urls: vec![], checksum_sha256: None, max_bytes: None },
            routing: Default::default(),
            output: Default::default(),
            yellow_screen: YellowScreenSpec::default(),
        };
        let signoff = SignoffRecord {
            status: SignoffStatus::Approved,
            reviewer: "alice".into(),
            reviewer_contact: "alice@example.com".into(),
            reviewed_at_utc: "2026-01-01T00:00:00Z".into(),
            evidence_links_checked: vec![],
            constraints: vec![],
            notes: String::new(),
            evidence_hash_at_signoff: "sha256:abc".into(),
        };
        let reason = signoff_gate(true, &target, Some(&signoff), "sha256:abc");
        assert_eq!(reason, None);
    }
}
