//! dsaudit_policy
//!
//! Policy store (C1): loads the license map, denylist, and screening
//! globals from the configured companion files and exposes the read-only
//! operations the classifier (C3) and screener (C5) need. A
//! `PolicySnapshot` is immutable once built and carries a content hash
//! (`policy_hash`) that every downstream artifact references, per
//! `spec.md` §9's "flatten at load time into the immutable PolicySnapshot;
//! no lazy cross-references at runtime."

pub mod config;
mod denylist;
mod spdx;

use std::path::Path;

use thiserror::Error;

use dsaudit_kernel::sha256_canonical_json;
use dsaudit_model::{Bucket, DenylistHit, LicenseProfile};

pub use config::{GlobalsConfig, TargetsConfig};
pub use denylist::Denylist;
pub use spdx::{NormalizationRulebook, SpdxResolution};

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("canonical json error: {0}")]
    Canon(#[from] dsaudit_kernel::CanonError),
}

#[derive(Debug, Clone, serde::Serialize)]
struct HashableSnapshot<'a> {
    schema_version: &'a str,
    license_map: &'a config::LicenseMapConfig,
    denylist_patterns: &'a [config::DenylistPatternConfig],
    screening: &'a config::ScreeningConfig,
}

pub struct PolicySnapshot {
    targets_schema_version: String,
    license_map: config::LicenseMapConfig,
    denylist_cfg: config::DenylistConfig,
    denylist: Denylist,
    rulebook: NormalizationRulebook,
    screening: config::ScreeningConfig,
    hash: String,
}

impl PolicySnapshot {
    pub fn load(
        targets_yaml: impl AsRef<Path>,
        license_map_path_override: Option<&Path>,
        denylist_path_override: Option<&Path>,
    ) -> Result<Self, PolicyError> {
        let targets_cfg = TargetsConfig::load(&targets_yaml)?;
        let base_dir = targets_yaml
            .as_ref()
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();

        let license_map_path = license_map_path_override
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base_dir.join(&targets_cfg.companion_files.license_map));
        let denylist_path = denylist_path_override
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base_dir.join(&targets_cfg.companion_files.denylist));

        let license_map = config::LicenseMapConfig::load(license_map_path)?;
        let denylist_cfg = config::DenylistConfig::load(denylist_path)?;
        let denylist = Denylist::compile(&denylist_cfg)?;
        let rulebook = NormalizationRulebook::new(license_map.normalization.rules.clone());
        let screening = targets_cfg.globals.screening.clone();

        let hashable = HashableSnapshot {
            schema_version: &targets_cfg.schema_version,
            license_map: &license_map,
            denylist_patterns: &denylist_cfg.patterns,
            screening: &screening,
        };
        let hash = sha256_canonical_json(&hashable)?;

        Ok(Self {
            targets_schema_version: targets_cfg.schema_version,
            license_map,
            denylist_cfg,
            denylist,
            rulebook,
            screening,
            hash,
        })
    }

    pub fn schema_version(&self) -> &str {
        &self.targets_schema_version
    }

    pub fn policy_hash(&self) -> &str {
        &self.hash
    }

    pub fn allow_spdx(&self) -> &[String] {
        &self.license_map.spdx.allow
    }

    pub fn conditional_spdx(&self) -> &[String] {
        &self.license_map.spdx.conditional
    }

    pub fn deny_spdx_prefixes(&self) -> &[String] {
        &self.license_map.spdx.deny_prefixes
    }

    pub fn restriction_phrases(&self) -> &[String] {
        &self.license_map.restriction_scan.phrases
    }

    pub fn screening_thresholds(&self) -> &config::ScreeningConfig {
        &self.screening
    }

    /// Longest-match SPDX normalization over `text`; `evidence_quality_weight`
    /// should be 1.0 for a clean text extraction and lower when
    /// `text_extraction_failed` was set on the evidence snapshot.
    pub fn normalize_spdx(&self, text: &str, evidence_quality_weight: f64) -> SpdxResolution {
        self.rulebook.normalize(text, evidence_quality_weight)
    }

    /// Scan `text` for any configured restriction phrase (case-insensitive
    /// substring match), returning the matched phrases.
    pub fn scan_restriction_phrases(&self, text: &str) -> Vec<String> {
        let haystack = text.to_lowercase();
        self.restriction_phrases()
            .iter()
            .filter(|p| haystack.contains(&p.to_lowercase()))
            .cloned()
            .collect()
    }

    pub fn denylist_match(&self, field: &str, value: &str) -> Vec<DenylistHit> {
        self.denylist.matches(field, value)
    }

    pub fn profile_default_bucket(&self, profile: LicenseProfile) -> Bucket {
        let key = config::LicenseMapConfig::profile_key(profile);
        self.license_map
            .profiles
            .get(key)
            .map(|p| p.default_bucket.into())
            .unwrap_or(Bucket::Yellow)
    }

    pub fn unknown_spdx_bucket(&self) -> Bucket {
        self.license_map.gating.unknown_spdx_bucket.into()
    }

    pub fn conditional_spdx_bucket(&self) -> Bucket {
        self.license_map.gating.conditional_spdx_bucket.into()
    }

    pub fn deny_spdx_bucket(&self) -> Bucket {
        self.license_map.gating.deny_spdx_bucket.into()
    }

    pub fn restriction_phrase_bucket(&self) -> Bucket {
        self.license_map.gating.restriction_phrase_bucket.into()
    }

    /// Raw denylist patterns, exposed for callers (e.g. the catalog
    /// builder) that need to report denylist provenance without
    /// re-parsing the YAML.
    pub fn denylist_patterns(&self) -> &[config::DenylistPatternConfig] {
        &self.denylist_cfg.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let p = dir.join(name);
        let mut f = std::fs::File::create(&p).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        p
    }

    fn sample_targets_yaml() -> &'static str {
        r#"
schema_version: "1"
companion_files:
  license_map: license_map.yaml
  denylist: denylist.yaml
  field_schemas: field_schemas.yaml
globals:
  raw_root: raw
  screened_yellow_root: screened_yellow
  combined_root: combined
  queues_root: queues
  manifests_root: manifests
  ledger_root: ledger
  pitches_root: pitches
  catalogs_root: catalogs
  logs_root: logs
  sharding:
    max_records_per_shard: 10000
    compression: gzip
  screening:
    min_chars: 10
    max_chars: 1000
    text_field_candidates: ["text"]
    record_license_field_candidates: ["license"]
    require_record_license: false
    allow_spdx: ["MIT"]
    deny_phrases: ["no ai"]
  require_yellow_signoff: true
targets: []
"#
    }

    fn sample_license_map_yaml() -> &'static str {
        r#"
spdx:
  allow: ["MIT"]
  conditional: ["CC-BY-NC-4.0"]
  deny_prefixes: ["GPL"]
normalization:
  rules:
    - match_any: ["Licensed under the MIT License"]
      spdx: "MIT"
      confidence: 0.95
restriction_scan:
  phrases: ["no ai training permitted"]
gating:
  unknown_spdx_bucket: yellow
  conditional_spdx_bucket: yellow
  deny_spdx_bucket: red
  restriction_phrase_bucket: yellow
profiles:
  permissive:
    default_bucket: green
  copyleft:
    default_bucket: yellow
  record_level:
    default_bucket: yellow
  quarantine:
    default_bucket: red
  unknown:
    default_bucket: yellow
"#
    }

    fn sample_denylist_yaml() -> &'static str {
        r#"
patterns:
  - type: domain
    value: restricted.example
    fields: ["url"]
    severity: hard_red
    link: "https://policy.example/restricted"
    rationale: "contractual restriction"
"#
    }

    #[test]
    fn load_builds_a_stable_policy_hash() {
        let dir = TempDir::new().unwrap();
        let targets = write(dir.path(), "targets.yaml", sample_targets_yaml());
        write(dir.path(), "license_map.yaml", sample_license_map_yaml());
        write(dir.path(), "denylist.yaml", sample_denylist_yaml());

        let snap1 = PolicySnapshot::load(&targets, None, None).unwrap();
        let snap2 = PolicySnapshot::load(&targets, None, None).unwrap();
        assert_eq!(snap1.policy_hash(), snap2.policy_hash());
        assert!(snap1.policy_hash().starts_with("sha256:"));
    }

    #[test]
    fn denylist_missing_rationale_fails_to_load() {
        let dir = TempDir::new().unwrap();
        let targets = write(dir.path(), "targets.yaml", sample_targets_yaml());
        write(dir.path(), "license_map.yaml", sample_license_map_yaml());
        write(
            dir.path(),
            "denylist.yaml",
            r#"
patterns:
  - type: domain
    value: restricted.example
    severity: hard_red
    link: "https://policy.example/restricted"
    rationale: ""
"#,
        );
        let err = PolicySnapshot::load(&targets, None, None).unwrap_err();
        assert!(matches!(err, PolicyError::Config(_)));
    }

    #[test]
    fn normalize_spdx_resolves_mit_with_high_confidence() {
        let dir = TempDir::new().unwrap();
        let targets = write(dir.path(), "targets.yaml", sample_targets_yaml());
        write(dir.path(), "license_map.yaml", sample_license_map_yaml());
        write(dir.path(), "denylist.yaml", sample_denylist_yaml());
        let snap = PolicySnapshot::load(&targets, None, None).unwrap();
        let res = snap.normalize_spdx("Licensed under the MIT License", 1.0);
        assert_eq!(res.spdx.as_deref(), Some("MIT"));
        assert!(res.confidence >= 0.9);
    }

    #[test]
    fn denylist_hard_red_matches_restricted_domain() {
        let dir = TempDir::new().unwrap();
        let targets = write(dir.path(), "targets.yaml", sample_targets_yaml());
        write(dir.path(), "license_map.yaml", sample_license_map_yaml());
        write(dir.path(), "denylist.yaml", sample_denylist_yaml());
        let snap = PolicySnapshot::load(&targets, None, None).unwrap();
        let hits = snap.denylist_match("url", "https://api.restricted.example/x");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].severity, dsaudit_model::Severity::HardRed);
    }
}
