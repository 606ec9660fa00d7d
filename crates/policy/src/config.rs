//! YAML config structs (§6). Parsing only — `serde_yaml` deserialization
//! into closed Rust structs; there is no JSON-Schema validation layer.
//! A missing required key or a type mismatch surfaces as `PolicyError::Config`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::PolicyError;
use dsaudit_model::{DenylistPatternType, LicenseProfile, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardingConfig {
    pub max_records_per_shard: usize,
    pub compression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreeningConfig {
    pub min_chars: usize,
    pub max_chars: usize,
    pub text_field_candidates: Vec<String>,
    pub record_license_field_candidates: Vec<String>,
    #[serde(default)]
    pub require_record_license: bool,
    #[serde(default)]
    pub allow_spdx: Vec<String>,
    #[serde(default)]
    pub deny_phrases: Vec<String>,
    /// Minimum `spdx_confidence` (§4.3 step 4) for a GREEN classification.
    /// Not named as a companion-file subkey in the external schema but
    /// required by the classifier's bucket precedence; defaults to 0.8.
    #[serde(default = "default_confidence_threshold")]
    pub spdx_confidence_threshold: f64,
}

fn default_confidence_threshold() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalsConfig {
    pub raw_root: String,
    pub screened_yellow_root: String,
    pub combined_root: String,
    pub queues_root: String,
    pub manifests_root: String,
    pub ledger_root: String,
    pub pitches_root: String,
    pub catalogs_root: String,
    pub logs_root: String,
    pub sharding: ShardingConfig,
    pub screening: ScreeningConfig,
    #[serde(default)]
    pub require_yellow_signoff: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompanionFiles {
    pub license_map: String,
    pub denylist: String,
    pub field_schemas: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetsConfig {
    pub schema_version: String,
    pub companion_files: CompanionFiles,
    pub globals: GlobalsConfig,
    #[serde(default)]
    pub targets: Vec<dsaudit_model::Target>,
}

impl TargetsConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PolicyError::Config(format!(
            "reading targets config {}: {e}", path.display()
        )))?;
        let cfg: TargetsConfig = serde_yaml::from_str(&text).map_err(|e| {
            PolicyError::Config(format!("parsing targets config {}: {e}", path.display()))
        })?;
        if cfg.schema_version.is_empty() {
            return Err(PolicyError::Config("schema_version must not be empty".into()));
        }
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------
// License map (§6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpdxSets {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub conditional: Vec<String>,
    #[serde(default)]
    pub deny_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizationRule {
    pub match_any: Vec<String>,
    pub spdx: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizationConfig {
    #[serde(default)]
    pub rules: Vec<NormalizationRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestrictionScanConfig {
    #[serde(default)]
    pub phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatingConfig {
    pub unknown_spdx_bucket: BucketName,
    pub conditional_spdx_bucket: BucketName,
    pub deny_spdx_bucket: BucketName,
    pub restriction_phrase_bucket: BucketName,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BucketName {
    Green,
    Yellow,
    Red,
}

impl From<BucketName> for dsaudit_model::Bucket {
    fn from(b: BucketName) -> Self {
        match b {
            BucketName::Green => dsaudit_model::Bucket::Green,
            BucketName::Yellow => dsaudit_model::Bucket::Yellow,
            BucketName::Red => dsaudit_model::Bucket::Red,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub default_bucket: BucketName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LicenseMapConfig {
    pub spdx: SpdxSets,
    #[serde(default)]
    pub normalization: NormalizationConfig,
    #[serde(default)]
    pub restriction_scan: RestrictionScanConfig,
    pub gating: GatingConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

impl LicenseMapConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PolicyError::Config(format!("reading license map {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&text)
            .map_err(|e| PolicyError::Config(format!("parsing license map {}: {e}", path.display())))
    }

    pub fn profile_key(profile: LicenseProfile) -> &'static str {
        match profile {
            LicenseProfile::Permissive => "permissive",
            LicenseProfile::Copyleft => "copyleft",
            LicenseProfile::RecordLevel => "record_level",
            LicenseProfile::Quarantine => "quarantine",
            LicenseProfile::Unknown => "unknown",
        }
    }
}

// ---------------------------------------------------------------------
// Denylist (§6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DenylistPatternConfig {
    #[serde(rename = "type")]
    pub pattern_type: DenylistPatternType,
    pub value: String,
    #[serde(default)]
    pub fields: Vec<String>,
    pub severity: Severity,
    pub link: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DenylistConfig {
    #[serde(default)]
    pub patterns: Vec<DenylistPatternConfig>,
}

impl DenylistConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PolicyError::Config(format!("reading denylist {}: {e}", path.display()))
        })?;
        let cfg: DenylistConfig = serde_yaml::from_str(&text)
            .map_err(|e| PolicyError::Config(format!("parsing denylist {}: {e}", path.display())))?;
        for p in &cfg.patterns {
            if p.link.trim().is_empty() || p.rationale.trim().is_empty() {
                return Err(PolicyError::Config(format!(
                    "denylist pattern {:?} is missing mandatory link/rationale",
                    p.value
                )));
            }
        }
        Ok(cfg)
    }
}
