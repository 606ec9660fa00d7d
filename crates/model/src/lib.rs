//! dsaudit_model
//!
//! Shared data-model types (§3): `Target`, `EvidenceSnapshot`, `QueueRow`,
//! `CanonicalRecord`, `SignoffRecord`, and the bucket/pool/profile enums
//! every stage crate serializes to and from. Factored into its own crate
//! so C1–C7 reference one schema instead of duplicating it, the same way
//! the teacher keeps its audit event schema separate from the crates that
//! emit and consume it.

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier for a configured data source. Never generated
/// at runtime; always declared in `targets.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct TargetId(pub String);

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LicenseProfile {
    Permissive,
    Copyleft,
    RecordLevel,
    Quarantine,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LicensePool {
    Permissive,
    Copyleft,
    Quarantine,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    HardRed,
    ForceYellow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DenylistPatternType {
    Domain,
    Substring,
    Regex,
}

// ---------------------------------------------------------------------
// Target (declarative configuration record, §3)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LicenseEvidenceRef {
    pub spdx_hint: Option<String>,
    pub url: String,
}

/// One `download:` block. `Serialize` is derived as an internally-tagged
/// enum, but `Deserialize` is hand-written (see below): a `strategy:`
/// value this registry doesn't recognize must still parse, landing in
/// `Unknown`, rather than fail YAML schema validation. §4.4 calls an
/// enabled target naming an unregistered strategy a **classify-time
/// error**, not a config/schema error — that distinction only exists if
/// parsing itself can't reject the name first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum DownloadSpec {
    Http {
        urls: Vec<String>,
        #[serde(default)]
        checksum_sha256: Option<String>,
        #[serde(default)]
        max_bytes: Option<u64>,
    },
    Ftp {
        urls: Vec<String>,
    },
    Git {
        repo_url: String,
        #[serde(default)]
        git_ref: Option<String>,
    },
    Zenodo {
        record_id: String,
    },
    Figshare {
        article_id: String,
    },
    S3Public {
        bucket: String,
        prefix: String,
    },
    S3Sync {
        bucket: String,
        prefix: String,
    },
    AwsRequesterPays {
        bucket: String,
        prefix: String,
    },
    HuggingfaceDatasets {
        dataset_id: String,
        #[serde(default)]
        config: Option<String>,
        #[serde(default)]
        split: Option<String>,
    },
    /// A `strategy:` name absent from the acquisition registry. Carries
    /// the declared name and whatever params came with it so the
    /// orchestrator can report precisely what was rejected.
    Unknown {
        declared_strategy: String,
        params: serde_json::Map<String, serde_json::Value>,
    },
}

impl<'de> Deserialize<'de> for DownloadSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            strategy: String,
            #[serde(flatten)]
            params: serde_json::Map<String, serde_json::Value>,
        }
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct HttpParams {
            urls: Vec<String>,
            #[serde(default)]
            checksum_sha256: Option<String>,
            #[serde(default)]
            max_bytes: Option<u64>,
        }
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct FtpParams {
            urls: Vec<String>,
        }
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct GitParams {
            repo_url: String,
            #[serde(default)]
            git_ref: Option<String>,
        }
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct ZenodoParams {
            record_id: String,
        }
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct FigshareParams {
            article_id: String,
        }
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct S3Params {
            bucket: String,
            prefix: String,
        }
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct HfParams {
            dataset_id: String,
            #[serde(default)]
            config: Option<String>,
            #[serde(default)]
            split: Option<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let params = serde_json::Value::Object(raw.params.clone());
        let spec = match raw.strategy.as_str() {
            "http" => serde_json::from_value::<HttpParams>(params).map(|p| DownloadSpec::Http {
                urls: p.urls,
                checksum_sha256: p.checksum_sha256,
                max_bytes: p.max_bytes,
            }),
            "ftp" => serde_json::from_value::<FtpParams>(params).map(|p| DownloadSpec::Ftp { urls: p.urls }),
            "git" => serde_json::from_value::<GitParams>(params).map(|p| DownloadSpec::Git {
                repo_url: p.repo_url,
                git_ref: p.git_ref,
            }),
            "zenodo" => serde_json::from_value::<ZenodoParams>(params)
                .map(|p| DownloadSpec::Zenodo { record_id: p.record_id }),
            "figshare" => serde_json::from_value::<FigshareParams>(params)
                .map(|p| DownloadSpec::Figshare { article_id: p.article_id }),
            "s3_public" => serde_json::from_value::<S3Params>(params)
                .map(|p| DownloadSpec::S3Public { bucket: p.bucket, prefix: p.prefix }),
            "s3_sync" => serde_json::from_value::<S3Params>(params)
                .map(|p| DownloadSpec::S3Sync { bucket: p.bucket, prefix: p.prefix }),
            "aws_requester_pays" => serde_json::from_value::<S3Params>(params)
                .map(|p| DownloadSpec::AwsRequesterPays { bucket: p.bucket, prefix: p.prefix }),
            "huggingface_datasets" => serde_json::from_value::<HfParams>(params).map(|p| {
                DownloadSpec::HuggingfaceDatasets {
                    dataset_id: p.dataset_id,
                    config: p.config,
                    split: p.split,
                }
            }),
            _ => return Ok(DownloadSpec::Unknown { declared_strategy: raw.strategy, params: raw.params }),
        };
        spec.map_err(serde::de::Error::custom)
    }
}

impl DownloadSpec {
    pub fn strategy_name(&self) -> &str {
        match self {
            DownloadSpec::Http { .. } => "http",
            DownloadSpec::Ftp { .. } => "ftp",
            DownloadSpec::Git { .. } => "git",
            DownloadSpec::Zenodo { .. } => "zenodo",
            DownloadSpec::Figshare { .. } => "figshare",
            DownloadSpec::S3Public { .. } => "s3_public",
            DownloadSpec::S3Sync { .. } => "s3_sync",
            DownloadSpec::AwsRequesterPays { .. } => "aws_requester_pays",
            DownloadSpec::HuggingfaceDatasets { .. } => "huggingface_datasets",
            DownloadSpec::Unknown { declared_strategy, .. } => declared_strategy.as_str(),
        }
    }

    /// All URLs declared structurally by this strategy (used by the
    /// classifier to apply the denylist to download targets, not only
    /// evidence URLs).
    pub fn declared_urls(&self) -> Vec<String> {
        match self {
            DownloadSpec::Http { urls, .. } | DownloadSpec::Ftp { urls } => urls.clone(),
            DownloadSpec::Git { repo_url, .. } => vec![repo_url.clone()],
            _ => vec![],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingSpec {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub granularity: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    #[serde(default)]
    pub pool: Option<LicensePool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YellowScreenSpec {
    #[serde(default)]
    pub allow_without_signoff: bool,
    #[serde(default)]
    pub allowlist_record_licenses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub id: TargetId,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub license_profile: LicenseProfile,
    pub license_evidence: LicenseEvidenceRef,
    pub download: DownloadSpec,
    #[serde(default)]
    pub routing: RoutingSpec,
    #[serde(default)]
    pub output: OutputSpec,
    #[serde(default)]
    pub yellow_screen: YellowScreenSpec,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------
// Evidence snapshot (§3, §4.2)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSnapshot {
    pub content_type: String,
    pub sha256_raw_bytes: String,
    pub sha256_normalized_text: String,
    pub retrieved_at_utc: String,
    pub url_final: String,
    #[serde(default)]
    pub text_extraction_failed: bool,
}

// ---------------------------------------------------------------------
// Queue row (§3, emitted by C3)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenylistHit {
    pub severity: Severity,
    pub link: String,
    pub rationale: String,
    pub matched_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRow {
    pub target_id: TargetId,
    pub bucket: Bucket,
    pub license_profile: LicenseProfile,
    pub license_pool: LicensePool,
    pub resolved_spdx: Option<String>,
    pub spdx_confidence: f64,
    #[serde(default)]
    pub restriction_hits: Vec<String>,
    #[serde(default)]
    pub denylist_hits: Vec<DenylistHit>,
    pub routing: RoutingSpec,
    pub download: DownloadSpec,
    pub manifest_dir: String,
    pub evidence_ref: String,
    pub policy_snapshot_hash: String,
}

// ---------------------------------------------------------------------
// Canonical record (§3, screener/merger contract)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordLicense {
    pub spdx: Option<String>,
    pub profile: LicenseProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSource {
    pub target_id: TargetId,
    #[serde(default)]
    pub url: Option<String>,
    pub retrieved_at_utc: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordHash {
    pub content_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub record_id: String,
    pub text: String,
    pub license: RecordLicense,
    pub routing: RoutingSpec,
    pub source: RecordSource,
    pub hash: RecordHash,
    /// Opaque domain metadata passthrough; never interpreted by the
    /// screener or merger, only carried forward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------
// Signoff record (§3)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignoffStatus {
    Approved,
    Rejected,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignoffRecord {
    pub status: SignoffStatus,
    pub reviewer: String,
    pub reviewer_contact: String,
    pub reviewed_at_utc: String,
    #[serde(default)]
    pub evidence_links_checked: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub notes: String,
    pub evidence_hash_at_signoff: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_spec_strategy_name_matches_declared_tag() {
        let d = DownloadSpec::Http {
            urls: vec!["https://example.com/a".into()],
            checksum_sha256: None,
            max_bytes: None,
        };
        assert_eq!(d.strategy_name(), "http");
        assert_eq!(d.declared_urls(), vec!["https://example.com/a".to_string()]);
    }

    #[test]
    fn target_id_is_transparent_in_json() {
        let id = TargetId("corpus-42".into());
        let v = serde_json::to_value(&id).unwrap();
        assert_eq!(v, serde_json::json!("corpus-42"));
    }

    #[test]
    fn unrecognized_strategy_parses_into_unknown_instead_of_failing() {
        let v = serde_json::json!({
            "strategy": "magnet_link",
            "uri": "magnet:?xt=urn:btih:deadbeef",
        });
        let d: DownloadSpec = serde_json::from_value(v).unwrap();
        assert_eq!(d.strategy_name(), "magnet_link");
        match d {
            DownloadSpec::Unknown { declared_strategy, params } => {
                assert_eq!(declared_strategy, "magnet_link");
                assert_eq!(params.get("uri").unwrap(), "magnet:?xt=urn:btih:deadbeef");
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn known_strategy_rejects_unrecognized_params() {
        let v = serde_json::json!({
            "strategy": "http",
            "urls": ["https://example.com/a"],
            "bogus_field": true,
        });
        assert!(serde_json::from_value::<DownloadSpec>(v).is_err());
    }
}
