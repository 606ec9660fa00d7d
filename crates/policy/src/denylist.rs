//! Denylist matching (§4.1). Domain patterns match on parsed hostname with
//! boundary safety; substrings match case-insensitively; regexes compile
//! once at snapshot-build time, not per lookup.

use regex::Regex;
use url::Url;

use dsaudit_model::{DenylistHit, Severity};

use crate::config::{DenylistConfig, DenylistPatternConfig};
use crate::PolicyError;
use dsaudit_model::DenylistPatternType;

pub struct CompiledPattern {
    kind: DenylistPatternType,
    value: String,
    regex: Option<Regex>,
    severity: Severity,
    link: String,
    rationale: String,
}

pub struct Denylist {
    patterns: Vec<CompiledPattern>,
}

impl Denylist {
    pub fn compile(cfg: &DenylistConfig) -> Result<Self, PolicyError> {
        let mut patterns = Vec::with_capacity(cfg.patterns.len());
        for p in &cfg.patterns {
            patterns.push(compile_pattern(p)?);
        }
        Ok(Self { patterns })
    }

    /// Match `value` (a URL, publisher name, or target id, per the
    /// pattern's configured `fields`) against every compiled pattern and
    /// return every hit. `field` identifies which logical field `value`
    /// represents (`"url"`, `"publisher"`, `"id"`), used to honor a
    /// pattern's `fields` restriction when non-empty.
    pub fn matches(&self, field: &str, value: &str) -> Vec<DenylistHit> {
        let mut hits = Vec::new();
        for p in &self.patterns {
            if !p_applies_to_field(p, field) {
                continue;
            }
            if pattern_matches(p, value) {
                hits.push(DenylistHit {
                    severity: p.severity,
                    link: p.link.clone(),
                    rationale: p.rationale.clone(),
                    matched_value: value.to_string(),
                });
            }
        }
        hits
    }
}

fn p_applies_to_field(_p: &CompiledPattern, _field: &str) -> bool {
    // `fields` in config is currently advisory metadata describing which
    // record fields a pattern is meant for; actual dispatch is driven by
    // the caller choosing which values to check, so every compiled
    // pattern is eligible for every call. Kept as a separate function so
    // a future per-field restriction can be added without touching
    // call sites.
    true
}

fn compile_pattern(p: &DenylistPatternConfig) -> Result<CompiledPattern, PolicyError> {
    let regex = match p.pattern_type {
        DenylistPatternType::Regex => Some(
            Regex::new(&p.value)
                .map_err(|e| PolicyError::Config(format!("invalid denylist regex {:?}: {e}", p.value)))?,
        ),
        _ => None,
    };
    Ok(CompiledPattern {
        kind: p.pattern_type,
        value: p.value.clone(),
        regex,
        severity: p.severity,
        link: p.link.clone(),
        rationale: p.rationale.clone(),
    })
}

fn pattern_matches(p: &CompiledPattern, value: &str) -> bool {
    match p.kind {
        DenylistPatternType::Substring => value.to_lowercase().contains(&p.value.to_lowercase()),
        DenylistPatternType::Regex => p.regex.as_ref().map(|r| r.is_match(value)).unwrap_or(false),
        DenylistPatternType::Domain => host_matches_domain(value, &p.value),
    }
}

/// `value` is either a bare hostname or a full URL; `domain` is the
/// configured pattern (e.g. `example.com`). Matches if `host == domain` or
/// `host` ends with `.domain` (boundary-safe: `notexample.com` must not
/// match `example.com`).
fn host_matches_domain(value: &str, domain: &str) -> bool {
    let host = extract_host(value);
    let host = match host {
        Some(h) => h.to_lowercase(),
        None => return false,
    };
    let domain = domain.to_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn extract_host(value: &str) -> Option<String> {
    if let Ok(url) = Url::parse(value) {
        return url.host_str().map(|s| s.to_string());
    }
    // Bare hostname, no scheme.
    Some(value.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsaudit_model::Severity as Sev;

    fn denylist(patterns: Vec<DenylistPatternConfig>) -> Denylist {
        Denylist::compile(&DenylistConfig { patterns }).unwrap()
    }

    fn domain_pattern(value: &str, severity: Severity) -> DenylistPatternConfig {
        DenylistPatternConfig {
            pattern_type: DenylistPatternType::Domain,
            value: value.to_string(),
            fields: vec!["url".into()],
            severity,
            link: "https://policy.example/rationale".into(),
            rationale: "test rationale".into(),
        }
    }

    #[test]
    fn domain_matches_exact_and_subdomain_not_lookalike() {
        let dl = denylist(vec![domain_pattern("example.com", Sev::HardRed)]);
        assert!(dl.matches("url", "https://example.com/path").len() == 1);
        assert!(dl.matches("url", "https://api.example.com/x").len() == 1);
        assert!(dl.matches("url", "https://notexample.com/x").is_empty());
    }

    #[test]
    fn substring_matches_case_insensitively() {
        let mut p = domain_pattern("ignored", Sev::ForceYellow);
        p.pattern_type = DenylistPatternType::Substring;
        p.value = "RESTRICTED".to_string();
        let dl = denylist(vec![p]);
        assert_eq!(dl.matches("publisher", "a Restricted Corp").len(), 1);
    }

    #[test]
    fn regex_pattern_compiles_once_and_matches() {
        let mut p = domain_pattern("ignored", Sev::HardRed);
        p.pattern_type = DenylistPatternType::Regex;
        p.value = r"^https://api\.restricted\.example/".to_string();
        let dl = denylist(vec![p]);
        assert_eq!(dl.matches("url", "https://api.restricted.example/x").len(), 1);
        assert!(dl.matches("url", "https://other.example/x").is_empty());
    }
}
