//! SPDX normalization (§4.1): a longest-match rulebook over evidence text.
//! Each rule carries a confidence weight; `resolved_spdx` is the winning
//! rule's `spdx` value, and `spdx_confidence` is the minimum of the rule's
//! weight and an evidence-quality weight supplied by the caller (lower
//! when text extraction failed, for instance).

use crate::config::NormalizationRule;

pub struct NormalizationRulebook {
    rules: Vec<NormalizationRule>,
}

#[derive(Debug, Clone)]
pub struct SpdxResolution {
    pub spdx: Option<String>,
    pub confidence: f64,
    pub evidence_snippet: Option<String>,
}

impl NormalizationRulebook {
    pub fn new(rules: Vec<NormalizationRule>) -> Self {
        Self { rules }
    }

    /// Resolve `text` to an SPDX identifier. Among all rules with at least
    /// one matching phrase, the rule whose matching phrase is longest wins
    /// (longest-match, so a more specific phrase like "Creative Commons
    /// Attribution 4.0" outranks a generic "Creative Commons" rule).
    pub fn normalize(&self, text: &str, evidence_quality_weight: f64) -> SpdxResolution {
        let haystack = text.to_lowercase();
        let mut best: Option<(&NormalizationRule, &str)> = None;

        for rule in &self.rules {
            for phrase in &rule.match_any {
                let needle = phrase.to_lowercase();
                if haystack.contains(&needle) {
                    let better = match best {
                        None => true,
                        Some((_, cur_phrase)) => phrase.len() > cur_phrase.len(),
                    };
                    if better {
                        best = Some((rule, phrase));
                    }
                }
            }
        }

        match best {
            Some((rule, phrase)) => SpdxResolution {
                spdx: Some(rule.spdx.clone()),
                confidence: rule.confidence.min(evidence_quality_weight),
                evidence_snippet: Some(phrase.to_string()),
            },
            None => SpdxResolution {
                spdx: None,
                confidence: 0.0,
                evidence_snippet: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(phrases: &[&str], spdx: &str, confidence: f64) -> NormalizationRule {
        NormalizationRule {
            match_any: phrases.iter().map(|s| s.to_string()).collect(),
            spdx: spdx.to_string(),
            confidence,
        }
    }

    #[test]
    fn unknown_text_yields_zero_confidence() {
        let book = NormalizationRulebook::new(vec![rule(&["MIT License"], "MIT", 0.95)]);
        let res = book.normalize("All rights reserved, no license granted.", 1.0);
        assert_eq!(res.spdx, None);
        assert_eq!(res.confidence, 0.0);
    }

    #[test]
    fn longest_matching_phrase_wins() {
        let book = NormalizationRulebook::new(vec![
            rule(&["Creative Commons"], "CC-UNSPECIFIED", 0.4),
            rule(&["Creative Commons Attribution 4.0"], "CC-BY-4.0", 0.95),
        ]);
        let res = book.normalize("Licensed under Creative Commons Attribution 4.0 International", 1.0);
        assert_eq!(res.spdx.as_deref(), Some("CC-BY-4.0"));
    }

    #[test]
    fn confidence_is_min_of_rule_weight_and_evidence_quality() {
        let book = NormalizationRulebook::new(vec![rule(&["MIT License"], "MIT", 0.95)]);
        let res = book.normalize("Licensed under the MIT License", 0.5);
        assert_eq!(res.confidence, 0.5);
    }
}
