//! Crude text extraction from fetched evidence bytes (§4.2). Evidence
//! pages are license notices and repository metadata files, not arbitrary
//! web content, so a full HTML parser is not warranted: script/style
//! bodies are dropped, tags are stripped, and entities are left as-is.
//! Anything that is not `text/*` fails extraction outright.

use regex::Regex;
use std::sync::OnceLock;

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script.*?</script>|<style.*?</style>|<[^>]+>").unwrap())
}

/// Returns `None` when `content_type` is not a text-ish type we know how
/// to extract from plain.
pub fn extract_text(content_type: &str, raw: &[u8]) -> Option<String> {
    let base_type = content_type.split(';').next().unwrap_or("").trim().to_lowercase();
    if !(base_type.starts_with("text/") || base_type == "application/xhtml+xml") {
        return None;
    }
    let body = String::from_utf8_lossy(raw);
    if base_type == "text/html" || base_type == "application/xhtml+xml" {
        Some(tag_pattern().replace_all(&body, " ").to_string())
    } else {
        Some(body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_script_bodies_from_html() {
        let html = b"<html><head><script>var x=1;</script></head><body><p>MIT License</p></body></html>";
        let text = extract_text("text/html; charset=utf-8", html).unwrap();
        assert!(text.contains("MIT License"));
        assert!(!text.contains("var x"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn plain_text_passes_through_unchanged() {
        let text = extract_text("text/plain", b"MIT License").unwrap();
        assert_eq!(text, "MIT License");
    }

    #[test]
    fn non_text_content_type_fails_extraction() {
        assert!(extract_text("application/octet-stream", b"\x00\x01").is_none());
    }
}
