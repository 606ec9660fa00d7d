//! Structured logging setup (C8). `tracing` spans/events carry key-value
//! context (`target_id`, `stage`, `run_id`); a redacting writer sits
//! between the formatter and stdout so secret-shaped substrings
//! (`api_key=...`, `token=...`, `Authorization: Bearer ...`) never reach a
//! log sink even if a caller accidentally formats one into a message.

use std::io;
use std::sync::OnceLock;

use regex::Regex;
use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber once per process. Safe to
/// call multiple times (in tests, for instance); only the first call wins.
pub fn init_logging() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(RedactingWriter::new)
            .try_init();
    });
}

fn secret_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r#"(?i)(api[_-]?key\s*[=:]\s*)(\S+)"#).unwrap(),
            Regex::new(r#"(?i)(token\s*[=:]\s*)(\S+)"#).unwrap(),
            Regex::new(r#"(?i)(authorization:\s*bearer\s+)(\S+)"#).unwrap(),
            Regex::new(r#"(?i)(x-api-key:\s*)(\S+)"#).unwrap(),
        ]
    })
}

/// Replace the value half of any recognized `key=value` / header-shaped
/// secret with `<redacted>`, leaving the key/label intact for readability.
pub fn redact(line: &str) -> String {
    let mut out = line.to_string();
    for pat in secret_patterns() {
        out = pat.replace_all(&out, "${1}<redacted>").to_string();
    }
    out
}

struct RedactingWriter {
    buf: Vec<u8>,
}

impl RedactingWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }
}

impl io::Write for RedactingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let text = String::from_utf8_lossy(&self.buf);
            let redacted = redact(&text);
            print!("{redacted}");
            self.buf.clear();
        }
        Ok(())
    }
}

impl Drop for RedactingWriter {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_api_key_assignment() {
        let line = "fetching with api_key=sk-deadbeef1234";
        assert_eq!(redact(line), "fetching with api_key=<redacted>");
    }

    #[test]
    fn redacts_bearer_token_header() {
        let line = "Authorization: Bearer abc.def.ghi";
        assert_eq!(redact(line), "Authorization: Bearer <redacted>");
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let line = "target_id=corpus-1 stage=classify bucket=GREEN";
        assert_eq!(redact(line), line);
    }
}
