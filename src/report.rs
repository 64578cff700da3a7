//! Output and diagnostic sinks.
//!
//! Workers never touch stdout or the logger directly. Everything goes through a
//! [`Reporter`], so the binary can print while tests capture.

use std::io::{self, Write};
use std::sync::Mutex;

use tracing::warn;

use crate::error::ProbeError;

/// Receives result lines and the three kinds of non-fatal diagnostics.
///
/// Implementations are shared by every worker and must treat each call as
/// one atomic unit: a line must never be interleaved with another.
pub trait Reporter: Send + Sync {
    /// One extracted field string, written as a single line.
    fn line(&self, line: &str);

    /// A host could not be dialed or its handshake failed.
    fn handshake_failed(&self, domain: &str, error: &ProbeError);

    /// A certificate field value is not a parseable URL and was skipped.
    fn url_rejected(&self, value: &str, error: &url::ParseError);

    /// Reading the domain list failed; no further domains are queued.
    fn input_failed(&self, error: &io::Error);
}

fn handshake_message(domain: &str, error: &ProbeError) -> String {
    format!("failed to connect to {}: {}", domain, error)
}

fn url_message(value: &str, error: &url::ParseError) -> String {
    format!("skipping unparseable URL {:?}: {}", value, error)
}

/// Writes lines to stdout and diagnostics to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdReporter;

impl Reporter for StdReporter {
    fn line(&self, line: &str) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        // A closed pipe only loses output, the scan itself keeps going.
        if let Err(e) = writeln!(out, "{}", line) {
            warn!("failed to write result: {}", e);
        }
    }

    fn handshake_failed(&self, domain: &str, error: &ProbeError) {
        warn!("{}", handshake_message(domain, error));
    }

    fn url_rejected(&self, value: &str, error: &url::ParseError) {
        warn!("{}", url_message(value, error));
    }

    fn input_failed(&self, error: &io::Error) {
        warn!("reading standard input: {}", error);
    }
}

/// Keeps everything in memory. Used when the caller wants the results as
/// values instead of text on stdout.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    lines: Mutex<Vec<String>>,
    diagnostics: Mutex<Vec<String>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result lines in the order they were reported.
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Diagnostic messages in the order they were reported.
    pub fn diagnostics(&self) -> Vec<String> {
        match self.diagnostics.lock() {
            Ok(diagnostics) => diagnostics.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push_diagnostic(&self, message: String) {
        match self.diagnostics.lock() {
            Ok(mut diagnostics) => diagnostics.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
    }
}

impl Reporter for CollectingReporter {
    fn line(&self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }

    fn handshake_failed(&self, domain: &str, error: &ProbeError) {
        self.push_diagnostic(handshake_message(domain, error));
    }

    fn url_rejected(&self, value: &str, error: &url::ParseError) {
        self.push_diagnostic(url_message(value, error));
    }

    fn input_failed(&self, error: &io::Error) {
        self.push_diagnostic(format!("reading input: {}", error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter_keeps_order() {
        let reporter = CollectingReporter::new();
        reporter.line("first");
        reporter.line("second");
        reporter.handshake_failed("example.com", &ProbeError::from("refused"));

        assert_eq!(reporter.lines(), vec!["first", "second"]);
        assert_eq!(
            reporter.diagnostics(),
            vec!["failed to connect to example.com: refused"]
        );
    }

    #[test]
    fn test_diagnostics_name_subject_once() {
        let error = ProbeError::DnsResolution {
            hostname: "shop.example".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such host"),
        };
        let message = handshake_message("shop.example", &error);
        assert!(message.starts_with("failed to connect to shop.example: "));
        assert_eq!(message.matches("failed to connect to shop.example").count(), 1);

        let message = url_message("ocsp.example", &url::ParseError::RelativeUrlWithoutBase);
        assert_eq!(message.matches("ocsp.example").count(), 1);
        assert!(message.ends_with(&url::ParseError::RelativeUrlWithoutBase.to_string()));
    }
}
