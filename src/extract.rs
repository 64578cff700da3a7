//! Turns the URL lists found in a certificate into printable strings.

use url::Url;

use crate::report::Reporter;

/// How a certificate field (a list of URLs) is rendered.
///
/// Chosen once at startup and then applied to every field of every
/// certificate without further branching at the call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldExtractor {
    /// Print the URLs themselves.
    RawJoin,
    /// Print only the host of each URL.
    DomainJoin,
}

impl FieldExtractor {
    /// `DomainJoin` when `extract_domains` is set, `RawJoin` otherwise.
    pub fn from_flag(extract_domains: bool) -> Self {
        if extract_domains {
            FieldExtractor::DomainJoin
        } else {
            FieldExtractor::RawJoin
        }
    }

    /// Renders `values` as a single, possibly multi-line, string.
    ///
    /// In `DomainJoin` mode values that do not parse as URLs are reported to
    /// `reporter` and left out; the remaining values are still rendered. When
    /// nothing parses the result is empty.
    pub fn apply<R: Reporter + ?Sized>(&self, values: &[String], reporter: &R) -> String {
        match self {
            FieldExtractor::RawJoin => lower_join(values),
            FieldExtractor::DomainJoin => {
                let hosts: Vec<String> = values
                    .iter()
                    .filter_map(|value| match host_of(value) {
                        Ok(host) => Some(host),
                        Err(e) => {
                            reporter.url_rejected(value, &e);
                            None
                        }
                    })
                    .collect();
                lower_join(hosts.as_slice())
            }
        }
    }
}

/// Joins with `\n` and lower-cases the result.
pub fn lower_join<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join("\n")
        .to_lowercase()
}

/// Host component of `value`, without any port.
///
/// URLs without an authority (`mailto:`, `urn:`) yield an empty host rather
/// than an error.
pub fn host_of(value: &str) -> Result<String, url::ParseError> {
    let url = Url::parse(value)?;
    let host = url.host_str().unwrap_or("");
    Ok(host.split(':').next().unwrap_or("").to_string())
}
