//! Collects revocation and issuer URLs from the TLS certificate chains of many
//! hosts.
//!
//! A [`Scanner`] feeds host names into a fixed pool of workers. Each worker
//! completes one TLS handshake per host through a [`Dialer`], reads the OCSP,
//! CA issuer and CRL URLs of every certificate the peer presented, and renders
//! them with a [`FieldExtractor`].

use openssl::nid::Nid;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::X509Ref;
use std::fmt::Debug;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

pub mod config;
pub mod error;
pub mod extract;
pub mod report;
pub mod scanner;

pub use config::Settings;
pub use error::ProbeError;
pub use extract::FieldExtractor;
pub use report::{CollectingReporter, Reporter, StdReporter};
pub use scanner::{ScanStats, Scanner};

/// Port every host is dialed on unless overridden.
pub const DEFAULT_PORT: u16 = 443;

/// The three URL lists of one certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateFields {
    /// OCSP responder URLs (AIA `OCSP` entries)
    pub ocsp_servers: Vec<String>,
    /// Issuer certificate URLs (AIA `caIssuers` entries)
    pub issuing_certificate_urls: Vec<String>,
    /// CRL distribution point URLs
    pub crl_distribution_points: Vec<String>,
}

impl CertificateFields {
    /// Reads the URL extensions of `cert`. Missing extensions give empty lists.
    pub fn from_x509(cert: &X509Ref) -> CertificateFields {
        CertificateFields {
            ocsp_servers: ocsp_servers(cert),
            issuing_certificate_urls: issuing_certificate_urls(cert),
            crl_distribution_points: crl_distribution_points(cert),
        }
    }

    /// Non-empty lists in output order: OCSP, issuer, CRL.
    pub fn non_empty(&self) -> impl Iterator<Item = &[String]> {
        [
            self.ocsp_servers.as_slice(),
            self.issuing_certificate_urls.as_slice(),
            self.crl_distribution_points.as_slice(),
        ]
        .into_iter()
        .filter(|field| !field.is_empty())
    }
}

fn ocsp_servers(cert: &X509Ref) -> Vec<String> {
    // OpenSSL returns an error, not an empty stack, when there is no AIA.
    match cert.ocsp_responders() {
        Ok(responders) => responders.iter().map(|r| r.to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

fn issuing_certificate_urls(cert: &X509Ref) -> Vec<String> {
    let mut urls = Vec::new();
    if let Some(access) = cert.authority_info() {
        for description in access.iter() {
            if description.method().nid() != Nid::AD_CA_ISSUERS {
                continue;
            }
            if let Some(uri) = description.location().uri() {
                urls.push(uri.to_string());
            }
        }
    }
    urls
}

fn crl_distribution_points(cert: &X509Ref) -> Vec<String> {
    let mut urls = Vec::new();
    if let Some(points) = cert.crl_distribution_points() {
        for point in points.iter() {
            let names = point.distpoint().and_then(|name| name.fullname());
            if let Some(names) = names {
                urls.extend(names.iter().filter_map(|n| n.uri()).map(String::from));
            }
        }
    }
    urls
}

/// Opens a TLS connection to a host and returns what its certificates say.
///
/// The scanner only talks to the network through this trait, so tests can
/// swap in a dialer that succeeds or fails deterministically.
pub trait Dialer: Send + Sync {
    /// Completes one handshake with `host`, closes the connection and returns
    /// the fields of every certificate in the peer chain, leaf first.
    fn dial(&self, host: &str) -> Result<Vec<CertificateFields>, ProbeError>;
}

/// [`Dialer`] backed by OpenSSL over a blocking TCP socket.
pub struct TlsDialer {
    connector: SslConnector,
    timeout: Duration,
    insecure: bool,
    port: u16,
}

impl Debug for TlsDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsDialer")
            .field("timeout", &self.timeout)
            .field("insecure", &self.insecure)
            .field("port", &self.port)
            .finish()
    }
}

impl TlsDialer {
    /// Builds a dialer with one overall `timeout` per host.
    ///
    /// With `insecure` set neither the chain nor the host name is verified.
    /// `ca_file` adds a PEM bundle to the default trust store.
    pub fn new(
        timeout: Duration,
        insecure: bool,
        ca_file: Option<&Path>,
    ) -> Result<TlsDialer, ProbeError> {
        if timeout.is_zero() {
            return Err(ProbeError::InvalidInput {
                field: "timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        if insecure {
            builder.set_verify(SslVerifyMode::NONE);
        }
        if let Some(path) = ca_file {
            builder.set_ca_file(path)?;
        }

        Ok(TlsDialer {
            connector: builder.build(),
            timeout,
            insecure,
            port: DEFAULT_PORT,
        })
    }

    /// Builds a dialer from resolved settings.
    pub fn from_settings(settings: &Settings) -> Result<TlsDialer, ProbeError> {
        TlsDialer::new(
            settings.timeout,
            settings.insecure,
            settings.ca_file.as_deref(),
        )
    }

    /// Dials `port` instead of 443.
    pub fn with_port(mut self, port: u16) -> TlsDialer {
        self.port = port;
        self
    }

    fn connect(&self, host: &str, deadline: Instant) -> Result<TcpStream, ProbeError> {
        let addresses: Vec<SocketAddr> = (host, self.port)
            .to_socket_addrs()
            .map_err(|e| ProbeError::DnsResolution {
                hostname: host.to_string(),
                source: e,
            })?
            .collect();
        if addresses.is_empty() {
            return Err(ProbeError::DnsResolution {
                hostname: host.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
            });
        }

        let mut last_error = None;
        for address in addresses {
            let remaining = remaining(deadline, host)?;
            match TcpStream::connect_timeout(&address, remaining) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%address, "connect failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address tried"));
        if error::is_timeout_kind(source.kind()) {
            return Err(ProbeError::Timeout {
                operation: format!("connecting to {}:{}", host, self.port),
            });
        }
        Err(ProbeError::ConnectionFailed {
            address: format!("{}:{}", host, self.port),
            source,
        })
    }
}

fn remaining(deadline: Instant, host: &str) -> Result<Duration, ProbeError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(ProbeError::Timeout {
            operation: format!("dialing {}", host),
        });
    }
    Ok(left)
}

impl Dialer for TlsDialer {
    fn dial(&self, host: &str) -> Result<Vec<CertificateFields>, ProbeError> {
        let deadline = Instant::now() + self.timeout;
        let tcp_stream = self.connect(host, deadline)?;

        let left = remaining(deadline, host)?;
        tcp_stream.set_read_timeout(Some(left))?;
        tcp_stream.set_write_timeout(Some(left))?;

        let mut config = self.connector.configure()?;
        config.set_verify_hostname(!self.insecure);
        let mut stream = config.connect(host, tcp_stream).map_err(|e| match ProbeError::from(e) {
            ProbeError::Timeout { .. } => ProbeError::Timeout {
                operation: format!("TLS handshake with {}:{}", host, self.port),
            },
            other => other,
        })?;

        let fields = match stream.ssl().peer_cert_chain() {
            Some(chain) => chain.iter().map(CertificateFields::from_x509).collect(),
            None => stream
                .ssl()
                .peer_certificate()
                .map(|cert| vec![CertificateFields::from_x509(&cert)])
                .unwrap_or_default(),
        };

        // Only the handshake is needed; a failed close_notify changes nothing.
        if let Err(e) = stream.shutdown() {
            debug!(host, "TLS shutdown failed: {}", e);
        }

        Ok(fields)
    }
}
