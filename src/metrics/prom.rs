use lazy_static::lazy_static;
use prometheus::{labels, register_gauge, Gauge};
use tracing::{debug, warn};

use certscout::ScanStats;

lazy_static! {
    static ref CERTSCOUT_DOMAINS_ENQUEUED: Gauge =
        register_gauge!("certscout_domains_enqueued", "domains queued for scanning").unwrap();
    static ref CERTSCOUT_DOMAINS_PROCESSED: Gauge =
        register_gauge!("certscout_domains_processed", "domains dialed by a worker").unwrap();
    static ref CERTSCOUT_HANDSHAKE_FAILURES: Gauge =
        register_gauge!("certscout_handshake_failures", "dials or handshakes that failed").unwrap();
    static ref CERTSCOUT_LINES_WRITTEN: Gauge =
        register_gauge!("certscout_lines_written", "extracted field lines written").unwrap();
}

/// Function to push scan counters to prometheus
/// # Arguments
/// * `stats` - Counters of the finished scan
/// * `routines` - Size of the worker pool, used as a label
/// * `prometheus_address` - String of prometheus address
pub fn prometheus_metrics(stats: &ScanStats, routines: usize, prometheus_address: &str) {
    CERTSCOUT_DOMAINS_ENQUEUED.set(stats.enqueued as f64);
    CERTSCOUT_DOMAINS_PROCESSED.set(stats.processed as f64);
    CERTSCOUT_HANDSHAKE_FAILURES.set(stats.failed as f64);
    CERTSCOUT_LINES_WRITTEN.set(stats.lines as f64);

    let metric_families = prometheus::gather();
    let prometheus_client = prometheus::push_metrics(
        "certscout",
        labels! {
            "instance".to_owned() => "certscout".to_owned(),
            "routines".to_owned() => routines.to_string(),
        },
        prometheus_address,
        metric_families,
        None,
    );

    match prometheus_client {
        Ok(_) => debug!(address = prometheus_address, "pushed scan metrics"),
        Err(e) => warn!("failed to push metrics to prometheus: {}", e),
    }
}
