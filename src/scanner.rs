//! The scan pipeline: one feeder, a bounded queue and a fixed pool of workers.
//!
//! The feeder runs on the calling thread and owns the only sender. Dropping it
//! once the input is exhausted closes the queue, and each worker exits after it
//! sees the queue closed and empty. [`Scanner::run`] returns only after every
//! worker has exited, so nothing that was queued is dropped.

use std::io::BufRead;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error};

use crate::config::Settings;
use crate::report::Reporter;
use crate::Dialer;

/// Counters for one finished scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    /// Domains pushed onto the queue, `www.` variants included
    pub enqueued: usize,
    /// Domains a worker took off the queue and dialed
    pub processed: usize,
    /// Dials that failed
    pub failed: usize,
    /// Result lines written
    pub lines: usize,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicUsize,
    processed: AtomicUsize,
    failed: AtomicUsize,
    lines: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> ScanStats {
        ScanStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            lines: self.lines.load(Ordering::Relaxed),
        }
    }
}

/// Reads one domain per line from `input` and hands each to `push`.
///
/// With `plus_www` a line that does not start with `www.` is followed by its
/// `www.` variant. Blank lines are passed through unchanged. Reading stops at
/// the end of the input, at the first read error (reported to `reporter`), or
/// when `push` returns `false` because nobody is left to take the work.
///
/// Returns the number of domains pushed.
pub fn feed<B, R, F>(input: B, plus_www: bool, reporter: &R, mut push: F) -> usize
where
    B: BufRead,
    R: Reporter + ?Sized,
    F: FnMut(String) -> bool,
{
    let mut pushed = 0;
    for line in input.lines() {
        let domain = match line {
            Ok(domain) => domain,
            Err(e) => {
                reporter.input_failed(&e);
                break;
            }
        };

        let www = if plus_www && !domain.starts_with("www.") {
            Some(format!("www.{}", domain))
        } else {
            None
        };

        if !push(domain) {
            return pushed;
        }
        pushed += 1;
        if let Some(www) = www {
            if !push(www) {
                return pushed;
            }
            pushed += 1;
        }
    }
    pushed
}

/// Runs the feeder and the worker pool over one input stream.
pub struct Scanner<'a, D: Dialer + ?Sized, R: Reporter + ?Sized> {
    settings: &'a Settings,
    dialer: &'a D,
    reporter: &'a R,
}

impl<'a, D: Dialer + ?Sized, R: Reporter + ?Sized> Scanner<'a, D, R> {
    pub fn new(settings: &'a Settings, dialer: &'a D, reporter: &'a R) -> Self {
        Scanner {
            settings,
            dialer,
            reporter,
        }
    }

    /// Scans every domain in `input` and blocks until all of them are done.
    pub fn run<B: BufRead>(&self, input: B) -> ScanStats {
        let counters = Counters::default();
        // Holding at most one task per worker keeps the feeder just ahead of the pool.
        let (sender, receiver) = mpsc::sync_channel::<String>(self.settings.routines);
        // Only the workers hold the receiver. Once the last one exits, sends
        // fail and the feeder stops instead of blocking on a full queue.
        let receiver = Arc::new(Mutex::new(receiver));

        thread::scope(|scope| {
            let mut started = 0;
            for id in 0..self.settings.routines {
                let receiver = Arc::clone(&receiver);
                let counters = &counters;
                let spawned = thread::Builder::new()
                    .name(format!("worker-{}", id))
                    .spawn_scoped(scope, move || self.work(&receiver, counters));
                match spawned {
                    Ok(_) => started += 1,
                    Err(e) => error!("failed to start worker {}: {}", id, e),
                }
            }
            drop(receiver);
            debug!(workers = started, "worker pool started");

            if started == 0 {
                error!("no worker could be started, nothing will be scanned");
                return;
            }

            let enqueued = feed(input, self.settings.plus_www, self.reporter, |domain| {
                sender.send(domain).is_ok()
            });
            counters.enqueued.store(enqueued, Ordering::Relaxed);
            // Closing the queue lets the workers drain it and exit.
            drop(sender);
        });

        let stats = counters.snapshot();
        debug!(?stats, "scan finished");
        stats
    }

    fn work(&self, receiver: &Mutex<Receiver<String>>, counters: &Counters) {
        loop {
            let next = match receiver.lock() {
                Ok(queue) => queue.recv(),
                Err(_) => break,
            };
            // An error means the queue is closed and empty.
            let domain = match next {
                Ok(domain) => domain,
                Err(_) => break,
            };

            self.probe(&domain, counters);
            counters.processed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn probe(&self, domain: &str, counters: &Counters) {
        let chain = match self.dialer.dial(domain) {
            Ok(chain) => chain,
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                self.reporter.handshake_failed(domain, &e);
                return;
            }
        };

        for cert in &chain {
            for field in cert.non_empty() {
                let line = self.settings.extractor.apply(field, self.reporter);
                self.reporter.line(&line);
                counters.lines.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::extract::FieldExtractor;
    use crate::report::CollectingReporter;
    use crate::CertificateFields;
    use std::io::{self, BufReader, Cursor, Read};
    use std::time::Duration;

    /// Fails every host that starts with "fail", otherwise returns a
    /// two-certificate chain.
    #[derive(Default)]
    struct MockDialer {
        dials: AtomicUsize,
        delay: Option<Duration>,
    }

    impl Dialer for MockDialer {
        fn dial(&self, host: &str) -> Result<Vec<CertificateFields>, ProbeError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            if host.starts_with("fail") {
                return Err(ProbeError::ConnectionFailed {
                    address: format!("{}:443", host),
                    source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
                });
            }
            Ok(vec![
                CertificateFields {
                    ocsp_servers: vec![format!("http://OCSP.{}:8080/status", host)],
                    issuing_certificate_urls: vec![],
                    crl_distribution_points: vec![
                        format!("http://crl.{}/leaf.crl", host),
                        "not a url".to_string(),
                    ],
                },
                CertificateFields {
                    ocsp_servers: vec![],
                    issuing_certificate_urls: vec!["http://ca.example/root.crt".to_string()],
                    crl_distribution_points: vec![],
                },
            ])
        }
    }

    fn settings(routines: usize, plus_www: bool) -> Settings {
        Settings {
            routines,
            plus_www,
            ..Settings::default()
        }
    }

    fn domains(count: usize) -> String {
        (0..count).map(|i| format!("host{}.example\n", i)).collect()
    }

    #[test]
    fn test_feed_adds_www_variant() {
        let reporter = CollectingReporter::new();
        let mut queued = Vec::new();
        let input = Cursor::new("example.com\nwww.example.org\n\nfoo.net\r\n");

        let pushed = feed(input, true, &reporter, |d| {
            queued.push(d);
            true
        });

        assert_eq!(pushed, 7);
        assert_eq!(
            queued,
            vec![
                "example.com",
                "www.example.com",
                "www.example.org",
                "",
                "www.",
                "foo.net",
                "www.foo.net",
            ]
        );
    }

    #[test]
    fn test_feed_without_www() {
        let reporter = CollectingReporter::new();
        let mut queued = Vec::new();
        let input = Cursor::new("example.com\nwww.example.org\n");

        let pushed = feed(input, false, &reporter, |d| {
            queued.push(d);
            true
        });

        assert_eq!(pushed, 2);
        assert_eq!(queued, vec!["example.com", "www.example.org"]);
    }

    #[test]
    fn test_feed_stops_when_queue_closed() {
        let reporter = CollectingReporter::new();
        let pushed = feed(Cursor::new(domains(10)), true, &reporter, |_| false);
        assert_eq!(pushed, 0);
    }

    struct BrokenInput {
        data: Cursor<Vec<u8>>,
    }

    impl Read for BrokenInput {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "device gone"));
            }
            Ok(n)
        }
    }

    #[test]
    fn test_read_error_keeps_queued_work() {
        let settings = settings(2, false);
        let dialer = MockDialer::default();
        let reporter = CollectingReporter::new();
        let input = BufReader::new(BrokenInput {
            data: Cursor::new(b"a.example\nb.example\n".to_vec()),
        });

        let stats = Scanner::new(&settings, &dialer, &reporter).run(input);

        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.processed, 2);
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.contains("device gone")));
    }

    #[test]
    fn test_all_tasks_processed_with_fewer_workers() {
        let settings = settings(4, false);
        let dialer = MockDialer {
            delay: Some(Duration::from_millis(2)),
            ..MockDialer::default()
        };
        let reporter = CollectingReporter::new();

        let stats = Scanner::new(&settings, &dialer, &reporter).run(Cursor::new(domains(60)));

        assert_eq!(stats.enqueued, 60);
        assert_eq!(stats.processed, 60);
        assert_eq!(stats.failed, 0);
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 60);
        // ocsp + crl for the leaf, issuer for the intermediate
        assert_eq!(stats.lines, 180);
        assert_eq!(reporter.lines().len(), 180);
    }

    #[test]
    fn test_single_worker_drains_queue() {
        let settings = settings(1, true);
        let dialer = MockDialer::default();
        let reporter = CollectingReporter::new();

        let stats = Scanner::new(&settings, &dialer, &reporter).run(Cursor::new(domains(25)));

        assert_eq!(stats.enqueued, 50);
        assert_eq!(stats.processed, 50);
    }

    #[test]
    fn test_failure_does_not_block_other_hosts() {
        let settings = settings(1, false);
        let dialer = MockDialer::default();
        let reporter = CollectingReporter::new();

        let stats = Scanner::new(&settings, &dialer, &reporter)
            .run(Cursor::new("fail.example\ngood.example\n"));

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(
            reporter.lines(),
            vec!["ocsp.good.example", "crl.good.example", "ca.example"]
        );
        let diagnostics = reporter.diagnostics();
        assert!(diagnostics
            .iter()
            .any(|d| d.contains("fail.example") && d.contains("refused")));
        assert!(diagnostics.iter().any(|d| d.contains("not a url")));
    }

    #[test]
    fn test_raw_mode_prints_urls() {
        let settings = Settings {
            extractor: FieldExtractor::RawJoin,
            ..settings(1, false)
        };
        let dialer = MockDialer::default();
        let reporter = CollectingReporter::new();

        Scanner::new(&settings, &dialer, &reporter).run(Cursor::new("host.example\n"));

        assert_eq!(
            reporter.lines(),
            vec![
                "http://ocsp.host.example:8080/status",
                "http://crl.host.example/leaf.crl\nnot a url",
                "http://ca.example/root.crt",
            ]
        );
        assert!(reporter.diagnostics().is_empty());
    }

    struct PanickingDialer;

    impl Dialer for PanickingDialer {
        fn dial(&self, host: &str) -> Result<Vec<CertificateFields>, ProbeError> {
            panic!("dialer blew up on {}", host);
        }
    }

    #[test]
    fn test_dead_workers_do_not_hang_feeder() {
        let (done, finished) = mpsc::channel();
        thread::spawn(move || {
            let settings = settings(1, false);
            let reporter = CollectingReporter::new();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                Scanner::new(&settings, &PanickingDialer, &reporter)
                    .run(Cursor::new("a\nb\nc\nd\n"))
            }));
            let _ = done.send(outcome.is_err());
        });

        // The worker panic must surface from `run` rather than leave the
        // feeder blocked on a queue nobody reads.
        let panicked = finished
            .recv_timeout(Duration::from_secs(10))
            .expect("run did not return after its only worker died");
        assert!(panicked);
    }

    #[test]
    fn test_empty_input_terminates() {
        let settings = settings(8, true);
        let dialer = MockDialer::default();
        let reporter = CollectingReporter::new();

        let stats = Scanner::new(&settings, &dialer, &reporter).run(Cursor::new(""));

        assert_eq!(stats, ScanStats::default());
    }
}
