use clap::Parser;
use std::io;
use std::path::{Path, PathBuf};
use std::process::exit;
use tracing_subscriber::EnvFilter;

use certscout::config::{Config, ConfigError, PrometheusConfig, Settings, DEFAULT_CONFIG_FILE};
use certscout::{Scanner, StdReporter, TlsDialer};

mod metrics;

/// Reads domain names from standard input, one per line, and prints the OCSP,
/// CA issuer and CRL URLs found in each host's TLS certificate chain.
#[derive(Parser, Debug)]
#[command(name = "certscout", version, author)]
struct Cli {
    /// Print only the host of each URL; --ed=false prints the full URLs
    #[arg(long = "ed", value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    extract_domains: Option<bool>,

    /// Number of concurrent workers [default: 100]
    #[arg(long, value_name = "N")]
    routines: Option<usize>,

    /// Connection and handshake timeout per host, e.g. 5s or 750ms [default: 5s]
    #[arg(short = 't', long, value_name = "DURATION")]
    timeout: Option<String>,

    /// Also scan www.<domain> for domains without that prefix [default: true]
    #[arg(long = "pluswww", value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    plus_www: Option<bool>,

    /// Skip certificate chain and host name verification
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    insecure: Option<bool>,

    /// Additional PEM file of trusted CA certificates
    #[arg(long, value_name = "FILE")]
    ca_file: Option<PathBuf>,

    /// Configuration file [default: ./certscout.toml when present]
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,

    /// Push scan counters to a Prometheus Push Gateway
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    prometheus: Option<bool>,

    /// Prometheus Push Gateway address [default: http://localhost:9091]
    #[arg(long, value_name = "URL")]
    prometheus_address: Option<String>,
}

impl Cli {
    fn to_config(&self) -> Config {
        Config {
            extract_domains: self.extract_domains,
            routines: self.routines,
            timeout: self.timeout.clone(),
            plus_www: self.plus_www,
            insecure: self.insecure,
            ca_file: self.ca_file.clone(),
            prometheus: Some(PrometheusConfig {
                enabled: self.prometheus,
                address: self.prometheus_address.clone(),
            }),
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings, ConfigError> {
    let file_config = match cli.config {
        Some(ref path) => Some(Config::from_file(path)?),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Some(Config::from_file(DEFAULT_CONFIG_FILE)?)
        }
        None => None,
    };

    // Settings fills in the defaults, so only the file and the CLI are layered here.
    let config = match file_config {
        Some(file_config) => file_config.merge_with(cli.to_config()),
        None => cli.to_config(),
    };
    Settings::from_config(config)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if cli.example_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };

    let dialer = match TlsDialer::from_settings(&settings) {
        Ok(dialer) => dialer,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };

    let stdin = io::stdin();
    let stats = Scanner::new(&settings, &dialer, &StdReporter).run(stdin.lock());

    if let Some(ref address) = settings.prometheus_address {
        metrics::prom::prometheus_metrics(&stats, settings.routines, address);
    }

    exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_boolean_flags() {
        let cli = Cli::try_parse_from(["certscout", "--insecure", "--ed=false", "--pluswww", "false"])
            .unwrap();
        assert_eq!(cli.insecure, Some(true));
        assert_eq!(cli.extract_domains, Some(false));
        assert_eq!(cli.plus_www, Some(false));
        assert_eq!(cli.prometheus, None);
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::try_parse_from(["certscout", "--routines", "7", "-t", "2s"]).unwrap();
        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.routines, 7);
        assert_eq!(settings.timeout, std::time::Duration::from_secs(2));
        assert!(settings.plus_www);
        assert!(!settings.insecure);
    }

    #[test]
    fn test_file_values_survive_cli_layering() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"routines = 9\ntimeout = \"2s\"\nplus_www = false\n",
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let cli = Cli::try_parse_from(["certscout", "-c", path, "--routines", "3"]).unwrap();
        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.routines, 3);
        assert_eq!(settings.timeout, std::time::Duration::from_secs(2));
        assert!(!settings.plus_www);
        assert!(settings.extractor == certscout::FieldExtractor::DomainJoin);
        assert!(!settings.insecure);
        assert!(settings.prometheus_address.is_none());
    }

    #[test]
    fn test_rejects_non_numeric_routines() {
        assert!(Cli::try_parse_from(["certscout", "--routines", "many"]).is_err());
    }
}
