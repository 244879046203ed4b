use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use tracing::warn;

use crate::operation::OperationMix;

pub const DEFAULT_TARGET: &str = "http://localhost:8080";
pub const DEFAULT_DURATION: Duration = Duration::from_secs(5 * 60);
/// longest run or report interval accepted, one year
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);
pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_HEALTH_RETRIES: usize = 30;
pub const DEFAULT_REPORT_INTERVAL: &str = "30s";
pub const DEFAULT_MIN_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 2_000;
pub const DEFAULT_MAX_ERROR_RATE: f64 = 1.0;
pub const DEFAULT_LOADGEN_LOG: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "standard";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "loadgen",
    about = "Weighted random load generator for the item API"
)]
pub struct Cli {
    /// base url of the item API, a bare `host:port` is taken as http
    #[arg(long, env = "DEMO_APP_URL")]
    pub target: Option<String>,
    /// how long to generate load: `90s`, `5m`, `1h`, `500ms` or plain seconds
    #[arg(long, env = "LOAD_DURATION", allow_hyphen_values = true)]
    pub duration: Option<String>,
    /// number of concurrent workers
    #[arg(long, env = "CONCURRENCY", allow_hyphen_values = true)]
    pub concurrency: Option<String>,

    /// per-request timeout
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,
    #[arg(long, default_value_t = DEFAULT_HEALTH_INTERVAL_MS)]
    pub health_interval_ms: u64,
    #[arg(long, default_value_t = DEFAULT_HEALTH_RETRIES)]
    pub health_retries: usize,
    /// how often the running tally is logged
    #[arg(long, default_value = DEFAULT_REPORT_INTERVAL)]
    pub report_interval: String,
    #[arg(long, default_value_t = DEFAULT_MIN_DELAY_MS)]
    pub min_delay_ms: u64,
    #[arg(long, default_value_t = DEFAULT_MAX_DELAY_MS)]
    pub max_delay_ms: u64,

    /// operation weights, ex. `health=3,create=2,list=3,get=2,update=1,delete=1`
    #[arg(long)]
    pub weights: Option<String>,
    /// seed worker rngs for a reproducible operation sequence
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long, default_value_t = DEFAULT_MAX_ERROR_RATE)]
    pub max_error_rate: f64,
    #[arg(long)]
    pub json: bool,

    /// tracing EnvFilter directive
    #[arg(long, env = "LOADGEN_LOG", default_value = DEFAULT_LOADGEN_LOG)]
    pub log: String,
    /// `standard`, `json` or `pretty`
    #[arg(long, env = "LOG_FORMAT", default_value = DEFAULT_LOG_FORMAT)]
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadGenConfig {
    pub target: String,
    pub duration: Duration,
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub health_interval_ms: u64,
    pub health_retries: usize,
    pub report_interval: Duration,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub mix: OperationMix,
    pub seed: Option<u64>,
    pub max_error_rate: f64,
    pub json: bool,
}

impl LoadGenConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

impl TryFrom<Cli> for LoadGenConfig {
    type Error = anyhow::Error;

    fn try_from(args: Cli) -> Result<Self> {
        if args.timeout_ms == 0 {
            bail!("--timeout-ms must be greater than 0");
        }
        if args.health_retries == 0 {
            bail!("--health-retries must be greater than 0");
        }
        if args.min_delay_ms > args.max_delay_ms {
            bail!("--min-delay-ms must not exceed --max-delay-ms");
        }
        if !(0.0..=1.0).contains(&args.max_error_rate) {
            bail!("--max-error-rate must be between 0.0 and 1.0");
        }
        let report_interval = parse_duration(&args.report_interval)
            .context("invalid --report-interval")?;
        if report_interval.is_zero() {
            bail!("--report-interval must be greater than 0");
        }
        let mix = match args.weights.as_deref() {
            Some(raw) => OperationMix::parse(raw).context("invalid --weights")?,
            None => OperationMix::default(),
        };

        Ok(Self {
            target: target_or_default(args.target.as_deref()),
            duration: duration_or_default(args.duration.as_deref()),
            concurrency: concurrency_or_default(args.concurrency.as_deref()),
            timeout_ms: args.timeout_ms,
            health_interval_ms: args.health_interval_ms,
            health_retries: args.health_retries,
            report_interval,
            min_delay_ms: args.min_delay_ms,
            max_delay_ms: args.max_delay_ms,
            mix,
            seed: args.seed,
            max_error_rate: args.max_error_rate,
            json: args.json,
        })
    }
}

/// Parse `500ms`, `90s`, `5m`, `1h` or a plain number of seconds. Anything
/// above [`MAX_DURATION`] is rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty duration string");
    }
    let (num, unit_ms) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 3_600_000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1_000)
    } else {
        (s, 1_000)
    };
    let value = num
        .trim()
        .parse::<u64>()
        .with_context(|| format!("invalid duration value: `{s}`"))?;
    let millis = value
        .checked_mul(unit_ms)
        .filter(|ms| u128::from(*ms) <= MAX_DURATION.as_millis())
        .with_context(|| format!("duration `{s}` exceeds the limit of {MAX_DURATION:?}"))?;
    Ok(Duration::from_millis(millis))
}

fn target_or_default(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return DEFAULT_TARGET.to_string();
    };
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    match reqwest::Url::parse(&candidate) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
            candidate.trim_end_matches('/').to_string()
        }
        _ => {
            warn!(url = raw, fallback = DEFAULT_TARGET, "invalid target, using default");
            DEFAULT_TARGET.to_string()
        }
    }
}

fn duration_or_default(raw: Option<&str>) -> Duration {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return DEFAULT_DURATION;
    };
    match parse_duration(raw) {
        Ok(duration) if !duration.is_zero() => duration,
        Ok(_) => {
            warn!(duration = raw, fallback = ?DEFAULT_DURATION, "duration must be positive, using default");
            DEFAULT_DURATION
        }
        Err(err) => {
            warn!(duration = raw, %err, fallback = ?DEFAULT_DURATION, "invalid duration, using default");
            DEFAULT_DURATION
        }
    }
}

fn concurrency_or_default(raw: Option<&str>) -> usize {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return DEFAULT_CONCURRENCY;
    };
    match raw.parse::<i64>() {
        Ok(n) if n > 0 => n as usize,
        _ => {
            warn!(
                concurrency = raw,
                fallback = DEFAULT_CONCURRENCY,
                "concurrency must be a positive integer, using default"
            );
            DEFAULT_CONCURRENCY
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use tracing_test::traced_test;

    use super::*;
    use crate::operation::Operation;

    fn parse(args: &[&str]) -> Result<LoadGenConfig> {
        let cli = Cli::try_parse_from(std::iter::once("loadgen").chain(args.iter().copied()))?;
        LoadGenConfig::try_from(cli)
    }

    #[test]
    fn parse_durations() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 42 ").unwrap(), Duration::from_secs(42));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("ten minutes").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("99999999999999999h").is_err());
        assert!(parse_duration("18446744073709551615").is_err());
        assert!(parse_duration("366d").is_err());
        assert_eq!(parse_duration("8760h").unwrap(), MAX_DURATION);
    }

    #[test]
    #[traced_test]
    fn oversized_durations_fall_back() {
        for huge in ["99999999999999999h", "18446744073709551615", "9000h"] {
            let config = parse(&["--duration", huge]).unwrap();
            assert_eq!(config.duration, DEFAULT_DURATION, "{huge}");
        }
        assert!(logs_contain("invalid duration, using default"));
        assert!(parse(&["--report-interval", "18446744073709551615"]).is_err());
    }

    #[test]
    fn explicit_values() {
        let config = parse(&[
            "--target",
            "http://api:9000/",
            "--duration",
            "2m",
            "--concurrency",
            "8",
            "--weights",
            "delete=0",
            "--seed",
            "11",
        ])
        .unwrap();
        assert_eq!(config.target, "http://api:9000");
        assert_eq!(config.duration, Duration::from_secs(120));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.mix.weight(Operation::Delete), 0);
        assert_eq!(config.seed, Some(11));
        assert_eq!(config.report_interval, Duration::from_secs(30));
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn bare_host_gets_scheme() {
        let config = parse(&["--target", "localhost:8081"]).unwrap();
        assert_eq!(config.target, "http://localhost:8081");
    }

    #[test]
    #[traced_test]
    fn non_positive_values_fall_back() {
        let config = parse(&["--duration", "0s", "--concurrency", "-2"]).unwrap();
        assert_eq!(config.duration, DEFAULT_DURATION);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert!(logs_contain("using default"));
    }

    #[test]
    #[traced_test]
    fn garbage_values_fall_back() {
        let config = parse(&[
            "--target",
            "ftp://nope",
            "--duration",
            "soon",
            "--concurrency",
            "many",
        ])
        .unwrap();
        assert_eq!(config.target, DEFAULT_TARGET);
        assert_eq!(config.duration, DEFAULT_DURATION);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert!(logs_contain("invalid target"));
    }

    #[test]
    fn rejects_bad_tuning() {
        assert!(parse(&["--timeout-ms", "0"]).is_err());
        assert!(parse(&["--min-delay-ms", "500", "--max-delay-ms", "100"]).is_err());
        assert!(parse(&["--max-error-rate", "1.5"]).is_err());
        assert!(parse(&["--report-interval", "0s"]).is_err());
        assert!(parse(&["--weights", "bogus=1"]).is_err());
    }
}
