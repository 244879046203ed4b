//! item store configs

pub mod cli {
    //! Parse from either cli or env var

    /// Default address for the http api
    pub static DEFAULT_ADDR: &str = "[::]:8080";
    /// Default request timeout (seconds). Requests still running after this
    /// are answered with a timeout status.
    pub const DEFAULT_REQUEST_TIMEOUT: u64 = 10;
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "itemd-worker";
    /// reported by `/` and `/health`
    pub static DEFAULT_SERVICE_NAME: &str = "itemd";
    /// default log level. Can use this argument or ITEMD_LOG env var
    pub const DEFAULT_ITEMD_LOG: &str = "info";
    /// log as "json", "pretty" or "standard" (unstructured)
    pub static DEFAULT_LOG_FORMAT: &str = "standard";

    use std::{net::SocketAddr, time::Duration};

    pub use clap::Parser;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "itemd", bin_name = "itemd", about, long_about = None)]
    /// parses from cli & environment var. itemd will load `.env` in the working dir as well
    pub struct Config {
        /// the address the http api listens on
        #[clap(long, env, value_parser, default_value = DEFAULT_ADDR)]
        pub addr: SocketAddr,
        /// number of runtime worker threads, defaults to the number of logical CPUs
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// per request timeout in seconds
        #[clap(long, env, value_parser, default_value_t = DEFAULT_REQUEST_TIMEOUT)]
        pub request_timeout: u64,
        /// service name reported by the api
        #[clap(long, env, value_parser, default_value = DEFAULT_SERVICE_NAME)]
        pub service_name: String,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env = "ITEMD_LOG", value_parser, default_value = DEFAULT_ITEMD_LOG)]
        pub log: String,
        /// log output format: standard, json or pretty
        #[clap(long, env, value_parser, default_value = DEFAULT_LOG_FORMAT)]
        pub log_format: String,
        /// export spans over OTLP/gRPC to this collector, e.g. http://localhost:4317
        #[clap(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", value_parser)]
        pub otlp_endpoint: Option<String>,
    }

    impl Config {
        /// Create new timeout as `Duration`
        pub fn request_timeout(&self) -> Duration {
            Duration::from_secs(self.request_timeout)
        }
    }
}

pub mod trace {
    //! tracing configuration
    use anyhow::{Context, Result};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    /// Configuration for the global subscriber
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
        /// span exporter, present when an OTLP endpoint was given
        pub provider: Option<SdkTracerProvider>,
    }

    impl Config {
        /// Install the global subscriber. `log` is an `EnvFilter` directive,
        /// `log_frmt` one of "json", "pretty" or anything else for standard.
        ///
        /// With an `otlp_endpoint`, spans are also exported over OTLP/gRPC
        /// under `service`. Must be called inside a tokio runtime in that case.
        pub fn parse(
            log: &str,
            log_frmt: &str,
            otlp_endpoint: Option<&str>,
            service: &str,
        ) -> Result<Self> {
            let filter = EnvFilter::try_new(log)
                .or_else(|_| EnvFilter::try_new("info"))?
                .add_directive("hyper=off".parse()?)
                .add_directive("hyper_util=off".parse()?)
                .add_directive("tonic=off".parse()?)
                .add_directive("h2=off".parse()?);

            let provider = otlp_endpoint
                .map(|endpoint| tracer_provider(endpoint, service))
                .transpose()?;
            let otel = provider.as_ref().map(|provider| {
                tracing_opentelemetry::layer().with_tracer(provider.tracer(service.to_owned()))
            });

            match log_frmt {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(otel)
                        .with(fmt::layer().json())
                        .init();
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(otel)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new()),
                        )
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(otel)
                        .with(fmt::layer())
                        .init();
                }
            }

            Ok(Self {
                log_frmt: log_frmt.to_owned(),
                provider,
            })
        }

        /// Flush and stop the span exporter, if any.
        pub fn shutdown(&self) -> Result<()> {
            if let Some(provider) = &self.provider {
                provider
                    .shutdown()
                    .context("failed to shut down the OTLP span exporter")?;
            }
            Ok(())
        }
    }

    /// Batch span exporter speaking OTLP/gRPC to `endpoint`, tagged with `service`
    pub fn tracer_provider(endpoint: &str, service: &str) -> Result<SdkTracerProvider> {
        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .with_context(|| format!("failed to build OTLP exporter for {endpoint}"))?;
        Ok(SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                Resource::builder()
                    .with_service_name(service.to_owned())
                    .build(),
            )
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::cli::{Config, Parser};

    #[test]
    fn cli_defaults() {
        let cfg = Config::try_parse_from(["itemd"]).unwrap();
        assert_eq!(cfg.addr.port(), 8080);
        assert_eq!(cfg.request_timeout().as_secs(), 10);
        assert_eq!(cfg.threads, None);
        assert_eq!(cfg.service_name, "itemd");
        assert_eq!(cfg.otlp_endpoint, None);
    }

    #[test]
    fn cli_overrides() {
        let cfg = Config::try_parse_from([
            "itemd",
            "--addr",
            "127.0.0.1:9000",
            "--threads",
            "2",
            "--log-format",
            "json",
            "--otlp-endpoint",
            "http://collector:4317",
        ])
        .unwrap();
        assert_eq!(cfg.addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.threads, Some(2));
        assert_eq!(cfg.log_format, "json");
        assert_eq!(cfg.otlp_endpoint.as_deref(), Some("http://collector:4317"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn otlp_provider_builds() {
        // the exporter connects lazily, nothing needs to listen
        let provider = super::trace::tracer_provider("http://127.0.0.1:4317", "itemd-test").unwrap();
        provider.shutdown().unwrap();
    }
}
