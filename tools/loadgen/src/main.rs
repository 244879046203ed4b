use clap::Parser;
use store_core::config::trace;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use loadgen::{Cli, LoadGenConfig, run_load_test};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let output_json = cli.json;

    if let Err(err) = trace::Config::parse(&cli.log, &cli.log_format, None, "loadgen") {
        eprintln!("failed to set up logging: {err:#}");
        std::process::exit(2);
    }

    let config = match LoadGenConfig::try_from(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(token.clone()));

    match run_load_test(config, token).await {
        Ok(report) => {
            if output_json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(err) => {
                        eprintln!("failed to serialize report: {err:#}");
                        std::process::exit(2);
                    }
                }
            } else {
                println!("{}", report.human_summary());
            }

            if report.passed {
                std::process::exit(0);
            }

            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("run failed: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn cancel_on_interrupt(token: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            warn!("interrupt received, stopping workers");
            token.cancel();
        }
        Err(err) => warn!(%err, "unable to listen for interrupt"),
    }
}
