#![allow(clippy::cognitive_complexity)]
mod startup_health;

use external_api::{ExternalApi, Health, ServiceInfo};
use resource_store::ResourceStore;
use startup_health::verify_background_task_running;
use store_core::{
    config::{
        cli::{self, Parser},
        trace,
    },
    prelude::*,
    tokio::{runtime::Builder, signal},
};

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> Result<()> {
    if let Err(err) = dotenv::dotenv() {
        // nothing is subscribed yet, keep it for after init
        eprintln!(".env file not loaded: {err}");
    }
    // parses from cli or environment var
    let config = cli::Config::parse();

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    // if we have a configured value here, set it
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    // build the runtime
    let rt = builder.build()?;
    // the OTLP exporter needs a runtime to connect from
    let trace_config = {
        let _guard = rt.enter();
        trace::Config::parse(
            &config.log,
            &config.log_format,
            config.otlp_endpoint.as_deref(),
            &config.service_name,
        )?
    };
    debug!(?config, ?trace_config);

    rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => error!(?err, "failed to start server"),
            Ok(Err(err)) => error!(?err, "exited with error"),
            Ok(_) => debug!("exiting..."),
        }
    });

    if let Err(err) = trace_config.shutdown() {
        eprintln!("{err:#}");
    }
    Ok(())
}

async fn start(config: cli::Config) -> Result<()> {
    info!(service = %config.service_name, addr = %config.addr, "starting item store");
    let store = ResourceStore::new();
    let api = ExternalApi::new(
        config.addr,
        store,
        ServiceInfo::new(config.service_name.clone(), env!("CARGO_PKG_VERSION")),
    )
    .with_request_timeout(config.request_timeout());

    let token = CancellationToken::new();
    let api_sender = api.sender();
    let mut api_task = api.start(token.clone());

    // Keep health BAD until the api is confirmed running.
    if let Err(err) = verify_background_task_running("external API", &mut api_task)
        .await
        .context("startup check failed")
    {
        let _ = api_sender.send(Health::Bad).await;
        token.cancel();
        return Err(err);
    }

    debug!("changing health to good after startup checks passed");
    api_sender
        .send(Health::Good)
        .await
        .context("error occurred in changing health status to Good")?;

    tokio::select! {
        res = shutdown_signal(token.clone()) => {
            res?;
            info!("shutdown requested, draining connections");
        }
        res = &mut api_task => {
            token.cancel();
            return match res {
                Ok(()) => Err(anyhow::anyhow!("external API exited unexpectedly")),
                Err(err) => Err(anyhow::anyhow!("external API panicked: {err}")),
            };
        }
    }

    if let Err(err) = api_task.await {
        error!(?err, "error waiting for web server API");
    }
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    let ret = signal::ctrl_c().await.map_err(|err| anyhow::anyhow!(err));
    token.cancel();
    ret
}
