use log::{error, info, warn};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use ruuvi_pipeline::aggregator::{run_transmitter, transmit_once, LastValueAggregator};
use ruuvi_pipeline::aliases::read_aliases;
use ruuvi_pipeline::archive::Archiver;
use ruuvi_pipeline::client::IngestClient;
use ruuvi_pipeline::config::{ClientConfig, PipelineConfig, RenderConfig, ServerConfig};
use ruuvi_pipeline::driver::{run_driver_input, SampleResolver};
use ruuvi_pipeline::endpoint::IngestionEndpoint;
use ruuvi_pipeline::logging::init_logging;
use ruuvi_pipeline::render::{run_render_worker, RenderTrigger, Renderer, SeriesRenderer};
use ruuvi_pipeline::scheduler::Scheduler;
use ruuvi_pipeline::store::MeasurementStore;

type BoxError = Box<dyn std::error::Error>;

/// Cancel `token` on Ctrl+C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Program terminated by user. Exiting gracefully."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        token.cancel();
    });
}

async fn run_server(config: ServerConfig) -> Result<(), BoxError> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let store = Arc::new(MeasurementStore::new());
    let renderer: Arc<dyn Renderer> = Arc::new(SeriesRenderer::new(&config.render_output));
    let (trigger, requests) = RenderTrigger::new(config.render_threshold);

    let endpoint = match IngestionEndpoint::bind(
        &config.listen_addr,
        Arc::clone(&store),
        Arc::new(trigger),
        config.shutdown_timeout,
    )
    .await
    {
        Ok(endpoint) => endpoint,
        Err(e) => {
            error!("Failed to bind {}: {}", config.listen_addr, e);
            return Err(e.into());
        }
    };

    info!("Starting plotter service");
    let render_task = tokio::spawn(run_render_worker(
        Arc::clone(&store),
        renderer,
        config.scheduler.archive_file.clone().map(Archiver::new),
        requests,
        cancel.clone(),
    ));
    let scheduler = Scheduler::spawn(
        Arc::clone(&store),
        config.scheduler.clone(),
        cancel.child_token(),
    );

    endpoint.serve(cancel.clone()).await;

    scheduler.shutdown().await;
    if let Err(e) = render_task.await {
        error!("Render worker failed: {}", e);
    }
    info!("Shutdown complete with {} measurements in memory", store.len());
    Ok(())
}

async fn run_client(config: ClientConfig) -> Result<(), BoxError> {
    let aliases = match read_aliases(&config.aliases_file) {
        Ok(aliases) => aliases,
        Err(e) => {
            error!("Failed to read aliases file: {}", e);
            return Err(e.into());
        }
    };
    if aliases.is_empty() && config.strict_aliases {
        warn!("No device aliases configured; strict matching will drop every sample");
    }

    let client = IngestClient::from_url(&config.ingest_url)?;
    let resolver = SampleResolver::new(aliases, config.strict_aliases);
    let aggregator = LastValueAggregator::new();

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    info!("Reading sensor driver events from stdin (press Ctrl+C to stop)...");
    let input = BufReader::new(tokio::io::stdin());
    let driver = async {
        let result = run_driver_input(input, &resolver, &aggregator, cancel.clone()).await;
        // Without driver input there is nothing more to transmit.
        cancel.cancel();
        result
    };
    let transmitter = run_transmitter(
        &aggregator,
        &client,
        config.transmit_interval,
        cancel.clone(),
    );

    let (driver_result, ()) = tokio::join!(driver, transmitter);
    match driver_result {
        Ok(count) => info!("Recorded {} readings from the sensor driver", count),
        Err(e) => error!("Sensor driver input failed: {}", e),
    }

    // Flush whatever arrived since the last tick.
    transmit_once(&aggregator, &client).await;
    Ok(())
}

async fn run_render(config: RenderConfig) -> Result<(), BoxError> {
    let readings = Archiver::load(&config.archive).await?;
    let snapshot: Vec<_> = readings.into_iter().map(Arc::new).collect();
    info!(
        "Rendering {} measurements from {}",
        snapshot.len(),
        config.archive.display()
    );

    SeriesRenderer::new(&config.output).render(&snapshot)?;
    info!("Wrote {}", config.output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize logging
    init_logging();

    // Load configuration
    let config = match PipelineConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match config {
        PipelineConfig::Server(server) => run_server(server).await,
        PipelineConfig::Client(client) => run_client(client).await,
        PipelineConfig::Render(render) => run_render(render).await,
    }
}
