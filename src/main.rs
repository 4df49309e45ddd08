mod config;
mod connection;
mod cycle;
mod sensor;
mod store;
mod transport;

use anyhow::Result;
use config::NodeConfig;
use connection::{MqttConfigChannel, UdpRouteLink};
use cycle::CycleController;
use sensor::IioLdr;
use std::sync::Arc;
use store::{FileStore, MemoryStore, RetainedStore};
use tokio::time::sleep;
use transport::{CoapPush, DeliveryStrategy, DirectStoreFallback, InfluxWriter, PointWriter};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = NodeConfig::from_env();

    info!("LDR node starting: {}", config.node_id);
    info!("  Collector: {}/{}", config.collector.address, config.collector_resource());
    info!("  Broker: {}:{}", config.broker.host, config.broker.port);
    info!("  Store: {} ({}/{})", config.store.url, config.store.org, config.store.bucket);

    let mut store: Box<dyn RetainedStore> = if config.retained_path.as_os_str().is_empty() {
        warn!("No retained path set; state will not survive a restart");
        Box::new(MemoryStore::new())
    } else {
        let file = FileStore::new(config.retained_path.clone());
        info!("  Retained state: {}", file.path().display());
        Box::new(file)
    };

    let writer: Arc<dyn PointWriter> =
        Arc::new(InfluxWriter::new(&config.store, config.timeouts.store_write)?);
    let strategies: Vec<Box<dyn DeliveryStrategy>> = vec![
        Box::new(CoapPush::new(
            config.collector.address.clone(),
            config.collector_resource(),
            config.timeouts.ack,
        )),
        Box::new(DirectStoreFallback::new(writer.clone())),
    ];

    let mut controller = CycleController::new(
        config.node_id.clone(),
        config.timeouts,
        Box::new(UdpRouteLink::new(config.collector.address.clone())),
        Box::new(MqttConfigChannel::new(
            config.broker.clone(),
            config.broker_client_id(),
            config.node_id.clone(),
            &config.timeouts,
        )),
        Box::new(IioLdr::new(config.sensor.adc_path.clone(), config.sensor.range)),
        strategies,
        writer,
    );

    // One iteration per wake; only the retained store carries state across
    loop {
        let mut state = store.load();
        let report = controller.run_cycle(&mut state).await;

        if let Err(e) = store.save(&state) {
            error!("Failed to persist retained state: {:#}", e);
        }

        if config.one_shot {
            info!("One-shot mode, exiting");
            return Ok(());
        }
        sleep(report.next_wake).await;
    }
}
