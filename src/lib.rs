pub mod channels;
pub mod config;
pub mod coordinator;
pub mod esy;
pub mod mqtt;
pub mod options;
pub mod prelude;
pub mod scheduler;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

use crate::coordinator::Coordinator;
use crate::esy::registry::ProtocolDef;
use crate::esy::registry_client::{DeviceVariant, RegistryClient};
use crate::mqtt::Mqtt;
use crate::scheduler::Scheduler;

fn init_logger(loglevel: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(loglevel))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();
}

// register definitions come from the vendor registry when enabled,
// otherwise from the built-in table
async fn load_protocol(config: &ConfigWrapper) -> ProtocolDef {
    let registry = config.registry();

    if !registry.enabled() {
        info!("registry fetch disabled, using built-in protocol table");
        return ProtocolDef::fallback();
    }

    let device = config.device();
    let variant = DeviceVariant {
        pv_power: device.pv_power(),
        tp_type: device.tp_type(),
        mcu_version: device.mcu_version(),
    };

    let mut client = RegistryClient::new(registry.url(), registry.token());
    client.protocol(variant).await
}

pub async fn app(
    mut shutdown_rx: broadcast::Receiver<()>,
    config: ConfigWrapper,
) -> Result<()> {
    init_logger(&config.loglevel());

    info!(
        "sunhome-bridge {} starting, device {}",
        CARGO_PKG_VERSION,
        config.device().serial()
    );

    let channels = Channels::new();

    let protocol = Arc::new(load_protocol(&config).await);
    info!(
        "protocol configId={}: {} input / {} holding registers",
        protocol.config_id,
        protocol.input_registers.len(),
        protocol.holding_registers.len()
    );

    let coordinator = Coordinator::new(config.clone(), channels.clone(), protocol);
    let scheduler = Scheduler::new(config.clone(), channels.clone());
    let mqtt = Mqtt::new(
        config.clone(),
        channels.clone(),
        coordinator.shared_stats.clone(),
    );

    let coordinator_clone = coordinator.clone();
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator_clone.start().await {
            error!("coordinator: {:?}", e);
        }
    });

    let scheduler_clone = scheduler.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler_clone.start().await {
            error!("scheduler: {:?}", e);
        }
    });

    let mqtt_clone = mqtt.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_clone.start().await {
            error!("mqtt: {:?}", e);
        }
    });

    let _ = shutdown_rx.recv().await;
    info!("shutdown signal received");

    coordinator.stop();
    let _ = mqtt.stop().await;

    let _ = coordinator_handle.await;
    let _ = mqtt_handle.await;
    scheduler_handle.abort();

    if let Ok(stats) = coordinator.shared_stats.lock() {
        stats.print_summary();
    }

    Ok(())
}

pub async fn run(config: ConfigWrapper) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
        }
        let _ = shutdown_tx_clone.send(());
    });

    app(shutdown_rx, config).await
}
