//! 现场设备连接器进程：设备传输 + 编解码 + 总线桥接 + 可选状态端点。

mod status;
mod wiring;

use ems_bridge::BrokerBridge;
use ems_codec::TypedCodec;
use ems_config::{ConfigError, ConnectorConfig};
use ems_pipeline::{Connector, spawn_connector};
use ems_storage::InMemoryRecordStore;
use ems_telemetry::init_tracing;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    init_tracing();
    // 配置错误直接退出，不建立任何连接
    let config = ConnectorConfig::from_env()?;

    let codec = TypedCodec::from_json(&config.datapoints)
        .map_err(|err| ConfigError::Invalid("EMS_DATAPOINTS".to_string(), err.to_string()))?;
    let transport = wiring::build_transport(config.transport, &config.transport_config)?;
    let dispatch = wiring::dispatch_mode(
        config.dispatch_mode,
        transport.read_mode(),
        config.poll_interval_ms,
    );
    let store = Arc::new(InMemoryRecordStore::new(config.log_retention));

    let (bridge, events) = BrokerBridge::new(wiring::bridge_config(&config));
    let handle = bridge.handle();
    let connector = Connector::new(
        transport,
        Arc::new(codec),
        Arc::new(handle.clone()),
        store.clone(),
        handle.topics().clone(),
        wiring::connector_settings(&config, dispatch),
    );
    info!(
        target: "ems.connector",
        connector = %config.connector_name,
        transport = %config.transport,
        dispatch = ?dispatch,
        broker = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
        "connector_starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let status_task = match &config.status_addr {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            let app = status::router(status::StatusState {
                connector: config.connector_name.clone(),
                bridge: handle.clone(),
                store: store.clone(),
            });
            let mut stop = shutdown_rx.clone();
            info!(target: "ems.connector", addr = %addr, "status_server_listening");
            Some(tokio::spawn(async move {
                let served = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stop.changed().await;
                    })
                    .await;
                if let Err(err) = served {
                    warn!(target: "ems.connector", error = %err, "status_server_failed");
                }
            }))
        }
        None => None,
    };

    let bridge_tasks = bridge.spawn();
    let mut running = spawn_connector(connector, events, shutdown_rx);
    let result = tokio::select! {
        _ = shutdown_signal() => {
            info!(target: "ems.connector", "shutdown_requested");
            shutdown_tx.send_replace(true);
            (&mut running).await
        }
        result = &mut running => {
            shutdown_tx.send_replace(true);
            result
        }
    };

    // 连接器任务异常退出时也要停掉桥接
    handle.disconnect();
    bridge_tasks.join().await;
    if let Some(task) = status_task {
        let _ = task.await;
    }
    result??;
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        }
        #[cfg(not(unix))]
        std::future::pending::<()>().await
    };
    tokio::select! {
        _ = signal::ctrl_c() => {},
        _ = terminate => {},
    }
}
