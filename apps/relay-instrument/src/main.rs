//! 单台仪器进程：总线请求 → 传输驱动 → 结果回发。
//!
//! 用法：`relay-instrument <设备配置.json>`。配置加载失败、设备连接失败、
//! 收到毒丸均以退出码 1 结束。

use bus_contract::{BusPublisher, Topics, issue_payload};
use relay_config::{BrokerConfig, config_path_from_args, load_equipment_config};
use relay_dispatch::{RouteOutcome, Router};
use relay_ingest::{BusConnection, BusSession, IngestError};
use relay_protocol::{ConnectOptions, connect};
use relay_telemetry::init_tracing;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{error, info};

/// 退出前留给事件循环发出最后一条诊断的时间
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    init_tracing();

    let path = config_path_from_args(std::env::args().skip(1))?;
    let config = load_equipment_config(&path)?;
    let broker = BrokerConfig::from_env()?;
    let name = config.name().to_string();
    let topics = Topics::for_name(&name);

    let data_read_topic = config
        .tags
        .data_read_topic
        .as_deref()
        .filter(|_| config.transport().is_bus());
    let BusConnection {
        publisher,
        mut inbound,
        mut event_loop,
    } = relay_ingest::connect(&broker, BusSession::instrument(&name, data_read_topic));
    let publisher: Arc<dyn BusPublisher> = Arc::new(publisher);

    let transport = match connect(&config, publisher.clone(), ConnectOptions::default()).await {
        Ok(transport) => transport,
        Err(err) => {
            error!(target: "relay.instrument", equipment = %name, error = %err, "instrument_connect_failed");
            let message = format!("Issue with Instrument connection: {err}");
            let _ = publisher
                .publish(&topics.server_issue, issue_payload(&message))
                .await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(
        target: "relay.instrument",
        equipment = %name,
        transport = transport.name(),
        "instrument_ready"
    );

    let mut router = Router::new(config, transport, publisher);
    loop {
        tokio::select! {
            message = inbound.recv() => {
                let Some(message) = message else {
                    break;
                };
                if router.handle(&message.topic, &message.payload).await == RouteOutcome::Shutdown {
                    info!(target: "relay.instrument", equipment = %name, "instrument_shutdown");
                    tokio::time::sleep(SHUTDOWN_GRACE).await;
                    return Ok(ExitCode::FAILURE);
                }
            }
            joined = &mut event_loop => {
                return bus_result(joined);
            }
        }
    }
    bus_result(event_loop.await)
}

fn bus_result(
    joined: Result<Result<(), IngestError>, JoinError>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match joined {
        Ok(Ok(())) => Ok(ExitCode::FAILURE),
        Ok(Err(err)) => {
            error!(target: "relay.instrument", error = %err, "bus_connection_failed");
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}
