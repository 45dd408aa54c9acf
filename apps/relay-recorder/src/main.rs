//! 批量入库进程：订阅 `Relay/Data/#`，按 1 秒窗口把读数追加到 PostgreSQL。
//!
//! 用法：`relay-recorder <入库配置.json>`。

use bus_contract::{BusPublisher, SHUTDOWN_NOTICE, Topics, issue_payload, parse_envelope};
use relay_config::{BrokerConfig, config_path_from_args, load_recorder_config};
use relay_ingest::{BusConnection, BusSession, InboundMessage, IngestError};
use relay_pipeline::{BatchConfig, BatchWriter, IngestOutcome, PipelineError};
use relay_storage::PgBatchStore;
use relay_telemetry::init_tracing;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let path = config_path_from_args(std::env::args().skip(1))?;
    let recorder = load_recorder_config(&path)?;
    let broker = BrokerConfig::from_env()?;
    let topics = Topics::for_name(&recorder.database_name);

    let BusConnection {
        publisher,
        mut inbound,
        mut event_loop,
    } = relay_ingest::connect(&broker, BusSession::recorder(&recorder.database_name));

    let store = match PgBatchStore::connect(&recorder.server, &recorder.default_table).await {
        Ok(store) => store,
        Err(err) => {
            error!(target: "relay.recorder", error = %err, "database_connect_failed");
            let message = format!("[Error with database connection: {err}]");
            let _ = publisher
                .publish(&topics.server_issue, issue_payload(&message))
                .await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(
        target: "relay.recorder",
        database = %recorder.database_name,
        table = %store.table(),
        "recorder_ready"
    );

    let config = BatchConfig {
        max_pending_rows: recorder.max_pending_rows,
        ..BatchConfig::default()
    };
    let mut writer = BatchWriter::new(Arc::new(store), config);

    loop {
        tokio::select! {
            message = inbound.recv() => {
                let Some(message) = message else {
                    break;
                };
                if message.topic == topics.poison_pill {
                    warn!(target: "relay.recorder", "poison_pill_received");
                    let _ = publisher
                        .publish(&topics.server_issue, issue_payload(SHUTDOWN_NOTICE))
                        .await;
                    tokio::time::sleep(SHUTDOWN_GRACE).await;
                    return Ok(ExitCode::FAILURE);
                }
                if let Err(err) = record(&mut writer, &message).await {
                    warn!(target: "relay.recorder", topic = %message.topic, error = %err, "record_failed");
                    let text = format!("[Received bad message or bad database write: {err}]");
                    let _ = publisher
                        .publish(&topics.server_issue, issue_payload(&text))
                        .await;
                }
            }
            joined = &mut event_loop => {
                return match joined {
                    Ok(Err(err)) => Err(err.into()),
                    Ok(Ok(())) => Ok(ExitCode::FAILURE),
                    Err(err) => Err(err.into()),
                };
            }
        }
    }

    let joined: Result<(), IngestError> = event_loop.await?;
    joined?;
    Ok(ExitCode::FAILURE)
}

async fn record(writer: &mut BatchWriter, message: &InboundMessage) -> Result<(), PipelineError> {
    let envelope =
        parse_envelope(&message.payload).map_err(|err| PipelineError::Writer(err.to_string()))?;
    match writer.ingest(&envelope).await? {
        IngestOutcome::Buffered { pending } => {
            debug!(target: "relay.recorder", equipment = %envelope.equipment, pending, "rows_buffered");
        }
        IngestOutcome::Flushed { rows } => {
            debug!(target: "relay.recorder", rows, "rows_flushed");
        }
    }
    Ok(())
}
