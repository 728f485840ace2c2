//! MDS outbox relay entry point.
//!
//! Drains the outbox of a service database to Kafka. Useful for services
//! that only publish events and run no inbox handler.

use std::error::Error;

use mds_connector::kafka::{KafkaTopicMetadata, KafkaWriter};
use mds_connector::{Connector, ConnectorConfig, KafkaConfig, RelayConfig, await_topics, database};
use mds_message_store::PgMessageStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let RelayConfig { basic: config, topics } = RelayConfig::from_env()?;
    mds_connector::telemetry::init_tracing(&config.log_level);

    info!(kafka_addr = %config.kafka_addr, topics = ?topics, "starting MDS outbox relay");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "listen for shutdown signal failed");
            }
            info!("shutdown requested");
            cancel.cancel();
        }
    });

    let connector_config = ConnectorConfig::default();
    let supplier = database::connect(&config.db_conn_string).await?;
    if let Err(err) = await_topics(
        &cancel,
        &KafkaTopicMetadata::new(&config.kafka_addr),
        &topics,
        connector_config.topic_poll_interval,
    )
    .await
    {
        if err.is_cancelled() {
            return Ok(());
        }
        return Err(err.into());
    }

    let writer = KafkaWriter::new(
        &KafkaConfig::new(&config.kafka_addr, "mds-outbox-relay"),
        connector_config.write_timeout,
    )?;
    let connector = Connector::new(PgMessageStore::new(), connector_config);
    connector.pump_outgoing(&cancel, &supplier, &writer).await?;

    info!("MDS outbox relay stopped");
    Ok(())
}
