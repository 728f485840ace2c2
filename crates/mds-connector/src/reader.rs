//! Reader loop: broker records into the inbox.

use mds_core::broker::BrokerReader;
use mds_core::codec::{self, BrokerRecord};
use mds_core::error::ConnectorError;
use mds_core::store::MessageStore;
use mds_core::tx::TxSupplier;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::connector::{Connector, pause, until_cancelled};
use crate::tx::finish_tx;

impl<S: MessageStore> Connector<S> {
    /// Copies records from `reader` into the inbox until `cancel` fires.
    ///
    /// One record is held at a time. It is inserted, its offset committed to
    /// the broker and then the database transaction committed; if any of
    /// these steps fails the same record is retried after the error cooldown.
    /// A record the inbox already holds is skipped by the insert, so broker
    /// redelivery is harmless. Cancellation interrupts a pending fetch or a
    /// cooldown; a record already being stored is stored first.
    ///
    /// # Errors
    ///
    /// Never fails in practice; cancellation returns `Ok(())`.
    #[instrument(name = "read", skip_all, fields(instance_id = %self.instance_id))]
    pub async fn read<T, R>(
        &self,
        cancel: &CancellationToken,
        supplier: &T,
        reader: &R,
    ) -> Result<(), ConnectorError>
    where
        T: TxSupplier<Tx = S::Tx>,
        R: BrokerReader,
    {
        until_cancelled(self.read_loop(cancel, supplier, reader).await)
    }

    async fn read_loop<T, R>(
        &self,
        cancel: &CancellationToken,
        supplier: &T,
        reader: &R,
    ) -> Result<(), ConnectorError>
    where
        T: TxSupplier<Tx = S::Tx>,
        R: BrokerReader,
    {
        let mut held: Option<BrokerRecord> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(ConnectorError::Cancelled);
            }
            let record = match held.take() {
                Some(record) => record,
                None => {
                    let fetched = tokio::select! {
                        () = cancel.cancelled() => return Err(ConnectorError::Cancelled),
                        fetched = reader.fetch_message() => fetched,
                    };
                    match fetched {
                        Ok(record) => record,
                        Err(err) => {
                            error!(error = %err, "fetch message failed");
                            pause(cancel, self.config.error_cooldown).await?;
                            continue;
                        }
                    }
                }
            };

            match self.store_record(supplier, reader, &record).await {
                Ok(()) => debug!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "stored inbox message"
                ),
                Err(err) => {
                    error!(
                        error = %err,
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        key = %String::from_utf8_lossy(&record.key),
                        status_by = %self.instance_id,
                        "storing inbox message failed"
                    );
                    held = Some(record);
                    pause(cancel, self.config.error_cooldown).await?;
                }
            }
        }
    }

    async fn store_record<T, R>(
        &self,
        supplier: &T,
        reader: &R,
        record: &BrokerRecord,
    ) -> Result<(), ConnectorError>
    where
        T: TxSupplier<Tx = S::Tx>,
        R: BrokerReader,
    {
        let mut tx = supplier.begin().await?;
        let result = self.stage_record(&mut tx, reader, record).await;
        finish_tx(tx, result, self.config.commit_timeout).await
    }

    /// Inserts the record and commits its offset on the broker. The broker
    /// commit is not raced against cancellation: once started it may land
    /// even if its future is dropped, and the insert must then commit too.
    async fn stage_record<R: BrokerReader>(
        &self,
        tx: &mut S::Tx,
        reader: &R,
        record: &BrokerRecord,
    ) -> Result<(), ConnectorError> {
        let message = codec::decode(record);
        self.store
            .add_inbox_messages(tx, self.instance_id, std::slice::from_ref(&message))
            .await?;
        reader.commit_messages(std::slice::from_ref(record)).await
    }
}
