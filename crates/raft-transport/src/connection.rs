//! # connection
//!
//! why: reassembly runs on the i/o runtime while consensus stays on its own thread
//! relations: drives pipeline.rs over a tokio stream; hands messages to runtime.rs through a crossbeam channel
//! what: read_connection, write_message

use crossbeam_channel::{Sender, TrySendError};
use raft_core::{ClusterId, ClusterIdAwareMessage, RaftMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};
use crate::fragmenter::MessageFragmenter;
use crate::pipeline::InboundPipeline;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// read messages until the peer closes the stream; returns how many were handed over
///
/// a protocol violation ends the connection, consensus state is never touched
pub async fn read_connection<R>(
    mut reader: R,
    mut pipeline: InboundPipeline,
    worker: Sender<ClusterIdAwareMessage>,
) -> TransportResult<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut delivered = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            if !pipeline.is_idle() {
                warn!(cluster = %pipeline.cluster_id(), "connection closed in the middle of a message");
            }
            debug!(cluster = %pipeline.cluster_id(), delivered, "connection closed");
            return Ok(delivered);
        }

        let messages = pipeline.feed(&buf[..n]).map_err(|err| {
            warn!(cluster = %pipeline.cluster_id(), error = %err, "dropping connection after protocol violation");
            TransportError::from(err)
        })?;
        for message in messages {
            hand_over(&worker, message).await?;
            delivered += 1;
        }
    }
}

/// queue for the worker; while the queue is full the wait happens on the
/// blocking pool so the i/o runtime keeps serving other connections
async fn hand_over(
    worker: &Sender<ClusterIdAwareMessage>,
    message: ClusterIdAwareMessage,
) -> TransportResult<()> {
    match worker.try_send(message) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(message)) => {
            let worker = worker.clone();
            tokio::task::spawn_blocking(move || worker.send(message))
                .await
                .map_err(|_| TransportError::WorkerStopped)?
                .map_err(|_| TransportError::WorkerStopped)
        }
        Err(TrySendError::Disconnected(_)) => Err(TransportError::WorkerStopped),
    }
}

/// write one message as frames
pub async fn write_message<W>(
    writer: &mut W,
    fragmenter: &MessageFragmenter,
    cluster_id: ClusterId,
    message: &RaftMessage,
) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = fragmenter.encode(cluster_id, message)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;

    #[tokio::test]
    async fn messages_cross_a_duplex_stream() {
        let cluster_id = ClusterId::new();
        let config = TransportConfig { max_chunk_payload: 32, ..TransportConfig::default() };
        let fragmenter = MessageFragmenter::new(config.max_chunk_payload);
        let (mut client, server) = tokio::io::duplex(16);
        let (tx, rx) = crossbeam_channel::bounded(8);

        let reader = tokio::spawn(read_connection(server, InboundPipeline::new(cluster_id, &config), tx));

        let proposal = RaftMessage::NewEntryRequest { from: 1, content: vec![3; 100] };
        write_message(&mut client, &fragmenter, cluster_id, &proposal).await.unwrap();
        write_message(&mut client, &fragmenter, cluster_id, &RaftMessage::HeartbeatResponse { from: 2 })
            .await
            .unwrap();
        drop(client);

        assert_eq!(reader.await.unwrap().unwrap(), 2);
        assert_eq!(rx.recv().unwrap().message, proposal);
        assert_eq!(rx.recv().unwrap().message, RaftMessage::HeartbeatResponse { from: 2 });
    }

    #[tokio::test]
    async fn protocol_violation_ends_the_connection() {
        let config = TransportConfig::default();
        let (mut client, server) = tokio::io::duplex(64);
        let (tx, rx) = crossbeam_channel::bounded(8);

        let reader = tokio::spawn(read_connection(server, InboundPipeline::new(ClusterId::new(), &config), tx));
        client.write_all(&[7, 0, 0, 0, 0, 0]).await.unwrap();

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(TransportError::Protocol(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_waits_for_the_worker() {
        let cluster_id = ClusterId::new();
        let config = TransportConfig::default();
        let fragmenter = MessageFragmenter::new(config.max_chunk_payload);
        let (mut client, server) = tokio::io::duplex(4096);
        let (tx, rx) = crossbeam_channel::bounded(1);

        let reader = tokio::spawn(read_connection(server, InboundPipeline::new(cluster_id, &config), tx));
        let sent: Vec<_> = (0..3).map(|prune_index| RaftMessage::PruneRequest { from: 1, prune_index }).collect();
        for message in &sent {
            write_message(&mut client, &fragmenter, cluster_id, message).await.unwrap();
        }
        drop(client);

        let worker = tokio::task::spawn_blocking(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            (0..3)
                .map(|_| rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap().message)
                .collect::<Vec<_>>()
        });

        assert_eq!(reader.await.unwrap().unwrap(), 3);
        assert_eq!(worker.await.unwrap(), sent);
    }

    #[tokio::test]
    async fn worker_gone_while_queue_is_full() {
        let cluster_id = ClusterId::new();
        let config = TransportConfig::default();
        let fragmenter = MessageFragmenter::new(config.max_chunk_payload);
        let (mut client, server) = tokio::io::duplex(1024);
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(ClusterIdAwareMessage::new(cluster_id, RaftMessage::HeartbeatResponse { from: 9 })).unwrap();

        let reader = tokio::spawn(read_connection(server, InboundPipeline::new(cluster_id, &config), tx));
        write_message(&mut client, &fragmenter, cluster_id, &RaftMessage::HeartbeatResponse { from: 1 })
            .await
            .unwrap();
        drop(rx);

        assert!(matches!(reader.await.unwrap(), Err(TransportError::WorkerStopped)));
    }
}
