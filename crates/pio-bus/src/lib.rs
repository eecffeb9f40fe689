//! MQTT-backed pub/sub fronting the leader/worker control plane. See
//! spec.md §4.3. Every publish returns a handle the caller can wait on for
//! broker acknowledgement, with a timeout -- callers that need a guaranteed
//! response treat a timed-out ack as "fall back to HTTP", not as an error.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, Outgoing, QoS};
use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("waiting for broker ack timed out")]
    AckTimeout,
    #[error("bus shut down before the ack arrived")]
    Closed,
}

/// A pending acknowledgement for one publish call.
pub struct PublishHandle {
    rx: oneshot::Receiver<()>,
}

impl PublishHandle {
    /// Block until the broker acks this publish (QoS 1/2) or it was
    /// considered sent (QoS 0), or `timeout` elapses.
    pub async fn wait(self, timeout: Duration) -> Result<(), BusError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => Err(BusError::AckTimeout),
        }
    }
}

struct PendingAck {
    qos: QoS,
    tx: oneshot::Sender<()>,
}

/// Handle to the MQTT connection. Cheap to clone; the background eventloop
/// task owns the actual socket.
#[derive(Clone)]
pub struct Bus {
    client: AsyncClient,
    /// Publishes awaiting a pkid assignment from the eventloop's `Outgoing`
    /// stream, in call order (rumqttc serializes outgoing packets per client).
    awaiting_pkid: std::sync::Arc<Mutex<VecDeque<PendingAck>>>,
    /// Publishes that have a pkid and are awaiting `PubAck`/`PubComp`.
    awaiting_ack: std::sync::Arc<DashMap<u16, oneshot::Sender<()>>>,
}

impl Bus {
    /// Connect to `host:port` under `client_id` and spawn the background
    /// eventloop-polling task.
    pub fn connect(client_id: &str, host: &str, port: u16) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(options, 64);

        let bus = Self {
            client,
            awaiting_pkid: std::sync::Arc::new(Mutex::new(VecDeque::new())),
            awaiting_ack: std::sync::Arc::new(DashMap::new()),
        };
        bus.spawn_eventloop(eventloop);
        bus
    }

    fn spawn_eventloop(&self, mut eventloop: rumqttc::EventLoop) {
        let awaiting_pkid = self.awaiting_pkid.clone();
        let awaiting_ack = self.awaiting_ack.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        let pending = awaiting_pkid.lock().unwrap().pop_front();
                        let Some(pending) = pending else { continue };
                        if pending.qos == QoS::AtMostOnce {
                            let _ = pending.tx.send(());
                        } else {
                            awaiting_ack.insert(pkid, pending.tx);
                        }
                    }
                    Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                        if let Some((_, tx)) = awaiting_ack.remove(&ack.pkid) {
                            let _ = tx.send(());
                        }
                    }
                    Ok(Event::Incoming(Incoming::PubComp(ack))) => {
                        if let Some((_, tx)) = awaiting_ack.remove(&ack.pkid) {
                            let _ = tx.send(());
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "mqtt eventloop error, reconnecting");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    /// Publish `payload` to `topic`. The returned handle resolves once the
    /// broker acks it (QoS 1/2) or once it was handed to the socket (QoS 0).
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishHandle, BusError> {
        let (tx, rx) = oneshot::channel();
        self.awaiting_pkid.lock().unwrap().push_back(PendingAck { qos, tx });
        self.client.publish(topic.into(), qos, retain, payload.into()).await?;
        Ok(PublishHandle { rx })
    }

    pub async fn subscribe(&self, topic: impl Into<String>, qos: QoS) -> Result<(), BusError> {
        self.client.subscribe(topic, qos).await?;
        Ok(())
    }

    pub fn raw_client(&self) -> &AsyncClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_ack_queue_is_fifo() {
        let queue: std::sync::Arc<Mutex<VecDeque<PendingAck>>> = std::sync::Arc::new(Mutex::new(VecDeque::new()));
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        queue.lock().unwrap().push_back(PendingAck { qos: QoS::AtLeastOnce, tx: tx1 });
        queue.lock().unwrap().push_back(PendingAck { qos: QoS::AtLeastOnce, tx: tx2 });
        assert_eq!(queue.lock().unwrap().len(), 2);
        let first = queue.lock().unwrap().pop_front().unwrap();
        assert_eq!(first.qos, QoS::AtLeastOnce);
    }
}
