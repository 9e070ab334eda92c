use super::{BusError, BusMessage, BusSubscription, TickBus};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc,
};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;

/// Poll interval of the bridge thread; bounds how long an unsubscribe can take.
const BRIDGE_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Redis pub/sub backed bus used in production.
#[derive(Debug, Clone)]
pub struct RedisBus {
    client: redis::Client,
}

impl RedisBus {
    pub fn new(url: &str) -> Result<Self, BusError> {
        redis::Client::open(url)
            .map(|client| Self { client })
            .map_err(|err| BusError::Transport(err.to_string()))
    }
}

impl TickBus for RedisBus {
    fn publish(&self, channel: &str, message: &BusMessage) -> Result<(), BusError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|err| BusError::Transport(err.to_string()))?;

        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message.encode())
            .query::<i64>(&mut conn)
            .map_err(|err| BusError::Publish {
                channel: channel.to_string(),
                reason: err.to_string(),
            })?;

        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<Box<dyn BusSubscription>, BusError> {
        // The sync `PubSub` handle borrows its connection, so it cannot move into the
        // subscription object. A dedicated bridge thread owns the connection and forwards
        // decoded payloads over an mpsc channel instead.
        let mut conn = self
            .client
            .get_connection()
            .map_err(|err| BusError::Subscribe {
                channel: channel.to_string(),
                reason: err.to_string(),
            })?;

        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let bridge_stop = Arc::clone(&stop);
        let bridge_channel = channel.to_string();

        let handle = std::thread::Builder::new()
            .name(format!("tiller-bus-sub-{channel}"))
            .spawn(move || {
                let mut pubsub = conn.as_pubsub();
                if let Err(err) = pubsub.subscribe(&bridge_channel) {
                    warn!(
                        channel = %bridge_channel,
                        %err,
                        "tick bus subscribe failed; bridge exiting"
                    );
                    return;
                }
                if pubsub
                    .set_read_timeout(Some(BRIDGE_READ_TIMEOUT))
                    .is_err()
                {
                    return;
                }

                while !bridge_stop.load(Ordering::Relaxed) {
                    match pubsub.get_message() {
                        Ok(msg) => {
                            let Ok(payload) = msg.get_payload::<String>() else {
                                continue;
                            };
                            let Some(decoded) = BusMessage::decode(&payload) else {
                                continue;
                            };
                            if tx.send(decoded).is_err() {
                                break;
                            }
                        }
                        Err(err) if err.is_timeout() => continue,
                        Err(err) => {
                            warn!(
                                channel = %bridge_channel,
                                %err,
                                "tick bus connection lost; bridge exiting"
                            );
                            break;
                        }
                    }
                }
            })
            .map_err(|err| BusError::Subscribe {
                channel: channel.to_string(),
                reason: err.to_string(),
            })?;

        Ok(Box::new(RedisSubscription {
            rx,
            stop,
            handle: Some(handle),
        }))
    }
}

struct RedisSubscription {
    rx: mpsc::Receiver<BusMessage>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BusSubscription for RedisSubscription {
    fn recv(&mut self, timeout: Duration) -> Result<Option<BusMessage>, BusError> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(BusError::Closed("pub/sub bridge exited".to_string()))
            }
        }
    }
}

impl Drop for RedisSubscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
