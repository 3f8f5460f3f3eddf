use futures::future::{self, FutureExt};
use log::{debug, error, info, warn, Level};
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{DeliveryResult, Message};
use rdkafka::producer::{BaseRecord, Producer, ProducerContext, ThreadedProducer};
use rdkafka::util::Timeout;
use rdkafka::ClientContext;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::broker::{Acknowledgement, Broker, Delivery};
use crate::config::Config;
use crate::error::{BrokerError, PublishError};

type AckSender = oneshot::Sender<Result<Delivery, PublishError>>;
type ProducerSlot = Arc<Mutex<Option<ThreadedProducer<AckContext>>>>;

/// Pause between enqueue attempts while librdkafka's local queue is full.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(50);

/// Routes delivery reports from librdkafka's polling thread back to the
/// acknowledgement future of each record.
pub struct AckContext;

impl ClientContext for AckContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, message: &str) {
        log::log!(log_level(level), "Kafka log ({}): {}", fac, message);
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!("Kafka client error: {:?}, reason: {}", error, reason);
    }
}

impl ProducerContext for AckContext {
    type DeliveryOpaque = Box<AckSender>;

    fn delivery(&self, result: &DeliveryResult<'_>, ack: Self::DeliveryOpaque) {
        let outcome = match result {
            Ok(message) => Ok(Delivery {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            }),
            Err((err, message)) => Err(PublishError::Rejected {
                key: record_key(message),
                reason: err.to_string(),
            }),
        };
        // The receiver may already be gone during shutdown.
        let _ = ack.send(outcome);
    }
}

fn record_key<M: Message>(message: &M) -> String {
    message
        .key()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .unwrap_or_default()
}

fn log_level(level: RDKafkaLogLevel) -> Level {
    match level {
        RDKafkaLogLevel::Emerg
        | RDKafkaLogLevel::Alert
        | RDKafkaLogLevel::Critical
        | RDKafkaLogLevel::Error => Level::Error,
        RDKafkaLogLevel::Warning => Level::Warn,
        RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => Level::Info,
        RDKafkaLogLevel::Debug => Level::Debug,
    }
}

enum Enqueue {
    Queued,
    /// The local queue had no room; the delivery handle comes back for a retry.
    QueueFull(Box<AckSender>),
    Failed(String),
}

fn enqueue(
    slot: &ProducerSlot,
    topic: &str,
    key: &str,
    payload: &str,
    ack: Box<AckSender>,
) -> Enqueue {
    let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(producer) = guard.as_ref() else {
        return Enqueue::Failed("producer already closed".to_string());
    };

    let record = BaseRecord::with_opaque_to(topic, ack).key(key).payload(payload);
    match producer.send(record) {
        Ok(()) => Enqueue::Queued,
        Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), record)) => {
            Enqueue::QueueFull(record.delivery_opaque)
        }
        Err((err, _record)) => Enqueue::Failed(err.to_string()),
    }
}

pub struct KafkaBroker {
    producer: ProducerSlot,
    enqueue_timeout: Duration,
}

impl KafkaBroker {
    pub fn connect(config: &Config) -> Result<Self, BrokerError> {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &config.bootstrap_servers);
        for (key, value) in &config.producer_settings {
            client_config.set(key, value);
        }

        let producer: ThreadedProducer<AckContext> = client_config
            .create_with_context(AckContext)
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        info!(
            "Created Kafka producer for {} with {} extra settings",
            config.bootstrap_servers,
            config.producer_settings.len()
        );

        Ok(Self {
            producer: Arc::new(Mutex::new(Some(producer))),
            enqueue_timeout: config.enqueue_timeout,
        })
    }
}

impl Broker for KafkaBroker {
    fn publish(&self, topic: &str, key: &str, payload: String) -> Acknowledgement {
        let (tx, rx) = oneshot::channel();
        let retry = match enqueue(&self.producer, topic, key, &payload, Box::new(tx)) {
            Enqueue::Queued => {
                debug!("Queued {} ({} encoded bytes) for topic '{}'", key, payload.len(), topic);
                None
            }
            Enqueue::QueueFull(ack) => Some(ack),
            Enqueue::Failed(reason) => {
                return future::ready(Err(PublishError::Enqueue {
                    key: key.to_string(),
                    reason,
                }))
                .boxed();
            }
        };

        let slot = self.producer.clone();
        let deadline = Instant::now() + self.enqueue_timeout;
        let topic = topic.to_string();
        let key = key.to_string();
        async move {
            if let Some(mut ack) = retry {
                warn!("Kafka producer queue is full, waiting to enqueue {}", key);
                loop {
                    if Instant::now() >= deadline {
                        return Err(PublishError::Enqueue {
                            key,
                            reason: "local producer queue stayed full".to_string(),
                        });
                    }
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                    match enqueue(&slot, &topic, &key, &payload, ack) {
                        Enqueue::Queued => break,
                        Enqueue::QueueFull(back) => ack = back,
                        Enqueue::Failed(reason) => {
                            return Err(PublishError::Enqueue { key, reason });
                        }
                    }
                }
                debug!("Queued {} for topic '{}' after the queue drained", key, topic);
            }

            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(PublishError::AckDropped { key }),
            }
        }
        .boxed()
    }

    fn close(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match producer {
            Some(producer) => {
                let flushed = producer
                    .flush(Timeout::After(timeout))
                    .map_err(|e| BrokerError::Flush(e.to_string()));
                drop(producer);
                info!("Kafka producer closed");
                flushed
            }
            None => Ok(()),
        }
    }
}
