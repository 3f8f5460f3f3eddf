use futures::future::BoxFuture;
use std::time::Duration;

use crate::error::{BrokerError, PublishError};

/// Where an acknowledged record landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Resolves when the broker confirms or rejects a record.
pub type Acknowledgement = BoxFuture<'static, Result<Delivery, PublishError>>;

/// Asynchronous, acknowledging sink for uploaded files.
pub trait Broker: Send + Sync {
    /// Submits a record without waiting for the broker. Enqueue failures are
    /// reported through the returned acknowledgement.
    fn publish(&self, topic: &str, key: &str, payload: String) -> Acknowledgement;

    /// Flushes pending records, waiting at most `timeout`, then releases the
    /// connection.
    fn close(&self, timeout: Duration) -> Result<(), BrokerError>;
}
