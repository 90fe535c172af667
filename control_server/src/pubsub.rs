//! Named broadcast topics.
//!
use std::collections::HashMap;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

/// Messages a topic buffers for slow subscribers.
const TOPIC_CAPACITY: usize = 20;

pub type BytesSender = broadcast::Sender<Bytes>;
pub type BytesReceiver = broadcast::Receiver<Bytes>;

/// Topics are created on first use by either side.
pub struct NamedPubSub {
    map: Mutex<HashMap<String, BytesSender>>,
}

impl NamedPubSub {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_sender(&self, name: &str) -> BytesSender {
        let mut map = self.map.lock().await;
        match map.get(name) {
            Some(tx) => tx.clone(),
            None => {
                let (tx, _) = broadcast::channel(TOPIC_CAPACITY);
                map.insert(name.to_owned(), tx.clone());
                tx
            }
        }
    }

    pub async fn subscribe(&self, name: &str) -> BytesReceiver {
        self.get_sender(name).await.subscribe()
    }

    /// Publish `message` as JSON on topic `name`.
    ///
    /// Returns the number of subscribers that received it.
    pub async fn publish_json<T: Serialize>(
        &self,
        name: &str,
        message: &T,
    ) -> serde_json::Result<usize> {
        let data = Bytes::from(serde_json::to_vec(message)?);
        // Sending only fails when nobody listens.
        Ok(self.get_sender(name).await.send(data).unwrap_or(0))
    }
}

impl Default for NamedPubSub {
    fn default() -> Self {
        Self::new()
    }
}
