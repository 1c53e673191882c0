//! Fan-out broker: one producer task pulls frames from an upstream and N
//! subscribers receive them with drop-older semantics, so several viewers of
//! the same source share a single upstream connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MjpegFramer, StreamClient};

/// Frames a lagging subscriber can fall behind before older ones are
/// dropped for it.
const SUBSCRIBER_BACKLOG: usize = 4;

struct BrokerEntry {
    tx: broadcast::Sender<Bytes>,
    token: CancellationToken,
}

type EntryMap = Arc<Mutex<HashMap<String, BrokerEntry>>>;

/// Shares one upstream pull between any number of subscribers, keyed by
/// stream URL. The producer exits once the last subscriber is gone and
/// unregisters itself, closing the channel for everyone.
pub struct FrameBroker {
    client: StreamClient,
    entries: EntryMap,
}

impl std::fmt::Debug for FrameBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBroker").finish_non_exhaustive()
    }
}

impl FrameBroker {
    pub fn new(client: StreamClient) -> Self {
        Self {
            client,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to the frame stream of `url`, spawning the producer if this
    /// is the first subscriber (or the previous producer has exited).
    pub fn subscribe(&self, url: &str) -> broadcast::Receiver<Bytes> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(url) {
            if !entry.token.is_cancelled() {
                return entry.tx.subscribe();
            }
        }

        let (tx, rx) = broadcast::channel(SUBSCRIBER_BACKLOG);
        let token = CancellationToken::new();
        tokio::spawn(produce(
            self.client.clone(),
            url.to_string(),
            tx.clone(),
            token.clone(),
            Arc::clone(&self.entries),
        ));
        info!("fan-out producer started for {url}");
        entries.insert(url.to_string(), BrokerEntry { tx, token });
        rx
    }

    /// Stop every producer.
    pub fn shutdown(&self) {
        let entries = self.entries.lock().unwrap();
        for (url, entry) in entries.iter() {
            debug!("stopping fan-out producer for {url}");
            entry.token.cancel();
        }
    }

    #[cfg(test)]
    fn has_entry(&self, url: &str) -> bool {
        self.entries.lock().unwrap().contains_key(url)
    }
}

async fn produce(
    client: StreamClient,
    url: String,
    tx: broadcast::Sender<Bytes>,
    token: CancellationToken,
    entries: EntryMap,
) {
    match client.open_stream(&url, token.clone()).await {
        Ok(mut stream) => {
            let mut framer = MjpegFramer::new();
            'outer: loop {
                let chunk = match stream.next_chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => {
                        warn!("upstream {url} closed, fan-out producer exiting");
                        break;
                    }
                    Err(err) => {
                        if !token.is_cancelled() {
                            warn!("fan-out producer for {url} failed: {err}");
                        }
                        break;
                    }
                };
                for frame in framer.push(&chunk) {
                    // No receivers left: tear the connection down.
                    if tx.send(frame).is_err() {
                        debug!("last subscriber of {url} left, fan-out producer exiting");
                        break 'outer;
                    }
                }
            }
        }
        Err(err) => warn!("fan-out producer could not reach {url}: {err}"),
    }

    token.cancel();
    // Unregister so the map's sender drops and subscribers observe closure.
    // A replacement entry (fresh token) is left alone.
    let mut entries = entries.lock().unwrap();
    if entries.get(&url).is_some_and(|e| e.token.is_cancelled()) {
        entries.remove(&url);
    }
}
