//! # Worker Registry
//!
//! The broker's single piece of mutable state: which workers are currently
//! connected and what each one calls itself. Entries are appended on
//! `Control_Hello` and removed when the connection's serve loop exits;
//! lookups by name return the first match in registration order, so if two
//! workers ever announce the same name the older connection wins until it
//! disconnects.

use std::sync::{Arc, Mutex};

use raise_common::Endpoint;
use tracing::info;

struct WorkerEntry {
    name: String,
    endpoint: Arc<Endpoint>,
}

#[derive(Default)]
pub struct WorkerRegistry {
    workers: Mutex<Vec<WorkerEntry>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: String, endpoint: Arc<Endpoint>) {
        let mut workers = self.workers.lock().expect("worker registry lock poisoned");
        workers.push(WorkerEntry {
            name: name.clone(),
            endpoint,
        });
        info!(worker = %name, total = workers.len(), "worker registered");
    }

    pub fn remove(&self, endpoint: &Arc<Endpoint>) {
        let mut workers = self.workers.lock().expect("worker registry lock poisoned");
        let before = workers.len();
        workers.retain(|w| !Arc::ptr_eq(&w.endpoint, endpoint));
        if workers.len() != before {
            info!(total = workers.len(), "worker disconnected");
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.workers
            .lock()
            .expect("worker registry lock poisoned")
            .iter()
            .map(|w| w.name.clone())
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.workers
            .lock()
            .expect("worker registry lock poisoned")
            .iter()
            .find(|w| w.name == name)
            .map(|w| w.endpoint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    /// Registry tests only exercise bookkeeping, so a real socket is
    /// unnecessary: an in-memory duplex pipe wrapped as a (never-driven)
    /// WebSocket stream gives us a cheap, dependency-free `Arc<Endpoint>`.
    async fn fake_endpoint() -> Arc<Endpoint> {
        let (local, _remote) = tokio::io::duplex(1024);
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let stream = tokio_tungstenite::WebSocketStream::from_raw_socket(
            local,
            tokio_tungstenite::tungstenite::protocol::Role::Server,
            None,
        )
        .await;
        let (endpoint, _serve) = Endpoint::new(stream, addr);
        endpoint
    }

    #[tokio::test]
    async fn first_registered_wins_on_name_collision() {
        let registry = WorkerRegistry::new();
        let a = fake_endpoint().await;
        let b = fake_endpoint().await;
        registry.register("dup".into(), a.clone());
        registry.register("dup".into(), b.clone());

        let found = registry.find("dup").unwrap();
        assert!(Arc::ptr_eq(&found, &a));
    }

    #[tokio::test]
    async fn remove_drops_only_the_matching_connection() {
        let registry = WorkerRegistry::new();
        let a = fake_endpoint().await;
        registry.register("w1".into(), a.clone());
        assert_eq!(registry.names(), vec!["w1".to_string()]);

        registry.remove(&a);
        assert!(registry.names().is_empty());
    }
}
