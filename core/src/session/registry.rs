use super::connection::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Live connections by `pc_id`
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Arc<Connection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, pc_id: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(pc_id).cloned()
    }

    pub async fn insert(&self, connection: Arc<Connection>) {
        self.connections
            .write()
            .await
            .insert(connection.pc_id().to_string(), connection);
    }

    pub async fn remove(&self, pc_id: &str) -> Option<Arc<Connection>> {
        self.connections.write().await.remove(pc_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Drop the entry when the connection's closed notification fires
    pub fn remove_on_close(&self, connection: &Arc<Connection>) {
        let registry = self.clone();
        let token = connection.close_token();
        let pc_id = connection.pc_id().to_string();
        tokio::spawn(async move {
            token.cancelled().await;
            if registry.remove(&pc_id).await.is_some() {
                tracing::debug!(pc_id = %pc_id, "removed closed connection");
            }
        });
    }

    /// Close every live connection
    pub async fn close_all(&self) {
        let connections: Vec<_> = self.connections.write().await.drain().map(|(_, c)| c).collect();
        for connection in &connections {
            connection.close();
        }
        if !connections.is_empty() {
            tracing::info!(count = connections.len(), "closed live connections");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SessionDescription;
    use std::time::Duration;

    fn connection() -> Arc<Connection> {
        Arc::new(
            Connection::initialize(SessionDescription {
                sdp: "v=0".to_string(),
                sdp_type: "offer".to_string(),
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_removed_when_closed() {
        let registry = ConnectionRegistry::new();
        let conn = connection();
        registry.insert(conn.clone()).await;
        registry.remove_on_close(&conn);
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(conn.pc_id()).await.is_some());

        conn.close();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !registry.is_empty().await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(registry.get(conn.pc_id()).await.is_none());
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = ConnectionRegistry::new();
        let a = connection();
        let b = connection();
        registry.insert(a.clone()).await;
        registry.insert(b.clone()).await;

        registry.close_all().await;
        assert!(a.is_closed() && b.is_closed());
        assert_eq!(registry.len().await, 0);
    }
}
