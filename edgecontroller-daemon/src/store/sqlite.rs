//! SQLite-backed node store.

use edgecontroller_auth::{Fingerprint, IssuedCredential};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{Node, NodeGrpcTarget, NodeStore, NodeSummary, StoreError};

/// Persistent storage for nodes, credentials and node addresses.
#[derive(Debug, Clone)]
pub struct SqliteNodeStore {
    pool: SqlitePool,
}

impl SqliteNodeStore {
    /// Create a new store with the given database pool.
    ///
    /// Creates tables if they don't exist.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                location TEXT NOT NULL,
                serial TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id TEXT PRIMARY KEY,
                certificate TEXT NOT NULL,
                issued_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS node_grpc_targets (
                id TEXT PRIMARY KEY,
                node_id TEXT NOT NULL UNIQUE,
                grpc_target TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path.display())).await?;
        Self::new(pool).await
    }

    /// Create a pre-approval record and return it.
    pub async fn create_node(
        &self,
        name: &str,
        location: &str,
        serial: &Fingerprint,
    ) -> Result<Node, StoreError> {
        let node = Node {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            location: location.to_string(),
            serial: serial.to_string(),
        };

        let result = sqlx::query(
            "INSERT INTO nodes (id, name, location, serial, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&node.id)
        .bind(&node.name)
        .bind(&node.location)
        .bind(&node.serial)
        .bind(current_timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(node),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateSerial(node.serial))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All nodes with their last recorded address.
    pub async fn list_nodes(&self) -> Result<Vec<NodeSummary>, StoreError> {
        let nodes = sqlx::query_as::<_, NodeSummary>(
            r#"
            SELECT n.id, n.name, n.location, n.serial, t.grpc_target, c.issued_at AS enrolled_at
            FROM nodes n
            LEFT JOIN node_grpc_targets t ON t.node_id = n.id
            LEFT JOIN credentials c ON c.id = n.id
            ORDER BY n.created_at, n.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(nodes)
    }

    /// The stored credential certificate (PEM) for `node_id`, if enrolled.
    pub async fn credential(&self, node_id: &str) -> Result<Option<IssuedCredential>, StoreError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id, certificate FROM credentials WHERE id = ?")
                .bind(node_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, certificate)| IssuedCredential { id, certificate }))
    }

    /// The recorded gRPC address for `node_id`, if enrolled.
    pub async fn grpc_target(&self, node_id: &str) -> Result<Option<NodeGrpcTarget>, StoreError> {
        let target = sqlx::query_as::<_, NodeGrpcTarget>(
            "SELECT id, node_id, grpc_target FROM node_grpc_targets WHERE node_id = ?",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(target)
    }

    /// Remove a node and everything recorded for it.
    pub async fn delete_node(&self, node_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(node_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NodeNotFound(node_id.to_string()));
        }

        sqlx::query("DELETE FROM credentials WHERE id = ?")
            .bind(node_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM node_grpc_targets WHERE node_id = ?")
            .bind(node_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[tonic::async_trait]
impl NodeStore for SqliteNodeStore {
    async fn find_nodes_by_serial(&self, serial: &Fingerprint) -> Result<Vec<Node>, StoreError> {
        let nodes = sqlx::query_as::<_, Node>(
            "SELECT id, name, location, serial FROM nodes WHERE serial = ? ORDER BY created_at, id",
        )
        .bind(serial.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(nodes)
    }

    async fn record_enrollment(
        &self,
        credential: &IssuedCredential,
        grpc_target: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO credentials (id, certificate, issued_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.certificate)
        .bind(current_timestamp())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO node_grpc_targets (id, node_id, grpc_target)
            VALUES (?, ?, ?)
            ON CONFLICT(node_id) DO UPDATE SET grpc_target = excluded.grpc_target
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&credential.id)
        .bind(grpc_target)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SqliteNodeStore {
        // A single connection, so every query sees the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteNodeStore::new(pool).await.unwrap()
    }

    fn serial(seed: &[u8]) -> Fingerprint {
        Fingerprint::from_spki_der(seed)
    }

    fn credential(id: &str, cert: &str) -> IssuedCredential {
        IssuedCredential::new(id, cert)
    }

    #[tokio::test]
    async fn test_create_and_find_node() {
        let store = test_store().await;
        let node = store.create_node("edge-1", "rack 4", &serial(b"a")).await.unwrap();

        let found = store.find_nodes_by_serial(&serial(b"a")).await.unwrap();
        assert_eq!(found, vec![node]);

        let missing = store.find_nodes_by_serial(&serial(b"b")).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_serial_rejected() {
        let store = test_store().await;
        store.create_node("edge-1", "a", &serial(b"a")).await.unwrap();

        let result = store.create_node("edge-2", "b", &serial(b"a")).await;
        assert!(matches!(result, Err(StoreError::DuplicateSerial(_))));
    }

    #[tokio::test]
    async fn test_record_enrollment() {
        let store = test_store().await;
        let node = store.create_node("edge-1", "a", &serial(b"a")).await.unwrap();

        store
            .record_enrollment(&credential(&node.id, "CERT-1"), "192.0.2.10:8081")
            .await
            .unwrap();

        let cred = store.credential(&node.id).await.unwrap().unwrap();
        assert_eq!(cred.certificate, "CERT-1");
        let target = store.grpc_target(&node.id).await.unwrap().unwrap();
        assert_eq!(target.grpc_target, "192.0.2.10:8081");
        assert_eq!(target.node_id, node.id);
    }

    #[tokio::test]
    async fn test_re_enrollment_overwrites() {
        let store = test_store().await;
        let node = store.create_node("edge-1", "a", &serial(b"a")).await.unwrap();

        store
            .record_enrollment(&credential(&node.id, "CERT-1"), "192.0.2.10:8081")
            .await
            .unwrap();
        let first_target = store.grpc_target(&node.id).await.unwrap().unwrap();

        store
            .record_enrollment(&credential(&node.id, "CERT-2"), "198.51.100.7:8081")
            .await
            .unwrap();
        let second_target = store.grpc_target(&node.id).await.unwrap().unwrap();

        assert_eq!(
            store.credential(&node.id).await.unwrap().unwrap().certificate,
            "CERT-2"
        );
        assert_eq!(second_target.grpc_target, "198.51.100.7:8081");
        // The address row is updated in place.
        assert_eq!(first_target.id, second_target.id);

        let listed = store.list_nodes().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].grpc_target.as_deref(), Some("198.51.100.7:8081"));
    }

    #[tokio::test]
    async fn test_list_nodes_includes_unenrolled() {
        let store = test_store().await;
        store.create_node("edge-1", "a", &serial(b"a")).await.unwrap();
        store.create_node("edge-2", "b", &serial(b"b")).await.unwrap();

        let listed = store.list_nodes().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|n| n.grpc_target.is_none() && n.enrolled_at.is_none()));
    }

    #[tokio::test]
    async fn test_delete_node() {
        let store = test_store().await;
        let node = store.create_node("edge-1", "a", &serial(b"a")).await.unwrap();
        store
            .record_enrollment(&credential(&node.id, "CERT-1"), "192.0.2.10:8081")
            .await
            .unwrap();

        store.delete_node(&node.id).await.unwrap();
        assert!(store.find_nodes_by_serial(&serial(b"a")).await.unwrap().is_empty());
        assert!(store.credential(&node.id).await.unwrap().is_none());
        assert!(store.grpc_target(&node.id).await.unwrap().is_none());

        assert!(matches!(
            store.delete_node(&node.id).await,
            Err(StoreError::NodeNotFound(_))
        ));
    }
}
