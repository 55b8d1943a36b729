//! SQLite persistence for the agent directory.
//!
//! The registry must survive a crash with its directory intact: agents and
//! capabilities are written through to a single database file (WAL mode)
//! and loaded back wholesale on startup. Resolutions and traces are
//! derived or windowed state and are not persisted.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use mesh_core::error::{MeshError, Result};
use mesh_core::id::AgentId;
use mesh_core::types::{Agent, AgentStatus, AgentType, Capability};

/// SQLite-backed store for agents and their capabilities.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn db_err(context: &str) -> impl FnOnce(sqlx::Error) -> MeshError + '_ {
    move |e| MeshError::persistence(format!("{}: {}", context, e))
}

impl SqliteStore {
    /// Open (creating if missing) the registry database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err("failed to open registry database"))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(db_err("invalid connection string"))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err("failed to open in-memory database"))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                description TEXT,
                endpoint TEXT NOT NULL,
                namespace TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_heartbeat TEXT NOT NULL,
                last_full_refresh TEXT NOT NULL,
                sequence INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to create agents table"))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS capabilities (
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                function_name TEXT NOT NULL,
                capability TEXT NOT NULL,
                version TEXT NOT NULL,
                tags TEXT NOT NULL,
                dependencies TEXT NOT NULL,
                description TEXT,
                schema TEXT,
                PRIMARY KEY (agent_id, function_name)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to create capabilities table"))?;

        Ok(())
    }

    /// Insert or refresh an agent and replace its capability rows.
    pub async fn save_agent(&self, agent: &Agent, capabilities: &[Capability]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("failed to begin transaction"))?;

        sqlx::query(
            r"
            INSERT INTO agents (
                id, name, version, description, endpoint, namespace,
                agent_type, status, created_at, updated_at,
                last_heartbeat, last_full_refresh, sequence
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                version = excluded.version,
                description = excluded.description,
                endpoint = excluded.endpoint,
                namespace = excluded.namespace,
                agent_type = excluded.agent_type,
                status = excluded.status,
                updated_at = excluded.updated_at,
                last_heartbeat = excluded.last_heartbeat,
                last_full_refresh = excluded.last_full_refresh,
                sequence = excluded.sequence
            ",
        )
        .bind(agent.id.as_str())
        .bind(&agent.name)
        .bind(&agent.version)
        .bind(&agent.description)
        .bind(&agent.endpoint)
        .bind(&agent.namespace)
        .bind(agent.agent_type.as_str())
        .bind(agent.status.as_str())
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .bind(agent.last_heartbeat.to_rfc3339())
        .bind(agent.last_full_refresh.to_rfc3339())
        .bind(agent.sequence as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_err("failed to save agent"))?;

        sqlx::query("DELETE FROM capabilities WHERE agent_id = ?1")
            .bind(agent.id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err("failed to clear capabilities"))?;

        for capability in capabilities {
            let tags = serde_json::to_string(&capability.tags)?;
            let dependencies = serde_json::to_string(&capability.dependencies)?;
            let schema = capability
                .schema
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                r"
                INSERT INTO capabilities (
                    agent_id, function_name, capability, version,
                    tags, dependencies, description, schema
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
            )
            .bind(agent.id.as_str())
            .bind(&capability.function_name)
            .bind(&capability.capability)
            .bind(&capability.version)
            .bind(&tags)
            .bind(&dependencies)
            .bind(&capability.description)
            .bind(&schema)
            .execute(&mut *tx)
            .await
            .map_err(db_err("failed to save capability"))?;
        }

        tx.commit()
            .await
            .map_err(db_err("failed to commit agent save"))?;
        Ok(())
    }

    /// Persist heartbeat bookkeeping for one agent.
    pub async fn touch_agent(
        &self,
        id: &AgentId,
        last_heartbeat: DateTime<Utc>,
        sequence: u64,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE agents
            SET last_heartbeat = ?2, updated_at = ?2, status = 'healthy', sequence = ?3
            WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .bind(last_heartbeat.to_rfc3339())
        .bind(sequence as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to record heartbeat"))?;
        Ok(())
    }

    /// Batch status update from the liveness sweeper.
    pub async fn update_statuses(&self, updates: &[(AgentId, AgentStatus)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("failed to begin transaction"))?;
        for (id, status) in updates {
            sqlx::query("UPDATE agents SET status = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(id.as_str())
                .bind(status.as_str())
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(db_err("failed to update status"))?;
        }
        tx.commit()
            .await
            .map_err(db_err("failed to commit status updates"))?;
        Ok(())
    }

    /// Delete agents (capabilities cascade).
    pub async fn delete_agents(&self, ids: &[AgentId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("failed to begin transaction"))?;
        for id in ids {
            sqlx::query("DELETE FROM agents WHERE id = ?1")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db_err("failed to delete agent"))?;
        }
        tx.commit()
            .await
            .map_err(db_err("failed to commit deletions"))?;
        Ok(())
    }

    /// Load the whole directory, capabilities included.
    pub async fn load_all(&self) -> Result<Vec<(Agent, Vec<Capability>)>> {
        let agent_rows = sqlx::query("SELECT * FROM agents ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("failed to load agents"))?;

        let mut out = Vec::with_capacity(agent_rows.len());
        for row in agent_rows {
            let agent = agent_from_row(&row)?;
            let cap_rows = sqlx::query(
                "SELECT * FROM capabilities WHERE agent_id = ?1 ORDER BY function_name",
            )
            .bind(agent.id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("failed to load capabilities"))?;
            let capabilities = cap_rows
                .iter()
                .map(capability_from_row)
                .collect::<Result<Vec<_>>>()?;
            out.push((agent, capabilities));
        }
        Ok(out)
    }
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MeshError::persistence(format!("invalid {} timestamp: {}", column, e)))
}

fn agent_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Agent> {
    let agent_type: String = row.get("agent_type");
    let status: String = row.get("status");
    let agent_type: AgentType = serde_json::from_value(serde_json::Value::String(agent_type))
        .unwrap_or(AgentType::Unknown);
    let status: AgentStatus = serde_json::from_value(serde_json::Value::String(status))
        .unwrap_or(AgentStatus::Expired);

    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let last_heartbeat: String = row.get("last_heartbeat");
    let last_full_refresh: String = row.get("last_full_refresh");
    let sequence: i64 = row.get("sequence");

    Ok(Agent {
        id: AgentId::new(row.get::<String, _>("id")),
        name: row.get("name"),
        version: row.get("version"),
        description: row.get("description"),
        endpoint: row.get("endpoint"),
        namespace: row.get("namespace"),
        agent_type,
        status,
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
        last_heartbeat: parse_timestamp(&last_heartbeat, "last_heartbeat")?,
        last_full_refresh: parse_timestamp(&last_full_refresh, "last_full_refresh")?,
        sequence: sequence as u64,
        dependencies_total: 0,
        dependencies_resolved: 0,
    })
}

fn capability_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Capability> {
    let tags: String = row.get("tags");
    let dependencies: String = row.get("dependencies");
    let schema: Option<String> = row.get("schema");
    Ok(Capability {
        function_name: row.get("function_name"),
        capability: row.get("capability"),
        version: row.get("version"),
        tags: serde_json::from_str(&tags)?,
        dependencies: serde_json::from_str(&dependencies)?,
        description: row.get("description"),
        schema: schema.map(|s| serde_json::from_str(&s)).transpose()?,
        agent_type_hint: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::types::DependencySpec;

    fn sample_agent(id: &str) -> Agent {
        let now = Utc::now();
        Agent {
            id: AgentId::from(id),
            name: "hello-agent".to_string(),
            version: "1.0.0".to_string(),
            description: Some("test agent".to_string()),
            endpoint: "http://localhost:9090".to_string(),
            namespace: "default".to_string(),
            agent_type: AgentType::Tool,
            status: AgentStatus::Healthy,
            created_at: now,
            updated_at: now,
            last_heartbeat: now,
            last_full_refresh: now,
            sequence: 3,
            dependencies_total: 0,
            dependencies_resolved: 0,
        }
    }

    fn sample_capability() -> Capability {
        Capability {
            function_name: "say_hello".to_string(),
            capability: "greeting".to_string(),
            version: "1.0.0".to_string(),
            tags: vec!["friendly".to_string(), "+fast".to_string()],
            dependencies: vec![DependencySpec {
                capability: "date_service".to_string(),
                tags: vec!["system".to_string()],
                version: Some(">=1.0,<2.0".to_string()),
                namespace: None,
                parameter_name: "date_service".to_string(),
            }],
            description: Some("greets".to_string()),
            schema: Some(serde_json::json!({"type": "object"})),
            agent_type_hint: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let agent = sample_agent("a-1");
        store.save_agent(&agent, &[sample_capability()]).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let (loaded_agent, caps) = &loaded[0];
        assert_eq!(loaded_agent.id, agent.id);
        assert_eq!(loaded_agent.endpoint, agent.endpoint);
        assert_eq!(loaded_agent.sequence, 3);
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].function_name, "say_hello");
        assert_eq!(caps[0].dependencies[0].capability, "date_service");
        assert_eq!(caps[0].tags, vec!["friendly", "+fast"]);
    }

    #[tokio::test]
    async fn test_save_replaces_capabilities() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let agent = sample_agent("a-1");
        store.save_agent(&agent, &[sample_capability()]).await.unwrap();

        let mut replacement = sample_capability();
        replacement.function_name = "wave".to_string();
        store.save_agent(&agent, &[replacement]).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        let (_, caps) = &loaded[0];
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].function_name, "wave");
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let agent = sample_agent("a-1");
        store.save_agent(&agent, &[sample_capability()]).await.unwrap();
        store.delete_agents(&[agent.id.clone()]).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_update_persists() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let agent = sample_agent("a-1");
        store.save_agent(&agent, &[]).await.unwrap();
        store
            .update_statuses(&[(agent.id.clone(), AgentStatus::Degraded)])
            .await
            .unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded[0].0.status, AgentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_open_creates_file_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_mesh_registry.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.save_agent(&sample_agent("a-1"), &[]).await.unwrap();
        }
        let store = SqliteStore::open(&path).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
