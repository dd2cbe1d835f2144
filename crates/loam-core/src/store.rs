//! libSQL-backed persistence for entities, verbs, capabilities, and tasks.

use libsql::{Connection, Database, params};
use thiserror::Error;

use crate::capability::Capability;
use crate::entity::{Entity, EntityId, Verb};

/// Prototype chains are treated as linear; resolution stops here even if a
/// malformed chain loops.
const MAX_CHAIN_DEPTH: i64 = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("transaction error: {0}")]
    Transaction(String),
}

/// The world store. All mutation of shared state goes through this handle;
/// capability handlers rely on the checked-then-written discipline that
/// nothing writes around it.
pub struct WorldStore {
    conn: Connection,
    #[allow(dead_code)]
    db: Database,
    /// Savepoint depth for nested transactions.
    transaction_depth: usize,
}

impl WorldStore {
    /// Open or create a world database at `path`.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        let store = Self {
            conn,
            db,
            transaction_depth: 0,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open a fresh in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:").await
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                prototype_id INTEGER,
                props TEXT DEFAULT '{}',
                FOREIGN KEY(prototype_id) REFERENCES entities(id)
            )",
                (),
            )
            .await?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS verbs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                code TEXT NOT NULL,
                permissions TEXT,
                FOREIGN KEY(entity_id) REFERENCES entities(id) ON DELETE CASCADE,
                UNIQUE(entity_id, name)
            )",
                (),
            )
            .await?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS capabilities (
                id TEXT PRIMARY KEY,
                owner_id INTEGER NOT NULL,
                type TEXT NOT NULL,
                params TEXT NOT NULL,
                FOREIGN KEY(owner_id) REFERENCES entities(id) ON DELETE CASCADE
            )",
                (),
            )
            .await?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id INTEGER NOT NULL,
                verb TEXT NOT NULL,
                args TEXT DEFAULT '[]',
                execute_at INTEGER NOT NULL,
                FOREIGN KEY(entity_id) REFERENCES entities(id) ON DELETE CASCADE
            )",
                (),
            )
            .await?;

        self.conn
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_capabilities_owner ON capabilities(owner_id)",
                (),
            )
            .await?;

        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begin a transaction; nested calls open savepoints.
    pub async fn begin(&mut self) -> Result<(), StoreError> {
        if self.transaction_depth == 0 {
            self.conn.execute("BEGIN IMMEDIATE", ()).await?;
        } else {
            self.conn
                .execute(&format!("SAVEPOINT sp_{}", self.transaction_depth), ())
                .await?;
        }
        self.transaction_depth += 1;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<(), StoreError> {
        if self.transaction_depth == 0 {
            return Err(StoreError::Transaction("no active transaction".into()));
        }
        self.transaction_depth -= 1;
        if self.transaction_depth == 0 {
            self.conn.execute("COMMIT", ()).await?;
        } else {
            self.conn
                .execute(
                    &format!("RELEASE SAVEPOINT sp_{}", self.transaction_depth),
                    (),
                )
                .await?;
        }
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), StoreError> {
        if self.transaction_depth == 0 {
            return Err(StoreError::Transaction("no active transaction".into()));
        }
        self.transaction_depth -= 1;
        if self.transaction_depth == 0 {
            self.conn.execute("ROLLBACK", ()).await?;
        } else {
            self.conn
                .execute(
                    &format!("ROLLBACK TO SAVEPOINT sp_{}", self.transaction_depth),
                    (),
                )
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Insert a new entity. The prototype is a forwarding reference only.
    pub async fn create_entity(
        &self,
        props: serde_json::Value,
        prototype_id: Option<EntityId>,
    ) -> Result<EntityId, StoreError> {
        let props_str = serde_json::to_string(&props)?;
        self.conn
            .execute(
                "INSERT INTO entities (prototype_id, props) VALUES (?1, ?2)",
                params![prototype_id, props_str],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Fetch an entity row without prototype resolution.
    pub async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, prototype_id, props FROM entities WHERE id = ?1",
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let props_str: String = row.get(2)?;
                Ok(Some(Entity {
                    id: row.get(0)?,
                    prototype_id: row.get(1)?,
                    props: serde_json::from_str(&props_str)?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Fetch an entity with props merged through its prototype chain,
    /// root first so the most-derived definition wins.
    pub async fn get_entity_merged(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        let mut rows = self
            .conn
            .query(
                r#"
            WITH RECURSIVE lineage AS (
                SELECT id, prototype_id, props, 0 AS depth FROM entities WHERE id = ?1
                UNION ALL
                SELECT e.id, e.prototype_id, e.props, l.depth + 1
                FROM entities e
                JOIN lineage l ON e.id = l.prototype_id
                WHERE l.depth < ?2
            )
            SELECT id, prototype_id, props FROM lineage ORDER BY depth DESC
            "#,
                params![id, MAX_CHAIN_DEPTH],
            )
            .await?;

        let mut chain: Vec<(EntityId, Option<EntityId>, String)> = Vec::new();
        while let Some(row) = rows.next().await? {
            chain.push((row.get(0)?, row.get(1)?, row.get(2)?));
        }
        if chain.is_empty() {
            return Ok(None);
        }

        let mut merged = serde_json::Map::new();
        for (_, _, props_str) in &chain {
            if let serde_json::Value::Object(obj) = serde_json::from_str(props_str)? {
                merged.extend(obj);
            }
        }

        let (id, prototype_id, _) = *chain.last().unwrap();
        Ok(Some(Entity {
            id,
            prototype_id,
            props: serde_json::Value::Object(merged),
        }))
    }

    /// Shallow last-write-wins merge into the entity's own props.
    pub async fn update_entity(
        &self,
        id: EntityId,
        partial: serde_json::Value,
    ) -> Result<(), StoreError> {
        let current = self
            .get_entity(id)
            .await?
            .ok_or(StoreError::EntityNotFound(id))?;

        let mut merged = match current.props {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        if let serde_json::Value::Object(updates) = partial {
            merged.extend(updates);
        }

        let props_str = serde_json::to_string(&serde_json::Value::Object(merged))?;
        self.conn
            .execute(
                "UPDATE entities SET props = ?1 WHERE id = ?2",
                params![props_str, id],
            )
            .await?;
        Ok(())
    }

    pub async fn set_prototype(
        &self,
        id: EntityId,
        prototype_id: Option<EntityId>,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE entities SET prototype_id = ?1 WHERE id = ?2",
                params![prototype_id, id],
            )
            .await?;
        Ok(())
    }

    /// Delete an entity; its verbs and owned capabilities go with it.
    pub async fn delete_entity(&self, id: EntityId) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM verbs WHERE entity_id = ?1", params![id])
            .await?;
        self.conn
            .execute("DELETE FROM capabilities WHERE owner_id = ?1", params![id])
            .await?;
        self.conn
            .execute("DELETE FROM entities WHERE id = ?1", params![id])
            .await?;
        Ok(())
    }

    // =========================================================================
    // Verbs
    // =========================================================================

    /// Add or overwrite a verb on an entity.
    pub async fn add_verb(
        &self,
        entity_id: EntityId,
        name: &str,
        code: &loam_ir::Expr,
        permissions: Option<&str>,
    ) -> Result<i64, StoreError> {
        let code_str = serde_json::to_string(code)?;
        // RETURNING yields the row's real id on both the insert and the
        // overwrite path; last_insert_rowid would be stale on a conflict.
        let mut rows = self
            .conn
            .query(
                "INSERT INTO verbs (entity_id, name, code, permissions) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(entity_id, name) DO UPDATE SET code = ?3, permissions = ?4
                 RETURNING id",
                params![entity_id, name, code_str, permissions],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| StoreError::Transaction("verb upsert returned no row".into()))?;
        Ok(row.get(0)?)
    }

    /// Resolve a verb through the prototype chain; closest definition wins.
    pub async fn get_verb(
        &self,
        entity_id: EntityId,
        name: &str,
    ) -> Result<Option<Verb>, StoreError> {
        let mut rows = self
            .conn
            .query(
                r#"
            WITH RECURSIVE lineage AS (
                SELECT id, prototype_id, 0 AS depth FROM entities WHERE id = ?1
                UNION ALL
                SELECT e.id, e.prototype_id, l.depth + 1
                FROM entities e
                JOIN lineage l ON e.id = l.prototype_id
                WHERE l.depth < ?3
            )
            SELECT v.id, v.entity_id, v.name, v.code, v.permissions
            FROM verbs v
            JOIN lineage l ON v.entity_id = l.id
            WHERE v.name = ?2
            ORDER BY l.depth ASC
            LIMIT 1
            "#,
                params![entity_id, name, MAX_CHAIN_DEPTH],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::verb_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// All verbs reachable from an entity: one per distinct name, the
    /// most-derived definition for each.
    pub async fn get_verbs(&self, entity_id: EntityId) -> Result<Vec<Verb>, StoreError> {
        let mut rows = self
            .conn
            .query(
                r#"
            WITH RECURSIVE lineage AS (
                SELECT id, prototype_id, 0 AS depth FROM entities WHERE id = ?1
                UNION ALL
                SELECT e.id, e.prototype_id, l.depth + 1
                FROM entities e
                JOIN lineage l ON e.id = l.prototype_id
                WHERE l.depth < ?2
            )
            SELECT v.id, v.entity_id, v.name, v.code, v.permissions
            FROM verbs v
            JOIN lineage l ON v.entity_id = l.id
            ORDER BY l.depth DESC
            "#,
                params![entity_id, MAX_CHAIN_DEPTH],
            )
            .await?;

        // Ancestors come first; descendants overwrite by name.
        let mut by_name = std::collections::HashMap::new();
        while let Some(row) = rows.next().await? {
            let verb = Self::verb_from_row(&row)?;
            by_name.insert(verb.name.clone(), verb);
        }
        Ok(by_name.into_values().collect())
    }

    pub async fn update_verb(&self, id: i64, code: &loam_ir::Expr) -> Result<(), StoreError> {
        let code_str = serde_json::to_string(code)?;
        self.conn
            .execute(
                "UPDATE verbs SET code = ?1 WHERE id = ?2",
                params![code_str, id],
            )
            .await?;
        Ok(())
    }

    pub async fn delete_verb(&self, id: i64) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM verbs WHERE id = ?1", params![id])
            .await?;
        Ok(())
    }

    fn verb_from_row(row: &libsql::Row) -> Result<Verb, StoreError> {
        let code_str: String = row.get(3)?;
        Ok(Verb {
            id: row.get(0)?,
            entity_id: row.get(1)?,
            name: row.get(2)?,
            code: serde_json::from_str(&code_str)?,
            permissions: row.get(4)?,
        })
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    /// Unconditional mint. Only trusted host paths reach this; scripts go
    /// through the `mint` opcode and its namespace check.
    pub async fn create_capability(
        &self,
        owner_id: EntityId,
        cap_type: &str,
        cap_params: serde_json::Value,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let params_str = serde_json::to_string(&cap_params)?;
        self.conn
            .execute(
                "INSERT INTO capabilities (id, owner_id, type, params) VALUES (?1, ?2, ?3, ?4)",
                params![id.clone(), owner_id, cap_type, params_str],
            )
            .await?;
        Ok(id)
    }

    pub async fn get_capability(&self, id: &str) -> Result<Option<Capability>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_id, type, params FROM capabilities WHERE id = ?1",
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::capability_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_capabilities(
        &self,
        owner_id: EntityId,
    ) -> Result<Vec<Capability>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_id, type, params FROM capabilities WHERE owner_id = ?1",
                params![owner_id],
            )
            .await?;

        let mut caps = Vec::new();
        while let Some(row) = rows.next().await? {
            caps.push(Self::capability_from_row(&row)?);
        }
        Ok(caps)
    }

    /// Reassign ownership. Capabilities are otherwise immutable.
    pub async fn update_capability_owner(
        &self,
        id: &str,
        new_owner_id: EntityId,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE capabilities SET owner_id = ?1 WHERE id = ?2",
                params![new_owner_id, id],
            )
            .await?;
        Ok(())
    }

    pub async fn delete_capability(&self, id: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM capabilities WHERE id = ?1", params![id])
            .await?;
        Ok(())
    }

    fn capability_from_row(row: &libsql::Row) -> Result<Capability, StoreError> {
        let params_str: String = row.get(3)?;
        Ok(Capability {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            cap_type: row.get(2)?,
            params: serde_json::from_str(&params_str)?,
        })
    }

    // =========================================================================
    // Scheduled tasks
    // =========================================================================

    pub async fn schedule_task(
        &self,
        entity_id: EntityId,
        verb: &str,
        args: serde_json::Value,
        execute_at: i64,
    ) -> Result<i64, StoreError> {
        let args_str = serde_json::to_string(&args)?;
        self.conn
            .execute(
                "INSERT INTO scheduled_tasks (entity_id, verb, args, execute_at) VALUES (?1, ?2, ?3, ?4)",
                params![entity_id, verb, args_str, execute_at],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    pub async fn due_tasks(&self, now: i64) -> Result<Vec<ScheduledTask>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity_id, verb, args, execute_at FROM scheduled_tasks
                 WHERE execute_at <= ?1 ORDER BY execute_at ASC",
                params![now],
            )
            .await?;

        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await? {
            let args_str: String = row.get(3)?;
            tasks.push(ScheduledTask {
                id: row.get(0)?,
                entity_id: row.get(1)?,
                verb: row.get(2)?,
                args: serde_json::from_str(&args_str)?,
                execute_at: row.get(4)?,
            });
        }
        Ok(tasks)
    }

    pub async fn delete_task(&self, id: i64) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![id])
            .await?;
        Ok(())
    }
}

/// A persisted delayed verb invocation.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: i64,
    pub entity_id: EntityId,
    pub verb: String,
    pub args: serde_json::Value,
    pub execute_at: i64,
}
