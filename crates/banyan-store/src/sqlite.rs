use async_trait::async_trait;
use banyan_provider::ResourceState;
use banyan_resource::Urn;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::{StateStore, StoreError};

/// SQLite-based state store.
///
/// Input and output documents are stored as JSON text columns; the urn is
/// the primary key, so `save` is an upsert.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Connect to a SQLite database URL, e.g. `sqlite://banyan.db` or
  /// `sqlite::memory:`.
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let pool = SqlitePool::connect(url).await?;
    Ok(Self::new(pool))
  }

  /// Create the schema if it does not exist.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            CREATE TABLE IF NOT EXISTS resource_states (
                urn TEXT PRIMARY KEY,
                type_token TEXT NOT NULL,
                inputs TEXT NOT NULL,
                outputs TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
    )
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  fn state_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ResourceState, StoreError> {
    let urn: String = row.try_get("urn")?;
    let type_token: String = row.try_get("type_token")?;
    let inputs: String = row.try_get("inputs")?;
    let outputs: String = row.try_get("outputs")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(ResourceState {
      urn: Urn::parse(urn),
      type_token,
      inputs: serde_json::from_str(&inputs)?,
      outputs: serde_json::from_str(&outputs)?,
      updated_at,
    })
  }
}

#[async_trait]
impl StateStore for SqliteStore {
  async fn load(&self, urn: &Urn) -> Result<Option<ResourceState>, StoreError> {
    let row = sqlx::query(
      r#"
            SELECT urn, type_token, inputs, outputs, updated_at
            FROM resource_states
            WHERE urn = ?
            "#,
    )
    .bind(urn.as_str())
    .fetch_optional(&self.pool)
    .await?;

    row.as_ref().map(Self::state_from_row).transpose()
  }

  async fn save(&self, state: &ResourceState) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            INSERT INTO resource_states (urn, type_token, inputs, outputs, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(urn) DO UPDATE SET
                type_token = excluded.type_token,
                inputs = excluded.inputs,
                outputs = excluded.outputs,
                updated_at = excluded.updated_at
            "#,
    )
    .bind(state.urn.as_str())
    .bind(&state.type_token)
    .bind(serde_json::to_string(&state.inputs)?)
    .bind(serde_json::to_string(&state.outputs)?)
    .bind(state.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn remove(&self, urn: &Urn) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM resource_states WHERE urn = ?")
      .bind(urn.as_str())
      .execute(&self.pool)
      .await?;

    Ok(())
  }

  async fn list(&self) -> Result<Vec<ResourceState>, StoreError> {
    let rows = sqlx::query(
      r#"
            SELECT urn, type_token, inputs, outputs, updated_at
            FROM resource_states
            ORDER BY urn ASC
            "#,
    )
    .fetch_all(&self.pool)
    .await?;

    rows.iter().map(Self::state_from_row).collect()
  }
}
