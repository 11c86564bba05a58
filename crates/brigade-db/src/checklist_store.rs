//! `PostgreSQL` implementation of the engine's persistence adapter.
//!
//! Two tables back the checklist (see `migrations/`):
//!
//! | Table | Identity | Write rule |
//! |-------|----------|------------|
//! | `review_transitions` | `id` | insert once, never updated |
//! | `task_instances` | `(task_def_id, calendar_date)` | highest `revision` wins |
//!
//! Each row keeps the full record as `JSONB`; the scalar columns exist for
//! filtering and ad-hoc reporting.

use brigade_core::collaborators::{PersistError, PersistenceAdapter};
use brigade_types::{ReviewTransition, TaskInstance, UserId};
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::error::DbError;

/// Checklist tables on a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct ChecklistStore {
    pool: PgPool,
}

impl ChecklistStore {
    /// Bind the store to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a transition unless its id is already stored.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    pub async fn insert_transition(&self, record: &ReviewTransition) -> Result<(), DbError> {
        let done = sqlx::query(
            r"INSERT INTO review_transitions (id, user_id, target_id, action, occurred_at, calendar_date, record)
              VALUES ($1, $2, $3, $4, $5, $6, $7)
              ON CONFLICT (id) DO NOTHING",
        )
        .bind(record.id.into_inner())
        .bind(record.user_id.as_str())
        .bind(&record.target_id)
        .bind(label(&record.action)?)
        .bind(record.timestamp)
        .bind(record.calendar_date)
        .bind(Json(record))
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            tracing::debug!(id = %record.id, "Transition already stored");
        }
        Ok(())
    }

    /// Transitions recorded on `date`, optionally for one user, oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or a row does not decode.
    pub async fn query_transitions(
        &self,
        user: Option<&UserId>,
        date: NaiveDate,
    ) -> Result<Vec<ReviewTransition>, DbError> {
        let rows = sqlx::query(
            r"SELECT record FROM review_transitions
              WHERE calendar_date = $1 AND ($2::TEXT IS NULL OR user_id = $2)
              ORDER BY occurred_at, id",
        )
        .bind(date)
        .bind(user.map(UserId::as_str))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let Json(record): Json<ReviewTransition> = row.try_get("record")?;
                Ok::<_, DbError>(record)
            })
            .collect()
    }

    /// Insert or replace an instance, keeping whichever copy has the
    /// higher revision.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the upsert fails.
    pub async fn upsert_task_instance(&self, instance: &TaskInstance) -> Result<(), DbError> {
        let review_status = instance.review_status.as_ref().map(label).transpose()?;
        sqlx::query(
            r"INSERT INTO task_instances (task_def_id, calendar_date, status, review_status, submission_count, updated_at, revision, record)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
              ON CONFLICT (task_def_id, calendar_date) DO UPDATE SET
                  status = EXCLUDED.status,
                  review_status = EXCLUDED.review_status,
                  submission_count = EXCLUDED.submission_count,
                  updated_at = EXCLUDED.updated_at,
                  revision = EXCLUDED.revision,
                  record = EXCLUDED.record
              WHERE task_instances.revision <= EXCLUDED.revision",
        )
        .bind(instance.key.def_id.as_str())
        .bind(instance.key.date)
        .bind(label(&instance.status)?)
        .bind(review_status)
        .bind(i32::try_from(instance.submission_count).unwrap_or(i32::MAX))
        .bind(instance.updated_at)
        .bind(i64::try_from(instance.revision).unwrap_or(i64::MAX))
        .bind(Json(instance))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every stored instance for `date`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or a row does not decode.
    pub async fn load_task_instances(&self, date: NaiveDate) -> Result<Vec<TaskInstance>, DbError> {
        let rows = sqlx::query(
            r"SELECT record FROM task_instances
              WHERE calendar_date = $1
              ORDER BY task_def_id",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let Json(instance): Json<TaskInstance> = row.try_get("record")?;
                Ok::<_, DbError>(instance)
            })
            .collect()
    }
}

impl PersistenceAdapter for ChecklistStore {
    async fn insert_transition(&self, record: &ReviewTransition) -> Result<(), PersistError> {
        Ok(Self::insert_transition(self, record).await?)
    }

    async fn query_transitions(
        &self,
        user: Option<&UserId>,
        date: NaiveDate,
    ) -> Result<Vec<ReviewTransition>, PersistError> {
        Ok(Self::query_transitions(self, user, date).await?)
    }

    async fn upsert_task_instance(&self, instance: &TaskInstance) -> Result<(), PersistError> {
        Ok(Self::upsert_task_instance(self, instance).await?)
    }

    async fn load_task_instances(&self, date: NaiveDate) -> Result<Vec<TaskInstance>, PersistError> {
        Ok(Self::load_task_instances(self, date).await?)
    }
}

/// The `snake_case` wire name of a unit enum variant.
fn label<T: Serialize>(value: &T) -> Result<String, DbError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(name) => Ok(name),
        other => Err(DbError::Config(format!("expected a unit variant, got {other}"))),
    }
}
