//! Pipeline run repository.

use async_trait::async_trait;
use shipyard_core::pipeline::{PipelineRun, RunStatus};
use shipyard_core::store::RunStore;
use shipyard_core::{ResourceId, Result};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;

use crate::{DbError, DbResult};

/// A pipeline run row.
#[derive(Debug, sqlx::FromRow)]
struct RunRecord {
    id: uuid::Uuid,
    number: i64,
    state: Json<PipelineRun>,
}

impl RunRecord {
    fn into_run(self) -> DbResult<PipelineRun> {
        let run = self.state.0;
        if *run.id.as_uuid() != self.id || run.number as i64 != self.number {
            return Err(DbError::Corrupt {
                id: self.id.to_string(),
                message: "state does not match its row".to_string(),
            });
        }
        Ok(run)
    }
}

/// PostgreSQL implementation of [`RunStore`].
///
/// The run is stored whole as JSONB next to the columns used for lookups.
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn next_number_inner(&self) -> DbResult<u64> {
        let number: i64 = sqlx::query_scalar("SELECT nextval('pipeline_run_numbers')")
            .fetch_one(&self.pool)
            .await?;
        Ok(number as u64)
    }

    async fn insert_inner(&self, run: &PipelineRun) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, number, pipeline, status, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.number as i64)
        .bind(&run.pipeline)
        .bind(run.status.as_str())
        .bind(Json(run))
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DbError::Duplicate(format!("run {}", run.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_inner(&self, id: ResourceId) -> DbResult<PipelineRun> {
        sqlx::query_as::<_, RunRecord>(
            "SELECT id, number, state FROM pipeline_runs WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("run {}", id)))?
        .into_run()
    }

    async fn save_inner(&self, run: &PipelineRun) -> DbResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $2, state = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.status.as_str())
        .bind(Json(run))
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("run {}", run.id)));
        }
        debug!(run_id = %run.id, status = %run.status, "Saved run");
        Ok(())
    }

    async fn list_inner(&self, limit: usize) -> DbResult<Vec<PipelineRun>> {
        sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT id, number, state FROM pipeline_runs
            ORDER BY number DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(RunRecord::into_run)
        .collect()
    }

    async fn list_by_status_inner(&self, status: RunStatus) -> DbResult<Vec<PipelineRun>> {
        sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT id, number, state FROM pipeline_runs
            WHERE status = $1
            ORDER BY number DESC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(RunRecord::into_run)
        .collect()
    }

    async fn delete_inner(&self, id: ResourceId) -> DbResult<()> {
        let deleted = sqlx::query("DELETE FROM pipeline_runs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("run {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn next_number(&self) -> Result<u64> {
        Ok(self.next_number_inner().await?)
    }

    async fn insert(&self, run: &PipelineRun) -> Result<()> {
        Ok(self.insert_inner(run).await?)
    }

    async fn get(&self, id: ResourceId) -> Result<PipelineRun> {
        Ok(self.get_inner(id).await?)
    }

    async fn save(&self, run: &PipelineRun) -> Result<()> {
        Ok(self.save_inner(run).await?)
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        Ok(self.list_inner(limit).await?)
    }

    async fn list_by_status(&self, status: RunStatus) -> Result<Vec<PipelineRun>> {
        Ok(self.list_by_status_inner(status).await?)
    }

    async fn delete(&self, id: ResourceId) -> Result<()> {
        Ok(self.delete_inner(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::pipeline::TriggerEvent;

    async fn store() -> PgRunStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::create_pool(&url).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        PgRunStore::new(pool)
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_run_lifecycle() {
        let store = store().await;
        let number = store.next_number().await.unwrap();
        assert!(store.next_number().await.unwrap() > number);

        let mut run = PipelineRun::new(
            number,
            "test",
            TriggerEvent::push("main", None, Some("octocat".into())),
        );
        store.insert(&run).await.unwrap();
        assert!(matches!(
            store.insert(&run).await,
            Err(shipyard_core::Error::Conflict(_))
        ));
        assert_eq!(store.get(run.id).await.unwrap(), run);

        run.cancel("done testing").unwrap();
        store.save(&run).await.unwrap();
        assert_eq!(store.get(run.id).await.unwrap().status, RunStatus::Cancelled);
        assert!(
            store
                .list_by_status(RunStatus::Cancelled)
                .await
                .unwrap()
                .iter()
                .any(|r| r.id == run.id)
        );

        store.delete(run.id).await.unwrap();
        assert!(matches!(
            store.get(run.id).await,
            Err(shipyard_core::Error::NotFound(_))
        ));
        assert!(matches!(
            store.delete(run.id).await,
            Err(shipyard_core::Error::NotFound(_))
        ));
    }
}
