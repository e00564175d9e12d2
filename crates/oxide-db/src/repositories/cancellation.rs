//! PostgreSQL implementation of CancellationExecutor.

use async_trait::async_trait;
use oxide_core::pipeline::Pipeline;
use oxide_core::ports::{CancelRequest, CancelResult, CancellationExecutor};
use oxide_core::status::CiStatus;
use oxide_core::{Error, Result};
use sqlx::PgPool;
use tracing::debug;

/// Cancels a pipeline and its builds in one transaction.
///
/// The pipeline row is locked first, so concurrent cancellations of the same
/// pipeline serialize and the later one observes a canceled pipeline.
#[derive(Clone)]
pub struct PgCancellationExecutor {
    pool: PgPool,
}

impl PgCancellationExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CancellationExecutor for PgCancellationExecutor {
    async fn cancel(&self, pipeline: &Pipeline, request: CancelRequest) -> Result<CancelResult> {
        let cancelable = CiStatus::names(&CiStatus::CANCELABLE);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM pipelines WHERE id = $1 FOR UPDATE")
                .bind(pipeline.id.value())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

        let Some(status) = status else {
            return Err(Error::PipelineNotFound(pipeline.id));
        };
        if !status.parse::<CiStatus>()?.is_cancelable() {
            debug!(pipeline_id = %pipeline.id, %status, "Pipeline no longer cancelable");
            return Ok(CancelResult::default());
        }

        let builds = sqlx::query(
            "UPDATE builds SET status = $1, auto_canceled_by_id = $2, updated_at = NOW() \
             WHERE pipeline_id = $3 AND status = ANY($4) \
               AND (NOT $5 OR interruptible IS TRUE)",
        )
        .bind(CiStatus::Canceled.as_str())
        .bind(request.auto_canceled_by.value())
        .bind(pipeline.id.value())
        .bind(&cancelable)
        .bind(request.safe_cancellation)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .rows_affected();

        // The pipeline itself only moves once nothing cancelable is left;
        // safe cancellation may leave uninterruptible builds running.
        let pipeline_canceled = sqlx::query(
            "UPDATE pipelines SET status = $1, auto_canceled_by_id = $2, updated_at = NOW() \
             WHERE id = $3 AND NOT EXISTS ( \
                 SELECT 1 FROM builds WHERE pipeline_id = $3 AND status = ANY($4))",
        )
        .bind(CiStatus::Canceled.as_str())
        .bind(request.auto_canceled_by.value())
        .bind(pipeline.id.value())
        .bind(&cancelable)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .rows_affected()
            > 0;

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(CancelResult {
            builds_canceled: usize::try_from(builds).unwrap_or(usize::MAX),
            pipeline_canceled,
        })
    }
}
