//! Task-state store
//!
//! Holds each group's registered tasks, their payloads and their current
//! [`TaskState`]. The worker pool writes states; the progress tracker and
//! crash recovery read them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{Batch, GroupSummary, IngestionJob, TaskState};
use crate::db::RepositoryError;
use crate::error::IngestResult;

#[async_trait]
pub trait TaskStateStore: Send + Sync {
    /// Record a new group and its jobs, all `Pending`
    async fn register_group(&self, batch: &Batch, jobs: &[IngestionJob]) -> IngestResult<()>;

    /// Move a task to `state`
    ///
    /// Terminal states are final: returns `false` and leaves the stored state
    /// alone when the task already finished.
    async fn record_state(&self, task_id: Uuid, state: &TaskState) -> IngestResult<bool>;

    async fn task_state(&self, task_id: Uuid) -> IngestResult<Option<TaskState>>;

    /// `(ordinal, state)` of every task in the group, by ordinal
    async fn group_states(&self, group_id: Uuid) -> IngestResult<Vec<(u32, TaskState)>>;

    /// Per-state counts, or `None` for an unknown group
    async fn group_summary(&self, group_id: Uuid) -> IngestResult<Option<GroupSummary>>;

    /// Payloads of every task not yet in a terminal state
    async fn unfinished_jobs(&self) -> IngestResult<Vec<IngestionJob>>;

    /// Delete groups created before `cutoff` whose tasks all finished
    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> IngestResult<u64>;
}

#[derive(Debug)]
struct GroupRecord {
    created_at: DateTime<Utc>,
    task_ids: Vec<Uuid>,
}

#[derive(Debug)]
struct TaskRecord {
    job: IngestionJob,
    state: TaskState,
}

#[derive(Debug, Default)]
struct MemoryState {
    groups: HashMap<Uuid, GroupRecord>,
    tasks: HashMap<Uuid, TaskRecord>,
}

/// Process-local store; state is lost on restart
#[derive(Debug, Default)]
pub struct MemoryTaskStateStore {
    inner: RwLock<MemoryState>,
}

impl MemoryTaskStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdate a group, for exercising garbage collection
    pub async fn set_created_at(&self, group_id: Uuid, created_at: DateTime<Utc>) {
        if let Some(group) = self.inner.write().await.groups.get_mut(&group_id) {
            group.created_at = created_at;
        }
    }
}

#[async_trait]
impl TaskStateStore for MemoryTaskStateStore {
    async fn register_group(&self, batch: &Batch, jobs: &[IngestionJob]) -> IngestResult<()> {
        let mut inner = self.inner.write().await;

        inner.groups.insert(
            batch.group_id,
            GroupRecord {
                created_at: Utc::now(),
                task_ids: jobs.iter().map(|j| j.task_id).collect(),
            },
        );
        for job in jobs {
            inner.tasks.insert(
                job.task_id,
                TaskRecord {
                    job: job.clone(),
                    state: TaskState::Pending,
                },
            );
        }

        Ok(())
    }

    async fn record_state(&self, task_id: Uuid, state: &TaskState) -> IngestResult<bool> {
        let mut inner = self.inner.write().await;

        match inner.tasks.get_mut(&task_id) {
            Some(record) if !record.state.is_terminal() => {
                record.state = state.clone();
                Ok(true)
            },
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("task {}", task_id)).into()),
        }
    }

    async fn task_state(&self, task_id: Uuid) -> IngestResult<Option<TaskState>> {
        Ok(self
            .inner
            .read()
            .await
            .tasks
            .get(&task_id)
            .map(|r| r.state.clone()))
    }

    async fn group_states(&self, group_id: Uuid) -> IngestResult<Vec<(u32, TaskState)>> {
        let inner = self.inner.read().await;
        let Some(group) = inner.groups.get(&group_id) else {
            return Ok(Vec::new());
        };

        let mut states: Vec<(u32, TaskState)> = group
            .task_ids
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .map(|r| (r.job.ordinal_index, r.state.clone()))
            .collect();
        states.sort_by_key(|(ordinal, _)| *ordinal);
        Ok(states)
    }

    async fn group_summary(&self, group_id: Uuid) -> IngestResult<Option<GroupSummary>> {
        let inner = self.inner.read().await;

        Ok(inner.groups.get(&group_id).map(|group| {
            let mut summary = GroupSummary {
                total: group.task_ids.len(),
                ..GroupSummary::default()
            };
            for record in group.task_ids.iter().filter_map(|id| inner.tasks.get(id)) {
                summary.record(&record.state);
            }
            summary
        }))
    }

    async fn unfinished_jobs(&self) -> IngestResult<Vec<IngestionJob>> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<IngestionJob> = inner
            .tasks
            .values()
            .filter(|r| !r.state.is_terminal())
            .map(|r| r.job.clone())
            .collect();
        jobs.sort_by_key(|j| (j.group_id, j.ordinal_index));
        Ok(jobs)
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> IngestResult<u64> {
        let mut inner = self.inner.write().await;

        let expired: Vec<Uuid> = inner
            .groups
            .iter()
            .filter(|(_, group)| group.created_at < cutoff)
            .filter(|(_, group)| {
                group
                    .task_ids
                    .iter()
                    .all(|id| inner.tasks.get(id).is_none_or(|r| r.state.is_terminal()))
            })
            .map(|(id, _)| *id)
            .collect();

        for group_id in &expired {
            if let Some(group) = inner.groups.remove(group_id) {
                for task_id in group.task_ids {
                    inner.tasks.remove(&task_id);
                }
            }
        }

        Ok(expired.len() as u64)
    }
}

const UNFINISHED_STATES: &str = "('pending', 'running', 'retrying')";
const TERMINAL_STATES: &str = "('succeeded', 'skipped', 'failed')";

/// Postgres store; group handles survive restarts
#[derive(Clone)]
pub struct PgTaskStateStore {
    pool: PgPool,
}

impl PgTaskStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Rows are written with their detail; a missing detail means never updated
fn decode_state(kind: &str, detail: Option<Json<TaskState>>) -> TaskState {
    match detail {
        Some(Json(state)) => state,
        None if kind == "pending" => TaskState::Pending,
        None => TaskState::Running { attempt: 1 },
    }
}

fn db_err(e: sqlx::Error) -> crate::error::IngestError {
    RepositoryError::Database(e).into()
}

#[async_trait]
impl TaskStateStore for PgTaskStateStore {
    async fn register_group(&self, batch: &Batch, jobs: &[IngestionJob]) -> IngestResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("INSERT INTO ingest_groups (id, gallery_id, total_items) VALUES ($1, $2, $3)")
            .bind(batch.group_id)
            .bind(batch.gallery_id)
            .bind(i32::try_from(jobs.len()).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for job in jobs {
            sqlx::query(
                r#"
                INSERT INTO ingest_tasks (id, group_id, ordinal_index, payload, state)
                VALUES ($1, $2, $3, $4, 'pending')
                "#,
            )
            .bind(job.task_id)
            .bind(job.group_id)
            .bind(i32::try_from(job.ordinal_index).unwrap_or(i32::MAX))
            .bind(Json(job))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn record_state(&self, task_id: Uuid, state: &TaskState) -> IngestResult<bool> {
        let sql = format!(
            r#"
            UPDATE ingest_tasks
            SET state = $2, state_detail = $3, updated_at = NOW()
            WHERE id = $1 AND state NOT IN {TERMINAL_STATES}
            "#
        );

        let result = sqlx::query(&sql)
            .bind(task_id)
            .bind(state.kind())
            .bind(Json(state))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        match self.task_state(task_id).await? {
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("task {}", task_id)).into()),
        }
    }

    async fn task_state(&self, task_id: Uuid) -> IngestResult<Option<TaskState>> {
        let row: Option<(String, Option<Json<TaskState>>)> =
            sqlx::query_as("SELECT state, state_detail FROM ingest_tasks WHERE id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(row.map(|(kind, detail)| decode_state(&kind, detail)))
    }

    async fn group_states(&self, group_id: Uuid) -> IngestResult<Vec<(u32, TaskState)>> {
        let rows: Vec<(i32, String, Option<Json<TaskState>>)> = sqlx::query_as(
            "SELECT ordinal_index, state, state_detail FROM ingest_tasks WHERE group_id = $1 ORDER BY ordinal_index",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(ordinal, kind, detail)| {
                (u32::try_from(ordinal).unwrap_or(0), decode_state(&kind, detail))
            })
            .collect())
    }

    async fn group_summary(&self, group_id: Uuid) -> IngestResult<Option<GroupSummary>> {
        let total: Option<i32> =
            sqlx::query_scalar("SELECT total_items FROM ingest_groups WHERE id = $1")
                .bind(group_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        let Some(total) = total else {
            return Ok(None);
        };

        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT state, COUNT(*) FROM ingest_tasks WHERE group_id = $1 GROUP BY state",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut summary = GroupSummary {
            total: usize::try_from(total).unwrap_or(0),
            ..GroupSummary::default()
        };
        for (kind, count) in counts {
            summary.add(&kind, usize::try_from(count).unwrap_or(0));
        }

        Ok(Some(summary))
    }

    async fn unfinished_jobs(&self) -> IngestResult<Vec<IngestionJob>> {
        let sql = format!(
            "SELECT payload FROM ingest_tasks WHERE state IN {UNFINISHED_STATES} ORDER BY group_id, ordinal_index"
        );

        let payloads: Vec<Json<IngestionJob>> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(payloads.into_iter().map(|Json(job)| job).collect())
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> IngestResult<u64> {
        let sql = format!(
            r#"
            DELETE FROM ingest_groups g
            WHERE g.created_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM ingest_tasks t
                  WHERE t.group_id = g.id AND t.state IN {UNFINISHED_STATES}
              )
            "#
        );

        let result = sqlx::query(&sql)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
