//! Job persistence, grounded on the teacher's `db/mod.rs` `Database`
//! trait: one `#[async_trait]` trait, one Postgres-backed implementation
//! using the teacher's exact `deadpool-postgres`/`tokio-postgres`/
//! `refinery` stack, and one in-memory implementation for tests and for
//! running without a configured database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use thiserror::Error;
use tokio_postgres::NoTls;
use uuid::Uuid;

use super::{Job, JobResult};

mod embedded {
    refinery::embed_migrations!("migrations");
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("database query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("database config error: {0}")]
    Config(String),

    #[error("job {0} not found")]
    NotFound(Uuid),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn record_result(&self, result: &JobResult) -> Result<(), StoreError>;
    async fn get_result(&self, id: Uuid) -> Result<Option<JobResult>, StoreError>;
}

pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    results: Mutex<HashMap<Uuid, JobResult>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        InMemoryJobStore {
            jobs: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.lock().expect("in-memory job store mutex poisoned").insert(job.id, job.clone());
        Ok(())
    }

    async fn record_result(&self, result: &JobResult) -> Result<(), StoreError> {
        self.results
            .lock()
            .expect("in-memory job store mutex poisoned")
            .insert(result.id, result.clone());
        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<JobResult>, StoreError> {
        Ok(self.results.lock().expect("in-memory job store mutex poisoned").get(&id).cloned())
    }
}

pub struct PostgresJobStore {
    pool: Pool,
}

impl PostgresJobStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pg_config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e: tokio_postgres::Error| StoreError::Config(e.to_string()))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig { recycling_method: RecyclingMethod::Fast },
        );
        let pool = Pool::builder(manager).max_size(16).build().map_err(|e| StoreError::Config(e.to_string()))?;

        {
            let mut client = pool.get().await?;
            embedded::migrations::runner()
                .run_async(&mut **client)
                .await
                .map_err(|e| StoreError::Config(e.to_string()))?;
        }

        Ok(PostgresJobStore { pool })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO jobs (id, worker_id, task_name, requested_by, created_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (id) DO NOTHING",
                &[&job.id, &job.worker_id, &job.task_name, &job.requested_by.client_id, &job.created_at],
            )
            .await?;
        Ok(())
    }

    async fn record_result(&self, result: &JobResult) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let attempt_log_json = serde_json::to_value(&result.attempt_log).unwrap_or(serde_json::Value::Null);
        client
            .execute(
                "INSERT INTO job_results (id, worker_id, succeeded, summary, attempt_log, ticket_url, completed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (id) DO UPDATE SET \
                 succeeded = EXCLUDED.succeeded, summary = EXCLUDED.summary, \
                 attempt_log = EXCLUDED.attempt_log, ticket_url = EXCLUDED.ticket_url, \
                 completed_at = EXCLUDED.completed_at",
                &[
                    &result.id,
                    &result.worker_id,
                    &result.succeeded,
                    &result.summary,
                    &attempt_log_json,
                    &result.ticket_url,
                    &result.completed_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<JobResult>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, worker_id, succeeded, summary, attempt_log, ticket_url, completed_at \
                 FROM job_results WHERE id = $1",
                &[&id],
            )
            .await?;

        Ok(row.map(|row| {
            let attempt_log_json: serde_json::Value = row.get("attempt_log");
            JobResult {
                id: row.get("id"),
                worker_id: row.get("worker_id"),
                succeeded: row.get("succeeded"),
                summary: row.get("summary"),
                attempt_log: serde_json::from_value(attempt_log_json).unwrap_or_default(),
                ticket_url: row.get("ticket_url"),
                completed_at: row.get("completed_at"),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Caller;
    use chrono::Utc;

    fn sample_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            worker_id: "t-w1064-ms-001".to_string(),
            task_name: "reboot".to_string(),
            requested_by: Caller { client_id: "mozilla-ldap/jdoe@mozilla.com".to_string(), scopes: vec![] },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_job_and_result() {
        let store = InMemoryJobStore::new();
        let job = sample_job();
        store.insert_job(&job).await.unwrap();

        let result = JobResult {
            id: job.id,
            worker_id: job.worker_id.clone(),
            succeeded: true,
            summary: "ssh_reboot: succeeded. Completed in 12.000 seconds".to_string(),
            attempt_log: Vec::new(),
            ticket_url: None,
            completed_at: Utc::now(),
        };
        store.record_result(&result).await.unwrap();

        let fetched = store.get_result(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.summary, result.summary);
    }

    #[tokio::test]
    async fn missing_result_is_none_not_an_error() {
        let store = InMemoryJobStore::new();
        assert!(store.get_result(Uuid::new_v4()).await.unwrap().is_none());
    }
}
