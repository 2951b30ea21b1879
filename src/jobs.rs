use crate::entities;
use crate::errors::AuthError;
use crate::storage;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, NotSet, QueryOrder,
    QuerySelect, Set,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub const CLEANUP_EXPIRED_SESSIONS: &str = "cleanup_expired_sessions";

/// Every known job, as accepted by [`trigger_job_manually`].
pub const JOB_NAMES: &[&str] = &[CLEANUP_EXPIRED_SESSIONS];

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(db: DatabaseConnection) -> Result<JobScheduler, AuthError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| AuthError::Other(format!("Failed to create job scheduler: {}", e)))?;

    // Runs every hour, on the hour
    let cleanup_sessions_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let db = db.clone();
        Box::pin(async move {
            info!("Running {} job", CLEANUP_EXPIRED_SESSIONS);
            if let Err(e) = run_recorded(&db, CLEANUP_EXPIRED_SESSIONS).await {
                error!("Failed to record {} run: {}", CLEANUP_EXPIRED_SESSIONS, e);
            }
        })
    })
    .map_err(|e| AuthError::Other(format!("Failed to create cleanup sessions job: {}", e)))?;

    sched
        .add(cleanup_sessions_job)
        .await
        .map_err(|e| AuthError::Other(format!("Failed to add cleanup sessions job: {}", e)))?;

    sched
        .start()
        .await
        .map_err(|e| AuthError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!("Job scheduler started with {} jobs", JOB_NAMES.len());

    Ok(sched)
}

/// Manually trigger a job by name. Returns the recorded execution.
pub async fn trigger_job_manually(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<entities::job_execution::Model, AuthError> {
    if !JOB_NAMES.contains(&job_name) {
        return Err(AuthError::NotFound(format!("Unknown job name: {}", job_name)));
    }
    info!("Manually triggering job: {}", job_name);
    run_recorded(db, job_name).await
}

async fn run_job(db: &DatabaseConnection, job_name: &str) -> Result<u64, AuthError> {
    match job_name {
        CLEANUP_EXPIRED_SESSIONS => storage::cleanup_expired_sessions(db).await,
        _ => Err(AuthError::NotFound(format!("Unknown job name: {}", job_name))),
    }
}

/// Run a job between a start and a completion record.
async fn run_recorded(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<entities::job_execution::Model, AuthError> {
    let execution_id = start_job_execution(db, job_name).await?;

    match run_job(db, job_name).await {
        Ok(count) => {
            info!("Job {} completed: {} records", job_name, count);
            complete_job_execution(db, execution_id, true, None, Some(count as i64)).await
        }
        Err(e) => {
            error!("Job {} failed: {}", job_name, e);
            complete_job_execution(db, execution_id, false, Some(e.to_string()), None).await
        }
    }
}

/// Record the start of a job execution
pub async fn start_job_execution(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<i64, AuthError> {
    use entities::job_execution;

    let execution = job_execution::ActiveModel {
        id: NotSet,
        job_name: Set(job_name.to_string()),
        started_at: Set(Utc::now().timestamp()),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        records_processed: Set(None),
    };

    let result = execution.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job execution
pub async fn complete_job_execution(
    db: &DatabaseConnection,
    execution_id: i64,
    success: bool,
    error_message: Option<String>,
    records_processed: Option<i64>,
) -> Result<entities::job_execution::Model, AuthError> {
    use entities::job_execution::Entity;

    let execution = Entity::find_by_id(execution_id)
        .one(db)
        .await?
        .ok_or_else(|| AuthError::NotFound(format!("No job execution {}", execution_id)))?;

    let mut active: entities::job_execution::ActiveModel = execution.into_active_model();
    active.completed_at = Set(Some(Utc::now().timestamp()));
    active.success = Set(Some(if success { 1 } else { 0 }));
    active.error_message = Set(error_message);
    active.records_processed = Set(records_processed);
    Ok(active.update(db).await?)
}

/// Most recent runs first.
pub async fn recent_job_executions(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<entities::job_execution::Model>, AuthError> {
    use entities::job_execution::{Column, Entity};

    Ok(Entity::find()
        .order_by_desc(Column::StartedAt)
        .order_by_desc(Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}
