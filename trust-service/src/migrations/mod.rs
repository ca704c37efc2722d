//! Schema bootstrap run at startup by every worker.
//!
//! Each step is guarded by a unique marker document. The worker whose
//! insert succeeds runs the step and marks it complete, or deletes the
//! marker again if the step fails. Every other worker polls the marker
//! until it completes, and claims the step itself if the marker vanishes.

use std::time::{Duration, Instant};

use crate::config::MigrationConfig;
use crate::models::{Application, MigrationState, SecurityLevel};
use crate::services::{self_scope, ServiceError};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    /// Unique and lookup indexes
    V1Indexes,
    /// Application record for this service, target of self-scoped tokens
    V1SelfApplication,
}

impl MigrationStep {
    pub const ALL: [MigrationStep; 2] = [MigrationStep::V1Indexes, MigrationStep::V1SelfApplication];

    pub fn id(&self) -> &'static str {
        match self {
            MigrationStep::V1Indexes => "v1_indexes",
            MigrationStep::V1SelfApplication => "v1_self_application",
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Steps this worker ran
    pub applied: Vec<&'static str>,
    /// Steps another worker ran
    pub awaited: Vec<&'static str>,
}

pub async fn run_migrations(
    store: &dyn Store,
    self_app_id: &str,
    config: &MigrationConfig,
) -> Result<MigrationReport, ServiceError> {
    let mut report = MigrationReport::default();

    for step in MigrationStep::ALL {
        loop {
            if store.try_begin_migration(step.id()).await? {
                run_step(store, step, self_app_id).await?;
                report.applied.push(step.id());
                break;
            }
            match wait_for(store, step, config).await? {
                WaitOutcome::Completed => {
                    report.awaited.push(step.id());
                    break;
                }
                WaitOutcome::Released => {
                    tracing::info!(step = step.id(), "Migration step released, claiming again");
                }
            }
        }
    }

    tracing::info!(
        applied = ?report.applied,
        awaited = ?report.awaited,
        "Migrations complete"
    );
    Ok(report)
}

/// Run a claimed step. On failure the marker is released so a later
/// attempt can claim the step again.
async fn run_step(store: &dyn Store, step: MigrationStep, self_app_id: &str) -> Result<(), ServiceError> {
    tracing::info!(step = step.id(), "Running migration step");

    let result = match apply(store, step, self_app_id).await {
        Ok(()) => store.complete_migration(step.id()).await.map_err(ServiceError::from),
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        tracing::error!(step = step.id(), error = %e, "Migration step failed");
        if let Err(release) = store.abandon_migration(step.id()).await {
            tracing::error!(
                step = step.id(),
                error = %release,
                "Failed to release migration marker"
            );
        }
    }
    result
}

async fn apply(store: &dyn Store, step: MigrationStep, self_app_id: &str) -> Result<(), ServiceError> {
    match step {
        MigrationStep::V1Indexes => Ok(store.ensure_indexes().await?),
        MigrationStep::V1SelfApplication => {
            let mut application = Application::new(
                self_app_id.to_string(),
                "Trust Service".to_string(),
                SecurityLevel::MAX,
            );
            application.permissions = self_scope(self_app_id);

            match store.insert_application(&application).await {
                Ok(()) | Err(StoreError::Duplicate(_)) => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }
}

enum WaitOutcome {
    Completed,
    /// The runner gave the step up; it is free to claim.
    Released,
}

async fn wait_for(
    store: &dyn Store,
    step: MigrationStep,
    config: &MigrationConfig,
) -> Result<WaitOutcome, ServiceError> {
    let started = Instant::now();
    let budget = Duration::from_secs(config.wait_seconds);
    let interval = Duration::from_millis(config.poll_interval_ms);

    loop {
        match store.find_migration(step.id()).await? {
            None => return Ok(WaitOutcome::Released),
            Some(marker) if marker.state == MigrationState::Complete => {
                return Ok(WaitOutcome::Completed);
            }
            Some(_) => {}
        }
        if started.elapsed() >= budget {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Timed out after {}s waiting for migration step {}",
                config.wait_seconds,
                step.id()
            )));
        }
        tracing::debug!(step = step.id(), "Waiting for another worker's migration");
        tokio::time::sleep(interval).await;
    }
}
