// src/status_aggregator.rs
//! Derives a sample's workflow status from the statuses of its analyses.

use log::{debug, info};
use sqlx::SqlitePool;

use crate::error::{ApiError, ApiResult};
use crate::models::{AnalysisStatus, Sample, SampleStatus};
use crate::repositories::{CrudRepository, SampleAnalysisRepository, SampleRepository};

/// Outcome of a recompute, so callers can tell whether a write happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Unchanged(SampleStatus),
    Updated { from: SampleStatus, to: SampleStatus },
    SampleMissing,
}

impl RefreshOutcome {
    pub fn status(&self) -> Option<SampleStatus> {
        match self {
            RefreshOutcome::Unchanged(status) => Some(*status),
            RefreshOutcome::Updated { to, .. } => Some(*to),
            RefreshOutcome::SampleMissing => None,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, RefreshOutcome::Updated { .. })
    }
}

/// First matching rule wins:
/// no analyses => RECEIVED, all validated => VALIDATED,
/// all completed or validated => ANALYZED, any in progress => IN_PROCESS,
/// anything else => RECEIVED. Never yields REPORTED.
pub fn aggregate(statuses: &[AnalysisStatus]) -> SampleStatus {
    if statuses.is_empty() {
        return SampleStatus::Received;
    }

    if statuses.iter().all(|s| *s == AnalysisStatus::Validated) {
        SampleStatus::Validated
    } else if statuses.iter().all(|s| s.is_finished()) {
        SampleStatus::Analyzed
    } else if statuses.iter().any(|s| *s == AnalysisStatus::InProgress) {
        SampleStatus::InProcess
    } else {
        SampleStatus::Received
    }
}

/// Recomputes and stores the status of one sample. The stored value is only
/// written when it differs; an unknown sample is skipped without error.
pub async fn refresh_sample_status(pool: &SqlitePool, sample_id: &str) -> ApiResult<RefreshOutcome> {
    let samples = SampleRepository::new("");
    let sample = match samples.get_by_id(pool, sample_id).await? {
        Some(s) => s,
        None => {
            debug!("Status refresh skipped, sample {} not found", sample_id);
            return Ok(RefreshOutcome::SampleMissing);
        }
    };

    let statuses = SampleAnalysisRepository::new()
        .statuses_for_sample(pool, sample_id)
        .await?;
    let computed = aggregate(&statuses);

    // A reported sample stays reported while all of its results remain validated
    if sample.status == SampleStatus::Reported && computed == SampleStatus::Validated {
        return Ok(RefreshOutcome::Unchanged(SampleStatus::Reported));
    }

    if computed == sample.status {
        return Ok(RefreshOutcome::Unchanged(computed));
    }

    if !samples.set_status(pool, sample_id, computed).await? {
        // Deleted between the read and the write
        return Ok(RefreshOutcome::SampleMissing);
    }

    info!(
        "Sample {} status {} -> {}",
        sample.sample_code, sample.status, computed
    );
    Ok(RefreshOutcome::Updated { from: sample.status, to: computed })
}

/// Explicit hand-off to the patient; only a fully validated sample qualifies.
pub async fn mark_reported(pool: &SqlitePool, sample_id: &str) -> ApiResult<Sample> {
    let samples = SampleRepository::new("");
    let sample = samples
        .get_by_id(pool, sample_id)
        .await?
        .ok_or_else(|| ApiError::sample_not_found(sample_id))?;

    if sample.status == SampleStatus::Reported {
        return Ok(sample);
    }
    if !sample.status.can_mark_reported() {
        return Err(ApiError::invalid_transition(
            "sample",
            &sample.status.to_string(),
            &SampleStatus::Reported.to_string(),
        ));
    }

    samples.set_status(pool, sample_id, SampleStatus::Reported).await?;
    info!("Sample {} marked as reported", sample.sample_code);

    samples
        .get_by_id(pool, sample_id)
        .await?
        .ok_or_else(|| ApiError::sample_not_found(sample_id))
}
