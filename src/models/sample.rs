// src/models/sample.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use validator::Validate;

use super::{Patient, SampleAnalysisDetail};

// === ENUMS ===

/// Overall processing state of a sample.
///
/// Everything except `Reported` is derived from the sample's analysis
/// results (see `status_aggregator`). `Reported` is only ever set by the
/// explicit mark-reported transition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
    Display, EnumString, AsRefStr, EnumIter,
)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum SampleStatus {
    Received,
    InProcess,
    Analyzed,
    Validated,
    Reported,
}

impl Default for SampleStatus {
    fn default() -> Self {
        SampleStatus::Received
    }
}

impl SampleStatus {
    pub fn display_name(&self) -> &'static str {
        match self {
            SampleStatus::Received => "Received",
            SampleStatus::InProcess => "In process",
            SampleStatus::Analyzed => "Analyzed",
            SampleStatus::Validated => "Validated",
            SampleStatus::Reported => "Reported",
        }
    }

    pub fn display_name_fr(&self) -> &'static str {
        match self {
            SampleStatus::Received => "Reçu",
            SampleStatus::InProcess => "En cours",
            SampleStatus::Analyzed => "Analysé",
            SampleStatus::Validated => "Validé",
            SampleStatus::Reported => "Rapporté",
        }
    }

    pub fn can_mark_reported(&self) -> bool {
        matches!(self, SampleStatus::Validated)
    }
}

// === SAMPLE ===

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sample {
    pub id: String,
    pub sample_code: String,
    pub patient_id: String,
    pub specimen_type: String,
    pub collected_at: DateTime<Utc>,
    pub status: SampleStatus,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SampleWithDetails {
    #[serde(flatten)]
    pub sample: Sample,
    pub patient: Option<Patient>,
    pub analyses: Vec<SampleAnalysisDetail>,
}

// === REQUESTS ===

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSampleRequest {
    #[validate(length(min = 1, message = "Patient is required"))]
    pub patient_id: String,
    #[validate(length(min = 1, max = 255, message = "Specimen type is required"))]
    pub specimen_type: String,
    pub collected_at: DateTime<Utc>,
    #[validate(length(max = 2000, message = "Remarks cannot exceed 2000 characters"))]
    pub remarks: Option<String>,
}

/// Status is intentionally absent: it is derived, or moved by explicit transitions.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateSampleRequest {
    #[validate(length(min = 1, max = 255, message = "Specimen type cannot be empty"))]
    pub specimen_type: Option<String>,
    pub collected_at: Option<DateTime<Utc>>,
    #[validate(length(max = 2000, message = "Remarks cannot exceed 2000 characters"))]
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AttachAnalysisRequest {
    #[validate(length(min = 1, message = "Analysis is required"))]
    pub analysis_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_sample_status_wire_format() {
        assert_eq!(serde_json::to_string(&SampleStatus::InProcess).unwrap(), "\"IN_PROCESS\"");
        assert_eq!(SampleStatus::InProcess.to_string(), "IN_PROCESS");
        assert_eq!("analyzed".parse::<SampleStatus>().unwrap(), SampleStatus::Analyzed);
        assert!("DONE".parse::<SampleStatus>().is_err());
    }

    #[test]
    fn test_sample_status_labels() {
        assert_eq!(SampleStatus::Received.display_name_fr(), "Reçu");
        assert_eq!(SampleStatus::Reported.display_name(), "Reported");
        assert_eq!(SampleStatus::iter().count(), 5);
    }

    #[test]
    fn test_only_validated_can_be_reported() {
        let allowed: Vec<SampleStatus> =
            SampleStatus::iter().filter(|s| s.can_mark_reported()).collect();
        assert_eq!(allowed, vec![SampleStatus::Validated]);
    }
}
