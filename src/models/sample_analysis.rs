// src/models/sample_analysis.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use validator::Validate;

use super::{Analysis, Patient, Sample};

// === ENUMS ===

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
    Display, EnumString, AsRefStr, EnumIter,
)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AnalysisStatus {
    Pending,
    InProgress,
    Completed,
    Validated,
}

impl Default for AnalysisStatus {
    fn default() -> Self {
        AnalysisStatus::Pending
    }
}

impl AnalysisStatus {
    /// A finished result carries a value; pending and in-progress ones may not.
    pub fn requires_result(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Validated)
    }

    pub fn is_finished(&self) -> bool {
        self.requires_result()
    }
}

// === SAMPLE ANALYSIS (result) ===

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SampleAnalysis {
    pub id: String,
    pub sample_id: String,
    pub analysis_id: String,
    pub result: Option<String>,
    pub normal_range: Option<String>,
    pub unit: Option<String>,
    pub interpretation: Option<String>,
    pub notes: Option<String>,
    pub status: AnalysisStatus,
    pub technician_id: Option<String>,
    pub validator_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result row joined with its catalog entry, as listed on a sample or a report.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SampleAnalysisDetail {
    pub id: String,
    pub sample_id: String,
    pub analysis_id: String,
    pub analysis_code: String,
    pub analysis_name: String,
    pub category: String,
    pub price: f64,
    pub result: Option<String>,
    pub normal_range: Option<String>,
    pub unit: Option<String>,
    pub interpretation: Option<String>,
    pub notes: Option<String>,
    pub status: AnalysisStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub validated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ResultWithContext {
    #[serde(flatten)]
    pub result: SampleAnalysis,
    pub analysis: Option<Analysis>,
    pub sample: Option<Sample>,
    pub patient: Option<Patient>,
}

// === REQUESTS ===

/// Attaching a catalog analysis to a sample; always starts PENDING.
#[derive(Debug, Clone)]
pub struct NewSampleAnalysis {
    pub sample_id: String,
    pub analysis_id: String,
}

/// Result entry. Absent fields keep their stored value; blank strings clear them.
#[derive(Debug, Default, Clone, Deserialize, Validate)]
pub struct UpdateResultRequest {
    #[validate(length(max = 2000, message = "Result cannot exceed 2000 characters"))]
    pub result: Option<String>,
    #[validate(length(max = 255, message = "Normal range cannot exceed 255 characters"))]
    pub normal_range: Option<String>,
    #[validate(length(max = 50, message = "Unit cannot exceed 50 characters"))]
    pub unit: Option<String>,
    #[validate(length(max = 2000, message = "Interpretation cannot exceed 2000 characters"))]
    pub interpretation: Option<String>,
    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub notes: Option<String>,
    pub status: Option<AnalysisStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_analysis_status_wire_format() {
        assert_eq!(serde_json::to_string(&AnalysisStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
        assert_eq!(
            serde_json::from_str::<AnalysisStatus>("\"COMPLETED\"").unwrap(),
            AnalysisStatus::Completed
        );
        assert!(serde_json::from_str::<AnalysisStatus>("\"DONE\"").is_err());
        assert_eq!("pending".parse::<AnalysisStatus>().unwrap(), AnalysisStatus::Pending);
    }

    #[test]
    fn test_requires_result() {
        let needing: Vec<AnalysisStatus> =
            AnalysisStatus::iter().filter(|s| s.requires_result()).collect();
        assert_eq!(needing, vec![AnalysisStatus::Completed, AnalysisStatus::Validated]);
    }
}
