// src/models/report.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use validator::Validate;

use super::{Patient, Sample, SampleAnalysisDetail};

// === ENUMS ===

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
    Display, EnumString, AsRefStr, EnumIter,
)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ReportStatus {
    Draft,
    Validated,
    Delivered,
}

impl Default for ReportStatus {
    fn default() -> Self {
        ReportStatus::Draft
    }
}

impl ReportStatus {
    /// The only status reachable from `self`, if any.
    pub fn next(&self) -> Option<ReportStatus> {
        match self {
            ReportStatus::Draft => Some(ReportStatus::Validated),
            ReportStatus::Validated => Some(ReportStatus::Delivered),
            ReportStatus::Delivered => None,
        }
    }

    pub fn can_transition_to(&self, target: ReportStatus) -> bool {
        self.next() == Some(target)
    }

    /// Delivered reports are frozen.
    pub fn is_editable(&self) -> bool {
        !matches!(self, ReportStatus::Delivered)
    }

    pub fn display_name_fr(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "Brouillon",
            ReportStatus::Validated => "Validé",
            ReportStatus::Delivered => "Délivré",
        }
    }
}

// === REPORT ===

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Report {
    pub id: String,
    pub report_code: String,
    pub patient_id: String,
    pub sample_id: String,
    pub conclusion: Option<String>,
    pub recommendations: Option<String>,
    pub status: ReportStatus,
    pub generated_by: String,
    pub validated_by: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to print a report, resolved in one place.
#[derive(Debug, Serialize)]
pub struct ReportDocument {
    pub report: Report,
    pub patient: Option<Patient>,
    pub sample: Option<Sample>,
    pub patient_age: Option<u32>,
    pub sex_label: Option<&'static str>,
    pub status_label: &'static str,
    pub sample_status_label: Option<&'static str>,
    pub results: Vec<SampleAnalysisDetail>,
    pub total_price: f64,
    pub currency: String,
    pub printed_at: DateTime<Utc>,
}

// === REQUESTS ===

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReportRequest {
    #[validate(length(min = 1, message = "Please select a patient"))]
    pub patient_id: String,
    #[validate(length(min = 1, message = "Please select a sample"))]
    pub sample_id: String,
    #[validate(length(max = 5000, message = "Conclusion cannot exceed 5000 characters"))]
    pub conclusion: Option<String>,
    #[validate(length(max = 5000, message = "Recommendations cannot exceed 5000 characters"))]
    pub recommendations: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateReportRequest {
    #[validate(length(max = 5000, message = "Conclusion cannot exceed 5000 characters"))]
    pub conclusion: Option<String>,
    #[validate(length(max = 5000, message = "Recommendations cannot exceed 5000 characters"))]
    pub recommendations: Option<String>,
}
