// src/models/mod.rs

pub mod analysis;
pub mod patient;
pub mod report;
pub mod sample;
pub mod sample_analysis;

// Re-export so that types are reachable as crate::models::TypeName
pub use analysis::*;
pub use patient::*;
pub use report::*;
pub use sample::*;
pub use sample_analysis::*;

use serde::Serialize;
use std::collections::BTreeMap;

// ==================== COMMON / SHARED ====================

/// Human readable record code: prefix followed by a zero-padded sequence number.
pub fn format_code(prefix: &str, number: i64) -> String {
    format!("{}{:06}", prefix, number)
}

/// Counters for the dashboard
#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_patients: i64,
    pub total_samples: i64,
    pub samples_by_status: BTreeMap<String, i64>,
    pub pending_results: i64,
    pub results_awaiting_validation: i64,
    pub total_reports: i64,
    pub reports_by_status: BTreeMap<String, i64>,
    pub catalog_size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_code() {
        assert_eq!(format_code("PAT", 1), "PAT000001");
        assert_eq!(format_code("ECH", 42), "ECH000042");
        assert_eq!(format_code("RAP", 123456), "RAP123456");
        assert_eq!(format_code("ANA", 1234567), "ANA1234567");
    }
}
