// src/models/analysis.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

// === ANALYSIS (catalog entry) ===

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Analysis {
    pub id: String,
    pub analysis_code: String,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisWithUsage {
    #[serde(flatten)]
    pub analysis: Analysis,
    pub usage_count: i64,
}

impl AnalysisWithUsage {
    pub fn can_delete(&self) -> bool {
        self.usage_count == 0
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

// === REQUESTS ===

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAnalysisRequest {
    #[validate(length(min = 1, max = 255, message = "Analysis name is required"))]
    pub name: String,
    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Category is required"))]
    pub category: String,
    pub price: f64,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateAnalysisRequest {
    #[validate(length(min = 1, max = 255, message = "Analysis name cannot be empty"))]
    pub name: Option<String>,
    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Category cannot be empty"))]
    pub category: Option<String>,
    pub price: Option<f64>,
}
