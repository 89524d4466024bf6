// src/handlers.rs
use actix_web::{web, HttpResponse};
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strum::IntoEnumIterator;

use crate::AppState;
use crate::error::ApiResult;
use crate::models::{AnalysisStatus, DashboardStats, ReportStatus, SampleStatus};
use crate::repositories::{
    AnalysisRepository, CrudRepository, PatientRepository, ReportRepository,
    SampleAnalysisRepository, SampleRepository,
};

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub patient_id: Option<String>,
    pub sample_id: Option<String>,
    pub sort_order: Option<String>,
}

impl PaginationQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }

    /// Newest first unless `asc` is asked for explicitly
    pub fn sort_direction(&self) -> &'static str {
        match self.sort_order.as_deref() {
            Some(order) if order.eq_ignore_ascii_case("asc") => "ASC",
            _ => "DESC",
        }
    }
}

// ==================== DASHBOARD STATISTICS ====================

pub async fn get_dashboard_stats(
    app_state: web::Data<Arc<AppState>>,
) -> ApiResult<HttpResponse> {
    let stats = collect_dashboard_stats(&app_state).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

pub(crate) async fn collect_dashboard_stats(app_state: &AppState) -> ApiResult<DashboardStats> {
    let pool = &app_state.db_pool;
    let lab = &app_state.config.lab;

    let samples = SampleRepository::from_config(lab);
    let reports = ReportRepository::from_config(lab);
    let results = SampleAnalysisRepository::new();

    // Every status is listed, even at zero, so the dashboard layout is stable
    let mut samples_by_status: BTreeMap<String, i64> =
        SampleStatus::iter().map(|s| (s.to_string(), 0)).collect();
    for (status, count) in samples.count_by_status(pool).await? {
        samples_by_status.insert(status.to_string(), count);
    }

    let mut reports_by_status: BTreeMap<String, i64> =
        ReportStatus::iter().map(|s| (s.to_string(), 0)).collect();
    for (status, count) in reports.count_by_status(pool).await? {
        reports_by_status.insert(status.to_string(), count);
    }

    let pending = results.count_by_status(pool, AnalysisStatus::Pending).await?
        + results.count_by_status(pool, AnalysisStatus::InProgress).await?;

    Ok(DashboardStats {
        total_patients: PatientRepository::from_config(lab).count(pool).await?,
        total_samples: samples.count(pool).await?,
        samples_by_status,
        pending_results: pending,
        results_awaiting_validation: results.count_by_status(pool, AnalysisStatus::Completed).await?,
        total_reports: reports.count(pool).await?,
        reports_by_status,
        catalog_size: AnalysisRepository::from_config(lab).count(pool).await?,
    })
}
