// src/import_export.rs - CSV exports and bulk catalog import
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::audit;
use crate::auth::{require_permission, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::CreateAnalysisRequest;
use crate::repositories::{AnalysisRepository, CrudRepository, PatientRepository};
use crate::validator::CustomValidate;

// ==================== MODELS ====================

#[derive(Debug, Deserialize)]
pub struct ImportAnalysis {
    pub name: String,
    pub category: String,
    pub price: f64,
    pub description: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub total: usize,
    pub errors: Vec<String>,
}

fn csv_error(e: impl std::fmt::Display) -> ApiError {
    ApiError::InternalServerError(format!("CSV export failed: {}", e))
}

fn csv_response(filename: &str, body: Vec<u8>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(("Content-Disposition", format!("attachment; filename=\"{}\"", filename)))
        .body(body)
}

// ==================== EXPORT ====================

pub async fn export_patients(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_export_data)?;
    let patients = PatientRepository::from_config(&app_state.config.lab)
        .list(&app_state.db_pool)
        .await?;

    let mut csv_data = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut csv_data);
        writer.write_record([
            "Code", "Last name", "First name", "Sex", "Birth date", "Phone", "Email", "Address",
        ]).map_err(csv_error)?;

        for p in &patients {
            writer.write_record([
                p.patient_code.clone(),
                p.last_name.clone(),
                p.first_name.clone(),
                p.sex.to_string(),
                p.birth_date.map(|d| d.to_string()).unwrap_or_default(),
                p.phone.clone().unwrap_or_default(),
                p.email.clone().unwrap_or_default(),
                p.address.clone().unwrap_or_default(),
            ]).map_err(csv_error)?;
        }
        writer.flush().map_err(csv_error)?;
    }

    log::info!("{} exported {} patients", claims.username, patients.len());
    Ok(csv_response("patients.csv", csv_data))
}

pub async fn export_analyses(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_export_data)?;
    let analyses = AnalysisRepository::from_config(&app_state.config.lab)
        .list(&app_state.db_pool)
        .await?;

    let mut csv_data = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut csv_data);
        writer.write_record(["Code", "Name", "Category", "Price", "Description"])
            .map_err(csv_error)?;

        for a in analyses {
            writer.write_record([
                a.analysis_code,
                a.name,
                a.category,
                format!("{:.2}", a.price),
                a.description.unwrap_or_default(),
            ]).map_err(csv_error)?;
        }
        writer.flush().map_err(csv_error)?;
    }

    Ok(csv_response("analyses.csv", csv_data))
}

// ==================== IMPORT ====================

/// Loads catalog entries one by one. Rows with errors or a name already in
/// the catalog are reported and skipped; the rest are created.
pub async fn import_analyses(
    app_state: web::Data<Arc<AppState>>,
    data: web::Json<Vec<ImportAnalysis>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_import_data)?;
    let pool = &app_state.db_pool;
    let repo = AnalysisRepository::from_config(&app_state.config.lab);

    let mut summary = ImportSummary { total: data.len(), ..Default::default() };

    for (idx, item) in data.into_inner().into_iter().enumerate() {
        let row = idx + 1;
        let request = CreateAnalysisRequest {
            name: item.name.trim().to_string(),
            category: item.category.trim().to_string(),
            price: item.price,
            description: item.description,
        };

        let check = request.custom_validate();
        if !check.is_valid() {
            for (field, messages) in check.errors {
                for message in messages {
                    summary.errors.push(format!("Row {}: {}: {}", row, field, message));
                }
            }
            continue;
        }

        if repo.find_by_name(pool, &request.name).await?.is_some() {
            summary.skipped += 1;
            summary.errors.push(format!("Row {}: Analysis '{}' already exists", row, request.name));
            continue;
        }

        match repo.create(pool, request, &claims.sub).await {
            Ok(_) => summary.imported += 1,
            Err(e) => {
                log::warn!("Catalog import row {} failed: {}", row, e);
                summary.errors.push(format!("Row {}: Database error", row));
            }
        }
    }

    log::info!(
        "Catalog import by {}: {} imported, {} skipped, {} errors",
        claims.username, summary.imported, summary.skipped, summary.errors.len()
    );
    audit::audit(
        pool, &claims.sub, "import", "analysis", "-",
        &format!("Imported {} of {} catalog entries", summary.imported, summary.total),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(summary)))
}
