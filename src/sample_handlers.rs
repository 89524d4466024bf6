// src/sample_handlers.rs
use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::audit::{self, describe_update, ChangeSet};
use crate::auth::{get_current_user, require_permission, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginationQuery};
use crate::models::{
    AttachAnalysisRequest, CreateSampleRequest, NewSampleAnalysis, SampleWithDetails,
    UpdateSampleRequest,
};
use crate::repositories::{
    AnalysisRepository, CrudRepository, PatientRepository, SampleAnalysisRepository,
    SampleRepository,
};
use crate::status_aggregator::{self, RefreshOutcome};
use crate::validator::CustomValidate;

/// Sample with its patient and every attached analysis
pub async fn load_sample_details(app_state: &AppState, sample_id: &str) -> ApiResult<SampleWithDetails> {
    let pool = &app_state.db_pool;
    let sample = SampleRepository::from_config(&app_state.config.lab)
        .get_by_id(pool, sample_id)
        .await?
        .ok_or_else(|| ApiError::sample_not_found(sample_id))?;

    let patient = PatientRepository::from_config(&app_state.config.lab)
        .get_by_id(pool, &sample.patient_id)
        .await?;
    let analyses = SampleAnalysisRepository::new()
        .details_by_sample(pool, sample_id)
        .await?;

    Ok(SampleWithDetails { sample, patient, analyses })
}

pub async fn get_samples(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let page = SampleRepository::from_config(&app_state.config.lab)
        .get_paginated(&app_state.db_pool, &query)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(page)))
}

pub async fn get_sample(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let details = load_sample_details(&app_state, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(details)))
}

pub async fn create_sample(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateSampleRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_samples)?;
    request.validate()?;
    request.custom_validate().into_result()?;

    let patient = PatientRepository::from_config(&app_state.config.lab)
        .get_by_id(&app_state.db_pool, &request.patient_id)
        .await?
        .ok_or_else(|| ApiError::field("patient_id", "Patient not found"))?;

    let sample = SampleRepository::from_config(&app_state.config.lab)
        .create(&app_state.db_pool, request.into_inner(), &claims.sub)
        .await?;

    let mut cs = ChangeSet::new();
    cs.created("sample_code", &sample.sample_code);
    cs.created("patient", &patient.patient_code);
    cs.created("specimen_type", &sample.specimen_type);
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "create", "sample", &sample.id,
        &format!("Created sample {} for {}", sample.sample_code, patient.patient_code),
        &cs, &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        sample,
        "Sample created successfully".to_string(),
    )))
}

pub async fn update_sample(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateSampleRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_samples)?;
    request.validate()?;
    request.custom_validate().into_result()?;
    let sample_id = path.into_inner();

    let repo = SampleRepository::from_config(&app_state.config.lab);
    let old = repo
        .get_by_id(&app_state.db_pool, &sample_id)
        .await?
        .ok_or_else(|| ApiError::sample_not_found(&sample_id))?;

    let updated = repo
        .update(&app_state.db_pool, &sample_id, request.into_inner(), &claims.sub)
        .await?
        .ok_or_else(|| ApiError::sample_not_found(&sample_id))?;

    let mut cs = ChangeSet::new();
    cs.add("specimen_type", &old.specimen_type, &updated.specimen_type);
    cs.add("collected_at", &old.collected_at.to_rfc3339(), &updated.collected_at.to_rfc3339());
    cs.add_opt("remarks", &old.remarks, &updated.remarks);
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "edit", "sample", &sample_id,
        &describe_update("Sample", &updated.sample_code, &cs),
        &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

pub async fn delete_sample(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_delete_records)?;
    let sample_id = path.into_inner();

    let repo = SampleRepository::from_config(&app_state.config.lab);
    let sample = repo
        .get_by_id(&app_state.db_pool, &sample_id)
        .await?
        .ok_or_else(|| ApiError::sample_not_found(&sample_id))?;

    let results = SampleAnalysisRepository::new()
        .get_by_sample(&app_state.db_pool, &sample_id)
        .await?;
    if !results.is_empty() {
        log::warn!(
            "Deleting sample {} leaves {} result(s) without a sample",
            sample.sample_code, results.len()
        );
    }

    repo.delete(&app_state.db_pool, &sample_id).await?;

    let mut cs = ChangeSet::new();
    cs.deleted("sample_code", &sample.sample_code);
    cs.deleted("status", sample.status.as_ref());
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "delete", "sample", &sample_id,
        &format!("Deleted sample {}", sample.sample_code), &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Sample deleted successfully".to_string(),
    )))
}

/// Attach a catalog analysis to a sample as a new PENDING result
pub async fn attach_analysis(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<AttachAnalysisRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_attach_analyses)?;
    request.validate()?;
    let sample_id = path.into_inner();
    let pool = &app_state.db_pool;

    let sample = SampleRepository::from_config(&app_state.config.lab)
        .get_by_id(pool, &sample_id)
        .await?
        .ok_or_else(|| ApiError::sample_not_found(&sample_id))?;

    let analysis = AnalysisRepository::from_config(&app_state.config.lab)
        .get_by_id(pool, &request.analysis_id)
        .await?
        .ok_or_else(|| ApiError::field("analysis_id", "Analysis not found in catalog"))?;

    let results = SampleAnalysisRepository::new();
    if results.is_attached(pool, &sample_id, &analysis.id).await? {
        return Err(ApiError::analysis_already_attached(&analysis.analysis_code, &sample.sample_code));
    }

    let created = results
        .create(pool, NewSampleAnalysis { sample_id: sample_id.clone(), analysis_id: analysis.id.clone() }, &claims.sub)
        .await?;

    status_aggregator::refresh_sample_status(pool, &sample_id).await?;

    audit::audit(
        pool, &claims.sub, "attach", "sample", &sample_id,
        &format!("Analysis {} added to sample {}", analysis.analysis_code, sample.sample_code),
        &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        created,
        format!("Analysis {} added to sample {}", analysis.analysis_code, sample.sample_code),
    )))
}

pub async fn mark_reported(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_deliver_reports)?;
    let sample_id = path.into_inner();

    let sample = status_aggregator::mark_reported(&app_state.db_pool, &sample_id).await?;

    audit::audit(
        &app_state.db_pool, &claims.sub, "mark_reported", "sample", &sample_id,
        &format!("Sample {} marked as reported", sample.sample_code), &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(sample)))
}

pub async fn refresh_status(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let sample_id = path.into_inner();

    let outcome = status_aggregator::refresh_sample_status(&app_state.db_pool, &sample_id).await?;
    if outcome == RefreshOutcome::SampleMissing {
        return Err(ApiError::sample_not_found(&sample_id));
    }

    let sample = SampleRepository::from_config(&app_state.config.lab)
        .get_by_id(&app_state.db_pool, &sample_id)
        .await?
        .ok_or_else(|| ApiError::sample_not_found(&sample_id))?;

    let message = if outcome.changed() {
        format!("Status updated to {}", sample.status)
    } else {
        "Status already up to date".to_string()
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(sample, message)))
}
