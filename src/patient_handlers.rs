// src/patient_handlers.rs
use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::audit::{self, describe_update, ChangeSet};
use crate::auth::{get_current_user, require_permission, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginationQuery};
use crate::models::{CreatePatientRequest, UpdatePatientRequest};
use crate::repositories::{CrudRepository, PatientRepository, SampleRepository};
use crate::validator::CustomValidate;

pub async fn get_patients(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let repo = PatientRepository::from_config(&app_state.config.lab);
    let page = repo.get_paginated(&app_state.db_pool, &query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(page)))
}

pub async fn get_patient(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let patient_id = path.into_inner();
    let patient = PatientRepository::from_config(&app_state.config.lab)
        .get_by_id(&app_state.db_pool, &patient_id)
        .await?
        .ok_or_else(|| ApiError::patient_not_found(&patient_id))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(patient)))
}

pub async fn create_patient(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreatePatientRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_patients)?;
    request.validate()?;
    request.custom_validate().into_result()?;

    let repo = PatientRepository::from_config(&app_state.config.lab);
    let patient = repo.create(&app_state.db_pool, request.into_inner(), &claims.sub).await?;

    let mut cs = ChangeSet::new();
    cs.created("patient_code", &patient.patient_code);
    cs.created("name", &patient.full_name());
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "create", "patient", &patient.id,
        &format!("Created patient {}", patient.patient_code), &cs, &http_request,
    ).await;
    log::info!("Patient {} registered by {}", patient.patient_code, claims.username);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        patient,
        "Patient created successfully".to_string(),
    )))
}

pub async fn update_patient(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdatePatientRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_patients)?;
    request.validate()?;
    request.custom_validate().into_result()?;
    let patient_id = path.into_inner();

    let repo = PatientRepository::from_config(&app_state.config.lab);
    let old = repo
        .get_by_id(&app_state.db_pool, &patient_id)
        .await?
        .ok_or_else(|| ApiError::patient_not_found(&patient_id))?;

    let updated = repo
        .update(&app_state.db_pool, &patient_id, request.into_inner(), &claims.sub)
        .await?
        .ok_or_else(|| ApiError::patient_not_found(&patient_id))?;

    let mut cs = ChangeSet::new();
    cs.add("last_name", &old.last_name, &updated.last_name);
    cs.add("first_name", &old.first_name, &updated.first_name);
    cs.add("sex", old.sex.as_ref(), updated.sex.as_ref());
    cs.add_opt(
        "birth_date",
        &old.birth_date.map(|d| d.to_string()),
        &updated.birth_date.map(|d| d.to_string()),
    );
    cs.add_opt("phone", &old.phone, &updated.phone);
    cs.add_opt("email", &old.email, &updated.email);
    cs.add_opt("address", &old.address, &updated.address);
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "edit", "patient", &patient_id,
        &describe_update("Patient", &updated.patient_code, &cs),
        &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

pub async fn delete_patient(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_delete_records)?;
    let patient_id = path.into_inner();

    let repo = PatientRepository::from_config(&app_state.config.lab);
    let patient = repo
        .get_by_id(&app_state.db_pool, &patient_id)
        .await?
        .ok_or_else(|| ApiError::patient_not_found(&patient_id))?;

    let samples = SampleRepository::from_config(&app_state.config.lab)
        .get_by_patient(&app_state.db_pool, &patient_id)
        .await?;
    if !samples.is_empty() {
        log::warn!(
            "Deleting patient {} leaves {} sample(s) without a patient",
            patient.patient_code, samples.len()
        );
    }

    repo.delete(&app_state.db_pool, &patient_id).await?;

    let mut cs = ChangeSet::new();
    cs.deleted("patient_code", &patient.patient_code);
    cs.deleted("name", &patient.full_name());
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "delete", "patient", &patient_id,
        &format!("Deleted patient {}", patient.patient_code), &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Patient deleted successfully".to_string(),
    )))
}

pub async fn get_patient_samples(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let patient_id = path.into_inner();

    PatientRepository::from_config(&app_state.config.lab)
        .get_by_id(&app_state.db_pool, &patient_id)
        .await?
        .ok_or_else(|| ApiError::patient_not_found(&patient_id))?;

    let samples = SampleRepository::from_config(&app_state.config.lab)
        .get_by_patient(&app_state.db_pool, &patient_id)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(samples)))
}
