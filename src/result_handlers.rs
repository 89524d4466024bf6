// src/result_handlers.rs - Result entry on attached analyses
use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::audit::{self, ChangeSet};
use crate::auth::{get_current_user, require_permission, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{AnalysisStatus, ResultWithContext, UpdateResultRequest};
use crate::repositories::{
    AnalysisRepository, CrudRepository, PatientRepository, SampleAnalysisRepository,
    SampleRepository,
};
use crate::status_aggregator;
use crate::validator::BusinessValidator;

pub async fn get_result(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let result_id = path.into_inner();
    let pool = &app_state.db_pool;
    let lab = &app_state.config.lab;

    let result = SampleAnalysisRepository::new()
        .get_by_id(pool, &result_id)
        .await?
        .ok_or_else(|| ApiError::result_not_found(&result_id))?;

    let analysis = AnalysisRepository::from_config(lab).get_by_id(pool, &result.analysis_id).await?;
    let sample = SampleRepository::from_config(lab).get_by_id(pool, &result.sample_id).await?;
    let patient = match sample {
        Some(ref s) => PatientRepository::from_config(lab).get_by_id(pool, &s.patient_id).await?,
        None => None,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(ResultWithContext {
        result,
        analysis,
        sample,
        patient,
    })))
}

pub async fn update_result(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateResultRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_enter_results)?;
    request.validate()?;
    let result_id = path.into_inner();
    let pool = &app_state.db_pool;

    if request.status == Some(AnalysisStatus::Validated) && !claims.role.can_validate_results() {
        return Err(ApiError::Forbidden(
            "Validating a result requires the validator role".to_string(),
        ));
    }

    let repo = SampleAnalysisRepository::new();
    let old = repo
        .get_by_id(pool, &result_id)
        .await?
        .ok_or_else(|| ApiError::result_not_found(&result_id))?;

    if old.status == AnalysisStatus::Validated && !claims.role.can_validate_results() {
        return Err(ApiError::Forbidden(
            "Only a validator can change a validated result".to_string(),
        ));
    }

    BusinessValidator::result_entry(&old, &request).into_result()?;

    let updated = repo
        .update(pool, &result_id, request.into_inner(), &claims.sub)
        .await?
        .ok_or_else(|| ApiError::result_not_found(&result_id))?;

    if updated.status != old.status {
        status_aggregator::refresh_sample_status(pool, &updated.sample_id).await?;
    }

    let mut cs = ChangeSet::new();
    cs.add("status", old.status.as_ref(), updated.status.as_ref());
    cs.add_opt("result", &old.result, &updated.result);
    cs.add_opt("normal_range", &old.normal_range, &updated.normal_range);
    cs.add_opt("unit", &old.unit, &updated.unit);
    cs.add_opt("interpretation", &old.interpretation, &updated.interpretation);
    cs.add_opt("notes", &old.notes, &updated.notes);
    let action = if updated.status == AnalysisStatus::Validated && old.status != AnalysisStatus::Validated {
        "validate"
    } else {
        "edit"
    };
    audit::audit_with_changes(
        pool, &claims.sub, action, "result", &result_id,
        &format!("Result {} updated: {}", result_id, cs.to_description()),
        &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

/// Detach an analysis from its sample
pub async fn delete_result(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_attach_analyses)?;
    let result_id = path.into_inner();
    let pool = &app_state.db_pool;

    let repo = SampleAnalysisRepository::new();
    let result = repo
        .get_by_id(pool, &result_id)
        .await?
        .ok_or_else(|| ApiError::result_not_found(&result_id))?;

    if result.status == AnalysisStatus::Validated && !claims.role.can_validate_results() {
        return Err(ApiError::Forbidden(
            "Only a validator can remove a validated result".to_string(),
        ));
    }

    repo.delete(pool, &result_id).await?;
    status_aggregator::refresh_sample_status(pool, &result.sample_id).await?;

    let mut cs = ChangeSet::new();
    cs.deleted("sample_id", &result.sample_id);
    cs.deleted("analysis_id", &result.analysis_id);
    cs.deleted("status", result.status.as_ref());
    audit::audit_with_changes(
        pool, &claims.sub, "detach", "result", &result_id,
        &format!("Analysis removed from sample {}", result.sample_id), &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Analysis removed from sample".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::config::Config;
    use crate::db::test_pool;
    use crate::models::{
        CreateAnalysisRequest, CreatePatientRequest, CreateSampleRequest, NewSampleAnalysis,
        SampleStatus, Sex,
    };
    use actix_web::{http::StatusCode, test, App, HttpMessage};
    use chrono::Utc;

    fn claims(role: UserRole) -> Claims {
        Claims {
            sub: format!("user-{}", role),
            username: role.to_string().to_lowercase(),
            role,
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
        }
    }

    async fn seeded_state() -> (Arc<AppState>, String, String) {
        let state = Arc::new(AppState { db_pool: test_pool().await, config: Config::default() });
        let pool = &state.db_pool;
        let lab = &state.config.lab;

        let patient = PatientRepository::from_config(lab).create(pool, CreatePatientRequest {
            last_name: "Camara".to_string(),
            first_name: "Fatou".to_string(),
            sex: Sex::Female,
            birth_date: None,
            phone: None,
            email: None,
            address: None,
        }, "admin").await.unwrap();
        let sample = SampleRepository::from_config(lab).create(pool, CreateSampleRequest {
            patient_id: patient.id.clone(),
            specimen_type: "Blood".to_string(),
            collected_at: Utc::now(),
            remarks: None,
        }, "admin").await.unwrap();
        let analysis = AnalysisRepository::from_config(lab).create(pool, CreateAnalysisRequest {
            name: "Glycemia".to_string(),
            category: "Biochemistry".to_string(),
            price: 2500.0,
            description: None,
        }, "admin").await.unwrap();
        let result = SampleAnalysisRepository::new().create(pool, NewSampleAnalysis {
            sample_id: sample.id.clone(),
            analysis_id: analysis.id,
        }, "admin").await.unwrap();

        (state, sample.id, result.id)
    }

    async fn sample_status(state: &AppState, sample_id: &str) -> SampleStatus {
        SampleRepository::from_config(&state.config.lab)
            .get_by_id(&state.db_pool, sample_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[actix_rt::test]
    async fn test_result_entry_drives_sample_status() {
        let (state, sample_id, result_id) = seeded_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/results/{id}", web::put().to(update_result)),
        ).await;

        let req = test::TestRequest::put()
            .uri(&format!("/results/{}", result_id))
            .set_json(serde_json::json!({ "status": "IN_PROGRESS" }))
            .to_request();
        req.extensions_mut().insert(claims(UserRole::Technician));
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(sample_status(&state, &sample_id).await, SampleStatus::InProcess);

        // A finished status without a value is rejected
        let req = test::TestRequest::put()
            .uri(&format!("/results/{}", result_id))
            .set_json(serde_json::json!({ "status": "COMPLETED" }))
            .to_request();
        req.extensions_mut().insert(claims(UserRole::Technician));
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let req = test::TestRequest::put()
            .uri(&format!("/results/{}", result_id))
            .set_json(serde_json::json!({ "status": "COMPLETED", "result": "0.95", "unit": "g/L" }))
            .to_request();
        req.extensions_mut().insert(claims(UserRole::Technician));
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "COMPLETED");
        assert_eq!(body["data"]["technician_id"], "user-TECHNICIAN");
        assert_eq!(sample_status(&state, &sample_id).await, SampleStatus::Analyzed);

        // Technicians cannot validate
        let req = test::TestRequest::put()
            .uri(&format!("/results/{}", result_id))
            .set_json(serde_json::json!({ "status": "VALIDATED" }))
            .to_request();
        req.extensions_mut().insert(claims(UserRole::Technician));
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::put()
            .uri(&format!("/results/{}", result_id))
            .set_json(serde_json::json!({ "status": "VALIDATED" }))
            .to_request();
        req.extensions_mut().insert(claims(UserRole::Validator));
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["validator_id"], "user-VALIDATOR");
        assert_eq!(sample_status(&state, &sample_id).await, SampleStatus::Validated);
    }

    #[actix_rt::test]
    async fn test_validated_result_is_locked_for_technicians() {
        let (state, sample_id, result_id) = seeded_state().await;
        SampleAnalysisRepository::new()
            .update(&state.db_pool, &result_id, UpdateResultRequest {
                status: Some(AnalysisStatus::Validated),
                result: Some("0.95".to_string()),
                ..Default::default()
            }, "bio")
            .await
            .unwrap();
        status_aggregator::refresh_sample_status(&state.db_pool, &sample_id).await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/results/{id}", web::put().to(update_result)),
        ).await;

        for body in [
            serde_json::json!({ "result": "9.99" }),
            serde_json::json!({ "status": "COMPLETED" }),
        ] {
            let req = test::TestRequest::put()
                .uri(&format!("/results/{}", result_id))
                .set_json(body)
                .to_request();
            req.extensions_mut().insert(claims(UserRole::Technician));
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        }

        let stored = SampleAnalysisRepository::new()
            .get_by_id(&state.db_pool, &result_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AnalysisStatus::Validated);
        assert_eq!(stored.result.as_deref(), Some("0.95"));
        assert_eq!(sample_status(&state, &sample_id).await, SampleStatus::Validated);

        // A validator may still reopen it
        let req = test::TestRequest::put()
            .uri(&format!("/results/{}", result_id))
            .set_json(serde_json::json!({ "status": "COMPLETED" }))
            .to_request();
        req.extensions_mut().insert(claims(UserRole::Validator));
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(sample_status(&state, &sample_id).await, SampleStatus::Analyzed);
    }

    #[actix_rt::test]
    async fn test_detach_recomputes() {
        let (state, sample_id, result_id) = seeded_state().await;
        SampleAnalysisRepository::new()
            .update(&state.db_pool, &result_id, UpdateResultRequest {
                status: Some(AnalysisStatus::InProgress),
                ..Default::default()
            }, "tech")
            .await
            .unwrap();
        status_aggregator::refresh_sample_status(&state.db_pool, &sample_id).await.unwrap();
        assert_eq!(sample_status(&state, &sample_id).await, SampleStatus::InProcess);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/results/{id}", web::delete().to(delete_result))
                .route("/results/{id}", web::get().to(get_result)),
        ).await;

        let req = test::TestRequest::delete()
            .uri(&format!("/results/{}", result_id))
            .to_request();
        req.extensions_mut().insert(claims(UserRole::Receptionist));
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(sample_status(&state, &sample_id).await, SampleStatus::Received);

        let req = test::TestRequest::get()
            .uri(&format!("/results/{}", result_id))
            .to_request();
        req.extensions_mut().insert(claims(UserRole::Receptionist));
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
