// src/report_handlers.rs
//! Patient reports: drafting, validation, delivery and the printable document.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::audit::{self, describe_update, ChangeSet};
use crate::auth::{get_current_user, require_permission, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginationQuery};
use crate::models::{
    CreateReportRequest, Report, ReportDocument, ReportStatus, UpdateReportRequest,
};
use crate::repositories::{
    CrudRepository, PatientRepository, ReportRepository, SampleAnalysisRepository,
    SampleRepository,
};
use crate::validator::BusinessValidator;

async fn load_report(app_state: &AppState, report_id: &str) -> ApiResult<Report> {
    ReportRepository::from_config(&app_state.config.lab)
        .get_by_id(&app_state.db_pool, report_id)
        .await?
        .ok_or_else(|| ApiError::report_not_found(report_id))
}

/// Moves a report one step forward, refusing anything but the next status
async fn advance(
    app_state: &AppState,
    report_id: &str,
    target: ReportStatus,
    user_id: &str,
) -> ApiResult<(Report, Report)> {
    let report = load_report(app_state, report_id).await?;
    if !report.status.can_transition_to(target) {
        return Err(ApiError::invalid_transition(
            "report",
            report.status.as_ref(),
            target.as_ref(),
        ));
    }

    let updated = ReportRepository::from_config(&app_state.config.lab)
        .set_status(&app_state.db_pool, report_id, target, user_id)
        .await?
        .ok_or_else(|| ApiError::report_not_found(report_id))?;

    Ok((report, updated))
}

pub async fn get_reports(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let page = ReportRepository::from_config(&app_state.config.lab)
        .get_paginated(&app_state.db_pool, &query)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(page)))
}

pub async fn get_report(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let report = load_report(&app_state, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

/// A report is drafted for one sample of one patient once every analysis on
/// that sample has a finished result.
pub async fn create_report(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateReportRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_reports)?;
    request.validate()?;
    let pool = &app_state.db_pool;
    let lab = &app_state.config.lab;

    let patient = PatientRepository::from_config(lab)
        .get_by_id(pool, &request.patient_id)
        .await?
        .ok_or_else(|| ApiError::field("patient_id", "Patient not found"))?;
    let sample = SampleRepository::from_config(lab)
        .get_by_id(pool, &request.sample_id)
        .await?
        .ok_or_else(|| ApiError::field("sample_id", "Sample not found"))?;

    if sample.patient_id != patient.id {
        return Err(ApiError::field(
            "sample_id",
            &format!("Sample {} does not belong to patient {}", sample.sample_code, patient.patient_code),
        ));
    }

    let analyses = SampleAnalysisRepository::new()
        .details_by_sample(pool, &sample.id)
        .await?;
    BusinessValidator::report_readiness(&analyses).into_result()?;

    let report = ReportRepository::from_config(lab)
        .create(pool, request.into_inner(), &claims.sub)
        .await?;

    let mut cs = ChangeSet::new();
    cs.created("report_code", &report.report_code);
    cs.created("patient", &patient.patient_code);
    cs.created("sample", &sample.sample_code);
    audit::audit_with_changes(
        pool, &claims.sub, "create", "report", &report.id,
        &format!("Drafted report {} for sample {}", report.report_code, sample.sample_code),
        &cs, &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        report,
        "Report created successfully".to_string(),
    )))
}

pub async fn update_report(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateReportRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_reports)?;
    request.validate()?;
    let report_id = path.into_inner();

    let old = load_report(&app_state, &report_id).await?;
    if !old.status.is_editable() {
        return Err(ApiError::Conflict(format!(
            "Report {} has been delivered and can no longer be edited",
            old.report_code
        )));
    }

    let updated = ReportRepository::from_config(&app_state.config.lab)
        .update(&app_state.db_pool, &report_id, request.into_inner(), &claims.sub)
        .await?
        .ok_or_else(|| ApiError::report_not_found(&report_id))?;

    let mut cs = ChangeSet::new();
    cs.add_opt("conclusion", &old.conclusion, &updated.conclusion);
    cs.add_opt("recommendations", &old.recommendations, &updated.recommendations);
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "edit", "report", &report_id,
        &describe_update("Report", &updated.report_code, &cs),
        &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

pub async fn delete_report(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_delete_records)?;
    let report_id = path.into_inner();

    let report = load_report(&app_state, &report_id).await?;
    ReportRepository::from_config(&app_state.config.lab)
        .delete(&app_state.db_pool, &report_id)
        .await?;

    let mut cs = ChangeSet::new();
    cs.deleted("report_code", &report.report_code);
    cs.deleted("status", report.status.as_ref());
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "delete", "report", &report_id,
        &format!("Deleted report {}", report.report_code), &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Report deleted successfully".to_string(),
    )))
}

pub async fn validate_report(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_validate_reports)?;
    let report_id = path.into_inner();

    let (old, updated) = advance(&app_state, &report_id, ReportStatus::Validated, &claims.sub).await?;

    let mut cs = ChangeSet::new();
    cs.add("status", old.status.as_ref(), updated.status.as_ref());
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "validate", "report", &report_id,
        &format!("Report {} validated", updated.report_code), &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        updated,
        "Report validated".to_string(),
    )))
}

pub async fn deliver_report(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_deliver_reports)?;
    let report_id = path.into_inner();

    let (old, updated) = advance(&app_state, &report_id, ReportStatus::Delivered, &claims.sub).await?;

    let mut cs = ChangeSet::new();
    cs.add("status", old.status.as_ref(), updated.status.as_ref());
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "deliver", "report", &report_id,
        &format!("Report {} delivered", updated.report_code), &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        updated,
        "Report delivered".to_string(),
    )))
}

pub async fn get_report_document(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let report = load_report(&app_state, &path.into_inner()).await?;
    let pool = &app_state.db_pool;
    let lab = &app_state.config.lab;

    let patient = PatientRepository::from_config(lab).get_by_id(pool, &report.patient_id).await?;
    let sample = SampleRepository::from_config(lab).get_by_id(pool, &report.sample_id).await?;
    let results = SampleAnalysisRepository::new()
        .details_by_sample(pool, &report.sample_id)
        .await?;
    let total_price = results.iter().map(|r| r.price).sum();
    let printed_at = Utc::now();

    Ok(HttpResponse::Ok().json(ApiResponse::success(ReportDocument {
        patient_age: patient.as_ref().and_then(|p| p.age_on(printed_at.date_naive())),
        sex_label: patient.as_ref().map(|p| p.sex.display_name_fr()),
        status_label: report.status.display_name_fr(),
        sample_status_label: sample.as_ref().map(|s| s.status.display_name_fr()),
        report,
        patient,
        sample,
        results,
        total_price,
        currency: lab.currency.clone(),
        printed_at,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::config::Config;
    use crate::db::test_pool;
    use crate::models::{
        AnalysisStatus, CreateAnalysisRequest, CreatePatientRequest, CreateSampleRequest,
        NewSampleAnalysis, Sex, UpdateResultRequest,
    };
    use crate::repositories::AnalysisRepository;
    use actix_web::{http::StatusCode, test, App, HttpMessage};

    fn claims(role: UserRole) -> Claims {
        Claims {
            sub: format!("user-{}", role),
            username: role.to_string().to_lowercase(),
            role,
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
        }
    }

    fn call<R: HttpMessage>(req: R, role: UserRole) -> R {
        req.extensions_mut().insert(claims(role));
        req
    }

    async fn patient(state: &AppState, last_name: &str) -> String {
        PatientRepository::from_config(&state.config.lab).create(&state.db_pool, CreatePatientRequest {
            last_name: last_name.to_string(),
            first_name: "Aminata".to_string(),
            sex: Sex::Female,
            birth_date: None,
            phone: None,
            email: None,
            address: None,
        }, "admin").await.unwrap().id
    }

    async fn sample(state: &AppState, patient_id: &str) -> String {
        SampleRepository::from_config(&state.config.lab).create(&state.db_pool, CreateSampleRequest {
            patient_id: patient_id.to_string(),
            specimen_type: "Urine".to_string(),
            collected_at: Utc::now(),
            remarks: None,
        }, "admin").await.unwrap().id
    }

    async fn attach(state: &AppState, sample_id: &str, name: &str, price: f64) -> String {
        let analysis = AnalysisRepository::from_config(&state.config.lab).create(&state.db_pool, CreateAnalysisRequest {
            name: name.to_string(),
            category: "Biochemistry".to_string(),
            price,
            description: None,
        }, "admin").await.unwrap();
        SampleAnalysisRepository::new().create(&state.db_pool, NewSampleAnalysis {
            sample_id: sample_id.to_string(),
            analysis_id: analysis.id,
        }, "admin").await.unwrap().id
    }

    async fn complete(state: &AppState, result_id: &str) {
        SampleAnalysisRepository::new().update(&state.db_pool, result_id, UpdateResultRequest {
            result: Some("negative".to_string()),
            status: Some(AnalysisStatus::Completed),
            ..Default::default()
        }, "tech").await.unwrap();
    }

    #[actix_rt::test]
    async fn test_report_creation_guards() {
        let state = Arc::new(AppState { db_pool: test_pool().await, config: Config::default() });
        let owner = patient(&state, "Diallo").await;
        let stranger = patient(&state, "Barry").await;
        let sample_id = sample(&state, &owner).await;
        let first = attach(&state, &sample_id, "Creatinine", 3000.0).await;
        let second = attach(&state, &sample_id, "Urea", 2000.0).await;
        complete(&state, &first).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/reports", web::post().to(create_report)),
        ).await;

        let post = |patient_id: &str| {
            let req = test::TestRequest::post()
                .uri("/reports")
                .set_json(serde_json::json!({ "patient_id": patient_id, "sample_id": sample_id }))
                .to_request();
            req.extensions_mut().insert(claims(UserRole::Receptionist));
            req
        };

        // Sample of someone else
        let resp = test::call_service(&app, post(&stranger)).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        // One analysis still pending
        let resp = test::call_service(&app, post(&owner)).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        complete(&state, &second).await;
        let body: serde_json::Value = test::call_and_read_body_json(&app, post(&owner)).await;
        assert_eq!(body["data"]["status"], "DRAFT");
        assert_eq!(body["data"]["generated_by"], "user-RECEPTIONIST");
        assert!(body["data"]["report_code"].as_str().unwrap().starts_with(&state.config.lab.report_code_prefix));
    }

    #[actix_rt::test]
    async fn test_report_lifecycle() {
        let state = Arc::new(AppState { db_pool: test_pool().await, config: Config::default() });
        let owner = patient(&state, "Keita").await;
        let sample_id = sample(&state, &owner).await;
        let result_id = attach(&state, &sample_id, "Proteinuria", 1500.0).await;
        complete(&state, &result_id).await;

        let report = ReportRepository::from_config(&state.config.lab).create(&state.db_pool, CreateReportRequest {
            patient_id: owner.clone(),
            sample_id: sample_id.clone(),
            conclusion: None,
            recommendations: None,
        }, "user-RECEPTIONIST").await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/reports/{id}", web::put().to(update_report))
                .route("/reports/{id}/validate", web::post().to(validate_report))
                .route("/reports/{id}/deliver", web::post().to(deliver_report))
                .route("/reports/{id}/document", web::get().to(get_report_document)),
        ).await;

        // Delivery before validation is refused
        let req = test::TestRequest::post().uri(&format!("/reports/{}/deliver", report.id)).to_request();
        let resp = test::call_service(&app, call(req, UserRole::Receptionist)).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // Receptionists draft but do not validate
        let req = test::TestRequest::post().uri(&format!("/reports/{}/validate", report.id)).to_request();
        let resp = test::call_service(&app, call(req, UserRole::Receptionist)).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post().uri(&format!("/reports/{}/validate", report.id)).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, call(req, UserRole::Validator)).await;
        assert_eq!(body["data"]["status"], "VALIDATED");
        assert_eq!(body["data"]["validated_by"], "user-VALIDATOR");

        let req = test::TestRequest::put()
            .uri(&format!("/reports/{}", report.id))
            .set_json(serde_json::json!({ "conclusion": "No abnormality detected" }))
            .to_request();
        let resp = test::call_service(&app, call(req, UserRole::Validator)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::post().uri(&format!("/reports/{}/deliver", report.id)).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, call(req, UserRole::Receptionist)).await;
        assert_eq!(body["data"]["status"], "DELIVERED");
        assert!(!body["data"]["delivered_at"].is_null());

        // Frozen once delivered
        let req = test::TestRequest::put()
            .uri(&format!("/reports/{}", report.id))
            .set_json(serde_json::json!({ "conclusion": "Changed" }))
            .to_request();
        let resp = test::call_service(&app, call(req, UserRole::Admin)).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get().uri(&format!("/reports/{}/document", report.id)).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, call(req, UserRole::Technician)).await;
        assert_eq!(body["data"]["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["results"][0]["analysis_name"], "Proteinuria");
        assert_eq!(body["data"]["total_price"], 1500.0);
        assert_eq!(body["data"]["currency"], state.config.lab.currency);
        assert_eq!(body["data"]["report"]["conclusion"], "No abnormality detected");
        assert_eq!(body["data"]["status_label"], "Délivré");
        assert_eq!(body["data"]["sex_label"], "Féminin");
        assert!(body["data"]["patient_age"].is_null());
    }
}
