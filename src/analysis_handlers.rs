// src/analysis_handlers.rs - Analysis catalog
use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::audit::{self, describe_update, ChangeSet};
use crate::auth::{get_current_user, require_permission, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginationQuery};
use crate::models::{AnalysisWithUsage, CreateAnalysisRequest, UpdateAnalysisRequest};
use crate::repositories::{AnalysisRepository, CrudRepository};
use crate::validator::CustomValidate;

pub async fn get_analyses(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let page = AnalysisRepository::from_config(&app_state.config.lab)
        .get_paginated(&app_state.db_pool, &query)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(page)))
}

pub async fn get_analysis(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let analysis_id = path.into_inner();
    let repo = AnalysisRepository::from_config(&app_state.config.lab);

    let analysis = repo
        .get_by_id(&app_state.db_pool, &analysis_id)
        .await?
        .ok_or_else(|| ApiError::analysis_not_found(&analysis_id))?;
    let usage_count = repo.usage_count(&app_state.db_pool, &analysis_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(AnalysisWithUsage { analysis, usage_count })))
}

pub async fn get_categories(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let categories = AnalysisRepository::from_config(&app_state.config.lab)
        .categories(&app_state.db_pool)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(categories)))
}

pub async fn create_analysis(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateAnalysisRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_catalog)?;
    request.validate()?;
    request.custom_validate().into_result()?;

    let repo = AnalysisRepository::from_config(&app_state.config.lab);
    if let Some(existing) = repo.find_by_name(&app_state.db_pool, &request.name).await? {
        return Err(ApiError::Conflict(format!(
            "An analysis named '{}' already exists ({})",
            existing.name, existing.analysis_code
        )));
    }

    let analysis = repo.create(&app_state.db_pool, request.into_inner(), &claims.sub).await?;

    let mut cs = ChangeSet::new();
    cs.created("analysis_code", &analysis.analysis_code);
    cs.created("name", &analysis.name);
    cs.created("category", &analysis.category);
    cs.created("price", &analysis.price.to_string());
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "create", "analysis", &analysis.id,
        &format!("Created analysis {}", analysis.analysis_code), &cs, &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        analysis,
        "Analysis created successfully".to_string(),
    )))
}

pub async fn update_analysis(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateAnalysisRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_catalog)?;
    request.validate()?;
    request.custom_validate().into_result()?;
    let analysis_id = path.into_inner();

    let repo = AnalysisRepository::from_config(&app_state.config.lab);
    let old = repo
        .get_by_id(&app_state.db_pool, &analysis_id)
        .await?
        .ok_or_else(|| ApiError::analysis_not_found(&analysis_id))?;

    if let Some(ref name) = request.name {
        if let Some(other) = repo.find_by_name(&app_state.db_pool, name).await? {
            if other.id != analysis_id {
                return Err(ApiError::Conflict(format!(
                    "An analysis named '{}' already exists ({})",
                    other.name, other.analysis_code
                )));
            }
        }
    }

    let updated = repo
        .update(&app_state.db_pool, &analysis_id, request.into_inner(), &claims.sub)
        .await?
        .ok_or_else(|| ApiError::analysis_not_found(&analysis_id))?;

    let mut cs = ChangeSet::new();
    cs.add("name", &old.name, &updated.name);
    cs.add("category", &old.category, &updated.category);
    cs.add("price", &old.price.to_string(), &updated.price.to_string());
    cs.add_opt("description", &old.description, &updated.description);
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "edit", "analysis", &analysis_id,
        &describe_update("Analysis", &updated.analysis_code, &cs),
        &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

/// Catalog entries referenced by any sample cannot be removed
pub async fn delete_analysis(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_catalog)?;
    let analysis_id = path.into_inner();

    let repo = AnalysisRepository::from_config(&app_state.config.lab);
    let analysis = repo
        .get_by_id(&app_state.db_pool, &analysis_id)
        .await?
        .ok_or_else(|| ApiError::analysis_not_found(&analysis_id))?;

    let usage = AnalysisWithUsage {
        usage_count: repo.usage_count(&app_state.db_pool, &analysis_id).await?,
        analysis,
    };
    if !usage.can_delete() {
        return Err(ApiError::analysis_in_use(&usage.analysis.analysis_code, usage.usage_count));
    }
    let analysis = usage.analysis;

    repo.delete(&app_state.db_pool, &analysis_id).await?;

    let mut cs = ChangeSet::new();
    cs.deleted("analysis_code", &analysis.analysis_code);
    cs.deleted("name", &analysis.name);
    audit::audit_with_changes(
        &app_state.db_pool, &claims.sub, "delete", "analysis", &analysis_id,
        &format!("Deleted analysis {}", analysis.analysis_code), &cs, &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Analysis deleted successfully".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::config::Config;
    use crate::db::test_pool;
    use crate::models::{CreatePatientRequest, CreateSampleRequest, NewSampleAnalysis, Sex};
    use crate::repositories::{PatientRepository, SampleAnalysisRepository, SampleRepository};
    use actix_web::{http::StatusCode, test, App, HttpMessage};
    use chrono::Utc;

    fn admin() -> Claims {
        Claims {
            sub: "admin-1".to_string(),
            username: "admin".to_string(),
            role: UserRole::Admin,
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
        }
    }

    fn new_analysis(name: &str) -> CreateAnalysisRequest {
        CreateAnalysisRequest {
            name: name.to_string(),
            category: "Hematology".to_string(),
            price: 5000.0,
            description: None,
        }
    }

    #[actix_rt::test]
    async fn test_delete_rejected_while_in_use() {
        let state = Arc::new(AppState { db_pool: test_pool().await, config: Config::default() });
        let pool = &state.db_pool;
        let lab = &state.config.lab;

        let repo = AnalysisRepository::from_config(lab);
        let used = repo.create(pool, new_analysis("Blood count"), "admin").await.unwrap();
        let unused = repo.create(pool, new_analysis("Sedimentation rate"), "admin").await.unwrap();

        let patient = PatientRepository::from_config(lab).create(pool, CreatePatientRequest {
            last_name: "Conde".to_string(),
            first_name: "Aissatou".to_string(),
            sex: Sex::Female,
            birth_date: None,
            phone: None,
            email: None,
            address: None,
        }, "admin").await.unwrap();
        let sample = SampleRepository::from_config(lab).create(pool, CreateSampleRequest {
            patient_id: patient.id,
            specimen_type: "Blood".to_string(),
            collected_at: Utc::now(),
            remarks: None,
        }, "admin").await.unwrap();
        SampleAnalysisRepository::new().create(pool, NewSampleAnalysis {
            sample_id: sample.id,
            analysis_id: used.id.clone(),
        }, "admin").await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/analyses/{id}", web::get().to(get_analysis))
                .route("/analyses/{id}", web::delete().to(delete_analysis)),
        ).await;

        let req = test::TestRequest::get().uri(&format!("/analyses/{}", used.id)).to_request();
        req.extensions_mut().insert(admin());
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["usage_count"], 1);

        let req = test::TestRequest::delete().uri(&format!("/analyses/{}", used.id)).to_request();
        req.extensions_mut().insert(admin());
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(repo.get_by_id(pool, &used.id).await.unwrap().is_some());

        let req = test::TestRequest::delete().uri(&format!("/analyses/{}", unused.id)).to_request();
        req.extensions_mut().insert(admin());
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(repo.get_by_id(pool, &unused.id).await.unwrap().is_none());

        let req = test::TestRequest::delete().uri(&format!("/analyses/{}", unused.id)).to_request();
        req.extensions_mut().insert(admin());
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn test_catalog_names_are_unique() {
        let state = Arc::new(AppState { db_pool: test_pool().await, config: Config::default() });
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/analyses", web::post().to(create_analysis))
                .route("/analyses/{id}", web::put().to(update_analysis)),
        ).await;

        let req = test::TestRequest::post()
            .uri("/analyses")
            .set_json(serde_json::json!({ "name": "TSH", "category": "Hormonology", "price": 12000.0 }))
            .to_request();
        req.extensions_mut().insert(admin());
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["analysis_code"], "ANA000001");

        let req = test::TestRequest::post()
            .uri("/analyses")
            .set_json(serde_json::json!({ "name": "TSH", "category": "Hormonology", "price": 9000.0 }))
            .to_request();
        req.extensions_mut().insert(admin());
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let other = AnalysisRepository::from_config(&state.config.lab)
            .create(&state.db_pool, new_analysis("T4"), "admin")
            .await
            .unwrap();
        let req = test::TestRequest::put()
            .uri(&format!("/analyses/{}", other.id))
            .set_json(serde_json::json!({ "name": "TSH" }))
            .to_request();
        req.extensions_mut().insert(admin());
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
