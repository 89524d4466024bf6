// src/auth_handlers.rs - Authentication and user management handlers

use actix_web::{web, HttpRequest, HttpResponse};
use validator::Validate;
use std::sync::Arc;
use serde::Serialize;

use crate::audit;
use crate::handlers::ApiResponse;
use crate::auth::{
    AuthService, User, LoginRequest, ChangePasswordRequest, CreateUserRequest,
    UpdateUserRequest, LoginResponse, UserInfo, UserRole, get_current_user, require_permission,
};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

// ======== PERMISSION LISTING ========

const PERMISSIONS: &[(&str, fn(&UserRole) -> bool)] = &[
    ("manage_users", UserRole::can_manage_users),
    ("manage_patients", UserRole::can_manage_patients),
    ("manage_samples", UserRole::can_manage_samples),
    ("attach_analyses", UserRole::can_attach_analyses),
    ("delete_records", UserRole::can_delete_records),
    ("manage_catalog", UserRole::can_manage_catalog),
    ("enter_results", UserRole::can_enter_results),
    ("validate_results", UserRole::can_validate_results),
    ("manage_reports", UserRole::can_manage_reports),
    ("validate_reports", UserRole::can_validate_reports),
    ("deliver_reports", UserRole::can_deliver_reports),
    ("import_data", UserRole::can_import_data),
    ("export_data", UserRole::can_export_data),
    ("view_metrics", UserRole::can_view_metrics),
];

pub fn get_role_permissions(role: &UserRole) -> Vec<&'static str> {
    PERMISSIONS
        .iter()
        .filter(|(_, check)| check(role))
        .map(|(name, _)| *name)
        .collect()
}

// ======== AUTH ========

pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let invalid = || ApiError::AuthError("Invalid username or password".to_string());

    let user = User::find_by_username(&app_state.db_pool, request.username.trim())
        .await?
        .ok_or_else(invalid)?;

    if !auth_service.verify_password(&request.password, &user.password_hash)? {
        log::warn!("Failed login attempt for {}", user.username);
        return Err(invalid());
    }

    if !user.is_active {
        return Err(ApiError::AuthError("Account is disabled".to_string()));
    }

    user.update_last_login(&app_state.db_pool).await?;
    let token = auth_service.generate_token(&user)?;

    let response = LoginResponse {
        token,
        expires_in: auth_service.token_lifetime_secs(),
        user: user.clone().into(),
    };

    log::info!("User {} logged in successfully", user.username);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Login successful".to_string(),
    )))
}

pub async fn get_profile(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;

    #[derive(Serialize)]
    struct ProfileResponse {
        #[serde(flatten)]
        user: UserInfo,
        permissions: Vec<&'static str>,
    }

    let response = ProfileResponse {
        permissions: get_role_permissions(&user.role),
        user: user.into(),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub async fn change_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<ChangePasswordRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let claims = get_current_user(&http_request)?;

    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;

    user.change_password(
        &app_state.db_pool,
        &request.current_password,
        &request.new_password,
        &auth_service
    ).await?;

    log::info!("User {} changed password", user.username);
    audit::audit(
        &app_state.db_pool, &claims.sub, "change_password", "user", &user.id,
        "Password changed", &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Password changed successfully".to_string(),
    )))
}

// ======== USER MANAGEMENT (ADMIN) ========

pub async fn get_users(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_manage_users)?;

    let users = User::list(&app_state.db_pool).await?;
    let user_infos: Vec<UserInfo> = users.into_iter().map(|u| u.into()).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(user_infos)))
}

pub async fn create_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<CreateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_users)?;
    request.validate()?;

    let user = User::create(&app_state.db_pool, request.into_inner(), &auth_service).await?;

    log::info!("User {} created by {} with role {}", user.username, claims.username, user.role);
    audit::audit(
        &app_state.db_pool, &claims.sub, "create", "user", &user.id,
        &format!("Created user {} ({})", user.username, user.role), &http_request,
    ).await;

    let info: UserInfo = user.into();
    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        info,
        "User created successfully".to_string(),
    )))
}

pub async fn update_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, UserRole::can_manage_users)?;
    request.validate()?;
    let user_id = path.into_inner();

    // An administrator cannot lock themselves out
    if user_id == claims.sub
        && (request.is_active == Some(false)
            || request.role.map(|r| r != UserRole::Admin).unwrap_or(false))
    {
        return Err(ApiError::BadRequest(
            "You cannot deactivate or demote your own account".to_string(),
        ));
    }

    let user = User::update(&app_state.db_pool, &user_id, request.into_inner()).await?;

    audit::audit(
        &app_state.db_pool, &claims.sub, "edit", "user", &user.id,
        &format!("Updated user {} (role {}, active {})", user.username, user.role, user.is_active),
        &http_request,
    ).await;

    let info: UserInfo = user.into();
    Ok(HttpResponse::Ok().json(ApiResponse::success(info)))
}

pub async fn get_roles(http_request: HttpRequest) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;

    #[derive(Serialize)]
    struct RoleInfo {
        id: UserRole,
        name: &'static str,
        description: &'static str,
        permissions: Vec<&'static str>,
    }

    let roles: Vec<RoleInfo> = UserRole::all_roles()
        .into_iter()
        .map(|role| RoleInfo {
            id: role,
            name: role.display_name(),
            description: role.description(),
            permissions: get_role_permissions(&role),
        })
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(roles)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, Config};
    use crate::db::test_pool;
    use actix_web::{test as actix_test, App};

    #[test]
    fn test_permission_listing() {
        let admin = get_role_permissions(&UserRole::Admin);
        assert_eq!(admin.len(), PERMISSIONS.len());

        let tech = get_role_permissions(&UserRole::Technician);
        assert!(tech.contains(&"enter_results"));
        assert!(!tech.contains(&"validate_results"));
        assert!(!tech.contains(&"export_data"));
    }

    #[actix_rt::test]
    async fn test_login_flow() {
        let pool = test_pool().await;
        let auth = Arc::new(AuthService::new(&AuthConfig {
            jwt_secret: "another-test-secret-long-enough-0123456789".to_string(),
            token_expiration_hours: 2,
            bcrypt_cost: 4,
        }));
        User::create(&pool, CreateUserRequest {
            username: "valid1".to_string(),
            full_name: "Ousmane Sylla".to_string(),
            email: "valid1@labo.local".to_string(),
            password: "Secret123".to_string(),
            role: UserRole::Validator,
        }, &auth).await.unwrap();

        let state = Arc::new(AppState { db_pool: pool, config: Config::default() });
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .app_data(web::Data::new(auth))
                .route("/auth/login", web::post().to(login)),
        ).await;

        let req = actix_test::TestRequest::post()
            .uri("/auth/login")
            .set_json(serde_json::json!({ "username": "valid1", "password": "Secret123" }))
            .to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["user"]["role"], "VALIDATOR");
        assert_eq!(body["data"]["expires_in"], 7200);
        assert!(body["data"]["user"].get("password_hash").is_none());

        let req = actix_test::TestRequest::post()
            .uri("/auth/login")
            .set_json(serde_json::json!({ "username": "valid1", "password": "wrong" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::UNAUTHORIZED);
    }
}
