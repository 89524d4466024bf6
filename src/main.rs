// src/main.rs - Laboratory service entry point and routing
use actix_cors::Cors;
use actix_web::http::header;
use actix_web::middleware::{Compress, DefaultHeaders, Logger};
use actix_web::{web, App, HttpServer};
use actix_web_httpauth::middleware::HttpAuthentication;
use anyhow::Context;
use rand::seq::SliceRandom;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{migrate::MigrateDatabase, Sqlite, SqlitePool};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod analysis_handlers;
mod audit;
mod auth;
mod auth_handlers;
mod config;
mod db;
mod error;
mod handlers;
mod import_export;
mod models;
mod monitoring;
mod patient_handlers;
mod report_handlers;
pub mod repositories;
mod result_handlers;
mod sample_handlers;
mod status_aggregator;
pub mod validator;

use auth::{jwt_middleware, AuthService, CreateUserRequest, User, UserRole};
use config::{load_config, Config};
use monitoring::{start_maintenance_tasks, Metrics, RequestLogger};

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
}

// ==================== MAIN ====================

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    setup_logging(&config)?;

    if config.is_production() {
        validate_production_config(&config)?;
    }
    config.print_startup_info();

    setup_database(&config.database.url).await?;
    let pool = create_database_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let auth_service = Arc::new(AuthService::new(&config.auth));
    create_default_admin_if_needed(&pool, &auth_service).await?;

    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        config: config.clone(),
    });

    start_maintenance_tasks(pool.clone(), config.logging.audit_retention_days).await;

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(address = %bind_address, "Starting server");

    let metrics_arc = Arc::new(Metrics::new());
    let metrics = web::Data::new(metrics_arc.clone());
    let server_config = config.server.clone();

    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&config.security.allowed_origins, config.is_production());
        let security_headers = setup_security_headers(&config.security);
        let json_config = web::JsonConfig::default().limit(config.security.max_request_size);

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(metrics_arc.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(metrics.clone())
            .app_data(json_config)
            .configure(configure_routes)
    })
        .keep_alive(Duration::from_secs(server_config.keep_alive))
        .client_request_timeout(Duration::from_secs(server_config.client_timeout))
        .client_disconnect_timeout(Duration::from_secs(server_config.client_shutdown));

    if let Some(workers) = server_config.workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

// ==================== ROUTES ====================

fn configure_routes(cfg: &mut web::ServiceConfig) {
    let auth_middleware = HttpAuthentication::bearer(jwt_middleware);

    cfg
        // Health checks (no auth, except metrics)
        .service(
            web::scope("/health")
                .route("", web::get().to(monitoring::health_check))
                .route("/ready", web::get().to(monitoring::readiness_check))
                .service(
                    web::resource("/metrics")
                        .wrap(HttpAuthentication::bearer(jwt_middleware))
                        .route(web::get().to(monitoring::metrics_endpoint)),
                ),
        )
        // Login is the only public API endpoint
        .service(
            web::scope("/auth")
                .route("/login", web::post().to(auth_handlers::login)),
        )
        .service(
            web::scope("/api/v1")
                .wrap(auth_middleware)
                .service(
                    web::scope("/auth")
                        .route("/profile", web::get().to(auth_handlers::get_profile))
                        .route("/change-password", web::post().to(auth_handlers::change_password))
                        .route("/roles", web::get().to(auth_handlers::get_roles))
                        .route("/users", web::get().to(auth_handlers::get_users))
                        .route("/users", web::post().to(auth_handlers::create_user))
                        .route("/users/{id}", web::put().to(auth_handlers::update_user)),
                )
                .service(
                    web::scope("/dashboard")
                        .route("/stats", web::get().to(handlers::get_dashboard_stats)),
                )
                .service(
                    web::scope("/patients")
                        .route("", web::get().to(patient_handlers::get_patients))
                        .route("", web::post().to(patient_handlers::create_patient))
                        .route("/export", web::get().to(import_export::export_patients))
                        .route("/{id}", web::get().to(patient_handlers::get_patient))
                        .route("/{id}", web::put().to(patient_handlers::update_patient))
                        .route("/{id}", web::delete().to(patient_handlers::delete_patient))
                        .route("/{id}/samples", web::get().to(patient_handlers::get_patient_samples)),
                )
                .service(
                    web::scope("/samples")
                        .route("", web::get().to(sample_handlers::get_samples))
                        .route("", web::post().to(sample_handlers::create_sample))
                        .route("/{id}", web::get().to(sample_handlers::get_sample))
                        .route("/{id}", web::put().to(sample_handlers::update_sample))
                        .route("/{id}", web::delete().to(sample_handlers::delete_sample))
                        .route("/{id}/analyses", web::post().to(sample_handlers::attach_analysis))
                        .route("/{id}/mark-reported", web::post().to(sample_handlers::mark_reported))
                        .route("/{id}/refresh-status", web::post().to(sample_handlers::refresh_status)),
                )
                .service(
                    web::scope("/analyses")
                        .route("", web::get().to(analysis_handlers::get_analyses))
                        .route("", web::post().to(analysis_handlers::create_analysis))
                        .route("/categories", web::get().to(analysis_handlers::get_categories))
                        .route("/export", web::get().to(import_export::export_analyses))
                        .route("/import", web::post().to(import_export::import_analyses))
                        .route("/{id}", web::get().to(analysis_handlers::get_analysis))
                        .route("/{id}", web::put().to(analysis_handlers::update_analysis))
                        .route("/{id}", web::delete().to(analysis_handlers::delete_analysis)),
                )
                .service(
                    web::scope("/results")
                        .route("/{id}", web::get().to(result_handlers::get_result))
                        .route("/{id}", web::put().to(result_handlers::update_result))
                        .route("/{id}", web::delete().to(result_handlers::delete_result)),
                )
                .service(
                    web::scope("/reports")
                        .route("", web::get().to(report_handlers::get_reports))
                        .route("", web::post().to(report_handlers::create_report))
                        .route("/{id}", web::get().to(report_handlers::get_report))
                        .route("/{id}", web::put().to(report_handlers::update_report))
                        .route("/{id}", web::delete().to(report_handlers::delete_report))
                        .route("/{id}/validate", web::post().to(report_handlers::validate_report))
                        .route("/{id}/deliver", web::post().to(report_handlers::deliver_report))
                        .route("/{id}/document", web::get().to(report_handlers::get_report_document)),
                ),
        );
}

// ==================== HELPER FUNCTIONS ====================

pub fn setup_cors(allowed_origins: &[String], is_production: bool) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH, header::CONTENT_DISPOSITION])
        .max_age(3600);

    if allowed_origins.iter().any(|o| o == "*") && !is_production {
        log::warn!("Using wildcard CORS (*) in development mode");
        cors = cors.allow_any_origin();
    } else {
        for origin in allowed_origins.iter().filter(|o| !o.is_empty() && *o != "*") {
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.security.allowed_origins.iter().any(|o| o == "*") {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }
    if env::var("JWT_SECRET").is_err() {
        anyhow::bail!("JWT_SECRET must be set explicitly in production");
    }
    Ok(())
}

async fn setup_database(database_url: &str) -> anyhow::Result<()> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        log::info!("Creating database: {}", database_url);
        Sqlite::create_database(database_url).await?;
    }
    Ok(())
}

async fn create_database_pool(db_config: &config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&db_config.url)
        .with_context(|| format!("Invalid database URL: {}", db_config.url))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.connect_timeout))
        .idle_timeout(Duration::from_secs(db_config.idle_timeout))
        .connect_with(options)
        .await
        .context("Failed to open database pool")?;
    Ok(pool)
}

fn setup_security_headers(config: &config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains",
        ));
    }

    headers
}

/// Twelve characters with at least one uppercase, lowercase and digit
fn generate_admin_password() -> String {
    let mut rng = thread_rng();
    let mut chars: Vec<char> = vec![
        rng.gen_range(b'A'..=b'Z') as char,
        rng.gen_range(b'a'..=b'z') as char,
        rng.gen_range(b'0'..=b'9') as char,
    ];
    chars.extend((&mut rng).sample_iter(&Alphanumeric).take(9).map(char::from));
    chars.shuffle(&mut rng);
    chars.into_iter().collect()
}

async fn create_default_admin_if_needed(pool: &SqlitePool, auth_service: &AuthService) -> anyhow::Result<()> {
    if User::count(pool).await? > 0 {
        return Ok(());
    }

    let generated = env::var("DEFAULT_ADMIN_PASSWORD").is_err();
    let password = env::var("DEFAULT_ADMIN_PASSWORD").unwrap_or_else(|_| generate_admin_password());

    let admin = User::create(pool, CreateUserRequest {
        username: "admin".to_string(),
        full_name: "Administrator".to_string(),
        email: "admin@labo.local".to_string(),
        password: password.clone(),
        role: UserRole::Admin,
    }, auth_service)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create default admin user: {}", e))?;

    log::warn!("Default admin user created: {}", admin.username);
    if generated {
        log::warn!("  Password: {} (generated, change it after the first login)", password);
    }

    Ok(())
}
