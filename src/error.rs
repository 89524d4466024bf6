// src/error.rs
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    InternalServerError(String),
    ValidationError(String),
    InvalidFields(HashMap<String, Vec<String>>),
    DatabaseError(sqlx::Error),
    AuthError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse<'a> {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a HashMap<String, Vec<String>>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::InvalidFields(fields) => {
                let mut names: Vec<&String> = fields.keys().collect();
                names.sort();
                let names: Vec<&str> = names.into_iter().map(String::as_str).collect();
                write!(f, "Validation Error: invalid fields: {}", names.join(", "))
            }
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::AuthError(msg) => write!(f, "Auth Error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) | ApiError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ValidationError(_) | ApiError::InvalidFields(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::DatabaseError(_) | ApiError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Do not leak driver messages to clients
        let message = match self {
            ApiError::DatabaseError(err) => {
                log::error!("Database error: {}", err);
                "Database Error".to_string()
            }
            _ => self.to_string(),
        };

        let errors = match self {
            ApiError::InvalidFields(fields) => Some(fields),
            _ => None,
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            success: false,
            message,
            errors,
        })
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut fields: HashMap<String, Vec<String>> = HashMap::new();
        for (field, errors) in err.field_errors() {
            let messages = errors
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            fields.insert(field.to_string(), messages);
        }
        ApiError::InvalidFields(fields)
    }
}

// Laboratory specific errors
impl ApiError {
    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{} not found", entity))
    }

    pub fn patient_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Patient with ID '{}' not found", id))
    }

    pub fn sample_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Sample with ID '{}' not found", id))
    }

    pub fn analysis_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Analysis with ID '{}' not found", id))
    }

    pub fn result_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Sample analysis with ID '{}' not found", id))
    }

    pub fn report_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Report with ID '{}' not found", id))
    }

    pub fn analysis_in_use(code: &str, usage_count: i64) -> Self {
        ApiError::Conflict(format!(
            "Analysis '{}' is used by {} sample(s) and cannot be deleted",
            code, usage_count
        ))
    }

    pub fn analysis_already_attached(analysis_code: &str, sample_code: &str) -> Self {
        ApiError::Conflict(format!(
            "Analysis '{}' is already attached to sample '{}'",
            analysis_code, sample_code
        ))
    }

    pub fn invalid_transition(entity: &str, from: &str, to: &str) -> Self {
        ApiError::Conflict(format!("{} cannot move from {} to {}", entity, from, to))
    }

    pub fn field(field: &str, message: &str) -> Self {
        let mut fields = HashMap::new();
        fields.insert(field.to_string(), vec![message.to_string()]);
        ApiError::InvalidFields(fields)
    }
}
