// src/repositories/patient_repository.rs
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{normalize_optional, CrudRepository};
use crate::config::LabConfig;
use crate::db::next_sequence_value;
use crate::error::{ApiError, ApiResult};
use crate::models::{format_code, CreatePatientRequest, Patient, UpdatePatientRequest};

pub struct PatientRepository {
    code_prefix: String,
}

impl PatientRepository {
    pub fn new(code_prefix: &str) -> Self {
        Self { code_prefix: code_prefix.to_string() }
    }

    pub fn from_config(lab: &LabConfig) -> Self {
        Self::new(&lab.patient_code_prefix)
    }
}

#[async_trait]
impl CrudRepository<Patient, CreatePatientRequest, UpdatePatientRequest> for PatientRepository {
    fn table_name(&self) -> &'static str {
        "patients"
    }

    fn search_fields(&self) -> Vec<&'static str> {
        vec!["patient_code", "last_name", "first_name", "phone", "email"]
    }

    async fn create(&self, pool: &SqlitePool, data: CreatePatientRequest, _user_id: &str) -> ApiResult<Patient> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let code = format_code(&self.code_prefix, next_sequence_value(pool, &self.code_prefix).await?);

        sqlx::query(r#"
            INSERT INTO patients
            (id, patient_code, last_name, first_name, birth_date, sex, phone, email, address,
             created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#)
            .bind(&id)
            .bind(&code)
            .bind(data.last_name.trim())
            .bind(data.first_name.trim())
            .bind(data.birth_date)
            .bind(data.sex)
            .bind(normalize_optional(data.phone))
            .bind(normalize_optional(data.email))
            .bind(normalize_optional(data.address))
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;

        self.get_by_id(pool, &id)
            .await?
            .ok_or_else(|| ApiError::InternalServerError("Created patient could not be read back".to_string()))
    }

    async fn update(&self, pool: &SqlitePool, id: &str, data: UpdatePatientRequest, _user_id: &str) -> ApiResult<Option<Patient>> {
        let existing = match self.get_by_id(pool, id).await? {
            Some(p) => p,
            None => return Ok(None),
        };

        let last_name = data.last_name.map(|v| v.trim().to_string()).unwrap_or(existing.last_name);
        let first_name = data.first_name.map(|v| v.trim().to_string()).unwrap_or(existing.first_name);
        let birth_date = data.birth_date.or(existing.birth_date);
        let sex = data.sex.unwrap_or(existing.sex);
        // An explicit blank clears an optional contact field
        let phone = match data.phone {
            Some(v) => normalize_optional(Some(v)),
            None => existing.phone,
        };
        let email = match data.email {
            Some(v) => normalize_optional(Some(v)),
            None => existing.email,
        };
        let address = match data.address {
            Some(v) => normalize_optional(Some(v)),
            None => existing.address,
        };

        sqlx::query(r#"
            UPDATE patients SET
            last_name = ?, first_name = ?, birth_date = ?, sex = ?,
            phone = ?, email = ?, address = ?, updated_at = ?
            WHERE id = ?
        "#)
            .bind(&last_name)
            .bind(&first_name)
            .bind(birth_date)
            .bind(sex)
            .bind(&phone)
            .bind(&email)
            .bind(&address)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;

        self.get_by_id(pool, id).await
    }
}
