// src/repositories/sample_repository.rs
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{normalize_optional, CrudRepository};
use crate::config::LabConfig;
use crate::db::next_sequence_value;
use crate::error::{ApiError, ApiResult};
use crate::handlers::PaginationQuery;
use crate::models::{
    format_code, CreateSampleRequest, Sample, SampleStatus, UpdateSampleRequest,
};

pub struct SampleRepository {
    code_prefix: String,
}

impl SampleRepository {
    pub fn new(code_prefix: &str) -> Self {
        Self { code_prefix: code_prefix.to_string() }
    }

    pub fn from_config(lab: &LabConfig) -> Self {
        Self::new(&lab.sample_code_prefix)
    }

    pub async fn get_by_patient(&self, pool: &SqlitePool, patient_id: &str) -> ApiResult<Vec<Sample>> {
        let samples = sqlx::query_as::<_, Sample>(
            "SELECT * FROM samples WHERE patient_id = ? ORDER BY collected_at DESC",
        )
            .bind(patient_id)
            .fetch_all(pool)
            .await?;
        Ok(samples)
    }

    /// Overwrite the stored status. Returns false when the sample does not exist.
    pub async fn set_status(&self, pool: &SqlitePool, id: &str, status: SampleStatus) -> ApiResult<bool> {
        let result = sqlx::query("UPDATE samples SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_by_status(&self, pool: &SqlitePool) -> ApiResult<Vec<(SampleStatus, i64)>> {
        let rows = sqlx::query_as::<_, (SampleStatus, i64)>(
            "SELECT status, COUNT(*) FROM samples GROUP BY status",
        )
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl CrudRepository<Sample, CreateSampleRequest, UpdateSampleRequest> for SampleRepository {
    fn table_name(&self) -> &'static str {
        "samples"
    }

    fn search_fields(&self) -> Vec<&'static str> {
        vec!["sample_code", "specimen_type", "remarks"]
    }

    fn filters(&self, query: &PaginationQuery) -> Vec<(&'static str, String)> {
        let mut filters = Vec::new();
        if let Some(status) = query.status.as_ref().and_then(|s| s.parse::<SampleStatus>().ok()) {
            filters.push(("status", status.to_string()));
        }
        if let Some(ref patient_id) = query.patient_id {
            filters.push(("patient_id", patient_id.clone()));
        }
        filters
    }

    fn default_sort_field(&self) -> &'static str {
        "collected_at"
    }

    async fn create(&self, pool: &SqlitePool, data: CreateSampleRequest, _user_id: &str) -> ApiResult<Sample> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let code = format_code(&self.code_prefix, next_sequence_value(pool, &self.code_prefix).await?);

        sqlx::query(r#"
            INSERT INTO samples
            (id, sample_code, patient_id, specimen_type, collected_at, status, remarks,
             created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#)
            .bind(&id)
            .bind(&code)
            .bind(&data.patient_id)
            .bind(data.specimen_type.trim())
            .bind(data.collected_at)
            .bind(SampleStatus::Received)
            .bind(normalize_optional(data.remarks))
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;

        self.get_by_id(pool, &id)
            .await?
            .ok_or_else(|| ApiError::InternalServerError("Created sample could not be read back".to_string()))
    }

    async fn update(&self, pool: &SqlitePool, id: &str, data: UpdateSampleRequest, _user_id: &str) -> ApiResult<Option<Sample>> {
        let existing = match self.get_by_id(pool, id).await? {
            Some(s) => s,
            None => return Ok(None),
        };

        let specimen_type = data.specimen_type
            .map(|v| v.trim().to_string())
            .unwrap_or(existing.specimen_type);
        let collected_at = data.collected_at.unwrap_or(existing.collected_at);
        let remarks = match data.remarks {
            Some(v) => normalize_optional(Some(v)),
            None => existing.remarks,
        };

        sqlx::query(r#"
            UPDATE samples SET specimen_type = ?, collected_at = ?, remarks = ?, updated_at = ?
            WHERE id = ?
        "#)
            .bind(&specimen_type)
            .bind(collected_at)
            .bind(&remarks)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;

        self.get_by_id(pool, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn request(patient_id: &str) -> CreateSampleRequest {
        CreateSampleRequest {
            patient_id: patient_id.to_string(),
            specimen_type: "Sang veineux".to_string(),
            collected_at: Utc::now(),
            remarks: None,
        }
    }

    #[actix_rt::test]
    async fn test_new_sample_is_received() {
        let pool = test_pool().await;
        let repo = SampleRepository::new("ECH");
        let sample = repo.create(&pool, request("p1"), "u1").await.unwrap();
        assert_eq!(sample.status, SampleStatus::Received);
        assert_eq!(sample.sample_code, "ECH000001");
    }

    #[actix_rt::test]
    async fn test_set_status_and_missing_sample() {
        let pool = test_pool().await;
        let repo = SampleRepository::new("ECH");
        let sample = repo.create(&pool, request("p1"), "u1").await.unwrap();

        assert!(repo.set_status(&pool, &sample.id, SampleStatus::Analyzed).await.unwrap());
        let reloaded = repo.get_by_id(&pool, &sample.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SampleStatus::Analyzed);

        assert!(!repo.set_status(&pool, "missing", SampleStatus::Analyzed).await.unwrap());
    }

    #[actix_rt::test]
    async fn test_update_never_touches_status() {
        let pool = test_pool().await;
        let repo = SampleRepository::new("ECH");
        let sample = repo.create(&pool, request("p1"), "u1").await.unwrap();
        repo.set_status(&pool, &sample.id, SampleStatus::InProcess).await.unwrap();

        let update = UpdateSampleRequest {
            specimen_type: Some("Urine".to_string()),
            ..Default::default()
        };
        let updated = repo.update(&pool, &sample.id, update, "u1").await.unwrap().unwrap();
        assert_eq!(updated.specimen_type, "Urine");
        assert_eq!(updated.status, SampleStatus::InProcess);
    }

    #[actix_rt::test]
    async fn test_filters_by_patient_and_status() {
        let pool = test_pool().await;
        let repo = SampleRepository::new("ECH");
        let a = repo.create(&pool, request("p1"), "u1").await.unwrap();
        repo.create(&pool, request("p1"), "u1").await.unwrap();
        repo.create(&pool, request("p2"), "u1").await.unwrap();
        repo.set_status(&pool, &a.id, SampleStatus::Validated).await.unwrap();

        assert_eq!(repo.get_by_patient(&pool, "p1").await.unwrap().len(), 2);

        let query = PaginationQuery {
            status: Some("validated".to_string()),
            ..Default::default()
        };
        let page = repo.get_paginated(&pool, &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].id, a.id);

        let counts = repo.count_by_status(&pool).await.unwrap();
        assert!(counts.contains(&(SampleStatus::Received, 2)));
        assert!(counts.contains(&(SampleStatus::Validated, 1)));
    }
}
