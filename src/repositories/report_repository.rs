// src/repositories/report_repository.rs
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
    format_code, CreateReportRequest, Report, ReportStatus, UpdateReportRequest,
};

pub struct ReportRepository {
    code_prefix: String,
}

impl ReportRepository {
    pub fn new(code_prefix: &str) -> Self {
        Self { code_prefix: code_prefix.to_string() }
    }

    pub fn from_config(lab: &LabConfig) -> Self {
        Self::new(&lab.report_code_prefix)
    }

    pub async fn get_by_patient(&self, pool: &SqlitePool, patient_id: &str) -> ApiResult<Vec<Report>> {
        let reports = sqlx::query_as::<_, Report>(
            "SELECT * FROM reports WHERE patient_id = ? ORDER BY generated_at DESC",
        )
            .bind(patient_id)
            .fetch_all(pool)
            .await?;
        Ok(reports)
    }

    pub async fn get_by_sample(&self, pool: &SqlitePool, sample_id: &str) -> ApiResult<Vec<Report>> {
        let reports = sqlx::query_as::<_, Report>(
            "SELECT * FROM reports WHERE sample_id = ? ORDER BY generated_at DESC",
        )
            .bind(sample_id)
            .fetch_all(pool)
            .await?;
        Ok(reports)
    }

    /// Moves a report one step along DRAFT -> VALIDATED -> DELIVERED.
    /// The caller checks the transition; this only records it.
    pub async fn set_status(
        &self,
        pool: &SqlitePool,
        id: &str,
        status: ReportStatus,
        user_id: &str,
    ) -> ApiResult<Option<Report>> {
        let now = Utc::now();
        let result = match status {
            ReportStatus::Validated => {
                sqlx::query(
                    "UPDATE reports SET status = ?, validated_by = ?, validated_at = ?, updated_at = ? WHERE id = ?",
                )
                    .bind(status)
                    .bind(user_id)
                    .bind(now)
                    .bind(now)
                    .bind(id)
                    .execute(pool)
                    .await?
            }
            ReportStatus::Delivered => {
                sqlx::query(
                    "UPDATE reports SET status = ?, delivered_at = ?, updated_at = ? WHERE id = ?",
                )
                    .bind(status)
                    .bind(now)
                    .bind(now)
                    .bind(id)
                    .execute(pool)
                    .await?
            }
            ReportStatus::Draft => {
                sqlx::query(
                    r#"UPDATE reports SET status = ?, validated_by = NULL, validated_at = NULL,
                       delivered_at = NULL, updated_at = ? WHERE id = ?"#,
                )
                    .bind(status)
                    .bind(now)
                    .bind(id)
                    .execute(pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_id(pool, id).await
    }

    pub async fn count_by_status(&self, pool: &SqlitePool) -> ApiResult<Vec<(ReportStatus, i64)>> {
        let rows = sqlx::query_as::<_, (ReportStatus, i64)>(
            "SELECT status, COUNT(*) FROM reports GROUP BY status",
        )
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl CrudRepository<Report, CreateReportRequest, UpdateReportRequest> for ReportRepository {
    fn table_name(&self) -> &'static str {
        "reports"
    }

    fn search_fields(&self) -> Vec<&'static str> {
        vec!["report_code", "conclusion", "recommendations"]
    }

    fn filters(&self, query: &PaginationQuery) -> Vec<(&'static str, String)> {
        let mut filters = Vec::new();
        if let Some(status) = query.status.as_ref().and_then(|s| s.parse::<ReportStatus>().ok()) {
            filters.push(("status", status.to_string()));
        }
        if let Some(ref patient_id) = query.patient_id {
            filters.push(("patient_id", patient_id.clone()));
        }
        if let Some(ref sample_id) = query.sample_id {
            filters.push(("sample_id", sample_id.clone()));
        }
        filters
    }

    fn default_sort_field(&self) -> &'static str {
        "generated_at"
    }

    async fn create(&self, pool: &SqlitePool, data: CreateReportRequest, user_id: &str) -> ApiResult<Report> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let code = format_code(&self.code_prefix, next_sequence_value(pool, &self.code_prefix).await?);

        sqlx::query(r#"
            INSERT INTO reports
            (id, report_code, patient_id, sample_id, conclusion, recommendations, status,
             generated_by, generated_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#)
            .bind(&id)
            .bind(&code)
            .bind(&data.patient_id)
            .bind(&data.sample_id)
            .bind(normalize_optional(data.conclusion))
            .bind(normalize_optional(data.recommendations))
            .bind(ReportStatus::Draft)
            .bind(user_id)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;

        self.get_by_id(pool, &id)
            .await?
            .ok_or_else(|| ApiError::InternalServerError("Created report could not be read back".to_string()))
    }

    async fn update(&self, pool: &SqlitePool, id: &str, data: UpdateReportRequest, _user_id: &str) -> ApiResult<Option<Report>> {
        let existing = match self.get_by_id(pool, id).await? {
            Some(r) => r,
            None => return Ok(None),
        };

        let conclusion = match data.conclusion {
            Some(v) => normalize_optional(Some(v)),
            None => existing.conclusion,
        };
        let recommendations = match data.recommendations {
            Some(v) => normalize_optional(Some(v)),
            None => existing.recommendations,
        };

        sqlx::query(r#"
            UPDATE reports SET conclusion = ?, recommendations = ?, updated_at = ?
            WHERE id = ?
        "#)
            .bind(&conclusion)
            .bind(&recommendations)
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

    fn request(patient_id: &str, sample_id: &str) -> CreateReportRequest {
        CreateReportRequest {
            patient_id: patient_id.to_string(),
            sample_id: sample_id.to_string(),
            conclusion: Some("Bilan normal".to_string()),
            recommendations: None,
        }
    }

    #[actix_rt::test]
    async fn test_create_is_draft_with_author() {
        let pool = test_pool().await;
        let repo = ReportRepository::new("RAP");
        let report = repo.create(&pool, request("p1", "s1"), "doc").await.unwrap();

        assert_eq!(report.report_code, "RAP000001");
        assert_eq!(report.status, ReportStatus::Draft);
        assert_eq!(report.generated_by, "doc");
        assert!(report.validated_by.is_none());
        assert!(report.delivered_at.is_none());
    }

    #[actix_rt::test]
    async fn test_status_steps_are_stamped() {
        let pool = test_pool().await;
        let repo = ReportRepository::new("RAP");
        let report = repo.create(&pool, request("p1", "s1"), "doc").await.unwrap();

        let validated = repo
            .set_status(&pool, &report.id, ReportStatus::Validated, "bio")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(validated.validated_by.as_deref(), Some("bio"));
        assert!(validated.validated_at.is_some());

        let delivered = repo
            .set_status(&pool, &report.id, ReportStatus::Delivered, "rec")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.status, ReportStatus::Delivered);
        assert_eq!(delivered.validated_by.as_deref(), Some("bio"));
        assert!(delivered.delivered_at.is_some());

        assert!(repo
            .set_status(&pool, "missing", ReportStatus::Validated, "bio")
            .await
            .unwrap()
            .is_none());
    }

    #[actix_rt::test]
    async fn test_update_and_lookups() {
        let pool = test_pool().await;
        let repo = ReportRepository::new("RAP");
        let report = repo.create(&pool, request("p1", "s1"), "doc").await.unwrap();
        repo.create(&pool, request("p2", "s2"), "doc").await.unwrap();

        let update = UpdateReportRequest {
            recommendations: Some("Contrôle dans 3 mois".to_string()),
            ..Default::default()
        };
        let updated = repo.update(&pool, &report.id, update, "doc").await.unwrap().unwrap();
        assert_eq!(updated.conclusion.as_deref(), Some("Bilan normal"));
        assert_eq!(updated.recommendations.as_deref(), Some("Contrôle dans 3 mois"));

        assert_eq!(repo.get_by_patient(&pool, "p1").await.unwrap().len(), 1);
        assert_eq!(repo.get_by_sample(&pool, "s2").await.unwrap().len(), 1);

        let query = PaginationQuery { patient_id: Some("p2".to_string()), ..Default::default() };
        assert_eq!(repo.get_paginated(&pool, &query).await.unwrap().total, 1);
    }
}
