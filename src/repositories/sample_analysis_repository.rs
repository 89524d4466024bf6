// src/repositories/sample_analysis_repository.rs
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{normalize_optional, CrudRepository};
use crate::error::{ApiError, ApiResult};
use crate::handlers::PaginationQuery;
use crate::models::{
    AnalysisStatus, NewSampleAnalysis, SampleAnalysis, SampleAnalysisDetail, UpdateResultRequest,
};

const DETAIL_SELECT: &str = r#"
    SELECT sa.id, sa.sample_id, sa.analysis_id,
           a.analysis_code, a.name AS analysis_name, a.category, a.price,
           sa.result, sa.normal_range, sa.unit, sa.interpretation, sa.notes,
           sa.status, sa.completed_at, sa.validated_at
    FROM sample_analyses sa
    JOIN analyses a ON a.id = sa.analysis_id
"#;

pub struct SampleAnalysisRepository;

impl SampleAnalysisRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn get_by_sample(&self, pool: &SqlitePool, sample_id: &str) -> ApiResult<Vec<SampleAnalysis>> {
        let rows = sqlx::query_as::<_, SampleAnalysis>(
            "SELECT * FROM sample_analyses WHERE sample_id = ? ORDER BY created_at",
        )
            .bind(sample_id)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    /// Results of a sample joined with their catalog entries, ordered for display
    pub async fn details_by_sample(&self, pool: &SqlitePool, sample_id: &str) -> ApiResult<Vec<SampleAnalysisDetail>> {
        let sql = format!("{} WHERE sa.sample_id = ? ORDER BY a.category, a.name", DETAIL_SELECT);
        let rows = sqlx::query_as::<_, SampleAnalysisDetail>(&sql)
            .bind(sample_id)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub async fn statuses_for_sample(&self, pool: &SqlitePool, sample_id: &str) -> ApiResult<Vec<AnalysisStatus>> {
        let statuses = sqlx::query_scalar::<_, AnalysisStatus>(
            "SELECT status FROM sample_analyses WHERE sample_id = ?",
        )
            .bind(sample_id)
            .fetch_all(pool)
            .await?;
        Ok(statuses)
    }

    pub async fn is_attached(&self, pool: &SqlitePool, sample_id: &str, analysis_id: &str) -> ApiResult<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sample_analyses WHERE sample_id = ? AND analysis_id = ?",
        )
            .bind(sample_id)
            .bind(analysis_id)
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn count_by_status(&self, pool: &SqlitePool, status: AnalysisStatus) -> ApiResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sample_analyses WHERE status = ?",
        )
            .bind(status)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

impl Default for SampleAnalysisRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrudRepository<SampleAnalysis, NewSampleAnalysis, UpdateResultRequest> for SampleAnalysisRepository {
    fn table_name(&self) -> &'static str {
        "sample_analyses"
    }

    fn search_fields(&self) -> Vec<&'static str> {
        vec!["result", "interpretation", "notes"]
    }

    fn filters(&self, query: &PaginationQuery) -> Vec<(&'static str, String)> {
        let mut filters = Vec::new();
        if let Some(status) = query.status.as_ref().and_then(|s| s.parse::<AnalysisStatus>().ok()) {
            filters.push(("status", status.to_string()));
        }
        if let Some(ref sample_id) = query.sample_id {
            filters.push(("sample_id", sample_id.clone()));
        }
        filters
    }

    async fn create(&self, pool: &SqlitePool, data: NewSampleAnalysis, _user_id: &str) -> ApiResult<SampleAnalysis> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(r#"
            INSERT INTO sample_analyses
            (id, sample_id, analysis_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
        "#)
            .bind(&id)
            .bind(&data.sample_id)
            .bind(&data.analysis_id)
            .bind(AnalysisStatus::Pending)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;

        self.get_by_id(pool, &id)
            .await?
            .ok_or_else(|| ApiError::InternalServerError("Created result could not be read back".to_string()))
    }

    /// Applies a result entry. Status changes stamp who completed or validated
    /// the result and when; moving back clears the later stamps.
    async fn update(&self, pool: &SqlitePool, id: &str, data: UpdateResultRequest, user_id: &str) -> ApiResult<Option<SampleAnalysis>> {
        let existing = match self.get_by_id(pool, id).await? {
            Some(sa) => sa,
            None => return Ok(None),
        };

        let now = Utc::now();
        let merge = |new: Option<String>, old: Option<String>| match new {
            Some(v) => normalize_optional(Some(v)),
            None => old,
        };

        let result = merge(data.result, existing.result);
        let normal_range = merge(data.normal_range, existing.normal_range);
        let unit = merge(data.unit, existing.unit);
        let interpretation = merge(data.interpretation, existing.interpretation);
        let notes = merge(data.notes, existing.notes);
        let status = data.status.unwrap_or(existing.status);

        let mut technician_id = existing.technician_id;
        let mut validator_id = existing.validator_id;
        let mut completed_at = existing.completed_at;
        let mut validated_at = existing.validated_at;

        if status != existing.status {
            match status {
                AnalysisStatus::Pending | AnalysisStatus::InProgress => {
                    completed_at = None;
                    validated_at = None;
                    validator_id = None;
                }
                AnalysisStatus::Completed => {
                    completed_at = Some(now);
                    technician_id = Some(user_id.to_string());
                    validated_at = None;
                    validator_id = None;
                }
                AnalysisStatus::Validated => {
                    if completed_at.is_none() {
                        completed_at = Some(now);
                        technician_id = technician_id.or_else(|| Some(user_id.to_string()));
                    }
                    validated_at = Some(now);
                    validator_id = Some(user_id.to_string());
                }
            }
        }

        sqlx::query(r#"
            UPDATE sample_analyses SET
            result = ?, normal_range = ?, unit = ?, interpretation = ?, notes = ?, status = ?,
            technician_id = ?, validator_id = ?, completed_at = ?, validated_at = ?, updated_at = ?
            WHERE id = ?
        "#)
            .bind(&result)
            .bind(&normal_range)
            .bind(&unit)
            .bind(&interpretation)
            .bind(&notes)
            .bind(status)
            .bind(&technician_id)
            .bind(&validator_id)
            .bind(completed_at)
            .bind(validated_at)
            .bind(now)
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
    use crate::models::CreateAnalysisRequest;
    use crate::repositories::AnalysisRepository;

    async fn catalog_entry(pool: &SqlitePool, name: &str) -> String {
        AnalysisRepository::new("ANA")
            .create(pool, CreateAnalysisRequest {
                name: name.to_string(),
                description: None,
                category: "Biochimie".to_string(),
                price: 10000.0,
            }, "u1")
            .await
            .unwrap()
            .id
    }

    fn attach(sample_id: &str, analysis_id: &str) -> NewSampleAnalysis {
        NewSampleAnalysis { sample_id: sample_id.to_string(), analysis_id: analysis_id.to_string() }
    }

    #[actix_rt::test]
    async fn test_attach_starts_pending_and_is_unique() {
        let pool = test_pool().await;
        let repo = SampleAnalysisRepository::new();
        let analysis_id = catalog_entry(&pool, "Urée").await;

        let sa = repo.create(&pool, attach("s1", &analysis_id), "u1").await.unwrap();
        assert_eq!(sa.status, AnalysisStatus::Pending);
        assert!(repo.is_attached(&pool, "s1", &analysis_id).await.unwrap());
        assert!(!repo.is_attached(&pool, "s2", &analysis_id).await.unwrap());

        // The unique index backs up the handler-level check
        assert!(repo.create(&pool, attach("s1", &analysis_id), "u1").await.is_err());
    }

    #[actix_rt::test]
    async fn test_status_stamps() {
        let pool = test_pool().await;
        let repo = SampleAnalysisRepository::new();
        let analysis_id = catalog_entry(&pool, "Urée").await;
        let sa = repo.create(&pool, attach("s1", &analysis_id), "u1").await.unwrap();

        let completed = repo.update(&pool, &sa.id, UpdateResultRequest {
            result: Some(" 0.35 ".to_string()),
            unit: Some("g/L".to_string()),
            status: Some(AnalysisStatus::Completed),
            ..Default::default()
        }, "tech").await.unwrap().unwrap();
        assert_eq!(completed.result.as_deref(), Some("0.35"));
        assert_eq!(completed.technician_id.as_deref(), Some("tech"));
        assert!(completed.completed_at.is_some());
        assert!(completed.validated_at.is_none());

        let validated = repo.update(&pool, &sa.id, UpdateResultRequest {
            status: Some(AnalysisStatus::Validated),
            ..Default::default()
        }, "bio").await.unwrap().unwrap();
        assert_eq!(validated.technician_id.as_deref(), Some("tech"));
        assert_eq!(validated.validator_id.as_deref(), Some("bio"));
        assert_eq!(validated.completed_at, completed.completed_at);
        assert!(validated.validated_at.is_some());
        assert_eq!(validated.unit.as_deref(), Some("g/L"));

        let reopened = repo.update(&pool, &sa.id, UpdateResultRequest {
            status: Some(AnalysisStatus::InProgress),
            ..Default::default()
        }, "tech").await.unwrap().unwrap();
        assert!(reopened.completed_at.is_none());
        assert!(reopened.validated_at.is_none());
        assert!(reopened.validator_id.is_none());
    }

    #[actix_rt::test]
    async fn test_details_and_statuses() {
        let pool = test_pool().await;
        let repo = SampleAnalysisRepository::new();
        let a = catalog_entry(&pool, "Urée").await;
        let b = catalog_entry(&pool, "Créatinine").await;
        repo.create(&pool, attach("s1", &a), "u1").await.unwrap();
        let second = repo.create(&pool, attach("s1", &b), "u1").await.unwrap();
        repo.update(&pool, &second.id, UpdateResultRequest {
            status: Some(AnalysisStatus::InProgress),
            ..Default::default()
        }, "u1").await.unwrap();

        let details = repo.details_by_sample(&pool, "s1").await.unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].analysis_name, "Créatinine");

        let mut statuses = repo.statuses_for_sample(&pool, "s1").await.unwrap();
        statuses.sort_by_key(|s| s.to_string());
        assert_eq!(statuses, vec![AnalysisStatus::InProgress, AnalysisStatus::Pending]);
        assert_eq!(repo.count_by_status(&pool, AnalysisStatus::Pending).await.unwrap(), 1);
        assert!(repo.statuses_for_sample(&pool, "unknown").await.unwrap().is_empty());
    }
}
