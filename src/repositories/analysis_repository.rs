// src/repositories/analysis_repository.rs
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
    format_code, Analysis, CategoryCount, CreateAnalysisRequest, UpdateAnalysisRequest,
};

pub struct AnalysisRepository {
    code_prefix: String,
}

impl AnalysisRepository {
    pub fn new(code_prefix: &str) -> Self {
        Self { code_prefix: code_prefix.to_string() }
    }

    pub fn from_config(lab: &LabConfig) -> Self {
        Self::new(&lab.analysis_code_prefix)
    }

    /// Number of sample results referencing this catalog entry
    pub async fn usage_count(&self, pool: &SqlitePool, id: &str) -> ApiResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sample_analyses WHERE analysis_id = ?",
        )
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    pub async fn categories(&self, pool: &SqlitePool) -> ApiResult<Vec<CategoryCount>> {
        let rows = sqlx::query_as::<_, CategoryCount>(
            "SELECT category, COUNT(*) AS count FROM analyses GROUP BY category ORDER BY category",
        )
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub async fn find_by_name(&self, pool: &SqlitePool, name: &str) -> ApiResult<Option<Analysis>> {
        let row = sqlx::query_as::<_, Analysis>(
            "SELECT * FROM analyses WHERE lower(name) = lower(?) LIMIT 1",
        )
            .bind(name.trim())
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl CrudRepository<Analysis, CreateAnalysisRequest, UpdateAnalysisRequest> for AnalysisRepository {
    fn table_name(&self) -> &'static str {
        "analyses"
    }

    fn search_fields(&self) -> Vec<&'static str> {
        vec!["analysis_code", "name", "category"]
    }

    fn filters(&self, query: &PaginationQuery) -> Vec<(&'static str, String)> {
        query
            .category
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| ("category", c.trim().to_string()))
            .collect()
    }

    fn default_sort_field(&self) -> &'static str {
        "name"
    }

    async fn list(&self, pool: &SqlitePool) -> ApiResult<Vec<Analysis>> {
        let rows = sqlx::query_as::<_, Analysis>("SELECT * FROM analyses ORDER BY category, name")
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    async fn create(&self, pool: &SqlitePool, data: CreateAnalysisRequest, _user_id: &str) -> ApiResult<Analysis> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let code = format_code(&self.code_prefix, next_sequence_value(pool, &self.code_prefix).await?);

        sqlx::query(r#"
            INSERT INTO analyses
            (id, analysis_code, name, description, category, price, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#)
            .bind(&id)
            .bind(&code)
            .bind(data.name.trim())
            .bind(normalize_optional(data.description))
            .bind(data.category.trim())
            .bind(data.price)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;

        self.get_by_id(pool, &id)
            .await?
            .ok_or_else(|| ApiError::InternalServerError("Created analysis could not be read back".to_string()))
    }

    async fn update(&self, pool: &SqlitePool, id: &str, data: UpdateAnalysisRequest, _user_id: &str) -> ApiResult<Option<Analysis>> {
        let existing = match self.get_by_id(pool, id).await? {
            Some(a) => a,
            None => return Ok(None),
        };

        let name = data.name.map(|v| v.trim().to_string()).unwrap_or(existing.name);
        let description = match data.description {
            Some(v) => normalize_optional(Some(v)),
            None => existing.description,
        };
        let category = data.category.map(|v| v.trim().to_string()).unwrap_or(existing.category);
        let price = data.price.unwrap_or(existing.price);

        sqlx::query(r#"
            UPDATE analyses SET name = ?, description = ?, category = ?, price = ?, updated_at = ?
            WHERE id = ?
        "#)
            .bind(&name)
            .bind(&description)
            .bind(&category)
            .bind(price)
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

    fn request(name: &str, category: &str, price: f64) -> CreateAnalysisRequest {
        CreateAnalysisRequest {
            name: name.to_string(),
            description: None,
            category: category.to_string(),
            price,
        }
    }

    #[actix_rt::test]
    async fn test_create_and_categories() {
        let pool = test_pool().await;
        let repo = AnalysisRepository::new("ANA");

        let nfs = repo.create(&pool, request("NFS", "Hématologie", 50000.0), "u1").await.unwrap();
        repo.create(&pool, request("Glycémie", "Biochimie", 25000.0), "u1").await.unwrap();
        repo.create(&pool, request("Créatinine", "Biochimie", 30000.0), "u1").await.unwrap();

        assert_eq!(nfs.analysis_code, "ANA000001");
        let categories = repo.categories(&pool).await.unwrap();
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].category, "Biochimie");
        assert_eq!(categories[0].count, 2);

        let query = PaginationQuery { category: Some("Biochimie".to_string()), ..Default::default() };
        assert_eq!(repo.get_paginated(&pool, &query).await.unwrap().total, 2);

        assert!(repo.find_by_name(&pool, "nfs").await.unwrap().is_some());
    }

    #[actix_rt::test]
    async fn test_usage_count_starts_at_zero() {
        let pool = test_pool().await;
        let repo = AnalysisRepository::new("ANA");
        let nfs = repo.create(&pool, request("NFS", "Hématologie", 50000.0), "u1").await.unwrap();
        assert_eq!(repo.usage_count(&pool, &nfs.id).await.unwrap(), 0);
    }

    #[actix_rt::test]
    async fn test_update_price() {
        let pool = test_pool().await;
        let repo = AnalysisRepository::new("ANA");
        let nfs = repo.create(&pool, request("NFS", "Hématologie", 50000.0), "u1").await.unwrap();

        let update = UpdateAnalysisRequest { price: Some(55000.0), ..Default::default() };
        let updated = repo.update(&pool, &nfs.id, update, "u1").await.unwrap().unwrap();
        assert_eq!(updated.price, 55000.0);
        assert_eq!(updated.name, "NFS");
        assert_eq!(updated.analysis_code, nfs.analysis_code);
    }
}
