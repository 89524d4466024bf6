// src/repositories/mod.rs
//! Record store: one repository per entity behind a common CRUD trait.
//!
//! Repositories never hold a connection; the pool is passed to every call so
//! that handlers, background tasks and tests all decide which database they
//! talk to.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::ApiResult;
use crate::handlers::{PaginatedResponse, PaginationQuery};

pub mod analysis_repository;
pub mod patient_repository;
pub mod report_repository;
pub mod sample_analysis_repository;
pub mod sample_repository;

pub use analysis_repository::AnalysisRepository;
pub use patient_repository::PatientRepository;
pub use report_repository::ReportRepository;
pub use sample_analysis_repository::SampleAnalysisRepository;
pub use sample_repository::SampleRepository;

/// Escape LIKE wildcards so user search text is matched literally
pub fn escape_like_pattern(pattern: &str) -> String {
    pattern
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Empty or whitespace-only strings become `None`, others are trimmed.
pub fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Base trait for CRUD operations
#[async_trait]
pub trait CrudRepository<T, CreateDto, UpdateDto>: Send + Sync
where
    T: Serialize + Send + Unpin + for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow>,
    CreateDto: Send + 'static,
    UpdateDto: Send + 'static,
{
    /// Table name in the database
    fn table_name(&self) -> &'static str;

    /// Primary key column
    fn id_field(&self) -> &'static str {
        "id"
    }

    /// Columns matched by free-text search
    fn search_fields(&self) -> Vec<&'static str> {
        vec![]
    }

    /// Exact-match filters taken from the query string
    fn filters(&self, _query: &PaginationQuery) -> Vec<(&'static str, String)> {
        vec![]
    }

    /// Default sort column
    fn default_sort_field(&self) -> &'static str {
        "created_at"
    }

    async fn create(&self, pool: &SqlitePool, data: CreateDto, user_id: &str) -> ApiResult<T>;

    /// Partial update; `None` when no record has this id
    async fn update(&self, pool: &SqlitePool, id: &str, data: UpdateDto, user_id: &str) -> ApiResult<Option<T>>;

    async fn list(&self, pool: &SqlitePool) -> ApiResult<Vec<T>> {
        let query = format!(
            "SELECT * FROM {} ORDER BY {} DESC",
            self.table_name(),
            self.default_sort_field()
        );

        let rows = sqlx::query_as::<_, T>(&query)
            .fetch_all(pool)
            .await?;

        Ok(rows)
    }

    async fn get_by_id(&self, pool: &SqlitePool, id: &str) -> ApiResult<Option<T>> {
        let query = format!(
            "SELECT * FROM {} WHERE {} = ?",
            self.table_name(),
            self.id_field()
        );

        let result = sqlx::query_as::<_, T>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(result)
    }

    /// Returns whether a record was removed. Never cascades.
    async fn delete(&self, pool: &SqlitePool, id: &str) -> ApiResult<bool> {
        let query = format!(
            "DELETE FROM {} WHERE {} = ?",
            self.table_name(),
            self.id_field()
        );

        let result = sqlx::query(&query)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, pool: &SqlitePool) -> ApiResult<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", self.table_name());
        let total = sqlx::query_scalar::<_, i64>(&query)
            .fetch_one(pool)
            .await?;
        Ok(total)
    }

    /// Paginated listing with free-text search and exact filters
    async fn get_paginated(
        &self,
        pool: &SqlitePool,
        query: &PaginationQuery,
    ) -> ApiResult<PaginatedResponse<T>> {
        let (page, per_page, offset) = query.normalize();

        let mut conditions: Vec<String> = vec!["1=1".to_string()];
        let mut params: Vec<String> = Vec::new();

        let search_fields = self.search_fields();
        if let Some(ref search) = query.search {
            if !search.trim().is_empty() && !search_fields.is_empty() {
                let pattern = format!("%{}%", escape_like_pattern(search.trim()));
                let like_conditions: Vec<String> = search_fields
                    .iter()
                    .map(|f| format!("{} LIKE ? ESCAPE '\\'", f))
                    .collect();
                conditions.push(format!("({})", like_conditions.join(" OR ")));
                params.extend(search_fields.iter().map(|_| pattern.clone()));
            }
        }

        for (field, value) in self.filters(query) {
            conditions.push(format!("{} = ?", field));
            params.push(value);
        }

        let where_clause = conditions.join(" AND ");

        // === COUNT QUERY ===
        let count_sql = format!("SELECT COUNT(*) FROM {} WHERE {}", self.table_name(), where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for p in &params {
            count_query = count_query.bind(p);
        }
        let total: i64 = count_query.fetch_one(pool).await?;

        // === SELECT QUERY ===
        let select_sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY {} {} LIMIT ? OFFSET ?",
            self.table_name(),
            where_clause,
            self.default_sort_field(),
            query.sort_direction()
        );
        let mut select_query = sqlx::query_as::<_, T>(&select_sql);
        for p in &params {
            select_query = select_query.bind(p);
        }
        let data: Vec<T> = select_query
            .bind(per_page)
            .bind(offset)
            .fetch_all(pool)
            .await?;

        let total_pages = (total + per_page - 1) / per_page;

        Ok(PaginatedResponse {
            data,
            total,
            page,
            per_page,
            total_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_pattern() {
        assert_eq!(escape_like_pattern("50%"), "50\\%");
        assert_eq!(escape_like_pattern("a_b"), "a\\_b");
        assert_eq!(escape_like_pattern("c:\\x"), "c:\\\\x");
        assert_eq!(escape_like_pattern("plain"), "plain");
    }

    #[test]
    fn test_normalize_optional() {
        assert_eq!(normalize_optional(Some("  g/L ".to_string())), Some("g/L".to_string()));
        assert_eq!(normalize_optional(Some("   ".to_string())), None);
        assert_eq!(normalize_optional(None), None);
    }
}
