// src/db.rs - Database migrations and setup

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE CHECK(length(username) >= 3 AND length(username) <= 50),
            full_name TEXT NOT NULL CHECK(length(full_name) > 0 AND length(full_name) <= 255),
            email TEXT NOT NULL UNIQUE CHECK(length(email) >= 5 AND length(email) <= 255),
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'RECEPTIONIST' CHECK(
                role IN ('ADMIN', 'TECHNICIAN', 'RECEPTIONIST', 'VALIDATOR')
            ),
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            last_login DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Per-prefix counters for human readable codes; a number is never handed out twice
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_sequences (
            prefix TEXT PRIMARY KEY,
            last_value INTEGER NOT NULL DEFAULT 0 CHECK(last_value >= 0)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patients (
            id TEXT PRIMARY KEY,
            patient_code TEXT NOT NULL UNIQUE,
            last_name TEXT NOT NULL CHECK(length(last_name) > 0 AND length(last_name) <= 255),
            first_name TEXT NOT NULL CHECK(length(first_name) > 0 AND length(first_name) <= 255),
            birth_date DATE,
            sex TEXT NOT NULL CHECK(sex IN ('M', 'F')),
            phone TEXT CHECK(phone IS NULL OR length(phone) <= 50),
            email TEXT CHECK(email IS NULL OR length(email) <= 255),
            address TEXT CHECK(address IS NULL OR length(address) <= 1000),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // patient_id is not a foreign key: deletes never cascade and are not blocked
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS samples (
            id TEXT PRIMARY KEY,
            sample_code TEXT NOT NULL UNIQUE,
            patient_id TEXT NOT NULL,
            specimen_type TEXT NOT NULL CHECK(length(specimen_type) > 0 AND length(specimen_type) <= 255),
            collected_at DATETIME NOT NULL,
            status TEXT NOT NULL DEFAULT 'RECEIVED' CHECK(
                status IN ('RECEIVED', 'IN_PROCESS', 'ANALYZED', 'VALIDATED', 'REPORTED')
            ),
            remarks TEXT CHECK(remarks IS NULL OR length(remarks) <= 2000),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            analysis_code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            description TEXT CHECK(description IS NULL OR length(description) <= 2000),
            category TEXT NOT NULL CHECK(length(category) > 0 AND length(category) <= 100),
            price REAL NOT NULL CHECK(price > 0),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sample_analyses (
            id TEXT PRIMARY KEY,
            sample_id TEXT NOT NULL,
            analysis_id TEXT NOT NULL,
            result TEXT CHECK(result IS NULL OR length(result) <= 2000),
            normal_range TEXT CHECK(normal_range IS NULL OR length(normal_range) <= 255),
            unit TEXT CHECK(unit IS NULL OR length(unit) <= 50),
            interpretation TEXT CHECK(interpretation IS NULL OR length(interpretation) <= 2000),
            notes TEXT CHECK(notes IS NULL OR length(notes) <= 2000),
            status TEXT NOT NULL DEFAULT 'PENDING' CHECK(
                status IN ('PENDING', 'IN_PROGRESS', 'COMPLETED', 'VALIDATED')
            ),
            technician_id TEXT,
            validator_id TEXT,
            completed_at DATETIME,
            validated_at DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            UNIQUE (sample_id, analysis_id),
            FOREIGN KEY (analysis_id) REFERENCES analyses (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id TEXT PRIMARY KEY,
            report_code TEXT NOT NULL UNIQUE,
            patient_id TEXT NOT NULL,
            sample_id TEXT NOT NULL,
            conclusion TEXT CHECK(conclusion IS NULL OR length(conclusion) <= 5000),
            recommendations TEXT CHECK(recommendations IS NULL OR length(recommendations) <= 5000),
            status TEXT NOT NULL DEFAULT 'DRAFT' CHECK(
                status IN ('DRAFT', 'VALIDATED', 'DELIVERED')
            ),
            generated_by TEXT NOT NULL,
            validated_by TEXT,
            generated_at DATETIME NOT NULL,
            validated_at DATETIME,
            delivered_at DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT,
            description TEXT,
            changes TEXT,
            ip_address TEXT,
            user_agent TEXT,
            created_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== CREATE INDEXES ====================

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_patients_names ON patients(last_name, first_name)",
        "CREATE INDEX IF NOT EXISTS idx_samples_patient_id ON samples(patient_id)",
        "CREATE INDEX IF NOT EXISTS idx_samples_status ON samples(status)",
        "CREATE INDEX IF NOT EXISTS idx_samples_collected_at ON samples(collected_at)",
        "CREATE INDEX IF NOT EXISTS idx_analyses_category ON analyses(category)",
        "CREATE INDEX IF NOT EXISTS idx_sample_analyses_sample_id ON sample_analyses(sample_id)",
        "CREATE INDEX IF NOT EXISTS idx_sample_analyses_analysis_id ON sample_analyses(analysis_id)",
        "CREATE INDEX IF NOT EXISTS idx_sample_analyses_status ON sample_analyses(status)",
        "CREATE INDEX IF NOT EXISTS idx_reports_patient_id ON reports(patient_id)",
        "CREATE INDEX IF NOT EXISTS idx_reports_sample_id ON reports(sample_id)",
        "CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status)",
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_entity ON audit_logs(entity_type, entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs(created_at)",
    ];

    for query in indexes.iter() {
        sqlx::query(query).execute(pool).await?;
    }

    log::info!("Database migrations completed");
    Ok(())
}

// ==================== CODE SEQUENCES ====================

/// Atomically bump and return the counter for `prefix`, starting at 1.
pub async fn next_sequence_value(pool: &SqlitePool, prefix: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"INSERT INTO code_sequences (prefix, last_value) VALUES (?, 1)
           ON CONFLICT(prefix) DO UPDATE SET last_value = last_value + 1
           RETURNING last_value"#,
    )
        .bind(prefix)
        .fetch_one(pool)
        .await
}

// ==================== TEST SUPPORT ====================

/// Fresh in-memory database with the full schema.
/// A single connection keeps every query on the same in-memory database.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_migrations_are_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
            .fetch_all(&pool)
            .await
            .unwrap();
        for expected in ["analyses", "audit_logs", "code_sequences", "patients", "reports", "sample_analyses", "samples", "users"] {
            assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
        }
    }

    #[actix_rt::test]
    async fn test_sequences_are_per_prefix_and_monotonic() {
        let pool = test_pool().await;
        assert_eq!(next_sequence_value(&pool, "PAT").await.unwrap(), 1);
        assert_eq!(next_sequence_value(&pool, "PAT").await.unwrap(), 2);
        assert_eq!(next_sequence_value(&pool, "ECH").await.unwrap(), 1);
        assert_eq!(next_sequence_value(&pool, "PAT").await.unwrap(), 3);
    }
}
