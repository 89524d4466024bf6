// src/audit.rs
//! Audit trail helpers. Writes never fail the request that triggered them.

use sqlx::SqlitePool;
use uuid::Uuid;
use chrono::{Duration, Utc};
use actix_web::HttpRequest;
use serde::Serialize;

/// Write one entry to audit_logs
pub async fn log_activity(
    pool: &SqlitePool,
    user_id: Option<&str>,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    description: Option<&str>,
    changes: Option<&str>,
    request: Option<&HttpRequest>,
) -> Result<(), sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let ip_address = request.and_then(|req| {
        req.connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string())
    });

    let user_agent = request.and_then(|req| {
        req.headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    sqlx::query(
        r#"INSERT INTO audit_logs
           (id, user_id, action, entity_type, entity_id, description, changes, ip_address, user_agent, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(&id)
    .bind(user_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(description)
    .bind(changes)
    .bind(&ip_address)
    .bind(&user_agent)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Short form for the common case
pub async fn audit(
    pool: &SqlitePool,
    user_id: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    description: &str,
    request: &HttpRequest,
) {
    if let Err(e) = log_activity(
        pool,
        Some(user_id),
        action,
        entity_type,
        Some(entity_id),
        Some(description),
        None,
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

pub async fn audit_with_changes(
    pool: &SqlitePool,
    user_id: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    description: &str,
    changes: &ChangeSet,
    request: &HttpRequest,
) {
    let json = changes.to_json();
    if let Err(e) = log_activity(
        pool,
        Some(user_id),
        action,
        entity_type,
        Some(entity_id),
        Some(description),
        json.as_deref(),
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

/// Removes entries older than `retention_days`. Returns the number removed.
pub async fn prune_older_than(pool: &SqlitePool, retention_days: i64) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - Duration::days(retention_days);
    let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ==================== CHANGE SET ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Field-level diff recorded alongside an audit entry
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    changes: Vec<FieldChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&mut self, field: &str, value: &str) {
        self.changes.push(FieldChange {
            field: field.to_string(),
            old: None,
            new: Some(value.to_string()),
        });
    }

    pub fn deleted(&mut self, field: &str, value: &str) {
        self.changes.push(FieldChange {
            field: field.to_string(),
            old: Some(value.to_string()),
            new: None,
        });
    }

    /// Records the field only when the value actually changes
    pub fn add(&mut self, field: &str, old: &str, new: &str) {
        if old != new {
            self.changes.push(FieldChange {
                field: field.to_string(),
                old: Some(old.to_string()),
                new: Some(new.to_string()),
            });
        }
    }

    pub fn add_opt(&mut self, field: &str, old: &Option<String>, new: &Option<String>) {
        let old = old.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let new = new.as_deref().map(str::trim).filter(|s| !s.is_empty());
        if old != new {
            self.changes.push(FieldChange {
                field: field.to_string(),
                old: old.map(|s| s.to_string()),
                new: new.map(|s| s.to_string()),
            });
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn to_description(&self) -> String {
        self.changes
            .iter()
            .map(|c| match (&c.old, &c.new) {
                (None, Some(new)) => format!("{}='{}'", c.field, new),
                (Some(old), None) => format!("{} (was '{}')", c.field, old),
                (Some(old), Some(new)) => format!("{}: '{}' -> '{}'", c.field, old, new),
                (None, None) => c.field.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn to_json(&self) -> Option<String> {
        if self.changes.is_empty() {
            return None;
        }
        serde_json::to_string(&self.changes).ok()
    }
}

/// "Patient PAT000001 updated: phone: '1' -> '2'", or just "... updated" when nothing moved
pub fn describe_update(entity: &str, code: &str, cs: &ChangeSet) -> String {
    if cs.has_changes() {
        format!("{} {} updated: {}", entity, code, cs.to_description())
    } else {
        format!("{} {} updated", entity, code)
    }
}
