// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Rule Store
//!
//! Durable `RuleRepository` / `CorrectionRepository` implementations backed by
//! a local SQLite file via `sqlx`. The schema is created on connect.
//!
//! Dedup-merge relies on the `UNIQUE (namespace, normalized_key)` constraint:
//! the candidate is inserted with `ON CONFLICT DO NOTHING` and, when a row
//! already exists, merged into it inside the same write transaction. Concurrent
//! writers of the same rule converge on one row without application-level
//! locking.
//!
//! Identifiers are stored as TEXT, timestamps as RFC 3339 strings with fixed
//! microsecond precision so that lexical order equals chronological order.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::info;
use uuid::Uuid;

use crate::domain::{Correction, CorrectionId, Rule, RuleCategory, RuleId, RuleNamespace};
use crate::infrastructure::repository::{
    CorrectionRepository, RepositoryError, RuleOrder, RuleQuery, RuleRepository, UpsertOutcome,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS rules (
        id TEXT PRIMARY KEY,
        namespace TEXT NOT NULL,
        normalized_key TEXT NOT NULL,
        text TEXT NOT NULL,
        category TEXT NOT NULL,
        domain_tag TEXT NOT NULL,
        confidence REAL NOT NULL,
        created_at TEXT NOT NULL,
        usage_count INTEGER NOT NULL DEFAULT 0,
        success_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE (namespace, normalized_key)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_rules_namespace_tag ON rules (namespace, domain_tag)",
    r#"
    CREATE TABLE IF NOT EXISTS corrections (
        id TEXT PRIMARY KEY,
        namespace TEXT NOT NULL,
        original_artifact TEXT NOT NULL,
        corrected_artifact TEXT NOT NULL,
        rationale TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        applied INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_corrections_namespace ON corrections (namespace, timestamp)",
];

const RULE_COLUMNS: &str = "id, namespace, normalized_key, text, category, domain_tag, confidence, created_at, usage_count, success_count";

/// Open (creating if needed) the database at `path` and apply the schema.
pub async fn connect_sqlite(path: impl AsRef<Path>) -> Result<SqlitePool, RepositoryError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RepositoryError::Database(format!("create {parent:?}: {e}")))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    info!(path = %path.display(), "Rule store ready");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), RepositoryError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

fn encode_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Serialization(format!("bad timestamp '{raw}': {e}")))
}

fn decode_uuid(raw: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(raw).map_err(|e| RepositoryError::Serialization(format!("bad id '{raw}': {e}")))
}

fn rule_from_row(row: &SqliteRow) -> Result<Rule, RepositoryError> {
    let id: String = row.try_get("id")?;
    let namespace: String = row.try_get("namespace")?;
    let category: String = row.try_get("category")?;
    let created_at: String = row.try_get("created_at")?;
    let usage_count: i64 = row.try_get("usage_count")?;
    let success_count: i64 = row.try_get("success_count")?;

    Ok(Rule {
        id: RuleId(decode_uuid(&id)?),
        namespace: RuleNamespace::from_str(&namespace).map_err(RepositoryError::Serialization)?,
        text: row.try_get("text")?,
        normalized_key: row.try_get("normalized_key")?,
        category: RuleCategory::from_str(&category).map_err(RepositoryError::Serialization)?,
        domain_tag: row.try_get("domain_tag")?,
        confidence: row.try_get("confidence")?,
        created_at: decode_time(&created_at)?,
        usage_count: usage_count.max(0) as u64,
        success_count: success_count.max(0) as u64,
    })
}

fn correction_from_row(row: &SqliteRow) -> Result<Correction, RepositoryError> {
    let id: String = row.try_get("id")?;
    let namespace: String = row.try_get("namespace")?;
    let timestamp: String = row.try_get("timestamp")?;
    let applied: i64 = row.try_get("applied")?;

    Ok(Correction {
        id: CorrectionId(decode_uuid(&id)?),
        namespace: RuleNamespace::from_str(&namespace).map_err(RepositoryError::Serialization)?,
        original_artifact: row.try_get("original_artifact")?,
        corrected_artifact: row.try_get("corrected_artifact")?,
        rationale: row.try_get("rationale")?,
        timestamp: decode_time(&timestamp)?,
        applied: applied != 0,
    })
}

pub struct SqliteRuleRepository {
    pool: SqlitePool,
}

impl SqliteRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn bump(&self, column: &str, ids: &[RuleId]) -> Result<(), RepositoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!("UPDATE rules SET {column} = {column} + 1 WHERE id = ?");
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query(&sql)
                .bind(id.0.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl RuleRepository for SqliteRuleRepository {
    async fn insert(&self, rule: &Rule) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO rules ({RULE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(rule.id.0.to_string())
        .bind(rule.namespace.as_key())
        .bind(&rule.normalized_key)
        .bind(&rule.text)
        .bind(rule.category.as_str())
        .bind(&rule.domain_tag)
        .bind(rule.confidence)
        .bind(encode_time(&rule.created_at))
        .bind(rule.usage_count as i64)
        .bind(rule.success_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_merge(&self, rule: &Rule) -> Result<UpsertOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Writing first takes the database write lock, so the read-merge below
        // cannot interleave with another writer of the same key.
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO rules ({RULE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (namespace, normalized_key) DO NOTHING
            "#
        ))
        .bind(rule.id.0.to_string())
        .bind(rule.namespace.as_key())
        .bind(&rule.normalized_key)
        .bind(&rule.text)
        .bind(rule.category.as_str())
        .bind(&rule.domain_tag)
        .bind(rule.confidence)
        .bind(encode_time(&rule.created_at))
        .bind(rule.usage_count as i64)
        .bind(rule.success_count as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            tx.commit().await?;
            return Ok(UpsertOutcome::Inserted(rule.clone()));
        }

        let previous: f64 = sqlx::query(
            "SELECT confidence FROM rules WHERE namespace = ? AND normalized_key = ?",
        )
        .bind(rule.namespace.as_key())
        .bind(&rule.normalized_key)
        .fetch_one(&mut *tx)
        .await?
        .try_get("confidence")?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE rules SET
                confidence = MAX(confidence, ?),
                usage_count = usage_count + ?,
                success_count = success_count + ?
            WHERE namespace = ? AND normalized_key = ?
            RETURNING {RULE_COLUMNS}
            "#
        ))
        .bind(rule.confidence)
        .bind(rule.usage_count as i64)
        .bind(rule.success_count as i64)
        .bind(rule.namespace.as_key())
        .bind(&rule.normalized_key)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(UpsertOutcome::Merged {
            rule: rule_from_row(&row)?,
            previous_confidence: previous,
        })
    }

    async fn find_by_id(&self, id: RuleId) -> Result<Option<Rule>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ?"))
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(rule_from_row).transpose()
    }

    async fn find_by_key(
        &self,
        namespace: &RuleNamespace,
        normalized_key: &str,
    ) -> Result<Option<Rule>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE namespace = ? AND normalized_key = ?"
        ))
        .bind(namespace.as_key())
        .bind(normalized_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(rule_from_row).transpose()
    }

    async fn query(&self, query: &RuleQuery) -> Result<Vec<Rule>, RepositoryError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {RULE_COLUMNS} FROM rules WHERE namespace = "));
        builder.push_bind(query.namespace.as_key());

        if let Some(tags) = &query.domain_tags {
            if tags.is_empty() {
                return Ok(Vec::new());
            }
            builder.push(" AND domain_tag IN (");
            let mut separated = builder.separated(", ");
            for tag in tags {
                separated.push_bind(tag.clone());
            }
            separated.push_unseparated(")");
        }

        if let Some(min) = query.min_confidence {
            builder.push(" AND confidence >= ");
            builder.push_bind(min);
        }

        builder.push(match query.order {
            RuleOrder::Ranked => " ORDER BY confidence DESC, usage_count DESC, created_at DESC",
            RuleOrder::Newest => " ORDER BY created_at DESC",
        });

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn record_usage(&self, ids: &[RuleId]) -> Result<(), RepositoryError> {
        self.bump("usage_count", ids).await
    }

    async fn record_success(&self, ids: &[RuleId]) -> Result<(), RepositoryError> {
        self.bump("success_count", ids).await
    }
}

pub struct SqliteCorrectionRepository {
    pool: SqlitePool,
}

impl SqliteCorrectionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CorrectionRepository for SqliteCorrectionRepository {
    async fn insert(&self, correction: &Correction) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO corrections (
                id, namespace, original_artifact, corrected_artifact, rationale, timestamp, applied
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(correction.id.0.to_string())
        .bind(correction.namespace.as_key())
        .bind(&correction.original_artifact)
        .bind(&correction.corrected_artifact)
        .bind(&correction.rationale)
        .bind(encode_time(&correction.timestamp))
        .bind(correction.applied as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_applied(&self, id: CorrectionId) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE corrections SET applied = 1 WHERE id = ?")
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("correction {id}")));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: CorrectionId) -> Result<Option<Correction>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM corrections WHERE id = ?")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(correction_from_row).transpose()
    }

    async fn list(
        &self,
        namespace: &RuleNamespace,
        limit: Option<usize>,
    ) -> Result<Vec<Correction>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM corrections WHERE namespace = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(namespace.as_key())
        .bind(limit.map(|l| l as i64).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(correction_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SessionId, GENERAL_TAG};

    async fn pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect_sqlite(dir.path().join("rules.db")).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_upsert_merge_is_single_row() {
        let (_dir, pool) = pool().await;
        let repo = SqliteRuleRepository::new(pool);
        let ns = RuleNamespace::Session(SessionId::from_name("bench"));

        let mut first = Rule::new(ns, "Use 4095 for ADC max", RuleCategory::Correction, "adc", 0.6);
        first.usage_count = 1;
        let mut second = Rule::new(ns, "use 4095 for adc max.", RuleCategory::Correction, "adc", 1.0);
        second.usage_count = 2;

        let inserted = repo.upsert_merge(&first).await.unwrap();
        assert!(!inserted.is_merge());

        match repo.upsert_merge(&second).await.unwrap() {
            UpsertOutcome::Merged { rule, previous_confidence } => {
                assert_eq!(rule.id, first.id);
                assert_eq!(previous_confidence, 0.6);
                assert_eq!(rule.confidence, 1.0);
                assert_eq!(rule.usage_count, 3);
                assert_eq!(rule.text, "Use 4095 for ADC max");
            }
            other => panic!("expected merge, got {other:?}"),
        }

        let all = repo.query(&RuleQuery::all(ns)).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let (_dir, pool) = pool().await;
        let repo = SqliteRuleRepository::new(pool);
        let ns = RuleNamespace::Shared;

        let general = Rule::new(ns, "comment every pin", RuleCategory::Taught, GENERAL_TAG, 0.6);
        let motor = Rule::new(ns, "never use delay in motor code", RuleCategory::Correction, "motor", 1.0);
        let ble = Rule::new(ns, "prefer NimBLE", RuleCategory::Correction, "ble", 0.8);
        for r in [&general, &motor, &ble] {
            repo.insert(r).await.unwrap();
        }
        repo.record_usage(&[general.id]).await.unwrap();

        let rules = repo
            .query(&RuleQuery::all(ns).with_tags(vec!["motor".into(), GENERAL_TAG.into()]))
            .await
            .unwrap();
        let texts: Vec<_> = rules.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["never use delay in motor code", "comment every pin"]);
        assert_eq!(rules[1].usage_count, 1);

        let limited = repo.query(&RuleQuery::all(ns).with_limit(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, motor.id);

        let duplicate = repo.insert(&Rule::new(ns, "Prefer NimBLE.", RuleCategory::Taught, "ble", 1.0)).await;
        assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_correction_log_roundtrip() {
        let (_dir, pool) = pool().await;
        let repo = SqliteCorrectionRepository::new(pool);
        let ns = RuleNamespace::Shared;

        let correction = Correction::new(ns, "threshold=1023", "threshold=4095", "must use 4095");
        repo.insert(&correction).await.unwrap();
        repo.mark_applied(correction.id).await.unwrap();

        let stored = repo.find_by_id(correction.id).await.unwrap().unwrap();
        assert!(stored.applied);
        assert_eq!(stored.corrected_artifact, "threshold=4095");
        assert_eq!(repo.list(&ns, Some(10)).await.unwrap().len(), 1);
        assert!(matches!(
            repo.mark_applied(CorrectionId::new()).await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
