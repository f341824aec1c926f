//! Work store over Postgres.
//!
//! Event emission lives in the schema's triggers (see `migrations/`), so
//! NOTIFY commits or rolls back with the row change that caused it.

use async_trait::async_trait;
use opentelemetry::KeyValue;

use super::Db;
use crate::error::Result;
use crate::model::work::{Stage, WorkId, WorkItem};
use crate::store::{WorkStore, WriteOutcome};
use crate::telemetry::metrics;

fn record(operation: &'static str) {
    metrics::store_writes().add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", "ok"),
        ],
    );
}

impl Db {
    async fn exists(&self, id: WorkId) -> Result<bool> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM questions_answers WHERE id = $1)")
                .bind(id.0)
                .fetch_one(self.pool())
                .await?;
        Ok(row.0)
    }
}

#[async_trait]
impl WorkStore for Db {
    async fn insert(&self, question: &str) -> Result<WorkId> {
        let row: (i64,) =
            sqlx::query_as("INSERT INTO questions_answers (question) VALUES ($1) RETURNING id")
                .bind(question)
                .fetch_one(self.pool())
                .await?;
        record("insert");
        Ok(WorkId(row.0))
    }

    async fn fetch(&self, id: WorkId) -> Result<Option<WorkItem>> {
        let row: Option<WorkItemRow> = sqlx::query_as(
            "SELECT id, question, answer, audio, created_at, updated_at
             FROM questions_answers WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(WorkItem::from))
    }

    async fn set_output(&self, stage: Stage, id: WorkId, text: &str) -> Result<WriteOutcome> {
        // column names come from Stage, never from input
        let sql = format!(
            "UPDATE questions_answers SET {} = $1 WHERE id = $2",
            stage.column()
        );
        let rows = sqlx::query(&sql)
            .bind(text)
            .bind(id.0)
            .execute(self.pool())
            .await?
            .rows_affected();

        if rows == 0 {
            return Ok(WriteOutcome::NotFound);
        }
        record("set_output");
        Ok(WriteOutcome::Written)
    }

    async fn set_output_if_empty(
        &self,
        stage: Stage,
        id: WorkId,
        text: &str,
    ) -> Result<WriteOutcome> {
        let column = stage.column();
        let sql = format!(
            "UPDATE questions_answers SET {column} = $1 WHERE id = $2 AND {column} IS NULL"
        );
        let rows = sqlx::query(&sql)
            .bind(text)
            .bind(id.0)
            .execute(self.pool())
            .await?
            .rows_affected();

        if rows == 1 {
            record("set_output_if_empty");
            return Ok(WriteOutcome::Written);
        }
        if self.exists(id).await? {
            Ok(WriteOutcome::AlreadySet)
        } else {
            Ok(WriteOutcome::NotFound)
        }
    }

    async fn delete(&self, id: WorkId) -> Result<Option<Option<String>>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("DELETE FROM questions_answers WHERE id = $1 RETURNING audio")
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        if row.is_some() {
            record("delete");
        }
        Ok(row.map(|(audio,)| audio))
    }

    async fn list_ids(&self) -> Result<Vec<WorkId>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM questions_answers ORDER BY created_at DESC, id DESC")
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(|(id,)| WorkId(id)).collect())
    }

    async fn list_pending(&self, stage: Stage) -> Result<Vec<WorkId>> {
        let sql = match stage {
            Stage::Answer => "SELECT id FROM questions_answers WHERE answer IS NULL ORDER BY id",
            Stage::Speech => {
                "SELECT id FROM questions_answers
                 WHERE answer IS NOT NULL AND audio IS NULL ORDER BY id"
            }
        };
        let rows: Vec<(i64,)> = sqlx::query_as(sql).fetch_all(self.pool()).await?;
        Ok(rows.into_iter().map(|(id,)| WorkId(id)).collect())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: i64,
    question: String,
    answer: Option<String>,
    audio: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<WorkItemRow> for WorkItem {
    fn from(row: WorkItemRow) -> Self {
        Self {
            id: WorkId(row.id),
            question: row.question,
            answer: row.answer,
            audio: row.audio,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
