//! Postgres-backed document store: one JSONB row per document.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{
    Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
    query, query_scalar,
    types::Json,
};
use uuid::Uuid;

use crate::application::repos::{DocumentFilter, DocumentStore, RepoError};
use crate::domain::Document;

use super::util::map_sqlx_error;

#[derive(Clone)]
pub struct PostgresDocuments {
    pool: Arc<PgPool>,
}

impl PostgresDocuments {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &DocumentFilter) {
        for (field, value) in &filter.equals {
            qb.push(" AND (body -> ");
            qb.push_bind(field.clone());
            qb.push(" = ");
            qb.push_bind(Json(value.clone()));
            qb.push(" OR body -> ");
            qb.push_bind(field.clone());
            qb.push(" @> jsonb_build_array(");
            qb.push_bind(Json(value.clone()));
            qb.push("::jsonb))");
        }
        for (field, value) in &filter.not_equals {
            qb.push(" AND body -> ");
            qb.push_bind(field.clone());
            qb.push(" IS DISTINCT FROM ");
            qb.push_bind(Json(value.clone()));
        }
        for (field, needle) in &filter.contains {
            qb.push(" AND body ->> ");
            qb.push_bind(field.clone());
            qb.push(" ILIKE ");
            qb.push_bind(like_pattern(needle));
        }

        qb.push(" ORDER BY ");
        if let Some(sort_by) = filter.sort_by.as_ref() {
            qb.push("body -> ");
            qb.push_bind(sort_by.clone());
            if filter.descending {
                qb.push(" DESC");
            }
            qb.push(", ");
        }
        qb.push("created_at, id");

        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ");
            qb.push_bind(clamp_i64(limit));
        }
        if filter.skip > 0 {
            qb.push(" OFFSET ");
            qb.push_bind(clamp_i64(filter.skip));
        }
    }
}

/// `%needle%` with LIKE metacharacters escaped.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl DocumentStore for PostgresDocuments {
    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Document>, RepoError> {
        let row = query_scalar::<_, Json<Document>>(
            "SELECT body FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(|Json(document)| document))
    }

    async fn find(
        &self,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT body FROM documents WHERE collection = ");
        qb.push_bind(collection.to_string());
        Self::push_filter(&mut qb, filter);

        let rows = qb
            .build_query_scalar::<Json<Document>>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(|Json(document)| document).collect())
    }

    async fn insert(
        &self,
        collection: &str,
        id: Uuid,
        document: Document,
    ) -> Result<(), RepoError> {
        query("INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3)")
            .bind(collection)
            .bind(id)
            .bind(Json(document))
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<(Uuid, Document)>,
    ) -> Result<(), RepoError> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO documents (collection, id, body) ");
        qb.push_values(documents, |mut row, (id, document)| {
            row.push_bind(collection.to_string())
                .push_bind(id)
                .push_bind(Json(document));
        });
        qb.build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: Uuid,
        document: Document,
    ) -> Result<bool, RepoError> {
        let result = query(
            "UPDATE documents SET body = $3, updated_at = now() \
             WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .bind(Json(document))
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool, RepoError> {
        let result = query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}
