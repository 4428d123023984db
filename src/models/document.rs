use crate::http::types::Timestamptz;
use crate::http::{Result, ResultExt};
use crate::models::resource::ResourceKind;
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// One stored resource. Its fields are flattened into the JSON representation.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Uuid,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamptz,
}

impl Document {
    /// Drop the fields of `kind` that must never leave the server.
    pub fn public(mut self, kind: ResourceKind) -> Self {
        for field in kind.hidden_fields() {
            self.fields.remove(*field);
        }
        self
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

// The row as it comes out of Postgres; `body` is decoded from `jsonb`.
#[derive(FromRow)]
struct DocumentFromQuery {
    id: Uuid,
    body: Json<Map<String, Value>>,
    created_at: Timestamptz,
}

impl DocumentFromQuery {
    fn into_document(self) -> Document {
        Document {
            id: self.id,
            fields: self.body.0,
            created_at: self.created_at,
        }
    }
}

pub type DynResourceCtrl = Arc<dyn ResourceCtrlTrait + Send + Sync>;

/// Storage operations shared by every resource kind.
///
/// `get`, `update` and `delete` report a missing document as `None`/`false` so that callers
/// can word the 404 themselves.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceCtrlTrait {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Document>>;
    async fn get(&self, kind: ResourceKind, id: Uuid) -> Result<Option<Document>>;
    async fn find_by_field(
        &self,
        kind: ResourceKind,
        field: &str,
        value: &str,
    ) -> Result<Option<Document>>;
    async fn create(&self, kind: ResourceKind, fields: Map<String, Value>) -> Result<Document>;
    async fn update(
        &self,
        kind: ResourceKind,
        id: Uuid,
        fields: Map<String, Value>,
    ) -> Result<Option<Document>>;
    async fn delete(&self, kind: ResourceKind, id: Uuid) -> Result<bool>;
}

#[derive(Clone)]
pub struct DocumentController {
    pool: PgPool,
}

impl DocumentController {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceCtrlTrait for DocumentController {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Document>> {
        let documents: Vec<Document> = sqlx::query_as::<_, DocumentFromQuery>(
            // language=PostgreSQL
            r#"
                select id, body, created_at
                from document
                where kind = $1
                order by created_at desc
            "#,
        )
        .bind(kind.as_str())
        .fetch(&self.pool)
        .map_ok(DocumentFromQuery::into_document)
        .try_collect()
        .await?;

        Ok(documents)
    }

    async fn get(&self, kind: ResourceKind, id: Uuid) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, DocumentFromQuery>(
            "select id, body, created_at from document where kind = $1 and id = $2",
        )
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(DocumentFromQuery::into_document);

        Ok(document)
    }

    async fn find_by_field(
        &self,
        kind: ResourceKind,
        field: &str,
        value: &str,
    ) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, DocumentFromQuery>(
            "select id, body, created_at from document where kind = $1 and body ->> $2 = $3",
        )
        .bind(kind.as_str())
        .bind(field)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?
        .map(DocumentFromQuery::into_document);

        Ok(document)
    }

    async fn create(&self, kind: ResourceKind, fields: Map<String, Value>) -> Result<Document> {
        let document = sqlx::query_as::<_, DocumentFromQuery>(
            // language=PostgreSQL
            r#"
                insert into document (kind, body)
                values ($1, $2)
                returning id, body, created_at
            "#,
        )
        .bind(kind.as_str())
        .bind(Json(&fields))
        .fetch_one(&self.pool)
        .await
        // Unique indexes are named `<kind>_<field>_key`, see the migrations.
        .on_duplicate_key()?
        .into_document();

        Ok(document)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: Uuid,
        fields: Map<String, Value>,
    ) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, DocumentFromQuery>(
            // `||` on two `jsonb` objects is a shallow merge, the right side winning.
            // language=PostgreSQL
            r#"
                update document
                set body = body || $3
                where kind = $1 and id = $2
                returning id, body, created_at
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .bind(Json(&fields))
        .fetch_optional(&self.pool)
        .await
        .on_duplicate_key()?
        .map(DocumentFromQuery::into_document);

        Ok(document)
    }

    async fn delete(&self, kind: ResourceKind, id: Uuid) -> Result<bool> {
        let result = sqlx::query("delete from document where kind = $1 and id = $2")
            .bind(kind.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
