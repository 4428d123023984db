use crate::config::Config;
use crate::http::error::Error;
use crate::http::extractor::{AuthUser, JsonBody, MaybeAuthUser, NOT_AUTHORIZED};
use crate::http::pipeline::{multipart_limit, upload_too_large};
use crate::http::{ApiContext, Result};
use crate::models::document::Document;
use crate::models::resource::{Mode, ResourceKind};
use crate::models::user::hash_password_field;
use anyhow::Context;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::rejection::PathRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Extension, Json, Router};
use serde_json::{Map, Value};
use std::ffi::OsStr;
use uuid::Uuid;

/// The same five routes for every kind; bootcamps also take a photo upload.
pub(crate) fn router(kind: ResourceKind, config: &Config) -> Router<ApiContext> {
    let mut router = Router::new()
        .route(
            "/",
            get(list_resources)
                .post(create_resource)
                .fallback(method_not_allowed),
        )
        .route(
            "/:id",
            get(get_resource)
                .put(update_resource)
                .delete(delete_resource)
                .fallback(method_not_allowed),
        );

    if kind == ResourceKind::Bootcamp {
        // axum's own 2 MB cap on `Multipart` would otherwise win over `max_file_upload`.
        let body_limit =
            usize::try_from(multipart_limit(config.max_file_upload)).unwrap_or(usize::MAX);
        router = router.route(
            "/:id/photo",
            put(upload_photo)
                .layer(DefaultBodyLimit::max(body_limit))
                .fallback(method_not_allowed),
        );
    }

    router.layer(Extension(kind))
}

/// Every successful response is wrapped like this.
#[derive(serde::Serialize)]
pub(in crate::http) struct DataBody<T> {
    success: bool,
    data: T,
}

impl<T> DataBody<T> {
    pub(in crate::http) fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(serde::Serialize)]
struct ListBody {
    success: bool,
    count: usize,
    data: Vec<Document>,
}

/// Set by the server, never by the client.
const RESERVED_FIELDS: &[&str] = &["id", "createdAt"];

/// The `:id` segment, taken as a `Result` so a bad path is reported through [`Error`].
type IdPath = std::result::Result<Path<String>, PathRejection>;

fn parse_id(path: IdPath) -> Result<Uuid> {
    let Path(raw) = path?;
    Uuid::parse_str(&raw).map_err(|_| Error::Cast { value: raw })
}

pub(in crate::http) async fn method_not_allowed() -> Error {
    Error::method_not_allowed()
}

pub(in crate::http) fn not_found(kind: ResourceKind, id: Uuid) -> Error {
    Error::not_found(format!("{} not found with id of {}", kind.label(), id))
}

// Users are only visible to somebody who is logged in.
fn check_read_access(kind: ResourceKind, maybe_auth_user: &MaybeAuthUser) -> Result<()> {
    if kind == ResourceKind::User && maybe_auth_user.0.is_none() {
        return Err(Error::unauthorized(NOT_AUTHORIZED));
    }
    Ok(())
}

/// Validate a client-supplied document and get it ready to be stored.
pub(in crate::http) async fn prepare_fields(
    kind: ResourceKind,
    fields: &mut Map<String, Value>,
    mode: Mode,
) -> Result<()> {
    for reserved in RESERVED_FIELDS {
        fields.remove(*reserved);
    }

    kind.validate(fields, mode)?;

    if kind == ResourceKind::User {
        hash_password_field(fields).await?;
    }

    Ok(())
}

async fn list_resources(
    maybe_auth_user: MaybeAuthUser,
    Extension(kind): Extension<ResourceKind>,
    ctx: State<ApiContext>,
) -> Result<Json<ListBody>> {
    check_read_access(kind, &maybe_auth_user)?;

    let data: Vec<Document> = ctx
        .store
        .resource()
        .list(kind)
        .await?
        .into_iter()
        .map(|document| document.public(kind))
        .collect();

    Ok(Json(ListBody {
        success: true,
        count: data.len(),
        data,
    }))
}

async fn get_resource(
    maybe_auth_user: MaybeAuthUser,
    Extension(kind): Extension<ResourceKind>,
    ctx: State<ApiContext>,
    id: IdPath,
) -> Result<Json<DataBody<Document>>> {
    check_read_access(kind, &maybe_auth_user)?;
    let id = parse_id(id)?;

    let document = ctx
        .store
        .resource()
        .get(kind, id)
        .await?
        .ok_or_else(|| not_found(kind, id))?;

    Ok(Json(DataBody::new(document.public(kind))))
}

async fn create_resource(
    auth_user: AuthUser,
    Extension(kind): Extension<ResourceKind>,
    ctx: State<ApiContext>,
    JsonBody(mut fields): JsonBody<Map<String, Value>>,
) -> Result<(StatusCode, Json<DataBody<Document>>)> {
    prepare_fields(kind, &mut fields, Mode::Create).await?;

    // Remember who created it; users don't belong to anybody.
    if kind != ResourceKind::User {
        fields.insert("user".to_string(), auth_user.user_id.to_string().into());
    }

    let document = ctx.store.resource().create(kind, fields).await?;

    Ok((StatusCode::CREATED, Json(DataBody::new(document.public(kind)))))
}

async fn update_resource(
    _auth_user: AuthUser,
    Extension(kind): Extension<ResourceKind>,
    ctx: State<ApiContext>,
    id: IdPath,
    JsonBody(mut fields): JsonBody<Map<String, Value>>,
) -> Result<Json<DataBody<Document>>> {
    let id = parse_id(id)?;
    prepare_fields(kind, &mut fields, Mode::Update).await?;
    // Nobody gets to reassign ownership through an update.
    fields.remove("user");

    let store = ctx.store.resource();
    let document = if fields.is_empty() {
        // Nothing to change, so this is just a `GET`.
        store.get(kind, id).await?
    } else {
        store.update(kind, id, fields).await?
    }
    .ok_or_else(|| not_found(kind, id))?;

    Ok(Json(DataBody::new(document.public(kind))))
}

async fn delete_resource(
    _auth_user: AuthUser,
    Extension(kind): Extension<ResourceKind>,
    ctx: State<ApiContext>,
    id: IdPath,
) -> Result<Json<DataBody<Map<String, Value>>>> {
    let id = parse_id(id)?;

    if !ctx.store.resource().delete(kind, id).await? {
        return Err(not_found(kind, id));
    }

    Ok(Json(DataBody::new(Map::new())))
}

async fn upload_photo(
    _auth_user: AuthUser,
    Extension(kind): Extension<ResourceKind>,
    ctx: State<ApiContext>,
    id: IdPath,
    // Taken as a `Result` so a rejection goes through our error type like everything else.
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<DataBody<String>>> {
    let id = parse_id(id)?;
    let store = ctx.store.resource();
    store
        .get(kind, id)
        .await?
        .ok_or_else(|| not_found(kind, id))?;

    let mut multipart = multipart?;
    let max_file_upload = ctx.config.max_file_upload;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        if !field
            .content_type()
            .map_or(false, |mime| mime.starts_with("image"))
        {
            return Err(Error::bad_request("Please upload an image file"));
        }

        let extension = field
            .file_name()
            .and_then(|name| std::path::Path::new(name).extension())
            .and_then(OsStr::to_str)
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();

        let bytes = field.bytes().await?;
        if bytes.len() as u64 > max_file_upload {
            return Err(upload_too_large(max_file_upload));
        }

        let file_name = format!("photo_{id}{extension}");
        tokio::fs::write(ctx.config.file_upload_path.join(&file_name), &bytes)
            .await
            .context("problem with file upload")?;

        let mut fields = Map::new();
        fields.insert("photo".to_string(), file_name.clone().into());
        store
            .update(kind, id, fields)
            .await?
            .ok_or_else(|| not_found(kind, id))?;

        return Ok(Json(DataBody::new(file_name)));
    }

    Err(Error::bad_request("Please upload a file"))
}
