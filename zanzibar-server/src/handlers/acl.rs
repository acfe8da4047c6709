use crate::{
    error::ApiResult,
    extract::{ApiJson, ApiPath, ApiQuery},
    middleware::Actor,
    server::ZanzibarServer,
    types::PaginationParams,
};
use auth_zanzibar::{CheckRequest, CheckResponse, Tuple, TuplePage, TupleRequest, TupleWrite};
use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct AclCreatedResponse {
    pub message: String,
    #[serde(flatten)]
    pub write: TupleWrite,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AclDeletedResponse {
    pub message: String,
    pub tuple: Tuple,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginationInfo {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AclListResponse {
    pub tuples: Vec<Tuple>,
    pub pagination: PaginationInfo,
}

impl From<TuplePage> for AclListResponse {
    fn from(page: TuplePage) -> Self {
        Self {
            tuples: page.tuples,
            pagination: PaginationInfo {
                page: page.page,
                page_size: page.page_size,
                total: page.total,
                has_more: page.has_more,
            },
        }
    }
}

/// POST /acl
pub async fn create_acl(
    State(server): State<ZanzibarServer>,
    Actor(actor): Actor,
    ApiJson(request): ApiJson<TupleRequest>,
) -> ApiResult<(StatusCode, Json<AclCreatedResponse>)> {
    let write = server.acl.create_tuple(&actor, &request).await?;
    Ok((
        StatusCode::CREATED,
        Json(AclCreatedResponse {
            message: "ACL created successfully".to_string(),
            write,
        }),
    ))
}

/// DELETE /acl
pub async fn delete_acl(
    State(server): State<ZanzibarServer>,
    Actor(actor): Actor,
    ApiJson(request): ApiJson<TupleRequest>,
) -> ApiResult<Json<AclDeletedResponse>> {
    let tuple = server.acl.delete_tuple(&actor, &request).await?;
    Ok(Json(AclDeletedResponse {
        message: "ACL deleted successfully".to_string(),
        tuple,
    }))
}

/// GET /acl/check?object=&relation=&user=
pub async fn check_acl(
    State(server): State<ZanzibarServer>,
    ApiQuery(request): ApiQuery<CheckRequest>,
) -> ApiResult<Json<CheckResponse>> {
    Ok(Json(server.acl.check(&request).await?))
}

/// GET /acl/object/:object
pub async fn list_by_object(
    State(server): State<ZanzibarServer>,
    actor: Option<Actor>,
    ApiPath(object): ApiPath<String>,
    ApiQuery(params): ApiQuery<PaginationParams>,
) -> ApiResult<Json<AclListResponse>> {
    let page = server
        .acl
        .list_by_object(actor.as_ref().map(|a| &a.0), &object, params.to_request())
        .await?;
    Ok(Json(page.into()))
}

/// GET /acl/user/:user
pub async fn list_by_user(
    State(server): State<ZanzibarServer>,
    actor: Option<Actor>,
    ApiPath(user): ApiPath<String>,
    ApiQuery(params): ApiQuery<PaginationParams>,
) -> ApiResult<Json<AclListResponse>> {
    let page = server
        .acl
        .list_by_user(actor.as_ref().map(|a| &a.0), &user, params.to_request())
        .await?;
    Ok(Json(page.into()))
}
