use crate::{
    error::ApiResult,
    extract::{ApiJson, ApiPath},
    server::ZanzibarServer,
};
use auth_zanzibar::{NamespaceConfig, NamespaceRequest};
use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
pub struct NamespaceCreatedResponse {
    pub message: String,
    pub namespace: String,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamespaceListResponse {
    pub namespaces: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /namespace
///
/// Schema administration is restricted to operators by the proxy in front of
/// this service, so no caller identity is required here.
pub async fn create_namespace(
    State(server): State<ZanzibarServer>,
    ApiJson(request): ApiJson<NamespaceRequest>,
) -> ApiResult<(StatusCode, Json<NamespaceCreatedResponse>)> {
    let stored = server.acl.put_namespace(request).await?;
    info!(
        namespace = %stored.namespace,
        version = stored.version,
        "Namespace created/updated"
    );

    Ok((
        StatusCode::CREATED,
        Json(NamespaceCreatedResponse {
            message: "Namespace created successfully".to_string(),
            namespace: stored.namespace,
            version: stored.version,
        }),
    ))
}

/// GET /namespace/:namespace
pub async fn get_namespace(
    State(server): State<ZanzibarServer>,
    ApiPath(namespace): ApiPath<String>,
) -> ApiResult<Json<NamespaceConfig>> {
    Ok(Json(server.acl.get_namespace(&namespace).await?))
}

/// GET /namespace/:namespace/version/:version
pub async fn get_namespace_version(
    State(server): State<ZanzibarServer>,
    ApiPath((namespace, version)): ApiPath<(String, u64)>,
) -> ApiResult<Json<NamespaceConfig>> {
    Ok(Json(
        server.acl.get_namespace_version(&namespace, version).await?,
    ))
}

/// GET /namespaces
pub async fn list_namespaces(
    State(server): State<ZanzibarServer>,
) -> ApiResult<Json<NamespaceListResponse>> {
    Ok(Json(NamespaceListResponse {
        namespaces: server.acl.list_namespaces().await?,
    }))
}

/// DELETE /namespace/:namespace
pub async fn delete_namespace(
    State(server): State<ZanzibarServer>,
    ApiPath(namespace): ApiPath<String>,
) -> ApiResult<Json<MessageResponse>> {
    server.acl.delete_namespace(&namespace).await?;
    Ok(Json(MessageResponse {
        message: "Namespace deleted successfully".to_string(),
    }))
}
