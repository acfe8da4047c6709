use crate::{
    handlers::{acl, health, namespace},
    server::ZanzibarServer,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Create ACL tuple and check routes
pub fn acl_routes() -> Router<ZanzibarServer> {
    Router::new()
        .route("/acl", post(acl::create_acl).delete(acl::delete_acl))
        .route("/acl/check", get(acl::check_acl))
        .route("/acl/object/:object", get(acl::list_by_object))
        .route("/acl/user/:user", get(acl::list_by_user))
}

/// Create namespace schema routes
pub fn namespace_routes() -> Router<ZanzibarServer> {
    Router::new()
        .route("/namespace", post(namespace::create_namespace))
        .route(
            "/namespace/:namespace",
            get(namespace::get_namespace).delete(namespace::delete_namespace),
        )
        .route(
            "/namespace/:namespace/version/:version",
            get(namespace::get_namespace_version),
        )
        .route("/namespaces", get(namespace::list_namespaces))
}

/// All routes: health at the root, the API both at the root and under `/api/v1`
pub fn create_routes() -> Router<ZanzibarServer> {
    let api = acl_routes().merge(namespace_routes());

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1", api.clone())
        .merge(api)
}
