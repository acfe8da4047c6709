//! Zanzibar-style relationship-based authorization
//!
//! This crate answers "does user U hold relation R on object O?" from:
//! - Direct relationship tuples kept in a dual-indexed tuple store
//! - A relation hierarchy (owner implies editor implies viewer by default)
//! - Computed-userset rewrites declared by versioned namespace schemas
//!
//! Check results are memoised in a decision cache that tuple and namespace
//! writes invalidate.
//!
//! # Core Concepts
//!
//! - **Object**: A protected resource, `namespace:id` (e.g. `doc:readme`)
//! - **User**: A principal `type:id` (e.g. `user:alice`, `group:eng`)
//! - **Relation**: The relationship between user and object (e.g. owner, viewer)
//! - **Tuple**: The statement "user has relation on object"
//! - **Namespace**: The schema declaring the relations of one object type
//!
//! # Example
//!
//! ```rust,no_run
//! use auth_zanzibar::{
//!     AclService, CheckRequest, InMemoryDecisionCache, NamespaceRequest,
//!     SledNamespaceRegistry, SledTupleStore, TupleRequest, User,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = AclService::new(
//!         Arc::new(SledTupleStore::temporary()?),
//!         Arc::new(SledNamespaceRegistry::temporary()?),
//!         Arc::new(InMemoryDecisionCache::new()),
//!     );
//!
//!     service
//!         .put_namespace(serde_json::from_str::<NamespaceRequest>(
//!             r#"{"namespace":"doc","relations":{"owner":{"union":[{"this":{}}]},"viewer":{"union":[{"this":{}}]}}}"#,
//!         )?)
//!         .await?;
//!
//!     let alice = User::parse("user:alice")?;
//!     service
//!         .create_tuple(&alice, &TupleRequest::new("doc:readme", "owner", "user:alice"))
//!         .await?;
//!
//!     let decision = service
//!         .check(&CheckRequest::new("doc:readme", "viewer", "user:alice"))
//!         .await?;
//!     assert!(decision.authorized);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod check;
pub mod error;
pub mod models;
pub mod namespace;
pub mod repository;
pub mod service;

pub use cache::{DecisionCache, InMemoryDecisionCache, RedisDecisionCache};
pub use check::{
    CheckConfig, ManageGrant, ManagePolicy, PermissionChecker, RelationHierarchy,
};
pub use error::*;
pub use models::*;
pub use namespace::{NamespaceRegistry, SledNamespaceRegistry};
pub use repository::{PageRequest, SledTupleStore, TuplePage, TupleStore};
pub use service::{AclService, TupleWrite};
