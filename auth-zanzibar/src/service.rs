use crate::{
    cache::{self, DecisionCache},
    check::{CheckConfig, ManageGrant, ManagePolicy, PermissionChecker, NAMESPACE_OBJECT_TYPE},
    error::{Result, ZanzibarError},
    models::*,
    namespace::NamespaceRegistry,
    repository::{PageRequest, TuplePage, TupleStore},
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a successful tuple write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleWrite {
    pub tuple: Tuple,
    /// Rule that authorised the actor
    pub grant: ManageGrant,
    /// Ownership assigned to the bootstrap principal alongside the write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_owner: Option<Tuple>,
}

/// Entry points for ACL and namespace management.
///
/// Reads go cache first and fall back to the permission checker; writes are
/// authorised through [`PermissionChecker::authorize_manage`] and invalidate
/// every cached decision on the touched object.
pub struct AclService {
    store: Arc<dyn TupleStore>,
    namespaces: Arc<dyn NamespaceRegistry>,
    cache: Arc<dyn DecisionCache>,
    checker: PermissionChecker,
    cache_ttl: Duration,
    /// When set, listing requires this relation on `namespace:{ns}`
    listing_relation: Option<Relation>,
    /// Bumped before every invalidation; a check that saw it move while
    /// evaluating must not leave its result cached
    invalidations: AtomicU64,
}

impl AclService {
    pub fn new(
        store: Arc<dyn TupleStore>,
        namespaces: Arc<dyn NamespaceRegistry>,
        cache: Arc<dyn DecisionCache>,
    ) -> Self {
        let checker = PermissionChecker::new(store.clone(), namespaces.clone());
        Self {
            store,
            namespaces,
            cache,
            checker,
            cache_ttl: cache::DEFAULT_TTL,
            listing_relation: None,
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn with_check_config(mut self, config: CheckConfig) -> Self {
        self.checker = self.checker.with_config(config);
        self
    }

    pub fn with_manage_policy(mut self, policy: ManagePolicy) -> Self {
        self.checker = self.checker.with_policy(policy);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_listing_relation(mut self, relation: Option<Relation>) -> Self {
        self.listing_relation = relation;
        self
    }

    pub fn checker(&self) -> &PermissionChecker {
        &self.checker
    }

    pub fn store(&self) -> &Arc<dyn TupleStore> {
        &self.store
    }

    // =========================================================================
    // Tuples
    // =========================================================================

    pub async fn create_tuple(&self, actor: &User, request: &TupleRequest) -> Result<TupleWrite> {
        let tuple = request.validate()?;
        self.validate_schema(&tuple).await?;
        let grant = self.authorize_manage(&tuple.object, actor).await?;

        let auto_owner = self.checker.auto_owner_grant(&tuple).await?;
        match &auto_owner {
            Some(owner) => {
                self.store
                    .write_batch(&[tuple.clone(), owner.clone()])
                    .await?;
                self.invalidate(owner).await;
            }
            None => self.store.write(&tuple).await?,
        }
        self.invalidate(&tuple).await;

        info!(
            object = %tuple.object,
            relation = %tuple.relation,
            user = %tuple.user,
            actor = %actor,
            ?grant,
            auto_owner = auto_owner.is_some(),
            "ACL tuple created"
        );

        Ok(TupleWrite {
            tuple,
            grant,
            auto_owner,
        })
    }

    pub async fn delete_tuple(&self, actor: &User, request: &TupleRequest) -> Result<Tuple> {
        let tuple = request.validate()?;
        let grant = self.authorize_manage(&tuple.object, actor).await?;

        self.store.delete(&tuple).await?;
        self.invalidate(&tuple).await;

        info!(
            object = %tuple.object,
            relation = %tuple.relation,
            user = %tuple.user,
            actor = %actor,
            ?grant,
            "ACL tuple deleted"
        );
        Ok(tuple)
    }

    pub async fn check(&self, request: &CheckRequest) -> Result<CheckResponse> {
        let tuple = request.validate()?;
        let key = cache::decision_key(&tuple.object, &tuple.relation, &tuple.user);

        match self.cache.get(&key).await {
            Ok(Some(authorized)) => {
                debug!(key = %key, authorized, "Authorization cache hit");
                return Ok(CheckResponse { authorized });
            }
            Ok(None) => {}
            Err(err) => warn!(key = %key, error = %err, "Decision cache read failed"),
        }

        let generation = self.invalidations.load(Ordering::SeqCst);
        let authorized = self
            .checker
            .check(&tuple.object, &tuple.relation, &tuple.user)
            .await?;

        if let Err(err) = self.cache.set(&key, authorized, self.cache_ttl).await {
            warn!(key = %key, error = %err, "Decision cache write failed");
        } else if self.invalidations.load(Ordering::SeqCst) != generation {
            // A write landed while evaluating; the result may predate it
            debug!(key = %key, "Dropping decision raced by an invalidation");
            if let Err(err) = self.cache.delete(&key).await {
                warn!(key = %key, error = %err, "Failed to drop raced decision");
            }
        }

        info!(
            object = %tuple.object,
            relation = %tuple.relation,
            user = %tuple.user,
            authorized,
            cache_miss = true,
            "Authorization check"
        );
        Ok(CheckResponse { authorized })
    }

    pub async fn list_by_object(
        &self,
        actor: Option<&User>,
        object: &str,
        page: PageRequest,
    ) -> Result<TuplePage> {
        let object = Object::parse(object)?;
        self.authorize_listing(actor, object.namespace(), &object.to_string())
            .await?;
        self.store.list_by_object_paged(&object, page).await
    }

    pub async fn list_by_user(
        &self,
        actor: Option<&User>,
        user: &str,
        page: PageRequest,
    ) -> Result<TuplePage> {
        let user = User::parse(user)?;
        self.authorize_listing(actor, user.user_type(), &user.to_string())
            .await?;
        self.store.list_by_user_paged(&user, page).await
    }

    // =========================================================================
    // Namespaces
    // =========================================================================

    pub async fn put_namespace(&self, request: NamespaceRequest) -> Result<NamespaceConfig> {
        let stored = self.namespaces.store(request.into()).await?;
        self.invalidate_namespace(&stored.namespace).await;
        Ok(stored)
    }

    pub async fn get_namespace(&self, namespace: &str) -> Result<NamespaceConfig> {
        self.namespaces.get(namespace).await
    }

    pub async fn get_namespace_version(
        &self,
        namespace: &str,
        version: u64,
    ) -> Result<NamespaceConfig> {
        self.namespaces.get_version(namespace, version).await
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        self.namespaces.list().await
    }

    pub async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let existed = self.namespaces.delete(namespace).await?;
        self.invalidate_namespace(namespace).await;
        info!(namespace, existed, "Namespace deleted");
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Reject tuples whose namespace or relation is not declared.
    async fn validate_schema(&self, tuple: &Tuple) -> Result<()> {
        let namespace = tuple.object.namespace();
        let config = match self.namespaces.get(namespace).await {
            Ok(config) => config,
            Err(ZanzibarError::NamespaceNotFound(_)) => {
                return Err(ZanzibarError::ValidationError(format!(
                    "namespace '{namespace}' does not exist"
                )));
            }
            Err(err) => return Err(err),
        };

        if config.relation(tuple.relation.as_str()).is_none() {
            return Err(ZanzibarError::ValidationError(format!(
                "relation '{}' is not valid for namespace '{namespace}'",
                tuple.relation
            )));
        }
        Ok(())
    }

    async fn authorize_manage(&self, object: &Object, actor: &User) -> Result<ManageGrant> {
        match self.checker.authorize_manage(object, actor).await? {
            Some(grant) => Ok(grant),
            None => {
                warn!(object = %object, actor = %actor, "ACL management denied");
                Err(ZanzibarError::Forbidden(format!(
                    "{actor} is not allowed to manage ACLs for {object}"
                )))
            }
        }
    }

    async fn authorize_listing(
        &self,
        actor: Option<&User>,
        namespace: &str,
        resource: &str,
    ) -> Result<()> {
        let Some(relation) = &self.listing_relation else {
            return Ok(());
        };
        let Some(actor) = actor else {
            return Err(ZanzibarError::Forbidden(
                "listing ACLs requires an authenticated caller".to_string(),
            ));
        };

        // Callers may always see their own grants
        if actor.to_string() == resource {
            return Ok(());
        }

        let namespace_object = Object::new(NAMESPACE_OBJECT_TYPE, namespace)?;
        if self.checker.check(&namespace_object, relation, actor).await? {
            return Ok(());
        }

        warn!(resource, actor = %actor, "ACL listing denied");
        Err(ZanzibarError::Forbidden(format!(
            "{actor} is not allowed to list ACLs for {resource}"
        )))
    }

    async fn invalidate(&self, tuple: &Tuple) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        let exact = cache::decision_key(&tuple.object, &tuple.relation, &tuple.user);
        if let Err(err) = self.cache.delete(&exact).await {
            warn!(key = %exact, error = %err, "Failed to invalidate cached decision");
        }

        for prefix in [
            cache::object_relation_prefix(&tuple.object, &tuple.relation),
            cache::object_prefix(&tuple.object),
        ] {
            if let Err(err) = self.cache.delete_prefix(&prefix).await {
                warn!(prefix = %prefix, error = %err, "Failed to invalidate cached decisions");
            }
        }
        debug!(tuple = %tuple, "Invalidated authorization cache");
    }

    async fn invalidate_namespace(&self, namespace: &str) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        let prefix = cache::namespace_prefix(namespace);
        if let Err(err) = self.cache.delete_prefix(&prefix).await {
            warn!(prefix = %prefix, error = %err, "Failed to invalidate cached decisions");
        }
    }
}
