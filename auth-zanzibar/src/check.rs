use crate::{
    error::{Result, ZanzibarError},
    models::*,
    namespace::NamespaceRegistry,
    repository::TupleStore,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const OWNER_RELATION: &str = "owner";
pub const DEFAULT_BOOTSTRAP_PRINCIPAL: &str = "user:admin";
/// Object type whose ids are namespace names, e.g. `namespace:doc`.
pub const NAMESPACE_OBJECT_TYPE: &str = "namespace";

/// Ordered relation ranks, strongest first. Holding a relation implies every
/// relation ranked below it on the same object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct RelationHierarchy {
    levels: Vec<Relation>,
}

impl RelationHierarchy {
    pub fn new<I, S>(levels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let levels = levels
            .into_iter()
            .map(|level| Relation::new(level.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { levels })
    }

    /// A hierarchy that implies nothing.
    pub fn flat() -> Self {
        Self { levels: Vec::new() }
    }

    /// Relations ranked strictly above `relation`.
    pub fn stronger_than(&self, relation: &Relation) -> &[Relation] {
        match self.levels.iter().position(|level| level == relation) {
            Some(rank) => self.levels.get(..rank).unwrap_or_default(),
            None => &[],
        }
    }

    pub fn levels(&self) -> &[Relation] {
        &self.levels
    }
}

impl Default for RelationHierarchy {
    fn default() -> Self {
        Self::new(["owner", "editor", "viewer"]).unwrap_or_else(|_| Self::flat())
    }
}

impl TryFrom<Vec<String>> for RelationHierarchy {
    type Error = ZanzibarError;

    fn try_from(levels: Vec<String>) -> Result<Self> {
        Self::new(levels)
    }
}

impl From<RelationHierarchy> for Vec<String> {
    fn from(hierarchy: RelationHierarchy) -> Self {
        hierarchy.levels.into_iter().map(String::from).collect()
    }
}

/// Limits applied to a single top-level check.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub hierarchy: RelationHierarchy,
    /// Computed-userset hops followed before a branch is cut off
    pub max_depth: usize,
    /// Deadline for the whole evaluation, including every hop
    pub timeout: Duration,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            hierarchy: RelationHierarchy::default(),
            max_depth: 25,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Who may create or delete tuples on an object.
#[derive(Debug, Clone)]
pub struct ManagePolicy {
    /// Actor with one-time setup authority while the store is empty
    pub bootstrap_principal: Option<User>,
    /// Let the first writer of an object with no tuples manage it
    pub allow_first_writer: bool,
    /// Relation on `namespace:{ns}` granting management of every object in `ns`
    pub namespace_admin_relation: Option<Relation>,
    /// Namespaces whose new objects are given to the bootstrap principal
    pub auto_owner_namespaces: Vec<String>,
}

impl Default for ManagePolicy {
    fn default() -> Self {
        Self {
            bootstrap_principal: User::parse(DEFAULT_BOOTSTRAP_PRINCIPAL).ok(),
            allow_first_writer: true,
            namespace_admin_relation: Relation::new("admin").ok(),
            auto_owner_namespaces: vec!["doc".to_string()],
        }
    }
}

/// The rule that let an actor manage an object, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManageGrant {
    Owner,
    NamespaceAdmin,
    FirstWriter,
    Bootstrap,
}

/// Per-call evaluation state threaded through the recursion.
struct CheckContext {
    /// Nodes on the current path; reaching one again is a cycle
    path: HashSet<(Object, Relation)>,
    /// Nodes proven false without any depth or cycle cutoff below them
    settled: HashSet<(Object, Relation)>,
    /// Set when the subtree being evaluated hit a cutoff
    truncated: bool,
    evaluated: usize,
    deadline: Instant,
}

impl CheckContext {
    fn new(timeout: Duration) -> Self {
        Self {
            path: HashSet::new(),
            settled: HashSet::new(),
            truncated: false,
            evaluated: 0,
            deadline: Instant::now() + timeout,
        }
    }
}

/// Permission checker resolving relations through:
/// - direct tuples
/// - the relation hierarchy (owner implies editor implies viewer)
/// - computed usersets declared by the object's namespace
pub struct PermissionChecker {
    store: Arc<dyn TupleStore>,
    namespaces: Arc<dyn NamespaceRegistry>,
    config: CheckConfig,
    policy: ManagePolicy,
}

impl PermissionChecker {
    pub fn new(store: Arc<dyn TupleStore>, namespaces: Arc<dyn NamespaceRegistry>) -> Self {
        Self {
            store,
            namespaces,
            config: CheckConfig::default(),
            policy: ManagePolicy::default(),
        }
    }

    pub fn with_config(mut self, config: CheckConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_policy(mut self, policy: ManagePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    pub fn policy(&self) -> &ManagePolicy {
        &self.policy
    }

    /// Check if `user` holds `relation` on `object`
    pub async fn check(&self, object: &Object, relation: &Relation, user: &User) -> Result<bool> {
        let mut context = CheckContext::new(self.config.timeout);
        let allowed = self
            .check_recursive(object, relation, user, &mut context, 0)
            .await?;

        debug!(
            object = %object,
            relation = %relation,
            user = %user,
            allowed,
            evaluated = context.evaluated,
            "Permission check completed"
        );
        Ok(allowed)
    }

    fn check_recursive<'a>(
        &'a self,
        object: &'a Object,
        relation: &'a Relation,
        user: &'a User,
        context: &'a mut CheckContext,
        depth: usize,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if depth > self.config.max_depth {
                warn!(
                    object = %object,
                    relation = %relation,
                    depth,
                    "Maximum check depth exceeded, treating branch as unauthorized"
                );
                context.truncated = true;
                return Ok(false);
            }

            let node = (object.clone(), relation.clone());
            if context.settled.contains(&node) {
                return Ok(false);
            }
            // A node already on the path means a cycle in the rewrite graph
            if !context.path.insert(node.clone()) {
                context.truncated = true;
                return Ok(false);
            }

            let outer_truncated = std::mem::replace(&mut context.truncated, false);
            let result = self.evaluate(object, relation, user, context, depth).await;
            context.path.remove(&node);

            // Cut-off subtrees may succeed on a shorter path, so only clean
            // negatives are remembered
            if matches!(result, Ok(false)) && !context.truncated {
                context.settled.insert(node);
            }
            context.truncated |= outer_truncated;
            result
        })
    }

    async fn evaluate(
        &self,
        object: &Object,
        relation: &Relation,
        user: &User,
        context: &mut CheckContext,
        depth: usize,
    ) -> Result<bool> {
        if Instant::now() >= context.deadline {
            warn!(object = %object, relation = %relation, user = %user, "Permission check deadline exceeded");
            return Err(ZanzibarError::DeadlineExceeded);
        }
        context.evaluated += 1;

        // 1. Direct tuple
        if self.store.exists(object, relation, user).await? {
            debug!(object = %object, relation = %relation, "Direct permission found");
            return Ok(true);
        }

        // 2. Any relation ranked above this one
        for stronger in self.config.hierarchy.stronger_than(relation) {
            if self.store.exists(object, stronger, user).await? {
                debug!(object = %object, relation = %stronger, "Inherited permission found");
                return Ok(true);
            }
        }

        // 3. Namespace rewrites
        let config = match self.namespaces.get(object.namespace()).await {
            Ok(config) => config,
            Err(ZanzibarError::NamespaceNotFound(_) | ZanzibarError::InvalidNamespace(_)) => {
                debug!(namespace = object.namespace(), "Namespace not defined");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        let Some(rule) = config.relation(relation.as_str()) else {
            debug!(namespace = object.namespace(), relation = %relation, "Relation not defined");
            return Ok(false);
        };

        for base in rule.computed_relations() {
            let base = Relation::new(base)?;
            for tuple in self.store.list_by_object(object, Some(&base)).await? {
                let Some(target) = tuple.user.as_object() else {
                    continue;
                };
                if self
                    .check_recursive(&target, &base, user, context, depth + 1)
                    .await?
                {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// Decide whether `actor` may create or delete tuples on `object`.
    ///
    /// Rules are tried in order: explicit owner, namespace admin, first
    /// writer of an object without tuples, bootstrap principal on an empty
    /// store. `None` means the actor is not allowed.
    pub async fn authorize_manage(
        &self,
        object: &Object,
        actor: &User,
    ) -> Result<Option<ManageGrant>> {
        let owner = Relation::new(OWNER_RELATION)?;
        if self.check(object, &owner, actor).await? {
            return Ok(Some(ManageGrant::Owner));
        }

        if let Some(admin) = &self.policy.namespace_admin_relation {
            let namespace_object = Object::new(NAMESPACE_OBJECT_TYPE, object.namespace())?;
            if self.check(&namespace_object, admin, actor).await? {
                return Ok(Some(ManageGrant::NamespaceAdmin));
            }
        }

        if self.policy.allow_first_writer && !self.store.has_tuples_for_object(object).await? {
            return Ok(Some(ManageGrant::FirstWriter));
        }

        if self.policy.bootstrap_principal.as_ref() == Some(actor) && self.store.is_empty().await? {
            return Ok(Some(ManageGrant::Bootstrap));
        }

        Ok(None)
    }

    /// The owner grant to add alongside `tuple` so that a new object in an
    /// auto-owned namespace never ends up without an owner.
    pub async fn auto_owner_grant(&self, tuple: &Tuple) -> Result<Option<Tuple>> {
        let Some(principal) = &self.policy.bootstrap_principal else {
            return Ok(None);
        };
        if !self
            .policy
            .auto_owner_namespaces
            .iter()
            .any(|namespace| namespace == tuple.object.namespace())
        {
            return Ok(None);
        }

        let owner = Relation::new(OWNER_RELATION)?;
        if tuple.relation == owner
            || !self.store.list_by_object(&tuple.object, Some(&owner)).await?.is_empty()
        {
            return Ok(None);
        }

        Ok(Some(Tuple::new(tuple.object.clone(), owner, principal.clone())))
    }
}
