use crate::error::{Result, ZanzibarError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Separator between object and relation in a primary key.
pub const RELATION_SEPARATOR: char = '#';
/// Separator between the relation half and the user half of a key.
pub const USER_SEPARATOR: char = '@';

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Validate a relation or namespace name.
pub(crate) fn validate_name(kind: &str, name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err(format!("{kind} must not be empty"));
    }
    if !name.chars().all(is_name_char) {
        return Err(format!(
            "{kind} '{name}' may only contain letters, digits, '_', '-' and '.'"
        ));
    }
    Ok(())
}

fn contains_key_separator(value: &str) -> bool {
    value.contains(RELATION_SEPARATOR) || value.contains(USER_SEPARATOR)
}

/// A namespaced resource identifier, `namespace:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Object {
    namespace: String,
    id: String,
}

impl Object {
    pub fn new(namespace: &str, id: &str) -> Result<Self> {
        Self::parse(&format!("{namespace}:{id}"))
    }

    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || {
            ZanzibarError::InvalidObject(format!(
                "'{value}' must be in format 'namespace:object_id'"
            ))
        };
        if contains_key_separator(value) {
            return Err(invalid());
        }
        let mut parts = value.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(id), None) if !namespace.is_empty() && !id.is_empty() => {
                Ok(Self {
                    namespace: namespace.to_string(),
                    id: id.to_string(),
                })
            }
            _ => Err(invalid()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

impl FromStr for Object {
    type Err = ZanzibarError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Object {
    type Error = ZanzibarError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Object> for String {
    fn from(object: Object) -> Self {
        object.to_string()
    }
}

/// A relation name such as `owner` or `viewer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Relation(String);

impl Relation {
    pub fn new(name: &str) -> Result<Self> {
        validate_name("relation", name).map_err(ZanzibarError::InvalidRelation)?;
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Relation {
    type Err = ZanzibarError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Relation {
    type Error = ZanzibarError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Relation> for String {
    fn from(relation: Relation) -> Self {
        relation.0
    }
}

/// A principal (`user:alice`, `group:eng`) or an indirect userset reference
/// (`userset:doc:viewer`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct User {
    user_type: String,
    id: String,
}

impl User {
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || {
            ZanzibarError::InvalidUser(format!(
                "'{value}' must be in format 'user_type:user_id' or 'userset:namespace:relation'"
            ))
        };
        if contains_key_separator(value) {
            return Err(invalid());
        }
        match value.split_once(':') {
            Some((user_type, id)) if !user_type.is_empty() && !id.is_empty() => Ok(Self {
                user_type: user_type.to_string(),
                id: id.to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    pub fn user_type(&self) -> &str {
        &self.user_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Interpret this user as an object, for computed-userset hops
    /// (`doc:1#editor@group:eng` makes `group:eng` the next object to evaluate).
    pub fn as_object(&self) -> Option<Object> {
        Object::parse(&self.to_string()).ok()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_type, self.id)
    }
}

impl FromStr for User {
    type Err = ZanzibarError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for User {
    type Error = ZanzibarError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<User> for String {
    fn from(user: User) -> Self {
        user.to_string()
    }
}

impl From<&Object> for User {
    fn from(object: &Object) -> Self {
        Self {
            user_type: object.namespace.clone(),
            id: object.id.clone(),
        }
    }
}

/// An ACL grant: `user` holds `relation` on `object`.
///
/// The triple is the identity of the record; writing it again is an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple {
    pub object: Object,
    pub relation: Relation,
    pub user: User,
}

impl Tuple {
    pub fn new(object: Object, relation: Relation, user: User) -> Self {
        Self {
            object,
            relation,
            user,
        }
    }

    /// Parse and validate the three raw components.
    pub fn parse(object: &str, relation: &str, user: &str) -> Result<Self> {
        Ok(Self {
            object: Object::parse(object)?,
            relation: Relation::new(relation)?,
            user: User::parse(user)?,
        })
    }

    /// Primary record key: `object#relation@user`.
    pub fn primary_key(&self) -> String {
        primary_key(&self.object, &self.relation, &self.user)
    }

    /// Reverse-index key: `user@object#relation`.
    pub fn reverse_key(&self) -> String {
        format!(
            "{}{USER_SEPARATOR}{}{RELATION_SEPARATOR}{}",
            self.user, self.object, self.relation
        )
    }

    /// Parse a primary record key back into a tuple.
    pub fn from_primary_key(key: &str) -> Result<Self> {
        let (object, rest) = key.split_once(RELATION_SEPARATOR).ok_or_else(|| {
            ZanzibarError::ValidationError(format!("invalid tuple key '{key}': missing '#'"))
        })?;
        let (relation, user) = rest.split_once(USER_SEPARATOR).ok_or_else(|| {
            ZanzibarError::ValidationError(format!("invalid tuple key '{key}': missing '@'"))
        })?;
        Self::parse(object, relation, user)
    }

    /// Parse a reverse-index key back into a tuple.
    pub fn from_reverse_key(key: &str) -> Result<Self> {
        let (user, rest) = key.split_once(USER_SEPARATOR).ok_or_else(|| {
            ZanzibarError::ValidationError(format!("invalid reverse key '{key}': missing '@'"))
        })?;
        let (object, relation) = rest.split_once(RELATION_SEPARATOR).ok_or_else(|| {
            ZanzibarError::ValidationError(format!("invalid reverse key '{key}': missing '#'"))
        })?;
        Self::parse(object, relation, user)
    }
}

pub fn primary_key(object: &Object, relation: &Relation, user: &User) -> String {
    format!("{object}{RELATION_SEPARATOR}{relation}{USER_SEPARATOR}{user}")
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.primary_key())
    }
}

/// Marker for direct membership (`{"this": {}}` on the wire).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThisTerm {}

/// One term of a relation's union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnionTerm {
    /// Users holding the relation directly.
    This(ThisTerm),
    /// Users reached through the targets of `relation` on the same object.
    ComputedUserset { relation: String },
}

impl UnionTerm {
    pub fn this() -> Self {
        UnionTerm::This(ThisTerm {})
    }

    pub fn computed_userset(relation: &str) -> Self {
        UnionTerm::ComputedUserset {
            relation: relation.to_string(),
        }
    }
}

/// Ordered union of terms defining a relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub union: Vec<UnionTerm>,
}

impl RelationRule {
    pub fn union(terms: Vec<UnionTerm>) -> Self {
        Self { union: terms }
    }

    /// Relations referenced through computed-userset terms.
    pub fn computed_relations(&self) -> impl Iterator<Item = &str> {
        self.union.iter().filter_map(|term| match term {
            UnionTerm::ComputedUserset { relation } => Some(relation.as_str()),
            UnionTerm::This(_) => None,
        })
    }
}

/// A versioned namespace schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub namespace: String,
    pub relations: BTreeMap<String, RelationRule>,
    #[serde(default)]
    pub version: u64,
}

impl NamespaceConfig {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            relations: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn with_relation(mut self, name: &str, rule: RelationRule) -> Self {
        self.relations.insert(name.to_string(), rule);
        self
    }

    pub fn relation(&self, name: &str) -> Option<&RelationRule> {
        self.relations.get(name)
    }

    /// Check the schema is well-formed before it is stored.
    pub fn validate(&self) -> Result<()> {
        validate_name("namespace", &self.namespace).map_err(ZanzibarError::InvalidNamespace)?;
        if self.relations.is_empty() {
            return Err(ZanzibarError::ValidationError(format!(
                "namespace '{}' must declare at least one relation",
                self.namespace
            )));
        }
        for (name, rule) in &self.relations {
            validate_name("relation", name).map_err(ZanzibarError::InvalidRelation)?;
            for base in rule.computed_relations() {
                if !self.relations.contains_key(base) {
                    return Err(ZanzibarError::ValidationError(format!(
                        "relation '{name}' references undefined relation '{base}' in namespace '{}'",
                        self.namespace
                    )));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Request / response types
// =============================================================================

/// Body of `POST /acl` and `DELETE /acl`.
///
/// Absent fields deserialize as empty and are rejected by [`TupleRequest::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TupleRequest {
    pub object: String,
    pub relation: String,
    pub user: String,
}

impl TupleRequest {
    pub fn new(object: &str, relation: &str, user: &str) -> Self {
        Self {
            object: object.to_string(),
            relation: relation.to_string(),
            user: user.to_string(),
        }
    }

    /// Validate presence and format of every field.
    pub fn validate(&self) -> Result<Tuple> {
        for (field, value) in [
            ("object", &self.object),
            ("relation", &self.relation),
            ("user", &self.user),
        ] {
            if value.trim().is_empty() {
                return Err(ZanzibarError::ValidationError(format!("{field} is required")));
            }
        }
        Tuple::parse(&self.object, &self.relation, &self.user)
    }
}

/// Query of `GET /acl/check`.
pub type CheckRequest = TupleRequest;

/// The single, explicitly typed decision contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub authorized: bool,
}

/// Body of `POST /namespace`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceRequest {
    pub namespace: String,
    pub relations: BTreeMap<String, RelationRule>,
}

impl From<NamespaceRequest> for NamespaceConfig {
    fn from(request: NamespaceRequest) -> Self {
        Self {
            namespace: request.namespace,
            relations: request.relations,
            version: 0,
        }
    }
}
