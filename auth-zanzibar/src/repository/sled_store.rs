//! Tuple storage on an embedded sled tree.
//!
//! Primary and reverse records share one tree so that a single
//! [`sled::Batch`] covers both halves of a write. Keys sort
//! lexicographically, which gives ordered prefix scans for both
//! `object#...` and `user@...` lookups.

use super::{PageRequest, TuplePage, TupleStore};
use crate::{error::Result, models::*};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info, warn};

const TUPLE_TREE: &str = "acl_tuples";
const MIGRATION_BATCH_SIZE: usize = 1000;

/// sled-backed [`TupleStore`].
#[derive(Clone)]
pub struct SledTupleStore {
    tree: sled::Tree,
}

impl SledTupleStore {
    /// Open or create the store in the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    /// Open a throwaway store that is removed when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(&db)
    }

    /// Use the tuple tree of an already opened database.
    pub fn from_db(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(TUPLE_TREE)?,
        })
    }

    fn decode_record(key: &[u8], value: &[u8]) -> Option<Tuple> {
        match serde_json::from_slice::<Tuple>(value) {
            Ok(tuple) => Some(tuple),
            Err(err) => {
                warn!(
                    key = %String::from_utf8_lossy(key),
                    error = %err,
                    "Skipping malformed tuple record"
                );
                None
            }
        }
    }

    fn scan_primary(&self, prefix: &str) -> Result<Vec<Tuple>> {
        let mut tuples = Vec::new();
        for entry in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            if let Some(tuple) = Self::decode_record(&key, &value) {
                tuples.push(tuple);
            }
        }
        Ok(tuples)
    }

    fn scan_reverse(&self, user: &User, relation: Option<&Relation>) -> Result<Vec<Tuple>> {
        let prefix = format!("{user}{USER_SEPARATOR}");
        let mut tuples = Vec::new();

        for entry in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let hint = match std::str::from_utf8(&key)
                .map_err(|err| err.to_string())
                .and_then(|key| Tuple::from_reverse_key(key).map_err(|err| err.to_string()))
            {
                Ok(hint) => hint,
                Err(error) => {
                    warn!(key = %String::from_utf8_lossy(&key), %error, "Skipping malformed reverse record");
                    continue;
                }
            };

            if relation.is_some_and(|relation| *relation != hint.relation) {
                continue;
            }

            // Reverse records carry no payload; the primary record is authoritative.
            let primary = hint.primary_key();
            match self.tree.get(primary.as_bytes())? {
                Some(value) => {
                    if let Some(tuple) = Self::decode_record(primary.as_bytes(), &value) {
                        tuples.push(tuple);
                    }
                }
                None => debug!(key = %primary, "Reverse record without primary record"),
            }
        }

        Ok(tuples)
    }
}

#[async_trait]
impl TupleStore for SledTupleStore {
    async fn write(&self, tuple: &Tuple) -> Result<()> {
        self.write_batch(std::slice::from_ref(tuple)).await
    }

    async fn write_batch(&self, tuples: &[Tuple]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for tuple in tuples {
            batch.insert(tuple.primary_key().as_bytes(), serde_json::to_vec(tuple)?);
            batch.insert(tuple.reverse_key().as_bytes(), Vec::<u8>::new());
        }
        self.tree.apply_batch(batch)?;

        debug!(count = tuples.len(), "Wrote tuple batch");
        Ok(())
    }

    async fn delete(&self, tuple: &Tuple) -> Result<()> {
        let mut batch = sled::Batch::default();
        batch.remove(tuple.primary_key().as_bytes());
        batch.remove(tuple.reverse_key().as_bytes());
        self.tree.apply_batch(batch)?;

        debug!(tuple = %tuple, "Deleted tuple");
        Ok(())
    }

    async fn get(
        &self,
        object: &Object,
        relation: &Relation,
        user: &User,
    ) -> Result<Option<Tuple>> {
        let key = primary_key(object, relation, user);
        Ok(self
            .tree
            .get(key.as_bytes())?
            .and_then(|value| Self::decode_record(key.as_bytes(), &value)))
    }

    async fn exists(&self, object: &Object, relation: &Relation, user: &User) -> Result<bool> {
        let key = primary_key(object, relation, user);
        Ok(self.tree.contains_key(key.as_bytes())?)
    }

    async fn list_by_object(
        &self,
        object: &Object,
        relation: Option<&Relation>,
    ) -> Result<Vec<Tuple>> {
        let prefix = match relation {
            Some(relation) => format!("{object}{RELATION_SEPARATOR}{relation}{USER_SEPARATOR}"),
            None => format!("{object}{RELATION_SEPARATOR}"),
        };
        self.scan_primary(&prefix)
    }

    async fn list_by_user(&self, user: &User, relation: Option<&Relation>) -> Result<Vec<Tuple>> {
        self.scan_reverse(user, relation)
    }

    async fn list_by_object_paged(&self, object: &Object, page: PageRequest) -> Result<TuplePage> {
        let matches = self.list_by_object(object, None).await?;
        Ok(TuplePage::collect(matches, page))
    }

    async fn list_by_user_paged(&self, user: &User, page: PageRequest) -> Result<TuplePage> {
        let matches = self.list_by_user(user, None).await?;
        Ok(TuplePage::collect(matches, page))
    }

    async fn has_tuples_for_object(&self, object: &Object) -> Result<bool> {
        let prefix = format!("{object}{RELATION_SEPARATOR}");
        Ok(self.tree.scan_prefix(prefix.as_bytes()).next().transpose()?.is_some())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.tree.is_empty())
    }

    async fn migrate_reverse_index(&self) -> Result<usize> {
        let mut batch = sled::Batch::default();
        let mut pending = 0usize;
        let mut rebuilt = 0usize;

        for entry in self.tree.iter() {
            let (key, _) = entry?;
            // Reverse keys never parse as primary keys.
            let Ok(tuple) = std::str::from_utf8(&key)
                .map_err(|err| err.to_string())
                .and_then(|key| Tuple::from_primary_key(key).map_err(|err| err.to_string()))
            else {
                continue;
            };

            let reverse = tuple.reverse_key();
            if self.tree.contains_key(reverse.as_bytes())? {
                continue;
            }

            batch.insert(reverse.as_bytes(), Vec::<u8>::new());
            pending += 1;

            if pending == MIGRATION_BATCH_SIZE {
                self.tree.apply_batch(std::mem::take(&mut batch))?;
                rebuilt += pending;
                pending = 0;
                info!(rebuilt, "Reverse index migration progress");
            }
        }

        if pending > 0 {
            self.tree.apply_batch(batch)?;
            rebuilt += pending;
        }

        info!(rebuilt, "Reverse index migration complete");
        Ok(rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(object: &str, relation: &str, user: &str) -> Tuple {
        Tuple::parse(object, relation, user).unwrap()
    }

    #[tokio::test]
    async fn test_write_get_delete() {
        let store = SledTupleStore::temporary().unwrap();
        let t = tuple("doc:readme", "owner", "user:alice");

        store.write(&t).await.unwrap();
        assert_eq!(
            store.get(&t.object, &t.relation, &t.user).await.unwrap(),
            Some(t.clone())
        );
        assert!(store.exists(&t.object, &t.relation, &t.user).await.unwrap());
        assert_eq!(store.list_by_user(&t.user, None).await.unwrap(), vec![t.clone()]);

        store.delete(&t).await.unwrap();
        assert!(store.get(&t.object, &t.relation, &t.user).await.unwrap().is_none());
        assert!(store.list_by_object(&t.object, None).await.unwrap().is_empty());
        assert!(store.list_by_user(&t.user, None).await.unwrap().is_empty());
        assert!(store.is_empty().await.unwrap());

        // Deleting again is harmless
        store.delete(&t).await.unwrap();
    }

    #[tokio::test]
    async fn test_object_prefix_does_not_leak_into_similar_ids() {
        let store = SledTupleStore::temporary().unwrap();
        store.write(&tuple("doc:1", "viewer", "user:alice")).await.unwrap();
        store.write(&tuple("doc:10", "viewer", "user:alice")).await.unwrap();
        store.write(&tuple("doc:1", "owner", "user:bob")).await.unwrap();

        let object = Object::parse("doc:1").unwrap();
        assert_eq!(store.list_by_object(&object, None).await.unwrap().len(), 2);

        let viewer = Relation::new("viewer").unwrap();
        let viewers = store.list_by_object(&object, Some(&viewer)).await.unwrap();
        assert_eq!(viewers.len(), 1);
        assert_eq!(viewers[0].user.to_string(), "user:alice");

        let alice = User::parse("user:alice").unwrap();
        assert_eq!(store.list_by_user(&alice, Some(&viewer)).await.unwrap().len(), 2);
        let owner = Relation::new("owner").unwrap();
        assert!(store.list_by_user(&alice, Some(&owner)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped() {
        let store = SledTupleStore::temporary().unwrap();
        store.write(&tuple("doc:1", "viewer", "user:alice")).await.unwrap();
        store
            .tree
            .insert("doc:1#viewer@user:mallory".as_bytes(), "not json".as_bytes())
            .unwrap();
        // Reverse record whose primary record is gone
        store
            .tree
            .insert("user:ghost@doc:1#viewer".as_bytes(), Vec::<u8>::new())
            .unwrap();

        let object = Object::parse("doc:1").unwrap();
        assert_eq!(store.list_by_object(&object, None).await.unwrap().len(), 1);
        let ghost = User::parse("user:ghost").unwrap();
        assert!(store.list_by_user(&ghost, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_batch_and_object_presence() {
        let store = SledTupleStore::temporary().unwrap();
        let object = Object::parse("doc:new").unwrap();
        assert!(!store.has_tuples_for_object(&object).await.unwrap());

        store
            .write_batch(&[
                tuple("doc:new", "editor", "user:alice"),
                tuple("doc:new", "owner", "user:admin"),
            ])
            .await
            .unwrap();

        assert!(store.has_tuples_for_object(&object).await.unwrap());
        assert_eq!(store.list_by_object(&object, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_migrate_reverse_index() {
        let store = SledTupleStore::temporary().unwrap();
        let a = tuple("doc:1", "viewer", "user:alice");
        let b = tuple("doc:2", "owner", "user:alice");
        store.write(&a).await.unwrap();
        store.write(&b).await.unwrap();

        store.tree.remove(a.reverse_key().as_bytes()).unwrap();
        let alice = User::parse("user:alice").unwrap();
        assert_eq!(store.list_by_user(&alice, None).await.unwrap().len(), 1);

        assert_eq!(store.migrate_reverse_index().await.unwrap(), 1);
        assert_eq!(store.list_by_user(&alice, None).await.unwrap().len(), 2);
        assert_eq!(store.migrate_reverse_index().await.unwrap(), 0);
    }
}
