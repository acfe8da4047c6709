use crate::{error::Result, models::*};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod sled_store;

pub use sled_store::SledTupleStore;

/// Storage interface for relationship tuples.
///
/// Every tuple is held twice: a primary record keyed by `object#relation@user`
/// and a payload-free reverse record keyed by `user@object#relation`. Both
/// records are written and removed together.
#[async_trait]
pub trait TupleStore: Send + Sync {
    /// Upsert a tuple together with its reverse record
    async fn write(&self, tuple: &Tuple) -> Result<()>;

    /// Upsert several tuples in one atomic batch
    async fn write_batch(&self, tuples: &[Tuple]) -> Result<()>;

    /// Remove a tuple and its reverse record; absent tuples are not an error
    async fn delete(&self, tuple: &Tuple) -> Result<()>;

    async fn get(&self, object: &Object, relation: &Relation, user: &User)
        -> Result<Option<Tuple>>;

    async fn exists(&self, object: &Object, relation: &Relation, user: &User) -> Result<bool> {
        Ok(self.get(object, relation, user).await?.is_some())
    }

    /// Tuples on `object`, optionally restricted to one relation
    async fn list_by_object(
        &self,
        object: &Object,
        relation: Option<&Relation>,
    ) -> Result<Vec<Tuple>>;

    /// Tuples granted to `user`, resolved through the reverse index
    async fn list_by_user(&self, user: &User, relation: Option<&Relation>) -> Result<Vec<Tuple>>;

    async fn list_by_object_paged(&self, object: &Object, page: PageRequest) -> Result<TuplePage>;

    async fn list_by_user_paged(&self, user: &User, page: PageRequest) -> Result<TuplePage>;

    /// Whether any tuple at all references `object`
    async fn has_tuples_for_object(&self, object: &Object) -> Result<bool>;

    /// Whether the store holds no tuples
    async fn is_empty(&self) -> Result<bool>;

    /// Recreate reverse records missing for existing primary records.
    /// Returns the number of records rebuilt.
    async fn migrate_reverse_index(&self) -> Result<usize>;
}

/// A normalised page request. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
}

impl PageRequest {
    pub const DEFAULT_PAGE_SIZE: usize = 50;
    pub const MAX_PAGE_SIZE: usize = 1000;

    /// Build a request, raising `page` to at least 1 and clamping
    /// `page_size` to `1..=1000`.
    pub fn new(page: usize, page_size: usize) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    /// Number of matching records skipped before this page starts
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PAGE_SIZE)
    }
}

/// One page of tuples plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuplePage {
    pub tuples: Vec<Tuple>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

impl TuplePage {
    /// Scan-and-skip pagination over an ordered stream of matches.
    ///
    /// The whole stream is walked so that `total` is exact.
    pub fn collect<I>(matches: I, request: PageRequest) -> Self
    where
        I: IntoIterator<Item = Tuple>,
    {
        let skip = request.offset();
        let mut tuples = Vec::with_capacity(request.page_size.min(64));
        let mut total = 0usize;

        for tuple in matches {
            if total >= skip && tuples.len() < request.page_size {
                tuples.push(tuple);
            }
            total += 1;
        }

        Self {
            tuples,
            total,
            page: request.page,
            page_size: request.page_size,
            has_more: request.page.saturating_mul(request.page_size) < total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuples(n: usize) -> Vec<Tuple> {
        (0..n)
            .map(|i| Tuple::parse("doc:1", "viewer", &format!("user:u{i}")).unwrap())
            .collect()
    }

    #[test]
    fn test_page_request_clamping() {
        assert_eq!(PageRequest::new(0, 0), PageRequest { page: 1, page_size: 1 });
        assert_eq!(PageRequest::new(3, 5000).page_size, 1000);
        assert_eq!(PageRequest::default().page_size, 50);
        assert_eq!(PageRequest::new(3, 10).offset(), 20);
    }

    #[test]
    fn test_collect_pages() {
        let page = TuplePage::collect(tuples(5), PageRequest::new(2, 2));
        assert_eq!(page.tuples.len(), 2);
        assert_eq!(page.total, 5);
        assert!(page.has_more);
        assert_eq!(page.tuples[0].user.id(), "u2");

        let last = TuplePage::collect(tuples(5), PageRequest::new(3, 2));
        assert_eq!(last.tuples.len(), 1);
        assert!(!last.has_more);

        let beyond = TuplePage::collect(tuples(5), PageRequest::new(9, 2));
        assert!(beyond.tuples.is_empty());
        assert_eq!(beyond.total, 5);
    }
}
