use crate::collection::Collection;
use crate::document::{Document, IntoDocument};
use crate::error::Result;
use crate::query::Query;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The ordered outcome of a query or bulk insert.
///
/// A result set is a snapshot: later mutations of the collection do not
/// change it. Its query and mutation methods forward to the owning
/// collection, so chained calls always see live data.
#[derive(Clone)]
pub struct ResultSet {
    collection: Collection,
    documents: Vec<Option<Arc<Document>>>,
}

impl ResultSet {
    pub(crate) fn new(collection: Collection, documents: Vec<Option<Arc<Document>>>) -> Self {
        ResultSet {
            collection,
            documents,
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Number of slots, empty placeholders from rejected inserts included.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Document at `index`; `None` when out of range or a placeholder.
    pub fn get(&self, index: usize) -> Option<&Document> {
        self.documents.get(index)?.as_deref()
    }

    pub fn first(&self) -> Option<&Document> {
        self.get(0)
    }

    /// Present documents in order, skipping placeholders.
    pub fn iter(&self) -> impl Iterator<Item = &Document> + '_ {
        self.documents.iter().filter_map(|slot| slot.as_deref())
    }

    /// Every slot in order.
    pub fn slots(&self) -> impl Iterator<Item = Option<&Document>> + '_ {
        self.documents.iter().map(|slot| slot.as_deref())
    }

    pub fn ids(&self) -> Vec<&str> {
        self.iter().map(Document::id).collect()
    }

    pub fn to_vec(&self) -> Vec<Document> {
        self.iter().cloned().collect()
    }

    pub fn into_vec(self) -> Vec<Document> {
        self.documents
            .into_iter()
            .flatten()
            .map(|doc| Arc::try_unwrap(doc).unwrap_or_else(|shared| Document::clone(&shared)))
            .collect()
    }

    // ── Delegated to the collection ────────────────────────────────

    pub fn query(&self, query: impl Into<Query>) -> Result<ResultSet> {
        self.collection.query(query)
    }

    pub fn find_one(&self, query: impl Into<Query>) -> Result<Option<Document>> {
        self.collection.find_one(query)
    }

    pub fn search(&self, field: &str, value: impl Into<Value>) -> Result<ResultSet> {
        self.collection.search(field, value)
    }

    pub fn search_one(&self, field: &str, value: impl Into<Value>) -> Result<Option<Document>> {
        self.collection.search_one(field, value)
    }

    pub fn by_containing_keys<S: AsRef<str>>(&self, keys: &[S]) -> Result<ResultSet> {
        self.collection.by_containing_keys(keys)
    }

    pub fn by_containing_keys_one<S: AsRef<str>>(&self, keys: &[S]) -> Result<Option<Document>> {
        self.collection.by_containing_keys_one(keys)
    }

    pub fn insert<D: IntoDocument>(&self, document: D) -> Result<Option<Document>> {
        self.collection.insert(document)
    }

    pub fn insert_many<I, D>(&self, documents: I) -> Result<ResultSet>
    where
        I: IntoIterator<Item = D>,
        D: IntoDocument,
    {
        self.collection.insert_many(documents)
    }

    pub fn delete_one(&self, query: impl Into<Query>) -> Result<bool> {
        self.collection.delete_one(query)
    }

    pub fn delete_many(&self, query: impl Into<Query>) -> Result<bool> {
        self.collection.delete_many(query)
    }

    pub fn update_one(&self, query: impl Into<Query>, update: impl Into<Value>) -> Result<bool> {
        self.collection.update_one(query, update)
    }

    pub fn update_many(&self, query: impl Into<Query>, update: impl Into<Value>) -> Result<bool> {
        self.collection.update_many(query, update)
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Document;
    type IntoIter = Box<dyn Iterator<Item = &'a Document> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("collection", &self.collection.name())
            .field("documents", &self.slots().collect::<Vec<_>>())
            .finish()
    }
}
