pub mod file;

use crate::config::Options;
use crate::document::{normalize, Document, IntoDocument};
use crate::error::{JsonDbError, Result};
use crate::query::{contains_fields, Query};
use crate::result_set::ResultSet;
use crate::watcher::{Reactor, ReactorHandler, Schedule};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

/// Counters describing what a collection has done since it was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    /// Physical writes of the collection file
    pub flushes: u64,
    /// Loads of the collection file, the initial one included
    pub loads: u64,
    /// Loads triggered by an external edit
    pub external_reloads: u64,
    /// Watch events discarded because the file matched our own last write
    pub suppressed_events: u64,
    /// Mutations waiting for the next flush
    pub pending: usize,
}

/// A set of documents mirrored to one JSON file.
///
/// `Collection` is a handle: clones share the same in-memory state, file
/// watch and flush schedule. Mutations are batched so that at most one write
/// happens per flush interval; anything still pending is written by the
/// periodic drain or by [`Collection::close`].
#[derive(Clone)]
pub struct Collection {
    shared: Arc<Shared>,
}

struct Shared {
    path: PathBuf,
    name: String,
    options: Options,
    state: Mutex<State>,
    reactor: Mutex<Option<Reactor>>,
}

struct State {
    collection_id: String,
    documents: IndexMap<String, Arc<Document>>,
    last_flush: Instant,
    pending: usize,
    /// Checksum of the file bytes this process last read or wrote
    checksum: Option<String>,
    /// Set when a watch-triggered load failed; cleared by the next good load
    fault: Option<String>,
    closed: bool,
    stats: CollectionStats,
}

impl Collection {
    /// Open the collection stored at `path`, creating the file if needed.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            let id = uuid::Uuid::new_v4().to_string();
            file::create(&path, &id, options.indent)?;
            log::info!("Created collection file {}", path.display());
        }

        let bytes = file::read(&path)?;
        let parsed = file::decode(&path, &bytes)?;
        let documents = build_documents(&path, parsed.items, &options)?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let state = State {
            collection_id: parsed.id,
            documents,
            last_flush: Instant::now(),
            pending: 0,
            checksum: Some(file::checksum(&bytes)),
            fault: None,
            closed: false,
            stats: CollectionStats {
                loads: 1,
                ..CollectionStats::default()
            },
        };

        let schedule = Schedule {
            watch_debounce: options.watch.then(|| options.watch_debounce()),
            tick: options.batching().then(|| options.flush_interval()),
        };

        let shared = Arc::new(Shared {
            path,
            name,
            options,
            state: Mutex::new(state),
            reactor: Mutex::new(None),
        });

        if schedule.watch_debounce.is_some() || schedule.tick.is_some() {
            let weak: Weak<Shared> = Arc::downgrade(&shared);
            let handler: Weak<dyn ReactorHandler> = weak;
            let reactor = Reactor::start(&shared.path, handler, schedule)?;
            *shared.reactor.lock().unwrap_or_else(PoisonError::into_inner) = Some(reactor);
        }

        log::info!(
            "Opened collection {} ({} documents)",
            shared.path.display(),
            shared.lock().documents.len()
        );

        Ok(Collection { shared })
    }

    /// The identifier stored in the collection file.
    pub fn id(&self) -> String {
        self.shared.lock().collection_id.clone()
    }

    /// File stem of the backing file.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    pub fn len(&self) -> usize {
        self.shared.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CollectionStats {
        let state = self.shared.lock();
        CollectionStats {
            pending: state.pending,
            ..state.stats
        }
    }

    /// Reason the last watch-triggered load failed, if it has not recovered.
    pub fn fault(&self) -> Option<String> {
        self.shared.lock().fault.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// True if both handles refer to the same open collection.
    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// All documents matching every constraint in `query`.
    pub fn query(&self, query: impl Into<Query>) -> Result<ResultSet> {
        let query = query.into();
        let state = self.shared.lock_open()?;
        let documents = state
            .documents
            .values()
            .filter(|doc| query.matches(doc))
            .map(|doc| Some(Arc::clone(doc)))
            .collect();
        Ok(ResultSet::new(self.clone(), documents))
    }

    /// First document matching `query`, in collection order.
    pub fn find_one(&self, query: impl Into<Query>) -> Result<Option<Document>> {
        let query = query.into();
        let state = self.shared.lock_open()?;
        Ok(state
            .documents
            .values()
            .find(|doc| query.matches(doc))
            .map(|doc| Document::clone(doc)))
    }

    pub fn search(&self, field: &str, value: impl Into<Value>) -> Result<ResultSet> {
        self.query(Query::new().field(field, value))
    }

    pub fn search_one(&self, field: &str, value: impl Into<Value>) -> Result<Option<Document>> {
        self.find_one(Query::new().field(field, value))
    }

    /// Documents carrying a non-null value for every named field.
    pub fn by_containing_keys<S: AsRef<str>>(&self, keys: &[S]) -> Result<ResultSet> {
        let state = self.shared.lock_open()?;
        let documents = state
            .documents
            .values()
            .filter(|doc| contains_fields(doc, keys))
            .map(|doc| Some(Arc::clone(doc)))
            .collect();
        Ok(ResultSet::new(self.clone(), documents))
    }

    pub fn by_containing_keys_one<S: AsRef<str>>(&self, keys: &[S]) -> Result<Option<Document>> {
        let state = self.shared.lock_open()?;
        Ok(state
            .documents
            .values()
            .find(|doc| contains_fields(doc, keys))
            .map(|doc| Document::clone(doc)))
    }

    /// Look a document up by identifier.
    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        let state = self.shared.lock_open()?;
        Ok(state.documents.get(id).map(|doc| Document::clone(doc)))
    }

    /// Every document, in collection order.
    pub fn documents(&self) -> Result<ResultSet> {
        self.query(Query::all())
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Append a document. Returns `None` if the payload carries nothing but an
    /// identifier, or if a document with the same identifier already exists.
    pub fn insert<D: IntoDocument>(&self, document: D) -> Result<Option<Document>> {
        let mut state = self.shared.lock_writable()?;
        let inserted = self.shared.insert(&mut state, document)?;
        if inserted.is_some() {
            self.shared.save(&mut state, false)?;
        }
        Ok(inserted.map(|doc| Document::clone(&doc)))
    }

    /// Insert each item in turn. Rejected payloads leave an empty slot in the
    /// returned set.
    pub fn insert_many<I, D>(&self, documents: I) -> Result<ResultSet>
    where
        I: IntoIterator<Item = D>,
        D: IntoDocument,
    {
        let mut state = self.shared.lock_writable()?;
        let mut inserted = Vec::new();
        for document in documents {
            let doc = self.shared.insert(&mut state, document)?;
            if doc.is_some() {
                self.shared.save(&mut state, false)?;
            }
            inserted.push(doc);
        }
        Ok(ResultSet::new(self.clone(), inserted))
    }

    /// Remove the first document matching `query`.
    pub fn delete_one(&self, query: impl Into<Query>) -> Result<bool> {
        let query = query.into();
        let mut state = self.shared.lock_writable()?;
        self.shared.delete_one(&mut state, &query)
    }

    /// Remove every document matching `query`. An empty query clears the
    /// collection and writes it out immediately.
    pub fn delete_many(&self, query: impl Into<Query>) -> Result<bool> {
        let query = query.into();
        let mut state = self.shared.lock_writable()?;

        if query.is_empty() {
            state.documents.clear();
            self.shared.save(&mut state, true)?;
            return Ok(true);
        }

        let ids = matching_ids(&state, &query);
        if ids.is_empty() {
            return Ok(false);
        }
        for id in ids {
            self.shared.delete_one(&mut state, &Query::by_id(id))?;
        }
        Ok(true)
    }

    /// Overlay `update` on the first document matching `query`. The document
    /// keeps its identifier and moves to the end of the collection.
    pub fn update_one(&self, query: impl Into<Query>, update: impl Into<Value>) -> Result<bool> {
        let query = query.into();
        let update = normalize(update.into());
        let mut state = self.shared.lock_writable()?;
        self.shared.update_one(&mut state, &query, &update)
    }

    /// Apply `update` to every document matching `query`, one at a time.
    pub fn update_many(&self, query: impl Into<Query>, update: impl Into<Value>) -> Result<bool> {
        let query = query.into();
        let update = normalize(update.into());
        let mut state = self.shared.lock_writable()?;

        let ids = matching_ids(&state, &query);
        if ids.is_empty() {
            return Ok(false);
        }
        for id in ids {
            self.shared.update_one(&mut state, &Query::by_id(id), &update)?;
        }
        Ok(true)
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Replace the in-memory documents with the file contents. Pending
    /// mutations that were not flushed are discarded.
    pub fn refresh(&self) -> Result<()> {
        let mut state = self.shared.lock_open()?;
        let bytes = file::read(&self.shared.path)?;
        self.shared.load(&mut state, &bytes)?;
        state.checksum = Some(file::checksum(&bytes));
        Ok(())
    }

    /// Write the collection now, ignoring the flush interval.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.shared.lock_writable()?;
        self.shared.save(&mut state, true)?;
        Ok(())
    }

    /// Flush pending mutations and stop watching. Further use of this
    /// collection fails with [`JsonDbError::Closed`].
    pub fn close(&self) -> Result<()> {
        let flushed = {
            let mut state = self.shared.lock();
            if state.closed {
                return Ok(());
            }
            let result = if state.pending > 0 {
                self.shared.save(&mut state, true).map(|_| ())
            } else {
                Ok(())
            };
            state.closed = true;
            result
        };

        let reactor = self
            .shared
            .reactor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reactor) = reactor {
            reactor.stop();
        }

        log::info!("Closed collection {}", self.shared.path.display());
        flushed
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.shared.name)
            .field("path", &self.shared.path)
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.lock();
        if state.closed {
            return Err(JsonDbError::Closed {
                path: self.path.clone(),
            });
        }
        Ok(state)
    }

    fn lock_writable(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.lock_open()?;
        if let Some(reason) = &state.fault {
            return Err(JsonDbError::Faulted {
                path: self.path.clone(),
                reason: reason.clone(),
            });
        }
        Ok(state)
    }

    fn insert<D: IntoDocument>(&self, state: &mut State, document: D) -> Result<Option<Arc<Document>>> {
        let doc = document.into_document(self.options.id_strategy)?;
        if !doc.has_payload() {
            log::debug!("Rejected empty document {} in {}", doc.id(), self.name);
            return Ok(None);
        }
        if state.documents.contains_key(doc.id()) {
            log::warn!("Rejected document {} in {}: id already present", doc.id(), self.name);
            return Ok(None);
        }
        let doc = Arc::new(doc);
        state.documents.insert(doc.id().to_string(), Arc::clone(&doc));
        Ok(Some(doc))
    }

    fn delete_one(&self, state: &mut State, query: &Query) -> Result<bool> {
        let id = match state.documents.values().find(|doc| query.matches(doc)) {
            Some(doc) => doc.id().to_string(),
            None => return Ok(false),
        };
        state.documents.shift_remove(&id);
        self.save(state, false)?;
        Ok(true)
    }

    fn update_one(&self, state: &mut State, query: &Query, update: &Map<String, Value>) -> Result<bool> {
        let original = match state.documents.values().find(|doc| query.matches(doc)) {
            Some(doc) => Arc::clone(doc),
            None => return Ok(false),
        };

        let merged = original.merged(update);
        state.documents.shift_remove(original.id());
        let doc = Document::from_value(Value::Object(merged), self.options.id_strategy)?;
        state.documents.insert(doc.id().to_string(), Arc::new(doc));

        self.save(state, false)?;
        Ok(true)
    }

    /// Replace the documents with the parsed `bytes`. The caller records the checksum.
    fn load(&self, state: &mut State, bytes: &[u8]) -> Result<()> {
        let parsed = file::decode(&self.path, bytes)?;
        state.documents = build_documents(&self.path, parsed.items, &self.options)?;
        state.collection_id = parsed.id;
        state.pending = 0;
        state.fault = None;
        state.stats.loads += 1;
        Ok(())
    }

    /// Flush if forced or the flush interval has passed; otherwise count the
    /// mutation as pending. Returns whether a write happened.
    fn save(&self, state: &mut State, force: bool) -> Result<bool> {
        if let Some(reason) = &state.fault {
            return Err(JsonDbError::Faulted {
                path: self.path.clone(),
                reason: reason.clone(),
            });
        }

        let due = force
            || !self.options.batching()
            || state.last_flush.elapsed() >= self.options.flush_interval();
        if !due {
            state.pending += 1;
            log::debug!("Deferred flush of {} ({} pending)", self.name, state.pending);
            return Ok(false);
        }

        if let Err(e) = write_state(&self.path, &self.options, state) {
            state.pending += 1;
            return Err(e);
        }
        Ok(true)
    }
}

impl ReactorHandler for Shared {
    fn on_file_changed(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        let bytes = match file::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Could not read {} after change: {e}", self.path.display());
                return;
            }
        };

        let checksum = file::checksum(&bytes);
        if state.checksum.as_deref() == Some(checksum.as_str()) {
            state.stats.suppressed_events += 1;
            log::debug!("Ignoring change to {}: contents match our last write", self.name);
            return;
        }
        state.checksum = Some(checksum);

        match self.load(&mut state, &bytes) {
            Ok(()) => {
                state.stats.external_reloads += 1;
                log::info!(
                    "Reloaded {} after external change ({} documents)",
                    self.path.display(),
                    state.documents.len()
                );
            }
            Err(e) => {
                log::error!("Failed to reload {}: {e}", self.path.display());
                state.fault = Some(e.to_string());
            }
        }
    }

    fn on_tick(&self) {
        let mut state = self.lock();
        if state.closed || state.pending == 0 || state.fault.is_some() {
            return;
        }
        if let Err(e) = self.save(&mut state, true) {
            log::error!("Periodic flush of {} failed: {e}", self.path.display());
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.closed || state.pending == 0 || state.fault.is_some() {
            return;
        }
        if let Err(e) = write_state(&self.path, &self.options, state) {
            log::error!("Flush of {} on drop failed: {e}", self.path.display());
        }
    }
}

fn write_state(path: &Path, options: &Options, state: &mut State) -> Result<()> {
    let bytes = file::encode(
        &state.collection_id,
        state.documents.values().map(|doc| doc.as_ref()),
        options.indent,
    )?;
    file::write(path, &bytes)?;
    state.checksum = Some(file::checksum(&bytes));
    state.last_flush = Instant::now();
    state.pending = 0;
    state.stats.flushes += 1;
    Ok(())
}

fn matching_ids(state: &State, query: &Query) -> Vec<String> {
    state
        .documents
        .values()
        .filter(|doc| query.matches(doc))
        .map(|doc| doc.id().to_string())
        .collect()
}

fn build_documents(
    path: &Path,
    items: Vec<Value>,
    options: &Options,
) -> Result<IndexMap<String, Arc<Document>>> {
    let mut documents = IndexMap::with_capacity(items.len());
    for item in items {
        let doc = Document::from_value(item, options.id_strategy)?;

        let legacy = doc.legacy_function_fields();
        if !legacy.is_empty() {
            log::warn!(
                "Document {} in {} stores function source in {:?}; it is kept as text and never run",
                doc.id(),
                path.display(),
                legacy
            );
        }

        let id = doc.id().to_string();
        if documents.insert(id.clone(), Arc::new(doc)).is_some() {
            log::warn!("Duplicate document id {id} in {}; keeping the later entry", path.display());
        }
    }
    Ok(documents)
}
