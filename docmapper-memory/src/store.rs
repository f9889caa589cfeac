//! In-memory storage implementation of the store backend.
//!
//! Collections are kept as insertion-ordered vectors of BSON documents behind
//! an async-safe read-write lock. Every handle carries a label and appends to
//! a shared journal, so callers can observe which handle ran which operation.

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use docmapper_core::{
    backend::{NativeQuery, StoreBackend, StoreBackendBuilder},
    error::{DataAccessError, DataAccessResult},
    group::{Accumulator, GroupBy},
    router::ReadHandles,
    update::{UpdateMode, WriteOutcome},
};

use crate::{
    evaluator::{matches, resolve, sort_order},
    update::{apply_update, as_f64, get_path, project, seed_from_filter},
};

type StoreMap = HashMap<String, Vec<Document>>;

/// Journal entries kept per store unless configured otherwise.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 1024;

/// One operation as recorded by an [`InMemoryStore`] handle.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// Label of the handle that ran the operation.
    pub handle: String,
    /// Name of the backend operation, e.g. `"find"` or `"update"`.
    pub operation: &'static str,
    pub collection: String,
    /// The native criteria the operation received, if it takes any.
    pub filter: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait on top of plain vectors
/// of documents, evaluating native criteria documents in process.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses `Arc`-wrapped internal state, so
/// clones share the same collections and the same journal. The two handles
/// returned by [`InMemoryStore::handles`] are such clones, labelled
/// `"primary"` and `"replica"`.
///
/// # Performance
///
/// Queries scan every document of a collection. This backend is meant for
/// tests and development, not for large datasets.
///
/// # Example
///
/// ```ignore
/// use docmapper_memory::InMemoryStore;
/// use docmapper::backend::{NativeQuery, StoreBackend};
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///
///     store.insert("users", vec![doc! { "_id": 1, "name": "Alice" }]).await?;
///
///     let found = store
///         .find("users", NativeQuery::new(doc! { "name": "Alice" }))
///         .await?;
///     assert_eq!(found.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    label: String,
    /// collection name -> documents in insertion order
    store: Arc<RwLock<StoreMap>>,
    journal: Arc<RwLock<VecDeque<JournalEntry>>>,
    journal_capacity: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty store labelled `"default"`.
    pub fn new() -> Self {
        Self {
            label: "default".to_string(),
            store: Arc::new(RwLock::new(StoreMap::new())),
            journal: Arc::new(RwLock::new(VecDeque::new())),
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// The same store under a different journal label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Keeps at most `capacity` journal entries, dropping the oldest first.
    /// A capacity of 0 turns the journal off.
    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = capacity;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// A primary and a replica handle over this store's data.
    ///
    /// Both handles share the collections and the journal, so a test can
    /// assert on routing by reading [`InMemoryStore::journal`] afterwards.
    pub fn handles(&self) -> ReadHandles<InMemoryStore> {
        ReadHandles::new(
            self.clone().with_label("primary"),
            self.clone().with_label("replica"),
        )
    }

    /// The most recent operations, oldest first.
    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.journal.read().await.iter().cloned().collect()
    }

    pub async fn clear_journal(&self) {
        self.journal.write().await.clear();
    }

    async fn record(&self, operation: &'static str, collection: &str, query: Option<&NativeQuery>) {
        tracing::trace!("{} handle runs {} on {}", self.label, operation, collection);

        if self.journal_capacity == 0 {
            return;
        }

        let mut journal = self.journal.write().await;
        while journal.len() >= self.journal_capacity {
            journal.pop_front();
        }

        journal.push_back(JournalEntry {
            handle: self.label.clone(),
            operation,
            collection: collection.to_string(),
            filter: query.map(|query| query.filter.clone()),
            sort: query.and_then(|query| query.sort.clone()),
            skip: query.and_then(|query| query.skip),
            limit: query.and_then(|query| query.limit),
        });
    }
}

/// Compares two documents by a native sort document.
fn compare(left: &Document, right: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let ordering = sort_order(
            resolve(left, field).first().copied(),
            resolve(right, field).first().copied(),
        );
        let ordering = if as_f64(direction) < 0.0 {
            ordering.reverse()
        } else {
            ordering
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Indices of the documents selected by `query`, in result order.
fn select(documents: &[Document], query: &NativeQuery) -> DataAccessResult<Vec<usize>> {
    let mut selected = Vec::new();
    for (index, document) in documents.iter().enumerate() {
        if matches(document, &query.filter)? {
            selected.push(index);
        }
    }

    if let Some(sort) = &query.sort {
        selected.sort_by(|a, b| compare(&documents[*a], &documents[*b], sort));
    }

    let skip = query.skip.unwrap_or(0) as usize;
    // negative limits behave like positive ones, zero means no limit
    let limit = match query.limit.map(i64::unsigned_abs) {
        None | Some(0) => usize::MAX,
        Some(limit) => limit as usize,
    };

    Ok(selected.into_iter().skip(skip).take(limit).collect())
}

fn first_match(documents: &[Document], query: &NativeQuery) -> DataAccessResult<Option<usize>> {
    let mut query = query.clone();
    query.limit = Some(1);

    Ok(select(documents, &query)?.into_iter().next())
}

fn output(document: Document, projection: Option<&Document>) -> DataAccessResult<Document> {
    match projection {
        Some(projection) => project(&document, projection),
        None => Ok(document),
    }
}

/// `document` with `id` as its leading `_id`.
fn with_id(id: Bson, document: &Document) -> Document {
    let mut stored = Document::new();
    stored.insert("_id", id);
    for (key, value) in document {
        if key != "_id" {
            stored.insert(key.clone(), value.clone());
        }
    }
    stored
}

fn id_of(document: &Document) -> Bson {
    document
        .get("_id")
        .cloned()
        .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()))
}

/// Running state of one accumulator inside one group.
enum Running {
    Count(i64),
    Sum { total: f64, integral: bool },
    Extreme { value: Option<Bson>, keep: Ordering },
}

impl Running {
    fn start(accumulator: &Accumulator) -> Self {
        match accumulator {
            Accumulator::Count => Running::Count(0),
            Accumulator::Sum(_) => Running::Sum {
                total: 0.0,
                integral: true,
            },
            Accumulator::Min(_) => Running::Extreme {
                value: None,
                keep: Ordering::Less,
            },
            Accumulator::Max(_) => Running::Extreme {
                value: None,
                keep: Ordering::Greater,
            },
        }
    }

    fn add(&mut self, value: Option<&Bson>) {
        match self {
            Running::Count(count) => *count += 1,
            Running::Sum { total, integral } => match value {
                Some(number @ (Bson::Int32(_) | Bson::Int64(_))) => *total += as_f64(number),
                Some(Bson::Double(number)) => {
                    *total += number;
                    *integral = false;
                }
                _ => {}
            },
            Running::Extreme { value: current, keep } => match value {
                None | Some(Bson::Null) => {}
                Some(value) => {
                    let replace = match current {
                        None => true,
                        Some(existing) => sort_order(Some(value), Some(&*existing)) == *keep,
                    };
                    if replace {
                        *current = Some(value.clone());
                    }
                }
            },
        }
    }

    fn finish(self) -> Bson {
        match self {
            Running::Count(count) => Bson::Int64(count),
            Running::Sum {
                total,
                integral: true,
            } => Bson::Int64(total as i64),
            Running::Sum { total, .. } => Bson::Double(total),
            Running::Extreme { value, .. } => value.unwrap_or(Bson::Null),
        }
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find(&self, collection: &str, query: NativeQuery) -> DataAccessResult<Vec<Document>> {
        self.record("find", collection, Some(&query)).await;

        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(vec![]);
        };

        select(documents, &query)?
            .into_iter()
            .map(|index| output(documents[index].clone(), query.projection.as_ref()))
            .collect()
    }

    async fn count(&self, collection: &str, query: NativeQuery) -> DataAccessResult<u64> {
        self.record("count", collection, Some(&query)).await;

        let store = self.store.read().await;
        match store.get(collection) {
            Some(documents) => Ok(select(documents, &query)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DataAccessResult<()> {
        self.record("insert", collection, None).await;

        let mut store = self.store.write().await;
        let stored = store.entry(collection.to_string()).or_default();

        let mut prepared: Vec<Document> = Vec::with_capacity(documents.len());
        for document in documents {
            let id = id_of(&document);
            let taken = stored
                .iter()
                .chain(prepared.iter())
                .any(|existing| existing.get("_id") == Some(&id));

            if taken {
                return Err(DataAccessError::DocumentAlreadyExists(
                    id.to_string(),
                    collection.to_string(),
                ));
            }

            prepared.push(with_id(id, &document));
        }

        stored.extend(prepared);
        Ok(())
    }

    async fn replace(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> DataAccessResult<WriteOutcome> {
        self.record("replace", collection, Some(&NativeQuery::new(filter.clone()))).await;

        let mut store = self.store.write().await;
        if !upsert && !store.contains_key(collection) {
            return Ok(WriteOutcome::default());
        }
        let documents = store.entry(collection.to_string()).or_default();
        let query = NativeQuery::new(filter);

        if let Some(index) = first_match(documents, &query)? {
            let replaced = with_id(id_of(&documents[index]), &replacement);
            let modified = u64::from(replaced != documents[index]);
            documents[index] = replaced;

            return Ok(WriteOutcome {
                matched: 1,
                modified,
                upserted_id: None,
            });
        }

        if !upsert {
            return Ok(WriteOutcome::default());
        }

        let id = match replacement.get("_id") {
            Some(id) => id.clone(),
            None => id_of(&seed_from_filter(&query.filter)?),
        };
        documents.push(with_id(id.clone(), &replacement));

        Ok(WriteOutcome {
            matched: 0,
            modified: 0,
            upserted_id: Some(id),
        })
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        mode: UpdateMode,
    ) -> DataAccessResult<WriteOutcome> {
        self.record("update", collection, Some(&NativeQuery::new(filter.clone()))).await;

        let mut store = self.store.write().await;
        if mode != UpdateMode::Upsert && !store.contains_key(collection) {
            return Ok(WriteOutcome::default());
        }
        let documents = store.entry(collection.to_string()).or_default();
        let query = NativeQuery::new(filter);

        let selected = match mode {
            UpdateMode::Multi => select(documents, &query)?,
            UpdateMode::First | UpdateMode::Upsert => {
                first_match(documents, &query)?.into_iter().collect()
            }
        };

        if selected.is_empty() {
            if mode != UpdateMode::Upsert {
                return Ok(WriteOutcome::default());
            }

            let mut seeded = seed_from_filter(&query.filter)?;
            apply_update(&mut seeded, &update, true)?;
            let id = id_of(&seeded);
            documents.push(with_id(id.clone(), &seeded));

            return Ok(WriteOutcome {
                matched: 0,
                modified: 0,
                upserted_id: Some(id),
            });
        }

        // all or nothing: every document is updated before any is stored
        let mut updated = Vec::with_capacity(selected.len());
        for index in selected {
            let mut document = documents[index].clone();
            apply_update(&mut document, &update, false)?;
            updated.push((index, document));
        }

        let mut outcome = WriteOutcome::default();
        for (index, document) in updated {
            outcome.matched += 1;
            if document != documents[index] {
                outcome.modified += 1;
                documents[index] = document;
            }
        }

        Ok(outcome)
    }

    async fn remove(&self, collection: &str, filter: Document) -> DataAccessResult<u64> {
        self.record("remove", collection, Some(&NativeQuery::new(filter.clone()))).await;

        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let selected: HashSet<usize> = select(documents, &NativeQuery::new(filter))?
            .into_iter()
            .collect();
        let mut index = 0;
        documents.retain(|_| {
            let keep = !selected.contains(&index);
            index += 1;
            keep
        });

        Ok(selected.len() as u64)
    }

    async fn find_and_remove(
        &self,
        collection: &str,
        query: NativeQuery,
    ) -> DataAccessResult<Option<Document>> {
        self.record("find_and_remove", collection, Some(&query)).await;

        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(None);
        };

        match first_match(documents, &query)? {
            Some(index) => {
                let removed = documents.remove(index);
                output(removed, query.projection.as_ref()).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn find_and_modify(
        &self,
        collection: &str,
        query: NativeQuery,
        update: Document,
        return_new: bool,
    ) -> DataAccessResult<Option<Document>> {
        self.record("find_and_modify", collection, Some(&query)).await;

        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(None);
        };

        let Some(index) = first_match(documents, &query)? else {
            return Ok(None);
        };

        let mut modified = documents[index].clone();
        apply_update(&mut modified, &update, false)?;
        let previous = std::mem::replace(&mut documents[index], modified.clone());

        let returned = if return_new { modified } else { previous };
        output(returned, query.projection.as_ref()).map(Some)
    }

    async fn collection_exists(&self, collection: &str) -> DataAccessResult<bool> {
        self.record("collection_exists", collection, None).await;

        Ok(self.store.read().await.contains_key(collection))
    }

    async fn map_reduce(
        &self,
        collection: &str,
        filter: Document,
        _map: &str,
        _reduce: &str,
    ) -> DataAccessResult<Vec<Document>> {
        self.record("map_reduce", collection, Some(&NativeQuery::new(filter.clone()))).await;

        Err(DataAccessError::Unsupported(
            "map-reduce needs a server-side script engine".to_string(),
        ))
    }

    async fn group(
        &self,
        collection: &str,
        filter: Document,
        group: &GroupBy,
    ) -> DataAccessResult<Vec<Document>> {
        self.record("group", collection, Some(&NativeQuery::new(filter.clone()))).await;

        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(vec![]);
        };

        // groups in order of first appearance
        let mut groups: Vec<(Vec<Bson>, Vec<Running>)> = Vec::new();
        for index in select(documents, &NativeQuery::new(filter))? {
            let document = &documents[index];
            let key: Vec<Bson> = group
                .keys
                .iter()
                .map(|path| get_path(document, path).cloned().unwrap_or(Bson::Null))
                .collect();

            let position = match groups.iter().position(|(existing, _)| *existing == key) {
                Some(position) => position,
                None => {
                    let running = group
                        .accumulators
                        .iter()
                        .map(|(_, accumulator)| Running::start(accumulator))
                        .collect();
                    groups.push((key, running));
                    groups.len() - 1
                }
            };

            for ((_, accumulator), running) in group.accumulators.iter().zip(groups[position].1.iter_mut()) {
                running.add(accumulator.field().and_then(|field| get_path(document, field)));
            }
        }

        Ok(groups
            .into_iter()
            .map(|(key, running)| {
                let mut result = Document::new();
                for (path, value) in group.keys.iter().zip(key) {
                    result.insert(path.replace('.', "_"), value);
                }
                for ((name, _), running) in group.accumulators.iter().zip(running) {
                    result.insert(name.clone(), running.finish());
                }
                result
            })
            .collect())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docmapper_memory::InMemoryStore;
/// use docmapper::backend::StoreBackendBuilder;
///
/// #[tokio::main]
/// async fn main() {
///     let store = InMemoryStore::builder().with_label("primary").build().await.unwrap();
/// }
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    label: Option<String>,
    journal_capacity: Option<usize>,
}

impl InMemoryStoreBuilder {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = Some(capacity);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds a freshly initialized, empty store. This always succeeds.
    async fn build(self) -> DataAccessResult<Self::Backend> {
        let mut store = InMemoryStore::new();
        if let Some(capacity) = self.journal_capacity {
            store = store.with_journal_capacity(capacity);
        }

        Ok(match self.label {
            Some(label) => store.with_label(label),
            None => store,
        })
    }
}
