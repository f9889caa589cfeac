//! The generic repository: typed CRUD, finds, paging, projections,
//! sub-documents and aggregation passthrough for one entity type.
//!
//! Every operation resolves the entity's metadata from the shared
//! [`MetadataRegistry`], maps its criteria, sort and update documents through
//! the [`QueryMapper`], and runs against the handle chosen by the
//! [`Operation`]'s read mode.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::prelude::*;
//!
//! let store = InMemoryStore::new();
//! let repository = Repository::<Answer, _>::new(store.handles());
//!
//! repository.insert(&answer).await?;
//! let recent = repository
//!     .chain()
//!     .not_equal("status", "deleted")
//!     .sort_desc("created_at")
//!     .limit(20)
//!     .list()
//!     .await?;
//! ```

use bson::{Bson, Document, de::deserialize_from_document, doc};
use serde::de::DeserializeOwned;
use std::{collections::HashMap, fmt, marker::PhantomData, sync::Arc};

use crate::{
    backend::{NativeQuery, StoreBackend},
    chain::ChainQuery,
    entity::{Entity, EntityExt, Mapped},
    error::{DataAccessError, DataAccessResult},
    group::GroupBy,
    identifier::Identifier,
    mapper::QueryMapper,
    metadata::{EntityMetadata, ID_FIELD, MetadataRegistry},
    page::{Page, PageRequest},
    query::{Criteria, Query, Sort},
    router::{Operation, ReadHandles},
    update::{Update, UpdateMode},
};

/// Generic data access for the entity type `E` over backend handles `B`.
pub struct Repository<E: Entity, B: StoreBackend> {
    handles: ReadHandles<B>,
    mapper: QueryMapper,
    registry: Arc<MetadataRegistry>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity, B: StoreBackend> fmt::Debug for Repository<E, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("collection", &E::collection_name())
            .field("handles", &self.handles)
            .finish()
    }
}

impl<E: Entity, B: StoreBackend + Clone> Clone for Repository<E, B> {
    fn clone(&self) -> Self {
        Self {
            handles: self.handles.clone(),
            mapper: self.mapper.clone(),
            registry: self.registry.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E: Entity, B: StoreBackend> Repository<E, B> {
    /// Creates a repository with the default mapper and its own registry.
    pub fn new(handles: ReadHandles<B>) -> Self {
        Self::builder(handles).build()
    }

    pub fn builder(handles: ReadHandles<B>) -> RepositoryBuilder<E, B> {
        RepositoryBuilder::new(handles)
    }

    pub fn handles(&self) -> &ReadHandles<B> {
        &self.handles
    }

    pub fn mapper(&self) -> &QueryMapper {
        &self.mapper
    }

    /// Starts a chain query against this repository.
    pub fn chain(&self) -> ChainQuery<'_, E, B> {
        ChainQuery::attach(self)
    }

    /// The collection the entity is stored in.
    pub fn collection_name(&self) -> &'static str {
        E::collection_name()
    }

    /// The collection (or sub-document) name of another mapped type.
    pub fn collection_name_of<O: Mapped>(&self) -> &'static str {
        O::collection_name()
    }

    /// Returns the cached metadata of `E`.
    pub async fn metadata(&self) -> Arc<EntityMetadata> {
        self.registry.resolve::<E>().await
    }

    fn handle(&self, operation: Operation, collection: &str) -> &B {
        tracing::debug!(
            "{:?} {} on {} via the {:?} handle",
            operation,
            if operation.is_write() { "writes" } else { "reads" },
            collection,
            operation.read_mode()
        );
        self.handles.select(operation)
    }

    fn native(&self, query: &Query, metadata: &EntityMetadata) -> DataAccessResult<NativeQuery> {
        let filter = self.mapper.map(&query.criteria_document()?, Some(metadata))?;
        let sort = query
            .sort_document()
            .map(|sort| self.mapper.map_sort(&sort, Some(metadata)));

        let mut native = NativeQuery::new(filter).with_sort(sort);
        if let Some(offset) = query.offset() {
            native = native.with_skip(offset as u64);
        }
        if let Some(limit) = query.limit() {
            native = native.with_limit(limit as i64);
        }

        Ok(native)
    }

    fn id_filter(&self, id: Bson, metadata: &EntityMetadata) -> DataAccessResult<Document> {
        self.mapper.map(&doc! { ID_FIELD: id }, Some(metadata))
    }

    fn decode(documents: Vec<Document>) -> DataAccessResult<Vec<E>> {
        documents.into_iter().map(E::from_document).collect()
    }

    /// Finds an entity by id, reading from the primary handle.
    ///
    /// The id is coerced according to the collection's identifier policy, so
    /// a hex string finds an `ObjectId`-keyed document.
    pub async fn find_by_id(&self, id: impl Into<Bson>) -> DataAccessResult<Option<E>> {
        let metadata = self.metadata().await;
        let query = NativeQuery::new(self.id_filter(id.into(), &metadata)?).with_limit(1);

        let documents = self
            .handle(Operation::FindById, metadata.collection())
            .find(metadata.collection(), query)
            .await?;

        documents.into_iter().next().map(E::from_document).transpose()
    }

    /// Finds the first entity matching `query`, reading from the primary handle.
    pub async fn find_one(&self, query: &Query) -> DataAccessResult<Option<E>> {
        let metadata = self.metadata().await;
        let native = self.native(query, &metadata)?.with_limit(1);

        let documents = self
            .handle(Operation::FindOne, metadata.collection())
            .find(metadata.collection(), native)
            .await?;

        documents.into_iter().next().map(E::from_document).transpose()
    }

    /// Finds every entity matching `query`, honoring its sort, offset and limit.
    pub async fn find_list(&self, query: &Query) -> DataAccessResult<Vec<E>> {
        let metadata = self.metadata().await;
        let native = self.native(query, &metadata)?;

        let documents = self
            .handle(Operation::FindList, metadata.collection())
            .find(metadata.collection(), native)
            .await?;

        Self::decode(documents)
    }

    /// Like [`Repository::find_list`], returning at most `limit` entities.
    /// A limit of 0 leaves the query's own limit in place.
    pub async fn find_list_with_limit(&self, query: &Query, limit: usize) -> DataAccessResult<Vec<E>> {
        let mut query = query.clone();
        if limit > 0 {
            query.set_limit(limit);
        }

        self.find_list(&query).await
    }

    /// Like [`Repository::find_list`], appending the given sort directives.
    pub async fn find_list_sorted(&self, query: &Query, sorts: &[Sort]) -> DataAccessResult<Vec<E>> {
        let mut query = query.clone();
        for sort in sorts {
            query.with_sort(sort.clone());
        }

        self.find_list(&query).await
    }

    pub async fn find_all(&self) -> DataAccessResult<Vec<E>> {
        self.find_list(&Query::new()).await
    }

    pub async fn find_list_by_key_value(
        &self,
        key: &str,
        value: impl Into<Bson>,
    ) -> DataAccessResult<Vec<E>> {
        self.find_list(&Query::matching(Criteria::eq(key, value))).await
    }

    pub async fn find_list_by_key_values<V: Into<Bson>>(
        &self,
        key: &str,
        values: impl IntoIterator<Item = V>,
    ) -> DataAccessResult<Vec<E>> {
        self.find_list(&Query::matching(Criteria::is_in(key, values))).await
    }

    /// Finds entities whose fields equal every entry of `map`.
    ///
    /// An empty map matches nothing and returns an empty list without
    /// contacting the store.
    pub async fn find_list_by_map(&self, map: &Document) -> DataAccessResult<Vec<E>> {
        if map.is_empty() {
            return Ok(Vec::new());
        }

        self.find_list(&Self::equality_query(map)).await
    }

    fn equality_query(map: &Document) -> Query {
        let mut query = Query::new();
        for (key, value) in map {
            query.add_criteria(Criteria::eq(key.clone(), value.clone()));
        }
        query
    }

    pub async fn find_list_by_ids<I: Into<Bson>>(
        &self,
        ids: impl IntoIterator<Item = I>,
    ) -> DataAccessResult<Vec<E>> {
        self.find_list(&Query::matching(Criteria::is_in(ID_FIELD, ids))).await
    }

    /// Finds entities by id and returns them in the order of `ids`.
    ///
    /// Ids without a stored entity are skipped.
    pub async fn find_by_ids_in_order<I: Into<Bson>>(
        &self,
        ids: impl IntoIterator<Item = I>,
    ) -> DataAccessResult<Vec<E>> {
        let ids: Vec<Bson> = ids.into_iter().map(Into::into).collect();
        let found = self.find_list_by_ids(ids.clone()).await?;

        let mut by_id: HashMap<Identifier, E> = found
            .into_iter()
            .map(|entity| (identify(&entity.id().clone().into()), entity))
            .collect();

        Ok(ids
            .iter()
            .filter_map(|id| by_id.remove(&identify(id)))
            .collect())
    }

    /// Fetches one page of entities matching `query`.
    ///
    /// The total is counted against the unsorted, unpaged criteria first; the
    /// page content is fetched in a second round trip with the request's
    /// sorts, offset and size applied.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::InvalidQuery`] when `request.per_page` is 0.
    pub async fn find_page(&self, query: &Query, request: &PageRequest) -> DataAccessResult<Page<E>> {
        if request.per_page == 0 {
            return Err(DataAccessError::InvalidQuery(
                "Page size must be at least 1".to_string(),
            ));
        }

        let total = self.count(&query.unpaged()).await?;

        let mut paged = query.clone();
        paged.with_page(request);

        let metadata = self.metadata().await;
        let native = self.native(&paged, &metadata)?;
        let documents = self
            .handle(Operation::FindPage, metadata.collection())
            .find(metadata.collection(), native)
            .await?;

        Ok(Page::from_total(Self::decode(documents)?, total, request))
    }

    /// Counts the entities matching `query`.
    ///
    /// The whole query reaches the store, so an offset or limit caps the
    /// count. Use [`Query::unpaged`] to count every match.
    pub async fn count(&self, query: &Query) -> DataAccessResult<u64> {
        let metadata = self.metadata().await;
        let native = self.native(query, &metadata)?;

        self.handle(Operation::Count, metadata.collection())
            .count(metadata.collection(), native)
            .await
    }

    pub async fn count_all(&self) -> DataAccessResult<u64> {
        self.count(&Query::new()).await
    }

    pub async fn count_by(&self, key: &str, value: impl Into<Bson>) -> DataAccessResult<u64> {
        self.count(&Query::matching(Criteria::eq(key, value))).await
    }

    /// Counts entities whose fields equal every entry of `map`; an empty map
    /// counts the whole collection.
    pub async fn count_by_map(&self, map: &Document) -> DataAccessResult<u64> {
        self.count(&Self::equality_query(map)).await
    }

    /// Inserts a new entity.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::DocumentAlreadyExists`] when the id is taken.
    pub async fn insert(&self, entity: &E) -> DataAccessResult<()> {
        self.insert_all(std::slice::from_ref(entity)).await
    }

    pub async fn insert_all(&self, entities: &[E]) -> DataAccessResult<()> {
        if entities.is_empty() {
            return Ok(());
        }

        let documents = entities
            .iter()
            .map(EntityExt::to_document)
            .collect::<DataAccessResult<Vec<_>>>()?;

        let metadata = self.metadata().await;
        self.handle(Operation::Insert, metadata.collection())
            .insert(metadata.collection(), documents)
            .await
    }

    /// Inserts the entity, or replaces the stored one with the same id.
    pub async fn save(&self, entity: &E) -> DataAccessResult<()> {
        self.replace(entity, true).await.map(|_| ())
    }

    /// Replaces the stored entity with the same id; returns how many
    /// documents matched (0 or 1).
    pub async fn update(&self, entity: &E) -> DataAccessResult<u64> {
        self.replace(entity, false).await
    }

    async fn replace(&self, entity: &E, upsert: bool) -> DataAccessResult<u64> {
        let metadata = self.metadata().await;
        let filter = self.id_filter(entity.id().clone().into(), &metadata)?;
        let operation = if upsert { Operation::Save } else { Operation::Update };

        let outcome = self
            .handle(operation, metadata.collection())
            .replace(metadata.collection(), filter, entity.to_document()?, upsert)
            .await?;

        Ok(outcome.affected())
    }

    /// Applies `update` to the entity with the given id.
    pub async fn update_by_id(&self, id: impl Into<Bson>, update: &Update) -> DataAccessResult<u64> {
        self.update_matching(&Query::matching(Criteria::eq(ID_FIELD, id)), update, true)
            .await
    }

    /// Applies `update` to every entity whose id is in `ids`.
    pub async fn update_by_ids<I: Into<Bson>>(
        &self,
        ids: impl IntoIterator<Item = I>,
        update: &Update,
    ) -> DataAccessResult<u64> {
        self.update_matching(&Query::matching(Criteria::is_in(ID_FIELD, ids)), update, false)
            .await
    }

    /// Applies `update` to the first matching entity, or to all of them
    /// unless `first_only`. Returns the number of matched documents.
    pub async fn update_matching(
        &self,
        query: &Query,
        update: &Update,
        first_only: bool,
    ) -> DataAccessResult<u64> {
        let mode = if first_only { UpdateMode::First } else { UpdateMode::Multi };
        self.apply_update(query, update, mode).await
    }

    /// Updates the first matching entity, inserting one built from the
    /// query's equality criteria and the update when nothing matches.
    pub async fn upsert(&self, query: &Query, update: &Update) -> DataAccessResult<u64> {
        self.apply_update(query, update, UpdateMode::Upsert).await
    }

    async fn apply_update(&self, query: &Query, update: &Update, mode: UpdateMode) -> DataAccessResult<u64> {
        if update.is_empty() {
            return Err(DataAccessError::InvalidQuery("Update has no operators".to_string()));
        }

        let metadata = self.metadata().await;
        let filter = self.native(query, &metadata)?.filter;
        let update = self.mapper.map_update(update.as_document(), Some(&metadata))?;

        let outcome = self
            .handle(Operation::Update, metadata.collection())
            .update(metadata.collection(), filter, update, mode)
            .await?;

        Ok(outcome.affected())
    }

    /// Removes every entity matching `query`.
    pub async fn remove(&self, query: &Query) -> DataAccessResult<u64> {
        let metadata = self.metadata().await;
        let filter = self.native(query, &metadata)?.filter;

        self.handle(Operation::Remove, metadata.collection())
            .remove(metadata.collection(), filter)
            .await
    }

    pub async fn remove_by_id(&self, id: impl Into<Bson>) -> DataAccessResult<u64> {
        self.remove(&Query::matching(Criteria::eq(ID_FIELD, id))).await
    }

    pub async fn remove_entity(&self, entity: &E) -> DataAccessResult<u64> {
        self.remove_by_id(entity.id().clone()).await
    }

    /// Removes every entity whose id is in `ids` in a single round trip.
    pub async fn remove_by_ids<I: Into<Bson>>(
        &self,
        ids: impl IntoIterator<Item = I>,
    ) -> DataAccessResult<u64> {
        self.remove(&Query::matching(Criteria::is_in(ID_FIELD, ids))).await
    }

    /// Removes the first entity matching `query` in its sort order and returns it.
    pub async fn find_and_remove(&self, query: &Query) -> DataAccessResult<Option<E>> {
        let metadata = self.metadata().await;
        let native = self.native(query, &metadata)?;

        self.handle(Operation::FindAndRemove, metadata.collection())
            .find_and_remove(metadata.collection(), native)
            .await?
            .map(E::from_document)
            .transpose()
    }

    /// Updates the first entity matching `query` in its sort order.
    ///
    /// Returns the entity as it was before the update, or as it is after it
    /// with `return_new`.
    pub async fn find_and_modify(
        &self,
        query: &Query,
        update: &Update,
        return_new: bool,
    ) -> DataAccessResult<Option<E>> {
        let metadata = self.metadata().await;
        let native = self.native(query, &metadata)?;
        let update = self.mapper.map_update(update.as_document(), Some(&metadata))?;

        self.handle(Operation::FindAndModify, metadata.collection())
            .find_and_modify(metadata.collection(), native, update, return_new)
            .await?
            .map(E::from_document)
            .transpose()
    }

    /// Projects a single field of every matching document, as strings.
    ///
    /// The query's sort and limit are honored. Documents without the field
    /// are skipped. When the collection does not exist the result is empty
    /// and no query is issued.
    pub async fn find_field(&self, query: &Query, field: &str) -> DataAccessResult<Vec<String>> {
        let metadata = self.metadata().await;
        let collection = metadata.collection();

        let exists = self
            .handle(Operation::CollectionExists, collection)
            .collection_exists(collection)
            .await?;
        if !exists {
            tracing::debug!("Collection {} does not exist, skipping projection of {}", collection, field);
            return Ok(Vec::new());
        }

        let path = metadata.physical_path(field);
        let native = self
            .native(query, &metadata)?
            .with_projection(doc! { path.as_str(): 1 });

        let documents = self
            .handle(Operation::FindField, collection)
            .find(collection, native)
            .await?;

        Ok(documents
            .iter()
            .filter_map(|document| lookup(document, &path))
            .filter(|value| !matches!(value, Bson::Null))
            .map(stringify)
            .collect())
    }

    /// Projects the ids of every matching document, as strings.
    pub async fn find_id(&self, query: &Query) -> DataAccessResult<Vec<String>> {
        self.find_field(query, ID_FIELD).await
    }

    /// Reads the sub-document stored under `name` (default:
    /// `O::collection_name()`) of the entity with the given id.
    pub async fn find_sub<O: Mapped>(
        &self,
        id: impl Into<Bson>,
        name: Option<&str>,
    ) -> DataAccessResult<Option<O>> {
        let metadata = self.metadata().await;
        let name = name.unwrap_or(O::collection_name());
        let native = NativeQuery::new(self.id_filter(id.into(), &metadata)?)
            .with_projection(doc! { name: 1 })
            .with_limit(1);

        let documents = self
            .handle(Operation::FindSub, metadata.collection())
            .find(metadata.collection(), native)
            .await?;

        match documents.first().and_then(|document| document.get(name)) {
            None | Some(Bson::Null) => Ok(None),
            Some(Bson::Document(sub)) => O::from_document(sub.clone()).map(Some),
            Some(other) => Err(DataAccessError::InvalidDocument(format!(
                "{} of {} is not a document: {}",
                name,
                metadata.collection(),
                other
            ))),
        }
    }

    /// Stores `sub` under `name` (default: `O::collection_name()`) of the
    /// entity with the given id, creating the entity when it does not exist.
    pub async fn save_sub<O: Mapped>(
        &self,
        id: impl Into<Bson>,
        sub: &O,
        name: Option<&str>,
    ) -> DataAccessResult<()> {
        let metadata = self.metadata().await;
        let name = name.unwrap_or(O::collection_name());
        let filter = self.id_filter(id.into(), &metadata)?;
        let update = doc! { "$set": { name: sub.to_document()? } };

        self.handle(Operation::SaveSub, metadata.collection())
            .update(metadata.collection(), filter, update, UpdateMode::Upsert)
            .await
            .map(|_| ())
    }

    /// Runs the store's map-reduce over the entities matching `query`.
    pub async fn map_reduce<O: DeserializeOwned>(
        &self,
        query: &Query,
        map: &str,
        reduce: &str,
    ) -> DataAccessResult<Vec<O>> {
        let metadata = self.metadata().await;
        let filter = self.native(query, &metadata)?.filter;

        let documents = self
            .handle(Operation::MapReduce, metadata.collection())
            .map_reduce(metadata.collection(), filter, map, reduce)
            .await?;

        documents
            .into_iter()
            .map(|document| Ok(deserialize_from_document(document)?))
            .collect()
    }

    /// Groups the entities matching `query`. Key and accumulator fields are
    /// logical names and are mapped to physical paths.
    pub async fn group<O: DeserializeOwned>(
        &self,
        query: &Query,
        group: &GroupBy,
    ) -> DataAccessResult<Vec<O>> {
        let metadata = self.metadata().await;
        let filter = self.native(query, &metadata)?.filter;
        let group = GroupBy {
            keys: group.keys.iter().map(|key| metadata.physical_path(key)).collect(),
            accumulators: group
                .accumulators
                .iter()
                .map(|(output, accumulator)| {
                    let mapped = match accumulator.field() {
                        Some(field) => accumulator.with_field(metadata.physical_path(field)),
                        None => accumulator.clone(),
                    };
                    (output.clone(), mapped)
                })
                .collect(),
        };

        let documents = self
            .handle(Operation::Group, metadata.collection())
            .group(metadata.collection(), filter, &group)
            .await?;

        documents
            .into_iter()
            .map(|document| Ok(deserialize_from_document(document)?))
            .collect()
    }
}

/// Reads a dot path out of a document.
fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }

    Some(current)
}

/// The identity of an id value, so hex strings and `ObjectId`s compare equal.
fn identify(value: &Bson) -> Identifier {
    match value {
        Bson::String(raw) => Identifier::parse(raw),
        Bson::ObjectId(oid) => Identifier::Canonical(*oid),
        other => Identifier::Legacy(other.to_string()),
    }
}

fn stringify(value: &Bson) -> String {
    match value {
        Bson::String(value) => value.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

/// Builder for [`Repository`].
pub struct RepositoryBuilder<E: Entity, B: StoreBackend> {
    handles: ReadHandles<B>,
    mapper: Option<QueryMapper>,
    registry: Option<Arc<MetadataRegistry>>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity, B: StoreBackend> RepositoryBuilder<E, B> {
    pub fn new(handles: ReadHandles<B>) -> Self {
        Self {
            handles,
            mapper: None,
            registry: None,
            _marker: PhantomData,
        }
    }

    pub fn with_mapper(mut self, mapper: QueryMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Shares a metadata registry between repositories.
    pub fn with_registry(mut self, registry: Arc<MetadataRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Repository<E, B> {
        Repository {
            handles: self.handles,
            mapper: self.mapper.unwrap_or_default(),
            registry: self.registry.unwrap_or_default(),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_follows_dot_paths() {
        let document = doc! { "a": { "n": "ana", "tags": ["x"] }, "vc": 3 };

        assert_eq!(lookup(&document, "a.n"), Some(&Bson::String("ana".into())));
        assert_eq!(lookup(&document, "vc"), Some(&Bson::Int32(3)));
        assert_eq!(lookup(&document, "a.missing"), None);
        assert_eq!(lookup(&document, "vc.x"), None);
    }

    #[test]
    fn projected_values_stringify_like_ids() {
        let oid = ObjectId::new();

        assert_eq!(stringify(&Bson::ObjectId(oid)), oid.to_hex());
        assert_eq!(stringify(&Bson::String("q-1".into())), "q-1");
        assert_eq!(stringify(&Bson::Int32(7)), "7");
    }

    #[test]
    fn hex_strings_and_object_ids_share_an_identity() {
        let oid = ObjectId::new();

        assert_eq!(identify(&Bson::String(oid.to_hex())), identify(&Bson::ObjectId(oid)));
        assert_eq!(identify(&Bson::String("q-1".into())), Identifier::Legacy("q-1".into()));
        assert_ne!(identify(&Bson::Int32(7)), identify(&Bson::String("8".into())));
    }
}
