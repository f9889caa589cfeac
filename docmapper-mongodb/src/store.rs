use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection, Database,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{
        AggregateOptions, ClientOptions, CountOptions, FindOneAndDeleteOptions,
        FindOneAndUpdateOptions, FindOptions, ReadPreference, ReturnDocument, SelectionCriteria,
    },
    results::UpdateResult,
};

use docmapper_core::{
    backend::{NativeQuery, StoreBackend, StoreBackendBuilder},
    error::{DataAccessError, DataAccessResult},
    group::{Accumulator, GroupBy},
    router::ReadHandles,
    update::{UpdateMode, WriteOutcome},
};

const DUPLICATE_KEY: i32 = 11000;

fn backend_error(error: MongoError) -> DataAccessError {
    DataAccessError::Backend(error.to_string())
}

/// Index of the document rejected for a duplicate `_id`, if that is what
/// the error reports.
fn duplicate_index(error: &MongoError) -> Option<usize> {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) if failure.code == DUPLICATE_KEY => Some(0),
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .iter()
            .flatten()
            .find(|failure| failure.code == DUPLICATE_KEY)
            .map(|failure| failure.index),
        _ => None,
    }
}

fn outcome(result: UpdateResult) -> WriteOutcome {
    WriteOutcome {
        matched: result.matched_count,
        modified: result.modified_count,
        upserted_id: result.upserted_id,
    }
}

/// The aggregation pipeline equivalent of a group request. Key fields are
/// flattened into the result with `.` replaced by `_`.
pub(crate) fn group_pipeline(filter: Document, group: &GroupBy) -> Vec<Document> {
    let mut keys = Document::new();
    for key in &group.keys {
        keys.insert(key.replace('.', "_"), format!("${}", key));
    }

    let mut stage = Document::new();
    stage.insert("_id", if keys.is_empty() { Bson::Null } else { Bson::Document(keys) });
    for (name, accumulator) in &group.accumulators {
        let expression = match accumulator {
            Accumulator::Count => doc! { "$sum": 1_i64 },
            Accumulator::Sum(field) => doc! { "$sum": format!("${}", field) },
            Accumulator::Min(field) => doc! { "$min": format!("${}", field) },
            Accumulator::Max(field) => doc! { "$max": format!("${}", field) },
        };
        stage.insert(name.clone(), expression);
    }

    vec![
        doc! { "$match": filter },
        doc! { "$group": stage },
        doc! { "$replaceWith": { "$mergeObjects": ["$_id", "$$ROOT"] } },
        doc! { "$project": { "_id": 0 } },
    ]
}

/// The `mapReduce` command with inline output.
pub(crate) fn map_reduce_command(collection: &str, filter: Document, map: &str, reduce: &str) -> Document {
    doc! {
        "mapReduce": collection,
        "map": Bson::JavaScriptCode(map.to_string()),
        "reduce": Bson::JavaScriptCode(reduce.to_string()),
        "query": filter,
        "out": { "inline": 1 },
    }
}

/// One handle on a MongoDB database.
///
/// Reads run with the handle's selection criteria; writes always go to the
/// primary. Handles built together by [`MongoDbStoreBuilder::build_handles`]
/// share one client and its connection pool.
#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
    selection_criteria: SelectionCriteria,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self {
            client,
            database,
            selection_criteria: SelectionCriteria::ReadPreference(ReadPreference::Primary),
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    /// The same handle reading with `read_preference`.
    pub fn with_read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.selection_criteria = SelectionCriteria::ReadPreference(read_preference);
        self
    }

    pub fn selection_criteria(&self) -> &SelectionCriteria {
        &self.selection_criteria
    }

    fn get_database(&self) -> Database {
        self.client.database(&self.database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.get_database().collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find(&self, collection: &str, query: NativeQuery) -> DataAccessResult<Vec<Document>> {
        let mut options = FindOptions::default();
        options.sort = query.sort;
        options.skip = query.skip;
        options.limit = query.limit;
        options.projection = query.projection;
        options.selection_criteria = Some(self.selection_criteria.clone());

        self.get_collection(collection)
            .find(query.filter)
            .with_options(options)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn count(&self, collection: &str, query: NativeQuery) -> DataAccessResult<u64> {
        let mut options = CountOptions::default();
        options.skip = query.skip;
        options.limit = query.limit.map(i64::unsigned_abs).filter(|limit| *limit > 0);
        options.selection_criteria = Some(self.selection_criteria.clone());

        self.get_collection(collection)
            .count_documents(query.filter)
            .with_options(options)
            .await
            .map_err(backend_error)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DataAccessResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        match self.get_collection(collection).insert_many(&documents).await {
            Ok(_) => Ok(()),
            Err(error) => match duplicate_index(&error) {
                Some(index) => Err(DataAccessError::DocumentAlreadyExists(
                    documents
                        .get(index)
                        .and_then(|document| document.get("_id"))
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    collection.to_string(),
                )),
                None => Err(backend_error(error)),
            },
        }
    }

    async fn replace(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> DataAccessResult<WriteOutcome> {
        self.get_collection(collection)
            .replace_one(filter, replacement)
            .upsert(upsert)
            .await
            .map(outcome)
            .map_err(backend_error)
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        mode: UpdateMode,
    ) -> DataAccessResult<WriteOutcome> {
        let collection = self.get_collection(collection);

        let result = match mode {
            UpdateMode::First => collection.update_one(filter, update).await,
            UpdateMode::Multi => collection.update_many(filter, update).await,
            UpdateMode::Upsert => collection.update_one(filter, update).upsert(true).await,
        };

        result.map(outcome).map_err(backend_error)
    }

    async fn remove(&self, collection: &str, filter: Document) -> DataAccessResult<u64> {
        self.get_collection(collection)
            .delete_many(filter)
            .await
            .map(|result| result.deleted_count)
            .map_err(backend_error)
    }

    async fn find_and_remove(
        &self,
        collection: &str,
        query: NativeQuery,
    ) -> DataAccessResult<Option<Document>> {
        let mut options = FindOneAndDeleteOptions::default();
        options.sort = query.sort;
        options.projection = query.projection;

        self.get_collection(collection)
            .find_one_and_delete(query.filter)
            .with_options(options)
            .await
            .map_err(backend_error)
    }

    async fn find_and_modify(
        &self,
        collection: &str,
        query: NativeQuery,
        update: Document,
        return_new: bool,
    ) -> DataAccessResult<Option<Document>> {
        let mut options = FindOneAndUpdateOptions::default();
        options.sort = query.sort;
        options.projection = query.projection;
        options.return_document = Some(if return_new {
            ReturnDocument::After
        } else {
            ReturnDocument::Before
        });

        self.get_collection(collection)
            .find_one_and_update(query.filter, update)
            .with_options(options)
            .await
            .map_err(backend_error)
    }

    async fn collection_exists(&self, collection: &str) -> DataAccessResult<bool> {
        Ok(!self
            .get_database()
            .list_collection_names()
            .filter(doc! { "name": collection })
            .await
            .map_err(backend_error)?
            .is_empty())
    }

    async fn map_reduce(
        &self,
        collection: &str,
        filter: Document,
        map: &str,
        reduce: &str,
    ) -> DataAccessResult<Vec<Document>> {
        let response = self
            .get_database()
            .run_command(map_reduce_command(collection, filter, map, reduce))
            .selection_criteria(self.selection_criteria.clone())
            .await
            .map_err(backend_error)?;

        response
            .get_array("results")
            .map_err(|e| DataAccessError::InvalidDocument(e.to_string()))?
            .iter()
            .map(|result| {
                result.as_document().cloned().ok_or_else(|| {
                    DataAccessError::InvalidDocument(format!(
                        "Expected a map-reduce result document, got {}",
                        result
                    ))
                })
            })
            .collect()
    }

    async fn group(
        &self,
        collection: &str,
        filter: Document,
        group: &GroupBy,
    ) -> DataAccessResult<Vec<Document>> {
        let mut options = AggregateOptions::default();
        options.selection_criteria = Some(self.selection_criteria.clone());

        self.get_collection(collection)
            .aggregate(group_pipeline(filter, group))
            .with_options(options)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn shutdown(self) -> DataAccessResult<()> {
        // handles built together share the client, so don't wait on the other one
        self.client.shutdown().immediate(true).await;

        Ok(())
    }
}

/// Builds [`MongoDbStore`] handles from a connection string.
///
/// # Example
///
/// ```ignore
/// use docmapper::mongodb::MongoDbStore;
///
/// let handles = MongoDbStore::builder("mongodb://localhost:27017", "forum")
///     .with_app_name("forum-api")
///     .build_handles()
///     .await?;
/// ```
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    read_preference: Option<ReadPreference>,
    app_name: Option<String>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            read_preference: None,
            app_name: None,
        }
    }

    /// Read preference of the handle returned by `build`. Defaults to primary.
    pub fn with_read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = Some(read_preference);
        self
    }

    pub fn with_app_name(mut self, app_name: &str) -> Self {
        self.app_name = Some(app_name.to_string());
        self
    }

    async fn client(&self) -> DataAccessResult<Client> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DataAccessError::Initialization(e.to_string()))?;

        if let Some(app_name) = &self.app_name {
            options.app_name = Some(app_name.clone());
        }

        Client::with_options(options).map_err(|e| DataAccessError::Initialization(e.to_string()))
    }

    /// A primary handle and a secondary-preferred handle over one client.
    pub async fn build_handles(self) -> DataAccessResult<ReadHandles<MongoDbStore>> {
        let client = self.client().await?;
        tracing::debug!("Connected primary and replica handles to database {}", self.database);

        let primary = MongoDbStore::new(client, self.database);
        let replica = primary
            .clone()
            .with_read_preference(ReadPreference::SecondaryPreferred { options: None });

        Ok(ReadHandles::new(primary, replica))
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DataAccessResult<Self::Backend> {
        let client = self.client().await?;
        tracing::debug!("Connected to database {}", self.database);

        let store = MongoDbStore::new(client, self.database);

        Ok(match self.read_preference {
            Some(read_preference) => store.with_read_preference(read_preference),
            None => store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_flattens_keys_into_the_result() {
        let group = GroupBy::new(["qid", "a.n"]).count("total").max("best", "vc");

        let pipeline = group_pipeline(doc! { "vc": { "$gt": 1 } }, &group);

        assert_eq!(
            pipeline,
            vec![
                doc! { "$match": { "vc": { "$gt": 1 } } },
                doc! {
                    "$group": {
                        "_id": { "qid": "$qid", "a_n": "$a.n" },
                        "total": { "$sum": 1_i64 },
                        "best": { "$max": "$vc" },
                    }
                },
                doc! { "$replaceWith": { "$mergeObjects": ["$_id", "$$ROOT"] } },
                doc! { "$project": { "_id": 0 } },
            ]
        );
    }

    #[test]
    fn group_without_keys_uses_a_single_bucket() {
        let pipeline = group_pipeline(doc! {}, &GroupBy::default().sum("votes", "vc"));

        assert_eq!(
            pipeline[1],
            doc! { "$group": { "_id": null, "votes": { "$sum": "$vc" } } }
        );
    }

    #[test]
    fn map_reduce_returns_results_inline() {
        let command = map_reduce_command("answers", doc! { "qid": "q-1" }, "m", "r");

        assert_eq!(command.get_str("mapReduce").unwrap(), "answers");
        assert_eq!(command.get_document("out").unwrap(), &doc! { "inline": 1 });
        assert!(matches!(command.get("map"), Some(Bson::JavaScriptCode(_))));
    }
}
