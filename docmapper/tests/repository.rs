use bson::{Bson, doc, oid::ObjectId};
use docmapper::{memory::InMemoryStore, prelude::*};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Author {
    #[serde(rename = "n")]
    name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ByExample)]
struct Answer {
    #[serde(rename = "_id")]
    #[example(skip)]
    id: ObjectId,
    #[serde(rename = "qid")]
    question_id: Option<String>,
    #[serde(rename = "vc")]
    votes: Option<i32>,
    #[serde(rename = "a")]
    author: Option<Author>,
}

impl Mapped for Answer {
    fn collection_name() -> &'static str {
        "answers"
    }
}

impl Entity for Answer {
    type Id = ObjectId;

    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn metadata() -> EntityMetadata {
        EntityMetadata::builder("answers")
            .id("id")
            .property("question_id", "qid")
            .property("votes", "vc")
            .embedded(
                "author",
                "a",
                EntityMetadata::builder("authors").property("name", "n").build(),
            )
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Stats {
    views: i64,
}

impl Mapped for Stats {
    fn collection_name() -> &'static str {
        "stats"
    }
}

/// A collection that stores plain string ids, some of which look like
/// hex object ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Badge {
    #[serde(rename = "_id")]
    id: String,
    label: String,
}

impl Mapped for Badge {
    fn collection_name() -> &'static str {
        "badges"
    }
}

impl Entity for Badge {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }

    fn metadata() -> EntityMetadata {
        EntityMetadata::builder("badges").id("id").legacy_ids().build()
    }
}

#[derive(Debug, PartialEq, Deserialize)]
struct VotesPerQuestion {
    qid: String,
    total: i64,
    votes: i64,
}

fn answer(question_id: &str, votes: i32, author: &str) -> Answer {
    Answer {
        id: ObjectId::new(),
        question_id: Some(question_id.to_string()),
        votes: Some(votes),
        author: Some(Author {
            name: author.to_string(),
        }),
    }
}

async fn seeded() -> (InMemoryStore, Repository<Answer, InMemoryStore>, Vec<Answer>) {
    let store = InMemoryStore::new();
    let answers = Repository::new(store.handles());

    let fixtures = vec![
        answer("q-1", 1, "Ana"),
        answer("q-1", 2, "Bo"),
        answer("q-2", 3, "Cy"),
        answer("q-2", 4, "Di"),
        answer("q-3", 5, "Ed"),
    ];
    answers.insert_all(&fixtures).await.unwrap();
    store.clear_journal().await;

    (store, answers, fixtures)
}

async fn handles_used(store: &InMemoryStore) -> Vec<(String, &'static str)> {
    store
        .journal()
        .await
        .into_iter()
        .map(|entry| (entry.handle, entry.operation))
        .collect()
}

fn ran(entries: &[(&str, &'static str)]) -> Vec<(String, &'static str)> {
    entries
        .iter()
        .map(|(handle, operation)| (handle.to_string(), *operation))
        .collect()
}

#[tokio::test]
async fn point_lookups_read_from_the_primary() {
    let (store, answers, fixtures) = seeded().await;

    answers.find_by_id(fixtures[0].id).await.unwrap();
    answers
        .find_one(&Query::matching(Criteria::eq("question_id", "q-2")))
        .await
        .unwrap();
    answers.chain().greater_than("votes", 4).one().await.unwrap();

    assert_eq!(
        handles_used(&store).await,
        ran(&[("primary", "find"), ("primary", "find"), ("primary", "find")])
    );
}

#[tokio::test]
async fn bulk_reads_and_writes_use_the_replica_handle() {
    let (store, answers, fixtures) = seeded().await;

    answers.find_all().await.unwrap();
    answers.count_all().await.unwrap();
    answers
        .find_page(&Query::new(), &PageRequest::new(1, 2))
        .await
        .unwrap();
    answers.remove_entity(&fixtures[4]).await.unwrap();

    assert_eq!(
        handles_used(&store).await,
        ran(&[
            ("replica", "find"),
            ("replica", "count"),
            ("replica", "count"),
            ("replica", "find"),
            ("replica", "remove"),
        ])
    );
}

#[tokio::test]
async fn hex_strings_find_canonical_ids() {
    let (store, answers, fixtures) = seeded().await;

    let found = answers.find_by_id(fixtures[2].id.to_hex()).await.unwrap();
    assert_eq!(found, Some(fixtures[2].clone()));

    let journal = store.journal().await;
    assert_eq!(journal[0].filter, Some(doc! { "_id": fixtures[2].id }));
}

#[tokio::test]
async fn legacy_ids_are_never_converted() {
    let store = InMemoryStore::new();
    let badges = Repository::<Badge, _>::new(store.handles());
    let hex_like = "5f0c4b2e9d1a3c0012345678";

    badges
        .insert_all(&[
            Badge {
                id: hex_like.to_string(),
                label: "gold".to_string(),
            },
            Badge {
                id: "plain".to_string(),
                label: "silver".to_string(),
            },
        ])
        .await
        .unwrap();

    let found = badges.find_by_id(hex_like).await.unwrap();
    assert_eq!(found.map(|badge| badge.label), Some("gold".to_string()));

    let others = badges
        .find_list(&Query::matching(Criteria::ne("id", hex_like)))
        .await
        .unwrap();
    assert_eq!(others.len(), 1);
    assert_eq!(others[0].id, "plain");

    let lookups: Vec<_> = store
        .journal()
        .await
        .into_iter()
        .filter_map(|entry| entry.filter)
        .collect();
    assert_eq!(
        lookups,
        vec![
            doc! { "_id": hex_like },
            doc! { "_id": { "$ne": hex_like } },
        ]
    );
}

#[tokio::test]
async fn pages_carry_the_total_and_neighbours() {
    let (_, answers, _) = seeded().await;

    let request = PageRequest::builder()
        .with_page(2)
        .with_per_page(2)
        .with_sort("votes", SortDirection::Asc)
        .build();
    let page = answers.find_page(&Query::new(), &request).await.unwrap();

    let votes: Vec<_> = page.items.iter().filter_map(|answer| answer.votes).collect();
    assert_eq!(votes, vec![3, 4]);
    assert_eq!(page.count, 5);
    assert_eq!(page.next_page, Some(3));
    assert_eq!(page.previous_page, Some(1));

    let last = answers
        .find_page(&Query::new(), &PageRequest::new(3, 2))
        .await
        .unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.next_page, None);
}

#[tokio::test]
async fn walking_every_page_yields_the_total() {
    let (_, answers, fixtures) = seeded().await;
    let query = Query::matching(Criteria::ne("question_id", "q-9"));

    let mut seen = Vec::new();
    let mut next = Some(1);
    let mut totals = Vec::new();
    while let Some(number) = next {
        let request = PageRequest::builder()
            .with_page(number)
            .with_per_page(2)
            .with_sort("votes", SortDirection::Desc)
            .build();
        let page = answers.find_page(&query, &request).await.unwrap();

        assert!(page.items.len() <= 2);
        totals.push(page.count);
        seen.extend(page.items.into_iter().map(|answer| answer.id));
        next = page.next_page;
    }

    assert_eq!(totals, vec![5, 5, 5]);
    assert_eq!(seen.len() as u64, totals[0]);

    let expected: Vec<_> = fixtures.iter().rev().map(|answer| answer.id).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn zero_sized_pages_are_rejected() {
    let (store, answers, _) = seeded().await;

    let result = answers.find_page(&Query::new(), &PageRequest::new(1, 0)).await;
    assert!(matches!(result, Err(DataAccessError::InvalidQuery(_))));
    assert!(store.journal().await.is_empty());

    let chained = answers.chain().page_at(1, 0).list().await.unwrap();
    assert_eq!(chained.len(), 1);
}

#[tokio::test]
async fn chain_count_sends_filter_limit_and_sort() {
    let (store, answers, _) = seeded().await;
    let more: Vec<_> = (6..=8).map(|votes| answer("q-4", votes, "Al")).collect();
    answers.insert_all(&more).await.unwrap();
    store.clear_journal().await;

    let count = answers
        .chain()
        .regex_match("author.name", "^[A-Z]")
        .limit(5)
        .sort_asc("votes")
        .count()
        .await
        .unwrap();
    assert_eq!(count, 5);

    let journal = store.journal().await;
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].operation, "count");
    assert_eq!(journal[0].filter, Some(doc! { "a.n": { "$regex": "^[A-Z]" } }));
    assert_eq!(journal[0].limit, Some(5));
    assert_eq!(journal[0].sort, Some(doc! { "vc": 1 }));
}

#[tokio::test]
async fn page_totals_ignore_the_page_window() {
    let (store, answers, _) = seeded().await;

    answers
        .find_page(&Query::new(), &PageRequest::new(2, 2))
        .await
        .unwrap();

    let journal = store.journal().await;
    assert_eq!(journal[0].operation, "count");
    assert_eq!((journal[0].skip, journal[0].limit, journal[0].sort.clone()), (None, None, None));
    assert_eq!(journal[1].operation, "find");
    assert_eq!((journal[1].skip, journal[1].limit), (Some(2), Some(2)));
}

#[tokio::test]
async fn chain_filters_on_nested_and_logical_fields() {
    let (_, answers, _) = seeded().await;

    let found = answers
        .chain()
        .regex_match("author.name", "^[AB]")
        .less_than("votes", 2)
        .list()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].author.as_ref().map(|a| a.name.as_str()), Some("Ana"));

    let either = answers
        .chain()
        .filter(Criteria::or([
            Criteria::eq("question_id", "q-3"),
            Criteria::eq("author.name", "Cy"),
        ]))
        .sort_asc("votes")
        .list()
        .await
        .unwrap();
    let votes: Vec<_> = either.iter().filter_map(|answer| answer.votes).collect();
    assert_eq!(votes, vec![3, 5]);

    let excluded = answers.chain().not_in("question_id", ["q-1", "q-2"]).count().await.unwrap();
    assert_eq!(excluded, 1);
}

#[tokio::test]
async fn by_example_matches_populated_fields() {
    let (_, answers, _) = seeded().await;

    let sample = Answer {
        id: ObjectId::new(),
        question_id: Some("q-2".to_string()),
        votes: None,
        author: None,
    };

    let found = answers
        .chain()
        .by_example(&sample)
        .unwrap()
        .sort_desc("votes")
        .list()
        .await
        .unwrap();

    let votes: Vec<_> = found.iter().filter_map(|answer| answer.votes).collect();
    assert_eq!(votes, vec![4, 3]);
}

#[tokio::test]
async fn find_field_skips_missing_collections() {
    let store = InMemoryStore::new();
    let answers = Repository::<Answer, _>::new(store.handles());

    let values = answers.find_field(&Query::new(), "question_id").await.unwrap();

    assert!(values.is_empty());
    assert_eq!(handles_used(&store).await, ran(&[("replica", "collection_exists")]));
}

#[tokio::test]
async fn find_field_projects_logical_fields() {
    let (_, answers, fixtures) = seeded().await;

    let mut query = Query::matching(Criteria::eq("question_id", "q-2"));
    query.with_sort(Sort::desc("votes"));

    assert_eq!(
        answers.find_field(&query, "author.name").await.unwrap(),
        vec!["Di".to_string(), "Cy".to_string()]
    );
    assert_eq!(
        answers.find_id(&query).await.unwrap(),
        vec![fixtures[3].id.to_hex(), fixtures[2].id.to_hex()]
    );
}

#[tokio::test]
async fn find_by_ids_in_order_follows_the_request() {
    let (_, answers, fixtures) = seeded().await;

    let ids = vec![
        Bson::String(fixtures[3].id.to_hex()),
        Bson::ObjectId(fixtures[0].id),
        Bson::ObjectId(ObjectId::new()),
        Bson::ObjectId(fixtures[1].id),
    ];
    let found = answers.find_by_ids_in_order(ids).await.unwrap();

    assert_eq!(
        found,
        vec![fixtures[3].clone(), fixtures[0].clone(), fixtures[1].clone()]
    );
}

#[tokio::test]
async fn key_value_and_map_lookups() {
    let (_, answers, _) = seeded().await;

    assert_eq!(answers.find_list_by_key_value("question_id", "q-1").await.unwrap().len(), 2);
    assert_eq!(
        answers
            .find_list_by_key_values("question_id", ["q-1", "q-3"])
            .await
            .unwrap()
            .len(),
        3
    );
    assert_eq!(
        answers
            .find_list_by_map(&doc! { "question_id": "q-2", "votes": 4 })
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(answers.find_list_by_map(&doc! {}).await.unwrap().is_empty());
    assert_eq!(answers.count_by_map(&doc! {}).await.unwrap(), 5);
    assert_eq!(answers.count_by("question_id", "q-2").await.unwrap(), 2);
    assert_eq!(
        answers
            .find_list_with_limit(&Query::new(), 3)
            .await
            .unwrap()
            .len(),
        3
    );
}

#[tokio::test]
async fn duplicate_inserts_are_rejected() {
    let (_, answers, fixtures) = seeded().await;

    let result = answers.insert(&fixtures[0]).await;

    assert!(matches!(result, Err(DataAccessError::DocumentAlreadyExists(_, _))));
}

#[tokio::test]
async fn save_inserts_then_replaces() {
    let (_, answers, _) = seeded().await;
    let mut fresh = answer("q-9", 0, "Fy");

    answers.save(&fresh).await.unwrap();
    fresh.votes = Some(10);
    answers.save(&fresh).await.unwrap();

    assert_eq!(answers.find_by_id(fresh.id).await.unwrap(), Some(fresh.clone()));
    assert_eq!(answers.count_all().await.unwrap(), 6);

    let missing = answer("q-9", 0, "Gu");
    assert_eq!(answers.update(&missing).await.unwrap(), 0);
}

#[tokio::test]
async fn updates_map_logical_fields() {
    let (_, answers, fixtures) = seeded().await;

    let touched = answers
        .update_by_id(fixtures[0].id.to_hex(), &Update::new().inc("votes", 10))
        .await
        .unwrap();
    assert_eq!(touched, 1);

    let touched = answers
        .update_by_ids(
            [fixtures[1].id, fixtures[2].id],
            &Update::new().set("author.name", "Zed"),
        )
        .await
        .unwrap();
    assert_eq!(touched, 2);

    let updated = answers.find_by_id(fixtures[0].id).await.unwrap().unwrap();
    assert_eq!(updated.votes, Some(11));
    assert_eq!(answers.count_by("author.name", "Zed").await.unwrap(), 2);

    let result = answers.update_by_id(fixtures[0].id, &Update::new()).await;
    assert!(matches!(result, Err(DataAccessError::InvalidQuery(_))));
}

#[tokio::test]
async fn upsert_creates_from_equality_criteria() {
    let (_, answers, _) = seeded().await;
    let query = Query::matching(Criteria::eq("question_id", "q-7"));

    assert_eq!(answers.upsert(&query, &Update::new().set("votes", 1)).await.unwrap(), 1);
    assert_eq!(answers.upsert(&query, &Update::new().inc("votes", 1)).await.unwrap(), 1);

    let created = answers.find_one(&query).await.unwrap().unwrap();
    assert_eq!(created.votes, Some(2));
    assert_eq!(created.author, None);
}

#[tokio::test]
async fn find_and_modify_and_remove_follow_the_sort() {
    let (_, answers, fixtures) = seeded().await;

    let mut top = Query::matching(Criteria::eq("question_id", "q-2"));
    top.with_sort(Sort::desc("votes"));

    let before = answers
        .find_and_modify(&top, &Update::new().set("votes", 0), false)
        .await
        .unwrap();
    assert_eq!(before, Some(fixtures[3].clone()));

    let removed = answers.find_and_remove(&top).await.unwrap();
    assert_eq!(removed, Some(fixtures[2].clone()));
    assert_eq!(answers.count_by("question_id", "q-2").await.unwrap(), 1);

    assert_eq!(answers.remove_by_ids([fixtures[0].id, fixtures[1].id]).await.unwrap(), 2);
    assert_eq!(answers.remove_by_id(fixtures[4].id.to_hex()).await.unwrap(), 1);
    assert_eq!(answers.count_all().await.unwrap(), 1);
}

#[tokio::test]
async fn sub_documents_round_trip() {
    let (_, answers, fixtures) = seeded().await;
    let id = fixtures[0].id;

    assert_eq!(answers.find_sub::<Stats>(id, None).await.unwrap(), None);

    answers.save_sub(id, &Stats { views: 3 }, None).await.unwrap();
    answers
        .save_sub(id.to_hex(), &Stats { views: 9 }, Some("weekly"))
        .await
        .unwrap();

    assert_eq!(
        answers.find_sub::<Stats>(id.to_hex(), None).await.unwrap(),
        Some(Stats { views: 3 })
    );
    assert_eq!(
        answers.find_sub::<Stats>(id, Some("weekly")).await.unwrap(),
        Some(Stats { views: 9 })
    );
    assert_eq!(answers.find_by_id(id).await.unwrap(), Some(fixtures[0].clone()));

    let result = answers.find_sub::<Stats>(id, Some("qid")).await;
    assert!(matches!(result, Err(DataAccessError::InvalidDocument(_))));
}

#[tokio::test]
async fn group_reports_physical_keys() {
    let (_, answers, _) = seeded().await;

    let mut rows: Vec<VotesPerQuestion> = answers
        .group(
            &Query::matching(Criteria::ne("question_id", "q-3")),
            &GroupBy::new(["question_id"]).count("total").sum("votes", "votes"),
        )
        .await
        .unwrap();
    rows.sort_by(|a, b| a.qid.cmp(&b.qid));

    assert_eq!(
        rows,
        vec![
            VotesPerQuestion {
                qid: "q-1".to_string(),
                total: 2,
                votes: 3,
            },
            VotesPerQuestion {
                qid: "q-2".to_string(),
                total: 2,
                votes: 7,
            },
        ]
    );
}

#[tokio::test]
async fn map_reduce_surfaces_backend_support() {
    let (_, answers, _) = seeded().await;

    let result = answers
        .map_reduce::<bson::Document>(&Query::new(), "function() {}", "function() {}")
        .await;

    assert!(matches!(result, Err(DataAccessError::Unsupported(_))));
}
