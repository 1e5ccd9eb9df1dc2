use bson::{Bson, doc};
use querylab::errors::{ConfigError, GatewayError};
use querylab::query::interpret;
use querylab::store::{DocumentStore, MemoryStore, Outcome};
use std::io::Write;

fn store() -> MemoryStore {
    let s = MemoryStore::new();
    s.insert_many(
        "books",
        [
            doc! { "_id": 1, "title": "Dune", "year": 1965, "tags": ["sf", "desert"], "author": { "name": "Herbert" } },
            doc! { "_id": 2, "title": "Emma", "year": 1815, "tags": ["classic"], "author": { "name": "Austen" } },
            doc! { "_id": 3, "title": "Neuromancer", "year": 1984.0, "tags": ["sf", "cyberpunk"] },
            doc! { "_id": 4, "title": "Untitled", "year": Bson::Null },
        ],
    );
    s
}

async fn run(s: &MemoryStore, q: &str) -> Result<Outcome, GatewayError> {
    s.execute(&interpret(q, "books").unwrap()).await
}

async fn ids(s: &MemoryStore, q: &str) -> Vec<i32> {
    match run(s, q).await.unwrap() {
        Outcome::Documents(docs) => docs.iter().map(|d| d.get_i32("_id").unwrap()).collect(),
        other => panic!("expected documents, got {other:?}"),
    }
}

#[tokio::test]
async fn comparison_operators_mix_numeric_types() {
    let s = store();
    assert_eq!(ids(&s, "db.books.find({ year: { $gte: 1965 } })").await, vec![1, 3]);
    assert_eq!(ids(&s, "db.books.find({ year: 1984 })").await, vec![3]);
    assert_eq!(ids(&s, "db.books.find({ year: { $lt: 1900, $gt: 1800 } })").await, vec![2]);
}

#[tokio::test]
async fn array_fields_match_elements() {
    let s = store();
    assert_eq!(ids(&s, "db.books.find({ tags: 'sf' })").await, vec![1, 3]);
    assert_eq!(ids(&s, "db.books.find({ tags: { $in: ['classic', 'cyberpunk'] } })").await, vec![2, 3]);
    assert_eq!(ids(&s, "db.books.find({ tags: { $nin: ['sf'] } })").await, vec![2, 4]);
}

#[tokio::test]
async fn logical_and_existence_operators() {
    let s = store();
    assert_eq!(ids(&s, "db.books.find({ $or: [{ _id: 1 }, { title: 'Emma' }] })").await, vec![1, 2]);
    assert_eq!(ids(&s, "db.books.find({ $nor: [{ tags: 'sf' }] })").await, vec![2, 4]);
    assert_eq!(ids(&s, "db.books.find({ author: { $exists: false } })").await, vec![3, 4]);
    assert_eq!(ids(&s, "db.books.find({ 'author.name': 'Austen' })").await, vec![2]);
    assert_eq!(ids(&s, "db.books.find({ year: null })").await, vec![4]);
    assert_eq!(ids(&s, "db.books.find({ _id: { $ne: 1 } })").await, vec![2, 3, 4]);
}

#[tokio::test]
async fn regular_expressions() {
    let s = store();
    assert_eq!(ids(&s, "db.books.find({ title: /^e/i })").await, vec![2]);
    assert_eq!(ids(&s, "db.books.find({ title: { $regex: 'man', $options: '' } })").await, vec![3]);
    assert_eq!(ids(&s, "db.books.find({ title: { $not: /n/ } })").await, vec![2]);
}

#[tokio::test]
async fn sort_orders_across_types() {
    let s = store();
    // null sorts before numbers
    assert_eq!(ids(&s, "db.books.find().sort({ year: 1 })").await, vec![4, 2, 1, 3]);
    assert_eq!(ids(&s, "db.books.find().sort({ title: -1 }).limit(2)").await, vec![4, 3]);
}

#[tokio::test]
async fn projection_modes() {
    let s = store();
    let Outcome::Documents(docs) = run(&s, "db.books.find({ _id: 1 }, { 'author.name': 1 })").await.unwrap() else {
        panic!("expected documents")
    };
    assert_eq!(docs, vec![doc! { "_id": 1, "author": { "name": "Herbert" } }]);

    let Outcome::Documents(docs) = run(&s, "db.books.find({ _id: 2 }, { tags: 0, author: 0, _id: 0 })").await.unwrap()
    else {
        panic!("expected documents")
    };
    assert_eq!(docs, vec![doc! { "title": "Emma", "year": 1815 }]);

    let Outcome::Documents(docs) = run(&s, "db.books.find({ year: { $lt: 1900 } }, { _id: 1 })").await.unwrap() else {
        panic!("expected documents")
    };
    assert_eq!(docs, vec![doc! { "_id": 2 }]);

    let err = run(&s, "db.books.find({}, { title: 1, year: 0 })").await.unwrap_err();
    assert!(matches!(err, GatewayError::Execution(_)));
}

#[tokio::test]
async fn aggregation_stages_run_in_order() {
    let s = store();
    let out = run(&s, "db.books.aggregate([{ $match: { tags: 'sf' } }, { $sort: { year: -1 } }, { $project: { title: 1, _id: 0 } }])")
        .await
        .unwrap();
    assert_eq!(out, Outcome::Documents(vec![doc! { "title": "Neuromancer" }, doc! { "title": "Dune" }]));

    let out = run(&s, "db.books.aggregate([{ $skip: 1 }, { $limit: 2 }, { $count: 'n' }])").await.unwrap();
    assert_eq!(out, Outcome::Documents(vec![doc! { "n": 2 }]));

    let out = run(&s, "db.books.aggregate([])").await.unwrap();
    assert_eq!(out.count(), 4);
}

#[tokio::test]
async fn unsupported_stage_is_an_execution_error() {
    let err = run(&store(), "db.books.aggregate([{ $lookup: { from: 'authors' } }])").await.unwrap_err();
    assert!(matches!(err, GatewayError::Execution(ref m) if m.contains("$lookup")));
}

#[tokio::test]
async fn counts_and_distinct() {
    let s = store();
    assert_eq!(run(&s, "db.books.countDocuments({ tags: 'sf' })").await.unwrap(), Outcome::Count(2));
    assert_eq!(run(&s, "db.books.estimatedDocumentCount()").await.unwrap(), Outcome::Count(4));
    assert_eq!(run(&s, "db.authors.estimatedDocumentCount()").await.unwrap(), Outcome::Count(0));
    assert_eq!(
        run(&s, "db.books.distinct('tags')").await.unwrap(),
        Outcome::Values(vec!["sf".into(), "desert".into(), "classic".into(), "cyberpunk".into()])
    );
    // 1965 and 1965.0 are the same value
    s.insert_many("books", [doc! { "_id": 5, "year": 1965.0 }]);
    let Outcome::Values(years) = run(&s, "db.books.distinct('year', { year: { $gt: 1900 } })").await.unwrap() else {
        panic!("expected values")
    };
    assert_eq!(years.len(), 2);
}

#[tokio::test]
async fn find_one_returns_first_match_or_none() {
    let s = store();
    let out = run(&s, "db.books.findOne({ tags: 'sf' }, { title: 1 })").await.unwrap();
    assert_eq!(out, Outcome::Document(Some(doc! { "_id": 1, "title": "Dune" })));
    assert_eq!(run(&s, "db.books.findOne({ _id: 99 })").await.unwrap(), Outcome::Document(None));
}

#[tokio::test]
async fn seed_file_loads_collections() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    write!(
        f,
        r#"{{"books": [{{"title": "Dune", "_id": {{"$oid": "507f1f77bcf86cd799439011"}}}}, {{"title": "Emma"}}], "authors": []}}"#
    )
    .unwrap();
    let s = MemoryStore::from_seed_file(f.path()).unwrap();
    assert_eq!(run(&s, "db.books.countDocuments()").await.unwrap(), Outcome::Count(2));
    assert_eq!(run(&s, "db.authors.countDocuments()").await.unwrap(), Outcome::Count(0));
    let Outcome::Document(Some(dune)) = run(&s, "db.books.findOne({ title: 'Dune' })").await.unwrap() else {
        panic!("expected a document")
    };
    assert!(matches!(dune.get("_id"), Some(Bson::ObjectId(_))));
}

#[test]
fn seed_file_errors() {
    let missing = MemoryStore::from_seed_file(std::path::Path::new("/definitely/not/here.json")).unwrap_err();
    assert!(matches!(missing, ConfigError::Io(_)));

    let mut f = tempfile::NamedTempFile::new().unwrap();
    write!(f, "[1, 2]").unwrap();
    assert!(matches!(MemoryStore::from_seed_file(f.path()).unwrap_err(), ConfigError::Seed(_)));

    let mut f = tempfile::NamedTempFile::new().unwrap();
    write!(f, "{{ nope").unwrap();
    assert!(matches!(MemoryStore::from_seed_file(f.path()).unwrap_err(), ConfigError::Json(_)));
}
