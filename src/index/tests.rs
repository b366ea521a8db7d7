use super::*;

fn record(id: &str, vector: Vec<f32>) -> EmbeddingRecord {
    EmbeddingRecord {
        post_id: id.to_string(),
        vector,
        source_text: format!("{id}. body"),
    }
}

fn index_of(records: Vec<EmbeddingRecord>) -> VectorIndex {
    let mut index = VectorIndex::new();
    for r in records {
        index.insert(r).expect("record should insert");
    }
    index
}

#[test]
fn similarity_transform() {
    assert!((similarity_from_distance(0.0) - 1.0).abs() < f32::EPSILON);
    assert!((similarity_from_distance(-0.5) - 1.0).abs() < f32::EPSILON);
    assert!((similarity_from_distance(1.0) - 0.5).abs() < f32::EPSILON);
    assert!((similarity_from_distance(3.0) - 0.25).abs() < f32::EPSILON);

    let score = similarity_from_distance(1_000.0);
    assert!(score > 0.0 && score < 0.01);
}

#[test]
fn squared_distance() {
    assert!((squared_euclidean(&[1.0, 2.0], &[1.0, 2.0])).abs() < f32::EPSILON);
    assert!((squared_euclidean(&[0.0, 0.0], &[3.0, 4.0]) - 25.0).abs() < f32::EPSILON);
}

#[test]
fn nearest_orders_by_ascending_distance() {
    let index = index_of(vec![
        record("far", vec![10.0, 0.0]),
        record("near", vec![1.0, 0.0]),
        record("mid", vec![4.0, 0.0]),
    ]);

    let hits = index.nearest(&[0.0, 0.0], 3).expect("query should succeed");
    let ids: Vec<&str> = hits.iter().map(|h| h.post_id.as_str()).collect();
    assert_eq!(ids, vec!["near", "mid", "far"]);
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert!(hits.windows(2).all(|w| w[0].similarity() >= w[1].similarity()));
}

#[test]
fn ties_keep_insertion_order() {
    let index = index_of(vec![
        record("b", vec![0.0, 1.0]),
        record("a", vec![1.0, 0.0]),
        record("c", vec![0.0, -1.0]),
    ]);

    let hits = index.nearest(&[0.0, 0.0], 3).expect("query should succeed");
    let ids: Vec<&str> = hits.iter().map(|h| h.post_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
}

#[test]
fn k_larger_than_index_returns_everything() {
    let index = index_of(vec![record("a", vec![1.0]), record("b", vec![2.0])]);

    let hits = index.nearest(&[0.5], 10).expect("query should succeed");
    assert_eq!(hits.len(), 2);
}

#[test]
fn k_of_one_is_the_minimum() {
    let index = index_of(vec![
        record("a", vec![5.0, 5.0]),
        record("b", vec![0.5, 0.5]),
        record("c", vec![2.0, 2.0]),
    ]);

    let hits = index.nearest(&[0.0, 0.0], 1).expect("query should succeed");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].post_id, "b");
}

#[test]
fn empty_index_and_zero_k_return_nothing() {
    let index = VectorIndex::new();
    assert!(index.nearest(&[1.0, 2.0], 3).expect("empty query ok").is_empty());

    let index = index_of(vec![record("a", vec![1.0])]);
    assert!(index.nearest(&[1.0], 0).expect("zero k ok").is_empty());
}

#[test]
fn insert_replaces_in_place() {
    let mut index = index_of(vec![
        record("a", vec![1.0, 0.0]),
        record("b", vec![0.0, 1.0]),
    ]);

    let replaced = index
        .insert(record("a", vec![0.0, 2.0]))
        .expect("replace should succeed");
    assert!(replaced);
    assert_eq!(index.len(), 2);

    let ids: Vec<&str> = index.ids().collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(
        index.get("a").map(|r| r.vector.clone()),
        Some(vec![0.0, 2.0])
    );
}

#[test]
fn remove_keeps_lookup_consistent() {
    let mut index = index_of(vec![
        record("a", vec![1.0]),
        record("b", vec![2.0]),
        record("c", vec![3.0]),
    ]);

    assert!(index.remove("a"));
    assert!(!index.remove("a"));
    assert_eq!(index.len(), 2);
    assert!(!index.contains("a"));
    assert_eq!(index.get("c").map(|r| r.vector[0]), Some(3.0));
    assert_eq!(index.get("b").map(|r| r.vector[0]), Some(2.0));

    let hits = index.nearest(&[3.0], 1).expect("query should succeed");
    assert_eq!(hits[0].post_id, "c");
}

#[test]
fn removing_last_record_resets_dimension() {
    let mut index = index_of(vec![record("a", vec![1.0, 1.0])]);
    assert_eq!(index.dimension(), Some(2));

    index.remove("a");
    assert_eq!(index.dimension(), None);
    assert!(index.insert(record("b", vec![1.0, 1.0, 1.0])).is_ok());
}

#[test]
fn dimension_mismatch_is_rejected() {
    let mut index = index_of(vec![record("a", vec![1.0, 0.0])]);

    let err = index
        .insert(record("b", vec![1.0, 0.0, 0.0]))
        .expect_err("mismatched insert must fail");
    assert!(matches!(err, KbError::InvalidInput(_)));

    assert!(index.nearest(&[1.0], 1).is_err());
}

#[test]
fn invalid_vectors_are_rejected() {
    let mut index = VectorIndex::new();

    assert!(matches!(
        index.insert(record("empty", Vec::new())),
        Err(KbError::Embedding(_))
    ));
    assert!(matches!(
        index.insert(record("zero", vec![0.0, 0.0])),
        Err(KbError::Embedding(_))
    ));
    assert!(matches!(
        index.insert(record("nan", vec![f32::NAN, 1.0])),
        Err(KbError::Embedding(_))
    ));
    assert!(index.is_empty());
}
