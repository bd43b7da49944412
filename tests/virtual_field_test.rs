mod common;

use common::{collection, tracker_schemas, TestFixture};
use dynamodel::query::QueryRequest;
use dynamodel::{LoadRequest, ModelError, VirtualFieldError};
use serde_json::json;

#[tokio::test]
async fn virtual_values_follow_their_params() {
    let fixture = TestFixture::with_schemas(tracker_schemas()).await.unwrap();
    let row = fixture
        .service
        .upsert_instance("task", json!({"id": "t1", "title": "ship it", "estimate": 3}))
        .await
        .unwrap();
    assert_eq!(row["headline"], json!("SHIP IT #3"));

    fixture
        .service
        .upsert_instance("task", json!({"id": "t1", "estimate": 5}))
        .await
        .unwrap();
    let reloaded = fixture.service.load_document("task", "t1").await.unwrap().unwrap();
    assert_eq!(reloaded["headline"], json!("SHIP IT #5"));
}

#[tokio::test]
async fn association_params_evaluate_as_null() {
    let fixture = TestFixture::with_schemas(tracker_schemas()).await.unwrap();
    fixture.seed("project", vec![json!({"id": "p1", "title": "Launch"})]).await;
    let row = fixture
        .service
        .upsert_instance("task", json!({"id": "t1", "title": "a", "estimate": 1, "project": "p1"}))
        .await
        .unwrap();
    assert_eq!(row["project"], json!("p1"));
    assert_eq!(row["projectRef"], json!("none"));
}

#[tokio::test]
async fn writing_a_virtual_field_is_rejected() {
    let fixture = TestFixture::with_schemas(tracker_schemas()).await.unwrap();
    let err = fixture
        .service
        .upsert_instance("task", json!({"id": "t1", "title": "a", "headline": "forced"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ModelError::VirtualField(VirtualFieldError::Immutable { ref field, .. }) if field == "headline"
    ));
    assert!(fixture.service.load_document("task", "t1").await.unwrap().is_none());
}

#[tokio::test]
async fn undeclared_variables_fail_at_read_time() {
    let fixture = TestFixture::with_schemas(vec![collection(
        "note",
        json!({
            "body": {"type": "string"},
            "teaser": {"type": "virtual", "expression": "body + suffix", "params": ["body"]}
        }),
    )])
    .await
    .unwrap();

    let err = fixture
        .service
        .upsert_instance("note", json!({"id": "n1", "body": "hello"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::VirtualField(VirtualFieldError::Evaluation { .. })));

    let err = fixture
        .service
        .load_data(LoadRequest::entity("note").with_query(QueryRequest::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::VirtualField(VirtualFieldError::Evaluation { ref field, .. }) if field == "teaser"));
}

#[tokio::test]
async fn rows_sort_by_virtual_columns() {
    let fixture = TestFixture::with_schemas(tracker_schemas()).await.unwrap();
    fixture
        .seed(
            "task",
            vec![
                json!({"id": "t1", "title": "beta", "estimate": 1}),
                json!({"id": "t2", "title": "alpha", "estimate": 2}),
                json!({"id": "t3", "title": "gamma", "estimate": 3}),
            ],
        )
        .await;
    let result = fixture
        .service
        .load_data(LoadRequest::entity("task").with_query(QueryRequest::new().sort("headline", "desc")))
        .await
        .unwrap();
    let ids: Vec<_> = result.data.iter().map(|row| row["id"].clone()).collect();
    assert_eq!(ids, vec![json!("t3"), json!("t1"), json!("t2")]);
}
