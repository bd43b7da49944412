mod common;

use common::{collection, tracker_schemas, TestFixture};
use dynamodel::query::{Predicate, QuerySpec};
use dynamodel::{ModelError, RegistrationError};
use serde_json::json;

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

async fn seeded() -> TestFixture {
    let fixture = TestFixture::with_schemas(tracker_schemas()).await.unwrap();
    fixture
        .seed(
            "task",
            vec![
                json!({"id": "t1", "title": "write", "status": "open", "estimate": 3}),
                json!({"id": "t2", "title": "review", "status": "done", "estimate": 1}),
            ],
        )
        .await;
    fixture
        .seed(
            "label",
            vec![
                json!({"id": "l1", "color": "red"}),
                json!({"id": "l2", "color": "blue"}),
            ],
        )
        .await;
    fixture
}

#[tokio::test]
async fn unresolved_target_leaves_nothing_queryable() {
    let mut entries = tracker_schemas();
    entries.push(collection(
        "comment",
        json!({"author": {"type": "association", "relationship": "BelongsTo", "target": "user"}}),
    ));

    let fixture = TestFixture::empty();
    let err = fixture.handle.reload(entries).await.unwrap_err();
    assert!(matches!(
        err,
        ModelError::Registration(RegistrationError::UnresolvedTarget { ref target, .. }) if target == "user"
    ));

    let set = fixture.handle.current();
    assert_eq!(set.generation(), 0);
    for entity in ["project", "task", "label", "comment"] {
        assert!(set.model(entity).is_none(), "{} should not be registered", entity);
    }
}

#[tokio::test]
async fn count_matches_get_and_add_is_idempotent() {
    let fixture = seeded().await;
    let set = fixture.handle.current();
    let labels = set.resolve_accessor("task", "labels").unwrap().multi().unwrap().clone();

    labels.set("t1", &ids(&["l1"])).unwrap();
    assert_eq!(labels.count("t1", None).unwrap(), 1);
    assert_eq!(labels.get("t1", &QuerySpec::unbounded()).unwrap().len(), 1);

    labels.add("t1", &ids(&["l1", "l2"])).unwrap();
    assert!(labels.has("t1", "l2").unwrap());
    assert_eq!(labels.count("t1", None).unwrap(), 2);

    labels.add("t1", &ids(&["L2"])).unwrap();
    assert_eq!(labels.count("t1", None).unwrap(), 2);
    assert_eq!(
        labels.count("t1", None).unwrap(),
        labels.get("t1", &QuerySpec::unbounded()).unwrap().len()
    );

    let red = Predicate::contains("color", json!("RED"));
    assert_eq!(labels.count("t1", Some(&red)).unwrap(), 1);
    let filtered = labels
        .get("t1", &QuerySpec::unbounded().with_predicate(red))
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0]["id"], json!("l1"));
}

#[tokio::test]
async fn link_tables_are_shared_between_inverse_sides() {
    let fixture = seeded().await;
    let set = fixture.handle.current();
    let task_labels = set.resolve_accessor("task", "labels").unwrap().multi().unwrap().clone();
    let label_tasks = set.resolve_accessor("label", "tasks").unwrap().multi().unwrap().clone();

    task_labels.set("t1", &ids(&["l1"])).unwrap();
    task_labels.set("t2", &ids(&["l1", "l2"])).unwrap();
    assert_eq!(label_tasks.count("l1", None).unwrap(), 2);
    assert!(label_tasks.has("l2", "t2").unwrap());

    label_tasks.remove("l1", &ids(&["t2"])).unwrap();
    assert!(!task_labels.has("t2", "l1").unwrap());
    assert_eq!(task_labels.count("t2", None).unwrap(), 1);

    task_labels.set("t2", &[]).unwrap();
    assert_eq!(label_tasks.count("l2", None).unwrap(), 0);
}

#[tokio::test]
async fn has_many_and_belongs_to_share_one_key() {
    let fixture = seeded().await;
    fixture.seed("project", vec![json!({"id": "p1", "title": "Launch"})]).await;
    let set = fixture.handle.current();
    let tasks = set.resolve_accessor("project", "tasks").unwrap().multi().unwrap().clone();
    let project = set.resolve_accessor("task", "project").unwrap().single().unwrap().clone();

    tasks.set("p1", &ids(&["t1", "t2"])).unwrap();
    assert_eq!(project.get("t2").unwrap().unwrap()["id"], json!("p1"));

    tasks.set("p1", &ids(&["t2"])).unwrap();
    assert!(project.get("t1").unwrap().is_none());
    assert!(tasks.has("p1", "t2").unwrap());
    assert!(!tasks.has("p1", "t1").unwrap());

    project.set("t1", Some("p1")).unwrap();
    assert_eq!(tasks.count("p1", None).unwrap(), 2);
    project.set("t1", None).unwrap();
    assert_eq!(tasks.count("p1", None).unwrap(), 1);
}

#[tokio::test]
async fn reload_keeps_rows_and_links() {
    let fixture = seeded().await;
    let set = fixture.handle.current();
    set.resolve_accessor("task", "labels")
        .unwrap()
        .multi()
        .unwrap()
        .set("t1", &ids(&["l1", "l2"]))
        .unwrap();

    let next = fixture.handle.reload(tracker_schemas()).await.unwrap();
    assert_eq!(next.generation(), 2);
    let labels = next.resolve_accessor("task", "labels").unwrap().multi().unwrap().clone();
    assert_eq!(labels.count("t1", None).unwrap(), 2);
    let task = next
        .backend()
        .get_row(&next.model("task").unwrap().table, "t1")
        .unwrap()
        .unwrap();
    assert_eq!(task["title"], json!("write"));
}

#[tokio::test]
async fn concurrent_reloads_are_serialized() {
    let fixture = TestFixture::with_schemas(tracker_schemas()).await.unwrap();
    let (a, b) = tokio::join!(
        fixture.handle.reload(tracker_schemas()),
        fixture.handle.reload(tracker_schemas())
    );
    let mut generations = vec![a.unwrap().generation(), b.unwrap().generation()];
    generations.sort();
    assert_eq!(generations, vec![2, 3]);
    assert_eq!(fixture.handle.current().generation(), 3);
}
