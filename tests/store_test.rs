use clipboard_tts::artifact::{ArtifactStore, MemoryArtifacts};
use clipboard_tts::listener::Notification;
use clipboard_tts::model::work::{ANSWER_READY, QUESTION_PENDING, Stage, WorkId};
use clipboard_tts::store::{self, MemoryStore, WorkStore, WriteOutcome};
use tokio::sync::broadcast;

fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

#[tokio::test]
async fn insert_assigns_increasing_ids_and_emits_question_pending() {
    let store = MemoryStore::new();
    let mut events = store.subscribe();

    let first = store.insert("What is 2+2?").await.unwrap();
    let second = store.insert("Capital of France?").await.unwrap();
    assert_eq!(first, WorkId(1));
    assert_eq!(second, WorkId(2));

    let item = store.fetch(first).await.unwrap().unwrap();
    assert_eq!(item.question, "What is 2+2?");
    assert_eq!(item.answer, None);
    assert_eq!(item.audio, None);

    assert_eq!(
        drain(&mut events),
        vec![
            Notification::new(QUESTION_PENDING, "1"),
            Notification::new(QUESTION_PENDING, "2"),
        ]
    );
}

#[tokio::test]
async fn answer_ready_fires_once_on_first_answer_only() {
    let store = MemoryStore::new();
    let id = store.insert("What is 2+2?").await.unwrap();
    let mut events = store.subscribe();

    assert_eq!(
        store.set_output(Stage::Answer, id, "4").await.unwrap(),
        WriteOutcome::Written
    );
    assert_eq!(
        store.set_output(Stage::Answer, id, "four").await.unwrap(),
        WriteOutcome::Written
    );

    assert_eq!(drain(&mut events), vec![Notification::new(ANSWER_READY, "1")]);
    let item = store.fetch(id).await.unwrap().unwrap();
    assert_eq!(item.answer.as_deref(), Some("four"));
}

#[tokio::test]
async fn audio_writes_emit_nothing() {
    let store = MemoryStore::new();
    let id = store.insert("q").await.unwrap();
    store.set_output(Stage::Answer, id, "a").await.unwrap();
    let mut events = store.subscribe();

    store.set_output(Stage::Speech, id, "/artifacts/1.mp3").await.unwrap();
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn conditional_write_never_overwrites() {
    let store = MemoryStore::new();
    let id = store.insert("q").await.unwrap();

    assert_eq!(
        store.set_output_if_empty(Stage::Answer, id, "first").await.unwrap(),
        WriteOutcome::Written
    );
    assert_eq!(
        store.set_output_if_empty(Stage::Answer, id, "second").await.unwrap(),
        WriteOutcome::AlreadySet
    );
    assert_eq!(
        store
            .set_output_if_empty(Stage::Answer, WorkId(99), "x")
            .await
            .unwrap(),
        WriteOutcome::NotFound
    );

    let item = store.fetch(id).await.unwrap().unwrap();
    assert_eq!(item.answer.as_deref(), Some("first"));
}

#[tokio::test]
async fn writes_to_missing_rows_report_not_found() {
    let store = MemoryStore::new();
    assert_eq!(
        store.set_output(Stage::Speech, WorkId(5), "x").await.unwrap(),
        WriteOutcome::NotFound
    );
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn list_is_newest_first_and_ids_are_never_reused() {
    let store = MemoryStore::new();
    for q in ["a", "b", "c"] {
        store.insert(q).await.unwrap();
    }
    assert_eq!(
        store.list_ids().await.unwrap(),
        vec![WorkId(3), WorkId(2), WorkId(1)]
    );

    store.delete(WorkId(3)).await.unwrap();
    let next = store.insert("d").await.unwrap();
    assert_eq!(next, WorkId(4));
}

#[tokio::test]
async fn delete_returns_prior_audio() {
    let store = MemoryStore::new();
    let id = store.insert("q").await.unwrap();
    store.set_output(Stage::Answer, id, "a").await.unwrap();
    store.set_output(Stage::Speech, id, "/artifacts/1.mp3").await.unwrap();

    assert_eq!(
        store.delete(id).await.unwrap(),
        Some(Some("/artifacts/1.mp3".to_string()))
    );
    assert_eq!(store.delete(id).await.unwrap(), None);
    assert!(store.fetch(id).await.unwrap().is_none());
}

#[tokio::test]
async fn pending_lists_respect_prerequisites() {
    let store = MemoryStore::new();
    let fresh = store.insert("fresh").await.unwrap();
    let answered = store.insert("answered").await.unwrap();
    let done = store.insert("done").await.unwrap();
    store.set_output(Stage::Answer, answered, "a").await.unwrap();
    store.set_output(Stage::Answer, done, "a").await.unwrap();
    store.set_output(Stage::Speech, done, "/artifacts/3.mp3").await.unwrap();

    assert_eq!(store.list_pending(Stage::Answer).await.unwrap(), vec![fresh]);
    assert_eq!(store.list_pending(Stage::Speech).await.unwrap(), vec![answered]);
}

#[tokio::test]
async fn delete_item_removes_the_artifact_too() {
    let store = MemoryStore::new();
    let artifacts = MemoryArtifacts::new("/artifacts");
    let id = store.insert("q").await.unwrap();
    store.set_output(Stage::Answer, id, "a").await.unwrap();
    let reference = artifacts.put(id, "mp3", b"ID3").await.unwrap();
    store.set_output(Stage::Speech, id, &reference).await.unwrap();

    assert!(store::delete_item(&store, &artifacts, id).await.unwrap());
    assert!(artifacts.is_empty());
    assert!(!store::delete_item(&store, &artifacts, id).await.unwrap());
}

#[tokio::test]
async fn delete_item_tolerates_markers_and_missing_artifacts() {
    let store = MemoryStore::new();
    let artifacts = MemoryArtifacts::new("/artifacts");

    let failed = store.insert("q").await.unwrap();
    store.set_output(Stage::Answer, failed, "a").await.unwrap();
    store
        .set_output(Stage::Speech, failed, "[error] speech failed (fatal): 401")
        .await
        .unwrap();
    assert!(store::delete_item(&store, &artifacts, failed).await.unwrap());

    let orphan = store.insert("q").await.unwrap();
    store.set_output(Stage::Answer, orphan, "a").await.unwrap();
    store
        .set_output(Stage::Speech, orphan, "/artifacts/2.mp3")
        .await
        .unwrap();
    assert!(store::delete_item(&store, &artifacts, orphan).await.unwrap());
    assert!(store.list_ids().await.unwrap().is_empty());
}
