mod common;

use clipboard_tts::error::Error;
use clipboard_tts::listener::{ChangeListener, Notification};
use clipboard_tts::model::work::{ANSWER_READY, QUESTION_PENDING, WorkId};
use common::{ChannelSource, RecordingHandler, eventually};
use std::sync::Arc;
use std::time::Duration;

fn pending(id: &str) -> Notification {
    Notification::new(QUESTION_PENDING, id)
}

#[tokio::test]
async fn channels_are_reported_sorted() {
    let mut listener = ChangeListener::new();
    listener.subscribe(QUESTION_PENDING, Arc::new(RecordingHandler::new()));
    listener.subscribe(ANSWER_READY, Arc::new(RecordingHandler::new()));
    assert_eq!(listener.channels(), vec![ANSWER_READY, QUESTION_PENDING]);
}

#[tokio::test]
async fn handler_failures_and_panics_do_not_end_the_subscription() {
    let handler = Arc::new(RecordingHandler::new().failing_on(1).panicking_on(2));
    let mut listener = ChangeListener::new();
    listener.subscribe(QUESTION_PENDING, handler.clone());

    let (tx, mut source) = ChannelSource::pair();
    for id in ["1", "2", "3"] {
        tx.send(Ok(pending(id))).await.unwrap();
    }
    tx.send(Err(Error::StreamClosed)).await.unwrap();

    let err = listener.run(&mut source).await.unwrap_err();
    assert!(matches!(err, Error::StreamClosed));

    listener.drain(Duration::from_secs(5)).await;
    assert_eq!(handler.seen(), vec![WorkId(1), WorkId(2), WorkId(3)]);
    assert_eq!(listener.in_flight(), 0);
}

#[tokio::test]
async fn bad_payloads_and_foreign_channels_are_skipped() {
    let handler = Arc::new(RecordingHandler::new());
    let mut listener = ChangeListener::new();
    listener.subscribe(QUESTION_PENDING, handler.clone());

    let (tx, mut source) = ChannelSource::pair();
    tx.send(Ok(pending("not-a-number"))).await.unwrap();
    tx.send(Ok(Notification::new(ANSWER_READY, "7"))).await.unwrap();
    tx.send(Ok(pending(" 8 "))).await.unwrap();
    drop(tx);

    assert!(listener.run(&mut source).await.is_err());
    listener.drain(Duration::from_secs(5)).await;
    assert_eq!(handler.seen(), vec![WorkId(8)]);
}

#[tokio::test]
async fn a_slow_handler_does_not_hold_up_the_next_event() {
    let handler = Arc::new(RecordingHandler::new().blocking_on(1));
    let mut listener = ChangeListener::new();
    listener.subscribe(QUESTION_PENDING, handler.clone());

    let (tx, mut source) = ChannelSource::pair();
    let run = tokio::spawn(async move {
        let res = listener.run(&mut source).await;
        (listener, res)
    });

    tx.send(Ok(pending("1"))).await.unwrap();
    tx.send(Ok(pending("2"))).await.unwrap();
    eventually("second event handled", || handler.seen() == vec![WorkId(2)]).await;

    handler.release();
    drop(tx);
    let (mut listener, res) = run.await.unwrap();
    assert!(res.is_err());
    listener.drain(Duration::from_secs(5)).await;
    assert_eq!(handler.seen(), vec![WorkId(1), WorkId(2)]);
}

#[tokio::test(start_paused = true)]
async fn drain_abandons_handlers_after_the_grace_period() {
    let handler = Arc::new(RecordingHandler::new().blocking_on(1));
    let mut listener = ChangeListener::new();
    listener.subscribe(QUESTION_PENDING, handler.clone());

    listener.dispatch(pending("1"));
    listener.dispatch(pending("2"));
    assert_eq!(listener.in_flight(), 2);

    let started = tokio::time::Instant::now();
    listener.drain(Duration::from_secs(3)).await;

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(listener.in_flight(), 0);
    assert_eq!(handler.seen(), vec![WorkId(2)]);
}

#[tokio::test]
async fn catch_up_dispatches_every_backlog() {
    let answers = Arc::new(RecordingHandler::new().with_backlog(&[3, 4]));
    let speech = Arc::new(RecordingHandler::new().with_backlog(&[2]));
    let mut listener = ChangeListener::new();
    listener.subscribe(QUESTION_PENDING, answers.clone());
    listener.subscribe(ANSWER_READY, speech.clone());

    listener.catch_up().await;
    listener.drain(Duration::from_secs(5)).await;

    assert_eq!(answers.seen(), vec![WorkId(3), WorkId(4)]);
    assert_eq!(speech.seen(), vec![WorkId(2)]);
}
