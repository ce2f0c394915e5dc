// ABOUTME: Integration tests for the inference relay state machine
// ABOUTME: Covers ordered forwarding, backend failure, cancellation, disconnect and timeouts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod helpers;

use helpers::stubs::{ScriptedProvider, Step};
use parley_server::llm::{ChatMessage, ChatRequest};
use parley_server::relay::{AbortCause, InferenceRelay, RelayOutcome, RelayState};
use parley_server::services::generation::StreamEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn request() -> ChatRequest {
    ChatRequest::new(vec![ChatMessage::user("Tell me a story")], "test-model")
}

fn relay() -> InferenceRelay {
    InferenceRelay::new(Duration::from_secs(5), Duration::from_secs(60))
}

fn drain(receiver: &mut mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_fragments_forwarded_in_order() {
    let provider = ScriptedProvider::replying("stub", &["Once ", "upon ", "a time"]);
    let (sender, mut receiver) = mpsc::channel(64);

    let report = relay()
        .run(&provider, &request(), &sender, &CancellationToken::new())
        .await;

    assert_eq!(report.state, RelayState::Completed);
    assert_eq!(report.fragments, 3);
    match report.outcome {
        RelayOutcome::Completed { content } => assert_eq!(content, "Once upon a time"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        drain(&mut receiver),
        vec![
            StreamEvent::chunk("Once "),
            StreamEvent::chunk("upon "),
            StreamEvent::chunk("a time"),
        ]
    );
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_empty_fragments_are_skipped() {
    let provider = ScriptedProvider::replying("stub", &["", "Hi", ""]);
    let (sender, mut receiver) = mpsc::channel(64);

    let report = relay()
        .run(&provider, &request(), &sender, &CancellationToken::new())
        .await;

    assert_eq!(report.fragments, 1);
    assert_eq!(drain(&mut receiver), vec![StreamEvent::chunk("Hi")]);
}

#[tokio::test]
async fn test_backend_failure_after_fragments() {
    let provider = ScriptedProvider::failing_after("stub", &["Hel", "lo"]);
    let (sender, mut receiver) = mpsc::channel(64);

    let report = relay()
        .run(&provider, &request(), &sender, &CancellationToken::new())
        .await;

    assert_eq!(report.state, RelayState::Failed);
    match report.outcome {
        RelayOutcome::Failed { partial, .. } => assert_eq!(partial, "Hello"),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let events = drain(&mut receiver);
    let kinds: Vec<&str> = events.iter().map(StreamEvent::kind).collect();
    assert_eq!(kinds, vec!["chunk", "chunk", "error"]);
}

#[tokio::test]
async fn test_backend_refuses_stream() {
    let provider = ScriptedProvider::refusing("stub", "model overloaded");
    let (sender, mut receiver) = mpsc::channel(64);

    let report = relay()
        .run(&provider, &request(), &sender, &CancellationToken::new())
        .await;

    assert_eq!(report.state, RelayState::Failed);
    assert_eq!(report.fragments, 0);
    let events = drain(&mut receiver);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::Error { message } if message.contains("overloaded")));
}

#[tokio::test]
async fn test_cancellation_aborts_without_error_event() {
    let provider = ScriptedProvider::hanging_after("stub", &["partial "]);
    let (sender, mut receiver) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let relay = relay();
    let request = request();

    let (report, events) = tokio::join!(
        relay.run(&provider, &request, &sender, &cancel),
        async {
            let first = receiver.recv().await.unwrap();
            cancel.cancel();
            first
        }
    );

    assert_eq!(events, StreamEvent::chunk("partial "));
    assert_eq!(report.state, RelayState::Aborted);
    match report.outcome {
        RelayOutcome::Aborted { cause, partial } => {
            assert_eq!(cause, AbortCause::Cancelled);
            assert_eq!(partial, "partial ");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(drain(&mut receiver).is_empty());
}

#[tokio::test]
async fn test_client_disconnect_aborts() {
    let provider = ScriptedProvider::hanging_after("stub", &["one"]);
    let (sender, mut receiver) = mpsc::channel(64);
    let relay = relay();
    let cancel = CancellationToken::new();
    let request = request();

    let (report, ()) = tokio::join!(
        relay.run(&provider, &request, &sender, &cancel),
        async move {
            receiver.recv().await.unwrap();
            drop(receiver);
        }
    );

    match report.outcome {
        RelayOutcome::Aborted { cause, partial } => {
            assert_eq!(cause, AbortCause::ClientDisconnected);
            assert_eq!(partial, "one");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_emits_timeout_error() {
    let provider = ScriptedProvider::hanging_after("stub", &["slow"]);
    let (sender, mut receiver) = mpsc::channel(64);

    let report = relay()
        .run(&provider, &request(), &sender, &CancellationToken::new())
        .await;

    match report.outcome {
        RelayOutcome::Aborted { cause, .. } => assert_eq!(cause, AbortCause::IdleTimeout),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let kinds: Vec<&str> = drain(&mut receiver).iter().map(StreamEvent::kind).collect();
    assert_eq!(kinds, vec!["chunk", "error"]);
}

#[tokio::test(start_paused = true)]
async fn test_total_timeout_bounds_a_trickling_stream() {
    let steps = (0..20)
        .flat_map(|i| {
            [
                Step::Delay(Duration::from_secs(2)),
                Step::Fragment(format!("{i} ")),
            ]
        })
        .collect();
    let provider = ScriptedProvider::new("stub", steps);
    let (sender, mut receiver) = mpsc::channel(64);
    let relay = InferenceRelay::new(Duration::from_secs(5), Duration::from_secs(7));

    let report = relay
        .run(&provider, &request(), &sender, &CancellationToken::new())
        .await;

    match report.outcome {
        RelayOutcome::Aborted { cause, partial } => {
            assert_eq!(cause, AbortCause::TotalTimeout);
            assert_eq!(partial, "0 1 2 ");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(report.fragments, 3);
    let events = drain(&mut receiver);
    assert!(events.last().is_some_and(StreamEvent::is_terminal));
}
