use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use thinking_trace::subscriber::{StreamSubscriber, SubscriptionStatus};
use thinking_trace::trace::{SessionFilter, SessionStatus};
use thinking_trace::transport::sse::HttpEventSource;
use thinking_trace::transport::{EventSource, TransportError};

const TOKEN: &str = "t0ken";

#[derive(Debug, Deserialize)]
struct StreamQuery {
    conversation_id: String,
}

fn frame(value: &serde_json::Value) -> String {
    format!("data: {value}\n\n")
}

/// Serves a short scripted trace for conversation `c1`, split into uneven chunks.
async fn thinking_stream(Query(query): Query<StreamQuery>, headers: HeaderMap) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    }
    if query.conversation_id != "c1" {
        return (StatusCode::NOT_FOUND, "unknown conversation").into_response();
    }

    let body = [
        ": keep-alive\n\n".to_string(),
        frame(&json!({
            "type": "thinking",
            "process": { "id": "p1", "conversation_id": "c1", "message_id": "m1",
                         "metadata": { "model": "gpt-4o", "provider": "openai" } },
            "stage": "analyzing", "thought": "Look", "timestamp": "2024-01-01T00:00:00Z"
        })),
        frame(&json!({ "type": "token", "delta": "ignored" })),
        frame(&json!({
            "type": "thinking",
            "process": { "id": "p1", "conversation_id": "c1", "message_id": "m1" },
            "stage": "analyzing", "thought": " closer", "timestamp": "2024-01-01T00:00:01Z"
        })),
        frame(&json!({
            "type": "process_completed",
            "process": { "id": "p1", "type": "thinking" },
            "timestamp": "2024-01-01T00:00:02Z",
            "metadata": { "thinking_tokens": 12 }
        })),
    ]
    .concat();

    // Split mid-frame to exercise reassembly across reads.
    let (head, tail) = body.split_at(body.len() / 2);
    let chunks = vec![
        Ok::<_, std::io::Error>(head.to_string()),
        Ok(tail.to_string()),
    ];

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(futures::stream::iter(chunks)),
    )
        .into_response()
}

async fn spawn_server() -> String {
    let app = Router::new().route("/api/thinking/stream", get(thinking_stream));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn source(base_url: &str) -> HttpEventSource {
    HttpEventSource::new(base_url, "/api/thinking/stream")
        .unwrap()
        .with_auth_token(Some(TOKEN.to_string()))
}

#[tokio::test]
async fn test_connect_yields_raw_records() {
    let base_url = spawn_server().await;

    let stream = source(&base_url).connect("c1").await.unwrap();
    let records: Vec<String> = stream.map(Result::unwrap).collect().await;

    assert_eq!(records.len(), 4);
    assert!(records[0].contains("\"Look\""));
    assert!(records[1].contains("\"token\""));
    assert!(records[3].contains("process_completed"));
}

#[tokio::test]
async fn test_non_success_status_is_reported() {
    let base_url = spawn_server().await;

    let Err(err) = source(&base_url).connect("missing").await else {
        panic!("expected connect to fail");
    };
    match err {
        TransportError::Status { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "unknown conversation");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let unauthenticated = HttpEventSource::new(&base_url, "/api/thinking/stream").unwrap();
    let Err(err) = unauthenticated.connect("c1").await else {
        panic!("expected connect to fail");
    };
    assert!(matches!(err, TransportError::Status { status: 401, .. }));
}

#[tokio::test]
async fn test_subscriber_over_http() {
    let base_url = spawn_server().await;
    let mut subscriber = StreamSubscriber::new(Arc::new(source(&base_url)));
    let mut view = subscriber.view();

    subscriber.set_conversation(Some("c1")).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while !matches!(view.status(), SubscriptionStatus::Closed { .. }) {
            assert!(view.changed().await);
        }
    })
    .await
    .expect("stream never closed");

    let sessions = view.snapshot(&SessionFilter::message("m1"));
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.id, "p1");
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.full_thought(), "Look closer");
    assert_eq!(session.total_tokens, Some(12));
    assert_eq!(session.model, "gpt-4o");
}
