//! End-to-end over a real loopback WebSocket server (tokio-tungstenite).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lib_realtime::{ConnectionEvent, ConnectionState, MemoryCache, RealtimeClient, RealtimeConfig};
use project_tests::wait_for_event;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

fn config_for(port: u16) -> RealtimeConfig {
    RealtimeConfig {
        ws_base_url: format!("ws://127.0.0.1:{port}/api/v1/ws/notifications"),
        reconnect_interval_ms: 100,
        ..RealtimeConfig::default()
    }
}

fn query_token(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn notification_pushed_by_server_lands_in_the_store() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen_token = Arc::new(Mutex::new(None));

    let server_token = seen_token.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            *server_token.lock().unwrap() = query_token(request);
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();

        ws.send(Message::text(
            r#"{"type":"connection","message":"Connected to notifications","user_id":"u1","timestamp":"2024-01-01T00:00:00"}"#,
        ))
        .await
        .unwrap();

        // The registry replays the subscription as soon as the session opens.
        let frame = ws.next().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "subscribe_course");
        let course_id = value["course_id"].as_str().unwrap().to_string();
        ws.send(Message::text(format!(
            r#"{{"type":"subscription_confirmed","course_id":"{course_id}","message":"Subscribed"}}"#
        )))
        .await
        .unwrap();

        ws.send(Message::text(
            r#"{"type":"course_notification","data":{"title":"Live session","message":"Starts in 10 minutes","level":"warning","action_url":"/courses/c-42"},"timestamp":"2024-01-01T00:00:05"}"#,
        ))
        .await
        .unwrap();

        // Hold the socket until the client closes it.
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
        course_id
    });

    let client = RealtimeClient::new(config_for(port), Arc::new(MemoryCache::default()));
    client.subscribe_course("c-42");
    client.connect("secret token/+").unwrap();

    let store = client.notifications().clone();
    let arrived = tokio::time::timeout(Duration::from_secs(5), async {
        while store.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(arrived.is_ok(), "notification never reached the store");

    let record = &store.list()[0];
    assert_eq!(record.title, "Live session");
    assert_eq!(record.action_url.as_deref(), Some("/courses/c-42"));
    assert_eq!(record.timestamp, "2024-01-01T00:00:05");
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect().await;
    let course_id = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(course_id, "c-42");
    assert_eq!(seen_token.lock().unwrap().as_deref(), Some("secret token/+"));
}

#[tokio::test]
async fn handshake_401_is_an_auth_rejection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let reject = |_request: &Request, _response: Response| -> Result<Response, ErrorResponse> {
            let mut error = ErrorResponse::new(Some("invalid token".to_string()));
            *error.status_mut() = StatusCode::UNAUTHORIZED;
            Err(error)
        };
        let _ = tokio_tungstenite::accept_hdr_async(stream, reject).await;
    });

    let client = RealtimeClient::new(config_for(port), Arc::new(MemoryCache::default()));
    let mut events = client.events();
    client.connect("expired").unwrap();

    let seen = wait_for_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, ConnectionEvent::AuthRejected { .. })
    })
    .await;
    assert_eq!(seen.last(), Some(&ConnectionEvent::AuthRejected { code: 401 }));
    assert_eq!(client.state(), ConnectionState::Error);
}

#[tokio::test]
async fn server_close_4003_stops_reconnecting() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::from(4003),
                reason: "Not enrolled in this course".into(),
            }))
            .await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = RealtimeClient::new(config_for(port), Arc::new(MemoryCache::default()));
    let mut events = client.events();
    client.connect("tok").unwrap();

    let seen = wait_for_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, ConnectionEvent::AuthRejected { .. })
    })
    .await;
    assert!(seen.contains(&ConnectionEvent::Closed {
        code: 4003,
        reason: "Not enrolled in this course".to_string()
    }));
    assert_eq!(seen.last(), Some(&ConnectionEvent::AuthRejected { code: 4003 }));
}

#[tokio::test]
async fn refused_port_exhausts_the_retry_budget() {
    // Bind then drop to get a port with nothing listening.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = RealtimeConfig {
        max_reconnect_attempts: 2,
        ..config_for(port)
    };
    let client = RealtimeClient::new(config, Arc::new(MemoryCache::default()));
    let mut events = client.events();
    client.connect("tok").unwrap();

    let seen = wait_for_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, ConnectionEvent::ReconnectExhausted { .. })
    })
    .await;
    assert_eq!(seen.last(), Some(&ConnectionEvent::ReconnectExhausted { attempts: 2 }));
    assert_eq!(client.state(), ConnectionState::Error);
}
