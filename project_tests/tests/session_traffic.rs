//! What flows over an open session: subscription replay, keepalive pings,
//! pong-timeout recovery and inbound routing.

use std::sync::Arc;
use std::time::Duration;

use lib_realtime::{
    ConnectionEvent, ConnectionManager, ConnectionSettings, ConnectionState, MemoryCache, MessageCategory,
    MessageRouter, RealtimeClient, RealtimeConfig, RoutedEvent, SubscriptionRegistry,
};
use project_tests::{subscribe_frame, test_settings, wait_for_event, Plan, Script, ScriptedConnector};
use tokio::time;

struct Rig {
    manager: ConnectionManager<ScriptedConnector>,
    registry: Arc<SubscriptionRegistry>,
    router: Arc<MessageRouter>,
    script: Script,
}

fn rig(settings: ConnectionSettings) -> Rig {
    let (connector, script) = ScriptedConnector::new(Plan::Accept);
    let router = Arc::new(MessageRouter::new());
    let manager = ConnectionManager::new(connector, settings, router.clone());
    let registry = Arc::new(SubscriptionRegistry::new(manager.handle()));
    manager.add_listener(registry.clone());
    Rig {
        manager,
        registry,
        router,
        script,
    }
}

#[tokio::test(start_paused = true)]
async fn subscriptions_are_replayed_exactly_once_after_reconnect() {
    let mut rig = rig(test_settings(5));
    let mut events = rig.manager.events();

    rig.manager.connect("tok").unwrap();
    let mut first = rig.script.next_session().await;
    wait_for_event(&mut events, Duration::from_secs(1), |e| *e == ConnectionEvent::Connected).await;

    assert!(rig.registry.subscribe("A"));
    assert!(rig.registry.subscribe("B"));
    assert!(!rig.registry.subscribe("A"));
    assert_eq!(
        first.frames_within(Duration::from_secs(1)).await,
        vec![subscribe_frame("A"), subscribe_frame("B")]
    );

    first.close(1006);
    let mut second = rig.script.next_session().await;
    let mut replayed = second.frames_within(Duration::from_secs(1)).await;
    replayed.sort();
    assert_eq!(replayed, vec![subscribe_frame("A"), subscribe_frame("B")]);
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_topics_are_not_replayed() {
    let mut rig = rig(test_settings(5));

    rig.registry.subscribe("A");
    rig.registry.subscribe("B");
    rig.registry.unsubscribe("B");

    rig.manager.connect("tok").unwrap();
    let mut first = rig.script.next_session().await;
    assert_eq!(first.frames_within(Duration::from_secs(1)).await, vec![subscribe_frame("A")]);

    rig.registry.subscribe("C");
    rig.registry.unsubscribe("C");
    assert_eq!(
        first.frames_within(Duration::from_secs(1)).await,
        vec![
            subscribe_frame("C"),
            r#"{"type":"unsubscribe_course","course_id":"C"}"#.to_string()
        ]
    );

    drop(first);
    let mut second = rig.script.next_session().await;
    assert_eq!(second.frames_within(Duration::from_secs(1)).await, vec![subscribe_frame("A")]);
}

#[tokio::test(start_paused = true)]
async fn keepalive_pings_every_thirty_seconds_while_connected() {
    let mut rig = rig(test_settings(5));
    rig.manager.connect("tok").unwrap();
    let mut session = rig.script.next_session().await;
    let opened = time::Instant::now();

    let first = session.next_frame().await.unwrap();
    assert!(first.contains(r#""type":"ping""#), "{first}");
    let at = opened.elapsed();
    assert!(at >= Duration::from_secs(30) && at < Duration::from_millis(30_100), "{at:?}");

    session.next_frame().await.unwrap();
    let at = opened.elapsed();
    assert!(at >= Duration::from_secs(60) && at < Duration::from_millis(60_100), "{at:?}");
    assert_eq!(rig.manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn silent_connection_is_abandoned_after_the_pong_timeout() {
    let settings = ConnectionSettings {
        pong_timeout: Some(Duration::from_secs(45)),
        ..test_settings(5)
    };
    let mut rig = rig(settings);
    let mut events = rig.manager.events();

    rig.manager.connect("tok").unwrap();
    let _silent = rig.script.next_session().await;
    let opened = time::Instant::now();

    let seen = wait_for_event(&mut events, Duration::from_secs(120), |e| {
        matches!(e, ConnectionEvent::Closed { .. })
    })
    .await;
    assert_eq!(
        seen.last(),
        Some(&ConnectionEvent::Closed {
            code: 1006,
            reason: "pong timeout".to_string()
        })
    );
    assert!(opened.elapsed() >= Duration::from_secs(45));

    let _second = rig.script.next_session().await;
    assert_eq!(rig.script.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn pongs_keep_a_monitored_connection_open() {
    let settings = ConnectionSettings {
        pong_timeout: Some(Duration::from_secs(45)),
        ..test_settings(5)
    };
    let mut rig = rig(settings);
    rig.manager.connect("tok").unwrap();
    let mut session = rig.script.next_session().await;

    for _ in 0..4 {
        let ping = session.next_frame().await.unwrap();
        assert!(ping.contains("ping"));
        session.push_text(r#"{"type":"pong","timestamp":"2024-01-01T00:00:00"}"#);
    }
    assert_eq!(rig.script.attempts(), 1);
    assert_eq!(rig.manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_does_not_disturb_its_neighbours() {
    let mut rig = rig(test_settings(5));
    let mut events = rig.manager.events();
    let mut errors = rig.router.subscribe(MessageCategory::ParseError);
    let mut notes = rig.router.subscribe(MessageCategory::Notification);
    let mut progress = rig.router.subscribe(MessageCategory::ProgressUpdate);

    rig.manager.connect("tok").unwrap();
    let session = rig.script.next_session().await;
    session.push_text(r#"{"type":"course_notification","data":{"title":"New lesson","message":"Week 3 is up"}}"#);
    session.push_text(r#"{"type":"notification", broken"#);
    session.push_text(
        r#"{"type":"progress_updated","user_id":"u","course_id":"c","content_id":"v","progress_percentage":50,"completed":false}"#,
    );
    time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(errors.try_recv().as_deref(), Ok(RoutedEvent::ParseError { .. })));
    assert!(errors.try_recv().is_err());
    assert!(matches!(notes.try_recv().as_deref(), Ok(RoutedEvent::Notification(n)) if n.title == "New lesson"));
    assert!(matches!(progress.try_recv().as_deref(), Ok(RoutedEvent::ProgressUpdated(u)) if u.progress_percentage == 50));

    assert_eq!(rig.manager.state(), ConnectionState::Connected);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, ConnectionEvent::Closed { .. }), "{event:?}");
    }
    assert_eq!(rig.script.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn client_feeds_pushed_notifications_into_the_store() {
    let (connector, mut script) = ScriptedConnector::new(Plan::Accept);
    let cache = Arc::new(MemoryCache::default());
    let client = RealtimeClient::with_connector(RealtimeConfig::default(), connector, cache.clone());
    let mut toasts = client.notifications().toasts();

    client.subscribe_course("course-1");
    client.connect("tok").unwrap();
    let mut session = script.next_session().await;
    assert_eq!(
        session.frames_within(Duration::from_secs(1)).await,
        vec![subscribe_frame("course-1")]
    );

    session.push_text(r#"{"type":"connection","message":"Connected to notifications","user_id":"u1"}"#);
    session.push_text(r#"{"type":"notification","title":"Graded","message":"Quiz 1: 9/10","level":"success"}"#);
    time::sleep(Duration::from_millis(50)).await;

    let records = client.notifications().list();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].title, "Graded");
    assert!(!records[0].read);
    assert_eq!(cache.snapshot().len(), 1);
    assert_eq!(toasts.try_recv().unwrap().title, "Graded");

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
