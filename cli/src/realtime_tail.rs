use anyhow::{Context, Result};
use lib_realtime::{
    ConnectionEvent, JsonFileCache, MemoryCache, NotificationCache, RealtimeClient, RoutedEvent,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

mod tail_logic;
use tail_logic::{config, logger};

const APP_NAME: &str = "realtime-tail";

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    let log_dir = config.log_dir.clone().unwrap_or_else(|| "./logs".into());
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let log_file = logger::setup_logging(&log_dir, &log_level)?;
    log::info!("Logging to {}", log_file.display());

    let token = config
        .token
        .clone()
        .context("no bearer token: pass --token or set RT_TOKEN")?;

    let cache: Arc<dyn NotificationCache> = match &config.cache_path {
        Some(path) => Arc::new(JsonFileCache::new(path)),
        None => match JsonFileCache::in_data_dir(APP_NAME) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                log::warn!("{}. Notifications will not survive a restart.", e);
                Arc::new(MemoryCache::default())
            }
        },
    };

    let client = RealtimeClient::new(config.realtime_config(), cache);
    let store = client.notifications();
    log::info!(
        "Restored {} notifications ({} unread).",
        store.len(),
        store.unread_count()
    );

    for course_id in config.course_ids() {
        client.subscribe_course(course_id);
    }

    let mut routed = client.router().subscribe_all();
    let mut events = client.events();
    let mut toasts = store.toasts();

    client.connect(&token)?;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Ctrl-C received, disconnecting.");
                break;
            }
            _ = terminate() => {
                log::info!("SIGTERM received, disconnecting.");
                break;
            }
            Some(event) = routed.recv() => log_routed(&event),
            Ok(toast) = toasts.recv() => {
                log::info!("[{:?}] {}: {}", toast.level, toast.title, toast.message);
            }
            event = events.recv() => match event {
                Ok(ConnectionEvent::AuthRejected { code }) => {
                    log::error!("Token rejected by the server (code {}). Exiting.", code);
                    break;
                }
                Ok(ConnectionEvent::ReconnectExhausted { attempts }) => {
                    log::error!("Gave up after {} reconnect attempts. Exiting.", attempts);
                    break;
                }
                Ok(other) => log::info!("Connection: {:?}", other),
                Err(RecvError::Lagged(skipped)) => log::warn!("Missed {} connection events.", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect().await;
    log::info!("Shutdown complete. {} unread notifications.", store.unread_count());
    Ok(())
}

fn log_routed(event: &RoutedEvent) {
    match event {
        RoutedEvent::ConnectionAck { message, user_id } => log::info!(
            "Server: {} (user {})",
            message.as_deref().unwrap_or("connected"),
            user_id.as_deref().unwrap_or("?")
        ),
        RoutedEvent::SubscriptionConfirmed { course_id } => log::info!("Subscribed to course {}", course_id),
        RoutedEvent::UnsubscriptionConfirmed { course_id } => log::info!("Unsubscribed from course {}", course_id),
        RoutedEvent::ProgressUpdated(update) => log::info!(
            "Progress {}/{}: {}%{}",
            update.course_id,
            update.content_id,
            update.progress_percentage,
            if update.completed { " (completed)" } else { "" }
        ),
        RoutedEvent::InitialProgress(snapshot) => log::info!(
            "Progress snapshot for course {}: {} items",
            snapshot.course_id,
            snapshot.progress.len()
        ),
        RoutedEvent::ServerError { message } => log::warn!("Server error: {}", message),
        RoutedEvent::ParseError { reason, .. } => log::warn!("Unparseable frame: {}", reason),
        RoutedEvent::Unclassified(message) => log::debug!("Unhandled message type '{}'", message.kind),
        // Pongs are noise; notifications show up as toasts.
        RoutedEvent::Pong { .. } | RoutedEvent::Notification(_) => {}
    }
}

async fn terminate() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::warn!("Could not install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
