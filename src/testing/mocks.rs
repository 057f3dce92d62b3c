//! Mock implementations for testing
//!
//! Provides mock `Transport` and `CredentialSource` implementations to
//! exercise the session state machine without a broker or identity service.
//! The mock transport records every call and lets tests push link events to
//! the most recently opened link.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::credentials::{CredentialError, CredentialSource, Credentials};
use crate::transport::{LinkEvent, Transport, TransportError, TransportLink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct MockTransportState {
    open_count: u32,
    fail_opens: u32,
    auto_connack: bool,
    event_tx: Option<mpsc::Sender<LinkEvent>>,
    open_urls: Vec<Url>,
    subscribe_batches: Vec<Vec<String>>,
    unsubscribed: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
    shutdown_count: u32,
}

/// Mock transport for testing.
///
/// Clones share state, so a clone can be handed to the session while the
/// test keeps inspecting and driving the original.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    /// Transport whose links immediately acknowledge the connection.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockTransportState {
                auto_connack: true,
                ..Default::default()
            })),
        }
    }

    /// Transport whose links stay silent until the test emits events.
    pub fn without_auto_connack() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockTransportState::default())),
        }
    }

    /// Make the next `n` open attempts fail with a connect error.
    pub fn fail_next_opens(&self, n: u32) {
        lock(&self.state).fail_opens = n;
    }

    pub fn open_count(&self) -> u32 {
        lock(&self.state).open_count
    }

    pub fn open_urls(&self) -> Vec<Url> {
        lock(&self.state).open_urls.clone()
    }

    pub fn subscribe_batches(&self) -> Vec<Vec<String>> {
        lock(&self.state).subscribe_batches.clone()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        lock(&self.state).unsubscribed.clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.state).published.clone()
    }

    pub fn shutdown_count(&self) -> u32 {
        lock(&self.state).shutdown_count
    }

    /// Push an event to the most recently opened link. Returns `false` when
    /// no link is live (for example after the session tore it down).
    pub async fn emit(&self, event: LinkEvent) -> bool {
        let tx = lock(&self.state).event_tx.clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn emit_connected(&self) -> bool {
        self.emit(LinkEvent::Connected).await
    }

    pub async fn emit_message(&self, topic: &str, payload: &[u8]) -> bool {
        self.emit(LinkEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
        .await
    }

    pub async fn emit_error(&self, error: TransportError) -> bool {
        self.emit(LinkEvent::Error(error)).await
    }

    pub async fn emit_closed(&self) -> bool {
        self.emit(LinkEvent::Closed).await
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        url: Url,
        _keepalive: Duration,
    ) -> Result<(Box<dyn TransportLink>, mpsc::Receiver<LinkEvent>), TransportError> {
        let mut state = lock(&self.state);
        state.open_count += 1;
        state.open_urls.push(url);

        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(TransportError::Connect("mock connect failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        if state.auto_connack {
            let _ = tx.try_send(LinkEvent::Connected);
        }
        state.event_tx = Some(tx);

        Ok((
            Box::new(MockLink {
                state: self.state.clone(),
            }),
            rx,
        ))
    }
}

struct MockLink {
    state: Arc<Mutex<MockTransportState>>,
}

#[async_trait]
impl TransportLink for MockLink {
    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        lock(&self.state).subscribe_batches.push(topics.to_vec());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        lock(&self.state).unsubscribed.push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        lock(&self.state).published.push((topic.to_string(), payload));
        Ok(())
    }

    async fn shutdown(&self) {
        let mut state = lock(&self.state);
        state.shutdown_count += 1;
        state.event_tx = None;
    }
}

/// Mock credential source with scripted outcomes and call counters.
#[derive(Debug)]
pub struct MockCredentialSource {
    current: Mutex<Option<Credentials>>,
    on_fetch: Mutex<Option<Credentials>>,
    on_refresh: Mutex<Option<Credentials>>,
    refresh_delay: Mutex<Option<Duration>>,
    fetch_calls: AtomicU32,
    refresh_calls: AtomicU32,
}

impl MockCredentialSource {
    /// A fresh, non-expiring snapshot available immediately; refreshes also
    /// succeed.
    pub fn with_valid() -> Self {
        Self {
            current: Mutex::new(Some(Self::valid_credentials())),
            on_fetch: Mutex::new(Some(Self::valid_credentials())),
            on_refresh: Mutex::new(Some(Self::valid_credentials())),
            refresh_delay: Mutex::new(None),
            fetch_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
        }
    }

    /// No snapshot, and fetch/refresh both fail until scripted otherwise.
    pub fn empty() -> Self {
        Self {
            current: Mutex::new(None),
            on_fetch: Mutex::new(None),
            on_refresh: Mutex::new(None),
            refresh_delay: Mutex::new(None),
            fetch_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
        }
    }

    pub fn valid_credentials() -> Credentials {
        Credentials::new("ASIAMOCK", "mock-secret", Some("mock-token".to_string()), None)
    }

    /// Replace the cached snapshot directly.
    pub fn set_current(&self, credentials: Option<Credentials>) {
        *lock(&self.current) = credentials;
    }

    /// Script the outcome of `fetch_initial` when no snapshot is cached.
    pub fn set_fetch_result(&self, credentials: Option<Credentials>) {
        *lock(&self.on_fetch) = credentials;
    }

    /// Script the outcome of `refresh`; `None` makes refreshes fail.
    pub fn set_refresh_result(&self, credentials: Option<Credentials>) {
        *lock(&self.on_refresh) = credentials;
    }

    /// Delay refreshes, to pin down orderings in timer-driven tests.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *lock(&self.refresh_delay) = Some(delay);
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for MockCredentialSource {
    async fn fetch_initial(&self) -> Result<Credentials, CredentialError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(cached) = lock(&self.current).clone() {
            return Ok(cached);
        }
        match lock(&self.on_fetch).clone() {
            Some(credentials) => {
                *lock(&self.current) = Some(credentials.clone());
                Ok(credentials)
            }
            None => Err(CredentialError::Missing),
        }
    }

    async fn refresh(&self) -> Result<Credentials, CredentialError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.refresh_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match lock(&self.on_refresh).clone() {
            Some(credentials) => {
                *lock(&self.current) = Some(credentials.clone());
                Ok(credentials)
            }
            None => Err(CredentialError::Service("mock refresh failure".to_string())),
        }
    }

    fn current(&self) -> Option<Credentials> {
        lock(&self.current).clone()
    }
}
