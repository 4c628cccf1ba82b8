//! In-memory fakes of the collaborator traits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::types::ChatId;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::mailer::Mailer;
use crate::platform::{EventSource, FileFetcher, InboundEvent, Notifier, Origin, Payload};
use crate::retry::RetryPolicy;

/// Minimal valid configuration with a fast, bounded retry policy
pub fn test_config(max_workers: usize) -> Config {
    let content = format!(
        r#"
        [telegram]
        bot_token = "1:test"

        [mail]
        api_url = "http://127.0.0.1:9/messages"
        sender = "bot@example.com"

        [dispatcher]
        max_workers = {max_workers}

        [retry]
        initial_interval_ms = 10
        multiplier = 2.0
        max_interval_secs = 1
        max_elapsed_secs = 5
        max_attempts = 3
        "#
    );
    toml::from_str(&content).unwrap()
}

/// Event source fed through a channel; closes when every sender is dropped.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Result<InboundEvent, String>>,
    shutdowns: Arc<AtomicUsize>,
}

impl ChannelSource {
    pub fn new() -> (mpsc::UnboundedSender<Result<InboundEvent, String>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            rx,
            shutdowns: Arc::new(AtomicUsize::new(0)),
        };
        (tx, source)
    }

    /// Counts `shutdown` calls; stays readable after the source is moved
    pub fn shutdowns(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.shutdowns)
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Result<Option<InboundEvent>> {
        match self.rx.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Ok(None),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::from_millis(10),
        multiplier: 2.0,
        max_interval: Duration::from_millis(100),
        max_elapsed: Some(Duration::from_secs(5)),
        max_attempts: Some(3),
    }
}

pub fn origin(user_id: i64, chat_id: i64) -> Origin {
    Origin {
        chat_id: ChatId(chat_id),
        user_id: Some(user_id),
        first_name: Some("Ada".to_string()),
    }
}

pub fn epub(size: u64) -> Payload {
    Payload {
        file_id: "file-1".to_string(),
        mime_type: Some("application/epub+zip".to_string()),
        declared_size: size,
        file_name: "dune.epub".to_string(),
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(ChatId, String)>>,
}

impl RecordingNotifier {
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn last(&self) -> Option<String> {
        self.texts().pop()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, chat_id: ChatId, text: &str) {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
    }
}

/// Serves a file of `actual_size` bytes, failing the first `failures` calls.
/// Tracks how many fetches run at the same time.
pub struct FakeFetcher {
    pub actual_size: usize,
    pub failures: usize,
    pub delay: Duration,
    /// Panic when asked for this file id
    pub panic_on: Option<String>,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeFetcher {
    pub fn serving(actual_size: usize) -> Self {
        Self {
            actual_size,
            failures: 0,
            delay: Duration::ZERO,
            panic_on: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn slow(actual_size: usize, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::serving(actual_size)
        }
    }

    pub fn failing() -> Self {
        Self {
            failures: usize::MAX,
            ..Self::serving(0)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileFetcher for FakeFetcher {
    async fn fetch(&self, file_id: &str, cap: u64) -> Result<Vec<u8>> {
        if self.panic_on.as_deref() == Some(file_id) {
            panic!("malformed file handle: {file_id}");
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if call < self.failures {
            anyhow::bail!("connection reset by peer");
        }
        let len = self.actual_size.min(cap as usize);
        Ok(vec![0u8; len])
    }
}

#[derive(Default)]
pub struct FakeMailer {
    pub failures: usize,
    pub calls: AtomicUsize,
    pub sent: Mutex<Vec<(String, String, usize)>>,
}

impl FakeMailer {
    pub fn failing() -> Self {
        Self {
            failures: usize::MAX,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, String, usize)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send_document(&self, destination: &str, file_name: &str, bytes: Vec<u8>) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("mail API error (503)");
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), file_name.to_string(), bytes.len()));
        Ok(())
    }
}
