//! In-process producer
//!
//! Every `start` opens a fresh bounded channel and hands its sending half to
//! the owner of the [`FeedReceiver`] as a [`ChannelFeed`]. Bytes pushed into
//! the feed come out of the producer stream; dropping the feed is end of
//! stream, `fail` is a runtime error.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ProducerError, ProducerOptions, ProducerSource, ProducerStream};

/// Chunks buffered between a feed and its stream
const FEED_CAPACITY: usize = 64;

type FeedItem = Result<Bytes, String>;

/// Receives one [`ChannelFeed`] per successful producer start
pub type FeedReceiver = mpsc::UnboundedReceiver<ChannelFeed>;

/// Producer source fed from inside the process
pub struct ChannelSource {
    feeds: mpsc::UnboundedSender<ChannelFeed>,
    start_failures: Mutex<VecDeque<String>>,
    starts: AtomicUsize,
    stops: Arc<AtomicUsize>,
}

impl ChannelSource {
    /// Create a source and the receiver that gets a feed per start
    pub fn new() -> (Arc<Self>, FeedReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();

        let source = Arc::new(Self {
            feeds: tx,
            start_failures: Mutex::new(VecDeque::new()),
            starts: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
        });

        (source, rx)
    }

    /// Make the next start attempt fail with `reason`
    pub fn fail_next_start(&self, reason: impl Into<String>) {
        self.start_failures.lock().push_back(reason.into());
    }

    /// Number of successful starts so far
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of streams stopped so far
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProducerSource for ChannelSource {
    async fn start(
        &self,
        url: &str,
        _options: &ProducerOptions,
    ) -> Result<Box<dyn ProducerStream>, ProducerError> {
        if let Some(reason) = self.start_failures.lock().pop_front() {
            return Err(ProducerError::Start(reason));
        }

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let stopped = CancellationToken::new();

        let feed = ChannelFeed {
            url: url.to_string(),
            tx,
            stopped: stopped.clone(),
        };
        self.feeds
            .send(feed)
            .map_err(|_| ProducerError::Start("feed receiver dropped".to_string()))?;

        self.starts.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(url = %url, "Channel producer started");

        Ok(Box::new(ChannelStream {
            rx,
            stopped,
            stops: Arc::clone(&self.stops),
        }))
    }
}

/// Sending half of one in-process producer run
#[derive(Debug)]
pub struct ChannelFeed {
    url: String,
    tx: mpsc::Sender<FeedItem>,
    stopped: CancellationToken,
}

impl ChannelFeed {
    /// Source URL the producer was started for
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a chunk; fails once the stream has been stopped
    pub async fn send(&self, chunk: Bytes) -> Result<(), ProducerError> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| ProducerError::Failed("producer stopped".to_string()))
    }

    /// Fail the stream with a runtime error
    pub async fn fail(self, message: impl Into<String>) {
        let _ = self.tx.send(Err(message.into())).await;
    }

    /// End the stream cleanly
    pub fn finish(self) {}

    /// Whether the consuming side asked the producer to stop
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Resolves when the consuming side asks the producer to stop
    pub async fn stopped(&self) {
        self.stopped.cancelled().await
    }
}

struct ChannelStream {
    rx: mpsc::Receiver<FeedItem>,
    stopped: CancellationToken,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl ProducerStream for ChannelStream {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, ProducerError> {
        match self.rx.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(message)) => Err(ProducerError::Failed(message)),
            None => Ok(None),
        }
    }

    async fn stop(&mut self) -> Result<(), ProducerError> {
        if !self.stopped.is_cancelled() {
            self.stopped.cancel();
            self.rx.close();
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_to_stream() {
        let (source, mut feeds) = ChannelSource::new();
        let mut stream = source
            .start("memory://a", &ProducerOptions::default())
            .await
            .unwrap();
        let feed = feeds.recv().await.unwrap();
        assert_eq!(feed.url(), "memory://a");

        feed.send(Bytes::from_static(b"b1")).await.unwrap();
        feed.finish();

        assert_eq!(stream.read_chunk().await.unwrap().unwrap(), "b1");
        assert!(stream.read_chunk().await.unwrap().is_none());
        assert_eq!(source.start_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_surfaces_error() {
        let (source, mut feeds) = ChannelSource::new();
        let mut stream = source
            .start("memory://a", &ProducerOptions::default())
            .await
            .unwrap();
        feeds.recv().await.unwrap().fail("upstream 500").await;

        let err = stream.read_chunk().await.unwrap_err();
        assert!(matches!(err, ProducerError::Failed(ref m) if m == "upstream 500"));
    }

    #[tokio::test]
    async fn test_scripted_start_failure() {
        let (source, _feeds) = ChannelSource::new();
        source.fail_next_start("no playable streams");

        let result = source.start("memory://a", &ProducerOptions::default()).await;
        assert!(matches!(result, Err(ProducerError::Start(_))));
        assert_eq!(source.start_count(), 0);

        assert!(source
            .start("memory://a", &ProducerOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_stop_signals_feed() {
        let (source, mut feeds) = ChannelSource::new();
        let mut stream = source
            .start("memory://a", &ProducerOptions::default())
            .await
            .unwrap();
        let feed = feeds.recv().await.unwrap();

        stream.stop().await.unwrap();
        stream.stop().await.unwrap();

        feed.stopped().await;
        assert!(feed.is_stopped());
        assert!(feed.send(Bytes::from_static(b"late")).await.is_err());
        assert_eq!(source.stop_count(), 1);
    }
}
