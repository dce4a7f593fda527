//! One bounded collection run over the event stream.
//!
//! A session connects, feeds every frame through decode → extract → collect,
//! and stops on whichever comes first: the collector filling up, the
//! deadline, the caller cancelling, the remote closing, or a stream error.
//! Every stop goes through a [`CompletionLatch`], so exactly one trigger is
//! recorded and the connection is closed exactly once.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use skypulse_protocol::CollectedPost;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::collector::BoundedCollector;
use crate::collector::OfferOutcome;
use crate::commit::Frame;
use crate::commit::POST_COLLECTION;
use crate::error::Result;
use crate::extract::ContentExtractor;
use crate::frame::decode_frame;
use crate::topic::TopicFilter;

pub const DEFAULT_FIREHOSE_ENDPOINT: &str =
    "wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos";
pub const DEFAULT_JETSTREAM_ENDPOINT: &str =
    "wss://jetstream2.us-east.bsky.network/subscribe?wantedCollections=app.bsky.feed.post";
pub const DEFAULT_TARGET_COUNT: NonZeroUsize = match NonZeroUsize::new(2) {
    Some(count) => count,
    None => NonZeroUsize::MIN,
};
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Upper bound on the closing handshake so a stalled peer cannot hold the
/// session open after it resolved.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirehoseConfig {
    pub endpoint: String,
    pub target_count: NonZeroUsize,
    pub deadline: Duration,
    pub collection: String,
}

impl Default for FirehoseConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_FIREHOSE_ENDPOINT.to_string(),
            target_count: DEFAULT_TARGET_COUNT,
            deadline: DEFAULT_DEADLINE,
            collection: POST_COLLECTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Closing,
    Resolved,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTrigger {
    Full,
    Deadline,
    RemoteClosed,
    StreamError,
    Cancelled,
}

/// Single-shot completion signal shared by the receive loop and the deadline
/// timer. The first [`CompletionLatch::fire`] wins; later calls are no-ops.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    trigger: OnceLock<CompletionTrigger>,
    fired: CancellationToken,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `trigger` unless another one already won. Returns the winner.
    pub fn fire(&self, trigger: CompletionTrigger) -> CompletionTrigger {
        let mut won = false;
        let winner = *self.trigger.get_or_init(|| {
            won = true;
            trigger
        });
        if won {
            self.fired.cancel();
        }
        winner
    }

    pub fn trigger(&self) -> Option<CompletionTrigger> {
        self.trigger.get().copied()
    }

    pub fn is_fired(&self) -> bool {
        self.trigger.get().is_some()
    }

    /// Resolves with the winning trigger once the latch has fired.
    pub async fn wait(&self) -> CompletionTrigger {
        loop {
            if let Some(trigger) = self.trigger.get() {
                return *trigger;
            }
            self.fired.cancelled().await;
        }
    }
}

/// Counters gathered over one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: usize,
    /// Well-formed frames that were not commits.
    pub frames_skipped: usize,
    pub decode_errors: usize,
    pub candidates: usize,
    pub rejected: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOutcome {
    pub posts: Vec<CollectedPost>,
    pub trigger: CompletionTrigger,
    pub stats: SessionStats,
    pub elapsed: Duration,
}

/// An open event-stream connection yielding frames in arrival order.
#[async_trait]
pub trait FrameStream: Send {
    /// `None` once the remote closed the connection.
    async fn next_frame(&mut self) -> Option<Result<Frame>>;

    /// Closes the connection. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FrameStream>>;
}

/// Cancels the deadline timer on every exit path.
struct DeadlineTimer(JoinHandle<()>);

impl DeadlineTimer {
    fn start(deadline: Duration, latch: Arc<CompletionLatch>) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let winner = latch.fire(CompletionTrigger::Deadline);
            debug!("deadline elapsed, session trigger is {winner:?}");
        }))
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct StreamSession {
    config: FirehoseConfig,
    connector: Arc<dyn StreamConnector>,
    extractor: ContentExtractor,
    filter: Arc<TopicFilter>,
    cancellation: CancellationToken,
    latch: Arc<CompletionLatch>,
    state: watch::Sender<SessionState>,
}

impl StreamSession {
    pub fn new(
        config: FirehoseConfig,
        connector: Arc<dyn StreamConnector>,
        filter: Arc<TopicFilter>,
    ) -> Self {
        let extractor = ContentExtractor::new(config.collection.clone());
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            connector,
            extractor,
            filter,
            cancellation: CancellationToken::new(),
            latch: Arc::new(CompletionLatch::new()),
            state,
        }
    }

    /// Stops the session early when `token` is cancelled. Posts collected so
    /// far are still returned.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &FirehoseConfig {
        &self.config
    }

    /// Runs the session to completion.
    ///
    /// Only a connection that cannot be opened at all is an error. Once
    /// frames are flowing, every stop resolves with whatever was collected.
    pub async fn run(self) -> Result<CollectionOutcome> {
        let started = Instant::now();
        let latch = Arc::clone(&self.latch);
        let timer = DeadlineTimer::start(self.config.deadline, Arc::clone(&latch));
        let mut collector =
            BoundedCollector::new(self.config.target_count, Arc::clone(&self.filter));
        let mut stats = SessionStats::default();

        self.set_state(SessionState::Connecting);
        info!("connecting to event stream: {}", self.config.endpoint);
        let connected = tokio::select! {
            biased;
            trigger = latch.wait() => Err(trigger),
            _ = self.cancellation.cancelled() => Err(latch.fire(CompletionTrigger::Cancelled)),
            result = self.connector.connect(&self.config.endpoint) => Ok(result),
        };
        let mut stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                drop(timer);
                warn!("failed to connect to event stream: {err}");
                self.set_state(SessionState::Resolved);
                return Err(err);
            }
            Err(trigger) => {
                drop(timer);
                info!("session ended while connecting ({trigger:?})");
                self.set_state(SessionState::Resolved);
                return Ok(CollectionOutcome {
                    posts: Vec::new(),
                    trigger,
                    stats,
                    elapsed: started.elapsed(),
                });
            }
        };

        self.set_state(SessionState::Streaming);
        info!(
            "streaming from {} (target {}, deadline {:?})",
            self.config.endpoint, self.config.target_count, self.config.deadline
        );
        let trigger = loop {
            tokio::select! {
                biased;
                trigger = latch.wait() => break trigger,
                _ = self.cancellation.cancelled() => break latch.fire(CompletionTrigger::Cancelled),
                next = stream.next_frame() => match next {
                    None => {
                        info!("event stream closed by remote");
                        break latch.fire(CompletionTrigger::RemoteClosed);
                    }
                    Some(Err(err)) => {
                        warn!("event stream failed: {err}");
                        break latch.fire(CompletionTrigger::StreamError);
                    }
                    Some(Ok(frame)) => {
                        stats.frames_received += 1;
                        if self.handle_frame(&frame, &mut collector, &mut stats) {
                            break latch.fire(CompletionTrigger::Full);
                        }
                    }
                },
            }
        };

        self.set_state(SessionState::Closing);
        drop(timer);
        match tokio::time::timeout(CLOSE_TIMEOUT, stream.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("{err}"),
            Err(_) => warn!("timed out closing event stream"),
        }

        let posts = collector.into_posts();
        info!(
            "session resolved ({trigger:?}): {} posts from {} frames",
            posts.len(),
            stats.frames_received
        );
        self.set_state(SessionState::Resolved);
        Ok(CollectionOutcome {
            posts,
            trigger,
            stats,
            elapsed: started.elapsed(),
        })
    }

    /// Returns `true` once the collector is full.
    fn handle_frame(
        &self,
        frame: &Frame,
        collector: &mut BoundedCollector,
        stats: &mut SessionStats,
    ) -> bool {
        let commit = match decode_frame(frame) {
            Ok(Some(commit)) => commit,
            Ok(None) => {
                stats.frames_skipped += 1;
                return false;
            }
            Err(err) => {
                stats.decode_errors += 1;
                debug!("dropping undecodable frame: {err}");
                return false;
            }
        };

        for post in self.extractor.extract(&commit, Utc::now()) {
            stats.candidates += 1;
            match collector.offer(post) {
                OfferOutcome::Accepted => {
                    if collector.is_full() {
                        return true;
                    }
                }
                OfferOutcome::Duplicate => stats.duplicates += 1,
                OfferOutcome::Rejected => stats.rejected += 1,
                OfferOutcome::Saturated => return true,
            }
        }
        false
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FirehoseError;
    use crate::frame::tests::TestPost;
    use crate::frame::tests::commit_frame;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    type Script = VecDeque<Result<Frame>>;

    struct ScriptedStream {
        frames: Script,
        hold_open: bool,
        frame_delay: Option<Duration>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameStream for ScriptedStream {
        async fn next_frame(&mut self) -> Option<Result<Frame>> {
            if let Some(delay) = self.frame_delay {
                tokio::time::sleep(delay).await;
            }
            match self.frames.pop_front() {
                Some(frame) => Some(frame),
                None if self.hold_open => std::future::pending().await,
                None => None,
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ScriptedConnector {
        script: Mutex<Option<Script>>,
        hold_open: bool,
        connect_delay: Option<Duration>,
        frame_delay: Option<Duration>,
        refuse: bool,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn new(frames: Vec<Result<Frame>>) -> Self {
            Self {
                script: Mutex::new(Some(frames.into())),
                hold_open: true,
                connect_delay: None,
                frame_delay: None,
                refuse: false,
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn closing_after_script(mut self) -> Self {
            self.hold_open = false;
            self
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StreamConnector for ScriptedConnector {
        async fn connect(&self, endpoint: &str) -> Result<Box<dyn FrameStream>> {
            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }
            if self.refuse {
                return Err(FirehoseError::connect(endpoint, "connection refused"));
            }
            let frames = self.script.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(ScriptedStream {
                frames,
                hold_open: self.hold_open,
                frame_delay: self.frame_delay,
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    fn post_frame(rkey: &str, text: &str) -> Result<Frame> {
        let bytes = commit_frame(
            "did:plc:frank",
            &[(
                rkey,
                TestPost {
                    record_type: POST_COLLECTION,
                    text,
                    created_at: "2025-04-01T10:00:00.000Z",
                    reply: None,
                },
            )],
        );
        Ok(Frame::Binary(bytes.into()))
    }

    fn config(target: usize, deadline: Duration) -> FirehoseConfig {
        FirehoseConfig {
            endpoint: "wss://relay.test/xrpc/com.atproto.sync.subscribeRepos".to_string(),
            target_count: NonZeroUsize::new(target).unwrap(),
            deadline,
            ..FirehoseConfig::default()
        }
    }

    fn session(connector: &Arc<ScriptedConnector>, config: FirehoseConfig) -> StreamSession {
        StreamSession::new(
            config,
            Arc::clone(connector) as Arc<dyn StreamConnector>,
            Arc::new(TopicFilter::stock_market()),
        )
    }

    fn texts(outcome: &CollectionOutcome) -> Vec<&str> {
        outcome
            .posts
            .iter()
            .map(|post| post.post.text.as_str())
            .collect()
    }

    #[test]
    fn latch_keeps_first_trigger() {
        let latch = CompletionLatch::new();
        assert_eq!(latch.trigger(), None);
        assert_eq!(latch.fire(CompletionTrigger::Full), CompletionTrigger::Full);
        assert_eq!(
            latch.fire(CompletionTrigger::Deadline),
            CompletionTrigger::Full
        );
        assert!(latch.is_fired());
        assert_eq!(latch.trigger(), Some(CompletionTrigger::Full));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_timer_never_fires() {
        let latch = Arc::new(CompletionLatch::new());
        let timer = DeadlineTimer::start(Duration::from_secs(5), Arc::clone(&latch));

        drop(timer);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(latch.trigger(), None);
        assert_eq!(Arc::strong_count(&latch), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_exit_releases_the_deadline_timer() {
        let connector = Arc::new(ScriptedConnector::new(vec![post_frame(
            "p1",
            "stocks rallied into the close",
        )]));
        let session = session(&connector, config(1, Duration::from_secs(10)));
        let latch = Arc::clone(&session.latch);

        let outcome = session.run().await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(outcome.trigger, CompletionTrigger::Full);
        assert_eq!(latch.trigger(), Some(CompletionTrigger::Full));
        assert_eq!(Arc::strong_count(&latch), 1);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn filling_post_at_the_deadline_resolves_once() {
        let deadline = Duration::from_secs(10);
        let mut connector =
            ScriptedConnector::new(vec![post_frame("p1", "bought more shares")]);
        connector.frame_delay = Some(deadline);
        let connector = Arc::new(connector);
        let session = session(&connector, config(1, deadline));
        let latch = Arc::clone(&session.latch);

        let outcome = session.run().await.unwrap();
        tokio::time::sleep(deadline * 2).await;

        assert_matches!(
            outcome.trigger,
            CompletionTrigger::Full | CompletionTrigger::Deadline
        );
        assert_eq!(latch.trigger(), Some(outcome.trigger));
        let expected_posts = usize::from(outcome.trigger == CompletionTrigger::Full);
        assert_eq!(outcome.posts.len(), expected_posts);
        assert_eq!(connector.closes(), 1);
        assert_eq!(Arc::strong_count(&latch), 1);
    }

    #[tokio::test]
    async fn stops_when_target_is_reached() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            post_frame("p1", "I love my cat"),
            post_frame("p2", "stock market is up today"),
            post_frame("p3", "nothing relevant"),
            post_frame("p4", "stocks are crashing"),
            post_frame("p5", "one more stock post"),
        ]));

        let outcome = session(&connector, config(2, Duration::from_secs(30)))
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.trigger, CompletionTrigger::Full);
        assert_eq!(
            texts(&outcome),
            vec!["stock market is up today", "stocks are crashing"]
        );
        assert_eq!(
            outcome
                .posts
                .iter()
                .map(|post| post.ordinal)
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(outcome.stats.frames_received, 4);
        assert_eq!(outcome.stats.rejected, 2);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_resolves_with_partial_results() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            post_frame("p1", "bitcoin is ripping"),
            post_frame("p2", "nice weather"),
        ]));

        let outcome = session(&connector, config(5, Duration::from_secs(10)))
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.trigger, CompletionTrigger::Deadline);
        assert_eq!(texts(&outcome), vec!["bitcoin is ripping"]);
        assert!(outcome.elapsed >= Duration::from_secs(10));
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let mut connector = ScriptedConnector::new(Vec::new());
        connector.refuse = true;
        let connector = Arc::new(connector);
        let session = session(&connector, config(2, Duration::from_secs(30)));
        let state = session.subscribe_state();

        let result = session.run().await;

        assert_matches!(result, Err(FirehoseError::Connect { .. }));
        assert_eq!(*state.borrow(), SessionState::Resolved);
        assert_eq!(connector.closes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_while_connecting_yields_no_posts() {
        let mut connector = ScriptedConnector::new(vec![post_frame("p1", "stocks")]);
        connector.connect_delay = Some(Duration::from_secs(60));
        let connector = Arc::new(connector);

        let outcome = session(&connector, config(2, Duration::from_secs(5)))
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.trigger, CompletionTrigger::Deadline);
        assert!(outcome.posts.is_empty());
    }

    #[tokio::test]
    async fn remote_close_returns_what_was_collected() {
        let connector = Arc::new(
            ScriptedConnector::new(vec![post_frame("p1", "NVDA earnings beat")])
                .closing_after_script(),
        );
        let session = session(&connector, config(3, Duration::from_secs(30)));
        let state = session.subscribe_state();

        let outcome = session.run().await.unwrap();

        assert_eq!(outcome.trigger, CompletionTrigger::RemoteClosed);
        assert_eq!(texts(&outcome), vec!["NVDA earnings beat"]);
        assert_eq!(connector.closes(), 1);
        assert_eq!(*state.borrow(), SessionState::Resolved);
    }

    #[tokio::test]
    async fn stream_error_after_streaming_is_a_partial_success() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            post_frame("p1", "dividend raised"),
            Err(FirehoseError::Stream("connection reset".to_string())),
            post_frame("p2", "never seen stocks"),
        ]));

        let outcome = session(&connector, config(3, Duration::from_secs(30)))
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.trigger, CompletionTrigger::StreamError);
        assert_eq!(texts(&outcome), vec!["dividend raised"]);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn duplicates_and_undecodable_frames_are_counted_and_skipped() {
        let connector = Arc::new(
            ScriptedConnector::new(vec![
                post_frame("p1", "stocks"),
                post_frame("p1", "stocks"),
                Ok(Frame::Binary(vec![0xff, 0xfe].into())),
                Ok(Frame::Text("{broken".to_string())),
                Ok(Frame::Text(
                    serde_json::json!({"did": "did:plc:x", "kind": "account"}).to_string(),
                )),
            ])
            .closing_after_script(),
        );

        let outcome = session(&connector, config(3, Duration::from_secs(30)))
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.posts.len(), 1);
        assert_eq!(
            outcome.stats,
            SessionStats {
                frames_received: 5,
                frames_skipped: 1,
                decode_errors: 2,
                candidates: 2,
                rejected: 0,
                duplicates: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancellation_stops_the_session() {
        let connector = Arc::new(ScriptedConnector::new(vec![post_frame(
            "p1",
            "trading halted",
        )]));
        let token = CancellationToken::new();
        let session =
            session(&connector, config(5, Duration::from_secs(30))).with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });
        let outcome = session.run().await.unwrap();
        canceller.await.unwrap();

        assert_eq!(outcome.trigger, CompletionTrigger::Cancelled);
        assert_eq!(texts(&outcome), vec!["trading halted"]);
        assert_eq!(connector.closes(), 1);
    }
}
