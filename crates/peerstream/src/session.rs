//! Lifecycle of one streamed asset.
//!
//! ```text
//! Idle ─► MetadataRequested ─► Ready ─┬─► Streaming ─► Completed
//!                │               │    │       │
//!                └──► Error ◄────┘    │       └─► Error
//!                                     └─► DirectPlayback ─► Closed
//! ```
//!
//! A session runs as a single task. Playback notifications, segment completions and
//! cancellation all arrive through one `select!`, so scheduling decisions never race each
//! other. [`Streamer`] owns the only active session and tears it down completely before the
//! next one starts.

use std::{num::NonZeroUsize, sync::Arc};

use bytes::Bytes;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::StreamConfig,
    fetch::{fetch_segment, RetryPolicy},
    observer::PlaybackObserver,
    origin::Origin,
    planner,
    playback::{MediaRuntime, PlaybackBuffer, PlaybackEvent},
    scheduler::{Decision, FetchScheduler},
    segment::{Asset, SegmentRequest},
    sink::BufferSink,
    util::http::HttpClient,
    StreamError, StreamResult,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    MetadataRequested,
    Ready,
    Streaming,
    /// Segmented buffering is unavailable; the runtime plays the asset URL itself.
    DirectPlayback,
    Completed,
    /// Torn down by its owner or by the playback element going away.
    Closed,
    /// Carries the notice shown to the user.
    Error(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Closed | Self::Error(_))
    }

    /// No more segment work will happen; only teardown is left.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || *self == Self::DirectPlayback
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed { bytes_fetched: u64 },
    /// The element played the asset URL itself until the session was closed.
    DirectPlayback,
    Closed,
}

struct FetchCompletion {
    request: SegmentRequest,
    result: StreamResult<Bytes>,
}

/// Runs segment downloads off the session task and reports back over a channel.
struct Fetcher {
    client: HttpClient,
    url: Url,
    policy: RetryPolicy,
    session: CancellationToken,
    current: Option<CancellationToken>,
    completions: mpsc::UnboundedSender<FetchCompletion>,
}

impl Fetcher {
    fn issue(&mut self, request: SegmentRequest) {
        self.cancel_current();
        let cancel = self.session.child_token();
        self.current = Some(cancel.clone());

        let client = self.client.clone();
        let url = self.url.clone();
        let policy = self.policy;
        let completions = self.completions.clone();
        tracing::debug!("Fetching segment {} {}.", request.index, request.range);
        tokio::spawn(async move {
            let result = fetch_segment(&client, &url, &request, policy, &cancel).await;
            // the session may be gone already
            _ = completions.send(FetchCompletion { request, result });
        });
    }

    fn finish(&mut self) {
        self.current = None;
    }

    fn cancel_current(&mut self) {
        if let Some(cancel) = self.current.take() {
            cancel.cancel();
        }
    }
}

impl Drop for Fetcher {
    fn drop(&mut self) {
        self.cancel_current();
    }
}

struct ActiveStream<B> {
    asset: Asset,
    segment_count: NonZeroUsize,
    scheduler: FetchScheduler,
    sink: BufferSink<B>,
    observer: PlaybackObserver,
    fetcher: Fetcher,
    completions: mpsc::UnboundedReceiver<FetchCompletion>,
}

impl<B> ActiveStream<B>
where
    B: PlaybackBuffer,
{
    async fn run(&mut self, cancel: &CancellationToken) -> StreamResult<SessionOutcome> {
        if let Some(request) = self.scheduler.start() {
            self.fetcher.issue(request);
        }

        loop {
            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SessionOutcome::Closed),
                Some(completion) = self.completions.recv() => self.on_fetched(completion)?,
                event = self.observer.next_event() => match event {
                    Some(event) => self.on_playback_event(event),
                    None => {
                        tracing::info!("Playback element of {} went away.", self.asset.name);
                        return Ok(SessionOutcome::Closed);
                    }
                },
            };

            if let Some(outcome) = self.apply(decision)? {
                return Ok(outcome);
            }
        }
    }

    fn on_fetched(&mut self, completion: FetchCompletion) -> StreamResult<Decision> {
        let FetchCompletion { request, result } = completion;
        if !self.scheduler.accepts(&request) {
            tracing::debug!("Dropping stale data of segment {}.", request.index);
            return Ok(Decision::Idle);
        }
        self.fetcher.finish();

        let bytes = result?;
        let length = bytes.len() as u64;
        self.sink.append_range(request.range, bytes)?;
        self.scheduler.complete_fetch(&request, length);
        tracing::info!(
            "Fetched segment {} of {}. ({} / {} bytes)",
            request.index + 1,
            self.scheduler.segment_count(),
            self.scheduler.bytes_fetched(),
            self.asset.total_size
        );

        Ok(self.scheduler.maybe_fetch_next(self.observer.last_position()))
    }

    fn on_playback_event(&mut self, event: PlaybackEvent) -> Decision {
        match event {
            PlaybackEvent::CanPlay { duration } => {
                let segment_duration = planner::segment_duration(duration, self.segment_count);
                tracing::info!(
                    "{} can play, {duration:.2}s long, {segment_duration:?}s per segment.",
                    self.asset.name
                );
                self.asset.total_duration = Some(duration);
                self.scheduler.set_segment_duration(segment_duration);
                self.scheduler
                    .maybe_fetch_next(self.observer.last_position())
            }
            PlaybackEvent::TimeUpdate { current_time } => self
                .observer
                .on_position_change(current_time, &mut self.scheduler),
            PlaybackEvent::Seeking { current_time } => {
                let cancelled =
                    self.observer
                        .on_seek_start(current_time, &mut self.sink, &mut self.scheduler);
                if cancelled.is_some() {
                    self.fetcher.cancel_current();
                }
                self.scheduler.maybe_fetch_next(current_time)
            }
            PlaybackEvent::Ended => {
                tracing::debug!("Playback of {} ended.", self.asset.name);
                Decision::Idle
            }
        }
    }

    fn apply(&mut self, decision: Decision) -> StreamResult<Option<SessionOutcome>> {
        match decision {
            Decision::Fetch(request) => self.fetcher.issue(request),
            Decision::Complete => {
                self.sink.signal_end_of_stream()?;
                self.observer.detach();
                tracing::info!(
                    "All segments of {} loaded, {} bytes.",
                    self.asset.name,
                    self.scheduler.bytes_fetched()
                );
                return Ok(Some(SessionOutcome::Completed {
                    bytes_fetched: self.scheduler.bytes_fetched(),
                }));
            }
            Decision::Idle => {}
        }
        Ok(None)
    }
}

pub struct StreamingSession<R> {
    asset_name: String,
    origin: Origin,
    config: Arc<StreamConfig>,
    runtime: R,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
}

impl<R> StreamingSession<R>
where
    R: MediaRuntime,
{
    pub fn new(
        asset_name: impl Into<String>,
        origin: Origin,
        config: Arc<StreamConfig>,
        runtime: R,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            asset_name: asset_name.into(),
            origin,
            config,
            runtime,
            state,
            cancel: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Cancelling this token closes the session and every request it has in flight.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(mut self) -> StreamResult<SessionOutcome> {
        let result = self.drive().await;
        match &result {
            Ok(SessionOutcome::Completed { .. }) => self.transition(SessionState::Completed),
            Ok(SessionOutcome::DirectPlayback | SessionOutcome::Closed) => {
                self.runtime.detach();
                self.transition(SessionState::Closed);
            }
            Err(e) => {
                tracing::error!("Streaming {} failed: {e}", self.asset_name);
                self.runtime.detach();
                self.transition(SessionState::Error(e.alert()));
            }
        }
        result
    }

    async fn drive(&mut self) -> StreamResult<SessionOutcome> {
        let cancel = self.cancel.clone();

        self.transition(SessionState::MetadataRequested);
        let info = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SessionOutcome::Closed),
            info = self.origin.stream_file_info(&self.asset_name) => info?,
        };
        let asset = info.into_asset(&self.config.mime_type)?;
        tracing::info!(
            "Streaming {} ({:.2} MB).",
            asset.name,
            asset.total_size as f64 / 1024. / 1024.
        );

        let segments = planner::plan_segments(asset.total_size, self.config.segment_count);
        let scheduler = FetchScheduler::new(segments, self.config.prefetch_threshold);
        self.transition(SessionState::Ready);

        if self.config.verify_size {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SessionOutcome::Closed),
                _ = self.origin.verify_size(&asset) => {}
            }
        }

        let url = self.origin.asset_url(&asset.name);
        let attached = if self.runtime.is_type_supported(&asset.mime_type) {
            match self.runtime.attach_buffer(&asset) {
                Ok(attached) => Some(attached),
                Err(StreamError::UnsupportedCapability(e)) => {
                    tracing::warn!("Segmented buffer unavailable: {e}");
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let Some((buffer, events)) = attached else {
            tracing::warn!(
                "Unsupported MIME type or codec: {}, playing {url} directly.",
                asset.mime_type
            );
            self.runtime.play_direct(&url)?;
            self.transition(SessionState::DirectPlayback);
            // the element keeps playing the URL until the session is torn down
            cancel.cancelled().await;
            return Ok(SessionOutcome::DirectPlayback);
        };

        let (completions_tx, completions) = mpsc::unbounded_channel();
        let mut stream = ActiveStream {
            asset,
            segment_count: self.config.segment_count,
            scheduler,
            sink: BufferSink::new(buffer),
            observer: PlaybackObserver::subscribe(events),
            fetcher: Fetcher {
                client: self.origin.client().clone(),
                url,
                policy: self.config.retry_policy(),
                session: cancel.clone(),
                current: None,
                completions: completions_tx,
            },
            completions,
        };
        self.transition(SessionState::Streaming);
        stream.run(&cancel).await
    }

    fn transition(&self, state: SessionState) {
        let previous = self.state.send_replace(state.clone());
        tracing::info!("Session {}: {previous:?} -> {state:?}", self.asset_name);
    }
}

/// Handle to a session running on its own task.
pub struct SessionHandle {
    asset_name: String,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: JoinHandle<StreamResult<SessionOutcome>>,
}

impl SessionHandle {
    pub fn asset_name(&self) -> &str {
        &self.asset_name
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the session to end on its own.
    pub async fn wait(self) -> StreamResult<SessionOutcome> {
        self.task.await?
    }

    /// Cancel the session and wait until it has released everything.
    pub async fn close(self) -> StreamResult<SessionOutcome> {
        self.cancel.cancel();
        self.wait().await
    }
}

/// Owns the single active session of a client.
pub struct Streamer<R> {
    origin: Origin,
    config: Arc<StreamConfig>,
    runtime: R,
    active: Option<SessionHandle>,
}

impl<R> Streamer<R>
where
    R: MediaRuntime + Clone,
{
    pub fn new(origin: Origin, config: StreamConfig, runtime: R) -> Self {
        Self {
            origin,
            config: Arc::new(config),
            runtime,
            active: None,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn active(&self) -> Option<&SessionHandle> {
        self.active.as_ref()
    }

    /// Start streaming `name`, closing the previous session first.
    pub async fn select_asset(&mut self, name: &str) -> &SessionHandle {
        if let Some(previous) = self.stop().await {
            tracing::debug!("Previous session closed with {previous:?}.");
        }

        let session = StreamingSession::new(
            name,
            self.origin.clone(),
            self.config.clone(),
            self.runtime.clone(),
        );
        let handle = SessionHandle {
            asset_name: name.to_string(),
            state: session.subscribe(),
            cancel: session.cancellation(),
            task: tokio::spawn(session.run()),
        };
        self.active.insert(handle)
    }

    /// Close the active session, if any.
    pub async fn stop(&mut self) -> Option<StreamResult<SessionOutcome>> {
        let handle = self.active.take()?;
        tracing::info!("Closing session of {}.", handle.asset_name);
        Some(handle.close().await)
    }

    /// Wait for the active session to finish by itself.
    pub async fn wait(&mut self) -> Option<StreamResult<SessionOutcome>> {
        let handle = self.active.take()?;
        Some(handle.wait().await)
    }
}
