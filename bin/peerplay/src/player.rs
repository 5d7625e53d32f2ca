//! A playback element driven by the wall clock instead of a decoder.
//!
//! Duration is derived from a constant bitrate, which holds for the CBR MP3 files nodes
//! serve. Appended audio is written to the output so a real player can consume it.

use std::{
    io::Write,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use bytes::Bytes;
use futures::TryStreamExt;
use peerstream::{
    playback::{MediaRuntime, PlaybackBuffer, PlaybackEvent, ReadyState},
    Asset, HttpClient, StreamError, StreamResult,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use url::Url;

const TICK: Duration = Duration::from_millis(250);

pub type Output = Box<dyn Write + Send>;

#[derive(Debug, Clone, Copy)]
pub struct PlayerOptions {
    pub bitrate_kbps: u32,
    pub speed: f64,
    pub segmented: bool,
}

impl PlayerOptions {
    fn bytes_per_second(&self) -> f64 {
        self.bitrate_kbps as f64 * 1000. / 8.
    }
}

struct Playback {
    ready: ReadyState,
    buffered: u64,
    total: u64,
}

struct Shared {
    playback: Mutex<Playback>,
    output: Mutex<Output>,
    task: Mutex<Option<JoinHandle<()>>>,
    finished: watch::Sender<bool>,
}

impl Shared {
    fn playback(&self) -> MutexGuard<'_, Playback> {
        self.playback.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, data: &[u8]) -> std::io::Result<()> {
        let mut output = self.output.lock().unwrap_or_else(|e| e.into_inner());
        output.write_all(data)?;
        output.flush()
    }

    fn replace_task(&self, task: Option<JoinHandle<()>>) {
        let mut current = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = std::mem::replace(&mut *current, task) {
            previous.abort();
        }
    }
}

#[derive(Clone)]
pub struct SimulatedPlayer {
    client: HttpClient,
    options: PlayerOptions,
    shared: Arc<Shared>,
}

impl SimulatedPlayer {
    pub fn new(client: HttpClient, output: Output, options: PlayerOptions) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            client,
            options,
            shared: Arc::new(Shared {
                playback: Mutex::new(Playback {
                    ready: ReadyState::Closed,
                    buffered: 0,
                    total: 0,
                }),
                output: Mutex::new(output),
                task: Mutex::new(None),
                finished,
            }),
        }
    }

    /// Resolves once playback reached the end of the asset.
    pub async fn finished(&self) {
        let mut finished = self.shared.finished.subscribe();
        _ = finished.wait_for(|finished| *finished).await;
    }
}

pub struct SimulatedBuffer {
    shared: Arc<Shared>,
}

impl PlaybackBuffer for SimulatedBuffer {
    fn ready_state(&self) -> ReadyState {
        self.shared.playback().ready
    }

    fn append(&mut self, data: Bytes) -> StreamResult<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(StreamError::BufferClosed);
        }
        self.shared.write(&data)?;
        self.shared.playback().buffered += data.len() as u64;
        Ok(())
    }

    fn abort(&mut self) -> StreamResult<()> {
        tracing::debug!("Pending append aborted.");
        Ok(())
    }

    fn end_of_stream(&mut self) -> StreamResult<()> {
        self.shared.playback().ready = ReadyState::Ended;
        Ok(())
    }
}

impl MediaRuntime for SimulatedPlayer {
    type Buffer = SimulatedBuffer;

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.options.segmented && mime_type.starts_with("audio/")
    }

    fn attach_buffer(
        &mut self,
        asset: &Asset,
    ) -> StreamResult<(Self::Buffer, mpsc::UnboundedReceiver<PlaybackEvent>)> {
        *self.shared.playback() = Playback {
            ready: ReadyState::Open,
            buffered: 0,
            total: asset.total_size,
        };
        self.shared.finished.send_replace(false);

        let (events, receiver) = mpsc::unbounded_channel();
        let clock = tokio::spawn(run_clock(self.shared.clone(), events, self.options));
        self.shared.replace_task(Some(clock));

        Ok((
            SimulatedBuffer {
                shared: self.shared.clone(),
            },
            receiver,
        ))
    }

    fn play_direct(&mut self, url: &Url) -> StreamResult<()> {
        let client = self.client.clone();
        let shared = self.shared.clone();
        let url = url.clone();
        shared.finished.send_replace(false);

        let task = tokio::spawn({
            let shared = shared.clone();
            async move {
                match download(&client, url, &shared).await {
                    Ok(length) => tracing::info!("Played {length} bytes directly."),
                    Err(e) => tracing::error!("Direct playback failed: {e}"),
                }
                shared.finished.send_replace(true);
            }
        });
        shared.replace_task(Some(task));
        Ok(())
    }

    fn detach(&mut self) {
        self.shared.replace_task(None);
        self.shared.playback().ready = ReadyState::Closed;
    }
}

async fn download(client: &HttpClient, url: Url, shared: &Shared) -> StreamResult<u64> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(StreamError::HttpError(response.status()));
    }

    let mut length = 0;
    let mut stream = std::pin::pin!(response.bytes_stream());
    while let Some(chunk) = stream.try_next().await? {
        shared.write(&chunk)?;
        length += chunk.len() as u64;
    }
    Ok(length)
}

async fn run_clock(
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    options: PlayerOptions,
) {
    let rate = options.bytes_per_second();
    let duration = shared.playback().total as f64 / rate;
    let step = TICK.as_secs_f64() * options.speed;

    let mut interval = tokio::time::interval(TICK);
    let mut position = 0.;
    let mut playing = false;
    loop {
        interval.tick().await;
        let buffered = shared.playback().buffered as f64 / rate;

        if !playing {
            if buffered <= 0. {
                continue;
            }
            playing = true;
            tracing::info!("Playback started, {duration:.2}s in total.");
            // the session stops listening once it is done, playback goes on
            _ = events.send(PlaybackEvent::CanPlay { duration });
        }

        if position >= duration {
            tracing::info!("Playback finished.");
            _ = events.send(PlaybackEvent::Ended);
            shared.finished.send_replace(true);
            break;
        }

        let next = (position + step).min(buffered).min(duration);
        if next <= position {
            tracing::debug!("Buffering at {position:.2}s.");
            continue;
        }
        position = next;
        _ = events.send(PlaybackEvent::TimeUpdate {
            current_time: position,
        });
    }
}
