use super::progress::{JobEvent, JobFailure, JobId, StageTracker, WireEvent};
use super::sse::{SseDecoder, SseFrame};
use crate::config::ReaderConfig;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Raw body of an event stream
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Event stream refused: HTTP {0}")]
    Status(u16),

    #[error("Stream interrupted: {0}")]
    Interrupted(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum StreamError {
    #[error("A progress stream is already open for job {0}")]
    AlreadyOpen(JobId),
}

/// Opens the byte stream carrying a job's progress events
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn connect(&self, job_id: &JobId) -> Result<ByteStream, TransportError>;
}

/// `GET {api}/jobs/{id}/stream` over reqwest
pub struct HttpEventTransport {
    client: Client,
    api_url: String,
}

impl HttpEventTransport {
    pub fn new(config: &ReaderConfig) -> Self {
        // No total timeout: the body stays open for the whole pipeline run
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_url: config.api_url.clone(),
        }
    }
}

#[async_trait]
impl EventTransport for HttpEventTransport {
    async fn connect(&self, job_id: &JobId) -> Result<ByteStream, TransportError> {
        let url = format!("{}/jobs/{}/stream", self.api_url, job_id);
        tracing::info!("Opening progress stream: {}", url);

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| TransportError::Interrupted(e.to_string()))
        });
        Ok(Box::pin(body))
    }
}

/// Tracks which jobs currently have an open stream
#[derive(Clone, Default)]
pub struct StreamRegistry {
    open: Arc<Mutex<HashSet<JobId>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, job_id: &JobId) -> bool {
        self.open
            .lock()
            .map(|open| open.contains(job_id))
            .unwrap_or(false)
    }

    fn acquire(&self, job_id: &JobId) -> Result<StreamSlot, StreamError> {
        let mut open = self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !open.insert(job_id.clone()) {
            return Err(StreamError::AlreadyOpen(job_id.clone()));
        }
        Ok(StreamSlot {
            registry: self.clone(),
            job_id: job_id.clone(),
        })
    }
}

struct StreamSlot {
    registry: StreamRegistry,
    job_id: JobId,
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        if let Ok(mut open) = self.registry.open.lock() {
            open.remove(&self.job_id);
        }
    }
}

/// Progress events of one job: zero or more `Progress`, then exactly one
/// terminal `Completed` or `Failed`, then nothing.
///
/// Dropping (or [`close`](Self::close)) aborts the reader task, which releases
/// the underlying connection. The backend job itself is untouched.
pub struct ProgressStream {
    job_id: JobId,
    rx: mpsc::Receiver<JobEvent>,
    task: Option<JoinHandle<()>>,
    finished: bool,
    _slot: StreamSlot,
}

impl ProgressStream {
    /// Must be called inside a tokio runtime.
    pub fn open(
        transport: Arc<dyn EventTransport>,
        registry: &StreamRegistry,
        job_id: JobId,
        buffer: usize,
    ) -> Result<Self, StreamError> {
        let slot = registry.acquire(&job_id)?;
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(pump(transport, job_id.clone(), tx));

        tracing::debug!("Progress stream opened for job {}", job_id);

        Ok(Self {
            job_id,
            rx,
            task: Some(task),
            finished: false,
            _slot: slot,
        })
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.next().await
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.finished = true;
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Progress stream closed for job {}", self.job_id);
        }
        self.rx.close();
    }
}

impl Stream for ProgressStream {
    type Item = JobEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.release();
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.release();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        self.release();
    }
}

async fn pump(transport: Arc<dyn EventTransport>, job_id: JobId, tx: mpsc::Sender<JobEvent>) {
    let terminal = match read_events(transport.as_ref(), &job_id, &tx).await {
        Ok(Some(terminal)) => terminal,
        Ok(None) => return,
        Err(reason) => JobEvent::Failed(JobFailure::Connection(reason)),
    };

    match &terminal {
        JobEvent::Completed { book_id } => {
            tracing::info!("Job {} completed: book {}", job_id, book_id)
        }
        JobEvent::Failed(JobFailure::Pipeline { stage, message }) => {
            tracing::warn!("Job {} failed while {}: {}", job_id, stage, message)
        }
        JobEvent::Failed(JobFailure::Connection(reason)) => {
            tracing::warn!("Job {} stream lost: {}", job_id, reason)
        }
        JobEvent::Progress(_) => {}
    }

    let _ = tx.send(terminal).await;
}

/// `Ok(Some(_))` with the terminal event, `Ok(None)` when the consumer went
/// away, `Err` when the transport or the protocol broke first.
async fn read_events(
    transport: &dyn EventTransport,
    job_id: &JobId,
    tx: &mpsc::Sender<JobEvent>,
) -> Result<Option<JobEvent>, String> {
    let mut body = transport.connect(job_id).await.map_err(|e| e.to_string())?;
    let mut decoder = SseDecoder::new();
    let mut tracker = StageTracker::default();
    let mut ended = false;

    while !ended {
        let frames = match body.next().await {
            Some(chunk) => decoder.push(&chunk.map_err(|e| e.to_string())?),
            None => {
                ended = true;
                decoder.finish().into_iter().collect()
            }
        };

        for frame in frames {
            let event = decode_frame(&frame, &mut tracker)?;
            if event.is_terminal() {
                return Ok(Some(event));
            }
            if tx.send(event).await.is_err() {
                return Ok(None);
            }
        }
    }

    Err("stream closed before a terminal event".to_string())
}

fn decode_frame(frame: &SseFrame, tracker: &mut StageTracker) -> Result<JobEvent, String> {
    let wire: WireEvent = serde_json::from_str(&frame.data)
        .map_err(|e| format!("undecodable event '{}': {}", frame.data, e))?;
    Ok(tracker.interpret(wire))
}
