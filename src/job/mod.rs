// src/job/mod.rs
// Job submission and progress tracking for the translation + synthesis pipeline

mod progress;
pub mod sse;
pub mod stream;

pub use progress::{JobEvent, JobFailure, JobId, PipelineStage, ProgressUpdate};
pub use stream::{
    ByteStream, EventTransport, HttpEventTransport, ProgressStream, StreamError, StreamRegistry,
    TransportError,
};

use crate::book::{BookId, BookRepository, BookRequest, Document, FetchError};
use crate::config::ReaderConfig;
use std::sync::Arc;
use thiserror::Error;

/// Pipeline could not be started
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request rejected: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A submitted job did not produce a book
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("Pipeline failed while {stage}: {message}")]
    Pipeline { stage: PipelineStage, message: String },

    #[error("Progress stream lost: {0}")]
    StreamConnection(String),

    #[error("Already listening to job {0}")]
    AlreadyStreaming(JobId),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl From<StreamError> for JobError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::AlreadyOpen(job_id) => JobError::AlreadyStreaming(job_id),
        }
    }
}

impl From<JobFailure> for JobError {
    fn from(failure: JobFailure) -> Self {
        match failure {
            JobFailure::Pipeline { stage, message } => JobError::Pipeline { stage, message },
            JobFailure::Connection(reason) => JobError::StreamConnection(reason),
        }
    }
}

/// Starts pipeline runs and follows them to completion
pub struct JobSubmissionClient<R: BookRepository> {
    repository: Arc<R>,
    transport: Arc<dyn EventTransport>,
    registry: StreamRegistry,
    stream_buffer: usize,
}

impl<R: BookRepository> JobSubmissionClient<R> {
    pub fn new(repository: Arc<R>, transport: Arc<dyn EventTransport>, config: &ReaderConfig) -> Self {
        Self {
            repository,
            transport,
            registry: StreamRegistry::new(),
            stream_buffer: config.stream_buffer,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Validate locally, then ask the backend to start the pipeline
    pub async fn submit(&self, request: &BookRequest) -> Result<JobId, SubmissionError> {
        if request.title.trim().is_empty() {
            return Err(SubmissionError::InvalidRequest("title is empty".to_string()));
        }
        if request.text.trim().is_empty() {
            return Err(SubmissionError::InvalidRequest("text is empty".to_string()));
        }

        self.repository.create(request).await
    }

    /// Open a raw progress stream for a job
    pub fn open_stream(&self, job_id: &JobId) -> Result<ProgressStream, StreamError> {
        ProgressStream::open(
            self.transport.clone(),
            &self.registry,
            job_id.clone(),
            self.stream_buffer,
        )
    }

    /// Follow a job until its terminal event, forwarding every intermediate
    /// update to `on_progress` in arrival order.
    ///
    /// Dropping the returned future closes the stream; the backend job keeps
    /// running.
    pub async fn await_completion<F>(&self, job_id: &JobId, mut on_progress: F) -> Result<BookId, JobError>
    where
        F: FnMut(&ProgressUpdate),
    {
        let mut stream = self.open_stream(job_id)?;

        while let Some(event) = stream.next_event().await {
            match event {
                JobEvent::Progress(update) => {
                    tracing::debug!(
                        "Job {} {} {}/{}: {}",
                        job_id,
                        update.stage,
                        update.current().0,
                        update.total,
                        update.message
                    );
                    on_progress(&update);
                }
                JobEvent::Completed { book_id } => return Ok(book_id),
                JobEvent::Failed(failure) => return Err(failure.into()),
            }
        }

        Err(JobError::StreamConnection(
            "stream ended without a terminal event".to_string(),
        ))
    }

    /// Submit, wait for the pipeline and fetch the finished book
    pub async fn process<F>(&self, request: &BookRequest, on_progress: F) -> Result<Document, JobError>
    where
        F: FnMut(&ProgressUpdate),
    {
        let job_id = self.submit(request).await?;
        let book_id = self.await_completion(&job_id, on_progress).await?;
        Ok(self.repository.fetch(&book_id).await?)
    }
}
