// src/book/mod.rs
// Book repository - remote storage of submitted and finished books

mod types;

pub use types::{BookId, BookRequest, BookSummary, Document, FetchError, Segment, Token};

use crate::config::ReaderConfig;
use crate::job::{JobId, SubmissionError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Remote book storage consumed by the job client and the library view
#[async_trait]
pub trait BookRepository: Send + Sync {
    /// Start the processing pipeline for a new book
    async fn create(&self, request: &BookRequest) -> Result<JobId, SubmissionError>;

    /// List finished books
    async fn list(&self) -> Result<Vec<BookSummary>, FetchError>;

    /// Fetch a finished book with all segments, tokens and clip references
    async fn fetch(&self, id: &BookId) -> Result<Document, FetchError>;
}

#[derive(Deserialize)]
struct ProcessResponse {
    job_id: String,
}

/// REST implementation of [`BookRepository`]
pub struct HttpBookRepository {
    client: Client,
    api_url: String,
}

impl HttpBookRepository {
    pub fn new(config: &ReaderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();

        tracing::info!("Book repository initialized: {}", config.api_url);

        Self {
            client,
            api_url: config.api_url.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl BookRepository for HttpBookRepository {
    async fn create(&self, request: &BookRequest) -> Result<JobId, SubmissionError> {
        tracing::info!(
            "Submitting '{}' for processing ({} chars)",
            request.title,
            request.text.len()
        );

        let response = self
            .client
            .post(self.url("process"))
            .json(request)
            .send()
            .await
            .map_err(|e| SubmissionError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Submission rejected: HTTP {}", status);
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let accepted: ProcessResponse = response
            .json()
            .await
            .map_err(|e| SubmissionError::InvalidResponse(e.to_string()))?;

        if accepted.job_id.trim().is_empty() {
            return Err(SubmissionError::InvalidResponse("empty job_id".to_string()));
        }

        tracing::info!("Pipeline started: job {}", accepted.job_id);
        Ok(JobId::new(accepted.job_id))
    }

    async fn list(&self) -> Result<Vec<BookSummary>, FetchError> {
        let response = self
            .client
            .get(self.url("books"))
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let books: Vec<BookSummary> = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        tracing::debug!("Library listing: {} books", books.len());
        Ok(books)
    }

    async fn fetch(&self, id: &BookId) -> Result<Document, FetchError> {
        tracing::info!("Fetching book {}", id);

        let response = self
            .client
            .get(self.url(&format!("books/{}", id)))
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(id.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // Unknown ids come back as a `null` body with 200
        let document: Option<Document> = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        let document = document.ok_or_else(|| FetchError::NotFound(id.clone()))?;

        tracing::info!(
            "Book {} loaded: '{}' ({} segments)",
            document.id,
            document.title,
            document.segments.len()
        );
        Ok(document)
    }
}
