// src/book/types.rs
// Book data model and fetch error definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Server-assigned identifier of a finished book
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(pub String);

impl BookId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully processed book, immutable once fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: BookId,
    pub title: String,
    /// Reading and playback order
    pub segments: Vec<Segment>,
}

impl Document {
    pub fn last_index(&self) -> Option<usize> {
        self.segments.len().checked_sub(1)
    }
}

/// One sentence of the source text with its translation, gloss and clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    #[serde(alias = "original_text", alias = "originalText")]
    pub original: String,
    #[serde(alias = "translation_text", alias = "translationText")]
    pub translation: String,
    #[serde(default)]
    pub tokens: Vec<Token>,
    /// Missing while synthesis is pending or after it failed
    #[serde(default, alias = "audioRef", alias = "audio_ref")]
    pub audio_url: Option<String>,
}

impl Segment {
    pub fn has_audio(&self) -> bool {
        self.audio_url
            .as_deref()
            .map(|url| !url.trim().is_empty())
            .unwrap_or(false)
    }
}

/// One glossed word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub id: u32,
    #[serde(alias = "source_word", alias = "sourceWord", alias = "word")]
    pub source: String,
    #[serde(default, alias = "gloss_word", alias = "glossWord")]
    pub gloss: Option<String>,
}

/// Library listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub id: BookId,
    pub title: String,
}

/// Payload that starts the translation + synthesis pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRequest {
    pub title: String,
    pub text: String,
}

impl BookRequest {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }
}

/// Book retrieval errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Book not found: {0}")]
    NotFound(BookId),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid book payload: {0}")]
    Decode(String),
}
