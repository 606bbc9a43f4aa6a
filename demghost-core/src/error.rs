//! Error types for demo parsing, tracking and merging

use std::fmt;

use thiserror::Error;

/// What went wrong while reading, tracking or merging a demo
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DemoError {
    /// A block header or a declared block length runs past the end of input
    #[error("Truncated input at offset {offset}: need {needed} bytes, {available} left")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The file does not start with a newline-terminated CD track line
    #[error("Invalid demo header: no CD track line")]
    InvalidHeader,

    /// A record's fields don't fit in the remaining block bytes
    #[error("Malformed record {tag:#04X} at offset {offset}: fields run past the block end")]
    MalformedRecord { tag: u8, offset: usize },

    /// A record whose length cannot be determined
    #[error("Unsupported record {tag:#04X} at offset {offset}")]
    UnsupportedRecordVariant { tag: u8, offset: usize },

    /// Server info announces a protocol other than NetQuake
    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocol(i32),

    /// More than one server info record in a stream
    #[error("Demo spans more than one level")]
    MultiLevelDemo,

    /// Stream never announces its level
    #[error("Demo has no server info")]
    MissingServerInfo,

    /// A ghost stream never sets its view entity
    #[error("Demo never sets a view entity")]
    MissingViewEntity,

    /// The followed entity has no baseline: it was updated before one
    /// arrived, or never got one
    #[error("Entity {entity} has no baseline")]
    UninitializedEntity { entity: u16 },

    /// Entity id beyond the entity table
    #[error("Entity {entity} out of range (limit {limit})")]
    EntityOutOfRange { entity: u16, limit: usize },

    /// No free entity id left to host a ghost
    #[error("No free entity id for a ghost (limit {limit})")]
    EntityIdExhaustion { limit: usize },

    /// Merged model precache no longer fits a byte index
    #[error("Too many models after merging: {count}")]
    TooManyModels { count: usize },

    /// Model index beyond the stream's own precache list
    #[error("Model index {index} not in precache ({count} models)")]
    UnknownModel { index: u8, count: usize },

    /// Failed to deserialize a fixed-width structure
    #[error("Deserialization failed: {0}")]
    Deserialize(String),
}

impl From<bincode::Error> for DemoError {
    fn from(e: bincode::Error) -> Self {
        DemoError::Deserialize(e.to_string())
    }
}

/// Which input a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamId {
    Base,
    /// Ghost by position in the input list (0-based)
    Ghost(usize),
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Base => write!(f, "base demo"),
            StreamId::Ghost(n) => write!(f, "ghost demo #{}", n + 1),
        }
    }
}

/// A [`DemoError`] located in its stream and block
#[derive(Error, Debug, Clone, PartialEq)]
pub struct Error {
    pub stream: Option<StreamId>,
    pub block: Option<usize>,
    #[source]
    pub kind: DemoError,
}

impl Error {
    pub fn in_block(block: usize, kind: DemoError) -> Self {
        Error {
            stream: None,
            block: Some(block),
            kind,
        }
    }

    /// Attach the stream identity, keeping any block index
    pub fn in_stream(mut self, stream: StreamId) -> Self {
        self.stream = Some(stream);
        self
    }
}

impl From<DemoError> for Error {
    fn from(kind: DemoError) -> Self {
        Error {
            stream: None,
            block: None,
            kind,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.stream, self.block) {
            (Some(stream), Some(block)) => write!(f, "{stream}, block {block}: {}", self.kind),
            (Some(stream), None) => write!(f, "{stream}: {}", self.kind),
            (None, Some(block)) => write!(f, "block {block}: {}", self.kind),
            (None, None) => write!(f, "{}", self.kind),
        }
    }
}
