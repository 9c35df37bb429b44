//! Building-model parser seam.
//!
//! A [`ModelParser`] opens raw file bytes into a [`ParseContext`], which
//! hands each pipeline stage the entity iterator it consumes. Iterators
//! yield per-entity results so a single corrupt record never poisons the
//! rest of its collection.

pub mod entity;
pub mod json;
pub mod memory;

use std::fmt;
use std::io;
use std::path::Path;

use thiserror::Error;

pub use entity::{
    ElementRecord, Entity, MaterialRecord, RawGeometry, SpatialNode, SystemRecord, TypeRecord,
};
pub use json::JsonModelParser;
pub use memory::{InMemoryModel, InMemoryParser};

/// Top-level entity collections of a building model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Spatial,
    Materials,
    Types,
    Systems,
    Elements,
}

impl Collection {
    pub fn key(&self) -> &'static str {
        match self {
            Collection::Spatial => "spatial",
            Collection::Materials => "materials",
            Collection::Types => "types",
            Collection::Systems => "systems",
            Collection::Elements => "elements",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read model file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Malformed model file: {0}")]
    Malformed(String),

    #[error("Model source unavailable: {0}")]
    Unavailable(String),

    #[error("Collection '{collection}' is unreadable: {reason}")]
    Unreadable {
        collection: Collection,
        reason: String,
    },
}

impl ParseError {
    /// Whether a later attempt may succeed without the input changing.
    pub fn is_transient(&self) -> bool {
        match self {
            ParseError::Unavailable(_) => true,
            ParseError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            ParseError::Malformed(_) | ParseError::Unreadable { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityErrorKind {
    /// The record exists but cannot be decoded.
    Corrupt,
    /// The record is absent or lacks optional data.
    MissingData,
}

/// A single entity that could not be produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityError {
    pub kind: EntityErrorKind,
    pub global_id: Option<String>,
    pub entity_type: Option<String>,
    pub message: String,
}

impl EntityError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self {
            kind: EntityErrorKind::Corrupt,
            global_id: None,
            entity_type: None,
            message: message.into(),
        }
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Self {
            kind: EntityErrorKind::MissingData,
            ..Self::corrupt(message)
        }
    }

    pub fn with_id(mut self, global_id: impl Into<String>) -> Self {
        self.global_id = Some(global_id.into());
        self
    }

    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.global_id {
            Some(id) => write!(f, "{} ({})", self.message, id),
            None => f.write_str(&self.message),
        }
    }
}

pub type EntityIter<'a, T> = Box<dyn Iterator<Item = Result<T, EntityError>> + 'a>;

/// Parsed model, exclusively owned by the job that opened it.
pub trait ParseContext: Send {
    fn spatial_hierarchy(&self) -> Result<EntityIter<'_, SpatialNode>, ParseError>;
    fn materials(&self) -> Result<EntityIter<'_, MaterialRecord>, ParseError>;
    fn types(&self) -> Result<EntityIter<'_, TypeRecord>, ParseError>;
    fn systems(&self) -> Result<EntityIter<'_, SystemRecord>, ParseError>;
    fn elements(&self) -> Result<EntityIter<'_, ElementRecord>, ParseError>;
}

pub trait ModelParser: Send + Sync {
    /// Opens a model from raw file bytes. Any error here is catastrophic
    /// for the job.
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn ParseContext>, ParseError>;
}

/// Reads a model file referenced by a job.
pub fn read_source(path: &Path) -> Result<Vec<u8>, ParseError> {
    std::fs::read(path).map_err(|e| ParseError::Io {
        path: path.display().to_string(),
        source: e,
    })
}
