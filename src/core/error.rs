//! Purpose: Structured error type shared by the engine, the queue plumbing and the CLI.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Single error currency; the CLI maps kinds to exit codes and JSON envelopes.
//! Invariants: Exit code mapping is stable once published.
//! Invariants: Transient kinds (queue, sink, io) are retried by redelivery; other block failures are rejections.
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use crate::core::plan::Block;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    InvalidSymbol,
    InvalidSeed,
    SeedTooLong,
    InvalidBlockSize,
    Data,
    Queue,
    Sink,
    Interrupted,
    Io,
}

impl ErrorKind {
    /// Failures a worker survives by leaving the block for redelivery.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Queue | ErrorKind::Sink | ErrorKind::Io)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    block: Option<Block>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            block: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn block(&self) -> Option<&Block> {
        self.block.as_ref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_block(mut self, block: &Block) -> Self {
        self.block = Some(block.clone());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(block) = &self.block {
            write!(f, " (block: {}..{})", block.start, block.stop)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::InvalidSymbol => 3,
        ErrorKind::InvalidSeed => 4,
        ErrorKind::SeedTooLong => 5,
        ErrorKind::InvalidBlockSize => 6,
        ErrorKind::Data => 7,
        ErrorKind::Queue => 8,
        ErrorKind::Sink => 9,
        ErrorKind::Io => 10,
        ErrorKind::Interrupted => 130,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};
    use crate::core::plan::Block;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::InvalidSymbol, 3),
            (ErrorKind::InvalidSeed, 4),
            (ErrorKind::SeedTooLong, 5),
            (ErrorKind::InvalidBlockSize, 6),
            (ErrorKind::Data, 7),
            (ErrorKind::Queue, 8),
            (ErrorKind::Sink, 9),
            (ErrorKind::Io, 10),
            (ErrorKind::Interrupted, 130),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn only_delivery_failures_are_transient() {
        assert!(ErrorKind::Queue.is_transient());
        assert!(ErrorKind::Sink.is_transient());
        assert!(ErrorKind::Io.is_transient());
        assert!(!ErrorKind::Usage.is_transient());
        assert!(!ErrorKind::Interrupted.is_transient());
        assert!(!ErrorKind::Data.is_transient());
    }

    #[test]
    fn display_includes_block_context() {
        let block = Block::new(30u32, 60u32);
        let err = Error::new(ErrorKind::Sink)
            .with_message("upload failed")
            .with_block(&block);
        assert_eq!(err.to_string(), "Sink: upload failed (block: 30..60)");
    }
}
