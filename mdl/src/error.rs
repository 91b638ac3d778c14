//! Error and warning types for MDL parsing and writing.

use std::fmt::{self, Display};

use thiserror::Error;

/// Fatal conditions. Any of these aborts the current file; no partial model is returned.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A `node` line named a type the codec does not know.
    #[error("line {line}: unsupported node type `{node_type}` for node `{name}`")]
    UnsupportedNodeType {
        /// Line number (1-indexed).
        line: usize,
        /// The type token as written.
        node_type: String,
        /// Name of the offending node.
        name: String,
    },

    /// The first node of a model is not an unparented dummy.
    #[error("first node `{name}` is not a dummy without a parent")]
    MissingRoot {
        /// Name of the first node, empty if the model has no nodes.
        name: String,
    },

    /// A node's parent could not be resolved, even after suffix disambiguation.
    #[error("line {line}: node `{name}` has no resolvable parent `{parent}`")]
    DanglingParent {
        /// Line number (1-indexed) of the node header.
        line: usize,
        /// Name of the offending node.
        name: String,
        /// The declared parent name.
        parent: String,
    },

    /// `newanim`/`doneanim` are not properly paired.
    #[error("line {line}: malformed animation block: {message}")]
    MalformedAnimationBlock {
        /// Line number (1-indexed).
        line: usize,
        /// Error message.
        message: String,
    },

    /// `node`/`endnode` are not properly paired.
    #[error("line {line}: malformed node block: {message}")]
    MalformedNodeBlock {
        /// Line number (1-indexed).
        line: usize,
        /// Error message.
        message: String,
    },

    /// `newmodel` without a name, or no `newmodel` at all.
    #[error("model has no name")]
    MissingModelName,

    /// A scene object handed to the exporter has no node variant.
    #[error("scene object `{name}` cannot be mapped to a node type")]
    UnmappedObject {
        /// Name of the scene object.
        name: String,
    },

    /// Walkmesh nodes do not agree on a single parent.
    #[error("invalid walkmesh: {message}")]
    InvalidWalkmesh {
        /// Error message.
        message: String,
    },
}

impl Error {
    pub(crate) fn animation_block(line: usize, message: impl Into<String>) -> Self {
        Self::MalformedAnimationBlock { line, message: message.into() }
    }

    pub(crate) fn node_block(line: usize, message: impl Into<String>) -> Self {
        Self::MalformedNodeBlock { line, message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A non-fatal condition recorded while parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    /// Line number (1-indexed), when the condition has a location.
    pub line: Option<usize>,
    pub kind: WarningKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WarningKind {
    /// A line failed its expected shape; the directive was skipped.
    MalformedRecord { directive: String, message: String },
    /// Animated vertex/UV samples disagree with the animated mesh.
    SampleSizeMismatch { node: String, channel: String, expected: usize, found: usize },
    /// A second node (or animation) with an identical key was dropped.
    DuplicateName { parent: String, name: String },
}

impl Warning {
    pub(crate) fn malformed(line: usize, directive: &str, message: impl Into<String>) -> Self {
        Warning {
            line: Some(line),
            kind: WarningKind::MalformedRecord { directive: directive.to_owned(), message: message.into() },
        }
    }

    pub(crate) fn duplicate(line: Option<usize>, parent: &str, name: &str) -> Self {
        Warning {
            line,
            kind: WarningKind::DuplicateName { parent: parent.to_owned(), name: name.to_owned() },
        }
    }
}

impl Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "line {}: ", line)?;
        }
        match &self.kind {
            WarningKind::MalformedRecord { directive, message } => write!(f, "skipped `{}`: {}", directive, message),
            WarningKind::SampleSizeMismatch { node, channel, expected, found } => {
                write!(f, "{} on `{}` has {} samples, expected {}", channel, node, found, expected)
            }
            WarningKind::DuplicateName { parent, name } => write!(f, "duplicate node `{}` under `{}` dropped", name, parent),
        }
    }
}

/// A successfully parsed value plus everything that was skipped on the way.
#[derive(Debug)]
pub struct Parsed<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Parsed<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        Parsed { value: f(self.value), warnings: self.warnings }
    }
}

/// Collects warnings and mirrors each one to the log as it arrives.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn push(&mut self, warning: Warning) {
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        for warning in warnings {
            self.push(warning);
        }
    }

    pub fn finish<T>(self, value: T) -> Parsed<T> {
        Parsed { value, warnings: self.warnings }
    }
}
