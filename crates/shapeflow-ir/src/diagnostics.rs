//! Diagnostics emitted during shape propagation
//!
//! The driver accumulates problems instead of aborting: operation-level
//! diagnostics keep the walk going so one run surfaces as many failures as
//! possible. Consumers receive them through the [`DiagnosticSink`] trait;
//! [`DiagnosticBuffer`] is the provided in-memory sink.

use crate::graph::OpId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// An eligible operation has no registered shape-inference implementation.
    CapabilityMissing,
    /// An implementation found its operand types contradictory or a required
    /// static attribute missing.
    InferenceContradiction,
    /// Results remained non-fully-static after the walk.
    UnresolvedShapes { count: usize },
}

/// The operation or callable a diagnostic is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    Operation { callable: String, op: OpId },
    Callable { callable: String },
}

impl Location {
    pub fn callable(&self) -> &str {
        match self {
            Location::Operation { callable, .. } => callable,
            Location::Callable { callable } => callable,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Operation { callable, op } => write!(f, "{callable}#{op}"),
            Location::Callable { callable } => f.write_str(callable),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub location: Location,
    pub message: String,
}

impl Diagnostic {
    pub fn operation(
        callable: &str,
        op: OpId,
        kind: DiagnosticKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            location: Location::Operation {
                callable: callable.to_string(),
                op,
            },
            message: message.into(),
        }
    }

    pub fn callable(callable: &str, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            location: Location::Callable {
                callable: callable.to_string(),
            },
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Receives diagnostics as the driver produces them.
///
/// The wire format (rendering, aggregation, abort policy) is the consumer's
/// concern; the driver only guarantees that every diagnostic names the exact
/// operation or callable it pertains to.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// In-memory sink collecting diagnostics in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticBuffer {
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Diagnostics matching a kind predicate, e.g. to count contradictions.
    pub fn of_kind<'a>(
        &'a self,
        predicate: impl Fn(&DiagnosticKind) -> bool + 'a,
    ) -> impl Iterator<Item = &'a Diagnostic> {
        self.diagnostics.iter().filter(move |d| predicate(&d.kind))
    }
}

impl DiagnosticSink for DiagnosticBuffer {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}
