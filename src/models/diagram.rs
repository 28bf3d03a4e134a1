//! Diagram record types and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a diagram.
///
/// Assigned by the caller at creation time (the store never generates ids)
/// and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagramId(String);

impl DiagramId {
    /// Creates a new diagram ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiagramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DiagramId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DiagramId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A stored diagram record.
///
/// The caller owns id and timestamp generation: `created_at` is stamped once,
/// `modified_at` on every content mutation. The store persists both verbatim
/// and uses `modified_at` (descending) as the listing sort key. Favorite
/// toggles deliberately do not touch `modified_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagram {
    /// Unique identifier, immutable after creation.
    pub id: DiagramId,
    /// User-editable title.
    pub title: String,
    /// The diagram source text, unbounded length.
    pub code: String,
    /// Categorical tag, e.g. "flowchart" or "sequence".
    ///
    /// Stored verbatim; [`DiagramType`] offers the known vocabulary but
    /// unknown tags are not rejected.
    pub diagram_type: String,
    /// Creation timestamp (Unix epoch milliseconds), set once.
    pub created_at: i64,
    /// Last-modification timestamp (Unix epoch milliseconds).
    pub modified_at: i64,
    /// Whether the diagram is marked as a favorite.
    pub is_favorite: bool,
}

/// Known diagram kinds with their canonical tags and source-text prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagramType {
    /// Flowchart (`graph` / `flowchart`).
    #[default]
    Flowchart,
    /// Sequence diagram.
    Sequence,
    /// Class diagram.
    ClassDiagram,
    /// State diagram.
    StateDiagram,
    /// Entity-relationship diagram.
    ErDiagram,
    /// Gantt chart.
    Gantt,
    /// Pie chart.
    Pie,
    /// Mind map.
    Mindmap,
    /// Timeline.
    Timeline,
    /// User journey.
    Journey,
    /// Git commit graph.
    GitGraph,
    /// C4 context diagram.
    C4Context,
}

impl DiagramType {
    const ALL: [Self; 12] = [
        Self::Flowchart,
        Self::Sequence,
        Self::ClassDiagram,
        Self::StateDiagram,
        Self::ErDiagram,
        Self::Gantt,
        Self::Pie,
        Self::Mindmap,
        Self::Timeline,
        Self::Journey,
        Self::GitGraph,
        Self::C4Context,
    ];

    /// Returns the canonical tag stored in [`Diagram::diagram_type`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flowchart => "flowchart",
            Self::Sequence => "sequence",
            Self::ClassDiagram => "class",
            Self::StateDiagram => "state",
            Self::ErDiagram => "er",
            Self::Gantt => "gantt",
            Self::Pie => "pie",
            Self::Mindmap => "mindmap",
            Self::Timeline => "timeline",
            Self::Journey => "journey",
            Self::GitGraph => "git-graph",
            Self::C4Context => "c4-context",
        }
    }

    /// Leading keyword of diagram source text for this kind.
    const fn prefix(self) -> &'static str {
        match self {
            Self::Flowchart => "graph",
            Self::Sequence => "sequencediagram",
            Self::ClassDiagram => "classdiagram",
            Self::StateDiagram => "statediagram",
            Self::ErDiagram => "erdiagram",
            Self::Gantt => "gantt",
            Self::Pie => "pie",
            Self::Mindmap => "mindmap",
            Self::Timeline => "timeline",
            Self::Journey => "journey",
            Self::GitGraph => "gitgraph",
            Self::C4Context => "c4context",
        }
    }

    /// Parses a stored tag.
    ///
    /// Returns `None` for tags outside the known vocabulary; callers keep
    /// unknown tags verbatim.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == tag)
    }

    /// Classifies diagram source text by its leading keyword.
    ///
    /// Falls back to [`Self::Flowchart`] when no prefix matches.
    #[must_use]
    pub fn detect(code: &str) -> Self {
        let trimmed = code.trim_start().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| trimmed.starts_with(t.prefix()))
            .unwrap_or_default()
    }
}

impl fmt::Display for DiagramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
