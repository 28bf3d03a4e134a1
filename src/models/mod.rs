//! Data models for diagramstore.

mod diagram;

pub use diagram::{Diagram, DiagramId, DiagramType};
