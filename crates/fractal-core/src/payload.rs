use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::ParameterSet;

/// Provenance of a geometry payload: full-fidelity external computation
/// or the fast in-process approximation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSource {
    Primary,
    Fallback,
}

/// Metadata envelope carried with every payload so the consumer always
/// knows the provenance and fidelity of what it is displaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMetadata {
    pub iterations: u32,
    pub c: [f64; 4],
    pub grid_size: u32,
    pub source: PayloadSource,
    pub generated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PayloadMetadata {
    /// Builds metadata echoing the requested parameters, timestamped now.
    pub fn new(params: &ParameterSet, source: PayloadSource) -> Self {
        Self {
            iterations: params.iterations,
            c: params.c,
            grid_size: params.grid_size,
            source,
            generated_at: Utc::now().to_rfc3339(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Triangle mesh produced by one generation attempt.
///
/// `vertices` is a flat sequence of xyz triples and `indices` a flat
/// sequence of triangle index triples, matching the wire format the
/// rendering layer consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryPayload {
    pub vertices: Vec<f64>,
    pub indices: Vec<u32>,
    pub triangle_count: usize,
    pub vertex_count: usize,
    pub metadata: PayloadMetadata,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("vertex array length {0} is not a multiple of 3")]
    RaggedVertices(usize),
    #[error("index array length {0} is not a multiple of 3")]
    RaggedIndices(usize),
    #[error("declared vertex count {declared} does not match vertex data ({actual})")]
    VertexCountMismatch { declared: usize, actual: usize },
    #[error("declared triangle count {declared} does not match index data ({actual})")]
    TriangleCountMismatch { declared: usize, actual: usize },
    #[error("index {index} out of bounds for {vertex_count} vertices")]
    IndexOutOfBounds { index: u32, vertex_count: usize },
}

impl GeometryPayload {
    /// Builds a payload from raw geometry, deriving the counts.
    pub fn new(
        vertices: Vec<f64>,
        indices: Vec<u32>,
        metadata: PayloadMetadata,
    ) -> Result<Self, PayloadError> {
        let triangle_count = indices.len() / 3;
        let vertex_count = vertices.len() / 3;
        Self::with_counts(vertices, indices, triangle_count, vertex_count, metadata)
    }

    /// Builds a payload from raw geometry plus externally declared
    /// counts, verifying the declaration against the data.
    pub fn with_counts(
        vertices: Vec<f64>,
        indices: Vec<u32>,
        triangle_count: usize,
        vertex_count: usize,
        metadata: PayloadMetadata,
    ) -> Result<Self, PayloadError> {
        let payload = Self {
            vertices,
            indices,
            triangle_count,
            vertex_count,
            metadata,
        };
        payload.validate()?;
        Ok(payload)
    }

    pub fn source(&self) -> PayloadSource {
        self.metadata.source
    }

    /// Checks the structural invariants every payload must satisfy
    /// before crossing a boundary.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.vertices.len() % 3 != 0 {
            return Err(PayloadError::RaggedVertices(self.vertices.len()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(PayloadError::RaggedIndices(self.indices.len()));
        }
        let actual_vertices = self.vertices.len() / 3;
        if self.vertex_count != actual_vertices {
            return Err(PayloadError::VertexCountMismatch {
                declared: self.vertex_count,
                actual: actual_vertices,
            });
        }
        let actual_triangles = self.indices.len() / 3;
        if self.triangle_count != actual_triangles {
            return Err(PayloadError::TriangleCountMismatch {
                declared: self.triangle_count,
                actual: actual_triangles,
            });
        }
        for &index in &self.indices {
            if index as usize >= self.vertex_count {
                return Err(PayloadError::IndexOutOfBounds {
                    index,
                    vertex_count: self.vertex_count,
                });
            }
        }
        Ok(())
    }
}
