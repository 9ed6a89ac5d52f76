use std::f64::consts::PI;

use crate::params::ParameterSet;
use crate::payload::{GeometryPayload, PayloadMetadata, PayloadSource};

/// Largest grid resolution the fallback reports in its metadata.
pub const FALLBACK_MAX_GRID: u32 = 30;

/// Segment cap keeping fallback latency bounded regardless of the
/// requested resolution.
const MAX_SEGMENTS: u32 = 20;

const SPHERE_RADIUS: f64 = 1.0;
const VARIATION_SCALE: f64 = 0.1;

/// Fast in-process approximation of the Julia surface: a UV sphere
/// perturbed by an iteration-scaled ripple. Guaranteed degraded-mode
/// path; never fails for a well-formed parameter set.
pub fn generate_fallback(params: &ParameterSet) -> GeometryPayload {
    build(params, None)
}

/// Same as [`generate_fallback`] with a human-readable note recording
/// why the degraded path was taken.
pub fn generate_fallback_with_note(
    params: &ParameterSet,
    note: impl Into<String>,
) -> GeometryPayload {
    build(params, Some(note.into()))
}

fn build(params: &ParameterSet, note: Option<String>) -> GeometryPayload {
    let segments = params.grid_size.clamp(2, MAX_SEGMENTS) as usize;
    let iterations = f64::from(params.iterations);

    let mut vertices = Vec::with_capacity(segments * segments * 3);
    for i in 0..segments {
        for j in 0..segments {
            let u = (i as f64 / segments as f64) * PI * 2.0;
            let v = (j as f64 / segments as f64) * PI;

            let x = SPHERE_RADIUS * v.sin() * u.cos();
            let y = SPHERE_RADIUS * v.sin() * u.sin();
            let z = SPHERE_RADIUS * v.cos();

            let variation = (x * iterations).sin() * (y * iterations).cos() * VARIATION_SCALE;
            vertices.push(x + variation);
            vertices.push(y + variation);
            vertices.push(z + variation);
        }
    }

    let mut indices = Vec::with_capacity((segments - 1) * (segments - 1) * 6);
    for i in 0..segments - 1 {
        for j in 0..segments - 1 {
            let a = (i * segments + j) as u32;
            let b = (i * segments + j + 1) as u32;
            let c = ((i + 1) * segments + j) as u32;
            let d = ((i + 1) * segments + j + 1) as u32;

            indices.extend_from_slice(&[a, b, c]);
            indices.extend_from_slice(&[b, d, c]);
        }
    }

    // The reported resolution is the clamped one actually honored.
    let clamped = ParameterSet {
        grid_size: params.grid_size.min(FALLBACK_MAX_GRID),
        ..params.clone()
    };
    let mut metadata = PayloadMetadata::new(&clamped, PayloadSource::Fallback);
    metadata.note = note;

    GeometryPayload {
        triangle_count: indices.len() / 3,
        vertex_count: vertices.len() / 3,
        vertices,
        indices,
        metadata,
    }
}
