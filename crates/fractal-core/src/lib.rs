pub mod fallback;
pub mod params;
pub mod payload;

pub use fallback::{generate_fallback, generate_fallback_with_note, FALLBACK_MAX_GRID};
pub use params::{
    ParameterError, ParameterSet, DEFAULT_GRID_SIZE, DEFAULT_ITERATIONS, DEFAULT_JULIA_C,
};
pub use payload::{GeometryPayload, PayloadError, PayloadMetadata, PayloadSource};
