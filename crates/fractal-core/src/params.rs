use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_ITERATIONS: u32 = 6;
pub const DEFAULT_JULIA_C: [f64; 4] = [-0.2, 0.8, 0.0, 0.0];
pub const DEFAULT_GRID_SIZE: u32 = 60;

/// Inputs for one quaternion Julia surface generation.
///
/// Immutable value with structural equality; a parameter change builds
/// a new set rather than mutating an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub iterations: u32,
    pub c: [f64; 4],
    #[serde(rename = "gridSize")]
    pub grid_size: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("iterations must be at least 1")]
    ZeroIterations,
    #[error("grid resolution must be at least 1")]
    ZeroGridSize,
    #[error("quaternion component {0} is not finite")]
    NonFiniteComponent(usize),
}

impl ParameterSet {
    pub fn new(iterations: u32, c: [f64; 4], grid_size: u32) -> Self {
        Self {
            iterations,
            c,
            grid_size,
        }
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.iterations == 0 {
            return Err(ParameterError::ZeroIterations);
        }
        if self.grid_size == 0 {
            return Err(ParameterError::ZeroGridSize);
        }
        for (index, component) in self.c.iter().enumerate() {
            if !component.is_finite() {
                return Err(ParameterError::NonFiniteComponent(index));
            }
        }
        Ok(())
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            c: DEFAULT_JULIA_C,
            grid_size: DEFAULT_GRID_SIZE,
        }
    }
}
