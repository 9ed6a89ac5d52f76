pub mod coordinator;
pub mod error;
pub mod invoker;
pub mod service;

pub use coordinator::SingleFlight;
pub use error::GenerateError;
pub use invoker::{ComputeInvoker, DEFAULT_TIMEOUT, SIDE_FILE, STEP_SIZE};
pub use service::{BusyPolicy, GenerationService};
