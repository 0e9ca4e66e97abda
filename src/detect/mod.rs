mod backend;
mod backends;
pub mod postprocess;
mod registry;
mod result;

pub use backend::{DetectorBackend, InferenceParams};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{run_detector, BackendRegistry, SharedDetector};
pub use result::{class_names, BoxPrediction, DetectionResult};
