mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ScriptedBackend, SidecarBackend};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{suppress_overlaps, BoundingBox, DetectParams, DetectionBox};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
