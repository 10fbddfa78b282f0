pub mod sidecar;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use sidecar::SidecarBackend;
pub use stub::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
