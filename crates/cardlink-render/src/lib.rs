//! Client-side frame pipeline for a split-rendered phone viewer.
//!
//! A [`Session`] owns the render-thread state machine ([`RenderOrchestrator`]) and hands out
//! [`HostHandle`]s for the UI and sensor threads. While a stream is live a [`TrackingLoop`]
//! samples head poses in the background.

pub mod config;
pub mod gl;
pub mod gpu;
pub mod orchestrator;
pub mod passthrough;
pub mod pose_math;
pub mod resources;
pub mod session;
pub mod tracking;

pub use config::{ConfigMailbox, PendingConfig, SessionConfig};
pub use gl::GlowBackend;
pub use gpu::{
    ContextGeneration, FramebufferId, GpuBackend, GpuError, GpuResult, ProgramId, QuadDraw,
    QuadProgram, RenderbufferId,
};
pub use orchestrator::{FrameOutcome, OrchestratorStats, RenderOrchestrator};
pub use passthrough::{CameraRequest, PreviewSize};
pub use resources::{RenderMode, ResourceSet, Targets};
pub use session::{Collaborators, HostHandle, Lifecycle, Session};
pub use tracking::{boot_time_ns, TrackingConfig, TrackingError, TrackingLoop};
