#![forbid(unsafe_code)]

pub mod adapter;
pub mod types;

pub use adapter::{
    DistortionRenderer, HeadTracker, LensCalibration, Optics, StreamClient, StreamGraphics,
};
pub use types::{
    head_device_id, path_to_id, ClientInitParams, DecodedFrame, DeviceMotion, DistortionMesh, Eye,
    EyeTextureDesc, FoveationParams, Fov, FrameHandle, Pose, SessionEvent, StreamRenderConfig,
    StreamStarted, TextureId, ViewConfig, ViewInput, Viewport, HEAD_PATH,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VrError {
    #[error("collaborator error: {0}")]
    Adapter(String),
    #[error("lens calibration error: {0}")]
    Calibration(String),
}

pub type VrResult<T> = Result<T, VrError>;
