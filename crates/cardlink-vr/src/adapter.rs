use bytes::Bytes;
use glam::Quat;

use crate::{
    types::{
        ClientInitParams, DecodedFrame, DeviceMotion, DistortionMesh, Eye, EyeTextureDesc, Fov,
        FrameHandle, SessionEvent, StreamRenderConfig, TextureId, ViewInput, Viewport,
    },
    VrResult,
};

/// Network/session side of the streaming client. Shared between the render thread and the
/// tracking task, so every method takes `&self`.
pub trait StreamClient: Send + Sync {
    fn initialize(&self, params: &ClientInitParams) -> VrResult<()>;
    fn destroy(&self);
    fn resume(&self);
    fn pause(&self);

    fn poll_event(&self) -> Option<SessionEvent>;
    /// Length in bytes of the current HUD message.
    fn hud_message_len(&self) -> usize;
    /// Copy the current HUD message into `buf`, returning the number of bytes written.
    fn read_hud_message(&self, buf: &mut [u8]) -> usize;

    // Client -> server
    fn send_tracking(&self, target_timestamp_ns: u64, motions: &[DeviceMotion]);
    fn send_view_config(&self, fov: [Fov; 2], ipd_m: f32);
    fn send_battery(&self, device_id: u64, level: f32, plugged: bool);

    fn head_prediction_offset_ns(&self) -> u64;
    /// Non-blocking; `None` when no decoded frame is ready.
    fn poll_decoded_frame(&self) -> Option<DecodedFrame>;
    fn report_frame_consumed(&self, timestamp_ns: u64, swapchain_index: u32);
}

/// Graphics side of the streaming client. Only ever called on the render thread with the
/// graphics context current.
pub trait StreamGraphics {
    fn initialize_graphics(&mut self);
    fn destroy_graphics(&mut self);
    fn pause_graphics(&mut self);
    /// Bind the lobby targets and resume lobby/HUD rendering.
    fn resume_graphics(&mut self, view_width: u32, view_height: u32, targets: [TextureId; 2]);
    fn start_stream(&mut self, config: &StreamRenderConfig);
    fn render_stream(&mut self, frame: FrameHandle, swapchain_indices: [u32; 2]);
    fn render_lobby(&mut self, views: &[ViewInput; 2]);
    fn update_hud_message(&mut self, message: &str);
}

pub trait HeadTracker: Send + Sync {
    fn resume(&self);
    fn pause(&self);
    /// Raw tracker pose at `timestamp_ns` (boot clock): position and orientation in the
    /// tracker's own convention.
    fn pose(&self, timestamp_ns: u64) -> ([f32; 3], Quat);
}

/// Lens calibration of the currently inserted viewer.
pub trait LensCalibration {
    /// Raw half-angle tangents `[left, right, bottom, top]`.
    fn field_of_view(&self, eye: Eye) -> [f32; 4];
    /// Column-major eye-from-head transform.
    fn eye_from_head_matrix(&self, eye: Eye) -> [f32; 16];
    fn distortion_mesh(&self, eye: Eye) -> DistortionMesh;
}

pub trait DistortionRenderer {
    fn set_mesh(&mut self, mesh: &DistortionMesh, eye: Eye);
    fn render_eye_to_display(
        &mut self,
        viewport: Viewport,
        left: &EyeTextureDesc,
        right: &EyeTextureDesc,
    );
}

/// Viewer calibration storage and distortion pipeline factory.
pub trait Optics: Send + Sync {
    /// Persisted viewer parameters; empty when no viewer has been scanned yet.
    fn saved_device_params(&self) -> Bytes;
    /// Ask the user to scan a viewer code and persist the result.
    fn scan_device_params(&self);
    /// Fails with [`VrError::Calibration`](crate::VrError::Calibration) when `params` do not
    /// describe a usable viewer.
    fn create_calibration(
        &self,
        params: &[u8],
        screen_width: u32,
        screen_height: u32,
    ) -> VrResult<Box<dyn LensCalibration>>;
    fn create_distortion_renderer(&self) -> VrResult<Box<dyn DistortionRenderer>>;
}
