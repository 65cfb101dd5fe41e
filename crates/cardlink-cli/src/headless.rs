//! In-process stand-ins for the device collaborators, used by `cardlink simulate` and
//! `fov`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use glam::Quat;

use cardlink_render::{
    FramebufferId, GpuBackend, GpuResult, ProgramId, QuadDraw, QuadProgram, RenderbufferId,
};
use cardlink_vr::{
    ClientInitParams, DecodedFrame, DeviceMotion, DistortionMesh, DistortionRenderer, Eye,
    EyeTextureDesc, FoveationParams, Fov, FrameHandle, HeadTracker, LensCalibration, Optics,
    SessionEvent, StreamClient, StreamGraphics, StreamRenderConfig, StreamStarted, TextureId,
    ViewInput, Viewport, VrError, VrResult,
};

/// Handle bookkeeping only; nothing is drawn.
#[derive(Debug, Default)]
pub struct HeadlessGpu {
    next: u32,
    live: usize,
    draws: usize,
}

impl HeadlessGpu {
    fn alloc(&mut self) -> u32 {
        self.next += 1;
        self.live += 1;
        self.next
    }

    fn free(&mut self) {
        self.live = self.live.saturating_sub(1);
    }
}

impl GpuBackend for HeadlessGpu {
    fn create_texture(&mut self, _width: u32, _height: u32) -> GpuResult<TextureId> {
        Ok(TextureId(self.alloc()))
    }
    fn create_external_texture(&mut self) -> GpuResult<TextureId> {
        Ok(TextureId(self.alloc()))
    }
    fn delete_texture(&mut self, _texture: TextureId) {
        self.free();
    }
    fn create_depth_renderbuffer(
        &mut self,
        _width: u32,
        _height: u32,
    ) -> GpuResult<RenderbufferId> {
        Ok(RenderbufferId(self.alloc()))
    }
    fn delete_renderbuffer(&mut self, _renderbuffer: RenderbufferId) {
        self.free();
    }
    fn create_framebuffer(
        &mut self,
        _color: TextureId,
        _depth: RenderbufferId,
    ) -> GpuResult<FramebufferId> {
        Ok(FramebufferId(self.alloc()))
    }
    fn delete_framebuffer(&mut self, _framebuffer: FramebufferId) {
        self.free();
    }
    fn create_quad_program(&mut self, _vs: &str, _fs: &str) -> GpuResult<QuadProgram> {
        Ok(QuadProgram {
            program: ProgramId(self.alloc()),
            position_attrib: 0,
            uv_attrib: 1,
        })
    }
    fn begin_offscreen(&mut self, _framebuffer: FramebufferId) {}
    fn draw_quad(&mut self, _draw: &QuadDraw<'_>) {
        self.draws += 1;
    }
    fn end_offscreen(&mut self) {}
}

impl Drop for HeadlessGpu {
    fn drop(&mut self) {
        // the quad program is never deleted
        tracing::debug!(live = self.live, draws = self.draws, "headless gpu dropped");
    }
}

/// Stream client that serves a stream locally once [`LoopbackClient::begin_stream`] is called.
#[derive(Default)]
pub struct LoopbackClient {
    view: Mutex<(u32, u32)>,
    events: Mutex<VecDeque<SessionEvent>>,
    streaming: AtomicBool,
    next_frame: AtomicU64,
    frames_consumed: AtomicU64,
    tracking_samples: AtomicU64,
    view_configs: AtomicUsize,
}

impl LoopbackClient {
    pub fn begin_stream(&self) {
        let (view_width, view_height) = *self.view.lock().unwrap_or_else(|p| p.into_inner());
        self.streaming.store(true, Ordering::Release);
        self.push(SessionEvent::StreamStarted(StreamStarted {
            view_width,
            view_height,
            foveation: FoveationParams::default(),
        }));
    }

    pub fn end_stream(&self) {
        self.streaming.store(false, Ordering::Release);
        self.push(SessionEvent::StreamStopped);
    }

    pub fn tracking_samples(&self) -> u64 {
        self.tracking_samples.load(Ordering::Relaxed)
    }

    pub fn frames_consumed(&self) -> u64 {
        self.frames_consumed.load(Ordering::Relaxed)
    }

    pub fn view_configs_sent(&self) -> usize {
        self.view_configs.load(Ordering::Relaxed)
    }

    fn push(&self, event: SessionEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(event);
    }
}

impl StreamClient for LoopbackClient {
    fn initialize(&self, params: &ClientInitParams) -> VrResult<()> {
        if params.view_width == 0 || params.view_height == 0 {
            return Err(VrError::Adapter(format!(
                "invalid view size {}x{}",
                params.view_width, params.view_height
            )));
        }
        *self.view.lock().unwrap_or_else(|p| p.into_inner()) =
            (params.view_width, params.view_height);
        Ok(())
    }
    fn destroy(&self) {}
    fn resume(&self) {}
    fn pause(&self) {}
    fn poll_event(&self) -> Option<SessionEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).pop_front()
    }
    fn hud_message_len(&self) -> usize {
        0
    }
    fn read_hud_message(&self, _buf: &mut [u8]) -> usize {
        0
    }
    fn send_tracking(&self, _target_timestamp_ns: u64, motions: &[DeviceMotion]) {
        self.tracking_samples
            .fetch_add(motions.len() as u64, Ordering::Relaxed);
    }
    fn send_view_config(&self, fov: [Fov; 2], ipd_m: f32) {
        tracing::debug!(?fov, ipd_m, "view config received");
        self.view_configs.fetch_add(1, Ordering::Relaxed);
    }
    fn send_battery(&self, device_id: u64, level: f32, plugged: bool) {
        tracing::debug!(device_id, level, plugged, "battery received");
    }
    fn head_prediction_offset_ns(&self) -> u64 {
        50_000_000
    }
    fn poll_decoded_frame(&self) -> Option<DecodedFrame> {
        if !self.streaming.load(Ordering::Acquire) {
            return None;
        }
        let n = self.next_frame.fetch_add(1, Ordering::Relaxed);
        Some(DecodedFrame {
            handle: FrameHandle(n),
            timestamp_ns: cardlink_render::boot_time_ns(),
        })
    }
    fn report_frame_consumed(&self, _timestamp_ns: u64, _swapchain_index: u32) {
        self.frames_consumed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct NullGraphics;

impl StreamGraphics for NullGraphics {
    fn initialize_graphics(&mut self) {}
    fn destroy_graphics(&mut self) {}
    fn pause_graphics(&mut self) {}
    fn resume_graphics(&mut self, _w: u32, _h: u32, _targets: [TextureId; 2]) {}
    fn start_stream(&mut self, config: &StreamRenderConfig) {
        tracing::debug!(?config, "stream render config");
    }
    fn render_stream(&mut self, _frame: FrameHandle, _swapchain_indices: [u32; 2]) {}
    fn render_lobby(&mut self, _views: &[ViewInput; 2]) {}
    fn update_hud_message(&mut self, message: &str) {
        tracing::info!(%message, "HUD");
    }
}

/// Tracker holding a constant yaw.
pub struct ConstantTracker(pub Quat);

impl HeadTracker for ConstantTracker {
    fn resume(&self) {}
    fn pause(&self) {}
    fn pose(&self, _timestamp_ns: u64) -> ([f32; 3], Quat) {
        ([0.0; 3], self.0)
    }
}

/// Lens profile of a generic 40 degree viewer with 64 mm between lens centres.
pub struct ReferenceLens;

const TAN_40: f32 = 0.839_099_6;

impl LensCalibration for ReferenceLens {
    fn field_of_view(&self, _eye: Eye) -> [f32; 4] {
        [-TAN_40, TAN_40, -TAN_40, TAN_40]
    }

    fn eye_from_head_matrix(&self, eye: Eye) -> [f32; 16] {
        let mut m = [0.0; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        m[12] = match eye {
            Eye::Left => 0.032,
            Eye::Right => -0.032,
        };
        m
    }

    fn distortion_mesh(&self, _eye: Eye) -> DistortionMesh {
        DistortionMesh {
            vertices: vec![-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0],
            uvs: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            indices: vec![0, 1, 2, 2, 1, 3],
        }
    }
}

#[derive(Default)]
pub struct CountingDistortion;

impl DistortionRenderer for CountingDistortion {
    fn set_mesh(&mut self, mesh: &DistortionMesh, eye: Eye) {
        tracing::debug!(?eye, triangles = mesh.indices.len() / 3, "distortion mesh set");
    }
    fn render_eye_to_display(
        &mut self,
        _viewport: Viewport,
        _left: &EyeTextureDesc,
        _right: &EyeTextureDesc,
    ) {
    }
}

const REFERENCE_PROFILE: &[u8] = b"cardlink-reference-viewer";

pub struct ReferenceOptics {
    params: Bytes,
}

impl Default for ReferenceOptics {
    fn default() -> Self {
        Self {
            params: Bytes::from_static(REFERENCE_PROFILE),
        }
    }
}

impl Optics for ReferenceOptics {
    fn saved_device_params(&self) -> Bytes {
        self.params.clone()
    }
    fn scan_device_params(&self) {
        tracing::info!("viewer already configured, nothing to scan");
    }
    fn create_calibration(
        &self,
        params: &[u8],
        _screen_width: u32,
        _screen_height: u32,
    ) -> VrResult<Box<dyn LensCalibration>> {
        if params != REFERENCE_PROFILE {
            return Err(VrError::Calibration(format!(
                "unknown viewer profile ({} bytes)",
                params.len()
            )));
        }
        Ok(Box::new(ReferenceLens))
    }
    fn create_distortion_renderer(&self) -> VrResult<Box<dyn DistortionRenderer>> {
        Ok(Box::new(CountingDistortion))
    }
}
