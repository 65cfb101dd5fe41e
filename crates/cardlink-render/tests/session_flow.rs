//! End-to-end session scenarios against recording collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use glam::Quat;

use cardlink_common::ClientSettings;
use cardlink_render::{
    Collaborators, FrameOutcome, FramebufferId, GpuBackend, GpuError, GpuResult, PreviewSize,
    ProgramId, QuadDraw, QuadProgram, RenderMode, RenderbufferId, Session,
};
use cardlink_vr::{
    head_device_id, ClientInitParams, DecodedFrame, DeviceMotion, DistortionMesh,
    DistortionRenderer, Eye, EyeTextureDesc, FoveationParams, Fov, FrameHandle, HeadTracker,
    LensCalibration, Optics, SessionEvent, StreamClient, StreamGraphics, StreamRenderConfig,
    StreamStarted, TextureId, ViewInput, Viewport, VrError, VrResult,
};

// ---------------------------------------------------------------------------------------------
// GPU

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Texture,
    External,
    Renderbuffer,
    Framebuffer,
}

#[derive(Default)]
struct GpuLedger {
    next_id: u32,
    live: HashMap<u32, (u32, Kind, u32, u32)>,
    created: Vec<(Kind, u32, u32)>,
    bad_deletes: Vec<u32>,
    draws: Vec<Viewport>,
}

impl GpuLedger {
    fn live_count(&self) -> usize {
        self.live.len()
    }

    fn live_textures(&self, width: u32, height: u32) -> usize {
        self.live
            .values()
            .filter(|(_, kind, w, h)| *kind == Kind::Texture && *w == width && *h == height)
            .count()
    }

    /// The driver frees everything when a context dies.
    fn lose_context(&mut self, context: u32) {
        self.live.retain(|_, (ctx, ..)| *ctx != context);
    }
}

struct RecordingGpu {
    ledger: Arc<Mutex<GpuLedger>>,
    context: u32,
    broken_shaders: bool,
    no_external_textures: bool,
}

impl RecordingGpu {
    fn new(ledger: &Arc<Mutex<GpuLedger>>, context: u32) -> Self {
        Self {
            ledger: ledger.clone(),
            context,
            broken_shaders: false,
            no_external_textures: false,
        }
    }

    fn boxed(ledger: &Arc<Mutex<GpuLedger>>, context: u32) -> Box<dyn GpuBackend> {
        Box::new(Self::new(ledger, context))
    }

    fn create(&mut self, kind: Kind, width: u32, height: u32) -> u32 {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.next_id += 1;
        let id = ledger.next_id;
        ledger.live.insert(id, (self.context, kind, width, height));
        ledger.created.push((kind, width, height));
        id
    }

    fn delete(&mut self, id: u32) {
        let mut ledger = self.ledger.lock().unwrap();
        let owned = matches!(ledger.live.get(&id), Some((ctx, ..)) if *ctx == self.context);
        if owned {
            ledger.live.remove(&id);
        } else {
            ledger.bad_deletes.push(id);
        }
    }
}

impl GpuBackend for RecordingGpu {
    fn create_texture(&mut self, width: u32, height: u32) -> GpuResult<TextureId> {
        Ok(TextureId(self.create(Kind::Texture, width, height)))
    }
    fn create_external_texture(&mut self) -> GpuResult<TextureId> {
        if self.no_external_textures {
            return Err(GpuError::Allocation("GL_OES_EGL_image_external missing".into()));
        }
        Ok(TextureId(self.create(Kind::External, 0, 0)))
    }
    fn delete_texture(&mut self, texture: TextureId) {
        self.delete(texture.0);
    }
    fn create_depth_renderbuffer(&mut self, width: u32, height: u32) -> GpuResult<RenderbufferId> {
        Ok(RenderbufferId(self.create(Kind::Renderbuffer, width, height)))
    }
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.delete(renderbuffer.0);
    }
    fn create_framebuffer(
        &mut self,
        _color: TextureId,
        _depth: RenderbufferId,
    ) -> GpuResult<FramebufferId> {
        Ok(FramebufferId(self.create(Kind::Framebuffer, 0, 0)))
    }
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.delete(framebuffer.0);
    }
    fn create_quad_program(&mut self, _vs: &str, _fs: &str) -> GpuResult<QuadProgram> {
        if self.broken_shaders {
            return Err(GpuError::ShaderCompile {
                kind: "fragment",
                log: "samplerExternalOES: unknown type".into(),
            });
        }
        Ok(QuadProgram {
            program: ProgramId(1),
            position_attrib: 0,
            uv_attrib: 1,
        })
    }
    fn begin_offscreen(&mut self, _framebuffer: FramebufferId) {}
    fn draw_quad(&mut self, draw: &QuadDraw<'_>) {
        self.ledger.lock().unwrap().draws.push(draw.viewport);
    }
    fn end_offscreen(&mut self) {}
}

// ---------------------------------------------------------------------------------------------
// Stream client

#[derive(Default)]
struct ScriptedClient {
    init_params: Mutex<Option<ClientInitParams>>,
    events: Mutex<VecDeque<SessionEvent>>,
    frames: Mutex<VecDeque<DecodedFrame>>,
    hud: Mutex<String>,
    view_configs: Mutex<Vec<([Fov; 2], f32)>>,
    consumed: Mutex<Vec<(u64, u32)>>,
    battery: Mutex<Vec<(u64, f32, bool)>>,
    tracking_samples: AtomicUsize,
    lifecycle: Mutex<Vec<&'static str>>,
}

impl ScriptedClient {
    fn push_event(&self, event: SessionEvent) {
        self.events.lock().unwrap().push_back(event);
    }

    fn push_frame(&self, handle: u64, timestamp_ns: u64) {
        self.frames.lock().unwrap().push_back(DecodedFrame {
            handle: FrameHandle(handle),
            timestamp_ns,
        });
    }

    fn view_config_count(&self) -> usize {
        self.view_configs.lock().unwrap().len()
    }
}

impl StreamClient for ScriptedClient {
    fn initialize(&self, params: &ClientInitParams) -> VrResult<()> {
        *self.init_params.lock().unwrap() = Some(params.clone());
        Ok(())
    }
    fn destroy(&self) {
        self.lifecycle.lock().unwrap().push("destroy");
    }
    fn resume(&self) {
        self.lifecycle.lock().unwrap().push("resume");
    }
    fn pause(&self) {
        self.lifecycle.lock().unwrap().push("pause");
    }
    fn poll_event(&self) -> Option<SessionEvent> {
        self.events.lock().unwrap().pop_front()
    }
    fn hud_message_len(&self) -> usize {
        self.hud.lock().unwrap().len()
    }
    fn read_hud_message(&self, buf: &mut [u8]) -> usize {
        let hud = self.hud.lock().unwrap();
        let n = hud.len().min(buf.len());
        buf[..n].copy_from_slice(&hud.as_bytes()[..n]);
        n
    }
    fn send_tracking(&self, _target_timestamp_ns: u64, motions: &[DeviceMotion]) {
        assert!(motions.iter().all(|m| m.device_id == head_device_id()));
        self.tracking_samples.fetch_add(1, Ordering::SeqCst);
    }
    fn send_view_config(&self, fov: [Fov; 2], ipd_m: f32) {
        self.view_configs.lock().unwrap().push((fov, ipd_m));
    }
    fn send_battery(&self, device_id: u64, level: f32, plugged: bool) {
        self.battery.lock().unwrap().push((device_id, level, plugged));
    }
    fn head_prediction_offset_ns(&self) -> u64 {
        30_000_000
    }
    fn poll_decoded_frame(&self) -> Option<DecodedFrame> {
        self.frames.lock().unwrap().pop_front()
    }
    fn report_frame_consumed(&self, timestamp_ns: u64, swapchain_index: u32) {
        self.consumed
            .lock()
            .unwrap()
            .push((timestamp_ns, swapchain_index));
    }
}

// ---------------------------------------------------------------------------------------------
// Graphics, tracker, optics

#[derive(Default)]
struct GraphicsLog {
    initialized: usize,
    destroyed: usize,
    paused: usize,
    resumed: Vec<(u32, u32, [TextureId; 2])>,
    streams: Vec<StreamRenderConfig>,
    stream_renders: Vec<(FrameHandle, [u32; 2])>,
    lobby_frames: Vec<[ViewInput; 2]>,
    hud: Vec<String>,
}

struct RecordingGraphics(Arc<Mutex<GraphicsLog>>);

impl StreamGraphics for RecordingGraphics {
    fn initialize_graphics(&mut self) {
        self.0.lock().unwrap().initialized += 1;
    }
    fn destroy_graphics(&mut self) {
        self.0.lock().unwrap().destroyed += 1;
    }
    fn pause_graphics(&mut self) {
        self.0.lock().unwrap().paused += 1;
    }
    fn resume_graphics(&mut self, view_width: u32, view_height: u32, targets: [TextureId; 2]) {
        self.0
            .lock()
            .unwrap()
            .resumed
            .push((view_width, view_height, targets));
    }
    fn start_stream(&mut self, config: &StreamRenderConfig) {
        self.0.lock().unwrap().streams.push(*config);
    }
    fn render_stream(&mut self, frame: FrameHandle, swapchain_indices: [u32; 2]) {
        self.0
            .lock()
            .unwrap()
            .stream_renders
            .push((frame, swapchain_indices));
    }
    fn render_lobby(&mut self, views: &[ViewInput; 2]) {
        self.0.lock().unwrap().lobby_frames.push(*views);
    }
    fn update_hud_message(&mut self, message: &str) {
        self.0.lock().unwrap().hud.push(message.to_string());
    }
}

struct StillTracker;

impl HeadTracker for StillTracker {
    fn resume(&self) {}
    fn pause(&self) {}
    fn pose(&self, _timestamp_ns: u64) -> ([f32; 3], Quat) {
        ([0.0; 3], Quat::IDENTITY)
    }
}

struct FixedCalibration;

impl LensCalibration for FixedCalibration {
    fn field_of_view(&self, _eye: Eye) -> [f32; 4] {
        [-0.9, 1.0, -0.8, 1.1]
    }
    fn eye_from_head_matrix(&self, eye: Eye) -> [f32; 16] {
        let mut m = [0.0; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        m[12] = if eye == Eye::Left { 0.032 } else { -0.032 };
        m
    }
    fn distortion_mesh(&self, _eye: Eye) -> DistortionMesh {
        DistortionMesh::default()
    }
}

type Composite = (Viewport, EyeTextureDesc, EyeTextureDesc);

struct RecordingDistortion(Arc<Mutex<Vec<Composite>>>);

impl DistortionRenderer for RecordingDistortion {
    fn set_mesh(&mut self, _mesh: &DistortionMesh, _eye: Eye) {}
    fn render_eye_to_display(
        &mut self,
        viewport: Viewport,
        left: &EyeTextureDesc,
        right: &EyeTextureDesc,
    ) {
        self.0.lock().unwrap().push((viewport, *left, *right));
    }
}

#[derive(Default)]
struct ScriptedOptics {
    params: Mutex<Bytes>,
    scans: AtomicUsize,
    composites: Arc<Mutex<Vec<Composite>>>,
}

impl ScriptedOptics {
    fn with_params() -> Self {
        let optics = Self::default();
        *optics.params.lock().unwrap() = Bytes::from_static(b"viewer-params");
        optics
    }
}

impl Optics for ScriptedOptics {
    fn saved_device_params(&self) -> Bytes {
        self.params.lock().unwrap().clone()
    }
    fn scan_device_params(&self) {
        self.scans.fetch_add(1, Ordering::SeqCst);
    }
    fn create_calibration(
        &self,
        params: &[u8],
        _screen_width: u32,
        _screen_height: u32,
    ) -> VrResult<Box<dyn LensCalibration>> {
        assert!(!params.is_empty());
        if params == b"garbled" {
            return Err(VrError::Calibration("unreadable viewer profile".into()));
        }
        Ok(Box::new(FixedCalibration))
    }
    fn create_distortion_renderer(&self) -> VrResult<Box<dyn DistortionRenderer>> {
        Ok(Box::new(RecordingDistortion(self.composites.clone())))
    }
}

// ---------------------------------------------------------------------------------------------

struct Harness {
    session: Session,
    client: Arc<ScriptedClient>,
    optics: Arc<ScriptedOptics>,
    graphics: Arc<Mutex<GraphicsLog>>,
    ledger: Arc<Mutex<GpuLedger>>,
}

impl Harness {
    fn new(optics: ScriptedOptics) -> Self {
        let client = Arc::new(ScriptedClient::default());
        let optics = Arc::new(optics);
        let graphics = Arc::new(Mutex::new(GraphicsLog::default()));
        let session = Session::init(
            Collaborators {
                client: client.clone(),
                tracker: Arc::new(StillTracker),
                optics: optics.clone(),
                graphics: Box::new(RecordingGraphics(graphics.clone())),
            },
            1920,
            1080,
            ClientSettings::default(),
        )
        .unwrap();
        Self {
            session,
            client,
            optics,
            graphics,
            ledger: Arc::new(Mutex::new(GpuLedger::default())),
        }
    }

    fn running(optics: ScriptedOptics) -> Self {
        let mut harness = Self::new(optics);
        harness.session.resume();
        harness
            .session
            .surface_created(RecordingGpu::boxed(&harness.ledger, 1))
            .unwrap();
        harness
    }

    fn start_stream(&self, width: u32, height: u32) {
        self.client
            .push_event(SessionEvent::StreamStarted(StreamStarted {
                view_width: width,
                view_height: height,
                foveation: FoveationParams::default(),
            }));
    }
}

#[test]
fn test_init_reports_half_screen_view() {
    let harness = Harness::new(ScriptedOptics::with_params());
    let params = harness.client.init_params.lock().unwrap().clone().unwrap();
    assert_eq!((params.view_width, params.view_height), (960, 1080));
    assert_eq!(params.refresh_rates, vec![60.0]);
}

#[test]
fn test_stream_lifecycle_end_to_end() {
    let mut h = Harness::running(ScriptedOptics::with_params());

    assert_eq!(h.session.render(), FrameOutcome::Presented(RenderMode::Lobby));
    assert_eq!(h.client.view_config_count(), 1);
    {
        let graphics = h.graphics.lock().unwrap();
        assert_eq!(graphics.resumed.len(), 1);
        assert_eq!((graphics.resumed[0].0, graphics.resumed[0].1), (960, 1080));
        assert_eq!(graphics.paused, 0);
        assert_eq!(graphics.lobby_frames.len(), 1);
    }
    assert_eq!(h.ledger.lock().unwrap().live_textures(960, 1080), 2);

    h.start_stream(1280, 720);
    // No decoded frame yet: targets and tracking are up, nothing is presented.
    assert_eq!(h.session.render(), FrameOutcome::NoFrameReady);
    let orchestrator = h.session.orchestrator();
    assert!(orchestrator.is_streaming());
    assert!(orchestrator.is_tracking());
    assert_eq!(orchestrator.render_mode(), RenderMode::Streaming);
    let stream_textures = orchestrator.stream_targets().unwrap().eye_textures();
    assert_eq!(orchestrator.stream_targets().unwrap().size(), (1280, 720));
    assert_eq!(h.ledger.lock().unwrap().live_textures(1280, 720), 2);
    assert_eq!(h.client.view_config_count(), 2);
    {
        let graphics = h.graphics.lock().unwrap();
        assert_eq!(graphics.streams.len(), 1);
        assert_eq!(graphics.streams[0].swapchain_length, 1);
        assert_eq!(graphics.streams[0].eye_textures, stream_textures);
    }

    h.client.push_frame(7, 1234);
    assert_eq!(
        h.session.render(),
        FrameOutcome::Presented(RenderMode::Streaming)
    );
    assert_eq!(*h.client.consumed.lock().unwrap(), vec![(1234, 0)]);
    assert_eq!(
        h.graphics.lock().unwrap().stream_renders,
        vec![(FrameHandle(7), [0, 0])]
    );
    let (_, left, right) = *h.optics.composites.lock().unwrap().last().unwrap();
    assert_eq!([left.texture, right.texture], stream_textures);

    thread::sleep(Duration::from_millis(30));
    assert!(h.client.tracking_samples.load(Ordering::SeqCst) > 0);

    h.client.push_event(SessionEvent::StreamStopped);
    assert_eq!(h.session.render(), FrameOutcome::Presented(RenderMode::Lobby));
    let orchestrator = h.session.orchestrator();
    assert!(!orchestrator.is_streaming());
    assert!(!orchestrator.is_tracking());
    assert!(orchestrator.stream_targets().is_none());
    assert_eq!(orchestrator.stats().tracking_starts, 1);
    assert_eq!(orchestrator.stats().tracking_stops, 1);
    assert_eq!(h.ledger.lock().unwrap().live_textures(1280, 720), 0);

    let after_stop = h.client.tracking_samples.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(h.client.tracking_samples.load(Ordering::SeqCst), after_stop);
}

#[test]
fn test_every_allocation_is_released_once() {
    let mut h = Harness::running(ScriptedOptics::with_params());
    let host = h.session.host();

    h.session.render();
    host.set_passthrough_active(true);
    h.session.render();
    h.start_stream(1280, 720);
    h.session.render();
    host.set_passthrough_active(false);
    h.client.push_frame(1, 10);
    h.session.render();
    h.client.push_event(SessionEvent::StreamStopped);
    h.session.render();
    host.set_screen_resolution(2400, 1080);
    h.session.render();

    let graphics = h.graphics.clone();
    let ledger = h.ledger.clone();
    h.session.destroy();

    let ledger = ledger.lock().unwrap();
    assert!(ledger.bad_deletes.is_empty(), "{:?}", ledger.bad_deletes);
    assert_eq!(ledger.live_count(), 0);
    assert_eq!(graphics.lock().unwrap().destroyed, 1);
}

#[test]
fn test_empty_calibration_skips_frames() {
    let mut h = Harness::new(ScriptedOptics::default());
    h.session.resume();
    assert_eq!(h.optics.scans.load(Ordering::SeqCst), 1);
    h.session
        .surface_created(RecordingGpu::boxed(&h.ledger, 1))
        .unwrap();

    for _ in 0..3 {
        assert_eq!(h.session.render(), FrameOutcome::AwaitingCalibration);
    }
    assert_eq!(h.client.view_config_count(), 0);
    assert!(h.optics.composites.lock().unwrap().is_empty());
    // only the camera texture exists
    assert_eq!(h.ledger.lock().unwrap().live_count(), 1);

    *h.optics.params.lock().unwrap() = Bytes::from_static(b"scanned");
    assert_eq!(h.session.render(), FrameOutcome::Presented(RenderMode::Lobby));
    assert_eq!(h.client.view_config_count(), 1);
}

#[test]
fn test_view_config_matches_calibration() {
    let mut h = Harness::running(ScriptedOptics::with_params());
    h.session.render();
    let (fov, ipd) = h.client.view_configs.lock().unwrap()[0];
    assert!((ipd - 0.064).abs() < 1e-6);
    for eye in fov {
        assert_eq!((eye.left, eye.right, eye.up, eye.down), (0.9, 1.0, 1.1, 0.8));
    }
    let lobby = h.graphics.lock().unwrap().lobby_frames[0];
    assert!((lobby[0].position.x + 0.032).abs() < 1e-6);
    assert!((lobby[0].position.y - 1.5).abs() < 1e-6);
}

#[test]
fn test_passthrough_renders_side_by_side() {
    let mut h = Harness::running(ScriptedOptics::with_params());
    let host = h.session.host();
    h.session.render();

    host.set_passthrough_active(true);
    assert_eq!(
        h.session.render(),
        FrameOutcome::Presented(RenderMode::Passthrough)
    );
    assert_eq!(h.graphics.lock().unwrap().paused, 1);
    {
        let ledger = h.ledger.lock().unwrap();
        assert_eq!(ledger.live_textures(960, 1080), 0);
        assert_eq!(ledger.live_textures(1920, 1080), 1);
        assert_eq!(
            ledger.draws,
            vec![
                Viewport { x: 0, y: 0, width: 960, height: 1080 },
                Viewport { x: 960, y: 0, width: 960, height: 1080 },
            ]
        );
    }
    let (viewport, left, right) = *h.optics.composites.lock().unwrap().last().unwrap();
    assert_eq!((viewport.width, viewport.height), (1920, 1080));
    assert_eq!(left.texture, right.texture);
    assert_eq!((left.left_u, left.right_u), (0.0, 0.5));
    assert_eq!((right.left_u, right.right_u), (0.5, 1.0));

    // Resizing the plane keeps the targets.
    let created = h.ledger.lock().unwrap().created.len();
    host.set_passthrough_size(0.25);
    h.session.render();
    assert_eq!(h.ledger.lock().unwrap().created.len(), created);
    let surface = h.session.orchestrator().passthrough_surface().unwrap();
    assert_eq!(surface.plane_size(), 0.25);
    assert_eq!(surface.vertices()[0], -0.25);
}

#[test]
fn test_passthrough_wins_over_live_stream() {
    let mut h = Harness::running(ScriptedOptics::with_params());
    let host = h.session.host();
    h.session.render();
    h.start_stream(1280, 720);
    h.session.render();

    host.set_passthrough_active(true);
    h.client.push_frame(3, 99);
    assert_eq!(
        h.session.render(),
        FrameOutcome::Presented(RenderMode::Passthrough)
    );
    // Tracking follows stream liveness, not the visible mode: the stream stays live
    // underneath passthrough and keeps receiving head poses.
    assert!(h.session.orchestrator().is_tracking());
    assert!(h.client.consumed.lock().unwrap().is_empty());

    host.set_passthrough_active(false);
    assert_eq!(
        h.session.render(),
        FrameOutcome::Presented(RenderMode::Streaming)
    );
    assert_eq!(*h.client.consumed.lock().unwrap(), vec![(99, 0)]);
    h.session.destroy();
}

#[test]
fn test_context_recreate_never_deletes_stale_handles() {
    let mut h = Harness::running(ScriptedOptics::with_params());
    h.session.render();
    let first_generation = h.session.orchestrator().generation();

    h.ledger.lock().unwrap().lose_context(1);
    h.session
        .surface_created(RecordingGpu::boxed(&h.ledger, 2))
        .unwrap();
    assert_eq!(h.session.render(), FrameOutcome::Presented(RenderMode::Lobby));

    assert!(h.session.orchestrator().generation() > first_generation);
    assert!(h.ledger.lock().unwrap().bad_deletes.is_empty());
    let graphics = h.graphics.lock().unwrap();
    assert_eq!(graphics.paused, 0);
    assert_eq!(graphics.initialized, 2);
    assert_eq!(graphics.resumed.len(), 2);
}

#[test]
fn test_context_recreate_during_stream_rebuilds_stream_targets() {
    let mut h = Harness::running(ScriptedOptics::with_params());
    h.session.render();
    h.start_stream(1280, 720);
    h.client.push_frame(1, 10);
    assert_eq!(
        h.session.render(),
        FrameOutcome::Presented(RenderMode::Streaming)
    );
    let old_textures = h
        .session
        .orchestrator()
        .stream_targets()
        .unwrap()
        .eye_textures();

    h.ledger.lock().unwrap().lose_context(1);
    h.session
        .surface_created(RecordingGpu::boxed(&h.ledger, 2))
        .unwrap();
    h.client.push_frame(2, 20);
    assert_eq!(
        h.session.render(),
        FrameOutcome::Presented(RenderMode::Streaming)
    );

    let orchestrator = h.session.orchestrator();
    assert!(orchestrator.is_streaming());
    assert!(orchestrator.is_tracking());
    assert_eq!(orchestrator.stats().tracking_starts, 1);
    let targets = orchestrator.stream_targets().unwrap();
    assert_eq!(targets.generation(), orchestrator.generation());
    assert_eq!(targets.size(), (1280, 720));
    let new_textures = targets.eye_textures();
    assert_ne!(new_textures, old_textures);
    {
        let ledger = h.ledger.lock().unwrap();
        for texture in new_textures {
            assert_eq!(
                ledger.live.get(&texture.0),
                Some(&(2, Kind::Texture, 1280, 720))
            );
        }
        assert!(ledger.bad_deletes.is_empty(), "{:?}", ledger.bad_deletes);
    }
    let (_, left, right) = *h.optics.composites.lock().unwrap().last().unwrap();
    assert_eq!([left.texture, right.texture], new_textures);
    {
        let graphics = h.graphics.lock().unwrap();
        assert_eq!(graphics.streams.len(), 2);
        assert_eq!(graphics.streams[1].eye_textures, new_textures);
        assert_eq!(
            (graphics.streams[1].view_width, graphics.streams[1].view_height),
            (1280, 720)
        );
    }

    let ledger = h.ledger.clone();
    h.session.destroy();
    let ledger = ledger.lock().unwrap();
    assert!(ledger.bad_deletes.is_empty(), "{:?}", ledger.bad_deletes);
    assert_eq!(ledger.live_count(), 0);
}

#[test]
fn test_failed_surface_creation_forgets_old_context() {
    let mut h = Harness::running(ScriptedOptics::with_params());
    h.session.render();
    let first_generation = h.session.orchestrator().generation();

    h.ledger.lock().unwrap().lose_context(1);
    let broken = RecordingGpu {
        no_external_textures: true,
        ..RecordingGpu::new(&h.ledger, 2)
    };
    assert!(h.session.surface_created(Box::new(broken)).is_err());
    assert!(h.session.orchestrator().generation() > first_generation);
    assert!(h.session.orchestrator().base_targets().is_none());
    assert!(h.session.orchestrator().passthrough_surface().is_none());
    assert_eq!(h.session.render(), FrameOutcome::NoSurface);

    h.session
        .surface_created(RecordingGpu::boxed(&h.ledger, 3))
        .unwrap();
    assert_eq!(h.session.render(), FrameOutcome::Presented(RenderMode::Lobby));

    let ledger = h.ledger.clone();
    h.session.destroy();
    let ledger = ledger.lock().unwrap();
    assert!(ledger.bad_deletes.is_empty(), "{:?}", ledger.bad_deletes);
    assert_eq!(ledger.live_count(), 0);
}

#[test]
fn test_shader_failure_keeps_passthrough_mode() {
    let mut h = Harness::new(ScriptedOptics::with_params());
    h.session.resume();
    let gpu = RecordingGpu {
        broken_shaders: true,
        ..RecordingGpu::new(&h.ledger, 1)
    };
    h.session.surface_created(Box::new(gpu)).unwrap();
    let surface = h.session.orchestrator().passthrough_surface().unwrap();
    assert!(!surface.has_program());
    assert!(surface.program_error().unwrap().contains("fragment"));

    assert_eq!(h.session.render(), FrameOutcome::Presented(RenderMode::Lobby));
    h.session.host().set_passthrough_active(true);
    for _ in 0..2 {
        assert_eq!(
            h.session.render(),
            FrameOutcome::Presented(RenderMode::Passthrough)
        );
    }

    let orchestrator = h.session.orchestrator();
    assert_eq!(orchestrator.render_mode(), RenderMode::Passthrough);
    let base = orchestrator.base_targets().unwrap();
    assert_eq!(base.mode(), RenderMode::Passthrough);
    assert_eq!(base.size(), (1920, 1080));
    assert!(h.ledger.lock().unwrap().draws.is_empty());
    let (_, left, right) = *h.optics.composites.lock().unwrap().last().unwrap();
    assert_eq!(left.texture, base.eye_textures()[0]);
    assert_eq!(right.texture, base.eye_textures()[0]);
}

#[test]
fn test_rejected_viewer_params_wait_for_rescan() {
    let optics = ScriptedOptics::default();
    *optics.params.lock().unwrap() = Bytes::from_static(b"garbled");
    let mut h = Harness::running(optics);

    for _ in 0..2 {
        assert_eq!(h.session.render(), FrameOutcome::AwaitingCalibration);
    }
    assert_eq!(h.client.view_config_count(), 0);

    *h.optics.params.lock().unwrap() = Bytes::from_static(b"rescanned");
    assert_eq!(h.session.render(), FrameOutcome::Presented(RenderMode::Lobby));
    assert_eq!(h.client.view_config_count(), 1);
}

#[test]
fn test_repeated_stream_started_restarts_cleanly() {
    let mut h = Harness::running(ScriptedOptics::with_params());
    h.session.render();
    h.start_stream(1280, 720);
    h.session.render();
    h.start_stream(1600, 900);
    h.session.render();

    let orchestrator = h.session.orchestrator();
    assert_eq!(orchestrator.stream_targets().unwrap().size(), (1600, 900));
    assert_eq!(orchestrator.stats().tracking_starts, 2);
    assert_eq!(orchestrator.stats().tracking_stops, 1);
    let ledger = h.ledger.lock().unwrap();
    assert_eq!(ledger.live_textures(1280, 720), 0);
    assert_eq!(ledger.live_textures(1600, 900), 2);
}

#[test]
fn test_stream_stopped_while_idle_is_ignored() {
    let mut h = Harness::running(ScriptedOptics::with_params());
    h.client.push_event(SessionEvent::StreamStopped);
    assert_eq!(h.session.render(), FrameOutcome::Presented(RenderMode::Lobby));
    assert_eq!(h.session.orchestrator().stats().tracking_stops, 0);
    assert!(h.ledger.lock().unwrap().bad_deletes.is_empty());
}

#[test]
fn test_hud_message_is_forwarded() {
    let mut h = Harness::running(ScriptedOptics::with_params());
    *h.client.hud.lock().unwrap() = "Searching for streamer...".to_string();
    h.client.push_event(SessionEvent::HudMessageUpdated);
    h.session.render();
    assert_eq!(
        h.graphics.lock().unwrap().hud,
        vec!["Searching for streamer...".to_string()]
    );
}

#[test]
fn test_host_handle_side_channels() {
    let mut h = Harness::running(ScriptedOptics::with_params());
    let host = h.session.host();

    host.send_battery_level(0.42, true);
    assert_eq!(
        *h.client.battery.lock().unwrap(),
        vec![(head_device_id(), 0.42, true)]
    );

    h.session.render();
    host.switch_viewer();
    assert_eq!(h.optics.scans.load(Ordering::SeqCst), 1);
    h.session.render();
    assert_eq!(h.client.view_config_count(), 2);

    h.session.pause();
    assert_eq!(*h.client.lifecycle.lock().unwrap(), vec!["resume", "pause"]);
}

#[test]
fn test_camera_request_follows_screen() {
    let h = Harness::running(ScriptedOptics::with_params());
    let host = h.session.host();
    let choices = [
        PreviewSize::new(1920, 1080),
        PreviewSize::new(1280, 960),
        PreviewSize::new(640, 480),
    ];

    let request = host.camera_request(&choices).unwrap();
    assert_eq!(request.size, PreviewSize::new(1280, 960));
    assert!(request.recording_hint);

    host.set_screen_resolution(800, 480);
    let request = host.camera_request(&choices).unwrap();
    assert_eq!(request.size, PreviewSize::new(640, 480));
    assert!(host.camera_request(&[]).is_none());
}

#[test]
fn test_double_tap_toggles_passthrough() {
    let h = Harness::running(ScriptedOptics::with_params());
    let host = h.session.host();

    let rest = [0.0, 9.81, 0.0];
    let tap = [2.5, 9.81, 0.0];
    let mut samples = vec![rest; 20];
    samples.push(tap);
    samples.extend([rest; 3]);
    samples.push(tap);
    samples.extend([rest; 40]);

    let fired = samples
        .iter()
        .enumerate()
        .filter(|(i, s)| host.on_accelerometer(1 + *i as u64 * 50_000_000, **s))
        .count();
    assert_eq!(fired, 1);
    assert!(host.config().passthrough);
}
