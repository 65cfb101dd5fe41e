//! Per-refresh render state machine.
//!
//! Every display refresh runs, in order: apply pending configuration, transition render
//! targets, drain session events, render the active view, composite to the display. All of
//! it happens on the thread that owns the graphics context.

use std::sync::Arc;

use cardlink_common::ClientSettings;
use cardlink_vr::{
    DistortionRenderer, Eye, EyeTextureDesc, HeadTracker, LensCalibration, Optics, SessionEvent,
    StreamClient, StreamGraphics, StreamRenderConfig, StreamStarted, TextureId, ViewConfig,
    Viewport, VrError,
};

use crate::config::{ConfigMailbox, SessionConfig};
use crate::gpu::{ContextGeneration, GpuBackend, GpuResult};
use crate::passthrough::PassthroughSurface;
use crate::pose_math;
use crate::resources::{RenderMode, ResourceSet};
use crate::tracking::{boot_time_ns, TrackingConfig, TrackingLoop};

/// What a single refresh ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No graphics surface yet.
    NoSurface,
    /// No viewer calibration available; nothing rendered until one is scanned.
    AwaitingCalibration,
    /// Streaming, but the client had no decoded frame for this refresh.
    NoFrameReady,
    /// The view for this mode could not be produced; see the log.
    Skipped(RenderMode),
    Presented(RenderMode),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub refreshes: u64,
    pub presented: u64,
    pub stream_frames: u64,
    pub tracking_starts: u64,
    pub tracking_stops: u64,
    pub tracking_abandoned: u64,
}

pub struct RenderOrchestrator {
    client: Arc<dyn StreamClient>,
    tracker: Arc<dyn HeadTracker>,
    optics: Arc<dyn Optics>,
    graphics: Box<dyn StreamGraphics>,
    mailbox: Arc<ConfigMailbox>,
    settings: ClientSettings,
    tracking_config: TrackingConfig,

    gpu: Option<Box<dyn GpuBackend>>,
    generation: ContextGeneration,
    context_recreated: bool,
    rendering_params_changed: bool,
    config: SessionConfig,

    calibration: Option<Box<dyn LensCalibration>>,
    distortion: Option<Box<dyn DistortionRenderer>>,
    view_config: Option<ViewConfig>,
    passthrough: Option<PassthroughSurface>,

    /// Lobby or passthrough targets, whichever the configuration asks for.
    base_targets: Option<ResourceSet>,
    stream_targets: Option<ResourceSet>,
    /// Parameters of the live stream, kept to rebuild its targets after a context loss.
    stream_started: Option<StreamStarted>,
    streaming: bool,
    tracking: Option<TrackingLoop>,

    stats: OrchestratorStats,
}

impl RenderOrchestrator {
    pub fn new(
        client: Arc<dyn StreamClient>,
        tracker: Arc<dyn HeadTracker>,
        optics: Arc<dyn Optics>,
        graphics: Box<dyn StreamGraphics>,
        mailbox: Arc<ConfigMailbox>,
        settings: ClientSettings,
    ) -> Self {
        let config = mailbox.snapshot();
        Self {
            client,
            tracker,
            optics,
            graphics,
            mailbox,
            tracking_config: TrackingConfig::from_settings(&settings),
            settings,
            gpu: None,
            generation: ContextGeneration::default(),
            context_recreated: false,
            rendering_params_changed: true,
            config,
            calibration: None,
            distortion: None,
            view_config: None,
            passthrough: None,
            base_targets: None,
            stream_targets: None,
            stream_started: None,
            streaming: false,
            tracking: None,
            stats: OrchestratorStats::default(),
        }
    }

    /// A new graphics context is current. Every handle from the previous context is already
    /// gone with it and will not be deleted again. Returns the camera texture the host
    /// should stream passthrough video into.
    pub fn on_surface_created(&mut self, mut gpu: Box<dyn GpuBackend>) -> GpuResult<TextureId> {
        self.generation = self.generation.next();
        self.gpu = None;
        self.passthrough = None;
        if let Some(stale) = self.base_targets.take() {
            stale.release(gpu.as_mut(), self.generation);
        }
        self.context_recreated = true;

        self.graphics.initialize_graphics();
        let surface = PassthroughSurface::create(gpu.as_mut(), self.config.passthrough_size)?;
        let camera_texture = surface.camera_texture();
        self.gpu = Some(gpu);
        self.passthrough = Some(surface);
        tracing::info!(
            generation = self.generation.0,
            camera_texture = camera_texture.0,
            streaming = self.streaming,
            "graphics surface created"
        );
        Ok(camera_texture)
    }

    pub fn render_frame(&mut self) -> FrameOutcome {
        self.stats.refreshes += 1;

        self.apply_pending_config();
        if self.gpu.is_none() {
            return FrameOutcome::NoSurface;
        }
        if self.rendering_params_changed && !self.rebuild_calibration() {
            return FrameOutcome::AwaitingCalibration;
        }
        self.transition_resources();

        while let Some(event) = self.client.poll_event() {
            self.handle_event(event);
        }

        let mode = self.render_mode();
        let eyes = match mode {
            RenderMode::Passthrough => self.render_passthrough(),
            RenderMode::Streaming => match self.render_stream() {
                Some(eyes) => Some(eyes),
                None => return FrameOutcome::NoFrameReady,
            },
            RenderMode::Lobby => self.render_lobby(),
        };
        let Some([left, right]) = eyes else {
            return FrameOutcome::Skipped(mode);
        };

        let Some(distortion) = self.distortion.as_mut() else {
            return FrameOutcome::Skipped(mode);
        };
        // No reprojection: the distortion stage only warps and blits.
        distortion.render_eye_to_display(
            Viewport {
                x: 0,
                y: 0,
                width: self.config.screen_width,
                height: self.config.screen_height,
            },
            &left,
            &right,
        );
        self.stats.presented += 1;
        FrameOutcome::Presented(mode)
    }

    fn apply_pending_config(&mut self) {
        let Some(pending) = self.mailbox.take_pending() else {
            return;
        };
        self.config = pending.config;
        if pending.rendering_changed {
            self.rendering_params_changed = true;
        }
        if pending.plane_changed {
            if let Some(surface) = self.passthrough.as_mut() {
                surface.set_plane_size(pending.config.passthrough_size);
            }
        }
    }

    /// Rebuild lens calibration, distortion meshes and view config from the saved viewer
    /// parameters and publish the view config. Returns `false` when no usable calibration
    /// exists yet.
    fn rebuild_calibration(&mut self) -> bool {
        let params = self.optics.saved_device_params();
        if params.is_empty() {
            tracing::debug!("no saved viewer parameters, waiting for a scan");
            return false;
        }
        let (width, height) = (self.config.screen_width, self.config.screen_height);

        self.calibration = None;
        let calibration = match self.optics.create_calibration(&params, width, height) {
            Ok(calibration) => calibration,
            Err(VrError::Calibration(reason)) => {
                tracing::warn!(%reason, "saved viewer parameters unusable, waiting for a rescan");
                return false;
            }
            Err(err) => {
                tracing::error!(error = %err, "lens calibration failed");
                return false;
            }
        };

        self.distortion = None;
        let mut distortion = match self.optics.create_distortion_renderer() {
            Ok(renderer) => renderer,
            Err(err) => {
                tracing::error!(error = %err, "distortion renderer creation failed");
                return false;
            }
        };
        for eye in Eye::BOTH {
            distortion.set_mesh(&calibration.distortion_mesh(eye), eye);
        }

        let views = pose_math::view_config(calibration.as_ref());
        tracing::info!(
            width,
            height,
            ipd = views.ipd(),
            left_fov = ?views.fov[0],
            right_fov = ?views.fov[1],
            "rendering params changed, sending view config"
        );
        self.client.send_view_config(views.fov, views.ipd());

        self.calibration = Some(calibration);
        self.distortion = Some(distortion);
        self.view_config = Some(views);
        true
    }

    fn transition_resources(&mut self) {
        if !self.rendering_params_changed && !self.context_recreated {
            return;
        }
        if self.context_recreated {
            self.reallocate_stream_targets();
        }
        let Some(gpu) = self.gpu.as_deref_mut() else {
            return;
        };

        if self.rendering_params_changed && !self.context_recreated {
            self.graphics.pause_graphics();
        }
        if let Some(previous) = self.base_targets.take() {
            previous.release(gpu, self.generation);
        }

        let (width, height) = (self.config.screen_width, self.config.screen_height);
        let allocated = if self.config.passthrough {
            ResourceSet::allocate(gpu, RenderMode::Passthrough, width, height, self.generation)
        } else {
            ResourceSet::allocate(gpu, RenderMode::Lobby, width / 2, height, self.generation)
        };
        match allocated {
            Ok(set) => {
                if set.mode() == RenderMode::Lobby {
                    self.graphics
                        .resume_graphics(width / 2, height, set.eye_textures());
                }
                tracing::info!(
                    mode = %set.mode(),
                    context_recreated = self.context_recreated,
                    rendering_params_changed = self.rendering_params_changed,
                    "render targets rebuilt"
                );
                self.base_targets = Some(set);
                self.rendering_params_changed = false;
                self.context_recreated = false;
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    "render target allocation failed, retrying next refresh"
                );
            }
        }
    }

    /// Stream targets allocated before a context loss are dropped without deletes and
    /// replaced in the current generation; the stream graphics are restarted on the new pair.
    fn reallocate_stream_targets(&mut self) {
        let Some(started) = self.stream_started.filter(|_| self.streaming) else {
            return;
        };
        let current = self.generation;
        if self
            .stream_targets
            .as_ref()
            .is_some_and(|set| set.generation() == current)
        {
            return;
        }
        let Some(gpu) = self.gpu.as_deref_mut() else {
            return;
        };
        if let Some(stale) = self.stream_targets.take() {
            stale.release(gpu, current);
        }

        match ResourceSet::allocate(
            gpu,
            RenderMode::Streaming,
            started.view_width,
            started.view_height,
            current,
        ) {
            Ok(targets) => {
                self.graphics
                    .start_stream(&stream_render_config(&started, &targets));
                tracing::info!(
                    generation = current.0,
                    width = started.view_width,
                    height = started.view_height,
                    "stream targets reallocated in new context"
                );
                self.stream_targets = Some(targets);
            }
            Err(err) => {
                tracing::error!(error = %err, "stream target reallocation failed, leaving stream");
                self.end_stream();
            }
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StreamStarted(started) => self.on_stream_started(started),
            SessionEvent::StreamStopped => self.on_stream_stopped(),
            SessionEvent::HudMessageUpdated => {
                if let Some(message) = fetch_hud_message(self.client.as_ref()) {
                    tracing::info!(%message, "HUD message updated");
                    self.graphics.update_hud_message(&message);
                }
            }
        }
    }

    fn on_stream_started(&mut self, started: StreamStarted) {
        tracing::info!(
            width = started.view_width,
            height = started.view_height,
            foveation = started.foveation.enabled,
            "stream started"
        );
        if self.streaming || self.stream_targets.is_some() {
            tracing::warn!("stream started while already streaming, restarting");
            self.end_stream();
        }
        let Some(views) = self.view_config else {
            tracing::error!("stream started before any view config was derived, ignoring");
            return;
        };
        let Some(gpu) = self.gpu.as_deref_mut() else {
            return;
        };

        let targets = match ResourceSet::allocate(
            gpu,
            RenderMode::Streaming,
            started.view_width,
            started.view_height,
            self.generation,
        ) {
            Ok(targets) => targets,
            Err(err) => {
                tracing::error!(error = %err, "stream target allocation failed");
                return;
            }
        };

        self.client.send_view_config(views.fov, views.ipd());
        self.graphics
            .start_stream(&stream_render_config(&started, &targets));
        self.stream_targets = Some(targets);
        self.stream_started = Some(started);
        self.streaming = true;

        match TrackingLoop::start(
            self.client.clone(),
            self.tracker.clone(),
            self.tracking_config,
        ) {
            Ok(tracking) => {
                self.tracking = Some(tracking);
                self.stats.tracking_starts += 1;
            }
            Err(err) => tracing::error!(error = %err, "tracking loop failed to start"),
        }
    }

    fn on_stream_stopped(&mut self) {
        if !self.streaming && self.stream_targets.is_none() && self.tracking.is_none() {
            tracing::debug!("stream stopped while not streaming, ignoring");
            return;
        }
        tracing::info!("stream stopped, joining tracking loop");
        self.end_stream();
    }

    /// Leave streaming: stop the tracking task before its targets go away.
    fn end_stream(&mut self) {
        self.streaming = false;
        self.stream_started = None;
        if let Some(tracking) = self.tracking.take() {
            match tracking.stop() {
                Ok(()) => self.stats.tracking_stops += 1,
                Err(err) => {
                    self.stats.tracking_abandoned += 1;
                    tracing::error!(error = %err, "tracking loop did not stop cleanly");
                }
            }
        }
        if let Some(targets) = self.stream_targets.take() {
            if let Some(gpu) = self.gpu.as_deref_mut() {
                targets.release(gpu, self.generation);
            }
        }
    }

    fn render_passthrough(&mut self) -> Option<[EyeTextureDesc; 2]> {
        let gpu = self.gpu.as_deref_mut()?;
        let surface = self.passthrough.as_ref()?;
        let targets = self
            .base_targets
            .as_ref()
            .filter(|set| set.mode() == RenderMode::Passthrough)?;
        match surface.render_frame(
            gpu,
            targets,
            self.config.screen_width,
            self.config.screen_height,
        ) {
            Ok(eyes) => Some(eyes),
            Err(err) => {
                tracing::warn!(error = %err, "passthrough frame skipped");
                None
            }
        }
    }

    /// `None` when no decoded frame is ready; the refresh then ends without presenting.
    fn render_stream(&mut self) -> Option<[EyeTextureDesc; 2]> {
        let frame = self.client.poll_decoded_frame()?;
        let Some(targets) = self.stream_targets.as_ref() else {
            tracing::warn!("decoded frame without stream targets, dropping");
            return None;
        };
        self.graphics.render_stream(frame.handle, [0, 0]);
        self.client.report_frame_consumed(frame.timestamp_ns, 0);
        self.stats.stream_frames += 1;
        tracing::trace!(timestamp_ns = frame.timestamp_ns, "stream frame rendered");
        Some(targets.eye_textures().map(EyeTextureDesc::full))
    }

    fn render_lobby(&mut self) -> Option<[EyeTextureDesc; 2]> {
        let views = self.view_config?;
        let targets = self
            .base_targets
            .as_ref()
            .filter(|set| set.mode() == RenderMode::Lobby)?;
        // No frame is in flight in the lobby, so predict roughly to the next vsync.
        let target_ns = boot_time_ns() + self.settings.lobby_lookahead().as_nanos() as u64;
        let head = pose_math::predict_pose(
            self.tracker.as_ref(),
            target_ns,
            self.settings.floor_height_m,
        );
        self.graphics
            .render_lobby(&pose_math::eye_views(head, &views));
        Some(targets.eye_textures().map(EyeTextureDesc::full))
    }

    /// Stop streaming and release every target. Used when the session is torn down.
    pub fn shutdown(&mut self) {
        self.end_stream();
        if let Some(mut gpu) = self.gpu.take() {
            if let Some(targets) = self.base_targets.take() {
                targets.release(gpu.as_mut(), self.generation);
            }
            if let Some(surface) = self.passthrough.take() {
                gpu.delete_texture(surface.camera_texture());
            }
            self.graphics.destroy_graphics();
        }
        self.base_targets = None;
        self.passthrough = None;
        self.distortion = None;
        self.calibration = None;
    }

    pub fn render_mode(&self) -> RenderMode {
        RenderMode::resolve(self.config.passthrough, self.streaming)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.as_ref().is_some_and(TrackingLoop::is_running)
    }

    pub fn tracking_samples_sent(&self) -> u64 {
        self.tracking.as_ref().map_or(0, TrackingLoop::samples_sent)
    }

    pub fn view_config(&self) -> Option<ViewConfig> {
        self.view_config
    }

    pub fn generation(&self) -> ContextGeneration {
        self.generation
    }

    pub fn stream_targets(&self) -> Option<&ResourceSet> {
        self.stream_targets.as_ref()
    }

    pub fn base_targets(&self) -> Option<&ResourceSet> {
        self.base_targets.as_ref()
    }

    pub fn passthrough_surface(&self) -> Option<&PassthroughSurface> {
        self.passthrough.as_ref()
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats
    }
}

impl Drop for RenderOrchestrator {
    fn drop(&mut self) {
        if let Some(tracking) = self.tracking.take() {
            if let Err(err) = tracking.stop() {
                tracing::warn!(error = %err, "tracking loop abandoned on drop");
            }
        }
    }
}

fn stream_render_config(started: &StreamStarted, targets: &ResourceSet) -> StreamRenderConfig {
    StreamRenderConfig {
        view_width: started.view_width,
        view_height: started.view_height,
        eye_textures: targets.eye_textures(),
        swapchain_length: 1,
        foveation: started.foveation,
    }
}

/// Two-call fetch: ask for the size, then fill a buffer of that size.
fn fetch_hud_message(client: &dyn StreamClient) -> Option<String> {
    let len = client.hud_message_len();
    if len == 0 {
        return None;
    }
    let mut buf = vec![0u8; len];
    let written = client.read_hud_message(&mut buf).min(len);
    buf.truncate(written);
    while buf.last() == Some(&0) {
        buf.pop();
    }
    if buf.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}
