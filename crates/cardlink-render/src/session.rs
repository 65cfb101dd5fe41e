//! Host-facing session lifecycle.
//!
//! [`Session`] lives on the render thread and owns the orchestrator. [`HostHandle`] is the
//! cheap, cloneable side used from UI and sensor threads; it only ever writes into the
//! configuration mailbox or forwards to thread-safe collaborators.

use std::sync::{Arc, Mutex};

use cardlink_common::ClientSettings;
use cardlink_vr::{
    head_device_id, ClientInitParams, HeadTracker, Optics, StreamClient, StreamGraphics,
    TextureId, VrError, VrResult,
};

use crate::config::{ConfigMailbox, SessionConfig};
use crate::gpu::GpuBackend;
use crate::orchestrator::{FrameOutcome, RenderOrchestrator};
use crate::passthrough::{camera_request, CameraRequest, PreviewSize, TapDetector};

/// External collaborators a session drives.
pub struct Collaborators {
    pub client: Arc<dyn StreamClient>,
    pub tracker: Arc<dyn HeadTracker>,
    pub optics: Arc<dyn Optics>,
    pub graphics: Box<dyn StreamGraphics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Initialized,
    Resumed,
    Paused,
}

#[derive(Clone)]
pub struct HostHandle {
    mailbox: Arc<ConfigMailbox>,
    client: Arc<dyn StreamClient>,
    optics: Arc<dyn Optics>,
    tap: Option<Arc<Mutex<TapDetector>>>,
    recording_hint: bool,
}

impl HostHandle {
    pub fn set_screen_resolution(&self, width: u32, height: u32) {
        tracing::debug!(width, height, "screen resolution set");
        self.mailbox.set_screen_resolution(width, height);
    }

    pub fn set_passthrough_active(&self, active: bool) {
        tracing::info!(active, "passthrough set");
        self.mailbox.set_passthrough_active(active);
    }

    pub fn toggle_passthrough(&self) -> bool {
        let active = self.mailbox.toggle_passthrough();
        tracing::info!(active, "passthrough toggled");
        active
    }

    pub fn set_passthrough_size(&self, size: f32) {
        self.mailbox.set_passthrough_size(size);
    }

    /// Scan a new viewer. The next refresh rebuilds calibration from whatever got saved.
    pub fn switch_viewer(&self) {
        tracing::info!("switching viewer");
        self.optics.scan_device_params();
        self.mailbox.invalidate();
    }

    pub fn send_battery_level(&self, level: f32, plugged: bool) {
        tracing::debug!(level, plugged, "battery level");
        self.client.send_battery(head_device_id(), level, plugged);
    }

    /// Feed an accelerometer sample to the double-tap gesture. Returns `true` when the
    /// sample completed a double tap and passthrough was toggled.
    pub fn on_accelerometer(&self, timestamp_ns: u64, accel: [f32; 3]) -> bool {
        let Some(tap) = &self.tap else {
            return false;
        };
        let fired = match tap.lock() {
            Ok(mut detector) => detector.push_sample(timestamp_ns, accel),
            Err(poisoned) => poisoned.into_inner().push_sample(timestamp_ns, accel),
        };
        if fired {
            self.toggle_passthrough();
        }
        fired
    }

    /// Preview size and flags to open the passthrough camera with, for the current screen.
    pub fn camera_request(&self, choices: &[PreviewSize]) -> Option<CameraRequest> {
        let config = self.mailbox.snapshot();
        let request = camera_request(
            choices,
            config.screen_width,
            config.screen_height,
            self.recording_hint,
        );
        tracing::debug!(?request, options = choices.len(), "camera preview chosen");
        request
    }

    pub fn config(&self) -> SessionConfig {
        self.mailbox.snapshot()
    }

    fn reset_gesture(&self) {
        if let Some(tap) = &self.tap {
            match tap.lock() {
                Ok(mut detector) => detector.reset(),
                Err(poisoned) => poisoned.into_inner().reset(),
            }
        }
    }
}

pub struct Session {
    host: HostHandle,
    client: Arc<dyn StreamClient>,
    tracker: Arc<dyn HeadTracker>,
    optics: Arc<dyn Optics>,
    orchestrator: RenderOrchestrator,
    lifecycle: Lifecycle,
}

impl Session {
    pub fn init(
        collaborators: Collaborators,
        screen_width: u32,
        screen_height: u32,
        settings: ClientSettings,
    ) -> VrResult<Self> {
        let Collaborators {
            client,
            tracker,
            optics,
            graphics,
        } = collaborators;

        let params =
            ClientInitParams::for_screen(screen_width, screen_height, settings.refresh_rate_hz);
        tracing::info!(
            view_width = params.view_width,
            view_height = params.view_height,
            refresh_rates = ?params.refresh_rates,
            "initializing stream client"
        );
        client.initialize(&params)?;

        let mailbox = Arc::new(ConfigMailbox::new(SessionConfig {
            screen_width,
            screen_height,
            passthrough: false,
            passthrough_size: settings.passthrough.plane_fraction,
        }));
        let tap = settings
            .passthrough
            .tap_toggle
            .then(|| Arc::new(Mutex::new(TapDetector::from_settings(&settings.passthrough))));
        let host = HostHandle {
            mailbox: mailbox.clone(),
            client: client.clone(),
            optics: optics.clone(),
            tap,
            recording_hint: settings.passthrough.recording_hint,
        };
        let orchestrator = RenderOrchestrator::new(
            client.clone(),
            tracker.clone(),
            optics.clone(),
            graphics,
            mailbox,
            settings,
        );

        Ok(Self {
            host,
            client,
            tracker,
            optics,
            orchestrator,
            lifecycle: Lifecycle::Initialized,
        })
    }

    pub fn host(&self) -> HostHandle {
        self.host.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn resume(&mut self) {
        tracing::info!("session resume");
        self.tracker.resume();
        self.host.mailbox.invalidate();
        self.host.reset_gesture();
        if self.optics.saved_device_params().is_empty() {
            tracing::info!("no saved viewer parameters, scanning");
            self.optics.scan_device_params();
        }
        self.client.resume();
        self.lifecycle = Lifecycle::Resumed;
    }

    pub fn pause(&mut self) {
        tracing::info!("session pause");
        self.client.pause();
        self.tracker.pause();
        self.lifecycle = Lifecycle::Paused;
    }

    /// Hand over a freshly created graphics context. Returns the texture the camera feed
    /// should be attached to.
    pub fn surface_created(&mut self, gpu: Box<dyn GpuBackend>) -> VrResult<TextureId> {
        self.orchestrator
            .on_surface_created(gpu)
            .map_err(|err| VrError::Adapter(err.to_string()))
    }

    pub fn render(&mut self) -> FrameOutcome {
        self.orchestrator.render_frame()
    }

    pub fn orchestrator(&self) -> &RenderOrchestrator {
        &self.orchestrator
    }

    pub fn destroy(mut self) {
        tracing::info!("session destroy");
        self.orchestrator.shutdown();
        self.client.destroy();
    }
}
