//! Host-to-render configuration mailbox.
//!
//! The host thread writes, the render thread takes a copy once per refresh. The copy and
//! the clearing of the change flags happen under one lock, so a write racing with the read
//! is either fully in this refresh's copy or left pending for the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub screen_width: u32,
    pub screen_height: u32,
    pub passthrough: bool,
    pub passthrough_size: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            screen_width: 0,
            screen_height: 0,
            passthrough: false,
            passthrough_size: 1.0,
        }
    }
}

/// Snapshot handed to the render thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingConfig {
    pub config: SessionConfig,
    /// Screen size, passthrough toggle or viewer changed: calibration and targets are stale.
    pub rendering_changed: bool,
    /// Only the passthrough plane geometry changed.
    pub plane_changed: bool,
}

#[derive(Debug, Default)]
struct Slot {
    config: SessionConfig,
    rendering_changed: bool,
    plane_changed: bool,
}

#[derive(Debug, Default)]
pub struct ConfigMailbox {
    slot: Mutex<Slot>,
    dirty: AtomicBool,
}

impl ConfigMailbox {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            slot: Mutex::new(Slot {
                config,
                rendering_changed: true,
                plane_changed: true,
            }),
            dirty: AtomicBool::new(true),
        }
    }

    fn update(&self, rendering: bool, plane: bool, apply: impl FnOnce(&mut SessionConfig)) {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut slot.config);
        slot.rendering_changed |= rendering;
        slot.plane_changed |= plane;
        self.dirty.store(true, Ordering::Release);
    }

    pub fn set_screen_resolution(&self, width: u32, height: u32) {
        self.update(true, false, |cfg| {
            cfg.screen_width = width;
            cfg.screen_height = height;
        });
    }

    pub fn set_passthrough_active(&self, active: bool) {
        self.update(true, false, |cfg| cfg.passthrough = active);
    }

    /// Flip passthrough and return the new state.
    pub fn toggle_passthrough(&self) -> bool {
        let mut active = false;
        self.update(true, false, |cfg| {
            cfg.passthrough = !cfg.passthrough;
            active = cfg.passthrough;
        });
        active
    }

    pub fn set_passthrough_size(&self, size: f32) {
        self.update(false, true, |cfg| cfg.passthrough_size = size);
    }

    /// Force calibration and render targets to be rebuilt on the next refresh.
    pub fn invalidate(&self) {
        self.update(true, false, |_| {});
    }

    /// Copy-and-clear. `None` when nothing changed since the last take.
    pub fn take_pending(&self) -> Option<PendingConfig> {
        if !self.dirty.load(Ordering::Acquire) {
            return None;
        }
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.dirty.store(false, Ordering::Release);
        let pending = PendingConfig {
            config: slot.config,
            rendering_changed: slot.rendering_changed,
            plane_changed: slot.plane_changed,
        };
        slot.rendering_changed = false;
        slot.plane_changed = false;
        Some(pending)
    }

    /// Current values without clearing anything.
    pub fn snapshot(&self) -> SessionConfig {
        match self.slot.lock() {
            Ok(guard) => guard.config,
            Err(poisoned) => poisoned.into_inner().config,
        }
    }
}
