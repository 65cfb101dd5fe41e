//! Camera preview sizing for passthrough.

/// Smallest side a preview may have before it is considered too blurry to show.
const MIN_PREVIEW_SIDE: u32 = 320;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl PreviewSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Preview size to request for a display: one eye's half of the landscape screen.
pub fn passthrough_camera_target(display_width: u32, display_height: u32) -> PreviewSize {
    if display_width < display_height {
        PreviewSize::new(display_height / 2, display_width)
    } else {
        PreviewSize::new(display_width / 2, display_height)
    }
}

/// What the host should ask the camera for when passthrough is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraRequest {
    pub size: PreviewSize,
    /// Open the camera with the recording hint set, which keeps the preview frame rate steady
    /// on most devices.
    pub recording_hint: bool,
}

/// Preview request for a display. `None` when the camera offers no sizes at all.
pub fn camera_request(
    choices: &[PreviewSize],
    display_width: u32,
    display_height: u32,
    recording_hint: bool,
) -> Option<CameraRequest> {
    let target = passthrough_camera_target(display_width, display_height);
    let size = choose_preview_size(choices, target.width, target.height)?;
    Some(CameraRequest {
        size,
        recording_hint,
    })
}

/// Pick a camera preview size for a `width` x `height` target.
///
/// An exact match wins. Otherwise the smallest option whose sides both reach
/// `max(min(width, height), 320)` is used, and failing that the camera's first option.
pub fn choose_preview_size(
    choices: &[PreviewSize],
    width: u32,
    height: u32,
) -> Option<PreviewSize> {
    if let Some(exact) = choices
        .iter()
        .find(|c| c.width == width && c.height == height)
    {
        return Some(*exact);
    }
    let min_side = width.min(height).max(MIN_PREVIEW_SIDE);
    choices
        .iter()
        .filter(|c| c.width >= min_side && c.height >= min_side)
        .min_by_key(|c| c.area())
        .or_else(|| choices.first())
        .copied()
}
