use glam::{Quat, Vec3};

/// Path of the headset device in the streaming session's device namespace.
pub const HEAD_PATH: &str = "/user/head";

/// Stable 64-bit identifier for a device path (FNV-1a).
pub const fn path_to_id(path: &str) -> u64 {
    let bytes = path.as_bytes();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

pub const fn head_device_id() -> u64 {
    path_to_id(HEAD_PATH)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left = 0,
    Right = 1,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Field of view as tangent angles, all measured outward from the view axis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fov {
    pub left: f32,
    pub right: f32,
    pub up: f32,
    pub down: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

/// Motion sample for one tracked device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceMotion {
    pub device_id: u64,
    pub pose: Pose,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl DeviceMotion {
    pub fn head(pose: Pose) -> Self {
        Self {
            device_id: head_device_id(),
            pose,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        }
    }
}

/// Per-eye field of view and horizontal head-to-eye offsets derived from lens calibration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ViewConfig {
    pub fov: [Fov; 2],
    pub eye_offsets: [f32; 2],
}

impl ViewConfig {
    /// Inter-eye distance as reported downstream.
    pub fn ipd(&self) -> f32 {
        self.eye_offsets[0] - self.eye_offsets[1]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FoveationParams {
    pub enabled: bool,
    pub center_size_x: f32,
    pub center_size_y: f32,
    pub center_shift_x: f32,
    pub center_shift_y: f32,
    pub edge_ratio_x: f32,
    pub edge_ratio_y: f32,
}

/// Negotiated stream parameters carried by the stream-started event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamStarted {
    pub view_width: u32,
    pub view_height: u32,
    pub foveation: FoveationParams,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    StreamStarted(StreamStarted),
    StreamStopped,
    HudMessageUpdated,
}

/// Opaque handle to a decoded hardware frame owned by the stream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    pub handle: FrameHandle,
    pub timestamp_ns: u64,
}

/// GL texture name as seen by collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// One eye's input to the distortion stage: backing texture plus its UV window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeTextureDesc {
    pub texture: TextureId,
    pub left_u: f32,
    pub right_u: f32,
    pub top_v: f32,
    pub bottom_v: f32,
}

impl EyeTextureDesc {
    pub fn full(texture: TextureId) -> Self {
        Self {
            texture,
            left_u: 0.0,
            right_u: 1.0,
            top_v: 1.0,
            bottom_v: 0.0,
        }
    }
}

/// Per-eye view handed to the lobby renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewInput {
    pub orientation: Quat,
    pub position: Vec3,
    pub fov: Fov,
    pub swapchain_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamRenderConfig {
    pub view_width: u32,
    pub view_height: u32,
    pub eye_textures: [TextureId; 2],
    pub swapchain_length: u32,
    pub foveation: FoveationParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientInitParams {
    pub view_width: u32,
    pub view_height: u32,
    pub refresh_rates: Vec<f32>,
}

impl ClientInitParams {
    /// Per-eye view size for a side-by-side split of the given screen, in either orientation.
    pub fn for_screen(screen_width: u32, screen_height: u32, refresh_rate: f32) -> Self {
        Self {
            view_width: screen_width.max(screen_height) / 2,
            view_height: screen_width.min(screen_height),
            refresh_rates: vec![refresh_rate],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistortionMesh {
    pub vertices: Vec<f32>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}
