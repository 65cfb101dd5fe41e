//! Narrow GPU surface used by the orchestrator.
//!
//! Everything here runs on the render thread with the graphics context current. Handles are
//! plain GL names; a handle is only meaningful within the [`ContextGeneration`] that created
//! it.

use cardlink_vr::{TextureId, Viewport};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderbufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Identifies one incarnation of the graphics context. Bumped every time the host hands us a
/// new surface, which invalidates every handle created before.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextGeneration(pub u64);

impl ContextGeneration {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("{kind} shader compile failed: {log}")]
    ShaderCompile { kind: &'static str, log: String },
    #[error("program link failed: {0}")]
    ProgramLink(String),
    #[error("allocation failed: {0}")]
    Allocation(String),
    #[error("framebuffer incomplete: status {0:#x}")]
    IncompleteFramebuffer(u32),
}

pub type GpuResult<T> = Result<T, GpuError>;

/// Compiled passthrough blit program and its attribute locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadProgram {
    pub program: ProgramId,
    pub position_attrib: u32,
    pub uv_attrib: u32,
}

/// Draw state for one textured quad sampling an external (camera) texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadDraw<'a> {
    pub program: QuadProgram,
    pub texture: TextureId,
    pub viewport: Viewport,
    pub positions: &'a [f32; 8],
    pub uvs: &'a [f32; 8],
}

pub trait GpuBackend {
    /// RGB 2D texture with linear filtering, contents undefined.
    fn create_texture(&mut self, width: u32, height: u32) -> GpuResult<TextureId>;
    /// External-image texture fed by the camera stream.
    fn create_external_texture(&mut self) -> GpuResult<TextureId>;
    fn delete_texture(&mut self, texture: TextureId);

    fn create_depth_renderbuffer(&mut self, width: u32, height: u32)
        -> GpuResult<RenderbufferId>;
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId);

    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth: RenderbufferId,
    ) -> GpuResult<FramebufferId>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    fn create_quad_program(&mut self, vertex_src: &str, fragment_src: &str)
        -> GpuResult<QuadProgram>;

    /// Bind `framebuffer`, reset blend/depth state and clear colour and depth.
    fn begin_offscreen(&mut self, framebuffer: FramebufferId);
    fn draw_quad(&mut self, draw: &QuadDraw<'_>);
    /// Rebind the default framebuffer.
    fn end_offscreen(&mut self);
}
