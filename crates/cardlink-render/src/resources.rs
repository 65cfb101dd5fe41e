//! GPU render targets owned by a single render mode.

use std::fmt;

use cardlink_vr::TextureId;

use crate::gpu::{ContextGeneration, FramebufferId, GpuBackend, GpuResult, RenderbufferId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    Lobby,
    Passthrough,
    Streaming,
}

impl RenderMode {
    /// Resolve the visible mode. Passthrough is an explicit user override and wins over an
    /// active stream, which in turn wins over the lobby.
    pub fn resolve(passthrough: bool, streaming: bool) -> Self {
        if passthrough {
            Self::Passthrough
        } else if streaming {
            Self::Streaming
        } else {
            Self::Lobby
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lobby => write!(f, "lobby"),
            Self::Passthrough => write!(f, "passthrough"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Targets {
    /// One texture per eye.
    EyePair([TextureId; 2]),
    /// A single colour texture shared by both eyes, rendered through its own framebuffer.
    Offscreen {
        texture: TextureId,
        depth: RenderbufferId,
        framebuffer: FramebufferId,
    },
}

/// Render targets for one [`RenderMode`], tagged with the context generation that created
/// them.
///
/// A set is released by value, so a second release of the same handles cannot be written.
/// Sets that outlive their context are dropped without issuing any delete.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a ResourceSet must be released through ResourceSet::release"]
pub struct ResourceSet {
    mode: RenderMode,
    generation: ContextGeneration,
    width: u32,
    height: u32,
    targets: Targets,
}

impl ResourceSet {
    pub fn allocate(
        gpu: &mut dyn GpuBackend,
        mode: RenderMode,
        width: u32,
        height: u32,
        generation: ContextGeneration,
    ) -> GpuResult<Self> {
        let targets = match mode {
            RenderMode::Lobby | RenderMode::Streaming => {
                let left = gpu.create_texture(width, height)?;
                let right = match gpu.create_texture(width, height) {
                    Ok(texture) => texture,
                    Err(err) => {
                        gpu.delete_texture(left);
                        return Err(err);
                    }
                };
                Targets::EyePair([left, right])
            }
            RenderMode::Passthrough => allocate_offscreen(gpu, width, height)?,
        };
        tracing::debug!(
            %mode,
            width,
            height,
            generation = generation.0,
            ?targets,
            "allocated render targets"
        );
        Ok(Self {
            mode,
            generation,
            width,
            height,
            targets,
        })
    }

    /// Release the set's handles if they still belong to `current`. Returns whether any
    /// delete was issued.
    pub fn release(self, gpu: &mut dyn GpuBackend, current: ContextGeneration) -> bool {
        if self.generation != current {
            tracing::debug!(
                mode = %self.mode,
                allocated_in = self.generation.0,
                current = current.0,
                "context recreated since allocation, dropping stale handles"
            );
            return false;
        }
        match self.targets {
            Targets::EyePair(textures) => {
                for texture in textures {
                    gpu.delete_texture(texture);
                }
            }
            Targets::Offscreen {
                texture,
                depth,
                framebuffer,
            } => {
                gpu.delete_renderbuffer(depth);
                gpu.delete_framebuffer(framebuffer);
                gpu.delete_texture(texture);
            }
        }
        tracing::debug!(mode = %self.mode, "released render targets");
        true
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn generation(&self) -> ContextGeneration {
        self.generation
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn targets(&self) -> Targets {
        self.targets
    }

    /// Texture backing each eye. Offscreen sets return the shared texture twice.
    pub fn eye_textures(&self) -> [TextureId; 2] {
        match self.targets {
            Targets::EyePair(textures) => textures,
            Targets::Offscreen { texture, .. } => [texture, texture],
        }
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        match self.targets {
            Targets::EyePair(_) => None,
            Targets::Offscreen { framebuffer, .. } => Some(framebuffer),
        }
    }
}

fn allocate_offscreen(gpu: &mut dyn GpuBackend, width: u32, height: u32) -> GpuResult<Targets> {
    let texture = gpu.create_texture(width, height)?;
    let depth = match gpu.create_depth_renderbuffer(width, height) {
        Ok(depth) => depth,
        Err(err) => {
            gpu.delete_texture(texture);
            return Err(err);
        }
    };
    let framebuffer = match gpu.create_framebuffer(texture, depth) {
        Ok(framebuffer) => framebuffer,
        Err(err) => {
            gpu.delete_renderbuffer(depth);
            gpu.delete_texture(texture);
            return Err(err);
        }
    };
    Ok(Targets::Offscreen {
        texture,
        depth,
        framebuffer,
    })
}
