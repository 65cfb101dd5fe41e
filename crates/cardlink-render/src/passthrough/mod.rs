//! Camera passthrough: the camera feed is drawn side by side into an offscreen target which
//! both eyes then sample from.

pub mod camera;
pub mod tap;

use cardlink_vr::{Eye, EyeTextureDesc, TextureId, Viewport};

use crate::gpu::{GpuBackend, GpuError, GpuResult, QuadDraw, QuadProgram};
use crate::resources::ResourceSet;

pub use camera::{
    camera_request, choose_preview_size, passthrough_camera_target, CameraRequest, PreviewSize,
};
pub use tap::TapDetector;

const VERTEX_SHADER: &str = r#"
uniform mat4 u_MVP;
attribute vec4 a_Position;
attribute vec2 a_UV;
varying vec2 v_UV;

void main() {
    v_UV = a_UV;
    gl_Position = a_Position;
}
"#;

const FRAGMENT_SHADER: &str = r#"
#extension GL_OES_EGL_image_external : require
precision mediump float;
varying vec2 v_UV;
uniform samplerExternalOES sTexture;
void main() {
    gl_FragColor = texture2D(sTexture, v_UV);
}
"#;

/// UVs matching the vertex order of [`plane_vertices`].
pub const QUAD_UVS: [f32; 8] = [0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0];

/// Corners of a square of half-extent `size` centred on the origin, in triangle-strip order:
/// bottom-left, bottom-right, top-left, top-right.
pub fn plane_vertices(size: f32) -> [f32; 8] {
    [-size, -size, size, -size, -size, size, size, size]
}

/// UV window of `eye` within the side-by-side passthrough texture.
pub fn eye_window(texture: TextureId, eye: Eye) -> EyeTextureDesc {
    let offset = 0.5 * eye.index() as f32;
    EyeTextureDesc {
        left_u: offset,
        right_u: 0.5 + offset,
        ..EyeTextureDesc::full(texture)
    }
}

/// Long-lived passthrough state tied to one graphics context: the camera texture the host
/// streams into, the blit program and the quad geometry.
#[derive(Debug)]
pub struct PassthroughSurface {
    camera_texture: TextureId,
    program: Option<QuadProgram>,
    program_error: Option<String>,
    plane_size: f32,
    vertices: [f32; 8],
}

impl PassthroughSurface {
    /// Create the camera texture and compile the blit program.
    ///
    /// Only a camera texture failure is an error. A shader failure is logged and leaves the
    /// surface without a program; passthrough frames are then cleared but left empty.
    pub fn create(gpu: &mut dyn GpuBackend, plane_size: f32) -> GpuResult<Self> {
        let camera_texture = gpu.create_external_texture()?;
        let (program, program_error) =
            match gpu.create_quad_program(VERTEX_SHADER, FRAGMENT_SHADER) {
                Ok(program) => (Some(program), None),
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        "passthrough program unavailable, frames will be empty"
                    );
                    (None, Some(err.to_string()))
                }
            };
        Ok(Self {
            camera_texture,
            program,
            program_error,
            plane_size,
            vertices: plane_vertices(plane_size),
        })
    }

    pub fn camera_texture(&self) -> TextureId {
        self.camera_texture
    }

    pub fn has_program(&self) -> bool {
        self.program.is_some()
    }

    pub fn program_error(&self) -> Option<&str> {
        self.program_error.as_deref()
    }

    pub fn plane_size(&self) -> f32 {
        self.plane_size
    }

    pub fn vertices(&self) -> &[f32; 8] {
        &self.vertices
    }

    pub fn set_plane_size(&mut self, size: f32) {
        if size != self.plane_size {
            self.plane_size = size;
            self.vertices = plane_vertices(size);
            tracing::debug!(size, "passthrough plane resized");
        }
    }

    /// Draw the camera feed into `targets` and describe each eye's half of it.
    pub fn render_frame(
        &self,
        gpu: &mut dyn GpuBackend,
        targets: &ResourceSet,
        screen_width: u32,
        screen_height: u32,
    ) -> GpuResult<[EyeTextureDesc; 2]> {
        let framebuffer = targets.framebuffer().ok_or_else(|| {
            GpuError::Allocation(format!("{} targets have no framebuffer", targets.mode()))
        })?;
        let texture = targets.eye_textures()[0];

        gpu.begin_offscreen(framebuffer);
        if let Some(program) = self.program {
            let half_width = screen_width / 2;
            for eye in Eye::BOTH {
                let viewport = Viewport {
                    x: if eye == Eye::Left { 0 } else { half_width as i32 },
                    y: 0,
                    width: half_width,
                    height: screen_height,
                };
                gpu.draw_quad(&QuadDraw {
                    program,
                    texture: self.camera_texture,
                    viewport,
                    positions: &self.vertices,
                    uvs: &QUAD_UVS,
                });
            }
        }
        gpu.end_offscreen();

        Ok(Eye::BOTH.map(|eye| eye_window(texture, eye)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_vertex_order() {
        let v = plane_vertices(0.5);
        // bottom-left, bottom-right, top-left, top-right
        assert_eq!(v, [-0.5, -0.5, 0.5, -0.5, -0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_eye_windows_split_texture() {
        let texture = TextureId(7);
        let left = eye_window(texture, Eye::Left);
        let right = eye_window(texture, Eye::Right);
        assert_eq!((left.left_u, left.right_u), (0.0, 0.5));
        assert_eq!((right.left_u, right.right_u), (0.5, 1.0));
        assert_eq!(left.texture, right.texture);
        assert_eq!((left.top_v, left.bottom_v), (1.0, 0.0));
    }
}
