//! OpenGL ES backend for [`GpuBackend`] on top of `glow`.
//!
//! The caller guarantees the context behind `gl` is current on this thread for every call.

use std::num::NonZeroU32;

use cardlink_vr::TextureId;
use glow::HasContext;

use crate::gpu::{
    FramebufferId, GpuBackend, GpuError, GpuResult, ProgramId, QuadDraw, QuadProgram,
    RenderbufferId,
};

/// `GL_TEXTURE_EXTERNAL_OES`, not exported by glow.
const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

pub struct GlowBackend {
    gl: glow::Context,
    quad_buffer: Option<glow::NativeBuffer>,
}

impl GlowBackend {
    pub fn new(gl: glow::Context) -> Self {
        Self {
            gl,
            quad_buffer: None,
        }
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    fn quad_buffer(&mut self) -> GpuResult<glow::NativeBuffer> {
        if let Some(buffer) = self.quad_buffer {
            return Ok(buffer);
        }
        let buffer = unsafe { self.gl.create_buffer() }.map_err(GpuError::Allocation)?;
        self.quad_buffer = Some(buffer);
        Ok(buffer)
    }

    unsafe fn compile(
        &self,
        kind: u32,
        label: &'static str,
        src: &str,
    ) -> GpuResult<glow::NativeShader> {
        let shader = self.gl.create_shader(kind).map_err(GpuError::Allocation)?;
        self.gl.shader_source(shader, src);
        self.gl.compile_shader(shader);
        if !self.gl.get_shader_compile_status(shader) {
            let log = self.gl.get_shader_info_log(shader);
            self.gl.delete_shader(shader);
            return Err(GpuError::ShaderCompile { kind: label, log });
        }
        Ok(shader)
    }
}

fn texture(id: TextureId) -> Option<glow::NativeTexture> {
    NonZeroU32::new(id.0).map(glow::NativeTexture)
}

fn renderbuffer(id: RenderbufferId) -> Option<glow::NativeRenderbuffer> {
    NonZeroU32::new(id.0).map(glow::NativeRenderbuffer)
}

fn framebuffer(id: FramebufferId) -> Option<glow::NativeFramebuffer> {
    NonZeroU32::new(id.0).map(glow::NativeFramebuffer)
}

fn program(id: ProgramId) -> Option<glow::NativeProgram> {
    NonZeroU32::new(id.0).map(glow::NativeProgram)
}

fn as_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

impl GpuBackend for GlowBackend {
    fn create_texture(&mut self, width: u32, height: u32) -> GpuResult<TextureId> {
        let gl = &self.gl;
        unsafe {
            let tex = gl.create_texture().map_err(GpuError::Allocation)?;
            gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGB as i32,
                width as i32,
                height as i32,
                0,
                glow::RGB,
                glow::UNSIGNED_BYTE,
                None,
            );
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.bind_texture(glow::TEXTURE_2D, None);
            Ok(TextureId(tex.0.get()))
        }
    }

    fn create_external_texture(&mut self) -> GpuResult<TextureId> {
        let gl = &self.gl;
        unsafe {
            let tex = gl.create_texture().map_err(GpuError::Allocation)?;
            gl.bind_texture(TEXTURE_EXTERNAL_OES, Some(tex));
            for (param, value) in [
                (glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE),
                (glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE),
                (glow::TEXTURE_MIN_FILTER, glow::NEAREST),
                (glow::TEXTURE_MAG_FILTER, glow::NEAREST),
            ] {
                gl.tex_parameter_i32(TEXTURE_EXTERNAL_OES, param, value as i32);
            }
            gl.bind_texture(TEXTURE_EXTERNAL_OES, None);
            Ok(TextureId(tex.0.get()))
        }
    }

    fn delete_texture(&mut self, id: TextureId) {
        if let Some(tex) = texture(id) {
            unsafe { self.gl.delete_texture(tex) };
        }
    }

    fn create_depth_renderbuffer(&mut self, width: u32, height: u32) -> GpuResult<RenderbufferId> {
        let gl = &self.gl;
        unsafe {
            let rb = gl.create_renderbuffer().map_err(GpuError::Allocation)?;
            gl.bind_renderbuffer(glow::RENDERBUFFER, Some(rb));
            gl.renderbuffer_storage(
                glow::RENDERBUFFER,
                glow::DEPTH_COMPONENT16,
                width as i32,
                height as i32,
            );
            gl.bind_renderbuffer(glow::RENDERBUFFER, None);
            Ok(RenderbufferId(rb.0.get()))
        }
    }

    fn delete_renderbuffer(&mut self, id: RenderbufferId) {
        if let Some(rb) = renderbuffer(id) {
            unsafe { self.gl.delete_renderbuffer(rb) };
        }
    }

    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth: RenderbufferId,
    ) -> GpuResult<FramebufferId> {
        let gl = &self.gl;
        unsafe {
            let fb = gl.create_framebuffer().map_err(GpuError::Allocation)?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fb));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                texture(color),
                0,
            );
            gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::DEPTH_ATTACHMENT,
                glow::RENDERBUFFER,
                renderbuffer(depth),
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(fb);
                return Err(GpuError::IncompleteFramebuffer(status));
            }
            Ok(FramebufferId(fb.0.get()))
        }
    }

    fn delete_framebuffer(&mut self, id: FramebufferId) {
        if let Some(fb) = framebuffer(id) {
            unsafe { self.gl.delete_framebuffer(fb) };
        }
    }

    fn create_quad_program(
        &mut self,
        vertex_src: &str,
        fragment_src: &str,
    ) -> GpuResult<QuadProgram> {
        unsafe {
            let vs = self.compile(glow::VERTEX_SHADER, "vertex", vertex_src)?;
            let fs = match self.compile(glow::FRAGMENT_SHADER, "fragment", fragment_src) {
                Ok(fs) => fs,
                Err(err) => {
                    self.gl.delete_shader(vs);
                    return Err(err);
                }
            };
            let gl = &self.gl;
            let prog = gl.create_program().map_err(GpuError::Allocation)?;
            gl.attach_shader(prog, vs);
            gl.attach_shader(prog, fs);
            gl.link_program(prog);
            gl.delete_shader(vs);
            gl.delete_shader(fs);
            if !gl.get_program_link_status(prog) {
                let log = gl.get_program_info_log(prog);
                gl.delete_program(prog);
                return Err(GpuError::ProgramLink(log));
            }
            let position_attrib = gl
                .get_attrib_location(prog, "a_Position")
                .ok_or_else(|| GpuError::ProgramLink("a_Position not active".into()))?;
            let uv_attrib = gl
                .get_attrib_location(prog, "a_UV")
                .ok_or_else(|| GpuError::ProgramLink("a_UV not active".into()))?;
            Ok(QuadProgram {
                program: ProgramId(prog.0.get()),
                position_attrib,
                uv_attrib,
            })
        }
    }

    fn begin_offscreen(&mut self, id: FramebufferId) {
        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer(id));
            gl.disable(glow::SCISSOR_TEST);
            gl.disable(glow::BLEND);
            gl.disable(glow::CULL_FACE);
            gl.enable(glow::DEPTH_TEST);
            gl.clear_color(0.0, 0.0, 0.0, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
        }
    }

    fn draw_quad(&mut self, draw: &QuadDraw<'_>) {
        let buffer = match self.quad_buffer() {
            Ok(buffer) => buffer,
            Err(err) => {
                tracing::warn!(error = %err, "quad buffer unavailable, skipping draw");
                return;
            }
        };
        let mut interleaved = Vec::with_capacity(16);
        interleaved.extend_from_slice(draw.positions);
        interleaved.extend_from_slice(draw.uvs);
        let data = as_bytes(&interleaved);

        let gl = &self.gl;
        let QuadProgram {
            program: prog,
            position_attrib,
            uv_attrib,
        } = draw.program;
        unsafe {
            gl.viewport(
                draw.viewport.x,
                draw.viewport.y,
                draw.viewport.width as i32,
                draw.viewport.height as i32,
            );
            gl.use_program(program(prog));
            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(TEXTURE_EXTERNAL_OES, texture(draw.texture));

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, &data, glow::STREAM_DRAW);
            gl.vertex_attrib_pointer_f32(position_attrib, 2, glow::FLOAT, false, 0, 0);
            gl.enable_vertex_attrib_array(position_attrib);
            // UVs follow the 8 position floats
            gl.vertex_attrib_pointer_f32(uv_attrib, 2, glow::FLOAT, false, 0, 8 * 4);
            gl.enable_vertex_attrib_array(uv_attrib);

            gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);

            gl.disable_vertex_attrib_array(position_attrib);
            gl.disable_vertex_attrib_array(uv_attrib);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.bind_texture(TEXTURE_EXTERNAL_OES, None);
            gl.use_program(None);
        }
    }

    fn end_offscreen(&mut self) {
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, None) };
    }
}

impl Drop for GlowBackend {
    fn drop(&mut self) {
        if let Some(buffer) = self.quad_buffer.take() {
            unsafe { self.gl.delete_buffer(buffer) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_names_map_to_none() {
        assert!(texture(TextureId(0)).is_none());
        assert!(framebuffer(FramebufferId(0)).is_none());
        assert_eq!(texture(TextureId(5)).map(|t| t.0.get()), Some(5));
    }

    #[test]
    fn test_float_bytes_are_native_endian() {
        let bytes = as_bytes(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[4..], &(-2.5f32).to_ne_bytes());
    }
}
