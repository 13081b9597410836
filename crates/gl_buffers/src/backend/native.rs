// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

use std::{
	ffi::{c_char, c_void, CStr},
	marker::PhantomData,
	ptr,
};

use gl::types::{GLenum, GLint, GLintptr, GLsizei, GLsizeiptr, GLuint};

use super::{BufferTarget, BufferUsage, Capability, GlApi, IndexType, Primitive};
use crate::format::VertexAttribute;


#[derive(Debug)]
pub struct GlExtensions {
	pub is_gles: bool,
	pub oes_mapbuffer: bool,
}

/// [`GlApi`] implemented on the loaded `gl` function pointers.
///
/// !Send to ensure every call is issued on the thread owning the context
pub struct NativeGl {
	extensions: GlExtensions,
	_not_send: PhantomData<*const ()>,
}

impl NativeGl {
	/// # SAFETY
	/// * must be called from GL thread
	/// * a context must be current and `gl::load_with` must have been called
	pub unsafe fn new() -> Self {
		let extensions = check_gl_extensions();
		log::debug!("using native GL backend: {extensions:?}");

		Self {
			extensions,
			_not_send: PhantomData,
		}
	}

	pub fn extensions(&self) -> &GlExtensions {
		&self.extensions
	}

	/// Forward driver debug messages to `log` under the `OpenGL` target.
	///
	/// Requires a debug context. Returns false if the driver lacks debug output.
	pub fn setup_debug_output(&self) -> bool {
		if !gl::DebugMessageCallback::is_loaded() {
			log::debug!("driver has no debug output");
			return false
		}

		unsafe {
			gl::Enable(gl::DEBUG_OUTPUT);
			gl::Enable(gl::DEBUG_OUTPUT_SYNCHRONOUS);
			gl::DebugMessageCallback(Some(gl_debug), ptr::null());
			gl::DebugMessageControl(
				gl::DONT_CARE,
				gl::DONT_CARE,
				gl::DONT_CARE,
				0,
				ptr::null(),
				gl::TRUE,
			);
		}

		true
	}
}

unsafe fn gl_string(name: GLenum) -> Option<&'static str> {
	let string = gl::GetString(name);
	if string.is_null() {
		return None
	}

	CStr::from_ptr(string as *const c_char).to_str().ok()
}

unsafe fn check_gl_extensions() -> GlExtensions {
	let is_gles = gl_string(gl::VERSION)
		.map(|version| version.starts_with("OpenGL ES"))
		.unwrap_or(false);

	let mut extension_count = 0;
	gl::GetIntegerv(gl::NUM_EXTENSIONS, &mut extension_count);

	let oes_mapbuffer = (0..extension_count.max(0) as u32).any(|i| {
		let name = gl::GetStringi(gl::EXTENSIONS, i);
		!name.is_null()
			&& CStr::from_ptr(name as *const c_char).to_bytes() == b"GL_OES_mapbuffer"
	});

	GlExtensions {
		is_gles,
		oes_mapbuffer,
	}
}

unsafe impl GlApi for NativeGl {
	fn supports_buffer_mapping(&self) -> bool {
		!self.extensions.is_gles || self.extensions.oes_mapbuffer
	}

	fn create_buffer(&mut self) -> GLuint {
		let mut buffer = 0;
		unsafe { gl::GenBuffers(1, &mut buffer) };
		buffer
	}

	fn delete_buffer(&mut self, buffer: GLuint) {
		unsafe { gl::DeleteBuffers(1, &buffer) };
	}

	fn bind_buffer(&mut self, target: BufferTarget, buffer: GLuint) {
		unsafe { gl::BindBuffer(target.gl_target(), buffer) };
	}

	fn buffer_data(
		&mut self,
		target: BufferTarget,
		size: usize,
		data: Option<&[u8]>,
		usage: BufferUsage,
	) {
		let data_ptr = match data {
			Some(data) => {
				debug_assert!(data.len() >= size);
				data.as_ptr() as *const c_void
			},
			None => ptr::null(),
		};

		unsafe {
			gl::BufferData(target.gl_target(), size as GLsizeiptr, data_ptr, usage.gl_usage())
		};
	}

	fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]) {
		unsafe {
			gl::BufferSubData(
				target.gl_target(),
				offset as GLintptr,
				data.len() as GLsizeiptr,
				data.as_ptr() as *const c_void,
			)
		};
	}

	fn map_buffer(&mut self, target: BufferTarget) -> *mut u8 {
		unsafe { gl::MapBuffer(target.gl_target(), gl::WRITE_ONLY) as *mut u8 }
	}

	fn unmap_buffer(&mut self, target: BufferTarget) -> bool {
		unsafe { gl::UnmapBuffer(target.gl_target()) == gl::TRUE }
	}

	fn create_texture(&mut self) -> GLuint {
		let mut texture = 0;
		unsafe { gl::GenTextures(1, &mut texture) };
		texture
	}

	fn delete_texture(&mut self, texture: GLuint) {
		unsafe { gl::DeleteTextures(1, &texture) };
	}

	fn active_texture(&mut self, unit: u32) {
		unsafe { gl::ActiveTexture(gl::TEXTURE0 + unit) };
	}

	fn bind_texture(&mut self, texture: GLuint) {
		unsafe { gl::BindTexture(gl::TEXTURE_2D, texture) };
	}

	fn set_texture_unit_enabled(&mut self, enabled: bool) {
		// only meaningful on compatibility profile contexts
		unsafe {
			match enabled {
				true => gl::Enable(gl::TEXTURE_2D),
				false => gl::Disable(gl::TEXTURE_2D),
			}
		}
	}

	fn set_capability(&mut self, capability: Capability, enabled: bool) {
		unsafe {
			match enabled {
				true => gl::Enable(capability.gl_capability()),
				false => gl::Disable(capability.gl_capability()),
			}
		}
	}

	fn set_vertex_attrib_array(&mut self, location: u32, enabled: bool) {
		unsafe {
			match enabled {
				true => gl::EnableVertexAttribArray(location),
				false => gl::DisableVertexAttribArray(location),
			}
		}
	}

	fn vertex_attrib_pointer(
		&mut self,
		location: u32,
		attribute: &VertexAttribute,
		stride: usize,
		offset: usize,
	) {
		unsafe {
			if attribute.is_integer && !attribute.normalized {
				gl::VertexAttribIPointer(
					location,
					attribute.count as GLint,
					attribute.ty,
					stride as GLsizei,
					offset as *const c_void,
				);
			} else {
				gl::VertexAttribPointer(
					location,
					attribute.count as GLint,
					attribute.ty,
					if attribute.normalized { gl::TRUE } else { gl::FALSE },
					stride as GLsizei,
					offset as *const c_void,
				);
			}
		}
	}

	fn use_program(&mut self, program: GLuint) {
		unsafe { gl::UseProgram(program) };
	}

	fn create_vertex_array(&mut self) -> GLuint {
		let mut vao = 0;
		unsafe { gl::GenVertexArrays(1, &mut vao) };
		vao
	}

	fn delete_vertex_array(&mut self, vao: GLuint) {
		unsafe { gl::DeleteVertexArrays(1, &vao) };
	}

	fn bind_vertex_array(&mut self, vao: GLuint) {
		unsafe { gl::BindVertexArray(vao) };
	}

	fn bind_framebuffer(&mut self, framebuffer: GLuint) {
		unsafe { gl::BindFramebuffer(gl::FRAMEBUFFER, framebuffer) };
	}

	fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
		unsafe { gl::Viewport(x, y, width, height) };
	}

	fn draw_arrays(&mut self, primitive: Primitive, first: usize, count: usize) {
		unsafe { gl::DrawArrays(primitive.gl_mode(), first as GLint, count as GLsizei) };
	}

	fn draw_elements_base_vertex(
		&mut self,
		primitive: Primitive,
		count: usize,
		index_type: IndexType,
		offset: usize,
		base_vertex: usize,
	) {
		unsafe {
			gl::DrawElementsBaseVertex(
				primitive.gl_mode(),
				count as GLsizei,
				index_type.gl_type(),
				offset as *const c_void,
				base_vertex as GLint,
			)
		};
	}
}

/// Readable name of a `DEBUG_SOURCE_*` value
fn debug_source_name(source: GLenum) -> &'static str {
	match source {
		gl::DEBUG_SOURCE_API => "API",
		gl::DEBUG_SOURCE_WINDOW_SYSTEM => "Window System",
		gl::DEBUG_SOURCE_SHADER_COMPILER => "Shader Compiler",
		gl::DEBUG_SOURCE_THIRD_PARTY => "Third Party",
		gl::DEBUG_SOURCE_APPLICATION => "Application",
		_ => "Other",
	}
}

/// Readable name of a `DEBUG_TYPE_*` value
fn debug_type_name(ty: GLenum) -> &'static str {
	match ty {
		gl::DEBUG_TYPE_ERROR => "Error",
		gl::DEBUG_TYPE_DEPRECATED_BEHAVIOR => "Deprecated Behavior",
		gl::DEBUG_TYPE_UNDEFINED_BEHAVIOR => "Undefined Behavior",
		gl::DEBUG_TYPE_PORTABILITY => "Portability",
		gl::DEBUG_TYPE_PERFORMANCE => "Performance",
		gl::DEBUG_TYPE_MARKER => "Marker",
		gl::DEBUG_TYPE_PUSH_GROUP => "Push Group",
		gl::DEBUG_TYPE_POP_GROUP => "Pop Group",
		_ => "Other",
	}
}

/// Log level driver messages of `severity` are forwarded at.
///
/// Notifications and unknown severities are only traced.
fn debug_level(severity: GLenum) -> log::Level {
	match severity {
		gl::DEBUG_SEVERITY_HIGH => log::Level::Error,
		gl::DEBUG_SEVERITY_MEDIUM => log::Level::Warn,
		gl::DEBUG_SEVERITY_LOW => log::Level::Debug,
		_ => log::Level::Trace,
	}
}

extern "system" fn gl_debug(
	source: GLenum,
	ty: GLenum,
	_id: GLuint,
	severity: GLenum,
	_length: GLsizei,
	message: *const c_char,
	_user_param: *mut c_void,
) {
	let level = debug_level(severity);
	if !log::log_enabled!(target: "OpenGL", level) {
		return
	}

	let message = unsafe { CStr::from_ptr(message) }.to_string_lossy();
	log::log!(
		target: "OpenGL",
		level,
		"{}: {}: {message}",
		debug_type_name(ty),
		debug_source_name(source),
	);
}
