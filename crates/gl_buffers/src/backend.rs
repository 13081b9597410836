// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

use gl::types::{GLenum, GLuint};

use crate::format::VertexAttribute;

pub mod headless;
pub mod native;

pub use self::{headless::HeadlessGl, native::NativeGl};

/// The subset of the graphics API this crate issues calls through.
///
/// Every method operates on the context's current bindings, the same
/// way the underlying GL entry points do. Callers are expected to route
/// binds through [`StateCache`](crate::state::StateCache) instead of
/// calling the bind methods directly.
///
/// # SAFETY
/// * `map_buffer` must return either null or a pointer valid for reads and
///   writes of the full size of the bound buffer's storage, which stays valid
///   until `unmap_buffer` is called for that buffer, or the buffer's storage
///   is respecified or deleted.
pub unsafe trait GlApi {
	/// Whether `map_buffer` may be used
	fn supports_buffer_mapping(&self) -> bool;

	fn create_buffer(&mut self) -> GLuint;
	fn delete_buffer(&mut self, buffer: GLuint);
	fn bind_buffer(&mut self, target: BufferTarget, buffer: GLuint);
	/// (Re)specify storage of the buffer bound to `target`.
	///
	/// `data` of `None` leaves the contents undefined.
	fn buffer_data(
		&mut self,
		target: BufferTarget,
		size: usize,
		data: Option<&[u8]>,
		usage: BufferUsage,
	);
	fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]);
	/// Map the whole buffer bound to `target` for writing.
	///
	/// Returns null on failure.
	fn map_buffer(&mut self, target: BufferTarget) -> *mut u8;
	/// Returns false if the buffer's contents were lost while mapped.
	fn unmap_buffer(&mut self, target: BufferTarget) -> bool;

	fn create_texture(&mut self) -> GLuint;
	fn delete_texture(&mut self, texture: GLuint);
	fn active_texture(&mut self, unit: u32);
	/// Bind a 2D texture to the active unit
	fn bind_texture(&mut self, texture: GLuint);
	/// Toggle fixed function texturing on the active unit
	fn set_texture_unit_enabled(&mut self, enabled: bool);

	fn set_capability(&mut self, capability: Capability, enabled: bool);
	fn set_vertex_attrib_array(&mut self, location: u32, enabled: bool);
	/// Describe the attribute at `location`, sourced from the bound array buffer
	fn vertex_attrib_pointer(
		&mut self,
		location: u32,
		attribute: &VertexAttribute,
		stride: usize,
		offset: usize,
	);
	fn use_program(&mut self, program: GLuint);

	fn create_vertex_array(&mut self) -> GLuint;
	fn delete_vertex_array(&mut self, vao: GLuint);
	fn bind_vertex_array(&mut self, vao: GLuint);

	fn bind_framebuffer(&mut self, framebuffer: GLuint);
	fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32);

	fn draw_arrays(&mut self, primitive: Primitive, first: usize, count: usize);
	/// Draw `count` indices starting `offset` bytes into the bound element
	/// buffer, adding `base_vertex` to every index.
	fn draw_elements_base_vertex(
		&mut self,
		primitive: Primitive,
		count: usize,
		index_type: IndexType,
		offset: usize,
		base_vertex: usize,
	);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
	Array,
	ElementArray,
}

impl BufferTarget {
	#[inline]
	pub fn gl_target(self) -> GLenum {
		match self {
			Self::Array => gl::ARRAY_BUFFER,
			Self::ElementArray => gl::ELEMENT_ARRAY_BUFFER,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
	Static,
	Dynamic,
	Stream,
}

impl BufferUsage {
	#[inline]
	pub fn gl_usage(self) -> GLenum {
		match self {
			Self::Static => gl::STATIC_DRAW,
			Self::Dynamic => gl::DYNAMIC_DRAW,
			Self::Stream => gl::STREAM_DRAW,
		}
	}
}

/// Boolean render states tracked by the state cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
	Blend,
	DepthTest,
	CullFace,
	ScissorTest,
}

impl Capability {
	pub const COUNT: usize = 4;

	#[inline]
	pub fn gl_capability(self) -> GLenum {
		match self {
			Self::Blend => gl::BLEND,
			Self::DepthTest => gl::DEPTH_TEST,
			Self::CullFace => gl::CULL_FACE,
			Self::ScissorTest => gl::SCISSOR_TEST,
		}
	}

	#[inline]
	pub(crate) fn index(self) -> usize {
		self as usize
	}
}

/// Per-vertex input arrays.
///
/// Each array is fed through the generic attribute at [`ClientArray::location`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientArray {
	Position,
	Normal,
	TexCoord,
	Color,
}

impl ClientArray {
	pub const COUNT: usize = 4;
	pub const ALL: [ClientArray; Self::COUNT] =
		[Self::Position, Self::Normal, Self::TexCoord, Self::Color];

	#[inline]
	pub fn location(self) -> u32 {
		self as u32
	}

	#[inline]
	pub(crate) fn index(self) -> usize {
		self as usize
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
	Points,
	Lines,
	LineStrip,
	Triangles,
	TriangleStrip,
	TriangleFan,
}

impl Primitive {
	#[inline]
	pub fn gl_mode(self) -> GLenum {
		match self {
			Self::Points => gl::POINTS,
			Self::Lines => gl::LINES,
			Self::LineStrip => gl::LINE_STRIP,
			Self::Triangles => gl::TRIANGLES,
			Self::TriangleStrip => gl::TRIANGLE_STRIP,
			Self::TriangleFan => gl::TRIANGLE_FAN,
		}
	}

	/// Number of primitives assembled from `vertices` vertices
	pub fn primitive_count(self, vertices: usize) -> usize {
		match self {
			Self::Points => vertices,
			Self::Lines => vertices / 2,
			Self::LineStrip => vertices.saturating_sub(1),
			Self::Triangles => vertices / 3,
			Self::TriangleStrip | Self::TriangleFan => vertices.saturating_sub(2),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
	U16,
	U32,
}

impl IndexType {
	#[inline]
	pub fn size(self) -> usize {
		match self {
			Self::U16 => 2,
			Self::U32 => 4,
		}
	}

	#[inline]
	pub fn gl_type(self) -> GLenum {
		match self {
			Self::U16 => gl::UNSIGNED_SHORT,
			Self::U32 => gl::UNSIGNED_INT,
		}
	}
}
