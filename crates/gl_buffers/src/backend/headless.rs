// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

//! Software [`GlApi`] keeping buffer storage in memory.
//!
//! Every call is recorded as a [`GlCall`], which makes this backend useful
//! for checking which calls reach the driver without a GL context.

use std::collections::HashMap;

use gl::types::GLuint;

use super::{BufferTarget, BufferUsage, Capability, GlApi, IndexType, Primitive};
use crate::format::VertexAttribute;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlCall {
	CreateBuffer(GLuint),
	DeleteBuffer(GLuint),
	BindBuffer(BufferTarget, GLuint),
	BufferData { target: BufferTarget, size: usize, usage: BufferUsage },
	BufferSubData { target: BufferTarget, offset: usize, len: usize },
	MapBuffer(GLuint),
	UnmapBuffer(GLuint),
	CreateTexture(GLuint),
	DeleteTexture(GLuint),
	ActiveTexture(u32),
	BindTexture { unit: u32, texture: GLuint },
	SetTextureUnitEnabled { unit: u32, enabled: bool },
	SetCapability(Capability, bool),
	SetVertexAttribArray(u32, bool),
	VertexAttribPointer { location: u32, stride: usize, offset: usize },
	UseProgram(GLuint),
	CreateVertexArray(GLuint),
	DeleteVertexArray(GLuint),
	BindVertexArray(GLuint),
	BindFramebuffer(GLuint),
	Viewport(i32, i32, i32, i32),
	DrawArrays { primitive: Primitive, first: usize, count: usize },
	DrawElements { primitive: Primitive, count: usize, offset: usize, base_vertex: usize },
}

#[derive(Default)]
struct HeadlessBuffer {
	data: Vec<u8>,
	mapped: bool,
}

pub struct HeadlessGl {
	calls: Vec<GlCall>,
	buffers: HashMap<GLuint, HeadlessBuffer>,
	bound_buffers: [GLuint; 2],
	active_texture: u32,
	next_handle: GLuint,
	buffer_mapping: bool,
	lose_next_unmap: bool,
}

impl HeadlessGl {
	pub fn new() -> Self {
		Self {
			calls: Vec::new(),
			buffers: HashMap::new(),
			bound_buffers: [0; 2],
			active_texture: 0,
			next_handle: 1,
			buffer_mapping: true,
			lose_next_unmap: false,
		}
	}

	/// Backend reporting no buffer mapping support, like GLES without `OES_mapbuffer`
	pub fn without_buffer_mapping() -> Self {
		Self {
			buffer_mapping: false,
			..Self::new()
		}
	}

	/// Make the next unmap report that the mapped contents were lost
	pub fn lose_next_unmap(&mut self) {
		self.lose_next_unmap = true;
	}

	pub fn calls(&self) -> &[GlCall] {
		&self.calls
	}

	pub fn take_calls(&mut self) -> Vec<GlCall> {
		std::mem::take(&mut self.calls)
	}

	pub fn count_calls(&self, predicate: impl Fn(&GlCall) -> bool) -> usize {
		self.calls.iter().filter(|call| predicate(call)).count()
	}

	/// Current contents of `buffer`, if it exists
	pub fn buffer_contents(&self, buffer: GLuint) -> Option<&[u8]> {
		self.buffers.get(&buffer).map(|b| &b.data[..])
	}

	pub fn is_mapped(&self, buffer: GLuint) -> bool {
		self.buffers.get(&buffer).map(|b| b.mapped).unwrap_or(false)
	}

	pub fn mapped_buffer_count(&self) -> usize {
		self.buffers.values().filter(|b| b.mapped).count()
	}

	pub fn bound_buffer(&self, target: BufferTarget) -> GLuint {
		self.bound_buffers[target as usize]
	}

	fn next_handle(&mut self) -> GLuint {
		let handle = self.next_handle;
		self.next_handle += 1;
		handle
	}

	fn bound_mut(&mut self, target: BufferTarget) -> (GLuint, &mut HeadlessBuffer) {
		let handle = self.bound_buffers[target as usize];
		assert_ne!(handle, 0, "no buffer bound to {target:?}");

		let buffer = self
			.buffers
			.get_mut(&handle)
			.unwrap_or_else(|| panic!("bound buffer {handle} does not exist"));
		(handle, buffer)
	}
}

impl Default for HeadlessGl {
	fn default() -> Self {
		Self::new()
	}
}

unsafe impl GlApi for HeadlessGl {
	fn supports_buffer_mapping(&self) -> bool {
		self.buffer_mapping
	}

	fn create_buffer(&mut self) -> GLuint {
		let handle = self.next_handle();
		self.buffers.insert(handle, HeadlessBuffer::default());
		self.calls.push(GlCall::CreateBuffer(handle));
		handle
	}

	fn delete_buffer(&mut self, buffer: GLuint) {
		self.buffers.remove(&buffer);
		self.bound_buffers.iter_mut().filter(|b| **b == buffer).for_each(|b| *b = 0);
		self.calls.push(GlCall::DeleteBuffer(buffer));
	}

	fn bind_buffer(&mut self, target: BufferTarget, buffer: GLuint) {
		assert!(
			buffer == 0 || self.buffers.contains_key(&buffer),
			"binding nonexistent buffer {buffer}"
		);
		self.bound_buffers[target as usize] = buffer;
		self.calls.push(GlCall::BindBuffer(target, buffer));
	}

	fn buffer_data(
		&mut self,
		target: BufferTarget,
		size: usize,
		data: Option<&[u8]>,
		usage: BufferUsage,
	) {
		let (handle, buffer) = self.bound_mut(target);
		assert!(!buffer.mapped, "respecifying storage of mapped buffer {handle}");

		buffer.data = match data {
			Some(data) => data[..size].to_vec(),
			None => vec![0; size],
		};
		self.calls.push(GlCall::BufferData { target, size, usage });
	}

	fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]) {
		let (handle, buffer) = self.bound_mut(target);
		assert!(!buffer.mapped, "uploading into mapped buffer {handle}");
		assert!(
			offset + data.len() <= buffer.data.len(),
			"upload {}..{} outside buffer {handle} of size {}",
			offset,
			offset + data.len(),
			buffer.data.len(),
		);

		buffer.data[offset..offset + data.len()].copy_from_slice(data);
		self.calls.push(GlCall::BufferSubData {
			target,
			offset,
			len: data.len(),
		});
	}

	fn map_buffer(&mut self, target: BufferTarget) -> *mut u8 {
		assert!(self.buffer_mapping, "buffer mapping is not supported");

		let (handle, buffer) = self.bound_mut(target);
		assert!(!buffer.mapped, "buffer {handle} is already mapped");

		buffer.mapped = true;
		let ptr = buffer.data.as_mut_ptr();
		self.calls.push(GlCall::MapBuffer(handle));
		ptr
	}

	fn unmap_buffer(&mut self, target: BufferTarget) -> bool {
		let (handle, buffer) = self.bound_mut(target);
		assert!(buffer.mapped, "buffer {handle} is not mapped");

		buffer.mapped = false;
		self.calls.push(GlCall::UnmapBuffer(handle));
		!std::mem::take(&mut self.lose_next_unmap)
	}

	fn create_texture(&mut self) -> GLuint {
		let handle = self.next_handle();
		self.calls.push(GlCall::CreateTexture(handle));
		handle
	}

	fn delete_texture(&mut self, texture: GLuint) {
		self.calls.push(GlCall::DeleteTexture(texture));
	}

	fn active_texture(&mut self, unit: u32) {
		self.active_texture = unit;
		self.calls.push(GlCall::ActiveTexture(unit));
	}

	fn bind_texture(&mut self, texture: GLuint) {
		self.calls.push(GlCall::BindTexture {
			unit: self.active_texture,
			texture,
		});
	}

	fn set_texture_unit_enabled(&mut self, enabled: bool) {
		self.calls.push(GlCall::SetTextureUnitEnabled {
			unit: self.active_texture,
			enabled,
		});
	}

	fn set_capability(&mut self, capability: Capability, enabled: bool) {
		self.calls.push(GlCall::SetCapability(capability, enabled));
	}

	fn set_vertex_attrib_array(&mut self, location: u32, enabled: bool) {
		self.calls.push(GlCall::SetVertexAttribArray(location, enabled));
	}

	fn vertex_attrib_pointer(
		&mut self,
		location: u32,
		_attribute: &VertexAttribute,
		stride: usize,
		offset: usize,
	) {
		self.calls.push(GlCall::VertexAttribPointer {
			location,
			stride,
			offset,
		});
	}

	fn use_program(&mut self, program: GLuint) {
		self.calls.push(GlCall::UseProgram(program));
	}

	fn create_vertex_array(&mut self) -> GLuint {
		let handle = self.next_handle();
		self.calls.push(GlCall::CreateVertexArray(handle));
		handle
	}

	fn delete_vertex_array(&mut self, vao: GLuint) {
		self.calls.push(GlCall::DeleteVertexArray(vao));
	}

	fn bind_vertex_array(&mut self, vao: GLuint) {
		self.calls.push(GlCall::BindVertexArray(vao));
	}

	fn bind_framebuffer(&mut self, framebuffer: GLuint) {
		self.calls.push(GlCall::BindFramebuffer(framebuffer));
	}

	fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
		self.calls.push(GlCall::Viewport(x, y, width, height));
	}

	fn draw_arrays(&mut self, primitive: Primitive, first: usize, count: usize) {
		self.calls.push(GlCall::DrawArrays {
			primitive,
			first,
			count,
		});
	}

	fn draw_elements_base_vertex(
		&mut self,
		primitive: Primitive,
		count: usize,
		_index_type: IndexType,
		offset: usize,
		base_vertex: usize,
	) {
		self.calls.push(GlCall::DrawElements {
			primitive,
			count,
			offset,
			base_vertex,
		});
	}
}
