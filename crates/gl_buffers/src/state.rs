// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

use std::ops::Range;

use gl::types::GLuint;

use crate::backend::{BufferTarget, Capability, ClientArray, GlApi};


pub const MAX_TEXTURE_UNITS: usize = 8;

/// Counters reset by [`StateCache::clear_stats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
	pub buffer_binds: usize,
	pub texture_binds: usize,
	pub program_binds: usize,
	pub state_changes: usize,
	pub draw_calls: usize,
	pub primitives_drawn: usize,
}

/// Record of the bindings currently set on the GL context.
///
/// Every bind goes through here and is skipped if the requested value is
/// already bound. `None` means the binding is unknown, so the next request
/// always reaches the driver.
///
/// The cache only stays correct while nothing binds behind its back.
/// Call [`init`](Self::init) after any external change to the context.
pub struct StateCache<G: GlApi> {
	gl: G,
	array_buffer: Option<GLuint>,
	element_buffer: Option<GLuint>,
	vertex_array: Option<GLuint>,
	program: Option<GLuint>,
	active_texture: Option<u32>,
	textures: [Option<GLuint>; MAX_TEXTURE_UNITS],
	enabled_texture_units: Range<u32>,
	capabilities: [Option<bool>; Capability::COUNT],
	client_arrays: [Option<bool>; ClientArray::COUNT],
	stats: FrameStats,
}

impl<G: GlApi> StateCache<G> {
	pub fn new(gl: G) -> Self {
		let mut state = Self {
			gl,
			array_buffer: None,
			element_buffer: None,
			vertex_array: None,
			program: None,
			active_texture: None,
			textures: [None; MAX_TEXTURE_UNITS],
			enabled_texture_units: 0..0,
			capabilities: [None; Capability::COUNT],
			client_arrays: [None; ClientArray::COUNT],
			stats: FrameStats::default(),
		};

		state.init();
		state
	}

	/// Forget every cached binding and zero the counters
	pub fn init(&mut self) {
		self.array_buffer = None;
		self.element_buffer = None;
		self.vertex_array = None;
		self.program = None;
		self.active_texture = None;
		self.textures = [None; MAX_TEXTURE_UNITS];
		self.enabled_texture_units = 0..0;
		self.capabilities = [None; Capability::COUNT];
		self.client_arrays = [None; ClientArray::COUNT];
		self.clear_stats();
	}

	pub fn clear_stats(&mut self) {
		if self.stats.draw_calls > 0 {
			log::debug!("clearing stats: {:?}", self.stats);
		}

		self.stats = FrameStats::default();
	}

	pub fn stats(&self) -> FrameStats {
		self.stats
	}

	pub fn increase_draw_call_counter(&mut self, primitives: usize) {
		self.stats.draw_calls += 1;
		self.stats.primitives_drawn += primitives;
	}

	/// Backend access for calls that do not change cached bindings
	#[inline]
	pub fn gl(&self) -> &G {
		&self.gl
	}

	/// Backend access for calls that do not change cached bindings.
	///
	/// Binding through this desynchronizes the cache.
	#[inline]
	pub fn gl_mut(&mut self) -> &mut G {
		&mut self.gl
	}

	pub fn into_inner(self) -> G {
		self.gl
	}

	pub fn bind_array_buffer(&mut self, buffer: GLuint) {
		if self.array_buffer == Some(buffer) {
			return
		}

		self.gl.bind_buffer(BufferTarget::Array, buffer);
		self.array_buffer = Some(buffer);
		self.stats.buffer_binds += 1;
	}

	/// Element buffer bindings belong to the bound vertex array object.
	pub fn bind_element_buffer(&mut self, buffer: GLuint) {
		if self.element_buffer == Some(buffer) {
			return
		}

		self.gl.bind_buffer(BufferTarget::ElementArray, buffer);
		self.element_buffer = Some(buffer);
		self.stats.buffer_binds += 1;
	}

	#[inline]
	pub fn bind_buffer(&mut self, target: BufferTarget, buffer: GLuint) {
		match target {
			BufferTarget::Array => self.bind_array_buffer(buffer),
			BufferTarget::ElementArray => self.bind_element_buffer(buffer),
		}
	}

	pub fn bound_buffer(&self, target: BufferTarget) -> Option<GLuint> {
		match target {
			BufferTarget::Array => self.array_buffer,
			BufferTarget::ElementArray => self.element_buffer,
		}
	}

	/// Delete `buffer`, dropping it from the cache if bound.
	pub fn delete_buffer(&mut self, buffer: GLuint) {
		self.gl.delete_buffer(buffer);

		// deleting a bound buffer reverts the binding to 0
		if self.array_buffer == Some(buffer) {
			self.array_buffer = Some(0);
		}
		if self.element_buffer == Some(buffer) {
			self.element_buffer = Some(0);
		}
	}

	/// Binding a vertex array object swaps out the element buffer binding
	/// and the enabled attribute arrays, so both become unknown.
	pub fn bind_vertex_array(&mut self, vao: GLuint) {
		if self.vertex_array == Some(vao) {
			return
		}

		self.gl.bind_vertex_array(vao);
		self.vertex_array = Some(vao);
		self.element_buffer = None;
		self.client_arrays = [None; ClientArray::COUNT];
	}

	pub fn delete_vertex_array(&mut self, vao: GLuint) {
		self.gl.delete_vertex_array(vao);

		if self.vertex_array == Some(vao) {
			self.vertex_array = None;
			self.element_buffer = None;
			self.client_arrays = [None; ClientArray::COUNT];
		}
	}

	pub fn use_program(&mut self, program: GLuint) {
		if self.program == Some(program) {
			return
		}

		self.gl.use_program(program);
		self.program = Some(program);
		self.stats.program_binds += 1;
	}

	pub fn set_state(&mut self, capability: Capability, enabled: bool) {
		let cached = &mut self.capabilities[capability.index()];
		if *cached == Some(enabled) {
			return
		}

		self.gl.set_capability(capability, enabled);
		*cached = Some(enabled);
		self.stats.state_changes += 1;
	}

	pub fn set_client_state(&mut self, array: ClientArray, enabled: bool) {
		let cached = &mut self.client_arrays[array.index()];
		if *cached == Some(enabled) {
			return
		}

		self.gl.set_vertex_attrib_array(array.location(), enabled);
		*cached = Some(enabled);
	}

	/// # PANICS
	/// * if `unit` is not below [`MAX_TEXTURE_UNITS`]
	pub fn set_active_texture(&mut self, unit: u32) {
		assert!(
			(unit as usize) < MAX_TEXTURE_UNITS,
			"texture unit {unit} out of range (max {MAX_TEXTURE_UNITS})"
		);

		if self.active_texture == Some(unit) {
			return
		}

		self.gl.active_texture(unit);
		self.active_texture = Some(unit);
	}

	/// Bind `texture` to `unit`, leaving `unit` active
	pub fn bind_texture(&mut self, unit: u32, texture: GLuint) {
		self.set_active_texture(unit);

		let cached = &mut self.textures[unit as usize];
		if *cached == Some(texture) {
			return
		}

		self.gl.bind_texture(texture);
		*cached = Some(texture);
		self.stats.texture_binds += 1;
	}

	/// Enable texturing on units `first..first + count` only.
	///
	/// Units are toggled relative to the previously enabled range, so
	/// units staying inside the range are left alone.
	///
	/// # PANICS
	/// * if the range extends past [`MAX_TEXTURE_UNITS`]
	pub fn set_enabled_texture_units(&mut self, first: u32, count: u32) {
		let end = first
			.checked_add(count)
			.filter(|end| *end as usize <= MAX_TEXTURE_UNITS)
			.unwrap_or_else(|| {
				panic!("texture units {first}+{count} out of range (max {MAX_TEXTURE_UNITS})")
			});
		let range = first..end;

		let previous = self.enabled_texture_units.clone();

		// units dropping out below the new range
		for unit in previous.start..previous.end.min(range.start) {
			self.set_texture_unit_enabled(unit, false);
		}

		for unit in range.clone().filter(|unit| !previous.contains(unit)) {
			self.set_texture_unit_enabled(unit, true);
		}

		// units dropping out above the new range
		for unit in previous.start.max(range.end)..previous.end {
			self.set_texture_unit_enabled(unit, false);
		}

		self.enabled_texture_units = range;
	}

	pub fn enabled_texture_units(&self) -> Range<u32> {
		self.enabled_texture_units.clone()
	}

	fn set_texture_unit_enabled(&mut self, unit: u32, enabled: bool) {
		self.set_active_texture(unit);
		self.gl.set_texture_unit_enabled(enabled);
		self.stats.state_changes += 1;
	}

	/// Unbind `texture` from every unit holding it.
	///
	/// Must be called before the texture object is deleted.
	pub fn invalidate_texture(&mut self, texture: GLuint) {
		for unit in 0..MAX_TEXTURE_UNITS as u32 {
			if self.textures[unit as usize] == Some(texture) {
				self.bind_texture(unit, 0);
			}
		}
	}

	pub fn create_texture(&mut self) -> GLuint {
		self.gl.create_texture()
	}

	pub fn delete_texture(&mut self, texture: GLuint) {
		self.invalidate_texture(texture);
		self.gl.delete_texture(texture);
	}

	pub fn bound_texture(&self, unit: u32) -> Option<GLuint> {
		self.textures.get(unit as usize).copied().flatten()
	}

	pub fn bound_program(&self) -> Option<GLuint> {
		self.program
	}
}
