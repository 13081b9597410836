// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

use std::{cell::RefCell, mem, rc::Rc};

use gl::types::GLuint;

use crate::{
	backend::{Capability, GlApi, Primitive},
	format::VertexFormat,
	geom::{ChunkId, PersistentGeometryStore},
	state::{FrameStats, StateCache},
	stream::{FlushOwner, SharedOwner, StreamConfig, StreamingVertexPool},
};

#[cfg(test)]
mod test;

/// Program and texture setup shared by draws.
///
/// Materials are compared by identity: two draws batch together only if
/// they use the same `Rc<Material>`.
#[derive(Debug, Clone)]
pub struct Material {
	pub program: GLuint,
	/// Bound to units `0..textures.len()`
	pub textures: Vec<GLuint>,
	pub blend: bool,
}

impl Material {
	pub fn new(program: GLuint) -> Self {
		Self {
			program,
			textures: Vec::new(),
			blend: false,
		}
	}

	pub fn with_texture(mut self, texture: GLuint) -> Self {
		self.textures.push(texture);
		self
	}

	pub fn with_blend(mut self, blend: bool) -> Self {
		self.blend = blend;
		self
	}

	/// # PANICS
	/// * if the material has more textures than there are texture units
	pub fn apply<G: GlApi>(&self, state: &mut StateCache<G>) {
		state.use_program(self.program);
		state.set_enabled_texture_units(0, self.textures.len() as u32);

		for (unit, texture) in self.textures.iter().enumerate() {
			state.bind_texture(unit as u32, *texture);
		}

		state.set_state(Capability::Blend, self.blend);
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
	/// 0 for the default framebuffer
	pub framebuffer: GLuint,
	pub width: i32,
	pub height: i32,
}

impl RenderTarget {
	pub fn screen(width: i32, height: i32) -> Self {
		Self {
			framebuffer: 0,
			width,
			height,
		}
	}
}

struct BatchKey {
	format: VertexFormat,
	material: Rc<Material>,
	primitive: Primitive,
}

impl BatchKey {
	fn matches(&self, format: &VertexFormat, material: &Rc<Material>, primitive: Primitive) -> bool {
		self.format == *format && Rc::ptr_eq(&self.material, material) && self.primitive == primitive
	}
}

/// Vertices streamed by the coordinator since the last flush
struct StreamBatch {
	key: Option<BatchKey>,
	vertices: usize,
	vao: GLuint,
}

impl<G: GlApi> FlushOwner<G> for StreamBatch {
	fn on_flush(&mut self, state: &mut StateCache<G>, buffer: GLuint, bytes_used: usize) {
		let vertices = mem::take(&mut self.vertices);
		let Some(key) = &self.key else { return };
		if vertices == 0 {
			return
		}

		debug_assert_eq!(vertices * key.format.vertex_size(), bytes_used);

		key.material.apply(state);
		state.bind_vertex_array(self.vao);
		state.bind_array_buffer(buffer);
		key.format.setup(state, 0);

		state.gl_mut().draw_arrays(key.primitive, 0, vertices);
		state.increase_draw_call_counter(key.primitive.primitive_count(vertices));
	}
}

/// Frame level entry point tying the state cache, the streaming pool and
/// persistent geometry together.
///
/// Streamed vertices are batched while their format, material and
/// primitive stay the same. Anything else that changes GL state through
/// the coordinator flushes the pending batch first, so it is drawn with
/// the state it was streamed under.
pub struct RenderCoordinator<G: GlApi> {
	state: StateCache<G>,
	pool: StreamingVertexPool<G>,
	batch: Rc<RefCell<StreamBatch>>,
	batch_owner: SharedOwner<G>,
	targets: Vec<RenderTarget>,
	viewport: Option<[i32; 4]>,
	frame: u64,
}

impl<G: GlApi + 'static> RenderCoordinator<G> {
	/// Create a coordinator drawing to `screen`
	pub fn new(gl: G, config: StreamConfig, screen: RenderTarget) -> Self {
		let mut state = StateCache::new(gl);
		let pool = StreamingVertexPool::new(&mut state, config);
		let vao = state.gl_mut().create_vertex_array();

		let batch = Rc::new(RefCell::new(StreamBatch {
			key: None,
			vertices: 0,
			vao,
		}));
		let batch_owner: SharedOwner<G> = batch.clone();

		let mut coordinator = Self {
			state,
			pool,
			batch,
			batch_owner,
			targets: vec![screen],
			viewport: None,
			frame: 0,
		};

		coordinator.apply_target();
		coordinator
	}
}

impl<G: GlApi> RenderCoordinator<G> {
	/// Stream `vertex_count` vertices of `format`, returning the bytes to
	/// write them into.
	///
	/// The vertices are drawn as `primitive` with `material` on the next
	/// flush. Strip and fan primitives may be split by an overflow flush,
	/// so stream them one strip at a time with a flush in between.
	///
	/// # PANICS
	/// * if the vertices don't fit in the streaming pool
	pub fn stream_vertices(
		&mut self,
		format: &VertexFormat,
		material: &Rc<Material>,
		primitive: Primitive,
		vertex_count: usize,
	) -> &mut [u8] {
		let same_batch = self
			.batch
			.borrow()
			.key
			.as_ref()
			.map_or(false, |key| key.matches(format, material, primitive));

		if !same_batch {
			self.pool.flush(&mut self.state);
			self.batch.borrow_mut().key = Some(BatchKey {
				format: format.clone(),
				material: material.clone(),
				primitive,
			});
		}

		let bytes = self.pool.alloc(
			&mut self.state,
			&self.batch_owner,
			vertex_count * format.vertex_size(),
		);

		// counted after alloc, which may have flushed the earlier vertices
		self.batch.borrow_mut().vertices += vertex_count;
		bytes
	}

	/// Stream `size` bytes for another owner sharing the pool.
	pub fn stream_for(&mut self, owner: &SharedOwner<G>, size: usize) -> &mut [u8] {
		self.pool.alloc(&mut self.state, owner, size)
	}

	/// Draw whatever is pending in the streaming pool
	pub fn flush(&mut self) {
		self.pool.flush(&mut self.state);
	}

	/// Draw a persistent chunk with `material`
	pub fn draw_chunk(
		&mut self,
		store: &mut PersistentGeometryStore,
		chunk: ChunkId,
		material: &Material,
		primitive: Primitive,
	) {
		self.flush();
		material.apply(&mut self.state);
		store.draw_chunk(&mut self.state, chunk, primitive);
	}

	/// Draw persistent `vertices` indexed by `indices` with `material`
	pub fn draw_indexed(
		&mut self,
		store: &mut PersistentGeometryStore,
		vertices: ChunkId,
		indices: ChunkId,
		material: &Material,
		primitive: Primitive,
	) {
		self.flush();
		material.apply(&mut self.state);
		store.draw_indexed(&mut self.state, vertices, indices, primitive);
	}

	pub fn set_render_state(&mut self, capability: Capability, enabled: bool) {
		self.flush();
		self.state.set_state(capability, enabled);
	}

	/// Set the viewport of the current render target, with `y` measured
	/// from the top.
	pub fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
		self.flush();

		let target = self.current_target();
		self.apply_viewport([x, target.height - y - height, width, height]);
	}

	pub fn push_render_target(&mut self, target: RenderTarget) {
		self.flush();
		self.targets.push(target);
		self.apply_target();
	}

	/// # PANICS
	/// * if only the screen target is left
	pub fn pop_render_target(&mut self) -> RenderTarget {
		assert!(self.targets.len() > 1, "render target stack underflow");

		self.flush();
		let popped = self.current_target();
		self.targets.pop();
		self.apply_target();
		popped
	}

	/// Update the screen size after the window was resized
	pub fn resize_screen(&mut self, width: i32, height: i32) {
		self.flush();
		self.targets[0].width = width;
		self.targets[0].height = height;

		if self.targets.len() == 1 {
			self.apply_target();
		}
	}

	pub fn current_target(&self) -> RenderTarget {
		self.targets[self.targets.len() - 1]
	}

	fn apply_target(&mut self) {
		let target = self.current_target();
		self.state.gl_mut().bind_framebuffer(target.framebuffer);
		self.apply_viewport([0, 0, target.width, target.height]);
	}

	fn apply_viewport(&mut self, viewport: [i32; 4]) {
		if self.viewport == Some(viewport) {
			return
		}

		let [x, y, width, height] = viewport;
		self.state.gl_mut().viewport(x, y, width, height);
		self.viewport = Some(viewport);
	}

	/// Flush, then return this frame's counters and reset them
	pub fn end_frame(&mut self) -> FrameStats {
		self.flush();

		let stats = self.state.stats();
		log::trace!("frame {}: {stats:?}", self.frame);

		self.state.clear_stats();
		self.frame += 1;
		stats
	}

	#[inline]
	pub fn state(&self) -> &StateCache<G> {
		&self.state
	}

	/// State cache access for changes the coordinator does not wrap.
	///
	/// # SIDE EFFECTS
	/// * flushes the streaming pool
	pub fn state_mut(&mut self) -> &mut StateCache<G> {
		self.flush();
		&mut self.state
	}

	pub fn pool(&self) -> &StreamingVertexPool<G> {
		&self.pool
	}

	/// Forget all cached state after GL calls made outside the coordinator
	pub fn invalidate_state(&mut self) {
		self.flush();
		self.state.init();
		self.viewport = None;
		self.apply_target();
	}

	/// Flush and free every GL object the coordinator owns, returning the backend
	pub fn destroy(mut self) -> G {
		self.pool.destroy(&mut self.state);

		let vao = self.batch.borrow().vao;
		self.state.delete_vertex_array(vao);

		self.state.into_inner()
	}
}
