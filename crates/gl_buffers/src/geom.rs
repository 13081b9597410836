// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

use std::{
	ops::{BitOr, Range},
	ptr::NonNull,
	slice,
};

use gl::types::GLuint;
use thiserror::Error;

use crate::{
	backend::{BufferTarget, BufferUsage, GlApi, IndexType, Primitive},
	format::VertexFormat,
	state::StateCache,
};

#[cfg(test)]
mod test;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeomError {
	#[error("{requested} bytes requested, backing buffers are limited to {max} bytes")]
	ExceedsMaxBufferSize { requested: usize, max: usize },
	#[error("minimum backing buffer size ({min} bytes) is above the maximum ({max} bytes)")]
	InvalidSizeLimits { min: usize, max: usize },
}

#[derive(Debug, Clone)]
pub struct GeomStoreConfig {
	/// Shown in log messages
	pub name: String,
	pub min_buffer_size: usize,
	pub max_buffer_size: usize,
	pub usage: BufferUsage,
}

impl Default for GeomStoreConfig {
	fn default() -> Self {
		Self {
			name: String::from("geometry"),
			min_buffer_size: 64 * 1024,
			max_buffer_size: 64 * 1024 * 1024,
			usage: BufferUsage::Dynamic,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocFlags(u32);

impl AllocFlags {
	pub const NONE: Self = Self(0);
	/// Map the chunk for writing right away, as if by
	/// [`PersistentGeometryStore::map_chunk`]
	pub const MAP: Self = Self(1);

	#[inline]
	pub fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}
}

impl BitOr for AllocFlags {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self {
		Self(self.0 | rhs.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(usize);

struct BackingBuffer {
	handle: GLuint,
	size: usize,
	mapped: Option<NonNull<u8>>,
	map_refs: u32,
	/// first byte not yet handed to a region
	cursor: usize,
}

enum RegionKind {
	/// Vertex regions bake their format into their own VAO, so a region
	/// holds a single format.
	Vertex { format: VertexFormat, vao: GLuint },
	Index(IndexType),
}

#[derive(Clone, Copy)]
enum RegionKey<'a> {
	Vertex(&'a VertexFormat),
	Index(IndexType),
}

struct Region {
	buffer: usize,
	offset: usize,
	length: usize,
	element_size: usize,
	capacity: usize,
	cursor: usize,
	kind: RegionKind,
}

impl Region {
	fn matches(&self, key: &RegionKey) -> bool {
		match (&self.kind, key) {
			(RegionKind::Vertex { format, .. }, RegionKey::Vertex(key)) => format == *key,
			(RegionKind::Index(ty), RegionKey::Index(key)) => ty == key,
			_ => false,
		}
	}

	#[inline]
	fn remaining(&self) -> usize {
		self.capacity - self.cursor
	}
}

struct Chunk {
	region: Option<usize>,
	index: usize,
	count: usize,
	refs: u32,
	/// handle of the region's backing buffer
	buffer: GLuint,
}

/// Long lived vertex and index storage.
///
/// Storage is bump allocated out of regions, each holding elements of
/// one vertex format or index type, carved out of backing buffers which
/// grow by doubling up to a configured maximum.
///
/// Storage is never reclaimed: releasing a chunk only drops a reference,
/// so memory use grows with every allocation over the store's lifetime.
pub struct PersistentGeometryStore {
	config: GeomStoreConfig,
	buffers: Vec<BackingBuffer>,
	regions: Vec<Region>,
	chunks: Vec<Chunk>,
}

impl PersistentGeometryStore {
	pub fn new(config: GeomStoreConfig) -> Self {
		Self {
			config,
			buffers: Vec::new(),
			regions: Vec::new(),
			chunks: Vec::new(),
		}
	}

	pub fn name(&self) -> &str {
		&self.config.name
	}

	/// Only affects backing buffers created afterwards
	pub fn set_min_buffer_size(&mut self, size: usize) {
		self.config.min_buffer_size = size;
	}

	/// Only affects backing buffers created afterwards
	pub fn set_max_buffer_size(&mut self, size: usize) {
		self.config.max_buffer_size = size;
	}

	/// Create a chunk with no storage and a single reference
	pub fn create_chunk(&mut self) -> ChunkId {
		self.chunks.push(Chunk {
			region: None,
			index: 0,
			count: 0,
			refs: 1,
			buffer: 0,
		});

		ChunkId(self.chunks.len() - 1)
	}

	pub fn add_ref(&mut self, chunk: ChunkId) {
		self.chunk_mut(chunk).refs += 1;
	}

	/// Drop a reference to `chunk`.
	///
	/// The chunk's storage stays allocated even after the last reference is gone.
	pub fn release_chunk(&mut self, chunk: ChunkId) {
		let name = &self.config.name;
		let data = &mut self.chunks[chunk.0];
		assert!(data.refs > 0, "chunk {chunk:?} released more times than referenced");

		data.refs -= 1;
		if data.refs == 0 && data.region.is_some() {
			log::trace!("[{name}] released {chunk:?}, {} elements stay allocated", data.count);
		}
	}

	pub fn chunk_refs(&self, chunk: ChunkId) -> u32 {
		self.chunks[chunk.0].refs
	}

	/// Reserve `count` vertices of `format` for `chunk`.
	///
	/// Calling this again for a chunk which already has storage does not
	/// resize it, and `count` must not exceed the original reservation.
	///
	/// # PANICS
	/// * if `count` is 0
	/// * if the chunk already has storage and `count` is above its size
	pub fn alloc_vertices<G: GlApi>(
		&mut self,
		state: &mut StateCache<G>,
		chunk: ChunkId,
		format: &VertexFormat,
		count: usize,
		flags: AllocFlags,
	) -> Result<(), GeomError> {
		self.alloc_elements(state, chunk, RegionKey::Vertex(format), count, flags)
	}

	/// Reserve `count` indices of `index_type` for `chunk`.
	///
	/// Same rules as [`alloc_vertices`](Self::alloc_vertices).
	pub fn alloc_indices<G: GlApi>(
		&mut self,
		state: &mut StateCache<G>,
		chunk: ChunkId,
		index_type: IndexType,
		count: usize,
		flags: AllocFlags,
	) -> Result<(), GeomError> {
		self.alloc_elements(state, chunk, RegionKey::Index(index_type), count, flags)
	}

	/// Create a chunk and reserve `count` vertices for it
	pub fn alloc_chunk<G: GlApi>(
		&mut self,
		state: &mut StateCache<G>,
		format: &VertexFormat,
		count: usize,
		flags: AllocFlags,
	) -> Result<ChunkId, GeomError> {
		let chunk = self.create_chunk();
		self.alloc_vertices(state, chunk, format, count, flags)?;
		Ok(chunk)
	}

	fn alloc_elements<G: GlApi>(
		&mut self,
		state: &mut StateCache<G>,
		chunk: ChunkId,
		key: RegionKey,
		count: usize,
		flags: AllocFlags,
	) -> Result<(), GeomError> {
		let data = self.chunk_mut(chunk);
		if data.region.is_some() {
			assert!(
				count <= data.count,
				"{chunk:?} has {} elements reserved, can't grow it to {count}",
				data.count,
			);
		} else {
			assert!(count > 0, "zero sized allocation for {chunk:?}");

			let region_index = self.region_for(state, key, count)?;
			let region = &mut self.regions[region_index];

			let data = &mut self.chunks[chunk.0];
			data.region = Some(region_index);
			data.index = region.cursor;
			data.count = count;
			data.buffer = self.buffers[region.buffer].handle;

			assert!(count <= region.remaining(), "{chunk:?} placed in a region without room for it");
			region.cursor += count;
		}

		if flags.contains(AllocFlags::MAP) {
			self.map_chunk(state, chunk);
		}

		Ok(())
	}

	/// First region of the right kind with room for `count` elements,
	/// or a new one if there is none
	fn region_for<G: GlApi>(
		&mut self,
		state: &mut StateCache<G>,
		key: RegionKey,
		count: usize,
	) -> Result<usize, GeomError> {
		if let Some(i) = self.regions.iter().position(|r| r.matches(&key) && r.remaining() >= count) {
			return Ok(i)
		}

		let element_size = match key {
			RegionKey::Vertex(format) => format.vertex_size(),
			RegionKey::Index(ty) => ty.size(),
		};

		let space_needed = count.checked_mul(element_size).ok_or(GeomError::ExceedsMaxBufferSize {
			requested: usize::MAX,
			max: self.config.max_buffer_size,
		})?;

		let buffer_index = self.provide_buffer(state, space_needed)?;
		let buffer = &mut self.buffers[buffer_index];

		// for now regions take the rest of their buffer
		let offset = buffer.cursor;
		let length = buffer.size - buffer.cursor;
		buffer.cursor = buffer.size;
		let handle = buffer.handle;

		let kind = match key {
			RegionKey::Vertex(format) => {
				let vao = state.gl_mut().create_vertex_array();
				state.bind_vertex_array(vao);
				state.bind_array_buffer(handle);
				format.setup(state, offset);

				RegionKind::Vertex {
					format: format.clone(),
					vao,
				}
			},
			RegionKey::Index(ty) => RegionKind::Index(ty),
		};

		let region = Region {
			buffer: buffer_index,
			offset,
			length,
			element_size,
			capacity: length / element_size,
			cursor: 0,
			kind,
		};

		log::debug!(
			"[{} +region] buffer {handle} @ {offset}: {} bytes, {} elements of {element_size} bytes",
			self.config.name,
			region.length,
			region.capacity,
		);

		self.regions.push(region);
		Ok(self.regions.len() - 1)
	}

	/// Index of a backing buffer with `space_needed` unassigned bytes,
	/// creating one if needed
	fn provide_buffer<G: GlApi>(
		&mut self,
		state: &mut StateCache<G>,
		space_needed: usize,
	) -> Result<usize, GeomError> {
		if let Some(i) = self.buffers.iter().position(|b| b.size - b.cursor >= space_needed) {
			return Ok(i)
		}

		let min = self.config.min_buffer_size;
		let max = self.config.max_buffer_size;

		if min > max {
			return Err(GeomError::InvalidSizeLimits { min, max })
		}

		if space_needed > max {
			return Err(GeomError::ExceedsMaxBufferSize {
				requested: space_needed,
				max,
			})
		}

		let mut size = min.max(1);
		while size < space_needed {
			size = size.saturating_mul(2);
		}
		size = size.min(max);

		// grow to twice the last buffer to keep the number of buffers low
		if let Some(last) = self.buffers.last() {
			let grown = last.size.saturating_mul(2);
			if size < grown {
				size = usize::min(grown, max);
			}
		}

		let handle = state.gl_mut().create_buffer();
		state.bind_array_buffer(handle);
		state
			.gl_mut()
			.buffer_data(BufferTarget::Array, size, None, self.config.usage);

		log::debug!("[{} +buffer] {handle}: {size} bytes", self.config.name);

		self.buffers.push(BackingBuffer {
			handle,
			size,
			mapped: None,
			map_refs: 0,
			cursor: 0,
		});

		Ok(self.buffers.len() - 1)
	}

	/// Bind the chunk's buffer to the target matching its contents.
	///
	/// If the buffer is still mapped from an earlier write, it is unmapped first.
	///
	/// # PANICS
	/// * if the chunk has no storage
	/// * if a chunk in the same buffer is mapped with [`map_chunk`](Self::map_chunk)
	pub fn bind_chunk<G: GlApi>(&mut self, state: &mut StateCache<G>, chunk: ChunkId) {
		let region = self.region_of(chunk);
		let handle = self.chunks[chunk.0].buffer;
		let is_vertex = matches!(self.regions[region].kind, RegionKind::Vertex { .. });

		self.ensure_unmapped(state, self.regions[region].buffer);

		match is_vertex {
			true => state.bind_array_buffer(handle),
			false => state.bind_element_buffer(handle),
		}
	}

	/// Upload `data` over the chunk's vertices starting at `first_vertex`
	///
	/// # PANICS
	/// * if the chunk has no storage
	/// * if the data does not fit within the chunk
	pub fn update_vertices<G: GlApi, T: bytemuck::Pod>(
		&mut self,
		state: &mut StateCache<G>,
		chunk: ChunkId,
		first_vertex: usize,
		data: &[T],
	) {
		self.update_elements(state, chunk, first_vertex, bytemuck::cast_slice(data));
	}

	/// Upload `data` over the chunk's indices starting at `first_index`
	pub fn update_indices<G: GlApi, T: bytemuck::Pod>(
		&mut self,
		state: &mut StateCache<G>,
		chunk: ChunkId,
		first_index: usize,
		data: &[T],
	) {
		self.update_elements(state, chunk, first_index, bytemuck::cast_slice(data));
	}

	fn update_elements<G: GlApi>(
		&mut self,
		state: &mut StateCache<G>,
		chunk: ChunkId,
		first: usize,
		data: &[u8],
	) {
		if data.is_empty() {
			return
		}

		let region_index = self.region_of(chunk);
		let byte_range = self.chunk_bytes(chunk, region_index);
		let region = &self.regions[region_index];

		let offset = first
			.checked_mul(region.element_size)
			.and_then(|offset| offset.checked_add(byte_range.start))
			.filter(|offset| *offset <= byte_range.end && byte_range.end - offset >= data.len());
		let Some(offset) = offset else {
			panic!("{} byte update at element {first} overruns {chunk:?}", data.len())
		};

		let buffer = region.buffer;
		self.ensure_unmapped(state, buffer);

		// uploads go through the array target to leave VAO state alone
		state.bind_array_buffer(self.buffers[buffer].handle);
		state.gl_mut().buffer_sub_data(BufferTarget::Array, offset, data);
	}

	/// Writable view of the chunk's bytes in its mapped backing buffer.
	///
	/// Only one backing buffer is mapped at a time: mapping a chunk in a
	/// different buffer unmaps the previous one. Every call must be paired
	/// with [`unmap_chunk`](Self::unmap_chunk). The buffer itself stays mapped
	/// until it is next bound.
	///
	/// # PANICS
	/// * if the chunk has no storage
	/// * if a chunk in another buffer is still mapped
	pub fn map_chunk<G: GlApi>(&mut self, state: &mut StateCache<G>, chunk: ChunkId) -> &mut [u8] {
		let region_index = self.region_of(chunk);
		let byte_range = self.chunk_bytes(chunk, region_index);
		let buffer_index = self.regions[region_index].buffer;

		let mapped = self.map_buffer(state, buffer_index);
		self.buffers[buffer_index].map_refs += 1;

		// SAFETY: the pointer is valid for the whole buffer until it is
		// unmapped, which needs `&mut self`, and the range is inside the buffer.
		unsafe {
			slice::from_raw_parts_mut(mapped.as_ptr().add(byte_range.start), byte_range.len())
		}
	}

	/// Finish writing a chunk mapped with [`map_chunk`](Self::map_chunk)
	/// or [`AllocFlags::MAP`]
	pub fn unmap_chunk(&mut self, chunk: ChunkId) {
		let index = self.regions[self.region_of(chunk)].buffer;
		let buffer = &mut self.buffers[index];
		assert!(buffer.map_refs > 0, "{chunk:?} unmapped without being mapped");

		buffer.map_refs -= 1;
	}

	fn map_buffer<G: GlApi>(&mut self, state: &mut StateCache<G>, index: usize) -> NonNull<u8> {
		if let Some(mapped) = self.buffers[index].mapped {
			return mapped
		}

		for other in 0..self.buffers.len() {
			if other != index && self.buffers[other].mapped.is_some() {
				self.ensure_unmapped(state, other);
			}
		}

		let buffer = &mut self.buffers[index];
		state.bind_array_buffer(buffer.handle);

		let mapped = NonNull::new(state.gl_mut().map_buffer(BufferTarget::Array))
			.unwrap_or_else(|| panic!("could not map backing buffer {}", buffer.handle));
		buffer.mapped = Some(mapped);
		mapped
	}

	fn ensure_unmapped<G: GlApi>(&mut self, state: &mut StateCache<G>, index: usize) {
		let buffer = &mut self.buffers[index];
		if buffer.mapped.is_none() {
			return
		}

		assert_eq!(
			buffer.map_refs, 0,
			"backing buffer {} is still mapped for writing",
			buffer.handle
		);

		state.bind_array_buffer(buffer.handle);
		if !state.gl_mut().unmap_buffer(BufferTarget::Array) {
			log::warn!(
				"[{}] backing buffer {} was corrupted while mapped",
				self.config.name,
				buffer.handle
			);
		}

		buffer.mapped = None;
	}

	/// Draw the chunk's vertices as `primitive`
	///
	/// # PANICS
	/// * if the chunk does not hold vertices
	pub fn draw_chunk<G: GlApi>(
		&mut self,
		state: &mut StateCache<G>,
		chunk: ChunkId,
		primitive: Primitive,
	) {
		self.bind_chunk(state, chunk);

		let vao = self.vertex_array_of(chunk);
		let data = &self.chunks[chunk.0];

		state.bind_vertex_array(vao);
		state.gl_mut().draw_arrays(primitive, data.index, data.count);
		state.increase_draw_call_counter(primitive.primitive_count(data.count));
	}

	/// Draw `vertices` indexed by `indices`, with index 0 referring to the
	/// first vertex of the vertex chunk
	///
	/// # PANICS
	/// * if `vertices` does not hold vertices or `indices` does not hold indices
	pub fn draw_indexed<G: GlApi>(
		&mut self,
		state: &mut StateCache<G>,
		vertices: ChunkId,
		indices: ChunkId,
		primitive: Primitive,
	) {
		let index_region = &self.regions[self.region_of(indices)];
		let index_type = match index_region.kind {
			RegionKind::Index(ty) => ty,
			RegionKind::Vertex { .. } => panic!("{indices:?} does not hold indices"),
		};
		let index_buffer = index_region.buffer;

		self.bind_chunk(state, vertices);
		self.ensure_unmapped(state, index_buffer);

		let vao = self.vertex_array_of(vertices);
		let index_data = &self.chunks[indices.0];
		let index_offset = self.chunk_bytes(indices, self.region_of(indices)).start;
		let base_vertex = self.chunks[vertices.0].index;

		state.bind_vertex_array(vao);
		state.bind_element_buffer(index_data.buffer);
		state.gl_mut().draw_elements_base_vertex(
			primitive,
			index_data.count,
			index_type,
			index_offset,
			base_vertex,
		);
		state.increase_draw_call_counter(primitive.primitive_count(index_data.count));
	}

	/// Handle of the buffer holding the chunk, 0 if it has no storage
	#[inline]
	pub fn backing_handle(&self, chunk: ChunkId) -> GLuint {
		self.chunks[chunk.0].buffer
	}

	pub fn chunk_region(&self, chunk: ChunkId) -> Option<RegionId> {
		self.chunks[chunk.0].region.map(RegionId)
	}

	/// Elements of the chunk's region held by the chunk
	pub fn chunk_range(&self, chunk: ChunkId) -> Option<Range<usize>> {
		let data = &self.chunks[chunk.0];
		data.region.map(|_| data.index..data.index + data.count)
	}

	/// Byte offset of the chunk's first element in its backing buffer
	pub fn chunk_offset(&self, chunk: ChunkId) -> Option<usize> {
		self.chunks[chunk.0]
			.region
			.map(|region| self.chunk_bytes(chunk, region).start)
	}

	pub fn region_count(&self) -> usize {
		self.regions.len()
	}

	/// Sizes of the backing buffers in creation order
	pub fn buffer_sizes(&self) -> Vec<usize> {
		self.buffers.iter().map(|b| b.size).collect()
	}

	/// Total bytes handed out to chunks, including released ones
	pub fn used_bytes(&self) -> usize {
		self.regions.iter().map(|r| r.cursor * r.element_size).sum()
	}

	/// Delete every region's VAO and every backing buffer
	pub fn destroy<G: GlApi>(mut self, state: &mut StateCache<G>) {
		for region in self.regions.drain(..) {
			if let RegionKind::Vertex { vao, .. } = region.kind {
				state.delete_vertex_array(vao);
			}
		}

		for index in 0..self.buffers.len() {
			self.buffers[index].map_refs = 0;
			self.ensure_unmapped(state, index);
		}

		for buffer in self.buffers.drain(..) {
			state.delete_buffer(buffer.handle);
		}
	}

	fn chunk_mut(&mut self, chunk: ChunkId) -> &mut Chunk {
		let data = &mut self.chunks[chunk.0];
		assert!(data.refs > 0, "use of released {chunk:?}");
		data
	}

	fn region_of(&self, chunk: ChunkId) -> usize {
		let data = &self.chunks[chunk.0];
		assert!(data.refs > 0, "use of released {chunk:?}");

		data.region
			.unwrap_or_else(|| panic!("{chunk:?} used before allocating storage"))
	}

	fn chunk_bytes(&self, chunk: ChunkId, region: usize) -> Range<usize> {
		let data = &self.chunks[chunk.0];
		let region = &self.regions[region];
		debug_assert!(data.index + data.count <= region.capacity);

		let start = region.offset + data.index * region.element_size;
		start..start + data.count * region.element_size
	}

	fn vertex_array_of(&self, chunk: ChunkId) -> GLuint {
		match self.regions[self.region_of(chunk)].kind {
			RegionKind::Vertex { vao, .. } => vao,
			RegionKind::Index(_) => panic!("{chunk:?} does not hold vertices"),
		}
	}
}

impl Drop for PersistentGeometryStore {
	fn drop(&mut self) {
		if !self.buffers.is_empty() {
			log::warn!(
				"[{}] geometry store dropped without destroy, leaking {} buffers",
				self.config.name,
				self.buffers.len()
			);
		}
	}
}
