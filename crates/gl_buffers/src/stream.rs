// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

use std::{cell::RefCell, mem, ops::Range, rc::Rc};

use gl::types::GLuint;

use crate::{
	backend::{BufferTarget, BufferUsage, GlApi},
	state::StateCache,
};

mod mapped;
mod staged;


/// A call site streaming vertices through a [`StreamingVertexPool`].
pub trait FlushOwner<G: GlApi> {
	/// Draw the `bytes_used` bytes written into `buffer` since the last flush.
	///
	/// The data starts at offset 0. `buffer` is bound as the array buffer
	/// when this is called.
	fn on_flush(&mut self, state: &mut StateCache<G>, buffer: GLuint, bytes_used: usize);
}

pub type SharedOwner<G> = Rc<RefCell<dyn FlushOwner<G>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
	/// Write straight into the mapped buffer, unmapping on flush
	Mapped,
	/// Write into CPU memory, uploading it on flush
	Staged,
}

impl UploadStrategy {
	pub fn detect(gl: &impl GlApi) -> Self {
		match gl.supports_buffer_mapping() {
			true => Self::Mapped,
			false => Self::Staged,
		}
	}
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
	/// Size of the streaming buffer in bytes
	pub capacity: usize,
	/// `None` picks [`UploadStrategy::detect`]
	pub strategy: Option<UploadStrategy>,
}

impl Default for StreamConfig {
	fn default() -> Self {
		Self {
			capacity: 256 * 1024,
			strategy: None,
		}
	}
}

impl StreamConfig {
	pub fn with_capacity(mut self, capacity: usize) -> Self {
		self.capacity = capacity;
		self
	}

	pub fn with_strategy(mut self, strategy: UploadStrategy) -> Self {
		self.strategy = Some(strategy);
		self
	}
}

/// CPU side of the streaming buffer
trait TransientStorage<G: GlApi> {
	/// Writable view of `range` in `buffer`
	///
	/// # SIDE EFFECTS
	/// * may bind `buffer` as the array buffer
	fn bytes(
		&mut self,
		state: &mut StateCache<G>,
		buffer: GLuint,
		range: Range<usize>,
	) -> &mut [u8];
	/// Make the first `bytes_used` bytes visible to draws sourcing `buffer`.
	///
	/// Returns false if the driver lost the written data.
	///
	/// # SIDE EFFECTS
	/// * binds `buffer` as the array buffer
	fn submit(&mut self, state: &mut StateCache<G>, buffer: GLuint, bytes_used: usize) -> bool;
	fn is_mapped(&self) -> bool;
}

/// Scratch vertex buffer shared by unrelated callers.
///
/// Consecutive allocations by the same owner are packed one after another
/// and drawn together when the pool is flushed, which happens when
/// another owner allocates, an allocation does not fit, or
/// [`flush`](Self::flush) is called. The pool never grows.
pub struct StreamingVertexPool<G: GlApi> {
	buffer: GLuint,
	capacity: usize,
	strategy: UploadStrategy,
	storage: Box<dyn TransientStorage<G>>,
	owner: Option<SharedOwner<G>>,
	bytes_used: usize,
	flushing: bool,
	flush_count: usize,
}

impl<G: GlApi> StreamingVertexPool<G> {
	pub fn new(state: &mut StateCache<G>, config: StreamConfig) -> Self {
		let strategy = config.strategy.unwrap_or_else(|| UploadStrategy::detect(state.gl()));
		let capacity = config.capacity;

		let buffer = state.gl_mut().create_buffer();
		state.bind_array_buffer(buffer);
		state
			.gl_mut()
			.buffer_data(BufferTarget::Array, capacity, None, BufferUsage::Dynamic);

		let storage: Box<dyn TransientStorage<G>> = match strategy {
			UploadStrategy::Mapped => Box::new(mapped::MappedStorage::new(capacity)),
			UploadStrategy::Staged => Box::new(staged::StagedStorage::new(capacity)),
		};

		log::debug!("created streaming pool: buffer {buffer}, {capacity} bytes, {strategy:?}");

		Self {
			buffer,
			capacity,
			strategy,
			storage,
			owner: None,
			bytes_used: 0,
			flushing: false,
			flush_count: 0,
		}
	}

	/// Reserve `size` bytes for `owner`.
	///
	/// The returned bytes are drawn by `owner` on the next flush, together
	/// with everything else it allocated since the last one.
	///
	/// # PANICS
	/// * if `size` exceeds the pool's capacity
	pub fn alloc(
		&mut self,
		state: &mut StateCache<G>,
		owner: &SharedOwner<G>,
		size: usize,
	) -> &mut [u8] {
		if !self.is_owner(owner) {
			self.flush(state);
		}

		if self.bytes_used + size > self.capacity {
			self.flush(state);
		}

		assert!(
			size <= self.capacity,
			"streamed allocation of {size} bytes exceeds pool capacity of {} bytes",
			self.capacity,
		);

		if self.owner.is_none() {
			self.owner = Some(owner.clone());
		}

		let range = self.bytes_used..self.bytes_used + size;
		self.bytes_used = range.end;
		self.storage.bytes(state, self.buffer, range)
	}

	/// Draw everything allocated since the last flush.
	///
	/// Does nothing if nothing is pending.
	pub fn flush(&mut self, state: &mut StateCache<G>) {
		debug_assert!(!self.flushing, "streaming pool flushed from its own flush callback");

		let Some(owner) = self.owner.take() else { return };
		let bytes_used = mem::replace(&mut self.bytes_used, 0);

		if !self.storage.submit(state, self.buffer, bytes_used) {
			log::warn!("streaming buffer {} lost its contents, dropping {bytes_used} bytes", self.buffer);
			return
		}

		self.flushing = true;
		log::trace!("flushing {bytes_used} streamed bytes from buffer {}", self.buffer);
		owner.borrow_mut().on_flush(state, self.buffer, bytes_used);

		self.flushing = false;
		self.flush_count += 1;
	}

	#[inline]
	fn is_owner(&self, owner: &SharedOwner<G>) -> bool {
		self.owner.as_ref().map_or(false, |current| {
			Rc::as_ptr(current) as *const () == Rc::as_ptr(owner) as *const ()
		})
	}

	#[inline]
	pub fn backing_handle(&self) -> GLuint {
		self.buffer
	}

	#[inline]
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	#[inline]
	pub fn bytes_used(&self) -> usize {
		self.bytes_used
	}

	#[inline]
	pub fn strategy(&self) -> UploadStrategy {
		self.strategy
	}

	pub fn is_mapped(&self) -> bool {
		self.storage.is_mapped()
	}

	pub fn has_pending(&self) -> bool {
		self.owner.is_some()
	}

	/// Number of flushes that reached an owner
	pub fn flush_count(&self) -> usize {
		self.flush_count
	}

	/// Flush anything pending and delete the backing buffer
	pub fn destroy(mut self, state: &mut StateCache<G>) {
		self.flush(state);
		state.delete_buffer(self.buffer);
		self.buffer = 0;
	}
}

impl<G: GlApi> Drop for StreamingVertexPool<G> {
	fn drop(&mut self) {
		if self.buffer != 0 {
			log::warn!("streaming pool dropped without destroy, leaking buffer {}", self.buffer);
		}
	}
}
