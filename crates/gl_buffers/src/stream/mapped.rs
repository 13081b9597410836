// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

use std::{ops::Range, ptr::NonNull, slice};

use gl::types::GLuint;

use super::TransientStorage;
use crate::{
	backend::{BufferTarget, GlApi},
	state::StateCache,
};

/// Streaming storage written through `glMapBuffer`.
///
/// The buffer is mapped on the first write after a submit and stays
/// mapped until the next submit.
pub(super) struct MappedStorage {
	capacity: usize,
	mapped: Option<NonNull<u8>>,
}

impl MappedStorage {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			mapped: None,
		}
	}
}

impl<G: GlApi> TransientStorage<G> for MappedStorage {
	fn bytes(
		&mut self,
		state: &mut StateCache<G>,
		buffer: GLuint,
		range: Range<usize>,
	) -> &mut [u8] {
		assert!(range.end <= self.capacity);

		let mapped = match self.mapped {
			Some(mapped) => mapped,
			None => {
				state.bind_array_buffer(buffer);
				let mapped = NonNull::new(state.gl_mut().map_buffer(BufferTarget::Array))
					.unwrap_or_else(|| panic!("could not map streaming buffer {buffer}"));

				self.mapped = Some(mapped);
				mapped
			},
		};

		// SAFETY: `GlApi::map_buffer` returns a pointer valid for the whole
		// buffer until it is unmapped, which only happens in `submit`, and
		// `submit` can't be reached while the returned slice is borrowed.
		unsafe { slice::from_raw_parts_mut(mapped.as_ptr().add(range.start), range.len()) }
	}

	fn submit(&mut self, state: &mut StateCache<G>, buffer: GLuint, _bytes_used: usize) -> bool {
		state.bind_array_buffer(buffer);

		match self.mapped.take() {
			Some(_) => state.gl_mut().unmap_buffer(BufferTarget::Array),
			None => true,
		}
	}

	fn is_mapped(&self) -> bool {
		self.mapped.is_some()
	}
}
