// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

use std::ops::Range;

use gl::types::GLuint;

use super::TransientStorage;
use crate::{
	backend::{BufferTarget, BufferUsage, GlApi},
	state::StateCache,
};

/// Streaming storage kept in CPU memory and uploaded with `glBufferData`
/// on submit, for contexts without buffer mapping.
pub(super) struct StagedStorage {
	buffer: Vec<u8>,
}

impl StagedStorage {
	pub fn new(capacity: usize) -> Self {
		Self {
			buffer: vec![0; capacity],
		}
	}
}

impl<G: GlApi> TransientStorage<G> for StagedStorage {
	fn bytes(
		&mut self,
		_state: &mut StateCache<G>,
		_buffer: GLuint,
		range: Range<usize>,
	) -> &mut [u8] {
		&mut self.buffer[range]
	}

	fn submit(&mut self, state: &mut StateCache<G>, buffer: GLuint, bytes_used: usize) -> bool {
		state.bind_array_buffer(buffer);

		if bytes_used == 0 {
			return true
		}

		state.gl_mut().buffer_data(
			BufferTarget::Array,
			bytes_used,
			Some(&self.buffer[..bytes_used]),
			BufferUsage::Dynamic,
		);

		true
	}

	fn is_mapped(&self) -> bool {
		false
	}
}
