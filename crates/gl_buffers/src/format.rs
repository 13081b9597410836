// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

use std::{
	fmt,
	rc::Rc,
	sync::atomic::{AtomicU32, Ordering},
};

use gl::types::GLenum;

use crate::{
	backend::{ClientArray, GlApi},
	state::StateCache,
};


/// One per-vertex input, interleaved with the others of its format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
	pub array: ClientArray,
	pub ty: GLenum,
	pub count: usize,
	pub ty_size: usize,
	pub is_integer: bool,
	pub normalized: bool,
}

impl VertexAttribute {
	pub const fn new<T: GLtype>(array: ClientArray, count: usize) -> Self {
		VertexAttribute {
			array,
			ty: T::GL_TYPE,
			count,
			ty_size: std::mem::size_of::<T>(),
			is_integer: T::IS_INTEGER,
			normalized: false,
		}
	}

	/// Map integer values to `[0, 1]` (or `[-1, 1]`) floats
	pub const fn normalized(mut self) -> Self {
		self.normalized = true;
		self
	}

	#[inline]
	pub const fn size(&self) -> usize {
		self.count * self.ty_size
	}
}

pub trait GLtype: Sized {
	const GL_TYPE: GLenum;
	const IS_INTEGER: bool;
}

macro_rules! gl_types {
	($($type:ident($gltype:expr, int: $int:literal);)*) => {
		$(
			impl GLtype for $type {
				const GL_TYPE: GLenum = $gltype;
				const IS_INTEGER: bool = $int;
			}
		)*
	}
}

gl_types! {
	f64(gl::DOUBLE, int: false);
	f32(gl::FLOAT, int: false);

	u32(gl::UNSIGNED_INT, int: true);
	u16(gl::UNSIGNED_SHORT, int: true);
	u8(gl::UNSIGNED_BYTE, int: true);

	i32(gl::INT, int: true);
	i16(gl::SHORT, int: true);
	i8(gl::BYTE, int: true);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormatId(u32);

static NEXT_FORMAT_ID: AtomicU32 = AtomicU32::new(0);

struct Layout {
	id: FormatId,
	attributes: Vec<VertexAttribute>,
	offsets: Vec<usize>,
	vertex_size: usize,
}

/// Interned vertex layout.
///
/// Formats compare by identity: two formats are equal only if they were
/// resolved by the same [`FormatRegistry`] from equal attribute lists.
/// Ids are unique across registries.
#[derive(Clone)]
pub struct VertexFormat(Rc<Layout>);

impl VertexFormat {
	#[inline]
	pub fn id(&self) -> FormatId {
		self.0.id
	}

	/// Size of one interleaved vertex in bytes
	#[inline]
	pub fn vertex_size(&self) -> usize {
		self.0.vertex_size
	}

	pub fn attributes(&self) -> &[VertexAttribute] {
		&self.0.attributes
	}

	/// Point every attribute of this format at the bound array buffer,
	/// with vertex 0 at `base_offset`, and toggle client arrays so that
	/// exactly the ones used by this format are enabled.
	pub fn setup<G: GlApi>(&self, state: &mut StateCache<G>, base_offset: usize) {
		for array in ClientArray::ALL {
			let attribute = self
				.0
				.attributes
				.iter()
				.zip(&self.0.offsets)
				.find(|(attribute, _)| attribute.array == array);

			if let Some((attribute, offset)) = attribute {
				state.gl_mut().vertex_attrib_pointer(
					array.location(),
					attribute,
					self.0.vertex_size,
					base_offset + offset,
				);
			}

			state.set_client_state(array, attribute.is_some());
		}
	}
}

impl PartialEq for VertexFormat {
	fn eq(&self, other: &Self) -> bool {
		self.0.id == other.0.id
	}
}

impl Eq for VertexFormat {}

impl fmt::Debug for VertexFormat {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("VertexFormat")
			.field("id", &self.0.id)
			.field("vertex_size", &self.0.vertex_size)
			.field("attributes", &self.0.attributes)
			.finish()
	}
}

#[derive(Default)]
pub struct FormatRegistry {
	formats: Vec<VertexFormat>,
}

impl FormatRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Get the format for `attributes`, creating it on first use.
	///
	/// # PANICS
	/// * if `attributes` is empty or feeds the same client array twice
	pub fn resolve(&mut self, attributes: &[VertexAttribute]) -> VertexFormat {
		if let Some(format) = self.formats.iter().find(|f| f.attributes() == attributes) {
			return format.clone()
		}

		assert!(!attributes.is_empty(), "vertex format without attributes");
		for (i, attribute) in attributes.iter().enumerate() {
			assert!(
				attributes[..i].iter().all(|a| a.array != attribute.array),
				"client array {:?} used twice in one vertex format",
				attribute.array,
			);
		}

		let offsets = attributes
			.iter()
			.scan(0, |offset, attribute| {
				let current = *offset;
				*offset += attribute.size();
				Some(current)
			})
			.collect::<Vec<_>>();

		let format = VertexFormat(Rc::new(Layout {
			id: FormatId(NEXT_FORMAT_ID.fetch_add(1, Ordering::Relaxed)),
			attributes: attributes.to_vec(),
			offsets,
			vertex_size: attributes.iter().map(VertexAttribute::size).sum(),
		}));

		log::debug!("registered {format:?}");
		self.formats.push(format.clone());
		format
	}

	pub fn len(&self) -> usize {
		self.formats.len()
	}

	pub fn is_empty(&self) -> bool {
		self.formats.is_empty()
	}
}
