use super::{AllocFlags, GeomError, GeomStoreConfig, PersistentGeometryStore};
use crate::{
	backend::{
		headless::{GlCall, HeadlessGl},
		BufferTarget,
		ClientArray,
		IndexType,
		Primitive,
	},
	format::{FormatRegistry, VertexAttribute, VertexFormat},
	state::StateCache,
};

const POSITION: VertexAttribute = VertexAttribute::new::<f32>(ClientArray::Position, 3);
const COLOR: VertexAttribute = VertexAttribute::new::<u8>(ClientArray::Color, 4).normalized();

fn store(min: usize, max: usize) -> (StateCache<HeadlessGl>, PersistentGeometryStore) {
	let config = GeomStoreConfig {
		min_buffer_size: min,
		max_buffer_size: max,
		..Default::default()
	};

	(StateCache::new(HeadlessGl::new()), PersistentGeometryStore::new(config))
}

/// 12 byte vertices
fn positions() -> VertexFormat {
	FormatRegistry::new().resolve(&[POSITION])
}

#[test]
fn backing_buffers_double_up_to_the_cap() {
	let (mut state, mut store) = store(1024, 8192);
	let format = positions();

	store.alloc_chunk(&mut state, &format, 100, AllocFlags::NONE).unwrap();
	assert_eq!(store.buffer_sizes(), vec![2048]);

	// 70 vertices left in the first region
	store.alloc_chunk(&mut state, &format, 100, AllocFlags::NONE).unwrap();
	assert_eq!(store.buffer_sizes(), vec![2048, 4096]);

	store.alloc_chunk(&mut state, &format, 300, AllocFlags::NONE).unwrap();
	assert_eq!(store.buffer_sizes(), vec![2048, 4096, 8192]);

	store.alloc_chunk(&mut state, &format, 600, AllocFlags::NONE).unwrap();
	assert_eq!(store.buffer_sizes(), vec![2048, 4096, 8192, 8192]);
	assert_eq!(store.region_count(), 4);
	assert_eq!(store.used_bytes(), 1100 * 12);

	store.destroy(&mut state);
}

#[test]
fn request_above_max_fails() {
	let (mut state, mut store) = store(1024, 8192);

	let result = store.alloc_chunk(&mut state, &positions(), 1000, AllocFlags::NONE);

	assert_eq!(result, Err(GeomError::ExceedsMaxBufferSize {
		requested: 12000,
		max: 8192
	}));
	assert!(store.buffer_sizes().is_empty());
}

#[test]
fn request_overflowing_usize_fails() {
	let (mut state, mut store) = store(1024, 8192);
	let format = positions();

	let result = store.alloc_chunk(&mut state, &format, (1 << 62) + 10, AllocFlags::NONE);

	assert_eq!(result, Err(GeomError::ExceedsMaxBufferSize {
		requested: usize::MAX,
		max: 8192
	}));
	assert!(store.buffer_sizes().is_empty());

	// nothing was reserved by the failed request
	let chunk = store.alloc_chunk(&mut state, &format, 5, AllocFlags::NONE).unwrap();
	assert_eq!(store.chunk_range(chunk), Some(0..5));
	assert_eq!(store.buffer_sizes(), vec![1024]);

	store.destroy(&mut state);
}

#[test]
fn min_above_max_fails() {
	let (mut state, mut store) = store(1024, 8192);
	store.set_min_buffer_size(16384);

	let result = store.alloc_chunk(&mut state, &positions(), 1, AllocFlags::NONE);

	assert_eq!(result, Err(GeomError::InvalidSizeLimits {
		min: 16384,
		max: 8192
	}));
}

#[test]
fn chunks_of_one_format_share_a_region() {
	let (mut state, mut store) = store(64 * 1024, 1024 * 1024);
	let format = positions();

	let a = store.alloc_chunk(&mut state, &format, 100, AllocFlags::NONE).unwrap();
	let b = store.alloc_chunk(&mut state, &format, 30, AllocFlags::NONE).unwrap();

	assert_eq!(store.chunk_region(a), store.chunk_region(b));
	assert_eq!(store.chunk_range(a), Some(0..100));
	assert_eq!(store.chunk_range(b), Some(100..130));
	assert_eq!(store.chunk_offset(b), Some(1200));
	assert_eq!(store.backing_handle(a), store.backing_handle(b));

	store.destroy(&mut state);
}

#[test]
fn each_format_gets_its_own_region_and_vertex_array() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let mut registry = FormatRegistry::new();
	let plain = registry.resolve(&[POSITION]);
	let colored = registry.resolve(&[POSITION, COLOR]);

	let a = store.alloc_chunk(&mut state, &plain, 10, AllocFlags::NONE).unwrap();
	let b = store.alloc_chunk(&mut state, &colored, 10, AllocFlags::NONE).unwrap();
	let indices = store.create_chunk();
	store
		.alloc_indices(&mut state, indices, IndexType::U16, 6, AllocFlags::NONE)
		.unwrap();

	assert_ne!(store.chunk_region(a), store.chunk_region(b));
	assert_ne!(store.chunk_region(b), store.chunk_region(indices));
	assert_eq!(store.region_count(), 3);
	assert_eq!(state.gl().count_calls(|c| matches!(c, GlCall::CreateVertexArray(_))), 2);
	assert!(state
		.gl()
		.calls()
		.contains(&GlCall::VertexAttribPointer {
			location: ClientArray::Color.location(),
			stride: 16,
			offset: 12,
		}));

	store.destroy(&mut state);
}

#[test]
fn updates_land_at_chunk_offsets() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let format = positions();

	let a = store.alloc_chunk(&mut state, &format, 2, AllocFlags::NONE).unwrap();
	let b = store.alloc_chunk(&mut state, &format, 2, AllocFlags::NONE).unwrap();

	let vertices: [[f32; 3]; 2] = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
	store.update_vertices(&mut state, b, 0, &vertices);
	store.update_vertices(&mut state, a, 1, &vertices[..1]);

	let contents = state.gl().buffer_contents(store.backing_handle(a)).unwrap();
	assert_eq!(&contents[..12], &[0; 12]);
	assert_eq!(&contents[12..24], bytemuck::cast_slice::<_, u8>(&vertices[..1]));
	assert_eq!(&contents[24..48], bytemuck::cast_slice::<_, u8>(&vertices[..]));

	store.destroy(&mut state);
}

#[test]
#[should_panic(expected = "overruns")]
fn update_past_chunk_end_panics() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let chunk = store.alloc_chunk(&mut state, &positions(), 2, AllocFlags::NONE).unwrap();

	store.update_vertices(&mut state, chunk, 1, &[[0.0f32; 3]; 2]);
}

#[test]
#[should_panic(expected = "overruns")]
fn update_at_overflowing_element_panics() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let chunk = store.alloc_chunk(&mut state, &positions(), 2, AllocFlags::NONE).unwrap();

	store.update_vertices(&mut state, chunk, usize::MAX / 4, &[[0.0f32; 3]; 1]);
}

#[test]
fn mapped_writes_are_kept_until_bind() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let chunk = store.alloc_chunk(&mut state, &positions(), 4, AllocFlags::NONE).unwrap();
	let handle = store.backing_handle(chunk);

	store.map_chunk(&mut state, chunk).fill(0xab);
	store.unmap_chunk(chunk);
	assert!(state.gl().is_mapped(handle));

	store.bind_chunk(&mut state, chunk);
	assert!(!state.gl().is_mapped(handle));
	assert_eq!(state.bound_buffer(BufferTarget::Array), Some(handle));
	assert_eq!(&state.gl().buffer_contents(handle).unwrap()[..48], &[0xab; 48]);

	store.destroy(&mut state);
}

#[test]
fn map_flag_maps_on_allocation() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let chunk = store.alloc_chunk(&mut state, &positions(), 4, AllocFlags::MAP).unwrap();

	assert!(state.gl().is_mapped(store.backing_handle(chunk)));

	store.unmap_chunk(chunk);
	store.destroy(&mut state);
	assert_eq!(state.gl().mapped_buffer_count(), 0);
}

#[test]
fn one_backing_buffer_is_mapped_at_a_time() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let format = positions();

	let a = store.alloc_chunk(&mut state, &format, 80, AllocFlags::NONE).unwrap();
	let b = store.alloc_chunk(&mut state, &format, 80, AllocFlags::NONE).unwrap();
	assert_ne!(store.backing_handle(a), store.backing_handle(b));

	store.map_chunk(&mut state, a);
	store.unmap_chunk(a);
	store.map_chunk(&mut state, b);
	store.unmap_chunk(b);

	assert_eq!(state.gl().mapped_buffer_count(), 1);
	assert!(state.gl().is_mapped(store.backing_handle(b)));

	store.destroy(&mut state);
}

#[test]
#[should_panic(expected = "still mapped for writing")]
fn mapping_second_buffer_while_writing_panics() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let format = positions();

	let a = store.alloc_chunk(&mut state, &format, 80, AllocFlags::NONE).unwrap();
	let b = store.alloc_chunk(&mut state, &format, 80, AllocFlags::NONE).unwrap();

	store.map_chunk(&mut state, a);
	store.map_chunk(&mut state, b);
}

#[test]
#[should_panic(expected = "still mapped for writing")]
fn binding_chunk_while_writing_panics() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let chunk = store.alloc_chunk(&mut state, &positions(), 4, AllocFlags::MAP).unwrap();

	store.bind_chunk(&mut state, chunk);
}

#[test]
fn realloc_within_reservation_keeps_storage() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let format = positions();
	let chunk = store.alloc_chunk(&mut state, &format, 10, AllocFlags::NONE).unwrap();

	store
		.alloc_vertices(&mut state, chunk, &format, 5, AllocFlags::NONE)
		.unwrap();

	assert_eq!(store.chunk_range(chunk), Some(0..10));
	assert_eq!(store.used_bytes(), 120);

	store.destroy(&mut state);
}

#[test]
#[should_panic(expected = "can't grow it")]
fn realloc_past_reservation_panics() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let format = positions();
	let chunk = store.alloc_chunk(&mut state, &format, 10, AllocFlags::NONE).unwrap();

	let _ = store.alloc_vertices(&mut state, chunk, &format, 11, AllocFlags::NONE);
}

#[test]
fn released_chunks_keep_their_storage() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let format = positions();

	let a = store.alloc_chunk(&mut state, &format, 10, AllocFlags::NONE).unwrap();
	store.add_ref(a);
	store.release_chunk(a);
	assert_eq!(store.chunk_refs(a), 1);
	store.release_chunk(a);
	assert_eq!(store.chunk_refs(a), 0);

	let b = store.alloc_chunk(&mut state, &format, 10, AllocFlags::NONE).unwrap();
	assert_eq!(store.chunk_range(b), Some(10..20));

	store.destroy(&mut state);
}

#[test]
#[should_panic(expected = "use of released")]
fn released_chunk_cannot_be_bound() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let chunk = store.alloc_chunk(&mut state, &positions(), 10, AllocFlags::NONE).unwrap();

	store.release_chunk(chunk);
	store.bind_chunk(&mut state, chunk);
}

#[test]
fn draw_chunk_draws_its_vertex_range() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let format = positions();
	store.alloc_chunk(&mut state, &format, 6, AllocFlags::NONE).unwrap();
	let chunk = store.alloc_chunk(&mut state, &format, 9, AllocFlags::NONE).unwrap();

	state.clear_stats();
	store.draw_chunk(&mut state, chunk, Primitive::Triangles);

	assert_eq!(state.gl().calls().last(), Some(&GlCall::DrawArrays {
		primitive: Primitive::Triangles,
		first: 6,
		count: 9,
	}));
	assert_eq!(state.stats().draw_calls, 1);
	assert_eq!(state.stats().primitives_drawn, 3);

	store.destroy(&mut state);
}

#[test]
fn indexed_draw_offsets_by_base_vertex() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let format = positions();
	store.alloc_chunk(&mut state, &format, 10, AllocFlags::NONE).unwrap();
	let vertices = store.alloc_chunk(&mut state, &format, 4, AllocFlags::NONE).unwrap();

	let indices = store.create_chunk();
	store
		.alloc_indices(&mut state, indices, IndexType::U16, 6, AllocFlags::NONE)
		.unwrap();
	store.update_indices(&mut state, indices, 0, &[0u16, 1, 2, 2, 3, 0]);

	state.clear_stats();
	store.draw_indexed(&mut state, vertices, indices, Primitive::Triangles);

	assert_eq!(state.gl().calls().last(), Some(&GlCall::DrawElements {
		primitive: Primitive::Triangles,
		count: 6,
		offset: store.chunk_offset(indices).unwrap(),
		base_vertex: 10,
	}));
	assert_eq!(
		state.bound_buffer(BufferTarget::ElementArray),
		Some(store.backing_handle(indices))
	);
	assert_eq!(state.stats().primitives_drawn, 2);

	store.destroy(&mut state);
}

#[test]
#[should_panic(expected = "does not hold vertices")]
fn drawing_index_chunk_panics() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let indices = store.create_chunk();
	store
		.alloc_indices(&mut state, indices, IndexType::U32, 3, AllocFlags::NONE)
		.unwrap();

	store.draw_chunk(&mut state, indices, Primitive::Triangles);
}

#[test]
fn destroy_deletes_buffers_and_vertex_arrays() {
	let (mut state, mut store) = store(1024, 1024 * 1024);
	let chunk = store.alloc_chunk(&mut state, &positions(), 4, AllocFlags::MAP).unwrap();
	let handle = store.backing_handle(chunk);
	store.unmap_chunk(chunk);

	store.destroy(&mut state);

	assert_eq!(state.gl().buffer_contents(handle), None);
	assert_eq!(state.gl().count_calls(|c| matches!(c, GlCall::DeleteVertexArray(_))), 1);
	assert_eq!(state.gl().count_calls(|c| matches!(c, GlCall::UnmapBuffer(_))), 1);
}
