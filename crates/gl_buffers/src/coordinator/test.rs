use std::{cell::RefCell, rc::Rc};

use gl::types::GLuint;

use super::{Material, RenderCoordinator, RenderTarget};
use crate::{
	backend::{
		headless::{GlCall, HeadlessGl},
		Capability,
		ClientArray,
		Primitive,
	},
	format::{FormatRegistry, VertexAttribute, VertexFormat},
	geom::{AllocFlags, GeomStoreConfig, PersistentGeometryStore},
	state::{FrameStats, StateCache},
	stream::{FlushOwner, SharedOwner, StreamConfig},
};

const POSITION: VertexAttribute = VertexAttribute::new::<f32>(ClientArray::Position, 3);
const COLOR: VertexAttribute = VertexAttribute::new::<u8>(ClientArray::Color, 4).normalized();

fn coordinator(capacity: usize) -> RenderCoordinator<HeadlessGl> {
	let mut coordinator = RenderCoordinator::new(
		HeadlessGl::new(),
		StreamConfig::default().with_capacity(capacity),
		RenderTarget::screen(800, 600),
	);
	coordinator.state_mut().gl_mut().take_calls();
	coordinator
}

/// 12 byte vertices
fn positions() -> VertexFormat {
	FormatRegistry::new().resolve(&[POSITION])
}

fn draws(coordinator: &RenderCoordinator<HeadlessGl>) -> Vec<usize> {
	coordinator
		.state()
		.gl()
		.calls()
		.iter()
		.filter_map(|call| match call {
			GlCall::DrawArrays { count, .. } => Some(*count),
			_ => None,
		})
		.collect()
}

fn position_of(coordinator: &RenderCoordinator<HeadlessGl>, call: &GlCall) -> usize {
	coordinator
		.state()
		.gl()
		.calls()
		.iter()
		.position(|c| c == call)
		.unwrap_or_else(|| panic!("{call:?} was not issued"))
}

fn first_draw(coordinator: &RenderCoordinator<HeadlessGl>) -> usize {
	coordinator
		.state()
		.gl()
		.calls()
		.iter()
		.position(|c| matches!(c, GlCall::DrawArrays { .. }))
		.unwrap_or_else(|| panic!("nothing was drawn"))
}

#[test]
fn matching_requests_share_one_draw() {
	let mut coordinator = coordinator(1024);
	let format = positions();
	let material = Rc::new(Material::new(5));

	coordinator
		.stream_vertices(&format, &material, Primitive::Triangles, 3)
		.fill(1);
	coordinator
		.stream_vertices(&format, &material, Primitive::Triangles, 3)
		.fill(2);
	assert!(draws(&coordinator).is_empty());

	let stats = coordinator.end_frame();

	assert_eq!(draws(&coordinator), vec![6]);
	assert!(coordinator.state().gl().calls().contains(&GlCall::DrawArrays {
		primitive: Primitive::Triangles,
		first: 0,
		count: 6,
	}));
	assert_eq!(stats.draw_calls, 1);
	assert_eq!(stats.primitives_drawn, 2);
	assert_eq!(coordinator.state().stats(), FrameStats::default());

	coordinator.destroy();
}

#[test]
fn material_change_flushes_under_old_material() {
	let mut coordinator = coordinator(1024);
	let format = positions();
	let first = Rc::new(Material::new(5));
	let second = Rc::new(Material::new(6));

	coordinator.stream_vertices(&format, &first, Primitive::Triangles, 3);
	coordinator.stream_vertices(&format, &second, Primitive::Triangles, 6);

	assert_eq!(draws(&coordinator), vec![3]);
	assert!(position_of(&coordinator, &GlCall::UseProgram(5)) < first_draw(&coordinator));
	assert_eq!(coordinator.state().gl().count_calls(|c| *c == GlCall::UseProgram(6)), 0);

	coordinator.end_frame();
	assert_eq!(draws(&coordinator), vec![3, 6]);

	coordinator.destroy();
}

#[test]
fn equal_materials_in_separate_handles_do_not_batch() {
	let mut coordinator = coordinator(1024);
	let format = positions();

	coordinator.stream_vertices(&format, &Rc::new(Material::new(5)), Primitive::Triangles, 3);
	coordinator.stream_vertices(&format, &Rc::new(Material::new(5)), Primitive::Triangles, 3);
	coordinator.end_frame();

	assert_eq!(draws(&coordinator), vec![3, 3]);

	coordinator.destroy();
}

#[test]
fn format_and_primitive_changes_flush() {
	let mut coordinator = coordinator(1024);
	let mut registry = FormatRegistry::new();
	let plain = registry.resolve(&[POSITION]);
	let colored = registry.resolve(&[POSITION, COLOR]);
	let material = Rc::new(Material::new(5));

	coordinator.stream_vertices(&plain, &material, Primitive::Triangles, 3);
	coordinator.stream_vertices(&colored, &material, Primitive::Triangles, 3);
	coordinator.stream_vertices(&colored, &material, Primitive::Lines, 2);
	coordinator.end_frame();

	assert_eq!(draws(&coordinator), vec![3, 3, 2]);
	assert!(coordinator.state().gl().calls().contains(&GlCall::VertexAttribPointer {
		location: ClientArray::Color.location(),
		stride: 16,
		offset: 12,
	}));

	coordinator.destroy();
}

#[test]
fn overflow_flush_keeps_the_batch_state() {
	// room for 10 vertices
	let mut coordinator = coordinator(120);
	let format = positions();
	let material = Rc::new(Material::new(5));

	coordinator.stream_vertices(&format, &material, Primitive::Points, 8);
	coordinator.stream_vertices(&format, &material, Primitive::Points, 4);
	assert_eq!(draws(&coordinator), vec![8]);

	coordinator.end_frame();

	assert_eq!(draws(&coordinator), vec![8, 4]);
	assert_eq!(coordinator.state().gl().count_calls(|c| *c == GlCall::UseProgram(5)), 1);

	coordinator.destroy();
}

#[test]
fn material_binds_textures_and_blending() {
	let mut coordinator = coordinator(1024);
	let material = Rc::new(Material::new(5).with_texture(11).with_texture(12).with_blend(true));

	coordinator.stream_vertices(&positions(), &material, Primitive::Triangles, 3);
	coordinator.flush();

	let calls = coordinator.state().gl().calls();
	for call in [
		GlCall::SetTextureUnitEnabled { unit: 0, enabled: true },
		GlCall::SetTextureUnitEnabled { unit: 1, enabled: true },
		GlCall::BindTexture { unit: 0, texture: 11 },
		GlCall::BindTexture { unit: 1, texture: 12 },
		GlCall::SetCapability(Capability::Blend, true),
	] {
		assert!(calls.contains(&call), "{call:?} was not issued");
	}
	assert_eq!(coordinator.state().enabled_texture_units(), 0..2);

	coordinator.destroy();
}

#[test]
fn render_target_changes_flush_first() {
	let mut coordinator = coordinator(1024);
	let material = Rc::new(Material::new(5));
	let target = RenderTarget {
		framebuffer: 3,
		width: 256,
		height: 128,
	};

	coordinator.stream_vertices(&positions(), &material, Primitive::Triangles, 3);
	coordinator.push_render_target(target);

	assert!(first_draw(&coordinator) < position_of(&coordinator, &GlCall::BindFramebuffer(3)));
	assert_eq!(coordinator.state().gl().calls().last(), Some(&GlCall::Viewport(0, 0, 256, 128)));
	assert_eq!(coordinator.current_target(), target);

	coordinator.state_mut().gl_mut().take_calls();
	assert_eq!(coordinator.pop_render_target(), target);
	assert_eq!(coordinator.state().gl().calls(), &[
		GlCall::BindFramebuffer(0),
		GlCall::Viewport(0, 0, 800, 600),
	]);

	coordinator.destroy();
}

#[test]
#[should_panic(expected = "stack underflow")]
fn popping_the_screen_panics() {
	coordinator(1024).pop_render_target();
}

#[test]
fn viewport_is_measured_from_the_top() {
	let mut coordinator = coordinator(1024);

	coordinator.set_viewport(10, 20, 100, 50);
	coordinator.set_viewport(10, 20, 100, 50);

	assert_eq!(coordinator.state().gl().calls(), &[GlCall::Viewport(10, 530, 100, 50)]);

	coordinator.destroy();
}

#[test]
fn resizing_the_screen_updates_its_viewport() {
	let mut coordinator = coordinator(1024);
	let target = RenderTarget {
		framebuffer: 3,
		width: 256,
		height: 128,
	};

	coordinator.resize_screen(1024, 768);
	assert_eq!(coordinator.state().gl().calls(), &[
		GlCall::BindFramebuffer(0),
		GlCall::Viewport(0, 0, 1024, 768),
	]);

	coordinator.push_render_target(target);
	coordinator.state_mut().gl_mut().take_calls();

	// the pushed target stays current
	coordinator.resize_screen(640, 480);
	assert!(coordinator.state().gl().calls().is_empty());

	coordinator.pop_render_target();
	assert_eq!(coordinator.current_target(), RenderTarget::screen(640, 480));
	assert_eq!(coordinator.state().gl().calls().last(), Some(&GlCall::Viewport(0, 0, 640, 480)));

	coordinator.destroy();
}

#[test]
fn invalidated_state_is_reissued() {
	let mut coordinator = coordinator(1024);

	coordinator.state_mut().use_program(5);
	coordinator.state_mut().gl_mut().take_calls();

	coordinator.invalidate_state();
	coordinator.state_mut().use_program(5);

	assert_eq!(coordinator.state().gl().calls(), &[
		GlCall::BindFramebuffer(0),
		GlCall::Viewport(0, 0, 800, 600),
		GlCall::UseProgram(5),
	]);

	coordinator.destroy();
}

#[test]
fn render_state_change_flushes_first() {
	let mut coordinator = coordinator(1024);
	let material = Rc::new(Material::new(5));

	coordinator.stream_vertices(&positions(), &material, Primitive::Triangles, 3);
	coordinator.set_render_state(Capability::DepthTest, true);

	let depth = position_of(&coordinator, &GlCall::SetCapability(Capability::DepthTest, true));
	assert!(first_draw(&coordinator) < depth);

	coordinator.destroy();
}

#[test]
fn persistent_draws_flush_streamed_vertices() {
	let mut coordinator = coordinator(1024);
	let format = positions();
	let material = Rc::new(Material::new(5));

	let mut store = PersistentGeometryStore::new(GeomStoreConfig::default());
	let chunk = store
		.alloc_chunk(coordinator.state_mut(), &format, 6, AllocFlags::NONE)
		.unwrap();
	store.update_vertices(coordinator.state_mut(), chunk, 0, &[[0.0f32; 3]; 6]);

	coordinator.stream_vertices(&format, &material, Primitive::Triangles, 3);
	coordinator.draw_chunk(&mut store, chunk, &material, Primitive::Triangles);

	assert_eq!(draws(&coordinator), vec![3, 6]);
	assert_eq!(coordinator.end_frame().draw_calls, 2);

	store.destroy(coordinator.state_mut());
	coordinator.destroy();
}

#[derive(Default)]
struct CountingOwner {
	flushed: usize,
}

impl FlushOwner<HeadlessGl> for CountingOwner {
	fn on_flush(&mut self, _state: &mut StateCache<HeadlessGl>, _buffer: GLuint, bytes_used: usize) {
		self.flushed += bytes_used;
	}
}

#[test]
fn other_pool_owners_interleave_with_batches() {
	let mut coordinator = coordinator(1024);
	let format = positions();
	let material = Rc::new(Material::new(5));
	let other = Rc::new(RefCell::new(CountingOwner::default()));
	let other_shared: SharedOwner<HeadlessGl> = other.clone();

	coordinator.stream_vertices(&format, &material, Primitive::Triangles, 3);
	coordinator.stream_for(&other_shared, 40);
	assert_eq!(draws(&coordinator), vec![3]);

	// same batch key, but the pool has to be taken back from the other owner
	coordinator.stream_vertices(&format, &material, Primitive::Triangles, 3);
	assert_eq!(other.borrow().flushed, 40);

	coordinator.end_frame();
	assert_eq!(draws(&coordinator), vec![3, 3]);

	coordinator.destroy();
}

#[test]
fn destroy_frees_the_pool() {
	let coordinator = coordinator(1024);
	let buffer = coordinator.pool().backing_handle();

	let gl = coordinator.destroy();

	assert_eq!(gl.buffer_contents(buffer), None);
	assert_eq!(gl.count_calls(|c| matches!(c, GlCall::DeleteVertexArray(_))), 1);
}
