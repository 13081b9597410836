// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

//! Static geometry uploaded once into a persistent store, half of it
//! through mapped writes, plus an indexed grid and a spinning streamed
//! triangle drawn on top.

use std::rc::Rc;

use gl_buffers::{
	backend::{IndexType, Primitive},
	AllocFlags,
	ChunkId,
	FormatRegistry,
	GeomStoreConfig,
	Material,
	NativeGl,
	PersistentGeometryStore,
	RenderCoordinator,
	StreamConfig,
	VertexFormat,
};
use gl_buffers_demos::{
	link_program,
	ColorVertex,
	Demo,
	DemoError,
	COLOR_FRAGMENT_SHADER,
	COLOR_VERTEX_SHADER,
};
use rand::{rngs::ThreadRng, Rng};

const CHUNK_COUNT: usize = 300;
const GRID_SIZE: usize = 16;

struct Grid {
	vertices: ChunkId,
	indices: ChunkId,
}

struct PersistentChunks {
	format: VertexFormat,
	material: Rc<Material>,
	store: PersistentGeometryStore,
	chunks: Vec<ChunkId>,
	grid: Grid,
	angle: f32,
}

fn random_triangles(rng: &mut ThreadRng) -> Vec<ColorVertex> {
	let center = [rng.gen_range(-0.9..0.9f32), rng.gen_range(-0.9..0.9f32)];
	let color = [rng.gen(), rng.gen(), rng.gen(), 255];

	(0..rng.gen_range(1..8) * 3)
		.map(|_| {
			ColorVertex::new(
				center[0] + rng.gen_range(-0.05..0.05),
				center[1] + rng.gen_range(-0.05..0.05),
				color,
			)
		})
		.collect()
}

fn upload_grid(
	coordinator: &mut RenderCoordinator<NativeGl>,
	store: &mut PersistentGeometryStore,
	format: &VertexFormat,
) -> Result<Grid, DemoError> {
	let step = 0.5 / (GRID_SIZE - 1) as f32;
	let vertices = (0..GRID_SIZE * GRID_SIZE)
		.map(|i| {
			let (column, row) = (i % GRID_SIZE, i / GRID_SIZE);
			let shade = ((column + row) % 2 * 80 + 100) as u8;
			ColorVertex::new(0.4 + column as f32 * step, 0.4 + row as f32 * step, [
				shade, shade, shade, 255,
			])
		})
		.collect::<Vec<_>>();

	let mut indices = Vec::<u16>::new();
	for row in 0..GRID_SIZE - 1 {
		for column in 0..GRID_SIZE - 1 {
			let corner = (row * GRID_SIZE + column) as u16;
			let above = corner + GRID_SIZE as u16;
			indices.extend_from_slice(&[corner, corner + 1, above + 1, above + 1, above, corner]);
		}
	}

	let state = coordinator.state_mut();
	let vertex_chunk = store.alloc_chunk(state, format, vertices.len(), AllocFlags::NONE)?;
	store.update_vertices(state, vertex_chunk, 0, &vertices);

	let index_chunk = store.create_chunk();
	store.alloc_indices(state, index_chunk, IndexType::U16, indices.len(), AllocFlags::NONE)?;
	store.update_indices(state, index_chunk, 0, &indices);

	Ok(Grid {
		vertices: vertex_chunk,
		indices: index_chunk,
	})
}

impl PersistentChunks {
	fn new(coordinator: &mut RenderCoordinator<NativeGl>) -> Result<Self, DemoError> {
		let program = link_program(COLOR_VERTEX_SHADER, COLOR_FRAGMENT_SHADER)?;
		let format = FormatRegistry::new().resolve(&ColorVertex::ATTRIBUTES);

		// small limits so the store grows a few times
		let mut store = PersistentGeometryStore::new(GeomStoreConfig {
			name: String::from("demo"),
			min_buffer_size: 4 * 1024,
			max_buffer_size: 64 * 1024,
			..Default::default()
		});

		let mut rng = rand::thread_rng();
		let mut chunks = Vec::with_capacity(CHUNK_COUNT);

		for i in 0..CHUNK_COUNT {
			let vertices = random_triangles(&mut rng);
			let state = coordinator.state_mut();

			match i % 2 == 0 {
				true => {
					let chunk = store.alloc_chunk(state, &format, vertices.len(), AllocFlags::MAP)?;
					store
						.map_chunk(state, chunk)
						.copy_from_slice(bytemuck::cast_slice(&vertices));
					// one unmap for the map above, one for the allocation
					store.unmap_chunk(chunk);
					store.unmap_chunk(chunk);
					chunks.push(chunk);
				},
				false => {
					let chunk = store.alloc_chunk(state, &format, vertices.len(), AllocFlags::NONE)?;
					store.update_vertices(state, chunk, 0, &vertices);
					chunks.push(chunk);
				},
			}
		}

		let grid = upload_grid(coordinator, &mut store, &format)?;

		// released chunks keep their storage, so this doesn't shrink the store
		for chunk in chunks.drain(..CHUNK_COUNT / 10) {
			store.release_chunk(chunk);
		}

		log::info!(
			"{} chunks in {} regions, {} bytes used, backing buffers: {:?}",
			chunks.len(),
			store.region_count(),
			store.used_bytes(),
			store.buffer_sizes(),
		);

		Ok(Self {
			format,
			material: Rc::new(Material::new(program)),
			store,
			chunks,
			grid,
			angle: 0.0,
		})
	}
}

impl Demo for PersistentChunks {
	fn frame(&mut self, coordinator: &mut RenderCoordinator<NativeGl>) {
		for chunk in &self.chunks {
			coordinator.draw_chunk(&mut self.store, *chunk, &self.material, Primitive::Triangles);
		}

		coordinator.draw_indexed(
			&mut self.store,
			self.grid.vertices,
			self.grid.indices,
			&self.material,
			Primitive::Triangles,
		);

		self.angle += 0.02;
		let corner = |offset: f32| {
			let angle = self.angle + offset;
			ColorVertex::new(angle.cos() * 0.3, angle.sin() * 0.3, [255, 200, 40, 255])
		};
		let triangle = [
			corner(0.0),
			corner(std::f32::consts::TAU / 3.0),
			corner(std::f32::consts::TAU * 2.0 / 3.0),
		];

		coordinator
			.stream_vertices(&self.format, &self.material, Primitive::Triangles, 3)
			.copy_from_slice(bytemuck::cast_slice(&triangle));
	}

	fn destroy(self, coordinator: &mut RenderCoordinator<NativeGl>) {
		let state = coordinator.state_mut();
		self.store.destroy(state);
		state.use_program(0);

		unsafe { gl::DeleteProgram(self.material.program) };
	}
}

fn main() -> Result<(), DemoError> {
	gl_buffers_demos::view_window(
		"persistent chunks",
		true,
		StreamConfig::default(),
		PersistentChunks::new,
	)
}
