// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

//! Bouncing quads streamed every frame, alternating between two materials
//! in runs of 16 so batches get split on material changes.
//! The same quads are streamed again into a small viewport in the top left.

use std::rc::Rc;

use gl_buffers::{
	backend::Primitive,
	FormatRegistry,
	Material,
	NativeGl,
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
	INVERTED_FRAGMENT_SHADER,
};
use rand::Rng;

const QUAD_COUNT: usize = 512;
const RUN_LENGTH: usize = 16;

struct Quad {
	position: [f32; 2],
	velocity: [f32; 2],
	size: f32,
	color: [u8; 4],
}

impl Quad {
	fn step(&mut self) {
		for axis in 0..2 {
			self.position[axis] += self.velocity[axis];
			if self.position[axis].abs() > 1.0 - self.size {
				self.velocity[axis] = -self.velocity[axis];
			}
		}
	}

	fn vertices(&self) -> [ColorVertex; 6] {
		let [x, y] = self.position;
		let s = self.size;
		let corner = |dx: f32, dy: f32| ColorVertex::new(x + dx * s, y + dy * s, self.color);

		[
			corner(-1.0, -1.0),
			corner(1.0, -1.0),
			corner(1.0, 1.0),
			corner(1.0, 1.0),
			corner(-1.0, 1.0),
			corner(-1.0, -1.0),
		]
	}
}

struct StreamedQuads {
	format: VertexFormat,
	materials: [Rc<Material>; 2],
	quads: Vec<Quad>,
}

impl StreamedQuads {
	fn new() -> Result<Self, DemoError> {
		let plain = link_program(COLOR_VERTEX_SHADER, COLOR_FRAGMENT_SHADER)?;
		let inverted = link_program(COLOR_VERTEX_SHADER, INVERTED_FRAGMENT_SHADER)?;

		let mut rng = rand::thread_rng();
		let quads = (0..QUAD_COUNT)
			.map(|_| Quad {
				position: [rng.gen_range(-0.9..0.9), rng.gen_range(-0.9..0.9)],
				velocity: [rng.gen_range(-0.01..0.01), rng.gen_range(-0.01..0.01)],
				size: rng.gen_range(0.01..0.05),
				color: [rng.gen(), rng.gen(), rng.gen(), 255],
			})
			.collect();

		Ok(Self {
			format: FormatRegistry::new().resolve(&ColorVertex::ATTRIBUTES),
			materials: [
				Rc::new(Material::new(plain)),
				Rc::new(Material::new(inverted).with_blend(true)),
			],
			quads,
		})
	}

	fn stream(&self, coordinator: &mut RenderCoordinator<NativeGl>) {
		for (i, quad) in self.quads.iter().enumerate() {
			let material = &self.materials[(i / RUN_LENGTH) % 2];
			let bytes = coordinator.stream_vertices(&self.format, material, Primitive::Triangles, 6);

			// the pool makes no alignment promises, so copy instead of casting in place
			bytes.copy_from_slice(bytemuck::cast_slice(&quad.vertices()));
		}
	}
}

impl Demo for StreamedQuads {
	fn frame(&mut self, coordinator: &mut RenderCoordinator<NativeGl>) {
		self.quads.iter_mut().for_each(Quad::step);

		self.stream(coordinator);

		let screen = coordinator.current_target();
		coordinator.set_viewport(0, 0, screen.width / 4, screen.height / 4);
		self.stream(coordinator);
		coordinator.set_viewport(0, 0, screen.width, screen.height);
	}

	fn destroy(self, coordinator: &mut RenderCoordinator<NativeGl>) {
		coordinator.state_mut().use_program(0);

		for material in &self.materials {
			unsafe { gl::DeleteProgram(material.program) };
		}
	}
}

fn main() -> Result<(), DemoError> {
	// smaller than one frame of quads, so overflow flushes happen every frame
	let stream = StreamConfig::default().with_capacity(64 * 1024);

	gl_buffers_demos::view_window("streamed quads", true, stream, |_| StreamedQuads::new())
}
