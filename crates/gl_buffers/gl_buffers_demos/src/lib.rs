// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

use bytemuck::{Pod, Zeroable};
use gl_buffers::{
	backend::ClientArray,
	NativeGl,
	RenderCoordinator,
	RenderTarget,
	StreamConfig,
	VertexAttribute,
};
use glfw::{Context, OpenGlProfileHint, WindowHint};
use thiserror::Error;

pub mod shader;

pub use shader::{link_program, ShaderError};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ColorVertex {
	pub position: [f32; 3],
	pub color: [u8; 4],
}

impl ColorVertex {
	pub const ATTRIBUTES: [VertexAttribute; 2] = [
		VertexAttribute::new::<f32>(ClientArray::Position, 3),
		VertexAttribute::new::<u8>(ClientArray::Color, 4).normalized(),
	];

	pub fn new(x: f32, y: f32, color: [u8; 4]) -> Self {
		Self {
			position: [x, y, 0.0],
			color,
		}
	}
}

pub const COLOR_VERTEX_SHADER: &str = r#"
#version 330 core

layout(location = 0) in vec3 position;
layout(location = 3) in vec4 color;

out vec4 vertex_color;

void main() {
	vertex_color = color;
	gl_Position = vec4(position, 1.0);
}
"#;

pub const COLOR_FRAGMENT_SHADER: &str = r#"
#version 330 core

in vec4 vertex_color;
out vec4 frag_color;

void main() {
	frag_color = vertex_color;
}
"#;

/// Same as [`COLOR_FRAGMENT_SHADER`] but with the colors inverted
pub const INVERTED_FRAGMENT_SHADER: &str = r#"
#version 330 core

in vec4 vertex_color;
out vec4 frag_color;

void main() {
	frag_color = vec4(vec3(1.0) - vertex_color.rgb, vertex_color.a);
}
"#;

#[derive(Debug, Error)]
pub enum DemoError {
	#[error("could not initialize glfw: {0:?}")]
	Init(glfw::InitError),
	#[error("could not create a window")]
	CreateWindow,
	#[error(transparent)]
	Shader(#[from] ShaderError),
	#[error(transparent)]
	Geometry(#[from] gl_buffers::GeomError),
}

pub trait Demo {
	fn frame(&mut self, coordinator: &mut RenderCoordinator<NativeGl>);
	/// Free the demo's GL objects before the context goes away
	fn destroy(self, coordinator: &mut RenderCoordinator<NativeGl>);
}

/// Open a window and run `create`'s demo in it until the window is closed
pub fn view_window<D, F>(title: &str, vsync: bool, stream: StreamConfig, create: F) -> Result<(), DemoError>
where
	D: Demo,
	F: FnOnce(&mut RenderCoordinator<NativeGl>) -> Result<D, DemoError>,
{
	let mut glfw = glfw::init(glfw::FAIL_ON_ERRORS).map_err(DemoError::Init)?;
	glfw.window_hint(WindowHint::ContextVersion(3, 3));
	glfw.window_hint(WindowHint::OpenGlProfile(OpenGlProfileHint::Core));
	glfw.window_hint(WindowHint::OpenGlDebugContext(true));

	let (mut window, events) = glfw
		.create_window(1000, 1000, title, glfw::WindowMode::Windowed)
		.ok_or(DemoError::CreateWindow)?;

	window.make_current();

	if !vsync {
		glfw.set_swap_interval(glfw::SwapInterval::None);
	}

	window.set_framebuffer_size_polling(true);

	gl::load_with(|p| window.get_proc_address(p));

	env_logger::init();

	// SAFETY: the window's context is current and its functions are loaded
	let native = unsafe { NativeGl::new() };
	native.setup_debug_output();

	let (width, height) = window.get_framebuffer_size();
	let mut coordinator = RenderCoordinator::new(native, stream, RenderTarget::screen(width, height));
	let mut demo = create(&mut coordinator)?;

	let mut frame = 0u64;
	while !window.should_close() {
		unsafe {
			gl::ClearColor(0.1, 0.1, 0.12, 1.0);
			gl::Clear(gl::COLOR_BUFFER_BIT);
		}

		demo.frame(&mut coordinator);

		let stats = coordinator.end_frame();
		if frame % 240 == 0 {
			log::info!("frame {frame}: {stats:?}");
		}
		frame += 1;

		window.swap_buffers();
		glfw.poll_events();
		for (_, event) in glfw::flush_messages(&events) {
			match event {
				glfw::WindowEvent::FramebufferSize(width, height) =>
					coordinator.resize_screen(width, height),
				_ => {},
			}
		}
	}

	demo.destroy(&mut coordinator);
	coordinator.destroy();
	Ok(())
}
