// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

use gl::types::{GLchar, GLenum, GLint, GLuint};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShaderError {
	#[error("could not create shader object")]
	CouldNotCreate,
	#[error("could not compile {stage} shader - driver log:\n{log}\n")]
	Compile { stage: &'static str, log: String },
	#[error("could not link program - driver log:\n{0}\n")]
	Link(String),
}

/// Compile and link a vertex + fragment shader pair.
///
/// Attribute locations are left to the sources, which should match
/// [`ClientArray::location`](gl_buffers::backend::ClientArray::location).
pub fn link_program(vertex: &str, fragment: &str) -> Result<GLuint, ShaderError> {
	let vertex = compile(gl::VERTEX_SHADER, "vertex", vertex)?;
	let fragment = match compile(gl::FRAGMENT_SHADER, "fragment", fragment) {
		Ok(fragment) => fragment,
		Err(e) => {
			unsafe { gl::DeleteShader(vertex) };
			return Err(e)
		},
	};

	unsafe {
		let program = gl::CreateProgram();
		if program == 0 {
			gl::DeleteShader(vertex);
			gl::DeleteShader(fragment);
			return Err(ShaderError::CouldNotCreate)
		}

		gl::AttachShader(program, vertex);
		gl::AttachShader(program, fragment);
		gl::LinkProgram(program);

		// the program keeps the compiled code
		gl::DetachShader(program, vertex);
		gl::DetachShader(program, fragment);
		gl::DeleteShader(vertex);
		gl::DeleteShader(fragment);

		let mut status = 0 as GLint;
		gl::GetProgramiv(program, gl::LINK_STATUS, &mut status);

		if status != gl::TRUE as GLint {
			let log = info_log(program, gl::GetProgramiv, gl::GetProgramInfoLog);
			gl::DeleteProgram(program);
			return Err(ShaderError::Link(log))
		}

		log::debug!("linked shader program {program}");
		Ok(program)
	}
}

fn compile(ty: GLenum, stage: &'static str, source: &str) -> Result<GLuint, ShaderError> {
	unsafe {
		let shader = gl::CreateShader(ty);
		if shader == 0 {
			return Err(ShaderError::CouldNotCreate)
		}

		let src_ptr = source.as_bytes().as_ptr() as *const GLchar;
		let len = source.len() as GLint;
		gl::ShaderSource(shader, 1, &src_ptr, &len);
		gl::CompileShader(shader);

		let mut status = 0 as GLint;
		gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut status);

		if status != gl::TRUE as GLint {
			let log = info_log(shader, gl::GetShaderiv, gl::GetShaderInfoLog);
			gl::DeleteShader(shader);
			return Err(ShaderError::Compile { stage, log })
		}

		Ok(shader)
	}
}

type GetIv = unsafe fn(GLuint, GLenum, *mut GLint);
type GetInfoLog = unsafe fn(GLuint, GLint, *mut GLint, *mut GLchar);

unsafe fn info_log(object: GLuint, get_iv: GetIv, get_log: GetInfoLog) -> String {
	let mut length = 0 as GLint;
	get_iv(object, gl::INFO_LOG_LENGTH, &mut length);

	let mut log = vec![0u8; length.max(1) as usize];
	get_log(object, length, &mut length, log.as_mut_ptr() as *mut GLchar);
	log.truncate(length.max(0) as usize);

	String::from_utf8_lossy(&log).into_owned()
}
