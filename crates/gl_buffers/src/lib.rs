// Copyright (C) 2022 the ITK authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/./

//! Buffer and state management for OpenGL renderers.
//!
//! * [`StateCache`] skips binds and state changes that are already in effect.
//! * [`StreamingVertexPool`] batches per-frame vertices from many call sites
//!   into one scratch buffer.
//! * [`PersistentGeometryStore`] bump allocates long lived vertex and index
//!   data out of growing backing buffers.
//! * [`RenderCoordinator`] flushes streamed batches whenever draw state changes.
//!
//! All of it is single threaded and issues GL calls through a [`GlApi`].

pub mod backend;
pub mod coordinator;
pub mod format;
pub mod geom;
pub mod state;
pub mod stream;

pub use backend::{GlApi, HeadlessGl, NativeGl};
pub use coordinator::{Material, RenderCoordinator, RenderTarget};
pub use format::{FormatRegistry, VertexAttribute, VertexFormat};
pub use geom::{AllocFlags, ChunkId, GeomError, GeomStoreConfig, PersistentGeometryStore};
pub use state::{FrameStats, StateCache};
pub use stream::{FlushOwner, SharedOwner, StreamConfig, StreamingVertexPool, UploadStrategy};
