// Copyright 2018 Google Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! `driftfs` is an in-memory, hierarchical file system that can be manipulated directly through
//! [`Engine`] from Rust, and/or exposed to the host kernel as a real mountable file system over
//! FUSE via [`mount`].  Both sides operate on the same tree and see each other's changes
//! immediately: there is no synchronization step between the programmatic API and a live mount.
//!
//! ```no_run
//! use driftfs::Engine;
//!
//! let engine = Engine::new();
//! engine.create_file("/greeting", Some(b"hello".to_vec()), 0o644).unwrap();
//! engine.makedirs("/a/b/c", 0o755).unwrap();
//!
//! // Exposing the same engine to the kernel:
//! let mount = driftfs::mount(engine.clone(), "/tmp/my-mount", false).unwrap();
//! assert!(mount.is_mounted());
//! mount.unmount();
//! ```
//!
//! See the `DESIGN.md` file in this crate's repository for the grounding behind each module's
//! implementation choices.

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

mod engine;
mod error;
mod fuse;
mod mount;
mod path;
mod store;

pub use crate::engine::{DirHandle, Engine, FileHandle, NodeHandle, SymlinkHandle};
pub use crate::error::{EngineError, EngineErrorKind, EngineResult, MountError, MountErrorKind, MountResult};
pub use crate::mount::{mount, Mount};
pub use crate::path::PathError;
