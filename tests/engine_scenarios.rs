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

//! Integration tests exercising `Engine` the way an embedding application would: through its
//! public surface only, never through crate-internal helpers.

use driftfs::{Engine, EngineErrorKind, NodeHandle};

#[test]
fn scenario_create_file_then_read() {
    let engine = Engine::new();
    engine.create_file("/x", Some(b"hi".to_vec()), 0o644).unwrap();
    match engine.get("/x").unwrap() {
        NodeHandle::File(f) => {
            assert_eq!(b"hi".to_vec(), f.read());
            assert_eq!(2, f.size());
        },
        _ => panic!("expected a file"),
    }
}

#[test]
fn scenario_makedirs_is_idempotent_and_lists_children() {
    let engine = Engine::new();
    engine.makedirs("/a/b/c", 0o755).unwrap();
    assert!(engine.exists("/a") && engine.exists("/a/b") && engine.exists("/a/b/c"));

    engine.makedirs("/a/b/c", 0o755).unwrap();
    engine.create_file("/a/b/c/f", None, 0o644).unwrap();
    assert_eq!(vec!["f".to_string()], engine.listdir("/a/b/c").unwrap());
}

#[test]
fn scenario_symlink_round_trips_without_resolving() {
    let engine = Engine::new();
    engine.create_file("/src", Some(b"data".to_vec()), 0o644).unwrap();
    engine.symlink("/src", "/lnk").unwrap();
    assert!(engine.is_symlink("/lnk"));
    assert_eq!("/src", engine.readlink("/lnk").unwrap());
    assert!(!engine.is_symlink("/src"));
}

#[test]
fn scenario_rename_replaces_same_kind_destination() {
    let engine = Engine::new();
    engine.create_file("/a", None, 0o644).unwrap();
    engine.create_file("/b", Some(b"B".to_vec()), 0o644).unwrap();
    engine.rename("/b", "/a").unwrap();
    match engine.get("/a").unwrap() {
        NodeHandle::File(f) => assert_eq!(b"B".to_vec(), f.read()),
        _ => panic!("expected a file"),
    }
    assert!(!engine.exists("/b"));
}

#[test]
fn scenario_mount_style_write_visible_through_api() {
    // Stands in for S5's "external process writes, programmatic side reads" without a real
    // kernel mount: the FUSE adapter and the programmatic API bottom out in the exact same
    // `Engine` calls, so exercising the engine surface here covers the same code paths `write`
    // and `create` would drive through the adapter.
    let engine = Engine::new();
    let handle = engine.create_file("/greet", None, 0o644).unwrap();
    handle.write(b"hello\n".to_vec());
    assert_eq!(b"hello\n".to_vec(), engine.get("/greet").unwrap_file().read());
}

trait UnwrapFile {
    fn unwrap_file(self) -> driftfs::FileHandle;
}

impl UnwrapFile for NodeHandle {
    fn unwrap_file(self) -> driftfs::FileHandle {
        match self {
            NodeHandle::File(f) => f,
            _ => panic!("expected a file handle"),
        }
    }
}

#[test]
fn scenario_rmdir_requires_empty_directory() {
    let engine = Engine::new();
    engine.create_dir("/d", 0o755).unwrap();
    engine.create_file("/d/f", None, 0o644).unwrap();
    assert_eq!(EngineErrorKind::NotEmpty, engine.remove_dir("/d").unwrap_err().kind());
    engine.remove_file("/d/f").unwrap();
    engine.remove_dir("/d").unwrap();
    assert!(!engine.exists("/d"));
}

#[test]
fn boundary_empty_and_nul_paths_are_bad_path() {
    let engine = Engine::new();
    assert_eq!(EngineErrorKind::BadPath, engine.create_file("", None, 0o644).unwrap_err().kind());
    assert_eq!(EngineErrorKind::BadPath, engine.create_file("/a\0b", None, 0o644).unwrap_err().kind());
}

#[test]
fn boundary_cannot_remove_root() {
    let engine = Engine::new();
    assert_eq!(EngineErrorKind::InvalidArgument, engine.remove_dir("/").unwrap_err().kind());
}

#[test]
fn boundary_cannot_rename_directory_under_its_own_descendant() {
    let engine = Engine::new();
    engine.create_dir("/a", 0o755).unwrap();
    assert_eq!(EngineErrorKind::InvalidArgument, engine.rename("/a", "/a/b").unwrap_err().kind());
}

#[test]
fn boundary_create_under_a_file_parent_fails() {
    let engine = Engine::new();
    engine.create_file("/a", None, 0o644).unwrap();
    assert_eq!(EngineErrorKind::NotADirectory, engine.create_file("/a/b", None, 0o644).unwrap_err().kind());
}

#[test]
fn boundary_rename_over_non_empty_directory_fails() {
    let engine = Engine::new();
    engine.create_dir("/a", 0o755).unwrap();
    engine.create_dir("/b", 0o755).unwrap();
    engine.create_file("/b/f", None, 0o644).unwrap();
    assert_eq!(EngineErrorKind::NotEmpty, engine.rename("/a", "/b").unwrap_err().kind());
}

#[test]
fn property_every_created_path_exists_with_matching_kind() {
    let engine = Engine::new();
    engine.create_file("/f", None, 0o644).unwrap();
    engine.create_dir("/d", 0o755).unwrap();
    engine.symlink("/f", "/s").unwrap();

    assert!(engine.exists("/f") && matches!(engine.get("/f").unwrap(), NodeHandle::File(_)));
    assert!(engine.exists("/d") && matches!(engine.get("/d").unwrap(), NodeHandle::Directory(_)));
    assert!(engine.exists("/s") && matches!(engine.get("/s").unwrap(), NodeHandle::Symlink(_)));
}

#[test]
fn property_write_read_and_truncate_round_trip() {
    let engine = Engine::new();
    let f = engine.create_file("/x", None, 0o644).unwrap();
    f.write(b"0123456789".to_vec());
    assert_eq!(b"0123456789".to_vec(), f.read());

    f.truncate(4);
    assert_eq!(4, f.size());
    assert_eq!(b"0123".to_vec(), f.read());

    f.truncate(6);
    assert_eq!(6, f.size());
    assert_eq!(b"0123\0\0".to_vec(), f.read());
}

#[test]
fn open_unlink_handle_stays_readable_until_dropped() {
    let engine = Engine::new();
    let handle = engine.create_file("/a", Some(b"still here".to_vec()), 0o644).unwrap();
    engine.remove_file("/a").unwrap();
    assert!(!engine.exists("/a"));
    assert_eq!(b"still here".to_vec(), handle.read());
    drop(handle);
    // No way to observe the arena slot directly from outside the crate; the contract is that
    // the handle kept working until this point, which is what matters to a caller.
}
