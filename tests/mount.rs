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

//! Exercises the mount controller against a real kernel FUSE mount.
//!
//! These tests need `/dev/fuse` and permission to mount, which most CI sandboxes lack; they are
//! `#[ignore]`d and meant to be run explicitly (`cargo test -- --ignored`) on a host that has
//! FUSE available.

use driftfs::{Engine, MountErrorKind};
use std::fs;
use std::thread;
use std::time::Duration;

#[test]
fn mount_rejects_a_mount_point_that_does_not_exist() {
    let engine = Engine::new();
    let err = driftfs::mount(engine, "/path/that/does/not/exist", false).unwrap_err();
    assert_eq!(MountErrorKind::NoSuchMountPoint, err.kind());
}

#[test]
fn mount_rejects_a_mount_point_that_is_a_file() {
    let engine = Engine::new();
    let file = tempfile::NamedTempFile::new().unwrap();
    let err = driftfs::mount(engine, file.path(), false).unwrap_err();
    assert_eq!(MountErrorKind::NotADirectory, err.kind());
}

#[test]
#[ignore = "requires /dev/fuse and permission to mount; run explicitly with --ignored"]
fn scenario_external_write_is_visible_through_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new();
    let mount = driftfs::mount(engine.clone(), dir.path(), false).unwrap();
    assert!(mount.is_mounted());

    fs::write(dir.path().join("greet"), b"hello\n").unwrap();
    // Give the kernel a moment to round-trip the write through the FUSE session.
    thread::sleep(Duration::from_millis(200));

    match engine.get("/greet").unwrap() {
        driftfs::NodeHandle::File(f) => assert_eq!(b"hello\n".to_vec(), f.read()),
        _ => panic!("expected a file"),
    }

    mount.unmount();
}
