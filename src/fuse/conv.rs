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

//! Conversions between engine-side types and the types the kernel FUSE protocol expects.
//!
//! Centralizes the `NodeSnapshot -> fuser::FileAttr` and `EngineErrorKind -> errno` mappings the
//! rest of [`crate::fuse`] relies on, so every callback in [`super`] shares one place that knows
//! how to build a `fuser::FileAttr` or pick an errno.

use crate::error::EngineErrorKind;
use crate::store::{NodeSnapshot, NodeType};
use nix::unistd::{getgid, getuid};
use std::time::Duration;

/// How long the kernel is allowed to cache an entry or attribute before re-validating it.
///
/// Kept short because every mutation -- in-process or through another mount -- is immediately
/// visible in the arena; a long TTL would let the kernel serve stale `getattr` data after a
/// write made through the programmatic API.
pub const ATTR_TTL: Duration = Duration::from_secs(1);

/// Generation number fuser expects alongside a `ReplyEntry`.  The engine never reuses inode
/// numbers for a new node (§3, invariant 5), so a constant generation of zero is always correct.
pub const GENERATION: u64 = 0;

/// Maps an engine node type to the FUSE file type used in `st_mode`'s type bits and in
/// `readdir` entries.
pub fn file_type(node_type: NodeType) -> fuser::FileType {
    match node_type {
        NodeType::File => fuser::FileType::RegularFile,
        NodeType::Directory => fuser::FileType::Directory,
        NodeType::Symlink => fuser::FileType::Symlink,
    }
}

/// Maps a point-in-time node snapshot to a `fuser::FileAttr`, as required by `getattr`,
/// `setattr`, `lookup`, and `create` replies.
///
/// `uid`/`gid` are always the mounting process's effective IDs, per §4.4: the in-memory store
/// carries no per-node ownership.
pub fn node_to_attr(snapshot: &NodeSnapshot) -> fuser::FileAttr {
    fuser::FileAttr {
        ino: snapshot.inode,
        size: snapshot.size,
        blocks: (snapshot.size + 511) / 512,
        atime: snapshot.atime,
        mtime: snapshot.mtime,
        ctime: snapshot.ctime,
        crtime: snapshot.ctime,
        kind: file_type(snapshot.node_type),
        perm: snapshot.mode,
        nlink: snapshot.nlink,
        uid: getuid().as_raw(),
        gid: getgid().as_raw(),
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

/// Maps an engine error kind to the `errno` the FUSE adapter replies with, per the table in the
/// design's §4.4.  Returned as a plain `i32` because every `fuser::Reply*::error` method takes
/// one.
pub fn errno(kind: EngineErrorKind) -> i32 {
    kind.to_errno() as i32
}
