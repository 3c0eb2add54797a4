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

//! The FUSE adapter: translates kernel callbacks into [`crate::engine::Engine`] operations.
//!
//! `FuseAdapter` owns an `Engine` plus the bookkeeping the kernel driver needs that the engine
//! does not keep itself: the lookup-count table (§4.4's "Inode table") and the open-file/open-dir
//! handle tables keyed by kernel-issued file handle numbers.  Every callback here does the same
//! three things: translate kernel arguments into an engine call, translate the engine's
//! [`crate::error::EngineError`] (if any) into an `errno`, and reply.  No engine error is ever
//! allowed to propagate out of a callback; an adapter bug that would otherwise panic instead logs
//! and replies `EIO`.

mod conv;

use crate::engine::{Engine, NewNodeKind};
use crate::error::EngineError;
use crate::store::{Inode, NodeType, ROOT_INODE};
use fuser::{
    FileAttr, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::time::SystemTime;

/// Translates an [`EngineError`] into the matching `errno` and logs it at `debug` level.
///
/// Unexpected kinds (there are none today, but the match keeps this honest if the taxonomy ever
/// grows) fall back to `EIO`, per §4.4's "Unexpected internal failures surface as `EIO`."
fn reply_errno(op: &str, err: EngineError) -> i32 {
    debug!("{}: {}", op, err);
    conv::errno(err.kind())
}

/// Adapts an in-memory [`Engine`] to the kernel-facing low-level FUSE callback surface.
/// A directory's children plus its parent inode, captured together at `opendir` time so that a
/// concurrent rename or detach of the directory itself cannot change what a `readdir` on this
/// handle reports for `".."` partway through a multi-call walk.
struct DirSnapshot {
    parent: Inode,
    children: Vec<(String, Inode, NodeType)>,
}

pub struct FuseAdapter {
    engine: Engine,
    /// Kernel lookup count per inode, mirroring (but independent of) the arena's own pin count
    /// so that `forget`'s bookkeeping is self-contained and auditable on its own.
    lookup_counts: HashMap<Inode, u64>,
    /// Readdir snapshots, keyed by the kernel-issued directory handle from `opendir`.
    open_dirs: HashMap<u64, DirSnapshot>,
    /// Inode backing each open file handle from `open`/`create`.
    open_files: HashMap<u64, Inode>,
    next_fh: u64,
}

impl FuseAdapter {
    /// Wraps `engine` in a FUSE adapter.  Inode 1 (the root) is implicitly referenced for the
    /// lifetime of the mount.
    pub fn new(engine: Engine) -> Self {
        let mut lookup_counts = HashMap::new();
        lookup_counts.insert(ROOT_INODE, 1);
        FuseAdapter {
            engine,
            lookup_counts,
            open_dirs: HashMap::new(),
            open_files: HashMap::new(),
            next_fh: 1,
        }
    }

    fn alloc_fh(&mut self) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        fh
    }

    fn bump_lookup(&mut self, inode: Inode) {
        self.engine.pin(inode);
        *self.lookup_counts.entry(inode).or_insert(0) += 1;
    }

    /// Decrements `inode`'s lookup count by `n`, both locally and on the arena's pin count.  The
    /// `forget` callback is a thin wrapper around this so the bookkeeping can be unit-tested
    /// without a live kernel `Request`.
    fn forget_inode(&mut self, inode: Inode, n: u64) {
        self.engine.unpin(inode, n);
        if let Some(count) = self.lookup_counts.get_mut(&inode) {
            *count = count.saturating_sub(n);
            if *count == 0 {
                self.lookup_counts.remove(&inode);
            }
        }
    }

    fn name_str<'a>(name: &'a OsStr) -> Result<&'a str, i32> {
        name.to_str().ok_or(nix::errno::Errno::EINVAL as i32)
    }
}

impl Filesystem for FuseAdapter {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = match Self::name_str(name) {
            Ok(n) => n,
            Err(errno) => return reply.error(errno),
        };
        match self.engine.lookup_child(parent, name) {
            Ok(snapshot) => {
                self.bump_lookup(snapshot.inode);
                reply.entry(&conv::ATTR_TTL, &conv::node_to_attr(&snapshot), conv::GENERATION)
            },
            Err(e) => reply.error(reply_errno("lookup", e)),
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        self.forget_inode(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        match self.engine.attr(ino) {
            Ok(snapshot) => reply.attr(&conv::ATTR_TTL, &conv::node_to_attr(&snapshot)),
            Err(e) => reply.error(reply_errno("getattr", e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if let Some(mode) = mode {
            if let Err(e) = self.engine.set_mode_inode(ino, (mode & 0o7777) as u16) {
                return reply.error(reply_errno("setattr(mode)", e));
            }
        }
        if let Some(size) = size {
            if let Err(e) = self.engine.truncate_inode(ino, size) {
                return reply.error(reply_errno("setattr(size)", e));
            }
        }
        match self.engine.attr(ino) {
            Ok(snapshot) => reply.attr(&conv::ATTR_TTL, &conv::node_to_attr(&snapshot)),
            Err(e) => reply.error(reply_errno("setattr", e)),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        match self.engine.readlink_bytes(ino) {
            Ok(target) => reply.data(&target),
            Err(e) => reply.error(reply_errno("readlink", e)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _rdev: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = match Self::name_str(name) {
            Ok(n) => n,
            Err(errno) => return reply.error(errno),
        };
        match self.engine.create_named(parent, name, (mode & 0o7777) as u16, NewNodeKind::File(Vec::new())) {
            Ok(snapshot) => {
                self.bump_lookup(snapshot.inode);
                reply.entry(&conv::ATTR_TTL, &conv::node_to_attr(&snapshot), conv::GENERATION)
            },
            Err(e) => reply.error(reply_errno("mknod", e)),
        }
    }

    fn mkdir(&mut self, _req: &Request, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let name = match Self::name_str(name) {
            Ok(n) => n,
            Err(errno) => return reply.error(errno),
        };
        match self.engine.create_named(parent, name, (mode & 0o7777) as u16, NewNodeKind::Directory) {
            Ok(snapshot) => {
                self.bump_lookup(snapshot.inode);
                reply.entry(&conv::ATTR_TTL, &conv::node_to_attr(&snapshot), conv::GENERATION)
            },
            Err(e) => reply.error(reply_errno("mkdir", e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match Self::name_str(name) {
            Ok(n) => n,
            Err(errno) => return reply.error(errno),
        };
        match self.engine.unlink_named(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(reply_errno("unlink", e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match Self::name_str(name) {
            Ok(n) => n,
            Err(errno) => return reply.error(errno),
        };
        match self.engine.rmdir_named(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(reply_errno("rmdir", e)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        link: &std::path::Path,
        reply: ReplyEntry,
    ) {
        let name = match Self::name_str(name) {
            Ok(n) => n,
            Err(errno) => return reply.error(errno),
        };
        let target = link.as_os_str().as_bytes().to_vec();
        match self.engine.create_named(parent, name, 0o777, NewNodeKind::Symlink(target)) {
            Ok(snapshot) => {
                self.bump_lookup(snapshot.inode);
                reply.entry(&conv::ATTR_TTL, &conv::node_to_attr(&snapshot), conv::GENERATION)
            },
            Err(e) => reply.error(reply_errno("symlink", e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags != 0 {
            // RENAME_NOREPLACE / RENAME_EXCHANGE: not modeled, matching the engine's
            // `rename(old, new)` contract (§4.3), which always replaces a same-kind destination.
            return reply.error(nix::errno::Errno::EINVAL as i32);
        }
        let name = match Self::name_str(name) {
            Ok(n) => n,
            Err(errno) => return reply.error(errno),
        };
        let newname = match Self::name_str(newname) {
            Ok(n) => n,
            Err(errno) => return reply.error(errno),
        };
        match self.engine.rename_named(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(reply_errno("rename", e)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.engine.attr(ino) {
            Ok(_) => {
                let fh = self.alloc_fh();
                self.open_files.insert(fh, ino);
                reply.opened(fh, 0);
            },
            Err(e) => reply.error(reply_errno("open", e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let offset = offset.max(0) as u64;
        match self.engine.read_at(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(reply_errno("read", e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let offset = offset.max(0) as u64;
        match self.engine.write_at(ino, offset, data) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(reply_errno("write", e)),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Nothing to flush: writes land directly in the arena.
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.open_files.remove(&fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.engine.readdir_snapshot(ino) {
            Ok(children) => {
                let parent = self.engine.attr(ino).ok().and_then(|a| a.parent).unwrap_or(ROOT_INODE);
                let fh = self.alloc_fh();
                self.open_dirs.insert(fh, DirSnapshot { parent, children });
                reply.opened(fh, 0);
            },
            Err(e) => reply.error(reply_errno("opendir", e)),
        }
    }

    fn readdir(&mut self, _req: &Request, ino: u64, fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let snapshot = match self.open_dirs.get(&fh) {
            Some(s) => s,
            None => return reply.error(nix::errno::Errno::EBADF as i32),
        };

        let mut entries: Vec<(u64, fuser::FileType, String)> = Vec::with_capacity(snapshot.children.len() + 2);
        entries.push((ino, fuser::FileType::Directory, ".".to_string()));
        entries.push((snapshot.parent, fuser::FileType::Directory, "..".to_string()));
        for (name, child_inode, node_type) in &snapshot.children {
            entries.push((*child_inode, conv::file_type(*node_type), name.clone()));
        }

        for (i, (child_inode, file_type, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*child_inode, (i + 1) as i64, *file_type, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.open_dirs.remove(&fh);
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = match Self::name_str(name) {
            Ok(n) => n,
            Err(errno) => return reply.error(errno),
        };
        match self.engine.create_named(parent, name, (mode & 0o7777) as u16, NewNodeKind::File(Vec::new())) {
            Ok(snapshot) => {
                self.bump_lookup(snapshot.inode);
                let fh = self.alloc_fh();
                self.open_files.insert(fh, snapshot.inode);
                let attr: FileAttr = conv::node_to_attr(&snapshot);
                reply.created(&conv::ATTR_TTL, &attr, conv::GENERATION, fh, 0);
            },
            Err(e) => reply.error(reply_errno("create", e)),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, _mask: i32, reply: ReplyEmpty) {
        // The adapter does not enforce permission checks (§4.4): the kernel does, unless mounted
        // without `default_permissions`.  Existence is the only thing worth confirming here.
        match self.engine.attr(ino) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(reply_errno("access", e)),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        // Synthesized: there is no backing block device to report real occupancy for.
        const FAKE_BLOCKS: u64 = 1 << 20;
        reply.statfs(FAKE_BLOCKS, FAKE_BLOCKS / 2, FAKE_BLOCKS / 2, 1 << 20, 1 << 19, 512, 255, 512);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    fn new_adapter() -> FuseAdapter {
        FuseAdapter::new(Engine::new())
    }

    #[test]
    fn lookup_increments_lookup_count() {
        let mut adapter = new_adapter();
        adapter.engine.create_file("/a", None, 0o644).unwrap();
        match adapter.engine.lookup_child(ROOT_INODE, "a") {
            Ok(snapshot) => adapter.bump_lookup(snapshot.inode),
            Err(e) => panic!("{}", e),
        }
        let inode = adapter.engine.lookup_child(ROOT_INODE, "a").unwrap().inode;
        assert_eq!(Some(&2), adapter.lookup_counts.get(&inode));
    }

    #[test]
    fn forget_clears_lookup_count() {
        let mut adapter = new_adapter();
        adapter.engine.create_file("/a", None, 0o644).unwrap();
        let inode = adapter.engine.lookup_child(ROOT_INODE, "a").unwrap().inode;
        adapter.bump_lookup(inode);
        adapter.forget_inode(inode, 2);
        assert!(!adapter.lookup_counts.contains_key(&inode));
    }

    #[test]
    fn fh_allocation_is_monotonic() {
        let mut adapter = new_adapter();
        let a = adapter.alloc_fh();
        let b = adapter.alloc_fh();
        assert!(b > a);
    }
}
