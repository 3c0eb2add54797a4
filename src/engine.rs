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

//! The synchronous filesystem engine: the only writer to the node store.
//!
//! Every operation here parses or is given an already-resolved location, acquires the engine's
//! single lock, does its work, and releases it.  Path-based operations (the public contract of
//! §4.3) and the inode-based operations the FUSE adapter needs both bottom out in the same
//! handful of private `*_impl` functions, so there is exactly one implementation of "what rename
//! means" or "what rmdir means" regardless of which side of the engine a caller comes in from.

use crate::error::{EngineError, EngineErrorKind, EngineResult};
use crate::path;
use crate::store::{Arena, Inode, NodeSnapshot, NodeType, ROOT_INODE};
use std::sync::{Arc, RwLock};

fn not_found(what: &str) -> EngineError {
    EngineError::new(EngineErrorKind::NotFound, format!("{:?} does not exist", what))
}

/// The kind of node to create, used by the shared `create_child_impl` helper.
pub(crate) enum NewNodeKind {
    File(Vec<u8>),
    Directory,
    Symlink(Vec<u8>),
}

/// A handle to the in-memory tree.
///
/// Cloning an `Engine` is cheap (it is an `Arc` around a single `RwLock<Arena>`) and all clones
/// refer to the same underlying tree, exactly as a `Clone`d database connection pool handle would.
#[derive(Clone)]
pub struct Engine {
    arena: Arc<RwLock<Arena>>,
}

impl Engine {
    /// Creates a new, empty engine containing only a root directory with mode `0o755`.
    pub fn new() -> Self {
        Engine { arena: Arc::new(RwLock::new(Arena::new(0o755))) }
    }

    fn walk(arena: &Arena, components: &[String]) -> EngineResult<Inode> {
        let mut current = ROOT_INODE;
        for name in components {
            if !arena.is_directory(current) {
                return Err(EngineError::new(
                    EngineErrorKind::NotADirectory,
                    format!("{:?} is not a directory", name),
                ));
            }
            current = arena.child_of(current, name).ok_or_else(|| not_found(name))?;
        }
        Ok(current)
    }

    fn resolve_parent(arena: &Arena, path: &str) -> EngineResult<(Inode, String)> {
        let components = path::parse(path)?;
        let (parent_components, name) = path::split_last(&components).ok_or_else(|| {
            EngineError::new(EngineErrorKind::InvalidArgument, "path has no final component")
        })?;
        let parent = Self::walk(arena, parent_components)?;
        if !arena.is_directory(parent) {
            return Err(EngineError::new(EngineErrorKind::NotADirectory, "parent is not a directory"));
        }
        Ok((parent, name.to_string()))
    }

    fn create_child_impl(
        arena: &mut Arena,
        parent: Inode,
        name: &str,
        mode: u16,
        kind: NewNodeKind,
    ) -> EngineResult<Inode> {
        if !arena.is_directory(parent) {
            return Err(EngineError::new(EngineErrorKind::NotADirectory, "parent is not a directory"));
        }
        if arena.child_of(parent, name).is_some() {
            return Err(EngineError::new(
                EngineErrorKind::AlreadyExists,
                format!("{:?} already exists", name),
            ));
        }
        Ok(match kind {
            NewNodeKind::File(content) => arena.insert_file(parent, name, mode, content),
            NewNodeKind::Directory => arena.insert_dir(parent, name, mode),
            NewNodeKind::Symlink(target) => arena.insert_symlink(parent, name, mode, target),
        })
    }

    fn unlink_impl(arena: &mut Arena, parent: Inode, name: &str) -> EngineResult<()> {
        let inode = arena.child_of(parent, name).ok_or_else(|| not_found(name))?;
        match arena.node_type(inode) {
            Some(NodeType::Directory) => Err(EngineError::new(
                EngineErrorKind::IsADirectory,
                format!("{:?} is a directory", name),
            )),
            Some(_) => {
                arena.remove_child(parent, name);
                Ok(())
            },
            None => Err(not_found(name)),
        }
    }

    fn rmdir_impl(arena: &mut Arena, parent: Inode, name: &str) -> EngineResult<()> {
        let inode = arena.child_of(parent, name).ok_or_else(|| not_found(name))?;
        match arena.node_type(inode) {
            Some(NodeType::Directory) => {
                if !arena.list_children(inode).unwrap_or_default().is_empty() {
                    return Err(EngineError::new(
                        EngineErrorKind::NotEmpty,
                        format!("{:?} is not empty", name),
                    ));
                }
                arena.remove_child(parent, name);
                Ok(())
            },
            Some(_) => Err(EngineError::new(
                EngineErrorKind::NotADirectory,
                format!("{:?} is not a directory", name),
            )),
            None => Err(not_found(name)),
        }
    }

    fn rename_impl(
        arena: &mut Arena,
        old_parent: Inode,
        old_name: &str,
        new_parent: Inode,
        new_name: &str,
    ) -> EngineResult<()> {
        let old_inode = arena.child_of(old_parent, old_name).ok_or_else(|| not_found(old_name))?;

        if !arena.is_directory(new_parent) {
            return Err(EngineError::new(EngineErrorKind::NotADirectory, "destination parent is not a directory"));
        }

        if arena.node_type(old_inode) == Some(NodeType::Directory) {
            let mut cursor = Some(new_parent);
            while let Some(c) = cursor {
                if c == old_inode {
                    return Err(EngineError::new(
                        EngineErrorKind::InvalidArgument,
                        "cannot rename a directory under itself or a descendant",
                    ));
                }
                cursor = arena.parent_of(c);
            }
        }

        if let Some(existing) = arena.child_of(new_parent, new_name) {
            if existing != old_inode {
                let old_type = arena.node_type(old_inode).unwrap();
                let existing_type = arena.node_type(existing).unwrap();
                match (old_type, existing_type) {
                    (NodeType::Directory, NodeType::Directory) => {
                        if !arena.list_children(existing).unwrap_or_default().is_empty() {
                            return Err(EngineError::new(
                                EngineErrorKind::NotEmpty,
                                format!("{:?} is not empty", new_name),
                            ));
                        }
                    },
                    (a, b) if a == b => {},
                    _ => {
                        return Err(EngineError::new(
                            EngineErrorKind::InvalidArgument,
                            "cannot rename across node kinds",
                        ));
                    },
                }
                arena.remove_child(new_parent, new_name);
            }
        }

        arena.rename_child(old_parent, old_name, new_parent, new_name);
        Ok(())
    }

    // ---- Path-based public contract (§4.3) -------------------------------------------------

    /// Creates a new, empty-by-default regular file at `path`.
    pub fn create_file(&self, path: &str, content: Option<Vec<u8>>, mode: u16) -> EngineResult<FileHandle> {
        let mut arena = self.arena.write().unwrap();
        let (parent, name) = Self::resolve_parent(&arena, path)?;
        let inode = Self::create_child_impl(
            &mut arena,
            parent,
            &name,
            mode,
            NewNodeKind::File(content.unwrap_or_default()),
        )?;
        Ok(FileHandle::new(self, &mut arena, inode))
    }

    /// Creates a new, empty directory at `path`.
    pub fn create_dir(&self, path: &str, mode: u16) -> EngineResult<DirHandle> {
        let mut arena = self.arena.write().unwrap();
        let (parent, name) = Self::resolve_parent(&arena, path)?;
        let inode = Self::create_child_impl(&mut arena, parent, &name, mode, NewNodeKind::Directory)?;
        Ok(DirHandle::new(self, &mut arena, inode))
    }

    /// Creates `path` and any missing intermediate directories, all with mode `mode`.
    ///
    /// Succeeds idempotently if `path` already exists as a directory.  Partial failures (an
    /// intermediate component exists but is not a directory) leave the tree in whatever state was
    /// reached before the failing component, matching `mkdir -p`.
    pub fn makedirs(&self, path: &str, mode: u16) -> EngineResult<DirHandle> {
        let components = path::parse(path)?;
        let mut arena = self.arena.write().unwrap();
        let mut current = ROOT_INODE;
        for name in &components {
            match arena.child_of(current, name) {
                Some(existing) => {
                    if !arena.is_directory(existing) {
                        return Err(EngineError::new(
                            EngineErrorKind::NotADirectory,
                            format!("{:?} is not a directory", name),
                        ));
                    }
                    current = existing;
                },
                None => {
                    if !arena.is_directory(current) {
                        return Err(EngineError::new(
                            EngineErrorKind::NotADirectory,
                            "parent is not a directory",
                        ));
                    }
                    current = arena.insert_dir(current, name, mode);
                },
            }
        }
        Ok(DirHandle::new(self, &mut arena, current))
    }

    /// Resolves `path` to a node handle without following symlinks anywhere along the way.
    pub fn get(&self, path: &str) -> EngineResult<NodeHandle> {
        let components = path::parse(path)?;
        let mut arena = self.arena.write().unwrap();
        let inode = Self::walk(&arena, &components)?;
        let node_type = arena.node_type(inode).expect("just resolved by walk");
        Ok(match node_type {
            NodeType::File => NodeHandle::File(FileHandle::new(self, &mut arena, inode)),
            NodeType::Directory => NodeHandle::Directory(DirHandle::new(self, &mut arena, inode)),
            NodeType::Symlink => NodeHandle::Symlink(SymlinkHandle::new(self, &mut arena, inode)),
        })
    }

    /// Returns whether `path` resolves to a live node.  Never raises; a malformed path is simply
    /// reported as not existing.
    pub fn exists(&self, path: &str) -> bool {
        let components = match path::parse(path) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let arena = self.arena.read().unwrap();
        Self::walk(&arena, &components).is_ok()
    }

    /// Creates a symlink at `path` pointing at `target`, stored verbatim.
    pub fn symlink(&self, target: &str, path: &str) -> EngineResult<SymlinkHandle> {
        let mut arena = self.arena.write().unwrap();
        let (parent, name) = Self::resolve_parent(&arena, path)?;
        let inode = Self::create_child_impl(
            &mut arena,
            parent,
            &name,
            0o777,
            NewNodeKind::Symlink(target.as_bytes().to_vec()),
        )?;
        Ok(SymlinkHandle::new(self, &mut arena, inode))
    }

    /// Returns the target of the symlink at `path`.
    pub fn readlink(&self, path: &str) -> EngineResult<String> {
        let components = path::parse(path)?;
        let arena = self.arena.read().unwrap();
        let inode = Self::walk(&arena, &components)?;
        match arena.node_type(inode) {
            Some(NodeType::Symlink) => {
                let target = arena.symlink_target(inode).expect("node_type confirmed symlink");
                Ok(String::from_utf8_lossy(&target).into_owned())
            },
            _ => Err(EngineError::new(EngineErrorKind::NotASymlink, format!("{:?} is not a symlink", path))),
        }
    }

    /// Returns whether `path` resolves to a symlink.  Never raises.
    pub fn is_symlink(&self, path: &str) -> bool {
        let components = match path::parse(path) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let arena = self.arena.read().unwrap();
        match Self::walk(&arena, &components) {
            Ok(inode) => arena.node_type(inode) == Some(NodeType::Symlink),
            Err(_) => false,
        }
    }

    /// Removes the file or symlink at `path`.  Fails `is-a-directory` on directories.
    pub fn remove_file(&self, path: &str) -> EngineResult<()> {
        let mut arena = self.arena.write().unwrap();
        let (parent, name) = Self::resolve_parent(&arena, path)?;
        Self::unlink_impl(&mut arena, parent, &name)
    }

    /// Removes the empty directory at `path`.  Refuses to remove the root.
    pub fn remove_dir(&self, path: &str) -> EngineResult<()> {
        let components = path::parse(path)?;
        if components.is_empty() {
            return Err(EngineError::new(EngineErrorKind::InvalidArgument, "cannot remove the root directory"));
        }
        let mut arena = self.arena.write().unwrap();
        let (parent_components, name) = path::split_last(&components).expect("non-empty checked above");
        let parent = Self::walk(&arena, parent_components)?;
        Self::rmdir_impl(&mut arena, parent, name)
    }

    /// Lists the names of the children of the directory at `path`.
    pub fn listdir(&self, path: &str) -> EngineResult<Vec<String>> {
        let components = path::parse(path)?;
        let arena = self.arena.read().unwrap();
        let inode = Self::walk(&arena, &components)?;
        arena
            .list_children(inode)
            .ok_or_else(|| EngineError::new(EngineErrorKind::NotADirectory, format!("{:?} is not a directory", path)))
    }

    /// Atomically renames `old` to `new`, preserving the node's identity and inode number.
    pub fn rename(&self, old: &str, new: &str) -> EngineResult<()> {
        let old_components = path::parse(old)?;
        let new_components = path::parse(new)?;
        let mut arena = self.arena.write().unwrap();

        let (old_parent_components, old_name) = path::split_last(&old_components)
            .ok_or_else(|| EngineError::new(EngineErrorKind::InvalidArgument, "cannot rename the root"))?;
        let old_parent = Self::walk(&arena, old_parent_components)?;

        let (new_parent_components, new_name) = path::split_last(&new_components)
            .ok_or_else(|| EngineError::new(EngineErrorKind::InvalidArgument, "cannot rename onto the root"))?;
        let new_parent = Self::walk(&arena, new_parent_components)?;

        Self::rename_impl(&mut arena, old_parent, old_name, new_parent, new_name)
    }

    // ---- Inode-based surface used by the FUSE adapter (§4.4) --------------------------------

    pub(crate) fn attr(&self, inode: Inode) -> EngineResult<NodeSnapshot> {
        let arena = self.arena.read().unwrap();
        arena.snapshot(inode).ok_or_else(|| not_found("inode"))
    }

    pub(crate) fn pin(&self, inode: Inode) {
        let mut arena = self.arena.write().unwrap();
        arena.pin(inode);
    }

    pub(crate) fn unpin(&self, inode: Inode, n: u64) {
        let mut arena = self.arena.write().unwrap();
        arena.unpin(inode, n);
    }

    /// Resolves `name` under `parent` without pinning it.  The FUSE adapter pins the result
    /// itself (once, via `bump_lookup`) so that its local lookup-count table and the arena's pin
    /// count stay in lockstep.
    pub(crate) fn lookup_child(&self, parent: Inode, name: &str) -> EngineResult<NodeSnapshot> {
        let arena = self.arena.read().unwrap();
        let inode = arena.child_of(parent, name).ok_or_else(|| not_found(name))?;
        arena.snapshot(inode).ok_or_else(|| not_found(name))
    }

    /// Creates `name` under `parent` without pinning it; see [`Engine::lookup_child`].
    pub(crate) fn create_named(
        &self,
        parent: Inode,
        name: &str,
        mode: u16,
        kind: NewNodeKind,
    ) -> EngineResult<NodeSnapshot> {
        let mut arena = self.arena.write().unwrap();
        let inode = Self::create_child_impl(&mut arena, parent, name, mode, kind)?;
        arena.snapshot(inode).ok_or_else(|| not_found(name))
    }

    pub(crate) fn unlink_named(&self, parent: Inode, name: &str) -> EngineResult<()> {
        let mut arena = self.arena.write().unwrap();
        Self::unlink_impl(&mut arena, parent, name)
    }

    pub(crate) fn rmdir_named(&self, parent: Inode, name: &str) -> EngineResult<()> {
        let mut arena = self.arena.write().unwrap();
        Self::rmdir_impl(&mut arena, parent, name)
    }

    pub(crate) fn rename_named(
        &self,
        old_parent: Inode,
        old_name: &str,
        new_parent: Inode,
        new_name: &str,
    ) -> EngineResult<()> {
        let mut arena = self.arena.write().unwrap();
        Self::rename_impl(&mut arena, old_parent, old_name, new_parent, new_name)
    }

    pub(crate) fn readdir_snapshot(&self, inode: Inode) -> EngineResult<Vec<(String, Inode, NodeType)>> {
        let arena = self.arena.read().unwrap();
        arena
            .list_children_detailed(inode)
            .ok_or_else(|| EngineError::new(EngineErrorKind::NotADirectory, "not a directory"))
    }

    pub(crate) fn read_at(&self, inode: Inode, offset: u64, size: u32) -> EngineResult<Vec<u8>> {
        let mut arena = self.arena.write().unwrap();
        arena.mark_accessed(inode);
        arena.read_at(inode, offset, size).ok_or_else(|| not_found("inode"))
    }

    pub(crate) fn write_at(&self, inode: Inode, offset: u64, data: &[u8]) -> EngineResult<u32> {
        let mut arena = self.arena.write().unwrap();
        arena.write_at(inode, offset, data).ok_or_else(|| not_found("inode"))
    }

    pub(crate) fn truncate_inode(&self, inode: Inode, len: u64) -> EngineResult<NodeSnapshot> {
        let mut arena = self.arena.write().unwrap();
        if !arena.truncate_file(inode, len) {
            return Err(not_found("inode"));
        }
        arena.snapshot(inode).ok_or_else(|| not_found("inode"))
    }

    pub(crate) fn set_mode_inode(&self, inode: Inode, mode: u16) -> EngineResult<NodeSnapshot> {
        let mut arena = self.arena.write().unwrap();
        arena.set_mode(inode, mode);
        arena.snapshot(inode).ok_or_else(|| not_found("inode"))
    }

    pub(crate) fn readlink_bytes(&self, inode: Inode) -> EngineResult<Vec<u8>> {
        let arena = self.arena.read().unwrap();
        arena.symlink_target(inode).ok_or_else(|| {
            EngineError::new(EngineErrorKind::NotASymlink, "not a symlink")
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

/// A resolved node returned by [`Engine::get`]: exactly one of a file, directory, or symlink
/// handle.
pub enum NodeHandle {
    File(FileHandle),
    Directory(DirHandle),
    Symlink(SymlinkHandle),
}

/// A live handle to a file node.
///
/// Pins its inode for as long as it is alive: reads and writes through the handle keep working
/// even if the file is concurrently unlinked from its parent directory (POSIX open-unlink
/// semantics), per §3's "Lifecycle" paragraph.
pub struct FileHandle {
    engine: Engine,
    inode: Inode,
}

impl FileHandle {
    fn new(engine: &Engine, arena: &mut Arena, inode: Inode) -> Self {
        arena.pin(inode);
        FileHandle { engine: engine.clone(), inode }
    }

    /// The file's name (the final path component it was created or last renamed under).
    pub fn name(&self) -> String {
        self.engine.attr(self.inode).map(|a| a.name).unwrap_or_default()
    }

    /// The file's current size in bytes.
    pub fn size(&self) -> u64 {
        self.engine.attr(self.inode).map(|a| a.size).unwrap_or(0)
    }

    /// The file's permission mode bits.
    pub fn mode(&self) -> u16 {
        self.engine.attr(self.inode).map(|a| a.mode).unwrap_or(0)
    }

    /// Sets the file's permission mode bits.
    pub fn set_mode(&self, mode: u16) {
        let _ = self.engine.set_mode_inode(self.inode, mode);
    }

    /// Returns a copy of the file's current content.
    pub fn content(&self) -> Vec<u8> {
        self.read()
    }

    /// Replaces the file's content wholesale.
    pub fn set_content(&self, data: Vec<u8>) {
        self.write(data)
    }

    /// Returns a copy of the file's current content, updating the node's access time.
    pub fn read(&self) -> Vec<u8> {
        let mut arena = self.engine.arena.write().unwrap();
        arena.mark_accessed(self.inode);
        arena.file_content(self.inode).unwrap_or_default()
    }

    /// Replaces the file's content wholesale with `data`.
    pub fn write(&self, data: Vec<u8>) {
        let mut arena = self.engine.arena.write().unwrap();
        arena.set_file_content(self.inode, data);
    }

    /// Truncates or zero-extends the file to exactly `n` bytes.
    pub fn truncate(&self, n: u64) {
        let mut arena = self.engine.arena.write().unwrap();
        arena.truncate_file(self.inode, n);
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        let mut arena = self.engine.arena.write().unwrap();
        arena.unpin(self.inode, 1);
    }
}

/// A live handle to a directory node.
pub struct DirHandle {
    engine: Engine,
    inode: Inode,
}

impl DirHandle {
    fn new(engine: &Engine, arena: &mut Arena, inode: Inode) -> Self {
        arena.pin(inode);
        DirHandle { engine: engine.clone(), inode }
    }

    /// The directory's name.
    pub fn name(&self) -> String {
        self.engine.attr(self.inode).map(|a| a.name).unwrap_or_default()
    }

    /// The directory's permission mode bits.
    pub fn mode(&self) -> u16 {
        self.engine.attr(self.inode).map(|a| a.mode).unwrap_or(0)
    }

    /// Sets the directory's permission mode bits.
    pub fn set_mode(&self, mode: u16) {
        let _ = self.engine.set_mode_inode(self.inode, mode);
    }

    /// A read-only snapshot of the directory's child names.  Mutating the returned vector has no
    /// effect on the tree; the only way to change a directory's contents is through the engine's
    /// operations (§9's Open Question, resolved in favor of read-only exposure).
    pub fn children(&self) -> Vec<String> {
        let arena = self.engine.arena.read().unwrap();
        arena.list_children(self.inode).unwrap_or_default()
    }
}

impl Drop for DirHandle {
    fn drop(&mut self) {
        let mut arena = self.engine.arena.write().unwrap();
        arena.unpin(self.inode, 1);
    }
}

/// A live handle to a symlink node.
pub struct SymlinkHandle {
    engine: Engine,
    inode: Inode,
}

impl SymlinkHandle {
    fn new(engine: &Engine, arena: &mut Arena, inode: Inode) -> Self {
        arena.pin(inode);
        SymlinkHandle { engine: engine.clone(), inode }
    }

    /// The symlink's name.
    pub fn name(&self) -> String {
        self.engine.attr(self.inode).map(|a| a.name).unwrap_or_default()
    }

    /// The symlink's target, immutable after creation.
    pub fn target(&self) -> String {
        let arena = self.engine.arena.read().unwrap();
        arena.symlink_target(self.inode).map(|t| String::from_utf8_lossy(&t).into_owned()).unwrap_or_default()
    }
}

impl Drop for SymlinkHandle {
    fn drop(&mut self) {
        let mut arena = self.engine.arena.write().unwrap();
        arena.unpin(self.inode, 1);
    }
}
