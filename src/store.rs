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

//! The in-memory node store: an arena of nodes addressed by inode number.
//!
//! Nodes do not hold `Arc` references to their parent or children.  Instead, parent and child
//! links are plain inode numbers resolved through the arena's `HashMap`.  This sidesteps the
//! reference cycle that a naive `Arc<Node>` tree would create between a directory and its
//! children, and it gives the FUSE adapter's inode table (§4.4) a key it already needs to have on
//! hand.
//!
//! Everything in this module is a single critical section away from being called concurrently:
//! the [`crate::engine::Engine`] is the only code that locks the arena, and every method here
//! assumes that lock is already held by the caller.

use std::collections::HashMap;
use std::time::SystemTime;

/// A stable, engine-unique identifier for a live node.  The root directory is always inode 1.
pub type Inode = u64;

/// Inode number of the root directory, matching the FUSE convention of the same constant.
pub const ROOT_INODE: Inode = 1;

/// The three kinds of node the tree can hold.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeType {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
}

struct FileData {
    content: Vec<u8>,
}

struct DirData {
    children: HashMap<String, Inode>,
}

struct SymlinkData {
    target: Vec<u8>,
}

enum NodeKind {
    File(FileData),
    Directory(DirData),
    Symlink(SymlinkData),
}

/// A single node in the arena.
///
/// `pins` is the reference count described in the design's §4.2: it is bumped once per live
/// programmatic handle and once per kernel lookup, and a node is only actually removed from the
/// arena once it has been detached from its parent *and* its pin count has dropped to zero.
struct Node {
    name: String,
    mode: u16,
    parent: Option<Inode>,
    ctime: SystemTime,
    mtime: SystemTime,
    atime: SystemTime,
    pins: u64,
    detached: bool,
    kind: NodeKind,
}

impl Node {
    fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::File(_) => NodeType::File,
            NodeKind::Directory(_) => NodeType::Directory,
            NodeKind::Symlink(_) => NodeType::Symlink,
        }
    }
}

/// A point-in-time, owned copy of a node's metadata, cheap to pass around without holding the
/// arena lock.
#[derive(Clone, Debug)]
pub struct NodeSnapshot {
    pub inode: Inode,
    pub name: String,
    pub parent: Option<Inode>,
    pub node_type: NodeType,
    pub mode: u16,
    pub nlink: u32,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

/// The arena of all live nodes.
pub(crate) struct Arena {
    nodes: HashMap<Inode, Node>,
    next_inode: Inode,
}

impl Arena {
    /// Creates a new arena containing only the root directory.
    pub fn new(root_mode: u16) -> Self {
        let now = SystemTime::now();
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INODE,
            Node {
                name: String::new(),
                mode: root_mode,
                parent: None,
                ctime: now,
                mtime: now,
                atime: now,
                pins: 0,
                detached: false,
                kind: NodeKind::Directory(DirData { children: HashMap::new() }),
            },
        );
        Arena { nodes, next_inode: ROOT_INODE + 1 }
    }

    fn alloc_inode(&mut self) -> Inode {
        let inode = self.next_inode;
        self.next_inode += 1;
        inode
    }

    fn dir_children(&self, inode: Inode) -> Option<&HashMap<String, Inode>> {
        match &self.nodes.get(&inode)?.kind {
            NodeKind::Directory(d) => Some(&d.children),
            _ => None,
        }
    }

    fn dir_children_mut(&mut self, inode: Inode) -> Option<&mut HashMap<String, Inode>> {
        match &mut self.nodes.get_mut(&inode)?.kind {
            NodeKind::Directory(d) => Some(&mut d.children),
            _ => None,
        }
    }

    /// Returns whether `inode` names a live directory.
    pub fn is_directory(&self, inode: Inode) -> bool {
        matches!(self.nodes.get(&inode).map(Node::node_type), Some(NodeType::Directory))
    }

    /// Returns the type of `inode`, if it is live.
    pub fn node_type(&self, inode: Inode) -> Option<NodeType> {
        self.nodes.get(&inode).map(Node::node_type)
    }

    /// Returns `inode`'s parent, if it is live and not the root.
    pub fn parent_of(&self, inode: Inode) -> Option<Inode> {
        self.nodes.get(&inode)?.parent
    }

    /// Looks up a child of `parent` by name.  Returns `None` if `parent` is not a live directory
    /// or has no such child.
    pub fn child_of(&self, parent: Inode, name: &str) -> Option<Inode> {
        self.dir_children(parent)?.get(name).copied()
    }

    /// Lists the names of `parent`'s children.  Returns `None` if `parent` is not a live
    /// directory.
    pub fn list_children(&self, parent: Inode) -> Option<Vec<String>> {
        Some(self.dir_children(parent)?.keys().cloned().collect())
    }

    /// Lists `(name, inode, type)` triples for `parent`'s children, used by the FUSE adapter's
    /// readdir snapshot.  Returns `None` if `parent` is not a live directory.
    pub fn list_children_detailed(&self, parent: Inode) -> Option<Vec<(String, Inode, NodeType)>> {
        let children = self.dir_children(parent)?;
        Some(
            children
                .iter()
                .map(|(name, &inode)| {
                    let node_type =
                        self.nodes.get(&inode).map(Node::node_type).unwrap_or(NodeType::File);
                    (name.clone(), inode, node_type)
                })
                .collect(),
        )
    }

    /// Returns the number of children of `parent` that are themselves directories.  Used to
    /// compute `nlink` per invariant 6 (`.`/`..` convention).
    fn subdirectory_count(&self, parent: Inode) -> u32 {
        match self.dir_children(parent) {
            None => 0,
            Some(children) => children
                .values()
                .filter(|&&inode| self.node_type(inode) == Some(NodeType::Directory))
                .count() as u32,
        }
    }

    /// Inserts a brand-new file node as a child of `parent`.  Caller must have already verified
    /// that `parent` is a directory with no existing child named `name`.
    pub fn insert_file(&mut self, parent: Inode, name: &str, mode: u16, content: Vec<u8>) -> Inode {
        self.insert_child(parent, name, mode, NodeKind::File(FileData { content }))
    }

    /// Inserts a brand-new, empty directory node as a child of `parent`.
    pub fn insert_dir(&mut self, parent: Inode, name: &str, mode: u16) -> Inode {
        self.insert_child(parent, name, mode, NodeKind::Directory(DirData { children: HashMap::new() }))
    }

    /// Inserts a brand-new symlink node as a child of `parent`.
    pub fn insert_symlink(&mut self, parent: Inode, name: &str, mode: u16, target: Vec<u8>) -> Inode {
        self.insert_child(parent, name, mode, NodeKind::Symlink(SymlinkData { target }))
    }

    fn insert_child(&mut self, parent: Inode, name: &str, mode: u16, kind: NodeKind) -> Inode {
        let inode = self.alloc_inode();
        let now = SystemTime::now();
        self.nodes.insert(
            inode,
            Node {
                name: name.to_string(),
                mode,
                parent: Some(parent),
                ctime: now,
                mtime: now,
                atime: now,
                pins: 0,
                detached: false,
                kind,
            },
        );
        if let Some(children) = self.dir_children_mut(parent) {
            children.insert(name.to_string(), inode);
        }
        self.touch(parent);
        inode
    }

    /// Detaches `name` from `parent`'s children and returns the detached node's inode, or `None`
    /// if there was no such child.  The node is not necessarily freed: it remains in the arena,
    /// marked detached, until its pin count reaches zero (see [`Arena::unpin`]).
    pub fn remove_child(&mut self, parent: Inode, name: &str) -> Option<Inode> {
        let inode = self.dir_children_mut(parent)?.remove(name)?;
        self.touch(parent);
        self.detach(inode);
        Some(inode)
    }

    /// Atomically relocates the node named `old_name` under `old_parent` to `new_name` under
    /// `new_parent`, preserving its inode number.  Does not check for a pre-existing destination;
    /// the caller (the engine) is responsible for clearing or validating the destination first.
    pub fn rename_child(
        &mut self,
        old_parent: Inode,
        old_name: &str,
        new_parent: Inode,
        new_name: &str,
    ) -> Option<Inode> {
        let inode = self.dir_children_mut(old_parent)?.remove(old_name)?;
        self.touch(old_parent);
        if let Some(children) = self.dir_children_mut(new_parent) {
            children.insert(new_name.to_string(), inode);
        }
        self.touch(new_parent);
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.parent = Some(new_parent);
            node.name = new_name.to_string();
            node.ctime = SystemTime::now();
        }
        Some(inode)
    }

    fn detach(&mut self, inode: Inode) {
        let mut reap = false;
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.detached = true;
            node.parent = None;
            reap = node.pins == 0;
        }
        if reap {
            self.nodes.remove(&inode);
        }
    }

    /// Bumps `inode`'s pin count by one, keeping it alive in the arena even if subsequently
    /// detached.  Used by both programmatic handles and the FUSE adapter's lookup count.
    pub fn pin(&mut self, inode: Inode) {
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.pins += 1;
        }
    }

    /// Drops `inode`'s pin count by `n`, reaping the node from the arena if it is both detached
    /// and now unpinned.
    pub fn unpin(&mut self, inode: Inode, n: u64) {
        let mut reap = false;
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.pins = node.pins.saturating_sub(n);
            reap = node.detached && node.pins == 0;
        }
        if reap {
            self.nodes.remove(&inode);
        }
    }

    fn touch(&mut self, inode: Inode) {
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.mtime = SystemTime::now();
            node.ctime = node.mtime;
        }
    }

    /// Takes a read-only snapshot of `inode`'s metadata.
    pub fn snapshot(&self, inode: Inode) -> Option<NodeSnapshot> {
        let node = self.nodes.get(&inode)?;
        let size = match &node.kind {
            NodeKind::File(f) => f.content.len() as u64,
            NodeKind::Symlink(s) => s.target.len() as u64,
            NodeKind::Directory(_) => 0,
        };
        let nlink = match node.node_type() {
            NodeType::Directory => 2 + self.subdirectory_count(inode),
            _ => 1,
        };
        Some(NodeSnapshot {
            inode,
            name: node.name.clone(),
            parent: node.parent,
            node_type: node.node_type(),
            mode: node.mode,
            nlink,
            size,
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
        })
    }

    /// Updates the mode bits of `inode`, bumping ctime.  Fails silently (no-op) if `inode` is not
    /// live; the engine is responsible for checking existence first.
    pub fn set_mode(&mut self, inode: Inode, mode: u16) {
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.mode = mode;
            node.ctime = SystemTime::now();
        }
    }

    /// Records an access to `inode`, bumping atime.
    pub fn mark_accessed(&mut self, inode: Inode) {
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.atime = SystemTime::now();
        }
    }

    /// Returns a copy of a file's entire content.
    pub fn file_content(&self, inode: Inode) -> Option<Vec<u8>> {
        match &self.nodes.get(&inode)?.kind {
            NodeKind::File(f) => Some(f.content.clone()),
            _ => None,
        }
    }

    /// Replaces a file's content wholesale, per the programmatic `write(data)` contract.
    pub fn set_file_content(&mut self, inode: Inode, data: Vec<u8>) -> bool {
        let now = SystemTime::now();
        if let Some(node) = self.nodes.get_mut(&inode) {
            if let NodeKind::File(f) = &mut node.kind {
                f.content = data;
                node.mtime = now;
                node.ctime = now;
                return true;
            }
        }
        false
    }

    /// Truncates or zero-extends a file to exactly `len` bytes.
    pub fn truncate_file(&mut self, inode: Inode, len: u64) -> bool {
        let now = SystemTime::now();
        if let Some(node) = self.nodes.get_mut(&inode) {
            if let NodeKind::File(f) = &mut node.kind {
                f.content.resize(len as usize, 0);
                node.mtime = now;
                node.ctime = now;
                return true;
            }
        }
        false
    }

    /// Reads up to `size` bytes from a file starting at `offset`, used by the FUSE adapter's
    /// offset-based `read` callback.
    pub fn read_at(&self, inode: Inode, offset: u64, size: u32) -> Option<Vec<u8>> {
        match &self.nodes.get(&inode)?.kind {
            NodeKind::File(f) => {
                let start = (offset as usize).min(f.content.len());
                let end = (start + size as usize).min(f.content.len());
                Some(f.content[start..end].to_vec())
            },
            _ => None,
        }
    }

    /// Writes `data` at `offset` into a file, zero-extending as needed, used by the FUSE
    /// adapter's offset-based `write` callback.  Returns the number of bytes written.
    pub fn write_at(&mut self, inode: Inode, offset: u64, data: &[u8]) -> Option<u32> {
        let now = SystemTime::now();
        let node = self.nodes.get_mut(&inode)?;
        if let NodeKind::File(f) = &mut node.kind {
            let start = offset as usize;
            if f.content.len() < start {
                f.content.resize(start, 0);
            }
            let end = start + data.len();
            if f.content.len() < end {
                f.content.resize(end, 0);
            }
            f.content[start..end].copy_from_slice(data);
            node.mtime = now;
            node.ctime = now;
            Some(data.len() as u32)
        } else {
            None
        }
    }

    /// Returns a symlink's target, verbatim.
    pub fn symlink_target(&self, inode: Inode) -> Option<Vec<u8>> {
        match &self.nodes.get(&inode)?.kind {
            NodeKind::Symlink(s) => Some(s.target.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_exists_and_is_empty_directory() {
        let arena = Arena::new(0o755);
        assert!(arena.is_directory(ROOT_INODE));
        assert_eq!(Some(Vec::new()), arena.list_children(ROOT_INODE));
    }

    #[test]
    fn insert_and_lookup_file() {
        let mut arena = Arena::new(0o755);
        let inode = arena.insert_file(ROOT_INODE, "a", 0o644, b"hi".to_vec());
        assert_eq!(Some(inode), arena.child_of(ROOT_INODE, "a"));
        assert_eq!(Some(b"hi".to_vec()), arena.file_content(inode));
    }

    #[test]
    fn nlink_counts_subdirectories_only() {
        let mut arena = Arena::new(0o755);
        arena.insert_file(ROOT_INODE, "f", 0o644, Vec::new());
        arena.insert_dir(ROOT_INODE, "d", 0o755);
        let snapshot = arena.snapshot(ROOT_INODE).unwrap();
        assert_eq!(3, snapshot.nlink); // 2 + one subdirectory
    }

    #[test]
    fn detach_then_unpin_reaps_node() {
        let mut arena = Arena::new(0o755);
        let inode = arena.insert_file(ROOT_INODE, "a", 0o644, Vec::new());
        arena.pin(inode);
        arena.remove_child(ROOT_INODE, "a");
        // Still alive: a handle pins it.
        assert!(arena.snapshot(inode).is_some());
        arena.unpin(inode, 1);
        assert!(arena.snapshot(inode).is_none());
    }

    #[test]
    fn detach_without_pin_reaps_immediately() {
        let mut arena = Arena::new(0o755);
        let inode = arena.insert_file(ROOT_INODE, "a", 0o644, Vec::new());
        arena.remove_child(ROOT_INODE, "a");
        assert!(arena.snapshot(inode).is_none());
    }

    #[test]
    fn write_at_zero_extends() {
        let mut arena = Arena::new(0o755);
        let inode = arena.insert_file(ROOT_INODE, "a", 0o644, Vec::new());
        arena.write_at(inode, 4, b"hi");
        assert_eq!(Some(vec![0, 0, 0, 0, b'h', b'i']), arena.file_content(inode));
    }

    #[test]
    fn rename_preserves_inode() {
        let mut arena = Arena::new(0o755);
        let inode = arena.insert_file(ROOT_INODE, "a", 0o644, Vec::new());
        let renamed = arena.rename_child(ROOT_INODE, "a", ROOT_INODE, "b").unwrap();
        assert_eq!(inode, renamed);
        assert_eq!(None, arena.child_of(ROOT_INODE, "a"));
        assert_eq!(Some(inode), arena.child_of(ROOT_INODE, "b"));
    }
}
