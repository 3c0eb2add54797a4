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

//! The closed error taxonomies surfaced by the engine and by the mount controller.
//!
//! Both families carry a kind tag plus a human-readable message. [`EngineErrorKind`] is the set
//! the filesystem engine (§4.3 of the design) may return; [`MountErrorKind`] is the disjoint set
//! the mount controller (§4.5) may return.  The FUSE adapter is the only code that translates an
//! [`EngineErrorKind`] into a raw `errno`; nothing upstream of it should need to.

use nix::errno::Errno;
use std::fmt;

/// The closed set of reasons a filesystem engine operation can fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineErrorKind {
    /// No node exists at the requested path or name.
    NotFound,
    /// A node already exists where the operation expected to create one.
    AlreadyExists,
    /// A path component that was expected to be a directory is not one.
    NotADirectory,
    /// An operation that requires a non-directory was given a directory.
    IsADirectory,
    /// `remove_dir` was given a directory that still has children.
    NotEmpty,
    /// `readlink` was given a node that is not a symlink.
    NotASymlink,
    /// The path string itself was malformed (see [`crate::path`]).
    BadPath,
    /// The arguments to an otherwise well-formed operation make no sense (e.g. renaming a
    /// directory under itself, or removing the root).
    InvalidArgument,
}

impl EngineErrorKind {
    /// Maps this engine error kind to the `errno` value the FUSE adapter should reply with, per
    /// the table in the design's §4.4.
    pub fn to_errno(self) -> Errno {
        match self {
            EngineErrorKind::NotFound => Errno::ENOENT,
            EngineErrorKind::AlreadyExists => Errno::EEXIST,
            EngineErrorKind::NotADirectory => Errno::ENOTDIR,
            EngineErrorKind::IsADirectory => Errno::EISDIR,
            EngineErrorKind::NotEmpty => Errno::ENOTEMPTY,
            EngineErrorKind::NotASymlink => Errno::EINVAL,
            EngineErrorKind::BadPath => Errno::EINVAL,
            EngineErrorKind::InvalidArgument => Errno::EINVAL,
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            EngineErrorKind::NotFound => "not found",
            EngineErrorKind::AlreadyExists => "already exists",
            EngineErrorKind::NotADirectory => "not a directory",
            EngineErrorKind::IsADirectory => "is a directory",
            EngineErrorKind::NotEmpty => "not empty",
            EngineErrorKind::NotASymlink => "not a symlink",
            EngineErrorKind::BadPath => "bad path",
            EngineErrorKind::InvalidArgument => "invalid argument",
        };
        write!(f, "{}", text)
    }
}

/// An error raised by a filesystem engine operation.
///
/// Carries a [`EngineErrorKind`] plus a human-readable message describing the specific
/// circumstances, independent of any particular `errno` representation until the FUSE adapter
/// needs one.
#[derive(Clone, Debug, Eq, Fail, PartialEq)]
#[fail(display = "{}: {}", kind, message)]
pub struct EngineError {
    kind: EngineErrorKind,
    message: String,
}

impl EngineError {
    /// Constructs a new engine error of the given kind with an explanatory message.
    pub fn new<S: Into<String>>(kind: EngineErrorKind, message: S) -> Self {
        EngineError { kind, message: message.into() }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> EngineErrorKind {
        self.kind
    }
}

impl From<crate::path::PathError> for EngineError {
    fn from(e: crate::path::PathError) -> Self {
        EngineError::new(EngineErrorKind::BadPath, e.to_string())
    }
}

/// Result alias for fallible engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// The closed set of reasons a mount attempt or an established mount can fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MountErrorKind {
    /// The requested mount point does not exist.
    NoSuchMountPoint,
    /// The requested mount point exists but is not a directory.
    NotADirectory,
    /// The requested mount point is already the target of another mount.
    AlreadyMounted,
    /// The calling process lacks the privilege required to mount.
    PermissionDenied,
    /// The FUSE kernel module or device is unavailable.
    KernelUnavailable,
    /// The FUSE session aborted after being established.
    SessionAborted,
}

impl fmt::Display for MountErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            MountErrorKind::NoSuchMountPoint => "no such mount point",
            MountErrorKind::NotADirectory => "mount point is not a directory",
            MountErrorKind::AlreadyMounted => "already mounted",
            MountErrorKind::PermissionDenied => "permission denied",
            MountErrorKind::KernelUnavailable => "kernel FUSE support unavailable",
            MountErrorKind::SessionAborted => "FUSE session aborted",
        };
        write!(f, "{}", text)
    }
}

/// An error raised by the mount controller.
#[derive(Debug, Fail)]
#[fail(display = "{}: {}", kind, message)]
pub struct MountError {
    kind: MountErrorKind,
    message: String,
}

impl MountError {
    /// Constructs a new mount error of the given kind with an explanatory message.
    pub fn new<S: Into<String>>(kind: MountErrorKind, message: S) -> Self {
        MountError { kind, message: message.into() }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> MountErrorKind {
        self.kind
    }
}

impl From<std::io::Error> for MountError {
    fn from(e: std::io::Error) -> Self {
        let kind = if e.raw_os_error() == Some(Errno::EBUSY as i32) {
            // libfuse/the kernel report an already-mounted target as EBUSY, not as any
            // `std::io::ErrorKind` variant -- `ErrorKind::AlreadyExists` means "a file already
            // exists at this path" (e.g. an `O_EXCL` create race), not "this mount point is
            // already mounted", so it must not be used for that here.
            MountErrorKind::AlreadyMounted
        } else {
            match e.kind() {
                std::io::ErrorKind::NotFound => MountErrorKind::NoSuchMountPoint,
                std::io::ErrorKind::PermissionDenied => MountErrorKind::PermissionDenied,
                _ => MountErrorKind::KernelUnavailable,
            }
        };
        MountError::new(kind, e.to_string())
    }
}

/// Result alias for fallible mount operations.
pub type MountResult<T> = Result<T, MountError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_design_table() {
        assert_eq!(Errno::ENOENT, EngineErrorKind::NotFound.to_errno());
        assert_eq!(Errno::EEXIST, EngineErrorKind::AlreadyExists.to_errno());
        assert_eq!(Errno::ENOTDIR, EngineErrorKind::NotADirectory.to_errno());
        assert_eq!(Errno::EISDIR, EngineErrorKind::IsADirectory.to_errno());
        assert_eq!(Errno::ENOTEMPTY, EngineErrorKind::NotEmpty.to_errno());
        assert_eq!(Errno::EINVAL, EngineErrorKind::NotASymlink.to_errno());
        assert_eq!(Errno::EINVAL, EngineErrorKind::BadPath.to_errno());
        assert_eq!(Errno::EINVAL, EngineErrorKind::InvalidArgument.to_errno());
    }

    #[test]
    fn bad_path_converts_from_path_error() {
        let path_err = crate::path::parse("relative").unwrap_err();
        let engine_err: EngineError = path_err.into();
        assert_eq!(EngineErrorKind::BadPath, engine_err.kind());
    }

    #[test]
    fn ebusy_io_error_converts_to_already_mounted() {
        let io_err = std::io::Error::from_raw_os_error(Errno::EBUSY as i32);
        let mount_err: MountError = io_err.into();
        assert_eq!(MountErrorKind::AlreadyMounted, mount_err.kind());
    }

    #[test]
    fn generic_already_exists_io_error_is_not_already_mounted() {
        // `ErrorKind::AlreadyExists` means "a file already exists at this path", not "this mount
        // point is already mounted" -- it must fall back to the coarse kernel-unavailable kind.
        let io_err = std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file exists");
        let mount_err: MountError = io_err.into();
        assert_eq!(MountErrorKind::KernelUnavailable, mount_err.kind());
    }
}
