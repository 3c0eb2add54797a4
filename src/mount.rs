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

//! Binds an [`Engine`] to a real kernel mount point and guarantees its teardown.
//!
//! [`mount`] spawns the FUSE session on a background thread (via `fuser::spawn_mount2`) and
//! returns a [`Mount`] handle.  The handle unmounts on `Drop`, on an explicit call to
//! [`Mount::unmount`], and -- as a belt-and-braces safeguard -- on receipt of
//! `SIGINT`/`SIGTERM`, so a handle that outlives its owning scope because the process is being
//! killed is still cleaned up.

use crate::engine::Engine;
use crate::error::{MountError, MountErrorKind, MountResult};
use crate::fuse::FuseAdapter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How often the background signal-watcher thread polls for a requested shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A scoped handle to a live FUSE mount.
///
/// Dropping the handle -- on scope exit, on an error elsewhere in the caller, or via an explicit
/// [`Mount::unmount`] -- tears down the session and unmounts the mount point.  The transition is
/// idempotent: a second `unmount`, or a drop after an explicit `unmount`, is a no-op, matching
/// §4.5's state machine (`[mounted] -> [unmounting] -> [terminated]`, with `[terminated]`
/// transitions idempotent).
pub struct Mount {
    mount_point: PathBuf,
    session: Arc<Mutex<Option<fuser::BackgroundSession>>>,
    active: Arc<AtomicBool>,
}

/// Binds `engine` to `mount_point`, starting a FUSE session in the background.
///
/// `mount_point` must already exist and be a directory; the kernel handshake and any subsequent
/// session error are reported as a [`MountError`] distinguishable by cause, per §4.5's "Mount
/// failure modes."
pub fn mount<P: AsRef<Path>>(engine: Engine, mount_point: P, allow_other: bool) -> MountResult<Mount> {
    let mount_point = mount_point.as_ref();

    let metadata = std::fs::metadata(mount_point).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            MountError::new(MountErrorKind::NoSuchMountPoint, format!("{:?} does not exist", mount_point))
        },
        std::io::ErrorKind::PermissionDenied => {
            MountError::new(MountErrorKind::PermissionDenied, format!("cannot stat {:?}: {}", mount_point, e))
        },
        _ => MountError::new(MountErrorKind::NoSuchMountPoint, format!("cannot stat {:?}: {}", mount_point, e)),
    })?;
    if !metadata.is_dir() {
        return Err(MountError::new(
            MountErrorKind::NotADirectory,
            format!("{:?} is not a directory", mount_point),
        ));
    }

    let mut options = vec![fuser::MountOption::FSName("driftfs".to_string())];
    if allow_other {
        options.push(fuser::MountOption::AllowOther);
    }

    info!("mounting driftfs at {:?} (allow_other={})", mount_point, allow_other);
    let adapter = FuseAdapter::new(engine);
    let background = fuser::spawn_mount2(adapter, mount_point, &options)?;

    let session = Arc::new(Mutex::new(Some(background)));
    let active = Arc::new(AtomicBool::new(true));
    spawn_signal_watcher(Arc::clone(&session), Arc::clone(&active));

    Ok(Mount { mount_point: mount_point.to_path_buf(), session, active })
}

/// Installs `SIGINT`/`SIGTERM` handlers and a background thread that unmounts `session` if either
/// fires before the `Mount` handle is otherwise dropped.
///
/// The handlers themselves only flip an `AtomicBool`; all the actual teardown work happens on
/// this thread rather than in signal context, which is the usage pattern `signal-hook` exists to
/// make safe.
fn spawn_signal_watcher(session: Arc<Mutex<Option<fuser::BackgroundSession>>>, active: Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in &[signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(*sig, Arc::clone(&shutdown)) {
            warn!("failed to register signal handler for {}: {}", sig, e);
        }
    }

    thread::spawn(move || loop {
        if !active.load(Ordering::Relaxed) {
            // The `Mount` handle was dropped or explicitly unmounted through normal means;
            // nothing left for this thread to do.
            return;
        }
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown signal received, unmounting");
            if let Ok(mut guard) = session.lock() {
                *guard = None; // Dropping the session unmounts it.
            }
            active.store(false, Ordering::Relaxed);
            return;
        }
        thread::sleep(POLL_INTERVAL);
    });
}

impl Mount {
    /// Returns whether the mount session is still live.
    pub fn is_mounted(&self) -> bool {
        self.active.load(Ordering::Relaxed) && self.session.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /// The mount point this handle is bound to.
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Explicitly tears down the session and unmounts the mount point.  Idempotent: calling this
    /// more than once (directly, or via a subsequent `Drop`) has no further effect.
    pub fn unmount(self) {
        // Dropping `self` runs `Mount::drop`, which performs the actual teardown.
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        if let Ok(mut guard) = self.session.lock() {
            if guard.take().is_some() {
                info!("unmounting {:?}", self.mount_point);
            }
            // Dropping the extracted `BackgroundSession` (if any) performs the unmount.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    #[test]
    fn mount_rejects_nonexistent_mount_point() {
        let engine = Engine::new();
        let err = mount(engine, "/nonexistent/definitely/not/here", false).unwrap_err();
        assert_eq!(MountErrorKind::NoSuchMountPoint, err.kind());
    }

    #[test]
    fn mount_rejects_non_directory_mount_point() {
        let engine = Engine::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = mount(engine, file.path(), false).unwrap_err();
        assert_eq!(MountErrorKind::NotADirectory, err.kind());
    }
}
