//! The privilege-drop integration point.
//!
//! Dropping real OS privileges is platform-specific and outside this
//! crate's scope; what lives here is the seam a deployment hooks into, plus
//! an honest failure when privilege dropping was requested but this build
//! can't perform it.

use std::io;

/// Drops to the named unix user, if given. `None` is a no-op.
///
/// This default implementation cannot actually change the process's
/// UID/GID — that requires a platform-specific crate (e.g. `users` or raw
/// `libc` calls) wired in by the deployment. Requesting a drop here
/// surfaces an error rather than silently continuing as the original user,
/// so callers mapping this to an exit code (see the CLI binary) behave
/// honestly.
pub fn drop_to_user(user: Option<&str>) -> io::Result<()> {
    match user {
        None => Ok(()),
        Some(name) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!(
                "privilege drop to user \"{}\" requested, but this build has no \
                 platform-specific privilege mechanism wired in",
                name
            ),
        )),
    }
}
