use std::path::Path;

/// Owner-rw-only file mode, used for config, store, and generated subprocess
/// config files (§4.1, §4.7, §6.6 all specify `0600`).
#[cfg(unix)]
pub const FILE_MODE: u32 = 0o600;

/// Owner-rwx-only directory mode, for the data directory (§4.1).
#[cfg(unix)]
pub const DIR_MODE: u32 = 0o700;

/// Best-effort: sets `path` to [`FILE_MODE`] on Unix, logging rather than
/// failing if the chmod itself fails (matches `firefrp-store`'s
/// `enforce_file_mode`, generalized so `frps`/`ff-config` don't duplicate
/// it).
#[cfg(unix)]
pub fn enforce_file_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_MODE)) {
        tracing::warn!(path = %path.display(), error = %e, "failed to enforce owner-only file mode");
    }
}

#[cfg(not(unix))]
pub fn enforce_file_mode(_path: &Path) {}

#[cfg(unix)]
pub fn enforce_dir_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(DIR_MODE)) {
        tracing::warn!(path = %path.display(), error = %e, "failed to enforce owner-only directory mode");
    }
}

#[cfg(not(unix))]
pub fn enforce_dir_mode(_path: &Path) {}
