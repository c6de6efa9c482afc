//! Authentication cookie handling.

use std::env;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use rand::RngCore;

/// Size of the binary cookie file.
pub const COOKIE_LEN: usize = 256;

const COOKIE_FILE: &str = ".sonance-cookie";

/// The shared secret proving this client may talk to the per-user daemon.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCookie([u8; COOKIE_LEN]);

impl AuthCookie {
    /// Load a cookie from `path`. Absent files and short reads are errors;
    /// connect maps them to an `AuthKey` failure.
    pub fn load(path: &Path) -> io::Result<Self> {
        let mut file = fs::File::open(path)?;
        let mut bytes = [0u8; COOKIE_LEN];
        file.read_exact(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Generate a fresh random cookie.
    pub fn generate() -> Self {
        let mut bytes = [0u8; COOKIE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Write the cookie to `path` with owner-only permissions, creating the
    /// parent directory if needed.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.0)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; COOKIE_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Debug for AuthCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print the secret
        f.write_str("AuthCookie(..)")
    }
}

/// `~/.sonance-cookie`.
pub fn default_cookie_path() -> Option<PathBuf> {
    let home = env::var("HOME").ok().filter(|h| !h.trim().is_empty())?;
    Some(PathBuf::from(home).join(COOKIE_FILE))
}
