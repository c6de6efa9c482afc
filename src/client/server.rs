//! Server address syntax and resolution.

use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use crate::config::{ClientConfig, ENV_SERVER};
use crate::error::ErrorCode;

/// A resolved server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddr {
    /// UNIX domain socket at this path.
    Unix(PathBuf),
    /// Resolved TCP endpoint.
    Inet(SocketAddr),
}

/// Resolve the server to connect to.
///
/// Order: explicit argument, then `SONANCE_SERVER`, then the configured
/// server, then the per-user default socket. A leading `/` selects UNIX
/// transport; anything else is `host[:port]` resolved with an unspecified
/// address family.
pub fn resolve_server(
    explicit: Option<&str>,
    config: &ClientConfig,
) -> Result<ServerAddr, ErrorCode> {
    let env_server = env::var(ENV_SERVER).ok().filter(|s| !s.trim().is_empty());
    let spec = explicit
        .map(str::to_owned)
        .or(env_server)
        .or_else(|| config.server.clone());

    match spec {
        Some(spec) if spec.starts_with('/') => Ok(ServerAddr::Unix(PathBuf::from(spec))),
        Some(spec) => parse_inet(&spec, config.default_port).map(ServerAddr::Inet),
        None => Ok(ServerAddr::Unix(default_socket_path())),
    }
}

/// Per-user default socket: `$XDG_RUNTIME_DIR/sonance/native`, falling back
/// to `/tmp/sonance-<uid>/native`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(dir) = env::var("XDG_RUNTIME_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir).join("sonance").join("native");
    }
    per_user_tmp_dir().join("native")
}

fn per_user_tmp_dir() -> PathBuf {
    let uid = nix::unistd::geteuid();
    PathBuf::from("/tmp").join(format!("sonance-{}", uid))
}

fn parse_inet(spec: &str, default_port: u16) -> Result<SocketAddr, ErrorCode> {
    // Already a literal address:port?
    if let Ok(addr) = spec.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let (host, port) = match spec.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port: u16 = port.parse().map_err(|_| ErrorCode::InvalidServer)?;
            (host, port)
        }
        Some(_) => return Err(ErrorCode::InvalidServer),
        None => (spec, default_port),
    };

    (host, port)
        .to_socket_addrs()
        .map_err(|_| ErrorCode::InvalidServer)?
        .next()
        .ok_or(ErrorCode::InvalidServer)
}
