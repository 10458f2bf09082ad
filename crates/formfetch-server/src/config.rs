//! Configuration loading and resolution.

use anyhow::{Context, Result};
use std::net::SocketAddr;

const DEFAULT_PORT: u16 = 3000;

/// Resolve the listen address.
///
/// An explicit `--addr` wins; otherwise `0.0.0.0:$PORT`, falling back to
/// port 3000.
pub fn resolve_addr(explicit: Option<&str>) -> Result<SocketAddr> {
    resolve_addr_with(explicit, std::env::var("PORT").ok())
}

fn resolve_addr_with(explicit: Option<&str>, port_env: Option<String>) -> Result<SocketAddr> {
    if let Some(addr) = explicit {
        return addr
            .parse()
            .with_context(|| format!("invalid listen address: {addr}"));
    }

    let port = match port_env.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => p
            .parse::<u16>()
            .with_context(|| format!("invalid PORT value: {p}"))?,
        _ => DEFAULT_PORT,
    };
    Ok(SocketAddr::from(([0, 0, 0, 0], port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_addr_wins() {
        let addr = resolve_addr_with(Some("127.0.0.1:8080"), Some("9000".into())).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_port_env() {
        let addr = resolve_addr_with(None, Some("9000".into())).unwrap();
        assert_eq!(addr.port(), 9000);
        assert_eq!(resolve_addr_with(None, None).unwrap().port(), DEFAULT_PORT);
        assert!(resolve_addr_with(None, Some("http".into())).is_err());
    }
}
