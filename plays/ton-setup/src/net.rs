//! Addresses and the network global config.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::Path,
};

use crate::error::{IoContext, Result, SetupError};

pub const CHECKIP_URL: &str = "http://checkip.amazonaws.com";

/// Dotted quad as the signed 32-bit integer peers expect in configs: the
/// network byte order bytes read back as a big-endian `i32`.
pub fn ipv4_to_config_int(addr: Ipv4Addr) -> i32 {
    i32::from_be_bytes(addr.octets())
}

pub fn config_int_to_ipv4(value: i32) -> Ipv4Addr {
    Ipv4Addr::from(value.to_be_bytes())
}

/// Resolve a hostname to its first IPv4 address.
pub async fn resolve_to_ipv4(hostname: &str) -> Option<Ipv4Addr> {
    tokio::net::lookup_host(format!("{}:80", hostname))
        .await
        .ok()?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            _ => None,
        })
}

/// Turn the operator's `--address` into an IPv4 address, asking
/// checkip.amazonaws.com when none was given.
pub async fn resolve_public_address(explicit: Option<&str>) -> Result<Ipv4Addr> {
    let raw = match explicit {
        Some(raw) => raw.trim().to_string(),
        None => {
            tracing::info!("Detecting public address via {}", CHECKIP_URL);
            reqwest::get(CHECKIP_URL)
                .await?
                .error_for_status()?
                .text()
                .await?
                .trim()
                .to_string()
        }
    };

    if let Ok(ip) = raw.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    tracing::debug!("'{}' is not a dotted quad, resolving", raw);
    resolve_to_ipv4(&raw)
        .await
        .ok_or_else(|| SetupError::Validation(format!("cannot resolve address '{raw}' to IPv4")))
}

/// Where the global config comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalConfigSource {
    Url(String),
    File(std::path::PathBuf),
}

impl GlobalConfigSource {
    /// `http://` and `https://` sources are downloaded, existing files are
    /// copied, anything else is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Url(raw.to_string()));
        }
        let path = Path::new(raw);
        if path.is_file() {
            Ok(Self::File(path.to_path_buf()))
        } else {
            Err(SetupError::Validation(format!(
                "Specified global config {raw} cannot be found"
            )))
        }
    }

    pub async fn store(&self, dest: &Path) -> Result<()> {
        match self {
            Self::Url(url) => {
                tracing::info!("Fetching global config from {}", url);
                let body = reqwest::get(url).await?.error_for_status()?.bytes().await?;
                tokio::fs::write(dest, &body).await.with_path("write", dest)?;
            }
            Self::File(path) => {
                tracing::info!("Copying global config from {}", path.display());
                tokio::fs::copy(path, dest).await.with_path("copy to", dest)?;
            }
        }
        Ok(())
    }
}
