//! Random selection of free local ports.

use std::{
    collections::HashSet,
    net::{Ipv4Addr, SocketAddr},
    ops::RangeInclusive,
    time::Duration,
};

use rand::Rng;
use tokio::net::TcpStream;

use crate::error::{Result, SetupError};

pub const PORT_RANGE: RangeInclusive<u16> = 10000..=49151;
pub const MAX_ATTEMPTS: u32 = 1000;
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Hands out ports that are neither taken by this run nor accepting TCP
/// connections on localhost at the time of the probe.
#[derive(Debug)]
pub struct PortAllocator {
    used: HashSet<u16>,
    range: RangeInclusive<u16>,
    max_attempts: u32,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(PORT_RANGE, MAX_ATTEMPTS)
    }
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>, max_attempts: u32) -> Self {
        Self {
            used: HashSet::new(),
            range,
            max_attempts,
        }
    }

    /// Mark an operator supplied port as taken so it is never handed out.
    pub fn reserve(&mut self, port: u16) {
        self.used.insert(port);
    }

    pub fn used(&self) -> &HashSet<u16> {
        &self.used
    }

    pub async fn allocate(&mut self) -> Result<u16> {
        for _ in 0..self.max_attempts {
            let candidate = rand::thread_rng().gen_range(self.range.clone());
            if self.used.contains(&candidate) || is_port_in_use(candidate).await {
                continue;
            }
            tracing::debug!(port = candidate, "allocated port");
            self.used.insert(candidate);
            return Ok(candidate);
        }
        Err(SetupError::ResourceExhausted(format!(
            "no free port found in {}-{} after {} attempts",
            self.range.start(),
            self.range.end(),
            self.max_attempts
        )))
    }

    /// Use `explicit` when given, otherwise allocate.
    pub async fn resolve(&mut self, explicit: Option<u16>) -> Result<u16> {
        match explicit {
            Some(port) => {
                self.reserve(port);
                Ok(port)
            }
            None => self.allocate().await,
        }
    }
}

/// True when something accepts TCP connections on `localhost:port`.
pub async fn is_port_in_use(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[tokio::test]
    async fn sequential_allocations_are_distinct_and_free() {
        let mut alloc = PortAllocator::default();
        let mut ports = Vec::new();
        for _ in 0..16 {
            ports.push(alloc.allocate().await.unwrap());
        }
        let unique: HashSet<u16> = ports.iter().copied().collect();
        assert_eq!(unique.len(), ports.len());
        for port in ports {
            assert!(PORT_RANGE.contains(&port));
            assert!(!is_port_in_use(port).await);
        }
    }

    #[tokio::test]
    async fn listening_port_is_detected() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_port_in_use(port).await);
    }

    #[tokio::test]
    async fn busy_single_port_range_is_exhausted() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut alloc = PortAllocator::new(port..=port, 5);
        let err = alloc.allocate().await.unwrap_err();
        assert!(matches!(err, SetupError::ResourceExhausted(_)));
    }

    #[tokio::test]
    async fn reserved_ports_are_never_returned() {
        let mut alloc = PortAllocator::new(20000..=20001, 50);
        alloc.reserve(20000);
        if let Ok(port) = alloc.allocate().await {
            assert_eq!(port, 20001);
        }
        assert!(alloc.allocate().await.is_err());
    }

    #[tokio::test]
    async fn explicit_port_wins() {
        let mut alloc = PortAllocator::default();
        assert_eq!(alloc.resolve(Some(30303)).await.unwrap(), 30303);
        assert!(alloc.used().contains(&30303));
    }
}
