//! In-process port leasing.
//!
//! The allocator hands out [`PortLease`]s. At most one live lease exists per
//! port value across every clone of an allocator, which lets parallel runs
//! share one instance. Ports occupied by other programs are skipped through a
//! [`PortProbe`]; the allocator never binds on the service's behalf, so a race
//! between the probe and the service binding is absorbed by readiness retries.

use crate::errors::PortExhaustedError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, TcpListener};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// An inclusive range of TCP ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// Lowest port.
    pub lo: u16,
    /// Highest port (inclusive).
    pub hi: u16,
}

impl PortRange {
    /// Creates a range, rejecting empty ranges and port 0.
    pub fn new(lo: u16, hi: u16) -> Result<Self, String> {
        if lo == 0 {
            return Err("port range must start at 1 or above".to_string());
        }
        if lo > hi {
            return Err(format!("empty port range {lo}-{hi}"));
        }
        Ok(Self { lo, hi })
    }

    /// Returns true if `port` falls inside the range.
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.lo && port <= self.hi
    }

    /// Ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.lo..=self.hi
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self { lo: 8081, hi: 8180 }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.lo, self.hi)
    }
}

impl FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lo, hi) = s
            .split_once('-')
            .ok_or_else(|| format!("expected LO-HI, got '{s}'"))?;
        let lo = lo
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("invalid low port '{lo}': {e}"))?;
        let hi = hi
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("invalid high port '{hi}': {e}"))?;
        Self::new(lo, hi)
    }
}

/// Checks whether a port is free on the local machine.
pub trait PortProbe: Send + Sync {
    /// Returns true if nothing is listening on `port`.
    fn is_free(&self, port: u16) -> bool;
}

/// Probes by binding a listener on the loopback interface and dropping it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindProbe;

impl PortProbe for BindProbe {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
    }
}

#[derive(Debug, Clone)]
struct LeaseOwner {
    lease_id: u64,
    owner: Option<String>,
}

struct AllocatorInner {
    leases: DashMap<u16, LeaseOwner>,
    probe: Arc<dyn PortProbe>,
    next_id: AtomicU64,
}

impl AllocatorInner {
    fn remove_lease(&self, port: u16, lease_id: u64) {
        if self
            .leases
            .remove_if(&port, |_, owner| owner.lease_id == lease_id)
            .is_some()
        {
            debug!(port, lease_id, "Port lease released");
        }
    }
}

/// Thread-safe port allocator. Cheap to clone; clones share leases.
#[derive(Clone)]
pub struct PortAllocator {
    inner: Arc<AllocatorInner>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortAllocator")
            .field("live_leases", &self.live_leases())
            .finish_non_exhaustive()
    }
}

impl PortAllocator {
    /// Creates an allocator that probes with a loopback bind.
    #[must_use]
    pub fn new() -> Self {
        Self::with_probe(Arc::new(BindProbe))
    }

    /// Creates an allocator with a custom probe.
    #[must_use]
    pub fn with_probe(probe: Arc<dyn PortProbe>) -> Self {
        Self {
            inner: Arc::new(AllocatorInner {
                leases: DashMap::new(),
                probe,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Leases `preferred` if it is free, otherwise the lowest free port in
    /// `range`.
    ///
    /// Ports already leased in-process, or reported busy by the probe, are
    /// skipped. Fails after one full scan of the range.
    pub fn acquire(
        &self,
        preferred: Option<u16>,
        range: PortRange,
    ) -> Result<PortLease, PortExhaustedError> {
        let candidates = preferred
            .filter(|p| *p != 0)
            .into_iter()
            .chain(range.iter().filter(|p| Some(*p) != preferred));

        for port in candidates {
            if let Some(lease_id) = self.try_reserve(port) {
                debug!(port, lease_id, preferred = ?preferred, "Port leased");
                return Ok(PortLease {
                    port,
                    lease_id,
                    inner: Arc::clone(&self.inner),
                    released: AtomicBool::new(false),
                });
            }
        }

        Err(PortExhaustedError {
            lo: range.lo,
            hi: range.hi,
        })
    }

    /// Releases a lease. Idempotent.
    pub fn release(&self, lease: &PortLease) {
        lease.release();
    }

    /// Ports currently leased, ascending.
    #[must_use]
    pub fn live_leases(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.inner.leases.iter().map(|e| *e.key()).collect();
        ports.sort_unstable();
        ports
    }

    /// Returns true if `port` has a live lease.
    #[must_use]
    pub fn is_leased(&self, port: u16) -> bool {
        self.inner.leases.contains_key(&port)
    }

    /// Owner recorded on the lease for `port`, if any.
    #[must_use]
    pub fn owner_of(&self, port: u16) -> Option<String> {
        self.inner
            .leases
            .get(&port)
            .and_then(|entry| entry.owner.clone())
    }

    fn try_reserve(&self, port: u16) -> Option<u64> {
        // The entry guard holds the shard lock, so the probe and the insert
        // are atomic with respect to other acquirers of the same port.
        match self.inner.leases.entry(port) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                if !self.inner.probe.is_free(port) {
                    return None;
                }
                let lease_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                vacant.insert(LeaseOwner {
                    lease_id,
                    owner: None,
                });
                Some(lease_id)
            }
        }
    }
}

/// A reserved port. Released exactly once, explicitly or on drop.
pub struct PortLease {
    port: u16,
    lease_id: u64,
    inner: Arc<AllocatorInner>,
    released: AtomicBool,
}

impl PortLease {
    /// The reserved port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Unique id of this lease.
    #[must_use]
    pub const fn lease_id(&self) -> u64 {
        self.lease_id
    }

    /// Records which process holds the lease.
    pub fn assign_owner(&self, owner: impl Into<String>) {
        if let Some(mut entry) = self.inner.leases.get_mut(&self.port) {
            if entry.lease_id == self.lease_id {
                entry.owner = Some(owner.into());
            }
        }
    }

    /// Returns true once the lease has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Releases the port. Subsequent calls do nothing.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.inner.remove_lease(self.port, self.lease_id);
        }
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for PortLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortLease")
            .field("port", &self.port)
            .field("lease_id", &self.lease_id)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    struct BusyPorts(HashSet<u16>);

    impl PortProbe for BusyPorts {
        fn is_free(&self, port: u16) -> bool {
            !self.0.contains(&port)
        }
    }

    fn allocator_with_busy(busy: &[u16]) -> PortAllocator {
        PortAllocator::with_probe(Arc::new(BusyPorts(busy.iter().copied().collect())))
    }

    fn range(lo: u16, hi: u16) -> PortRange {
        PortRange::new(lo, hi).unwrap()
    }

    #[test]
    fn test_preferred_port_returned_when_free() {
        let allocator = allocator_with_busy(&[]);
        let lease = allocator.acquire(Some(8090), range(8081, 8100)).unwrap();
        assert_eq!(lease.port(), 8090);
    }

    #[test]
    fn test_scan_skips_leased_and_busy_ports() {
        let allocator = allocator_with_busy(&[8082]);
        let first = allocator.acquire(Some(8081), range(8081, 8090)).unwrap();
        let second = allocator.acquire(Some(8081), range(8081, 8090)).unwrap();

        assert_eq!(first.port(), 8081);
        assert_eq!(second.port(), 8083);
        assert_eq!(allocator.live_leases(), vec![8081, 8083]);
    }

    #[test]
    fn test_exhausted_after_one_scan() {
        let allocator = allocator_with_busy(&[8082]);
        let _held = allocator.acquire(None, range(8081, 8081)).unwrap();

        let err = allocator.acquire(None, range(8081, 8082)).unwrap_err();
        assert_eq!(err, PortExhaustedError { lo: 8081, hi: 8082 });
    }

    #[test]
    fn test_release_is_idempotent() {
        let allocator = allocator_with_busy(&[]);
        let lease = allocator.acquire(None, range(9000, 9001)).unwrap();
        assert!(allocator.is_leased(9000));

        allocator.release(&lease);
        allocator.release(&lease);
        lease.release();

        assert!(lease.is_released());
        assert!(!allocator.is_leased(9000));
    }

    #[test]
    fn test_stale_release_does_not_drop_newer_lease() {
        let allocator = allocator_with_busy(&[]);
        let old = allocator.acquire(None, range(9000, 9000)).unwrap();
        old.release();
        let new = allocator.acquire(None, range(9000, 9000)).unwrap();

        // Releasing the old lease again must not free the new holder's port.
        old.release();
        drop(old);
        assert!(allocator.is_leased(9000));
        assert_ne!(new.lease_id(), 0);
    }

    #[test]
    fn test_drop_releases_and_owner_is_recorded() {
        let allocator = allocator_with_busy(&[]);
        {
            let lease = allocator.acquire(None, range(9100, 9100)).unwrap();
            lease.assign_owner("process-1");
            assert_eq!(allocator.owner_of(9100).as_deref(), Some("process-1"));
        }
        assert!(allocator.live_leases().is_empty());
    }

    #[test]
    fn test_concurrent_acquire_never_duplicates() {
        let allocator = allocator_with_busy(&[]);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || allocator.acquire(None, range(20000, 20031)).unwrap())
            })
            .collect();

        let leases: Vec<PortLease> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let unique: HashSet<u16> = leases.iter().map(PortLease::port).collect();
        assert_eq!(unique.len(), leases.len());
    }

    #[test]
    fn test_bind_probe_detects_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!BindProbe.is_free(port));

        let allocator = PortAllocator::new();
        let lease = allocator.acquire(Some(port), range(port, port));
        assert!(lease.is_err());
    }

    #[test]
    fn test_port_range_parse() {
        assert_eq!("8081-8180".parse::<PortRange>().unwrap(), PortRange::default());
        assert!("9000-8000".parse::<PortRange>().is_err());
        assert!("0-10".parse::<PortRange>().is_err());
        assert!("8081".parse::<PortRange>().is_err());
    }
}
