//! Port Allocator (§4.1): hands out a complete `{role: port}` set per sandbox from disjoint
//! role ranges, and releases them on teardown.
//!
//! Grounded on the shape of `testcontainers::core::ports::Ports` (a role-keyed port table) but
//! the allocation logic itself is new: the teacher only ever reads host ports the engine already
//! assigned, it never reserves ports out of a local range itself.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Mutex;

/// The four internal services every sandbox exposes (§3, GLOSSARY "Role").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Role {
    Vnc,
    Novnc,
    BrowserApi,
    FileServer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Vnc, Role::Novnc, Role::BrowserApi, Role::FileServer];

    /// Inclusive host-port range this role is allocated from (§3 "Port allocation table").
    pub fn range(self) -> (u16, u16) {
        match self {
            Role::Vnc => (15901, 16000),
            Role::Novnc => (16080, 16179),
            Role::BrowserApi => (17788, 17887),
            Role::FileServer => (18080, 18179),
        }
    }

    /// The internal container port this role binds to (§4.3.1).
    pub fn internal_port(self) -> u16 {
        match self {
            Role::Vnc => 5901,
            Role::Novnc => 6080,
            Role::BrowserApi => 7788,
            Role::FileServer => 8080,
        }
    }

    pub fn from_internal_port(port: u16) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.internal_port() == port)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Vnc => "vnc",
            Role::Novnc => "novnc",
            Role::BrowserApi => "browser_api",
            Role::FileServer => "file_server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete port assignment for one sandbox.
pub type PortSet = HashMap<Role, u16>;

#[derive(Debug, thiserror::Error)]
#[error("port allocator exhausted for role {0}")]
pub struct PortsExhausted(pub Role);

struct AllocatorState {
    in_use: HashMap<Role, BTreeSet<u16>>,
}

impl AllocatorState {
    fn new() -> Self {
        let mut in_use = HashMap::new();
        for role in Role::ALL {
            in_use.insert(role, BTreeSet::new());
        }
        AllocatorState { in_use }
    }

    fn lowest_free(&self, role: Role) -> Option<u16> {
        let (start, end) = role.range();
        let used = &self.in_use[&role];
        (start..=end).find(|port| !used.contains(port))
    }
}

/// Process-wide port table, guarded by a single mutex (§4.1, §5). Critical sections are a range
/// scan plus a set insert/remove — short enough that no finer-grained locking is warranted.
pub struct PortAllocator {
    state: Mutex<AllocatorState>,
}

impl PortAllocator {
    pub fn new() -> Self {
        PortAllocator {
            state: Mutex::new(AllocatorState::new()),
        }
    }

    /// Atomically allocates one port per role. On failure, any ports already reserved for this
    /// same call are released before returning — callers never end up leaking a partial set.
    pub fn allocate(&self) -> Result<PortSet, PortsExhausted> {
        let mut state = self.state.lock().expect("port allocator mutex poisoned");
        let mut reserved: PortSet = HashMap::new();

        for role in Role::ALL {
            match state.lowest_free(role) {
                Some(port) => {
                    state.in_use.get_mut(&role).unwrap().insert(port);
                    reserved.insert(role, port);
                }
                None => {
                    for (role, port) in &reserved {
                        state.in_use.get_mut(role).unwrap().remove(port);
                    }
                    return Err(PortsExhausted(role));
                }
            }
        }

        Ok(reserved)
    }

    /// Releases a previously allocated set. Idempotent: releasing a port not currently held is a
    /// no-op.
    pub fn release(&self, ports: &PortSet) {
        let mut state = self.state.lock().expect("port allocator mutex poisoned");
        for (role, port) in ports {
            state.in_use.get_mut(role).map(|set| set.remove(port));
        }
    }

    /// Marks a single port in-use without scanning a range, used while reconstructing cache
    /// entries from a live container's port bindings at recovery time (§4.3.1). Returns `true`
    /// if the port was newly reserved, `false` if it was already reserved (e.g. a concurrent
    /// reconstruction of the same project).
    pub fn reserve(&self, role: Role, port: u16) -> bool {
        let mut state = self.state.lock().expect("port allocator mutex poisoned");
        state.in_use.get_mut(&role).unwrap().insert(port)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_assigns_one_port_per_role() {
        let allocator = PortAllocator::new();
        let ports = allocator.allocate().unwrap();
        assert_eq!(ports.len(), 4);
        for role in Role::ALL {
            let (start, end) = role.range();
            let port = ports[&role];
            assert!(port >= start && port <= end);
        }
    }

    #[test]
    fn release_then_reallocate_returns_same_port() {
        let allocator = PortAllocator::new();
        let first = allocator.allocate().unwrap();
        allocator.release(&first);
        let second = allocator.allocate().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn exhaustion_releases_partial_reservation() {
        let allocator = PortAllocator::new();
        // Exhaust the vnc range (100 ports) by direct reservation.
        let (start, end) = Role::Vnc.range();
        for port in start..=end {
            assert!(allocator.reserve(Role::Vnc, port));
        }

        let err = allocator.allocate().unwrap_err();
        assert_eq!(err.0, Role::Vnc);

        // No ports should have been left reserved for the other three roles.
        for role in [Role::Novnc, Role::BrowserApi, Role::FileServer] {
            let (start, end) = role.range();
            let port = allocator.reserve(role, start);
            assert!(port, "expected {start} in {role} range to still be free");
            allocator.release(&HashMap::from([(role, start)]));
            let _ = end;
        }
    }

    #[test]
    fn no_duplicate_ports_across_many_allocations() {
        let allocator = PortAllocator::new();
        let mut seen = BTreeSet::new();
        for _ in 0..10 {
            let ports = allocator.allocate().unwrap();
            for port in ports.values() {
                assert!(seen.insert(*port), "port {port} allocated twice");
            }
        }
    }
}
