use std::collections::{HashMap, HashSet};
use std::net::SocketAddrV4;

use ports::secondary::nat_backend_port::NatBackendSelection;

/// Frontend → backend selection loaded from configuration.
///
/// Frontends absent from the table are outside this agent's knowledge, so
/// every backend counts as selected for them.
#[derive(Debug, Default, Clone)]
pub struct StaticBackendTable {
    frontends: HashMap<(u8, SocketAddrV4), HashSet<SocketAddrV4>>,
}

impl StaticBackendTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the backends of `frontend` for IP protocol `proto`.
    /// Repeated calls for the same frontend accumulate.
    pub fn insert(
        &mut self,
        proto: u8,
        frontend: SocketAddrV4,
        backends: impl IntoIterator<Item = SocketAddrV4>,
    ) {
        self.frontends
            .entry((proto, frontend))
            .or_default()
            .extend(backends);
    }

    pub fn frontend_count(&self) -> usize {
        self.frontends.len()
    }
}

impl NatBackendSelection for StaticBackendTable {
    fn still_selected(&self, frontend: SocketAddrV4, backend: SocketAddrV4, proto: u8) -> bool {
        self.frontends
            .get(&(proto, frontend))
            .is_none_or(|backends| backends.contains(&backend))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn addr(last: u8, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 96, 0, last), port)
    }

    fn table() -> StaticBackendTable {
        let mut t = StaticBackendTable::new();
        t.insert(6, addr(1, 80), [addr(10, 8080), addr(11, 8080)]);
        t
    }

    #[test]
    fn listed_backend_is_selected() {
        assert!(table().still_selected(addr(1, 80), addr(11, 8080), 6));
    }

    #[test]
    fn removed_backend_is_not_selected() {
        assert!(!table().still_selected(addr(1, 80), addr(12, 8080), 6));
    }

    #[test]
    fn unknown_frontend_keeps_everything() {
        let t = table();
        assert!(t.still_selected(addr(2, 80), addr(12, 8080), 6));
        // Same address, other protocol.
        assert!(t.still_selected(addr(1, 80), addr(12, 8080), 17));
    }

    #[test]
    fn inserts_accumulate() {
        let mut t = table();
        t.insert(6, addr(1, 80), [addr(12, 8080)]);
        assert_eq!(t.frontend_count(), 1);
        assert!(t.still_selected(addr(1, 80), addr(12, 8080), 6));
    }
}
