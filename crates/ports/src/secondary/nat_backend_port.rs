use std::net::SocketAddrV4;

/// Secondary port answering whether a NAT frontend still maps to a backend.
///
/// Consulted by the stale-NAT scanner for every NAT forward entry. Backed
/// by the service/endpoint state that programmed the NAT maps.
pub trait NatBackendSelection: Send + Sync {
    /// `true` if `backend` is still a valid choice for traffic sent to
    /// `frontend` over IP protocol `proto`.
    fn still_selected(&self, frontend: SocketAddrV4, backend: SocketAddrV4, proto: u8) -> bool;
}
