use std::net::SocketAddrV4;
use std::sync::Arc;

use domain::conntrack::entity::{Key, Value};
use domain::conntrack::error::ConntrackError;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::nat_backend_port::NatBackendSelection;

use crate::conntrack_scanner::{EntryLookup, EntryScanner, ScanVerdict};

/// Label reported to metrics for entries removed by this scanner.
pub const STALE_NAT_REASON: &str = "stale_nat_backend";

/// Deletes NAT forward entries whose backend is no longer selected for
/// their frontend.
pub struct StaleNatScanner {
    selection: Arc<dyn NatBackendSelection>,
    metrics: Arc<dyn MetricsPort>,
}

impl StaleNatScanner {
    pub fn new(selection: Arc<dyn NatBackendSelection>, metrics: Arc<dyn MetricsPort>) -> Self {
        Self { selection, metrics }
    }
}

/// `(frontend, backend)` pairs for every way the forward key and its
/// reverse key can share a client endpoint.
fn frontend_backend_pairs(key: &Key, reverse: &Key) -> Vec<(SocketAddrV4, SocketAddrV4)> {
    let (fa, fb) = (key.endpoint_a(), key.endpoint_b());
    let (ra, rb) = (reverse.endpoint_a(), reverse.endpoint_b());

    let mut pairs = Vec::with_capacity(4);
    for (client_fwd, frontend, client_rev, backend) in
        [(fa, fb, ra, rb), (fb, fa, rb, ra), (fa, fb, rb, ra), (fb, fa, ra, rb)]
    {
        if client_fwd == client_rev && !pairs.contains(&(frontend, backend)) {
            pairs.push((frontend, backend));
        }
    }
    pairs
}

impl EntryScanner for StaleNatScanner {
    fn check(
        &mut self,
        key: &Key,
        value: &Value,
        _lookup: &dyn EntryLookup,
    ) -> Result<ScanVerdict, ConntrackError> {
        let Some(reverse_key) = value.reverse_key() else {
            return Ok(ScanVerdict::Ok);
        };

        let pairs = frontend_backend_pairs(key, reverse_key);
        if pairs.is_empty() {
            tracing::debug!(
                key = %key,
                reverse_key = %reverse_key,
                "NAT forward key does not match its reverse key, keeping entry"
            );
            return Ok(ScanVerdict::Ok);
        }

        let proto = key.protocol.to_u8();
        let selected = pairs
            .iter()
            .any(|(frontend, backend)| self.selection.still_selected(*frontend, *backend, proto));
        if selected {
            return Ok(ScanVerdict::Ok);
        }

        tracing::debug!(
            key = %key,
            reverse_key = %reverse_key,
            "NAT backend no longer selected, deleting forward entry"
        );
        self.metrics.record_conntrack_expiry(STALE_NAT_REASON);
        Ok(ScanVerdict::Delete)
    }
}
