use domain::common::error::DomainError;
use domain::conntrack::codec::{KeyBytes, ValueBytes};

/// One raw `(key, value)` pair read from the conntrack table.
pub type RawEntry = (KeyBytes, ValueBytes);

/// Secondary port for the kernel conntrack table (`CT_TABLE_V4`).
///
/// Works on the raw kernel-shared byte layout; decoding happens in the
/// domain codec. The table is written concurrently by the dataplane, so every
/// call observes whatever is present at that moment.
///
/// Implemented by the pinned-map adapter in the adapter layer.
pub trait ConntrackMapPort: Send + Sync {
    /// Read one entry. `Ok(None)` when the key is absent.
    fn get(&self, key: &KeyBytes) -> Result<Option<ValueBytes>, DomainError>;

    /// Insert or overwrite one entry.
    fn update(&self, key: &KeyBytes, value: &ValueBytes) -> Result<(), DomainError>;

    /// Remove one entry. Returns `false` if the key was already gone.
    fn delete(&self, key: &KeyBytes) -> Result<bool, DomainError>;

    /// Lazy cursor over the table with `get_next_key` semantics: each step
    /// resolves the successor of the previously yielded key. Deleting the key
    /// most recently yielded before advancing past it may restart the walk.
    fn entries(&self) -> Box<dyn Iterator<Item = Result<RawEntry, DomainError>> + '_>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conntrack_map_port_is_object_safe() {
        fn _check(port: &dyn ConntrackMapPort) {
            let _ = port.entries().count();
        }
    }
}
