use std::io;
use std::path::Path;
use std::sync::Mutex;

use aya::maps::{HashMap, Map, MapData, MapError};
use domain::common::error::DomainError;
use domain::conntrack::codec::{KeyBytes, ValueBytes};
use ports::secondary::conntrack_map_port::{ConntrackMapPort, RawEntry};
use tracing::info;

type CtTable = HashMap<MapData, KeyBytes, ValueBytes>;

/// Conntrack table (`CT_TABLE_V4`) opened from its bpffs pin.
///
/// The pin is opened twice: one handle for lookups and iteration, one for
/// updates and deletes. Only the write handle needs `&mut`, so it alone
/// sits behind a lock and a sweep can delete while its cursor is live.
pub struct ConntrackMapManager {
    reader: CtTable,
    writer: Mutex<CtTable>,
}

impl ConntrackMapManager {
    /// Open an already-pinned conntrack map. Never creates or pins one.
    pub fn open_pinned(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let reader = open_table(path)?;
        let writer = open_table(path)?;
        info!(path = %path.display(), "conntrack map opened");
        Ok(Self {
            reader,
            writer: Mutex::new(writer),
        })
    }
}

fn open_table(path: &Path) -> Result<CtTable, anyhow::Error> {
    let data = MapData::from_pin(path)
        .map_err(|e| anyhow::anyhow!("open pinned map {}: {e}", path.display()))?;
    Ok(HashMap::try_from(Map::HashMap(data))?)
}

/// `ENOENT` from the kernel: the entry vanished under us.
fn is_not_found(err: &MapError) -> bool {
    match err {
        MapError::KeyNotFound => true,
        MapError::SyscallError(e) => e.io_error.kind() == io::ErrorKind::NotFound,
        _ => false,
    }
}

fn map_err(op: &str, err: MapError) -> DomainError {
    DomainError::EngineError(format!("conntrack map {op} failed: {err}"))
}

impl ConntrackMapPort for ConntrackMapManager {
    fn get(&self, key: &KeyBytes) -> Result<Option<ValueBytes>, DomainError> {
        match self.reader.get(key, 0) {
            Ok(value) => Ok(Some(value)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(map_err("lookup", e)),
        }
    }

    fn update(&self, key: &KeyBytes, value: &ValueBytes) -> Result<(), DomainError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DomainError::EngineError("conntrack map lock poisoned".to_string()))?;
        writer.insert(key, value, 0).map_err(|e| map_err("update", e))
    }

    fn delete(&self, key: &KeyBytes) -> Result<bool, DomainError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DomainError::EngineError("conntrack map lock poisoned".to_string()))?;
        match writer.remove(key) {
            Ok(()) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(map_err("delete", e)),
        }
    }

    fn entries(&self) -> Box<dyn Iterator<Item = Result<RawEntry, DomainError>> + '_> {
        Box::new(
            self.reader
                .iter()
                .map(|item| item.map_err(|e| map_err("iteration", e))),
        )
    }
}

#[cfg(test)]
mod tests {
    use aya::sys::SyscallError;

    use super::*;

    #[test]
    fn enoent_is_not_found() {
        let err = MapError::SyscallError(SyscallError {
            call: "bpf_map_delete_elem",
            io_error: io::Error::from_raw_os_error(2),
        });
        assert!(is_not_found(&err));
        assert!(is_not_found(&MapError::KeyNotFound));
    }

    #[test]
    fn other_errors_are_reported() {
        let err = MapError::SyscallError(SyscallError {
            call: "bpf_map_delete_elem",
            io_error: io::Error::from_raw_os_error(1),
        });
        assert!(!is_not_found(&err));
        assert!(map_err("delete", err).to_string().contains("delete"));
    }

    #[test]
    fn missing_pin_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConntrackMapManager::open_pinned(dir.path().join("ct_table_v4"));
        assert!(result.is_err());
    }
}
