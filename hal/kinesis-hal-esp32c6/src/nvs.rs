//! NVS namespace driver
//!
//! One handle per namespace. Mutations sit in the vendor store's pending
//! area until `commit`; readers always see the last committed state, so
//! a crash between set and commit loses nothing but the pending batch.

use heapless::String;

use kinesis_hal::nvs::{Nvs, NvsCapabilities, NvsError, NvsResult};
use kinesis_hal::peripheral::Peripheral;

use crate::port::{NvsOps, PortError};

/// Key and namespace length limit of the store format.
pub const NVS_MAX_KEY_LEN: usize = 15;

/// Longest storable string.
pub const NVS_MAX_STRING_LEN: usize = 4000;

/// Longest storable blob.
pub const NVS_MAX_BLOB_LEN: usize = 508_000;

/// Namespaced key/value store handle.
pub struct NvsNamespace<P: NvsOps> {
    port: P,
    namespace: String<NVS_MAX_KEY_LEN>,
    initialized: bool,
}

impl<P: NvsOps> NvsNamespace<P> {
    /// Capture the namespace; the store is opened on first use.
    /// Namespaces longer than the store's key limit are rejected at
    /// open.
    pub fn new(port: P, namespace: &str) -> Self {
        Self {
            port,
            namespace: String::try_from(namespace).unwrap_or_default(),
            initialized: false,
        }
    }

    /// Direct access to the native port (simulation and test hook).
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn check_key(key: &str) -> NvsResult<()> {
        if key.is_empty() {
            return Err(NvsError::InvalidParameter);
        }
        if key.len() > NVS_MAX_KEY_LEN {
            return Err(NvsError::KeyTooLong);
        }
        Ok(())
    }

    fn ready(&mut self) -> NvsResult<()> {
        if self.ensure_initialized().is_err() {
            return Err(NvsError::NotInitialized);
        }
        Ok(())
    }

    /// Error mapping for write-side operations.
    fn convert_set_error(err: PortError) -> NvsError {
        match err {
            PortError::Fail => NvsError::WriteFailure,
            PortError::NoMem => NvsError::StorageFull,
            PortError::InvalidArg => NvsError::InvalidParameter,
            PortError::InvalidState => NvsError::NotInitialized,
            PortError::NotFound => NvsError::KeyNotFound,
            PortError::NotSupported => NvsError::UnsupportedOperation,
            PortError::Timeout => NvsError::WriteFailure,
            PortError::Busy => NvsError::WriteFailure,
        }
    }

    /// Error mapping for read-side operations.
    fn convert_get_error(err: PortError) -> NvsError {
        match err {
            PortError::Fail => NvsError::ReadFailure,
            // The caller's buffer cannot hold the committed value.
            PortError::NoMem => NvsError::ValueTooLarge,
            // The committed entry has a different type.
            PortError::InvalidArg => NvsError::TypeMismatch,
            PortError::InvalidState => NvsError::NotInitialized,
            PortError::NotFound => NvsError::KeyNotFound,
            PortError::NotSupported => NvsError::UnsupportedOperation,
            PortError::Timeout => NvsError::ReadFailure,
            PortError::Busy => NvsError::ReadFailure,
        }
    }
}

impl<P: NvsOps> Peripheral for NvsNamespace<P> {
    type Error = NvsError;

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self) -> NvsResult<()> {
        if self.initialized {
            return Err(NvsError::AlreadyInitialized);
        }
        if self.namespace.is_empty() {
            return Err(NvsError::InvalidNamespace);
        }
        self.port
            .open(&self.namespace)
            .map_err(|e| match e {
                PortError::InvalidArg => NvsError::InvalidNamespace,
                PortError::NotFound => NvsError::NamespaceNotFound,
                other => Self::convert_set_error(other),
            })?;
        self.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) -> NvsResult<()> {
        if !self.initialized {
            return Err(NvsError::NotInitialized);
        }
        self.port.close();
        self.initialized = false;
        Ok(())
    }
}

impl<P: NvsOps> Nvs for NvsNamespace<P> {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn set_u32(&mut self, key: &str, value: u32) -> NvsResult<()> {
        self.ready()?;
        Self::check_key(key)?;
        self.port
            .set_u32(key, value)
            .map_err(Self::convert_set_error)
    }

    fn get_u32(&mut self, key: &str) -> NvsResult<u32> {
        self.ready()?;
        Self::check_key(key)?;
        self.port.get_u32(key).map_err(Self::convert_get_error)
    }

    fn set_string(&mut self, key: &str, value: &str) -> NvsResult<()> {
        self.ready()?;
        Self::check_key(key)?;
        if value.len() > NVS_MAX_STRING_LEN {
            return Err(NvsError::ValueTooLarge);
        }
        self.port
            .set_str(key, value)
            .map_err(Self::convert_set_error)
    }

    fn get_string(&mut self, key: &str, buf: &mut [u8]) -> NvsResult<usize> {
        self.ready()?;
        Self::check_key(key)?;
        self.port.get_str(key, buf).map_err(Self::convert_get_error)
    }

    fn set_blob(&mut self, key: &str, value: &[u8]) -> NvsResult<()> {
        self.ready()?;
        Self::check_key(key)?;
        if value.len() > NVS_MAX_BLOB_LEN {
            return Err(NvsError::ValueTooLarge);
        }
        self.port
            .set_blob(key, value)
            .map_err(Self::convert_set_error)
    }

    fn get_blob(&mut self, key: &str, buf: &mut [u8]) -> NvsResult<usize> {
        self.ready()?;
        Self::check_key(key)?;
        self.port
            .get_blob(key, buf)
            .map_err(Self::convert_get_error)
    }

    fn erase_key(&mut self, key: &str) -> NvsResult<()> {
        self.ready()?;
        Self::check_key(key)?;
        self.port.erase_key(key).map_err(Self::convert_set_error)
    }

    fn commit(&mut self) -> NvsResult<()> {
        self.ready()?;
        self.port.commit().map_err(|e| match e {
            PortError::Fail => NvsError::CommitFailure,
            other => Self::convert_set_error(other),
        })
    }

    fn key_exists(&mut self, key: &str) -> bool {
        if self.ready().is_err() || Self::check_key(key).is_err() {
            return false;
        }
        self.port.entry_info(key).is_ok()
    }

    fn get_size(&mut self, key: &str) -> NvsResult<usize> {
        self.ready()?;
        Self::check_key(key)?;
        self.port
            .entry_info(key)
            .map(|(_, size)| size)
            .map_err(Self::convert_get_error)
    }

    fn capabilities(&self) -> NvsCapabilities {
        NvsCapabilities {
            max_key_length: NVS_MAX_KEY_LEN,
            max_string_size: NVS_MAX_STRING_LEN,
            max_blob_size: NVS_MAX_BLOB_LEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::soft::SoftNvs;

    fn store(namespace: &str) -> NvsNamespace<SoftNvs> {
        NvsNamespace::new(SoftNvs::new(), namespace)
    }

    #[test]
    fn test_commit_round_trip() {
        let mut nvs = store("app");
        nvs.set_u32("count", 42).unwrap();
        nvs.commit().unwrap();
        nvs.deinitialize().unwrap();
        nvs.initialize().unwrap();
        assert_eq!(nvs.get_u32("count"), Ok(42));
    }

    #[test]
    fn test_uncommitted_reads_see_committed_state() {
        let mut nvs = store("app");
        nvs.set_u32("value", 1).unwrap();
        nvs.commit().unwrap();
        nvs.set_u32("value", 2).unwrap();
        // Not committed yet: the reader sees the old value
        assert_eq!(nvs.get_u32("value"), Ok(1));
        nvs.commit().unwrap();
        assert_eq!(nvs.get_u32("value"), Ok(2));
    }

    #[test]
    fn test_erase_is_durable_after_commit() {
        let mut nvs = store("app");
        nvs.set_u32("gone", 7).unwrap();
        nvs.commit().unwrap();
        nvs.erase_key("gone").unwrap();
        assert!(nvs.key_exists("gone"));
        nvs.commit().unwrap();
        assert!(!nvs.key_exists("gone"));
        assert_eq!(nvs.get_u32("gone"), Err(NvsError::KeyNotFound));
    }

    #[test]
    fn test_string_round_trip() {
        let mut nvs = store("app");
        nvs.set_string("name", "kinesis").unwrap();
        nvs.commit().unwrap();
        let mut buf = [0u8; 16];
        let n = nvs.get_string("name", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"kinesis");
        assert_eq!(nvs.get_size("name"), Ok(7));
    }

    #[test]
    fn test_blob_round_trip() {
        let mut nvs = store("app");
        let blob = [1u8, 2, 3, 4, 5];
        nvs.set_blob("cal", &blob).unwrap();
        nvs.commit().unwrap();
        let mut buf = [0u8; 8];
        let n = nvs.get_blob("cal", &mut buf).unwrap();
        assert_eq!(&buf[..n], &blob);
    }

    #[test]
    fn test_buffer_too_small() {
        let mut nvs = store("app");
        nvs.set_string("long", "0123456789").unwrap();
        nvs.commit().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            nvs.get_string("long", &mut buf),
            Err(NvsError::ValueTooLarge)
        );
    }

    #[test]
    fn test_type_mismatch() {
        let mut nvs = store("app");
        nvs.set_u32("n", 5).unwrap();
        nvs.commit().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(nvs.get_string("n", &mut buf), Err(NvsError::TypeMismatch));
    }

    #[test]
    fn test_key_validation() {
        let mut nvs = store("app");
        nvs.initialize().unwrap();
        assert_eq!(
            nvs.set_u32("a-key-way-too-long", 1),
            Err(NvsError::KeyTooLong)
        );
        assert_eq!(nvs.set_u32("", 1), Err(NvsError::InvalidParameter));
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let mut nvs = store("");
        assert_eq!(nvs.initialize(), Err(NvsError::InvalidNamespace));
    }

    #[test]
    fn test_commit_failure_surfaces() {
        let mut nvs = store("app");
        nvs.set_u32("x", 1).unwrap();
        nvs.port_mut().fail_next_commit = true;
        assert_eq!(nvs.commit(), Err(NvsError::CommitFailure));
        // The pending batch survives; a retry lands it
        nvs.commit().unwrap();
        assert_eq!(nvs.get_u32("x"), Ok(1));
    }

    #[test]
    fn test_capabilities() {
        let nvs = store("app");
        let caps = nvs.capabilities();
        assert_eq!(caps.max_key_length, 15);
        assert!(caps.max_blob_size > caps.max_string_size);
    }
}
