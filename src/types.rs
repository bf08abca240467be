//! The two Arrow extension types used by POD5 tables.
//!
//! `minknow.uuid` wraps a 16-byte fixed-size binary and holds a read or file
//! identifier. `minknow.vbz` wraps a large binary and holds one VBZ-compressed
//! signal chunk. Neither type carries parameters, so equality is decided by
//! the extension name alone.

use std::collections::HashMap;
use std::sync::Mutex;

use arrow2::datatypes::DataType;


pub const UUID_EXTENSION_NAME: &str = "minknow.uuid";
pub const VBZ_EXTENSION_NAME: &str = "minknow.vbz";

/// Arrow datatype of the `read_id` columns.
pub fn uuid_type() -> DataType {
    DataType::Extension(
        UUID_EXTENSION_NAME.to_string(),
        Box::new(DataType::FixedSizeBinary(16)),
        Some(String::new()),
    )
}

/// Arrow datatype of VBZ-compressed signal columns.
pub fn vbz_signal_type() -> DataType {
    DataType::Extension(
        VBZ_EXTENSION_NAME.to_string(),
        Box::new(DataType::LargeBinary),
        Some(String::new()),
    )
}

pub fn is_uuid_type(datatype: &DataType) -> bool {
    match datatype {
        DataType::Extension(name, inner, _) => {
            name == UUID_EXTENSION_NAME && **inner == DataType::FixedSizeBinary(16)
        }
        _ => false,
    }
}

pub fn is_vbz_signal_type(datatype: &DataType) -> bool {
    match datatype {
        DataType::Extension(name, inner, _) => {
            name == VBZ_EXTENSION_NAME && **inner == DataType::LargeBinary
        }
        _ => false,
    }
}

struct Registry {
    count: usize,
    types: HashMap<String, DataType>,
}

static REGISTRY: Mutex<Option<Registry>> = Mutex::new(None);

/// Handle keeping the process-wide extension type registrations alive.
///
/// Registration is reference counted, so acquiring a second handle is
/// idempotent. The registrations are removed when the last handle drops.
#[must_use = "dropping the registration immediately unregisters the types"]
pub struct ExtensionRegistration(());

/// Register `minknow.uuid` and `minknow.vbz` with the process-wide registry.
pub fn register_extension_types() -> ExtensionRegistration {
    let mut guard = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    match guard.as_mut() {
        Some(registry) => registry.count += 1,
        None => {
            let mut types = HashMap::new();
            types.insert(UUID_EXTENSION_NAME.to_string(), uuid_type());
            types.insert(VBZ_EXTENSION_NAME.to_string(), vbz_signal_type());
            *guard = Some(Registry { count: 1, types });
        }
    }
    ExtensionRegistration(())
}

/// Look up a registered extension type by name.
pub fn registered_extension_type(name: &str) -> Option<DataType> {
    let guard = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    guard.as_ref().and_then(|r| r.types.get(name).cloned())
}

impl Drop for ExtensionRegistration {
    fn drop(&mut self) {
        let mut guard = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(registry) = guard.as_mut() {
            registry.count -= 1;
            if registry.count == 0 {
                *guard = None;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_equality_is_by_name_only() {
        // Metadata differs but the type is still recognized.
        let bare = DataType::Extension(
            UUID_EXTENSION_NAME.to_string(),
            Box::new(DataType::FixedSizeBinary(16)),
            None,
        );
        assert!(is_uuid_type(&uuid_type()));
        assert!(is_uuid_type(&bare));
        assert!(!is_uuid_type(&vbz_signal_type()));
        assert!(is_vbz_signal_type(&vbz_signal_type()));
    }

    #[test]
    fn test_registry_refcount() {
        let first = register_extension_types();
        let second = register_extension_types();
        assert!(registered_extension_type(UUID_EXTENSION_NAME).is_some());
        drop(first);
        assert!(registered_extension_type(VBZ_EXTENSION_NAME).is_some());
        drop(second);
        assert!(registered_extension_type(UUID_EXTENSION_NAME).is_none());
    }
}
