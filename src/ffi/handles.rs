//! Registry of live handles
//!
//! Every pointer handed out is recorded here until it is freed, so a stale,
//! foreign or double-freed pointer is reported as an invalid handle instead
//! of being dereferenced.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Builder,
    Session,
}

impl HandleKind {
    fn name(&self) -> &'static str {
        match self {
            HandleKind::Builder => "builder",
            HandleKind::Session => "session",
        }
    }
}

static LIVE_HANDLES: Mutex<BTreeMap<usize, HandleKind>> = parking_lot::const_mutex(BTreeMap::new());

pub(crate) fn register<T>(ptr: *mut T, kind: HandleKind) {
    LIVE_HANDLES.lock().insert(ptr as usize, kind);
}

/// Fail unless `ptr` is a live handle of `kind`
pub(crate) fn check<T>(ptr: *const T, kind: HandleKind) -> Result<()> {
    if ptr.is_null() {
        return Err(BridgeError::NullArgument(kind.name()));
    }
    match LIVE_HANDLES.lock().get(&(ptr as usize)) {
        Some(live) if *live == kind => Ok(()),
        _ => Err(BridgeError::InvalidHandle(kind.name())),
    }
}

/// Remove `ptr` from the registry. The caller owns the allocation on success.
pub(crate) fn release<T>(ptr: *mut T, kind: HandleKind) -> Result<()> {
    let mut live = LIVE_HANDLES.lock();
    match live.get(&(ptr as usize)) {
        Some(k) if *k == kind => {
            live.remove(&(ptr as usize));
            Ok(())
        }
        _ => Err(BridgeError::InvalidHandle(kind.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_check_release() {
        let ptr = Box::into_raw(Box::new(7u64));
        assert!(check(ptr, HandleKind::Builder).is_err());

        register(ptr, HandleKind::Builder);
        assert!(check(ptr, HandleKind::Builder).is_ok());
        assert!(matches!(
            check(ptr, HandleKind::Session),
            Err(BridgeError::InvalidHandle("session"))
        ));

        release(ptr, HandleKind::Builder).unwrap();
        assert!(release(ptr, HandleKind::Builder).is_err());
        drop(unsafe { Box::from_raw(ptr) });
    }

    #[test]
    fn test_null_is_reported_by_kind() {
        let null: *const u8 = std::ptr::null();
        assert!(matches!(
            check(null, HandleKind::Session),
            Err(BridgeError::NullArgument("session"))
        ));
    }
}
