//! `fb_builder_*`: configuration builder handles
//!
//! A builder handle stays allocated after `fb_builder_build`; building
//! consumes its configuration, and any further use reports the builder as
//! consumed until it is freed.

use std::ffi::{c_char, c_int};
use std::time::Duration;

use parking_lot::Mutex;

use super::handles::{self, HandleKind};
use super::session::FbSession;
use super::{c_str, handle, status, void};
use crate::config::LiveBuilder;
use crate::engine;
use crate::enums::{Dataset, UpgradePolicy};
use crate::error::{BridgeError, Result};
use crate::session::LiveSession;

enum BuilderSlot {
    Open(LiveBuilder),
    Consumed,
}

pub struct FbBuilder {
    slot: Mutex<BuilderSlot>,
}

impl FbBuilder {
    fn with_open<R>(&self, f: impl FnOnce(&mut LiveBuilder) -> Result<R>) -> Result<R> {
        match &mut *self.slot.lock() {
            BuilderSlot::Open(builder) => f(builder),
            BuilderSlot::Consumed => Err(BridgeError::BuilderConsumed),
        }
    }
}

unsafe fn builder_ref<'a>(ptr: *mut FbBuilder) -> Result<&'a FbBuilder> {
    handles::check(ptr, HandleKind::Builder)?;
    Ok(&*ptr)
}

#[no_mangle]
pub extern "C" fn fb_builder_new() -> *mut FbBuilder {
    handle("fb_builder_new", || {
        let ptr = Box::into_raw(Box::new(FbBuilder {
            slot: Mutex::new(BuilderSlot::Open(LiveBuilder::new())),
        }));
        handles::register(ptr, HandleKind::Builder);
        Ok(ptr)
    })
}

/// Free a builder. NULL is ignored.
#[no_mangle]
pub unsafe extern "C" fn fb_builder_free(builder: *mut FbBuilder) {
    void("fb_builder_free", || {
        if builder.is_null() {
            return Ok(());
        }
        handles::release(builder, HandleKind::Builder)?;
        drop(Box::from_raw(builder));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn fb_builder_set_key(builder: *mut FbBuilder, api_key: *const c_char) -> c_int {
    status("fb_builder_set_key", || {
        let builder = builder_ref(builder)?;
        let key = c_str(api_key, "api_key")?;
        builder.with_open(|b| b.set_key(key).map(drop))
    })
}

/// Read the API key from the `DATABENTO_API_KEY` environment variable
#[no_mangle]
pub unsafe extern "C" fn fb_builder_set_key_from_env(builder: *mut FbBuilder) -> c_int {
    status("fb_builder_set_key_from_env", || {
        builder_ref(builder)?.with_open(|b| b.set_key_from_env().map(drop))
    })
}

#[no_mangle]
pub unsafe extern "C" fn fb_builder_set_dataset(builder: *mut FbBuilder, dataset: *const c_char) -> c_int {
    status("fb_builder_set_dataset", || {
        let builder = builder_ref(builder)?;
        let code = c_str(dataset, "dataset")?;
        builder.with_open(|b| b.set_dataset(code).map(drop))
    })
}

/// Set the dataset from its numeric identifier
#[no_mangle]
pub unsafe extern "C" fn fb_builder_set_dataset_id(builder: *mut FbBuilder, dataset_id: u32) -> c_int {
    status("fb_builder_set_dataset_id", || {
        let builder = builder_ref(builder)?;
        let dataset = Dataset::from_u32(dataset_id)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown dataset id {dataset_id}")))?;
        builder.with_open(|b| {
            b.set_dataset_enum(dataset);
            Ok(())
        })
    })
}

#[no_mangle]
pub unsafe extern "C" fn fb_builder_set_send_ts_out(builder: *mut FbBuilder, send_ts_out: bool) -> c_int {
    status("fb_builder_set_send_ts_out", || {
        builder_ref(builder)?.with_open(|b| {
            b.set_send_ts_out(send_ts_out);
            Ok(())
        })
    })
}

#[no_mangle]
pub unsafe extern "C" fn fb_builder_set_upgrade_policy(builder: *mut FbBuilder, policy: u32) -> c_int {
    status("fb_builder_set_upgrade_policy", || {
        let builder = builder_ref(builder)?;
        let policy = UpgradePolicy::from_u32(policy)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown upgrade policy {policy}")))?;
        builder.with_open(|b| {
            b.set_upgrade_policy(policy);
            Ok(())
        })
    })
}

#[no_mangle]
pub unsafe extern "C" fn fb_builder_set_heartbeat_interval(builder: *mut FbBuilder, seconds: u32) -> c_int {
    status("fb_builder_set_heartbeat_interval", || {
        builder_ref(builder)?.with_open(|b| b.set_heartbeat_interval(seconds).map(drop))
    })
}

#[no_mangle]
pub unsafe extern "C" fn fb_builder_set_address(builder: *mut FbBuilder, host: *const c_char, port: u16) -> c_int {
    status("fb_builder_set_address", || {
        let builder = builder_ref(builder)?;
        let host = c_str(host, "host")?;
        builder.with_open(|b| b.set_address(host, port).map(drop))
    })
}

#[no_mangle]
pub unsafe extern "C" fn fb_builder_set_buffer_size(builder: *mut FbBuilder, size: usize) -> c_int {
    status("fb_builder_set_buffer_size", || {
        builder_ref(builder)?.with_open(|b| b.set_buffer_size(size).map(drop))
    })
}

/// How long releasing a session waits for its delivery loop to drain
#[no_mangle]
pub unsafe extern "C" fn fb_builder_set_shutdown_timeout(builder: *mut FbBuilder, timeout_millis: u64) -> c_int {
    status("fb_builder_set_shutdown_timeout", || {
        builder_ref(builder)?.with_open(|b| {
            b.set_shutdown_timeout(Duration::from_millis(timeout_millis));
            Ok(())
        })
    })
}

/// Connect a session from the builder's configuration. Blocks until the
/// engine connection is established. Returns NULL on failure, leaving the
/// builder usable. On success the builder is consumed but not freed.
#[no_mangle]
pub unsafe extern "C" fn fb_builder_build(builder: *mut FbBuilder) -> *mut FbSession {
    handle("fb_builder_build", || {
        let builder = builder_ref(builder)?;
        let mut slot = builder.slot.lock();
        let config = match &*slot {
            BuilderSlot::Open(b) => b.config().clone(),
            BuilderSlot::Consumed => return Err(BridgeError::BuilderConsumed),
        };
        let session = LiveSession::connect(config, engine::connector().as_ref())?;
        *slot = BuilderSlot::Consumed;
        Ok(FbSession::into_raw(session))
    })
}
