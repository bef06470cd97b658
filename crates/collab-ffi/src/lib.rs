use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::{Mutex, MutexGuard};

use collab_core::bridge::OutboundMessage;
use collab_core::config::CollabConfig;
use collab_core::execution::RemoteAssignment;
use collab_core::logging;
use collab_core::models::TaskId;
use collab_core::orchestration::LifecycleEvent;
use collab_core::runtime::CollabRuntime;
use lazy_static::lazy_static;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

struct CollabState {
    runtime: CollabRuntime,
    events: broadcast::Receiver<LifecycleEvent>,
    assignments: mpsc::UnboundedReceiver<RemoteAssignment>,
    _tokio_rt: tokio::runtime::Runtime,
}

lazy_static! {
    static ref STATE: Mutex<Option<CollabState>> = Mutex::new(None);
}

/// Initialize the dispatcher from a TOML configuration string.
///
/// Passing null uses the built-in worker catalog. Returns true if the engine
/// is running after the call.
///
/// # Safety
///
/// `config_toml` must be null or a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn collab_init(config_toml: *const c_char) -> bool {
    let Some(mut guard) = lock_state() else {
        return false;
    };
    if guard.is_some() {
        return true;
    }

    logging::init(None);

    let config = if config_toml.is_null() {
        CollabConfig::default()
    } else {
        let Some(raw) = (unsafe { read_c_str(config_toml) }) else {
            return false;
        };
        match CollabConfig::from_toml_str(raw) {
            Ok(config) => config,
            Err(error) => {
                tracing::error!(
                    kind = ?error.kind,
                    message = %error.message,
                    "invalid configuration"
                );
                return false;
            }
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(error) => {
            tracing::error!(%error, "failed to create tokio runtime");
            return false;
        }
    };

    let mut runtime = {
        let _context = rt.enter();
        match CollabRuntime::start(&config) {
            Ok(runtime) => runtime,
            Err(error) => {
                tracing::error!(
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to start dispatcher"
                );
                return false;
            }
        }
    };

    let events = runtime.dispatcher().subscribe();
    let Some(assignments) = runtime.take_assignments() else {
        tracing::error!("remote assignment stream already taken");
        return false;
    };

    *guard = Some(CollabState {
        runtime,
        events,
        assignments,
        _tokio_rt: rt,
    });
    true
}

/// Handle one `{action, data}` bridge message and return the JSON reply.
///
/// # Safety
///
/// `message` must be a valid, non-null pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn collab_handle_message(message: *const c_char) -> *mut c_char {
    let Some(raw) = (unsafe { read_c_str(message) }) else {
        return std::ptr::null_mut();
    };

    with_state(|state| {
        let _context = state._tokio_rt.enter();
        to_json(&state.runtime.bridge().handle_json(raw))
    })
}

/// Drain up to `max` lifecycle events as a JSON array.
#[unsafe(no_mangle)]
pub extern "C" fn collab_poll_events(max: u32) -> *mut c_char {
    with_state(|state| {
        let mut events = Vec::new();
        while events.len() < max as usize {
            match state.events.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event poller fell behind; events were dropped");
                }
                Err(_) => break,
            }
        }
        to_json(&events)
    })
}

/// Drain up to `max` outbound `ASSIGN_TASK` messages as a JSON array.
#[unsafe(no_mangle)]
pub extern "C" fn collab_poll_assignments(max: u32) -> *mut c_char {
    with_state(|state| {
        let mut messages = Vec::new();
        while messages.len() < max as usize {
            match state.assignments.try_recv() {
                Ok(assignment) => messages.push(OutboundMessage::AssignTask(assignment)),
                Err(_) => break,
            }
        }
        to_json(&messages)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn collab_task_snapshot(task_id: u64) -> *mut c_char {
    with_state(|state| match state.runtime.dispatcher().task(TaskId(task_id)) {
        Ok(snapshot) => to_json(&snapshot),
        Err(error) => {
            tracing::debug!(task_id, message = %error.message, "task snapshot unavailable");
            std::ptr::null_mut()
        }
    })
}

/// Stop accepting tasks and tear down the engine.
#[unsafe(no_mangle)]
pub extern "C" fn collab_shutdown() -> bool {
    let Some(mut guard) = lock_state() else {
        return false;
    };
    let Some(state) = guard.take() else {
        return false;
    };
    drop(guard);

    if let Err(error) = state.runtime.dispatcher().shutdown() {
        tracing::error!(message = %error.message, "failed to close dispatcher");
    }
    drop(state);
    true
}

/// Free a string previously returned by a `collab_*` function.
///
/// # Safety
///
/// `s` must be a pointer previously returned by a `collab_*` function, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn collab_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        let _ = CString::from_raw(s);
    }
}

fn lock_state() -> Option<MutexGuard<'static, Option<CollabState>>> {
    match STATE.lock() {
        Ok(guard) => Some(guard),
        Err(_) => {
            tracing::error!("collab state mutex poisoned");
            None
        }
    }
}

fn with_state(f: impl FnOnce(&mut CollabState) -> *mut c_char) -> *mut c_char {
    let Some(mut guard) = lock_state() else {
        return std::ptr::null_mut();
    };
    match guard.as_mut() {
        Some(state) => f(state),
        None => std::ptr::null_mut(),
    }
}

/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated C string that outlives `'a`.
unsafe fn read_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    match unsafe { CStr::from_ptr(ptr) }.to_str() {
        Ok(raw) => Some(raw),
        Err(_) => {
            tracing::error!("received a string that is not valid UTF-8");
            None
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> *mut c_char {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(error) => {
            tracing::error!(%error, "failed to encode response");
            return std::ptr::null_mut();
        }
    };

    match CString::new(json) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}
