//! # Problem Sync Core
//!
//! Offline cache and synchronization core for versioned practice-problem
//! batches. A remote source publishes batches; this crate decides whether each
//! incoming batch is new, a duplicate or a replacement, commits it atomically
//! into an LMDB-backed local store, and serves every read from that store so
//! the application keeps working without a network.
//!
//! ## Components
//!
//! - [`transport`] - stateless HTTP access to the remote batch source
//! - [`local_db_state`] - the LMDB [`LocalStore`](local_db_state::LocalStore)
//! - [`cache_gate`] - advisory freshness ledger used to throttle remote checks
//! - [`resolver`] - pure dedup policy
//! - [`orchestrator`] - single-flight sync composing all of the above
//! - [`runtime`] - composition root built from [`config::SyncConfig`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use problem_sync_core::config::SyncConfig;
//! use problem_sync_core::runtime::SyncRuntime;
//! use problem_sync_core::storage::ProblemStore;
//!
//! let config = SyncConfig::new("https://example.com/batches/latest", "problems");
//! let runtime = SyncRuntime::start(config)?;
//! let outcome = runtime.sync()?;
//! if outcome.did_change {
//!     let next = runtime.store().get_next_problem()?;
//!     println!("next problem: {next:?}");
//! }
//! runtime.shutdown()?;
//! # Ok::<(), problem_sync_core::error::SyncError>(())
//! ```
//!
//! ## FFI Functions
//!
//! Every function returns a JSON [`AppResponse`] as a C string that must be
//! released with [`free_response`].
//!
//! - [`open_runtime`] - Start a runtime (remote URL from `PROBLEM_BATCH_REMOTE_URL`)
//! - [`sync_if_needed`] - Run one throttled sync
//! - [`get_next_problem`] - First unsolved problem, newest batch first
//! - [`get_problems_by_batch`] - All problems of one batch
//! - [`submit_answer`] - Record an attempt
//! - [`get_batch_statistics`] - Aggregate counts
//! - [`close_runtime`] - Flush and release the runtime

pub mod app_response;
pub mod cache_gate;
pub mod clock;
pub mod config;
pub mod error;
pub mod local_db_model;
pub mod local_db_state;
pub mod orchestrator;
pub mod resolver;
pub mod runtime;
pub mod storage;
pub mod transport;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::time::Duration;

use log::{info, warn};

use crate::app_response::AppResponse;
use crate::config::SyncConfig;
use crate::runtime::SyncRuntime;
use crate::storage::{ProblemStore, StatisticsStore};

/// Starts a sync runtime whose store lives at `<db_path>.lmdb`.
///
/// The remote endpoint and timeouts come from the `PROBLEM_BATCH_*`
/// environment variables.
///
/// # Returns
///
/// A pointer to the runtime, or null if the path is invalid, configuration is
/// missing, or the store cannot be opened. Release it with [`close_runtime`].
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use problem_sync_core::open_runtime;
///
/// let path = CString::new("problems").unwrap();
/// let runtime = open_runtime(path.as_ptr());
/// assert!(!runtime.is_null());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn open_runtime(db_path: *const c_char) -> *mut SyncRuntime {
    if db_path.is_null() {
        warn!("Null path pointer passed to open_runtime");
        return std::ptr::null_mut();
    }

    let path = match unsafe { CStr::from_ptr(db_path).to_str() } {
        Ok(s) => s.to_string(),
        Err(e) => {
            warn!("Invalid UTF-8 in path parameter: {e}");
            return std::ptr::null_mut();
        }
    };

    let mut config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            warn!("Cannot configure sync runtime: {e}");
            return std::ptr::null_mut();
        }
    };
    config.db_path = path;

    match SyncRuntime::start(config) {
        Ok(runtime) => {
            info!("✅ Sync runtime ready");
            Box::into_raw(Box::new(runtime))
        }
        Err(e) => {
            warn!("❌ Failed to start sync runtime: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Runs one sync, skipping the network if the last check is younger than
/// `min_interval_secs`.
///
/// Success carries a serialized [`SyncOutcome`](orchestrator::SyncOutcome).
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn sync_if_needed(runtime: *mut SyncRuntime, min_interval_secs: u64) -> *const c_char {
    let runtime = match runtime_ref(runtime, "sync_if_needed") {
        Ok(runtime) => runtime,
        Err(error_ptr) => return error_ptr,
    };

    match runtime.sync_if_needed(Duration::from_secs(min_interval_secs)) {
        Ok(outcome) => response_to_c_string(&AppResponse::json(&outcome)),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_next_problem(runtime: *mut SyncRuntime) -> *const c_char {
    let runtime = match runtime_ref(runtime, "get_next_problem") {
        Ok(runtime) => runtime,
        Err(error_ptr) => return error_ptr,
    };

    match runtime.store().get_next_problem() {
        Ok(Some(problem)) => response_to_c_string(&AppResponse::json(&problem)),
        Ok(None) => response_to_c_string(&AppResponse::NotFound("No unsolved problems".to_string())),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_problems_by_batch(runtime: *mut SyncRuntime, batch_id: *const c_char) -> *const c_char {
    let runtime = match runtime_ref(runtime, "get_problems_by_batch") {
        Ok(runtime) => runtime,
        Err(error_ptr) => return error_ptr,
    };
    let batch_id = match c_ptr_to_string(batch_id, "batch_id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };

    match runtime.store().get_problems_by_batch(&batch_id) {
        Ok(problems) => response_to_c_string(&AppResponse::json(&problems)),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Records an answer attempt. `is_correct` comes from the external checker.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn submit_answer(
    runtime: *mut SyncRuntime,
    problem_id: *const c_char,
    user_answer: *const c_char,
    is_correct: bool,
) -> *const c_char {
    let runtime = match runtime_ref(runtime, "submit_answer") {
        Ok(runtime) => runtime,
        Err(error_ptr) => return error_ptr,
    };
    let problem_id = match c_ptr_to_string(problem_id, "problem_id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };
    let user_answer = match c_ptr_to_string(user_answer, "user_answer") {
        Ok(answer) => answer,
        Err(error_ptr) => return error_ptr,
    };

    match runtime.store().submit_answer(&problem_id, &user_answer, is_correct) {
        Ok(()) => response_to_c_string(&AppResponse::success("Answer recorded")),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_batch_statistics(runtime: *mut SyncRuntime) -> *const c_char {
    let runtime = match runtime_ref(runtime, "get_batch_statistics") {
        Ok(runtime) => runtime,
        Err(error_ptr) => return error_ptr,
    };

    match runtime.store().get_batch_statistics() {
        Ok(stats) => response_to_c_string(&AppResponse::json(&stats)),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Flushes the store and releases the runtime. The pointer must not be used
/// afterwards.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_runtime(runtime: *mut SyncRuntime) -> *const c_char {
    if runtime.is_null() {
        let error = AppResponse::BadRequest("Null runtime pointer passed to close_runtime".to_string());
        return response_to_c_string(&error);
    }

    let runtime = unsafe { Box::from_raw(runtime) };
    match runtime.shutdown() {
        Ok(()) => response_to_c_string(&AppResponse::success("Runtime closed successfully")),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Releases a string returned by any function in this module.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(ptr: *const c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr as *mut c_char) });
    }
}

fn runtime_ref<'a>(runtime: *mut SyncRuntime, caller: &str) -> Result<&'a SyncRuntime, *const c_char> {
    match unsafe { runtime.as_ref() } {
        Some(runtime) => Ok(runtime),
        None => {
            let error = AppResponse::BadRequest(format!("Null runtime pointer passed to {caller}"));
            Err(response_to_c_string(&error))
        }
    }
}

/// Serializes a response into a C string owned by the caller.
///
/// Returns null if serialization or C string creation fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Converts a C string pointer to a Rust `String`, reporting null pointers and
/// invalid UTF-8 as a `BadRequest` response.
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}
