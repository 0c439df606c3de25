//! Internal-compiler-error reporting.
//!
//! An ICE prints the compiler version, the failing message and a trigger
//! point identifying the phase, cleans registered temp files, and exits
//! with status 2. Under the `Lsp` and `Unittest` trigger points the call
//! returns instead, so the embedding harness decides what to do.

use std::io::Write;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

pub const ICE_EXIT_CODE: i32 = 2;

pub const FRONTEND_TP: i64 = -1;
pub const UNITTEST_TP: i64 = -2;
pub const LSP_TP: i64 = -3;
pub const INTERPRETER_TP: i64 = -4;
pub const WRITE_CACHE_TP: i64 = -5;

static TRIGGER_POINT: AtomicI64 = AtomicI64::new(FRONTEND_TP);
static WROTE_ICE_MESSAGE: AtomicBool = AtomicBool::new(false);

static CLEANUP: Mutex<Option<fn()>> = Mutex::new(None);

/// Register the temp-file cleanup the driver wants run before an ICE exit.
pub fn set_cleanup(cleanup: fn()) {
    *CLEANUP.lock().unwrap() = Some(cleanup);
}

/// Phase ordinals use non-negative values; the named trigger points are
/// negative. Once `Lsp` is set it is sticky for the process.
pub fn set_trigger_point(tp: i64) {
    if TRIGGER_POINT.load(Ordering::SeqCst) == LSP_TP {
        return;
    }
    TRIGGER_POINT.store(tp, Ordering::SeqCst);
}

pub fn trigger_point() -> i64 {
    TRIGGER_POINT.load(Ordering::SeqCst)
}

/// Reset the process-wide ICE state; embedders (test harnesses, language
/// servers) call this between runs.
pub fn reset_for_embedder() {
    WROTE_ICE_MESSAGE.store(false, Ordering::SeqCst);
    TRIGGER_POINT.store(FRONTEND_TP, Ordering::SeqCst);
}

fn can_write_once_ice_message() -> bool {
    !WROTE_ICE_MESSAGE.swap(true, Ordering::SeqCst)
}

/// Report an internal compiler error. Exits with status 2 unless the
/// trigger point is `LSP_TP` or `UNITTEST_TP`, in which case the call
/// returns and the caller unwinds through its normal error path.
pub fn internal_error(message: &str) {
    if can_write_once_ice_message() {
        let mut err = std::io::stderr();
        let _ = writeln!(err, "chime compiler {}", env!("CARGO_PKG_VERSION"));
        let tp = trigger_point();
        let _ = writeln!(
            err,
            "Internal Compiler Error: {}\nPlease report this to the Chime team and include the project. Error Code: {}",
            message, tp
        );
        if tp == LSP_TP || tp == UNITTEST_TP {
            return;
        }
        if let Some(cleanup) = *CLEANUP.lock().unwrap() {
            cleanup();
        }
        process::exit(ICE_EXIT_CODE);
    }
}

/// Assert an invariant; violation takes the ICE path.
pub fn internal_assert(pred: bool, message: &str) {
    if !pred {
        internal_error(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test: the trigger point is process-wide state and the test
    // harness runs tests on concurrent threads.
    #[test]
    fn test_trigger_points() {
        reset_for_embedder();
        set_trigger_point(UNITTEST_TP);
        // Must not exit the test process.
        internal_error("synthetic failure");
        internal_error("second failure is swallowed by the write-once flag");
        assert_eq!(trigger_point(), UNITTEST_TP);

        set_trigger_point(LSP_TP);
        set_trigger_point(7);
        assert_eq!(trigger_point(), LSP_TP);
        reset_for_embedder();
    }
}
