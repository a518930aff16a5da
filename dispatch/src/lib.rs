//! Dispatcher (C4, spec §4.4): invokes a plug-in's single- or multi-core
//! entry over shared buffers and collects per-task return codes.
//!
//! Grounded on `renderer/src/cmd.rs`'s command-submission shape (a header
//! carrying routing info alongside the payload) and on `img2arr-registry`'s
//! [`NativeModule`] accessors for the raw ABI calls themselves.

mod error;

pub use error::{Error, Result};

use std::ffi::c_void;

use img2arr_registry::{Attributes, EntryKind, NativeModule};
use img2arr_workerpool::WorkerPool;

/// Which entry pair a dispatch actually used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Single,
    Multi,
}

/// The result of one dispatch (§4.4).
#[derive(Debug)]
pub struct DispatchResult {
    pub mode: Mode,
    /// One entry for MULTI (one per worker); exactly one entry for SINGLE.
    pub per_task_returns: Vec<i32>,
    /// The dispatcher's own status: 0 if every task returned 0, the first
    /// nonzero per-task code otherwise (§7 `TASK_RETURN_NONZERO`).
    pub wrapper_return: i32,
}

impl DispatchResult {
    pub fn any_task_failed(&self) -> bool {
        self.per_task_returns.iter().any(|&r| r != 0)
    }
}

/// Queries `io_GetOutInfo` (or, for `kind == CodeView`, `io_GetViewOutInfo`)
/// for the output shape and attribute bits a node would produce from
/// `in_shape`. `out_shape` must be pre-sized to the expected rank.
pub fn query_out_info(
    name: &str,
    plugin: &NativeModule,
    args: *const c_void,
    in_shape: &[usize],
    out_shape: &mut [usize],
) -> Result<Attributes> {
    let (ret, attr) = plugin.io_get_out_info(args, in_shape, out_shape);
    if ret != 0 {
        return Err(Error::ShapeQueryFailed {
            name: name.to_string(),
            code: ret,
        });
    }
    Ok(attr)
}

/// Queries `io_GetViewOutInfo` (CODE stage preview path only), producing a
/// 2-D `(h, w)` shape.
pub fn query_view_out_info(
    name: &str,
    plugin: &NativeModule,
    args: *const c_void,
    in_shape: &[usize],
) -> Result<[usize; 2]> {
    let mut out_shape = [0usize; 2];
    let ret = plugin.io_get_view_out_info(args, in_shape, &mut out_shape);
    if ret != 0 {
        return Err(Error::ShapeQueryFailed {
            name: name.to_string(),
            code: ret,
        });
    }
    Ok(out_shape)
}

/// Raw pointers into the caller's buffers for one dispatch. `out` is null
/// for `READONLY` nodes.
pub struct DispatchBuffers {
    pub args: *const c_void,
    pub in_buf: *const u8,
    pub out_buf: *mut u8,
    pub in_shape: Vec<usize>,
}

// SAFETY: the raw pointers above point at buffers the caller (C5) guarantees
// are not touched by anyone else for the duration of `dispatch` (spec §5
// "workers within one dispatch write disjoint regions by contract").
unsafe impl Send for DispatchBuffers {}
unsafe impl Sync for DispatchBuffers {}

/// Invokes `name`'s native entry for `kind`, selecting MULTI over SINGLE
/// whenever both exist (§4.4 selection rule).
pub fn dispatch(
    name: &str,
    plugin: &NativeModule,
    pool: &WorkerPool,
    kind: EntryKind,
    buffers: DispatchBuffers,
) -> Result<DispatchResult> {
    if plugin.has_multi_core(kind) {
        dispatch_multi(name, plugin, pool, kind, buffers)
    } else if plugin.has_single_core(kind) {
        Ok(dispatch_single(plugin, kind, buffers))
    } else {
        Err(Error::MissingWorker {
            name: name.to_string(),
        })
    }
}

fn dispatch_single(plugin: &NativeModule, kind: EntryKind, buffers: DispatchBuffers) -> DispatchResult {
    let f0 = plugin
        .f0(kind)
        .expect("dispatch_single called without a bound f0/f0p entry");
    let ret = unsafe { f0(buffers.args, buffers.in_buf, buffers.out_buf, buffers.in_shape.as_ptr()) };
    DispatchResult {
        mode: Mode::Single,
        per_task_returns: vec![ret],
        wrapper_return: ret,
    }
}

fn dispatch_multi(
    name: &str,
    plugin: &NativeModule,
    pool: &WorkerPool,
    kind: EntryKind,
    buffers: DispatchBuffers,
) -> Result<DispatchResult> {
    let f1 = plugin
        .f1(kind)
        .expect("dispatch_multi called without a bound f1/f1p entry");

    let per_task_returns = pool
        .run(&buffers, |n, idx, buffers| unsafe {
            f1(
                n,
                idx,
                buffers.args,
                buffers.in_buf,
                buffers.out_buf,
                buffers.in_shape.as_ptr(),
            )
        })
        .map_err(|source| Error::Pool {
            name: name.to_string(),
            source,
        })?;

    let wrapper_return = per_task_returns.iter().copied().find(|&r| r != 0).unwrap_or(0);
    Ok(DispatchResult {
        mode: Mode::Multi,
        per_task_returns,
        wrapper_return,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_task_failed_detects_nonzero() {
        let ok = DispatchResult {
            mode: Mode::Multi,
            per_task_returns: vec![0, 0, 0],
            wrapper_return: 0,
        };
        assert!(!ok.any_task_failed());

        let bad = DispatchResult {
            mode: Mode::Multi,
            per_task_returns: vec![0, 1, 0],
            wrapper_return: 1,
        };
        assert!(bad.any_task_failed());
    }

    // §8 "Testable properties" exercised against in-process synthetic
    // plug-ins (see `img2arr_registry::NativeModule::synthetic`): no
    // compiled `.so` fixture is available in this workspace, so these
    // stand in for what would otherwise be dlopen'd test doubles.
    mod scenarios {
        use super::*;
        use std::sync::atomic::{AtomicUsize, Ordering};

        unsafe extern "C" fn get_out_info(
            _args: *const c_void,
            in_shape: *const usize,
            out_shape: *mut usize,
            attr: *mut i32,
        ) -> i32 {
            *out_shape.add(0) = *in_shape.add(0);
            *out_shape.add(1) = *in_shape.add(1);
            *attr = Attributes::REUSE.bits();
            0
        }

        unsafe extern "C" fn single_only_f0(
            _args: *const c_void,
            in_buf: *const u8,
            out_buf: *mut u8,
            in_shape: *const usize,
        ) -> i32 {
            let len = (*in_shape.add(0)) * (*in_shape.add(1)) * 4;
            std::ptr::copy_nonoverlapping(in_buf, out_buf, len);
            0
        }

        static MULTI_CALLS: AtomicUsize = AtomicUsize::new(0);

        unsafe extern "C" fn dual_f0(
            _args: *const c_void,
            _in_buf: *const u8,
            _out_buf: *mut u8,
            _in_shape: *const usize,
        ) -> i32 {
            panic!("f0 should never be called when f1 is also bound");
        }

        unsafe extern "C" fn dual_f1(
            threads: usize,
            idx: usize,
            _args: *const c_void,
            _in_buf: *const u8,
            _out_buf: *mut u8,
            _in_shape: *const usize,
        ) -> i32 {
            MULTI_CALLS.fetch_add(1, Ordering::SeqCst);
            assert!(idx < threads);
            0
        }

        unsafe extern "C" fn failing_f1(
            _threads: usize,
            idx: usize,
            _args: *const c_void,
            _in_buf: *const u8,
            _out_buf: *mut u8,
            _in_shape: *const usize,
        ) -> i32 {
            if idx == 1 {
                7
            } else {
                0
            }
        }

        fn buffers(in_shape: Vec<usize>, in_buf: &[u8], out_buf: &mut [u8]) -> DispatchBuffers {
            DispatchBuffers {
                args: std::ptr::null(),
                in_buf: in_buf.as_ptr(),
                out_buf: out_buf.as_mut_ptr(),
                in_shape,
            }
        }

        #[test]
        fn single_only_plugin_dispatches_via_f0() {
            let plugin = NativeModule::synthetic("img2arr.prep.img.single", get_out_info, None, Some(single_only_f0), None, None, None);
            let pool = WorkerPool::init(2);
            let input = vec![9u8; 2 * 2 * 4];
            let mut output = vec![0u8; 2 * 2 * 4];
            let result = dispatch(
                "single",
                &plugin,
                &pool,
                EntryKind::Normal,
                buffers(vec![2, 2], &input, &mut output),
            )
            .unwrap();
            assert_eq!(result.mode, Mode::Single);
            assert_eq!(result.per_task_returns, vec![0]);
            assert_eq!(output, input);
        }

        #[test]
        fn multi_is_preferred_over_single_when_both_bound() {
            let plugin =
                NativeModule::synthetic("img2arr.prep.img.dual", get_out_info, None, Some(dual_f0), Some(dual_f1), None, None);
            let pool = WorkerPool::init(4);
            let input = vec![0u8; 2 * 2 * 4];
            let mut output = vec![0u8; 2 * 2 * 4];
            let before = MULTI_CALLS.load(Ordering::SeqCst);
            let result = dispatch(
                "dual",
                &plugin,
                &pool,
                EntryKind::Normal,
                buffers(vec![2, 2], &input, &mut output),
            )
            .unwrap();
            assert_eq!(result.mode, Mode::Multi);
            assert_eq!(MULTI_CALLS.load(Ordering::SeqCst) - before, 4);
            assert_eq!(result.per_task_returns.len(), 4);
        }

        #[test]
        fn multi_dispatch_surfaces_first_nonzero_as_wrapper_return() {
            let plugin =
                NativeModule::synthetic("img2arr.prep.img.failing", get_out_info, None, None, Some(failing_f1), None, None);
            let pool = WorkerPool::init(3);
            let input = vec![0u8; 2 * 2 * 4];
            let mut output = vec![0u8; 2 * 2 * 4];
            let result = dispatch(
                "failing",
                &plugin,
                &pool,
                EntryKind::Normal,
                buffers(vec![2, 2], &input, &mut output),
            )
            .unwrap();
            assert_eq!(result.per_task_returns, vec![0, 7, 0]);
            assert_eq!(result.wrapper_return, 7);
            assert!(result.any_task_failed());
        }
    }
}
