//! Pipeline façade (C7, spec §4.7).
//!
//! Holds the decoded source image and the three stage outputs (`pre`,
//! `code_view`, `code_out`/`out`), and exposes the four dispatch operations
//! the UI/CLI collaborator drives: `Pre`, `CodeView`, `Code`, `Out`.
//! Grounded on `renderer/src/lib.rs`'s façade re-export shape (one type
//! that owns the state other crates only operate on by reference) and on
//! `original_source/backend.py`'s `Img2arrPIPE` class, which this replaces.

mod coordinator;
mod error;

pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use img2arr_preprocess::{PipelineMode, PreprocessIter, VIRTUAL_NODE};

use std::ffi::c_void;
use std::path::Path;

use img2arr_buffers::{BufferManager, IntermediateBuffer};
use img2arr_dispatch::{self as dispatch, DispatchBuffers, DispatchResult};
use img2arr_registry::{EntryKind, Registry, Stage};
use img2arr_workerpool::WorkerPool;

/// Strips the trailing channel dimension from an RGBA buffer's shape; a
/// genuinely 1-D buffer (CODE/OUT stage byte sequences) is passed through
/// whole, matching the dispatch contract of spec.md §4.4.
fn in_shape_of(shape: &[usize]) -> Vec<usize> {
    if shape.len() > 1 {
        shape[..shape.len() - 1].to_vec()
    } else {
        shape.to_vec()
    }
}

/// The decoded source image plus the three stage outputs (§3 "Pipeline
/// state").
pub struct Pipeline {
    img: IntermediateBuffer,
    buffers: BufferManager,
    pre: IntermediateBuffer,
    code_view: IntermediateBuffer,
    code_out: Vec<u8>,
    out: Vec<u8>,
}

impl Pipeline {
    /// Decodes `path` via the `image` crate into RGBA8 and opens a fresh
    /// pipeline over it; `pre`/`code_view` start as a byte-for-byte copy of
    /// `img` and an empty buffer respectively, matching `Img2arrPIPE.__init__`.
    pub fn open(path: &Path) -> Result<Self> {
        let decoded = image::open(path).map_err(|source| Error::DecodeFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let rgba = decoded.to_rgba8();
        let (w, h) = rgba.dimensions();
        let shape = vec![h as usize, w as usize, 4usize];

        let mut img = IntermediateBuffer::with_shape_for_copy(shape.clone());
        img.bytes_mut().copy_from_slice(rgba.as_raw());

        let mut pre = IntermediateBuffer::with_shape_for_copy(shape);
        pre.bytes_mut().copy_from_slice(img.bytes());

        log::info!("opened {} ({}x{})", path.display(), w, h);

        Ok(Pipeline {
            img,
            buffers: BufferManager::new(),
            pre,
            code_view: IntermediateBuffer::with_shape_for_copy(vec![0, 0, 4]),
            code_out: Vec::new(),
            out: Vec::new(),
        })
    }

    pub fn img(&self) -> &IntermediateBuffer {
        &self.img
    }

    pub fn pre(&self) -> &IntermediateBuffer {
        &self.pre
    }

    pub fn code_view(&self) -> &IntermediateBuffer {
        &self.code_view
    }

    pub fn code_out(&self) -> &[u8] {
        &self.code_out
    }

    pub fn out(&self) -> &[u8] {
        &self.out
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Begins a preprocessing replay (§4.6). The caller drives the returned
    /// iterator's `next` once per chain node, passing `&mut self.buffers`/
    /// `&self.img`/`&mut self.pre` back in (kept split out rather than
    /// threaded through the iterator so the façade remains the sole owner).
    pub fn begin_pre(&mut self, start_index: usize, empty: bool, mode: PipelineMode) -> PreprocessIter {
        PreprocessIter::begin(&mut self.buffers, &self.img, &mut self.pre, start_index, empty, mode)
    }

    pub fn step_pre(
        &mut self,
        iter: &mut PreprocessIter,
        registry: &Registry,
        pool: &WorkerPool,
        category: &str,
        name: &str,
        args: &[u8],
        is_tail: bool,
    ) -> img2arr_preprocess::Result<img2arr_preprocess::StepOutcome> {
        iter.next(
            registry,
            pool,
            &mut self.buffers,
            &self.img,
            &mut self.pre,
            category,
            name,
            args,
            is_tail,
        )
    }

    /// Queries `io_GetViewOutInfo`, resizes `code_view` to `(h', w', 4)` if
    /// needed, and dispatches the CODE_VIEW entry pair. Reads from `pre`
    /// unless `in_override` names a different buffer (§4.7).
    pub fn code_view_dispatch(
        &mut self,
        registry: &Registry,
        pool: &WorkerPool,
        name: &str,
        args: &[u8],
        in_override: Option<&IntermediateBuffer>,
    ) -> Result<(DispatchResult, bool)> {
        if name.is_empty() {
            return Err(Error::EmptyNodeName);
        }
        let args_ptr = args.as_ptr() as *const c_void;
        let src = in_override.unwrap_or(&self.pre);
        let in_shape = in_shape_of(src.shape());
        let in_ptr = src.as_ptr();

        let descriptor = registry.get(Stage::Code, "img", name)?;
        let module = descriptor.native.as_ref().ok_or_else(|| {
            img2arr_registry::Error::NativeModuleMissing(descriptor.dir.join("<not loaded>"))
        })?;
        let view_shape = dispatch::query_view_out_info(name, module, args_ptr, &in_shape)?;
        let out_shape = vec![view_shape[0], view_shape[1], 4];

        let resized = self.code_view.shape() != out_shape.as_slice();
        if resized {
            self.code_view = IntermediateBuffer::with_shape_for_copy(out_shape);
        }

        let buffers = DispatchBuffers {
            args: args_ptr,
            in_buf: in_ptr,
            out_buf: self.code_view.as_mut_ptr(),
            in_shape,
        };
        let result = dispatch::dispatch(name, module, pool, EntryKind::CodeView, buffers)?;
        Ok((result, resized))
    }

    /// Queries `io_GetOutInfo` on `pre`'s shape, resizes `code_out`, and
    /// dispatches the normal entry pair (§4.7 `Code`).
    pub fn code_dispatch(
        &mut self,
        registry: &Registry,
        pool: &WorkerPool,
        name: &str,
        args: &[u8],
    ) -> Result<DispatchResult> {
        if name.is_empty() {
            return Err(Error::EmptyNodeName);
        }
        let args_ptr = args.as_ptr() as *const c_void;
        let in_shape = in_shape_of(self.pre.shape());
        let in_ptr = self.pre.as_ptr();

        let descriptor = registry.get(Stage::Code, "img", name)?;
        let module = descriptor.native.as_ref().ok_or_else(|| {
            img2arr_registry::Error::NativeModuleMissing(descriptor.dir.join("<not loaded>"))
        })?;
        let mut out_shape = [0usize; 1];
        dispatch::query_out_info(name, module, args_ptr, &in_shape, &mut out_shape)?;
        let out_size = out_shape[0];
        if self.code_out.len() != out_size {
            self.code_out.resize(out_size, 0);
        }

        let buffers = DispatchBuffers {
            args: args_ptr,
            in_buf: in_ptr,
            out_buf: self.code_out.as_mut_ptr(),
            in_shape,
        };
        dispatch::dispatch(name, module, pool, EntryKind::Normal, buffers).map_err(Into::into)
    }

    /// Queries `io_GetOutInfo` on `code_out`'s length, resizes `out`, and
    /// dispatches the normal entry pair (§4.7 `Out`).
    pub fn out_dispatch(
        &mut self,
        registry: &Registry,
        pool: &WorkerPool,
        name: &str,
        args: &[u8],
    ) -> Result<DispatchResult> {
        if name.is_empty() {
            return Err(Error::EmptyNodeName);
        }
        let args_ptr = args.as_ptr() as *const c_void;
        let in_shape = vec![self.code_out.len()];
        let in_ptr = self.code_out.as_ptr();

        let descriptor = registry.get(Stage::Out, "img", name)?;
        let module = descriptor.native.as_ref().ok_or_else(|| {
            img2arr_registry::Error::NativeModuleMissing(descriptor.dir.join("<not loaded>"))
        })?;
        let mut out_shape = [0usize; 1];
        dispatch::query_out_info(name, module, args_ptr, &in_shape, &mut out_shape)?;
        let out_size = out_shape[0];
        log::debug!("out stage {name:?} produced {out_size} bytes");
        if self.out.len() != out_size {
            self.out.resize(out_size, 0);
        }

        let buffers = DispatchBuffers {
            args: args_ptr,
            in_buf: in_ptr,
            out_buf: self.out.as_mut_ptr(),
            in_shape,
        };
        dispatch::dispatch(name, module, pool, EntryKind::Normal, buffers).map_err(Into::into)
    }

    /// Drops every intermediate buffer (§4.7 `reset_pre`, §4.5 `reset`).
    pub fn reset_pre(&mut self) {
        self.buffers.reset();
    }

    /// Tears the pipeline down (§4.7 `close`, grounded on `backend.py`'s
    /// module-level `Close()` calling `PlProcCore.Exit()`). That `Exit` hook
    /// lived in a separately `dlopen`ed core runtime library shared by every
    /// plug-in dispatch; here the equivalent work (the thread pool, the
    /// single/multi-core dispatch loop) is native Rust with no library
    /// handle to release, so `close` has nothing left to call through FFI —
    /// it only needs to drop the intermediate buffers, same as `reset_pre`.
    /// Safe to call more than once.
    pub fn close(&mut self) {
        self.buffers.reset();
        log::info!("pipeline closed");
    }
}
