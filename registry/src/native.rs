//! The native plug-in ABI (§3, §6.3) and the loader that validates and
//! binds it.
//!
//! Grounded on `extension_runtime`/`plugin`'s libloading-based dylib
//! loading: we never unload a loaded module once it has passed validation
//! (the "keep dylibs in memory" approach that crate's doc comments settle
//! on for the lifetime-safety problem), so copying the raw fn pointer out
//! of each `Symbol` is sound as long as the owning [`libloading::Library`]
//! outlives it, which it does: it is held in the same `NativeModule` as
//! the raw pointers, behind an `Arc` so descriptors can be cloned cheaply.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Attribute bits returned by `io_GetOutInfo` (§3).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Attributes: i32 {
        /// Output may alias input.
        const REUSE = 0b01;
        /// Node does not write; `out` is null, `out_shape == in_shape`.
        const READONLY = 0b10;
    }
}

pub type IoGetOutInfoFn =
    unsafe extern "C" fn(args: *const c_void, in_shape: *const usize, out_shape: *mut usize, attr: *mut i32) -> i32;

pub type IoGetViewOutInfoFn =
    unsafe extern "C" fn(args: *const c_void, in_shape: *const usize, out_shape: *mut usize) -> i32;

pub type F0Fn =
    unsafe extern "C" fn(args: *const c_void, in_buf: *const u8, out_buf: *mut u8, in_shape: *const usize) -> i32;

pub type F1Fn = unsafe extern "C" fn(
    threads: usize,
    idx: usize,
    args: *const c_void,
    in_buf: *const u8,
    out_buf: *mut u8,
    in_shape: *const usize,
) -> i32;

pub type InitFn = unsafe extern "C" fn() -> i32;

/// Which single/multi-core entry pair a dispatch should use: the normal
/// path (`f0`/`f1`) or, for CODE stage, the preview path (`f0p`/`f1p`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Normal,
    CodeView,
}

/// A validated, loaded native module. Holds the owning [`libloading::Library`]
/// alongside the raw symbol pointers bound out of it in [`load`].
///
/// `_library` is `None` for a [`NativeModule::synthetic`] module: one built
/// directly from Rust `extern "C" fn` statics rather than a `dlopen`ed file,
/// used by the dispatch/preprocess/pipeline crates' tests to exercise the
/// real dispatch path (§8 "Testable properties" scenarios) without needing
/// an actual compiled plug-in.
pub struct NativeModule {
    path: PathBuf,
    sign: String,
    _library: Option<Arc<libloading::Library>>,
    io_get_out_info: IoGetOutInfoFn,
    io_get_view_out_info: Option<IoGetViewOutInfoFn>,
    f0: Option<F0Fn>,
    f1: Option<F1Fn>,
    f0p: Option<F0Fn>,
    f1p: Option<F1Fn>,
}

impl NativeModule {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn signature(&self) -> &str {
        &self.sign
    }

    pub fn has_multi_core(&self, kind: EntryKind) -> bool {
        match kind {
            EntryKind::Normal => self.f1.is_some(),
            EntryKind::CodeView => self.f1p.is_some(),
        }
    }

    pub fn has_single_core(&self, kind: EntryKind) -> bool {
        match kind {
            EntryKind::Normal => self.f0.is_some(),
            EntryKind::CodeView => self.f0p.is_some(),
        }
    }

    pub fn f0(&self, kind: EntryKind) -> Option<F0Fn> {
        match kind {
            EntryKind::Normal => self.f0,
            EntryKind::CodeView => self.f0p,
        }
    }

    pub fn f1(&self, kind: EntryKind) -> Option<F1Fn> {
        match kind {
            EntryKind::Normal => self.f1,
            EntryKind::CodeView => self.f1p,
        }
    }

    /// Calls `io_GetOutInfo`. `in_shape` excludes the trailing channel
    /// dimension for RGBA buffers and is the full shape for 1-D byte
    /// buffers (§4.4).
    pub fn io_get_out_info(&self, args: *const c_void, in_shape: &[usize], out_shape: &mut [usize]) -> (i32, Attributes) {
        let mut attr: i32 = 0;
        let ret = unsafe {
            (self.io_get_out_info)(args, in_shape.as_ptr(), out_shape.as_mut_ptr(), &mut attr as *mut i32)
        };
        (ret, Attributes::from_bits_truncate(attr))
    }

    /// Calls `io_GetViewOutInfo` (CODE stage only). `out_shape` is always a
    /// 2-element `(h, w)` pair per §4.7.
    pub fn io_get_view_out_info(&self, args: *const c_void, in_shape: &[usize], out_shape: &mut [usize; 2]) -> i32 {
        let f = self
            .io_get_view_out_info
            .expect("io_get_view_out_info called on a module that doesn't export it");
        unsafe { f(args, in_shape.as_ptr(), out_shape.as_mut_ptr()) }
    }

    /// Builds a `NativeModule` directly from `extern "C" fn` statics instead
    /// of `dlopen`ing a file. Lets downstream crates (dispatch, preprocess,
    /// pipeline) test against the real dispatch/ABI-selection path using an
    /// in-process stand-in plug-in, the same role a compiled fixture `.so`
    /// would otherwise play (§8 scenarios: brightness identity, readonly
    /// histogram, zoom resize, effective-start-index recomputation).
    #[allow(clippy::too_many_arguments)]
    pub fn synthetic(
        sign: impl Into<String>,
        io_get_out_info: IoGetOutInfoFn,
        io_get_view_out_info: Option<IoGetViewOutInfoFn>,
        f0: Option<F0Fn>,
        f1: Option<F1Fn>,
        f0p: Option<F0Fn>,
        f1p: Option<F1Fn>,
    ) -> NativeModule {
        NativeModule {
            path: PathBuf::from("<synthetic>"),
            sign: sign.into(),
            _library: None,
            io_get_out_info,
            io_get_view_out_info,
            f0,
            f1,
            f0p,
            f1p,
        }
    }
}

/// Load and validate a native module at `path` against the expected
/// signature prefix `img2arr.<stage>.<category>.` (§4.2 loading order).
pub fn load(path: &Path, expected_sign_prefix: &str, requires_view_path: bool) -> Result<NativeModule> {
    let library = unsafe { libloading::Library::new(path) }.map_err(|source| Error::Load {
        path: path.to_path_buf(),
        source,
    })?;
    let library = Arc::new(library);

    let sign = read_signature(&library, path)?;
    if !sign.starts_with(expected_sign_prefix) {
        return Err(Error::InvalidSignature {
            path: path.to_path_buf(),
            found: sign,
            expected_prefix: expected_sign_prefix.to_string(),
        });
    }

    let io_get_out_info = bind::<IoGetOutInfoFn>(&library, path, "io_GetOutInfo")?;

    let io_get_view_out_info = if requires_view_path {
        Some(bind::<IoGetViewOutInfoFn>(&library, path, "io_GetViewOutInfo")?)
    } else {
        try_bind::<IoGetViewOutInfoFn>(&library, "io_GetViewOutInfo")
    };

    let f0 = try_bind::<F0Fn>(&library, "f0");
    let f1 = try_bind::<F1Fn>(&library, "f1");
    if f0.is_none() && f1.is_none() {
        return Err(Error::MissingSymbol {
            path: path.to_path_buf(),
            symbol: "f0 or f1",
        });
    }

    let (f0p, f1p) = if requires_view_path {
        let f0p = try_bind::<F0Fn>(&library, "f0p");
        let f1p = try_bind::<F1Fn>(&library, "f1p");
        if f0p.is_none() && f1p.is_none() {
            return Err(Error::MissingSymbol {
                path: path.to_path_buf(),
                symbol: "f0p or f1p",
            });
        }
        (f0p, f1p)
    } else {
        (None, None)
    };

    if let Some(init) = try_bind::<InitFn>(&library, "init") {
        let ret = unsafe { init() };
        if ret != 0 {
            return Err(Error::InitFailed {
                path: path.to_path_buf(),
                code: ret,
            });
        }
    }

    Ok(NativeModule {
        path: path.to_path_buf(),
        sign,
        _library: Some(library),
        io_get_out_info,
        io_get_view_out_info,
        f0,
        f1,
        f0p,
        f1p,
    })
}

fn read_signature(library: &libloading::Library, path: &Path) -> Result<String> {
    let sign_sym = unsafe { library.get::<*const std::os::raw::c_char>(b"ext_sign\0") }.map_err(|_| {
        Error::MissingSymbol {
            path: path.to_path_buf(),
            symbol: "ext_sign",
        }
    })?;
    let ptr = unsafe { *sign_sym };
    if ptr.is_null() {
        return Err(Error::MissingSymbol {
            path: path.to_path_buf(),
            symbol: "ext_sign",
        });
    }
    let cstr = unsafe { std::ffi::CStr::from_ptr(ptr) };
    Ok(cstr.to_string_lossy().into_owned())
}

fn bind<T: Copy>(library: &libloading::Library, path: &Path, name: &'static str) -> Result<T> {
    try_bind::<T>(library, name).ok_or_else(|| Error::MissingSymbol {
        path: path.to_path_buf(),
        symbol: name,
    })
}

fn try_bind<T: Copy>(library: &libloading::Library, name: &str) -> Option<T> {
    let mut nul_name = name.as_bytes().to_vec();
    nul_name.push(0);
    unsafe { library.get::<T>(&nul_name).ok().map(|sym| *sym) }
}
