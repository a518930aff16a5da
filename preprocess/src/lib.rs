//! Preprocessing iterator (C6, spec §4.6).
//!
//! Replays the PREP chain node by node, deciding for each node whether to
//! alias the previous buffer, claim a fresh one, or fall through to the
//! `pre` output, based on the node's `REUSE`/`READONLY` attribute bits and
//! the active [`PipelineMode`]. Grounded on `renderer/src/cmd.rs`'s
//! sequential command-replay shape and `render/src/pipeline/validate.rs`'s
//! staged validate-then-execute flow; the starting-index and buffer-reuse
//! policy itself follows `original_source/backend.py`'s `Pre_iter`.

mod error;

pub use error::{Error, Result};

use img2arr_buffers::{BufferManager, IntermediateBuffer};
use img2arr_dispatch::{self as dispatch, DispatchBuffers, DispatchResult};
use img2arr_registry::{Attributes, EntryKind, Registry, Stage};
use img2arr_workerpool::WorkerPool;

/// Memory/speed trade-off selected by the caller before `begin` (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineMode {
    /// Balance; honors `REUSE`.
    Default,
    /// Never aliases; always allocates a fresh buffer per node.
    Speed,
    /// Identical to `Default` today; reserved for future arena-shrinking
    /// (spec.md Open Question, resolved in SPEC_FULL.md §4.1).
    Memory,
}

/// The virtual node name; `REUSE`-attributed identity passthrough (§4.6).
pub const VIRTUAL_NODE: &str = "";

/// What one `next()` call did to the buffer list, for diagnostics/logging.
#[derive(Debug)]
pub struct StepOutcome {
    pub in_buf_index: Option<usize>,
    pub out_buf_index: Option<usize>,
    pub dispatch: Option<DispatchResult>,
}

fn with_channel(shape: &[usize]) -> Vec<usize> {
    let mut v = shape.to_vec();
    v.push(4);
    v
}

/// Drops every buffer beyond the one the tail step last read, matching
/// `Pre_iter.__del__`'s `clear_buf()` call (`backend.py`: `del
/// self.img_pre_buf[self.cur_buf_index+1:]`) at the end of every run. A tail
/// that read straight from `img` (no buffer claimed) means the whole chain
/// needed none, so every existing buffer is stale and dropped.
fn truncate_trailing_buffers(buffers: &mut BufferManager, last_buf_index: Option<usize>) {
    match last_buf_index {
        Some(idx) => buffers.clear_after(idx),
        None => buffers.reset(),
    }
}

/// Copies `img` into `pre`, resizing `pre` if needed. Used both by the
/// empty-chain fast path and by the normal tail/`READONLY` copy-out step.
/// Returns whether `pre` was resized.
fn copy_into_pre(img: &IntermediateBuffer, pre: &mut IntermediateBuffer) -> bool {
    let resized = pre.shape() != img.shape();
    if resized {
        *pre = IntermediateBuffer::with_shape_for_copy(img.shape().to_vec());
    }
    pre.bytes_mut().copy_from_slice(img.bytes());
    resized
}

/// Replays the PREP chain from the highest safe starting point (§4.6).
pub struct PreprocessIter {
    mode: PipelineMode,
    i: usize,
    pre_resized: bool,
    finished: bool,
}

impl PreprocessIter {
    /// Resolves the effective start index from `start_index`, clears stale
    /// provenance, and re-establishes the buffer cursor. If `empty` is true
    /// (no chain nodes at all), copies `img` straight into `pre` and
    /// returns an iterator that yields no further steps (§4.6 "Empty-chain
    /// fast path").
    pub fn begin(
        buffers: &mut BufferManager,
        img: &IntermediateBuffer,
        pre: &mut IntermediateBuffer,
        start_index: usize,
        empty: bool,
        mode: PipelineMode,
    ) -> PreprocessIter {
        if empty {
            let resized = copy_into_pre(img, pre);
            buffers.reset();
            return PreprocessIter {
                mode,
                i: 0,
                pre_resized: resized,
                finished: true,
            };
        }

        // Resolve the cursor (which buffer the replay resumes reading from)
        // from the *current* reader provenance before clearing anything:
        // the buffer that still needs clearing is found by what `effective_start`
        // used to read, and that record is exactly what clearing below removes.
        let effective_start = buffers.effective_start_index(start_index);
        if effective_start == 0 {
            buffers.clear_cursor();
        } else {
            match buffers.find_reader(effective_start) {
                Some(idx) => buffers.set_cursor(idx),
                None => buffers.clear_cursor(),
            }
        }
        buffers.clear_provenance_from(effective_start);

        PreprocessIter {
            mode,
            i: effective_start,
            pre_resized: false,
            finished: false,
        }
    }

    /// The absolute chain index the next call to `next` will process.
    pub fn index(&self) -> usize {
        self.i
    }

    /// `true` once the iterator has produced its last step (either via
    /// `begin(.., empty=true)` or after a tail step in `next`).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether `pre` was reshaped by the most recent tail step.
    pub fn pre_resized(&self) -> bool {
        self.pre_resized
    }

    /// Advances one node. `is_tail` must be set by the caller on the last
    /// node of the chain; `is_head` is derived internally from the
    /// absolute index (`i == 0`), matching spec.md's distinction between
    /// "first node of the whole chain" and "first node of this replay".
    #[allow(clippy::too_many_arguments)]
    pub fn next(
        &mut self,
        registry: &Registry,
        pool: &WorkerPool,
        buffers: &mut BufferManager,
        img: &IntermediateBuffer,
        pre: &mut IntermediateBuffer,
        category: &str,
        name: &str,
        args: &[u8],
        is_tail: bool,
    ) -> Result<StepOutcome> {
        let is_head = self.i == 0;
        let node_i = self.i;

        let (mut in_buf_index, in_shape): (Option<usize>, Vec<usize>) = if is_head {
            (None, img.shape()[..img.shape().len() - 1].to_vec())
        } else {
            let idx = buffers.cursor().ok_or(Error::NoCurrentBuffer)?;
            buffers.add_reader(idx, node_i);
            let shape = buffers.get(idx).shape();
            (Some(idx), shape[..shape.len() - 1].to_vec())
        };

        let args_ptr = args.as_ptr() as *const std::ffi::c_void;

        let (mut out_shape, attr, native, call_name) = if name.is_empty() {
            (in_shape.clone(), Attributes::REUSE, None, VIRTUAL_NODE)
        } else {
            let descriptor = registry.get(Stage::Prep, category, name)?;
            let module = descriptor.native.as_ref().ok_or_else(|| Error::NativeModuleNotLoaded {
                category: category.to_string(),
                key: name.to_string(),
            })?;
            let mut out_shape = vec![0usize; in_shape.len()];
            let attr = dispatch::query_out_info(name, module, args_ptr, &in_shape, &mut out_shape)?;
            if attr.contains(Attributes::READONLY) {
                out_shape = in_shape.clone();
            }
            (out_shape, attr, Some(module), name)
        };

        // `is_head` READONLY nodes need a materialized, contiguous copy of
        // `img` to read from (§4.6).
        if is_head && attr.contains(Attributes::READONLY) {
            let idx = buffers.next_buf(&with_channel(&in_shape));
            buffers.get_mut(idx).bytes_mut().copy_from_slice(img.bytes());
            buffers.add_writer(idx, node_i);
            buffers.add_reader(idx, node_i);
            in_buf_index = Some(idx);
        }

        let in_ptr = match in_buf_index {
            Some(idx) => buffers.get(idx).as_ptr(),
            None => img.as_ptr(),
        };

        if is_tail {
            let tail_shape = with_channel(&out_shape);
            self.pre_resized = pre.shape() != tail_shape;
            if self.pre_resized {
                *pre = IntermediateBuffer::with_shape_for_copy(tail_shape);
            }

            if attr.contains(Attributes::READONLY) {
                // The kernel still runs — it has no `out` to write through,
                // but a tail histogram-style node's entire job is reading
                // the buffer and reporting through `args`, so dispatch is
                // not skipped; only the `pre` copy replaces its `out` write.
                let dispatch_result = if let Some(module) = native {
                    let buffers_in = DispatchBuffers {
                        args: args_ptr,
                        in_buf: in_ptr,
                        out_buf: std::ptr::null_mut(),
                        in_shape: in_shape.clone(),
                    };
                    Some(dispatch::dispatch(call_name, module, pool, EntryKind::Normal, buffers_in)?)
                } else {
                    None
                };

                let src = match in_buf_index {
                    Some(idx) => buffers.get(idx).bytes().to_vec(),
                    None => img.bytes().to_vec(),
                };
                pre.bytes_mut().copy_from_slice(&src);
                truncate_trailing_buffers(buffers, in_buf_index);
                self.finished = true;
                self.i += 1;
                return Ok(StepOutcome {
                    in_buf_index,
                    out_buf_index: None,
                    dispatch: dispatch_result,
                });
            }

            let dispatch_result = if let Some(module) = native {
                let buffers_in = DispatchBuffers {
                    args: args_ptr,
                    in_buf: in_ptr,
                    out_buf: pre.as_mut_ptr(),
                    in_shape: in_shape.clone(),
                };
                Some(dispatch::dispatch(call_name, module, pool, EntryKind::Normal, buffers_in)?)
            } else {
                // virtual "" node: copy unless the pointers already coincide.
                if in_ptr != pre.as_ptr() as *const u8 {
                    let src = match in_buf_index {
                        Some(idx) => buffers.get(idx).bytes().to_vec(),
                        None => img.bytes().to_vec(),
                    };
                    pre.bytes_mut().copy_from_slice(&src);
                }
                None
            };

            truncate_trailing_buffers(buffers, in_buf_index);
            self.finished = true;
            self.i += 1;
            return Ok(StepOutcome {
                in_buf_index,
                out_buf_index: None,
                dispatch: dispatch_result,
            });
        }

        // Non-tail: decide the output buffer per the attribute/mode policy.
        let out_buf_index = if attr.contains(Attributes::READONLY) {
            None
        } else if attr.contains(Attributes::REUSE) && !is_head {
            match self.mode {
                PipelineMode::Speed => Some(buffers.next_buf(&with_channel(&out_shape))),
                PipelineMode::Default | PipelineMode::Memory => in_buf_index,
            }
        } else {
            Some(buffers.next_buf(&with_channel(&out_shape)))
        };

        if let Some(idx) = out_buf_index {
            buffers.add_writer(idx, node_i);
        }

        let dispatch_result = if name.is_empty() {
            if let Some(out_idx) = out_buf_index {
                if Some(out_idx) != in_buf_index {
                    let src = match in_buf_index {
                        Some(idx) => buffers.get(idx).bytes().to_vec(),
                        None => img.bytes().to_vec(),
                    };
                    buffers.get_mut(out_idx).bytes_mut().copy_from_slice(&src);
                }
            }
            None
        } else {
            let module = native.expect("named node always resolves a native module");
            let out_ptr = match out_buf_index {
                Some(idx) => buffers.get_mut(idx).as_mut_ptr(),
                None => std::ptr::null_mut(),
            };
            let buffers_in = DispatchBuffers {
                args: args_ptr,
                in_buf: in_ptr,
                out_buf: out_ptr,
                in_shape: in_shape.clone(),
            };
            Some(dispatch::dispatch(call_name, module, pool, EntryKind::Normal, buffers_in)?)
        };

        self.i += 1;
        Ok(StepOutcome {
            in_buf_index,
            out_buf_index,
            dispatch: dispatch_result,
        })
    }
}
