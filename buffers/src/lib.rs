//! Intermediate buffer manager (C5, spec §4.5).
//!
//! An ordered list of resizable byte regions, each tagged with the set of
//! preprocessing-chain node indices that have read or written it — the
//! provenance the C6 iterator consults to decide whether a buffer can be
//! reused in place or must be freshly allocated. Grounded on
//! `renderer/src/arena.rs`'s handle-over-`Vec` bookkeeping style (small
//! integer indices into an owned collection rather than raw pointers or
//! reference-counted handles).

use smallvec::SmallVec;

/// A resizable byte region plus its current shape and read/write
/// provenance. Shapes carry the trailing channel dimension (§4.5).
#[derive(Debug, Default)]
pub struct IntermediateBuffer {
    bytes: Vec<u8>,
    shape: Vec<usize>,
    readers: SmallVec<[usize; 4]>,
    writers: SmallVec<[usize; 4]>,
}

impl IntermediateBuffer {
    fn with_shape(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        IntermediateBuffer {
            bytes: vec![0u8; len],
            shape,
            readers: SmallVec::new(),
            writers: SmallVec::new(),
        }
    }

    /// A fresh zeroed buffer of `shape`, with no provenance. Used outside
    /// the manager for standalone buffers like `img`/`pre`/`code_view` that
    /// the pipeline façade owns directly rather than through the ordered
    /// list (§4.5, §4.7).
    pub fn with_shape_for_copy(shape: Vec<usize>) -> Self {
        IntermediateBuffer::with_shape(shape)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    pub fn readers(&self) -> &[usize] {
        &self.readers
    }

    pub fn writers(&self) -> &[usize] {
        &self.writers
    }

    fn resize(&mut self, shape: Vec<usize>) {
        let len: usize = shape.iter().product();
        self.bytes.clear();
        self.bytes.resize(len, 0);
        self.shape = shape;
    }

    fn add_reader(&mut self, node_i: usize) {
        if !self.readers.contains(&node_i) {
            self.readers.push(node_i);
        }
    }

    fn add_writer(&mut self, node_i: usize) {
        if !self.writers.contains(&node_i) {
            self.writers.push(node_i);
        }
    }

    fn clear_provenance_from(&mut self, effective_start: usize) {
        self.readers.retain(|&i| i < effective_start);
        self.writers.retain(|&i| i < effective_start);
    }
}

/// The ordered buffer list plus a cursor marking "the buffer the iterator
/// currently considers its output position" (§4.5).
#[derive(Debug, Default)]
pub struct BufferManager {
    buffers: Vec<IntermediateBuffer>,
    cursor: Option<usize>,
}

impl BufferManager {
    pub fn new() -> Self {
        BufferManager::default()
    }

    /// The buffer at the cursor, if any buffer has been claimed yet.
    pub fn current(&self) -> Option<&IntermediateBuffer> {
        self.cursor.map(|c| &self.buffers[c])
    }

    pub fn current_mut(&mut self) -> Option<&mut IntermediateBuffer> {
        self.cursor.map(move |c| &mut self.buffers[c])
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn get(&self, index: usize) -> &IntermediateBuffer {
        &self.buffers[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut IntermediateBuffer {
        &mut self.buffers[index]
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Advances the cursor to a buffer with `shape`: past the end appends a
    /// new buffer; landing on an existing buffer with a different shape
    /// resizes it in place (the iterator guarantees no concurrent readers
    /// when this happens). Returns the buffer's index.
    pub fn next_buf(&mut self, shape: &[usize]) -> usize {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next >= self.buffers.len() {
            self.buffers.push(IntermediateBuffer::with_shape(shape.to_vec()));
        } else if self.buffers[next].shape() != shape {
            self.buffers[next].resize(shape.to_vec());
        }
        self.cursor = Some(next);
        next
    }

    /// Claims a buffer as the current one without advancing past the end,
    /// used by the iterator to (re-)establish its starting position (§4.6
    /// `init_current_buf`).
    pub fn set_cursor(&mut self, index: usize) {
        debug_assert!(index < self.buffers.len());
        self.cursor = Some(index);
    }

    /// Unsets the cursor, meaning "no intermediate buffer claimed yet; the
    /// next read must come from `img`" (§4.6 `init_current_buf` returning -1).
    pub fn clear_cursor(&mut self) {
        self.cursor = None;
    }

    /// The first buffer (lowest index) whose `readers` contains `node_i`,
    /// used to re-establish the cursor for a non-zero effective start index
    /// (§4.6 `init_current_buf`).
    pub fn find_reader(&self, node_i: usize) -> Option<usize> {
        self.buffers.iter().position(|buf| buf.readers.contains(&node_i))
    }

    pub fn add_reader(&mut self, index: usize, node_i: usize) {
        self.buffers[index].add_reader(node_i);
    }

    pub fn add_writer(&mut self, index: usize, node_i: usize) {
        self.buffers[index].add_writer(node_i);
    }

    /// Drops all buffers beyond `cursor + 1` (§4.5).
    pub fn clear_after(&mut self, cursor: usize) {
        self.buffers.truncate(cursor + 1);
        if self.cursor.is_some_and(|c| c > cursor) {
            self.cursor = Some(cursor);
        }
    }

    /// Drops all buffers.
    pub fn reset(&mut self) {
        self.buffers.clear();
        self.cursor = None;
    }

    /// Walks `buffers` from newest to oldest looking for the first whose
    /// `writers` contains `requested_index`; returns that buffer's
    /// `writers[0]` as the effective start (§4.6 `get_available_index`).
    /// Falls back to `requested_index` itself if no buffer matches.
    pub fn effective_start_index(&self, requested_index: usize) -> usize {
        for buf in self.buffers.iter().rev() {
            if buf.writers.contains(&requested_index) {
                if let Some(&earliest) = buf.writers.first() {
                    return earliest;
                }
            }
        }
        requested_index
    }

    /// Clears `readers`/`writers` entries `>= effective_start` on every
    /// buffer, so later reuse decisions reflect only the new suffix (§4.6).
    pub fn clear_provenance_from(&mut self, effective_start: usize) {
        for buf in self.buffers.iter_mut() {
            buf.clear_provenance_from(effective_start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_buf_appends_past_the_end() {
        let mut mgr = BufferManager::new();
        let idx = mgr.next_buf(&[4, 4, 4]);
        assert_eq!(idx, 0);
        assert_eq!(mgr.len(), 1);
        let idx2 = mgr.next_buf(&[4, 4, 4]);
        assert_eq!(idx2, 1);
        assert_eq!(mgr.len(), 2);
    }

    #[test]
    fn next_buf_resizes_in_place_on_shape_change() {
        let mut mgr = BufferManager::new();
        mgr.next_buf(&[2, 2, 4]);
        mgr.set_cursor(0);
        let resized = mgr.next_buf(&[8, 8, 4]);
        assert_eq!(resized, 1);
        mgr.set_cursor(1);
        let again = mgr.next_buf(&[16, 16, 4]);
        assert_eq!(again, 1);
        assert_eq!(mgr.get(1).shape(), &[16, 16, 4]);
        assert_eq!(mgr.len(), 2);
    }

    #[test]
    fn add_reader_and_writer_are_idempotent() {
        let mut mgr = BufferManager::new();
        mgr.next_buf(&[1, 1, 4]);
        mgr.add_reader(0, 3);
        mgr.add_reader(0, 3);
        mgr.add_writer(0, 2);
        mgr.add_writer(0, 2);
        assert_eq!(mgr.get(0).readers(), &[3]);
        assert_eq!(mgr.get(0).writers(), &[2]);
    }

    #[test]
    fn clear_after_drops_trailing_buffers() {
        let mut mgr = BufferManager::new();
        mgr.next_buf(&[1, 1, 4]);
        mgr.next_buf(&[1, 1, 4]);
        mgr.next_buf(&[1, 1, 4]);
        assert_eq!(mgr.len(), 3);
        mgr.clear_after(0);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn reset_drops_everything() {
        let mut mgr = BufferManager::new();
        mgr.next_buf(&[1, 1, 4]);
        mgr.reset();
        assert_eq!(mgr.len(), 0);
        assert!(mgr.current().is_none());
    }

    #[test]
    fn effective_start_index_walks_newest_to_oldest() {
        let mut mgr = BufferManager::new();
        mgr.next_buf(&[1, 1, 4]);
        mgr.add_writer(0, 2);
        mgr.next_buf(&[1, 1, 4]);
        mgr.add_writer(1, 5);
        assert_eq!(mgr.effective_start_index(5), 5);
        assert_eq!(mgr.effective_start_index(2), 2);
    }

    #[test]
    fn effective_start_index_falls_back_to_requested() {
        let mgr = BufferManager::new();
        assert_eq!(mgr.effective_start_index(7), 7);
    }
}
