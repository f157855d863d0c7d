//! Output capture, truncation, and the shared state of background execs.

use std::sync::{OnceLock, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use super::cancel::CancelToken;
use super::error::ErrorKind;
use super::types::{ExecChunks, ExecHandle, ExecResult, OutputChunk, OutputStream};

/// Appended to output cut at its byte limit.
pub const TRUNCATION_SUFFIX: &str = "\n... [truncated]";

/// Cuts `output` to at most `limit` bytes on a char boundary and marks it.
///
/// Returns the (possibly shortened) text and whether it was cut.
fn truncate_output(output: &str, limit: usize) -> (String, bool) {
    if output.len() <= limit {
        return (output.to_string(), false);
    }
    let mut end = limit;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    let mut cut = String::with_capacity(end + TRUNCATION_SUFFIX.len());
    cut.push_str(&output[..end]);
    cut.push_str(TRUNCATION_SUFFIX);
    (cut, true)
}

/// Takes the decodable prefix of `pending`, leaving a split trailing
/// character for the next call. With `flush_all` everything is taken.
pub fn drain_utf8(pending: &mut Vec<u8>, flush_all: bool) -> String {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() && !flush_all => e.valid_up_to(),
        Err(_) => pending.len(),
    };
    let rest = pending.split_off(valid);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

/// Bounded buffer for one output stream.
///
/// Keeps at most `limit + 1` bytes, enough to know the stream overflowed.
#[derive(Debug)]
pub struct StreamCapture {
    buf: Vec<u8>,
    limit: usize,
}

impl StreamCapture {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_add(1).saturating_sub(self.buf.len());
        self.buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    /// Decodes and truncates the captured bytes.
    pub fn finish(self) -> (String, bool) {
        let overflowed = self.buf.len() > self.limit;
        let text = String::from_utf8_lossy(&self.buf);
        let (text, cut) = truncate_output(&text, self.limit);
        (text, cut || overflowed)
    }
}

/// Chunk text of one stream of a background exec, not yet published.
///
/// At most `limit` bytes are ever accepted. Past that the rest of the stream
/// is dropped and the last drained text ends with [`TRUNCATION_SUFFIX`].
#[derive(Debug)]
pub struct PendingText {
    pending: Vec<u8>,
    remaining: usize,
    cut: bool,
    marked: bool,
}

impl PendingText {
    pub fn new(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            remaining: limit,
            cut: false,
            marked: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if self.cut {
            return;
        }
        let take = bytes.len().min(self.remaining);
        self.pending.extend_from_slice(&bytes[..take]);
        self.remaining -= take;
        self.cut = take < bytes.len();
    }

    /// Takes the publishable text; see [`drain_utf8`] for `flush_all`.
    pub fn drain(&mut self, flush_all: bool) -> String {
        let mut text = drain_utf8(&mut self.pending, flush_all && !self.cut);
        if self.cut && !self.marked {
            // A character split by the cap is never completed.
            self.pending.clear();
            text.push_str(TRUNCATION_SUFFIX);
            self.marked = true;
        }
        text
    }
}

/// Shared state of one background exec.
///
/// The collector task appends chunks and publishes the result; readers and
/// waiters observe it concurrently.
#[derive(Debug)]
pub struct ExecState {
    pub handle: ExecHandle,
    chunks: RwLock<Vec<OutputChunk>>,
    result: OnceLock<ExecResult>,
    done: watch::Sender<bool>,
}

impl ExecState {
    pub fn new(handle: ExecHandle) -> Self {
        let (done, _rx) = watch::channel(false);
        Self {
            handle,
            chunks: RwLock::new(Vec::new()),
            result: OnceLock::new(),
            done,
        }
    }

    /// Appends a stdout chunk then a stderr chunk, skipping empty ones.
    pub fn append(&self, stdout: &str, stderr: &str) {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        for (stream, text) in [(OutputStream::Stdout, stdout), (OutputStream::Stderr, stderr)] {
            if text.is_empty() {
                continue;
            }
            let seq = i64::try_from(chunks.len()).unwrap_or(i64::MAX);
            chunks.push(OutputChunk {
                seq,
                stream,
                text: text.to_string(),
            });
        }
    }

    /// Publishes the final result and wakes every waiter.
    ///
    /// Only the first call has effect.
    pub fn finish(&self, result: ExecResult) {
        if self.result.set(result).is_ok() {
            self.done.send_replace(true);
        }
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Chunks with `seq > since_seq`, at most `max_chunks` when positive.
    ///
    /// `next_seq` is the sequence number the next appended chunk will get.
    pub fn read(&self, since_seq: i64, max_chunks: usize) -> ExecChunks {
        // Sample `done` first: once it is set every chunk is already in place.
        let done = self.is_done();
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let selected = chunks
            .iter()
            .filter(|c| c.seq > since_seq)
            .take(if max_chunks > 0 { max_chunks } else { usize::MAX })
            .cloned()
            .collect();
        ExecChunks {
            chunks: selected,
            done,
            next_seq: i64::try_from(chunks.len()).unwrap_or(i64::MAX),
        }
    }

    /// Waits for the result, the cancel token, or the timeout.
    pub async fn wait(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecResult, ErrorKind> {
        let mut rx = self.done.subscribe();
        tokio::select! {
            _ = rx.wait_for(|done| *done) => {
                self.result.get().cloned().ok_or(ErrorKind::Cancelled)
            }
            () = cancel.cancelled() => Err(ErrorKind::Cancelled),
            () = tokio::time::sleep(timeout) => Err(ErrorKind::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn state() -> ExecState {
        ExecState::new(ExecHandle {
            id: "exec-1".into(),
            session_id: "s1".into(),
            cmd: vec!["echo".into()],
            started_at: Utc::now(),
        })
    }

    #[test]
    fn test_truncate_at_limit_is_unchanged() {
        let (out, cut) = truncate_output("hello", 5);
        assert_eq!(out, "hello");
        assert!(!cut);
    }

    #[test]
    fn test_truncate_over_limit() {
        let (out, cut) = truncate_output("hello world", 5);
        assert_eq!(out, "hello\n... [truncated]");
        assert!(cut);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        // 'é' is two bytes; a cut at byte 2 would split it.
        let (out, cut) = truncate_output("aé-bc", 2);
        assert_eq!(out, "a\n... [truncated]");
        assert!(cut);
    }

    #[test]
    fn test_drain_utf8_keeps_split_char() {
        let euro = "€".as_bytes();
        let mut pending = b"ab".to_vec();
        pending.extend_from_slice(&euro[..2]);

        assert_eq!(drain_utf8(&mut pending, false), "ab");
        assert_eq!(pending, &euro[..2]);

        pending.extend_from_slice(&euro[2..]);
        assert_eq!(drain_utf8(&mut pending, false), "€");
        assert!(pending.is_empty());

        pending.push(0xE2);
        assert_eq!(drain_utf8(&mut pending, true), "\u{FFFD}");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_capture_bounds_memory() {
        let mut cap = StreamCapture::new(4);
        cap.push(b"abc");
        cap.push(b"defghij");
        assert_eq!(cap.buf.len(), 5);
        let (text, cut) = cap.finish();
        assert_eq!(text, "abcd\n... [truncated]");
        assert!(cut);
    }

    #[test]
    fn test_capture_within_limit() {
        let mut cap = StreamCapture::new(10);
        cap.push(b"ok\n");
        assert_eq!(cap.finish(), ("ok\n".to_string(), false));
    }

    #[test]
    fn test_capture_with_max_limit_keeps_input() {
        let mut cap = StreamCapture::new(usize::MAX);
        cap.push(b"abc");
        assert_eq!(cap.finish(), ("abc".to_string(), false));
    }

    #[test]
    fn test_pending_text_within_limit() {
        let mut text = PendingText::new(10);
        text.push(b"hello");
        assert_eq!(text.drain(false), "hello");
        text.push(b"!");
        assert_eq!(text.drain(true), "!");
        assert_eq!(text.drain(true), "");
    }

    #[test]
    fn test_pending_text_stops_at_limit() {
        let mut text = PendingText::new(4);
        text.push(b"abc");
        assert_eq!(text.drain(false), "abc");
        text.push(b"defgh");
        text.push(&[b'x'; 1 << 20]);
        assert!(text.pending.len() <= 1);
        assert_eq!(text.drain(false), "d\n... [truncated]");
        text.push(b"more");
        assert_eq!(text.drain(true), "");
    }

    #[test]
    fn test_pending_text_exact_fill_is_not_cut() {
        let mut text = PendingText::new(3);
        text.push(b"abc");
        assert_eq!(text.drain(true), "abc");
    }

    #[test]
    fn test_pending_text_drops_char_split_by_limit() {
        let mut text = PendingText::new(2);
        text.push("a€".as_bytes());
        assert_eq!(text.drain(true), "a\n... [truncated]");
    }

    #[test]
    fn test_chunks_are_gapless_stdout_first() {
        let st = state();
        st.append("a", "b");
        st.append("", "c");
        st.append("d", "");
        let snap = st.read(-1, 0);
        let seqs: Vec<i64> = snap.chunks.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(snap.chunks[0].stream, OutputStream::Stdout);
        assert_eq!(snap.chunks[1].stream, OutputStream::Stderr);
        assert_eq!(snap.next_seq, 4);
    }

    #[test]
    fn test_read_is_idempotent_and_never_redelivers() {
        let st = state();
        st.append("one", "");
        st.append("two", "");
        let first = st.read(-1, 0);
        let again = st.read(-1, 0);
        assert_eq!(first, again);

        let last = first.chunks.last().unwrap().seq;
        st.append("three", "");
        let next = st.read(last, 0);
        assert_eq!(next.chunks.len(), 1);
        assert_eq!(next.chunks[0].text, "three");
    }

    #[test]
    fn test_read_caps_chunks() {
        let st = state();
        for _ in 0..5 {
            st.append("x", "");
        }
        assert_eq!(st.read(-1, 2).chunks.len(), 2);
        assert_eq!(st.read(-1, 0).chunks.len(), 5);
    }

    #[tokio::test]
    async fn test_wait_sees_result_from_any_waiter() {
        let st = Arc::new(state());
        let cancel = CancelToken::new();
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let st = Arc::clone(&st);
            let cancel = cancel.clone();
            waiters.push(tokio::spawn(async move {
                st.wait(Duration::from_secs(5), &cancel).await
            }));
        }
        st.append("done\n", "");
        st.finish(ExecResult {
            id: "exec-1".into(),
            exit_code: 0,
            stdout: "done\n".into(),
            ..ExecResult::default()
        });
        for w in waiters {
            let res = w.await.unwrap().unwrap();
            assert_eq!(res.stdout, "done\n");
        }
        assert!(st.read(-1, 0).done);
    }

    #[tokio::test]
    async fn test_wait_timeout_and_cancel() {
        let st = state();
        let cancel = CancelToken::new();
        let err = st.wait(Duration::from_millis(20), &cancel).await.unwrap_err();
        assert!(matches!(err, ErrorKind::Timeout { timeout_ms: 20 }));

        cancel.cancel();
        let err = st.wait(Duration::from_secs(5), &cancel).await.unwrap_err();
        assert!(matches!(err, ErrorKind::Cancelled));
    }
}
