//! Output capture for the companion script: an in-memory text accumulator
//! plus an append-mode log file, both fed by the stdout/stderr reader tasks.
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct OutputCapture {
    inner: Arc<Mutex<CaptureState>>,
}

struct CaptureState {
    text: String,
    sink: Option<File>,
    path: PathBuf,
}

impl OutputCapture {
    /// Open the log at `path` in append mode with an empty accumulator.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let sink = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(CaptureState {
                text: String::new(),
                sink: Some(sink),
                path: path.to_path_buf(),
            })),
        })
    }

    /// Append a chunk. Raw bytes go to the log; the accumulator gets lossy UTF-8.
    pub async fn write(&self, data: &[u8]) {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        state.text.push_str(&String::from_utf8_lossy(data));
        if let Some(ref mut sink) = state.sink {
            if let Err(e) = sink.write_all(data) {
                tracing::warn!(path = %state.path.display(), "failed to append script output: {e}");
            }
        }
    }

    /// The last `max_bytes` of captured text, cut forward to a char boundary.
    pub async fn tail(&self, max_bytes: usize) -> String {
        let state = self.inner.lock().await;
        let text = &state.text;
        if text.len() <= max_bytes {
            return text.clone();
        }
        let mut start = text.len() - max_bytes;
        while !text.is_char_boundary(start) {
            start += 1;
        }
        text[start..].to_string()
    }

    /// Flush and drop the log handle. Later writes only reach the accumulator.
    pub async fn close(&self) {
        let mut state = self.inner.lock().await;
        if let Some(mut sink) = state.sink.take() {
            let _ = sink.flush();
        }
    }

    #[cfg(test)]
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.sink.is_some()
    }
}

/// Copy a child stream into `output` until EOF or a read error.
pub async fn pipe_output<R: AsyncRead + Unpin>(mut reader: R, output: OutputCapture) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => output.write(&buf[..n]).await,
            Err(e) => {
                tracing::debug!("script output stream closed: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_reach_log_and_accumulator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let capture = OutputCapture::open(&path).unwrap();

        capture.write(b"first\n").await;
        capture.write(b"second\n").await;
        capture.close().await;

        assert_eq!(capture.tail(usize::MAX).await, "first\nsecond\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn log_is_appended_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");

        let a = OutputCapture::open(&path).unwrap();
        a.write(b"run one\n").await;
        a.close().await;

        let b = OutputCapture::open(&path).unwrap();
        b.write(b"run two\n").await;
        b.close().await;

        assert_eq!(b.tail(usize::MAX).await, "run two\n");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "run one\nrun two\n"
        );
    }

    #[tokio::test]
    async fn writes_after_close_skip_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let capture = OutputCapture::open(&path).unwrap();

        assert!(capture.is_open().await);
        capture.close().await;
        assert!(!capture.is_open().await);

        capture.write(b"late\n").await;
        assert_eq!(capture.tail(usize::MAX).await, "late\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_in_accumulator_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let capture = OutputCapture::open(&path).unwrap();

        capture.write(&[b'o', b'k', 0xff, b'\n']).await;
        capture.close().await;

        assert_eq!(capture.tail(usize::MAX).await, "ok\u{fffd}\n");
        assert_eq!(std::fs::read(&path).unwrap(), vec![b'o', b'k', 0xff, b'\n']);
    }

    #[tokio::test]
    async fn pipe_output_reads_to_eof() {
        let dir = tempfile::tempdir().unwrap();
        let capture = OutputCapture::open(&dir.path().join("out.log")).unwrap();

        let data: &[u8] = b"line a\nline b\n";
        pipe_output(data, capture.clone()).await;

        assert_eq!(capture.tail(usize::MAX).await, "line a\nline b\n");
    }

    #[tokio::test]
    async fn tail_keeps_only_the_newest_text() {
        let dir = tempfile::tempdir().unwrap();
        let capture = OutputCapture::open(&dir.path().join("out.log")).unwrap();

        capture.write(b"0123456789").await;
        assert_eq!(capture.tail(4).await, "6789");
        assert_eq!(capture.tail(10).await, "0123456789");
        assert_eq!(capture.tail(0).await, "");
    }

    #[tokio::test]
    async fn tail_does_not_split_a_character() {
        let dir = tempfile::tempdir().unwrap();
        let capture = OutputCapture::open(&dir.path().join("out.log")).unwrap();

        // "é" is two bytes; a 3-byte tail would start inside it.
        capture.write("aé!!".as_bytes()).await;
        assert_eq!(capture.tail(3).await, "!!");
        assert_eq!(capture.tail(4).await, "é!!");
    }

    #[test]
    fn open_in_missing_dir_fails() {
        let err = OutputCapture::open(Path::new("/nonexistent-dir/impossible/out.log"));
        assert!(err.is_err());
    }
}
