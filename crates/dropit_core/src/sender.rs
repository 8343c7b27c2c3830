/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use dropit_protocol::{FileMetadata, Frame, TransferMessage};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::net_metrics::TransferMetrics;
use crate::transport::DataChannel;
use crate::ui_events::{emit, Direction, UiEventKind, UiEventTx};

const DEFAULT_MIME: &str = "application/octet-stream";
const DRAIN_POLL: Duration = Duration::from_millis(10);
const DRAIN_MAX_WAIT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

#[derive(Clone, Debug)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub source: FileSource,
}

fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(DEFAULT_MIME)
        .to_string()
}

impl OutgoingFile {
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("stat {}", path.display()))?;
        if !meta.is_file() {
            anyhow::bail!("{} is not a regular file", path.display());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?;
        Ok(Self {
            mime_type: guess_mime(&name),
            name,
            size: meta.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let data = data.into();
        Self {
            mime_type: guess_mime(&name),
            size: data.len() as u64,
            name,
            source: FileSource::Memory(data),
        }
    }

    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
        }
    }
}

/// Files waiting to be sent, plus the cursor into the current one.
#[derive(Debug, Default)]
pub struct TransferQueue {
    files: Vec<OutgoingFile>,
    index: usize,
    offset: u64,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, file: OutgoingFile) {
        self.files.push(file);
    }

    pub fn current(&self) -> Option<&OutgoingFile> {
        self.files.get(self.index)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.files.len().saturating_sub(self.index)
    }

    /// Moves the byte cursor forward, never past the current file's end.
    pub fn advance(&mut self, n: u64) {
        let size = self.current().map(|f| f.size).unwrap_or(0);
        self.offset = self.offset.saturating_add(n).min(size);
    }

    pub fn next_file(&mut self) {
        if self.index < self.files.len() {
            self.index += 1;
        }
        self.offset = 0;
        // Drop sent entries once the queue is exhausted.
        if self.index == self.files.len() {
            self.files.clear();
            self.index = 0;
        }
    }
}

/// `(offset, len)` of each slice of a `size`-byte file cut at `chunk_size`.
pub fn chunk_ranges(size: u64, chunk_size: usize) -> impl Iterator<Item = (u64, usize)> {
    let step = chunk_size.max(1) as u64;
    (0..size)
        .step_by(step as usize)
        .map(move |off| (off, step.min(size - off) as usize))
}

/// Sequential slice reader over a file source.
enum SliceReader {
    File(tokio::fs::File),
    Memory(Bytes),
}

impl SliceReader {
    async fn open(name: &str, source: &FileSource) -> Result<Self, TransferError> {
        match source {
            FileSource::Path(p) => tokio::fs::File::open(p)
                .await
                .map(SliceReader::File)
                .map_err(|e| TransferError::Read {
                    name: name.to_string(),
                    source: e,
                }),
            FileSource::Memory(b) => Ok(SliceReader::Memory(b.clone())),
        }
    }

    async fn read_slice(&mut self, name: &str, offset: u64, len: usize, size: u64) -> Result<Bytes, TransferError> {
        match self {
            SliceReader::Memory(b) => {
                let start = offset as usize;
                let end = start + len;
                if end > b.len() {
                    return Err(TransferError::ShortRead {
                        name: name.to_string(),
                        offset: b.len() as u64,
                        size,
                    });
                }
                Ok(b.slice(start..end))
            }
            SliceReader::File(f) => {
                let mut buf = BytesMut::zeroed(len);
                let mut filled = 0;
                while filled < len {
                    let n = f.read(&mut buf[filled..]).await.map_err(|e| TransferError::Read {
                        name: name.to_string(),
                        source: e,
                    })?;
                    if n == 0 {
                        return Err(TransferError::ShortRead {
                            name: name.to_string(),
                            offset: offset + filled as u64,
                            size,
                        });
                    }
                    filled += n;
                }
                Ok(buf.freeze())
            }
        }
    }
}

/// Waits until `next_msg_size` more bytes fit under `high_watermark`.
///
/// Gives up after a bounded wait and lets the caller send anyway; a closed
/// channel is an error.
pub async fn wait_for_buffer_space(
    channel: &dyn DataChannel,
    next_msg_size: usize,
    high_watermark: usize,
) -> Result<(), TransferError> {
    let closed = || TransferError::ChannelClosed {
        label: channel.label(),
    };
    if !channel.is_open() {
        return Err(closed());
    }
    let Some(buffered) = channel.buffered_amount().await else {
        return Ok(());
    };
    if buffered + next_msg_size <= high_watermark {
        return Ok(());
    }
    debug!(
        channel = %channel.label(),
        buffered,
        next_msg = next_msg_size,
        high_watermark,
        "applying backpressure"
    );

    let deadline = Instant::now() + DRAIN_MAX_WAIT;
    loop {
        if !channel.is_open() {
            return Err(closed());
        }
        let buffered = channel.buffered_amount().await.unwrap_or(0);
        if buffered + next_msg_size <= high_watermark {
            return Ok(());
        }
        if Instant::now() >= deadline {
            warn!(
                channel = %channel.label(),
                buffered,
                "buffer did not drain in time, sending anyway"
            );
            return Ok(());
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Streams queued files over one data channel, one at a time.
pub struct SenderPipeline {
    channel: Arc<dyn DataChannel>,
    chunk_size: usize,
    high_watermark: usize,
    events: UiEventTx,
    metrics: Arc<TransferMetrics>,
    queue: TransferQueue,
}

impl SenderPipeline {
    pub fn new(
        channel: Arc<dyn DataChannel>,
        chunk_size: usize,
        high_watermark: usize,
        events: UiEventTx,
        metrics: Arc<TransferMetrics>,
    ) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            channel,
            chunk_size,
            high_watermark: high_watermark.max(chunk_size),
            events,
            metrics,
            queue: TransferQueue::new(),
        }
    }

    /// Sends every batch arriving on `feed` until it closes.
    ///
    /// `QueueFinished` is emitted each time the queue runs dry with nothing
    /// else waiting on the feed. A closed channel ends the pipeline and counts
    /// the unsent files as failed.
    pub async fn run(mut self, mut feed: mpsc::UnboundedReceiver<Vec<OutgoingFile>>) -> QueueSummary {
        let mut total = QueueSummary::default();
        let mut round = QueueSummary::default();
        loop {
            while let Ok(batch) = feed.try_recv() {
                batch.into_iter().for_each(|f| self.queue.enqueue(f));
            }

            if self.queue.current().is_none() {
                if round != QueueSummary::default() {
                    // Let the last bytes leave before reporting the batch done.
                    let _ = wait_for_buffer_space(self.channel.as_ref(), 0, 0).await;
                    info!(sent = round.sent, failed = round.failed, "send queue finished");
                    emit(
                        &self.events,
                        UiEventKind::QueueFinished {
                            sent: round.sent,
                            failed: round.failed,
                        },
                    );
                    round = QueueSummary::default();
                }
                match feed.recv().await {
                    Some(batch) => batch.into_iter().for_each(|f| self.queue.enqueue(f)),
                    None => break,
                }
                continue;
            }

            match self.send_current().await {
                Ok(()) => {
                    round.sent += 1;
                    total.sent += 1;
                }
                Err(e) => {
                    warn!("file skipped: {e}");
                    self.metrics.file_failed();
                    emit(&self.events, UiEventKind::Error { message: e.to_string() });
                    round.failed += 1;
                    total.failed += 1;
                    if let TransferError::ChannelClosed { .. } = e {
                        self.queue.next_file();
                        let rest = self.queue.remaining();
                        total.failed += rest;
                        round.failed += rest;
                        emit(
                            &self.events,
                            UiEventKind::QueueFinished {
                                sent: round.sent,
                                failed: round.failed,
                            },
                        );
                        return total;
                    }
                }
            }
            self.queue.next_file();
        }
        total
    }

    async fn send_frame(&self, name: &str, frame: Frame) -> Result<(), TransferError> {
        wait_for_buffer_space(self.channel.as_ref(), frame.len(), self.high_watermark).await?;
        self.channel
            .send_frame(&frame)
            .await
            .map(|_| ())
            .map_err(|e| TransferError::Send {
                name: name.to_string(),
                source: e,
            })
    }

    async fn send_current(&mut self) -> Result<(), TransferError> {
        let Some(file) = self.queue.current().cloned() else {
            return Ok(());
        };
        let name = file.name.as_str();
        debug!(%name, size = file.size, "sending file");

        // Nothing is announced for a file that cannot be opened.
        let mut reader = SliceReader::open(name, &file.source).await?;
        let meta = encode(name, TransferMessage::Metadata(file.metadata()))?;
        self.send_frame(name, meta).await?;

        if let Err(e) = self.send_chunks(&file, &mut reader).await {
            if !matches!(e, TransferError::ChannelClosed { .. }) {
                // Early end marker: the receiver reports the partial file as truncated.
                if let Ok(end) = encode(name, TransferMessage::End) {
                    let _ = self.send_frame(name, end).await;
                }
            }
            return Err(e);
        }

        self.send_frame(name, encode(name, TransferMessage::End)?).await?;
        self.metrics.file_sent();
        emit(
            &self.events,
            UiEventKind::FileSent {
                name: file.name.clone(),
                size: file.size,
            },
        );
        info!(%name, size = file.size, "file sent");
        Ok(())
    }

    async fn send_chunks(&mut self, file: &OutgoingFile, reader: &mut SliceReader) -> Result<(), TransferError> {
        let name = file.name.as_str();
        for (offset, len) in chunk_ranges(file.size, self.chunk_size) {
            debug_assert_eq!(offset, self.queue.offset());
            let data = reader.read_slice(name, offset, len, file.size).await?;
            self.send_frame(name, Frame::Binary(data)).await?;
            self.queue.advance(len as u64);
            emit(
                &self.events,
                UiEventKind::TransferProgress {
                    file_name: file.name.clone(),
                    bytes: self.queue.offset(),
                    total: file.size,
                    direction: Direction::Outgoing,
                },
            );
        }
        Ok(())
    }
}

fn encode(name: &str, msg: TransferMessage) -> Result<Frame, TransferError> {
    msg.encode().map_err(|e| TransferError::Encode {
        name: name.to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui_events::UiEvent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        frames: Mutex<Vec<Frame>>,
        closed: AtomicBool,
        buffered: AtomicUsize,
    }

    #[async_trait]
    impl DataChannel for RecordingChannel {
        fn label(&self) -> String {
            "fileTransfer".to_string()
        }
        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
        async fn send_frame(&self, frame: &Frame) -> anyhow::Result<usize> {
            if !self.is_open() {
                anyhow::bail!("closed");
            }
            self.frames.lock().unwrap().push(frame.clone());
            Ok(frame.len())
        }
        async fn buffered_amount(&self) -> Option<usize> {
            Some(self.buffered.load(Ordering::SeqCst))
        }
        async fn close(&self) -> anyhow::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pipeline(channel: Arc<RecordingChannel>, chunk: usize) -> (SenderPipeline, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let p = SenderPipeline::new(channel, chunk, 1024 * 1024, tx, Arc::new(TransferMetrics::new()));
        (p, rx)
    }

    async fn run_batch(p: SenderPipeline, files: Vec<OutgoingFile>) -> QueueSummary {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        feed_tx.send(files).unwrap();
        drop(feed_tx);
        p.run(feed_rx).await
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<UiEvent>) -> Vec<UiEventKind> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.kind);
        }
        out
    }

    #[test]
    fn chunk_ranges_cover_the_file() {
        assert_eq!(chunk_ranges(10, 4).collect::<Vec<_>>(), vec![(0, 4), (4, 4), (8, 2)]);
        assert_eq!(chunk_ranges(0, 4).count(), 0);
        for size in [0u64, 1, 7, 16, 17, 100] {
            for chunk in [1usize, 3, 16, 64] {
                let total: u64 = chunk_ranges(size, chunk).map(|(_, l)| l as u64).sum();
                assert_eq!(total, size);
                assert!(chunk_ranges(size, chunk).all(|(_, l)| l <= chunk && l > 0));
            }
        }
    }

    #[test]
    fn queue_cursor_is_bounded_and_resets() {
        let mut q = TransferQueue::new();
        q.enqueue(OutgoingFile::from_bytes("a", &b"1234"[..]));
        q.enqueue(OutgoingFile::from_bytes("b", &b"12"[..]));
        q.advance(3);
        q.advance(3);
        assert_eq!(q.offset(), 4);
        q.next_file();
        assert_eq!(q.offset(), 0);
        assert_eq!(q.current().unwrap().name, "b");
        q.next_file();
        assert!(q.current().is_none());
        assert_eq!(q.remaining(), 0);
    }

    #[test]
    fn mime_is_guessed_from_name() {
        assert_eq!(OutgoingFile::from_bytes("a.txt", Bytes::new()).mime_type, "text/plain");
        assert_eq!(
            OutgoingFile::from_bytes("blob", Bytes::new()).mime_type,
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn slices_file_at_chunk_size() {
        let ch = Arc::new(RecordingChannel::default());
        let (p, mut rx) = pipeline(ch.clone(), 4);
        let summary = run_batch(p, vec![OutgoingFile::from_bytes("a.txt", &b"ABCDEFGHIJ"[..])]).await;
        assert_eq!(summary, QueueSummary { sent: 1, failed: 0 });

        let frames = ch.frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 5);
        assert!(matches!(&frames[0], Frame::Text(t) if t.contains("\"size\":10")));
        assert_eq!(frames[1], Frame::Binary(Bytes::from_static(b"ABCD")));
        assert_eq!(frames[2], Frame::Binary(Bytes::from_static(b"EFGH")));
        assert_eq!(frames[3], Frame::Binary(Bytes::from_static(b"IJ")));
        assert_eq!(frames[4], TransferMessage::End.encode().unwrap());

        let events = drain(&mut rx);
        let progress: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                UiEventKind::TransferProgress { bytes, .. } => Some(*bytes),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![4, 8, 10]);
        assert!(matches!(events.last(), Some(UiEventKind::QueueFinished { sent: 1, failed: 0 })));
    }

    #[tokio::test]
    async fn empty_file_sends_metadata_and_end_only() {
        let ch = Arc::new(RecordingChannel::default());
        let (p, _rx) = pipeline(ch.clone(), 4);
        run_batch(p, vec![OutgoingFile::from_bytes("empty", Bytes::new())]).await;
        let frames = ch.frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], TransferMessage::End.encode().unwrap());
    }

    #[tokio::test]
    async fn unreadable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.bin");
        std::fs::write(&path, b"soon deleted").unwrap();
        let vanished = OutgoingFile::from_path(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let ok_path = dir.path().join("ok.txt");
        std::fs::write(&ok_path, b"hello").unwrap();
        let ok = OutgoingFile::from_path(&ok_path).await.unwrap();
        assert_eq!(ok.size, 5);
        assert_eq!(ok.mime_type, "text/plain");

        let ch = Arc::new(RecordingChannel::default());
        let (p, mut rx) = pipeline(ch.clone(), 2);
        let summary = run_batch(p, vec![vanished, ok]).await;
        assert_eq!(summary, QueueSummary { sent: 1, failed: 1 });

        let frames = ch.frames.lock().unwrap().clone();
        // The failed file is never announced; only the second file goes out.
        assert!(!frames
            .iter()
            .any(|f| matches!(f, Frame::Text(t) if t.contains("gone.bin"))));
        assert!(matches!(&frames[0], Frame::Text(t) if t.contains("ok.txt")));
        let body: Vec<u8> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Binary(b) => Some(b.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(body, b"hello");
        assert_eq!(frames.last(), Some(&TransferMessage::End.encode().unwrap()));

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, UiEventKind::Error { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEventKind::FileSent { name, size: 5 } if name == "ok.txt")));
    }

    #[tokio::test]
    async fn file_shrinking_mid_send_is_closed_with_end_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shrinks.bin");
        std::fs::write(&path, b"abcdefghijkl").unwrap();
        let shrinking = OutgoingFile::from_path(&path).await.unwrap();
        std::fs::write(&path, b"abc").unwrap();

        let ch = Arc::new(RecordingChannel::default());
        let (p, mut rx) = pipeline(ch.clone(), 2);
        let summary = run_batch(p, vec![shrinking, OutgoingFile::from_bytes("next", &b"xy"[..])]).await;
        assert_eq!(summary, QueueSummary { sent: 1, failed: 1 });

        let frames = ch.frames.lock().unwrap().clone();
        let end = TransferMessage::End.encode().unwrap();
        assert!(matches!(&frames[0], Frame::Text(t) if t.contains("\"size\":12")));
        assert_eq!(frames[1], Frame::Binary(Bytes::from_static(b"ab")));
        assert_eq!(frames[2], end);
        assert!(matches!(&frames[3], Frame::Text(t) if t.contains("next")));
        assert_eq!(frames[4], Frame::Binary(Bytes::from_static(b"xy")));
        assert_eq!(frames[5], end);
        assert_eq!(frames.len(), 6);

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEventKind::Error { message } if message.contains("shrinks.bin"))));
    }

    #[tokio::test]
    async fn closed_channel_fails_remaining_files() {
        let ch = Arc::new(RecordingChannel::default());
        ch.closed.store(true, Ordering::SeqCst);
        let (p, _rx) = pipeline(ch.clone(), 4);
        let summary = run_batch(
            p,
            vec![
                OutgoingFile::from_bytes("a", &b"1"[..]),
                OutgoingFile::from_bytes("b", &b"2"[..]),
                OutgoingFile::from_bytes("c", &b"3"[..]),
            ],
        )
        .await;
        assert_eq!(summary, QueueSummary { sent: 0, failed: 3 });
        assert!(ch.frames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backpressure_gives_up_when_channel_closes() {
        let ch = Arc::new(RecordingChannel::default());
        ch.buffered.store(10_000, Ordering::SeqCst);
        let waiter = {
            let ch = ch.clone();
            tokio::spawn(async move { wait_for_buffer_space(ch.as_ref(), 100, 1000).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        ch.closed.store(true, Ordering::SeqCst);
        assert!(matches!(
            waiter.await.unwrap(),
            Err(TransferError::ChannelClosed { .. })
        ));

        let open = RecordingChannel::default();
        open.buffered.store(100, Ordering::SeqCst);
        assert!(wait_for_buffer_space(&open, 100, 1000).await.is_ok());
    }
}
