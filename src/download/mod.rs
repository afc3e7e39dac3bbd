//! Installer download: stream to disk, verify, hand off to the OS.
//!
//! One session runs per [`ReleaseDownloader::start`] call. Every session
//! emits `DownloadStarted`, zero or more `DownloadProgress` events with
//! strictly increasing byte counts, and exactly one terminal event.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::engine::models::ReleaseRecord;
use crate::engine::sink::EventSink;
use crate::engine::state::{DownloadOutcome, FailureKind, UpdateEvent};
use crate::error::UpdateError;
use crate::networking::{NetworkClient, Payload};
use crate::process::InstallerLauncher;
use crate::util::{cancel_requested, progress_percent};

pub mod verify;

/// Worker-owned state of one download.
#[derive(Debug)]
pub struct DownloadSession {
    pub record: ReleaseRecord,
    pub destination: PathBuf,
    pub bytes_transferred: u64,
    /// 0 when neither the manifest nor the server knows the size.
    pub total_bytes: u64,
    pub outcome: DownloadOutcome,
    cancel: Arc<AtomicBool>,
}

impl DownloadSession {
    fn new(record: ReleaseRecord, destination: PathBuf, cancel: Arc<AtomicBool>) -> Self {
        Self {
            total_bytes: record.size_bytes,
            record,
            destination,
            bytes_transferred: 0,
            outcome: DownloadOutcome::Running,
            cancel,
        }
    }

    pub fn cancel_requested(&self) -> bool {
        cancel_requested(&self.cancel)
    }
}

/// Caller's side of a running download.
pub struct DownloadHandle {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<DownloadOutcome>,
}

impl DownloadHandle {
    /// Ask the worker to stop at the next chunk boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to reach its terminal outcome.
    pub async fn wait(self) -> DownloadOutcome {
        self.task.await.unwrap_or_else(|err| {
            error!("download: worker task failed: {err}");
            DownloadOutcome::FailedIo
        })
    }
}

#[derive(Clone)]
pub struct ReleaseDownloader {
    network: NetworkClient,
    sink: Arc<dyn EventSink>,
    launcher: Arc<dyn InstallerLauncher>,
    destination: PathBuf,
    chunk_size: usize,
}

impl ReleaseDownloader {
    pub fn new(
        network: NetworkClient,
        sink: Arc<dyn EventSink>,
        launcher: Arc<dyn InstallerLauncher>,
        destination: PathBuf,
        chunk_size: usize,
    ) -> Self {
        Self {
            network,
            sink,
            launcher,
            destination,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Spawn a download worker for `record` on the current tokio runtime.
    pub fn start(&self, record: ReleaseRecord) -> DownloadHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        let worker = self.clone();
        let flag = cancel.clone();
        let task = tokio::spawn(async move { worker.run(record, flag).await });
        DownloadHandle { cancel, task }
    }

    pub fn cancel(handle: &DownloadHandle) {
        handle.cancel();
    }

    /// Run one session to completion on the calling task.
    pub async fn run(&self, record: ReleaseRecord, cancel: Arc<AtomicBool>) -> DownloadOutcome {
        let url = record.download_url.clone();
        let network = self.network.clone();
        self.run_with(record, cancel, async move { network.open_payload(&url).await })
            .await
    }

    async fn run_with<F>(
        &self,
        record: ReleaseRecord,
        cancel: Arc<AtomicBool>,
        open_payload: F,
    ) -> DownloadOutcome
    where
        F: Future<Output = Result<Payload, UpdateError>>,
    {
        info!(
            "download: starting {} ({}) from {}",
            record.version_name, record.version_code, record.download_url
        );
        info!("download: saving to {}", self.destination.display());
        self.sink.emit(UpdateEvent::DownloadStarted {
            version_name: record.version_name.clone(),
        });

        let mut session = DownloadSession::new(record, self.destination.clone(), cancel);
        let result = self.download_and_install(&mut session, open_payload).await;
        self.finish(&mut session, result);
        session.outcome
    }

    async fn download_and_install<F>(
        &self,
        session: &mut DownloadSession,
        open_payload: F,
    ) -> Result<(), UpdateError>
    where
        F: Future<Output = Result<Payload, UpdateError>>,
    {
        let mut file = create_destination(&session.destination).await?;
        let payload = open_payload.await?;
        if session.total_bytes == 0 {
            session.total_bytes = payload.content_length.unwrap_or(0);
        }
        debug!(
            "download: expecting {} bytes in chunks of {}",
            session.total_bytes, self.chunk_size
        );

        let transferred = transfer(
            payload.reader,
            &mut file,
            session,
            self.chunk_size,
            self.sink.as_ref(),
        )
        .await;
        // Partial data must reach the disk too, cancelled or not.
        let flushed = file
            .flush()
            .await
            .map_err(|e| UpdateError::DownloadIo(format!("flush error: {e}")));
        drop(file);
        transferred?;
        flushed?;

        info!("download: verifying {}", session.destination.display());
        let path = session.destination.clone();
        let expected = session.record.checksum.clone();
        tokio::task::spawn_blocking(move || verify::verify_checksum(&path, &expected))
            .await
            .map_err(|e| UpdateError::DownloadIo(format!("checksum task failed: {e}")))??;

        self.launcher.launch(&session.destination)
    }

    fn finish(&self, session: &mut DownloadSession, result: Result<(), UpdateError>) {
        let event = match result {
            Ok(()) => {
                session.outcome = DownloadOutcome::Succeeded;
                info!(
                    "download: {} verified and installer launched",
                    session.record.version_name
                );
                UpdateEvent::DownloadSucceeded {
                    installer: session.destination.clone(),
                }
            }
            Err(UpdateError::Cancelled) => {
                session.outcome = DownloadOutcome::Cancelled;
                let percent = progress_percent(session.bytes_transferred, session.total_bytes)
                    .map(|p| format!(" ({p:.0}%)"))
                    .unwrap_or_default();
                warn!(
                    "download: cancelled after {} bytes{percent}; partial file kept at {}",
                    session.bytes_transferred,
                    session.destination.display()
                );
                UpdateEvent::DownloadCancelled {
                    bytes_transferred: session.bytes_transferred,
                }
            }
            Err(err) => {
                let kind = err.failure_kind();
                session.outcome = match kind {
                    FailureKind::Checksum => DownloadOutcome::FailedChecksum,
                    FailureKind::Io => DownloadOutcome::FailedIo,
                };
                error!("download: {err}");
                UpdateEvent::DownloadFailed {
                    kind,
                    message: err.to_string(),
                }
            }
        };
        self.sink.emit(event);
    }
}

async fn create_destination(path: &Path) -> Result<fs::File, UpdateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| UpdateError::DownloadOpen(format!("failed to create download dir: {e}")))?;
    }
    fs::File::create(path)
        .await
        .map_err(|e| UpdateError::DownloadOpen(format!("failed to create {}: {e}", path.display())))
}

/// Copy `reader` into `writer` one chunk at a time, reporting progress.
///
/// The cancel flag is checked before every read; an in-flight read or write
/// is never interrupted.
pub async fn transfer<R, W>(
    mut reader: R,
    writer: &mut W,
    session: &mut DownloadSession,
    chunk_size: usize,
    sink: &dyn EventSink,
) -> Result<(), UpdateError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        if session.cancel_requested() {
            return Err(UpdateError::Cancelled);
        }
        let read = reader
            .read(&mut buf)
            .await
            .map_err(|e| UpdateError::DownloadIo(format!("read error: {e}")))?;
        if read == 0 {
            break;
        }
        write_chunk(writer, &buf[..read]).await?;
        session.bytes_transferred += read as u64;
        sink.emit(UpdateEvent::DownloadProgress {
            bytes_transferred: session.bytes_transferred,
            total_bytes: session.total_bytes,
        });
    }
    debug!("download: stream ended after {} bytes", session.bytes_transferred);
    Ok(())
}

// Short writes are retried until the whole chunk is accepted.
async fn write_chunk<W>(writer: &mut W, chunk: &[u8]) -> Result<(), UpdateError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while written < chunk.len() {
        let n = writer
            .write(&chunk[written..])
            .await
            .map_err(|e| UpdateError::DownloadIo(format!("write error: {e}")))?;
        if n == 0 {
            return Err(UpdateError::DownloadIo(
                "write error: destination accepted no bytes".into(),
            ));
        }
        written += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use sha2::{Digest, Sha256};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::engine::sink::CollectingSink;
    use crate::process::testing::RecordingLauncher;

    fn payload_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn sha256_hex(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    fn record(size: u64, checksum: &str) -> ReleaseRecord {
        ReleaseRecord {
            version_code: 5,
            version_name: "1.0".into(),
            download_url: "http://x/a.bin".into(),
            size_bytes: size,
            display_name: "Build A".into(),
            comment: "notes".into(),
            checksum: checksum.into(),
        }
    }

    fn in_memory(data: Vec<u8>) -> impl Future<Output = Result<Payload, UpdateError>> {
        async move {
            Ok(Payload {
                reader: Box::pin(io::Cursor::new(data)),
                content_length: None,
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        sink: Arc<CollectingSink>,
        launcher: Arc<RecordingLauncher>,
        downloader: ReleaseDownloader,
    }

    fn fixture_with(
        launcher: RecordingLauncher,
        sink: Arc<dyn EventSink>,
        chunk: usize,
    ) -> (tempfile::TempDir, Arc<RecordingLauncher>, ReleaseDownloader) {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(launcher);
        let downloader = ReleaseDownloader::new(
            NetworkClient::new(Duration::from_secs(5)),
            sink,
            launcher.clone(),
            dir.path().join("droidpad-update"),
            chunk,
        );
        (dir, launcher, downloader)
    }

    fn fixture(chunk: usize) -> Fixture {
        let sink = Arc::new(CollectingSink::new());
        let (dir, launcher, downloader) =
            fixture_with(RecordingLauncher::default(), sink.clone(), chunk);
        Fixture {
            _dir: dir,
            sink,
            launcher,
            downloader,
        }
    }

    fn progress_totals(events: &[UpdateEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|event| match event {
                UpdateEvent::DownloadProgress {
                    bytes_transferred, ..
                } => Some(*bytes_transferred),
                _ => None,
            })
            .collect()
    }

    /// Raises the cancel flag once progress reaches `after` bytes.
    struct CancellingSink {
        inner: CollectingSink,
        flag: Arc<AtomicBool>,
        after: u64,
    }

    impl EventSink for CancellingSink {
        fn emit(&self, event: UpdateEvent) {
            if let UpdateEvent::DownloadProgress {
                bytes_transferred, ..
            } = &event
                && *bytes_transferred >= self.after
            {
                self.flag.store(true, Ordering::SeqCst);
            }
            self.inner.emit(event);
        }
    }

    #[tokio::test]
    async fn reports_each_chunk_then_one_terminal_event() {
        let data = payload_bytes(1000);
        let fx = fixture(200);
        let outcome = fx
            .downloader
            .run_with(
                record(1000, &sha256_hex(&data)),
                Arc::new(AtomicBool::new(false)),
                in_memory(data.clone()),
            )
            .await;

        assert_eq!(outcome, DownloadOutcome::Succeeded);
        let events = fx.sink.events();
        assert_eq!(progress_totals(&events), vec![200, 400, 600, 800, 1000]);
        assert!(matches!(events.first(), Some(UpdateEvent::DownloadStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(UpdateEvent::DownloadSucceeded { .. })
        ));
        assert_eq!(events.iter().filter(|e| e.is_download_terminal()).count(), 1);
        for event in &events {
            if let UpdateEvent::DownloadProgress { total_bytes, .. } = event {
                assert_eq!(*total_bytes, 1000);
            }
        }
        assert_eq!(fx.launcher.calls(), vec![fx.downloader.destination().to_path_buf()]);
        assert_eq!(std::fs::read(fx.downloader.destination()).unwrap(), data);
    }

    #[tokio::test]
    async fn checksum_mismatch_never_launches() {
        let data = payload_bytes(1000);
        let fx = fixture(200);
        let outcome = fx
            .downloader
            .run_with(
                record(1000, &"0".repeat(64)),
                Arc::new(AtomicBool::new(false)),
                in_memory(data.clone()),
            )
            .await;

        assert_eq!(outcome, DownloadOutcome::FailedChecksum);
        assert!(fx.launcher.calls().is_empty());
        let events = fx.sink.events();
        assert!(matches!(
            events.last(),
            Some(UpdateEvent::DownloadFailed {
                kind: FailureKind::Checksum,
                ..
            })
        ));
        // Kept on disk for diagnostics.
        assert_eq!(std::fs::read(fx.downloader.destination()).unwrap(), data);
    }

    #[tokio::test]
    async fn short_checksum_from_manifest_fails_closed() {
        let fx = fixture(200);
        let outcome = fx
            .downloader
            .run_with(
                record(4, "deadbeef"),
                Arc::new(AtomicBool::new(false)),
                in_memory(vec![1, 2, 3, 4]),
            )
            .await;
        assert_eq!(outcome, DownloadOutcome::FailedChecksum);
        assert!(fx.launcher.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_after_second_chunk_keeps_partial_file() {
        let data = payload_bytes(1000);
        let flag = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(CancellingSink {
            inner: CollectingSink::new(),
            flag: flag.clone(),
            after: 400,
        });
        let (_dir, launcher, downloader) =
            fixture_with(RecordingLauncher::default(), sink.clone(), 200);

        let outcome = downloader
            .run_with(record(1000, &sha256_hex(&data)), flag, in_memory(data.clone()))
            .await;

        assert_eq!(outcome, DownloadOutcome::Cancelled);
        let events = sink.inner.events();
        assert_eq!(progress_totals(&events), vec![200, 400]);
        assert_eq!(
            events.last(),
            Some(&UpdateEvent::DownloadCancelled {
                bytes_transferred: 400
            })
        );
        assert!(launcher.calls().is_empty());
        assert_eq!(std::fs::read(downloader.destination()).unwrap(), &data[..400]);
    }

    #[tokio::test]
    async fn unknown_size_reports_zero_total() {
        let data = payload_bytes(300);
        let fx = fixture(128);
        let outcome = fx
            .downloader
            .run_with(
                record(0, &sha256_hex(&data)),
                Arc::new(AtomicBool::new(false)),
                in_memory(data),
            )
            .await;
        assert_eq!(outcome, DownloadOutcome::Succeeded);
        let events = fx.sink.events();
        assert_eq!(progress_totals(&events), vec![128, 256, 300]);
        assert!(events.iter().all(|e| !matches!(
            e,
            UpdateEvent::DownloadProgress { total_bytes, .. } if *total_bytes != 0
        )));
    }

    #[tokio::test]
    async fn open_failure_is_immediate_io_failure() {
        let fx = fixture(200);
        let outcome = fx
            .downloader
            .run_with(record(10, &"0".repeat(32)), Arc::new(AtomicBool::new(false)), async {
                Err(UpdateError::DownloadOpen("payload not available: 404".into()))
            })
            .await;

        assert_eq!(outcome, DownloadOutcome::FailedIo);
        let events = fx.sink.events();
        assert_eq!(events.len(), 2);
        assert!(progress_totals(&events).is_empty());
        assert!(matches!(
            events[1],
            UpdateEvent::DownloadFailed {
                kind: FailureKind::Io,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn launch_failure_ends_session_as_io_failure() {
        let data = payload_bytes(64);
        let sink = Arc::new(CollectingSink::new());
        let (_dir, launcher, downloader) =
            fixture_with(RecordingLauncher::failing(), sink.clone(), 32);
        let outcome = downloader
            .run_with(
                record(64, &sha256_hex(&data)),
                Arc::new(AtomicBool::new(false)),
                in_memory(data),
            )
            .await;
        assert_eq!(outcome, DownloadOutcome::FailedIo);
        assert_eq!(launcher.calls().len(), 1);
        assert!(matches!(
            sink.events().last(),
            Some(UpdateEvent::DownloadFailed {
                kind: FailureKind::Io,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn downloads_over_http_via_start() {
        let data = payload_bytes(5000);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/setup.exe"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .mount(&server)
            .await;

        let fx = fixture(1024);
        let mut rec = record(0, &sha256_hex(&data).to_uppercase());
        rec.download_url = format!("{}/setup.exe", server.uri());
        let handle = fx.downloader.start(rec);
        assert_eq!(handle.wait().await, DownloadOutcome::Succeeded);

        let events = fx.sink.events();
        let totals = progress_totals(&events);
        assert_eq!(totals.last(), Some(&5000));
        assert!(totals.windows(2).all(|pair| pair[0] < pair[1]));
        // Size came from Content-Length because the manifest said 0.
        assert!(events.iter().any(|e| matches!(
            e,
            UpdateEvent::DownloadProgress { total_bytes: 5000, .. }
        )));
        assert_eq!(fx.launcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn http_error_status_fails_without_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fx = fixture(1024);
        let mut rec = record(10, &"0".repeat(64));
        rec.download_url = format!("{}/missing.exe", server.uri());
        let outcome = fx.downloader.run(rec, Arc::new(AtomicBool::new(false))).await;

        assert_eq!(outcome, DownloadOutcome::FailedIo);
        assert!(progress_totals(&fx.sink.events()).is_empty());
        assert!(fx.launcher.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_before_first_chunk_transfers_nothing() {
        let fx = fixture(200);
        let flag = Arc::new(AtomicBool::new(true));
        let outcome = fx
            .downloader
            .run_with(record(10, &"0".repeat(64)), flag, in_memory(vec![9; 10]))
            .await;
        assert_eq!(outcome, DownloadOutcome::Cancelled);
        assert!(progress_totals(&fx.sink.events()).is_empty());
        assert_eq!(std::fs::read(fx.downloader.destination()).unwrap().len(), 0);
    }

    /// Accepts at most `limit` bytes per write call.
    struct TrickleWriter {
        data: Vec<u8>,
        limit: usize,
        calls: usize,
    }

    impl AsyncWrite for TrickleWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            self.calls += 1;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Yields one good chunk, then fails.
    struct BrokenReader {
        served: bool,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.served {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset",
                )));
            }
            self.served = true;
            buf.put_slice(&[1, 2, 3]);
            Poll::Ready(Ok(()))
        }
    }

    fn session(cancel: bool) -> DownloadSession {
        DownloadSession::new(
            record(0, ""),
            PathBuf::from("unused"),
            Arc::new(AtomicBool::new(cancel)),
        )
    }

    #[tokio::test]
    async fn short_writes_are_retried_until_chunk_is_flushed() {
        let data = payload_bytes(100);
        let mut writer = TrickleWriter {
            data: Vec::new(),
            limit: 7,
            calls: 0,
        };
        let sink = CollectingSink::new();
        let mut session = session(false);
        transfer(&data[..], &mut writer, &mut session, 50, &sink)
            .await
            .unwrap();
        assert_eq!(writer.data, data);
        assert!(writer.calls > 2);
        assert_eq!(progress_totals(&sink.events()), vec![50, 100]);
    }

    #[tokio::test]
    async fn zero_length_write_is_io_error() {
        let mut writer = TrickleWriter {
            data: Vec::new(),
            limit: 0,
            calls: 0,
        };
        let sink = CollectingSink::new();
        let mut session = session(false);
        let result = transfer(&[1u8, 2, 3][..], &mut writer, &mut session, 8, &sink).await;
        assert!(matches!(result, Err(UpdateError::DownloadIo(_))));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn read_error_mid_transfer_is_io_error() {
        let mut out = Vec::new();
        let sink = CollectingSink::new();
        let mut session = session(false);
        let result = transfer(
            BrokenReader { served: false },
            &mut out,
            &mut session,
            8,
            &sink,
        )
        .await;
        assert!(matches!(result, Err(UpdateError::DownloadIo(_))));
        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(session.bytes_transferred, 3);
        assert_eq!(progress_totals(&sink.events()), vec![3]);
    }

    #[tokio::test]
    async fn handle_cancel_stops_worker_before_first_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![5u8; 64]))
            .mount(&server)
            .await;

        let fx = fixture(16);
        let mut rec = record(64, &"0".repeat(64));
        rec.download_url = format!("{}/setup.exe", server.uri());
        let handle = fx.downloader.start(rec);
        // The single-threaded test runtime has not polled the worker yet.
        ReleaseDownloader::cancel(&handle);
        assert_eq!(handle.wait().await, DownloadOutcome::Cancelled);
        assert!(fx.launcher.calls().is_empty());
        assert_eq!(
            fx.sink.events().last(),
            Some(&UpdateEvent::DownloadCancelled {
                bytes_transferred: 0
            })
        );
    }
}
