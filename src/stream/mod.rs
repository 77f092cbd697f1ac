pub mod decoder;
pub mod sentinel;
pub mod sse;
pub mod watchdog;

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use smallvec::SmallVec;
use tokio::time::Instant;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::lifecycle::StreamPermit;
use crate::observability::log_stream_finished;

pub use decoder::Utf8ChunkDecoder;
pub use sentinel::{ScanOutcome, SentinelScanner};
pub use sse::{done_frame, FrameBoundary};
pub use watchdog::Watchdog;

/// Why a relayed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    SentinelFound,
    UpstreamClosed,
    InactivityTimeout,
    UpstreamError,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCause::SentinelFound => write!(f, "sentinel_found"),
            TerminationCause::UpstreamClosed => write!(f, "upstream_closed"),
            TerminationCause::InactivityTimeout => write!(f, "inactivity_timeout"),
            TerminationCause::UpstreamError => write!(f, "upstream_error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    AwaitingFirstChunk,
    Relaying,
    Terminated(TerminationCause),
}

/// Per-stream settings taken from the relay config.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub sentinel: String,
    pub inactivity_window: Duration,
    pub first_chunk_timeout: Duration,
}

impl StreamSettings {
    #[must_use]
    pub fn from_relay(relay: &RelayConfig) -> Self {
        Self {
            sentinel: relay.sentinel.clone(),
            inactivity_window: relay.inactivity_timeout(),
            first_chunk_timeout: relay.first_chunk_timeout(),
        }
    }
}

/// Output queue; a terminal transition can produce several pieces at once.
struct PendingBytes {
    chunks: SmallVec<[Bytes; 4]>,
    head: usize,
}

impl PendingBytes {
    #[inline]
    fn new() -> Self {
        Self {
            chunks: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn push(&mut self, chunk: Bytes) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<Bytes> {
        if self.head >= self.chunks.len() {
            return None;
        }
        let chunk = std::mem::take(&mut self.chunks[self.head]);
        self.head += 1;
        if self.head == self.chunks.len() {
            self.chunks.clear();
            self.head = 0;
        }
        Some(chunk)
    }
}

enum UpstreamEvent<E> {
    Chunk(Bytes),
    Failed(E),
    Ended,
    Stalled,
}

/// Live relay of one event-stream response.
///
/// Decodes upstream chunks incrementally, strips the sentinel, ends the stream
/// when the sentinel appears, and force-ends it when the upstream goes quiet for
/// longer than the inactivity window. Every exit runs through [`Self::finish`],
/// which emits the `data: [DONE]` marker exactly once.
pub struct StreamTransducer<S> {
    upstream: Option<Pin<Box<S>>>,
    phase: StreamPhase,
    decoder: Utf8ChunkDecoder,
    scanner: SentinelScanner,
    watchdog: Watchdog,
    framing: FrameBoundary,
    pending: PendingBytes,
    permit: Option<StreamPermit>,
    relayed_bytes: u64,
    started_at: Instant,
}

impl<S, E> StreamTransducer<S>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    /// Read the first non-empty chunk and decide whether the stream is worth opening.
    ///
    /// Nothing has been sent to the client yet, so failures here are still
    /// ordinary error responses.
    ///
    /// # Errors
    ///
    /// [`RelayError::EmptyStream`] when upstream ends or stays silent past the
    /// first-chunk timeout, [`RelayError::UpstreamFetch`] on a read error, and
    /// [`RelayError::StreamClosedImmediately`] when the first chunk is a bare
    /// `[DONE]` with no content.
    pub async fn start(
        upstream: S,
        settings: &StreamSettings,
        permit: Option<StreamPermit>,
    ) -> Result<Self, RelayError> {
        let mut upstream = Box::pin(upstream);
        let first = tokio::time::timeout(
            settings.first_chunk_timeout,
            next_non_empty(upstream.as_mut()),
        )
        .await;
        let first = match first {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(err))) => return Err(RelayError::UpstreamFetch(err.to_string())),
            Ok(None) => return Err(RelayError::EmptyStream),
            Err(_) => {
                tracing::warn!(
                    timeout = ?settings.first_chunk_timeout,
                    "no first chunk from upstream"
                );
                return Err(RelayError::EmptyStream);
            }
        };

        let mut session = Self {
            upstream: Some(upstream),
            phase: StreamPhase::AwaitingFirstChunk,
            decoder: Utf8ChunkDecoder::new(),
            scanner: SentinelScanner::new(&settings.sentinel),
            watchdog: Watchdog::new(settings.inactivity_window),
            framing: FrameBoundary::new(),
            pending: PendingBytes::new(),
            permit,
            relayed_bytes: 0,
            started_at: Instant::now(),
        };

        let text = session.decoder.decode(&first);
        if sse::is_payloadless_close(&text) {
            return Err(RelayError::StreamClosedImmediately);
        }

        session.phase = StreamPhase::Relaying;
        session.relay_text(&text);
        Ok(session)
    }

    /// Next piece of client output, or `None` once the terminal marker is out.
    pub async fn next_output(&mut self) -> Option<Bytes> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(chunk);
            }
            if self.is_terminated() {
                // marker delivered; shutdown may proceed
                self.permit = None;
                return None;
            }
            let Some(upstream) = self.upstream.as_mut() else {
                self.finish(TerminationCause::UpstreamClosed);
                continue;
            };

            let event = tokio::select! {
                biased;
                item = upstream.next() => match item {
                    Some(Ok(chunk)) => UpstreamEvent::Chunk(chunk),
                    Some(Err(err)) => UpstreamEvent::Failed(err),
                    None => UpstreamEvent::Ended,
                },
                () = self.watchdog.expired() => UpstreamEvent::Stalled,
            };

            match event {
                UpstreamEvent::Chunk(chunk) => {
                    let text = self.decoder.decode(&chunk);
                    self.relay_text(&text);
                }
                UpstreamEvent::Failed(err) => {
                    tracing::debug!(error = %err, "upstream stream read failed");
                    self.finish(TerminationCause::UpstreamError);
                }
                UpstreamEvent::Ended => self.finish(TerminationCause::UpstreamClosed),
                UpstreamEvent::Stalled => self.finish(TerminationCause::InactivityTimeout),
            }
        }
    }

    /// Turn the session into the client body stream.
    pub fn into_body_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        futures_util::stream::unfold(self, |mut session| async move {
            let chunk = session.next_output().await?;
            Some((chunk, session))
        })
    }
}

impl<S> StreamTransducer<S> {
    /// The single terminal transition. Later calls are no-ops.
    ///
    /// Cancels the watchdog, releases the upstream, flushes held text (except
    /// after a sentinel, where the rest of the stream is discarded), and queues
    /// the terminal marker on its own event. The gate permit is held until
    /// [`Self::next_output`] has handed out that marker.
    pub fn finish(&mut self, cause: TerminationCause) {
        if self.is_terminated() {
            return;
        }
        self.watchdog.cancel();
        self.upstream = None;

        if cause == TerminationCause::SentinelFound {
            let _ = self.decoder.flush();
            let _ = self.scanner.take_carry();
        } else {
            let mut tail = self.scanner.take_carry();
            if let Some(rest) = self.decoder.flush() {
                tail.push_str(&rest);
            }
            self.emit(tail.into_bytes());
        }

        let separator = self.framing.separator_needed();
        if !separator.is_empty() {
            self.emit(separator.as_bytes().to_vec());
        }
        self.pending.push(done_frame());

        self.phase = StreamPhase::Terminated(cause);
        log_stream_finished(cause, self.relayed_bytes, self.started_at.elapsed());
    }

    #[must_use]
    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    #[must_use]
    pub fn termination(&self) -> Option<TerminationCause> {
        match self.phase {
            StreamPhase::Terminated(cause) => Some(cause),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, StreamPhase::Terminated(_))
    }

    #[must_use]
    pub fn watchdog_armed(&self) -> bool {
        self.watchdog.is_armed()
    }

    #[must_use]
    pub fn relayed_bytes(&self) -> u64 {
        self.relayed_bytes
    }

    fn relay_text(&mut self, text: &str) {
        match self.scanner.scan(text) {
            ScanOutcome::Found(residual) => {
                self.emit(residual.into_bytes());
                self.finish(TerminationCause::SentinelFound);
            }
            ScanOutcome::Clean(clean) => {
                self.emit(clean.into_bytes());
                self.watchdog.arm();
            }
        }
    }

    fn emit(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.framing.observe(&bytes);
        self.relayed_bytes += bytes.len() as u64;
        self.pending.push(Bytes::from(bytes));
    }
}

impl<S> Drop for StreamTransducer<S> {
    fn drop(&mut self) {
        if self.phase == StreamPhase::Relaying {
            tracing::debug!(
                relayed_bytes = self.relayed_bytes,
                "client went away before stream end"
            );
        }
    }
}

async fn next_non_empty<S, E>(mut upstream: Pin<&mut S>) -> Option<Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    loop {
        match upstream.next().await? {
            Ok(chunk) if chunk.is_empty() => continue,
            other => return Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::convert::Infallible;

    fn settings() -> StreamSettings {
        StreamSettings::from_relay(&RelayConfig::default())
    }

    fn chunks(
        parts: &[&'static str],
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let items: Vec<Result<Bytes, Infallible>> = parts
            .iter()
            .copied()
            .map(|part| Ok(Bytes::from_static(part.as_bytes())))
            .collect();
        stream::iter(items)
    }

    async fn drain<S, E>(session: &mut StreamTransducer<S>) -> String
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut out = Vec::new();
        while let Some(chunk) = session.next_output().await {
            out.extend_from_slice(&chunk);
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_natural_end_appends_done() {
        let mut session = StreamTransducer::start(chunks(&["data: foo\n\n"]), &settings(), None)
            .await
            .unwrap();
        assert_eq!(drain(&mut session).await, "data: foo\n\ndata: [DONE]\n\n");
        assert_eq!(
            session.termination(),
            Some(TerminationCause::UpstreamClosed)
        );
        assert!(!session.watchdog_armed());
    }

    #[tokio::test]
    async fn test_unterminated_event_gets_separator_before_done() {
        let mut session = StreamTransducer::start(chunks(&["data: foo"]), &settings(), None)
            .await
            .unwrap();
        assert_eq!(drain(&mut session).await, "data: foo\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_sentinel_in_first_chunk_terminates() {
        let mut session = StreamTransducer::start(
            chunks(&["bar FINISHEDxyz", "never read"]),
            &settings(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(
            session.termination(),
            Some(TerminationCause::SentinelFound)
        );
        assert_eq!(drain(&mut session).await, "bar xyz\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_sentinel_split_across_chunks() {
        let mut session = StreamTransducer::start(
            chunks(&["data: hello FIN", "ISHED\n\n", "data: late\n\n"]),
            &settings(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(
            drain(&mut session).await,
            "data: hello \n\ndata: [DONE]\n\n"
        );
        assert_eq!(
            session.termination(),
            Some(TerminationCause::SentinelFound)
        );
    }

    #[tokio::test]
    async fn test_held_prefix_flushed_on_natural_end() {
        let mut session = StreamTransducer::start(chunks(&["data: FIN"]), &settings(), None)
            .await
            .unwrap();
        assert_eq!(drain(&mut session).await, "data: FIN\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_multibyte_split_decoded_intact() {
        let bytes = "data: 你好\n\n".as_bytes();
        let (head, tail) = bytes.split_at(8);
        let upstream = stream::iter(vec![
            Ok::<_, Infallible>(Bytes::copy_from_slice(head)),
            Ok(Bytes::copy_from_slice(tail)),
        ]);
        let mut session = StreamTransducer::start(upstream, &settings(), None)
            .await
            .unwrap();
        assert_eq!(
            drain(&mut session).await,
            "data: 你好\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_empty_upstream_is_empty_stream() {
        let result = StreamTransducer::start(chunks(&[]), &settings(), None).await;
        assert!(matches!(result, Err(RelayError::EmptyStream)));
        let result = StreamTransducer::start(chunks(&["", ""]), &settings(), None).await;
        assert!(matches!(result, Err(RelayError::EmptyStream)));
    }

    #[tokio::test]
    async fn test_bare_done_first_chunk_is_rejected() {
        let result =
            StreamTransducer::start(chunks(&["data: [DONE]\n\n"]), &settings(), None).await;
        assert!(matches!(result, Err(RelayError::StreamClosedImmediately)));
    }

    #[tokio::test]
    async fn test_done_with_content_is_relayed() {
        let first = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
        let mut session = StreamTransducer::start(chunks(&[first]), &settings(), None)
            .await
            .unwrap();
        let out = drain(&mut session).await;
        assert!(out.starts_with(first));
        assert!(out.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn test_first_chunk_read_error() {
        let upstream = stream::iter(vec![Err::<Bytes, _>("reset by peer")]);
        let result = StreamTransducer::start(upstream, &settings(), None).await;
        assert!(matches!(result, Err(RelayError::UpstreamFetch(ref msg)) if msg == "reset by peer"));
    }

    #[tokio::test]
    async fn test_read_error_after_start_closes_cleanly() {
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Err("reset by peer"),
        ]);
        let mut session = StreamTransducer::start(upstream, &settings(), None)
            .await
            .unwrap();
        assert_eq!(drain(&mut session).await, "data: a\n\ndata: [DONE]\n\n");
        assert_eq!(session.termination(), Some(TerminationCause::UpstreamError));
    }

    #[tokio::test]
    async fn test_finish_is_idempotent() {
        let mut session = StreamTransducer::start(
            chunks(&["data: a\n\n", "data: b\n\n"]),
            &settings(),
            None,
        )
        .await
        .unwrap();
        session.finish(TerminationCause::InactivityTimeout);
        session.finish(TerminationCause::UpstreamClosed);
        session.finish(TerminationCause::SentinelFound);
        assert_eq!(
            session.termination(),
            Some(TerminationCause::InactivityTimeout)
        );
        assert_eq!(drain(&mut session).await, "data: a\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_permit_released_on_finish() {
        let gate = crate::lifecycle::StreamGate::new();
        let mut session = StreamTransducer::start(
            chunks(&["data: a\n\n"]),
            &settings(),
            gate.try_admit(),
        )
        .await
        .unwrap();
        assert_eq!(gate.active_sessions(), 1);
        assert_eq!(session.phase(), StreamPhase::Relaying);
        let _ = drain(&mut session).await;
        assert_eq!(gate.active_sessions(), 0);
        assert_eq!(session.relayed_bytes(), b"data: a\n\n".len() as u64);
        assert_eq!(
            session.phase(),
            StreamPhase::Terminated(TerminationCause::UpstreamClosed)
        );
    }

    #[tokio::test]
    async fn test_permit_held_until_marker_is_handed_out() {
        let gate = crate::lifecycle::StreamGate::new();
        let mut session = StreamTransducer::start(
            chunks(&["data: a\n\n", "data: b FINISHED\n\n"]),
            &settings(),
            gate.try_admit(),
        )
        .await
        .unwrap();
        assert_eq!(session.next_output().await.unwrap(), "data: a\n\n");
        assert_eq!(session.next_output().await.unwrap(), "data: b \n\n");
        assert!(session.is_terminated());
        assert_eq!(gate.active_sessions(), 1);

        assert_eq!(session.next_output().await.unwrap(), "data: [DONE]\n\n");
        assert_eq!(gate.active_sessions(), 1);
        assert!(session.next_output().await.is_none());
        assert_eq!(gate.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_into_body_stream() {
        let session = StreamTransducer::start(
            chunks(&["data: a\n\n", "data: b\n\n"]),
            &settings(),
            None,
        )
        .await
        .unwrap();
        let collected: Vec<Bytes> = session.into_body_stream().collect().await;
        let joined: Vec<u8> = collected.concat();
        assert_eq!(joined, b"data: a\n\ndata: b\n\ndata: [DONE]\n\n");
    }
}
