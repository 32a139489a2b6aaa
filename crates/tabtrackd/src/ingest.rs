//! Adapter ingestion loop.
//!
//! The browser adapter writes one [`InboundMessage`] per line. Each message is
//! routed to the tracker; replies and lifecycle events go back to the adapter
//! as [`OutboundMessage`] lines. Events published while a request is handled
//! are written before that request's reply.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` in this module
//! - Bad lines get an `error` reply; only I/O failures end the loop

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tabtrack_core::{BrowsingEvent, TrackingConfig};
use tabtrack_protocol::{parse_inbound, InboundKind, OutboundMessage, ProtocolError};

use crate::tracker::{ActivityUpdate, TrackerError, TrackerHandle};

/// Maximum accepted line length (1 MB).
pub const MAX_LINE_SIZE: usize = 1_048_576;

/// Errors that end the ingestion loop.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("adapter I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Counters reported when the loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    /// Lines accepted and routed to the tracker.
    pub messages: u64,
    /// Lines answered with an error.
    pub rejected: u64,
    /// Lifecycle events written.
    pub events: u64,
}

/// Runs until the input closes, `cancel` fires, or the tracker stops.
///
/// Writes a `ready` line first. Events still queued when the loop ends are
/// flushed before returning.
pub async fn run_ingest<R, W>(
    reader: R,
    writer: &mut W,
    tracker: TrackerHandle,
    cancel: CancellationToken,
) -> Result<IngestSummary, IngestError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut events = tracker.subscribe();
    let mut lines = reader.lines();
    let mut summary = IngestSummary::default();

    write_message(writer, &OutboundMessage::ready()).await?;
    info!("Adapter ingest started");

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Adapter ingest cancelled");
                break;
            }

            event = events.recv() => match event {
                Ok(event) => {
                    write_event(writer, event, &mut summary).await?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged, events dropped");
                }
                Err(RecvError::Closed) => {
                    debug!("Event stream closed");
                    break;
                }
            },

            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Adapter input closed");
                    break;
                };
                match handle_line(&tracker, &line).await {
                    LineOutcome::Reply(reply) => {
                        summary.messages += 1;
                        drain_events(writer, &mut events, &mut summary).await?;
                        if let Some(reply) = reply {
                            write_message(writer, &reply).await?;
                        }
                    }
                    LineOutcome::Rejected(reply) => {
                        summary.rejected += 1;
                        write_message(writer, &reply).await?;
                    }
                    LineOutcome::Skipped => {}
                    LineOutcome::TrackerGone => {
                        warn!("Tracker stopped, ending adapter ingest");
                        break;
                    }
                }
            }
        }
    }

    drain_events(writer, &mut events, &mut summary).await?;
    writer.flush().await?;

    info!(
        messages = summary.messages,
        rejected = summary.rejected,
        events = summary.events,
        "Adapter ingest stopped"
    );
    Ok(summary)
}

enum LineOutcome {
    /// Accepted; some requests have a reply.
    Reply(Option<OutboundMessage>),
    Rejected(OutboundMessage),
    Skipped,
    TrackerGone,
}

async fn handle_line(tracker: &TrackerHandle, line: &str) -> LineOutcome {
    if line.len() > MAX_LINE_SIZE {
        warn!(size = line.len(), "Adapter line too large");
        return LineOutcome::Rejected(OutboundMessage::error_with_code(
            format!("message too large ({} bytes, max {MAX_LINE_SIZE})", line.len()),
            "too_large",
        ));
    }

    let message = match parse_inbound(line) {
        Ok(message) => message,
        Err(ProtocolError::Empty) => return LineOutcome::Skipped,
        Err(e) => {
            debug!(error = %e, "Rejected adapter line");
            let code = match e {
                ProtocolError::Version(_) => "unsupported_version",
                _ => "malformed",
            };
            return LineOutcome::Rejected(OutboundMessage::error_with_code(e.to_string(), code));
        }
    };

    match dispatch(tracker, message.message).await {
        Ok(reply) => LineOutcome::Reply(reply),
        Err(TrackerError::ChannelClosed) => LineOutcome::TrackerGone,
        Err(e) => {
            debug!(error = %e, "Tracker rejected request");
            LineOutcome::Rejected(OutboundMessage::error_with_code(e.to_string(), e.code()))
        }
    }
}

/// Routes one message to the tracker.
async fn dispatch(
    tracker: &TrackerHandle,
    message: InboundKind,
) -> Result<Option<OutboundMessage>, TrackerError> {
    match message {
        InboundKind::Activity {
            tab_id,
            window_id,
            domain,
            url,
            timestamp,
        } => {
            tracker
                .update_activity(ActivityUpdate {
                    tab_id,
                    window_id,
                    domain,
                    url,
                    timestamp,
                })
                .await?;
            Ok(None)
        }
        InboundKind::Idle {
            is_idle,
            reason,
            timestamp,
        } => {
            tracker.set_idle(is_idle, reason, timestamp).await?;
            Ok(None)
        }
        InboundKind::StartSession {
            tag,
            purpose,
            parent_session_id,
        } => {
            let session_id = tracker.start_session(tag, purpose, parent_session_id).await?;
            Ok(Some(OutboundMessage::SessionStarted { session_id }))
        }
        InboundKind::EndSession => {
            tracker.end_session().await?;
            Ok(None)
        }
        InboundKind::TagSession { tag } => {
            tracker.tag_session(tag).await?;
            Ok(None)
        }
        InboundKind::UpdateConfig { config } => {
            let config = TrackingConfig::from_json_value(config)?;
            tracker.update_config(config).await?;
            Ok(None)
        }
        InboundKind::Snapshot => Ok(Some(OutboundMessage::Snapshot {
            current: tracker.current_session().await,
            history: tracker.session_history().await,
            stats: tracker.session_stats().await,
        })),
        InboundKind::Ping { seq } => Ok(Some(OutboundMessage::Pong { seq })),
    }
}

async fn drain_events<W>(
    writer: &mut W,
    events: &mut broadcast::Receiver<BrowsingEvent>,
    summary: &mut IngestSummary,
) -> Result<(), IngestError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        match events.try_recv() {
            Ok(event) => write_event(writer, event, summary).await?,
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "Event stream lagged, events dropped");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
        }
    }
}

async fn write_event<W>(
    writer: &mut W,
    event: BrowsingEvent,
    summary: &mut IngestSummary,
) -> Result<(), IngestError>
where
    W: AsyncWrite + Unpin,
{
    summary.events += 1;
    write_message(writer, &OutboundMessage::event(event)).await
}

async fn write_message<W>(writer: &mut W, message: &OutboundMessage) -> Result<(), IngestError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = message.to_line()?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::tracker::{spawn_tracker_with, TrackerOptions};
    use tabtrack_core::EventPayload;

    fn parse_output(out: &[u8]) -> Vec<OutboundMessage> {
        String::from_utf8_lossy(out)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn spawn_test_tracker() -> TrackerHandle {
        spawn_tracker_with(
            TrackerOptions::new(TrackingConfig::default()).with_clock(Clock::starting_at(0)),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingest_routes_messages_and_replies() {
        let tracker = spawn_test_tracker();
        tracker.initialize().await.unwrap();

        let input = concat!(
            r#"{"type":"ping","seq":7}"#,
            "\n",
            r#"{"type":"activity","domain":"docs.rs","timestamp":5}"#,
            "\n",
            "\n",
            r#"{"type":"start_session","tag":"focus"}"#,
            "\n",
            "not json\n",
            r#"{"type":"snapshot"}"#,
            "\n",
        );
        let mut out = Vec::new();
        let summary = run_ingest(
            input.as_bytes(),
            &mut out,
            tracker.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.messages, 4);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.events, 2);

        let messages = parse_output(&out);
        assert!(matches!(messages[0], OutboundMessage::Ready { .. }));
        assert_eq!(messages[1], OutboundMessage::Pong { seq: 7 });

        // Events for start_session come before its reply.
        let kinds: Vec<&str> = messages[2..]
            .iter()
            .map(|m| match m {
                OutboundMessage::Event { event } => match event.payload {
                    EventPayload::SessionEnded { .. } => "ended",
                    EventPayload::SessionStarted { .. } => "started",
                    _ => "other_event",
                },
                OutboundMessage::SessionStarted { .. } => "reply",
                OutboundMessage::Error { .. } => "error",
                OutboundMessage::Snapshot { .. } => "snapshot",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["ended", "started", "reply", "error", "snapshot"]);

        match messages.last() {
            Some(OutboundMessage::Snapshot { current, history, stats }) => {
                let current = current.as_ref().unwrap();
                assert_eq!(current.tags, vec!["focus".to_string()]);
                assert_eq!(history.len(), 1);
                assert!(history[0].domains.contains("docs.rs"));
                assert_eq!(stats.total_sessions, 1);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingest_rejects_invalid_config_and_version() {
        let tracker = spawn_test_tracker();
        tracker.initialize().await.unwrap();

        let input = concat!(
            r#"{"type":"update_config","config":{"domainChangeThreshold":3.0}}"#,
            "\n",
            r#"{"type":"ping","seq":1,"protocolVersion":{"major":9,"minor":0}}"#,
            "\n",
        );
        let mut out = Vec::new();
        run_ingest(input.as_bytes(), &mut out, tracker, CancellationToken::new())
            .await
            .unwrap();

        let codes: Vec<Option<String>> = parse_output(&out)
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Error { code, .. } => Some(code),
                _ => None,
            })
            .collect();
        assert_eq!(
            codes,
            vec![
                Some("invalid_config".to_string()),
                Some("unsupported_version".to_string())
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingest_stops_on_cancel() {
        let tracker = spawn_test_tracker();
        let (reader, _writer_side) = tokio::io::duplex(64);
        let reader = tokio::io::BufReader::new(reader);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut out = Vec::new();
        let summary = run_ingest(reader, &mut out, tracker, cancel).await.unwrap();
        assert_eq!(summary, IngestSummary::default());
        assert!(matches!(
            parse_output(&out)[0],
            OutboundMessage::Ready { .. }
        ));
    }
}
