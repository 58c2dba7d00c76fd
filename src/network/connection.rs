//! Connection Pumps
//!
//! Each WebSocket gets a writer task draining its mailbox (plus keepalive
//! pings) and a read loop owned by the server. The writer ends when the
//! registry drops the mailbox sender.

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error};

use crate::network::registry::Mailbox;

/// Keepalive and write timing for one connection.
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    /// Interval between keepalive pings.
    pub ping_period: Duration,
    /// Silence after which the peer is considered gone.
    pub pong_wait: Duration,
    /// Deadline for a single frame write.
    pub write_wait: Duration,
}

/// Drain `mailbox` into `sink`, pinging every `ping_period`.
///
/// Sends a Close frame once the mailbox is closed.
pub async fn write_pump<S>(mut sink: S, mut mailbox: Mailbox, settings: PumpSettings)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut ticker = interval(settings.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        let frame = tokio::select! {
            envelope = mailbox.recv() => match envelope {
                Some(envelope) => match envelope.to_json() {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                },
                None => {
                    let _ = timeout(settings.write_wait, sink.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ticker.tick() => Message::Ping(Vec::new()),
        };

        match timeout(settings.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write failed: {}", e);
                break;
            }
            Err(_) => {
                debug!("Write timed out");
                break;
            }
        }
    }
}

/// Next inbound event from a peer.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame.
    Text(String),
    /// Peer closed, errored or went silent.
    Closed,
}

/// Wait for the next text frame. Any frame, including pongs, resets the
/// `pong_wait` deadline.
pub async fn next_inbound<S>(stream: &mut S, pong_wait: Duration) -> Inbound
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match timeout(pong_wait, stream.next()).await {
            Err(_) => {
                debug!("No frame within {:?}", pong_wait);
                return Inbound::Closed;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return Inbound::Closed,
            Ok(Some(Err(e))) => {
                debug!("Read failed: {}", e);
                return Inbound::Closed;
            }
            Ok(Some(Ok(Message::Text(text)))) => return Inbound::Text(text),
            Ok(Some(Ok(Message::Binary(_)))) => debug!("Binary frame ignored"),
            Ok(Some(Ok(_))) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::Envelope;
    use futures_util::stream;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn settings() -> PumpSettings {
        PumpSettings {
            ping_period: Duration::from_secs(30),
            pong_wait: Duration::from_millis(50),
            write_wait: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_write_pump_sends_then_closes() {
        let (tx, rx) = mpsc::channel(4);
        let mut written: Vec<Message> = Vec::new();

        tx.send(Arc::new(Envelope::new("pong", None, serde_json::Value::Null)))
            .await
            .unwrap();
        drop(tx);

        let sink = (&mut written).sink_map_err(|never: Infallible| -> WsError { match never {} });
        write_pump(sink, rx, settings()).await;

        assert_eq!(written.len(), 2);
        let Message::Text(text) = &written[0] else {
            panic!("expected text frame");
        };
        assert_eq!(Envelope::from_json(text).unwrap().kind, "pong");
        assert!(matches!(written[1], Message::Close(None)));
    }

    #[tokio::test]
    async fn test_next_inbound_skips_control_frames() {
        let mut frames = stream::iter(vec![
            Ok(Message::Pong(Vec::new())),
            Ok(Message::Text("hello".into())),
            Ok(Message::Close(None)),
        ]);

        assert_eq!(next_inbound(&mut frames, Duration::from_secs(1)).await, Inbound::Text("hello".into()));
        assert_eq!(next_inbound(&mut frames, Duration::from_secs(1)).await, Inbound::Closed);
    }

    #[tokio::test]
    async fn test_next_inbound_times_out() {
        let mut silent = stream::pending::<Result<Message, WsError>>();
        assert_eq!(next_inbound(&mut silent, settings().pong_wait).await, Inbound::Closed);
    }
}
