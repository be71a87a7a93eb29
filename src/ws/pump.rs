//! Inbound and outbound WebSocket pumps.
//!
//! Each accepted socket runs one of each. The pumps are generic over the
//! socket halves so they can be driven by in-memory channels in tests.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::PlayerId;
use crate::session::SessionHandle;
use crate::util::rate_limit::{PlayerRateLimiter, DEFAULT_INPUT_RATE_LIMIT};
use crate::ws::connection::Shutdown;
use crate::ws::protocol::{decode_client_msg, encode, ServerMsg};

/// Connection timing and sizing
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Largest accepted client frame
    pub max_frame_bytes: usize,
    /// Read deadline, refreshed by every pong
    pub pong_wait: Duration,
    /// Per-write deadline
    pub write_wait: Duration,
    pub outbound_capacity: usize,
    pub input_rate_limit: u32,
}

impl PumpConfig {
    /// Keepalive ping interval, 90% of the read deadline
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 512,
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            outbound_capacity: 256,
            input_rate_limit: DEFAULT_INPUT_RATE_LIMIT,
        }
    }
}

/// Why a pump stopped abnormally
#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    #[error("Write failed: {0}")]
    Write(String),

    #[error("Write timed out")]
    WriteTimeout,

    #[error("Read failed: {0}")]
    Read(String),

    #[error("No pong within read deadline")]
    ReadDeadline,

    #[error("Frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
}

/// Read client frames and forward decoded commands to the session.
///
/// On exit the connection is unregistered and shutdown is signalled so the
/// outbound pump stops too.
pub async fn run_inbound<S, E>(
    mut stream: S,
    player_id: PlayerId,
    session: SessionHandle,
    shutdown: Shutdown,
    config: &PumpConfig,
) -> Result<(), PumpError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let limiter = PlayerRateLimiter::new(config.input_rate_limit);
    let mut deadline = Instant::now() + config.pong_wait;

    let result = loop {
        let next = tokio::select! {
            _ = shutdown.wait() => break Ok(()),
            _ = sleep_until(deadline) => break Err(PumpError::ReadDeadline),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if text.len() > config.max_frame_bytes {
                    break Err(PumpError::FrameTooLarge(text.len()));
                }
                handle_text(&text, player_id, &session, &limiter);
            }
            Some(Ok(Message::Binary(data))) => {
                if data.len() > config.max_frame_bytes {
                    break Err(PumpError::FrameTooLarge(data.len()));
                }
                debug!(player_id = %player_id, "Ignoring binary frame");
            }
            Some(Ok(Message::Pong(_))) => {
                deadline = Instant::now() + config.pong_wait;
            }
            // axum answers pings itself
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(_))) => {
                info!(player_id = %player_id, "Client initiated close");
                break Ok(());
            }
            Some(Err(e)) => break Err(PumpError::Read(e.to_string())),
            None => break Ok(()),
        }
    };

    session.unregister(player_id).await;
    shutdown.trigger();
    result
}

fn handle_text(text: &str, player_id: PlayerId, session: &SessionHandle, limiter: &PlayerRateLimiter) {
    if !limiter.check_input() {
        debug!(player_id = %player_id, "Input rate limited");
        return;
    }

    match decode_client_msg(text) {
        Ok(Some(command)) => {
            session.submit_command(player_id, command);
        }
        Ok(None) => {
            debug!(player_id = %player_id, "Ignoring unknown message type");
        }
        Err(e) => {
            warn!(player_id = %player_id, error = %e, "Failed to parse client message");
        }
    }
}

/// Drain the outbound queue into the socket and keep the peer alive.
///
/// Messages already queued when a write happens are coalesced into the same
/// text frame, newline separated. A closed queue sends a close frame.
pub async fn run_outbound<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<String>,
    shutdown: Shutdown,
    config: &PumpConfig,
) -> Result<(), PumpError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let period = config.ping_period();
    let mut ping = interval_at(Instant::now() + period, period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(first) => {
                    let frame = coalesce(first, &mut outbound, config.outbound_capacity);
                    if let Err(e) = write(&mut sink, Message::Text(frame), config.write_wait).await {
                        break Err(e);
                    }
                }
                None => {
                    let _ = write(&mut sink, Message::Close(None), config.write_wait).await;
                    break Ok(());
                }
            },
            _ = ping.tick() => {
                if let Err(e) = write(&mut sink, Message::Ping(Vec::new()), config.write_wait).await {
                    break Err(e);
                }
            }
            _ = shutdown.wait() => break Ok(()),
        }
    };

    shutdown.trigger();
    let _ = sink.close().await;
    result
}

/// Tell a client it was turned away, then close the socket
pub async fn reject<W>(mut sink: W, reason: &str, config: &PumpConfig) -> Result<(), PumpError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let frame = encode(&ServerMsg::error(reason)).map_err(|e| PumpError::Write(e.to_string()))?;
    write(&mut sink, Message::Text(frame), config.write_wait).await?;
    write(&mut sink, Message::Close(None), config.write_wait).await?;
    let _ = sink.close().await;
    Ok(())
}

fn coalesce(first: String, outbound: &mut mpsc::Receiver<String>, limit: usize) -> String {
    let mut frame = first;
    for _ in 1..limit {
        match outbound.try_recv() {
            Ok(next) => {
                frame.push('\n');
                frame.push_str(&next);
            }
            Err(_) => break,
        }
    }
    frame
}

async fn write<W>(sink: &mut W, msg: Message, wait: Duration) -> Result<(), PumpError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match timeout(wait, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PumpError::Write(e.to_string())),
        Err(_) => Err(PumpError::WriteTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::MatchConfig;
    use crate::session::hub::SessionHub;
    use crate::ws::connection::Connection;
    use futures::channel::mpsc as fmpsc;
    use serde_json::Value;
    use std::io;
    use std::sync::Weak;
    use uuid::Uuid;

    type Inbound = fmpsc::UnboundedSender<Result<Message, io::Error>>;

    fn fast_config() -> PumpConfig {
        PumpConfig {
            pong_wait: Duration::from_millis(200),
            write_wait: Duration::from_millis(100),
            ..PumpConfig::default()
        }
    }

    fn text(s: &str) -> Result<Message, io::Error> {
        Ok(Message::Text(s.to_string()))
    }

    fn spawn_session() -> SessionHandle {
        SessionHub::spawn("PUMP".to_string(), MatchConfig::default(), Weak::new())
    }

    fn spawn_inbound(
        session: &SessionHandle,
        player_id: PlayerId,
        shutdown: &Shutdown,
        config: PumpConfig,
    ) -> (Inbound, tokio::task::JoinHandle<Result<(), PumpError>>) {
        let (tx, rx) = fmpsc::unbounded();
        let session = session.clone();
        let shutdown = shutdown.clone();
        let task = tokio::spawn(async move { run_inbound(rx, player_id, session, shutdown, &config).await });
        (tx, task)
    }

    async fn join<T>(task: tokio::task::JoinHandle<T>) -> T {
        timeout(Duration::from_secs(2), task)
            .await
            .expect("pump exits in time")
            .expect("pump task")
    }

    #[tokio::test]
    async fn outbound_coalesces_queued_messages() {
        let Connection {
            handle,
            outbound,
            shutdown,
        } = Connection::new(Uuid::new_v4(), 16);
        handle.send("a".into());
        handle.send("b".into());
        handle.send("c".into());

        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let config = fast_config();
        let task = tokio::spawn(async move { run_outbound(sink, outbound, shutdown, &config).await });

        let first = frames.next().await.expect("frame");
        assert_eq!(first, Message::Text("a\nb\nc".to_string()));

        drop(handle);
        assert!(matches!(frames.next().await, Some(Message::Close(None))));
        assert!(join(task).await.is_ok());
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn outbound_sends_keepalive_pings() {
        let Connection {
            handle,
            outbound,
            shutdown,
        } = Connection::new(Uuid::new_v4(), 16);

        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let config = PumpConfig {
            pong_wait: Duration::from_millis(50),
            ..fast_config()
        };
        let task = tokio::spawn(async move { run_outbound(sink, outbound, shutdown, &config).await });

        let frame = timeout(Duration::from_secs(1), frames.next())
            .await
            .expect("ping in time");
        assert!(matches!(frame, Some(Message::Ping(_))));

        handle.close();
        assert!(join(task).await.is_ok());
    }

    #[tokio::test]
    async fn outbound_write_failure_signals_shutdown() {
        let Connection {
            handle,
            outbound,
            shutdown,
        } = Connection::new(Uuid::new_v4(), 16);

        let (sink, frames) = fmpsc::unbounded::<Message>();
        drop(frames);

        handle.send("hello".into());
        let config = fast_config();
        let pump_shutdown = shutdown.clone();
        let task = tokio::spawn(async move { run_outbound(sink, outbound, pump_shutdown, &config).await });

        assert!(matches!(join(task).await, Err(PumpError::Write(_))));
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn reject_sends_error_then_close() {
        let (sink, frames) = fmpsc::unbounded::<Message>();
        reject(sink, "Lobby is closed", &fast_config()).await.unwrap();

        let frames: Vec<Message> = frames.collect().await;
        assert_eq!(frames.len(), 2);
        let Message::Text(text) = &frames[0] else {
            panic!("expected text frame, got {:?}", frames[0]);
        };
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["message"], "Lobby is closed");
        assert!(matches!(frames[1], Message::Close(None)));
    }

    #[tokio::test]
    async fn inbound_rejects_oversized_frame() {
        let session = spawn_session();
        let shutdown = Shutdown::new();
        let (tx, task) = spawn_inbound(&session, Uuid::new_v4(), &shutdown, fast_config());

        tx.unbounded_send(text(&"x".repeat(600))).unwrap();
        assert!(matches!(join(task).await, Err(PumpError::FrameTooLarge(600))));
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn inbound_survives_malformed_frames() {
        let session = spawn_session();
        let shutdown = Shutdown::new();
        let (tx, task) = spawn_inbound(&session, Uuid::new_v4(), &shutdown, fast_config());

        tx.unbounded_send(text("not json")).unwrap();
        tx.unbounded_send(text(r#"{"type":"dance"}"#)).unwrap();
        tx.unbounded_send(text(r#"{"type":"input","payload":{"up":"sure"}}"#)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        assert!(join(task).await.is_ok());
    }

    #[tokio::test]
    async fn inbound_read_deadline_expires_without_pongs() {
        let session = spawn_session();
        let shutdown = Shutdown::new();
        let (_tx, task) = spawn_inbound(&session, Uuid::new_v4(), &shutdown, fast_config());

        assert!(matches!(join(task).await, Err(PumpError::ReadDeadline)));
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn pongs_extend_read_deadline() {
        let session = spawn_session();
        let shutdown = Shutdown::new();
        let (tx, task) = spawn_inbound(&session, Uuid::new_v4(), &shutdown, fast_config());

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.unbounded_send(Ok(Message::Pong(Vec::new()))).unwrap();
        }
        // 500ms elapsed against a 200ms deadline
        assert!(!task.is_finished());

        shutdown.trigger();
        assert!(join(task).await.is_ok());
    }

    #[tokio::test]
    async fn inbound_read_error_ends_pump() {
        let session = spawn_session();
        let shutdown = Shutdown::new();
        let (tx, task) = spawn_inbound(&session, Uuid::new_v4(), &shutdown, fast_config());

        tx.unbounded_send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
            .unwrap();
        assert!(matches!(join(task).await, Err(PumpError::Read(_))));
    }

    #[tokio::test]
    async fn fire_reaches_opponent_snapshot_and_disconnect_ends_match() {
        let session = spawn_session();
        let (a_id, b_id) = (Uuid::new_v4(), Uuid::new_v4());
        let a = Connection::new(a_id, 256);
        let mut b = Connection::new(b_id, 256);
        session.register(a.handle).await.unwrap();
        session.register(b.handle).await.unwrap();

        let (tx, task) = spawn_inbound(&session, a_id, &a.shutdown, fast_config());
        tx.unbounded_send(text(r#"{"type":"fire"}"#)).unwrap();

        let saw_bullet = timeout(Duration::from_secs(2), async {
            while let Some(frame) = b.outbound.recv().await {
                let value: Value = serde_json::from_str(&frame).unwrap();
                if value["type"] == "game_state" {
                    if let Some(bullet) = value["bullets"].as_array().and_then(|b| b.first()) {
                        return bullet["ownerId"] == a_id.to_string();
                    }
                }
            }
            false
        })
        .await
        .expect("bullet in time");
        assert!(saw_bullet);

        // a disconnects: b wins
        drop(tx);
        assert!(join(task).await.is_ok());

        let winner = timeout(Duration::from_secs(2), async {
            while let Some(frame) = b.outbound.recv().await {
                let value: Value = serde_json::from_str(&frame).unwrap();
                if value["type"] == "game_state" && value["state"] == "gameover" {
                    return value["winnerId"].as_str().map(str::to_string);
                }
            }
            None
        })
        .await
        .expect("final snapshot in time");
        assert_eq!(winner, Some(b_id.to_string()));
    }
}
