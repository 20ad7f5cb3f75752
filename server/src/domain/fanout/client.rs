//! Per-client WebSocket pumps
//!
//! Each connection runs two cooperating tasks:
//! - the reader enforces the read deadline, parses and stamps inbound
//!   frames, and hands them to the manager
//! - the writer drains the client's bounded send buffer, emits periodic
//!   pings, and enforces the write deadline
//!
//! The writer exits on any write error; the reader exits on deadline,
//! close, or socket error. Either exit unregisters the client.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};

use super::frame::Frame;
use super::manager::ConnectionManager;
use crate::core::constants::{
    CLIENT_SEND_BUFFER, WS_PING_INTERVAL_SECS, WS_READ_TIMEOUT_SECS, WS_WRITE_TIMEOUT_SECS,
};

/// Serve one authenticated WebSocket connection until it closes
pub async fn serve_client(
    socket: WebSocket,
    username: String,
    groups: Arc<HashSet<String>>,
    manager: Arc<ConnectionManager>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let (frame_tx, frame_rx) = mpsc::channel::<Frame>(CLIENT_SEND_BUFFER);
    let client_id = manager
        .register(&username, groups, frame_tx.clone())
        .await;

    tracing::debug!(username = %username, client_id, "WebSocket client connected");

    let (ws_sender, ws_receiver) = socket.split();
    let writer = tokio::spawn(write_pump(ws_sender, frame_rx, shutdown_rx));

    read_pump(ws_receiver, &username, &frame_tx, &manager).await;

    manager.unregister(&username, client_id).await;

    // Dropping our sender (the manager already dropped its copy) closes the
    // writer's channel, which sends Close and exits.
    drop(frame_tx);
    match tokio::time::timeout(Duration::from_secs(WS_WRITE_TIMEOUT_SECS + 1), writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            // A poisoned socket must take down this client only, never the
            // manager task.
            tracing::warn!(username = %username, error = %e, "Write pump panicked");
        }
        Err(_) => {
            tracing::warn!(username = %username, "Write pump did not stop in time");
        }
    }

    tracing::debug!(username = %username, client_id, "WebSocket client disconnected");
}

/// Reader: deadline-guarded receive, parse, stamp, route
async fn read_pump(
    mut ws_receiver: impl StreamExt<Item = Result<Message, axum::Error>> + Unpin,
    username: &str,
    frame_tx: &mpsc::Sender<Frame>,
    manager: &ConnectionManager,
) {
    let read_timeout = Duration::from_secs(WS_READ_TIMEOUT_SECS);

    loop {
        // The deadline refreshes on every frame, pongs included
        let received = match tokio::time::timeout(read_timeout, ws_receiver.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                tracing::debug!(username = %username, error = %e, "WebSocket read error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::debug!(username = %username, "Read deadline exceeded");
                break;
            }
        };

        match received {
            Message::Text(text) => {
                let mut frame: Frame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(username = %username, error = %e, "Undeserializable frame");
                        continue;
                    }
                };
                match frame {
                    Frame::Ping => {
                        let _ = frame_tx.try_send(Frame::Pong);
                    }
                    Frame::Pong => {}
                    _ => {
                        frame.stamp(username);
                        manager.inbound(username, frame).await;
                    }
                }
            }
            Message::Close(_) => break,
            // axum answers protocol pings itself; binary frames are not
            // part of the protocol
            _ => {}
        }
    }
}

/// Writer: bounded channel vs ping ticker, deadline on every send
async fn write_pump(
    mut ws_sender: impl SinkExt<Message, Error = axum::Error> + Unpin,
    mut frame_rx: mpsc::Receiver<Frame>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let write_timeout = Duration::from_secs(WS_WRITE_TIMEOUT_SECS);
    let mut ping = tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "Frame serialization failed");
                        continue;
                    }
                };
                match tokio::time::timeout(write_timeout, ws_sender.send(Message::Text(json.into())))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket write failed");
                        break;
                    }
                    Err(_) => {
                        tracing::warn!("Write deadline exceeded");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                match tokio::time::timeout(
                    write_timeout,
                    ws_sender.send(Message::Ping(Vec::new().into())),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
}
