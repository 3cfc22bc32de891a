//! One task per WebSocket connection.
//!
//! The reader loop owns the connection's presence lease and handles
//! inbound frames one at a time, so a sender's messages persist in the
//! order they were sent. A writer task drains the outbound queue and sends
//! pings; it closes the socket when the peer stops answering.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use carlot_core::{DeliveryOutcome, Identity};

use crate::hub::Connection;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::server::AppState;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Drive a connection from accept to cleanup.
pub async fn run(socket: WebSocket, identity: Identity, state: AppState) {
    let (connection, outbound) = state.hub.register(identity.clone());
    let handle = connection.handle.clone();
    let mut lease = state.lifecycle.connect(identity.clone(), handle.clone()).await;
    info!(identity = %identity, handle = %handle, presence = ?lease.state(), "connection opened");

    reply(
        &connection,
        ServerEvent::Connected {
            handle: handle.clone(),
            identity: identity.clone(),
        },
    );

    let (ws_tx, mut ws_rx) = socket.split();
    let stop = state.shutdown.token().child_token();
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        outbound,
        Arc::clone(&connection),
        state.config.heartbeat_interval,
        state.config.heartbeat_timeout,
        stop.clone(),
    ));
    let mut writer_done = false;

    let mut refresh = state
        .config
        .refresh
        .interval()
        .filter(|period| !period.is_zero())
        .map(|period| {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                debug!(handle = %handle, "shutdown requested");
                break;
            }
            _ = &mut writer, if !writer_done => {
                writer_done = true;
                break;
            }
            _ = tick(&mut refresh) => {
                if !state.lifecycle.refresh(&mut lease).await {
                    break;
                }
            }
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        connection.mark_alive();
                        match msg {
                            WsMessage::Text(text) => handle_text(&state, &connection, text.as_str()).await,
                            WsMessage::Binary(_) => reply(&connection, ServerEvent::parse_error("binary frames are not supported")),
                            WsMessage::Close(_) => break,
                            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        debug!(handle = %handle, error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    stop.cancel();
    if !writer_done && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    state.hub.unregister(&handle);
    state.lifecycle.disconnect(lease).await;
    info!(identity = %identity, handle = %handle, "connection closed");
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn handle_text(state: &AppState, connection: &Connection, text: &str) {
    let request = match ClientEvent::parse(text) {
        Ok(ClientEvent::Send(request)) => request,
        Err(e) => {
            debug!(handle = %connection.handle, error = %e, "unparseable frame");
            reply(connection, ServerEvent::parse_error(e));
            return;
        }
    };

    let reference = request.reference.clone();
    let message = match request.into_message(&connection.identity) {
        Ok(message) => message,
        Err(error) => {
            reply(connection, ServerEvent::error(reference, &error));
            return;
        }
    };

    let event = match state.dispatcher.dispatch(message).await {
        DeliveryOutcome::Delivered { message } | DeliveryOutcome::StoredOnly { message, .. } => {
            ServerEvent::sent(reference, &message)
        }
        DeliveryOutcome::Failed { error } => ServerEvent::error(reference, &error),
    };
    reply(connection, event);
}

fn reply(connection: &Connection, event: ServerEvent) {
    match event.to_json() {
        Ok(frame) => {
            if let Err(e) = connection.send(frame) {
                debug!(handle = %connection.handle, error = %e, "reply dropped");
            }
        }
        Err(e) => warn!(handle = %connection.handle, error = %e, "failed to encode frame"),
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<String>,
    connection: Arc<Connection>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    stop: CancellationToken,
) {
    let mut ping = interval(heartbeat_interval.max(Duration::from_millis(10)));
    ping.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if sink.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping.tick() => {
                if connection.idle_for() > heartbeat_timeout {
                    warn!(handle = %connection.handle, "peer unresponsive, closing connection");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
                if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
