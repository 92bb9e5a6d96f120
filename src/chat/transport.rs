use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::error::{ChatError, Result};
use super::irc::{self, IrcFrame};

const CHAT_WS_URL: &str = "wss://irc-ws.chat.twitch.tv:443";
const CAPABILITIES: &str = "CAP REQ :twitch.tv/tags twitch.tv/commands";

/// Messages from the transport to the session
#[derive(Debug)]
pub enum TransportEvent {
    /// Logged in and joined; sent once per (re)connect
    Connected,

    /// One parsed inbound IRC frame
    Frame(IrcFrame),

    /// The live connection dropped; the transport is about to reconnect
    Disconnected,

    /// Initial connect failed; the transport has given up
    Error(String),
}

/// IRC login identity. Reading chat works anonymously; sending requires
/// the authenticated form.
#[derive(Debug, Clone)]
pub enum Login {
    Anonymous,
    Authenticated { login: String, token: String },
}

/// One raw outbound IRC line. The `ack` channel resolves once the line
/// has actually been written to the socket, so callers can distinguish
/// "queued" from "delivered".
#[derive(Debug)]
pub struct OutboundLine {
    pub line: String,
    pub ack: Option<oneshot::Sender<Result<()>>>,
}

/// How one connection attempt ended after a successful login.
enum SessionEnd {
    /// The session dropped the outbound sender; stop entirely
    Shutdown,
    /// The server side went away; reconnect
    Dropped,
}

/// IRC-over-WebSocket connection to a single channel.
///
/// Reconnection is this layer's job: after the first successful connect
/// it retries forever with capped exponential backoff, re-doing the
/// login/JOIN handshake each time. The session never implements backoff.
pub struct IrcTransport {
    channel: String,
    login: Login,
}

impl IrcTransport {
    pub fn new(channel: String, login: Login) -> Self {
        Self { channel, login }
    }

    /// Drive the connection until the session shuts it down. Only a
    /// failure of the very first connect is reported as fatal.
    pub async fn run(
        self,
        tx: mpsc::Sender<TransportEvent>,
        mut outbound: mpsc::Receiver<OutboundLine>,
    ) {
        match self.run_once(&tx, &mut outbound).await {
            Ok(SessionEnd::Shutdown) => return,
            Ok(SessionEnd::Dropped) => {
                let _ = tx.send(TransportEvent::Disconnected).await;
            }
            Err(e) => {
                let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                return;
            }
        }

        let base_delay = Duration::from_secs(1);
        let mut retries: u32 = 0;

        loop {
            retries += 1;
            let delay = base_delay * 2_u32.pow((retries - 1).min(6)); // Max 64 seconds
            sleep(delay).await;

            match self.run_once(&tx, &mut outbound).await {
                Ok(SessionEnd::Shutdown) => return,
                Ok(SessionEnd::Dropped) => {
                    retries = 0;
                    let _ = tx.send(TransportEvent::Disconnected).await;
                }
                Err(e) => {
                    log::error!("Chat reconnection failed: {}", e);
                }
            }
        }
    }

    /// One connection: handshake, then pump frames until the connection
    /// ends. Errors before the login handshake completes are returned;
    /// afterwards they count as a drop.
    async fn run_once(
        &self,
        tx: &mpsc::Sender<TransportEvent>,
        outbound: &mut mpsc::Receiver<OutboundLine>,
    ) -> Result<SessionEnd> {
        let (ws_stream, _) = connect_async(CHAT_WS_URL).await?;
        let (mut write, mut read) = ws_stream.split();

        write.send(Message::Text(CAPABILITIES.into())).await?;
        match &self.login {
            Login::Authenticated { login, token } => {
                write
                    .send(Message::Text(format!("PASS oauth:{}", token).into()))
                    .await?;
                write
                    .send(Message::Text(format!("NICK {}", login).into()))
                    .await?;
            }
            Login::Anonymous => {
                write
                    .send(Message::Text(
                        format!("NICK {}", anonymous_nick(&self.channel)).into(),
                    ))
                    .await?;
            }
        }

        let mut connected = false;

        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            // Several IRC lines can share one WebSocket frame.
                            for line in text.split("\r\n") {
                                let Some(frame) = irc::parse_line(line) else {
                                    continue;
                                };
                                match frame.command.as_str() {
                                    "PING" => {
                                        let reply = format!(
                                            "PONG :{}",
                                            frame.trailing.as_deref().unwrap_or("tmi.twitch.tv")
                                        );
                                        if write.send(Message::Text(reply.into())).await.is_err() && connected {
                                            return Ok(SessionEnd::Dropped);
                                        }
                                    }
                                    "001" => {
                                        write
                                            .send(Message::Text(format!("JOIN #{}", self.channel).into()))
                                            .await?;
                                        connected = true;
                                        let _ = tx.send(TransportEvent::Connected).await;
                                    }
                                    "NOTICE" if !connected => {
                                        let reason = frame.trailing.clone().unwrap_or_default();
                                        return Err(ChatError::ConnectError(reason));
                                    }
                                    _ => {
                                        let _ = tx.send(TransportEvent::Frame(frame)).await;
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if write.send(Message::Pong(payload)).await.is_err() && connected {
                                return Ok(SessionEnd::Dropped);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            if connected {
                                return Ok(SessionEnd::Dropped);
                            }
                            return Err(ChatError::ConnectError(
                                "Connection closed during login".to_string(),
                            ));
                        }
                        Some(Err(e)) => {
                            if connected {
                                log::warn!("Chat connection error: {}", e);
                                return Ok(SessionEnd::Dropped);
                            }
                            return Err(e.into());
                        }
                        Some(Ok(_)) => {}
                    }
                }

                item = outbound.recv() => {
                    match item {
                        Some(OutboundLine { line, ack }) => {
                            match write.send(Message::Text(line.into())).await {
                                Ok(()) => {
                                    if let Some(ack) = ack {
                                        let _ = ack.send(Ok(()));
                                    }
                                }
                                Err(e) => {
                                    if let Some(ack) = ack {
                                        let _ = ack
                                            .send(Err(ChatError::TransportError(e.to_string())));
                                    }
                                    if connected {
                                        return Ok(SessionEnd::Dropped);
                                    }
                                }
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                }
            }
        }
    }
}

/// Anonymous read-only login nick. Derived from the channel name so
/// reconnects to the same room reuse the same identity.
fn anonymous_nick(channel: &str) -> String {
    let n: u32 = channel.bytes().fold(0u32, |acc, b| {
        acc.wrapping_mul(31).wrapping_add(b as u32)
    });
    format!("justinfan{}", 10_000 + n % 80_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_nick_is_stable() {
        assert_eq!(anonymous_nick("somechannel"), anonymous_nick("somechannel"));
        let nick = anonymous_nick("somechannel");
        assert!(nick.starts_with("justinfan"));
    }
}
