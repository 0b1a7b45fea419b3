//! Terminal chat client
//!
//! Reads commands from stdin, turns them into messages, and prints
//! whatever the server sends back. Commands:
//! `/join <room>`, `/leave [room]`, `/dm <user> <message...>`, `/quit`,
//! and bare text, which goes to the room joined last.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::ClientArgs;
use crate::connection::Connection;
use crate::error::ChatError;
use crate::message::Message;

const HELP: &str = "commands: /join <room>, /leave [room], /dm <user> <message>, /quit";

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join(String),
    Leave(Option<String>),
    Dm { to: String, body: String },
    Say(String),
    Quit,
    Empty,
}

/// Parse an input line. Errors carry the usage text to show the user.
pub fn parse_line(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    if !line.starts_with('/') {
        return Ok(Command::Say(line.to_string()));
    }

    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };

    match cmd.to_lowercase().as_str() {
        "/join" => match rest.split_whitespace().next() {
            Some(room) => Ok(Command::Join(room.to_string())),
            None => Err("usage: /join <room>".to_string()),
        },
        "/leave" => Ok(Command::Leave(
            rest.split_whitespace().next().map(str::to_string),
        )),
        "/dm" => {
            let Some((to, body)) = rest.split_once(char::is_whitespace) else {
                return Err("usage: /dm <user> <message>".to_string());
            };
            let body = body.trim();
            if body.is_empty() {
                return Err("usage: /dm <user> <message>".to_string());
            }
            Ok(Command::Dm {
                to: to.to_string(),
                body: body.to_string(),
            })
        }
        "/quit" => Ok(Command::Quit),
        _ => Err(HELP.to_string()),
    }
}

/// Client-side session state
#[derive(Debug, Clone)]
pub struct ClientState {
    username: String,
    current_room: Option<String>,
}

impl ClientState {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            current_room: None,
        }
    }

    pub fn current_room(&self) -> Option<&str> {
        self.current_room.as_deref()
    }

    pub fn registration(&self) -> Message {
        Message::Registration {
            username: self.username.clone(),
        }
    }

    /// Turn a command into the message to send, if any
    pub fn to_message(&mut self, command: Command) -> Result<Option<Message>, String> {
        let msg = match command {
            Command::Join(room) => {
                self.current_room = Some(room.clone());
                Message::RoomJoin {
                    username: self.username.clone(),
                    room,
                }
            }
            Command::Leave(room) => {
                let Some(room) = room.or_else(|| self.current_room.clone()) else {
                    return Err("usage: /leave <room>".to_string());
                };
                if self.current_room.as_deref() == Some(room.as_str()) {
                    self.current_room = None;
                }
                Message::RoomLeave {
                    username: self.username.clone(),
                    room,
                }
            }
            Command::Dm { to, body } => Message::direct_chat(self.username.as_str(), to, body),
            Command::Say(body) => {
                let Some(room) = self.current_room.clone() else {
                    return Err("Join a room first: /join <room>".to_string());
                };
                Message::room_chat(self.username.as_str(), room, body)
            }
            Command::Quit | Command::Empty => return Ok(None),
        };
        Ok(Some(msg))
    }
}

/// Format a server message for display
pub fn render(msg: &Message) -> Option<String> {
    match msg {
        Message::ServerNotice {
            text,
            room: Some(room),
        } if !room.is_empty() => Some(format!("[room:{}] * {}", room, text)),
        Message::ServerNotice { text, .. } => Some(format!("* {}", text)),
        Message::RoomChat {
            username,
            room,
            body,
        } => Some(format!("[room:{}] <{}> {}", room, username, body)),
        Message::DirectChat { from, to, body } => Some(format!("[dm {}→{}] {}", from, to, body)),
        _ => None,
    }
}

/// Connect, register, and run until stdin closes, `/quit`, or the server
/// goes away.
pub async fn run_client(args: ClientArgs) -> Result<(), ChatError> {
    let stream = TcpStream::connect(&args.server).await?;
    let peer = stream.peer_addr().ok();
    let connection = Arc::new(Connection::new(stream, peer));
    info!("Connected to {}", args.server);

    let mut state = ClientState::new(args.username.clone());
    connection.send(&state.registration()).await?;

    let reader = Arc::clone(&connection);
    let mut inbound = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            match reader.receive().await {
                Ok(msg) => {
                    if let Some(line) = render(&msg) {
                        stdout.write_all(line.as_bytes()).await?;
                        stdout.write_all(b"\n").await?;
                        stdout.flush().await?;
                    }
                }
                Err(ChatError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stderr = tokio::io::stderr();

    loop {
        tokio::select! {
            result = &mut inbound => {
                eprintln!("* server closed the connection");
                connection.close().await;
                return result.unwrap_or(Ok(()));
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let command = match parse_line(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => command,
                    Err(usage) => {
                        stderr.write_all(format!("{}\n", usage).as_bytes()).await?;
                        continue;
                    }
                };
                match state.to_message(command) {
                    Ok(Some(msg)) => connection.send(&msg).await?,
                    Ok(None) => {}
                    Err(usage) => stderr.write_all(format!("{}\n", usage).as_bytes()).await?,
                }
            }
        }
    }

    debug!("Leaving chat");
    connection.close().await;
    inbound.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("/join g"), Ok(Command::Join("g".into())));
        assert_eq!(parse_line("/leave"), Ok(Command::Leave(None)));
        assert_eq!(parse_line("/leave g"), Ok(Command::Leave(Some("g".into()))));
        assert_eq!(
            parse_line("/dm carol secret plans  here"),
            Ok(Command::Dm {
                to: "carol".into(),
                body: "secret plans  here".into()
            })
        );
        assert_eq!(parse_line("  hello there "), Ok(Command::Say("hello there".into())));
        assert_eq!(parse_line("/QUIT"), Ok(Command::Quit));
        assert_eq!(parse_line("   "), Ok(Command::Empty));
    }

    #[test]
    fn test_parse_usage_errors() {
        assert!(parse_line("/join").is_err());
        assert!(parse_line("/dm carol").is_err());
        assert!(parse_line("/dm carol   ").is_err());
        assert_eq!(parse_line("/room"), Err(HELP.to_string()));
    }

    #[test]
    fn test_state_tracks_current_room() {
        let mut state = ClientState::new("alice");
        assert!(state.to_message(Command::Say("hi".into())).is_err());

        state.to_message(Command::Join("g".into())).unwrap();
        assert_eq!(state.current_room(), Some("g"));
        assert_eq!(
            state.to_message(Command::Say("hi".into())).unwrap(),
            Some(Message::room_chat("alice", "g", "hi"))
        );

        assert_eq!(
            state.to_message(Command::Leave(None)).unwrap(),
            Some(Message::RoomLeave {
                username: "alice".into(),
                room: "g".into()
            })
        );
        assert_eq!(state.current_room(), None);
        assert!(state.to_message(Command::Leave(None)).is_err());
    }

    #[test]
    fn test_render() {
        assert_eq!(
            render(&Message::room_chat("alice", "g", "hi")).unwrap(),
            "[room:g] <alice> hi"
        );
        assert_eq!(
            render(&Message::direct_chat("alice", "carol", "secret")).unwrap(),
            "[dm alice→carol] secret"
        );
        assert_eq!(render(&Message::notice("hello")).unwrap(), "* hello");
        assert_eq!(
            render(&Message::room_notice("g", "bob joined the room")).unwrap(),
            "[room:g] * bob joined the room"
        );
        assert!(render(&Message::Unknown).is_none());
    }
}
