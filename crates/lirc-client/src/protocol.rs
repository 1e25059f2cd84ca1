//! lircd wire protocol types and the packet reader state machine.
//!
//! lircd speaks newline-terminated ASCII. A single connection interleaves
//! replies to client commands with unsolicited broadcasts:
//!
//! ```text
//! BEGIN                      BEGIN                 0000000000f40bf0 00 KEY_UP Samsung
//! LIST                       SIGHUP
//! SUCCESS                    END
//! DATA
//! 2
//! Samsung
//! Amino
//! END
//! ```
//!
//! See <https://www.lirc.org/html/lircd.html> for the daemon side.

use std::fmt;

use serde::{Serialize, Serializer};

pub const KWD_BEGIN: &str = "BEGIN";
pub const KWD_SIGHUP: &str = "SIGHUP";
pub const KWD_DATA: &str = "DATA";
pub const KWD_END: &str = "END";
pub const KWD_SUCCESS: &str = "SUCCESS";
pub const KWD_ERROR: &str = "ERROR";

pub const CMD_VERSION: &str = "VERSION";
pub const CMD_LIST: &str = "LIST";
pub const CMD_SEND_ONCE: &str = "SEND_ONCE";
pub const CMD_SEND_START: &str = "SEND_START";
pub const CMD_SEND_STOP: &str = "SEND_STOP";

/// Errors raised while decoding lircd packets or their payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid sighup message")]
    InvalidSighup,

    #[error("invalid response format")]
    InvalidResponse,

    #[error("response command mismatch: sent {sent:?}, received {received:?}")]
    CommandMismatch { sent: String, received: String },

    #[error("missing response data")]
    MissingData,

    #[error("invalid hex value {0:?}")]
    InvalidHex(String),

    #[error("line exceeds maximum length")]
    LineTooLong,
}

/// A command understood by lircd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Version,
    ListRemotes,
    ListKeys { remote: String },
    SendOnce { remote: String, button: String, repeats: u32 },
    SendStart { remote: String, button: String },
    SendStop { remote: String, button: String },
}

impl fmt::Display for Command {
    /// Renders the exact line sent to the daemon, without the terminator.
    /// lircd echoes this text back in the response header.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Version => f.write_str(CMD_VERSION),
            Command::ListRemotes => f.write_str(CMD_LIST),
            Command::ListKeys { remote } => write!(f, "{CMD_LIST} {remote}"),
            Command::SendOnce {
                remote,
                button,
                repeats,
            } => {
                write!(f, "{CMD_SEND_ONCE} {remote} {button}")?;
                if *repeats > 0 {
                    write!(f, " {repeats}")?;
                }
                Ok(())
            }
            Command::SendStart { remote, button } => {
                write!(f, "{CMD_SEND_START} {remote} {button}")
            }
            Command::SendStop { remote, button } => write!(f, "{CMD_SEND_STOP} {remote} {button}"),
        }
    }
}

/// Reply to a command, as framed by `BEGIN` .. `END`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    /// Command text echoed by the daemon.
    pub command: String,
    pub success: bool,
    pub data: Vec<String>,
}

/// A button known to the daemon, either listed or received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ButtonInfo {
    pub remote_control: String,
    pub button: String,
    #[serde(serialize_with = "serialize_hex")]
    pub code: Vec<u8>,
}

/// A button press broadcast by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedButton {
    #[serde(flatten)]
    pub button: ButtonInfo,
    pub repeat: u32,
}

fn serialize_hex<S: Serializer>(code: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(code))
}

/// One logical unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Response(ResponsePacket),
    /// `BEGIN`/`SIGHUP`/`END`: the daemon re-read its configuration.
    Sighup,
    Button(DecodedButton),
}

#[derive(Debug, Default)]
enum ReadState {
    #[default]
    Idle,
    Begun,
    Sighup,
    Status {
        command: String,
    },
    DataOrEnd {
        command: String,
        success: bool,
    },
    DataCount {
        command: String,
        success: bool,
    },
    DataLines {
        command: String,
        success: bool,
        remaining: usize,
        data: Vec<String>,
    },
    End {
        command: String,
        success: bool,
        data: Vec<String>,
    },
}

/// Line-at-a-time packet decoder.
///
/// Feed every line received from the daemon in order; a complete packet is
/// returned once its last line has been seen. Broadcast lines that do not
/// carry four fields are dropped.
#[derive(Debug, Default)]
pub struct PacketReader {
    state: ReadState,
}

impl PacketReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when no packet is partially read.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ReadState::Idle)
    }

    /// Consume one line (without its terminator).
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the line violates the packet grammar.
    /// The reader is reset to idle in that case.
    pub fn feed(&mut self, line: &str) -> Result<Option<Packet>, ProtocolError> {
        let state = std::mem::take(&mut self.state);
        let (next, packet) = Self::step(state, line)?;
        self.state = next;
        Ok(packet)
    }

    fn step(state: ReadState, line: &str) -> Result<(ReadState, Option<Packet>), ProtocolError> {
        let next = match state {
            ReadState::Idle if line == KWD_BEGIN => ReadState::Begun,
            ReadState::Idle => return Ok((ReadState::Idle, parse_broadcast(line)?)),
            ReadState::Begun if line == KWD_SIGHUP => ReadState::Sighup,
            ReadState::Begun => ReadState::Status {
                command: line.to_string(),
            },
            ReadState::Sighup if line == KWD_END => {
                return Ok((ReadState::Idle, Some(Packet::Sighup)));
            }
            ReadState::Sighup => return Err(ProtocolError::InvalidSighup),
            ReadState::Status { command } => match line {
                KWD_SUCCESS | KWD_ERROR => ReadState::DataOrEnd {
                    command,
                    success: line == KWD_SUCCESS,
                },
                _ => return Err(ProtocolError::InvalidResponse),
            },
            ReadState::DataOrEnd { command, success } => match line {
                KWD_DATA => ReadState::DataCount { command, success },
                KWD_END => return Ok((ReadState::Idle, Some(response(command, success, vec![])))),
                _ => return Err(ProtocolError::InvalidResponse),
            },
            ReadState::DataCount { command, success } => {
                let count: usize = line
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::InvalidResponse)?;
                // The count comes off the wire; don't trust it for allocation.
                let data = Vec::with_capacity(count.min(64));
                if count == 0 {
                    ReadState::End {
                        command,
                        success,
                        data,
                    }
                } else {
                    ReadState::DataLines {
                        command,
                        success,
                        remaining: count,
                        data,
                    }
                }
            }
            ReadState::DataLines {
                command,
                success,
                remaining,
                mut data,
            } => {
                data.push(line.to_string());
                if remaining == 1 {
                    ReadState::End {
                        command,
                        success,
                        data,
                    }
                } else {
                    ReadState::DataLines {
                        command,
                        success,
                        remaining: remaining - 1,
                        data,
                    }
                }
            }
            ReadState::End {
                command,
                success,
                data,
            } => {
                if line != KWD_END {
                    return Err(ProtocolError::InvalidResponse);
                }
                return Ok((ReadState::Idle, Some(response(command, success, data))));
            }
        };
        Ok((next, None))
    }
}

fn response(command: String, success: bool, data: Vec<String>) -> Packet {
    Packet::Response(ResponsePacket {
        command,
        success,
        data,
    })
}

/// Parse a button broadcast: `<code> <repeat> <button> <remote>`.
///
/// Lines with fewer than four fields yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidHex`] if the code or repeat count is not
/// hexadecimal.
pub fn parse_broadcast(line: &str) -> Result<Option<Packet>, ProtocolError> {
    let fields: Vec<&str> = line.split(' ').collect();
    if fields.len() < 4 {
        tracing::trace!("Dropping malformed broadcast: {:?}", line);
        return Ok(None);
    }

    let code = decode_hex(fields[0])?;
    let repeat = u32::from_str_radix(fields[1], 16)
        .map_err(|_| ProtocolError::InvalidHex(fields[1].to_string()))?;

    Ok(Some(Packet::Button(DecodedButton {
        button: ButtonInfo {
            remote_control: fields[3].to_string(),
            button: fields[2].to_string(),
            code,
        },
        repeat,
    })))
}

/// Parse one `LIST <remote>` data line: `<code> <button>`.
///
/// Lines with fewer than two fields yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidHex`] if the code is not hexadecimal.
pub fn parse_key_line(remote: &str, line: &str) -> Result<Option<ButtonInfo>, ProtocolError> {
    let fields: Vec<&str> = line.split(' ').collect();
    if fields.len() < 2 {
        return Ok(None);
    }

    Ok(Some(ButtonInfo {
        remote_control: remote.to_string(),
        button: fields[1].to_string(),
        code: decode_hex(fields[0])?,
    }))
}

fn decode_hex(text: &str) -> Result<Vec<u8>, ProtocolError> {
    hex::decode(text).map_err(|_| ProtocolError::InvalidHex(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(reader: &mut PacketReader, text: &str) -> Vec<Packet> {
        text.lines()
            .filter_map(|line| reader.feed(line).unwrap())
            .collect()
    }

    #[test]
    fn test_command_serialization() {
        assert_eq!(Command::Version.to_string(), "VERSION");
        assert_eq!(Command::ListRemotes.to_string(), "LIST");
        assert_eq!(
            Command::ListKeys {
                remote: "Samsung".to_string()
            }
            .to_string(),
            "LIST Samsung"
        );
        assert_eq!(
            Command::SendStart {
                remote: "Samsung".to_string(),
                button: "KEY_UP".to_string()
            }
            .to_string(),
            "SEND_START Samsung KEY_UP"
        );
        assert_eq!(
            Command::SendStop {
                remote: "Samsung".to_string(),
                button: "KEY_UP".to_string()
            }
            .to_string(),
            "SEND_STOP Samsung KEY_UP"
        );
    }

    #[test]
    fn test_send_once_repeats_only_when_positive() {
        let once = |repeats| Command::SendOnce {
            remote: "Amino".to_string(),
            button: "KEY_PLAY".to_string(),
            repeats,
        };
        assert_eq!(once(0).to_string(), "SEND_ONCE Amino KEY_PLAY");
        assert_eq!(once(3).to_string(), "SEND_ONCE Amino KEY_PLAY 3");
    }

    #[test]
    fn test_success_with_data() {
        let mut reader = PacketReader::new();
        let packets = feed_all(
            &mut reader,
            "BEGIN\nLIST\nSUCCESS\nDATA\n2\nSamsung\nAmino\nEND\n",
        );

        assert_eq!(
            packets,
            vec![Packet::Response(ResponsePacket {
                command: "LIST".to_string(),
                success: true,
                data: vec!["Samsung".to_string(), "Amino".to_string()],
            })]
        );
        assert!(reader.is_idle());
    }

    #[test]
    fn test_data_length_matches_count() {
        for n in [0usize, 1, 5, 40] {
            let mut text = format!("BEGIN\nLIST\nSUCCESS\nDATA\n{n}\n");
            for i in 0..n {
                text.push_str(&format!("remote-{i}\n"));
            }
            text.push_str("END\n");

            let mut reader = PacketReader::new();
            let packets = feed_all(&mut reader, &text);
            let [Packet::Response(resp)] = packets.as_slice() else {
                panic!("Expected a single response, got {packets:?}");
            };
            assert!(resp.success);
            assert_eq!(resp.data.len(), n);
        }
    }

    #[test]
    fn test_error_without_data() {
        let mut reader = PacketReader::new();
        let packets = feed_all(&mut reader, "BEGIN\nSEND_ONCE a b\nERROR\nEND\n");

        assert_eq!(
            packets,
            vec![Packet::Response(ResponsePacket {
                command: "SEND_ONCE a b".to_string(),
                success: false,
                data: vec![],
            })]
        );
    }

    #[test]
    fn test_data_lines_may_look_like_keywords() {
        let mut reader = PacketReader::new();
        let packets = feed_all(&mut reader, "BEGIN\nLIST\nSUCCESS\nDATA\n2\nBEGIN\nEND\nEND\n");

        let [Packet::Response(resp)] = packets.as_slice() else {
            panic!("Expected a single response, got {packets:?}");
        };
        assert_eq!(resp.data, vec!["BEGIN", "END"]);
    }

    #[test]
    fn test_sighup() {
        let mut reader = PacketReader::new();
        let packets = feed_all(&mut reader, "BEGIN\nSIGHUP\nEND\n");
        assert_eq!(packets, vec![Packet::Sighup]);
    }

    #[test]
    fn test_invalid_sighup() {
        let mut reader = PacketReader::new();
        reader.feed("BEGIN").unwrap();
        reader.feed("SIGHUP").unwrap();
        assert_eq!(reader.feed("BOGUS"), Err(ProtocolError::InvalidSighup));
        assert!(reader.is_idle());
    }

    #[test]
    fn test_invalid_status() {
        let mut reader = PacketReader::new();
        reader.feed("BEGIN").unwrap();
        reader.feed("VERSION").unwrap();
        let err = reader.feed("MAYBE").unwrap_err();
        assert_eq!(err, ProtocolError::InvalidResponse);
        assert_eq!(err.to_string(), "invalid response format");
    }

    #[test]
    fn test_invalid_data_or_end() {
        let mut reader = PacketReader::new();
        for line in ["BEGIN", "VERSION", "SUCCESS"] {
            reader.feed(line).unwrap();
        }
        assert_eq!(reader.feed("STUFF"), Err(ProtocolError::InvalidResponse));
    }

    #[test]
    fn test_invalid_count() {
        for count in ["x", "-1", ""] {
            let mut reader = PacketReader::new();
            for line in ["BEGIN", "VERSION", "SUCCESS", "DATA"] {
                reader.feed(line).unwrap();
            }
            assert_eq!(reader.feed(count), Err(ProtocolError::InvalidResponse));
        }
    }

    #[test]
    fn test_missing_end_after_data() {
        let mut reader = PacketReader::new();
        for line in ["BEGIN", "VERSION", "SUCCESS", "DATA", "1", "0.10.1"] {
            reader.feed(line).unwrap();
        }
        assert_eq!(reader.feed("0.10.2"), Err(ProtocolError::InvalidResponse));
    }

    #[test]
    fn test_broadcast_decoding() {
        let mut reader = PacketReader::new();
        let packet = reader
            .feed("0000000000f40bf0 1a KEY_UP Samsung")
            .unwrap()
            .unwrap();

        assert_eq!(
            packet,
            Packet::Button(DecodedButton {
                button: ButtonInfo {
                    remote_control: "Samsung".to_string(),
                    button: "KEY_UP".to_string(),
                    code: vec![0x00, 0x00, 0x00, 0x00, 0x00, 0xf4, 0x0b, 0xf0],
                },
                repeat: 0x1a,
            })
        );
    }

    #[test]
    fn test_short_broadcast_is_dropped() {
        let mut reader = PacketReader::new();
        assert_eq!(reader.feed("0000000000f40bf0 00 KEY_UP"), Ok(None));
        assert_eq!(reader.feed(""), Ok(None));
        assert!(reader.is_idle());
    }

    #[test]
    fn test_broadcast_with_bad_hex() {
        let err = parse_broadcast("zz 00 KEY_UP Samsung").unwrap_err();
        assert_eq!(err, ProtocolError::InvalidHex("zz".to_string()));

        let err = parse_broadcast("00ff 0g KEY_UP Samsung").unwrap_err();
        assert_eq!(err, ProtocolError::InvalidHex("0g".to_string()));
    }

    #[test]
    fn test_interleaved_broadcast_and_response() {
        let mut reader = PacketReader::new();
        let packets = feed_all(
            &mut reader,
            "00ff 00 KEY_1 Amino\nBEGIN\nVERSION\nSUCCESS\nDATA\n1\n0.10.1\nEND\n00ff 01 KEY_1 Amino\n",
        );

        assert_eq!(packets.len(), 3);
        assert!(matches!(packets[0], Packet::Button(ref b) if b.repeat == 0));
        assert!(matches!(packets[1], Packet::Response(ref r) if r.data == ["0.10.1"]));
        assert!(matches!(packets[2], Packet::Button(ref b) if b.repeat == 1));
    }

    #[test]
    fn test_parse_key_line() {
        let key = parse_key_line("Samsung", "00000000000000f4 KEY_UP")
            .unwrap()
            .unwrap();
        assert_eq!(key.remote_control, "Samsung");
        assert_eq!(key.button, "KEY_UP");
        assert_eq!(key.code, vec![0, 0, 0, 0, 0, 0, 0, 0xf4]);

        assert_eq!(parse_key_line("Samsung", "KEY_UP"), Ok(None));
        assert!(parse_key_line("Samsung", "xyz KEY_UP").is_err());
    }

    #[test]
    fn test_button_serializes_code_as_hex() {
        let button = DecodedButton {
            button: ButtonInfo {
                remote_control: "Samsung".to_string(),
                button: "KEY_UP".to_string(),
                code: vec![0x00, 0xf4, 0x0b],
            },
            repeat: 2,
        };
        let json = serde_json::to_value(&button).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "remote_control": "Samsung",
                "button": "KEY_UP",
                "code": "00f40b",
                "repeat": 2
            })
        );
    }

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(
            ProtocolError::InvalidSighup.to_string(),
            "invalid sighup message"
        );
        let err = ProtocolError::CommandMismatch {
            sent: "VERSION".to_string(),
            received: "LIST".to_string(),
        };
        assert!(err.to_string().contains("response command mismatch"));
        assert!(err.to_string().contains("LIST"));
    }
}
