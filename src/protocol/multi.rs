//! Submessage extraction from relayed multiplayer data frames.
//!
//! Opcodes 19/20/25 wrap a `multibuf` of tagged in-game messages. The tracker
//! only understands the handful of tags that describe scoreboard-relevant
//! events; everything else has a release-specific length, so the scan stops at
//! the first unknown tag (games send one logical message per frame).

use super::codec::{ProtocolError, OP_MDATA_ACK, OP_MDATA_NORM, OP_OBSDATA};

const MULTI_KILL: u8 = 3;
const MULTI_PLAYER_EXPLODE: u8 = 5;
const MULTI_MESSAGE: u8 = 6;
const MULTI_QUIT: u8 = 7;
const MULTI_OBS_MESSAGE: u8 = 61;

/// One in-game submessage the tracker cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiMessage {
    /// A player killed another (or themselves).
    Kill {
        /// Killer slot index.
        killer_slot: u8,
        /// Victim slot index.
        victim_slot: u8,
    },
    /// A ship exploded without a credited killer.
    PlayerExplode {
        /// Exploding slot index.
        slot: u8,
    },
    /// In-game chat line.
    Message {
        /// Sender slot index.
        sender_slot: u8,
        /// Chat text.
        text: String,
    },
    /// A player left the game.
    Quit {
        /// Quitting slot index.
        slot: u8,
    },
    /// Chat line relayed from an observer.
    ObserverMessage {
        /// Sender slot index.
        sender_slot: u8,
        /// Chat text.
        text: String,
    },
}

/// Decoded header and recognized submessages of an MDATA frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiPayload {
    /// Slot that produced the frame.
    pub sender_slot: u8,
    /// Recognized submessages in wire order.
    pub messages: Vec<MultiMessage>,
}

/// Decode opcode 19 (`u8 op, u32 token, u8 sender, multibuf`), opcode 20
/// (same with a `u32` packet number before the multibuf), or opcode 25
/// (observer data, laid out like 19).
pub fn decode_mdata(opcode: u8, data: &[u8]) -> Result<MultiPayload, ProtocolError> {
    let body = match opcode {
        OP_MDATA_NORM | OP_OBSDATA => 6,
        OP_MDATA_ACK => 10,
        _ => return Err(ProtocolError::Malformed { opcode, expected: "mdata", actual: data.len() }),
    };
    if data.len() < body {
        return Err(ProtocolError::Malformed { opcode, expected: "at least 6", actual: data.len() });
    }
    Ok(MultiPayload {
        sender_slot: data[5],
        messages: scan_multibuf(&data[body..]),
    })
}

/// Walk the multibuf, collecting recognized tags until an unknown one.
fn scan_multibuf(buf: &[u8]) -> Vec<MultiMessage> {
    let mut messages = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        match buf[pos] {
            MULTI_KILL if pos + 3 <= buf.len() => {
                messages.push(MultiMessage::Kill {
                    killer_slot: buf[pos + 1],
                    victim_slot: buf[pos + 2],
                });
                pos += 3;
            }
            MULTI_PLAYER_EXPLODE if pos + 2 <= buf.len() => {
                messages.push(MultiMessage::PlayerExplode { slot: buf[pos + 1] });
                pos += 2;
            }
            MULTI_QUIT if pos + 2 <= buf.len() => {
                messages.push(MultiMessage::Quit { slot: buf[pos + 1] });
                pos += 2;
            }
            tag @ (MULTI_MESSAGE | MULTI_OBS_MESSAGE) if pos + 2 <= buf.len() => {
                let sender_slot = buf[pos + 1];
                let text_start = pos + 2;
                let nul = buf[text_start..]
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(buf.len() - text_start);
                let text = String::from_utf8_lossy(&buf[text_start..text_start + nul])
                    .trim()
                    .to_string();
                if tag == MULTI_MESSAGE {
                    messages.push(MultiMessage::Message { sender_slot, text });
                } else {
                    messages.push(MultiMessage::ObserverMessage { sender_slot, text });
                }
                pos = text_start + nul + 1;
            }
            _ => break,
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(opcode: u8, multibuf: &[u8]) -> Vec<u8> {
        let mut data = vec![opcode];
        data.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        data.push(2); // sender slot
        if opcode == OP_MDATA_ACK {
            data.extend_from_slice(&41u32.to_le_bytes());
        }
        data.extend_from_slice(multibuf);
        data
    }

    #[test]
    fn test_kill_submessage() {
        let payload = decode_mdata(OP_MDATA_NORM, &frame(OP_MDATA_NORM, &[3, 0, 1])).unwrap();
        assert_eq!(payload.sender_slot, 2);
        assert_eq!(
            payload.messages,
            vec![MultiMessage::Kill { killer_slot: 0, victim_slot: 1 }]
        );
    }

    #[test]
    fn test_mdata_ack_offset() {
        let payload = decode_mdata(OP_MDATA_ACK, &frame(OP_MDATA_ACK, &[7, 4])).unwrap();
        assert_eq!(payload.messages, vec![MultiMessage::Quit { slot: 4 }]);
    }

    #[test]
    fn test_message_text() {
        let payload =
            decode_mdata(OP_MDATA_NORM, &frame(OP_MDATA_NORM, b"\x06\x01gg wp\0")).unwrap();
        assert_eq!(
            payload.messages,
            vec![MultiMessage::Message { sender_slot: 1, text: "gg wp".to_string() }]
        );
    }

    #[test]
    fn test_observer_message() {
        let payload =
            decode_mdata(OP_OBSDATA, &frame(OP_OBSDATA, b"\x3d\x00nice shot\0")).unwrap();
        assert_eq!(
            payload.messages,
            vec![MultiMessage::ObserverMessage { sender_slot: 0, text: "nice shot".to_string() }]
        );
    }

    #[test]
    fn test_unknown_tag_ends_scan() {
        let payload =
            decode_mdata(OP_MDATA_NORM, &frame(OP_MDATA_NORM, &[3, 0, 1, 99, 1, 2, 3])).unwrap();
        assert_eq!(payload.messages.len(), 1);
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(decode_mdata(OP_MDATA_NORM, &[19, 0, 0]).is_err());
        assert!(decode_mdata(OP_MDATA_ACK, &frame(OP_MDATA_NORM, &[])[..6]).is_err());
    }

    #[test]
    fn test_empty_multibuf() {
        let payload = decode_mdata(OP_MDATA_NORM, &frame(OP_MDATA_NORM, &[])).unwrap();
        assert!(payload.messages.is_empty());
    }
}
