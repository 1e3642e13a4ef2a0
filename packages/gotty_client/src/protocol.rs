//! Wire format of gotty's `webtty` websocket protocol.
//!
//! Every frame is a text message whose first character is a type tag and
//! whose remainder is the payload. Terminal output is base64 encoded; input
//! and control payloads travel as-is.

use data_encoding::BASE64;
use serde::Serialize;

/// Sub-protocol the server requires during the websocket upgrade.
pub const SUBPROTOCOL: &str = "webtty";

/// Client → server: keystrokes.
pub const INPUT: char = '1';
/// Client → server: keepalive.
pub const PING: char = '2';

/// Server → client: base64 terminal output.
pub const OUTPUT: char = '1';
/// Server → client: keepalive reply.
pub const PONG: char = '2';
/// Server → client: window title.
pub const SET_TITLE: char = '3';
/// Server → client: JSON preferences for the web terminal.
pub const SET_PREFERENCES: char = '4';
/// Server → client: reconnect interval.
pub const SET_RECONNECT: char = '5';

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Empty message; nothing to do.
    Empty,
    Output(String),
    Pong,
    SetTitle(String),
    SetPreferences(String),
    SetReconnect(String),
    Unknown { tag: char, payload: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 output payload: {0}")]
    InvalidBase64(String),
}

/// Decode one inbound message.
///
/// Output bytes that are not valid UTF-8 are replaced instead of failing the
/// frame; only a malformed base64 payload is an error.
pub fn decode(raw: &str) -> Result<Frame, DecodeError> {
    let mut chars = raw.chars();
    let Some(tag) = chars.next() else {
        return Ok(Frame::Empty);
    };
    let payload = chars.as_str();

    let frame = match tag {
        OUTPUT => {
            let bytes = BASE64
                .decode(payload.as_bytes())
                .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
            Frame::Output(String::from_utf8_lossy(&bytes).into_owned())
        }
        PONG => Frame::Pong,
        SET_TITLE => Frame::SetTitle(payload.to_string()),
        SET_PREFERENCES => Frame::SetPreferences(payload.to_string()),
        SET_RECONNECT => Frame::SetReconnect(payload.to_string()),
        tag => Frame::Unknown {
            tag,
            payload: payload.to_string(),
        },
    };
    Ok(frame)
}

/// Input frame for one command line. The trailing newline is what makes the
/// remote shell run it.
pub fn encode_input(command: &str) -> String {
    let mut frame = String::with_capacity(command.len() + 2);
    frame.push(INPUT);
    frame.push_str(command);
    frame.push('\n');
    frame
}

pub fn encode_ping() -> String {
    PING.to_string()
}

/// Output frame as the server would send it.
pub fn encode_output(text: &str) -> String {
    format!("{OUTPUT}{}", BASE64.encode(text.as_bytes()))
}

/// First message after the websocket opens.
#[derive(Debug, Serialize)]
struct Handshake<'a> {
    #[serde(rename = "Arguments")]
    arguments: &'a str,
    #[serde(rename = "AuthToken")]
    auth_token: &'a str,
}

/// Handshake JSON. The auth token is the plain `user:pass` pair, unlike the
/// HTTP `Authorization` header which base64-encodes it.
pub fn encode_handshake(auth_token: &str, arguments: &str) -> String {
    let handshake = Handshake {
        arguments,
        auth_token,
    };
    // Two borrowed strings cannot fail to serialize
    serde_json::to_string(&handshake).unwrap_or_default()
}

/// Value for the `Authorization` header of the preflight and upgrade requests.
pub fn basic_auth_header(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64.encode(format!("{username}:{password}").as_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_output_frame() {
        let frame = decode("1aGVsbG8K").unwrap();
        assert_eq!(frame, Frame::Output("hello\n".to_string()));
    }

    #[test]
    fn decode_output_replaces_invalid_utf8() {
        // 0xff is never valid UTF-8
        let raw = format!("1{}", BASE64.encode(&[b'o', b'k', 0xff]));
        let Frame::Output(text) = decode(&raw).unwrap() else {
            panic!("expected output frame");
        };
        assert!(text.starts_with("ok"));
        assert!(text.ends_with('\u{FFFD}'));
    }

    #[test]
    fn decode_output_with_empty_payload() {
        assert_eq!(decode("1").unwrap(), Frame::Output(String::new()));
    }

    #[test]
    fn decode_invalid_base64_is_an_error() {
        let err = decode("1!!not base64!!").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBase64(_)));
    }

    #[test]
    fn decode_empty_message() {
        assert_eq!(decode("").unwrap(), Frame::Empty);
    }

    #[test]
    fn decode_control_frames() {
        assert_eq!(decode("2").unwrap(), Frame::Pong);
        assert_eq!(
            decode("3bash (host)").unwrap(),
            Frame::SetTitle("bash (host)".to_string())
        );
        assert_eq!(
            decode("4{\"font-size\":12}").unwrap(),
            Frame::SetPreferences("{\"font-size\":12}".to_string())
        );
        assert_eq!(
            decode("510").unwrap(),
            Frame::SetReconnect("10".to_string())
        );
    }

    #[test]
    fn decode_unknown_tag() {
        assert_eq!(
            decode("9whatever").unwrap(),
            Frame::Unknown {
                tag: '9',
                payload: "whatever".to_string()
            }
        );
    }

    #[test]
    fn decode_multibyte_tag() {
        assert_eq!(
            decode("ééx").unwrap(),
            Frame::Unknown {
                tag: 'é',
                payload: "éx".to_string()
            }
        );
    }

    #[test]
    fn input_frame_has_tag_and_newline() {
        assert_eq!(encode_input("ls -la"), "1ls -la\n");
        assert_eq!(encode_input(""), "1\n");
    }

    #[test]
    fn ping_frame() {
        assert_eq!(encode_ping(), "2");
    }

    #[test]
    fn output_frame_decodes_back() {
        let frame = encode_output("total 0\r\n");
        assert_eq!(frame, "1dG90YWwgMA0K");
        assert_eq!(
            decode(&frame).unwrap(),
            Frame::Output("total 0\r\n".to_string())
        );
    }

    #[test]
    fn handshake_carries_plain_auth_token() {
        assert_eq!(
            encode_handshake("admin:admin", ""),
            r#"{"Arguments":"","AuthToken":"admin:admin"}"#
        );
    }

    #[test]
    fn basic_auth_header_is_base64() {
        assert_eq!(basic_auth_header("admin", "admin"), "Basic YWRtaW46YWRtaW4=");
    }
}
