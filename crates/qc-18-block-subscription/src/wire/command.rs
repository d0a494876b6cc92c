//! Inbound command decoding.
//!
//! Two framings, chosen per server:
//!
//! | mode     | `n` (accepted feed) | `s` (irreversible from height) |
//! |----------|---------------------|--------------------------------|
//! | `binary` | `b'n'`              | `b's'` + `i32` little-endian   |
//! | `line`   | `"n\n"`             | `"s <height>\n"` or `"s\n"`    |
//!
//! Decoding is incremental: bytes are fed as they arrive and any incomplete
//! tail is kept for the next read.

use crate::domain::ProtocolMode;
use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Subscribe to the live accepted-block feed
pub const CMD_SUBSCRIBE_ACCEPTED: u8 = b'n';

/// Subscribe to the irreversible catch-up stream
pub const CMD_SUBSCRIBE_IRREVERSIBLE: u8 = b's';

/// Width of the binary `s` argument
const HEIGHT_ARG_SIZE: usize = 4;

/// One framed command as it came off the wire, not yet interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    /// Command identifier byte
    pub id: u8,
    /// Argument bytes (binary: fixed width; line: text after the identifier)
    pub argument: Bytes,
}

/// An interpreted client command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SubscribeAccepted,
    /// `from_height` is the last height the client has; 0 or less means
    /// "from now". Same width as the binary wire argument.
    SubscribeIrreversible { from_height: i32 },
}

impl Command {
    /// Interpret a raw command.
    pub fn parse(raw: &RawCommand, mode: ProtocolMode) -> Result<Self, ProtocolError> {
        match raw.id {
            CMD_SUBSCRIBE_ACCEPTED => Ok(Command::SubscribeAccepted),
            CMD_SUBSCRIBE_IRREVERSIBLE => {
                let from_height = match mode {
                    ProtocolMode::Binary => parse_binary_height(&raw.argument)?,
                    ProtocolMode::Line => parse_text_height(&raw.argument)?,
                };
                Ok(Command::SubscribeIrreversible { from_height })
            }
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }

    /// Client side encoding.
    pub fn encode(&self, mode: ProtocolMode) -> Bytes {
        let mut out = BytesMut::new();
        match (self, mode) {
            (Command::SubscribeAccepted, ProtocolMode::Binary) => {
                out.put_u8(CMD_SUBSCRIBE_ACCEPTED);
            }
            (Command::SubscribeAccepted, ProtocolMode::Line) => {
                out.extend_from_slice(b"n\n");
            }
            (Command::SubscribeIrreversible { from_height }, ProtocolMode::Binary) => {
                out.put_u8(CMD_SUBSCRIBE_IRREVERSIBLE);
                out.put_i32_le(*from_height);
            }
            (Command::SubscribeIrreversible { from_height }, ProtocolMode::Line) => {
                out.extend_from_slice(format!("s {}\n", from_height).as_bytes());
            }
        }
        out.freeze()
    }
}

fn parse_binary_height(argument: &[u8]) -> Result<i32, ProtocolError> {
    let bytes: [u8; HEIGHT_ARG_SIZE] =
        argument
            .try_into()
            .map_err(|_| ProtocolError::MalformedArgument {
                command: CMD_SUBSCRIBE_IRREVERSIBLE as char,
                reason: format!("expected {} bytes, got {}", HEIGHT_ARG_SIZE, argument.len()),
            })?;
    Ok(i32::from_le_bytes(bytes))
}

fn parse_text_height(argument: &[u8]) -> Result<i32, ProtocolError> {
    let malformed = |reason: String| ProtocolError::MalformedArgument {
        command: CMD_SUBSCRIBE_IRREVERSIBLE as char,
        reason,
    };

    let text = std::str::from_utf8(argument).map_err(|e| malformed(e.to_string()))?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    text.parse::<i32>()
        .map_err(|e| malformed(format!("{:?}: {}", text, e)))
}

/// Incremental, resumable command decoder for one connection.
#[derive(Debug)]
pub struct CommandDecoder {
    mode: ProtocolMode,
    buf: BytesMut,
    max_line_length: usize,
    /// Line mode: skipping the rest of an overlong line
    discarding: bool,
}

impl CommandDecoder {
    pub fn new(mode: ProtocolMode, max_line_length: usize) -> Self {
        Self {
            mode,
            buf: BytesMut::new(),
            max_line_length,
            discarding: false,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes held back waiting for the rest of a command
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete command, if any. Call until it returns `None`.
    ///
    /// Unknown command identifiers are still returned as [`RawCommand`]s so
    /// the caller can log them; only framing problems surface as errors.
    pub fn next_command(&mut self) -> Option<Result<RawCommand, ProtocolError>> {
        match self.mode {
            ProtocolMode::Binary => self.next_binary(),
            ProtocolMode::Line => self.next_line(),
        }
    }

    fn next_binary(&mut self) -> Option<Result<RawCommand, ProtocolError>> {
        loop {
            let id = *self.buf.first()?;
            match id {
                // Clients that terminate commands with a newline
                b'\n' | b'\r' | b' ' => {
                    self.buf.advance(1);
                }
                CMD_SUBSCRIBE_IRREVERSIBLE => {
                    if self.buf.len() < 1 + HEIGHT_ARG_SIZE {
                        return None;
                    }
                    self.buf.advance(1);
                    let argument = self.buf.split_to(HEIGHT_ARG_SIZE).freeze();
                    return Some(Ok(RawCommand { id, argument }));
                }
                _ => {
                    self.buf.advance(1);
                    return Some(Ok(RawCommand {
                        id,
                        argument: Bytes::new(),
                    }));
                }
            }
        }
    }

    fn next_line(&mut self) -> Option<Result<RawCommand, ProtocolError>> {
        loop {
            let newline = self.buf.iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        self.buf.advance(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buf.clear();
                        return None;
                    }
                }
            }

            let Some(pos) = newline else {
                if self.buf.len() > self.max_line_length {
                    self.buf.clear();
                    self.discarding = true;
                    return Some(Err(ProtocolError::LineTooLong {
                        max: self.max_line_length,
                    }));
                }
                return None;
            };

            let line = self.buf.split_to(pos + 1);
            if pos > self.max_line_length {
                return Some(Err(ProtocolError::LineTooLong {
                    max: self.max_line_length,
                }));
            }

            let text = line[..pos].trim_ascii();
            let Some((&id, rest)) = text.split_first() else {
                // Blank line
                continue;
            };
            return Some(Ok(RawCommand {
                id,
                argument: Bytes::copy_from_slice(rest.trim_ascii()),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(decoder: &mut CommandDecoder) -> Vec<Result<RawCommand, ProtocolError>> {
        std::iter::from_fn(|| decoder.next_command()).collect()
    }

    fn parse_all(decoder: &mut CommandDecoder, mode: ProtocolMode) -> Vec<Command> {
        drain(decoder)
            .into_iter()
            .filter_map(|r| r.ok())
            .filter_map(|raw| Command::parse(&raw, mode).ok())
            .collect()
    }

    #[test]
    fn test_binary_subscribe_accepted() {
        let mut decoder = CommandDecoder::new(ProtocolMode::Binary, 64);
        decoder.extend(b"n");
        assert_eq!(
            parse_all(&mut decoder, ProtocolMode::Binary),
            vec![Command::SubscribeAccepted]
        );
    }

    #[test]
    fn test_binary_split_argument() {
        let mut decoder = CommandDecoder::new(ProtocolMode::Binary, 64);
        let bytes = Command::SubscribeIrreversible { from_height: 50 }.encode(ProtocolMode::Binary);

        decoder.extend(&bytes[..3]);
        assert!(decoder.next_command().is_none());
        assert_eq!(decoder.buffered(), 3);

        decoder.extend(&bytes[3..]);
        assert_eq!(
            parse_all(&mut decoder, ProtocolMode::Binary),
            vec![Command::SubscribeIrreversible { from_height: 50 }]
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_binary_argument_may_contain_newline_byte() {
        let mut decoder = CommandDecoder::new(ProtocolMode::Binary, 64);
        // 10 == b'\n'
        decoder.extend(&Command::SubscribeIrreversible { from_height: 10 }.encode(ProtocolMode::Binary));
        assert_eq!(
            parse_all(&mut decoder, ProtocolMode::Binary),
            vec![Command::SubscribeIrreversible { from_height: 10 }]
        );
    }

    #[test]
    fn test_binary_unknown_byte_is_surfaced_then_skipped() {
        let mut decoder = CommandDecoder::new(ProtocolMode::Binary, 64);
        decoder.extend(b"xn");
        let out = drain(&mut decoder);
        assert_eq!(out.len(), 2);

        let unknown = out[0].clone().unwrap();
        assert_eq!(
            Command::parse(&unknown, ProtocolMode::Binary),
            Err(ProtocolError::UnknownCommand(b'x'))
        );
        assert_eq!(out[1].clone().unwrap().id, b'n');
    }

    #[test]
    fn test_binary_negative_height() {
        let raw = RawCommand {
            id: b's',
            argument: Bytes::copy_from_slice(&(-1i32).to_le_bytes()),
        };
        assert_eq!(
            Command::parse(&raw, ProtocolMode::Binary),
            Ok(Command::SubscribeIrreversible { from_height: -1 })
        );
    }

    #[test]
    fn test_extreme_heights_encode_exactly() {
        for from_height in [i32::MAX, i32::MIN] {
            let command = Command::SubscribeIrreversible { from_height };
            for mode in [ProtocolMode::Binary, ProtocolMode::Line] {
                let mut decoder = CommandDecoder::new(mode, 64);
                decoder.extend(&command.encode(mode));
                assert_eq!(parse_all(&mut decoder, mode), vec![command]);
            }
        }
    }

    #[test]
    fn test_line_height_out_of_range_rejected() {
        let mut decoder = CommandDecoder::new(ProtocolMode::Line, 64);
        decoder.extend(b"s 4294967296\n");
        let raw = decoder.next_command().unwrap().unwrap();
        assert!(matches!(
            Command::parse(&raw, ProtocolMode::Line),
            Err(ProtocolError::MalformedArgument { command: 's', .. })
        ));
    }

    #[test]
    fn test_line_commands() {
        let mut decoder = CommandDecoder::new(ProtocolMode::Line, 64);
        decoder.extend(b"n\r\ns 1200\n\ns\n");
        assert_eq!(
            parse_all(&mut decoder, ProtocolMode::Line),
            vec![
                Command::SubscribeAccepted,
                Command::SubscribeIrreversible { from_height: 1200 },
                Command::SubscribeIrreversible { from_height: 0 },
            ]
        );
    }

    #[test]
    fn test_line_malformed_height() {
        let mut decoder = CommandDecoder::new(ProtocolMode::Line, 64);
        decoder.extend(b"s abc\n");
        let raw = decoder.next_command().unwrap().unwrap();
        assert!(matches!(
            Command::parse(&raw, ProtocolMode::Line),
            Err(ProtocolError::MalformedArgument { command: 's', .. })
        ));
    }

    #[test]
    fn test_line_too_long_is_discarded_and_decoding_resumes() {
        let mut decoder = CommandDecoder::new(ProtocolMode::Line, 16);
        decoder.extend(&[b'z'; 20]);
        assert_eq!(
            decoder.next_command(),
            Some(Err(ProtocolError::LineTooLong { max: 16 }))
        );
        assert_eq!(decoder.buffered(), 0);

        // Rest of the long line, then a valid command
        decoder.extend(b"zzzz\nn\n");
        assert_eq!(
            parse_all(&mut decoder, ProtocolMode::Line),
            vec![Command::SubscribeAccepted]
        );
    }

    fn arb_command() -> impl Strategy<Value = Command> {
        prop_oneof![
            Just(Command::SubscribeAccepted),
            (0i32..=i32::MAX)
                .prop_map(|from_height| Command::SubscribeIrreversible { from_height }),
        ]
    }

    proptest! {
        #[test]
        fn prop_decoding_is_independent_of_read_boundaries(
            commands in prop::collection::vec(arb_command(), 1..20),
            chunk in 1usize..8,
            line_mode in any::<bool>(),
        ) {
            let mode = if line_mode { ProtocolMode::Line } else { ProtocolMode::Binary };
            let stream: Vec<u8> = commands
                .iter()
                .flat_map(|c| c.encode(mode).to_vec())
                .collect();

            let mut decoder = CommandDecoder::new(mode, 64);
            let mut decoded = Vec::new();
            for piece in stream.chunks(chunk) {
                decoder.extend(piece);
                decoded.extend(parse_all(&mut decoder, mode));
            }

            prop_assert_eq!(decoded, commands);
            prop_assert_eq!(decoder.buffered(), 0);
        }
    }
}
