//! The SHMP wire grammar (spec §3/§6/§8), grounded in the teacher's
//! `serial/src/frame.rs` (control-byte/garbage/data framing via `nom`) and
//! `serial/src/command_raw.rs` (checksum placement), adapted from streaming
//! `nom` combinators to `nom::IResult` over complete buffers, since this
//! gateway's [`binding`] module already hands the framer whole byte chunks
//! rather than an incremental stream cursor.

use crate::consts::{ACK, CAN, MAX_FRAME_LEN, MIN_FRAME_LEN, NAK, SOF};
use crate::error::{Error, Result};
use cookie_factory as cf;
use nom::{bytes::complete::take, number::complete::be_u8};
use zwip_core::checksum::xor_sum;
use zwip_core::prelude::CommandType;

/// One parsed unit off the wire: either a single control byte or a whole
/// data frame. Garbage bytes preceding a recognizable frame are dropped
/// silently by the caller, per spec §4.B ("any other byte -> silently drop").
#[derive(Clone, Debug, PartialEq)]
pub enum SerialFrame {
    Ack,
    Nak,
    Can,
    Data(CommandFrame),
}

/// A decoded `TYPE | CMD | DATA` frame (the checksum is verified during
/// parsing and recomputed during serialization, never carried around).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandFrame {
    pub command_type: CommandType,
    pub function_type: u8,
    pub payload: Vec<u8>,
}

fn command_checksum(len: u8, command_type: u8, function_type: u8, payload: &[u8]) -> u8 {
    let mut buf = Vec::with_capacity(payload.len() + 3);
    buf.push(len);
    buf.push(command_type);
    buf.push(function_type);
    buf.extend_from_slice(payload);
    xor_sum(&buf)
}

impl CommandFrame {
    pub fn new(command_type: CommandType, function_type: u8, payload: Vec<u8>) -> Self {
        Self {
            command_type,
            function_type,
            payload,
        }
    }

    fn len_byte(&self) -> u8 {
        self.payload.len() as u8 + 3
    }

    /// Parses the bytes *after* the leading `SOF`, i.e. starting at `LEN`.
    /// Returns `Err(Error::Framing)` for `LEN < 3`, `LEN == 255`, or a
    /// checksum mismatch (spec §8 "LEN bounds"/"Bad checksum").
    pub fn parse_after_sof(i: &[u8]) -> Result<(&[u8], Self)> {
        let (i, len) = be_u8::<_, nom::error::Error<&[u8]>>(i).map_err(|_| Error::Framing)?;
        if len < MIN_FRAME_LEN || len > MAX_FRAME_LEN {
            return Err(Error::Framing);
        }
        let (i, command_type) =
            be_u8::<_, nom::error::Error<&[u8]>>(i).map_err(|_| Error::Framing)?;
        let command_type = CommandType::try_from(command_type).map_err(|_| Error::Framing)?;
        let (i, function_type) =
            be_u8::<_, nom::error::Error<&[u8]>>(i).map_err(|_| Error::Framing)?;
        let data_len = (len - 3) as usize;
        let (i, payload) =
            take::<_, _, nom::error::Error<&[u8]>>(data_len)(i).map_err(|_| Error::Framing)?;
        let (i, checksum) =
            be_u8::<_, nom::error::Error<&[u8]>>(i).map_err(|_| Error::Framing)?;

        let expected = command_checksum(len, command_type as u8, function_type, payload);
        if checksum != expected {
            return Err(Error::Framing);
        }

        Ok((
            i,
            Self {
                command_type,
                function_type,
                payload: payload.to_vec(),
            },
        ))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let len = self.len_byte();
        let checksum = command_checksum(
            len,
            self.command_type as u8,
            self.function_type,
            &self.payload,
        );
        let write = cf::sequence::tuple((
            cf::bytes::be_u8(SOF),
            cf::bytes::be_u8(len),
            cf::bytes::be_u8(self.command_type as u8),
            cf::bytes::be_u8(self.function_type),
            cf::combinator::slice(&self.payload),
            cf::bytes::be_u8(checksum),
        ));
        cf::gen_simple(write, Vec::new()).expect("serialization is infallible")
    }
}

/// Outcome of inspecting the front of the RX buffer: either a decoded
/// frame, some garbage to silently drop (spec §4.B "any other byte ->
/// silently drop"), or "not enough bytes yet".
pub enum ParseOutcome {
    Frame(SerialFrame),
    Garbage,
    Incomplete,
}

/// Attempts to pull exactly one unit off the front of `buf`, returning how
/// many bytes it accounts for. A bad `LEN` or checksum resyncs by
/// discarding just the leading `SOF` byte, matching spec §8's requirement
/// that the framer "returns to HuntSOF without emitting a frame" rather
/// than resyncing to the next `SOF` candidate (which may be the same byte
/// re-scanned on the following call).
pub fn parse_one(buf: &[u8]) -> (ParseOutcome, usize) {
    if buf.is_empty() {
        return (ParseOutcome::Incomplete, 0);
    }
    match buf[0] {
        ACK => (ParseOutcome::Frame(SerialFrame::Ack), 1),
        NAK => (ParseOutcome::Frame(SerialFrame::Nak), 1),
        CAN => (ParseOutcome::Frame(SerialFrame::Can), 1),
        SOF => {
            if buf.len() < 2 {
                return (ParseOutcome::Incomplete, 0);
            }
            let len = buf[1];
            if len < MIN_FRAME_LEN || len > MAX_FRAME_LEN {
                return (ParseOutcome::Garbage, 1);
            }
            let total = 2 + len as usize; // SOF + LEN + (TYPE+CMD+DATA+CHK)
            if buf.len() < total {
                return (ParseOutcome::Incomplete, 0);
            }
            match CommandFrame::parse_after_sof(&buf[1..total]) {
                Ok((_, frame)) => (ParseOutcome::Frame(SerialFrame::Data(frame)), total),
                Err(_) => (ParseOutcome::Garbage, 1),
            }
        }
        _ => {
            let skip = buf
                .iter()
                .position(|&b| matches!(b, SOF | ACK | NAK | CAN))
                .unwrap_or(buf.len())
                .max(1);
            (ParseOutcome::Garbage, skip)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    fn assert_frame(buf: &[u8], expected: SerialFrame, consumed: usize) {
        match parse_one(buf) {
            (ParseOutcome::Frame(f), n) => {
                assert_eq!(f, expected);
                assert_eq!(n, consumed);
            }
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn parses_ack_nak_can() {
        assert_frame(&hex("06"), SerialFrame::Ack, 1);
        assert_frame(&hex("15"), SerialFrame::Nak, 1);
        assert_frame(&hex("18"), SerialFrame::Can, 1);
    }

    #[test]
    fn parses_valid_data_frame() {
        // SOF LEN=04 TYPE=00(REQUEST) CMD=07 DATA=00 CHK
        let mut buf = hex("0104000700");
        let checksum = xor_sum(&buf[1..]);
        buf.push(checksum);
        assert_frame(
            &buf.clone(),
            SerialFrame::Data(CommandFrame::new(CommandType::Request, 0x07, vec![0x00])),
            buf.len(),
        );
    }

    #[test]
    fn len_out_of_bounds_resyncs_without_emitting_a_frame() {
        for bad_len in [0u8, 1, 2, 255] {
            let buf = [SOF, bad_len, 0xaa, 0xbb];
            match parse_one(&buf) {
                (ParseOutcome::Garbage, n) => assert_eq!(n, 1),
                _ => panic!("expected garbage for LEN={bad_len}"),
            }
        }
    }

    #[test]
    fn rejects_bad_checksum() {
        let buf = hex("01040007000000");
        // checksum byte (last) is wrong; parse_after_sof should error out.
        let result = CommandFrame::parse_after_sof(&buf[1..]);
        assert!(result.is_err());
    }

    #[test]
    fn roundtrip_serialize_then_parse() {
        let frame = CommandFrame::new(CommandType::Request, 0x13, vec![0x05, 0x20, 0x01, 0xff]);
        let bytes = frame.serialize();
        let (rest, parsed) = CommandFrame::parse_after_sof(&bytes[1..]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, frame);
    }
}
