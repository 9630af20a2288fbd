use crate::prelude::*;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u32, u8 as nom_u8};
use nom::sequence::tuple;

pub const HEADER_LENGTH: usize = 24;

/// Fixed 24-byte header carried by every uplink and downlink message.
/// All fields are big-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgHeader {
    pub config_id: u32,
    pub msg_id: u32,
    pub user_id: [u8; 8],
    pub fun_code: u8,
    pub source_id: u8,
    pub page_index: u16,
    pub data_length: u32,
}

fn parse_header(input: &[u8]) -> nom::IResult<&[u8], MsgHeader> {
    let (input, (config_id, msg_id, user_id, fun_code, source_id, page_index, data_length)) =
        tuple((be_u32, be_u32, take(8usize), nom_u8, nom_u8, be_u16, be_u32))(input)?;

    let mut uid = [0u8; 8];
    uid.copy_from_slice(user_id);

    Ok((
        input,
        MsgHeader {
            config_id,
            msg_id,
            user_id: uid,
            fun_code,
            source_id,
            page_index,
            data_length,
        },
    ))
}

impl MsgHeader {
    /// Parses the header, returning it and the remaining input.
    pub fn parse(input: &[u8]) -> Result<(MsgHeader, &[u8])> {
        match parse_header(input) {
            Ok((rest, header)) => Ok((header, rest)),
            Err(_) => bail!(
                "malformed frame: header needs {} bytes, got {}",
                HEADER_LENGTH,
                input.len()
            ),
        }
    }

    pub fn bytes(&self) -> [u8; HEADER_LENGTH] {
        let mut out = [0u8; HEADER_LENGTH];
        out[0..4].copy_from_slice(&self.config_id.to_be_bytes());
        out[4..8].copy_from_slice(&self.msg_id.to_be_bytes());
        out[8..16].copy_from_slice(&self.user_id);
        out[16] = self.fun_code;
        out[17] = self.source_id;
        out[18..20].copy_from_slice(&self.page_index.to_be_bytes());
        out[20..24].copy_from_slice(&self.data_length.to_be_bytes());
        out
    }
}

/// A complete message: header plus raw payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: MsgHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Splits raw bytes into header and payload.
    ///
    /// The payload is whatever follows the header, capped at the header's
    /// declared dataLength. Devices sometimes claim more bytes than they
    /// send; the segment parser copes with short payloads, so that is not
    /// an error here.
    pub fn parse(input: &[u8]) -> Result<Frame> {
        let (header, rest) = MsgHeader::parse(input)?;

        let declared = header.data_length as usize;
        if rest.len() < declared {
            debug!(
                "frame declares {} payload bytes but carries {}",
                declared,
                rest.len()
            );
        }

        let payload = rest[..rest.len().min(declared)].to_vec();

        Ok(Frame { header, payload })
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LENGTH + self.payload.len());
        out.extend_from_slice(&self.header.bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> MsgHeader {
        MsgHeader {
            config_id: 6,
            msg_id: 42,
            user_id: [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC, 0x17],
            fun_code: 0x20,
            source_id: 0x10,
            page_index: 0x0300,
            data_length: 10,
        }
    }

    #[test]
    fn header_roundtrip() {
        let bytes = header().bytes();
        assert_eq!(bytes.len(), HEADER_LENGTH);

        let (parsed, rest) = MsgHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header());
        assert!(rest.is_empty());
    }

    #[test]
    fn header_field_offsets() {
        let bytes = header().bytes();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 6]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 42]);
        assert_eq!(bytes[16], 0x20);
        assert_eq!(bytes[17], 0x10);
        assert_eq!(&bytes[18..20], &[0x03, 0x00]);
        assert_eq!(&bytes[20..24], &[0, 0, 0, 10]);
    }

    #[test]
    fn short_input_is_an_error() {
        let bytes = header().bytes();
        assert!(MsgHeader::parse(&bytes[..23]).is_err());
        assert!(MsgHeader::parse(&[]).is_err());
    }

    #[test]
    fn frame_caps_payload_at_data_length() {
        let mut h = header();
        h.data_length = 4;
        let mut raw = h.bytes().to_vec();
        raw.extend_from_slice(&[1, 2, 3, 4, 5, 6]);

        let frame = Frame::parse(&raw).unwrap();
        assert_eq!(frame.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn frame_tolerates_short_payload() {
        let mut h = header();
        h.data_length = 100;
        let mut raw = h.bytes().to_vec();
        raw.extend_from_slice(&[1, 2]);

        let frame = Frame::parse(&raw).unwrap();
        assert_eq!(frame.payload, vec![1, 2]);
    }
}
