use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::sequence::tuple;

/// One register block from an uplink payload.
///
/// `segment_type` doubles as the Modbus-style function code: 3 = holding
/// registers, 4 = input registers. Values map positionally onto consecutive
/// addresses starting at `start_address`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub segment_id: u16,
    pub segment_type: u16,
    pub start_address: u16,
    pub values: Vec<u16>,
}

impl Segment {
    pub fn function_code(&self) -> u16 {
        self.segment_type
    }
}

fn parse_segment(input: &[u8]) -> nom::IResult<&[u8], Segment> {
    let (input, (segment_id, segment_type, start_address, param_count)) =
        tuple((be_u16, be_u16, be_u16, be_u16))(input)?;
    let (input, raw) = take(param_count as usize * 2)(input)?;

    let values = raw
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();

    Ok((
        input,
        Segment {
            segment_id,
            segment_type,
            start_address,
            values,
        },
    ))
}

/// Parses the payload's segment list.
///
/// Real devices truncate frames mid-segment; a short read is not an error.
/// Whatever complete segments were read before the truncation are returned
/// and the rest of the payload is dropped.
pub fn parse_segments(payload: &[u8]) -> Vec<Segment> {
    let Ok((mut rest, count)) = be_u16::<_, nom::error::Error<&[u8]>>(payload) else {
        return Vec::new();
    };

    let mut segments = Vec::with_capacity(count as usize);

    for _ in 0..count {
        match parse_segment(rest) {
            Ok((r, segment)) => {
                rest = r;
                segments.push(segment);
            }
            Err(_) => break,
        }
    }

    segments
}
