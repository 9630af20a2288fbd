use crate::esy::payload::Segment;
use crate::esy::registry::{legacy_alias, ProtocolDef, RegisterDef, TextMode, Truncate};
use crate::esy::value::{Snapshot, Value};

/// Resolves raw segment words into named, scaled snapshot entries.
///
/// Registers the protocol doesn't know about are kept as diagnostic
/// `_unknown_fc{fc}_addr{addr}` entries, but only when nonzero - quiet
/// registers would otherwise flood the snapshot.
pub fn decode_segments(protocol: &ProtocolDef, segments: &[Segment]) -> Snapshot {
    let mut out = Snapshot::new();

    for segment in segments {
        let fc = segment.function_code();
        let mut i = 0usize;

        while i < segment.values.len() {
            let addr = segment.start_address.wrapping_add(i as u16);

            let Some(def) = protocol.get_register(addr, fc) else {
                let raw = segment.values[i];
                if raw != 0 {
                    out.insert(
                        format!("_unknown_fc{}_addr{}", fc, addr),
                        Value::int(raw as i64),
                    );
                }
                i += 1;
                continue;
            };

            let words = def.word_count.max(1) as usize;
            if i + words > segment.values.len() {
                // register split by a truncated segment
                break;
            }

            if let Some(value) = decode_register(def, &segment.values[i..i + words]) {
                insert(&mut out, &def.key, value);
            }
            i += words;
        }
    }

    out
}

fn insert(out: &mut Snapshot, key: &str, value: Value) {
    if let Some(alias) = legacy_alias(key) {
        out.insert(alias.to_string(), value.clone());
    }
    out.insert(key.to_string(), value);
}

fn decode_register(def: &RegisterDef, words: &[u16]) -> Option<Value> {
    if let Some(mode) = def.text {
        return Some(Value::Text(decode_text(mode, words)));
    }

    match def.truncate {
        Truncate::Skip => None,
        Truncate::Date => {
            let lo = *words.first()?;
            let hi = *words.get(1)?;
            // year is offset from 2000 by +15, month and day by +1
            let year = (lo & 0xFF) + 15;
            let month = (hi >> 8) + 1;
            let day = (hi & 0xFF) + 1;
            Some(Value::Text(format!("{}-{}-{}", year, month, day)))
        }
        Truncate::High => Some(Value::Num(def.coefficient.scale((words[0] >> 8) as i64))),
        Truncate::Low => Some(Value::Num(def.coefficient.scale((words[0] & 0xFF) as i64))),
        Truncate::None => {
            let raw: i64 = if words.len() >= 2 {
                let u = ((words[0] as u32) << 16) | words[1] as u32;
                if def.signed {
                    u as i32 as i64
                } else {
                    u as i64
                }
            } else {
                let u = words[0];
                if def.signed && u > 32767 {
                    u as i64 - 65536
                } else {
                    u as i64
                }
            };
            Some(Value::Num(def.coefficient.scale(raw)))
        }
    }
}

fn decode_text(mode: TextMode, words: &[u16]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|w| w.to_be_bytes())
        .collect();

    match mode {
        TextMode::VarLen => {
            let len = *bytes.first().unwrap_or(&0) as usize;
            let end = (1 + len).min(bytes.len());
            String::from_utf8_lossy(&bytes[1.min(bytes.len())..end]).into_owned()
        }
        TextMode::Fixed => {
            let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        }
        TextMode::PairSwapped => {
            let mut swapped = Vec::with_capacity(bytes.len());
            for pair in bytes.chunks_exact(2) {
                if pair[0] != 0 || pair[1] != 0 {
                    swapped.push(pair[1]);
                    swapped.push(pair[0]);
                }
            }
            String::from_utf8_lossy(&swapped).into_owned()
        }
    }
}
