//! Supplemental enhancement information: closed captions and user data.

use super::nal::discard_epb;
use crate::error::Warnings;
use crate::track::{UserdataPayload, UserdataSample};

const PAYLOAD_TYPE_USER_DATA_REGISTERED: u32 = 4;
const PAYLOAD_TYPE_USER_DATA_UNREGISTERED: u32 = 5;
const COUNTRY_CODE_USA: u8 = 181;
const PROVIDER_CODE_ATSC: u16 = 49;
const USER_IDENTIFIER_GA94: u32 = 0x4741_3934;
const USER_DATA_TYPE_CC: u8 = 3;

/// Decode every SEI message in one NAL unit, pushing captions to `samples`.
///
/// `header_size` is 1 for AVC and 2 for HEVC. A message whose declared size
/// runs past the end of the RBSP stops parsing with a warning; earlier
/// messages are kept.
pub fn parse_sei_message_from_nal_unit(
    unit: &[u8],
    header_size: usize,
    pts: f64,
    samples: &mut Vec<UserdataSample>,
    warnings: &mut Warnings,
) {
    let data = discard_epb(unit);
    let mut ptr = header_size;

    while ptr < data.len() {
        let mut payload_type = 0u32;
        loop {
            let Some(&b) = data.get(ptr) else { break };
            ptr += 1;
            payload_type += b as u32;
            if b != 0xFF {
                break;
            }
        }
        let mut payload_size = 0usize;
        loop {
            let Some(&b) = data.get(ptr) else { break };
            ptr += 1;
            payload_size += b as usize;
            if b != 0xFF {
                break;
            }
        }

        let left_over = data.len().saturating_sub(ptr);
        if payload_size > left_over {
            warnings.parsing(format!(
                "Malformed SEI payload. {payload_size} is too small, only {left_over} bytes left to parse."
            ));
            break;
        }
        let payload = &data[ptr..ptr + payload_size];
        ptr += payload_size;

        match payload_type {
            PAYLOAD_TYPE_USER_DATA_REGISTERED => {
                if let Some(bytes) = parse_cea608(payload) {
                    samples.push(UserdataSample {
                        pts,
                        payload: UserdataPayload::Cea608 { bytes },
                    });
                }
            }
            PAYLOAD_TYPE_USER_DATA_UNREGISTERED if payload.len() > 16 => {
                let uuid = format_uuid(&payload[..16]);
                let user_data_bytes = payload[16..].to_vec();
                samples.push(UserdataSample {
                    pts,
                    payload: UserdataPayload::Uuid {
                        uuid,
                        user_data: String::from_utf8_lossy(&user_data_bytes).to_string(),
                        user_data_bytes,
                    },
                });
            }
            _ => {}
        }

        // rbsp_trailing_bits
        if data.len() - ptr == 1 && data[ptr] == 0x80 {
            break;
        }
    }
}

/// ATSC A/53 caption data wrapped in an ITU-T T.35 message.
///
/// Returns `cc_count` header, `em_data` and the `cc_data` triples, or an
/// empty buffer when `process_cc_data_flag` is clear.
fn parse_cea608(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() < 8 || payload[0] != COUNTRY_CODE_USA {
        return None;
    }
    let provider = u16::from_be_bytes([payload[1], payload[2]]);
    let user_identifier = u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]);
    if provider != PROVIDER_CODE_ATSC || user_identifier != USER_IDENTIFIER_GA94 || payload[7] != USER_DATA_TYPE_CC {
        return None;
    }
    let first_byte = *payload.get(8)?;
    let total_ccs = (first_byte & 0x1F) as usize;
    let enabled = first_byte & 0x40 != 0;
    if !enabled {
        return Some(Vec::new());
    }
    let total_bytes = 2 + total_ccs * 3;
    let end = (8 + total_bytes).min(payload.len());
    Some(payload[8..end].to_vec())
}

fn format_uuid(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        out.push_str(&format!("{b:02x}"));
        if matches!(i, 3 | 5 | 7 | 9) {
            out.push('-');
        }
    }
    out
}
