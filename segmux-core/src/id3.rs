// ID3 - Timed metadata tags
//
// HLS carries ID3v2 tags in two places:
// • In front of raw ADTS/MP3/AC-3 segments (Apple PRIV timestamp frame)
// • In a dedicated timed-metadata PID inside a transport stream
//
// Sizes are "synchsafe": four bytes with the top bit of each cleared.

use serde::Serialize;

// ============================================================================
// Constants
// ============================================================================

const HEADER_FOOTER_SIZE: usize = 10;
const HEADER_MAGIC: &[u8; 3] = b"ID3";
const FOOTER_MAGIC: &[u8; 3] = b"3DI";
const FLAG_EXTENDED_HEADER: u8 = 0x40;

/// PRIV owner carrying the 33-bit MPEG-2 timestamp of the first sample.
pub const TRANSPORT_STREAM_TIMESTAMP_OWNER: &str = "com.apple.streaming.transportStreamTimestamp";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Id3Frame {
    pub key: String,
    pub info: String,
    pub data: Id3FrameData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Id3FrameData {
    Text { value: String },
    Binary { value: Vec<u8> },
    Picture {
        mime_type: String,
        picture_type: u8,
        /// Image bytes, or the UTF-8 URL when `mime_type` is `-->`.
        value: Vec<u8>,
    },
}

// ============================================================================
// Header Detection
// ============================================================================

fn has_magic(data: &[u8], offset: usize, magic: &[u8; 3]) -> bool {
    if offset + HEADER_FOOTER_SIZE > data.len() {
        return false;
    }
    let d = &data[offset..offset + HEADER_FOOTER_SIZE];
    &d[0..3] == magic && d[3] < 0xFF && d[4] < 0xFF && d[6..10].iter().all(|&b| b < 0x80)
}

/// `ID3` header at `offset`.
pub fn is_header(data: &[u8], offset: usize) -> bool {
    has_magic(data, offset, HEADER_MAGIC)
}

/// `3DI` footer at `offset`.
pub fn is_footer(data: &[u8], offset: usize) -> bool {
    has_magic(data, offset, FOOTER_MAGIC)
}

/// Decode a 4x7-bit synchsafe integer.
pub fn read_size(data: &[u8], offset: usize) -> usize {
    data[offset..offset + 4]
        .iter()
        .fold(0usize, |acc, &b| (acc << 7) | (b & 0x7F) as usize)
}

/// A complete tag starts at `offset`.
pub fn can_parse(data: &[u8], offset: usize) -> bool {
    is_header(data, offset) && offset + HEADER_FOOTER_SIZE + read_size(data, offset + 6) <= data.len()
}

/// The run of consecutive ID3 tags (footers included) starting at `offset`.
pub fn get_id3_data(data: &[u8], offset: usize) -> Option<&[u8]> {
    let front = offset;
    let mut offset = offset;
    while is_header(data, offset) {
        let mut tag_len = HEADER_FOOTER_SIZE + read_size(data, offset + 6);
        if is_footer(data, offset + tag_len) {
            tag_len += HEADER_FOOTER_SIZE;
        }
        offset += tag_len;
    }
    if offset > front {
        Some(&data[front..offset.min(data.len())])
    } else {
        None
    }
}

// ============================================================================
// Frame Parsing
// ============================================================================

/// Walk every frame of every tag in `id3_data`.
pub fn get_id3_frames(id3_data: &[u8]) -> Vec<Id3Frame> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while is_header(id3_data, offset) {
        let size = read_size(id3_data, offset + 6);
        if id3_data[offset + 5] & FLAG_EXTENDED_HEADER != 0 {
            offset += HEADER_FOOTER_SIZE;
        }
        offset += HEADER_FOOTER_SIZE;
        let end = (offset + size).min(id3_data.len());

        while offset + 8 < end {
            if offset + HEADER_FOOTER_SIZE > id3_data.len() {
                break;
            }
            let frame_header = &id3_data[offset..];
            let key = String::from_utf8_lossy(&frame_header[0..4]).to_string();
            let frame_size = read_size(frame_header, 4);
            let start = offset + HEADER_FOOTER_SIZE;
            if frame_size == 0 || start + frame_size > end {
                break;
            }
            if let Some(frame) = decode_frame(&key, &id3_data[start..start + frame_size]) {
                frames.push(frame);
            }
            offset = start + frame_size;
        }

        offset = offset.max(end);
        if is_footer(id3_data, offset) {
            offset += HEADER_FOOTER_SIZE;
        }
    }

    frames
}

fn decode_frame(key: &str, data: &[u8]) -> Option<Id3Frame> {
    if key == "PRIV" {
        decode_priv_frame(key, data)
    } else if key.starts_with('W') {
        decode_url_frame(key, data)
    } else if key == "APIC" {
        decode_image_frame(key, data)
    } else {
        decode_text_frame(key, data)
    }
}

fn decode_priv_frame(key: &str, data: &[u8]) -> Option<Id3Frame> {
    // owner-identifier\0 private-data
    if data.len() < 2 {
        return None;
    }
    let (owner, rest) = split_terminated(data, 0)?;
    Some(Id3Frame {
        key: key.to_string(),
        info: decode_latin1(owner),
        data: Id3FrameData::Binary { value: rest.to_vec() },
    })
}

fn decode_text_frame(key: &str, data: &[u8]) -> Option<Id3Frame> {
    if data.len() < 2 {
        return None;
    }
    let encoding = data[0];
    if key == "TXXX" {
        // encoding description\0 value
        let (description, value) = split_terminated(&data[1..], encoding)?;
        return Some(Id3Frame {
            key: key.to_string(),
            info: decode_text(description, encoding),
            data: Id3FrameData::Text {
                value: decode_text(value, encoding),
            },
        });
    }
    Some(Id3Frame {
        key: key.to_string(),
        info: String::new(),
        data: Id3FrameData::Text {
            value: decode_text(&data[1..], encoding),
        },
    })
}

fn decode_url_frame(key: &str, data: &[u8]) -> Option<Id3Frame> {
    if key == "WXXX" {
        // encoding description\0 url
        if data.len() < 2 {
            return None;
        }
        let encoding = data[0];
        let (description, url) = split_terminated(&data[1..], encoding)?;
        return Some(Id3Frame {
            key: key.to_string(),
            info: decode_text(description, encoding),
            data: Id3FrameData::Text {
                value: decode_latin1(url),
            },
        });
    }
    Some(Id3Frame {
        key: key.to_string(),
        info: String::new(),
        data: Id3FrameData::Text {
            value: decode_latin1(data),
        },
    })
}

fn decode_image_frame(key: &str, data: &[u8]) -> Option<Id3Frame> {
    // encoding mime\0 picture-type description\0 picture-data
    if data.len() < 4 {
        return None;
    }
    let encoding = data[0];
    let (mime, rest) = split_terminated(&data[1..], 0)?;
    let (&picture_type, rest) = rest.split_first()?;
    let (description, picture) = split_terminated(rest, encoding)?;
    Some(Id3Frame {
        key: key.to_string(),
        info: decode_text(description, encoding),
        data: Id3FrameData::Picture {
            mime_type: decode_latin1(mime),
            picture_type,
            value: picture.to_vec(),
        },
    })
}

/// Split at the encoding-specific terminator, dropping it.
fn split_terminated(data: &[u8], encoding: u8) -> Option<(&[u8], &[u8])> {
    if encoding == 1 || encoding == 2 {
        let mut i = 0;
        while i + 1 < data.len() {
            if data[i] == 0 && data[i + 1] == 0 {
                return Some((&data[..i], &data[i + 2..]));
            }
            i += 2;
        }
        return Some((data, &[]));
    }
    match data.iter().position(|&b| b == 0) {
        Some(pos) => Some((&data[..pos], &data[pos + 1..])),
        None => Some((data, &[])),
    }
}

fn decode_latin1(data: &[u8]) -> String {
    data.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

fn decode_text(data: &[u8], encoding: u8) -> String {
    match encoding {
        0 => decode_latin1(data),
        1 | 2 => {
            let mut bytes = data;
            let mut big_endian = encoding == 2;
            if bytes.len() >= 2 {
                match (bytes[0], bytes[1]) {
                    (0xFE, 0xFF) => {
                        big_endian = true;
                        bytes = &bytes[2..];
                    }
                    (0xFF, 0xFE) => {
                        big_endian = false;
                        bytes = &bytes[2..];
                    }
                    _ => {}
                }
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| if big_endian { u16::from_be_bytes([c[0], c[1]]) } else { u16::from_le_bytes([c[0], c[1]]) })
                .take_while(|&u| u != 0)
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => {
            let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
            String::from_utf8_lossy(&data[..end]).to_string()
        }
    }
}

// ============================================================================
// Timestamps
// ============================================================================

pub fn is_timestamp_frame(frame: &Id3Frame) -> bool {
    frame.key == "PRIV" && frame.info == TRANSPORT_STREAM_TIMESTAMP_OWNER
}

/// 33-bit 90kHz timestamp from the Apple PRIV frame, if the tag carries one.
pub fn get_id3_timestamp(id3_data: &[u8]) -> Option<i64> {
    get_id3_frames(id3_data)
        .iter()
        .filter(|frame| is_timestamp_frame(frame))
        .find_map(|frame| match &frame.data {
            Id3FrameData::Binary { value } if value.len() == 8 => {
                let high = (value[3] & 0x01) as i64;
                let low = u32::from_be_bytes([value[4], value[5], value[6], value[7]]) as i64;
                Some((high << 32) | low)
            }
            _ => None,
        })
}
