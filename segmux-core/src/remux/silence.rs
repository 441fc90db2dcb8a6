//! Pre-encoded silent AAC-LC raw data blocks, one per channel layout.

const SILENT_MONO: &[u8] = &[0x00, 0xC8, 0x00, 0x80, 0x23, 0x80];
const SILENT_STEREO: &[u8] = &[0x21, 0x00, 0x49, 0x90, 0x02, 0x19, 0x00, 0x23, 0x80];
const SILENT_3CH: &[u8] = &[
    0x00, 0xC8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x8E,
];
const SILENT_4CH: &[u8] = &[
    0x00, 0xC8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x80, 0x2C, 0x80, 0x08, 0x02, 0x38,
];
const SILENT_5CH: &[u8] = &[
    0x00, 0xC8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x82, 0x30, 0x04, 0x99, 0x00, 0x21, 0x90,
    0x02, 0x38,
];
const SILENT_6CH: &[u8] = &[
    0x00, 0xC8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x82, 0x30, 0x04, 0x99, 0x00, 0x21, 0x90,
    0x02, 0x00, 0xB2, 0x00, 0x20, 0x08, 0xE0,
];

/// A silent frame for `codec` and `channel_count`, if one is known.
///
/// Only AAC-LC is covered; callers duplicate a real frame otherwise.
pub fn silent_frame(codec: Option<&str>, channel_count: u32) -> Option<&'static [u8]> {
    if codec != Some("mp4a.40.2") {
        return None;
    }
    match channel_count {
        1 => Some(SILENT_MONO),
        2 => Some(SILENT_STEREO),
        3 => Some(SILENT_3CH),
        4 => Some(SILENT_4CH),
        5 => Some(SILENT_5CH),
        6 => Some(SILENT_6CH),
        _ => None,
    }
}
