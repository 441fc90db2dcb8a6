// ============================================================================
// MP4 TOOLS - Box lookup and fragment inspection over raw ISO-BMFF bytes
//
// Nothing here copies media. Lookups return byte ranges into the caller's
// buffer so the passthrough path can read timing and patch key IDs in place.
//
// - find_box: nested fourcc path search, every match returned
// - parse_init_segment: per-track id/timescale/codec from moov
// - get_start_dts / get_duration: timing straight from moof boxes
// - patch_encryption_data: fill an all-zero tenc key ID
// - parse_emsg / parse_samples: timed metadata and in-band captions
// ============================================================================

use std::ops::Range;

use bytes::Buf;
use tracing::{debug, info, warn};

use crate::error::Warnings;
use crate::track::UserdataSample;
use crate::video::sei::parse_sei_message_from_nal_unit;

pub type FourCc = [u8; 4];

/// Emsg scheme carrying an ID3 payload.
pub const EMSG_ID3_SCHEME: &str = "https://aomedia.org/emsg/ID3";

// ============================================================================
// Readers
// ============================================================================

pub fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let mut cursor = data.get(offset..offset.checked_add(2)?)?;
    Some(cursor.get_u16())
}

pub fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let mut cursor = data.get(offset..offset.checked_add(4)?)?;
    Some(cursor.get_u32())
}

pub fn read_i32(data: &[u8], offset: usize) -> Option<i32> {
    let mut cursor = data.get(offset..offset.checked_add(4)?)?;
    Some(cursor.get_i32())
}

pub fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let mut cursor = data.get(offset..offset.checked_add(8)?)?;
    Some(cursor.get_u64())
}

fn fourcc_str(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Header of the box starting at `offset`: (fourcc, header size, end).
/// A zero size runs to the end of `data`. Boxes whose end overflows or
/// does not move past the header are rejected.
fn box_header(data: &[u8], offset: usize) -> Option<(FourCc, usize, usize)> {
    let size = read_u32(data, offset)? as usize;
    let kind: FourCc = data.get(offset.checked_add(4)?..offset.checked_add(8)?)?.try_into().ok()?;
    let (header, size) = match size {
        0 => (8, data.len() - offset),
        1 => (16, usize::try_from(read_u64(data, offset + 8)?).ok()?),
        size => (8, size),
    };
    if size < header {
        return None;
    }
    Some((kind, header, offset.checked_add(size)?))
}

// ============================================================================
// Box search
// ============================================================================

/// Payload ranges of every box matching `path`, searched from the top level
/// of `data`. Ranges index into `data`.
pub fn find_box(data: &[u8], path: &[&FourCc]) -> Vec<Range<usize>> {
    find_box_in(data, 0..data.len(), path)
}

/// Same as [`find_box`], restricted to `range` of `data`.
pub fn find_box_in(data: &[u8], range: Range<usize>, path: &[&FourCc]) -> Vec<Range<usize>> {
    let mut results = Vec::new();
    let Some((first, rest)) = path.split_first() else {
        return results;
    };
    for entry in boxes_in(data, range) {
        if &entry.kind != *first {
            continue;
        }
        if rest.is_empty() {
            results.push(entry.payload);
        } else {
            results.extend(find_box_in(data, entry.payload, rest));
        }
    }
    results
}

/// One complete box: where its header starts and its payload range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxEntry {
    pub kind: FourCc,
    pub start: usize,
    pub payload: Range<usize>,
}

/// Complete sibling boxes inside `range`. Stops at the first box that is
/// truncated or malformed.
fn boxes_in(data: &[u8], range: Range<usize>) -> Vec<BoxEntry> {
    let mut entries = Vec::new();
    let end = range.end.min(data.len());
    let mut offset = range.start;
    while offset.saturating_add(8) <= end {
        let Some((kind, header, box_end)) = box_header(&data[..end], offset) else {
            break;
        };
        if box_end > end || box_end <= offset {
            break;
        }
        entries.push(BoxEntry {
            kind,
            start: offset,
            payload: offset + header..box_end,
        });
        offset = box_end;
    }
    entries
}

/// Top-level boxes of `kind`, header offsets included.
pub fn top_level_boxes(data: &[u8], kind: &FourCc) -> Vec<BoxEntry> {
    boxes_in(data, 0..data.len())
        .into_iter()
        .filter(|entry| &entry.kind == kind)
        .collect()
}

/// True when the top level of `data` has a `moof`, even a truncated one.
pub fn has_moof_data(data: &[u8]) -> bool {
    let mut offset = 0;
    while offset + 8 <= data.len() {
        let Some(size) = read_u32(data, offset) else {
            return false;
        };
        if &data[offset + 4..offset + 8] == b"moof" {
            return true;
        }
        if size < 8 {
            return false;
        }
        let Some(next) = offset.checked_add(size as usize) else {
            return false;
        };
        offset = next;
    }
    false
}

/// Split `data` before its last `moof` so a trailing partial fragment can be
/// held back. With fewer than two `moof`s everything is valid.
pub fn segment_valid_range(data: &[u8]) -> (Range<usize>, Option<Range<usize>>) {
    let moofs = top_level_boxes(data, b"moof");
    match moofs.last() {
        Some(last) if moofs.len() >= 2 => {
            let split = last.start;
            (0..split, Some(split..data.len()))
        }
        _ => (0..data.len(), None),
    }
}

// ============================================================================
// Init segment
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitTrack {
    pub id: u32,
    pub timescale: u32,
    pub kind: TrackKind,
    pub codec: String,
    pub encrypted: bool,
    /// `trex` default sample duration.
    pub default_duration: Option<u32>,
    /// `trex` default sample flags.
    pub default_flags: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitData {
    pub tracks: Vec<InitTrack>,
}

impl InitData {
    pub fn track(&self, id: u32) -> Option<&InitTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn audio(&self) -> Option<&InitTrack> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Audio)
    }

    pub fn video(&self) -> Option<&InitTrack> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Video)
    }
}

pub fn parse_init_segment(init_segment: &[u8]) -> InitData {
    let mut result = InitData::default();
    for trak in find_box(init_segment, &[b"moov", b"trak"]) {
        let Some(tkhd) = find_box_in(init_segment, trak.clone(), &[b"tkhd"]).into_iter().next() else {
            continue;
        };
        let tkhd = &init_segment[tkhd];
        let Some(id) = read_u32(tkhd, if tkhd.first() == Some(&0) { 12 } else { 20 }) else {
            continue;
        };
        let Some(mdhd) = find_box_in(init_segment, trak.clone(), &[b"mdia", b"mdhd"]).into_iter().next() else {
            continue;
        };
        let mdhd = &init_segment[mdhd];
        let Some(timescale) = read_u32(mdhd, if mdhd.first() == Some(&0) { 12 } else { 20 }) else {
            continue;
        };
        let Some(hdlr) = find_box_in(init_segment, trak.clone(), &[b"mdia", b"hdlr"]).into_iter().next() else {
            continue;
        };
        let kind = match init_segment.get(hdlr.start + 8..hdlr.start + 12) {
            Some(b"soun") => TrackKind::Audio,
            Some(b"vide") => TrackKind::Video,
            _ => continue,
        };
        let (codec, encrypted) = find_box_in(init_segment, trak, &[b"mdia", b"minf", b"stbl", b"stsd"])
            .into_iter()
            .next()
            .and_then(|stsd| parse_stsd(&init_segment[stsd]))
            .unwrap_or_default();
        result.tracks.push(InitTrack {
            id,
            timescale,
            kind,
            codec,
            encrypted,
            default_duration: None,
            default_flags: None,
        });
    }

    for trex in find_box(init_segment, &[b"moov", b"mvex", b"trex"]) {
        let trex = &init_segment[trex];
        let Some(id) = read_u32(trex, 4) else { continue };
        if let Some(track) = result.tracks.iter_mut().find(|t| t.id == id) {
            track.default_duration = read_u32(trex, 12);
            track.default_flags = read_u32(trex, 20);
        }
    }
    result
}

/// Codec string and encryption flag of the first sample entry.
fn parse_stsd(stsd: &[u8]) -> Option<(String, bool)> {
    let entries = stsd.get(8..)?;
    let fourcc: FourCc = entries.get(4..8)?.try_into().ok()?;
    let encrypted = &fourcc == b"enca" || &fourcc == b"encv";
    let mut codec = fourcc;

    let entry = find_box(entries, &[&fourcc]).into_iter().next()?;
    if encrypted {
        let children = entry.start + if &fourcc == b"enca" { 28 } else { 78 }..entry.end;
        for sinf in find_box_in(entries, children, &[b"sinf"]) {
            let scheme_ok = find_box_in(entries, sinf.clone(), &[b"schm"])
                .first()
                .and_then(|schm| entries.get(schm.start + 4..schm.start + 8))
                .is_some_and(|scheme| scheme == b"cbcs" || scheme == b"cenc");
            if !scheme_ok {
                continue;
            }
            if let Some(frma) = find_box_in(entries, sinf, &[b"frma"]).first() {
                if let Some(original) = entries.get(frma.start..frma.start + 4) {
                    codec.copy_from_slice(original);
                }
            }
        }
    }

    let name = fourcc_str(&codec);
    let full = match &codec {
        b"avc1" | b"avc2" | b"avc3" | b"avc4" => {
            let children = entry.start + 78..entry.end;
            find_box_in(entries, children, &[b"avcC"])
                .first()
                .and_then(|avcc| entries.get(avcc.start + 1..avcc.start + 4))
                .map(|p| format!("{name}.{:02x}{:02x}{:02x}", p[0], p[1], p[2]))
        }
        b"hvc1" | b"hev1" => {
            let children = entry.start + 78..entry.end;
            find_box_in(entries, children, &[b"hvcC"])
                .first()
                .and_then(|hvcc| entries.get(hvcc.clone()))
                .and_then(|hvcc| hevc_codec_from_config(&name, hvcc))
        }
        b"mp4a" => {
            let children = entry.start + 28..entry.end;
            find_box_in(entries, children, &[b"esds"])
                .first()
                .and_then(|esds| entries.get(esds.clone()))
                .and_then(|esds| mp4a_codec_from_esds(esds))
        }
        _ => None,
    };
    Some((full.unwrap_or(name), encrypted))
}

fn hevc_codec_from_config(name: &str, hvcc: &[u8]) -> Option<String> {
    let profile_byte = *hvcc.get(1)?;
    let space = ["", "A", "B", "C"][(profile_byte >> 6) as usize];
    let idc = profile_byte & 0x1F;
    let compatibility = read_u32(hvcc, 2)?.reverse_bits();
    let tier = if profile_byte & 0x20 != 0 { 'H' } else { 'L' };
    let level = *hvcc.get(12)?;
    let mut constraints = String::new();
    for byte in hvcc.get(6..12)?.iter().rev() {
        if *byte != 0 || !constraints.is_empty() {
            constraints = format!(".{byte:X}{constraints}");
        }
    }
    Some(format!("{name}.{space}{idc}.{compatibility:X}.{tier}{level}{constraints}"))
}

fn skip_ber_length(data: &[u8], mut i: usize) -> usize {
    let limit = i + 5;
    while i < limit && i < data.len() {
        let b = data[i];
        i += 1;
        if b & 0x80 == 0 {
            break;
        }
    }
    i
}

/// `mp4a.40.<aot>` for MPEG-4 audio, `mp4a.<OTI>` for any other object
/// type indication.
fn mp4a_codec_from_esds(esds: &[u8]) -> Option<String> {
    if esds.len() <= 12 {
        return None;
    }
    let mut i = 4;
    if *esds.get(i)? != 0x03 {
        return None;
    }
    i = skip_ber_length(esds, i + 1);
    i += 2; // ES_ID
    let flags = *esds.get(i)?;
    i += 1;
    if flags & 0x80 != 0 {
        i += 2;
    }
    if flags & 0x40 != 0 {
        i += *esds.get(i)? as usize + 1;
    }
    if *esds.get(i)? != 0x04 {
        return None;
    }
    i = skip_ber_length(esds, i + 1);
    let object_type = *esds.get(i)?;
    i += 1;
    if object_type != 0x40 {
        debug!("esds object type 0x{:02X} is not MPEG-4 audio", object_type);
        return Some(format!("mp4a.{object_type:02X}"));
    }
    i += 12;
    if *esds.get(i)? != 0x05 {
        return Some("mp4a.40".to_string());
    }
    i = skip_ber_length(esds, i + 1);
    let first = *esds.get(i)?;
    let mut aot = (first & 0xF8) >> 3;
    if aot == 31 {
        let next = *esds.get(i + 1)?;
        aot = aot + 1 + ((first & 0x07) << 3) + ((next & 0xE0) >> 5);
    }
    Some(format!("mp4a.40.{aot}"))
}

// ============================================================================
// Fragment timing
// ============================================================================

fn tfdt_base_time(tfdt: &[u8]) -> Option<u64> {
    match tfdt.first()? {
        1 => {
            if read_u32(tfdt, 4)? == u32::MAX {
                warn!("Ignoring tfdt with an overflowing 64-bit base media decode time");
                return None;
            }
            read_u64(tfdt, 4)
        }
        _ => read_u32(tfdt, 4).map(u64::from),
    }
}

/// Earliest `tfdt` across the fragment's known tracks, in seconds.
pub fn get_start_dts(init_data: &InitData, fmp4: &[u8]) -> Option<f64> {
    let mut result: Option<f64> = None;
    for traf in find_box(fmp4, &[b"moof", b"traf"]) {
        let Some(tfdt) = find_box_in(fmp4, traf.clone(), &[b"tfdt"]).into_iter().next() else {
            continue;
        };
        let Some(base_time) = tfdt_base_time(&fmp4[tfdt]) else {
            continue;
        };
        for tfhd in find_box_in(fmp4, traf.clone(), &[b"tfhd"]) {
            let Some(track) = read_u32(&fmp4[tfhd], 4).and_then(|id| init_data.track(id)) else {
                continue;
            };
            let scale = if track.timescale > 0 { track.timescale } else { 90_000 };
            let start = base_time as f64 / scale as f64;
            if start.is_finite() && result.map_or(true, |r| start < r) {
                result = Some(start);
            }
        }
    }
    result
}

/// Sum of explicit `trun` sample durations.
pub fn compute_raw_duration_from_samples(trun: &[u8]) -> u64 {
    let Some(flags) = read_u32(trun, 0) else {
        return 0;
    };
    let mut offset = 8;
    if flags & 0x01 != 0 {
        offset += 4;
    }
    if flags & 0x04 != 0 {
        offset += 4;
    }
    let count = read_u32(trun, 4).unwrap_or(0);
    let mut duration = 0u64;
    for _ in 0..count {
        if flags & 0x100 != 0 {
            let Some(d) = read_u32(trun, offset) else { break };
            duration += d as u64;
            offset += 4;
        }
        for bit in [0x200, 0x400, 0x800] {
            if flags & bit != 0 {
                offset += 4;
            }
        }
    }
    duration
}

/// Fragment duration in seconds: video if present, otherwise audio.
pub fn get_duration(data: &[u8], init_data: &InitData) -> f64 {
    let mut video = 0.0;
    let mut audio = 0.0;
    for traf in find_box(data, &[b"moof", b"traf"]) {
        let Some(tfhd) = find_box_in(data, traf.clone(), &[b"tfhd"]).into_iter().next() else {
            continue;
        };
        let tfhd = &data[tfhd];
        let Some(track) = read_u32(tfhd, 4).and_then(|id| init_data.track(id)) else {
            continue;
        };
        let flags = read_u32(tfhd, 0).unwrap_or(0) | track.default_flags.unwrap_or(0);
        let mut default_duration = track.default_duration;
        if flags & 0x08 != 0 {
            let mut offset = 8;
            if flags & 0x01 != 0 {
                offset += 8;
            }
            if flags & 0x02 != 0 {
                offset += 4;
            }
            default_duration = read_u32(tfhd, offset).or(default_duration);
        }
        let timescale = if track.timescale > 0 { track.timescale } else { 90_000 } as f64;
        for trun in find_box_in(data, traf, &[b"trun"]) {
            let trun = &data[trun];
            let mut raw = compute_raw_duration_from_samples(trun);
            if raw == 0 {
                if let Some(d) = default_duration {
                    raw = d as u64 * read_u32(trun, 4).unwrap_or(0) as u64;
                }
            }
            match track.kind {
                TrackKind::Video => video += raw as f64 / timescale,
                TrackKind::Audio => audio += raw as f64 / timescale,
            }
        }
    }
    if video > 0.0 {
        video
    } else {
        audio
    }
}

/// Shift every `tfdt` of a known track back by `offset` seconds, clamping at
/// zero. Rewrites the fragment in place.
pub fn offset_start_dts(init_data: &InitData, fmp4: &mut [u8], offset: f64) {
    let mut patches = Vec::new();
    for traf in find_box(fmp4, &[b"moof", b"traf"]) {
        let Some(track) = find_box_in(fmp4, traf.clone(), &[b"tfhd"])
            .into_iter()
            .next()
            .and_then(|tfhd| read_u32(&fmp4[tfhd], 4))
            .and_then(|id| init_data.track(id))
        else {
            continue;
        };
        let timescale = if track.timescale > 0 { track.timescale } else { 90_000 };
        for tfdt in find_box_in(fmp4, traf.clone(), &[b"tfdt"]) {
            if let Some(base_time) = tfdt_base_time(&fmp4[tfdt.clone()]) {
                let shifted = (base_time as f64 - offset * timescale as f64).max(0.0) as u64;
                patches.push((tfdt, shifted));
            }
        }
    }

    for (tfdt, shifted) in patches {
        let version = fmp4[tfdt.start];
        let field = &mut fmp4[tfdt.start + 4..tfdt.end];
        if version == 1 {
            if let Some(slot) = field.get_mut(..8) {
                slot.copy_from_slice(&shifted.to_be_bytes());
            }
        } else if let Some(slot) = field.get_mut(..4) {
            slot.copy_from_slice(&(shifted.min(u32::MAX as u64) as u32).to_be_bytes());
        }
    }
}

// ============================================================================
// Common encryption
// ============================================================================

/// `tenc` payload range inside a `sinf` whose scheme is `cenc` or `cbcs`.
fn parse_sinf(data: &[u8], sinf: Range<usize>) -> Option<Range<usize>> {
    let schm = find_box_in(data, sinf.clone(), &[b"schm"]).into_iter().next()?;
    let scheme = data.get(schm.start + 4..schm.start + 8)?;
    if scheme != b"cbcs" && scheme != b"cenc" {
        return None;
    }
    find_box_in(data, sinf, &[b"schi", b"tenc"]).into_iter().next()
}

/// Write `key_id` into every `tenc` whose key ID is all zeros. Returns how
/// many boxes were patched.
pub fn patch_encryption_data(init_segment: &mut [u8], key_id: &[u8; 16]) -> usize {
    let mut patches = Vec::new();
    for trak in find_box(init_segment, &[b"moov", b"trak"]) {
        let Some(stsd) = find_box_in(init_segment, trak, &[b"mdia", b"minf", b"stbl", b"stsd"])
            .into_iter()
            .next()
        else {
            continue;
        };
        let entries = stsd.start + 8..stsd.end;
        let mut is_audio = true;
        let mut enc_boxes = find_box_in(init_segment, entries.clone(), &[b"enca"]);
        if enc_boxes.is_empty() {
            is_audio = false;
            enc_boxes = find_box_in(init_segment, entries, &[b"encv"]);
        }
        for enc in enc_boxes {
            let children = enc.start + if is_audio { 28 } else { 78 }..enc.end;
            for sinf in find_box_in(init_segment, children, &[b"sinf"]) {
                if let Some(tenc) = parse_sinf(init_segment, sinf) {
                    patches.push((tenc, is_audio));
                }
            }
        }
    }

    let mut patched = 0;
    for (tenc, is_audio) in patches {
        let Some(current) = init_segment.get_mut(tenc.start + 8..tenc.start + 24) else {
            continue;
        };
        if current.iter().all(|b| *b == 0) {
            info!(
                "Patching keyId in 'enc{}>sinf>>tenc' box: {} -> {}",
                if is_audio { 'a' } else { 'v' },
                hex::encode(&*current),
                hex::encode(key_id)
            );
            current.copy_from_slice(key_id);
            patched += 1;
        }
    }
    patched
}

// ============================================================================
// Event messages
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct EmsgInfo {
    pub scheme_id_uri: String,
    pub value: String,
    pub timescale: u32,
    /// Version 0 only.
    pub presentation_time_delta: Option<u32>,
    /// Version 1 only.
    pub presentation_time: Option<u64>,
    pub event_duration: u32,
    pub id: u32,
    pub payload: Vec<u8>,
}

impl EmsgInfo {
    /// Event start in seconds. Version 0 events are relative to `time_offset`.
    pub fn start_time(&self, time_offset: f64) -> f64 {
        let timescale = self.timescale.max(1) as f64;
        match self.presentation_time {
            Some(time) => time as f64 / timescale,
            None => time_offset + self.presentation_time_delta.unwrap_or(0) as f64 / timescale,
        }
    }

    /// Event duration in seconds; `None` when open ended.
    pub fn duration(&self) -> Option<f64> {
        if self.event_duration == u32::MAX || self.timescale == 0 {
            return None;
        }
        let duration = self.event_duration as f64 / self.timescale as f64;
        (duration > 0.001).then_some(duration)
    }

    pub fn is_id3(&self) -> bool {
        let scheme = self.scheme_id_uri.to_ascii_lowercase();
        scheme.contains("/emsg/id3") || scheme.contains("/emsg-id3")
    }
}

fn read_cstring(data: &[u8], offset: &mut usize) -> Option<String> {
    let rest = data.get(*offset..)?;
    let end = rest.iter().position(|b| *b == 0)?;
    *offset += end + 1;
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

/// Decode an `emsg` payload (full box header included).
pub fn parse_emsg(data: &[u8]) -> Option<EmsgInfo> {
    let version = *data.first()?;
    let mut offset = 4;
    match version {
        0 => {
            let scheme_id_uri = read_cstring(data, &mut offset)?;
            let value = read_cstring(data, &mut offset)?;
            let timescale = read_u32(data, offset)?;
            let presentation_time_delta = read_u32(data, offset + 4)?;
            let event_duration = read_u32(data, offset + 8)?;
            let id = read_u32(data, offset + 12)?;
            Some(EmsgInfo {
                scheme_id_uri,
                value,
                timescale,
                presentation_time_delta: Some(presentation_time_delta),
                presentation_time: None,
                event_duration,
                id,
                payload: data.get(offset + 16..)?.to_vec(),
            })
        }
        1 => {
            let timescale = read_u32(data, offset)?;
            let presentation_time = read_u64(data, offset + 4)?;
            let event_duration = read_u32(data, offset + 12)?;
            let id = read_u32(data, offset + 16)?;
            offset += 20;
            let scheme_id_uri = read_cstring(data, &mut offset)?;
            let value = read_cstring(data, &mut offset)?;
            Some(EmsgInfo {
                scheme_id_uri,
                value,
                timescale,
                presentation_time_delta: None,
                presentation_time: Some(presentation_time),
                event_duration,
                id,
                payload: data.get(offset..)?.to_vec(),
            })
        }
        other => {
            debug!("Unsupported emsg version {}", other);
            None
        }
    }
}

// ============================================================================
// In-band captions
// ============================================================================

/// Video track parameters needed to walk `trun` samples for SEI.
#[derive(Debug, Clone, Copy)]
pub struct CaptionSource {
    pub track_id: u32,
    pub timescale: u32,
    pub hevc: bool,
}

fn is_sei(hevc: bool, header: u8) -> bool {
    if hevc {
        matches!((header >> 1) & 0x3F, 39 | 40)
    } else {
        header & 0x1F == 6
    }
}

/// Extract SEI captions from length-prefixed samples in each fragment's
/// `mdat`. Caption times are seconds.
pub fn parse_samples(
    mut start_dts: f64,
    data: &[u8],
    source: CaptionSource,
    warnings: &mut Warnings,
) -> Vec<UserdataSample> {
    let mut sei_samples = Vec::new();
    let timescale = source.timescale.max(1) as f64;
    let header_size = if source.hevc { 2 } else { 1 };

    for moof in top_level_boxes(data, b"moof") {
        let moof_offset = moof.start;
        for traf in find_box_in(data, moof.payload, &[b"traf"]) {
            if let Some(base) = find_box_in(data, traf.clone(), &[b"tfdt"])
                .into_iter()
                .next()
                .and_then(|tfdt| tfdt_base_time(&data[tfdt]))
            {
                start_dts = base as f64 / timescale;
            }
            for tfhd in find_box_in(data, traf.clone(), &[b"tfhd"]) {
                let tfhd = &data[tfhd];
                if read_u32(tfhd, 4) != Some(source.track_id) {
                    continue;
                }
                let tfhd_flags = read_u32(tfhd, 0).unwrap_or(0) & 0xFF_FFFF;
                let mut tfhd_offset = 8;
                if tfhd_flags & 0x01 != 0 {
                    tfhd_offset += 8;
                }
                if tfhd_flags & 0x02 != 0 {
                    tfhd_offset += 4;
                }
                let mut default_duration = 0;
                if tfhd_flags & 0x08 != 0 {
                    default_duration = read_u32(tfhd, tfhd_offset).unwrap_or(0);
                    tfhd_offset += 4;
                }
                let mut default_size = 0;
                if tfhd_flags & 0x10 != 0 {
                    default_size = read_u32(tfhd, tfhd_offset).unwrap_or(0);
                }

                for trun in find_box_in(data, traf.clone(), &[b"trun"]) {
                    let trun = &data[trun];
                    let version = trun.first().copied().unwrap_or(0);
                    let flags = read_u32(trun, 0).unwrap_or(0) & 0xFF_FFFF;
                    let count = read_u32(trun, 4).unwrap_or(0);
                    let mut trun_offset = 8;
                    let mut data_offset = 0i64;
                    if flags & 0x01 != 0 {
                        data_offset = read_i32(trun, trun_offset).unwrap_or(0) as i64;
                        trun_offset += 4;
                    }
                    if flags & 0x04 != 0 {
                        trun_offset += 4;
                    }
                    let mut sample_offset = (moof_offset as i64 + data_offset).max(0) as usize;

                    for _ in 0..count {
                        let mut duration = default_duration;
                        if flags & 0x100 != 0 {
                            duration = read_u32(trun, trun_offset).unwrap_or(0);
                            trun_offset += 4;
                        }
                        let mut size = default_size;
                        if flags & 0x200 != 0 {
                            size = read_u32(trun, trun_offset).unwrap_or(0);
                            trun_offset += 4;
                        }
                        if flags & 0x400 != 0 {
                            trun_offset += 4;
                        }
                        let mut composition_offset = 0i64;
                        if flags & 0x800 != 0 {
                            composition_offset = if version == 0 {
                                read_u32(trun, trun_offset).unwrap_or(0) as i64
                            } else {
                                read_i32(trun, trun_offset).unwrap_or(0) as i64
                            };
                            trun_offset += 4;
                        }

                        let sample_end = sample_offset + size as usize;
                        let mut cursor = sample_offset;
                        while cursor + 4 <= sample_end {
                            let Some(nal_size) = read_u32(data, cursor) else { break };
                            cursor += 4;
                            let nal_end = cursor + nal_size as usize;
                            let Some(nal) = data.get(cursor..nal_end) else { break };
                            if nal.first().is_some_and(|h| is_sei(source.hevc, *h)) {
                                let pts = start_dts + composition_offset as f64 / timescale;
                                parse_sei_message_from_nal_unit(nal, header_size, pts, &mut sei_samples, warnings);
                            }
                            cursor = nal_end;
                        }
                        sample_offset = sample_end;
                        start_dts += duration as f64 / timescale;
                    }
                }
            }
        }
    }
    sei_samples
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::track::UserdataPayload;

    pub(crate) fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    pub(crate) fn full_box(kind: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![version];
        body.extend_from_slice(&flags.to_be_bytes()[1..]);
        body.extend_from_slice(payload);
        mp4_box(kind, &body)
    }

    /// One-track fragment: tfdt base, one trun with explicit durations and sizes.
    pub(crate) fn fragment(track_id: u32, base: u32, durations: &[u32], samples: &[Vec<u8>]) -> Vec<u8> {
        let tfhd = full_box(b"tfhd", 0, 0x020000, &track_id.to_be_bytes());
        let tfdt = full_box(b"tfdt", 0, 0, &base.to_be_bytes());
        let build_trun = |data_offset: u32| {
            let mut body = (samples.len() as u32).to_be_bytes().to_vec();
            body.extend_from_slice(&data_offset.to_be_bytes());
            for (d, s) in durations.iter().zip(samples) {
                body.extend_from_slice(&d.to_be_bytes());
                body.extend_from_slice(&(s.len() as u32).to_be_bytes());
            }
            full_box(b"trun", 0, 0x000301, &body)
        };
        let traf_len = |trun: &[u8]| mp4_box(b"traf", &[tfhd.clone(), tfdt.clone(), trun.to_vec()].concat());
        let mfhd = full_box(b"mfhd", 0, 0, &1u32.to_be_bytes());
        let probe = mp4_box(b"moof", &[mfhd.clone(), traf_len(&build_trun(0))].concat());
        let data_offset = probe.len() as u32 + 8;
        let moof = mp4_box(b"moof", &[mfhd, traf_len(&build_trun(data_offset))].concat());
        let mdat = mp4_box(b"mdat", &samples.concat());
        [moof, mdat].concat()
    }

    pub(crate) fn init_track(id: u32, timescale: u32, handler: &[u8; 4], stsd_entry: Vec<u8>) -> Vec<u8> {
        let mut tkhd = vec![0u8; 8];
        tkhd.extend_from_slice(&id.to_be_bytes());
        tkhd.extend_from_slice(&[0u8; 68]);
        let mut mdhd = vec![0u8; 8];
        mdhd.extend_from_slice(&timescale.to_be_bytes());
        mdhd.extend_from_slice(&[0u8; 8]);
        let mut hdlr = vec![0u8; 4];
        hdlr.extend_from_slice(handler);
        hdlr.extend_from_slice(&[0u8; 13]);
        let mut stsd = 1u32.to_be_bytes().to_vec();
        stsd.extend_from_slice(&stsd_entry);
        let stbl = mp4_box(b"stbl", &full_box(b"stsd", 0, 0, &stsd));
        let minf = mp4_box(b"minf", &stbl);
        let mdia = mp4_box(
            b"mdia",
            &[full_box(b"mdhd", 0, 0, &mdhd), full_box(b"hdlr", 0, 0, &hdlr), minf].concat(),
        );
        mp4_box(b"trak", &[full_box(b"tkhd", 0, 3, &tkhd), mdia].concat())
    }

    /// `encv` entry wrapping avc1 with a cenc `tenc` holding `kid`.
    pub(crate) fn encrypted_video_entry(kid: [u8; 16]) -> Vec<u8> {
        let frma = mp4_box(b"frma", b"avc1");
        let schm = full_box(b"schm", 0, 0, &[b"cenc".as_slice(), &0x0001_0000u32.to_be_bytes()].concat());
        let mut tenc = vec![0, 0, 1, 16];
        tenc.extend_from_slice(&kid);
        let schi = mp4_box(b"schi", &full_box(b"tenc", 0, 0, &tenc));
        let sinf = mp4_box(b"sinf", &[frma, schm, schi].concat());
        let avcc = mp4_box(b"avcC", &[1, 0x64, 0x00, 0x1F, 0xFF, 0xE0, 0x00]);
        mp4_box(b"encv", &[vec![0u8; 78], avcc, sinf].concat())
    }

    #[test]
    fn test_find_box_nested_and_repeated() {
        let traf_a = mp4_box(b"traf", &mp4_box(b"tfhd", &[1]));
        let traf_b = mp4_box(b"traf", &mp4_box(b"tfhd", &[2]));
        let moof = mp4_box(b"moof", &[traf_a, traf_b].concat());
        let data = [mp4_box(b"styp", b"msdh"), moof].concat();
        let found = find_box(&data, &[b"moof", b"traf", b"tfhd"]);
        assert_eq!(found.len(), 2);
        assert_eq!(&data[found[0].clone()], &[1]);
        assert_eq!(&data[found[1].clone()], &[2]);
    }

    #[test]
    fn test_find_box_stops_on_truncated_box() {
        let mut data = mp4_box(b"free", &[0; 4]);
        data.extend_from_slice(&[0, 0, 0, 100, b'm', b'o', b'o', b'f']);
        assert_eq!(find_box(&data, &[b"free"]).len(), 1);
        assert!(find_box(&data, &[b"moof"]).is_empty());
        assert!(has_moof_data(&data));
    }

    /// Re-encode a box with a 64-bit largesize header.
    fn with_largesize(boxed: &[u8]) -> Vec<u8> {
        let mut out = 1u32.to_be_bytes().to_vec();
        out.extend_from_slice(&boxed[4..8]);
        out.extend_from_slice(&(boxed.len() as u64 + 8).to_be_bytes());
        out.extend_from_slice(&boxed[8..]);
        out
    }

    #[test]
    fn test_largesize_box_past_address_space_ends_search() {
        let frag = fragment(1, 0, &[3000], &[vec![0; 8]]);
        let mut data = frag.clone();
        let wrap = u64::MAX - data.len() as u64 + 1;
        data.extend_from_slice(&[0, 0, 0, 1, b'f', b'r', b'e', b'e']);
        data.extend_from_slice(&wrap.to_be_bytes());

        assert_eq!(find_box(&data, &[b"moof"]).len(), 1);
        assert!(find_box(&data, &[b"free"]).is_empty());
        assert!(has_moof_data(&data));
        assert_eq!(segment_valid_range(&data), (0..data.len(), None));
    }

    #[test]
    fn test_zero_progress_box_ends_search() {
        let mut data = mp4_box(b"free", &[]);
        data.extend_from_slice(&[0, 0, 0, 1, b'm', b'o', b'o', b'f']);
        data.extend_from_slice(&0u64.to_be_bytes());
        assert!(find_box(&data, &[b"moof"]).is_empty());
        assert_eq!(top_level_boxes(&data, b"free").len(), 1);
    }

    #[test]
    fn test_split_uses_real_header_size() {
        let frag = fragment(1, 0, &[3000], &[vec![0; 8]]);
        let moof = top_level_boxes(&frag, b"moof")[0].clone();
        let moof_len = moof.payload.end;
        let large = [with_largesize(&frag[..moof_len]), frag[moof_len..].to_vec()].concat();
        let data = [frag.clone(), large].concat();

        let moofs = top_level_boxes(&data, b"moof");
        assert_eq!(moofs.len(), 2);
        assert_eq!(moofs[1].start, frag.len());
        assert_eq!(moofs[1].payload.start, frag.len() + 16);
        let (valid, remainder) = segment_valid_range(&data);
        assert_eq!(valid, 0..frag.len());
        assert_eq!(remainder, Some(frag.len()..data.len()));
    }

    #[test]
    fn test_segment_valid_range_defers_last_fragment() {
        let frag = fragment(1, 0, &[3000], &[vec![0, 0, 0, 1, 0x09]]);
        let data = [frag.clone(), frag.clone()].concat();
        let (valid, remainder) = segment_valid_range(&data);
        assert_eq!(valid, 0..frag.len());
        assert_eq!(remainder, Some(frag.len()..data.len()));
        let (valid, remainder) = segment_valid_range(&frag);
        assert_eq!(valid, 0..frag.len());
        assert!(remainder.is_none());
    }

    #[test]
    fn test_parse_init_segment_and_timing() {
        let video = init_track(1, 90_000, b"vide", encrypted_video_entry([0; 16]));
        let moov = mp4_box(b"moov", &video);
        let init = parse_init_segment(&moov);
        let track = init.video().unwrap();
        assert_eq!(track.id, 1);
        assert_eq!(track.timescale, 90_000);
        assert_eq!(track.codec, "avc1.64001f");
        assert!(track.encrypted);

        let frag = fragment(1, 180_000, &[3000, 3000, 3000], &[vec![0; 8], vec![0; 8], vec![0; 8]]);
        assert_eq!(get_start_dts(&init, &frag), Some(2.0));
        assert!((get_duration(&frag, &init) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_offset_start_dts_rewrites_tfdt() {
        let video = init_track(1, 90_000, b"vide", encrypted_video_entry([0; 16]));
        let init = parse_init_segment(&mp4_box(b"moov", &video));
        let mut frag = fragment(1, 180_000, &[3000], &[vec![0; 8]]);
        offset_start_dts(&init, &mut frag, 1.5);
        assert_eq!(get_start_dts(&init, &frag), Some(0.5));
        offset_start_dts(&init, &mut frag, 10.0);
        assert_eq!(get_start_dts(&init, &frag), Some(0.0));
    }

    #[test]
    fn test_patch_encryption_data_fills_zero_key_id() {
        let video = init_track(1, 90_000, b"vide", encrypted_video_entry([0; 16]));
        let mut moov = mp4_box(b"moov", &video);
        let kid = [0xAB; 16];
        assert_eq!(patch_encryption_data(&mut moov, &kid), 1);
        let stsd = find_box(&moov, &[b"moov", b"trak", b"mdia", b"minf", b"stbl", b"stsd"])[0].clone();
        let entries = stsd.start + 8..stsd.end;
        let encv = find_box_in(&moov, entries, &[b"encv"])[0].clone();
        let tenc = find_box_in(&moov, encv.start + 78..encv.end, &[b"sinf", b"schi", b"tenc"])[0].clone();
        assert_eq!(&moov[tenc.start + 8..tenc.start + 24], &kid);
        // already patched: left alone
        assert_eq!(patch_encryption_data(&mut moov, &[0xCD; 16]), 0);
    }

    #[test]
    fn test_parse_emsg_versions() {
        let mut v0 = vec![0, 0, 0, 0];
        v0.extend_from_slice(b"https://aomedia.org/emsg/ID3\0\0");
        v0.extend_from_slice(&1000u32.to_be_bytes());
        v0.extend_from_slice(&500u32.to_be_bytes());
        v0.extend_from_slice(&u32::MAX.to_be_bytes());
        v0.extend_from_slice(&7u32.to_be_bytes());
        v0.extend_from_slice(b"ID3");
        let info = parse_emsg(&v0).unwrap();
        assert!(info.is_id3());
        assert_eq!(info.start_time(10.0), 10.5);
        assert_eq!(info.duration(), None);
        assert_eq!(info.payload, b"ID3");

        let mut v1 = vec![1, 0, 0, 0];
        v1.extend_from_slice(&90_000u32.to_be_bytes());
        v1.extend_from_slice(&(180_000u64).to_be_bytes());
        v1.extend_from_slice(&45_000u32.to_be_bytes());
        v1.extend_from_slice(&1u32.to_be_bytes());
        v1.extend_from_slice(b"urn:other\0v\0");
        v1.extend_from_slice(&[1, 2]);
        let info = parse_emsg(&v1).unwrap();
        assert!(!info.is_id3());
        assert_eq!(info.start_time(10.0), 2.0);
        assert_eq!(info.duration(), Some(0.5));
        assert_eq!(info.value, "v");
    }

    #[test]
    fn test_parse_samples_extracts_sei_captions() {
        let sei = crate::video::sei::tests::cea608_sei_nal();
        let mut sample = (sei.len() as u32).to_be_bytes().to_vec();
        sample.extend_from_slice(&sei);
        sample.extend_from_slice(&[0, 0, 0, 2, 0x65, 0x88]);
        let frag = fragment(1, 90_000, &[3000], &[sample]);
        let source = CaptionSource {
            track_id: 1,
            timescale: 90_000,
            hevc: false,
        };
        let mut warnings = Warnings::default();
        let captions = parse_samples(0.0, &frag, source, &mut warnings);
        assert!(warnings.is_empty());
        assert_eq!(captions.len(), 1);
        assert_eq!(captions[0].pts, 1.0);
        assert!(matches!(captions[0].payload, UserdataPayload::Cea608 { .. }));
    }

    #[test]
    fn test_mp4a_codec_strings() {
        // esds: ES_Descriptor > DecoderConfigDescriptor(0x40) > AudioSpecificConfig(AAC-LC)
        let mut esds = vec![0, 0, 0, 0, 0x03, 0x19, 0, 1, 0, 0x04, 0x11, 0x40, 0x15];
        esds.extend_from_slice(&[0; 11]);
        esds.extend_from_slice(&[0x05, 0x02, 0x12, 0x10]);
        assert_eq!(mp4a_codec_from_esds(&esds).as_deref(), Some("mp4a.40.2"));
        esds[11] = 0x6B;
        assert_eq!(mp4a_codec_from_esds(&esds).as_deref(), Some("mp4a.6B"));
    }
}
