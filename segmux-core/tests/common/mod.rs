//! Stream builders shared by the integration tests.

#![allow(dead_code)]

use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit, StreamCipher};

use segmux_core::{ChunkMetadata, MuxConfig, PlaylistType, PushOutcome, Quirks, TransmuxResult, TransmuxState, Transmuxer, TypeSupported};

// ============================================================================
// MPEG-TS
// ============================================================================

pub const PMT_PID: u16 = 0x20;
pub const VIDEO_PID: u16 = 0x41;
pub const AUDIO_PID: u16 = 0x42;
pub const STREAM_TYPE_AAC: u8 = 0x0F;
pub const STREAM_TYPE_H264: u8 = 0x1B;

pub fn ts_packet(pid: u16, pusi: bool, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 184);
    let mut packet = vec![0x47, ((pusi as u8) << 6) | ((pid >> 8) as u8 & 0x1F), (pid & 0xFF) as u8, 0x10];
    if payload.len() < 184 {
        packet[3] = 0x30;
        let af_len = 183 - payload.len();
        packet.push(af_len as u8);
        if af_len > 0 {
            packet.push(0x00);
            packet.resize(5 + af_len, 0xFF);
        }
    }
    packet.extend_from_slice(payload);
    packet
}

pub fn pat(pmt_pid: u16) -> Vec<u8> {
    let mut section = vec![0x00, 0x00, 0xB0, 13, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01];
    section.extend_from_slice(&[0xE0 | (pmt_pid >> 8) as u8, (pmt_pid & 0xFF) as u8]);
    section.extend_from_slice(&[0; 4]);
    ts_packet(0, true, &section)
}

pub fn pmt(pmt_pid: u16, entries: &[(u8, u16)]) -> Vec<u8> {
    let section_length = 9 + entries.len() * 5 + 4;
    let mut section = vec![
        0x00,
        0x02,
        0xB0 | (section_length >> 8) as u8,
        section_length as u8,
        0x00,
        0x01,
        0xC1,
        0x00,
        0x00,
        0xE1,
        0x00,
        0xF0,
        0x00,
    ];
    for &(stream_type, pid) in entries {
        section.extend_from_slice(&[stream_type, 0xE0 | (pid >> 8) as u8, (pid & 0xFF) as u8, 0xF0, 0x00]);
    }
    section.extend_from_slice(&[0; 4]);
    ts_packet(pmt_pid, true, &section)
}

fn encode_timestamp(ts: i64) -> [u8; 5] {
    [
        0x20 | (((ts >> 29) & 0x0E) as u8) | 0x01,
        ((ts >> 22) & 0xFF) as u8,
        (((ts >> 14) & 0xFE) as u8) | 0x01,
        ((ts >> 7) & 0xFF) as u8,
        (((ts << 1) & 0xFE) as u8) | 0x01,
    ]
}

/// PES with a PTS; video PES use an unbounded length.
pub fn pes(stream_id: u8, pts: i64, payload: &[u8]) -> Vec<u8> {
    let mut header = vec![0x80, 0x80, 5];
    header.extend_from_slice(&encode_timestamp(pts));
    let length = if stream_id >= 0xE0 { 0 } else { header.len() + payload.len() };
    let mut out = vec![0, 0, 1, stream_id, (length >> 8) as u8, length as u8];
    out.extend(header);
    out.extend_from_slice(payload);
    out
}

pub fn packetize(pid: u16, pes: &[u8]) -> Vec<u8> {
    pes.chunks(184)
        .enumerate()
        .flat_map(|(i, chunk)| ts_packet(pid, i == 0, chunk))
        .collect()
}

/// PAT + PMT for the given streams.
pub fn ts_header(streams: &[(u8, u16)]) -> Vec<u8> {
    let mut data = pat(PMT_PID);
    data.extend(pmt(PMT_PID, streams));
    data
}

pub fn video_pes(pts: i64, access_unit: &[u8]) -> Vec<u8> {
    packetize(VIDEO_PID, &pes(0xE0, pts, access_unit))
}

pub fn audio_pes(pts: i64, frames: &[u8]) -> Vec<u8> {
    packetize(AUDIO_PID, &pes(0xC0, pts, frames))
}

// ============================================================================
// Elementary streams
// ============================================================================

pub const SPS_1280X720: [u8; 9] = [0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01, 0x40, 0x16, 0xE4];
pub const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];
const AUD: [u8; 2] = [0x09, 0xF0];

pub fn annexb(units: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(unit);
    }
    out
}

/// IDR access unit carrying SPS and PPS.
pub fn key_frame() -> Vec<u8> {
    annexb(&[&AUD, &SPS_1280X720, &PPS, &[0x65, 0x88, 0x84, 0x21]])
}

pub fn non_key_frame() -> Vec<u8> {
    annexb(&[&AUD, &[0x41, 0x9A, 0x02]])
}

/// AVC SEI NAL with one CEA-608 pair.
pub fn cea608_sei() -> Vec<u8> {
    let mut payload = vec![181, 0, 49, b'G', b'A', b'9', b'4', 3];
    payload.extend_from_slice(&[0x40 | 1, 0xFF, 0xFC, 0x94, 0x2C]);
    let mut nal = vec![0x06, 4, payload.len() as u8];
    nal.extend_from_slice(&payload);
    nal.push(0x80);
    nal
}

/// 44.1 kHz ADTS frame (AAC-LC).
pub fn adts_frame(channels: u8, payload_len: usize) -> Vec<u8> {
    let length = payload_len + 7;
    let mut frame = vec![
        0xFF,
        0xF1,
        (1 << 6) | (4 << 2) | (channels >> 2),
        ((channels & 0x03) << 6) | ((length >> 11) & 0x03) as u8,
        ((length >> 3) & 0xFF) as u8,
        (((length & 0x07) << 5) as u8) | 0x1F,
        0xFC,
    ];
    frame.extend((0..payload_len).map(|i| (i % 200) as u8 + 1));
    frame
}

pub fn adts_frames(count: usize) -> Vec<u8> {
    (0..count).flat_map(|_| adts_frame(2, 100)).collect()
}

/// 1024 samples at 44.1 kHz in 90 kHz ticks.
pub const AAC_FRAME_TICKS: f64 = 1024.0 * 90_000.0 / 44_100.0;

// ============================================================================
// ISO-BMFF
// ============================================================================

pub fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

pub fn full_box(kind: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![version];
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(payload);
    mp4_box(kind, &body)
}

/// One-track fragment with a 32-bit tfdt and explicit sample durations.
pub fn fragment(track_id: u32, base: u32, durations: &[u32], samples: &[Vec<u8>]) -> Vec<u8> {
    let tfhd = full_box(b"tfhd", 0, 0x020000, &track_id.to_be_bytes());
    let tfdt = full_box(b"tfdt", 0, 0, &base.to_be_bytes());
    let trun = |data_offset: u32| {
        let mut body = (samples.len() as u32).to_be_bytes().to_vec();
        body.extend_from_slice(&data_offset.to_be_bytes());
        for (duration, sample) in durations.iter().zip(samples) {
            body.extend_from_slice(&duration.to_be_bytes());
            body.extend_from_slice(&(sample.len() as u32).to_be_bytes());
        }
        full_box(b"trun", 0, 0x000301, &body)
    };
    let moof = |data_offset: u32| {
        let traf = mp4_box(b"traf", &[tfhd.clone(), tfdt.clone(), trun(data_offset)].concat());
        mp4_box(b"moof", &[full_box(b"mfhd", 0, 0, &1u32.to_be_bytes()), traf].concat())
    };
    let data_offset = moof(0).len() as u32 + 8;
    [moof(data_offset), mp4_box(b"mdat", &samples.concat())].concat()
}

pub fn init_track(id: u32, timescale: u32, handler: &[u8; 4], stsd_entry: Vec<u8>) -> Vec<u8> {
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
    let mdia = mp4_box(
        b"mdia",
        &[full_box(b"mdhd", 0, 0, &mdhd), full_box(b"hdlr", 0, 0, &hdlr), mp4_box(b"minf", &stbl)].concat(),
    );
    mp4_box(b"trak", &[full_box(b"tkhd", 0, 3, &tkhd), mdia].concat())
}

/// `encv` wrapping avc1 with a cenc `tenc` holding `kid`.
pub fn encrypted_video_entry(kid: [u8; 16]) -> Vec<u8> {
    let frma = mp4_box(b"frma", b"avc1");
    let schm = full_box(b"schm", 0, 0, &[b"cenc".as_slice(), &0x0001_0000u32.to_be_bytes()].concat());
    let mut tenc = vec![0, 0, 1, 16];
    tenc.extend_from_slice(&kid);
    let schi = mp4_box(b"schi", &full_box(b"tenc", 0, 0, &tenc));
    let sinf = mp4_box(b"sinf", &[frma, schm, schi].concat());
    let avcc = mp4_box(b"avcC", &[1, 0x64, 0x00, 0x1F, 0xFF, 0xE0, 0x00]);
    mp4_box(b"encv", &[vec![0u8; 78], avcc, sinf].concat())
}

/// Payload of the first box at `path` in `data`.
pub fn box_payload<'a>(data: &'a [u8], path: &[&[u8; 4]]) -> &'a [u8] {
    let found = segmux_core::mp4_tools::find_box(data, path);
    &data[found[0].clone()]
}

/// Base media decode time of a generated moof (version 1 tfdt).
pub fn tfdt(moof: &[u8]) -> u64 {
    let payload = box_payload(moof, &[b"moof", b"traf", b"tfdt"]);
    segmux_core::mp4_tools::read_u64(payload, 4).unwrap()
}

/// Sample durations of a generated moof's trun.
pub fn trun_durations(moof: &[u8]) -> Vec<u32> {
    let payload = box_payload(moof, &[b"moof", b"traf", b"trun"]);
    let count = segmux_core::mp4_tools::read_u32(payload, 4).unwrap() as usize;
    (0..count)
        .map(|i| segmux_core::mp4_tools::read_u32(payload, 12 + i * 16).unwrap())
        .collect()
}

// ============================================================================
// AES
// ============================================================================

pub fn encrypt_cbc(plaintext: &[u8], key: &[u8], iv: &[u8; 16]) -> Vec<u8> {
    let mut buf = vec![0u8; plaintext.len() + 16 - plaintext.len() % 16];
    buf[..plaintext.len()].copy_from_slice(plaintext);
    let len = plaintext.len();
    match key.len() {
        16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_mut::<Pkcs7>(&mut buf, len)
            .unwrap()
            .to_vec(),
        24 => cbc::Encryptor::<aes::Aes192>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_mut::<Pkcs7>(&mut buf, len)
            .unwrap()
            .to_vec(),
        _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_mut::<Pkcs7>(&mut buf, len)
            .unwrap()
            .to_vec(),
    }
}

pub fn encrypt_ctr(plaintext: &[u8], key: &[u8], iv: &[u8; 16]) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    ctr::Ctr128BE::<aes::Aes256>::new_from_slices(key, iv)
        .unwrap()
        .apply_keystream(&mut buf);
    buf
}

// ============================================================================
// Transmuxer
// ============================================================================

pub fn transmuxer() -> Transmuxer {
    Transmuxer::new(
        MuxConfig::default(),
        TypeSupported::default(),
        Quirks::default(),
        PlaylistType::Main,
        None,
    )
}

pub fn discontinuity() -> Option<TransmuxState> {
    Some(TransmuxState {
        discontinuity: true,
        ..Default::default()
    })
}

pub fn contiguous() -> Option<TransmuxState> {
    Some(TransmuxState {
        contiguous: true,
        ..Default::default()
    })
}

pub fn ready(outcome: PushOutcome) -> Vec<TransmuxResult> {
    match outcome {
        PushOutcome::Ready(results) => results,
        PushOutcome::Pending(work) => panic!("unexpected pending work: {work:?}"),
    }
}

/// Push one segment and flush it.
pub fn transmux_segment(
    transmuxer: &mut Transmuxer,
    data: Vec<u8>,
    sn: i64,
    state: Option<TransmuxState>,
) -> Vec<TransmuxResult> {
    let mut results = ready(transmuxer.push(data, None, ChunkMetadata::new(0, sn, 0), state).unwrap());
    results.extend(ready(transmuxer.flush(ChunkMetadata::new(0, sn, 0)).unwrap()));
    results
}
