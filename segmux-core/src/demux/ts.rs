// ============================================================================
// TS DEMUXER - MPEG-2 Transport Stream segments
//
// Fixed 188-byte packets. PAT names the PMT, the PMT names one video, one
// audio and one ID3 PID. PES payloads are reassembled per PID and handed to
// the audio frame readers or the video access-unit parser.
// ============================================================================

use tracing::{debug, warn};

use super::adts::{self, AdtsOverflow, AppendedFrame};
use super::{ac3, mpeg_audio};
use crate::config::TypeSupported;
use crate::decrypt::{CipherRoute, DecryptError, DecryptOutcome, KeyData, SampleAesDecrypter};
use crate::error::{MuxError, Warnings};
use crate::track::{
    AudioCodec, AudioTrack, DemuxerResult, MetadataSample, MetadataSchema, MetadataTrack, PesPacket, UserdataTrack,
    VideoCodec, VideoTrack, MPEG_TS_CLOCK,
};
use crate::video::VideoParser;

// ============================================================================
// Constants
// ============================================================================

pub const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;

// PIDs
const PAT_PID: u16 = 0x0000;
const SDT_PID: u16 = 0x0011;
const NULL_PID: u16 = 0x1FFF;

// Stream types
const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;
const STREAM_TYPE_PRIVATE_PES: u8 = 0x06;
const STREAM_TYPE_AAC: u8 = 0x0F;
const STREAM_TYPE_METADATA: u8 = 0x15;
const STREAM_TYPE_H264: u8 = 0x1B;
const STREAM_TYPE_H265: u8 = 0x24;
const STREAM_TYPE_AC3: u8 = 0x81;
const STREAM_TYPE_EAC3: u8 = 0x87;
const STREAM_TYPE_SAMPLE_AES_AAC: u8 = 0xCF;
const STREAM_TYPE_SAMPLE_AES_AC3: u8 = 0xC1;
const STREAM_TYPE_SAMPLE_AES_EAC3: u8 = 0xC2;
const STREAM_TYPE_SAMPLE_AES_H264: u8 = 0xDB;

/// DVB AC-3 descriptor inside a private PES stream entry.
const DESCRIPTOR_DVB_AC3: u8 = 0x6A;

/// PTS leading DTS by more than this is treated as a broken muxer.
const MAX_PTS_DTS_DELTA: i64 = 60 * MPEG_TS_CLOCK as i64;

// Track ids shared by every demuxer and the remuxers.
pub const VIDEO_TRACK_ID: u32 = 1;
pub const AUDIO_TRACK_ID: u32 = 2;
pub const ID3_TRACK_ID: u32 = 3;

// ============================================================================
// TS Packet Header
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct TsHeader {
    payload_unit_start: bool,
    pid: u16,
    adaptation_field_control: u8,
}

impl TsHeader {
    fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < 4 || packet[0] != TS_SYNC_BYTE {
            return None;
        }
        Some(Self {
            payload_unit_start: (packet[1] & 0x40) != 0,
            pid: parse_pid(packet, 0),
            adaptation_field_control: (packet[3] & 0x30) >> 4,
        })
    }

    /// Start of the payload, `None` when the adaptation field fills the packet.
    fn payload_offset(&self, packet: &[u8]) -> Option<usize> {
        if self.adaptation_field_control > 1 {
            let offset = 5 + packet[4] as usize;
            (offset < TS_PACKET_SIZE).then_some(offset)
        } else {
            Some(4)
        }
    }
}

fn parse_pid(data: &[u8], offset: usize) -> u16 {
    (((data[offset + 1] & 0x1F) as u16) << 8) | data[offset + 2] as u16
}

// ============================================================================
// Sync / Probe
// ============================================================================

fn is_packet_start(data: &[u8], j: usize) -> bool {
    data[j] == TS_SYNC_BYTE
        && (data.len() - j == TS_PACKET_SIZE || data.get(j + TS_PACKET_SIZE) == Some(&TS_SYNC_BYTE))
}

/// Offset of the first run of aligned packets that includes a PAT.
///
/// A run at offset 0 needs two packets, a run found further in needs three.
/// Once a candidate start is found the scan window widens to 100 packets.
pub fn sync_offset(data: &[u8]) -> Option<usize> {
    let length = data.len();
    if length < TS_PACKET_SIZE {
        return None;
    }
    let mut scan_window = (TS_PACKET_SIZE * 5).min(length - TS_PACKET_SIZE) + 1;
    let mut i = 0;
    while i < scan_window {
        let mut found_pat = false;
        let mut packet_start = None;
        let mut ts_packets = 0;
        let mut j = i;
        while j < length {
            if is_packet_start(data, j) {
                ts_packets += 1;
                if packet_start.is_none() {
                    packet_start = Some(j);
                    if j != 0 {
                        scan_window = (j + TS_PACKET_SIZE * 99).min(length - TS_PACKET_SIZE) + 1;
                    }
                }
                if !found_pat {
                    found_pat = parse_pid(data, j) == PAT_PID;
                }
                if let Some(start) = packet_start.filter(|_| found_pat) {
                    if (start == 0 && ts_packets > 1) || ts_packets > 2 {
                        return Some(start);
                    }
                }
            } else if ts_packets > 0 {
                return None;
            } else {
                break;
            }
            j += TS_PACKET_SIZE;
        }
        i += 1;
    }
    None
}

pub fn probe(data: &[u8]) -> bool {
    match sync_offset(data) {
        Some(0) => true,
        Some(offset) => {
            warn!("MPEG2-TS detected but first sync word found @ offset {offset}");
            true
        }
        None => false,
    }
}

// ============================================================================
// PAT / PMT
// ============================================================================

/// PMT PID of the first program. `offset` points at the table id.
fn parse_pat(packet: &[u8], offset: usize) -> Option<u16> {
    (offset + 11 < packet.len()).then(|| (((packet[offset + 10] & 0x1F) as u16) << 8) | packet[offset + 11] as u16)
}

#[derive(Debug, Default, PartialEq)]
struct PmtStreams {
    video: Option<(u16, VideoCodec)>,
    audio: Option<(u16, AudioCodec)>,
    id3: Option<u16>,
}

fn log_encrypted_in_clear_stream(kind: &str) {
    debug!("{kind} with AES-128-CBC slice encryption found in unencrypted stream");
}

fn parse_pmt(
    packet: &[u8],
    mut offset: usize,
    type_supported: TypeSupported,
    is_sample_aes: bool,
    warnings: &mut Warnings,
) -> PmtStreams {
    let mut streams = PmtStreams::default();
    if offset + 12 > packet.len() {
        warnings.parsing("unreadable PMT");
        return streams;
    }
    let section_length = (((packet[offset + 1] & 0x0F) as usize) << 8) | packet[offset + 2] as usize;
    let table_end = (offset + 3 + section_length).saturating_sub(4).min(packet.len());
    let program_info_length = (((packet[offset + 10] & 0x0F) as usize) << 8) | packet[offset + 11] as usize;
    offset += 12 + program_info_length;

    while offset + 5 <= table_end {
        let stream_type = packet[offset];
        let pid = parse_pid(packet, offset);
        let es_info_length = (((packet[offset + 3] & 0x0F) as usize) << 8) | packet[offset + 4] as usize;

        match stream_type {
            STREAM_TYPE_SAMPLE_AES_AAC | STREAM_TYPE_AAC => {
                if stream_type == STREAM_TYPE_SAMPLE_AES_AAC && !is_sample_aes {
                    log_encrypted_in_clear_stream("ADTS AAC");
                } else if streams.audio.is_none() {
                    streams.audio = Some((pid, AudioCodec::Aac));
                }
            }
            STREAM_TYPE_METADATA => {
                streams.id3.get_or_insert(pid);
            }
            STREAM_TYPE_SAMPLE_AES_H264 | STREAM_TYPE_H264 => {
                if stream_type == STREAM_TYPE_SAMPLE_AES_H264 && !is_sample_aes {
                    log_encrypted_in_clear_stream("H.264");
                } else if streams.video.is_none() {
                    streams.video = Some((pid, VideoCodec::Avc));
                }
            }
            STREAM_TYPE_MPEG1_AUDIO | STREAM_TYPE_MPEG2_AUDIO => {
                if !type_supported.mpeg && !type_supported.mp3 {
                    debug!("MPEG audio found, not supported by the host");
                } else if streams.audio.is_none() {
                    streams.audio = Some((pid, AudioCodec::Mp3));
                }
            }
            STREAM_TYPE_SAMPLE_AES_AC3 | STREAM_TYPE_AC3 => {
                if stream_type == STREAM_TYPE_SAMPLE_AES_AC3 && !is_sample_aes {
                    log_encrypted_in_clear_stream("AC-3");
                } else if !type_supported.ac3 {
                    debug!("AC-3 audio found, not supported by the host");
                } else if streams.audio.is_none() {
                    streams.audio = Some((pid, AudioCodec::Ac3));
                }
            }
            STREAM_TYPE_PRIVATE_PES => {
                if streams.audio.is_none() && es_info_length > 0 {
                    let descriptors_end = (offset + 5 + es_info_length).min(table_end);
                    let mut pos = offset + 5;
                    while pos + 2 <= descriptors_end {
                        if packet[pos] == DESCRIPTOR_DVB_AC3 {
                            if type_supported.ac3 {
                                streams.audio = Some((pid, AudioCodec::Ac3));
                            } else {
                                debug!("AC-3 audio found, not supported by the host");
                            }
                        }
                        pos += packet[pos + 1] as usize + 2;
                    }
                }
            }
            STREAM_TYPE_SAMPLE_AES_EAC3 | STREAM_TYPE_EAC3 => {
                warnings.parsing("Unsupported EC-3 in M2TS found");
                return streams;
            }
            STREAM_TYPE_H265 => {
                if streams.video.is_none() {
                    debug!("HEVC in M2TS found");
                    streams.video = Some((pid, VideoCodec::Hevc));
                }
            }
            _ => {}
        }
        offset += es_info_length + 5;
    }
    streams
}

// ============================================================================
// PES Parsing
// ============================================================================

/// 33-bit timestamp encoded in 5 bytes.
fn parse_timestamp(data: &[u8]) -> i64 {
    ((((data[0] as i64) >> 1) & 0x07) << 30)
        | ((data[1] as i64) << 22)
        | (((data[2] as i64) >> 1) << 15)
        | ((data[3] as i64) << 7)
        | ((data[4] as i64) >> 1)
}

fn complete_pes(buf: Vec<u8>, stream: &str) -> Option<PesPacket> {
    let pes = parse_pes(&buf);
    if pes.is_none() && !buf.is_empty() {
        debug!(bytes = buf.len(), "dropping truncated {stream} PES at end of segment");
    }
    pes
}

/// Strip the PES header from a reassembled payload.
///
/// `None` when the start code is missing, the header is cut, or the declared
/// packet length runs past the bytes collected so far.
pub(crate) fn parse_pes(data: &[u8]) -> Option<PesPacket> {
    if data.len() < 9 || data[..3] != [0x00, 0x00, 0x01] {
        return None;
    }
    let pes_length = ((data[4] as usize) << 8) | data[5] as usize;
    if pes_length > 0 && pes_length > data.len() - 6 {
        return None;
    }

    let flags = data[7];
    let mut pts = None;
    let mut dts = None;
    if flags & 0xC0 != 0 && data.len() >= 14 {
        let mut presentation = parse_timestamp(&data[9..14]);
        let decode = if flags & 0x40 != 0 && data.len() >= 19 {
            let decode = parse_timestamp(&data[14..19]);
            if presentation - decode > MAX_PTS_DTS_DELTA {
                warn!(
                    "{}s delta between PTS and DTS, align them",
                    (presentation - decode) / MPEG_TS_CLOCK as i64
                );
                presentation = decode;
            }
            decode
        } else {
            presentation
        };
        pts = Some(presentation);
        dts = Some(decode);
    }

    let payload_start = data[8] as usize + 9;
    if data.len() <= payload_start {
        return None;
    }
    Some(PesPacket {
        data: data[payload_start..].to_vec(),
        pts,
        dts,
    })
}

// ============================================================================
// TS Demuxer
// ============================================================================

#[derive(Debug)]
pub struct TsDemuxer {
    type_supported: TypeSupported,
    video: VideoTrack,
    audio: AudioTrack,
    id3: MetadataTrack,
    text: UserdataTrack,
    video_pes: Option<Vec<u8>>,
    audio_pes: Option<Vec<u8>>,
    id3_pes: Option<Vec<u8>>,
    video_parser: Option<VideoParser>,
    pmt_id: Option<u16>,
    pmt_parsed: bool,
    remainder: Option<Vec<u8>>,
    aac_overflow: Option<AdtsOverflow>,
    sample_aes: Option<SampleAesDecrypter>,
    warnings: Warnings,
}

impl TsDemuxer {
    pub fn new(type_supported: TypeSupported) -> Self {
        let mut demuxer = Self {
            type_supported,
            video: VideoTrack::default(),
            audio: AudioTrack::default(),
            id3: MetadataTrack::default(),
            text: UserdataTrack::default(),
            video_pes: None,
            audio_pes: None,
            id3_pes: None,
            video_parser: None,
            pmt_id: None,
            pmt_parsed: false,
            remainder: None,
            aac_overflow: None,
            sample_aes: None,
            warnings: Warnings::default(),
        };
        demuxer.reset_init_segment(None, None, 0.0);
        demuxer
    }

    pub fn reset_init_segment(&mut self, audio_codec: Option<&str>, video_codec: Option<&str>, duration: f64) {
        self.pmt_parsed = false;
        self.pmt_id = None;
        self.video = VideoTrack::new(VIDEO_TRACK_ID, None, duration);
        self.video.manifest_codec = video_codec.map(str::to_owned);
        self.audio = AudioTrack::new(AUDIO_TRACK_ID, None, duration);
        self.audio.manifest_codec = audio_codec.map(str::to_owned);
        self.audio.segment_codec = Some(AudioCodec::Aac);
        self.id3 = MetadataTrack::new(ID3_TRACK_ID, None);
        self.text = UserdataTrack::new(MPEG_TS_CLOCK);
        self.video_parser = None;
        self.video_pes = None;
        self.audio_pes = None;
        self.id3_pes = None;
        self.aac_overflow = None;
        self.remainder = None;
    }

    /// Drop partial PES data and any open access unit.
    pub fn reset_contiguity(&mut self) {
        self.video_pes = None;
        self.audio_pes = None;
        self.id3_pes = None;
        self.aac_overflow = None;
        self.remainder = None;
        if let Some(codec) = self.video_parser.as_ref().map(VideoParser::codec) {
            self.video_parser = Some(VideoParser::for_codec(codec));
        }
    }

    pub fn drain_warnings(&mut self) -> Vec<MuxError> {
        self.warnings.drain()
    }

    pub fn demux(&mut self, data: &[u8], is_sample_aes: bool, flush: bool) -> DemuxerResult {
        if !is_sample_aes {
            self.sample_aes = None;
        }
        let data = match self.remainder.take() {
            Some(mut remainder) => {
                remainder.extend_from_slice(data);
                remainder
            }
            None => data.to_vec(),
        };
        if data.len() < TS_PACKET_SIZE && !flush {
            self.remainder = Some(data);
            return self.result();
        }

        let sync = sync_offset(&data).unwrap_or(0);
        let len = data.len() - (data.len().saturating_sub(sync)) % TS_PACKET_SIZE;
        if len < data.len() {
            self.remainder = Some(data[len..].to_vec());
        }

        let mut unknown_pid = None;
        let mut ts_packet_errors = 0usize;
        let mut start = sync;
        while start + TS_PACKET_SIZE <= len {
            let packet = &data[start..start + TS_PACKET_SIZE];
            let Some(header) = TsHeader::parse(packet) else {
                ts_packet_errors += 1;
                start += TS_PACKET_SIZE;
                continue;
            };
            let Some(mut offset) = header.payload_offset(packet) else {
                start += TS_PACKET_SIZE;
                continue;
            };
            let pid = header.pid;
            let stt = header.payload_unit_start;

            if Some(pid) == self.video.pid {
                if stt {
                    if let Some(pes) = self.video_pes.take().and_then(|buf| parse_pes(&buf)) {
                        self.parse_video_pes(pes, false);
                    }
                    self.video_pes = Some(Vec::new());
                }
                if let Some(buf) = self.video_pes.as_mut() {
                    buf.extend_from_slice(&packet[offset..]);
                }
            } else if Some(pid) == self.audio.pid {
                if stt {
                    if let Some(pes) = self.audio_pes.take().and_then(|buf| parse_pes(&buf)) {
                        self.parse_audio_pes(pes);
                    }
                    self.audio_pes = Some(Vec::new());
                }
                if let Some(buf) = self.audio_pes.as_mut() {
                    buf.extend_from_slice(&packet[offset..]);
                }
            } else if Some(pid) == self.id3.pid {
                if stt {
                    if let Some(pes) = self.id3_pes.take().and_then(|buf| parse_pes(&buf)) {
                        self.parse_id3_pes(pes);
                    }
                    self.id3_pes = Some(Vec::new());
                }
                if let Some(buf) = self.id3_pes.as_mut() {
                    buf.extend_from_slice(&packet[offset..]);
                }
            } else if pid == PAT_PID {
                if stt {
                    offset += packet[offset] as usize + 1;
                }
                self.pmt_id = parse_pat(packet, offset);
            } else if Some(pid) == self.pmt_id {
                if stt {
                    offset += packet[offset] as usize + 1;
                }
                let streams = parse_pmt(packet, offset, self.type_supported, is_sample_aes, &mut self.warnings);
                self.apply_pmt(streams);
                let backtrack = unknown_pid.is_some() && !self.pmt_parsed;
                self.pmt_parsed = true;
                if let Some(unknown) = unknown_pid.take().filter(|_| backtrack) {
                    warn!(
                        "MPEG-TS PMT found at {start} after unknown PID '{unknown}'. Backtracking to sync byte @{sync} to parse all TS packets."
                    );
                    start = sync;
                    continue;
                }
            } else if pid != SDT_PID && pid != NULL_PID {
                unknown_pid = Some(pid);
            }
            start += TS_PACKET_SIZE;
        }

        if ts_packet_errors > 0 {
            self.warnings
                .parsing(format!("Found {ts_packet_errors} TS packet/s that do not start with 0x47"));
        }
        if flush {
            self.extract_remaining_samples();
        }
        self.result()
    }

    /// Demux, then decrypt the protected sample ranges.
    pub fn demux_sample_aes(
        &mut self,
        data: &[u8],
        key_data: &KeyData,
        route: CipherRoute,
        flush: bool,
    ) -> Result<DecryptOutcome<DemuxerResult>, DecryptError> {
        let result = self.demux(data, true, flush);
        let decrypter = SampleAesDecrypter::new(key_data, route)?;
        let outcome = decrypter.decrypt(result);
        self.sample_aes = Some(decrypter);
        outcome
    }

    pub fn flush(&mut self) -> Result<DecryptOutcome<DemuxerResult>, DecryptError> {
        let result = match self.remainder.take() {
            Some(remainder) => {
                let is_sample_aes = self.sample_aes.is_some();
                let result = self.demux(&remainder, is_sample_aes, true);
                // A partial packet left at end of stream is never completed.
                self.remainder = None;
                result
            }
            None => {
                self.extract_remaining_samples();
                self.result()
            }
        };
        match &self.sample_aes {
            Some(decrypter) => decrypter.decrypt(result),
            None => Ok(DecryptOutcome::Sync(result)),
        }
    }

    fn result(&mut self) -> DemuxerResult {
        DemuxerResult {
            audio: self.audio.take_samples(),
            video: self.video.take_samples(),
            id3: self.id3.take_samples(),
            text: self.text.take_samples(),
            fragment: None,
        }
    }

    fn apply_pmt(&mut self, streams: PmtStreams) {
        if let Some((pid, codec)) = streams.video {
            self.video.pid = Some(pid);
            self.video.segment_codec = Some(codec);
        }
        if let Some((pid, codec)) = streams.audio {
            self.audio.pid = Some(pid);
            self.audio.segment_codec = Some(codec);
        }
        if let Some(pid) = streams.id3 {
            self.id3.pid = Some(pid);
        }
    }

    /// Parse whatever PES data is buffered. Truncated PES packets are
    /// dropped; nothing carries over past a flush.
    fn extract_remaining_samples(&mut self) {
        match self.video_pes.take().and_then(|buf| complete_pes(buf, "video")) {
            Some(pes) => self.parse_video_pes(pes, true),
            None => self.close_open_access_unit(),
        }
        if let Some(pes) = self.audio_pes.take().and_then(|buf| complete_pes(buf, "audio")) {
            self.parse_audio_pes(pes);
        }
        if let Some(pes) = self.id3_pes.take().and_then(|buf| complete_pes(buf, "id3")) {
            self.parse_id3_pes(pes);
        }
    }

    fn close_open_access_unit(&mut self) {
        if let Some(parser) = self.video_parser.as_mut() {
            parser.parse_pes(&mut self.video, &mut self.text, PesPacket::default(), true, &mut self.warnings);
        }
    }

    fn parse_video_pes(&mut self, pes: PesPacket, end_of_segment: bool) {
        let Some(codec) = self.video.segment_codec else {
            return;
        };
        if self.video_parser.as_ref().map(VideoParser::codec) != Some(codec) {
            self.video_parser = Some(VideoParser::for_codec(codec));
        }
        if let Some(parser) = self.video_parser.as_mut() {
            parser.parse_pes(&mut self.video, &mut self.text, pes, end_of_segment, &mut self.warnings);
        }
    }

    fn parse_audio_pes(&mut self, pes: PesPacket) {
        match self.audio.segment_codec {
            Some(AudioCodec::Aac) => self.parse_aac_pes(pes),
            Some(AudioCodec::Mp3) => self.parse_mpeg_pes(pes),
            Some(AudioCodec::Ac3) => self.parse_ac3_pes(pes),
            None => {}
        }
    }

    fn parse_aac_pes(&mut self, pes: PesPacket) {
        let mut data = pes.data;
        let mut start = 0;
        let overflow = self.aac_overflow.take();
        let overflow_pts = overflow.as_ref().map(AdtsOverflow::pts);
        match overflow {
            Some(AdtsOverflow::Header { mut bytes, .. }) => {
                bytes.extend_from_slice(&data);
                data = bytes;
            }
            Some(AdtsOverflow::Payload { mut sample, filled }) => {
                let missing = sample.unit.len() - filled;
                let available = missing.min(data.len());
                sample.unit[filled..filled + available].copy_from_slice(&data[..available]);
                self.audio.samples.push(sample);
                start = missing;
            }
            None => {}
        }

        let len = data.len();
        let mut offset = start;
        while offset + 1 < len && !adts::is_header(&data, offset) {
            offset += 1;
        }
        if offset != start {
            if offset + 1 < len {
                self.warnings
                    .parsing(format!("AAC PES did not start with ADTS header,offset:{offset}"));
            } else {
                self.warnings.parsing("No ADTS header found in AAC PES");
                return;
            }
        }
        if offset >= len {
            return;
        }

        adts::init_track_config(&mut self.audio, &data, offset, &mut self.warnings);
        let pts = match (pes.pts, overflow_pts) {
            (Some(pts), _) => pts,
            (None, Some(previous)) => previous + adts::frame_duration(self.audio.samplerate).round() as i64,
            (None, None) => {
                warn!("AAC PES unknown PTS");
                return;
            }
        };

        let mut frame_index = 0;
        while offset < len {
            match adts::append_frame(&mut self.audio, &data, offset, pts, frame_index) {
                AppendedFrame::Complete { length, .. } => {
                    offset += length;
                    frame_index += 1;
                    while offset + 1 < len && !adts::is_header(&data, offset) {
                        offset += 1;
                    }
                    // a lone trailing byte can only matter if it starts the next header
                    if offset + 1 == len && data[offset] != 0xFF {
                        break;
                    }
                }
                AppendedFrame::Overflow(overflow) => {
                    self.aac_overflow = Some(overflow);
                    break;
                }
            }
        }
    }

    fn parse_mpeg_pes(&mut self, pes: PesPacket) {
        let Some(pts) = pes.pts else {
            warn!("MPEG PES unknown PTS");
            return;
        };
        let data = pes.data;
        let mut offset = 0;
        let mut frame_index = 0;
        while offset < data.len() {
            if mpeg_audio::is_header(&data, offset) {
                match mpeg_audio::append_frame(&mut self.audio, &data, offset, pts, frame_index) {
                    Some(length) => {
                        offset += length;
                        frame_index += 1;
                    }
                    None => break,
                }
            } else {
                offset += 1;
            }
        }
    }

    fn parse_ac3_pes(&mut self, pes: PesPacket) {
        let Some(pts) = pes.pts else {
            warn!("AC3 PES unknown PTS");
            return;
        };
        let data = pes.data;
        let mut offset = 0;
        let mut frame_index = 0;
        while offset < data.len() {
            match ac3::append_frame(&mut self.audio, &data, offset, pts, frame_index) {
                Some(length) => {
                    offset += length;
                    frame_index += 1;
                }
                None => break,
            }
        }
    }

    fn parse_id3_pes(&mut self, pes: PesPacket) {
        let Some(pts) = pes.pts else {
            warn!("ID3 PES unknown PTS");
            return;
        };
        self.id3.samples.push(MetadataSample {
            pts: pts as f64,
            dts: pes.dts.unwrap_or(pts) as f64,
            data: pes.data,
            schema: MetadataSchema::Id3,
            duration: None,
        });
    }
}
