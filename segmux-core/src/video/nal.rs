//! Annex-B NAL unit scanning and access-unit bookkeeping shared by the AVC
//! and HEVC parsers.

use crate::track::{NalUnit, VideoSample, VideoTrack};

/// Remove emulation prevention bytes (`00 00 03` -> `00 00`).
pub fn discard_epb(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// Byte offsets of the bytes `discard_epb` would drop.
pub fn epb_positions(data: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut zeros = 0;
    for (i, &b) in data.iter().enumerate() {
        if zeros >= 2 && b == 0x03 {
            positions.push(i);
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
    }
    positions
}

/// Access unit still being assembled. Timestamps come from the PES that
/// opened it and may be missing.
#[derive(Debug, Default)]
pub(crate) struct PendingSample {
    pub key: bool,
    pub frame: bool,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub units: Vec<NalUnit>,
}

impl PendingSample {
    pub fn new(key: bool, pts: Option<i64>, dts: Option<i64>) -> Self {
        Self {
            key,
            frame: false,
            pts,
            dts,
            units: Vec::new(),
        }
    }
}

/// Start-code scanner state plus the open access unit.
#[derive(Debug, Default)]
pub(crate) struct AccessUnitBuilder {
    pub sample: Option<PendingSample>,
    /// Zero bytes seen at the end of the previous PES, or -1 when a start
    /// code ended exactly there and the NAL header byte is still to come.
    nalu_state: i32,
    pub aud_found: bool,
}

impl AccessUnitBuilder {
    /// Split one PES payload into NAL units. Bytes before the first start
    /// code continue the last unit of the previous PES.
    pub fn parse_nal_units(
        &mut self,
        samples: &mut [VideoSample],
        data: &[u8],
        nal_type: fn(u8) -> u8,
    ) -> Vec<NalUnit> {
        let len = data.len();
        let mut state = self.nalu_state;
        let last_state = state;
        let mut units = Vec::new();
        let mut i = 0usize;
        let mut last_unit_start: Option<usize> = None;
        let mut last_unit_type = 0u8;
        let mut found_start_code = false;

        if state == -1 && len > 0 {
            last_unit_start = Some(0);
            last_unit_type = nal_type(data[0]);
            found_start_code = true;
            state = 0;
            i = 1;
        }

        while i < len {
            let value = data[i];
            i += 1;
            if state == 0 {
                state = if value == 0 { 1 } else { 0 };
                continue;
            }
            if state == 1 {
                state = if value == 0 { 2 } else { 0 };
                continue;
            }
            if value == 0 {
                state = 3;
            } else if value == 1 {
                found_start_code = true;
                let overflow = i as isize - state as isize - 1;
                if let Some(start) = last_unit_start {
                    units.push(NalUnit {
                        kind: last_unit_type,
                        data: data[start..overflow.max(start as isize) as usize].to_vec(),
                    });
                } else if let Some(last) = last_unit(&mut self.sample, samples) {
                    if last_state > 0 && i as i32 <= 4 - last_state {
                        // start code began in the previous PES
                        let keep = last.data.len().saturating_sub(last_state as usize);
                        last.data.truncate(keep);
                    }
                    if overflow > 0 {
                        last.data.extend_from_slice(&data[..overflow as usize]);
                    }
                }
                if i < len {
                    last_unit_start = Some(i);
                    last_unit_type = nal_type(data[i]);
                    state = 0;
                } else {
                    state = -1;
                }
            } else {
                state = 0;
            }
        }

        if let Some(start) = last_unit_start {
            if state >= 0 {
                units.push(NalUnit {
                    kind: last_unit_type,
                    data: data[start..].to_vec(),
                });
            }
        }

        if !found_start_code {
            if let Some(last) = last_unit(&mut self.sample, samples) {
                last.data.extend_from_slice(data);
            }
        }

        self.nalu_state = state;
        units
    }

    /// Open a new access unit if none is open and return it.
    pub fn open(&mut self, key: bool, pts: Option<i64>, dts: Option<i64>) -> &mut PendingSample {
        self.sample.get_or_insert_with(|| PendingSample::new(key, pts, dts))
    }

    /// Close the open access unit, if any, into `track`.
    pub fn close(&mut self, track: &mut VideoTrack) {
        if let Some(sample) = self.sample.take() {
            push_access_unit(sample, track);
        }
    }

    /// Close the open unit when it already holds non-key frame data, so key
    /// and non-key slices never share an access unit.
    pub fn close_if_non_key_frame(&mut self, track: &mut VideoTrack) {
        if matches!(&self.sample, Some(s) if s.frame && !s.key) {
            self.close(track);
        }
    }

    pub fn add_unit(&mut self, unit: NalUnit) {
        if let Some(sample) = self.sample.as_mut() {
            sample.units.push(unit);
        }
    }
}

fn last_unit<'a>(pending: &'a mut Option<PendingSample>, samples: &'a mut [VideoSample]) -> Option<&'a mut NalUnit> {
    match pending {
        Some(sample) if !sample.units.is_empty() => sample.units.last_mut(),
        _ => samples.last_mut().and_then(|s| s.units.last_mut()),
    }
}

/// Move a finished access unit into the track. Units without a timestamp
/// inherit the previous sample's, or are counted as dropped.
pub(crate) fn push_access_unit(sample: PendingSample, track: &mut VideoTrack) {
    if sample.units.is_empty() || !sample.frame {
        return;
    }
    let (pts, dts) = match sample.pts {
        Some(pts) => (pts, sample.dts.unwrap_or(pts)),
        None => match track.samples.last() {
            Some(last) => (last.pts, last.dts),
            None => {
                track.dropped += 1;
                return;
            }
        },
    };
    track.samples.push(VideoSample {
        pts,
        dts,
        key: sample.key,
        frame: sample.frame,
        units: sample.units,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avc_type(b: u8) -> u8 {
        b & 0x1F
    }

    #[test]
    fn test_discard_epb() {
        let data = [0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0x03];
        assert_eq!(discard_epb(&data), vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03]);
        assert_eq!(epb_positions(&data), vec![2, 6]);
    }

    #[test]
    fn test_split_three_and_four_byte_start_codes() {
        let data = [0, 0, 0, 1, 0x09, 0xF0, 0, 0, 1, 0x67, 0x42, 0x1E, 0, 0, 1, 0x65, 0x88];
        let mut builder = AccessUnitBuilder::default();
        let units = builder.parse_nal_units(&mut [], &data, avc_type);
        let kinds: Vec<u8> = units.iter().map(|u| u.kind).collect();
        assert_eq!(kinds, vec![9, 7, 5]);
        assert_eq!(units[0].data, vec![0x09, 0xF0]);
        assert_eq!(units[1].data, vec![0x67, 0x42, 0x1E]);
        assert_eq!(units[2].data, vec![0x65, 0x88]);
    }

    #[test]
    fn test_leading_bytes_continue_previous_unit() {
        let mut builder = AccessUnitBuilder::default();
        let first = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let units = builder.parse_nal_units(&mut [], &first, avc_type);
        builder.open(true, Some(0), Some(0)).frame = true;
        for unit in units {
            builder.add_unit(unit);
        }
        let second = [0xCC, 0xDD, 0, 0, 1, 0x41, 0x01];
        let units = builder.parse_nal_units(&mut [], &second, avc_type);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].kind, 1);
        let pending = builder.sample.as_ref().unwrap();
        assert_eq!(pending.units[0].data, vec![0x65, 0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn test_start_code_split_across_pes() {
        let mut builder = AccessUnitBuilder::default();
        let first = [0, 0, 1, 0x65, 0xAA, 0x00, 0x00];
        let units = builder.parse_nal_units(&mut [], &first, avc_type);
        builder.open(true, Some(0), Some(0)).frame = true;
        for unit in units {
            builder.add_unit(unit);
        }
        let second = [0x01, 0x41, 0x02];
        let units = builder.parse_nal_units(&mut [], &second, avc_type);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data, vec![0x41, 0x02]);
        let pending = builder.sample.as_ref().unwrap();
        assert_eq!(pending.units[0].data, vec![0x65, 0xAA]);
    }

    #[test]
    fn test_push_without_timestamp_is_dropped_or_inherited() {
        let mut track = VideoTrack::new(1, None, 0.0);
        let mut sample = PendingSample::new(true, None, None);
        sample.frame = true;
        sample.units.push(NalUnit { kind: 5, data: vec![0x65] });
        push_access_unit(sample, &mut track);
        assert_eq!(track.dropped, 1);
        assert!(track.samples.is_empty());

        let mut sample = PendingSample::new(true, Some(9000), None);
        sample.frame = true;
        sample.units.push(NalUnit { kind: 5, data: vec![0x65] });
        push_access_unit(sample, &mut track);
        let mut sample = PendingSample::new(false, None, None);
        sample.frame = true;
        sample.units.push(NalUnit { kind: 1, data: vec![0x41] });
        push_access_unit(sample, &mut track);
        assert_eq!(track.samples.len(), 2);
        assert_eq!(track.samples[1].pts, 9000);
        assert_eq!(track.samples[1].dts, 9000);
    }
}
