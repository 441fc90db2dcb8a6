//! Full-segment AES through the software path and a decrypt provider.

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::*;
use segmux_core::decrypt::software::{decrypt_whole, pkcs7_unpadded_len};
use segmux_core::decrypt::{AesMode, DecryptData, DecryptError, EncryptionMethod, SoftwareDecrypter, SoftwareProvider};
use segmux_core::{ChunkMetadata, MuxConfig, PlaylistType, PushOutcome, Quirks, TransmuxResult, Transmuxer, TypeSupported};

const IV: [u8; 16] = [0x5A; 16];

fn av_segment() -> Vec<u8> {
    let mut data = ts_header(&[(STREAM_TYPE_H264, VIDEO_PID), (STREAM_TYPE_AAC, AUDIO_PID)]);
    data.extend(audio_pes(90_000, &adts_frames(3)));
    data.extend(video_pes(93_000, &key_frame()));
    data.extend(video_pes(96_000, &non_key_frame()));
    data
}

fn key_of(len: usize) -> Vec<u8> {
    (0..len as u8).map(|i| i.wrapping_mul(37).wrapping_add(11)).collect()
}

fn decrypt_data(method: EncryptionMethod, key: &[u8]) -> DecryptData {
    DecryptData {
        method,
        key: Some(key.to_vec()),
        iv: Some(IV.to_vec()),
        key_id: None,
    }
}

fn summarize(results: &[TransmuxResult]) -> (usize, usize, usize) {
    let inits = results.iter().filter(|r| r.remux_result.init_segment.is_some()).count();
    let video: usize = results.iter().filter_map(|r| r.remux_result.video.as_ref()).map(|v| v.nb).sum();
    let audio: usize = results.iter().filter_map(|r| r.remux_result.audio.as_ref()).map(|a| a.nb).sum();
    (inits, video, audio)
}

#[rstest]
#[case::cbc_128(16)]
#[case::cbc_192(24)]
#[case::cbc_256(32)]
fn test_cbc_round_trip_strips_padding(#[case] key_len: usize) {
    let key = key_of(key_len);
    let plain: Vec<u8> = (0..100u8).collect();
    let encrypted = encrypt_cbc(&plain, &key, &IV);
    assert_eq!(encrypted.len(), 112);
    assert_eq!(decrypt_whole(&encrypted, &key, &IV, AesMode::Cbc).unwrap(), plain);
}

#[test]
fn test_ctr_round_trip_keeps_length() {
    let key = key_of(32);
    let plain: Vec<u8> = (0..77u8).collect();
    let encrypted = encrypt_ctr(&plain, &key, &IV);
    assert_eq!(decrypt_whole(&encrypted, &key, &IV, AesMode::Ctr).unwrap(), plain);
}

#[test]
fn test_chunked_cbc_matches_one_shot() {
    let key = key_of(16);
    let plain: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let encrypted = encrypt_cbc(&plain, &key, &IV);

    let mut decrypter = SoftwareDecrypter::new();
    let mut out = Vec::new();
    for chunk in encrypted.chunks(100) {
        out.extend(decrypter.decrypt(chunk, &key, &IV, AesMode::Cbc).unwrap());
    }
    out.extend(decrypter.flush(true));
    assert_eq!(out, plain);
}

#[rstest]
#[case::empty(&[], false)]
#[case::zero(&[1, 2, 0], false)]
#[case::oversized(&[17; 17], false)]
#[case::mismatched(&[9, 3, 2, 3], false)]
#[case::one_byte(&[9, 1], true)]
fn test_pkcs7_validation(#[case] data: &[u8], #[case] valid: bool) {
    assert_eq!(pkcs7_unpadded_len(data).is_ok(), valid);
}

#[test]
fn test_bad_key_length_is_reported() {
    let err = decrypt_whole(&[0; 32], &[0; 20], &IV, AesMode::Cbc).unwrap_err();
    assert!(matches!(err, DecryptError::InvalidKeyLength(20)));
    assert_eq!(err.to_string(), "AES key must be 16, 24 or 32 bytes, got 20");
}

#[rstest]
#[case::aes_128(EncryptionMethod::Aes128, 16)]
#[case::aes_256(EncryptionMethod::Aes256, 32)]
#[case::aes_256_ctr(EncryptionMethod::Aes256Ctr, 32)]
fn test_encrypted_segment_transmuxes_like_clear(#[case] method: EncryptionMethod, #[case] key_len: usize) {
    let key = key_of(key_len);
    let clear = av_segment();
    let encrypted = match method {
        EncryptionMethod::Aes256Ctr => encrypt_ctr(&clear, &key, &IV),
        _ => encrypt_cbc(&clear, &key, &IV),
    };

    let mut reference = transmuxer();
    let expected = summarize(&transmux_segment(&mut reference, clear, 1, discontinuity()));

    let mut transmuxer = transmuxer();
    let data = decrypt_data(method, &key);
    let chunk_meta = ChunkMetadata::new(0, 1, 0);
    let mut results = ready(
        transmuxer
            .push(encrypted, Some(&data), chunk_meta.clone(), discontinuity())
            .unwrap(),
    );
    results.extend(ready(transmuxer.flush(chunk_meta).unwrap()));

    assert_eq!(summarize(&results), expected);
    assert_eq!(expected, (1, 2, 3));
}

#[tokio::test]
async fn test_provider_decrypt_resolves_then_resumes() {
    let mut transmuxer = Transmuxer::new(
        MuxConfig::default(),
        TypeSupported::default(),
        Quirks::default(),
        PlaylistType::Main,
        Some(Arc::new(SoftwareProvider)),
    );
    let key = key_of(16);
    let encrypted = encrypt_cbc(&av_segment(), &key, &IV);
    let data = decrypt_data(EncryptionMethod::Aes128, &key);

    let mut outcome = transmuxer
        .push(encrypted, Some(&data), ChunkMetadata::new(2, 9, 0), discontinuity())
        .unwrap();
    let mut results = Vec::new();
    loop {
        match outcome {
            PushOutcome::Ready(ready) => {
                results.extend(ready);
                break;
            }
            PushOutcome::Pending(work) => {
                assert_eq!(work.chunk_meta().sn, 9);
                outcome = transmuxer.resume(work.resolve().await).unwrap();
            }
        }
    }
    results.extend(ready(transmuxer.flush(ChunkMetadata::new(2, 9, 0)).unwrap()));

    assert!(results.iter().all(|r| r.chunk_meta.level == 2 && r.chunk_meta.sn == 9));
    assert_eq!(summarize(&results), (1, 2, 3));
}

#[test]
fn test_wrong_key_size_fails_push() {
    let mut transmuxer = transmuxer();
    let data = decrypt_data(EncryptionMethod::Aes128, &[0; 15]);
    let result = transmuxer.push(vec![0; 188 * 2], Some(&data), ChunkMetadata::new(0, 1, 0), discontinuity());
    assert!(result.is_err());
}
