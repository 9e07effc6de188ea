use std::io::Cursor;

use anyhow::Result;
use ape::{
    ChecksumScope, CompressionLevel, Decoder, Encoder, EncoderConfig, Error, FrameEncoder,
    StreamInfo, decode_from_slice, encode_to_vec,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic test signal: a tone per channel plus some noise.
fn signal(info: &StreamInfo, blocks: usize, seed: u64) -> Vec<i32> {
    let channels = info.channels as usize;
    let (min, max) = info.sample_bounds();
    let amplitude = max as f64 * 0.6;
    let noise_bits = info.bits_per_sample as u32 / 2;
    let mut state = seed | 1;

    let mut out = Vec::with_capacity(blocks * channels);
    for n in 0..blocks {
        for c in 0..channels {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let noise = (state >> (64 - noise_bits)) as i64 - (1 << (noise_bits - 1));

            let period = 40.0 + 13.0 * c as f64;
            let tone = amplitude * (n as f64 * std::f64::consts::TAU / period).sin();
            out.push((tone as i64 + noise).clamp(min, max) as i32);
        }
    }
    out
}

fn encode(info: StreamInfo, config: EncoderConfig, samples: &[i32]) -> Result<Vec<u8>> {
    let mut encoder = Encoder::with_config(Cursor::new(Vec::new()), info, config)?;
    let block = info.channels as usize * 333;
    for chunk in samples.chunks(block) {
        encoder.encode_samples(chunk)?;
    }
    Ok(encoder.finalize()?.into_inner())
}

#[test]
fn round_trip_levels_depths_and_layouts() -> Result<()> {
    init_logger();

    for level in CompressionLevel::ALL {
        for bits in [8, 16, 24, 32] {
            for channels in [1, 2, 6] {
                let info = StreamInfo::new(channels, 44_100, bits);
                let samples = signal(&info, 1500, bits as u64 * 7 + channels as u64);
                let config = EncoderConfig::default()
                    .with_level(level)
                    .with_blocks_per_frame(512);

                let bytes = encode(info, config, &samples)?;
                let (decoded_info, decoded) = decode_from_slice(&bytes)?;

                assert_eq!(decoded_info, info);
                assert_eq!(decoded, samples, "{level}, {bits} bit, {channels} ch");
            }
        }
    }

    Ok(())
}

#[test]
fn compresses_tonal_input() -> Result<()> {
    let info = StreamInfo::new(2, 44_100, 16);
    let samples: Vec<i32> = (0..20_000)
        .flat_map(|n| {
            let t = n as f64 * std::f64::consts::TAU;
            [
                (12_000.0 * (t / 100.0).sin()) as i32 + (n % 3) as i32,
                (9_000.0 * (t / 77.0).sin()) as i32,
            ]
        })
        .collect();
    let raw_len = samples.len() * 2;

    for level in CompressionLevel::ALL {
        let bytes = encode_to_vec(&info, &EncoderConfig::default().with_level(level), &samples)?;
        assert!(bytes.len() < raw_len / 2, "{level}: {} bytes", bytes.len());
    }

    Ok(())
}

#[test]
fn identical_input_gives_identical_bytes() -> Result<()> {
    let info = StreamInfo::new(2, 48_000, 24);
    let samples = signal(&info, 5000, 42);
    let config = EncoderConfig::default()
        .with_level(CompressionLevel::ExtraHigh)
        .with_blocks_per_frame(1024);

    let first = encode(info, config.clone(), &samples)?;
    let second = encode(info, config.clone(), &samples)?;
    let threaded = encode(info, config.clone().with_threads(3), &samples)?;
    let reserved = encode(info, config.with_expected_blocks(5000), &samples)?;

    assert_eq!(first, second);
    assert_eq!(first, threaded);
    assert_eq!(first, reserved);

    Ok(())
}

#[test]
fn small_mono_frames_and_seek() -> Result<()> {
    init_logger();

    let frames = [
        [0, 0, 0, 0],
        [100, 100, 100, 100],
        [-50, 50, -50, 50],
        [32767, -32768, 0, 1],
    ];
    let samples: Vec<i32> = frames.concat();

    let config = EncoderConfig::default().with_blocks_per_frame(4);
    let bytes = encode_to_vec(&StreamInfo::new(1, 44_100, 16), &config, &samples)?;

    let mut decoder = Decoder::open(Cursor::new(bytes))?;
    assert_eq!(decoder.total_frames(), 4);
    assert_eq!(decoder.total_blocks(), 16);
    assert_eq!(decoder.decode_all()?, samples);

    // Position 9 lies in frame 2, which starts with -50.
    let index = decoder.seek(9)?;
    assert_eq!(index, 2);
    let frame = decoder.decode_frame(index)?;
    assert_eq!(frame.first_block, 8);
    assert_eq!(frame.samples, frames[2]);
    assert_eq!(frame.samples[0], -50);

    // Sample-exact access decodes the frame and drops what precedes 9.
    assert_eq!(decoder.decode_range(9, 1)?, [50]);
    assert_eq!(decoder.decode_range(8, 1)?, [-50]);

    for (k, expected) in frames.iter().enumerate().rev() {
        assert_eq!(&decoder.decode_frame(k)?.samples, expected);
    }

    Ok(())
}

#[test]
fn frames_decode_independently() -> Result<()> {
    let info = StreamInfo::new(2, 44_100, 16);
    let samples = signal(&info, 10_000, 3);
    let config = EncoderConfig::default()
        .with_level(CompressionLevel::High)
        .with_blocks_per_frame(1500);
    let bytes = encode(info, config, &samples)?;

    let mut decoder = Decoder::open(Cursor::new(bytes))?;
    let all = decoder.decode_all()?;
    let frame_len = 1500 * 2;
    let frame_encoder = FrameEncoder::new(info, CompressionLevel::High);

    for k in [6, 0, 3, 5, 1, 4, 2] {
        let expected = &all[k * frame_len..((k + 1) * frame_len).min(all.len())];
        assert_eq!(decoder.decode_frame(k)?.samples, expected);

        // A frame's bytes depend on its own samples only
        assert_eq!(decoder.frame_bytes(k)?, frame_encoder.encode(expected)?);
    }

    let independent = decoder.frame_decoder();
    let bytes = decoder.frame_bytes(6)?;
    let last = std::thread::spawn(move || independent.decode(6, &bytes)).join();
    assert_eq!(last.map_err(|_| anyhow::anyhow!("decoder thread panicked"))??.len(), 1000 * 2);

    Ok(())
}

#[test]
fn decode_range_spans_frames() -> Result<()> {
    let info = StreamInfo::new(3, 32_000, 16);
    let samples = signal(&info, 2000, 9);
    let config = EncoderConfig::default().with_blocks_per_frame(300);
    let bytes = encode(info, config, &samples)?;

    let mut decoder = Decoder::open(Cursor::new(bytes))?;
    for (start, len) in [(0u64, 2000u64), (299, 2), (450, 900), (1999, 1), (1234, 0)] {
        let (s, l) = (start as usize * 3, len as usize * 3);
        assert_eq!(decoder.decode_range(start, len)?, &samples[s..s + l]);
    }

    assert!(matches!(
        decoder.decode_range(1990, 11),
        Err(Error::OutOfRange {
            index: 2000,
            limit: 2000
        })
    ));
    assert!(matches!(
        decoder.decode_frame(7),
        Err(Error::OutOfRange { index: 7, limit: 7 })
    ));

    Ok(())
}

#[test]
fn parallel_decode_matches_sequential() -> Result<()> {
    let info = StreamInfo::new(2, 44_100, 24);
    let samples = signal(&info, 9000, 11);
    let config = EncoderConfig::default()
        .with_level(CompressionLevel::Insane)
        .with_blocks_per_frame(1000)
        .with_threads(4);
    let bytes = encode(info, config, &samples)?;

    let mut decoder = Decoder::open(Cursor::new(bytes))?;
    let sequential = decoder.decode_all()?;
    assert_eq!(sequential, samples);

    for threads in [0, 1, 2, 5, 16] {
        assert_eq!(decoder.decode_all_parallel(threads)?, sequential);
    }

    Ok(())
}

#[test]
fn corrupted_frames_never_decode_silently() -> Result<()> {
    let info = StreamInfo::new(2, 44_100, 16);
    let samples = signal(&info, 600, 5);
    let config = EncoderConfig::default().with_blocks_per_frame(200);
    let bytes = encode(info, config, &samples)?;

    let (data_start, data_end) = {
        let decoder = Decoder::open(Cursor::new(&bytes))?;
        (decoder.header().data_start(), decoder.header().data_end())
    };

    for pos in data_start as usize..bytes.len() {
        for mask in [0x01u8, 0x80, 0xFF] {
            let mut corrupt = bytes.clone();
            corrupt[pos] ^= mask;

            let mut decoder = Decoder::open(Cursor::new(corrupt))?;
            match decoder.decode_all() {
                Err(Error::CorruptStream { .. })
                | Err(Error::TruncatedStream { .. })
                | Err(Error::IntegrityCheckFailed {
                    scope: ChecksumScope::Frame(_),
                    ..
                }) => assert!((pos as u64) < data_end),
                Err(Error::IntegrityCheckFailed {
                    scope: ChecksumScope::Stream,
                    ..
                }) => assert!((pos as u64) >= data_end),
                Ok(_) => panic!("flip {mask:#04X} at byte {pos} went unnoticed"),
                Err(other) => panic!("unexpected error at byte {pos}: {other}"),
            }
        }
    }

    Ok(())
}

#[test]
fn corruption_stays_in_its_frame() -> Result<()> {
    let info = StreamInfo::new(1, 44_100, 16);
    let samples = signal(&info, 1000, 8);
    let config = EncoderConfig::default().with_blocks_per_frame(250);
    let mut bytes = encode(info, config, &samples)?;

    let offset = Decoder::open(Cursor::new(&bytes))?.seek_table().offsets()[1];
    bytes[offset as usize + 10] ^= 0x24;

    let mut decoder = Decoder::open(Cursor::new(bytes))?;
    let err = decoder.decode_frame(1).unwrap_err();
    assert!(err.is_frame_local(), "{err}");

    for k in [0, 2, 3] {
        assert_eq!(
            decoder.decode_frame(k)?.samples,
            &samples[k * 250..(k + 1) * 250]
        );
    }

    Ok(())
}

#[test]
fn truncation_is_reported() -> Result<()> {
    let info = StreamInfo::new(2, 44_100, 16);
    let samples = signal(&info, 400, 12);
    let config = EncoderConfig::default().with_blocks_per_frame(100);
    let bytes = encode(info, config, &samples)?;

    for len in 0..bytes.len() {
        let result = Decoder::open(Cursor::new(&bytes[..len])).and_then(|mut d| d.decode_all());
        match result {
            Err(Error::CorruptHeader(_)) | Err(Error::TruncatedStream { .. }) => {}
            Err(Error::CorruptStream { .. }) | Err(Error::IntegrityCheckFailed { .. }) => {}
            Ok(_) => panic!("stream cut to {len} bytes decoded"),
            Err(other) => panic!("unexpected error at {len} bytes: {other}"),
        }
    }

    let mut decoder = Decoder::open(Cursor::new(&bytes[..bytes.len() - 20]))?;
    match decoder.decode_all() {
        Err(Error::TruncatedStream {
            frame,
            frames_completed,
        }) => {
            assert_eq!(frame, 3);
            assert_eq!(frames_completed, 3);
        }
        other => panic!("unexpected {other:?}"),
    }

    Ok(())
}

#[test]
fn header_damage_is_rejected_at_open() -> Result<()> {
    let info = StreamInfo::new(1, 44_100, 16);
    let bytes = encode_to_vec(&info, &EncoderConfig::default(), &signal(&info, 100, 2))?;

    for pos in 0..56 {
        let mut corrupt = bytes.clone();
        corrupt[pos] ^= 0x08;
        match Decoder::open(Cursor::new(corrupt)) {
            Err(Error::CorruptHeader(_)) | Err(Error::UnsupportedFormat(_)) => {}
            Ok(_) => panic!("header flip at byte {pos} accepted"),
            Err(other) => panic!("unexpected error at byte {pos}: {other}"),
        }
    }

    Ok(())
}

#[test]
fn verify_checks_every_frame() -> Result<()> {
    let info = StreamInfo::new(2, 44_100, 16);
    let samples = signal(&info, 800, 4);
    let config = EncoderConfig::default().with_blocks_per_frame(200);
    let mut bytes = encode(info, config, &samples)?;

    Decoder::open(Cursor::new(&bytes))?.verify()?;

    let last = bytes.len() - 1;
    bytes[last] ^= 1;
    let mut decoder = Decoder::open(Cursor::new(&bytes))?;
    match decoder.verify() {
        Err(Error::IntegrityCheckFailed {
            scope: ChecksumScope::Stream,
            samples: decoded,
            ..
        }) => assert_eq!(decoded, samples),
        other => panic!("unexpected {other:?}"),
    }

    Ok(())
}

#[test]
fn silence_and_identical_channels_are_cheap() -> Result<()> {
    let info = StreamInfo::new(2, 44_100, 16);
    let config = EncoderConfig::default().with_blocks_per_frame(4096);

    let silence = vec![0; 4096 * 2 * 3];
    let bytes = encode_to_vec(&info, &config, &silence)?;
    assert_eq!(bytes.len(), 56 + 3 * 8 + 3 * 5 + 4);
    assert_eq!(decode_from_slice(&bytes)?.1, silence);

    let mono = signal(&StreamInfo::new(1, 44_100, 16), 4096, 6);
    let dual: Vec<i32> = mono.iter().flat_map(|&s| [s, s]).collect();
    let stereo = signal(&info, 4096, 6);
    let dual_len = encode_to_vec(&info, &config, &dual)?.len();
    let stereo_len = encode_to_vec(&info, &config, &stereo)?.len();
    assert!(dual_len < stereo_len);
    assert_eq!(decode_from_slice(&encode_to_vec(&info, &config, &dual)?)?.1, dual);

    Ok(())
}
