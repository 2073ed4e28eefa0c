//! WAV encoder — packs an [`AudioBuffer`] into a 24-bit PCM WAV file.

use super::AudioBuffer;

const BITS_PER_SAMPLE: u16 = 24;
const BYTES_PER_SAMPLE: usize = 3;
const HEADER_LEN: usize = 44;

/// Quantize one sample to signed 24-bit.
///
/// The input is clamped to `[-1, 1]`. Negative values scale by 2^23 and
/// positive values by 2^23 - 1, so both full-scale ends are reachable.
#[inline]
fn quantize_24(sample: f32) -> i32 {
    let x = sample.clamp(-1.0, 1.0) as f64;
    let scaled = if x < 0.0 { x * 8_388_608.0 } else { x * 8_388_607.0 };
    (scaled + 0.5).floor() as i32
}

/// Encode `buffer` as a canonical 44-byte-header, 24-bit little-endian WAV.
///
/// Frames are interleaved in the data chunk. `fileSize` in the RIFF header
/// is `36 + dataSize`.
pub fn encode_wav_24(buffer: &AudioBuffer) -> Vec<u8> {
    let channels = buffer.channel_count() as u16;
    let frames = buffer.frames();
    let sample_rate = buffer.sample_rate;
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * block_align as u32;
    let data_size = (frames * channels as usize * BYTES_PER_SAMPLE) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(HEADER_LEN + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for frame in 0..frames {
        for channel in &buffer.channels {
            let bytes = quantize_24(channel[frame]).to_le_bytes();
            buf.extend_from_slice(&bytes[..BYTES_PER_SAMPLE]);
        }
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    #[test]
    fn wav_header_valid() {
        let buffer = AudioBuffer::silent(48_000, 2, 10);
        let wav = encode_wav_24(&buffer);

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(u16_at(&wav, 20), 1);
        assert_eq!(u16_at(&wav, 22), 2);
        assert_eq!(u32_at(&wav, 24), 48_000);
        assert_eq!(u32_at(&wav, 28), 48_000 * 6);
        assert_eq!(u16_at(&wav, 32), 6);
        assert_eq!(u16_at(&wav, 34), 24);
        assert_eq!(&wav[36..40], b"data");
    }

    #[test]
    fn wav_size_correct() {
        let buffer = AudioBuffer::silent(44_100, 2, 100);
        let wav = encode_wav_24(&buffer);
        let data_size = u32_at(&wav, 40);
        assert_eq!(data_size, 100 * 2 * 3);
        assert_eq!(u32_at(&wav, 4), 36 + data_size);
        assert_eq!(wav.len(), 44 + data_size as usize);
    }

    #[test]
    fn full_scale_and_interleaving() {
        let buffer = AudioBuffer {
            sample_rate: 8_000,
            channels: vec![vec![1.0, 0.0], vec![-1.0, 2.0]],
        };
        let wav = encode_wav_24(&buffer);
        let data = &wav[44..];
        assert_eq!(&data[0..3], &[0xFF, 0xFF, 0x7F]);
        assert_eq!(&data[3..6], &[0x00, 0x00, 0x80]);
        assert_eq!(&data[6..9], &[0x00, 0x00, 0x00]);
        assert_eq!(&data[9..12], &[0xFF, 0xFF, 0x7F], "clamped to +1");
    }

    #[test]
    fn quantization_rounds_half_up() {
        assert_eq!(quantize_24(0.0), 0);
        assert_eq!(quantize_24(-0.5), -4_194_304);
        assert_eq!(quantize_24(0.5), 4_194_304);
    }
}
