//! WAV file format utilities.
//!
//! Captured blocks are stored exactly as the render client produced them,
//! so the header describes the endpoint's mix format: integer PCM (format
//! code 1) or IEEE float (format code 3).

use crate::models::audio_models::AudioFormat;

/// Size of the canonical WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;

/// Generate a 44-byte WAV RIFF header for `data_size` bytes of `format` frames.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (format chunk size)
/// [20-21]  format code (1 = PCM, 3 = IEEE float)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * block_align
/// [32-33]  block_align
/// [34-35]  bits_per_sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &AudioFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let format_code = if format.is_float { FORMAT_IEEE_FLOAT } else { FORMAT_PCM };
    let byte_rate = format.sample_rate * format.block_align as u32;
    let chunk_size = 36u32.saturating_add(data_size);

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&format_code.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align.to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(header: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([header[at], header[at + 1]])
    }

    fn u32_at(header: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
    }

    fn pcm16() -> AudioFormat {
        AudioFormat {
            sample_rate: 48000,
            channels: 2,
            block_align: 4,
            bits_per_sample: 16,
            is_float: false,
        }
    }

    #[test]
    fn header_riff_magic() {
        let header = generate_wav_header(&pcm16(), 0);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32_at(&header, 16), 16);
    }

    #[test]
    fn header_48khz_stereo_16bit() {
        let header = generate_wav_header(&pcm16(), 9600);
        assert_eq!(u16_at(&header, 20), 1);
        assert_eq!(u16_at(&header, 22), 2);
        assert_eq!(u32_at(&header, 24), 48000);
        assert_eq!(u32_at(&header, 28), 192000);
        assert_eq!(u16_at(&header, 32), 4);
        assert_eq!(u16_at(&header, 34), 16);
        assert_eq!(u32_at(&header, 40), 9600);
        assert_eq!(u32_at(&header, 4), 36 + 9600);
    }

    #[test]
    fn float_mix_format_uses_ieee_code() {
        let header = generate_wav_header(&AudioFormat::default(), 0);
        assert_eq!(u16_at(&header, 20), 3);
        assert_eq!(u16_at(&header, 34), 32);
        assert_eq!(u32_at(&header, 28), 48000 * 8);
    }
}
