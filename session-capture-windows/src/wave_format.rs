//! Interpretation of the `WAVEFORMATEX` a render endpoint reports as its
//! mix format.

use session_capture_core::models::audio_models::AudioFormat;

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// The fields of `WAVEFORMATEX` that matter for capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormatFields {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,

    /// First field of `WAVEFORMATEXTENSIBLE::SubFormat`. The KSDATAFORMAT
    /// subtype GUIDs carry the plain format tag there.
    pub sub_format_tag: Option<u16>,
}

impl WaveFormatFields {
    pub fn effective_tag(&self) -> u16 {
        match (self.format_tag, self.sub_format_tag) {
            (WAVE_FORMAT_EXTENSIBLE, Some(tag)) => tag,
            (tag, _) => tag,
        }
    }

    pub fn to_audio_format(&self) -> AudioFormat {
        let block_align = if self.block_align != 0 {
            self.block_align
        } else {
            self.channels.saturating_mul(self.bits_per_sample / 8)
        };
        AudioFormat {
            sample_rate: self.samples_per_sec,
            channels: self.channels,
            block_align,
            bits_per_sample: self.bits_per_sample,
            is_float: self.effective_tag() == WAVE_FORMAT_IEEE_FLOAT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensible_float_mix_format() {
        let fields = WaveFormatFields {
            format_tag: WAVE_FORMAT_EXTENSIBLE,
            channels: 2,
            samples_per_sec: 48000,
            block_align: 8,
            bits_per_sample: 32,
            sub_format_tag: Some(WAVE_FORMAT_IEEE_FLOAT),
        };
        assert_eq!(fields.to_audio_format(), AudioFormat::default());
    }

    #[test]
    fn plain_pcm_format() {
        let fields = WaveFormatFields {
            format_tag: WAVE_FORMAT_PCM,
            channels: 6,
            samples_per_sec: 44100,
            block_align: 0,
            bits_per_sample: 16,
            sub_format_tag: None,
        };
        let format = fields.to_audio_format();
        assert!(!format.is_float);
        assert_eq!(format.block_align, 12);
        assert_eq!(format.sample_rate, 44100);
    }

    #[test]
    fn extensible_without_sub_format_is_not_float() {
        let fields = WaveFormatFields {
            format_tag: WAVE_FORMAT_EXTENSIBLE,
            channels: 2,
            samples_per_sec: 48000,
            block_align: 4,
            bits_per_sample: 16,
            sub_format_tag: None,
        };
        assert!(!fields.to_audio_format().is_float);
    }
}
