//! Audio codec seam
//!
//! Codec libraries are external collaborators; the session only needs
//! encode/decode between interleaved `i16` PCM and RTP payload bytes.
//! L16 (RFC 3551 section 4.5.11) ships in-tree as the codec the tests
//! and PCM passthrough callers use.

/// Encode/decode between PCM and an RTP payload
pub trait AudioCodec: Send + Sync {
    /// Encoding name as it appears in rtpmap
    fn name(&self) -> &str;

    /// RTP clock rate in Hz
    fn clock_rate(&self) -> u32;

    /// Channel count
    fn channels(&self) -> u8;

    /// Encode interleaved PCM into a payload
    fn encode(&self, samples: &[i16]) -> Vec<u8>;

    /// Decode a payload into interleaved PCM
    fn decode(&self, payload: &[u8]) -> Vec<i16>;
}

/// Linear 16-bit PCM, network byte order
pub struct L16Codec {
    clock_rate: u32,
    channels: u8,
}

impl L16Codec {
    /// L16 at the given rate and channel count
    pub fn new(clock_rate: u32, channels: u8) -> Self {
        Self {
            clock_rate,
            channels,
        }
    }

    /// L16 mono at the session default of 48 kHz
    pub fn default_rate() -> Self {
        Self::new(48_000, 1)
    }
}

impl AudioCodec for L16Codec {
    fn name(&self) -> &str {
        "L16"
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    fn channels(&self) -> u8 {
        self.channels
    }

    fn encode(&self, samples: &[i16]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            payload.extend_from_slice(&sample.to_be_bytes());
        }
        payload
    }

    fn decode(&self, payload: &[u8]) -> Vec<i16> {
        payload
            .chunks_exact(2)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l16_round_trip() {
        let codec = L16Codec::default_rate();
        let samples: Vec<i16> = (0..480).map(|i| (i * 37 % 32768) as i16).collect();
        let decoded = codec.decode(&codec.encode(&samples));
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_l16_is_big_endian() {
        let codec = L16Codec::default_rate();
        assert_eq!(codec.encode(&[0x0102]), vec![0x01, 0x02]);
    }

    #[test]
    fn test_l16_defaults() {
        let codec = L16Codec::default_rate();
        assert_eq!(codec.name(), "L16");
        assert_eq!(codec.clock_rate(), 48_000);
        assert_eq!(codec.channels(), 1);
    }
}
