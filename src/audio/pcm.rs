//! PCM16LE conversion and fixed-size framing.

/// Samples per outbound audio frame.
pub const FRAME_SAMPLES: usize = 4096;

const ENCODE_SCALE: f32 = 32767.0;
const DECODE_SCALE: f32 = 32768.0;

/// Clamps to `[-1, 1]` and scales by 32767. NaN encodes as silence.
#[inline]
pub fn encode_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * ENCODE_SCALE).round() as i16
}

pub fn encode_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    encode_into(samples, &mut out);
    out
}

pub fn encode_into(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&encode_sample(sample).to_le_bytes());
    }
}

/// Inverse of [`encode_pcm16le`], dividing by 32768. A trailing odd byte is ignored.
pub fn decode_pcm16le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / DECODE_SCALE)
        .collect()
}

/// Regroups capture buffers of any size into frames of exactly `frame_samples`.
#[derive(Debug)]
pub struct PcmFramer {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl PcmFramer {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Appends `samples` and returns every frame that became complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_samples - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_samples {
                let frame = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_samples));
                frames.push(frame);
            }
        }
        frames
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_values() {
        assert_eq!(encode_pcm16le(&[1.0]), vec![0xFF, 0x7F]);
        assert_eq!(encode_pcm16le(&[-1.0]), vec![0x01, 0x80]);
        assert_eq!(encode_pcm16le(&[0.0]), vec![0x00, 0x00]);
        assert_eq!(encode_sample(1.7), 32767);
        assert_eq!(encode_sample(-3.0), -32767);
        assert_eq!(encode_sample(f32::NAN), 0);
    }

    #[test]
    fn decode_is_within_two_steps() {
        let input = [0.5f32, -0.25, 0.999, -0.999, 0.0];
        let decoded = decode_pcm16le(&encode_pcm16le(&input));
        for (a, b) in input.iter().zip(decoded.iter()) {
            assert!((a - b).abs() <= 2.0 / 32768.0, "{a} vs {b}");
        }
        assert_eq!(decode_pcm16le(&[0x00, 0x80, 0x07]), vec![-1.0]);
    }

    #[test]
    fn full_scale_round_trips_exactly() {
        assert_eq!(
            decode_pcm16le(&encode_pcm16le(&[1.0, -1.0, 0.0])),
            vec![32767.0 / 32768.0, -32767.0 / 32768.0, 0.0]
        );
    }

    #[test]
    fn framer_emits_exact_frames() {
        let mut framer = PcmFramer::new(4);
        assert!(framer.push(&[0.1; 3]).is_empty());
        let frames = framer.push(&[0.2; 6]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![0.1, 0.1, 0.1, 0.2]);
        assert_eq!(frames[1], vec![0.2; 4]);
        assert_eq!(framer.buffered(), 1);
    }
}
