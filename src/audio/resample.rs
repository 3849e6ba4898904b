//! Linear-interpolation sample rate conversion

/// Converts between two fixed sample rates by linear interpolation
///
/// Works for any ratio, integer or not. Output sample `i` is taken at source
/// time `i / ratio`; past the last source sample the final value is held.
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    ratio: f64,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            ratio: output_rate as f64 / input_rate.max(1) as f64,
        }
    }

    /// Number of output samples produced for `input_len` source samples
    pub fn output_len(&self, input_len: usize) -> usize {
        (input_len as f64 * self.ratio).round() as usize
    }

    /// Resample, round to nearest (ties to even) and clamp to `i16`
    pub fn process(&self, input: &[f32]) -> Vec<i16> {
        let n = input.len();
        if n == 0 {
            return Vec::new();
        }

        (0..self.output_len(n))
            .map(|i| {
                let t = i as f64 / self.ratio;
                let j = t.floor() as usize;
                let value = if j + 1 < n {
                    let a = input[j] as f64;
                    let b = input[j + 1] as f64;
                    a + (b - a) * (t - j as f64)
                } else {
                    input[n - 1] as f64
                };
                value
                    .round_ties_even()
                    .clamp(i16::MIN as f64, i16::MAX as f64) as i16
            })
            .collect()
    }
}
