use super::filter_kit::{self, FilterResult, NPC};
use crate::utils::samples::SampleMath;

// -------------------------------------------------------------------------------------------------

/// Window length multiplier of the low quality filter, odd.
const NMULT_LOW_QUALITY: usize = 11;
/// Window length multiplier of the high quality filter, odd.
const NMULT_HIGH_QUALITY: usize = 35;
/// Roll-off frequency of the anti-alias filter, relative to Nyquist.
const ROLLOFF: f64 = 0.90;
/// Kaiser window beta parameter.
const BETA: f64 = 6.0;

// -------------------------------------------------------------------------------------------------

/// Streaming variable-ratio sample rate converter over interleaved buffers.
///
/// Keeps a sliding input window with enough history and lookahead for the sinc interpolation
/// filter, so arbitrary input chunk sizes can be pushed through repeated [`Resampler::process`]
/// calls. The conversion factor may vary between calls within the range given at construction.
pub struct Resampler {
    samples: SampleMath,

    /// Filter coefficients of the right wing of the symmetric impulse response.
    imp: Vec<f32>,
    /// Filter coefficient deltas, for interpolating fractional phases.
    imp_d: Vec<f32>,
    lp_scl: f32,
    nwing: usize,

    min_factor: f64,
    max_factor: f64,

    /// Input window capacity in samples, excluding the history margin.
    x_size: usize,
    /// History and lookahead margin in samples on either side of the conversion region.
    x_off: usize,
    /// Current conversion position in the input window, in samples.
    x_p: usize,
    /// Number of samples currently buffered in the input window.
    x_read: usize,
    /// Conversion time cursor, in input samples.
    time: f64,

    x: Vec<f32>,
    y: Vec<f32>,
    /// Converted samples waiting to be flushed into an output buffer.
    y_count: usize,
}

impl Resampler {
    /// Create a new resampler for conversion factors in `[min_factor, max_factor]`.
    /// `high_quality` selects a longer filter with better stopband rejection.
    pub fn new(high_quality: bool, min_factor: f64, max_factor: f64, samples: SampleMath) -> Self {
        debug_assert!(min_factor > 0.0 && max_factor >= min_factor, "invalid factor range");

        let nmult = if high_quality {
            NMULT_HIGH_QUALITY
        } else {
            NMULT_LOW_QUALITY
        };
        let nwing = NPC * (nmult - 1) / 2;

        let mut imp64 = vec![0.0f64; nwing];
        filter_kit::lrs_lp_filter(&mut imp64, nwing, 0.5 * ROLLOFF, BETA, NPC);
        let imp: Vec<f32> = imp64.iter().map(|v| *v as f32).collect();
        let mut imp_d: Vec<f32> = imp.windows(2).map(|w| w[1] - w[0]).collect();
        imp_d.push(-imp[nwing - 1]);

        let half_width = (nmult + 1) as f64 / 2.0;
        let x_off_min = (half_width * (1.0 / min_factor).max(1.0) + 10.0) as usize;
        let x_off_max = (half_width * (1.0 / max_factor).max(1.0) + 10.0) as usize;
        let x_off = x_off_min.max(x_off_max);
        let x_size = (2 * x_off + 10).max(4096);
        let y_size = (x_size as f64 * max_factor + 2.0) as usize;

        Self {
            x: vec![0.0; samples.sample_to_array(x_size + x_off)],
            y: vec![0.0; samples.sample_to_array(y_size)],
            x_p: x_off,
            x_read: x_off,
            time: x_off as f64,
            y_count: 0,
            samples,
            imp,
            imp_d,
            lp_scl: 1.0,
            nwing,
            min_factor,
            max_factor,
            x_size,
            x_off,
        }
    }

    /// Reset internal state, making the resampler ready for a new stream.
    pub fn reset(&mut self) {
        self.x.fill(0.0);
        self.x_p = self.x_off;
        self.x_read = self.x_off;
        self.time = self.x_off as f64;
        self.y_count = 0;
    }

    /// Convert as much of `input` as fits through the window into `output`. Set `last` to flush
    /// the final samples at the end of a stream. Returns the numbers of input samples consumed
    /// and output samples produced, both in samples.
    pub fn process(
        &mut self,
        factor: f64,
        input: &[f32],
        last: bool,
        output: &mut [f32],
    ) -> (usize, usize) {
        let factor = factor.clamp(self.min_factor, self.max_factor);
        let in_total = self.samples.array_to_sample(input.len());
        let out_total = self.samples.array_to_sample(output.len());
        let mut in_used = 0;
        let mut out_gen = 0;

        loop {
            // flush converted samples left over from the previous round
            if self.y_count > 0 {
                let n = self.y_count.min(out_total - out_gen);
                self.samples.samples_copy(&self.y, 0, output, out_gen, n);
                out_gen += n;
                if n < self.y_count {
                    // output full; keep the remainder for the next call
                    self.samples
                        .samples_copy_within(&mut self.y, n, 0, self.y_count - n);
                    self.y_count -= n;
                    break;
                }
                self.y_count = 0;
            }
            if out_gen == out_total {
                break;
            }

            // top up the input window
            let space = self.x_size - self.x_read;
            let take = space.min(in_total - in_used);
            if take > 0 {
                self.samples
                    .samples_copy(input, in_used, &mut self.x, self.x_read, take);
                in_used += take;
                self.x_read += take;
            }

            // number of samples to convert this round, leaving the lookahead margin in place
            // (the margin is not needed once the final input chunk arrived)
            let last_chunk = last && in_used == in_total;
            let nx = if last_chunk {
                self.x_read as i64 - self.x_off as i64
            } else {
                self.x_read as i64 - 2 * self.x_off as i64
            };
            if nx <= 0 {
                break;
            }
            let nx = nx as usize;

            self.y_count = if factor >= 1.0 {
                self.src_up(nx, factor)
            } else {
                self.src_ud(nx, factor)
            };

            // move the converter nx samples back in time and advance the window position
            self.time -= nx as f64;
            self.x_p += nx;

            // remove time accumulation drift
            let n_creep = self.time as i64 - self.x_off as i64;
            if n_creep != 0 {
                self.time -= n_creep as f64;
                self.x_p = (self.x_p as i64 + n_creep) as usize;
            }

            // shift the kept history window to the front
            let keep_from = self.x_p - self.x_off;
            let n_reuse = self.x_read - keep_from;
            self.samples.samples_copy_within(&mut self.x, keep_from, 0, n_reuse);
            self.x_read = n_reuse;
            self.x_p = self.x_off;

            if take == 0 && self.y_count == 0 {
                // no further progress possible with the buffered input
                break;
            }
        }

        (in_used, out_gen)
    }

    /// Up-sampling pass: the filter steps [`NPC`] coefficients per input sample.
    fn src_up(&mut self, nx: usize, factor: f64) -> usize {
        let dt = 1.0 / factor;
        let end_time = self.time + nx as f64;
        let mut out = 0;
        let mut result = FilterResult::new(self.samples);

        while self.time < end_time {
            let base = self.time as isize;
            let left_phase = self.time - self.time.floor();
            result.clear();
            filter_kit::lrs_filter_up(
                &self.imp, &self.imp_d, self.nwing, true, &self.x, base, left_phase, -1,
                &mut result,
            );
            filter_kit::lrs_filter_up(
                &self.imp,
                &self.imp_d,
                self.nwing,
                true,
                &self.x,
                base + 1,
                1.0 - left_phase,
                1,
                &mut result,
            );
            result.scale(self.lp_scl);
            result.store(&mut self.y, out);
            out += 1;
            self.time += dt;
        }
        out
    }

    /// Down-sampling pass: the filter is stretched to the output rate, stepping by the filter
    /// sampling period `dh` per input sample.
    fn src_ud(&mut self, nx: usize, factor: f64) -> usize {
        let dt = 1.0 / factor;
        let dh = (NPC as f64).min(factor * NPC as f64);
        let end_time = self.time + nx as f64;
        // the stretched filter raises the passband gain by 1 / factor; compensate
        let scale = self.lp_scl * factor as f32;
        let mut out = 0;
        let mut result = FilterResult::new(self.samples);

        while self.time < end_time {
            let base = self.time as isize;
            let left_phase = self.time - self.time.floor();
            result.clear();
            filter_kit::lrs_filter_ud(
                &self.imp, &self.imp_d, self.nwing, true, &self.x, base, left_phase, -1, dh,
                &mut result,
            );
            filter_kit::lrs_filter_ud(
                &self.imp,
                &self.imp_d,
                self.nwing,
                true,
                &self.x,
                base + 1,
                1.0 - left_phase,
                1,
                dh,
                &mut result,
            );
            result.scale(scale);
            result.store(&mut self.y, out);
            out += 1;
            self.time += dt;
        }
        out
    }
}

// -------------------------------------------------------------------------------------------------
