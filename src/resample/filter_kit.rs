//! Kaiser-windowed low-pass filter support: coefficient design plus the two convolution kernels
//! used by the resampler, one per rate direction.
//!
//! Beta trades the rejection of the lowpass filter against the transition width from passband to
//! stopband: larger beta means a slower transition and greater stopband rejection.

use std::f64::consts::PI;

use crate::utils::samples::SampleMath;

// -------------------------------------------------------------------------------------------------

/// Filter coefficient samples per unit phase.
pub const NPC: usize = 4096;

/// Max error acceptable in the bessel series.
const IZERO_EPSILON: f64 = 1e-21;

/// 0th order modified bessel function of the first kind, needed to compute the Kaiser window.
fn izero(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut u = 1.0;
    let mut n = 1.0;
    let halfx = x / 2.0;
    loop {
        let mut temp = halfx / n;
        n += 1.0;
        temp *= temp;
        u *= temp;
        sum += u;
        if u < IZERO_EPSILON * sum {
            break;
        }
    }
    sum
}

/// Compute the coefficients of a Kaiser-windowed low pass filter.
///
/// `c` receives the computed coefficients, `frq` is the roll-off frequency, `beta` the Kaiser
/// window parameter and `num` the number of coefficients before `1/frq`.
pub fn lrs_lp_filter(c: &mut [f64], n: usize, frq: f64, beta: f64, num: usize) {
    // ideal lowpass impulse response
    c[0] = 2.0 * frq;
    for i in 1..n {
        let temp = PI * i as f64 / num as f64;
        c[i] = (2.0 * temp * frq).sin() / temp;
    }

    // apply the Kaiser window; the last window value is not ramped to zero, the window is
    // truncated, which helps reduce the first sidelobe
    let ibeta = 1.0 / izero(beta);
    let inm1 = 1.0 / (n - 1) as f64;
    for i in 1..n {
        let temp = i as f64 * inm1;
        // clamp tiny negative roundoff before the square root
        let temp1 = (1.0 - temp * temp).max(0.0);
        c[i] *= izero(beta * temp1.sqrt()) * ibeta;
    }
}

// -------------------------------------------------------------------------------------------------

/// Per-channel accumulator for one output sample of the filter kernels.
///
/// For each input sample touched the kernel sets the scalar coefficient `t`, then every channel
/// accumulates `t * input[index, c]`.
pub struct FilterResult {
    res: Vec<f32>,
    t: Vec<f32>,
    samples: SampleMath,
}

impl FilterResult {
    pub fn new(samples: SampleMath) -> Self {
        Self {
            res: vec![0.0; samples.channels()],
            t: vec![0.0; samples.channels()],
            samples,
        }
    }

    pub fn clear(&mut self) {
        self.res.fill(0.0);
    }

    fn set_t(&mut self, value: f32) {
        self.t.fill(value);
    }

    fn add_t(&mut self, value: f32) {
        for t in self.t.iter_mut() {
            *t += value;
        }
    }

    pub fn scale(&mut self, value: f32) {
        for r in self.res.iter_mut() {
            *r *= value;
        }
    }

    fn accumulate(&mut self, input: &[f32], sample_index: usize) {
        let offset = self.samples.sample_to_array(sample_index);
        for (c, t) in self.t.iter_mut().enumerate() {
            *t *= input[offset + c];
            self.res[c] += *t;
        }
    }

    /// Write the accumulated sample into the output at the given sample index.
    pub fn store(&self, output: &mut [f32], sample_index: usize) {
        let offset = self.samples.sample_to_array(sample_index);
        output[offset..offset + self.res.len()].copy_from_slice(&self.res);
    }
}

// -------------------------------------------------------------------------------------------------

/// Apply one filter wing at an up-sampling (output rate >= input rate) conversion point.
///
/// `x_index` is the current input sample index, `ph` the phase in `[0, 1]` and `inc` the input
/// step direction: 1 for the right wing, -1 for the left. Coefficients step by [`NPC`] per input
/// sample; with `interp` the fractional phase is interpolated from the coefficient deltas.
#[allow(clippy::too_many_arguments)]
pub fn lrs_filter_up(
    imp: &[f32],
    imp_d: &[f32],
    nwing: usize,
    interp: bool,
    x: &[f32],
    mut x_index: isize,
    ph: f64,
    inc: isize,
    result: &mut FilterResult,
) {
    let ph = ph * NPC as f64;

    let mut hp_index = ph as usize;
    let mut hdp_index = ph as usize;
    let mut end_index = nwing;

    // fractional part of the phase
    let a = if interp { (ph - ph.floor()) as f32 } else { 0.0 };

    if inc == 1 {
        // on the right wing drop the extra coefficient, so when the phase is 0.5 we don't do
        // too many multiplies
        end_index -= 1;
        if ph == 0.0 {
            // phase zero: the center sample was already handled by the left wing
            hp_index += NPC;
            hdp_index += NPC;
        }
    }

    while hp_index < end_index {
        result.set_t(imp[hp_index]);
        if interp {
            result.add_t(imp_d[hdp_index] * a);
            hdp_index += NPC;
        }
        result.accumulate(x, x_index as usize);
        hp_index += NPC;
        x_index += inc;
    }
}

/// Apply one filter wing at a down-sampling conversion point.
///
/// Unlike [`lrs_filter_up`] the coefficient phase steps by `dhb`, the filter sampling period,
/// and is re-indexed every iteration.
#[allow(clippy::too_many_arguments)]
pub fn lrs_filter_ud(
    imp: &[f32],
    imp_d: &[f32],
    nwing: usize,
    interp: bool,
    x: &[f32],
    mut x_index: isize,
    ph: f64,
    inc: isize,
    dhb: f64,
    result: &mut FilterResult,
) {
    let mut ho = ph * dhb;
    let mut end_index = nwing;

    if inc == 1 {
        end_index -= 1;
        if ph == 0.0 {
            ho += dhb;
        }
    }

    loop {
        let hp_index = ho as usize;
        if hp_index >= end_index {
            break;
        }
        result.set_t(imp[hp_index]);
        if interp {
            let a = (ho - ho.floor()) as f32;
            result.add_t(imp_d[hp_index] * a);
        }
        result.accumulate(x, x_index as usize);
        ho += dhb;
        x_index += inc;
    }
}

// -------------------------------------------------------------------------------------------------
