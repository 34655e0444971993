#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::float_cmp,
    clippy::module_name_repetitions
)]

//! Locating the TEM00 comb and the EOM sidebands in piezo-swept cavity transmission traces.
//!
//! The comb trace (RF off) fixes the frequency axis: two neighbouring TEM00 peaks are one FSR
//! apart, which gives a resolution in Hz per sample. The modulation trace (RF on) is then searched
//! near the positions predicted from the comb for the carrier and the first-order sideband.

use std::cmp::Ordering;
use std::fmt;

use crate::trace::Trace;


/// Measured free spectral range of the reference cavity.
pub const CAVITY_FSR_HZ: f64 = 970.0e6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PeakSearchError {
    /// The comb trace never showed the expected number of TEM00 peaks; usually the piezo
    /// amplitude or the scope settings are wrong.
    InsufficientPeaks {
        found: usize,
        expected: usize,
        min_height: f64,
    },
    /// Raising the threshold did not bring the peak count down to the expected number.
    ExcessPeaks {
        found: usize,
        expected: usize,
        min_height: f64,
        attempts: u32,
    },
    CombTooShort {
        found: usize,
    },
    CombNotIncreasing,
    NoModulationPeaks,
    IndexOutOfTrace {
        index: usize,
        len: usize,
    },
}

impl fmt::Display for PeakSearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeakSearchError::InsufficientPeaks {
                found,
                expected,
                min_height,
            } => write!(
                f,
                "found {found} peaks above {min_height:.3} V, expected {expected}; check the piezo voltage"
            ),
            PeakSearchError::ExcessPeaks {
                found,
                expected,
                min_height,
                attempts,
            } => write!(
                f,
                "still {found} peaks (expected {expected}) after {attempts} threshold steps, last threshold {min_height:.3} V"
            ),
            PeakSearchError::CombTooShort { found } => {
                write!(f, "comb has {found} peaks, at least 3 are needed")
            }
            PeakSearchError::CombNotIncreasing => write!(f, "comb peak indices are not increasing"),
            PeakSearchError::NoModulationPeaks => {
                write!(f, "no peaks found in the modulation trace")
            }
            PeakSearchError::IndexOutOfTrace { index, len } => {
                write!(f, "peak index {index} outside trace of length {len}")
            }
        }
    }
}

impl std::error::Error for PeakSearchError {}

/// Amplitude reported for a sideband. `Fallback` carries the configured stand-in value used when
/// no observed peak was close enough to the predicted position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Amplitude {
    Measured(f64),
    Fallback(f64),
}

impl Amplitude {
    #[inline]
    #[must_use]
    pub fn value(self) -> f64 {
        match self {
            Amplitude::Measured(x) | Amplitude::Fallback(x) => x,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_fallback(self) -> bool {
        matches!(self, Amplitude::Fallback(_))
    }
}

impl fmt::Display for Amplitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amplitude::Measured(x) => write!(f, "{x:.4} V"),
            Amplitude::Fallback(x) => write!(f, "{x:.4} V (fallback)"),
        }
    }
}

/// Result of the comb search. `min_height` is the threshold the search settled on and `attempts`
/// the number of times it had to be raised.
#[derive(Debug, Clone, PartialEq)]
pub struct Comb {
    pub peaks: Vec<usize>,
    pub min_height: f64,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZeroOrder {
    pub position_1: usize,
    pub position_2: usize,
    pub amplitude: Amplitude,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirstOrder {
    pub estimate: usize,
    pub position: usize,
    pub amplitude: Amplitude,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub comb: Comb,
    pub resolution_hz: f64,
    pub modulation_peaks: Vec<usize>,
    pub zero_order: ZeroOrder,
    pub first_order: FirstOrder,
}

impl Measurement {
    /// First-order over zero-order amplitude in dB, `None` if the carrier amplitude is not
    /// positive.
    #[must_use]
    pub fn sideband_ratio_db(&self) -> Option<f64> {
        let zero = self.zero_order.amplitude.value();
        let first = self.first_order.amplitude.value();
        if zero > 0.0 && first > 0.0 {
            Some(10.0 * (first / zero).log10())
        } else {
            None
        }
    }

    #[must_use]
    pub fn any_fallback(&self) -> bool {
        self.zero_order.amplitude.is_fallback() || self.first_order.amplitude.is_fallback()
    }
}

/// Thresholds and physical constants of the search. `Default` holds the values calibrated on the
/// lab setup (970 MHz FSR cavity, 4.5 V piezo ramp showing four TEM00 peaks).
#[derive(Debug, Clone, PartialEq)]
pub struct PeakSearchSetup {
    pub fsr_hz: f64,
    pub expected_comb_peaks: usize,
    pub comb_min_height: f64,
    pub comb_height_step: f64,
    pub comb_initial_distance: usize,
    pub comb_refine_distance: usize,
    pub max_threshold_steps: u32,
    pub mod_min_height: f64,
    pub mod_distance: usize,
    pub zero_order_tolerance_hz: f64,
    pub first_order_tolerance_hz: f64,
    pub zero_order_fallback: f64,
    pub first_order_fallback: f64,
}

impl Default for PeakSearchSetup {
    fn default() -> Self {
        PeakSearchSetup {
            fsr_hz: CAVITY_FSR_HZ,
            expected_comb_peaks: 4,
            comb_min_height: 0.05,
            comb_height_step: 0.01,
            comb_initial_distance: 10,
            comb_refine_distance: 20,
            max_threshold_steps: 50,
            mod_min_height: 0.05,
            mod_distance: 20,
            zero_order_tolerance_hz: 20.0e6,
            first_order_tolerance_hz: 40.0e6,
            zero_order_fallback: 0.05,
            first_order_fallback: 0.02,
        }
    }
}

impl PeakSearchSetup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fsr_hz(mut self, fsr_hz: f64) -> Self {
        self.fsr_hz = fsr_hz;
        self
    }

    #[must_use]
    pub fn expected_comb_peaks(mut self, n: usize) -> Self {
        self.expected_comb_peaks = n;
        self
    }

    #[must_use]
    pub fn comb_min_height(mut self, volts: f64) -> Self {
        self.comb_min_height = volts;
        self
    }

    #[must_use]
    pub fn max_threshold_steps(mut self, steps: u32) -> Self {
        self.max_threshold_steps = steps;
        self
    }

    #[must_use]
    pub fn mod_min_height(mut self, volts: f64) -> Self {
        self.mod_min_height = volts;
        self
    }

    #[must_use]
    pub fn tolerances_hz(mut self, zero_order: f64, first_order: f64) -> Self {
        self.zero_order_tolerance_hz = zero_order;
        self.first_order_tolerance_hz = first_order;
        self
    }

    #[must_use]
    pub fn fallbacks(mut self, zero_order: f64, first_order: f64) -> Self {
        self.zero_order_fallback = zero_order;
        self.first_order_fallback = first_order;
        self
    }

    /// Find the TEM00 comb in a trace taken with the modulation off.
    ///
    /// While too many peaks are found the height threshold is raised by `comb_height_step` and
    /// the search repeated with the wider `comb_refine_distance`, at most `max_threshold_steps`
    /// times.
    /// # Errors
    /// `InsufficientPeaks` as soon as fewer than `expected_comb_peaks` are found, `ExcessPeaks`
    /// if the step budget runs out. A partial comb is never returned.
    pub fn find_comb(&self, data: &[f64]) -> Result<Comb, PeakSearchError> {
        let mut min_height = self.comb_min_height;
        let mut peaks = find_peaks(data, min_height, self.comb_initial_distance);
        let mut attempts = 0;
        loop {
            match peaks.len().cmp(&self.expected_comb_peaks) {
                Ordering::Equal => {
                    return Ok(Comb {
                        peaks,
                        min_height,
                        attempts,
                    })
                }
                Ordering::Less => {
                    return Err(PeakSearchError::InsufficientPeaks {
                        found: peaks.len(),
                        expected: self.expected_comb_peaks,
                        min_height,
                    })
                }
                Ordering::Greater if attempts >= self.max_threshold_steps => {
                    return Err(PeakSearchError::ExcessPeaks {
                        found: peaks.len(),
                        expected: self.expected_comb_peaks,
                        min_height,
                        attempts,
                    })
                }
                Ordering::Greater => {
                    attempts += 1;
                    min_height += self.comb_height_step;
                    peaks = find_peaks(data, min_height, self.comb_refine_distance);
                }
            }
        }
    }

    /// Hz per sample, from the spacing of the 2nd and 3rd comb peaks (one FSR apart).
    /// # Errors
    /// Fails if the comb has fewer than three peaks or they are not increasing.
    pub fn resolution(&self, comb: &[usize]) -> Result<f64, PeakSearchError> {
        let (p1, p2) = central_pair(comb)?;
        match p2.checked_sub(p1) {
            Some(d) if d > 0 => Ok(self.fsr_hz / d as f64),
            _ => Err(PeakSearchError::CombNotIncreasing),
        }
    }

    /// Every peak of a trace taken with the modulation on; no count is enforced.
    #[must_use]
    pub fn find_modulation_peaks(&self, data: &[f64]) -> Vec<usize> {
        find_peaks(data, self.mod_min_height, self.mod_distance)
    }

    /// Match the carrier against the 2nd and 3rd comb positions. The amplitude is read at the
    /// first match if it lies within `zero_order_tolerance_hz` of the comb peak.
    /// # Errors
    /// Fails on a short comb, an empty `mod_peaks`, or a match outside `data`.
    pub fn measure_zero_order(
        &self,
        data: &[f64],
        comb: &[usize],
        mod_peaks: &[usize],
        resolution_hz: f64,
    ) -> Result<ZeroOrder, PeakSearchError> {
        let (est_1, est_2) = central_pair(comb)?;
        let position_1 = find_nearest(mod_peaks, est_1).ok_or(PeakSearchError::NoModulationPeaks)?;
        let position_2 = find_nearest(mod_peaks, est_2).ok_or(PeakSearchError::NoModulationPeaks)?;

        let offset_hz = position_1.abs_diff(est_1) as f64 * resolution_hz;
        let amplitude = if offset_hz < self.zero_order_tolerance_hz {
            Amplitude::Measured(sample_at(data, position_1)?)
        } else {
            Amplitude::Fallback(self.zero_order_fallback)
        };
        Ok(ZeroOrder {
            position_1,
            position_2,
            amplitude,
        })
    }

    /// Index where the first-order sideband should sit: `mod_freq_hz` above the 2nd comb peak,
    /// floored to a whole sample and clamped at the start of the trace.
    #[must_use]
    pub fn first_order_estimate(&self, carrier: usize, mod_freq_hz: f64, resolution_hz: f64) -> usize {
        (carrier as f64 + mod_freq_hz / resolution_hz).floor().max(0.0) as usize
    }

    /// # Errors
    /// Fails on a short comb, an empty `mod_peaks`, or a match outside `data`.
    pub fn measure_first_order(
        &self,
        data: &[f64],
        comb: &[usize],
        mod_peaks: &[usize],
        mod_freq_hz: f64,
        resolution_hz: f64,
    ) -> Result<FirstOrder, PeakSearchError> {
        let (carrier, _) = central_pair(comb)?;
        let estimate = self.first_order_estimate(carrier, mod_freq_hz, resolution_hz);
        let position = find_nearest(mod_peaks, estimate).ok_or(PeakSearchError::NoModulationPeaks)?;

        let offset_hz = position.abs_diff(estimate) as f64 * resolution_hz;
        let amplitude = if offset_hz > self.first_order_tolerance_hz {
            Amplitude::Fallback(self.first_order_fallback)
        } else {
            Amplitude::Measured(sample_at(data, position)?)
        };
        Ok(FirstOrder {
            estimate,
            position,
            amplitude,
        })
    }

    /// Full pipeline: comb → resolution → modulation peaks → zero order → first order.
    /// # Errors
    /// Propagates the first failing step.
    pub fn measure(
        &self,
        comb_trace: &Trace,
        mod_trace: &Trace,
        mod_freq_hz: f64,
    ) -> Result<Measurement, PeakSearchError> {
        let comb = self.find_comb(comb_trace.samples())?;
        let resolution_hz = self.resolution(&comb.peaks)?;
        let modulation_peaks = self.find_modulation_peaks(mod_trace.samples());
        let zero_order = self.measure_zero_order(
            mod_trace.samples(),
            &comb.peaks,
            &modulation_peaks,
            resolution_hz,
        )?;
        let first_order = self.measure_first_order(
            mod_trace.samples(),
            &comb.peaks,
            &modulation_peaks,
            mod_freq_hz,
            resolution_hz,
        )?;
        Ok(Measurement {
            comb,
            resolution_hz,
            modulation_peaks,
            zero_order,
            first_order,
        })
    }
}

fn central_pair(comb: &[usize]) -> Result<(usize, usize), PeakSearchError> {
    match comb {
        [_, p1, p2, ..] => Ok((*p1, *p2)),
        _ => Err(PeakSearchError::CombTooShort { found: comb.len() }),
    }
}

fn sample_at(data: &[f64], index: usize) -> Result<f64, PeakSearchError> {
    data.get(index)
        .copied()
        .ok_or(PeakSearchError::IndexOutOfTrace {
            index,
            len: data.len(),
        })
}

/// Candidate closest to `target`; the earlier one wins a tie.
#[must_use]
pub fn find_nearest(candidates: &[usize], target: usize) -> Option<usize> {
    candidates
        .iter()
        .copied()
        .min_by_key(|c| c.abs_diff(target))
}

/// Local maxima of `data` that are at least `min_height` high and at least `distance` samples
/// from any higher kept peak. Returned in increasing order.
///
/// Flat tops count once, at their middle sample (rounded down). The first and last samples are
/// never peaks. When two peaks compete the higher one is kept; for equal heights the later one.
#[must_use]
pub fn find_peaks(data: &[f64], min_height: f64, distance: usize) -> Vec<usize> {
    let peaks: Vec<usize> = local_maxima(data)
        .into_iter()
        .filter(|&i| data[i] >= min_height)
        .collect();
    if distance <= 1 || peaks.len() < 2 {
        return peaks;
    }

    let mut keep = vec![true; peaks.len()];
    let mut by_height: Vec<usize> = (0..peaks.len()).collect();
    // stable, so equal heights stay in index order and the later one is visited first below
    by_height.sort_by(|&a, &b| data[peaks[a]].total_cmp(&data[peaks[b]]));
    for &i in by_height.iter().rev() {
        if !keep[i] {
            continue;
        }
        let mut k = i;
        while k > 0 && peaks[i] - peaks[k - 1] < distance {
            k -= 1;
            keep[k] = false;
        }
        let mut k = i + 1;
        while k < peaks.len() && peaks[k] - peaks[i] < distance {
            keep[k] = false;
            k += 1;
        }
    }
    peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(p))
        .collect()
}

fn local_maxima(data: &[f64]) -> Vec<usize> {
    let mut out = Vec::new();
    if data.len() < 3 {
        return out;
    }
    let i_max = data.len() - 1;
    let mut i = 1;
    while i < i_max {
        if data[i - 1] < data[i] {
            let mut i_ahead = i + 1;
            while i_ahead < i_max && data[i_ahead] == data[i] {
                i_ahead += 1;
            }
            if data[i_ahead] < data[i] {
                out.push((i + i_ahead - 1) / 2);
                i = i_ahead;
            }
        }
        i += 1;
    }
    out
}
