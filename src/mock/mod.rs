#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::module_name_repetitions
)]

//! Simulated bench for running the measurement without hardware: a scope that sees a
//! piezo-swept cavity and a SynthHD whose output modulates it through the EOM.
//!
//! Both ends share the RF state, so enabling the synth output changes what the next scope
//! download shows. Every command received is logged for inspection in tests.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::power_units::dbm_to_vpp;
use crate::scpi::{make_block, ScpiError, ScpiResult, Transport};

/// Lorentzian line of peak height `amplitude` and half width `hwhm` (in samples) at `center`.
#[inline]
#[must_use]
pub fn lorentzian(x: f64, center: f64, amplitude: f64, hwhm: f64) -> f64 {
    let u = (x - center) / hwhm;
    amplitude / (1.0 + u * u)
}

/// Sum of Lorentzian lines `(center, amplitude)` sampled at `0..len`.
#[must_use]
pub fn lorentzian_lines(len: usize, lines: &[(f64, f64)], hwhm: f64) -> Vec<f64> {
    (0..len)
        .map(|i| {
            lines
                .iter()
                .map(|&(c, a)| lorentzian(i as f64, c, a, hwhm))
                .sum()
        })
        .collect()
}

/// Bessel functions J0, J1 by their power series, plenty for modulation indices below ~2.
#[must_use]
pub fn bessel_j0_j1(beta: f64) -> (f64, f64) {
    let x = beta / 2.0;
    let x2 = x * x;
    let mut term0 = 1.0;
    let mut term1 = x;
    let mut j0 = term0;
    let mut j1 = term1;
    for k in 1..20 {
        let k = f64::from(k);
        term0 *= -x2 / (k * k);
        term1 *= -x2 / (k * (k + 1.0));
        j0 += term0;
        j1 += term1;
    }
    (j0, j1)
}

/// Physical model behind the simulated traces.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchModel {
    pub samples: usize,
    pub x_origin: f64,
    pub x_increment: f64,
    pub fsr_hz: f64,
    /// Sample index of the first TEM00 resonance in the sweep.
    pub comb_start: f64,
    /// Samples per FSR.
    pub comb_spacing: f64,
    pub comb_peaks: usize,
    pub peak_volts: f64,
    pub hwhm_samples: f64,
    /// EOM modulation index per volt of RF amplitude.
    pub beta_per_volt: f64,
    pub noise_volts: f64,
    /// Cavity drift between consecutive acquisitions, in samples.
    pub drift_samples: f64,
    pub seed: u64,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_reference: f64,
    pub rf_channel: u8,
}

impl Default for BenchModel {
    fn default() -> Self {
        BenchModel {
            samples: 6000,
            x_origin: -6.0e-2,
            x_increment: 2.0e-5,
            fsr_hz: 970.0e6,
            comb_start: 700.0,
            comb_spacing: 1400.0,
            comb_peaks: 4,
            peak_volts: 0.8,
            hwhm_samples: 4.0,
            beta_per_volt: 1.5,
            noise_volts: 0.004,
            drift_samples: 1.0,
            seed: 0x0e0e_5eed,
            y_increment: 0.004,
            y_origin: -100.0,
            y_reference: 127.0,
            rf_channel: 0,
        }
    }
}

impl BenchModel {
    #[inline]
    #[must_use]
    pub fn resolution_hz(&self) -> f64 {
        self.fsr_hz / self.comb_spacing
    }

    /// Noise-free transmission in volts. `rf` is `(frequency_hz, power_dbm)` of the EOM drive, and
    /// `shift` moves the whole comb by that many samples.
    #[must_use]
    pub fn transmission(&self, rf: Option<(f64, f64)>, shift: f64) -> Vec<f64> {
        let (carrier, sideband, offset) = match rf {
            Some((freq_hz, power_dbm)) => {
                let beta = self.beta_per_volt * dbm_to_vpp(power_dbm) / 2.0;
                let (j0, j1) = bessel_j0_j1(beta);
                (j0 * j0, j1 * j1, freq_hz / self.resolution_hz())
            }
            None => (1.0, 0.0, 0.0),
        };
        // one order either side so sidebands of resonances outside the sweep still show up
        let mut lines = Vec::with_capacity(3 * (self.comb_peaks + 2));
        for k in -1..=(self.comb_peaks as i64) {
            let c = self.comb_start + shift + k as f64 * self.comb_spacing;
            lines.push((c, self.peak_volts * carrier));
            if sideband > 0.0 {
                lines.push((c + offset, self.peak_volts * sideband));
                lines.push((c - offset, self.peak_volts * sideband));
            }
        }
        lorentzian_lines(self.samples, &lines, self.hwhm_samples)
    }

    #[inline]
    #[must_use]
    pub fn to_raw(&self, volts: f64) -> u8 {
        (volts / self.y_increment + self.y_reference + self.y_origin)
            .round()
            .clamp(0.0, 255.0) as u8
    }

    #[inline]
    #[must_use]
    pub fn from_raw(&self, raw: u8) -> f64 {
        (f64::from(raw) - self.y_reference - self.y_origin) * self.y_increment
    }
}

/// Output state of the simulated two-channel SynthHD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RfState {
    pub channel: usize,
    pub frequency_hz: [f64; 2],
    pub power_dbm: [f64; 2],
    pub enabled: [bool; 2],
}

type Shared<T> = Rc<RefCell<T>>;

pub struct SimulatedBench;

impl SimulatedBench {
    #[allow(clippy::new_ret_no_self)]
    #[must_use]
    pub fn new(model: &BenchModel) -> (SimulatedScope, SimulatedSynth) {
        let rf: Shared<RfState> = Rc::new(RefCell::new(RfState {
            frequency_hz: [100.0e6; 2],
            power_dbm: [-10.0; 2],
            ..RfState::default()
        }));
        (
            SimulatedScope::new(model.clone(), Rc::clone(&rf)),
            SimulatedSynth::new(rf),
        )
    }
}

#[derive(Debug)]
pub struct SimulatedScope {
    model: BenchModel,
    rf: Shared<RfState>,
    rng: StdRng,
    settings: HashMap<String, String>,
    responses: VecDeque<Vec<u8>>,
    waveform: Vec<u8>,
    start: usize,
    stop: usize,
    acquisitions: u32,
    frame_drive: Option<(f64, f64)>,
    frame_shift: f64,
    frame_channels: Vec<u8>,
    pub log: Vec<String>,
}

impl SimulatedScope {
    fn new(model: BenchModel, rf: Shared<RfState>) -> Self {
        let rng = StdRng::seed_from_u64(model.seed);
        let stop = model.samples;
        SimulatedScope {
            model,
            rf,
            rng,
            settings: HashMap::new(),
            responses: VecDeque::new(),
            waveform: Vec::new(),
            start: 1,
            stop,
            acquisitions: 0,
            frame_drive: None,
            frame_shift: 0.0,
            frame_channels: Vec::new(),
            log: Vec::new(),
        }
    }

    #[must_use]
    pub fn model(&self) -> &BenchModel {
        &self.model
    }

    /// Last value written with `<header> <value>`, e.g. `setting(":CHAN1:SCAL")`.
    #[must_use]
    pub fn setting(&self, header: &str) -> Option<&str> {
        self.settings.get(header).map(String::as_str)
    }

    #[must_use]
    pub fn acquisitions(&self) -> u32 {
        self.acquisitions
    }

    /// Start a new simulated sweep: RF drive and drift are frozen for every channel read from it.
    fn trigger(&mut self) {
        let rf = self.rf.borrow();
        let c = usize::from(self.model.rf_channel);
        self.frame_drive = rf.enabled[c].then(|| (rf.frequency_hz[c], rf.power_dbm[c]));
        drop(rf);
        self.frame_shift = self.model.drift_samples * f64::from(self.acquisitions);
        self.frame_channels.clear();
        self.acquisitions += 1;
    }

    /// Selecting a channel already read from the current sweep (or the first selection) triggers
    /// a new one, so the channels of one `get_trace_data` share a trigger.
    fn acquire(&mut self, ch: u8) {
        if self.acquisitions == 0 || self.frame_channels.contains(&ch) {
            self.trigger();
        }
        self.frame_channels.push(ch);
        let noise = Uniform::new_inclusive(-self.model.noise_volts, self.model.noise_volts);

        let clean = match ch {
            1 => self.model.transmission(self.frame_drive, self.frame_shift),
            // reflection dips where the transmission peaks
            2 => self
                .model
                .transmission(self.frame_drive, self.frame_shift)
                .into_iter()
                .map(|v| 0.6 - 0.5 * v)
                .collect(),
            _ => vec![0.0; self.model.samples],
        };
        self.waveform = clean
            .into_iter()
            .map(|v| self.model.to_raw(v + noise.sample(&mut self.rng)))
            .collect();
    }

    fn respond<S: ToString>(&mut self, resp: S) {
        let mut line = resp.to_string().into_bytes();
        line.push(b'\n');
        self.responses.push_back(line);
    }

    fn handle(&mut self, cmd: &str) -> ScpiResult<()> {
        let (header, arg) = match cmd.split_once(' ') {
            Some((h, a)) => (h.to_ascii_uppercase(), Some(a.trim().to_owned())),
            None => (cmd.to_ascii_uppercase(), None),
        };
        let parse_index = |a: &Option<String>| -> ScpiResult<usize> {
            a.as_deref()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ScpiError::Device(format!("bad argument in {cmd:?}")))
        };
        match header.as_str() {
            "*IDN?" => self.respond("RIGOL TECHNOLOGIES,DS1104Z,SIM0000000001,00.04.05"),
            ":ACQ:MDEP?" => self.respond(self.model.samples),
            ":WAV:XINC?" => self.respond(self.model.x_increment),
            ":WAV:XOR?" => self.respond(self.model.x_origin),
            ":WAV:YINC?" => self.respond(self.model.y_increment),
            ":WAV:YOR?" => self.respond(self.model.y_origin),
            ":WAV:YREF?" => self.respond(self.model.y_reference),
            ":WAV:SOUR" => {
                let ch = arg
                    .as_deref()
                    .and_then(|a| a.to_ascii_uppercase().strip_prefix("CHAN")?.parse().ok())
                    .ok_or_else(|| ScpiError::Device(format!("bad source in {cmd:?}")))?;
                self.acquire(ch);
            }
            ":WAV:STAR" => self.start = parse_index(&arg)?,
            ":WAV:STOP" => self.stop = parse_index(&arg)?,
            ":WAV:DATA?" => {
                let lo = self.start.max(1) - 1;
                let hi = self.stop.min(self.waveform.len());
                let payload = self.waveform.get(lo..hi).unwrap_or(&[]);
                let block = make_block(payload);
                self.responses.push_back(block);
            }
            h if h.ends_with('?') => {
                let value = self
                    .settings
                    .get(h.trim_end_matches('?'))
                    .cloned()
                    .ok_or_else(|| ScpiError::Device(format!("unsupported query {cmd:?}")))?;
                self.respond(value);
            }
            h => {
                if let Some(a) = arg {
                    self.settings.insert(h.to_owned(), a);
                }
            }
        }
        Ok(())
    }
}

impl Transport for SimulatedScope {
    fn write(&mut self, cmd: &str) -> ScpiResult<()> {
        self.log.push(cmd.to_owned());
        self.handle(cmd)
    }

    fn read_line(&mut self) -> ScpiResult<String> {
        let resp = self.responses.pop_front().ok_or_else(|| {
            ScpiError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no response pending",
            ))
        })?;
        Ok(String::from_utf8_lossy(&resp).trim_end().to_owned())
    }

    fn read_raw(&mut self) -> ScpiResult<Vec<u8>> {
        self.responses.pop_front().ok_or_else(|| {
            ScpiError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no response pending",
            ))
        })
    }
}

#[derive(Debug)]
pub struct SimulatedSynth {
    rf: Shared<RfState>,
    responses: VecDeque<String>,
    pub log: Vec<String>,
}

impl SimulatedSynth {
    fn new(rf: Shared<RfState>) -> Self {
        SimulatedSynth {
            rf,
            responses: VecDeque::new(),
            log: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> RfState {
        self.rf.borrow().clone()
    }

    fn handle(&mut self, cmd: &str) -> ScpiResult<()> {
        for (op, arg) in split_synth_commands(cmd) {
            let mut rf = self.rf.borrow_mut();
            let ch = rf.channel;
            let bad = || ScpiError::Device(format!("bad argument in {cmd:?}"));
            let resp = match (op, arg) {
                ('+', "") => Some("SynthHD".to_owned()),
                ('-', "") => Some("1234".to_owned()),
                ('C', "?") => Some(ch.to_string()),
                ('C', a) => {
                    rf.channel = match a {
                        "0" => 0,
                        "1" => 1,
                        _ => return Err(bad()),
                    };
                    None
                }
                ('f', "?") => Some(format!("{:.7}", rf.frequency_hz[ch] / 1.0e6)),
                ('f', a) => {
                    rf.frequency_hz[ch] = a.parse::<f64>().map_err(|_| bad())? * 1.0e6;
                    None
                }
                ('W', "?") => Some(format!("{:.3}", rf.power_dbm[ch])),
                ('W', a) => {
                    rf.power_dbm[ch] = a.parse().map_err(|_| bad())?;
                    None
                }
                ('E', "?") => Some(u8::from(rf.enabled[ch]).to_string()),
                ('E', a) => {
                    rf.enabled[ch] = a == "1";
                    None
                }
                // PLL power; tracked together with the output enable
                ('r', _) => None,
                _ => return Err(ScpiError::Device(format!("unsupported command {cmd:?}"))),
            };
            drop(rf);
            if let Some(r) = resp {
                self.responses.push_back(r);
            }
        }
        Ok(())
    }
}

/// Split a SynthHD command string such as `C0f100.0W-10E1r1` into `(letter, argument)` pairs.
fn split_synth_commands(cmd: &str) -> Vec<(char, &str)> {
    let mut out = Vec::new();
    let mut rest = cmd.trim();
    while let Some(op) = rest.chars().next() {
        let body = &rest[op.len_utf8()..];
        let end = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '?'))
            .unwrap_or(body.len());
        out.push((op, &body[..end]));
        rest = &body[end..];
    }
    out
}

impl Transport for SimulatedSynth {
    fn write(&mut self, cmd: &str) -> ScpiResult<()> {
        self.log.push(cmd.to_owned());
        self.handle(cmd)
    }

    fn read_line(&mut self) -> ScpiResult<String> {
        self.responses.pop_front().ok_or_else(|| {
            ScpiError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no response pending",
            ))
        })
    }

    fn read_raw(&mut self) -> ScpiResult<Vec<u8>> {
        self.read_line().map(String::into_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bessel_small_argument() {
        let (j0, j1) = bessel_j0_j1(0.0);
        assert!((j0 - 1.0).abs() < 1e-12 && j1.abs() < 1e-12);
        // tabulated values
        let (j0, j1) = bessel_j0_j1(1.0);
        assert!((j0 - 0.765_197_686_6).abs() < 1e-9);
        assert!((j1 - 0.440_050_585_7).abs() < 1e-9);
    }

    #[test]
    fn synth_command_splitting() {
        assert_eq!(
            split_synth_commands("C0f100.0000000W-10.000E1r1"),
            vec![
                ('C', "0"),
                ('f', "100.0000000"),
                ('W', "-10.000"),
                ('E', "1"),
                ('r', "1")
            ]
        );
        assert_eq!(split_synth_commands("W?"), vec![('W', "?")]);
        assert_eq!(split_synth_commands("+"), vec![('+', "")]);
    }

    #[test]
    fn raw_quantisation_round_trips() {
        let m = BenchModel::default();
        for v in [0.0, 0.1, 0.5, 0.8] {
            assert!((m.from_raw(m.to_raw(v)) - v).abs() <= m.y_increment / 2.0 + 1e-12);
        }
    }

    #[test]
    fn rf_state_is_shared() {
        let (mut scope, mut synth) = SimulatedBench::new(&BenchModel::default());
        synth.write("C0").unwrap();
        synth.write("E1r1").unwrap();
        assert!(synth.state().enabled[0]);
        scope.write(":WAV:SOUR CHAN1").unwrap();
        assert_eq!(scope.acquisitions(), 1);
    }

    #[test]
    fn channels_of_one_sweep_share_a_trigger() {
        let model = BenchModel {
            noise_volts: 0.0,
            ..BenchModel::default()
        };
        let (mut scope, mut synth) = SimulatedBench::new(&model);
        scope.write(":WAV:SOUR CHAN1").unwrap();
        let tx = scope.waveform.clone();
        // RF switched on mid-frame must not show up in the second channel
        synth.write("C0E1r1").unwrap();
        scope.write(":WAV:SOUR CHAN2").unwrap();
        assert_eq!(scope.acquisitions(), 1);
        let peak = model.comb_start as usize;
        let rx_expected = model.to_raw(0.6 - 0.5 * model.from_raw(tx[peak]));
        assert!(scope.waveform[peak].abs_diff(rx_expected) <= 1);

        scope.write(":WAV:SOUR CHAN1").unwrap();
        assert_eq!(scope.acquisitions(), 2);
        assert!(scope.waveform[peak] < tx[peak]);
    }
}
