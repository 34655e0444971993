#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss, clippy::module_name_repetitions)]

use std::thread;
use std::time::Duration;

use chrono::Local;

use crate::scpi::{query_parse, ScpiError, ScpiResult, Transport};

pub const FREQUENCY_RANGE_HZ: (f64, f64) = (10.0e6, 15.0e9);
pub const POWER_RANGE_DBM: (f64, f64) = (-50.0, 20.0);

/// Session with a Windfreak SynthHD. The device handle lives here rather than at module scope;
/// `close` switches the output off and hands the transport back.
#[derive(Debug)]
pub struct SynthHd<T: Transport> {
    inst: T,
    channel: u8,
    model: String,
}

impl<T: Transport> SynthHd<T> {
    /// # Errors
    /// Propagates transport errors.
    pub fn open(mut inst: T) -> ScpiResult<Self> {
        let model = inst.query("+")?.trim().to_owned();
        let mut synth = SynthHd {
            inst,
            channel: 0,
            model,
        };
        synth.select_channel(0)?;
        Ok(synth)
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    #[must_use]
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.inst
    }

    /// # Errors
    /// `ScpiError::Device` for channels other than 0 (A) and 1 (B); transport errors.
    pub fn select_channel(&mut self, channel: u8) -> ScpiResult<()> {
        if channel > 1 {
            return Err(ScpiError::Device(format!(
                "SynthHD has channels 0 and 1, not {channel}"
            )));
        }
        self.inst.write(&format!("C{channel}"))?;
        self.channel = channel;
        Ok(())
    }

    /// # Errors
    /// `ScpiError::Device` outside the synthesizer's range; transport errors.
    pub fn set_frequency_hz(&mut self, frequency_hz: f64) -> ScpiResult<()> {
        let (lo, hi) = FREQUENCY_RANGE_HZ;
        if !(lo..=hi).contains(&frequency_hz) {
            return Err(ScpiError::Device(format!(
                "frequency {frequency_hz} Hz outside {lo}..{hi} Hz"
            )));
        }
        self.inst.write(&format!("f{:.7}", frequency_hz / 1.0e6))
    }

    /// # Errors
    /// Propagates transport and parse errors.
    pub fn frequency_hz(&mut self) -> ScpiResult<f64> {
        Ok(query_parse::<f64, _>(&mut self.inst, "f?")? * 1.0e6)
    }

    /// # Errors
    /// `ScpiError::Device` outside the synthesizer's range; transport errors.
    pub fn set_power_dbm(&mut self, power_dbm: f64) -> ScpiResult<()> {
        let (lo, hi) = POWER_RANGE_DBM;
        if !(lo..=hi).contains(&power_dbm) {
            return Err(ScpiError::Device(format!(
                "power {power_dbm} dBm outside {lo}..{hi} dBm"
            )));
        }
        self.inst.write(&format!("W{power_dbm:.3}"))
    }

    /// # Errors
    /// Propagates transport and parse errors.
    pub fn power_dbm(&mut self) -> ScpiResult<f64> {
        query_parse(&mut self.inst, "W?")
    }

    /// Output stage and PLL together, like the front-panel enable.
    /// # Errors
    /// Propagates transport errors.
    pub fn set_enabled(&mut self, enabled: bool) -> ScpiResult<()> {
        self.inst.write(if enabled { "E1r1" } else { "E0r0" })
    }

    /// # Errors
    /// Propagates transport and parse errors.
    pub fn is_enabled(&mut self) -> ScpiResult<bool> {
        Ok(query_parse::<u8, _>(&mut self.inst, "E?")? != 0)
    }

    /// # Errors
    /// The output could not be switched off; the transport is dropped in that case.
    pub fn close(mut self) -> ScpiResult<T> {
        self.set_enabled(false)?;
        Ok(self.inst)
    }
}

/// EOM drive used for a single measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct ModulationSetup {
    pub channel: u8,
    pub frequency_hz: f64,
    pub power_dbm: f64,
}

impl Default for ModulationSetup {
    fn default() -> Self {
        ModulationSetup {
            channel: 0,
            frequency_hz: 100.0e6,
            power_dbm: 5.0,
        }
    }
}

impl ModulationSetup {
    /// Program channel, frequency and power, then switch the output on.
    /// # Errors
    /// Propagates range and transport errors.
    pub fn apply<T: Transport>(&self, synth: &mut SynthHd<T>) -> ScpiResult<()> {
        synth.select_channel(self.channel)?;
        synth.set_frequency_hz(self.frequency_hz)?;
        synth.set_power_dbm(self.power_dbm)?;
        synth.set_enabled(true)
    }
}

/// RF power ramp at a fixed frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSweep {
    pub channel: u8,
    pub frequency_hz: f64,
    /// Power set before the output is switched on.
    pub initial_dbm: f64,
    pub start_dbm: f64,
    pub stop_dbm: f64,
    pub points: usize,
    pub dwell: Duration,
    /// Power left on the channel after the sweep, before switching off.
    pub park_dbm: f64,
}

impl Default for PowerSweep {
    fn default() -> Self {
        PowerSweep {
            channel: 0,
            frequency_hz: 100.0e6,
            initial_dbm: -10.0,
            start_dbm: -30.0,
            stop_dbm: 0.0,
            points: 51,
            dwell: Duration::from_secs(1),
            park_dbm: -20.0,
        }
    }
}

impl PowerSweep {
    /// Evenly spaced powers from `start_dbm` to `stop_dbm`, both included.
    #[must_use]
    pub fn powers(&self) -> Vec<f64> {
        match self.points {
            0 => Vec::new(),
            1 => vec![self.start_dbm],
            n => {
                let step = (self.stop_dbm - self.start_dbm) / (n - 1) as f64;
                (0..n)
                    .map(|i| self.start_dbm + step * i as f64)
                    .collect()
            }
        }
    }
}

/// Step the synthesizer through `sweep`, calling `on_step(index, power_dbm)` after each dwell.
///
/// The output is parked and switched off afterwards even if a step fails; the first error is
/// returned.
/// # Errors
/// Transport errors, or whatever `on_step` returns.
pub fn run_power_sweep<T, F>(synth: &mut SynthHd<T>, sweep: &PowerSweep, mut on_step: F) -> ScpiResult<()>
where
    T: Transport,
    F: FnMut(usize, f64) -> ScpiResult<()>,
{
    synth.select_channel(sweep.channel)?;
    synth.set_frequency_hz(sweep.frequency_hz)?;
    synth.set_power_dbm(sweep.initial_dbm)?;
    synth.set_enabled(true)?;

    let mut ramp = || -> ScpiResult<()> {
        for (i, dbm) in sweep.powers().into_iter().enumerate() {
            synth.set_power_dbm(dbm)?;
            thread::sleep(sweep.dwell);
            on_step(i, dbm)?;
        }
        Ok(())
    };
    let result = ramp();

    let park = synth
        .set_power_dbm(sweep.park_dbm)
        .and_then(|()| synth.set_enabled(false));
    if let (Err(_), Err(e)) = (&result, &park) {
        eprintln!(
            "[{}] WARN: RF output could not be parked after a failed sweep step: {}",
            Local::now(),
            e
        );
    }
    result.and(park)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BenchModel, SimulatedBench};

    fn synth() -> SynthHd<crate::mock::SimulatedSynth> {
        let (_, sim) = SimulatedBench::new(&BenchModel::default());
        SynthHd::open(sim).unwrap()
    }

    #[test]
    fn open_reads_model_and_selects_channel_a() {
        let mut s = synth();
        assert_eq!(s.model(), "SynthHD");
        assert_eq!(s.channel(), 0);
        assert_eq!(s.transport_mut().log, vec!["+", "C0"]);
    }

    #[test]
    fn settings_read_back() {
        let mut s = synth();
        s.select_channel(1).unwrap();
        s.set_frequency_hz(1.25e9).unwrap();
        s.set_power_dbm(-7.5).unwrap();
        s.set_enabled(true).unwrap();
        assert!((s.frequency_hz().unwrap() - 1.25e9).abs() < 1.0);
        assert!((s.power_dbm().unwrap() + 7.5).abs() < 1e-9);
        assert!(s.is_enabled().unwrap());

        let state = s.transport_mut().state();
        assert!(state.enabled[1] && !state.enabled[0]);
        assert!(s.transport_mut().log.contains(&"f1250.0000000".to_owned()));
    }

    #[test]
    fn out_of_range_requests_never_reach_the_device() {
        let mut s = synth();
        assert!(matches!(s.select_channel(2), Err(ScpiError::Device(_))));
        assert!(matches!(s.set_frequency_hz(1.0e3), Err(ScpiError::Device(_))));
        assert!(matches!(s.set_power_dbm(30.0), Err(ScpiError::Device(_))));
        assert_eq!(s.transport_mut().log.len(), 2);
    }

    #[test]
    fn close_switches_output_off() {
        let mut s = synth();
        s.set_enabled(true).unwrap();
        let sim = s.close().unwrap();
        assert!(!sim.state().enabled[0]);
        assert_eq!(sim.log.last().map(String::as_str), Some("E0r0"));
    }

    #[test]
    fn sweep_powers_are_inclusive_linspace() {
        let p = PowerSweep::default().powers();
        assert_eq!(p.len(), 51);
        assert!((p[0] + 30.0).abs() < 1e-12);
        assert!((p[1] + 29.4).abs() < 1e-12);
        assert!(p[50].abs() < 1e-12);

        let one = PowerSweep {
            points: 1,
            ..PowerSweep::default()
        };
        assert_eq!(one.powers(), vec![-30.0]);
    }

    #[test]
    fn sweep_steps_and_parks() {
        let mut s = synth();
        let sweep = PowerSweep {
            points: 4,
            start_dbm: -12.0,
            stop_dbm: -3.0,
            dwell: Duration::ZERO,
            ..PowerSweep::default()
        };
        let mut seen = Vec::new();
        run_power_sweep(&mut s, &sweep, |i, dbm| {
            seen.push((i, dbm));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(0, -12.0), (1, -9.0), (2, -6.0), (3, -3.0)]);

        let state = s.transport_mut().state();
        assert!(!state.enabled[0]);
        assert!((state.power_dbm[0] + 20.0).abs() < 1e-9);
        assert!((state.frequency_hz[0] - 100.0e6).abs() < 1.0);
    }

    #[test]
    fn failed_step_still_switches_off() {
        let mut s = synth();
        let sweep = PowerSweep {
            dwell: Duration::ZERO,
            ..PowerSweep::default()
        };
        let res = run_power_sweep(&mut s, &sweep, |i, _| {
            if i == 3 {
                Err(ScpiError::Device("power meter unplugged".into()))
            } else {
                Ok(())
            }
        });
        assert!(matches!(res, Err(ScpiError::Device(_))));
        assert!(!s.transport_mut().state().enabled[0]);
    }
}
