#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::fmt;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use chrono::Local;

use crate::peak_search::{Measurement, PeakSearchError, PeakSearchSetup};
use crate::scope::{ChannelSetup, Scope, TriggerSetup};
use crate::scpi::{ScpiError, Transport};
use crate::synth::{ModulationSetup, SynthHd};
use crate::trace::Trace;

#[derive(Debug)]
pub enum ExperimentError {
    Instrument(ScpiError),
    Analysis(PeakSearchError),
}

impl fmt::Display for ExperimentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperimentError::Instrument(e) => write!(f, "instrument error: {e}"),
            ExperimentError::Analysis(e) => write!(f, "analysis error: {e}"),
        }
    }
}

impl std::error::Error for ExperimentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExperimentError::Instrument(e) => Some(e),
            ExperimentError::Analysis(e) => Some(e),
        }
    }
}

impl From<ScpiError> for ExperimentError {
    fn from(e: ScpiError) -> Self {
        ExperimentError::Instrument(e)
    }
}

impl From<PeakSearchError> for ExperimentError {
    fn from(e: PeakSearchError) -> Self {
        ExperimentError::Analysis(e)
    }
}

/// Everything needed to take one comb/modulation trace pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSetup {
    pub channel: ChannelSetup,
    pub trigger: TriggerSetup,
    /// Scope channel carrying the cavity transmission photodiode.
    pub transmission_channel: u8,
    pub modulation: ModulationSetup,
    /// Wait after switching the RF before downloading.
    pub settle: Duration,
}

impl Default for RunSetup {
    fn default() -> Self {
        let channel = ChannelSetup::default();
        RunSetup {
            transmission_channel: channel.channel,
            channel,
            trigger: TriggerSetup::default(),
            modulation: ModulationSetup::default(),
            settle: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub comb_trace: Trace,
    pub mod_trace: Trace,
    pub measurement: Measurement,
}

/// Acquire the comb trace with the RF off and the modulation trace with it on, then run the
/// peak search on the pair.
///
/// The synthesizer output is switched off again before returning, whether or not the
/// acquisition succeeded.
/// # Errors
/// Instrument errors from either device; analysis errors if the comb or the sidebands cannot be
/// located.
pub fn run_measurement<S: Transport, R: Transport>(
    scope: &mut Scope<S>,
    synth: &mut SynthHd<R>,
    run: &RunSetup,
    search: &PeakSearchSetup,
) -> Result<RunRecord, ExperimentError> {
    scope.configure_channel(&run.channel)?;
    scope.configure_trigger(&run.trigger)?;

    let mut acquire = || -> Result<(Trace, Trace), ScpiError> {
        synth.select_channel(run.modulation.channel)?;
        synth.set_enabled(false)?;
        thread::sleep(run.settle);
        let comb_trace = scope.get_waveform(run.transmission_channel)?;

        run.modulation.apply(synth)?;
        thread::sleep(run.settle);
        let mod_trace = scope.get_waveform(run.transmission_channel)?;
        Ok((comb_trace, mod_trace))
    };
    let acquired = acquire();
    let rf_off = synth.set_enabled(false);
    let (comb_trace, mod_trace) = match (acquired, rf_off) {
        (Ok(traces), Ok(())) => traces,
        (Ok(_), Err(e)) | (Err(e), Ok(())) => return Err(e.into()),
        (Err(e), Err(off)) => {
            eprintln!(
                "[{}] WARN: RF output could not be switched off after a failed acquisition; the EOM may still be driven: {}",
                Local::now(),
                off
            );
            return Err(e.into());
        }
    };

    let measurement = search.measure(&comb_trace, &mod_trace, run.modulation.frequency_hz)?;
    Ok(RunRecord {
        comb_trace,
        mod_trace,
        measurement,
    })
}

/// Both traces as `time_s,comb_v,mod_v` rows on the comb trace's time axis.
/// # Errors
/// Propagates write errors.
pub fn write_traces_csv<W: Write>(out: &mut W, record: &RunRecord) -> io::Result<()> {
    writeln!(out, "time_s,comb_v,mod_v")?;
    let rows = record
        .comb_trace
        .time_axis()
        .zip(record.comb_trace.samples())
        .zip(record.mod_trace.samples());
    for ((t, comb), modulated) in rows {
        writeln!(out, "{t:.9e},{comb:.5},{modulated:.5}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BenchModel, SimulatedBench, SimulatedScope, SimulatedSynth};

    fn bench(model: &BenchModel) -> (Scope<SimulatedScope>, SynthHd<SimulatedSynth>) {
        let (scope, synth) = SimulatedBench::new(model);
        (Scope::open(scope), SynthHd::open(synth).unwrap())
    }

    fn quick_run() -> RunSetup {
        RunSetup {
            settle: Duration::ZERO,
            ..RunSetup::default()
        }
    }

    #[test]
    fn measures_sidebands_on_simulated_bench() {
        let model = BenchModel::default();
        let (mut scope, mut synth) = bench(&model);
        let rec = run_measurement(&mut scope, &mut synth, &quick_run(), &PeakSearchSetup::default())
            .unwrap();
        let m = &rec.measurement;

        assert_eq!(m.comb.peaks.len(), 4);
        assert!((m.resolution_hz - model.resolution_hz()).abs() / model.resolution_hz() < 0.01);
        assert!(!m.any_fallback());
        assert!(m.zero_order.position_1.abs_diff(2100) <= 2);
        assert!(m.first_order.position.abs_diff(2245) <= 3);
        let ratio = m.sideband_ratio_db().unwrap();
        assert!(ratio < -3.0 && ratio > -12.0, "ratio {ratio}");
    }

    #[test]
    fn rf_is_off_for_comb_and_after_run() {
        let (mut scope, mut synth) = bench(&BenchModel::default());
        run_measurement(&mut scope, &mut synth, &quick_run(), &PeakSearchSetup::default()).unwrap();

        let log = &synth.transport_mut().log;
        let first_on = log.iter().position(|c| c == "E1r1").unwrap();
        assert!(log[..first_on].iter().any(|c| c == "E0r0"));
        assert_eq!(log.last().map(String::as_str), Some("E0r0"));
        assert!(!synth.transport_mut().state().enabled[0]);
        assert_eq!(scope.transport_mut().acquisitions(), 2);
    }

    #[test]
    fn dead_cavity_is_an_analysis_error_and_rf_ends_off() {
        let model = BenchModel {
            peak_volts: 0.02,
            ..BenchModel::default()
        };
        let (mut scope, mut synth) = bench(&model);
        let err = run_measurement(&mut scope, &mut synth, &quick_run(), &PeakSearchSetup::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::Analysis(PeakSearchError::InsufficientPeaks { .. })
        ));
        assert!(!synth.transport_mut().state().enabled[0]);
    }

    #[test]
    fn bad_modulation_is_an_instrument_error_and_rf_ends_off() {
        let (mut scope, mut synth) = bench(&BenchModel::default());
        let run = RunSetup {
            modulation: ModulationSetup {
                frequency_hz: 1.0,
                ..ModulationSetup::default()
            },
            ..quick_run()
        };
        let err = run_measurement(&mut scope, &mut synth, &run, &PeakSearchSetup::default())
            .unwrap_err();
        assert!(matches!(err, ExperimentError::Instrument(ScpiError::Device(_))));
        assert_eq!(
            synth.transport_mut().log.last().map(String::as_str),
            Some("E0r0")
        );
    }

    /// Synth link whose output-off command fails from the `fail_from`-th attempt on.
    struct StuckOutput {
        inner: SimulatedSynth,
        off_writes: usize,
        fail_from: usize,
    }

    impl Transport for StuckOutput {
        fn write(&mut self, cmd: &str) -> crate::scpi::ScpiResult<()> {
            if cmd == "E0r0" {
                self.off_writes += 1;
                if self.off_writes >= self.fail_from {
                    return Err(ScpiError::Device("output stage not responding".into()));
                }
            }
            self.inner.write(cmd)
        }

        fn read_line(&mut self) -> crate::scpi::ScpiResult<String> {
            self.inner.read_line()
        }

        fn read_raw(&mut self) -> crate::scpi::ScpiResult<Vec<u8>> {
            self.inner.read_raw()
        }
    }

    fn stuck_bench(fail_from: usize) -> (Scope<SimulatedScope>, SynthHd<StuckOutput>) {
        let (scope, inner) = SimulatedBench::new(&BenchModel::default());
        let synth = StuckOutput {
            inner,
            off_writes: 0,
            fail_from,
        };
        (Scope::open(scope), SynthHd::open(synth).unwrap())
    }

    #[test]
    fn acquisition_error_wins_over_failed_rf_off() {
        let (mut scope, mut synth) = stuck_bench(2);
        let run = RunSetup {
            modulation: ModulationSetup {
                frequency_hz: 1.0,
                ..ModulationSetup::default()
            },
            ..quick_run()
        };
        let err = run_measurement(&mut scope, &mut synth, &run, &PeakSearchSetup::default())
            .unwrap_err();
        match err {
            ExperimentError::Instrument(ScpiError::Device(msg)) => {
                assert!(msg.contains("frequency"), "{msg}");
            }
            other => panic!("expected the frequency error, got {other}"),
        }
        assert_eq!(synth.transport_mut().off_writes, 2);
    }

    #[test]
    fn failed_rf_off_after_good_acquisition_is_reported() {
        let (mut scope, mut synth) = stuck_bench(2);
        let err = run_measurement(&mut scope, &mut synth, &quick_run(), &PeakSearchSetup::default())
            .unwrap_err();
        match err {
            ExperimentError::Instrument(ScpiError::Device(msg)) => {
                assert_eq!(msg, "output stage not responding");
            }
            other => panic!("expected the RF-off error, got {other}"),
        }
    }

    #[test]
    fn csv_has_one_row_per_sample() {
        let model = BenchModel::default();
        let (mut scope, mut synth) = bench(&model);
        let rec = run_measurement(&mut scope, &mut synth, &quick_run(), &PeakSearchSetup::default())
            .unwrap();
        let mut out = Vec::new();
        write_traces_csv(&mut out, &rec).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("time_s,comb_v,mod_v"));
        assert_eq!(lines.count(), model.samples);
    }
}
