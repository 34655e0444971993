#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc
)]

use std::fs::read_to_string;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use gethostname::gethostname;

use crate::experiment::RunSetup;
use crate::mock::BenchModel;
use crate::peak_search::PeakSearchSetup;
use crate::scope::{ChannelSetup, Coupling, Slope, TriggerMode, TriggerSetup};
use crate::synth::{ModulationSetup, PowerSweep};
use crate::util::{tomlget, tomlget_opt, tomlget_or};

/// Where the instruments of this lab PC live. Read from the section named after the host, so one
/// config file can serve several setups.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentAddresses {
    pub scope_resource: String,
    pub synth_port: String,
    pub synth_baud: u32,
    pub timeout: Duration,
}

pub fn load_config(path: &Path) -> Result<toml::Value, String> {
    let text = read_to_string(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    text.parse::<toml::Value>()
        .map_err(|e| format!("failed to parse {}: {e}", path.display()))
}

fn parse_setting<T: FromStr<Err = String>>(value: &str) -> Result<T, String> {
    value.parse::<T>()
}

pub fn hostname() -> Result<String, String> {
    gethostname()
        .into_string()
        .map_err(|_| "failed to get hostname".to_owned())
}

pub fn simulate_from_config(cfg: &toml::Value) -> bool {
    tomlget_or!(cfg, "general", "simulate", as_bool, false)
}

/// CSV path for the traces of a `measure` run, if any.
pub fn save_traces_from_config(cfg: &toml::Value) -> Option<&str> {
    tomlget_opt!(cfg, "general", "save_traces", as_str)
}

pub fn peak_search_from_config(cfg: &toml::Value) -> Result<PeakSearchSetup, String> {
    let d = PeakSearchSetup::default();
    let sec = "peak_search";
    let out = PeakSearchSetup {
        fsr_hz: tomlget_or!(cfg, sec, "fsr_hz", as_float, f64, d.fsr_hz),
        expected_comb_peaks: tomlget_or!(
            cfg,
            sec,
            "expected_comb_peaks",
            as_integer,
            usize,
            d.expected_comb_peaks
        ),
        comb_min_height: tomlget_or!(cfg, sec, "comb_min_height", as_float, f64, d.comb_min_height),
        comb_height_step: tomlget_or!(
            cfg,
            sec,
            "comb_height_step",
            as_float,
            f64,
            d.comb_height_step
        ),
        comb_initial_distance: tomlget_or!(
            cfg,
            sec,
            "comb_initial_distance",
            as_integer,
            usize,
            d.comb_initial_distance
        ),
        comb_refine_distance: tomlget_or!(
            cfg,
            sec,
            "comb_refine_distance",
            as_integer,
            usize,
            d.comb_refine_distance
        ),
        max_threshold_steps: tomlget_or!(
            cfg,
            sec,
            "max_threshold_steps",
            as_integer,
            u32,
            d.max_threshold_steps
        ),
        mod_min_height: tomlget_or!(cfg, sec, "mod_min_height", as_float, f64, d.mod_min_height),
        mod_distance: tomlget_or!(cfg, sec, "mod_distance", as_integer, usize, d.mod_distance),
        zero_order_tolerance_hz: tomlget_or!(
            cfg,
            sec,
            "zero_order_tolerance_MHz",
            as_float,
            f64,
            d.zero_order_tolerance_hz / 1.0e6
        ) * 1.0e6,
        first_order_tolerance_hz: tomlget_or!(
            cfg,
            sec,
            "first_order_tolerance_MHz",
            as_float,
            f64,
            d.first_order_tolerance_hz / 1.0e6
        ) * 1.0e6,
        zero_order_fallback: tomlget_or!(
            cfg,
            sec,
            "zero_order_fallback_v",
            as_float,
            f64,
            d.zero_order_fallback
        ),
        first_order_fallback: tomlget_or!(
            cfg,
            sec,
            "first_order_fallback_v",
            as_float,
            f64,
            d.first_order_fallback
        ),
    };
    if out.expected_comb_peaks < 3 {
        return Err(format!(
            "peak_search:expected_comb_peaks must be at least 3, got {}",
            out.expected_comb_peaks
        ));
    }
    if out.fsr_hz <= 0.0 {
        return Err("peak_search:fsr_hz must be positive".into());
    }
    Ok(out)
}

pub fn channel_from_config(cfg: &toml::Value) -> Result<ChannelSetup, String> {
    let d = ChannelSetup::default();
    Ok(ChannelSetup {
        channel: tomlget_or!(cfg, "scope", "channel", as_integer, u8, d.channel),
        scale_v: tomlget_or!(cfg, "scope", "scale_v", as_float, f64, d.scale_v),
        offset_v: tomlget_or!(cfg, "scope", "offset_v", as_float, f64, d.offset_v),
        timebase_s: tomlget_or!(cfg, "scope", "timebase_s", as_float, f64, d.timebase_s),
        time_offset_s: tomlget_or!(cfg, "scope", "time_offset_s", as_float, f64, d.time_offset_s),
        coupling: parse_setting::<Coupling>(tomlget_or!(cfg, "scope", "coupling", as_str, "DC"))?,
    })
}

pub fn trigger_from_config(cfg: &toml::Value) -> Result<TriggerSetup, String> {
    let d = TriggerSetup::default();
    Ok(TriggerSetup {
        source_channel: tomlget_or!(
            cfg,
            "trigger",
            "source_channel",
            as_integer,
            u8,
            d.source_channel
        ),
        level_v: tomlget_or!(cfg, "trigger", "level_v", as_float, f64, d.level_v),
        mode: parse_setting::<TriggerMode>(tomlget_or!(cfg, "trigger", "mode", as_str, "EDGE"))?,
        slope: parse_setting::<Slope>(tomlget_or!(cfg, "trigger", "slope", as_str, "POS"))?,
        coupling: parse_setting::<Coupling>(tomlget_or!(cfg, "trigger", "coupling", as_str, "DC"))?,
    })
}

pub fn modulation_from_config(cfg: &toml::Value) -> Result<ModulationSetup, String> {
    let d = ModulationSetup::default();
    let out = ModulationSetup {
        channel: tomlget_or!(cfg, "synth", "channel", as_integer, u8, d.channel),
        frequency_hz: tomlget_or!(
            cfg,
            "synth",
            "frequency_MHz",
            as_float,
            f64,
            d.frequency_hz / 1.0e6
        ) * 1.0e6,
        power_dbm: tomlget_or!(cfg, "synth", "power_dbm", as_float, f64, d.power_dbm),
    };
    if out.channel > 1 {
        return Err(format!("synth:channel must be 0 or 1, got {}", out.channel));
    }
    Ok(out)
}

pub fn sweep_from_config(cfg: &toml::Value) -> Result<PowerSweep, String> {
    let d = PowerSweep::default();
    let dwell_s = tomlget_or!(cfg, "sweep", "dwell_s", as_float, f64, d.dwell.as_secs_f64());
    Ok(PowerSweep {
        channel: tomlget_or!(cfg, "synth", "channel", as_integer, u8, d.channel),
        frequency_hz: tomlget_or!(
            cfg,
            "sweep",
            "frequency_MHz",
            as_float,
            f64,
            d.frequency_hz / 1.0e6
        ) * 1.0e6,
        initial_dbm: tomlget_or!(cfg, "sweep", "initial_dbm", as_float, f64, d.initial_dbm),
        start_dbm: tomlget_or!(cfg, "sweep", "start_dbm", as_float, f64, d.start_dbm),
        stop_dbm: tomlget_or!(cfg, "sweep", "stop_dbm", as_float, f64, d.stop_dbm),
        points: tomlget_or!(cfg, "sweep", "points", as_integer, usize, d.points),
        dwell: Duration::try_from_secs_f64(dwell_s)
            .map_err(|e| format!("sweep:dwell_s {dwell_s}: {e}"))?,
        park_dbm: tomlget_or!(cfg, "sweep", "park_dbm", as_float, f64, d.park_dbm),
    })
}

pub fn run_from_config(cfg: &toml::Value) -> Result<RunSetup, String> {
    let channel = channel_from_config(cfg)?;
    let settle_ms = tomlget_or!(cfg, "general", "settle_time_ms", as_integer, u64, 200);
    Ok(RunSetup {
        transmission_channel: channel.channel,
        channel,
        trigger: trigger_from_config(cfg)?,
        modulation: modulation_from_config(cfg)?,
        settle: Duration::from_millis(settle_ms),
    })
}

pub fn bench_from_config(cfg: &toml::Value) -> BenchModel {
    let d = BenchModel::default();
    let sec = "simulation";
    BenchModel {
        samples: tomlget_or!(cfg, sec, "samples", as_integer, usize, d.samples),
        comb_start: tomlget_or!(cfg, sec, "comb_start", as_float, f64, d.comb_start),
        comb_spacing: tomlget_or!(cfg, sec, "comb_spacing", as_float, f64, d.comb_spacing),
        peak_volts: tomlget_or!(cfg, sec, "peak_volts", as_float, f64, d.peak_volts),
        beta_per_volt: tomlget_or!(cfg, sec, "beta_per_volt", as_float, f64, d.beta_per_volt),
        noise_volts: tomlget_or!(cfg, sec, "noise_volts", as_float, f64, d.noise_volts),
        drift_samples: tomlget_or!(cfg, sec, "drift_samples", as_float, f64, d.drift_samples),
        seed: tomlget_opt!(cfg, sec, "seed", as_integer, u64).unwrap_or(d.seed),
        ..d
    }
}

pub fn addresses_from_config(cfg: &toml::Value) -> Result<InstrumentAddresses, String> {
    let hostname = hostname()?;
    let hostname = hostname.as_str();
    addresses_for_host(cfg, hostname)
}

pub fn addresses_for_host(cfg: &toml::Value, host: &str) -> Result<InstrumentAddresses, String> {
    Ok(InstrumentAddresses {
        scope_resource: tomlget!(cfg, host, "scope_resource", as_str).to_owned(),
        synth_port: tomlget!(cfg, host, "synth_port", as_str).to_owned(),
        synth_baud: tomlget_or!(cfg, host, "synth_baud", as_integer, u32, 115_200),
        timeout: Duration::from_millis(tomlget_or!(
            cfg,
            host,
            "timeout_ms",
            as_integer,
            u64,
            2000
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [general]
        simulate = true
        settle_time_ms = 50

        [peak_search]
        fsr_hz = 1.5e9
        expected_comb_peaks = 5
        zero_order_tolerance_MHz = 25.0
        first_order_fallback_v = 0.03

        [scope]
        channel = 2
        scale_v = 0.2
        timebase_s = 0.005
        coupling = "AC"

        [trigger]
        source_channel = 4
        level_v = 1.5
        slope = "NEG"

        [synth]
        channel = 1
        frequency_MHz = 250.0
        power_dbm = 8.0

        [sweep]
        start_dbm = -20.0
        points = 11
        dwell_s = 0.5

        [labpc-01]
        scope_resource = "USB0::0x1AB1::0x04CE::DS1ZA1234::INSTR"
        synth_port = "/dev/ttyACM0"
    "#;

    fn cfg() -> toml::Value {
        SAMPLE.parse().unwrap()
    }

    #[test]
    fn peak_search_overrides_and_defaults() {
        let ps = peak_search_from_config(&cfg()).unwrap();
        assert_eq!(ps.fsr_hz, 1.5e9);
        assert_eq!(ps.expected_comb_peaks, 5);
        assert_eq!(ps.zero_order_tolerance_hz, 25.0e6);
        assert_eq!(ps.first_order_tolerance_hz, 40.0e6);
        assert_eq!(ps.first_order_fallback, 0.03);
        assert_eq!(ps.comb_min_height, 0.05);
        assert_eq!(ps.max_threshold_steps, 50);
    }

    #[test]
    fn peak_search_rejects_short_comb() {
        let cfg: toml::Value = "[peak_search]\nexpected_comb_peaks = 2\n".parse().unwrap();
        assert!(peak_search_from_config(&cfg).is_err());
    }

    #[test]
    fn run_setup() {
        let run = run_from_config(&cfg()).unwrap();
        assert_eq!(run.transmission_channel, 2);
        assert_eq!(run.channel.coupling, Coupling::Ac);
        assert_eq!(run.channel.offset_v, 0.0);
        assert_eq!(run.trigger.slope, Slope::Negative);
        assert_eq!(run.trigger.level_v, 1.5);
        assert_eq!(run.modulation.channel, 1);
        assert_eq!(run.modulation.frequency_hz, 250.0e6);
        assert_eq!(run.settle, Duration::from_millis(50));
    }

    #[test]
    fn bad_enum_setting_is_an_error() {
        let cfg: toml::Value = "[scope]\ncoupling = \"XY\"\n".parse().unwrap();
        assert!(channel_from_config(&cfg).is_err());
    }

    #[test]
    fn sweep() {
        let sweep = sweep_from_config(&cfg()).unwrap();
        assert_eq!(sweep.channel, 1);
        assert_eq!(sweep.start_dbm, -20.0);
        assert_eq!(sweep.stop_dbm, 0.0);
        assert_eq!(sweep.points, 11);
        assert_eq!(sweep.dwell, Duration::from_millis(500));
        assert_eq!(sweep.frequency_hz, 100.0e6);
    }

    #[test]
    fn addresses_come_from_host_section() {
        let cfg = cfg();
        let addr = addresses_for_host(&cfg, "labpc-01").unwrap();
        assert_eq!(addr.synth_port, "/dev/ttyACM0");
        assert_eq!(addr.synth_baud, 115_200);
        assert_eq!(addr.timeout, Duration::from_secs(2));
        assert_eq!(
            addresses_for_host(&cfg, "otherpc"),
            Err("failed to get section otherpc".to_owned())
        );
    }

    #[test]
    fn simulation_model() {
        let cfg = cfg();
        assert!(simulate_from_config(&cfg));
        assert_eq!(save_traces_from_config(&cfg), None);
        assert_eq!(bench_from_config(&cfg), BenchModel::default());
    }
}
