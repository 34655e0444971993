#![warn(clippy::pedantic)]
#![warn(clippy::all)]
#![allow(clippy::cast_precision_loss)]

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::{env, process};

use chrono::Local;

use eom_resonance::configs;
use eom_resonance::experiment::{run_measurement, write_traces_csv, RunSetup};
use eom_resonance::mock::SimulatedBench;
use eom_resonance::peak_search::{Measurement, PeakSearchSetup};
use eom_resonance::scope::Scope;
use eom_resonance::scpi::{ScpiResult, Transport};
use eom_resonance::synth::{run_power_sweep, SynthHd};
use eom_resonance::trace::Trace;
use eom_resonance::util::find_file;

const USAGE: &str = "usage: eom_resonance [measure|sweep] [--simulate] [--mod-freq <Hz>]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Measure,
    Sweep,
}

#[derive(Debug)]
struct Args {
    mode: Mode,
    simulate: bool,
    mod_freq_hz: Option<f64>,
}

impl Args {
    fn parse<I: Iterator<Item = String>>(mut args: I) -> Result<Self, String> {
        let mut out = Args {
            mode: Mode::Measure,
            simulate: false,
            mod_freq_hz: None,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "measure" => out.mode = Mode::Measure,
                "sweep" => out.mode = Mode::Sweep,
                "--simulate" => out.simulate = true,
                "--mod-freq" => {
                    let val = args.next().ok_or("--mod-freq needs a value in Hz")?;
                    out.mod_freq_hz = Some(
                        val.parse()
                            .map_err(|e| format!("bad --mod-freq {val:?}: {e}"))?,
                    );
                }
                other => return Err(format!("unknown argument {other:?}")),
            }
        }
        Ok(out)
    }
}

fn main() {
    let args = Args::parse(env::args().skip(1)).unwrap_or_else(|e| {
        eprintln!("{e}\n{USAGE}");
        process::exit(2);
    });

    let cfg = match find_file(Path::new("config.toml")) {
        Some(path) => {
            println!("[{}] Reading config file {}", Local::now(), path.display());
            configs::load_config(&path).expect("Failed to parse config file")
        }
        None => {
            eprintln!(
                "[{}] WARN: no config.toml found; proceeding with defaults",
                Local::now()
            );
            toml::Value::Table(toml::value::Table::new())
        }
    };

    if args.simulate || configs::simulate_from_config(&cfg) {
        println!("[{}] Running against the simulated bench", Local::now());
        let (scope, synth) = SimulatedBench::new(&configs::bench_from_config(&cfg));
        let synth = SynthHd::open(synth).expect("Failed to open simulated SynthHD");
        run(&args, &cfg, Scope::open(scope), synth);
    } else {
        run_hardware(&args, &cfg);
    }
}

#[cfg(all(feature = "visa", feature = "serial"))]
fn run_hardware(args: &Args, cfg: &toml::Value) {
    use eom_resonance::transport::{SerialTransport, VisaTransport};

    let addr = configs::addresses_from_config(cfg)
        .expect("Failed to read instrument addresses from config file");
    let scope = VisaTransport::open(&addr.scope_resource, addr.timeout)
        .expect("Failed to open oscilloscope");
    let synth = SerialTransport::open(&addr.synth_port, addr.synth_baud, addr.timeout)
        .expect("Failed to open SynthHD serial port");
    let synth = SynthHd::open(synth).expect("Failed to identify SynthHD");
    run(args, cfg, Scope::open(scope), synth);
}

#[cfg(not(all(feature = "visa", feature = "serial")))]
fn run_hardware(_args: &Args, _cfg: &toml::Value) {
    eprintln!(
        "[{}] Built without the `visa` and `serial` features; only --simulate is available",
        Local::now()
    );
    process::exit(1);
}

fn run<S: Transport, R: Transport>(
    args: &Args,
    cfg: &toml::Value,
    mut scope: Scope<S>,
    mut synth: SynthHd<R>,
) {
    match scope.identify() {
        Ok(idn) => println!("[{}] Scope: {}", Local::now(), idn),
        Err(e) => eprintln!("[{}] Scope did not identify: {}", Local::now(), e),
    }
    println!("[{}] Synthesizer: {}", Local::now(), synth.model());

    let search =
        configs::peak_search_from_config(cfg).expect("Failed to set up peak search from config file");
    match args.mode {
        Mode::Measure => measure(args, cfg, &mut scope, &mut synth, &search),
        Mode::Sweep => sweep(args, cfg, &mut scope, &mut synth, &search),
    }

    if let Err(e) = synth.close() {
        eprintln!("[{}] Failed to switch the RF output off: {}", Local::now(), e);
    }
}

fn measure<S: Transport, R: Transport>(
    args: &Args,
    cfg: &toml::Value,
    scope: &mut Scope<S>,
    synth: &mut SynthHd<R>,
    search: &PeakSearchSetup,
) {
    let mut run = configs::run_from_config(cfg).expect("Failed to set up run from config file");
    if let Some(f) = args.mod_freq_hz {
        run.modulation.frequency_hz = f;
    }
    println!(
        "[{}] Measuring with {:.3} MHz at {:.1} dBm on channel {}",
        Local::now(),
        run.modulation.frequency_hz / 1.0e6,
        run.modulation.power_dbm,
        run.modulation.channel
    );

    let record = match run_measurement(scope, synth, &run, search) {
        Ok(rec) => rec,
        Err(e) => {
            eprintln!("[{}] Measurement failed: {}", Local::now(), e);
            return;
        }
    };
    report(&record.measurement);

    if let Some(path) = configs::save_traces_from_config(cfg) {
        let written = File::create(path)
            .and_then(|f| write_traces_csv(&mut BufWriter::new(f), &record));
        match written {
            Ok(()) => println!("[{}] Traces saved to {}", Local::now(), path),
            Err(e) => eprintln!("[{}] Failed to save traces to {}: {}", Local::now(), path, e),
        }
    }
}

fn report(m: &Measurement) {
    println!(
        "[{}] Comb peaks {:?} (threshold {:.2} V, raised {} times)",
        Local::now(),
        m.comb.peaks,
        m.comb.min_height,
        m.comb.attempts
    );
    println!(
        "[{}] Resolution {:.1} kHz per sample",
        Local::now(),
        m.resolution_hz / 1.0e3
    );
    println!(
        "[{}] Zero order at {} / {}: {}",
        Local::now(),
        m.zero_order.position_1,
        m.zero_order.position_2,
        m.zero_order.amplitude
    );
    println!(
        "[{}] First order at {} (expected {}): {}",
        Local::now(),
        m.first_order.position,
        m.first_order.estimate,
        m.first_order.amplitude
    );
    if let Some(db) = m.sideband_ratio_db() {
        println!("[{}] Sideband ratio {:.2} dB", Local::now(), db);
    }
    if m.any_fallback() {
        eprintln!(
            "[{}] WARN: at least one amplitude is a fallback value, not a measurement",
            Local::now()
        );
    }
}

fn acquire_comb<S: Transport, R: Transport>(
    scope: &mut Scope<S>,
    synth: &mut SynthHd<R>,
    run: &RunSetup,
    rf_channel: u8,
) -> ScpiResult<Trace> {
    scope.configure_channel(&run.channel)?;
    scope.configure_trigger(&run.trigger)?;
    synth.select_channel(rf_channel)?;
    synth.set_enabled(false)?;
    scope.get_waveform(run.transmission_channel)
}

fn sweep<S: Transport, R: Transport>(
    args: &Args,
    cfg: &toml::Value,
    scope: &mut Scope<S>,
    synth: &mut SynthHd<R>,
    search: &PeakSearchSetup,
) {
    let run = configs::run_from_config(cfg).expect("Failed to set up run from config file");
    let mut sweep = configs::sweep_from_config(cfg).expect("Failed to set up sweep from config file");
    if let Some(f) = args.mod_freq_hz {
        sweep.frequency_hz = f;
    }

    let comb_trace = match acquire_comb(scope, synth, &run, sweep.channel) {
        Ok(tr) => tr,
        Err(e) => {
            eprintln!("[{}] Failed to acquire comb trace: {}", Local::now(), e);
            return;
        }
    };
    let (comb, resolution_hz) = match search
        .find_comb(comb_trace.samples())
        .and_then(|comb| search.resolution(&comb.peaks).map(|r| (comb, r)))
    {
        Ok(x) => x,
        Err(e) => {
            eprintln!("[{}] Comb calibration failed: {}", Local::now(), e);
            return;
        }
    };
    println!(
        "[{}] Comb {:?}, {:.1} kHz per sample; sweeping {} points from {} to {} dBm",
        Local::now(),
        comb.peaks,
        resolution_hz / 1.0e3,
        sweep.points,
        sweep.start_dbm,
        sweep.stop_dbm
    );

    let result = run_power_sweep(synth, &sweep, |i, dbm| {
        let trace = scope.get_waveform(run.transmission_channel)?;
        let data = trace.samples();
        let mod_peaks = search.find_modulation_peaks(data);
        let orders = search
            .measure_zero_order(data, &comb.peaks, &mod_peaks, resolution_hz)
            .and_then(|zero| {
                search
                    .measure_first_order(data, &comb.peaks, &mod_peaks, sweep.frequency_hz, resolution_hz)
                    .map(|first| (zero, first))
            });
        match orders {
            Ok((zero, first)) => println!(
                "[{}] step {:>3}: {:>7.2} dBm  zero order {}  first order {}",
                Local::now(),
                i,
                dbm,
                zero.amplitude,
                first.amplitude
            ),
            Err(e) => eprintln!("[{}] step {:>3}: {:>7.2} dBm  {}", Local::now(), i, dbm, e),
        }
        Ok(())
    });
    match result {
        Ok(()) => println!("[{}] Sweep finished", Local::now()),
        Err(e) => eprintln!("[{}] Sweep aborted: {}", Local::now(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, String> {
        Args::parse(args.iter().map(|s| (*s).to_owned()))
    }

    #[test]
    fn arguments() {
        let a = parse(&[]).unwrap();
        assert_eq!(a.mode, Mode::Measure);
        assert!(!a.simulate);

        let a = parse(&["sweep", "--simulate", "--mod-freq", "2.5e8"]).unwrap();
        assert_eq!(a.mode, Mode::Sweep);
        assert!(a.simulate);
        assert_eq!(a.mod_freq_hz, Some(2.5e8));

        assert!(parse(&["--mod-freq"]).is_err());
        assert!(parse(&["--mod-freq", "fast"]).is_err());
        assert!(parse(&["calibrate"]).is_err());
    }
}
