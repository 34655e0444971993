use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::Rng;

use eom_resonance::mock::{lorentzian_lines, BenchModel, SimulatedBench};
use eom_resonance::peak_search::{find_peaks, PeakSearchSetup};
use eom_resonance::scope::Scope;
use eom_resonance::trace::Trace;

fn noisy_comb(len: usize, noise: f64) -> Vec<f64> {
    let mut rng = rand::thread_rng();
    let lines = [(700.0, 0.8), (2100.0, 0.8), (3500.0, 0.8), (4900.0, 0.8)];
    lorentzian_lines(len, &lines, 4.0)
        .into_iter()
        .map(|v| v + rng.gen_range(-noise..noise))
        .collect()
}

pub fn peak_finding(c: &mut Criterion) {
    let data = noisy_comb(6000, 0.004);
    c.bench_function("find_peaks 6k samples", |b| {
        b.iter(|| black_box(find_peaks(black_box(&data), 0.05, 10)));
    });

    let big = noisy_comb(1_200_000, 0.004);
    c.bench_function("find_peaks 1.2M samples", |b| {
        b.iter(|| black_box(find_peaks(black_box(&big), 0.05, 10)));
    });

    // spurious peaks force the threshold loop to step
    let search = PeakSearchSetup::default();
    let stepped = noisy_comb(6000, 0.04);
    c.bench_function("find_comb noisy", |b| {
        b.iter(|| black_box(search.find_comb(black_box(&stepped))));
    });
}

pub fn full_measurement(c: &mut Criterion) {
    let model = BenchModel::default();
    let (scope, synth) = SimulatedBench::new(&model);
    let mut scope = Scope::open(scope);
    let comb = scope.get_waveform(1).unwrap();
    synth_on(synth, &model);
    let modulated = scope.get_waveform(1).unwrap();
    let search = PeakSearchSetup::default();

    c.bench_function("measure", |b| {
        b.iter(|| black_box(search.measure(black_box(&comb), black_box(&modulated), 100.0e6)));
    });
    c.bench_function("trace time axis", |b| {
        b.iter(|| black_box(Trace::time_axis(black_box(&comb)).sum::<f64>()));
    });
}

fn synth_on(mut synth: eom_resonance::mock::SimulatedSynth, model: &BenchModel) {
    use eom_resonance::scpi::Transport;
    synth.write(&format!("C{}", model.rf_channel)).unwrap();
    synth.write("f100.0000000W5.000E1r1").unwrap();
}

criterion_group!(benches, peak_finding, full_measurement);
criterion_main!(benches);
