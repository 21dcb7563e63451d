use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use spectral_pipeline::snv::apply_snv;
use spectral_pipeline::vip::VipSelector;
use spectral_pipeline::{PcaSolver, PipelineConfig, PropertyMatrix, SpectralMatrix, SpectralPipeline, PCA};

// Smooth baseline plus noise, roughly the shape of an absorbance spectrum.
fn generate_spectra(n_samples: usize, n_wavelengths: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Array::random_using((n_samples, n_wavelengths), Uniform::new(-0.05, 0.05), &mut rng);
    let offsets = Array::random_using(n_samples, Uniform::new(0.2, 1.5), &mut rng);
    Array2::from_shape_fn((n_samples, n_wavelengths), |(i, j)| {
        let x = j as f64 / n_wavelengths as f64;
        offsets[i] + (6.0 * x).sin() * 0.4 + noise[[i, j]]
    })
}

fn generate_properties(spectra: &Array2<f64>, n_properties: usize) -> Array2<f64> {
    Array2::from_shape_fn((spectra.nrows(), n_properties), |(i, p)| {
        spectra[[i, (p * 7) % spectra.ncols()]] * 3.0 + p as f64
    })
}

fn bench_snv(c: &mut Criterion) {
    let mut group = c.benchmark_group("SNV");
    for &(n_samples, n_wavelengths) in [(100, 256), (500, 1024), (2000, 1024)].iter() {
        let data = generate_spectra(n_samples, n_wavelengths, 1);
        group.throughput(Throughput::Elements((n_samples * n_wavelengths) as u64));
        group.bench_with_input(
            BenchmarkId::new("apply_snv", format!("{}x{}", n_samples, n_wavelengths)),
            &data,
            |b, data| b.iter(|| apply_snv(data.view())),
        );
    }
    group.finish();
}

fn bench_vip(c: &mut Criterion) {
    let mut group = c.benchmark_group("VIP");
    group.sample_size(20);
    for &(n_samples, n_wavelengths) in [(100, 256), (300, 1024)].iter() {
        let spectra = apply_snv(generate_spectra(n_samples, n_wavelengths, 2).view());
        let targets = generate_properties(&spectra, 3);
        let selector = VipSelector::new(100, 10);
        group.throughput(Throughput::Elements((n_samples * n_wavelengths) as u64));
        group.bench_with_input(
            BenchmarkId::new("fit_select", format!("{}x{}", n_samples, n_wavelengths)),
            &(spectra, targets),
            |b, (x, y)| b.iter(|| selector.fit_select(x.view(), y.view()).unwrap()),
        );
    }
    group.finish();
}

fn bench_pca(c: &mut Criterion) {
    let mut group = c.benchmark_group("PCA_fit");
    let randomized = PcaSolver::Randomized {
        n_oversamples: 10,
        n_power_iterations: 2,
        seed: 42,
    };
    for &(n_samples, n_features) in [(200, 100), (1000, 100), (100, 400)].iter() {
        let data = generate_spectra(n_samples, n_features, 3);
        group.throughput(Throughput::Elements((n_samples * n_features) as u64));
        for (name, solver) in [("full", PcaSolver::Full), ("randomized", randomized)] {
            group.bench_with_input(
                BenchmarkId::new(name, format!("{}x{}", n_samples, n_features)),
                &data,
                |b, data| {
                    b.iter_with_setup(PCA::new, |mut pca| pca.fit(data.view(), 32, &solver).unwrap())
                },
            );
        }
    }
    group.finish();
}

fn bench_pipeline_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_fit");
    group.sample_size(10);
    let raw = generate_spectra(300, 512, 4);
    let targets = generate_properties(&raw, 4);
    let spectra = SpectralMatrix::new(raw, Vec::new()).unwrap();
    let properties = PropertyMatrix::new(targets, Vec::new()).unwrap();
    let pipeline = SpectralPipeline::new(PipelineConfig::default()).unwrap();
    group.bench_function("300x512", |b| {
        b.iter(|| pipeline.fit(&spectra, &properties).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_snv, bench_vip, bench_pca, bench_pipeline_fit);
criterion_main!(benches);
