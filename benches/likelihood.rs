use criterion::{black_box, criterion_group, criterion_main, Criterion};
use uvlens::{
    Config, LensLikelihood, LikelihoodMethod, ObservationSet, ParameterRegistry, PhaseCenter,
    RegionGeometry, Visibilities,
};

const CONFIG: &str = r#"
visibility_files = ["unused.json"]

[image]
cdelt1 = -0.00002777777777777778

[[regions]]
ra = 150.0
dec = 2.0
extent = 2.0
oversample = 2

[[regions.lenses]]
EinsteinRadius = { bounds = [0.1, 2.0], init = [0.5, 0.7] }
DeltaRA = { bounds = [-0.5, 0.5], init = [-0.05, 0.05] }
DeltaDec = { bounds = [-0.5, 0.5], init = [-0.05, 0.05] }
AxialRatio = { bounds = [0.3, 1.0], init = [0.7, 0.9] }
PositionAngle = { bounds = [0.0, 180.0], init = [10.0, 50.0] }

[[regions.sources]]
IntrinsicFlux = { bounds = [0.0, 5.0], init = [0.9, 1.1] }
Size = { bounds = [0.05, 1.0], init = [0.25, 0.35] }
DeltaRA = { bounds = [-0.5, 0.5], init = [-0.05, 0.05] }
DeltaDec = { bounds = [-0.5, 0.5], init = [-0.05, 0.05] }
AxialRatio = { bounds = [0.2, 1.0], init = [0.8, 1.0] }
PositionAngle = { bounds = [0.0, 180.0], init = [0.0, 180.0] }
"#;

fn make_likelihood(n: usize) -> LensLikelihood {
    let config = Config::from_toml_str(CONFIG).unwrap();
    let registry = ParameterRegistry::from_config(&config.regions).unwrap();
    let regions: Vec<RegionGeometry> = config
        .regions
        .iter()
        .map(|r| RegionGeometry::new(r, config.image.cell_size()).unwrap())
        .collect();
    let data = Visibilities {
        u: (0..n).map(|k| 4e4 * (k as f64 * 0.31).cos()).collect(),
        v: (0..n).map(|k| 4e4 * (k as f64 * 0.31).sin()).collect(),
        real: vec![0.5; n],
        imag: vec![0.; n],
        weight: vec![1.; n],
    };
    let observations = ObservationSet::new(data, PhaseCenter { ra: 150., dec: 2. }).unwrap();
    LensLikelihood::new(registry, regions, observations, LikelihoodMethod::ChiSquare).unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    let position = [0.6, 0., 0., 0.8, 30., 1., 0.3, 0.02, -0.01, 0.9, 60.];

    let likelihood = make_likelihood(100);
    c.bench_function("evaluate lensed 100 points", |b| {
        b.iter(|| likelihood.evaluate(black_box(&position)).unwrap())
    });

    let likelihood = make_likelihood(5000);
    c.bench_function("evaluate lensed 5000 points", |b| {
        b.iter(|| likelihood.evaluate(black_box(&position)).unwrap())
    });

    let geometry = &likelihood.regions()[0];
    c.bench_function("render lensed region", |b| {
        b.iter(|| geometry.render(black_box(&position)).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
