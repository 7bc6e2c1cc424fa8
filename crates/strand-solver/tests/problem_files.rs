/// Problems read from the JSON files shipped in `problems/`
use approx::assert_relative_eq;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use strand_solver::{DofId, ProblemDefinition};

fn problem(name: &str) -> ProblemDefinition {
    let path: PathBuf = [env!("CARGO_MANIFEST_DIR"), "..", "..", "problems", name]
        .iter()
        .collect();
    ProblemDefinition::from_file(&path).unwrap()
}

/// Load factor in equilibrium with apex deflection `v` of the shallow truss
/// (half span 1, rise 0.5, EA = 1000, unit downward reference load)
fn von_mises_load_factor(v: f64) -> f64 {
    let (rise, ea) = (0.5_f64, 1000.0);
    let l0 = (1.0 + rise * rise).sqrt();
    let y = rise + v;
    let l = (1.0 + y * y).sqrt();
    let n = ea * (l - l0) / l0;
    -n * y / l
}

#[test]
fn yielding_spring_file_runs_configured_steps() {
    let definition = problem("yielding_spring.json");
    let steps = definition.analysis.steps.unwrap();
    let mut analysis = definition.build_analysis().unwrap();
    let reports = analysis.analyze(steps).unwrap();

    assert_eq!(reports.len(), 5);
    assert_relative_eq!(
        analysis
            .model()
            .committed_displacement(DofId::new(2, 0))
            .unwrap(),
        0.1,
        epsilon = 1e-12
    );
    assert_relative_eq!(
        reports[4].load_factor,
        5.0 + 0.05 * 1000.0 / 110.0,
        epsilon = 1e-8
    );
}

#[test]
fn arc_length_passes_snap_through_limit_point() {
    let definition = problem("von_mises_truss.json");
    let steps = definition.analysis.steps.unwrap();
    let mut analysis = definition.build_analysis().unwrap();

    let path = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&path);
    analysis.set_step_observer(move |report, model| {
        let v = model.committed_displacement(DofId::new(2, 1)).unwrap();
        sink.lock().unwrap().push((v, report.load_factor));
    });
    analysis.analyze(steps).unwrap();

    let path = path.lock().unwrap();
    assert_eq!(path.len(), 12);
    for &(v, lambda) in path.iter() {
        assert_relative_eq!(lambda, von_mises_load_factor(v), epsilon = 1e-6);
    }
    // deflection grows monotonically while the load factor goes over the top
    assert!(path.windows(2).all(|w| w[1].0 < w[0].0));
    let peak = path.iter().map(|p| p.1).fold(f64::MIN, f64::max);
    assert!(peak > 18.9 && peak < 19.1, "peak λ = {peak}");
    assert!(path.last().unwrap().1 < peak - 5.0);
}

#[test]
fn definition_survives_serialization() {
    for name in ["yielding_spring.json", "von_mises_truss.json"] {
        let definition = problem(name);
        let again = ProblemDefinition::from_json_str(&definition.to_json().unwrap()).unwrap();
        assert_eq!(definition, again);
    }
}
