/// Transient response with the Newmark integrator
use approx::assert_relative_eq;
use std::f64::consts::PI;
use strand_solver::{
    Analysis, AnalysisError, AnalysisState, Criterion, CriterionTest, DofId, Elastic, LoadPattern,
    Model, NodalLoad, Newmark, Node, RayleighDamping, RecoveryPolicy, Spring, TimeSeries,
};

/// Unit mass on a grounded spring with ω = 2π, step load P applied at t = 0
fn oscillator(load: f64, damping: Option<RayleighDamping>) -> Model {
    let k = 4.0 * PI * PI;
    let mut model = Model::new();
    model
        .add_node(Node::new(1, 0.0, 0.0, 0.0, 1).with_mass(vec![1.0]))
        .unwrap();
    model
        .add_element(Box::new(Spring::grounded(
            1,
            DofId::new(1, 0),
            Box::new(Elastic::new(k).unwrap()),
        )))
        .unwrap();
    model
        .add_load_pattern(LoadPattern {
            series: TimeSeries::Constant { factor: 1.0 },
            loads: vec![NodalLoad {
                dof: DofId::new(1, 0),
                value: load,
            }],
        })
        .unwrap();
    if let Some(damping) = damping {
        model.set_rayleigh_damping(damping);
    }
    model
}

fn run(model: Model, dt: f64, steps: usize) -> Analysis {
    let mut analysis = Analysis::new(model);
    analysis
        .set_convergence_test(Box::new(CriterionTest::new(
            Criterion::norm_unbalance(1e-9),
            10,
        )))
        .unwrap();
    analysis
        .set_integrator(Box::new(Newmark::average_acceleration(dt).unwrap()))
        .unwrap();
    analysis.analyze(steps).unwrap();
    analysis
}

#[test]
fn step_load_response_of_undamped_oscillator() {
    // u(t) = (P/k)(1 − cos ωt): peak 2P/k at t = T/2, back to zero at t = T
    let load = 1.0;
    let static_u = load / (4.0 * PI * PI);
    let dof = DofId::new(1, 0);

    let mut analysis = run(oscillator(load, None), 0.01, 50);
    let half = analysis.model().committed_displacement(dof).unwrap();
    assert_relative_eq!(half, 2.0 * static_u, max_relative = 2e-3);

    analysis.analyze(50).unwrap();
    let full = analysis.model().committed_displacement(dof).unwrap();
    assert!(full.abs() < 2e-3 * static_u, "u(T) = {full}");

    let time = analysis.integrator().unwrap().load_path().committed;
    assert_relative_eq!(time, 1.0, epsilon = 1e-9);
    assert_relative_eq!(analysis.model().state().committed().time, 1.0, epsilon = 1e-9);
}

#[test]
fn linear_problem_converges_in_one_iteration_per_step() {
    let analysis = run(oscillator(1.0, None), 0.05, 10);
    assert!(analysis.history().iter().all(|r| r.iterations == 1));
}

#[test]
fn damping_settles_at_static_deflection() {
    // mass-proportional damping, ζ = α_M / (2ω) ≈ 0.32
    let load = 2.0;
    let static_u = load / (4.0 * PI * PI);
    let damping = RayleighDamping {
        alpha_m: 4.0,
        beta_k: 0.0,
    };
    let analysis = run(oscillator(load, Some(damping)), 0.02, 500);
    let u = analysis
        .model()
        .committed_displacement(DofId::new(1, 0))
        .unwrap();
    assert_relative_eq!(u, static_u, max_relative = 1e-3);
}

#[test]
fn initial_acceleration_balances_load() {
    let mut analysis = Analysis::new(oscillator(3.0, None));
    analysis
        .set_integrator(Box::new(Newmark::average_acceleration(0.01).unwrap()))
        .unwrap();
    assert_relative_eq!(
        analysis.model().state().committed().acceleration[0],
        3.0,
        epsilon = 1e-12
    );
}

#[test]
fn explicit_newmark_is_rejected_when_stepped() {
    let mut analysis = Analysis::new(oscillator(1.0, None));
    analysis
        .set_integrator(Box::new(Newmark::new(0.5, 0.0, 0.01).unwrap()))
        .unwrap();
    analysis
        .set_recovery_policy(RecoveryPolicy::halving(3))
        .unwrap();

    assert!(matches!(
        analysis.step(),
        Err(AnalysisError::InvalidConfiguration(_))
    ));
    assert_eq!(analysis.state(), AnalysisState::Failed);
    let path = analysis.integrator().unwrap().load_path();
    assert_eq!(path.committed, 0.0);
    assert_eq!(path.increment, 0.01);
}
