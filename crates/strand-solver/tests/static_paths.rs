/// Static load paths driven end to end through `Analysis`
///
/// Load control, displacement control and arc-length control on springs
/// with closed-form answers.
use approx::assert_relative_eq;
use strand_solver::{
    Analysis, AnalysisError, AnalysisState, ArcLength, Bilinear, Criterion, CriterionTest,
    DisplacementControl, DofId, Elastic, LoadControl, LoadPattern, Model, NodalLoad, Node,
    Spring, UniaxialMaterial,
};

/// Node 1 fixed, node 2 free, one spring between them, load at node 2
fn spring_model(material: Box<dyn UniaxialMaterial>, load: f64) -> Model {
    let mut model = Model::new();
    model.add_node(Node::new(1, 0.0, 0.0, 0.0, 1)).unwrap();
    model.add_node(Node::new(2, 1.0, 0.0, 0.0, 1)).unwrap();
    model.fix(DofId::new(1, 0)).unwrap();
    model
        .add_element(Box::new(Spring::between(
            1,
            DofId::new(1, 0),
            DofId::new(2, 0),
            material,
        )))
        .unwrap();
    model
        .add_load_pattern(LoadPattern {
            loads: vec![NodalLoad {
                dof: DofId::new(2, 0),
                value: load,
            }],
            ..Default::default()
        })
        .unwrap();
    model
}

fn tip() -> DofId {
    DofId::new(2, 0)
}

#[test]
fn load_control_follows_linear_spring() {
    // k = 100, ΔP = 10 per step → u = 0.1·step
    let mut analysis = Analysis::new(spring_model(Box::new(Elastic::new(100.0).unwrap()), 10.0));
    analysis
        .set_integrator(Box::new(LoadControl::new(1.0).unwrap()))
        .unwrap();

    let mut displacements = Vec::new();
    for _ in 0..5 {
        let report = analysis.step().unwrap();
        assert_eq!(report.iterations, 1);
        assert_eq!(report.retries, 0);
        assert_relative_eq!(report.increment, 1.0, epsilon = 1e-12);
        displacements.push(analysis.model().committed_displacement(tip()).unwrap());
    }
    assert_eq!(analysis.state(), AnalysisState::Converged);
    for (u, expected) in displacements.iter().zip([0.1, 0.2, 0.3, 0.4, 0.5]) {
        assert_relative_eq!(*u, expected, epsilon = 1e-12);
    }

    let path = analysis.integrator().unwrap().load_path();
    assert_eq!(path.history, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    let steps: Vec<usize> = analysis.history().iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![1, 2, 3, 4, 5]);
}

#[test]
fn zero_iteration_cap_leaves_committed_state_untouched() {
    let mut analysis = Analysis::new(spring_model(Box::new(Elastic::new(100.0).unwrap()), 10.0));
    analysis
        .set_convergence_test(Box::new(CriterionTest::new(
            Criterion::norm_unbalance(1e-8).relative(),
            0,
        )))
        .unwrap();
    analysis
        .set_integrator(Box::new(LoadControl::new(1.0).unwrap()))
        .unwrap();

    assert!(matches!(
        analysis.step(),
        Err(AnalysisError::ConvergenceFailure { step: 1, .. })
    ));
    assert_eq!(analysis.model().committed_displacement(tip()).unwrap(), 0.0);
    assert_eq!(analysis.model().displacement(tip()).unwrap(), 0.0);
}

#[test]
fn load_control_reactions_balance_applied_load() {
    let mut analysis = Analysis::new(spring_model(Box::new(Elastic::new(100.0).unwrap()), 10.0));
    analysis
        .set_integrator(Box::new(LoadControl::new(1.0).unwrap()))
        .unwrap();
    analysis.step().unwrap();

    let reactions = analysis.model().reactions();
    assert_eq!(reactions.len(), 1);
    assert_relative_eq!(reactions[&DofId::new(1, 0)], -10.0, epsilon = 1e-9);
}

#[test]
fn displacement_control_traces_yielding_spring() {
    // E = 100, fy = 5, H = 10: post-yield stiffness 100·10/110
    let material = Box::new(Bilinear::new(100.0, 5.0, 10.0).unwrap());
    let mut analysis = Analysis::new(spring_model(material, 1.0));
    analysis
        .set_convergence_test(Box::new(CriterionTest::new(
            Criterion::norm_unbalance(1e-9),
            25,
        )))
        .unwrap();
    analysis
        .set_integrator(Box::new(
            DisplacementControl::new(tip(), 0.02).unwrap(),
        ))
        .unwrap();

    for step in 1..=5 {
        analysis.step().unwrap();
        assert_relative_eq!(
            analysis.model().committed_displacement(tip()).unwrap(),
            0.02 * step as f64,
            epsilon = 1e-12
        );
    }

    let lambda = analysis.integrator().unwrap().load_path().committed;
    let expected = 5.0 + 0.05 * (100.0 * 10.0 / 110.0);
    assert_relative_eq!(lambda, expected, epsilon = 1e-8);
}

#[test]
fn displacement_control_rejects_constrained_dof() {
    let mut analysis = Analysis::new(spring_model(Box::new(Elastic::new(100.0).unwrap()), 1.0));
    let result = analysis.set_integrator(Box::new(
        DisplacementControl::new(DofId::new(1, 0), 0.01).unwrap(),
    ));
    assert!(matches!(result, Err(AnalysisError::InvalidConfiguration(_))));
    assert!(analysis.integrator().is_none());
}

#[test]
fn arc_length_matches_closed_form_on_linear_spring() {
    // Û = P/k = 0.1, Δλ = Δl / √(Û² + α²)
    let (k, p, dl, alpha) = (100.0, 10.0, 0.1, 1.0);
    let mut analysis = Analysis::new(spring_model(Box::new(Elastic::new(k).unwrap()), p));
    analysis
        .set_convergence_test(Box::new(CriterionTest::new(
            Criterion::norm_unbalance(1e-8),
            10,
        )))
        .unwrap();
    analysis
        .set_integrator(Box::new(ArcLength::new(dl, alpha).unwrap()))
        .unwrap();

    let reports = analysis.analyze(3).unwrap();
    let u_hat: f64 = p / k;
    let d_lambda = dl / (u_hat * u_hat + alpha * alpha).sqrt();
    for (i, report) in reports.iter().enumerate() {
        assert_relative_eq!(report.increment, d_lambda, epsilon = 1e-10);
        assert_relative_eq!(report.load_factor, d_lambda * (i + 1) as f64, epsilon = 1e-10);
    }
    assert_relative_eq!(
        analysis.model().committed_displacement(tip()).unwrap(),
        3.0 * d_lambda * u_hat,
        epsilon = 1e-10
    );
}

#[test]
fn arc_length_keeps_direction_past_yield() {
    let material = Box::new(Bilinear::new(100.0, 5.0, 10.0).unwrap());
    let mut analysis = Analysis::new(spring_model(material, 1.0));
    analysis
        .set_convergence_test(Box::new(CriterionTest::new(
            Criterion::norm_unbalance(1e-9),
            25,
        )))
        .unwrap();
    analysis
        .set_integrator(Box::new(ArcLength::new(1.0, 0.05).unwrap()))
        .unwrap();

    analysis.analyze(12).unwrap();
    let history = &analysis.integrator().unwrap().load_path().history;
    assert!(history.windows(2).all(|w| w[1] > w[0]));
    // past yield the load factor follows the hardening branch
    let u = analysis.model().committed_displacement(tip()).unwrap();
    assert!(u > 0.05);
    let lambda = *history.last().unwrap();
    assert_relative_eq!(lambda, 5.0 + (u - 0.05) * 1000.0 / 110.0, epsilon = 1e-7);
}
