//! Load control: λ ← λ + Δλ each step.
//!
//! The external load is P(λ), each load pattern's time series evaluated at
//! the load factor. With the default linear series this is λ·P_ref.

use super::{
    AdaptiveIncrement, Integrator, IterationCounter, LoadPath, apply_displacement,
    set_pseudo_time,
};
use crate::analysis::AnalysisContext;
use crate::backend::Factorization;
use crate::error::{AnalysisError, Result};
use log::debug;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

/// Static integrator with a prescribed load-factor increment
#[derive(Debug, Clone)]
pub struct LoadControl {
    path: LoadPath,
    adaptive: Option<AdaptiveIncrement>,
    counter: IterationCounter,
}

impl LoadControl {
    pub fn new(increment: f64) -> Result<Self> {
        if !increment.is_finite() || increment == 0.0 {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Load increment must be finite and non-zero, got {increment}"
            )));
        }
        Ok(Self {
            path: LoadPath::new(0.0, increment),
            adaptive: None,
            counter: IterationCounter::default(),
        })
    }

    /// Scale Δλ by J_desired / J_last before each step, within [min, max].
    pub fn with_adaptive(mut self, adaptive: AdaptiveIncrement) -> Self {
        self.adaptive = Some(adaptive);
        self
    }

    pub fn increment(&self) -> f64 {
        self.path.increment
    }
}

impl Integrator for LoadControl {
    fn name(&self) -> &str {
        "load-control"
    }

    fn domain_changed(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        self.path.restart(ctx.model.state().committed().time);
        self.counter = IterationCounter::default();
        Ok(())
    }

    fn new_step(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        if let Some(adaptive) = &self.adaptive {
            self.path.increment = adaptive.adapt(self.path.increment, self.counter.last());
        }
        self.counter.start_step();
        self.path.value = self.path.committed + self.path.increment;
        set_pseudo_time(ctx, self.path.value);
        debug!("Load control: λ = {:.6e} (Δλ = {:.3e})", self.path.value, self.path.increment);
        Ok(())
    }

    fn form_tangent(&mut self, ctx: &AnalysisContext) -> Result<CsrMatrix<f64>> {
        ctx.assembler.assemble_tangent(&ctx.model)
    }

    fn form_unbalance(&mut self, ctx: &AnalysisContext) -> Result<DVector<f64>> {
        let external = ctx.model.external_load(self.path.value)?;
        ctx.assembler.assemble_residual(&ctx.model, &external)
    }

    fn update(
        &mut self,
        ctx: &mut AnalysisContext,
        _factorization: &dyn Factorization,
        delta: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        self.counter.record_update();
        apply_displacement(ctx, delta)?;
        Ok(delta.clone())
    }

    fn commit(&mut self, _ctx: &mut AnalysisContext) -> Result<()> {
        self.path.commit();
        self.counter.commit();
        Ok(())
    }

    fn revert_step(&mut self, ctx: &mut AnalysisContext) {
        self.path.revert();
        self.counter.start_step();
        set_pseudo_time(ctx, self.path.value);
    }

    fn scale_increment(&mut self, factor: f64) {
        self.path.increment *= factor;
    }

    fn load_path(&self) -> &LoadPath {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DenseLu, LinearSolver};
    use crate::dof::DofId;
    use crate::elements::Spring;
    use crate::materials::Elastic;
    use crate::model::{LoadPattern, Model, NodalLoad, Node};
    use approx::assert_relative_eq;

    fn context() -> AnalysisContext {
        let mut model = Model::new();
        model.add_node(Node::new(1, 0.0, 0.0, 0.0, 1)).unwrap();
        model
            .add_element(Box::new(Spring::grounded(
                1,
                DofId::new(1, 0),
                Box::new(Elastic::new(100.0).unwrap()),
            )))
            .unwrap();
        model
            .add_load_pattern(LoadPattern {
                loads: vec![NodalLoad {
                    dof: DofId::new(1, 0),
                    value: 10.0,
                }],
                ..Default::default()
            })
            .unwrap();
        AnalysisContext::new(model)
    }

    #[test]
    fn rejects_zero_increment() {
        assert!(LoadControl::new(0.0).is_err());
    }

    #[test]
    fn predictor_and_correction_reach_equilibrium() {
        let mut ctx = context();
        let mut lc = LoadControl::new(1.0).unwrap();
        lc.domain_changed(&mut ctx).unwrap();
        lc.new_step(&mut ctx).unwrap();

        let r = lc.form_unbalance(&ctx).unwrap();
        assert_relative_eq!(r[0], 10.0);

        let k = lc.form_tangent(&ctx).unwrap();
        let fact = DenseLu::default().factor(&k).unwrap();
        let dx = fact.solve(&r).unwrap();
        lc.update(&mut ctx, fact.as_ref(), &dx).unwrap();

        assert_relative_eq!(ctx.model.state().trial().displacement[0], 0.1);
        assert_relative_eq!(lc.form_unbalance(&ctx).unwrap()[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn revert_restores_load_factor() {
        let mut ctx = context();
        let mut lc = LoadControl::new(0.5).unwrap();
        lc.domain_changed(&mut ctx).unwrap();
        lc.new_step(&mut ctx).unwrap();
        assert_eq!(lc.load_path().value, 0.5);
        lc.revert_step(&mut ctx);
        assert_eq!(lc.load_path().value, 0.0);
        assert_eq!(ctx.model.state().trial().time, 0.0);

        lc.scale_increment(0.5);
        lc.new_step(&mut ctx).unwrap();
        assert_eq!(lc.load_path().value, 0.25);
    }

    #[test]
    fn adaptive_increment_uses_last_iteration_count() {
        let mut ctx = context();
        let mut lc = LoadControl::new(0.1).unwrap().with_adaptive(AdaptiveIncrement {
            desired_iterations: 2,
            min: 0.01,
            max: 1.0,
        });
        lc.domain_changed(&mut ctx).unwrap();
        lc.new_step(&mut ctx).unwrap();

        let k = lc.form_tangent(&ctx).unwrap();
        let fact = DenseLu::default().factor(&k).unwrap();
        let r = lc.form_unbalance(&ctx).unwrap();
        let dx = fact.solve(&r).unwrap();
        lc.update(&mut ctx, fact.as_ref(), &dx).unwrap();
        ctx.model.commit().unwrap();
        lc.commit(&mut ctx).unwrap();

        // one correction against two desired doubles the increment
        lc.new_step(&mut ctx).unwrap();
        assert_relative_eq!(lc.increment(), 0.2);
    }
}
