//! Displacement control: the load factor is an unknown, the increment of one
//! chosen DOF is prescribed.
//!
//! ```text
//! predictor:  K·Û = P_ref        dλ = Δu_k / Û_k        ΔU = dλ·Û
//! corrector:  K·Ū = R            dλ = −Ū_k / Û_k        ΔU = Ū + dλ·Û
//! ```
//!
//! The corrector keeps the controlled component of the step increment fixed,
//! so a converged step reaches exactly the prescribed Δu_k.

use super::{
    AdaptiveIncrement, Integrator, IterationCounter, LoadPath, apply_displacement,
    proportional_unbalance, set_pseudo_time,
};
use crate::analysis::AnalysisContext;
use crate::backend::Factorization;
use crate::dof::DofId;
use crate::error::{AnalysisError, Result};
use log::debug;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

/// Static integrator prescribing the displacement increment of one DOF
#[derive(Debug, Clone)]
pub struct DisplacementControl {
    dof: DofId,
    equation: Option<usize>,
    path: LoadPath,
    reference: DVector<f64>,
    adaptive: Option<AdaptiveIncrement>,
    counter: IterationCounter,
}

impl DisplacementControl {
    pub fn new(dof: DofId, increment: f64) -> Result<Self> {
        if !increment.is_finite() || increment == 0.0 {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Displacement increment must be finite and non-zero, got {increment}"
            )));
        }
        Ok(Self {
            dof,
            equation: None,
            path: LoadPath::new(0.0, increment),
            reference: DVector::zeros(0),
            adaptive: None,
            counter: IterationCounter::default(),
        })
    }

    pub fn with_adaptive(mut self, adaptive: AdaptiveIncrement) -> Self {
        self.adaptive = Some(adaptive);
        self
    }

    pub fn controlled_dof(&self) -> DofId {
        self.dof
    }

    fn controlled_equation(&self) -> Result<usize> {
        self.equation.ok_or_else(|| {
            AnalysisError::InvalidConfiguration(
                "Displacement control used before domain_changed".into(),
            )
        })
    }

    /// Û = K⁻¹·P_ref and its controlled component.
    fn reference_response(&self, factorization: &dyn Factorization) -> Result<(DVector<f64>, f64)> {
        let eq = self.controlled_equation()?;
        let u_hat = factorization.solve(&self.reference)?;
        let u_hat_k = u_hat[eq];
        if u_hat_k == 0.0 || !u_hat_k.is_finite() {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Reference load produces no displacement at controlled DOF {:?}",
                self.dof
            )));
        }
        Ok((u_hat, u_hat_k))
    }
}

impl Integrator for DisplacementControl {
    fn name(&self) -> &str {
        "displacement-control"
    }

    fn domain_changed(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        let equation = ctx.model.mapper().equation(self.dof).map_err(|_| {
            AnalysisError::InvalidConfiguration(format!(
                "Controlled DOF {:?} does not exist",
                self.dof
            ))
        })?;
        let Some(equation) = equation else {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Controlled DOF {:?} is constrained",
                self.dof
            )));
        };
        self.equation = Some(equation);
        self.reference = ctx.model.reference_load()?;
        self.path.restart(ctx.model.state().committed().time);
        self.counter = IterationCounter::default();
        Ok(())
    }

    fn new_step(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        if let Some(adaptive) = &self.adaptive {
            self.path.increment = adaptive.adapt(self.path.increment, self.counter.last());
        }
        self.counter.start_step();

        let tangent = self.form_tangent(ctx)?;
        let factorization = ctx.solver.factor(&tangent)?;
        let (u_hat, u_hat_k) = self.reference_response(factorization.as_ref())?;

        let d_lambda = self.path.increment / u_hat_k;
        self.path.value = self.path.committed + d_lambda;
        set_pseudo_time(ctx, self.path.value);
        apply_displacement(ctx, &(u_hat * d_lambda))?;
        debug!(
            "Displacement control: Δu = {:.3e} at {:?}, predicted λ = {:.6e}",
            self.path.increment, self.dof, self.path.value
        );
        Ok(())
    }

    fn form_tangent(&mut self, ctx: &AnalysisContext) -> Result<CsrMatrix<f64>> {
        ctx.assembler.assemble_tangent(&ctx.model)
    }

    fn form_unbalance(&mut self, ctx: &AnalysisContext) -> Result<DVector<f64>> {
        proportional_unbalance(ctx, &self.reference, self.path.value)
    }

    fn update(
        &mut self,
        ctx: &mut AnalysisContext,
        factorization: &dyn Factorization,
        delta: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let eq = self.controlled_equation()?;
        let (u_hat, u_hat_k) = self.reference_response(factorization)?;
        let d_lambda = -delta[eq] / u_hat_k;

        let mut correction = delta + u_hat * d_lambda;
        // Ū_k + dλ·Û_k vanishes analytically; pin it against round-off.
        correction[eq] = 0.0;

        self.counter.record_update();
        self.path.value += d_lambda;
        set_pseudo_time(ctx, self.path.value);
        apply_displacement(ctx, &correction)?;
        Ok(correction)
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
