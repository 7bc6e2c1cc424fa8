//! Newmark β-method for transient analysis.
//!
//! Solves M·A + C·V + F_int(U) = P(t) in incremental form with the
//! displacement increment as unknown:
//!
//! ```text
//! c2 = γ / (β·Δt)        c3 = 1 / (β·Δt²)
//! K_eff = K + c2·C + c3·M,          C = α_M·M + β_K·K (Rayleigh)
//! R = P(t) − F_int − M·A − C·V
//! ```
//!
//! Predictor (U kept at U_n):
//!
//! ```text
//! V = (1 − γ/β)·V_n + Δt·(1 − γ/(2β))·A_n
//! A = −V_n/(β·Δt) + (1 − 1/(2β))·A_n
//! ```
//!
//! Corrector: U += ΔU, V += c2·ΔU, A += c3·ΔU.
//!
//! Standard parameter choices:
//! - **Average acceleration** (unconditionally stable): γ = 1/2, β = 1/4
//! - **Linear acceleration** (conditionally stable): γ = 1/2, β = 1/6
//!
//! β = 0 (the explicit member of the family) has no incremental
//! displacement form here: it is accepted with a warning and every step
//! attempted with it fails with `InvalidConfiguration`.

use super::{Integrator, LoadPath, set_pseudo_time};
use crate::analysis::AnalysisContext;
use crate::assembler::{MatrixCoefficients, multiply};
use crate::backend::Factorization;
use crate::error::{AnalysisError, Result};
use crate::state::StateLifecycle;
use log::{debug, warn};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

/// Stability class of a Newmark parameter pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewmarkStability {
    /// 2β ≥ γ ≥ 1/2
    Unconditional,
    /// γ ≥ 1/2 and 2β < γ
    Conditional,
    /// γ < 1/2
    Unstable,
}

/// Newmark transient integrator
#[derive(Debug, Clone)]
pub struct Newmark {
    gamma: f64,
    beta: f64,
    path: LoadPath,
    c2: f64,
    c3: f64,
    /// Mass matrix of the current step
    mass: Option<CsrMatrix<f64>>,
}

impl Newmark {
    pub fn new(gamma: f64, beta: f64, dt: f64) -> Result<Self> {
        if !(gamma > 0.0) || !(beta >= 0.0) {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Newmark needs γ > 0 and β ≥ 0 (γ = {gamma}, β = {beta})"
            )));
        }
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Time step must be positive, got {dt}"
            )));
        }
        let integrator = Self {
            gamma,
            beta,
            path: LoadPath::new(0.0, dt),
            c2: 0.0,
            c3: 0.0,
            mass: None,
        };
        if beta == 0.0 {
            warn!("Newmark β = 0 is explicit; steps with this integrator will be rejected");
        }
        match integrator.stability() {
            NewmarkStability::Unstable => {
                warn!("Newmark γ = {gamma} < 0.5 is unconditionally unstable")
            }
            NewmarkStability::Conditional => {
                warn!("Newmark 2β < γ (β = {beta}, γ = {gamma}) is only conditionally stable")
            }
            NewmarkStability::Unconditional => {}
        }
        Ok(integrator)
    }

    /// Average acceleration method: γ = 1/2, β = 1/4
    pub fn average_acceleration(dt: f64) -> Result<Self> {
        Self::new(0.5, 0.25, dt)
    }

    /// Linear acceleration method: γ = 1/2, β = 1/6
    pub fn linear_acceleration(dt: f64) -> Result<Self> {
        Self::new(0.5, 1.0 / 6.0, dt)
    }

    pub fn stability(&self) -> NewmarkStability {
        if self.gamma < 0.5 {
            NewmarkStability::Unstable
        } else if 2.0 * self.beta < self.gamma {
            NewmarkStability::Conditional
        } else {
            NewmarkStability::Unconditional
        }
    }

    pub fn dt(&self) -> f64 {
        self.path.increment
    }

    fn update_coefficients(&mut self) {
        if self.beta == 0.0 {
            return;
        }
        let dt = self.path.increment;
        self.c2 = self.gamma / (self.beta * dt);
        self.c3 = 1.0 / (self.beta * dt * dt);
    }

    /// Solve M·A₀ = P(t₀) − F_int − C·V₀ for a consistent initial
    /// acceleration. Left at zero when M cannot be factored.
    fn initial_acceleration(&self, ctx: &mut AnalysisContext) -> Result<()> {
        let n = ctx.model.num_equations();
        if n == 0 {
            return Ok(());
        }
        let mass = ctx.assembler.assemble_mass(&ctx.model)?;
        let factorization = match ctx.solver.factor(&mass) {
            Ok(f) => f,
            Err(AnalysisError::SingularSystem(reason)) => {
                debug!("Mass matrix is singular ({reason}); initial acceleration set to zero");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let time = self.path.committed;
        let velocity = ctx.model.state().committed().velocity.clone();
        let external = ctx.model.external_load(time)?;
        let mut rhs = ctx.assembler.assemble_residual(&ctx.model, &external)?;
        rhs -= damping_force(ctx, &velocity)?;
        let acceleration = factorization.solve(&rhs)?;

        let state = ctx.model.state_mut();
        state.trial_mut().acceleration.copy_from(&acceleration);
        state.commit_state();
        Ok(())
    }
}

/// C·v with C = α_M·M + β_K·K.
fn damping_force(ctx: &AnalysisContext, velocity: &DVector<f64>) -> Result<DVector<f64>> {
    let rayleigh = ctx.model.rayleigh_damping();
    if rayleigh.alpha_m == 0.0 && rayleigh.beta_k == 0.0 {
        return Ok(DVector::zeros(velocity.len()));
    }
    let c = ctx.assembler.assemble_matrix(
        &ctx.model,
        MatrixCoefficients {
            stiffness: rayleigh.beta_k,
            mass: rayleigh.alpha_m,
        },
    )?;
    Ok(multiply(&c, velocity))
}

impl Integrator for Newmark {
    fn name(&self) -> &str {
        "newmark"
    }

    fn domain_changed(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        self.path.restart(ctx.model.state().committed().time);
        self.mass = None;
        self.update_coefficients();
        self.initial_acceleration(ctx)
    }

    fn new_step(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        if self.beta == 0.0 {
            return Err(AnalysisError::InvalidConfiguration(
                "Newmark β = 0 cannot be integrated in displacement-increment form".into(),
            ));
        }
        self.update_coefficients();
        // element masses only change on commit (deactivation ramp)
        self.mass = Some(ctx.assembler.assemble_mass(&ctx.model)?);
        let dt = self.path.increment;
        let (gamma, beta) = (self.gamma, self.beta);

        let state = ctx.model.state_mut();
        let v_n = state.committed().velocity.clone();
        let a_n = state.committed().acceleration.clone();
        let trial = state.trial_mut();
        trial.velocity = &v_n * (1.0 - gamma / beta) + &a_n * (dt * (1.0 - gamma / (2.0 * beta)));
        trial.acceleration = &v_n * (-1.0 / (beta * dt)) + &a_n * (1.0 - 1.0 / (2.0 * beta));

        self.path.value = self.path.committed + dt;
        set_pseudo_time(ctx, self.path.value);
        debug!("Newmark: t = {:.6e} (Δt = {:.3e})", self.path.value, dt);
        Ok(())
    }

    fn form_tangent(&mut self, ctx: &AnalysisContext) -> Result<CsrMatrix<f64>> {
        let rayleigh = ctx.model.rayleigh_damping();
        ctx.assembler.assemble_matrix(
            &ctx.model,
            MatrixCoefficients {
                stiffness: 1.0 + self.c2 * rayleigh.beta_k,
                mass: self.c3 + self.c2 * rayleigh.alpha_m,
            },
        )
    }

    fn form_unbalance(&mut self, ctx: &AnalysisContext) -> Result<DVector<f64>> {
        let trial = ctx.model.state().trial();
        let external = ctx.model.external_load(self.path.value)?;
        let mut r = ctx.assembler.assemble_residual(&ctx.model, &external)?;
        let mass = match self.mass.take() {
            Some(mass) => mass,
            None => ctx.assembler.assemble_mass(&ctx.model)?,
        };
        r -= multiply(&mass, &trial.acceleration);
        self.mass = Some(mass);
        r -= damping_force(ctx, &trial.velocity)?;
        Ok(r)
    }

    fn update(
        &mut self,
        ctx: &mut AnalysisContext,
        _factorization: &dyn Factorization,
        delta: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let trial = ctx.model.state_mut().trial_mut();
        trial.displacement += delta;
        trial.velocity += delta * self.c2;
        trial.acceleration += delta * self.c3;
        ctx.model.update_elements(ctx.assembler.parallel)?;
        Ok(delta.clone())
    }

    fn commit(&mut self, _ctx: &mut AnalysisContext) -> Result<()> {
        self.path.commit();
        Ok(())
    }

    fn revert_step(&mut self, ctx: &mut AnalysisContext) {
        self.path.revert();
        set_pseudo_time(ctx, self.path.value);
    }

    fn scale_increment(&mut self, factor: f64) {
        self.path.increment *= factor;
        self.update_coefficients();
    }

    fn load_path(&self) -> &LoadPath {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_parameters() {
        assert!(Newmark::new(0.5, -0.25, 0.1).is_err());
        assert!(Newmark::new(0.0, 0.25, 0.1).is_err());
        assert!(Newmark::new(0.5, 0.25, 0.0).is_err());
    }

    #[test]
    fn explicit_beta_is_accepted_but_not_stepped() {
        let mut nm = Newmark::new(0.5, 0.0, 0.1).unwrap();
        assert_eq!(nm.stability(), NewmarkStability::Conditional);
        nm.update_coefficients();
        assert_eq!((nm.c2, nm.c3), (0.0, 0.0));
    }

    #[test]
    fn stability_classes() {
        assert_eq!(
            Newmark::average_acceleration(0.1).unwrap().stability(),
            NewmarkStability::Unconditional
        );
        assert_eq!(
            Newmark::linear_acceleration(0.1).unwrap().stability(),
            NewmarkStability::Conditional
        );
        assert_eq!(
            Newmark::new(0.4, 0.25, 0.1).unwrap().stability(),
            NewmarkStability::Unstable
        );
    }

    #[test]
    fn coefficients_follow_time_step() {
        let mut nm = Newmark::average_acceleration(0.1).unwrap();
        nm.update_coefficients();
        assert!((nm.c2 - 20.0).abs() < 1e-12);
        assert!((nm.c3 - 400.0).abs() < 1e-9);
        nm.scale_increment(0.5);
        assert!((nm.c2 - 40.0).abs() < 1e-12);
    }
}
