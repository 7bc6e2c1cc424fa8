//! Spherical arc-length control.
//!
//! The step increment (ΔU, Δλ) is constrained to
//!
//! ```text
//! ΔU·ΔU + α²·Δλ² = Δl²
//! ```
//!
//! Predictor: dλ = ±Δl / √(Û·Û + α²) with Û = K⁻¹·P_ref; the sign follows
//! the previous step (Û·ΔU_prev ≥ 0 keeps the direction).
//!
//! Corrector: with Ū = K⁻¹·R the load correction solves
//! a·dλ² + b·dλ + c = 0,
//!
//! ```text
//! a = α² + Û·Û
//! b = 2(α²·Δλ + Û·Ū + ΔU·Û)
//! c = 2·ΔU·Ū + Ū·Ū
//! ```
//!
//! Of the two roots the one whose new increment makes the smallest angle
//! with the current increment is taken (largest ΔU·(ΔU + Ū + dλ·Û)); on a
//! tie the larger root wins.

use super::{
    Integrator, LoadPath, apply_displacement, proportional_unbalance,
    set_pseudo_time,
};
use crate::analysis::AnalysisContext;
use crate::backend::Factorization;
use crate::error::{AnalysisError, Result};
use log::debug;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

/// Arc-length path-following integrator
#[derive(Debug, Clone)]
pub struct ArcLength {
    alpha: f64,
    path: LoadPath,
    reference: DVector<f64>,
    /// ΔU accumulated in the current step
    step_displacement: DVector<f64>,
    /// ΔU of the last committed step
    previous_increment: Option<DVector<f64>>,
}

/// Coefficients of the corrector quadratic a·dλ² + b·dλ + c = 0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadratic {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Quadratic {
    pub fn corrector(
        alpha: f64,
        step_lambda: f64,
        step_increment: &DVector<f64>,
        u_bar: &DVector<f64>,
        u_hat: &DVector<f64>,
    ) -> Self {
        let alpha2 = alpha * alpha;
        Self {
            a: alpha2 + u_hat.dot(u_hat),
            b: 2.0 * (alpha2 * step_lambda + u_hat.dot(u_bar) + step_increment.dot(u_hat)),
            c: 2.0 * step_increment.dot(u_bar) + u_bar.dot(u_bar),
        }
    }

    /// Real roots, larger first.
    pub fn roots(&self) -> Result<(f64, f64)> {
        if self.a == 0.0 || !self.a.is_finite() {
            return Err(AnalysisError::InvalidConfiguration(
                "Arc-length constraint is degenerate (a = 0)".into(),
            ));
        }
        let discriminant = self.b * self.b - 4.0 * self.a * self.c;
        if discriminant < 0.0 || !discriminant.is_finite() {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Arc-length constraint has no real root (discriminant {discriminant:.3e}); \
                 reduce the arc length"
            )));
        }
        let sqrt = discriminant.sqrt();
        let r1 = (-self.b + sqrt) / (2.0 * self.a);
        let r2 = (-self.b - sqrt) / (2.0 * self.a);
        Ok(if r1 >= r2 { (r1, r2) } else { (r2, r1) })
    }
}

/// Pick the load correction among the roots of the constraint.
pub fn select_root(
    quadratic: &Quadratic,
    step_increment: &DVector<f64>,
    u_bar: &DVector<f64>,
    u_hat: &DVector<f64>,
) -> Result<f64> {
    let (larger, smaller) = quadratic.roots()?;
    if larger == smaller {
        return Ok(larger);
    }
    let base = step_increment.dot(step_increment) + step_increment.dot(u_bar);
    let along = step_increment.dot(u_hat);
    let theta_larger = base + larger * along;
    let theta_smaller = base + smaller * along;
    Ok(if theta_smaller > theta_larger {
        smaller
    } else {
        larger
    })
}

impl ArcLength {
    pub fn new(arc_length: f64, alpha: f64) -> Result<Self> {
        if !(arc_length > 0.0) || !arc_length.is_finite() {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Arc length must be positive, got {arc_length}"
            )));
        }
        if !(alpha >= 0.0) || !alpha.is_finite() {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "Arc-length load scaling must be non-negative, got {alpha}"
            )));
        }
        Ok(Self {
            alpha,
            path: LoadPath::new(0.0, arc_length),
            reference: DVector::zeros(0),
            step_displacement: DVector::zeros(0),
            previous_increment: None,
        })
    }

    pub fn arc_length(&self) -> f64 {
        self.path.increment
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Integrator for ArcLength {
    fn name(&self) -> &str {
        "arc-length"
    }

    fn domain_changed(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        self.reference = ctx.model.reference_load()?;
        if self.reference.iter().all(|p| *p == 0.0) && self.alpha == 0.0 {
            return Err(AnalysisError::InvalidConfiguration(
                "Arc-length control needs a non-zero reference load or α > 0".into(),
            ));
        }
        self.path.restart(ctx.model.state().committed().time);
        self.step_displacement = DVector::zeros(ctx.model.num_equations());
        self.previous_increment = None;
        Ok(())
    }

    fn new_step(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        let tangent = self.form_tangent(ctx)?;
        let factorization = ctx.solver.factor(&tangent)?;
        let u_hat = factorization.solve(&self.reference)?;

        let denominator = (u_hat.dot(&u_hat) + self.alpha * self.alpha).sqrt();
        if denominator == 0.0 || !denominator.is_finite() {
            return Err(AnalysisError::InvalidConfiguration(
                "Arc-length predictor is undefined (Û = 0 and α = 0)".into(),
            ));
        }
        let mut d_lambda = self.path.increment / denominator;
        if let Some(previous) = &self.previous_increment {
            if u_hat.dot(previous) < 0.0 {
                d_lambda = -d_lambda;
            }
        }

        let predictor = u_hat * d_lambda;
        self.path.value = self.path.committed + d_lambda;
        set_pseudo_time(ctx, self.path.value);
        apply_displacement(ctx, &predictor)?;
        self.step_displacement = predictor;
        debug!(
            "Arc length: Δl = {:.3e}, predicted Δλ = {:.6e}",
            self.path.increment, d_lambda
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
        let u_hat = factorization.solve(&self.reference)?;
        let quadratic = Quadratic::corrector(
            self.alpha,
            self.path.step_value(),
            &self.step_displacement,
            delta,
            &u_hat,
        );
        let d_lambda = select_root(&quadratic, &self.step_displacement, delta, &u_hat)?;
        let correction = delta + u_hat * d_lambda;

        self.path.value += d_lambda;
        set_pseudo_time(ctx, self.path.value);
        apply_displacement(ctx, &correction)?;
        self.step_displacement += &correction;
        Ok(correction)
    }

    fn commit(&mut self, _ctx: &mut AnalysisContext) -> Result<()> {
        let n = self.step_displacement.len();
        self.previous_increment = Some(std::mem::replace(
            &mut self.step_displacement,
            DVector::zeros(n),
        ));
        self.path.commit();
        Ok(())
    }

    fn revert_step(&mut self, ctx: &mut AnalysisContext) {
        self.step_displacement.fill(0.0);
        self.path.revert();
        set_pseudo_time(ctx, self.path.value);
    }

    fn scale_increment(&mut self, factor: f64) {
        self.path.increment *= factor;
    }

    fn load_path(&self) -> &LoadPath {
        &self.path
    }
}
