use crate::utilities::multi_index::binomial;

use super::base::{BasisFunction, ReferenceBasis};

///
/// Uniform B-splines of a given order restricted to one cell. Local function `a`
/// on cell `c` is the global spline `c + a`, whose support spans cells
/// `c + a - p ..= c + a`.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BSplineBasis
{
    order: usize,
}

impl BSplineBasis
{
    pub fn new(order: usize) -> Self
    {
        Self { order }
    }

    ///
    /// Weights of the two-scale relation `M_p(t) = Σ_k w_k M_p(2t - k)`,
    /// `w_k = 2^{-p} C(p+1, k)` for `k = 0..=p+1`.
    ///
    pub fn two_scale_weights(&self) -> Vec<f64>
    {
        let p = self.order;
        let scale = 0.5_f64.powi(p as i32);
        (0..=p + 1).map(|k| scale * binomial(p + 1, k)).collect()
    }
}

///
/// Cardinal B-spline of degree `p` with support `[0, p+1]`, evaluated with the
/// Cox-de Boor recursion on integer knots.
///
pub fn cardinal_bspline(p: usize, t: f64) -> f64
{
    if t < 0.0 || t >= (p + 1) as f64
    {
        return 0.0;
    }
    if p == 0
    {
        return 1.0;
    }
    (t * cardinal_bspline(p - 1, t) + ((p + 1) as f64 - t) * cardinal_bspline(p - 1, t - 1.0)) / p as f64
}

impl ReferenceBasis for BSplineBasis
{
    #[inline]
    fn order(&self) -> usize
    {
        self.order
    }

    fn basis_type(&self) -> BasisFunction
    {
        BasisFunction::BSpline
    }

    #[inline]
    fn eval(&self, index: usize, x: f64) -> f64
    {
        let p = self.order;
        cardinal_bspline(p, (p - index) as f64 + x)
    }
}

#[test]
fn check_bspline_partition_of_unity()
{
    for order in 1..=3
    {
        let basis = BSplineBasis::new(order);
        for step in 0..=10
        {
            let x = step as f64 / 10.0;
            let sum: f64 = basis.values(x).iter().sum();
            assert!((sum - 1.0).abs() < 1e-14, "order {order} at {x}: {sum}");
        }
    }
}

#[test]
fn check_linear_bspline_is_hat()
{
    let basis = BSplineBasis::new(1);
    assert_eq!(basis.eval(0, 0.0), 1.0);
    assert_eq!(basis.eval(1, 0.0), 0.0);
    assert!((basis.eval(0, 0.25) - 0.75).abs() < 1e-15);
    assert!((basis.eval(1, 1.0) - 1.0).abs() < 1e-15);
}

#[test]
fn check_two_scale_relation()
{
    for order in 1..=3
    {
        let basis = BSplineBasis::new(order);
        let weights = basis.two_scale_weights();
        assert!((weights.iter().sum::<f64>() - 2.0).abs() < 1e-14);
        for step in 0..40
        {
            let t = step as f64 * (order + 1) as f64 / 40.0;
            let refined: f64 = weights.iter().enumerate().map(|(k, w)| w * cardinal_bspline(order, 2.0 * t - k as f64)).sum();
            assert!((refined - cardinal_bspline(order, t)).abs() < 1e-13);
        }
    }
}
