use super::base::{BasisFunction, ReferenceBasis};

///
/// Lagrange polynomials on equidistant support points `m / q`, evaluated in
/// barycentric form.
///
#[derive(Clone, Debug, PartialEq)]
pub struct LagrangeBasis
{
    order: usize,
    points: Vec<f64>,
    coeffs: Vec<f64>,
}

impl LagrangeBasis
{
    pub fn new(order: usize) -> Self
    {
        let points: Vec<f64> = (0..=order).map(|m| m as f64 / order as f64).collect();
        let coeffs = lagrange_coeffs(&points);
        Self { order, points, coeffs }
    }

    #[inline]
    pub fn points(&self) -> &[f64]
    {
        &self.points
    }
}

impl ReferenceBasis for LagrangeBasis
{
    #[inline]
    fn order(&self) -> usize
    {
        self.order
    }

    fn basis_type(&self) -> BasisFunction
    {
        BasisFunction::Lagrange
    }

    fn eval(&self, index: usize, x: f64) -> f64
    {
        lagrange_weights(x, &self.coeffs, &self.points)[index]
    }

    fn values(&self, x: f64) -> Vec<f64>
    {
        lagrange_weights(x, &self.coeffs, &self.points)
    }
}

// Barycentric weights of all Lagrange polynomials at `x`.
#[inline]
pub fn lagrange_weights(x: f64, coeffs: &[f64], points: &[f64]) -> Vec<f64>
{
    let mut weights = vec![0.0; points.len()];
    let mut normalization_factor = 0.0;

    // x coincides with a support point
    for (&point, weight) in points.iter().zip(weights.iter_mut())
    {
        if (point - x).abs() < f64::EPSILON
        {
            *weight = 1.0;
            return weights;
        }
    }
    coeffs.iter().zip(points).zip(weights.iter_mut()).for_each(|((&coeff, &xi), weight)|
    {
        *weight = coeff / (x - xi);
        normalization_factor += *weight;
    });
    weights.iter_mut().for_each(|w| *w /= normalization_factor);
    weights
}

pub fn lagrange_coeffs(points: &[f64]) -> Vec<f64>
{
    let mut coeffs = Vec::with_capacity(points.len());
    for (i, &xi) in points.iter().enumerate()
    {
        let mut li = 1.0;
        for (j, &xj) in points.iter().enumerate()
        {
            if i != j
            {
                li *= xi - xj;
            }
        }
        coeffs.push(1.0 / li);
    }
    coeffs
}

#[test]
fn check_lagrange_reproduces_polynomials()
{
    let basis = LagrangeBasis::new(3);
    let f = |x: f64| 1.0 - 2.0 * x + 0.5 * x * x * x;
    for step in 0..=7
    {
        let x = step as f64 / 7.0;
        let value: f64 = basis.values(x).iter().zip(basis.points()).map(|(w, &p)| w * f(p)).sum();
        assert!((value - f(x)).abs() < 1e-13);
    }
}

#[test]
fn check_lagrange_kronecker_property()
{
    for order in 1..=3
    {
        let basis = LagrangeBasis::new(order);
        for (m, &point) in basis.points().iter().enumerate()
        {
            for n in 0..=order
            {
                assert_eq!(basis.eval(n, point), if m == n { 1.0 } else { 0.0 });
            }
        }
    }
}
