use nalgebra::DMatrix;

use crate::basis::base::ReferenceBasis;
use crate::basis::bspline::BSplineBasis;
use crate::basis::lagrange::LagrangeBasis;
use crate::errors::HMRError;
use crate::utilities::multi_index::{child_bits, number_of_children};
use crate::utilities::tensor::{tensor_power, tensor_product};

///
/// One-dimensional refinement matrix of a B-spline order for child `side` (0 lower,
/// 1 upper half). Entry `(a, b)` is the weight of child-local spline `b` in
/// parent-local spline `a`.
///
pub fn child_matrix_1d(basis: &BSplineBasis, side: u32) -> DMatrix<f64>
{
    let p = basis.order();
    let weights = basis.two_scale_weights();
    DMatrix::from_fn(p + 1, p + 1, |a, b|
    {
        let k = side as i64 + b as i64 - 2 * a as i64 + p as i64;
        if (0..=(p as i64 + 1)).contains(&k) { weights[k as usize] } else { 0.0 }
    })
}

///
/// Local B-splines evaluated at the Lagrange support points of one cell,
/// `B[a][n] = N_a(ξ_n)`.
///
pub fn spline_to_nodal_1d(spline: &BSplineBasis, nodal: &LagrangeBasis) -> DMatrix<f64>
{
    DMatrix::from_fn(spline.number_of_functions(), nodal.number_of_functions(), |a, n| spline.eval(a, nodal.points()[n]))
}

///
/// Precomputed child relations of one spline order in one dimension, plus the
/// spline-to-nodal evaluation matrix for one nodal order.
///
#[derive(Clone, Debug)]
pub struct ChildRelations
{
    dim: usize,
    spline_order: usize,
    nodal_order: usize,
    children: Vec<DMatrix<f64>>,
    spline_to_nodal: DMatrix<f64>,
}

impl ChildRelations
{
    pub fn new(dim: usize, spline_order: usize, nodal_order: usize) -> Result<Self, HMRError>
    {
        if !(2..=3).contains(&dim)
        {
            return Err(HMRError::UnsupportedDimension(dim));
        }
        for order in [spline_order, nodal_order]
        {
            if !(1..=3).contains(&order)
            {
                return Err(HMRError::UnsupportedOrder(order));
            }
        }
        let spline = BSplineBasis::new(spline_order);
        let nodal = LagrangeBasis::new(nodal_order);
        let sides = [child_matrix_1d(&spline, 0), child_matrix_1d(&spline, 1)];
        let children = (0..number_of_children(dim)).map(|position|
        {
            let bits = child_bits(position, dim);
            let factors: Vec<&DMatrix<f64>> = (0..dim).map(|d| &sides[bits[d] as usize]).collect();
            tensor_product(&factors)
        }).collect();
        let spline_to_nodal = tensor_power(&spline_to_nodal_1d(&spline, &nodal), dim);
        Ok(Self { dim, spline_order, nodal_order, children, spline_to_nodal })
    }

    #[inline]
    pub fn dim(&self) -> usize
    {
        self.dim
    }

    #[inline]
    pub fn spline_order(&self) -> usize
    {
        self.spline_order
    }

    #[inline]
    pub fn nodal_order(&self) -> usize
    {
        self.nodal_order
    }

    /// Refinement matrix for the child at a dyadic position.
    #[inline]
    pub fn child_matrix(&self, position: usize) -> &DMatrix<f64>
    {
        &self.children[position]
    }

    #[inline]
    pub fn spline_to_nodal(&self) -> &DMatrix<f64>
    {
        &self.spline_to_nodal
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::utilities::multi_index::{local_to_ijk, number_of_local_basis};

    #[test]
    fn linear_child_matrix()
    {
        let basis = BSplineBasis::new(1);
        let lower = child_matrix_1d(&basis, 0);
        assert_eq!(lower, DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.0, 0.5]));
        let upper = child_matrix_1d(&basis, 1);
        assert_eq!(upper, DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.5, 1.0]));
    }

    #[test]
    fn child_matrices_reproduce_parent_splines()
    {
        for order in 1..=3
        {
            let basis = BSplineBasis::new(order);
            for side in 0..2
            {
                let c = child_matrix_1d(&basis, side);
                for step in 0..=8
                {
                    let xi = step as f64 / 8.0;
                    let x = 0.5 * (side as f64 + xi);
                    for a in 0..=order
                    {
                        let refined: f64 = (0..=order).map(|b| c[(a, b)] * basis.eval(b, xi)).sum();
                        assert!((refined - basis.eval(a, x)).abs() < 1e-13, "order {order} side {side} a {a}");
                    }
                }
            }
        }
    }

    #[test]
    fn tensor_child_columns_sum_to_one()
    {
        for dim in 2..=3
        {
            for order in 1..=3
            {
                let relations = ChildRelations::new(dim, order, 1).unwrap();
                let n = number_of_local_basis(order, dim);
                for position in 0..number_of_children(dim)
                {
                    let c = relations.child_matrix(position);
                    assert_eq!(c.shape(), (n, n));
                    for b in 0..n
                    {
                        assert!((c.column(b).sum() - 1.0).abs() < 1e-13);
                    }
                }
            }
        }
    }

    #[test]
    fn spline_to_nodal_entries()
    {
        let relations = ChildRelations::new(2, 2, 2).unwrap();
        let b = relations.spline_to_nodal();
        assert_eq!(b.shape(), (9, 9));
        let spline = BSplineBasis::new(2);
        for a in 0..9
        {
            for n in 0..9
            {
                let sa = local_to_ijk(a, 3, 2);
                let sn = local_to_ijk(n, 3, 2);
                let expected = spline.eval(sa[0], sn[0] as f64 / 2.0) * spline.eval(sa[1], sn[1] as f64 / 2.0);
                assert!((b[(a, n)] - expected).abs() < 1e-15);
            }
        }
        for n in 0..9
        {
            assert!((b.column(n).sum() - 1.0).abs() < 1e-14);
        }
    }

    #[test]
    fn rejects_bad_configuration()
    {
        assert_eq!(ChildRelations::new(4, 1, 1).err(), Some(HMRError::UnsupportedDimension(4)));
        assert_eq!(ChildRelations::new(2, 0, 1).err(), Some(HMRError::UnsupportedOrder(0)));
        assert_eq!(ChildRelations::new(3, 2, 5).err(), Some(HMRError::UnsupportedOrder(5)));
    }
}
