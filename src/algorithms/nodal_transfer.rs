use nalgebra::DMatrix;

use crate::basis::base::ReferenceBasis;
use crate::basis::lagrange::LagrangeBasis;
use crate::errors::HMRError;
use crate::utilities::multi_index::{child_bits, number_of_children};
use crate::utilities::tensor::tensor_product;

///
/// Maps nodal values of a source element onto the support points of a target
/// element: `M = V⁻¹ E`, where `E` evaluates the source shape functions at the target
/// points and `V` is the target basis at its own points. Rows belong to target
/// nodes, so `target = M * source`.
///
fn transfer_1d(source: &LagrangeBasis, target: &LagrangeBasis, map: impl Fn(f64) -> f64) -> Result<DMatrix<f64>, HMRError>
{
    let e = DMatrix::from_fn(target.number_of_functions(), source.number_of_functions(), |t, s| source.eval(s, map(target.points()[t])));
    let v = DMatrix::from_fn(target.number_of_functions(), target.number_of_functions(), |t, u| target.eval(u, target.points()[t]));
    v.lu().solve(&e).ok_or(HMRError::InvalidParameters("singular nodal reference basis"))
}

///
/// Refinement and order-change matrices of a Lagrange element.
///
#[derive(Clone, Debug)]
pub struct NodalTransfer
{
    order: usize,
    refinement: Vec<DMatrix<f64>>,
    change_order: Vec<DMatrix<f64>>,
}

impl NodalTransfer
{
    pub fn new(dim: usize, order: usize) -> Result<Self, HMRError>
    {
        if !(2..=3).contains(&dim)
        {
            return Err(HMRError::UnsupportedDimension(dim));
        }
        if !(1..=3).contains(&order)
        {
            return Err(HMRError::UnsupportedOrder(order));
        }
        let source = LagrangeBasis::new(order);
        let sides = [
            transfer_1d(&source, &source, |x| 0.5 * x)?,
            transfer_1d(&source, &source, |x| 0.5 * (1.0 + x))?,
        ];
        let refinement = (0..number_of_children(dim)).map(|position|
        {
            let bits = child_bits(position, dim);
            let factors: Vec<&DMatrix<f64>> = (0..dim).map(|d| &sides[bits[d] as usize]).collect();
            tensor_product(&factors)
        }).collect();

        let mut change_order = Vec::with_capacity(3);
        for target_order in 1..=3
        {
            let target = LagrangeBasis::new(target_order);
            let m = transfer_1d(&source, &target, |x| x)?;
            change_order.push(tensor_product(&vec![&m; dim]));
        }
        Ok(Self { order, refinement, change_order })
    }

    #[inline]
    pub fn order(&self) -> usize
    {
        self.order
    }

    /// Nodal values of the child at a dyadic position from the parent's nodal values.
    #[inline]
    pub fn refinement_matrix(&self, child: usize) -> &DMatrix<f64>
    {
        &self.refinement[child]
    }

    pub fn change_order_matrix(&self, target_order: usize) -> Result<&DMatrix<f64>, HMRError>
    {
        if !(1..=3).contains(&target_order)
        {
            return Err(HMRError::UnsupportedOrder(target_order));
        }
        Ok(&self.change_order[target_order - 1])
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::utilities::multi_index::{local_to_ijk, number_of_local_basis};

    fn nodal_values(order: usize, dim: usize, offset: [f64; 3], scale: f64, f: impl Fn([f64; 3]) -> f64) -> nalgebra::DVector<f64>
    {
        let n = number_of_local_basis(order, dim);
        nalgebra::DVector::from_fn(n, |local, _|
        {
            let ijk = local_to_ijk(local, order + 1, dim);
            let mut x = [0.0; 3];
            for d in 0..dim
            {
                x[d] = offset[d] + scale * ijk[d] as f64 / order as f64;
            }
            f(x)
        })
    }

    #[test]
    fn refinement_is_exact_for_polynomials()
    {
        let f = |x: [f64; 3]| 1.0 + x[0] * x[0] - 2.0 * x[1] + x[0] * x[1] * x[2];
        for dim in 2..=3
        {
            let transfer = NodalTransfer::new(dim, 2).unwrap();
            let parent = nodal_values(2, dim, [0.0; 3], 1.0, f);
            for position in 0..number_of_children(dim)
            {
                let bits = child_bits(position, dim);
                let offset = [0.5 * bits[0] as f64, 0.5 * bits[1] as f64, 0.5 * bits[2] as f64];
                let expected = nodal_values(2, dim, offset, 0.5, f);
                let child = transfer.refinement_matrix(position) * &parent;
                assert!((child - expected).amax() < 1e-13);
            }
        }
    }

    #[test]
    fn order_change_round_trip()
    {
        for dim in 2..=3
        {
            let quadratic = NodalTransfer::new(dim, 2).unwrap();
            let cubic = NodalTransfer::new(dim, 3).unwrap();
            let up = quadratic.change_order_matrix(3).unwrap();
            let down = cubic.change_order_matrix(2).unwrap();
            let n = number_of_local_basis(2, dim);
            assert_eq!(up.shape(), (number_of_local_basis(3, dim), n));
            let round_trip = down * up;
            assert!((round_trip - DMatrix::<f64>::identity(n, n)).amax() < 1e-13);
            // same order is the identity
            let same = quadratic.change_order_matrix(2).unwrap();
            assert!((same - DMatrix::<f64>::identity(n, n)).amax() < 1e-14);
        }
    }

    #[test]
    fn rejects_unsupported_target_order()
    {
        let transfer = NodalTransfer::new(2, 1).unwrap();
        assert_eq!(transfer.change_order_matrix(4).err(), Some(HMRError::UnsupportedOrder(4)));
        assert_eq!(NodalTransfer::new(2, 0).err(), Some(HMRError::UnsupportedOrder(0)));
    }
}
