use serde::{Deserialize, Serialize};

///
/// One-dimensional reference basis on the unit cell `[0, 1]`. Multi-dimensional
/// local bases are tensor products with the first axis running fastest.
///
pub trait ReferenceBasis
{
    fn order(&self) -> usize;
    fn basis_type(&self) -> BasisFunction;
    /// Value of local function `index` at the reference coordinate `x`.
    fn eval(&self, index: usize, x: f64) -> f64;

    #[inline]
    fn number_of_functions(&self) -> usize
    {
        self.order() + 1
    }

    /// All local functions at `x`, in local order.
    fn values(&self, x: f64) -> Vec<f64>
    {
        (0..self.number_of_functions()).map(|index| self.eval(index, x)).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BasisFunction
{
    BSpline = 0,
    Lagrange = 1,
}
