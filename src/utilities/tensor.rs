use nalgebra::DMatrix;

///
/// Tensor product of per-axis matrices, consistent with the lexicographic local
/// ordering (first axis fastest): `factors[0]` acts on i, `factors[1]` on j, ...
///
pub fn tensor_product(factors: &[&DMatrix<f64>]) -> DMatrix<f64>
{
    let mut iter = factors.iter().rev();
    let mut result = match iter.next()
    {
        Some(last) => (*last).clone(),
        None => return DMatrix::identity(1, 1),
    };
    for factor in iter
    {
        result = result.kronecker(*factor);
    }
    result
}

///
/// Tensor product of the same matrix along `dim` axes.
///
pub fn tensor_power(factor: &DMatrix<f64>, dim: usize) -> DMatrix<f64>
{
    let factors = vec![factor; dim];
    tensor_product(&factors)
}

#[test]
fn check_tensor_product_ordering()
{
    use crate::utilities::multi_index::{ijk_to_local, local_to_ijk};
    // x-factor and y-factor differ so a wrong ordering shows up
    let ax = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
    let ay = DMatrix::from_row_slice(2, 2, &[5.0, 6.0, 7.0, 8.0]);
    let t = tensor_product(&[&ax, &ay]);
    for row in 0..4
    {
        for col in 0..4
        {
            let r = local_to_ijk(row, 2, 2);
            let c = local_to_ijk(col, 2, 2);
            let expected = ax[(r[0], c[0])] * ay[(r[1], c[1])];
            assert_eq!(t[(row, col)], expected);
        }
    }
    assert_eq!(ijk_to_local(&[1, 1, 0], 2, 2), 3);
}
