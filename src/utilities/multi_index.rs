///
/// Number of local basis on an element of the given order: `(order+1)^dim`.
///
#[inline]
pub fn number_of_local_basis(order: usize, dim: usize) -> usize
{
    (order + 1).pow(dim as u32)
}

///
/// Number of dyadic children of a cell: `2^dim`.
///
#[inline]
pub fn number_of_children(dim: usize) -> usize
{
    1 << dim
}

///
/// Splits a lexicographic local index (i fastest) into its per-axis components.
///
#[inline]
pub fn local_to_ijk(local: usize, n: usize, dim: usize) -> [usize; 3]
{
    let mut ijk = [0; 3];
    let mut rest = local;
    for value in ijk.iter_mut().take(dim)
    {
        *value = rest % n;
        rest /= n;
    }
    ijk
}

///
/// Inverse of `local_to_ijk`.
///
#[inline]
pub fn ijk_to_local(ijk: &[usize; 3], n: usize, dim: usize) -> usize
{
    let mut local = 0;
    for d in (0..dim).rev()
    {
        local = local * n + ijk[d];
    }
    local
}

///
/// Per-axis offset (0 or 1) of a dyadic child position. Bit `d` of the
/// position selects the upper half along axis `d`.
///
#[inline]
pub fn child_bits(position: usize, dim: usize) -> [u32; 3]
{
    let mut bits = [0; 3];
    for (d, bit) in bits.iter_mut().enumerate().take(dim)
    {
        *bit = ((position >> d) & 1) as u32;
    }
    bits
}

///
/// All offsets of a Chebyshev neighborhood with the given radius, excluding the origin.
/// Ordered lexicographically with the first axis fastest.
///
pub fn neighborhood(radius: usize, dim: usize) -> Vec<[i64; 3]>
{
    let width = 2 * radius + 1;
    let count = width.pow(dim as u32);
    let mut offsets = Vec::with_capacity(count.saturating_sub(1));
    for local in 0..count
    {
        let ijk = local_to_ijk(local, width, dim);
        let mut offset = [0_i64; 3];
        for d in 0..dim
        {
            offset[d] = ijk[d] as i64 - radius as i64;
        }
        if offset != [0; 3]
        {
            offsets.push(offset);
        }
    }
    offsets
}

///
/// Binomial coefficient as floating point, exact for the small arguments used by the
/// two-scale relations.
///
pub fn binomial(n: usize, k: usize) -> f64
{
    if k > n
    {
        return 0.0;
    }
    let mut r = 1.0;
    for i in 0..k
    {
        r = r * (n - i) as f64 / (i + 1) as f64;
    }
    r
}

#[test]
fn check_local_roundtrip()
{
    for dim in 2..=3
    {
        for order in 1..=3
        {
            let n = order + 1;
            for local in 0..number_of_local_basis(order, dim)
            {
                assert_eq!(ijk_to_local(&local_to_ijk(local, n, dim), n, dim), local);
            }
        }
    }
    // i runs fastest
    assert_eq!(local_to_ijk(1, 3, 2), [1, 0, 0]);
    assert_eq!(local_to_ijk(3, 3, 2), [0, 1, 0]);
}

#[test]
fn check_neighborhood()
{
    assert_eq!(neighborhood(1, 2).len(), 8);
    assert_eq!(neighborhood(1, 3).len(), 26);
    assert_eq!(neighborhood(2, 2).len(), 24);
    assert!(neighborhood(0, 3).is_empty());
    assert!(!neighborhood(1, 2).contains(&[0, 0, 0]));
}

#[test]
fn check_binomial()
{
    assert_eq!(binomial(4, 2), 6.0);
    assert_eq!(binomial(3, 0), 1.0);
    assert_eq!(binomial(3, 4), 0.0);
}
