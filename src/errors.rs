use std::fmt::Display;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum HMRError
{
    UnsupportedDimension(usize),
    UnsupportedOrder(usize),
    InvalidPattern(usize),
    InvalidParameters(&'static str),
    RefinementDidNotConverge { sweeps: usize },
    UnassignedTypeTime(usize),
    UnmappedMultigridIndex { level: usize, index: usize },
    InvalidIndex,
    NotFinalized,
    MultigridNotInitialized,
}
impl std::error::Error for HMRError {}

impl Display for HMRError
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self
        {
            HMRError::UnsupportedDimension(dim) => write!(f, "unsupported spatial dimension {dim}, expected 2 or 3"),
            HMRError::UnsupportedOrder(order) => write!(f, "unsupported polynomial order {order}, expected 1, 2 or 3"),
            HMRError::InvalidPattern(pattern) => write!(f, "pattern {pattern} is out of range"),
            HMRError::InvalidParameters(reason) => write!(f, "invalid parameters: {reason}"),
            HMRError::RefinementDidNotConverge { sweeps } => write!(f, "refinement did not reach a fixed point after {sweeps} sweeps"),
            HMRError::UnassignedTypeTime(id) => write!(f, "dof type/time identifier {id} has no registered bucket"),
            HMRError::UnmappedMultigridIndex { level, index } => write!(f, "index {index} is not mapped on multigrid level {level}"),
            HMRError::MultigridNotInitialized => write!(f, "multigrid maps have not been built"),
            _ => write!(f, "{:?}", *self),
        }
    }
}
