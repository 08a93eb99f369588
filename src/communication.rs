//! Inter-rank exchange consumed by the database. The transport itself lives outside
//! this crate; a serial implementation is provided for single-process runs and tests.

///
/// Minimal exchange service: row `i` of `rows` is sent to `ranks[i]` and the row
/// received from that rank is returned at the same position.
///
pub trait Communicator: Send + Sync
{
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn exchange(&self, ranks: &[usize], rows: &[Vec<u32>]) -> Vec<Vec<u32>>;
}

/// Single-process communicator; every exchange is a self-exchange.
#[derive(Copy, Clone, Debug, Default)]
pub struct SerialComm;

impl Communicator for SerialComm
{
    fn rank(&self) -> usize
    {
        0
    }

    fn size(&self) -> usize
    {
        1
    }

    fn exchange(&self, _ranks: &[usize], rows: &[Vec<u32>]) -> Vec<Vec<u32>>
    {
        rows.to_vec()
    }
}

///
/// Ranks this rank communicates with: its own rank first, then every rank that owns an
/// entity this rank uses or that uses an entity owned here, in ascending order.
///
pub fn build_communication_table<C: Communicator + ?Sized>(comm: &C, owners_in_use: &[usize]) -> Vec<usize>
{
    let rank = comm.rank();
    let size = comm.size();
    let mut needed = vec![false; size];
    for &owner in owners_in_use
    {
        if owner < size && owner != rank
        {
            needed[owner] = true;
        }
    }
    let others: Vec<usize> = (0..size).filter(|&other| other != rank).collect();
    let rows: Vec<Vec<u32>> = others.iter().map(|&other| vec![needed[other] as u32]).collect();
    let received = if others.is_empty() { Vec::new() } else { comm.exchange(&others, &rows) };
    let mut table = vec![rank];
    for (index, &other) in others.iter().enumerate()
    {
        let requested = received.get(index).and_then(|row| row.first()).is_some_and(|&flag| flag != 0);
        if needed[other] || requested
        {
            table.push(other);
        }
    }
    log::debug!("rank {rank} communicates with {:?}", &table[1..]);
    table
}
