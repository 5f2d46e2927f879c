//! Collective operations of the SPMD execution model.
//!
//! Every rank runs the same step sequence and must enter each collective in
//! the same order. The engine only talks to other ranks through this trait.
//! [`SerialCommunicator`] is the single-rank implementation;
//! [`ThreadCommunicator`] runs a group of ranks as threads of one process.

use crate::error::{RiftError, RiftResult};
use crate::mesh::Grid;
use crate::swarm::Particle;
use std::ops::Range;
use std::sync::{Arc, Barrier, Mutex, MutexGuard};

pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn barrier(&self);

    fn all_reduce_min(&self, value: f64) -> f64;
    fn all_reduce_max(&self, value: f64) -> f64;
    fn all_reduce_sum(&self, value: f64) -> f64;

    /// Element-wise sum across ranks, in place. Used for the per-element
    /// partial sums of particle projection onto the replicated mesh.
    fn all_reduce_sum_slice(&self, values: &mut [f64]);

    /// Element-wise minimum across ranks, in place.
    fn all_reduce_min_slice(&self, values: &mut [f64]);

    /// All-to-all exchange of particles that left this rank's partition.
    /// `outgoing[r]` is sent to rank `r`; the result holds what this rank received.
    fn exchange_particles(&self, outgoing: Vec<Vec<Particle>>) -> RiftResult<Vec<Particle>>;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_reduce_min(&self, value: f64) -> f64 {
        value
    }

    fn all_reduce_max(&self, value: f64) -> f64 {
        value
    }

    fn all_reduce_sum(&self, value: f64) -> f64 {
        value
    }

    fn all_reduce_sum_slice(&self, _values: &mut [f64]) {}

    fn all_reduce_min_slice(&self, _values: &mut [f64]) {}

    fn exchange_particles(&self, outgoing: Vec<Vec<Particle>>) -> RiftResult<Vec<Particle>> {
        if outgoing.len() > 1 && outgoing[1..].iter().any(|v| !v.is_empty()) {
            return Err(RiftError::instability("particles addressed to a rank that does not exist"));
        }
        // anything addressed to ourselves simply comes back
        Ok(outgoing.into_iter().next().unwrap_or_default())
    }
}

struct RankGroup {
    size: usize,
    barrier: Barrier,
    scalars: Mutex<Vec<f64>>,
    slices: Mutex<Vec<Vec<f64>>>,
    /// `mailboxes[from][to]`
    mailboxes: Mutex<Vec<Vec<Vec<Particle>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One rank of a group of threads sharing a process.
///
/// Each rank must be driven from its own thread: every collective blocks until
/// all ranks of the group have entered it. Contributions are combined in rank
/// order, so all ranks see bit-identical results.
#[derive(Clone)]
pub struct ThreadCommunicator {
    rank: usize,
    group: Arc<RankGroup>,
}

impl ThreadCommunicator {
    /// Communicators for ranks `0..size`, in rank order.
    pub fn group(size: usize) -> RiftResult<Vec<ThreadCommunicator>> {
        if size == 0 {
            return Err(RiftError::config("a rank group needs at least one rank"));
        }
        let group = Arc::new(RankGroup {
            size,
            barrier: Barrier::new(size),
            scalars: Mutex::new(vec![0.0; size]),
            slices: Mutex::new(vec![Vec::new(); size]),
            mailboxes: Mutex::new(vec![Vec::new(); size]),
        });
        Ok((0..size)
            .map(|rank| ThreadCommunicator {
                rank,
                group: Arc::clone(&group),
            })
            .collect())
    }

    fn reduce(&self, value: f64, fold: fn(f64, f64) -> f64) -> f64 {
        lock(&self.group.scalars)[self.rank] = value;
        self.group.barrier.wait();
        let result = lock(&self.group.scalars).iter().copied().reduce(fold).unwrap_or(value);
        // nobody may publish the next value before everyone has read this one
        self.group.barrier.wait();
        result
    }

    fn reduce_slice(&self, values: &mut [f64], fold: fn(f64, f64) -> f64) {
        lock(&self.group.slices)[self.rank] = values.to_vec();
        self.group.barrier.wait();
        {
            let slices = lock(&self.group.slices);
            for (k, v) in values.iter_mut().enumerate() {
                if let Some(combined) = slices.iter().filter_map(|s| s.get(k).copied()).reduce(fold) {
                    *v = combined;
                }
            }
        }
        self.group.barrier.wait();
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.group.size
    }

    fn barrier(&self) {
        self.group.barrier.wait();
    }

    fn all_reduce_min(&self, value: f64) -> f64 {
        self.reduce(value, f64::min)
    }

    fn all_reduce_max(&self, value: f64) -> f64 {
        self.reduce(value, f64::max)
    }

    fn all_reduce_sum(&self, value: f64) -> f64 {
        self.reduce(value, |a, b| a + b)
    }

    fn all_reduce_sum_slice(&self, values: &mut [f64]) {
        self.reduce_slice(values, |a, b| a + b);
    }

    fn all_reduce_min_slice(&self, values: &mut [f64]) {
        self.reduce_slice(values, f64::min);
    }

    fn exchange_particles(&self, mut outgoing: Vec<Vec<Particle>>) -> RiftResult<Vec<Particle>> {
        let size = self.group.size;
        // still take part in the exchange so the other ranks do not block
        let misaddressed = outgoing.iter().skip(size).any(|v| !v.is_empty());
        outgoing.resize_with(size, Vec::new);

        lock(&self.group.mailboxes)[self.rank] = outgoing;
        self.group.barrier.wait();
        let received: Vec<Particle> = {
            let mut mailboxes = lock(&self.group.mailboxes);
            let mut received = Vec::new();
            for from in 0..size {
                if let Some(mail) = mailboxes[from].get_mut(self.rank) {
                    received.append(mail);
                }
            }
            received
        };
        self.group.barrier.wait();

        if misaddressed {
            return Err(RiftError::instability("particles addressed to a rank that does not exist"));
        }
        Ok(received)
    }
}

/// Static split of the domain into vertical slabs, one per rank.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainPartition {
    pub ranks: usize,
    /// Element columns `[start, end)` owned by each rank.
    pub columns: Vec<(usize, usize)>,
    min_x: f64,
    dx: f64,
    nx: usize,
}

impl DomainPartition {
    pub fn new(grid: &Grid, ranks: usize) -> RiftResult<Self> {
        if ranks == 0 || ranks > grid.nx {
            return Err(RiftError::config(format!(
                "cannot split {} element columns across {ranks} ranks",
                grid.nx
            )));
        }
        let base = grid.nx / ranks;
        let extra = grid.nx % ranks;
        let mut columns = Vec::with_capacity(ranks);
        let mut start = 0;
        for r in 0..ranks {
            let width = base + usize::from(r < extra);
            columns.push((start, start + width));
            start += width;
        }
        Ok(DomainPartition {
            ranks,
            columns,
            min_x: grid.min.x,
            dx: grid.dx,
            nx: grid.nx,
        })
    }

    pub fn owner_of_column(&self, column: usize) -> usize {
        let column = column.min(self.nx - 1);
        self.columns
            .iter()
            .position(|&(s, e)| column >= s && column < e)
            .unwrap_or(self.ranks - 1)
    }

    /// Rank owning the slab that contains `x`; points outside clamp to the end ranks.
    pub fn owner(&self, x: f64) -> usize {
        let column = ((x - self.min_x) / self.dx).floor().max(0.0) as usize;
        self.owner_of_column(column)
    }

    pub fn owns(&self, rank: usize, x: f64) -> bool {
        self.owner(x) == rank
    }

    pub fn owned_columns(&self, rank: usize) -> Range<usize> {
        self.columns
            .get(rank)
            .map_or(0..0, |&(start, end)| start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;

    #[test]
    fn test_serial_reductions_are_identity() {
        let comm = SerialCommunicator;
        assert_eq!(comm.all_reduce_max(3.5), 3.5);
        assert_eq!(comm.all_reduce_min(-1.0), -1.0);
        assert_eq!(comm.all_reduce_sum(2.0), 2.0);
        let mut partial = [1.0, 2.0];
        comm.all_reduce_sum_slice(&mut partial);
        assert_eq!(partial, [1.0, 2.0]);
        assert!(comm.is_root());
        assert!(comm.exchange_particles(vec![Vec::new()]).unwrap().is_empty());
        assert!(comm.exchange_particles(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_partition_covers_all_columns() {
        let grid = Grid::new(DVec2::ZERO, DVec2::new(10.0, 1.0), 10, 1).unwrap();
        let part = DomainPartition::new(&grid, 3).unwrap();
        assert_eq!(part.columns, vec![(0, 4), (4, 7), (7, 10)]);
        assert_eq!(part.owner(0.5), 0);
        assert_eq!(part.owner(4.0), 1);
        assert_eq!(part.owner(10.0), 2);
        assert_eq!(part.owner(-3.0), 0);
        assert!(DomainPartition::new(&grid, 11).is_err());
    }

    #[test]
    fn test_thread_ranks_agree_on_reductions() {
        let comms = ThreadCommunicator::group(3).unwrap();
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let r = comm.rank() as f64;
                        let mut sums = [r, 1.0];
                        comm.all_reduce_sum_slice(&mut sums);
                        let mut mins = [r, 10.0 - r];
                        comm.all_reduce_min_slice(&mut mins);
                        (
                            comm.all_reduce_min(r),
                            comm.all_reduce_max(r),
                            comm.all_reduce_sum(r),
                            sums,
                            mins,
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for result in results {
            assert_eq!(result, (0.0, 2.0, 3.0, [3.0, 3.0], [0.0, 8.0]));
        }
        assert!(ThreadCommunicator::group(0).is_err());
    }

    #[test]
    fn test_owned_columns_follow_the_split() {
        let grid = Grid::new(DVec2::ZERO, DVec2::new(10.0, 1.0), 10, 1).unwrap();
        let part = DomainPartition::new(&grid, 3).unwrap();
        assert_eq!(part.owned_columns(0), 0..4);
        assert_eq!(part.owned_columns(2), 7..10);
        assert_eq!(part.owned_columns(3), 0..0);
    }
}
