//! Cross-shard collective operations.
//!
//! The data-parallel runtime is an external collaborator; this trait pins
//! down the two collectives the loops need. Collectives are synchronous and
//! blocking: every shard must reach the same call in the same order, or the
//! group deadlocks. Gathers concatenate the shards' contributions in rank
//! order and preserve within-shard order.

use std::sync::{Arc, Barrier, Mutex};

use crate::config::FinetuneError;

pub trait Collective: Send + Sync {
    fn world_size(&self) -> usize;
    fn rank(&self) -> usize;
    /// Average a scalar across all shards. Used for loss reporting only.
    fn all_reduce_mean(&self, value: f64) -> Result<f64, FinetuneError>;
    fn all_gather_f32(&self, local: &[f32]) -> Result<Vec<f32>, FinetuneError>;
    fn all_gather_u32(&self, local: &[u32]) -> Result<Vec<u32>, FinetuneError>;
}

/// World size 1: every collective is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn world_size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn all_reduce_mean(&self, value: f64) -> Result<f64, FinetuneError> {
        Ok(value)
    }

    fn all_gather_f32(&self, local: &[f32]) -> Result<Vec<f32>, FinetuneError> {
        Ok(local.to_vec())
    }

    fn all_gather_u32(&self, local: &[u32]) -> Result<Vec<u32>, FinetuneError> {
        Ok(local.to_vec())
    }
}

/// In-process data-parallel group, one member handle per shard thread.
///
/// Reproduces the blocking-barrier semantics of the real runtime: each
/// member parks on a shared barrier until the whole group has contributed,
/// reads the combined result, then parks again so no member can race ahead
/// and overwrite a slot that is still being read.
pub struct ThreadedCollective {
    rank: usize,
    world_size: usize,
    state: Arc<GroupState>,
}

struct GroupState {
    barrier: Barrier,
    f64_slots: Mutex<Vec<f64>>,
    f32_slots: Mutex<Vec<Vec<f32>>>,
    u32_slots: Mutex<Vec<Vec<u32>>>,
}

impl ThreadedCollective {
    /// Build a group of `world_size` member handles, one per shard.
    pub fn group(world_size: usize) -> Vec<ThreadedCollective> {
        let state = Arc::new(GroupState {
            barrier: Barrier::new(world_size),
            f64_slots: Mutex::new(vec![0.0; world_size]),
            f32_slots: Mutex::new(vec![Vec::new(); world_size]),
            u32_slots: Mutex::new(vec![Vec::new(); world_size]),
        });

        (0..world_size)
            .map(|rank| ThreadedCollective {
                rank,
                world_size,
                state: Arc::clone(&state),
            })
            .collect()
    }

    fn exchange<T, R>(
        &self,
        slots: &Mutex<Vec<T>>,
        write: impl FnOnce(&mut T),
        read: impl FnOnce(&[T]) -> R,
    ) -> Result<R, FinetuneError> {
        {
            let mut guard = slots
                .lock()
                .map_err(|_| FinetuneError::runtime("collective group poisoned"))?;
            write(&mut guard[self.rank]);
        }
        self.state.barrier.wait();
        let result = {
            let guard = slots
                .lock()
                .map_err(|_| FinetuneError::runtime("collective group poisoned"))?;
            read(&guard)
        };
        self.state.barrier.wait();
        Ok(result)
    }
}

impl Collective for ThreadedCollective {
    fn world_size(&self) -> usize {
        self.world_size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn all_reduce_mean(&self, value: f64) -> Result<f64, FinetuneError> {
        let world = self.world_size as f64;
        self.exchange(
            &self.state.f64_slots,
            |slot| *slot = value,
            |slots| slots.iter().sum::<f64>() / world,
        )
    }

    fn all_gather_f32(&self, local: &[f32]) -> Result<Vec<f32>, FinetuneError> {
        self.exchange(
            &self.state.f32_slots,
            |slot| *slot = local.to_vec(),
            |slots| slots.iter().flatten().copied().collect(),
        )
    }

    fn all_gather_u32(&self, local: &[u32]) -> Result<Vec<u32>, FinetuneError> {
        self.exchange(
            &self.state.u32_slots,
            |slot| *slot = local.to_vec(),
            |slots| slots.iter().flatten().copied().collect(),
        )
    }
}
