//! Simple bitonic sorting network: one launch per (stage, step).

use super::{SortJob, SortStrategy};
use crate::bits;
use crate::error::Result;
use crate::runtime::{Backend, EventWaitList, KernelArg, Worksize};
use crate::types::ElemType;

pub(crate) const KERNEL: &str = "sbitonic";

pub(crate) struct Sbitonic;

/// Thread count and stage count of a bitonic network over `n` elements:
/// one thread per compared pair of the power-of-two padded array.
pub(crate) fn network(n: usize) -> (usize, u32) {
    let threads = bits::nlpo2(n) / 2;
    let stages = bits::tzc((threads * 2) as u32);
    (threads, stages)
}

/// Power-of-two work size for `threads` threads of a bitonic kernel.
pub(crate) fn bitonic_worksize<B: Backend>(
    job: &SortJob<'_, B>,
    kernel: &str,
    threads: usize,
) -> Result<Worksize> {
    let cap = job.launcher.lws_cap(kernel, threads, job.lws_max)?;
    Ok(Worksize::po2(threads, cap))
}

impl<B: Backend> SortStrategy<B> for Sbitonic {
    fn kernel_names(&self) -> Vec<String> {
        vec![KERNEL.to_string()]
    }

    fn localmem_usage(&self, _index: usize, _lws_cap: usize, _n: usize, _elem: ElemType) -> usize {
        0
    }

    fn sort(&self, job: &SortJob<'_, B>) -> Result<EventWaitList<B::Event>> {
        let (data, mut wait) = job.in_place_target()?;
        let (threads, stages) = network(job.n);
        let ws = bitonic_worksize(job, KERNEL, threads)?;
        log::debug!(
            "sbitonic: n={} gws={} lws={} stages={}",
            job.n,
            ws.gws,
            ws.lws,
            stages
        );

        let n = job.n as u32;
        for stage in 1..=stages {
            for step in (1..=stage).rev() {
                let args = [
                    KernelArg::Buffer(data),
                    KernelArg::Uint(n),
                    KernelArg::Uint(stage),
                    KernelArg::Uint(step),
                ];
                let ev = job.launcher.kernel(KERNEL, ws, &args, &wait)?;
                wait = EventWaitList::single(ev);
            }
        }
        Ok(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_shape() {
        assert_eq!(network(2), (1, 1));
        assert_eq!(network(5), (4, 3));
        assert_eq!(network(1024), (512, 10));
        assert_eq!(network(1025), (1024, 11));
    }
}
