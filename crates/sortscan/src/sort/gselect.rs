//! Global-memory selection sort.
//!
//! Each thread ranks one element against all others and writes it straight to
//! its final slot, so the sort always targets a second buffer.

use super::{SortJob, SortStrategy};
use crate::error::Result;
use crate::runtime::{Backend, EventWaitList, KernelArg};
use crate::types::ElemType;

pub(crate) const KERNEL: &str = "gselect";

pub(crate) struct Gselect;

impl<B: Backend> SortStrategy<B> for Gselect {
    fn kernel_names(&self) -> Vec<String> {
        vec![KERNEL.to_string()]
    }

    fn localmem_usage(&self, _index: usize, _lws_cap: usize, _n: usize, _elem: ElemType) -> usize {
        0
    }

    fn sort(&self, job: &SortJob<'_, B>) -> Result<EventWaitList<B::Event>> {
        let l = &job.launcher;
        let ws = l.fitted(KERNEL, job.n, job.lws_max)?;
        log::debug!("gselect: n={} gws={} lws={}", job.n, ws.gws, ws.lws);

        let n = job.n as u32;
        match job.output {
            Some(out) => {
                let args = [KernelArg::Buffer(job.input), KernelArg::Buffer(out), KernelArg::Uint(n)];
                let ev = l.kernel(KERNEL, ws, &args, &EventWaitList::new())?;
                Ok(EventWaitList::single(ev))
            }
            None => {
                let bytes = job.n * job.comparator.elem.size();
                // Dropped on return; the device keeps it alive for queued commands.
                let tmp = l.alloc("gselect output", bytes)?;
                let args = [KernelArg::Buffer(job.input), KernelArg::Buffer(&tmp), KernelArg::Uint(n)];
                let ev = l.kernel(KERNEL, ws, &args, &EventWaitList::new())?;
                let ev = l.copy(&tmp, job.input, bytes, &EventWaitList::single(ev))?;
                Ok(EventWaitList::single(ev))
            }
        }
    }
}
