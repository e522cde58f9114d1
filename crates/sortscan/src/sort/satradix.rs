//! LSD radix sort with 4-bit digits.
//!
//! Each pass over one digit runs four launches: every work-group stably sorts
//! its block of `2 * lws` elements by the digit, counts the digit occurrences
//! per block into a digit-major histogram, the histogram is exclusive-scanned
//! with the scan engine, and the blocks scatter their elements to the scanned
//! offsets. Passes ping-pong between the data buffer and a scratch buffer; key
//! widths are whole bytes, so the pass count is even and the result always
//! lands back in the data buffer.

use std::sync::Arc;

use super::{SortJob, SortStrategy};
use crate::bits;
use crate::compare::Comparator;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::runtime::{Backend, EventWaitList, KernelArg, Worksize};
use crate::scan::{Scan, ScanBuilder};
use crate::types::ElemType;

pub const RADIX_BITS: u32 = 4;
pub const RADIX: usize = 1 << RADIX_BITS;

pub(crate) const LOCALSORT: &str = "satradix_localsort";
pub(crate) const HISTOGRAM: &str = "satradix_histogram";
pub(crate) const SCATTER: &str = "satradix_scatter";

pub(crate) struct Satradix<B: Backend> {
    scan: Scan<B>,
    max_local_mem: usize,
}

impl<B: Backend> Satradix<B> {
    pub fn new(backend: &Arc<B>, comparator: &Comparator, config: &EngineConfig) -> Result<Self> {
        debug_assert!(comparator.key_bits() % (2 * RADIX_BITS) == 0);
        let scan = ScanBuilder::new("blelloch")
            .config(config.clone())
            .build(backend, ElemType::UInt, ElemType::UInt)?;
        let max_local_mem = backend.device_info().max_local_mem;
        Ok(Self { scan, max_local_mem })
    }

    pub fn passes(comparator: &Comparator) -> u32 {
        comparator.key_bits() / RADIX_BITS
    }

    /// Work-group size for blocks of `2 * lws` elements: a power of two no
    /// larger than the kernel allows, the input needs, or the block fits in
    /// local memory.
    fn block_lws(&self, lws_cap: usize, n: usize, elem: ElemType) -> usize {
        let half = n.div_ceil(2);
        bits::flpo2(lws_cap)
            .min(bits::nlpo2(half).max(1))
            .min(bits::flpo2(self.max_local_mem / (2 * (elem.size() + 4))).max(1))
    }
}

/// Local memory per kernel for a work-group of `lws` threads.
pub(crate) fn local_mem(kernel: usize, lws: usize, elem: ElemType) -> usize {
    match kernel {
        // Block values plus one 32-bit scan slot per value.
        0 => 2 * lws * (elem.size() + 4),
        1 => RADIX * 4,
        _ => 2 * RADIX * 4,
    }
}

impl<B: Backend> SortStrategy<B> for Satradix<B> {
    fn kernel_names(&self) -> Vec<String> {
        vec![LOCALSORT.to_string(), HISTOGRAM.to_string(), SCATTER.to_string()]
    }

    fn localmem_usage(&self, index: usize, lws_cap: usize, n: usize, elem: ElemType) -> usize {
        local_mem(index, self.block_lws(lws_cap, n, elem), elem)
    }

    fn sort(&self, job: &SortJob<'_, B>) -> Result<EventWaitList<B::Event>> {
        let (data, mut wait) = job.in_place_target()?;
        let l = &job.launcher;
        let elem = job.comparator.elem;
        let size = elem.size();

        let lws_cap = l.lws_cap(LOCALSORT, job.n.div_ceil(2), job.lws_max)?;
        let lws = self.block_lws(lws_cap, job.n, elem);
        let groups = job.n.div_ceil(2 * lws);
        let ws = Worksize::fitted(groups * lws, lws);
        let counters = RADIX * groups;
        let passes = Self::passes(job.comparator);
        log::debug!(
            "satradix: n={} lws={} groups={} passes={}",
            job.n,
            lws,
            groups,
            passes
        );

        let scratch = l.alloc("satradix scratch", job.n * size)?;
        let hist = l.alloc("satradix histogram", counters * 4)?;
        let offsets = l.alloc("satradix offsets", counters * 4)?;
        let scan_launcher = l.with_program(self.scan.program());

        let n = job.n as u32;
        let (mut src, mut dst) = (data, &scratch);
        for pass in 0..passes {
            let shift = pass * RADIX_BITS;
            let args = [
                KernelArg::Buffer(src),
                KernelArg::Uint(n),
                KernelArg::Uint(shift),
                KernelArg::Local(local_mem(0, lws, elem)),
            ];
            let ev = l.kernel(LOCALSORT, ws, &args, &wait)?;

            let args = [
                KernelArg::Buffer(src),
                KernelArg::Buffer(&hist),
                KernelArg::Uint(n),
                KernelArg::Uint(shift),
                KernelArg::Local(local_mem(1, lws, elem)),
            ];
            let ev = l.kernel(HISTOGRAM, ws, &args, &EventWaitList::single(ev))?;

            wait = self.scan.enqueue(
                &scan_launcher,
                &hist,
                &offsets,
                counters,
                job.lws_max,
                EventWaitList::single(ev),
            )?;

            let args = [
                KernelArg::Buffer(src),
                KernelArg::Buffer(dst),
                KernelArg::Buffer(&offsets),
                KernelArg::Uint(n),
                KernelArg::Uint(shift),
                KernelArg::Local(local_mem(2, lws, elem)),
            ];
            let ev = l.kernel(SCATTER, ws, &args, &wait)?;
            wait = EventWaitList::single(ev);
            std::mem::swap(&mut src, &mut dst);
        }
        Ok(wait)
    }
}
