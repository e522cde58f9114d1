//! Work-efficient three-phase exclusive scan.
//!
//! 1. `workgroupScan`: each work-group scans a block of `2 * lws` elements in
//!    local memory and writes the block total to a work-group sums array.
//! 2. `workgroupSumsScan`: one work-group scans the sums array in place. When
//!    there are more sums than one work-group can hold, the whole scan recurses
//!    on the sums array instead (its first phase is `workgroupScanSums`, which
//!    reads sum-typed input).
//! 3. `addWorkgroupSums`: every block adds its scanned work-group sum.

use crate::bits;
use crate::coordinator::Launcher;
use crate::error::Result;
use crate::runtime::{Backend, EventWaitList, KernelArg, Worksize};
use crate::types::ElemType;

pub const WORKGROUP_SCAN: &str = "workgroupScan";
pub const WORKGROUP_SCAN_SUMS: &str = "workgroupScanSums";
pub const WORKGROUP_SUMS_SCAN: &str = "workgroupSumsScan";
pub const ADD_WORKGROUP_SUMS: &str = "addWorkgroupSums";

pub(crate) fn kernel_names() -> Vec<String> {
    [WORKGROUP_SCAN, WORKGROUP_SCAN_SUMS, WORKGROUP_SUMS_SCAN, ADD_WORKGROUP_SUMS]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(crate) struct Blelloch;

impl Blelloch {
    #[allow(clippy::too_many_arguments)]
    pub fn scan<B: Backend>(
        &self,
        l: &Launcher<'_, B>,
        sum: ElemType,
        input: &B::Buffer,
        output: &B::Buffer,
        n: usize,
        lws_max: usize,
        wait: EventWaitList<B::Event>,
    ) -> Result<EventWaitList<B::Event>> {
        if n == 0 {
            return Ok(wait);
        }
        let half = n.div_ceil(2);
        let max_local_mem = l.backend.device_info().max_local_mem;
        let lws = bits::flpo2(l.lws_cap(WORKGROUP_SCAN, half, lws_max)?)
            .min(bits::nlpo2(half))
            .min(bits::flpo2(max_local_mem / (2 * sum.size())).max(1));
        log::debug!(
            "blelloch: n={} lws={} groups={}",
            n,
            lws,
            n.div_ceil(2 * lws)
        );
        self.level(l, WORKGROUP_SCAN, sum, input, output, n, lws, wait)
    }

    #[allow(clippy::too_many_arguments)]
    fn level<B: Backend>(
        &self,
        l: &Launcher<'_, B>,
        first_kernel: &str,
        sum: ElemType,
        input: &B::Buffer,
        output: &B::Buffer,
        n: usize,
        lws: usize,
        wait: EventWaitList<B::Event>,
    ) -> Result<EventWaitList<B::Event>> {
        let block = 2 * lws;
        let groups = n.div_ceil(block);
        let ws = Worksize::fitted(groups * lws, lws);
        let local = block * sum.size();

        let wgsums = l.alloc("scan work-group sums", groups * sum.size())?;
        let args = [
            KernelArg::Buffer(input),
            KernelArg::Buffer(output),
            KernelArg::Buffer(&wgsums),
            KernelArg::Local(local),
            KernelArg::Uint(n as u32),
        ];
        let ev = l.kernel(first_kernel, ws, &args, &wait)?;
        if groups == 1 {
            return Ok(EventWaitList::single(ev));
        }

        let scanned;
        let (sums, wait) = if groups <= block {
            let args = [
                KernelArg::Buffer(&wgsums),
                KernelArg::Local(local),
                KernelArg::Uint(groups as u32),
            ];
            let ev = l.kernel(WORKGROUP_SUMS_SCAN, Worksize::fitted(lws, lws), &args, &EventWaitList::single(ev))?;
            (&wgsums, EventWaitList::single(ev))
        } else {
            log::debug!("blelloch: {} work-group sums, recursing", groups);
            scanned = l.alloc("scan work-group sums scanned", groups * sum.size())?;
            let wl = self.level(
                l,
                WORKGROUP_SCAN_SUMS,
                sum,
                &wgsums,
                &scanned,
                groups,
                lws,
                EventWaitList::single(ev),
            )?;
            (&scanned, wl)
        };

        let args = [
            KernelArg::Buffer(output),
            KernelArg::Buffer(sums),
            KernelArg::Uint(n as u32),
        ];
        let ev = l.kernel(ADD_WORKGROUP_SUMS, ws, &args, &wait)?;
        Ok(EventWaitList::single(ev))
    }
}
