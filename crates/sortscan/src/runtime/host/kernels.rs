//! CPU renditions of every kernel the engines launch.
//!
//! Each function reproduces what one NDRange launch computes on a device,
//! including the checks a kernel relies on its launcher for (block fits in the
//! work-group, enough threads to cover the data).

use anyhow::{anyhow, bail, ensure, Result};

use super::HostBuffer;
use crate::bits;
use crate::compare::Comparator;
use crate::runtime::{KernelArg, ProgramKind, ProgramSource, Worksize};
use crate::sort::abitonic::AbitonicKernel;
use crate::sort::satradix::RADIX;
use crate::types::{ElemType, Value};

type Args<'a, 'b> = &'a [KernelArg<'b, HostBuffer>];

pub(super) fn check_program(source: &ProgramSource) -> Result<()> {
    match source.kind {
        ProgramKind::Blelloch => {
            ensure!(source.sum.is_some(), "scan program needs a sum type");
        }
        _ => {
            ensure!(source.comparator.is_some(), "sort program needs a comparator");
        }
    }
    if source.kind == ProgramKind::Abitonic {
        for k in &source.kernels {
            ensure!(AbitonicKernel::parse(k).is_some(), "unknown kernel '{}'", k);
        }
    }
    Ok(())
}

pub(super) fn dispatch(
    source: &ProgramSource,
    kernel: &str,
    ws: Worksize,
    args: Args<'_, '_>,
) -> Result<()> {
    match (source.kind, kernel) {
        (ProgramKind::Sbitonic, "sbitonic") => {
            bitonic(comparator(source)?, AbitonicKernel::Any, ws, args)
        }
        (ProgramKind::Abitonic, name) => {
            let variant =
                AbitonicKernel::parse(name).ok_or_else(|| anyhow!("unknown kernel '{}'", name))?;
            bitonic(comparator(source)?, variant, ws, args)
        }
        (ProgramKind::Gselect, "gselect") => gselect(comparator(source)?, ws, args),
        (ProgramKind::Satradix, "satradix_localsort") => {
            radix_localsort(comparator(source)?, ws, args)
        }
        (ProgramKind::Satradix, "satradix_histogram") => {
            radix_histogram(comparator(source)?, ws, args)
        }
        (ProgramKind::Satradix, "satradix_scatter") => {
            radix_scatter(comparator(source)?, ws, args)
        }
        (ProgramKind::Blelloch, "workgroupScan") => workgroup_scan(source.elem, sum(source)?, ws, args),
        (ProgramKind::Blelloch, "workgroupScanSums") => {
            let s = sum(source)?;
            workgroup_scan(s, s, ws, args)
        }
        (ProgramKind::Blelloch, "workgroupSumsScan") => workgroup_sums_scan(sum(source)?, ws, args),
        (ProgramKind::Blelloch, "addWorkgroupSums") => add_workgroup_sums(sum(source)?, ws, args),
        (kind, name) => bail!("kernel '{}' is not part of a {:?} program", name, kind),
    }
}

fn comparator(source: &ProgramSource) -> Result<&Comparator> {
    source
        .comparator
        .as_ref()
        .ok_or_else(|| anyhow!("sort program without comparator"))
}

fn sum(source: &ProgramSource) -> Result<ElemType> {
    source.sum.ok_or_else(|| anyhow!("scan program without sum type"))
}

fn buffer<'a>(args: Args<'a, '_>, i: usize) -> Result<&'a HostBuffer> {
    match args.get(i) {
        Some(KernelArg::Buffer(b)) => Ok(b),
        other => bail!("argument {} must be a buffer, got {:?}", i, other),
    }
}

fn uint(args: Args<'_, '_>, i: usize) -> Result<usize> {
    match args.get(i) {
        Some(KernelArg::Uint(v)) => Ok(*v as usize),
        other => bail!("argument {} must be a uint, got {:?}", i, other),
    }
}

fn local(args: Args<'_, '_>, i: usize) -> Result<usize> {
    match args.get(i) {
        Some(KernelArg::Local(v)) => Ok(*v),
        other => bail!("argument {} must be local memory, got {:?}", i, other),
    }
}

fn swap_elems(data: &mut [u8], size: usize, i: usize, j: usize) {
    let (lo, hi) = data.split_at_mut(j * size);
    lo[i * size..(i + 1) * size].swap_with_slice(&mut hi[..size]);
}

/// Index pair compared by thread `gid` in one bitonic step.
///
/// The first step of each stage compares an element with its mirror in the
/// stage block, so every stage sorts ascending and `n` need not be a power of two.
pub(crate) fn bitonic_pair(gid: usize, stage: u32, step: u32) -> (usize, usize) {
    let half = 1usize << (step - 1);
    let i = ((gid >> (step - 1)) << step) | (gid & (half - 1));
    if step == stage {
        let block = 1usize << stage;
        let base = i & !(block - 1);
        (i, base + block - 1 - (i - base))
    } else {
        (i, i + half)
    }
}

fn bitonic_step(data: &mut [u8], cmp: &Comparator, n: usize, stage: u32, step: u32, threads: usize) {
    let size = cmp.elem.size();
    for gid in 0..threads {
        let (i, j) = bitonic_pair(gid, stage, step);
        if j < n && cmp.compare(&data[i * size..(i + 1) * size], &data[j * size..(j + 1) * size]).is_gt() {
            swap_elems(data, size, i, j);
        }
    }
}

fn bitonic(cmp: &Comparator, variant: AbitonicKernel, ws: Worksize, args: Args<'_, '_>) -> Result<()> {
    let buf = buffer(args, 0)?;
    let n = uint(args, 1)?;
    let stage = uint(args, 2)? as u32;
    let step = uint(args, 3)? as u32;
    ensure!(step >= 1 && step <= stage, "invalid step {} for stage {}", step, stage);

    let span = bits::nlpo2(n);
    let per_thread = variant.values_per_thread();
    ensure!(
        ws.gws * per_thread >= span,
        "{} threads of {} values cannot cover {} elements",
        ws.gws,
        per_thread,
        span
    );

    let last = match variant {
        AbitonicKernel::Any => step,
        AbitonicKernel::Private { steps } => {
            ensure!(step < stage, "private-memory steps cannot include the mirror step");
            ensure!(step >= steps, "step {} cannot fuse {} steps", step, steps);
            step + 1 - steps
        }
        AbitonicKernel::Local { steps } => {
            ensure!(step == steps, "kernel finishes from step {}, got {}", steps, step);
            ensure!(
                1usize << step <= 2 * ws.lws,
                "block of {} elements exceeds work-group capacity {}",
                1usize << step,
                2 * ws.lws
            );
            1
        }
        AbitonicKernel::Hybrid { steps, private } => {
            ensure!(step == steps, "kernel finishes from step {}, got {}", steps, step);
            ensure!(
                1usize << step <= ws.lws << private,
                "block of {} elements exceeds work-group capacity {}",
                1usize << step,
                ws.lws << private
            );
            1
        }
    };

    let mut data = buf.lock()?;
    ensure!(data.len() >= n * cmp.elem.size(), "buffer smaller than {} elements", n);
    let pairs = span / 2;
    for t in (last..=step).rev() {
        bitonic_step(&mut data, cmp, n, stage, t, pairs);
    }
    Ok(())
}

fn gselect(cmp: &Comparator, ws: Worksize, args: Args<'_, '_>) -> Result<()> {
    let input = buffer(args, 0)?;
    let output = buffer(args, 1)?;
    let n = uint(args, 2)?;
    ensure!(ws.gws >= n, "{} threads cannot rank {} elements", ws.gws, n);
    let size = cmp.elem.size();
    let data = input.snapshot()?;
    let mut out = output.lock()?;
    ensure!(data.len() >= n * size && out.len() >= n * size, "buffers smaller than {} elements", n);

    for i in 0..n {
        let a = &data[i * size..(i + 1) * size];
        let mut rank = 0;
        for j in 0..n {
            let b = &data[j * size..(j + 1) * size];
            match cmp.compare(b, a) {
                std::cmp::Ordering::Less => rank += 1,
                std::cmp::Ordering::Equal if j < i => rank += 1,
                _ => {}
            }
        }
        out[rank * size..(rank + 1) * size].copy_from_slice(a);
    }
    Ok(())
}

// Radix blocks are 2*lws elements, one block per work-group.
fn radix_block(ws: Worksize, n: usize, g: usize) -> std::ops::Range<usize> {
    let block = 2 * ws.lws;
    (g * block).min(n)..((g + 1) * block).min(n)
}

fn digit(cmp: &Comparator, element: &[u8], shift: usize) -> usize {
    ((cmp.radix_key(element) >> shift) as usize) & (RADIX - 1)
}

fn check_radix_cover(ws: Worksize, n: usize) -> Result<usize> {
    let groups = ws.groups();
    ensure!(
        groups * 2 * ws.lws >= n,
        "{} groups of {} cannot cover {} elements",
        groups,
        2 * ws.lws,
        n
    );
    Ok(groups)
}

fn radix_localsort(cmp: &Comparator, ws: Worksize, args: Args<'_, '_>) -> Result<()> {
    let buf = buffer(args, 0)?;
    let n = uint(args, 1)?;
    let shift = uint(args, 2)?;
    let groups = check_radix_cover(ws, n)?;
    let size = cmp.elem.size();
    let mut data = buf.lock()?;
    for g in 0..groups {
        let range = radix_block(ws, n, g);
        let block = &mut data[range.start * size..range.end * size];
        let mut elems: Vec<Vec<u8>> = block.chunks_exact(size).map(<[u8]>::to_vec).collect();
        // Stable.
        elems.sort_by_key(|e| digit(cmp, e, shift));
        for (dst, e) in block.chunks_exact_mut(size).zip(elems) {
            dst.copy_from_slice(&e);
        }
    }
    Ok(())
}

fn radix_histogram(cmp: &Comparator, ws: Worksize, args: Args<'_, '_>) -> Result<()> {
    let buf = buffer(args, 0)?;
    let hist = buffer(args, 1)?;
    let n = uint(args, 2)?;
    let shift = uint(args, 3)?;
    let groups = check_radix_cover(ws, n)?;
    let size = cmp.elem.size();
    let data = buf.snapshot()?;
    let mut counts = vec![0u32; RADIX * groups];
    for g in 0..groups {
        let range = radix_block(ws, n, g);
        for e in data[range.start * size..range.end * size].chunks_exact(size) {
            counts[digit(cmp, e, shift) * groups + g] += 1;
        }
    }
    let mut out = hist.lock()?;
    ensure!(out.len() >= counts.len() * 4, "histogram buffer too small");
    out[..counts.len() * 4].copy_from_slice(bytemuck::cast_slice(&counts));
    Ok(())
}

fn radix_scatter(cmp: &Comparator, ws: Worksize, args: Args<'_, '_>) -> Result<()> {
    let input = buffer(args, 0)?;
    let output = buffer(args, 1)?;
    let offsets = buffer(args, 2)?;
    let n = uint(args, 3)?;
    let shift = uint(args, 4)?;
    let groups = check_radix_cover(ws, n)?;
    let size = cmp.elem.size();
    let data = input.snapshot()?;
    let offs = offsets.snapshot()?;
    ensure!(offs.len() >= RADIX * groups * 4, "offset buffer too small");
    let offs: Vec<u32> = offs[..RADIX * groups * 4]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let mut out = output.lock()?;
    ensure!(out.len() >= n * size, "output buffer smaller than {} elements", n);
    for g in 0..groups {
        let range = radix_block(ws, n, g);
        let mut seen = [0usize; RADIX];
        for p in range {
            let e = &data[p * size..(p + 1) * size];
            let d = digit(cmp, e, shift);
            let dest = offs[d * groups + g] as usize + seen[d];
            seen[d] += 1;
            ensure!(dest < n, "scatter destination {} out of range", dest);
            out[dest * size..(dest + 1) * size].copy_from_slice(e);
        }
    }
    Ok(())
}

fn workgroup_scan(elem: ElemType, sum: ElemType, ws: Worksize, args: Args<'_, '_>) -> Result<()> {
    let input = buffer(args, 0)?;
    let output = buffer(args, 1)?;
    let wgsums = buffer(args, 2)?;
    let lmem = local(args, 3)?;
    let n = uint(args, 4)?;
    let block = 2 * ws.lws;
    let groups = ws.groups();
    ensure!(lmem >= block * sum.size(), "local memory too small for {} sums", block);
    ensure!(groups * block >= n, "{} groups cannot cover {} elements", groups, n);

    ensure!(output.id() != wgsums.id(), "output and work-group sums must not alias");

    let (es, ss) = (elem.size(), sum.size());
    let data = input.snapshot()?;
    let mut out = output.lock()?;
    ensure!(out.len() >= n * ss, "output buffer smaller than {} sums", n);
    let mut sums = wgsums.lock()?;
    ensure!(sums.len() >= groups * ss, "work-group sums buffer holds fewer than {} entries", groups);
    for g in 0..groups {
        let mut acc = sum.zero();
        for i in (g * block).min(n)..((g + 1) * block).min(n) {
            sum.encode(acc, &mut out[i * ss..(i + 1) * ss]);
            acc = sum.add(acc, elem.decode(&data[i * es..(i + 1) * es]));
        }
        sum.encode(acc, &mut sums[g * ss..(g + 1) * ss]);
    }
    Ok(())
}

fn workgroup_sums_scan(sum: ElemType, ws: Worksize, args: Args<'_, '_>) -> Result<()> {
    let wgsums = buffer(args, 0)?;
    let lmem = local(args, 1)?;
    let count = uint(args, 2)?;
    ensure!(ws.groups() == 1, "work-group sums are scanned by a single work-group");
    ensure!(count <= 2 * ws.lws, "{} sums exceed one work-group", count);
    ensure!(lmem >= 2 * ws.lws * sum.size(), "local memory too small");
    let ss = sum.size();
    let mut sums = wgsums.lock()?;
    let mut acc = sum.zero();
    for i in 0..count {
        let v: Value = sum.decode(&sums[i * ss..(i + 1) * ss]);
        sum.encode(acc, &mut sums[i * ss..(i + 1) * ss]);
        acc = sum.add(acc, v);
    }
    Ok(())
}

fn add_workgroup_sums(sum: ElemType, ws: Worksize, args: Args<'_, '_>) -> Result<()> {
    let output = buffer(args, 0)?;
    let wgsums = buffer(args, 1)?;
    let n = uint(args, 2)?;
    let block = 2 * ws.lws;
    let groups = ws.groups();
    let ss = sum.size();
    let sums = wgsums.snapshot()?;
    ensure!(sums.len() >= groups * ss, "work-group sums buffer holds fewer than {} entries", groups);
    let mut out = output.lock()?;
    for g in 1..groups {
        let add = sum.decode(&sums[g * ss..(g + 1) * ss]);
        for i in (g * block).min(n)..((g + 1) * block).min(n) {
            let v = sum.add(sum.decode(&out[i * ss..(i + 1) * ss]), add);
            sum.encode(v, &mut out[i * ss..(i + 1) * ss]);
        }
    }
    Ok(())
}
