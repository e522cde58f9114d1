//! WGSL sources for every kernel the engines launch.
//!
//! A shader is rendered for one kernel, element type and work-group size: a
//! generated header fixes `T` (element), `S` (sum), `WG` and the ordering, and
//! a static body provides the entry point `main`. Kernel scalars arrive in a
//! uniform block whose slot 0 holds the number of work-groups of the launch;
//! dispatches wider than the per-dimension limit are tiled in two dimensions
//! and every kernel linearizes its group id and drops the excess groups.

use anyhow::{anyhow, bail, ensure, Result};

use crate::compare::Order;
use crate::runtime::{ProgramKind, ProgramSource};
use crate::scan::{ADD_WORKGROUP_SUMS, WORKGROUP_SCAN, WORKGROUP_SCAN_SUMS, WORKGROUP_SUMS_SCAN};
use crate::sort::abitonic::AbitonicKernel;
use crate::sort::satradix::{HISTOGRAM, LOCALSORT, RADIX, SCATTER};
use crate::types::ElemType;

/// A rendered kernel and the number of storage buffers it binds.
#[derive(Debug, Clone)]
pub(super) struct Shader {
    pub wgsl: String,
    pub buffers: usize,
}

pub(super) fn render(source: &ProgramSource, kernel: &str, lws: usize) -> Result<Shader> {
    // Ranking is the only kernel without a tree over the work-group.
    ensure!(
        lws.is_power_of_two() || (lws > 0 && kernel == "gselect"),
        "work-group size {} is not a power of two",
        lws
    );
    match source.kind {
        ProgramKind::Blelloch => render_scan(source, kernel, lws),
        _ => render_sort(source, kernel, lws),
    }
}

fn wgsl_type(ty: ElemType) -> Result<&'static str> {
    ty.wgsl_name()
        .ok_or_else(|| anyhow!("element type {} is not supported by the wgpu backend", ty))
}

fn render_sort(source: &ProgramSource, kernel: &str, lws: usize) -> Result<Shader> {
    let cmp = source
        .comparator
        .as_ref()
        .ok_or_else(|| anyhow!("sort program without comparator"))?;
    ensure!(
        cmp.is_whole_element(),
        "the wgpu backend only sorts by the whole element"
    );
    let ty = wgsl_type(cmp.elem)?;

    let (body, buffers, private) = match (source.kind, kernel) {
        (ProgramKind::Sbitonic, "sbitonic") => (BITONIC_STEP, 1, None),
        (ProgramKind::Abitonic, name) => match AbitonicKernel::parse(name) {
            Some(AbitonicKernel::Any) => (BITONIC_STEP, 1, None),
            Some(AbitonicKernel::Local { .. }) => (BITONIC_LOCAL, 1, None),
            Some(AbitonicKernel::Private { steps }) => (BITONIC_PRIVATE, 1, Some(steps)),
            Some(AbitonicKernel::Hybrid { private, .. }) => (BITONIC_HYBRID, 1, Some(private)),
            None => bail!("unknown kernel '{}'", name),
        },
        (ProgramKind::Gselect, "gselect") => (GSELECT, 2, None),
        (ProgramKind::Satradix, LOCALSORT) => (RADIX_LOCALSORT, 1, None),
        (ProgramKind::Satradix, HISTOGRAM) => (RADIX_HISTOGRAM, 2, None),
        (ProgramKind::Satradix, SCATTER) => (RADIX_SCATTER, 3, None),
        (kind, name) => bail!("kernel '{}' is not part of a {:?} program", name, kind),
    };

    let mut wgsl = format!(
        "alias T = {ty};\n\
         const WG: u32 = {lws}u;\n\
         const BLOCK: u32 = 2u * WG;\n\
         const RADIX: u32 = {RADIX}u;\n\
         const DESCENDING: bool = {};\n",
        cmp.order == Order::Descending
    );
    if let Some(k) = private {
        wgsl.push_str(&format!("const K: u32 = {k}u;\nconst V: u32 = {}u;\n", 1u32 << k));
    }
    wgsl.push_str(PARAMS);
    wgsl.push_str(radix_key(cmp.elem)?);
    wgsl.push_str(SORT_COMMON);
    wgsl.push_str(body);
    Ok(Shader { wgsl, buffers })
}

fn render_scan(source: &ProgramSource, kernel: &str, lws: usize) -> Result<Shader> {
    let sum = source.sum.ok_or_else(|| anyhow!("scan program without sum type"))?;
    let s = wgsl_type(sum)?;
    let t = wgsl_type(source.elem)?;

    let (body, buffers, input) = match kernel {
        WORKGROUP_SCAN => (WG_SCAN, 3, t),
        WORKGROUP_SCAN_SUMS => (WG_SCAN, 3, s),
        WORKGROUP_SUMS_SCAN => (WG_SUMS_SCAN, 1, s),
        ADD_WORKGROUP_SUMS => (ADD_WG_SUMS, 2, s),
        name => bail!("kernel '{}' is not part of a scan program", name),
    };

    let mut wgsl = format!(
        "alias T = {input};\n\
         alias S = {s};\n\
         const WG: u32 = {lws}u;\n\
         const BLOCK: u32 = 2u * WG;\n"
    );
    wgsl.push_str(PARAMS);
    wgsl.push_str(SCAN_COMMON);
    wgsl.push_str(body);
    Ok(Shader { wgsl, buffers })
}

/// Order-preserving map of an element to `u32`.
fn radix_key(ty: ElemType) -> Result<&'static str> {
    Ok(match ty {
        ElemType::UInt => "fn radix_key(x: T) -> u32 {\n    return x;\n}\n",
        ElemType::Int => "fn radix_key(x: T) -> u32 {\n    return bitcast<u32>(x) ^ 0x80000000u;\n}\n",
        ElemType::Float => {
            r#"fn radix_key(x: T) -> u32 {
    let b = bitcast<u32>(x);
    if ((b & 0x80000000u) != 0u) {
        return ~b;
    }
    return b | 0x80000000u;
}
"#
        }
        other => bail!("no radix key for {}", other),
    })
}

const PARAMS: &str = r#"
struct Params {
    v: array<vec4<u32>, 2>,
}

fn param(i: u32) -> u32 {
    return params.v[i / 4u][i % 4u];
}

fn group_id(wid: vec3<u32>, nwg: vec3<u32>) -> u32 {
    return wid.x + wid.y * nwg.x;
}
"#;

const SORT_COMMON: &str = r#"
fn before(a: T, b: T) -> bool {
    if (DESCENDING) {
        return a > b;
    }
    return a < b;
}

fn digit(x: T, shift: u32) -> u32 {
    var k = radix_key(x);
    if (DESCENDING) {
        k = ~k;
    }
    return (k >> shift) & (RADIX - 1u);
}

// Indices compared by pair t in one step. The first step of a stage compares
// against the reflected index of the stage block.
fn pair(t: u32, stage: u32, step: u32) -> vec2<u32> {
    let half = 1u << (step - 1u);
    let i = ((t >> (step - 1u)) << step) | (t & (half - 1u));
    if (step == stage) {
        let block = 1u << stage;
        let base = i & ~(block - 1u);
        return vec2<u32>(i, base + block - 1u - (i - base));
    }
    return vec2<u32>(i, i + half);
}
"#;

const BITONIC_STEP: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<T>;
@group(0) @binding(1) var<uniform> params: Params;

@compute @workgroup_size(WG)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let group = group_id(wid, nwg);
    if (group >= param(0u)) {
        return;
    }
    let n = param(1u);
    let p = pair(group * WG + lid.x, param(2u), param(3u));
    if (p.y < n) {
        let a = data[p.x];
        let b = data[p.y];
        if (before(b, a)) {
            data[p.x] = b;
            data[p.y] = a;
        }
    }
}
"#;

const BITONIC_PRIVATE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<T>;
@group(0) @binding(1) var<uniform> params: Params;

@compute @workgroup_size(WG)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let group = group_id(wid, nwg);
    if (group >= param(0u)) {
        return;
    }
    let n = param(1u);
    let step = param(3u);
    let t = group * WG + lid.x;

    // V values spaced 2^low apart, covering steps step..low+1.
    let low = step - K;
    let stride = 1u << low;
    let base = ((t >> low) << step) | (t & (stride - 1u));

    var v: array<T, V>;
    for (var m = 0u; m < V; m++) {
        let idx = base + m * stride;
        if (idx < n) {
            v[m] = data[idx];
        }
    }
    for (var s = step; s > low; s--) {
        let h = 1u << (s - 1u - low);
        for (var m = 0u; m < V; m++) {
            if ((m & h) == 0u && base + (m + h) * stride < n) {
                let a = v[m];
                let b = v[m + h];
                if (before(b, a)) {
                    v[m] = b;
                    v[m + h] = a;
                }
            }
        }
    }
    for (var m = 0u; m < V; m++) {
        let idx = base + m * stride;
        if (idx < n) {
            data[idx] = v[m];
        }
    }
}
"#;

const BITONIC_LOCAL: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<T>;
@group(0) @binding(1) var<uniform> params: Params;

var<workgroup> tile: array<T, BLOCK>;

@compute @workgroup_size(WG)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let group = group_id(wid, nwg);
    if (group >= param(0u)) {
        return;
    }
    let n = param(1u);
    let stage = param(2u);
    let step = param(3u);
    let l = lid.x;
    let first = group * BLOCK;

    if (first + l < n) {
        tile[l] = data[first + l];
    }
    if (first + l + WG < n) {
        tile[l + WG] = data[first + l + WG];
    }
    workgroupBarrier();

    for (var s = step; s > 0u; s--) {
        let p = pair(group * WG + l, stage, s) - vec2<u32>(first, first);
        if (first + p.y < n) {
            let a = tile[p.x];
            let b = tile[p.y];
            if (before(b, a)) {
                tile[p.x] = b;
                tile[p.y] = a;
            }
        }
        workgroupBarrier();
    }

    if (first + l < n) {
        data[first + l] = tile[l];
    }
    if (first + l + WG < n) {
        data[first + l + WG] = tile[l + WG];
    }
}
"#;

const BITONIC_HYBRID: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<T>;
@group(0) @binding(1) var<uniform> params: Params;

var<workgroup> tile: array<T, WG * V>;

@compute @workgroup_size(WG)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let group = group_id(wid, nwg);
    if (group >= param(0u)) {
        return;
    }
    let n = param(1u);
    let stage = param(2u);
    let step = param(3u);
    let l = lid.x;
    let span = WG * V;
    let first = group * span;

    for (var r = 0u; r < V; r++) {
        let li = r * WG + l;
        if (first + li < n) {
            tile[li] = data[first + li];
        }
    }
    workgroupBarrier();

    // Steps above K in local memory, V / 2 pairs per thread.
    for (var s = step; s > K; s--) {
        for (var r = 0u; r < V / 2u; r++) {
            let p = pair(group * (span / 2u) + r * WG + l, stage, s) - vec2<u32>(first, first);
            if (first + p.y < n) {
                let a = tile[p.x];
                let b = tile[p.y];
                if (before(b, a)) {
                    tile[p.x] = b;
                    tile[p.y] = a;
                }
            }
        }
        workgroupBarrier();
    }

    // Remaining steps on V consecutive values in private memory.
    let own = l * V;
    var v: array<T, V>;
    for (var m = 0u; m < V; m++) {
        v[m] = tile[own + m];
    }
    for (var s = min(step, K); s > 0u; s--) {
        let half = 1u << (s - 1u);
        for (var m = 0u; m < V; m++) {
            if ((m & half) == 0u) {
                var j = m + half;
                if (s == stage) {
                    let blk = 1u << s;
                    let b0 = m & ~(blk - 1u);
                    j = b0 + blk - 1u - (m - b0);
                }
                if (first + own + j < n) {
                    let a = v[m];
                    let b = v[j];
                    if (before(b, a)) {
                        v[m] = b;
                        v[j] = a;
                    }
                }
            }
        }
    }
    for (var m = 0u; m < V; m++) {
        if (first + own + m < n) {
            data[first + own + m] = v[m];
        }
    }
}
"#;

const GSELECT: &str = r#"
@group(0) @binding(0) var<storage, read_write> src: array<T>;
@group(0) @binding(1) var<storage, read_write> dst: array<T>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(WG)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let group = group_id(wid, nwg);
    if (group >= param(0u)) {
        return;
    }
    let n = param(1u);
    let i = group * WG + lid.x;
    if (i >= n) {
        return;
    }
    let a = src[i];
    var rank = 0u;
    for (var j = 0u; j < n; j++) {
        let b = src[j];
        if (before(b, a) || (j < i && !before(a, b))) {
            rank++;
        }
    }
    dst[rank] = a;
}
"#;

const RADIX_LOCALSORT: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<T>;
@group(0) @binding(1) var<uniform> params: Params;

var<workgroup> tile: array<T, BLOCK>;
var<workgroup> flags: array<u32, BLOCK>;

@compute @workgroup_size(WG)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let group = group_id(wid, nwg);
    if (group >= param(0u)) {
        return;
    }
    let n = param(1u);
    let shift = param(2u);
    let l = lid.x;
    let first = group * BLOCK;
    let count = min(BLOCK, n - first);

    if (l < count) {
        tile[l] = data[first + l];
    }
    if (l + WG < count) {
        tile[l + WG] = data[first + l + WG];
    }
    workgroupBarrier();

    // One stable split per digit bit. Slots past the data act as the largest
    // digit, so they stay at the tail.
    for (var bit = 0u; bit < 4u; bit++) {
        let x0 = tile[l];
        let x1 = tile[l + WG];
        var d0 = RADIX - 1u;
        var d1 = RADIX - 1u;
        if (l < count) {
            d0 = digit(x0, shift);
        }
        if (l + WG < count) {
            d1 = digit(x1, shift);
        }
        let f0 = 1u - ((d0 >> bit) & 1u);
        let f1 = 1u - ((d1 >> bit) & 1u);
        flags[l] = f0;
        flags[l + WG] = f1;

        for (var off = 1u; off < BLOCK; off = off << 1u) {
            workgroupBarrier();
            var s0 = flags[l];
            var s1 = flags[l + WG];
            if (l >= off) {
                s0 += flags[l - off];
            }
            if (l + WG >= off) {
                s1 += flags[l + WG - off];
            }
            workgroupBarrier();
            flags[l] = s0;
            flags[l + WG] = s1;
        }
        workgroupBarrier();

        let zeros = flags[BLOCK - 1u];
        let e0 = flags[l] - f0;
        let e1 = flags[l + WG] - f1;
        workgroupBarrier();
        tile[select(zeros + l - e0, e0, f0 == 1u)] = x0;
        tile[select(zeros + l + WG - e1, e1, f1 == 1u)] = x1;
        workgroupBarrier();
    }

    if (l < count) {
        data[first + l] = tile[l];
    }
    if (l + WG < count) {
        data[first + l + WG] = tile[l + WG];
    }
}
"#;

const RADIX_HISTOGRAM: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<T>;
@group(0) @binding(1) var<storage, read_write> hist: array<u32>;
@group(0) @binding(2) var<uniform> params: Params;

var<workgroup> counts: array<atomic<u32>, RADIX>;

@compute @workgroup_size(WG)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let group = group_id(wid, nwg);
    let groups = param(0u);
    if (group >= groups) {
        return;
    }
    let n = param(1u);
    let shift = param(2u);
    let l = lid.x;
    let first = group * BLOCK;

    for (var d = l; d < RADIX; d += WG) {
        atomicStore(&counts[d], 0u);
    }
    workgroupBarrier();
    if (first + l < n) {
        atomicAdd(&counts[digit(data[first + l], shift)], 1u);
    }
    if (first + l + WG < n) {
        atomicAdd(&counts[digit(data[first + l + WG], shift)], 1u);
    }
    workgroupBarrier();
    for (var d = l; d < RADIX; d += WG) {
        hist[d * groups + group] = atomicLoad(&counts[d]);
    }
}
"#;

const RADIX_SCATTER: &str = r#"
@group(0) @binding(0) var<storage, read_write> src: array<T>;
@group(0) @binding(1) var<storage, read_write> dst: array<T>;
@group(0) @binding(2) var<storage, read_write> offsets: array<u32>;
@group(0) @binding(3) var<uniform> params: Params;

var<workgroup> starts: array<u32, RADIX>;

@compute @workgroup_size(WG)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let group = group_id(wid, nwg);
    let groups = param(0u);
    if (group >= groups) {
        return;
    }
    let n = param(1u);
    let shift = param(2u);
    let first = group * BLOCK;

    // The block is sorted by digit: record where each digit's run starts.
    for (var r = 0u; r < 2u; r++) {
        let p = lid.x + r * WG;
        let idx = first + p;
        if (idx < n) {
            let d = digit(src[idx], shift);
            if (p == 0u || digit(src[idx - 1u], shift) != d) {
                starts[d] = p;
            }
        }
    }
    workgroupBarrier();
    for (var r = 0u; r < 2u; r++) {
        let p = lid.x + r * WG;
        let idx = first + p;
        if (idx < n) {
            let x = src[idx];
            let d = digit(x, shift);
            dst[offsets[d * groups + group] + p - starts[d]] = x;
        }
    }
}
"#;

const SCAN_COMMON: &str = r#"
var<workgroup> temp: array<S, BLOCK>;

// Work-efficient exclusive scan of `temp` in place. Returns the block total.
fn scan_block(l: u32) -> S {
    var offset = 1u;
    for (var d = WG; d > 0u; d = d >> 1u) {
        workgroupBarrier();
        if (l < d) {
            let ai = offset * (2u * l + 1u) - 1u;
            let bi = offset * (2u * l + 2u) - 1u;
            temp[bi] = temp[bi] + temp[ai];
        }
        offset = offset << 1u;
    }
    workgroupBarrier();
    let total = temp[BLOCK - 1u];
    workgroupBarrier();
    if (l == 0u) {
        temp[BLOCK - 1u] = S(0);
    }
    for (var d = 1u; d < BLOCK; d = d << 1u) {
        offset = offset >> 1u;
        workgroupBarrier();
        if (l < d) {
            let ai = offset * (2u * l + 1u) - 1u;
            let bi = offset * (2u * l + 2u) - 1u;
            let t = temp[ai];
            temp[ai] = temp[bi];
            temp[bi] = temp[bi] + t;
        }
    }
    workgroupBarrier();
    return total;
}
"#;

const WG_SCAN: &str = r#"
@group(0) @binding(0) var<storage, read_write> src: array<T>;
@group(0) @binding(1) var<storage, read_write> dst: array<S>;
@group(0) @binding(2) var<storage, read_write> wgsums: array<S>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(WG)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let group = group_id(wid, nwg);
    if (group >= param(0u)) {
        return;
    }
    let n = param(1u);
    let l = lid.x;
    let first = group * BLOCK;

    var x0 = S(0);
    var x1 = S(0);
    if (first + l < n) {
        x0 = S(src[first + l]);
    }
    if (first + l + WG < n) {
        x1 = S(src[first + l + WG]);
    }
    temp[l] = x0;
    temp[l + WG] = x1;

    let total = scan_block(l);

    if (first + l < n) {
        dst[first + l] = temp[l];
    }
    if (first + l + WG < n) {
        dst[first + l + WG] = temp[l + WG];
    }
    if (l == 0u) {
        wgsums[group] = total;
    }
}
"#;

const WG_SUMS_SCAN: &str = r#"
@group(0) @binding(0) var<storage, read_write> sums: array<S>;
@group(0) @binding(1) var<uniform> params: Params;

@compute @workgroup_size(WG)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    if (group_id(wid, nwg) >= param(0u)) {
        return;
    }
    let count = param(1u);
    let l = lid.x;

    var x0 = S(0);
    var x1 = S(0);
    if (l < count) {
        x0 = sums[l];
    }
    if (l + WG < count) {
        x1 = sums[l + WG];
    }
    temp[l] = x0;
    temp[l + WG] = x1;

    scan_block(l);

    if (l < count) {
        sums[l] = temp[l];
    }
    if (l + WG < count) {
        sums[l + WG] = temp[l + WG];
    }
}
"#;

const ADD_WG_SUMS: &str = r#"
@group(0) @binding(0) var<storage, read_write> dst: array<S>;
@group(0) @binding(1) var<storage, read_write> sums: array<S>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(WG)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let group = group_id(wid, nwg);
    if (group == 0u || group >= param(0u)) {
        return;
    }
    let n = param(1u);
    let first = group * BLOCK;
    let add = sums[group];
    for (var r = 0u; r < 2u; r++) {
        let idx = first + lid.x + r * WG;
        if (idx < n) {
            dst[idx] = dst[idx] + add;
        }
    }
}
"#;
