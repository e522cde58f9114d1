//! Advanced bitonic sort.
//!
//! Runs the same network as the simple bitonic sort, but covers several steps
//! per launch where it can:
//!
//! * `abit_local_sN` finishes a stage from step N inside one work-group, with
//!   the `2^N`-element blocks held in local memory.
//! * `abit_priv_KsVv` fuses K consecutive steps, each thread keeping its
//!   `V = 2^K` values in private memory.
//! * `abit_hyb_sN_KsVv` finishes a stage from step N in local memory, running
//!   the last K steps on `V` values per thread in private memory.
//! * `abit_any` performs a single step.
//!
//! [`Planner`] maps every stage to a sequence of these variants according to
//! [`AbitonicOptions`] and the device limits.

mod options;

pub use options::{AbitonicOptions, MAX_PRIVATE_STEPS, MIN_PRIVATE_STEPS};

use super::sbitonic;
use super::{SortJob, SortStrategy};
use crate::bits;
use crate::error::Result;
use crate::runtime::{Backend, EventWaitList, KernelArg, Worksize};
use crate::types::ElemType;

const LOCAL_STEPS: std::ops::RangeInclusive<u32> = 2..=11;

/// Finishing steps available for each private-memory tail length.
const HYBRID_STEPS: [(u32, &[u32]); 3] = [(2, &[4, 6, 8, 10, 12]), (3, &[3, 6, 9, 12]), (4, &[4, 8, 12])];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbitonicKernel {
    Any,
    Local { steps: u32 },
    Private { steps: u32 },
    Hybrid { steps: u32, private: u32 },
}

impl AbitonicKernel {
    /// Every kernel of the program, in introspection order.
    pub fn catalog() -> Vec<Self> {
        let mut all = vec![Self::Any];
        all.extend(LOCAL_STEPS.map(|steps| Self::Local { steps }));
        all.extend((2..=MAX_PRIVATE_STEPS).map(|steps| Self::Private { steps }));
        for (private, finishing) in HYBRID_STEPS {
            all.extend(finishing.iter().map(|&steps| Self::Hybrid { steps, private }));
        }
        all
    }

    pub fn is_cataloged(&self) -> bool {
        match *self {
            Self::Any => true,
            Self::Local { steps } => LOCAL_STEPS.contains(&steps),
            Self::Private { steps } => (2..=MAX_PRIVATE_STEPS).contains(&steps),
            Self::Hybrid { steps, private } => HYBRID_STEPS
                .iter()
                .any(|(p, s)| *p == private && s.contains(&steps)),
        }
    }

    pub fn name(&self) -> String {
        match *self {
            Self::Any => "abit_any".to_string(),
            Self::Local { steps } => format!("abit_local_s{steps}"),
            Self::Private { steps } => format!("abit_priv_{steps}s{}v", 1u32 << steps),
            Self::Hybrid { steps, private } => {
                format!("abit_hyb_s{steps}_{private}s{}v", 1u32 << private)
            }
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let kernel = if name == "abit_any" {
            Self::Any
        } else if let Some(s) = name.strip_prefix("abit_local_s") {
            Self::Local { steps: s.parse().ok()? }
        } else if let Some(s) = name.strip_prefix("abit_priv_") {
            Self::Private {
                steps: parse_private(s)?,
            }
        } else if let Some(s) = name.strip_prefix("abit_hyb_s") {
            let (steps, tail) = s.split_once('_')?;
            Self::Hybrid {
                steps: steps.parse().ok()?,
                private: parse_private(tail)?,
            }
        } else {
            return None;
        };
        kernel.is_cataloged().then_some(kernel)
    }

    /// log2 of the values each thread handles.
    pub fn width_log2(&self) -> u32 {
        match *self {
            Self::Any | Self::Local { .. } => 1,
            Self::Private { steps } => steps,
            Self::Hybrid { private, .. } => private,
        }
    }

    pub fn values_per_thread(&self) -> usize {
        1 << self.width_log2()
    }
}

// "KsVv" with V == 2^K.
fn parse_private(s: &str) -> Option<u32> {
    let (k, v) = s.strip_suffix('v')?.split_once('s')?;
    let k: u32 = k.parse().ok()?;
    let v: u32 = v.parse().ok()?;
    (k < 8 && v == 1 << k).then_some(k)
}

/// One kernel launch of an advanced bitonic sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launch {
    pub kernel: AbitonicKernel,
    pub stage: u32,
    pub step: u32,
    pub ws: Worksize,
    pub local_mem: usize,
}

/// Chooses kernel variants for every stage of a network.
///
/// Within a stage, starting from the first step:
/// 1. if the stage can be finished in one work-group from the current step
///    (step within `maxsfs`, block fits the work-group and local memory),
///    finish it with the hybrid variant using the most private steps allowed
///    by `minps..=maxps`, or else with the local variant;
/// 2. the mirror step (step == stage) that cannot be finished runs alone;
/// 3. otherwise fuse `min(maxps, step)` steps in private memory when that is at
///    least 2 and at least `minps`;
/// 4. otherwise run a single step.
#[derive(Debug, Clone, Copy)]
pub struct Planner {
    pub options: AbitonicOptions,
    /// Power-of-two padded element count.
    pub span: usize,
    pub lws_cap: usize,
    pub elem_size: usize,
    pub max_local_mem: usize,
}

impl Planner {
    pub fn new(options: AbitonicOptions, n: usize, lws_cap: usize, elem: ElemType, max_local_mem: usize) -> Self {
        Self {
            options,
            span: bits::nlpo2(n),
            lws_cap,
            elem_size: elem.size(),
            max_local_mem,
        }
    }

    pub fn worksize(&self, kernel: AbitonicKernel) -> Worksize {
        Worksize::po2(self.span >> kernel.width_log2(), self.lws_cap)
    }

    pub fn local_mem(&self, kernel: AbitonicKernel) -> usize {
        match kernel {
            AbitonicKernel::Local { .. } | AbitonicKernel::Hybrid { .. } => {
                (self.worksize(kernel).lws << kernel.width_log2()) * self.elem_size
            }
            _ => 0,
        }
    }

    fn fits(&self, kernel: AbitonicKernel, step: u32) -> bool {
        let capacity = self.worksize(kernel).lws << kernel.width_log2();
        (1usize << step) <= capacity && self.local_mem(kernel) <= self.max_local_mem
    }

    fn finisher(&self, step: u32) -> Option<AbitonicKernel> {
        if step > self.options.maxsfs {
            return None;
        }
        let lo = self.options.minps.max(2);
        let hybrid = (lo..=self.options.maxps)
            .rev()
            .map(|private| AbitonicKernel::Hybrid { steps: step, private })
            .find(|k| k.is_cataloged() && self.fits(*k, step));
        hybrid.or_else(|| {
            let local = AbitonicKernel::Local { steps: step };
            (local.is_cataloged() && self.fits(local, step)).then_some(local)
        })
    }

    fn launch(&self, kernel: AbitonicKernel, stage: u32, step: u32) -> Launch {
        Launch {
            kernel,
            stage,
            step,
            ws: self.worksize(kernel),
            local_mem: self.local_mem(kernel),
        }
    }

    pub fn plan(&self) -> Vec<Launch> {
        let stages = if self.span < 2 { 0 } else { bits::log2_po2(self.span) };
        let mut launches = Vec::new();
        for stage in 1..=stages {
            let mut step = stage;
            while step >= 1 {
                if let Some(kernel) = self.finisher(step) {
                    launches.push(self.launch(kernel, stage, step));
                    break;
                }
                let fused = self.options.maxps.min(step);
                if step < stage && fused >= 2 && fused >= self.options.minps {
                    launches.push(self.launch(AbitonicKernel::Private { steps: fused }, stage, step));
                    step -= fused;
                } else {
                    launches.push(self.launch(AbitonicKernel::Any, stage, step));
                    step -= 1;
                }
            }
        }
        launches
    }
}

pub(crate) struct Abitonic {
    options: AbitonicOptions,
}

impl Abitonic {
    pub fn new(options: AbitonicOptions) -> Self {
        Self { options }
    }
}

impl<B: Backend> SortStrategy<B> for Abitonic {
    fn kernel_names(&self) -> Vec<String> {
        AbitonicKernel::catalog().iter().map(AbitonicKernel::name).collect()
    }

    fn localmem_usage(&self, index: usize, lws_cap: usize, n: usize, elem: ElemType) -> usize {
        AbitonicKernel::catalog()
            .get(index)
            .map(|k| Planner::new(self.options, n, lws_cap, elem, usize::MAX).local_mem(*k))
            .unwrap_or(0)
    }

    fn sort(&self, job: &SortJob<'_, B>) -> Result<EventWaitList<B::Event>> {
        let (data, mut wait) = job.in_place_target()?;
        let (threads, _) = sbitonic::network(job.n);
        let any = AbitonicKernel::Any.name();
        let lws_cap = job.launcher.lws_cap(&any, threads, job.lws_max)?;
        let max_local_mem = job.launcher.backend.device_info().max_local_mem;
        let plan = Planner::new(self.options, job.n, lws_cap, job.comparator.elem, max_local_mem).plan();
        log::debug!(
            "abitonic: n={} lws_cap={} {:?}, {} launches",
            job.n,
            lws_cap,
            self.options,
            plan.len()
        );

        let n = job.n as u32;
        for launch in &plan {
            let name = launch.kernel.name();
            log::trace!("abitonic stage {} step {}: {}", launch.stage, launch.step, name);
            let mut args = vec![
                KernelArg::Buffer(data),
                KernelArg::Uint(n),
                KernelArg::Uint(launch.stage),
                KernelArg::Uint(launch.step),
            ];
            if launch.local_mem > 0 {
                args.push(KernelArg::Local(launch.local_mem));
            }
            let ev = job.launcher.kernel(&name, launch.ws, &args, &wait)?;
            wait = EventWaitList::single(ev);
        }
        Ok(wait)
    }
}
