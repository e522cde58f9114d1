//! Sort engine.
//!
//! A [`Sort`] handle is built from an algorithm name, an option string and an
//! element type. It owns the compiled program and the strategy chosen at
//! construction, and exposes a non-blocking device-data entry point and a
//! blocking host-data one.

pub mod abitonic;
mod gselect;
pub(crate) mod satradix;
mod sbitonic;

use std::sync::Arc;

use anyhow::anyhow;
use strum_macros::EnumIter;

use crate::compare::{Comparator, Order, SortKey};
use crate::config::EngineConfig;
use crate::coordinator::{self, HostSession, Launcher};
use crate::error::{Error, Result, ResultExt};
use crate::registry::Algorithm;
use crate::runtime::{Backend, EventWaitList, ProgramKind, ProgramSource};
use crate::types::{ElemType, Element};

use abitonic::{Abitonic, AbitonicOptions};
use gselect::Gselect;
use satradix::Satradix;
use sbitonic::Sbitonic;

/// Registered sort strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum SortAlgorithm {
    /// Simple bitonic network, one launch per step.
    Sbitonic,
    /// Bitonic network with fused local/private-memory kernel variants.
    Abitonic,
    /// Global-memory selection sort, O(n²) work.
    Gselect,
    /// LSD radix sort with 4-bit digits.
    Satradix,
}

impl Algorithm for SortAlgorithm {
    const FAMILY: &'static str = "sort";

    fn name(&self) -> &'static str {
        match self {
            Self::Sbitonic => "sbitonic",
            Self::Abitonic => "abitonic",
            Self::Gselect => "gselect",
            Self::Satradix => "satradix",
        }
    }
}

impl SortAlgorithm {
    /// Whether the strategy sorts its input buffer directly.
    pub fn in_place(&self) -> bool {
        !matches!(self, Self::Gselect)
    }

    fn program_kind(&self) -> ProgramKind {
        match self {
            Self::Sbitonic => ProgramKind::Sbitonic,
            Self::Abitonic => ProgramKind::Abitonic,
            Self::Gselect => ProgramKind::Gselect,
            Self::Satradix => ProgramKind::Satradix,
        }
    }
}

/// Everything a strategy needs to launch one sort.
pub(crate) struct SortJob<'a, B: Backend> {
    pub launcher: Launcher<'a, B>,
    pub comparator: &'a Comparator,
    pub input: &'a B::Buffer,
    pub output: Option<&'a B::Buffer>,
    pub n: usize,
    pub lws_max: usize,
}

impl<B: Backend> SortJob<'_, B> {
    /// For in-place strategies: the buffer to sort and the events to wait on.
    /// A separate output buffer first receives a copy of the input.
    pub fn in_place_target(&self) -> Result<(&B::Buffer, EventWaitList<B::Event>)> {
        match self.output {
            Some(out) => {
                let bytes = self.n * self.comparator.elem.size();
                let ev = self.launcher.copy(self.input, out, bytes, &EventWaitList::new())?;
                Ok((out, EventWaitList::single(ev)))
            }
            None => Ok((self.input, EventWaitList::new())),
        }
    }
}

/// Capabilities every sort strategy provides.
pub(crate) trait SortStrategy<B: Backend> {
    fn kernel_names(&self) -> Vec<String>;

    /// Local memory used by kernel `index` for `n` elements when the local
    /// size is capped at `lws_cap`.
    fn localmem_usage(&self, index: usize, lws_cap: usize, n: usize, elem: ElemType) -> usize;

    fn sort(&self, job: &SortJob<'_, B>) -> Result<EventWaitList<B::Event>>;
}

/// The strategy bound to a handle, with its private state.
enum Strategy<B: Backend> {
    Sbitonic(Sbitonic),
    Abitonic(Abitonic),
    Gselect(Gselect),
    Satradix(Satradix<B>),
}

impl<B: Backend> Strategy<B> {
    fn get(&self) -> &dyn SortStrategy<B> {
        match self {
            Self::Sbitonic(s) => s,
            Self::Abitonic(s) => s,
            Self::Gselect(s) => s,
            Self::Satradix(s) => s,
        }
    }
}

/// Configures a [`Sort`] beyond algorithm name and element type.
#[derive(Debug, Clone)]
pub struct SortBuilder {
    name: String,
    options: Option<String>,
    key: Option<SortKey>,
    order: Order,
    config: EngineConfig,
    compiler_opts: Option<String>,
}

impl SortBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            options: None,
            key: None,
            order: Order::Ascending,
            config: EngineConfig::default(),
            compiler_opts: None,
        }
    }

    pub fn options(mut self, options: &str) -> Self {
        self.options = Some(options.to_string());
        self
    }

    /// Sort by a key embedded in each element instead of by the element itself.
    pub fn key(mut self, key: SortKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn compiler_opts(mut self, opts: &str) -> Self {
        self.compiler_opts = Some(opts.to_string());
        self
    }

    pub fn build<B: Backend>(self, backend: &Arc<B>, elem: ElemType) -> Result<Sort<B>> {
        let algorithm = SortAlgorithm::resolve(&self.name)?;
        let comparator = Comparator::new(elem, self.key, self.order)?;
        let options = self.options.as_deref().unwrap_or("");

        let strategy = match algorithm {
            SortAlgorithm::Sbitonic => {
                reject_options(algorithm, options)?;
                Strategy::Sbitonic(Sbitonic)
            }
            SortAlgorithm::Abitonic => {
                Strategy::Abitonic(Abitonic::new(options.parse::<AbitonicOptions>()?))
            }
            SortAlgorithm::Gselect => {
                reject_options(algorithm, options)?;
                Strategy::Gselect(Gselect)
            }
            SortAlgorithm::Satradix => {
                reject_options(algorithm, options)?;
                Strategy::Satradix(Satradix::new(backend, &comparator, &self.config)?)
            }
        };

        let mut source = ProgramSource::sort(
            algorithm.program_kind(),
            comparator,
            strategy.get().kernel_names(),
        );
        source.compiler_opts = self.compiler_opts;
        let program = backend
            .build_program(&source)
            .op(&format!("build {} program", algorithm.name()))?;

        log::debug!(
            "created {} sort for {} (key {:?}, {:?})",
            algorithm.name(),
            elem,
            self.key,
            self.order
        );

        Ok(Sort {
            backend: backend.clone(),
            program,
            algorithm,
            comparator,
            key: self.key,
            config: self.config,
            strategy,
        })
    }
}

fn reject_options(algorithm: SortAlgorithm, options: &str) -> Result<()> {
    if options.split(',').all(|t| t.trim().is_empty()) {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "{} sort takes no options, got '{}'",
            algorithm.name(),
            options
        )))
    }
}

/// A sorter bound to one algorithm, element type and device.
pub struct Sort<B: Backend> {
    backend: Arc<B>,
    program: B::Program,
    algorithm: SortAlgorithm,
    comparator: Comparator,
    key: Option<SortKey>,
    config: EngineConfig,
    strategy: Strategy<B>,
}

impl<B: Backend> Sort<B> {
    /// Creates a sorter with default ordering and configuration.
    ///
    /// `options` is the algorithm's option string; `None` and `""` select all
    /// defaults.
    pub fn new(backend: &Arc<B>, name: &str, options: Option<&str>, elem: ElemType) -> Result<Self> {
        let mut builder = SortBuilder::new(name);
        if let Some(options) = options {
            builder = builder.options(options);
        }
        builder.build(backend, elem)
    }

    /// Sorts `n` elements already on the device.
    ///
    /// `comm` defaults to `exec`. With no `output` the input is sorted in place
    /// (strategies that cannot work in place sort into a temporary and copy
    /// back). Returns the terminal events without blocking.
    pub fn sort_with_device_data(
        &self,
        exec: &B::Queue,
        comm: Option<&B::Queue>,
        input: &B::Buffer,
        output: Option<&B::Buffer>,
        n: usize,
        lws_max: Option<usize>,
    ) -> Result<EventWaitList<B::Event>> {
        coordinator::check_count(n)?;
        let launcher = Launcher::new(self.backend.as_ref(), &self.program, exec, comm);
        let job = SortJob {
            launcher,
            comparator: &self.comparator,
            input,
            output,
            n,
            lws_max: self.config.lws_max(lws_max),
        };
        match n {
            0 => Ok(EventWaitList::new()),
            1 => job.in_place_target().map(|(_, wait)| wait),
            _ => self.strategy.get().sort(&job),
        }
    }

    /// Sorts host data, blocking until the result is in `data_out`.
    ///
    /// Creates an exec queue when `exec` is `None`; every temporary resource is
    /// released before returning, on success and on error.
    pub fn sort_with_host_data(
        &self,
        exec: Option<&B::Queue>,
        comm: Option<&B::Queue>,
        data_in: &[u8],
        data_out: &mut [u8],
        n: usize,
        lws_max: Option<usize>,
    ) -> Result<()> {
        let size = self.comparator.elem.size();
        let bytes = coordinator::check_host_len("input", data_in.len(), n, size)?;
        coordinator::check_host_len("output", data_out.len(), n, size)?;
        coordinator::check_count(n)?;
        if n == 0 {
            return Ok(());
        }

        let session = HostSession::open(self.backend.as_ref(), exec, comm, self.config.profiling)?;
        let buffer = session.upload("sort data", &data_in[..bytes], bytes)?;
        let wait = self.sort_with_device_data(
            session.exec(),
            Some(session.comm()),
            &buffer,
            None,
            n,
            lws_max,
        )?;
        session.download(&buffer, &mut data_out[..bytes], &wait)?;

        if self.config.verify_results && !self.comparator.is_sorted(&data_out[..bytes]) {
            log::warn!("{} sort produced unsorted output for n={}", self.name(), n);
            return Err(Error::runtime(
                "verify sort",
                anyhow!("{} elements are not in order after {}", n, self.name()),
            ));
        }
        Ok(())
    }

    /// Sorts a typed slice in place on the device.
    pub fn sort_slice<T: Element>(&self, data: &mut [T]) -> Result<()> {
        if T::TYPE != self.comparator.elem {
            return Err(Error::invalid(format!(
                "slice of {} given to a {} sorter",
                T::TYPE,
                self.comparator.elem
            )));
        }
        let n = data.len();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
        let input = bytes.to_vec();
        self.sort_with_host_data(None, None, &input, bytes, n, None)
    }

    pub fn num_kernels(&self) -> usize {
        self.strategy.get().kernel_names().len()
    }

    pub fn kernel_name(&self, index: usize) -> Result<String> {
        self.strategy
            .get()
            .kernel_names()
            .into_iter()
            .nth(index)
            .ok_or_else(|| Error::invalid(format!("{} sort has no kernel #{}", self.name(), index)))
    }

    /// Local memory in bytes used by kernel `index` when sorting `n` elements
    /// with the given local size cap (`None`: device maximum).
    pub fn localmem_usage(&self, index: usize, lws_max: Option<usize>, n: usize) -> Result<usize> {
        if index >= self.num_kernels() {
            return Err(Error::invalid(format!("{} sort has no kernel #{}", self.name(), index)));
        }
        let device_max = self.backend.device_info().max_local_size;
        let cap = match self.config.lws_max(lws_max) {
            0 => device_max,
            l => l.min(device_max),
        };
        Ok(self
            .strategy
            .get()
            .localmem_usage(index, cap, n, self.comparator.elem))
    }

    pub fn name(&self) -> &'static str {
        self.algorithm.name()
    }

    pub fn algorithm(&self) -> SortAlgorithm {
        self.algorithm
    }

    pub fn in_place(&self) -> bool {
        self.algorithm.in_place()
    }

    pub fn element_type(&self) -> ElemType {
        self.comparator.elem
    }

    pub fn element_size(&self) -> usize {
        self.comparator.elem.size()
    }

    pub fn key_type(&self) -> Option<ElemType> {
        self.key.map(|k| k.ty)
    }

    pub fn order(&self) -> Order {
        self.comparator.order
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn program(&self) -> &B::Program {
        &self.program
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<B: Backend> Drop for Sort<B> {
    fn drop(&mut self) {
        log::debug!("releasing {} sort for {}", self.algorithm.name(), self.comparator.elem);
    }
}

#[cfg(test)]
mod tests;
