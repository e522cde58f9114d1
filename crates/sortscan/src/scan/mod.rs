//! Scan engine: exclusive prefix sums.
//!
//! A [`Scan`] is parameterized by the element type it reads and a sum type it
//! accumulates and writes in, which may be wider to avoid overflow. Sums wrap
//! with the sum type's native arithmetic.

mod blelloch;

use std::sync::Arc;

use anyhow::anyhow;
use strum_macros::EnumIter;

use crate::config::EngineConfig;
use crate::coordinator::{self, HostSession, Launcher};
use crate::error::{Error, Result, ResultExt};
use crate::registry::Algorithm;
use crate::runtime::{Backend, EventWaitList, ProgramKind, ProgramSource};
use crate::types::{ElemType, Element};

use blelloch::Blelloch;

pub use blelloch::{ADD_WORKGROUP_SUMS, WORKGROUP_SCAN, WORKGROUP_SCAN_SUMS, WORKGROUP_SUMS_SCAN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum ScanAlgorithm {
    /// Work-efficient three-phase scan.
    Blelloch,
}

impl Algorithm for ScanAlgorithm {
    const FAMILY: &'static str = "scan";

    fn name(&self) -> &'static str {
        match self {
            Self::Blelloch => "blelloch",
        }
    }
}

enum Strategy {
    Blelloch(Blelloch),
}

#[derive(Debug, Clone)]
pub struct ScanBuilder {
    name: String,
    options: Option<String>,
    config: EngineConfig,
    compiler_opts: Option<String>,
}

impl ScanBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            options: None,
            config: EngineConfig::default(),
            compiler_opts: None,
        }
    }

    pub fn options(mut self, options: &str) -> Self {
        self.options = Some(options.to_string());
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

    pub fn build<B: Backend>(self, backend: &Arc<B>, elem: ElemType, sum: ElemType) -> Result<Scan<B>> {
        let algorithm = ScanAlgorithm::resolve(&self.name)?;
        let options = self.options.as_deref().unwrap_or("");
        if !options.split(',').all(|t| t.trim().is_empty()) {
            return Err(Error::invalid(format!(
                "{} scan takes no options, got '{}'",
                algorithm.name(),
                options
            )));
        }
        let strategy = match algorithm {
            ScanAlgorithm::Blelloch => Strategy::Blelloch(Blelloch),
        };

        let mut source = ProgramSource::scan(ProgramKind::Blelloch, elem, sum, blelloch::kernel_names());
        source.compiler_opts = self.compiler_opts;
        let program = backend
            .build_program(&source)
            .op(&format!("build {} program", algorithm.name()))?;
        log::debug!("created {} scan {} -> {}", algorithm.name(), elem, sum);

        Ok(Scan {
            backend: backend.clone(),
            program,
            algorithm,
            elem,
            sum,
            config: self.config,
            strategy,
        })
    }
}

/// A prefix-sum operator bound to one algorithm, element/sum type pair and device.
pub struct Scan<B: Backend> {
    backend: Arc<B>,
    program: B::Program,
    algorithm: ScanAlgorithm,
    elem: ElemType,
    sum: ElemType,
    config: EngineConfig,
    strategy: Strategy,
}

impl<B: Backend> Scan<B> {
    pub fn new(
        backend: &Arc<B>,
        name: &str,
        options: Option<&str>,
        elem: ElemType,
        sum: ElemType,
    ) -> Result<Self> {
        let mut builder = ScanBuilder::new(name);
        if let Some(options) = options {
            builder = builder.options(options);
        }
        builder.build(backend, elem, sum)
    }

    /// Scans `n` elements of `input` into `output` (sum type), both on the
    /// device. Returns the terminal events without blocking.
    pub fn scan_with_device_data(
        &self,
        exec: &B::Queue,
        comm: Option<&B::Queue>,
        input: &B::Buffer,
        output: &B::Buffer,
        n: usize,
        lws_max: Option<usize>,
    ) -> Result<EventWaitList<B::Event>> {
        let launcher = Launcher::new(self.backend.as_ref(), &self.program, exec, comm);
        self.enqueue(
            &launcher,
            input,
            output,
            n,
            self.config.lws_max(lws_max),
            EventWaitList::new(),
        )
    }

    /// Device scan that starts after `wait`. `launcher` must carry this
    /// scan's program.
    pub(crate) fn enqueue(
        &self,
        launcher: &Launcher<'_, B>,
        input: &B::Buffer,
        output: &B::Buffer,
        n: usize,
        lws_max: usize,
        wait: EventWaitList<B::Event>,
    ) -> Result<EventWaitList<B::Event>> {
        coordinator::check_count(n)?;
        match &self.strategy {
            Strategy::Blelloch(b) => b.scan(launcher, self.sum, input, output, n, lws_max, wait),
        }
    }

    /// Scans host data, blocking until `data_out` holds `n` sums.
    pub fn scan_with_host_data(
        &self,
        exec: Option<&B::Queue>,
        comm: Option<&B::Queue>,
        data_in: &[u8],
        data_out: &mut [u8],
        n: usize,
        lws_max: Option<usize>,
    ) -> Result<()> {
        let in_bytes = coordinator::check_host_len("input", data_in.len(), n, self.elem.size())?;
        let out_bytes = coordinator::check_host_len("output", data_out.len(), n, self.sum.size())?;
        coordinator::check_count(n)?;
        if n == 0 {
            return Ok(());
        }

        let session = HostSession::open(self.backend.as_ref(), exec, comm, self.config.profiling)?;
        let input = session.upload("scan input", &data_in[..in_bytes], in_bytes)?;
        let output = session.alloc("scan output", out_bytes)?;
        let wait = self.scan_with_device_data(
            session.exec(),
            Some(session.comm()),
            &input,
            &output,
            n,
            lws_max,
        )?;
        session.download(&output, &mut data_out[..out_bytes], &wait)?;

        if self.config.verify_results && !self.sum.is_float() {
            let expected = reference_scan(self.elem, self.sum, &data_in[..in_bytes]);
            if expected != data_out[..out_bytes] {
                log::warn!("{} scan output differs from host reference for n={}", self.name(), n);
                return Err(Error::runtime(
                    "verify scan",
                    anyhow!("{} scan of {} elements differs from the host reference", self.name(), n),
                ));
            }
        }
        Ok(())
    }

    /// Scans a typed slice, returning the exclusive prefix sums.
    pub fn scan_slice<T: Element, S: Element>(&self, input: &[T]) -> Result<Vec<S>> {
        if T::TYPE != self.elem || S::TYPE != self.sum {
            return Err(Error::invalid(format!(
                "{} -> {} slices given to a {} -> {} scan",
                T::TYPE,
                S::TYPE,
                self.elem,
                self.sum
            )));
        }
        let mut out = vec![S::zeroed(); input.len()];
        self.scan_with_host_data(
            None,
            None,
            bytemuck::cast_slice(input),
            bytemuck::cast_slice_mut(&mut out),
            input.len(),
            None,
        )?;
        Ok(out)
    }

    pub fn name(&self) -> &'static str {
        self.algorithm.name()
    }

    pub fn algorithm(&self) -> ScanAlgorithm {
        self.algorithm
    }

    pub fn element_type(&self) -> ElemType {
        self.elem
    }

    pub fn sum_type(&self) -> ElemType {
        self.sum
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn program(&self) -> &B::Program {
        &self.program
    }
}

impl<B: Backend> Drop for Scan<B> {
    fn drop(&mut self) {
        log::debug!("releasing {} scan {} -> {}", self.algorithm.name(), self.elem, self.sum);
    }
}

/// Sequential exclusive scan of encoded `elem` values into `sum` values.
pub fn reference_scan(elem: ElemType, sum: ElemType, input: &[u8]) -> Vec<u8> {
    let (es, ss) = (elem.size(), sum.size());
    let n = input.len() / es;
    let mut out = vec![0u8; n * ss];
    let mut acc = sum.zero();
    for (x, o) in input.chunks_exact(es).zip(out.chunks_exact_mut(ss)) {
        sum.encode(acc, o);
        acc = sum.add(acc, elem.decode(x));
    }
    out
}
