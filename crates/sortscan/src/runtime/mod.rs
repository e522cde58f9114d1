//! Interface to the compute runtime that executes the engines' kernels.
//!
//! The engines never talk to a device directly. They describe the program they
//! need with a [`ProgramSource`], and then drive buffers, launches and transfers
//! through a [`Backend`], threading [`EventWaitList`]s between calls.

pub mod event;
pub mod host;
pub mod worksize;

#[cfg(feature = "wgpu")]
pub mod gpu;

use std::fmt::Debug;

use anyhow::Result;

use crate::compare::Comparator;
use crate::types::ElemType;

pub use event::EventWaitList;
pub use worksize::Worksize;

/// Capabilities reported by a device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: String,
    /// Largest work-group size a kernel may be launched with.
    pub max_local_size: usize,
    /// Bytes of work-group shared memory available to one launch.
    pub max_local_mem: usize,
}

/// Which algorithm's kernels a program contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    Sbitonic,
    Abitonic,
    Gselect,
    Satradix,
    Blelloch,
}

/// Everything a backend needs to compile one algorithm's kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramSource {
    pub kind: ProgramKind,
    pub elem: ElemType,
    /// Element ordering, for sort programs.
    pub comparator: Option<Comparator>,
    /// Accumulator type, for scan programs.
    pub sum: Option<ElemType>,
    /// Kernel entry points the program must provide.
    pub kernels: Vec<String>,
    /// Extra compiler options forwarded to the backend.
    pub compiler_opts: Option<String>,
}

impl ProgramSource {
    pub fn sort(kind: ProgramKind, comparator: Comparator, kernels: Vec<String>) -> Self {
        Self {
            kind,
            elem: comparator.elem,
            comparator: Some(comparator),
            sum: None,
            kernels,
            compiler_opts: None,
        }
    }

    pub fn scan(kind: ProgramKind, elem: ElemType, sum: ElemType, kernels: Vec<String>) -> Self {
        Self {
            kind,
            elem,
            comparator: None,
            sum: Some(sum),
            kernels,
            compiler_opts: None,
        }
    }

    pub fn has_kernel(&self, name: &str) -> bool {
        self.kernels.iter().any(|k| k == name)
    }
}

/// One positional kernel argument.
#[derive(Debug)]
pub enum KernelArg<'a, Buf> {
    Buffer(&'a Buf),
    Uint(u32),
    /// Work-group local memory of the given size in bytes.
    Local(usize),
}

// Manual impls: the derive would require `Buf: Clone`.
impl<Buf> Clone for KernelArg<'_, Buf> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Buf> Copy for KernelArg<'_, Buf> {}

/// A compute runtime: queues, buffers, programs, kernel launches and events.
///
/// Every `enqueue_*` call starts only after all events in `wait` completed and
/// returns the event of the command it enqueued. `enqueue_read` has filled `out`
/// once its event has been waited on.
pub trait Backend: Send + Sync + 'static {
    type Buffer: Debug + Send + Sync;
    type Queue: Debug + Send + Sync;
    type Program: Debug + Send + Sync;
    type Event: Clone + Debug + Send + Sync;

    fn device_info(&self) -> &DeviceInfo;

    fn create_queue(&self, label: &str, profiling: bool) -> Result<Self::Queue>;

    fn create_buffer(&self, label: &str, size: usize) -> Result<Self::Buffer>;

    fn buffer_size(&self, buffer: &Self::Buffer) -> usize;

    fn build_program(&self, source: &ProgramSource) -> Result<Self::Program>;

    /// Suggests a work size covering at least `realws` threads of `kernel`.
    fn suggest_worksizes(&self, program: &Self::Program, kernel: &str, realws: usize)
        -> Result<Worksize>;

    #[allow(clippy::too_many_arguments)]
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        program: &Self::Program,
        kernel: &str,
        worksize: Worksize,
        args: &[KernelArg<'_, Self::Buffer>],
        wait: &EventWaitList<Self::Event>,
    ) -> Result<Self::Event>;

    fn enqueue_write(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        offset: usize,
        data: &[u8],
        wait: &EventWaitList<Self::Event>,
    ) -> Result<Self::Event>;

    fn enqueue_read(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        offset: usize,
        out: &mut [u8],
        wait: &EventWaitList<Self::Event>,
    ) -> Result<Self::Event>;

    #[allow(clippy::too_many_arguments)]
    fn enqueue_copy(
        &self,
        queue: &Self::Queue,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
        wait: &EventWaitList<Self::Event>,
    ) -> Result<Self::Event>;

    /// Blocks until every event in `events` has completed.
    fn wait(&self, events: &EventWaitList<Self::Event>) -> Result<()>;
}
