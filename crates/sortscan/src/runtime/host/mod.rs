//! In-process reference device.
//!
//! Kernels run eagerly on the calling thread when they are enqueued, with
//! work-group semantics reproduced on the CPU and the same launch limits a real
//! device enforces (local size, local memory, global size coverage). Every
//! command is recorded so callers can inspect how events were chained.

mod kernels;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};

use super::{Backend, DeviceInfo, EventWaitList, KernelArg, ProgramSource, Worksize};

pub const DEFAULT_MAX_LOCAL_SIZE: usize = 256;
pub const DEFAULT_MAX_LOCAL_MEM: usize = 32 * 1024;

#[derive(Debug)]
pub struct HostBuffer {
    id: u64,
    label: String,
    data: Mutex<Vec<u8>>,
    live: Arc<AtomicUsize>,
}

impl HostBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Vec<u8>>> {
        self.data
            .lock()
            .map_err(|_| anyhow!("buffer '{}' lock poisoned", self.label))
    }

    /// Copy of the buffer contents.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(self.lock()?.clone())
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
        log::trace!("released host buffer '{}' (#{})", self.label, self.id);
    }
}

#[derive(Debug)]
pub struct HostQueue {
    id: u64,
    label: String,
    profiling: bool,
    live: Arc<AtomicUsize>,
}

impl HostQueue {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct HostProgram {
    source: ProgramSource,
}

impl HostProgram {
    pub fn source(&self) -> &ProgramSource {
        &self.source
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    pub id: u64,
    pub queue: u64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Kernel { name: String, worksize: Worksize },
    Write { buffer: u64, bytes: usize },
    Read { buffer: u64, bytes: usize },
    Copy { src: u64, dst: u64, bytes: usize },
    Wait { events: Vec<u64> },
}

/// One executed command and the events it was ordered after.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub event: Option<u64>,
    pub queue: Option<u64>,
    pub command: Command,
    pub waited_on: Vec<u64>,
    /// Execution time, when the queue was created with profiling.
    pub elapsed: Option<Duration>,
}

impl CommandRecord {
    pub fn kernel_name(&self) -> Option<&str> {
        match &self.command {
            Command::Kernel { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct HostBackend {
    info: DeviceInfo,
    next_id: AtomicU64,
    live_buffers: Arc<AtomicUsize>,
    live_queues: Arc<AtomicUsize>,
    log: Mutex<Vec<CommandRecord>>,
}

impl HostBackend {
    pub fn new() -> Arc<Self> {
        Self::with_limits(DEFAULT_MAX_LOCAL_SIZE, DEFAULT_MAX_LOCAL_MEM)
    }

    pub fn with_limits(max_local_size: usize, max_local_mem: usize) -> Arc<Self> {
        log::debug!(
            "host device: max_local_size={}, max_local_mem={}B",
            max_local_size,
            max_local_mem
        );
        Arc::new(Self {
            info: DeviceInfo {
                name: "host reference device".to_string(),
                backend: "host".to_string(),
                max_local_size,
                max_local_mem,
            },
            next_id: AtomicU64::new(1),
            live_buffers: Arc::new(AtomicUsize::new(0)),
            live_queues: Arc::new(AtomicUsize::new(0)),
            log: Mutex::new(Vec::new()),
        })
    }

    /// Number of buffers allocated and not yet dropped.
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::Relaxed)
    }

    pub fn live_queues(&self) -> usize {
        self.live_queues.load(Ordering::Relaxed)
    }

    /// All commands executed so far, in execution order.
    pub fn command_log(&self) -> Vec<CommandRecord> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn clear_log(&self) {
        if let Ok(mut l) = self.log.lock() {
            l.clear();
        }
    }

    /// Names of the kernels launched so far, in launch order.
    pub fn kernel_launches(&self) -> Vec<String> {
        self.command_log()
            .iter()
            .filter_map(|r| r.kernel_name().map(str::to_string))
            .collect()
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn check_wait(&self, wait: &EventWaitList<HostEvent>) -> Result<Vec<u64>> {
        let issued = self.next_id.load(Ordering::Relaxed);
        wait.iter()
            .map(|e| {
                if e.id >= issued {
                    bail!("event #{} was not issued by this device", e.id);
                }
                Ok(e.id)
            })
            .collect()
    }

    fn record<F>(
        &self,
        queue: &HostQueue,
        command: Command,
        wait: &EventWaitList<HostEvent>,
        label: String,
        run: F,
    ) -> Result<HostEvent>
    where
        F: FnOnce() -> Result<()>,
    {
        let waited_on = self.check_wait(wait)?;
        let start = Instant::now();
        run()?;
        let elapsed = queue.profiling.then(|| start.elapsed());
        let event = HostEvent {
            id: self.id(),
            queue: queue.id,
            label,
        };
        log::trace!("{} on '{}' after {:?}", event.label, queue.label, waited_on);
        self.log
            .lock()
            .map_err(|_| anyhow!("command log lock poisoned"))?
            .push(CommandRecord {
                event: Some(event.id),
                queue: Some(queue.id),
                command,
                waited_on,
                elapsed,
            });
        Ok(event)
    }
}

fn check_range(buffer: &HostBuffer, offset: usize, len: usize) -> Result<()> {
    let size = buffer.lock()?.len();
    if offset + len > size {
        bail!(
            "range {}..{} outside buffer '{}' of {} bytes",
            offset,
            offset + len,
            buffer.label,
            size
        );
    }
    Ok(())
}

impl Backend for HostBackend {
    type Buffer = HostBuffer;
    type Queue = HostQueue;
    type Program = HostProgram;
    type Event = HostEvent;

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_queue(&self, label: &str, profiling: bool) -> Result<HostQueue> {
        self.live_queues.fetch_add(1, Ordering::Relaxed);
        Ok(HostQueue {
            id: self.id(),
            label: label.to_string(),
            profiling,
            live: self.live_queues.clone(),
        })
    }

    fn create_buffer(&self, label: &str, size: usize) -> Result<HostBuffer> {
        self.live_buffers.fetch_add(1, Ordering::Relaxed);
        let id = self.id();
        log::trace!("allocated host buffer '{}' (#{}), {} bytes", label, id, size);
        Ok(HostBuffer {
            id,
            label: label.to_string(),
            data: Mutex::new(vec![0u8; size]),
            live: self.live_buffers.clone(),
        })
    }

    fn buffer_size(&self, buffer: &HostBuffer) -> usize {
        buffer.lock().map(|d| d.len()).unwrap_or(0)
    }

    fn build_program(&self, source: &ProgramSource) -> Result<HostProgram> {
        kernels::check_program(source)?;
        log::debug!(
            "built host program {:?} for {} ({} kernels)",
            source.kind,
            source.elem,
            source.kernels.len()
        );
        Ok(HostProgram {
            source: source.clone(),
        })
    }

    fn suggest_worksizes(
        &self,
        program: &HostProgram,
        kernel: &str,
        realws: usize,
    ) -> Result<Worksize> {
        if !program.source.has_kernel(kernel) {
            bail!("kernel '{}' not found in program", kernel);
        }
        Ok(super::worksize::suggest(realws, self.info.max_local_size))
    }

    fn enqueue_kernel(
        &self,
        queue: &HostQueue,
        program: &HostProgram,
        kernel: &str,
        worksize: Worksize,
        args: &[KernelArg<'_, HostBuffer>],
        wait: &EventWaitList<HostEvent>,
    ) -> Result<HostEvent> {
        if !program.source.has_kernel(kernel) {
            bail!("kernel '{}' not found in program", kernel);
        }
        let Worksize { gws, lws } = worksize;
        if lws == 0 || gws % lws != 0 {
            bail!("invalid work size gws={} lws={}", gws, lws);
        }
        if lws > self.info.max_local_size {
            bail!(
                "local work size {} exceeds device maximum {}",
                lws,
                self.info.max_local_size
            );
        }
        let local_mem: usize = args
            .iter()
            .map(|a| match a {
                KernelArg::Local(bytes) => *bytes,
                _ => 0,
            })
            .sum();
        if local_mem > self.info.max_local_mem {
            bail!(
                "kernel '{}' needs {} bytes of local memory, device has {}",
                kernel,
                local_mem,
                self.info.max_local_mem
            );
        }
        self.record(
            queue,
            Command::Kernel {
                name: kernel.to_string(),
                worksize,
            },
            wait,
            kernel.to_string(),
            || kernels::dispatch(&program.source, kernel, worksize, args),
        )
    }

    fn enqueue_write(
        &self,
        queue: &HostQueue,
        buffer: &HostBuffer,
        offset: usize,
        data: &[u8],
        wait: &EventWaitList<HostEvent>,
    ) -> Result<HostEvent> {
        check_range(buffer, offset, data.len())?;
        self.record(
            queue,
            Command::Write {
                buffer: buffer.id,
                bytes: data.len(),
            },
            wait,
            format!("write '{}'", buffer.label),
            || {
                buffer.lock()?[offset..offset + data.len()].copy_from_slice(data);
                Ok(())
            },
        )
    }

    fn enqueue_read(
        &self,
        queue: &HostQueue,
        buffer: &HostBuffer,
        offset: usize,
        out: &mut [u8],
        wait: &EventWaitList<HostEvent>,
    ) -> Result<HostEvent> {
        check_range(buffer, offset, out.len())?;
        let len = out.len();
        self.record(
            queue,
            Command::Read {
                buffer: buffer.id,
                bytes: len,
            },
            wait,
            format!("read '{}'", buffer.label),
            || {
                out.copy_from_slice(&buffer.lock()?[offset..offset + len]);
                Ok(())
            },
        )
    }

    fn enqueue_copy(
        &self,
        queue: &HostQueue,
        src: &HostBuffer,
        dst: &HostBuffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
        wait: &EventWaitList<HostEvent>,
    ) -> Result<HostEvent> {
        check_range(src, src_offset, size)?;
        check_range(dst, dst_offset, size)?;
        if src.id == dst.id {
            bail!("copy source and destination must be different buffers");
        }
        self.record(
            queue,
            Command::Copy {
                src: src.id,
                dst: dst.id,
                bytes: size,
            },
            wait,
            format!("copy '{}' -> '{}'", src.label, dst.label),
            || {
                let bytes = src.lock()?[src_offset..src_offset + size].to_vec();
                dst.lock()?[dst_offset..dst_offset + size].copy_from_slice(&bytes);
                Ok(())
            },
        )
    }

    fn wait(&self, events: &EventWaitList<HostEvent>) -> Result<()> {
        let ids = self.check_wait(events)?;
        self.log
            .lock()
            .map_err(|_| anyhow!("command log lock poisoned"))?
            .push(CommandRecord {
                event: None,
                queue: None,
                command: Command::Wait { events: ids.clone() },
                waited_on: ids,
                elapsed: None,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests;
