//! Execution coordination shared by the sort and scan engines.
//!
//! [`Launcher`] bundles the device, program and the exec/comm queue pair that a
//! device-data call runs on. [`HostSession`] wraps the host-data entry points:
//! it provides an exec queue when the caller has none, and makes every
//! host/device transfer an explicit wait point.

use crate::error::{Error, Result, ResultExt};
use crate::runtime::{Backend, EventWaitList, KernelArg, Worksize};

pub(crate) struct Launcher<'a, B: Backend> {
    pub backend: &'a B,
    pub program: &'a B::Program,
    pub exec: &'a B::Queue,
    pub comm: &'a B::Queue,
}

impl<'a, B: Backend> Launcher<'a, B> {
    /// The comm queue defaults to the exec queue.
    pub fn new(
        backend: &'a B,
        program: &'a B::Program,
        exec: &'a B::Queue,
        comm: Option<&'a B::Queue>,
    ) -> Self {
        Self {
            backend,
            program,
            exec,
            comm: comm.unwrap_or(exec),
        }
    }

    /// Same queues and device, different program.
    pub fn with_program<'b>(&self, program: &'b B::Program) -> Launcher<'b, B>
    where
        'a: 'b,
    {
        Launcher {
            backend: self.backend,
            program,
            exec: self.exec,
            comm: self.comm,
        }
    }

    pub fn kernel(
        &self,
        name: &str,
        ws: Worksize,
        args: &[KernelArg<'_, B::Buffer>],
        wait: &EventWaitList<B::Event>,
    ) -> Result<B::Event> {
        log::trace!(
            "launch {} gws={} lws={} after {} event(s)",
            name,
            ws.gws,
            ws.lws,
            wait.len()
        );
        self.backend
            .enqueue_kernel(self.exec, self.program, name, ws, args, wait)
            .map_err(|e| Error::runtime(format!("enqueue kernel {name}"), e))
    }

    /// Device-to-device copy on the comm queue.
    pub fn copy(
        &self,
        src: &B::Buffer,
        dst: &B::Buffer,
        bytes: usize,
        wait: &EventWaitList<B::Event>,
    ) -> Result<B::Event> {
        self.backend
            .enqueue_copy(self.comm, src, dst, 0, 0, bytes, wait)
            .op("copy buffer")
    }

    pub fn alloc(&self, label: &str, bytes: usize) -> Result<B::Buffer> {
        log::debug!("allocating temporary '{}' ({} bytes)", label, bytes);
        self.backend.create_buffer(label, bytes).op("allocate buffer")
    }

    /// Caps a requested maximum local size by the device limit; zero means
    /// "let the device choose" and is resolved through `suggest`.
    pub fn lws_cap(&self, kernel: &str, threads: usize, lws_max: usize) -> Result<usize> {
        let device_max = self.backend.device_info().max_local_size;
        if lws_max != 0 {
            Ok(lws_max.min(device_max))
        } else {
            Ok(self.suggest(kernel, threads)?.lws)
        }
    }

    pub fn suggest(&self, kernel: &str, realws: usize) -> Result<Worksize> {
        self.backend
            .suggest_worksizes(self.program, kernel, realws)
            .op("suggest work sizes")
    }

    /// Work size for `realws` threads of a kernel without power-of-two needs.
    pub fn fitted(&self, kernel: &str, realws: usize, lws_max: usize) -> Result<Worksize> {
        if lws_max != 0 {
            let lws = lws_max.min(self.backend.device_info().max_local_size);
            Ok(Worksize::fitted(realws, lws))
        } else {
            self.suggest(kernel, realws)
        }
    }
}

enum QueueSlot<'a, Q> {
    Borrowed(&'a Q),
    Owned(Q),
}

impl<Q> QueueSlot<'_, Q> {
    fn get(&self) -> &Q {
        match self {
            QueueSlot::Borrowed(q) => q,
            QueueSlot::Owned(q) => q,
        }
    }
}

/// Queues and transfers of one blocking host-data call.
///
/// An internally created exec queue lives exactly as long as the session, so
/// it is released on every exit path of the call.
pub(crate) struct HostSession<'a, B: Backend> {
    backend: &'a B,
    exec: QueueSlot<'a, B::Queue>,
    comm: Option<&'a B::Queue>,
}

impl<'a, B: Backend> HostSession<'a, B> {
    pub fn open(
        backend: &'a B,
        exec: Option<&'a B::Queue>,
        comm: Option<&'a B::Queue>,
        profiling: bool,
    ) -> Result<Self> {
        let exec = match exec {
            Some(q) => QueueSlot::Borrowed(q),
            None => {
                log::debug!("no exec queue given, creating one (profiling={})", profiling);
                QueueSlot::Owned(
                    backend
                        .create_queue("sortscan exec", profiling)
                        .op("create queue")?,
                )
            }
        };
        Ok(Self {
            backend,
            exec,
            comm,
        })
    }

    pub fn exec(&self) -> &B::Queue {
        self.exec.get()
    }

    pub fn comm(&self) -> &B::Queue {
        self.comm.unwrap_or_else(|| self.exec())
    }

    /// Allocates a device buffer of `capacity` bytes and fills its head with
    /// `data`, waiting for the transfer to complete.
    pub fn upload(&self, label: &str, data: &[u8], capacity: usize) -> Result<B::Buffer> {
        let buffer = self
            .backend
            .create_buffer(label, capacity.max(data.len()))
            .op("allocate buffer")?;
        let event = self
            .backend
            .enqueue_write(self.comm(), &buffer, 0, data, &EventWaitList::new())
            .op("write buffer")?;
        // Some drivers ignore non-blocking transfer requests; always wait.
        self.backend
            .wait(&EventWaitList::single(event))
            .op("wait for write")?;
        Ok(buffer)
    }

    pub fn alloc(&self, label: &str, bytes: usize) -> Result<B::Buffer> {
        self.backend.create_buffer(label, bytes).op("allocate buffer")
    }

    /// Reads `out.len()` bytes once `wait` has completed, then waits on the read.
    pub fn download(
        &self,
        buffer: &B::Buffer,
        out: &mut [u8],
        wait: &EventWaitList<B::Event>,
    ) -> Result<()> {
        let event = self
            .backend
            .enqueue_read(self.comm(), buffer, 0, out, wait)
            .op("read buffer")?;
        self.backend
            .wait(&EventWaitList::single(event))
            .op("wait for read")
    }
}

/// Checks that a host slice holds at least `n` elements of `size` bytes.
pub(crate) fn check_host_len(what: &str, len: usize, n: usize, size: usize) -> Result<usize> {
    let bytes = n
        .checked_mul(size)
        .ok_or_else(|| Error::invalid(format!("{n} elements overflow the address space")))?;
    if len < bytes {
        return Err(Error::invalid(format!(
            "{what} holds {len} bytes, {n} elements need {bytes}"
        )));
    }
    Ok(bytes)
}

/// Kernel scalars are 32-bit.
pub(crate) fn check_count(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::invalid(format!("{n} elements exceed the 32-bit limit")))
}
