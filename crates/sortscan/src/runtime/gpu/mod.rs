//! wgpu device backend.
//!
//! All queues created here share the device's single wgpu queue. Submissions
//! run in order, so a command's wait list is always satisfied by the time it
//! executes; events only record what was enqueued. Kernel pipelines are
//! compiled on first use for each (kernel, work-group size) pair.

mod shaders;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, bail, ensure, Context, Result};
use wgpu::util::DeviceExt;
use wgpu::{
    DeviceDescriptor, Features, Instance, InstanceDescriptor, PowerPreference, RequestAdapterOptions,
};

use super::{Backend, DeviceInfo, EventWaitList, KernelArg, ProgramSource, Worksize};

/// Uniform slots per launch: the group count plus up to seven kernel scalars.
const PARAM_SLOTS: usize = 8;

/// Device selection.
#[derive(Debug, Clone)]
pub struct WgpuConfig {
    pub power_preference: PowerPreference,
    pub backends: wgpu::Backends,
    pub force_fallback_adapter: bool,
}

impl Default for WgpuConfig {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::HighPerformance,
            backends: wgpu::Backends::PRIMARY,
            force_fallback_adapter: false,
        }
    }
}

#[derive(Debug)]
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    size: usize,
    label: String,
}

impl WgpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug)]
pub struct WgpuQueue {
    id: u64,
    label: String,
    profiling: bool,
}

impl WgpuQueue {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgpuEvent {
    pub id: u64,
    pub queue: u64,
    pub label: String,
}

#[derive(Debug)]
struct KernelPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    buffers: usize,
}

#[derive(Debug)]
pub struct WgpuProgram {
    source: ProgramSource,
    pipelines: Mutex<HashMap<(String, usize), Arc<KernelPipeline>>>,
}

impl WgpuProgram {
    pub fn source(&self) -> &ProgramSource {
        &self.source
    }
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: DeviceInfo,
    max_groups_per_dim: usize,
    max_buffer_size: u64,
    next_id: AtomicU64,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend").field("info", &self.info).finish()
    }
}

impl WgpuBackend {
    pub async fn new() -> Result<Arc<Self>> {
        Self::with_config(WgpuConfig::default()).await
    }

    pub async fn with_config(config: WgpuConfig) -> Result<Arc<Self>> {
        let instance = Instance::new(&InstanceDescriptor {
            backends: config.backends,
            flags: wgpu::InstanceFlags::empty(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: config.power_preference,
                force_fallback_adapter: config.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .context("no suitable GPU adapter")?;

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        log::info!(
            "adapter '{}' ({:?}): max_workgroup_size={}, max_workgroup_storage={}B, max_buffer={:.2}GB",
            adapter_info.name,
            adapter_info.backend,
            limits.max_compute_invocations_per_workgroup,
            limits.max_compute_workgroup_storage_size,
            limits.max_buffer_size as f64 / 1_073_741_824.0
        );

        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("sortscan"),
                required_features: Features::empty(),
                required_limits: limits.clone(),
                ..Default::default()
            })
            .await
            .context("failed to open GPU device")?;

        let info = DeviceInfo {
            name: adapter_info.name.clone(),
            backend: format!("{:?}", adapter_info.backend),
            max_local_size: limits
                .max_compute_workgroup_size_x
                .min(limits.max_compute_invocations_per_workgroup) as usize,
            max_local_mem: limits.max_compute_workgroup_storage_size as usize,
        };

        Ok(Arc::new(Self {
            device,
            queue,
            info,
            max_groups_per_dim: limits.max_compute_workgroups_per_dimension.max(1) as usize,
            max_buffer_size: limits.max_buffer_size.min(limits.max_storage_buffer_binding_size as u64),
            next_id: AtomicU64::new(1),
        }))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn poll(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| anyhow!("GPU poll failed: {:?}", e))?;
        Ok(())
    }

    fn check_wait(&self, wait: &EventWaitList<WgpuEvent>) -> Result<()> {
        let issued = self.next_id.load(Ordering::Relaxed);
        for e in wait.iter() {
            ensure!(e.id < issued, "event #{} was not issued by this device", e.id);
        }
        Ok(())
    }

    /// Submits `commands` and returns the event that marks them.
    fn submit(
        &self,
        queue: &WgpuQueue,
        commands: Vec<wgpu::CommandBuffer>,
        wait: &EventWaitList<WgpuEvent>,
        label: String,
    ) -> Result<WgpuEvent> {
        self.check_wait(wait)?;
        let start = Instant::now();
        self.queue.submit(commands);
        if queue.profiling {
            self.poll()?;
            log::debug!(
                "{} on '{}': {:.3}ms",
                label,
                queue.label,
                start.elapsed().as_secs_f64() * 1000.0
            );
        }
        let event = WgpuEvent {
            id: self.id(),
            queue: queue.id,
            label,
        };
        log::trace!("{} (#{}) after {} event(s)", event.label, event.id, wait.len());
        Ok(event)
    }

    fn check_transfer(&self, buffer: &WgpuBuffer, offset: usize, len: usize) -> Result<()> {
        ensure!(
            offset % 4 == 0 && len % 4 == 0,
            "transfer of {} bytes at offset {} on '{}' is not 4-byte aligned",
            len,
            offset,
            buffer.label
        );
        ensure!(
            offset + len <= buffer.size,
            "range {}..{} outside buffer '{}' of {} bytes",
            offset,
            offset + len,
            buffer.label,
            buffer.size
        );
        Ok(())
    }

    fn pipeline(&self, program: &WgpuProgram, kernel: &str, lws: usize) -> Result<Arc<KernelPipeline>> {
        let mut cache = program
            .pipelines
            .lock()
            .map_err(|_| anyhow!("pipeline cache lock poisoned"))?;
        if let Some(p) = cache.get(&(kernel.to_string(), lws)) {
            return Ok(p.clone());
        }

        let shader = shaders::render(&program.source, kernel, lws)?;
        log::debug!("compiling {} for lws={} ({} buffers)", kernel, lws, shader.buffers);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel),
            source: wgpu::ShaderSource::Wgsl(shader.wgsl.into()),
        });

        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..shader.buffers)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: shader.buffers as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(kernel),
                entries: &entries,
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(kernel),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kernel),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

        let compiled = Arc::new(KernelPipeline {
            pipeline,
            layout,
            buffers: shader.buffers,
        });
        cache.insert((kernel.to_string(), lws), compiled.clone());
        Ok(compiled)
    }

    /// Splits `groups` over two dispatch dimensions when one is not enough.
    fn dispatch_dims(&self, groups: usize) -> Result<(u32, u32)> {
        let max = self.max_groups_per_dim;
        let (x, y) = if groups <= max {
            (groups, 1)
        } else {
            (max, groups.div_ceil(max))
        };
        ensure!(y <= max, "{} work-groups exceed the dispatch limit", groups);
        Ok((x as u32, y as u32))
    }
}

impl Backend for WgpuBackend {
    type Buffer = WgpuBuffer;
    type Queue = WgpuQueue;
    type Program = WgpuProgram;
    type Event = WgpuEvent;

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_queue(&self, label: &str, profiling: bool) -> Result<WgpuQueue> {
        Ok(WgpuQueue {
            id: self.id(),
            label: label.to_string(),
            profiling,
        })
    }

    fn create_buffer(&self, label: &str, size: usize) -> Result<WgpuBuffer> {
        let alloc = size.max(4).next_multiple_of(4) as u64;
        ensure!(
            alloc <= self.max_buffer_size,
            "buffer '{}' of {} bytes exceeds the device limit of {}",
            label,
            size,
            self.max_buffer_size
        );
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: alloc,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        log::trace!("allocated gpu buffer '{}', {} bytes", label, alloc);
        Ok(WgpuBuffer {
            buffer,
            size,
            label: label.to_string(),
        })
    }

    fn buffer_size(&self, buffer: &WgpuBuffer) -> usize {
        buffer.size
    }

    fn build_program(&self, source: &ProgramSource) -> Result<WgpuProgram> {
        // Rendering every kernel once rejects unsupported element types up front.
        for kernel in &source.kernels {
            shaders::render(source, kernel, 1)?;
        }
        if let Some(opts) = &source.compiler_opts {
            log::warn!("ignoring compiler options '{}' on the wgpu backend", opts);
        }
        log::debug!(
            "built wgpu program {:?} for {} ({} kernels)",
            source.kind,
            source.elem,
            source.kernels.len()
        );
        Ok(WgpuProgram {
            source: source.clone(),
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    fn suggest_worksizes(&self, program: &WgpuProgram, kernel: &str, realws: usize) -> Result<Worksize> {
        if !program.source.has_kernel(kernel) {
            bail!("kernel '{}' not found in program", kernel);
        }
        Ok(super::worksize::suggest(realws, self.info.max_local_size.min(256)))
    }

    fn enqueue_kernel(
        &self,
        queue: &WgpuQueue,
        program: &WgpuProgram,
        kernel: &str,
        worksize: Worksize,
        args: &[KernelArg<'_, WgpuBuffer>],
        wait: &EventWaitList<WgpuEvent>,
    ) -> Result<WgpuEvent> {
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

        let groups = gws / lws;
        let mut params = vec![groups as u32];
        let mut buffers = Vec::new();
        let mut local_mem = 0usize;
        for arg in args {
            match arg {
                KernelArg::Buffer(b) => buffers.push(*b),
                KernelArg::Uint(v) => params.push(*v),
                KernelArg::Local(bytes) => local_mem += *bytes,
            }
        }
        if local_mem > self.info.max_local_mem {
            bail!(
                "kernel '{}' needs {} bytes of local memory, device has {}",
                kernel,
                local_mem,
                self.info.max_local_mem
            );
        }
        ensure!(params.len() <= PARAM_SLOTS, "kernel '{}' takes too many scalars", kernel);
        params.resize(PARAM_SLOTS, 0);

        let compiled = self.pipeline(program, kernel, lws)?;
        ensure!(
            buffers.len() == compiled.buffers,
            "kernel '{}' binds {} buffers, got {}",
            kernel,
            compiled.buffers,
            buffers.len()
        );

        let uniform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("kernel params"),
            contents: bytemuck::cast_slice(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let mut entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(i, b)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: b.buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: buffers.len() as u32,
            resource: uniform.as_entire_binding(),
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel),
            layout: &compiled.layout,
            entries: &entries,
        });

        let (wx, wy) = self.dispatch_dims(groups)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(kernel) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel),
                timestamp_writes: None,
            });
            pass.set_pipeline(&compiled.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(wx, wy, 1);
        }
        self.submit(queue, vec![encoder.finish()], wait, kernel.to_string())
    }

    fn enqueue_write(
        &self,
        queue: &WgpuQueue,
        buffer: &WgpuBuffer,
        offset: usize,
        data: &[u8],
        wait: &EventWaitList<WgpuEvent>,
    ) -> Result<WgpuEvent> {
        self.check_transfer(buffer, offset, data.len())?;
        self.queue.write_buffer(&buffer.buffer, offset as u64, data);
        self.submit(queue, Vec::new(), wait, format!("write '{}'", buffer.label))
    }

    fn enqueue_read(
        &self,
        queue: &WgpuQueue,
        buffer: &WgpuBuffer,
        offset: usize,
        out: &mut [u8],
        wait: &EventWaitList<WgpuEvent>,
    ) -> Result<WgpuEvent> {
        self.check_transfer(buffer, offset, out.len())?;
        let label = format!("read '{}'", buffer.label);
        if out.is_empty() {
            return self.submit(queue, Vec::new(), wait, label);
        }
        let size = out.len() as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_buffer_to_buffer(&buffer.buffer, offset as u64, &staging, 0, size);
        let event = self.submit(queue, vec![encoder.finish()], wait, label)?;

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = sender.send(v);
        });
        self.poll()?;
        match pollster::block_on(receiver.receive()) {
            Some(Ok(())) => {
                let data = slice.get_mapped_range();
                out.copy_from_slice(&data);
                drop(data);
                staging.unmap();
                Ok(event)
            }
            Some(Err(e)) => bail!("failed to map '{}' for reading: {}", buffer.label, e),
            None => bail!("readback of '{}' was cancelled", buffer.label),
        }
    }

    fn enqueue_copy(
        &self,
        queue: &WgpuQueue,
        src: &WgpuBuffer,
        dst: &WgpuBuffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
        wait: &EventWaitList<WgpuEvent>,
    ) -> Result<WgpuEvent> {
        ensure!(!std::ptr::eq(src, dst), "cannot copy buffer '{}' onto itself", src.label);
        self.check_transfer(src, src_offset, size)?;
        self.check_transfer(dst, dst_offset, size)?;
        let label = format!("copy '{}' -> '{}'", src.label, dst.label);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("copy encoder") });
        if size > 0 {
            encoder.copy_buffer_to_buffer(
                &src.buffer,
                src_offset as u64,
                &dst.buffer,
                dst_offset as u64,
                size as u64,
            );
        }
        self.submit(queue, vec![encoder.finish()], wait, label)
    }

    fn wait(&self, events: &EventWaitList<WgpuEvent>) -> Result<()> {
        self.check_wait(events)?;
        if !events.is_empty() {
            self.poll()?;
        }
        Ok(())
    }
}
