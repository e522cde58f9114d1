use super::*;
use crate::compare::Comparator;
use crate::runtime::ProgramKind;
use crate::scan::{ADD_WORKGROUP_SUMS, WORKGROUP_SCAN, WORKGROUP_SCAN_SUMS, WORKGROUP_SUMS_SCAN};
use crate::types::ElemType;

fn sbitonic_program(backend: &HostBackend) -> Result<HostProgram> {
    let source = ProgramSource::sort(
        ProgramKind::Sbitonic,
        Comparator::ascending(ElemType::UInt),
        vec!["sbitonic".to_string()],
    );
    backend.build_program(&source)
}

#[test]
fn test_resource_accounting() -> Result<()> {
    let backend = HostBackend::new();
    {
        let _q = backend.create_queue("q", false)?;
        let a = backend.create_buffer("a", 16)?;
        let _b = backend.create_buffer("b", 32)?;
        assert_eq!(backend.live_queues(), 1);
        assert_eq!(backend.live_buffers(), 2);
        assert_eq!(backend.buffer_size(&a), 16);
    }
    assert_eq!(backend.live_queues(), 0);
    assert_eq!(backend.live_buffers(), 0);
    Ok(())
}

#[test]
fn test_transfers_and_copies() -> Result<()> {
    let backend = HostBackend::new();
    let q = backend.create_queue("q", false)?;
    let a = backend.create_buffer("a", 8)?;
    let b = backend.create_buffer("b", 8)?;
    let w = backend.enqueue_write(&q, &a, 2, &[1, 2, 3], &EventWaitList::new())?;
    let c = backend.enqueue_copy(&q, &a, &b, 0, 0, 8, &EventWaitList::single(w.clone()))?;
    let mut out = [0u8; 4];
    let r = backend.enqueue_read(&q, &b, 1, &mut out, &EventWaitList::single(c.clone()))?;
    backend.wait(&EventWaitList::single(r.clone()))?;
    assert_eq!(out, [0, 1, 2, 3]);

    let log = backend.command_log();
    assert_eq!(log[1].waited_on, vec![w.id]);
    assert_eq!(log[2].waited_on, vec![c.id]);
    assert_eq!(log[3].command, Command::Wait { events: vec![r.id] });
    assert!(log.iter().all(|r| r.elapsed.is_none()));

    assert!(backend.enqueue_write(&q, &a, 6, &[0; 4], &EventWaitList::new()).is_err());
    assert!(backend.enqueue_copy(&q, &a, &a, 0, 0, 4, &EventWaitList::new()).is_err());
    Ok(())
}

#[test]
fn test_rejects_foreign_events() -> Result<()> {
    let backend = HostBackend::new();
    let q = backend.create_queue("q", false)?;
    let a = backend.create_buffer("a", 4)?;
    let bogus = HostEvent {
        id: 1_000_000,
        queue: q.id(),
        label: "bogus".to_string(),
    };
    assert!(backend
        .enqueue_write(&q, &a, 0, &[0; 4], &EventWaitList::single(bogus.clone()))
        .is_err());
    assert!(backend.wait(&EventWaitList::single(bogus)).is_err());
    Ok(())
}

#[test]
fn test_launch_limits() -> Result<()> {
    let backend = HostBackend::with_limits(64, 128);
    let program = sbitonic_program(&backend)?;
    let q = backend.create_queue("q", true)?;
    let data: Vec<u32> = vec![4, 3, 2, 1];
    let buf = backend.create_buffer("data", 16)?;
    backend.enqueue_write(&q, &buf, 0, bytemuck::cast_slice(&data), &EventWaitList::new())?;
    let none = EventWaitList::new();
    let args = |stage, step| {
        [
            KernelArg::Buffer(&buf),
            KernelArg::Uint(4),
            KernelArg::Uint(stage),
            KernelArg::Uint(step),
        ]
    };

    // Local size above the device limit, uneven global size, unknown kernel.
    assert!(backend
        .enqueue_kernel(&q, &program, "sbitonic", Worksize { gws: 128, lws: 128 }, &args(1, 1), &none)
        .is_err());
    assert!(backend
        .enqueue_kernel(&q, &program, "sbitonic", Worksize { gws: 3, lws: 2 }, &args(1, 1), &none)
        .is_err());
    assert!(backend
        .enqueue_kernel(&q, &program, "gselect", Worksize { gws: 2, lws: 2 }, &args(1, 1), &none)
        .is_err());
    assert!(backend.suggest_worksizes(&program, "gselect", 10).is_err());

    // Too few threads to cover the network.
    assert!(backend
        .enqueue_kernel(&q, &program, "sbitonic", Worksize { gws: 1, lws: 1 }, &args(1, 1), &none)
        .is_err());

    let mut wait = EventWaitList::new();
    for (stage, step) in [(1, 1), (2, 2), (2, 1)] {
        let ev = backend.enqueue_kernel(
            &q,
            &program,
            "sbitonic",
            Worksize { gws: 2, lws: 2 },
            &args(stage, step),
            &wait,
        )?;
        wait = EventWaitList::single(ev);
    }
    backend.wait(&wait)?;
    let sorted: Vec<u32> = bytemuck::cast_slice(&buf.snapshot()?).to_vec();
    assert_eq!(sorted, vec![1, 2, 3, 4]);

    let kernels: Vec<_> = backend
        .command_log()
        .into_iter()
        .filter(|r| r.kernel_name().is_some())
        .collect();
    assert_eq!(kernels.len(), 3);
    assert!(kernels.iter().all(|r| r.elapsed.is_some()));
    Ok(())
}

#[test]
fn test_local_memory_limit() -> Result<()> {
    let backend = HostBackend::with_limits(64, 32);
    let source = ProgramSource::scan(
        ProgramKind::Blelloch,
        ElemType::UInt,
        ElemType::UInt,
        [WORKGROUP_SCAN, WORKGROUP_SCAN_SUMS, WORKGROUP_SUMS_SCAN, ADD_WORKGROUP_SUMS]
            .iter()
            .map(|k| k.to_string())
            .collect(),
    );
    let program = backend.build_program(&source)?;
    let q = backend.create_queue("q", false)?;
    let input = backend.create_buffer("in", 64)?;
    let output = backend.create_buffer("out", 64)?;
    let sums = backend.create_buffer("sums", 4)?;
    let args = |local| {
        [
            KernelArg::Buffer(&input),
            KernelArg::Buffer(&output),
            KernelArg::Buffer(&sums),
            KernelArg::Local(local),
            KernelArg::Uint(16),
        ]
    };
    let ws = Worksize { gws: 8, lws: 8 };
    let none = EventWaitList::new();
    assert!(backend.enqueue_kernel(&q, &program, "workgroupScan", ws, &args(64), &none).is_err());
    // Enough for the device but too little for a block of 16 sums.
    assert!(backend.enqueue_kernel(&q, &program, "workgroupScan", ws, &args(32), &none).is_err());
    Ok(())
}

#[test]
fn test_program_checks() {
    let backend = HostBackend::new();
    let source = ProgramSource::sort(
        ProgramKind::Abitonic,
        Comparator::ascending(ElemType::Int),
        vec!["abit_priv_5s32v".to_string()],
    );
    assert!(backend.build_program(&source).is_err());
}
