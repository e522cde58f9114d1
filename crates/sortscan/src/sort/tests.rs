use super::*;
use crate::runtime::host::{Command, HostBackend};
use crate::types::Value;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ALGORITHMS: [&str; 4] = ["sbitonic", "abitonic", "gselect", "satradix"];

fn random_elems(ty: ElemType, n: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = vec![0u8; n * ty.size()];
    for chunk in out.chunks_exact_mut(ty.size()) {
        let v = if ty.is_float() {
            Value::Float(rng.gen_range(-1000.0..1000.0))
        } else {
            Value::Int(rng.gen_range(-100_000i128..100_000))
        };
        ty.encode(v, chunk);
    }
    out
}

fn sorted_reference(cmp: &Comparator, data: &[u8]) -> Vec<u8> {
    let size = cmp.elem.size();
    let mut elems: Vec<&[u8]> = data.chunks_exact(size).collect();
    elems.sort_by(|a, b| cmp.compare(a, b));
    elems.concat()
}

fn host_sort(sorter: &Sort<HostBackend>, data: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; data.len()];
    let n = data.len() / sorter.element_size();
    sorter.sort_with_host_data(None, None, data, &mut out, n, None)?;
    Ok(out)
}

#[test]
fn test_unknown_algorithm() {
    let backend = HostBackend::new();
    let err = Sort::new(&backend, "quicksort", None, ElemType::Int).err().unwrap();
    assert!(matches!(err, Error::UnknownAlgorithm { family: "sort", .. }));
    assert!(err.is_validation());
    assert_eq!(SortAlgorithm::names(), ALGORITHMS.to_vec());
}

#[test]
fn test_all_algorithms_all_types() -> Result<()> {
    let backend = HostBackend::new();
    for name in ALGORITHMS {
        for ty in ElemType::all() {
            let sorter = Sort::new(&backend, name, None, ty)?;
            for (i, n) in [2usize, 3, 31, 64, 100, 517].into_iter().enumerate() {
                let data = random_elems(ty, n, i as u64 * 31 + ty.index() as u64);
                let out = host_sort(&sorter, &data)?;
                let cmp = Comparator::ascending(ty);
                assert!(cmp.is_sorted(&out), "{name}/{ty}/n={n} not sorted");
                assert_eq!(out, sorted_reference(&cmp, &data), "{name}/{ty}/n={n}");
            }
        }
    }
    assert_eq!(backend.live_buffers(), 0);
    assert_eq!(backend.live_queues(), 0);
    Ok(())
}

#[test]
fn test_large_inputs() -> Result<()> {
    let backend = HostBackend::new();
    for name in ["sbitonic", "abitonic", "satradix"] {
        let sorter = Sort::new(&backend, name, None, ElemType::Float)?;
        let mut rng = StdRng::seed_from_u64(7);
        let mut data: Vec<f32> = (0..5000).map(|_| rng.gen_range(-1e6..1e6)).collect();
        let mut expected = data.clone();
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        sorter.sort_slice(&mut data)?;
        assert_eq!(data, expected, "{name}");
    }
    Ok(())
}

#[test]
fn test_empty_and_single() -> Result<()> {
    let backend = HostBackend::new();
    for name in ALGORITHMS {
        let sorter = Sort::new(&backend, name, None, ElemType::UInt)?;
        let mut empty: Vec<u32> = vec![];
        sorter.sort_slice(&mut empty)?;
        assert!(empty.is_empty());
        let mut one = vec![42u32];
        sorter.sort_slice(&mut one)?;
        assert_eq!(one, vec![42]);
    }
    Ok(())
}

#[test]
fn test_sorted_input_is_unchanged() -> Result<()> {
    let backend = HostBackend::new();
    for name in ALGORITHMS {
        let sorter = Sort::new(&backend, name, None, ElemType::Short)?;
        let sorted: Vec<i16> = (-50..200).collect();
        let mut data = sorted.clone();
        sorter.sort_slice(&mut data)?;
        assert_eq!(data, sorted, "{name}");
        sorter.sort_slice(&mut data)?;
        assert_eq!(data, sorted, "{name}");
    }
    Ok(())
}

#[test]
fn test_gselect_copies_back_into_input() -> Result<()> {
    let backend = HostBackend::new();
    let sorter = Sort::new(&backend, "gselect", None, ElemType::Int)?;
    assert!(!sorter.in_place());

    let queue = backend.create_queue("exec", false)?;
    let values = [9i32, -3, 7, 7, 0, -12];
    let bytes: &[u8] = bytemuck::cast_slice(&values);
    let buffer = backend.create_buffer("data", bytes.len())?;
    backend.enqueue_write(&queue, &buffer, 0, bytes, &EventWaitList::new())?;
    let baseline = backend.live_buffers();

    let wait = sorter.sort_with_device_data(&queue, None, &buffer, None, values.len(), None)?;
    backend.wait(&wait)?;

    let sorted: Vec<i32> = bytemuck::cast_slice(&buffer.snapshot()?).to_vec();
    assert_eq!(sorted, vec![-12, -3, 0, 7, 7, 9]);
    assert_eq!(backend.live_buffers(), baseline, "temporary buffer leaked");

    let log = backend.command_log();
    let last = log.iter().rev().find(|r| r.event.is_some()).unwrap();
    assert!(matches!(last.command, Command::Copy { dst, .. } if dst == buffer.id()));
    Ok(())
}

#[test]
fn test_output_buffer_leaves_input_untouched() -> Result<()> {
    let backend = HostBackend::new();
    let queue = backend.create_queue("exec", false)?;
    let values = [5u32, 1, 4, 2, 3];
    let bytes: &[u8] = bytemuck::cast_slice(&values);
    for name in ALGORITHMS {
        let sorter = Sort::new(&backend, name, None, ElemType::UInt)?;
        let input = backend.create_buffer("in", bytes.len())?;
        let output = backend.create_buffer("out", bytes.len())?;
        backend.enqueue_write(&queue, &input, 0, bytes, &EventWaitList::new())?;

        let wait = sorter.sort_with_device_data(&queue, None, &input, Some(&output), 5, None)?;
        backend.wait(&wait)?;

        assert_eq!(input.snapshot()?, bytes, "{name} modified its input");
        let sorted: Vec<u32> = bytemuck::cast_slice(&output.snapshot()?).to_vec();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5], "{name}");
    }
    Ok(())
}

#[test]
fn test_sbitonic_chains_every_launch() -> Result<()> {
    let backend = HostBackend::new();
    let sorter = Sort::new(&backend, "sbitonic", None, ElemType::UInt)?;
    let queue = backend.create_queue("exec", false)?;
    let data: Vec<u32> = (0..100u32).rev().collect();
    let buffer = backend.create_buffer("data", 400)?;
    backend.enqueue_write(&queue, &buffer, 0, bytemuck::cast_slice(&data), &EventWaitList::new())?;
    backend.clear_log();

    let wait = sorter.sort_with_device_data(&queue, None, &buffer, None, 100, Some(16))?;
    let log = backend.command_log();
    // 100 elements pad to 128: 7 stages, 1 + 2 + ... + 7 steps.
    assert_eq!(log.len(), 28);
    assert!(log[0].waited_on.is_empty());
    for pair in log.windows(2) {
        assert_eq!(pair[1].waited_on, vec![pair[0].event.unwrap()]);
    }
    for record in &log {
        match &record.command {
            Command::Kernel { name, worksize } => {
                assert_eq!(name, "sbitonic");
                assert_eq!(worksize.lws, 16);
                assert_eq!(worksize.gws, 64);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
    assert_eq!(wait.as_slice().len(), 1);
    assert_eq!(wait.as_slice()[0].id, log.last().unwrap().event.unwrap());
    Ok(())
}

#[test]
fn test_host_data_uses_given_queues() -> Result<()> {
    let backend = HostBackend::new();
    let sorter = Sort::new(&backend, "abitonic", None, ElemType::Long)?;
    let exec = backend.create_queue("exec", true)?;
    let comm = backend.create_queue("comm", false)?;
    let data = random_elems(ElemType::Long, 300, 3);
    let mut out = vec![0u8; data.len()];
    backend.clear_log();

    sorter.sort_with_host_data(Some(&exec), Some(&comm), &data, &mut out, 300, None)?;
    assert!(Comparator::ascending(ElemType::Long).is_sorted(&out));

    let log = backend.command_log();
    for record in log.iter().filter(|r| r.event.is_some()) {
        match record.command {
            Command::Kernel { .. } => {
                assert_eq!(record.queue, Some(exec.id()));
                assert!(record.elapsed.is_some());
            }
            _ => assert_eq!(record.queue, Some(comm.id())),
        }
    }
    // Write, then an explicit wait on it, before any kernel runs.
    assert!(matches!(log[0].command, Command::Write { .. }));
    assert_eq!(log[1].command, Command::Wait { events: vec![log[0].event.unwrap()] });
    // Read waits on the last kernel and is itself waited on.
    let n = log.len();
    assert!(matches!(log[n - 2].command, Command::Read { .. }));
    assert_eq!(log[n - 1].command, Command::Wait { events: vec![log[n - 2].event.unwrap()] });
    assert_eq!(backend.live_queues(), 2);
    Ok(())
}

#[test]
fn test_internal_queue_released_on_error() -> Result<()> {
    // Local memory so small that even the scan inside satradix cannot fit.
    let backend = HostBackend::with_limits(256, 8);
    let sorter = Sort::new(&backend, "satradix", None, ElemType::UInt)?;
    let mut data: Vec<u32> = (0..1000).rev().collect();
    let err = sorter.sort_slice(&mut data).err().unwrap();
    assert!(matches!(err, Error::Runtime { .. }));
    assert_eq!(backend.live_queues(), 0);
    assert_eq!(backend.live_buffers(), 0);
    Ok(())
}

#[test]
fn test_descending_and_key_sort() -> Result<()> {
    let backend = HostBackend::new();
    for name in ALGORITHMS {
        let sorter = SortBuilder::new(name).order(Order::Descending).build(&backend, ElemType::Double)?;
        let mut data = vec![0.5f64, -2.0, 8.25, 3.0, 3.0, -7.5, 1.0];
        sorter.sort_slice(&mut data)?;
        assert_eq!(data, vec![8.25, 3.0, 3.0, 1.0, 0.5, -2.0, -7.5], "{name}");

        // Sort 64-bit records by their high 32-bit word, payload in the low word.
        let sorter = SortBuilder::new(name)
            .key(SortKey::new(ElemType::Int, 4))
            .build(&backend, ElemType::ULong)?;
        assert_eq!(sorter.key_type(), Some(ElemType::Int));
        let records: Vec<u64> = [(3i32, 0u32), (-1, 1), (2, 2), (-8, 3), (2, 4)]
            .iter()
            .map(|(k, p)| ((*k as u32 as u64) << 32) | *p as u64)
            .collect();
        let mut data = records.clone();
        sorter.sort_slice(&mut data)?;
        let keys: Vec<i32> = data.iter().map(|r| (r >> 32) as u32 as i32).collect();
        assert_eq!(keys, vec![-8, -1, 2, 2, 3], "{name}");
    }
    Ok(())
}

#[test]
fn test_stable_strategies_keep_equal_keys_in_order() -> Result<()> {
    let backend = HostBackend::new();
    for name in ["gselect", "satradix"] {
        let sorter = SortBuilder::new(name)
            .key(SortKey::new(ElemType::UChar, 0))
            .build(&backend, ElemType::UInt)?;
        // Low byte is the key, the upper bytes record the original position.
        let mut data: Vec<u32> = (0..200u32).map(|i| (i << 8) | (i * 7 % 5)).collect();
        sorter.sort_slice(&mut data)?;
        for w in data.windows(2) {
            let (ka, kb) = (w[0] & 0xFF, w[1] & 0xFF);
            assert!(ka < kb || (ka == kb && w[0] >> 8 < w[1] >> 8), "{name} is not stable");
        }
    }
    Ok(())
}

#[test]
fn test_options_validation() {
    let backend = HostBackend::new();
    for bad in ["minps=5", "minps=3,maxps=2", "foo=1", "minps"] {
        let err = Sort::new(&backend, "abitonic", Some(bad), ElemType::Int).err().unwrap();
        assert!(matches!(err, Error::InvalidArguments(_)), "{bad}");
    }
    assert!(Sort::new(&backend, "abitonic", Some("minps=2,maxps=4"), ElemType::Int).is_ok());
    assert!(Sort::new(&backend, "abitonic", Some(""), ElemType::Int).is_ok());
    let err = Sort::new(&backend, "sbitonic", Some("minps=2"), ElemType::Int).err().unwrap();
    assert!(matches!(err, Error::InvalidArguments(_)));
    let err = SortBuilder::new("sbitonic")
        .key(SortKey::new(ElemType::Long, 0))
        .build(&backend, ElemType::Int)
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidArguments(_)));
}

#[test]
fn test_abitonic_options_change_kernels() -> Result<()> {
    let backend = HostBackend::new();
    let data: Vec<u32> = (0..4096u32).map(|i| i.wrapping_mul(2654435761)).collect();
    let mut expected = data.clone();
    expected.sort();

    for opts in ["", "minps=1,maxps=1", "minps=2,maxps=2", "minps=4,maxps=4", "maxsfs=3", "maxsfs=0,maxps=1"] {
        let sorter = Sort::new(&backend, "abitonic", Some(opts), ElemType::UInt)?;
        backend.clear_log();
        let mut d = data.clone();
        sorter.sort_slice(&mut d)?;
        assert_eq!(d, expected, "options '{opts}'");
        let kernels = backend.kernel_launches();
        match opts {
            "minps=1,maxps=1" => assert!(kernels.iter().all(|k| !k.contains("priv") && !k.contains("hyb"))),
            "maxsfs=0,maxps=1" => assert!(kernels.iter().all(|k| k == "abit_any")),
            "minps=4,maxps=4" => assert!(kernels.iter().any(|k| k == "abit_priv_4s16v" || k.ends_with("_4s16v"))),
            _ => {}
        }
    }
    Ok(())
}

#[test]
fn test_introspection() -> Result<()> {
    let backend = HostBackend::new();
    let expected = [("sbitonic", 1), ("abitonic", 26), ("gselect", 1), ("satradix", 3)];
    for (name, count) in expected {
        let sorter = Sort::new(&backend, name, None, ElemType::Float)?;
        assert_eq!(sorter.num_kernels(), count, "{name}");
        assert!(matches!(sorter.kernel_name(count), Err(Error::InvalidArguments(_))));
        assert!(matches!(sorter.localmem_usage(count, None, 10), Err(Error::InvalidArguments(_))));
        assert_eq!(sorter.name(), name);
        assert_eq!(sorter.element_type(), ElemType::Float);
        assert_eq!(sorter.element_size(), 4);
        assert_eq!(sorter.key_type(), None);
    }

    let sorter = Sort::new(&backend, "abitonic", None, ElemType::Float)?;
    assert_eq!(sorter.kernel_name(0)?, "abit_any");
    assert_eq!(sorter.kernel_name(3)?, "abit_local_s4");
    assert_eq!(sorter.localmem_usage(0, None, 1 << 16)?, 0);
    assert_eq!(sorter.localmem_usage(3, Some(64), 1 << 16)?, 2 * 64 * 4);

    let sorter = Sort::new(&backend, "satradix", None, ElemType::Float)?;
    assert_eq!(sorter.kernel_name(1)?, "satradix_histogram");
    assert_eq!(sorter.localmem_usage(0, Some(128), 1 << 16)?, 2 * 128 * 8);
    Ok(())
}

#[test]
fn test_local_size_cap_is_respected() -> Result<()> {
    let backend = HostBackend::new();
    for name in ALGORITHMS {
        let sorter = Sort::new(&backend, name, None, ElemType::Int)?;
        let data = random_elems(ElemType::Int, 700, 11);
        let mut out = vec![0u8; data.len()];
        backend.clear_log();
        sorter.sort_with_host_data(None, None, &data, &mut out, 700, Some(32))?;
        assert!(Comparator::ascending(ElemType::Int).is_sorted(&out));
        for record in backend.command_log() {
            if let Command::Kernel { worksize, name: k } = record.command {
                assert!(worksize.lws <= 32, "{name}: {k} used lws {}", worksize.lws);
            }
        }
    }
    Ok(())
}

#[test]
fn test_configured_local_size_cap() -> Result<()> {
    let backend = HostBackend::new();
    let config = EngineConfig::default().with_max_local_size(32);
    for name in ALGORITHMS {
        let sorter = SortBuilder::new(name).config(config.clone()).build(&backend, ElemType::UInt)?;
        let data = random_elems(ElemType::UInt, 900, 5);
        backend.clear_log();
        assert_eq!(host_sort(&sorter, &data)?, sorted_reference(&Comparator::ascending(ElemType::UInt), &data));
        for record in backend.command_log() {
            if let Command::Kernel { worksize, name: k } = record.command {
                assert!(worksize.lws <= 32, "{name}: {k} used lws {}", worksize.lws);
            }
        }
    }

    // A per-call cap wins over the configured default.
    let sorter = SortBuilder::new("sbitonic").config(config).build(&backend, ElemType::UInt)?;
    let data = random_elems(ElemType::UInt, 900, 6);
    let mut out = vec![0u8; data.len()];
    backend.clear_log();
    sorter.sort_with_host_data(None, None, &data, &mut out, 900, Some(64))?;
    let widest = backend
        .command_log()
        .iter()
        .filter_map(|r| match &r.command {
            Command::Kernel { worksize, .. } => Some(worksize.lws),
            _ => None,
        })
        .max();
    assert_eq!(widest, Some(64));
    Ok(())
}

#[test]
fn test_small_local_memory_device() -> Result<()> {
    let backend = HostBackend::with_limits(64, 512);
    let sorter = Sort::new(&backend, "abitonic", None, ElemType::Double)?;
    let mut data: Vec<f64> = (0..3000).map(|i| ((i * 7919) % 3001) as f64).collect();
    sorter.sort_slice(&mut data)?;
    assert!(data.windows(2).all(|w| w[0] <= w[1]));
    Ok(())
}

#[test]
fn test_every_algorithm_fits_small_local_memory() -> Result<()> {
    let backend = HostBackend::with_limits(256, 4096);
    let cmp = Comparator::ascending(ElemType::Double);
    let data = random_elems(ElemType::Double, 3000, 31);
    let expected = sorted_reference(&cmp, &data);
    for name in ALGORITHMS {
        let sorter = Sort::new(&backend, name, None, ElemType::Double)?;
        assert_eq!(host_sort(&sorter, &data)?, expected, "{name}");
    }

    // Blocks of 2 * 128 doubles plus their scan slots are the most that fit.
    let sorter = Sort::new(&backend, "satradix", None, ElemType::Double)?;
    assert_eq!(sorter.localmem_usage(0, None, 3000)?, 2 * 128 * 12);
    backend.clear_log();
    host_sort(&sorter, &data)?;
    for record in backend.command_log() {
        if let Command::Kernel { worksize, name } = record.command {
            if name == "satradix_localsort" {
                assert_eq!(worksize.lws, 128);
            }
        }
    }
    Ok(())
}

#[test]
fn test_host_data_argument_checks() -> Result<()> {
    let backend = HostBackend::new();
    let sorter = Sort::new(&backend, "sbitonic", None, ElemType::Int)?;
    let mut out = [0u8; 8];
    let err = sorter.sort_with_host_data(None, None, &[0u8; 8], &mut out, 3, None).err().unwrap();
    assert!(matches!(err, Error::InvalidArguments(_)));

    let mut wrong = vec![1u32, 2];
    let err = sorter.sort_slice(&mut wrong).err().unwrap();
    assert!(matches!(err, Error::InvalidArguments(_)));
    Ok(())
}

#[test]
fn test_verification_passes_on_correct_output() -> Result<()> {
    let backend = HostBackend::new();
    let sorter = SortBuilder::new("gselect")
        .config(EngineConfig::default().with_verification())
        .build(&backend, ElemType::UShort)?;
    let mut data: Vec<u16> = vec![900, 3, 65535, 0, 12];
    sorter.sort_slice(&mut data)?;
    assert_eq!(data, vec![0, 3, 12, 900, 65535]);
    Ok(())
}
