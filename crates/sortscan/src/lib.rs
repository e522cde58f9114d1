//! Runtime-pluggable sort and scan primitives for GPU compute devices.
//!
//! Pick an algorithm by name, hand it tuning options and an element type, and
//! run it on host slices or on buffers already resident on a device:
//!
//! ```no_run
//! use sortscan::{runtime::host::HostBackend, ElemType, Sort};
//!
//! let backend = HostBackend::new();
//! let sorter = Sort::new(&backend, "abitonic", Some("minps=2,maxps=4"), ElemType::UInt)?;
//! let mut data = vec![5u32, 3, 9, 1];
//! sorter.sort_slice(&mut data)?;
//! assert_eq!(data, vec![1, 3, 5, 9]);
//! # Ok::<(), sortscan::Error>(())
//! ```

pub mod bits;
pub mod compare;
pub mod config;
mod coordinator;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod scan;
pub mod sort;
pub mod types;

pub use compare::{Comparator, Order, SortKey};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use registry::Algorithm;
pub use runtime::{Backend, EventWaitList, Worksize};
pub use scan::{Scan, ScanAlgorithm, ScanBuilder};
pub use sort::abitonic::AbitonicOptions;
pub use sort::{Sort, SortAlgorithm, SortBuilder};
pub use types::{ElemType, Element, Value};

#[cfg(feature = "wgpu")]
pub use runtime::gpu::{WgpuBackend, WgpuConfig};
