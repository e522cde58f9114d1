use anyhow::{bail, Result};

use crate::bits;

/// A (global, local) work size pair. `gws` is always a multiple of `lws`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Worksize {
    pub gws: usize,
    pub lws: usize,
}

impl Worksize {
    pub fn new(gws: usize, lws: usize) -> Result<Self> {
        if lws == 0 {
            bail!("local work size must be positive");
        }
        if gws % lws != 0 {
            bail!("global work size {gws} is not a multiple of local work size {lws}");
        }
        Ok(Self { gws, lws })
    }

    /// Rounds `realws` threads up to whole groups of `lws`.
    pub fn fitted(realws: usize, lws: usize) -> Self {
        let lws = lws.max(1);
        Self {
            gws: bits::gws_mult(realws, lws),
            lws,
        }
    }

    /// Power-of-two decision for `threads` (itself a power of two): the local
    /// size is the largest power of two not above `lws_cap` nor `threads`.
    pub fn po2(threads: usize, lws_cap: usize) -> Self {
        let lws = bits::flpo2(lws_cap.max(1)).min(threads.max(1));
        Self::fitted(threads, lws)
    }

    pub fn groups(&self) -> usize {
        self.gws / self.lws
    }
}

/// Device-style suggestion: a power-of-two local size no larger than the
/// device limit nor the rounded-up thread count.
pub fn suggest(realws: usize, max_lws: usize) -> Worksize {
    let lws = bits::flpo2(max_lws.max(1)).min(bits::nlpo2(realws).max(1));
    Worksize::fitted(realws, lws)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_uneven() {
        assert!(Worksize::new(100, 64).is_err());
        assert!(Worksize::new(128, 0).is_err());
        assert_eq!(Worksize::new(128, 64).unwrap().groups(), 2);
    }

    #[test]
    fn test_po2_clamps() {
        assert_eq!(Worksize::po2(512, 256), Worksize { gws: 512, lws: 256 });
        // Non power-of-two cap rounds down.
        assert_eq!(Worksize::po2(512, 100), Worksize { gws: 512, lws: 64 });
        // Small problems shrink the group.
        assert_eq!(Worksize::po2(4, 256), Worksize { gws: 4, lws: 4 });
    }

    #[test]
    fn test_suggest() {
        assert_eq!(suggest(1000, 256), Worksize { gws: 1024, lws: 256 });
        assert_eq!(suggest(5, 256), Worksize { gws: 8, lws: 8 });
        assert_eq!(suggest(0, 256), Worksize { gws: 0, lws: 1 });
    }
}
