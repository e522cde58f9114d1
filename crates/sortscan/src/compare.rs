//! Sort keys and element ordering.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::ElemType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// A key embedded in each element: `ty` stored at byte `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub ty: ElemType,
    pub offset: usize,
}

impl SortKey {
    pub fn new(ty: ElemType, offset: usize) -> Self {
        Self { ty, offset }
    }
}

/// Orders encoded elements by their key, in a given direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Comparator {
    pub elem: ElemType,
    pub key: SortKey,
    pub order: Order,
}

impl Comparator {
    pub fn new(elem: ElemType, key: Option<SortKey>, order: Order) -> Result<Self> {
        let key = key.unwrap_or(SortKey::new(elem, 0));
        if key.offset + key.ty.size() > elem.size() {
            return Err(Error::invalid(format!(
                "key {} at offset {} does not fit in a {}-byte {} element",
                key.ty,
                key.offset,
                elem.size(),
                elem
            )));
        }
        Ok(Self { elem, key, order })
    }

    pub fn ascending(elem: ElemType) -> Self {
        Self {
            elem,
            key: SortKey::new(elem, 0),
            order: Order::Ascending,
        }
    }

    /// True when the element is its own key.
    pub fn is_whole_element(&self) -> bool {
        self.key.ty == self.elem && self.key.offset == 0
    }

    #[inline]
    pub fn key_bytes<'a>(&self, element: &'a [u8]) -> &'a [u8] {
        &element[self.key.offset..self.key.offset + self.key.ty.size()]
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let o = self.key.ty.compare(self.key_bytes(a), self.key_bytes(b));
        match self.order {
            Order::Ascending => o,
            Order::Descending => o.reverse(),
        }
    }

    pub fn key_bits(&self) -> u32 {
        self.key.ty.bits()
    }

    /// Unsigned radix key whose natural order is this comparator's order.
    pub fn radix_key(&self, element: &[u8]) -> u64 {
        let k = self.key.ty.radix_key(self.key_bytes(element));
        match self.order {
            Order::Ascending => k,
            Order::Descending => {
                let bits = self.key_bits();
                let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
                !k & mask
            }
        }
    }

    /// True when `data` holds elements in non-decreasing comparator order.
    pub fn is_sorted(&self, data: &[u8]) -> bool {
        let size = self.elem.size();
        data.chunks_exact(size)
            .zip(data.chunks_exact(size).skip(1))
            .all(|(a, b)| self.compare(a, b) != Ordering::Greater)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_must_fit() {
        let err = Comparator::new(ElemType::UInt, Some(SortKey::new(ElemType::UShort, 3)), Order::Ascending);
        assert!(matches!(err, Err(Error::InvalidArguments(_))));
        assert!(Comparator::new(ElemType::ULong, Some(SortKey::new(ElemType::UInt, 4)), Order::Ascending).is_ok());
    }

    #[test]
    fn test_compare_by_embedded_key() {
        // High word is the key, low word is payload.
        let c = Comparator::new(ElemType::ULong, Some(SortKey::new(ElemType::UInt, 4)), Order::Ascending).unwrap();
        let a = ((1u64 << 32) | 99).to_le_bytes();
        let b = ((2u64 << 32) | 1).to_le_bytes();
        assert_eq!(c.compare(&a, &b), Ordering::Less);
        assert!(!c.is_whole_element());
    }

    #[test]
    fn test_descending() {
        let c = Comparator::new(ElemType::Int, None, Order::Descending).unwrap();
        let a = 5i32.to_le_bytes();
        let b = (-5i32).to_le_bytes();
        assert_eq!(c.compare(&a, &b), Ordering::Less);
        assert!(c.radix_key(&a) < c.radix_key(&b));
        let data: Vec<u8> = [9i32, 4, 4, -1].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert!(c.is_sorted(&data));
        assert!(!Comparator::ascending(ElemType::Int).is_sorted(&data));
    }
}
