//! generic type-length-value container used for handshake framing
//!
//! wire form: `(type: u8, length: u32 LE, value: bytes)` triples, emitted in
//! ascending type order. a `BTreeMap` keyed by the element type gives
//! canonical ordering for free. unknown type bytes (greater than the enum's
//! highest known discriminant) are skipped on parse rather than rejected.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// an enum usable as a TLV element type: small, ordered, and round-trippable
/// through `u8`.
pub trait ElementType: Copy + Ord + Into<u8> {
    /// the highest valid discriminant. anything above this is an unknown
    /// type and is skipped rather than rejected.
    const MAX: u8;

    fn from_u8(value: u8) -> Option<Self>;
}

/// a parsed or in-progress TLV message over element type `E`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv<E: ElementType> {
    elements: BTreeMap<u8, Vec<u8>>,
    _marker: std::marker::PhantomData<E>,
}

impl<E: ElementType> Tlv<E> {
    pub fn new() -> Self {
        Self {
            elements: BTreeMap::new(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn from_elements(elements: impl IntoIterator<Item = (E, Vec<u8>)>) -> Self {
        let mut tlv = Self::new();
        for (ty, value) in elements {
            tlv.set(ty, value);
        }
        tlv
    }

    pub fn set(&mut self, ty: E, value: impl Into<Vec<u8>>) {
        self.elements.insert(ty.into(), value.into());
    }

    pub fn get(&self, ty: E) -> Option<&[u8]> {
        self.elements.get(&ty.into()).map(Vec::as_slice)
    }

    pub fn take(&mut self, ty: E) -> Option<Vec<u8>> {
        self.elements.remove(&ty.into())
    }

    pub fn require(&self, ty: E) -> Result<&[u8]> {
        self.get(ty)
            .ok_or_else(|| Error::Malformed("missing required TLV element".into()))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let total: usize = self
            .elements
            .values()
            .map(|v| 1 + 4 + v.len())
            .sum();
        let mut out = Vec::with_capacity(total);
        for (ty, value) in &self.elements {
            out.push(*ty);
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(value);
        }
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut elements = BTreeMap::new();
        let mut offset = 0usize;
        while offset < data.len() {
            if offset + 1 + 4 > data.len() {
                return Err(Error::Malformed("truncated TLV header".into()));
            }
            let ty = data[offset];
            offset += 1;
            let length = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;
            if offset + length > data.len() {
                return Err(Error::Malformed("truncated TLV value".into()));
            }
            if ty > E::MAX {
                offset += length;
                continue;
            }
            elements.insert(ty, data[offset..offset + length].to_vec());
            offset += length;
        }
        Ok(Self {
            elements,
            _marker: std::marker::PhantomData,
        })
    }
}
