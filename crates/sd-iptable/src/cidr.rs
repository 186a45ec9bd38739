use std::net::Ipv4Addr;
use thiserror::Error;

use crate::{DEFAULT_GROUP, GroupId};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CidrError {
    #[error("Missing '/' in CIDR entry: {0}")]
    MissingPrefix(String),
    #[error("Invalid IPv4 address: {0}")]
    InvalidAddress(String),
    #[error("Invalid prefix length: {0}")]
    InvalidMask(String),
    #[error("Prefix length {0} out of range (0-32)")]
    MaskOutOfRange(u32),
}

/// Closed address range `[start, end]` tagged with its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: u32,
    pub end: u32,
    pub group: GroupId,
}

impl Interval {
    /// Range covered by `addr/mask_bits`. Host bits of `addr` are ignored.
    pub fn from_prefix(addr: Ipv4Addr, mask_bits: u8) -> Result<Self, CidrError> {
        if mask_bits > 32 {
            return Err(CidrError::MaskOutOfRange(mask_bits as u32));
        }
        let host = host_mask(mask_bits);
        let start = u32::from(addr) & !host;
        Ok(Self {
            start,
            end: start | host,
            group: DEFAULT_GROUP,
        })
    }

    /// Parse the two halves of an `ip/mask` pair.
    pub fn parse(address: &str, mask: &str) -> Result<Self, CidrError> {
        let addr: Ipv4Addr = address
            .parse()
            .map_err(|_| CidrError::InvalidAddress(address.to_string()))?;
        let bits: u32 = mask
            .parse()
            .map_err(|_| CidrError::InvalidMask(mask.to_string()))?;
        if bits > 32 {
            return Err(CidrError::MaskOutOfRange(bits));
        }
        Self::from_prefix(addr, bits as u8)
    }

    /// Parse a full `a.b.c.d/n` entry.
    pub fn parse_cidr(entry: &str) -> Result<Self, CidrError> {
        let (address, mask) = entry
            .split_once('/')
            .ok_or_else(|| CidrError::MissingPrefix(entry.to_string()))?;
        Self::parse(address, mask)
    }

    pub fn with_group(self, group: GroupId) -> Self {
        Self { group, ..self }
    }

    pub fn contains(&self, ip: u32) -> bool {
        self.start <= ip && ip <= self.end
    }

    pub fn first_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.start)
    }

    pub fn last_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.end)
    }
}

/// Host-bit mask for a prefix length: `/0` sets all 32 bits, `/32` none.
fn host_mask(mask_bits: u8) -> u32 {
    u32::MAX.checked_shr(mask_bits as u32).unwrap_or(0)
}
