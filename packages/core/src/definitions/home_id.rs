use nom::number::complete::be_u32;
use std::fmt::{Debug, Display};

/// A Z-Wave home-id: 32 bits, big-endian on the wire and in persistent
/// storage (spec §3).
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HomeId(u32);

impl HomeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn parse(i: &[u8]) -> nom::IResult<&[u8], Self> {
        let (i, v) = be_u32(i)?;
        Ok((i, Self(v)))
    }

    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl Debug for HomeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl Display for HomeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}
