use crate::definitions::NodeIdType;
use crate::parse::{Input, ParseResult};
use crate::serialize::Serializable;
use cookie_factory as cf;
use nom::number::complete::{be_u16, be_u8};
use std::fmt::{Debug, Display};

/// A Z-Wave node-id (spec §3). Always stored widened to `u16`; the width it
/// takes on the wire depends entirely on the negotiated [`NodeIdType`],
/// never on the numeric value itself (spec invariant 2).
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u16);

/// `0` is the sentinel "no node" (spec §3).
pub const NODE_ID_NONE: NodeId = NodeId(0);
pub const NODE_ID_BROADCAST: NodeId = NodeId(0xff);

/// Valid classic node-ids.
pub const CLASSIC_RANGE: std::ops::RangeInclusive<u16> = 1..=232;
/// Valid Long Range node-ids.
pub const LONG_RANGE_RANGE: std::ops::RangeInclusive<u16> = 256..=4000;

impl NodeId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn none() -> Self {
        NODE_ID_NONE
    }

    pub fn broadcast() -> Self {
        NODE_ID_BROADCAST
    }

    pub fn is_valid(self) -> bool {
        CLASSIC_RANGE.contains(&self.0) || LONG_RANGE_RANGE.contains(&self.0)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// Index into a `1..=MAX_NODES` resource-directory array (spec invariant 1).
    pub fn as_index(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0 as usize - 1)
        }
    }

    pub fn parse(i: Input, node_id_type: NodeIdType) -> ParseResult<Self> {
        match node_id_type {
            NodeIdType::NodeId8Bit => {
                let (i, v) = be_u8(i)?;
                Ok((i, Self(v as u16)))
            }
            NodeIdType::NodeId16Bit => {
                let (i, v) = be_u16(i)?;
                Ok((i, Self(v)))
            }
        }
    }

    /// The single site that decides node-id wire width (spec §4.C "LR
    /// bit-stream adaptation"): every other call site must go through this.
    pub fn append<'a, W: std::io::Write + 'a>(
        &'a self,
        node_id_type: NodeIdType,
    ) -> impl cf::SerializeFn<W> + 'a {
        move |out| match node_id_type {
            NodeIdType::NodeId8Bit => cf::bytes::be_u8(self.0 as u8)(out),
            NodeIdType::NodeId16Bit => cf::bytes::be_u16(self.0)(out),
        }
    }

    pub fn append_to(self, buf: &mut Vec<u8>, node_id_type: NodeIdType) {
        match node_id_type {
            NodeIdType::NodeId8Bit => buf.push(self.0 as u8),
            NodeIdType::NodeId16Bit => buf.extend_from_slice(&self.0.to_be_bytes()),
        }
    }
}

macro_rules! impl_conversions_for {
    ($t:ty) => {
        impl From<$t> for NodeId {
            fn from(val: $t) -> Self {
                Self(val as u16)
            }
        }

        impl From<NodeId> for $t {
            fn from(val: NodeId) -> Self {
                val.0 as $t
            }
        }

        impl PartialEq<$t> for NodeId {
            fn eq(&self, other: &$t) -> bool {
                self == &NodeId::from(*other)
            }
        }
    };
}

impl_conversions_for!(u8);
impl_conversions_for!(u16);

impl Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:0>3}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classic_roundtrip_is_one_byte() {
        let id = NodeId::new(5);
        let mut buf = Vec::new();
        cf::gen_simple(id.append(NodeIdType::NodeId8Bit), &mut buf).unwrap();
        assert_eq!(buf, vec![0x05]);

        let (rest, parsed) = NodeId::parse(&buf, NodeIdType::NodeId8Bit).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, id);
    }

    #[test]
    fn long_range_roundtrip_is_two_bytes_msb_first() {
        let id = NodeId::new(0x0105);
        let mut buf = Vec::new();
        cf::gen_simple(id.append(NodeIdType::NodeId16Bit), &mut buf).unwrap();
        assert_eq!(buf, vec![0x01, 0x05]);

        let (rest, parsed) = NodeId::parse(&buf, NodeIdType::NodeId16Bit).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, id);
    }
}
