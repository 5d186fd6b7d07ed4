use derive_try_from_primitive::TryFromPrimitive;
use std::fmt::Display;

/// The module-wide node-id basetype (spec §3 `NodeId`). `lr_enabled` in the
/// dispatcher is `NodeIdType::NodeId16Bit` once Long Range is negotiated.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum NodeIdType {
    #[default]
    NodeId8Bit = 0x01,
    NodeId16Bit = 0x02,
}

impl Display for NodeIdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeIdType::NodeId8Bit => write!(f, "8 bit"),
            NodeIdType::NodeId16Bit => write!(f, "16 bit"),
        }
    }
}

impl NodeIdType {
    pub fn width(self) -> usize {
        match self {
            NodeIdType::NodeId8Bit => 1,
            NodeIdType::NodeId16Bit => 2,
        }
    }
}
