use derive_try_from_primitive::TryFromPrimitive;

/// SHMP `TYPE` field (spec §3/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum CommandType {
    Request = 0x00,
    Response = 0x01,
}
