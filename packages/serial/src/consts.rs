use derive_try_from_primitive::TryFromPrimitive;

pub const SOF: u8 = 0x01;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const CAN: u8 = 0x18;

/// `LEN` must fall in this range for a data frame to be accepted (spec §3/§8).
pub const MIN_FRAME_LEN: u8 = 3;
pub const MAX_FRAME_LEN: u8 = 254;

pub const RX_BYTE_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(260);
pub const ACK_WAIT_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(10);
pub const MAX_SEND_RETRIES: u8 = 20;
pub const RETRY_BACKOFF_EVERY: u8 = 8;
pub const RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_secs(2);
pub const MAX_RXQUEUE_LEN: usize = 10;
/// Number of read cycles `send_with_response` budgets for the matching RESPONSE.
pub const RESPONSE_BUDGET_CYCLES: u8 = 3;

/// A representative, testable subset of the Z-Wave Serial API function
/// codes named in spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum FunctionType {
    GetSerialApiInitData = 0x02,
    ApplicationCommandHandler = 0x04,
    GetControllerCapabilities = 0x05,
    GetSerialApiCapabilities = 0x07,
    SoftReset = 0x08,
    SerialApiStarted = 0x0a,
    SerialApiSetup = 0x0b,
    SendData = 0x13,
    GetRandom = 0x1c,
    MemoryGetId = 0x20,
    NvmBackupRestore = 0x2e,
    GetNodeProtocolInfo = 0x41,
    AssignReturnRoute = 0x46,
    AddNodeToNetwork = 0x4a,
    RemoveNodeFromNetwork = 0x4b,
    ApplicationUpdate = 0x49,
    SetLearnMode = 0x50,
    RequestNodeInfo = 0x60,
    ApplicationCommandHandlerBridge = 0xa8,
    SendDataBridge = 0xa9,
}

impl FunctionType {
    /// Bit index of this function in the 29-byte `supported_bitmask`
    /// returned by `GetCapabilities` (spec §8 scenario 1:
    /// `bit (FUNC_ID_ZW_SEND_DATA-1)`).
    pub fn capability_bit(self) -> usize {
        self as u8 as usize - 1
    }
}

/// `SERIALAPI_SETUP` sub-commands (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum SerialApiSetupCommand {
    Supported = 0x01,
    MaxLrTxPwrSet = 0x03,
    TxPowerlevelSet = 0x04,
    MaxLrTxPwrGet = 0x05,
    TxPowerlevelGet = 0x08,
    RfRegionGet = 0x20,
    RfRegionSet = 0x40,
    NodeIdBasetypeSet = 0x80,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn send_data_capability_bit_matches_spec_scenario() {
        // FUNC_ID_ZW_SEND_DATA = 0x13 = 19, bit index 18
        assert_eq!(FunctionType::SendData.capability_bit(), 18);
    }
}
