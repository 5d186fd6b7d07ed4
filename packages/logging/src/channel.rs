/// Which subsystem a log line came from, used to pick a tag and color the
/// way the teacher distinguishes `SerialLogger`/`DriverLogger`/`ControllerLogger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Serial,
    Security,
    ResourceDirectory,
    Netif,
    Router,
}

impl Channel {
    pub fn tag(self) -> &'static str {
        match self {
            Channel::Serial => "SERIAL",
            Channel::Security => "S0",
            Channel::ResourceDirectory => "RD",
            Channel::Netif => "NETIF",
            Channel::Router => "ROUTER",
        }
    }
}
