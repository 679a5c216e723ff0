use core::fmt;

use crate::{
    wire_enum,
    frame::{FrameError, MAX_PAYLOAD},
    };


wire_enum! {
    /// identifier of a board module on the bus
    pub enum ModuleId: u8 else Unknown {
        /// central controller
        Central = 0x10,
        /// motor controller
        Motor = 0x20,
        /// front board
        Front = 0x30,
        /// battery management
        Battery = 0x40,
        /// cellular telemetry module
        Cellular = 0x50,
        /// BLE peripheral
        Ble = 0x60,
        Alarm = 0x70,
        Voice = 0x80,
    }
}
impl ModuleId {
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

wire_enum! {
    /// direction of a command, the top two bits of the command byte
    pub enum Direction: u8 else Reserved {
        Request = 0x00,
        Response = 0x80,
        Exception = 0xc0,
    }
}

wire_enum! {
    /// memory access or protocol verb, the low bits of the command byte
    pub enum Verb: u8 else Unknown {
        Read = 0x01,
        MultiRead = 0x02,
        Write = 0x03,
        MultiWrite = 0x04,
        /// compare wire data with current register content
        Compare = 0x05,
        /// firmware upgrade sub-messages
        Upgrade = 0x06,
        /// module specific sub-messages (logging, factory test)
        Notify = 0x07,
    }
}
impl Verb {
    /// verb reading or writing registers
    pub fn is_register(self) -> bool {
        matches!(self, Self::Read | Self::MultiRead | Self::Write | Self::MultiWrite | Self::Compare)
    }
}

/// command byte of an envelope: direction and verb
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Command(u8);

impl Command {
    const DIRECTION: u8 = 0xc0;
    const VERB: u8 = 0x0f;

    pub fn new(direction: Direction, verb: Verb) -> Self {
        Self((u8::from(direction) & Self::DIRECTION) | (u8::from(verb) & Self::VERB))
    }
    pub const fn from_bits(bits: u8) -> Self {Self(bits)}
    pub const fn bits(self) -> u8 {self.0}

    pub fn direction(self) -> Direction {Direction::from(self.0 & Self::DIRECTION)}
    pub fn verb(self) -> Verb {Verb::from(self.0 & Self::VERB)}

    pub fn request(verb: Verb) -> Self {Self::new(Direction::Request, verb)}
    /// same verb, answered successfully
    pub fn response(self) -> Self {Self::new(Direction::Response, self.verb())}
    /// same verb, answered with an error
    pub fn exception(self) -> Self {Self::new(Direction::Exception, self.verb())}
}
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("direction", &self.direction())
            .field("verb", &self.verb())
            .finish()
    }
}

wire_enum! {
    /// message types of the modules using the sub-message convention
    pub enum MessageType: u8 else Unknown {
        UpgradeQueryRequest = 0x61,
        UpgradeQueryResponse = 0x62,
        UpgradeStartRequest = 0x63,
        UpgradeStartResponse = 0x64,
        UpgradeDataRequest = 0x65,
        UpgradeDataResponse = 0x66,
        UpgradeStopRequest = 0x67,
        UpgradeStopResponse = 0x68,
        UpgradeResetRequest = 0x69,

        LogSetDirectionRequest = 0x71,
        LogSetDirectionResponse = 0x72,
        LogQueryRequest = 0x73,
        LogQueryResponse = 0x74,
        LogResetRequest = 0x75,
        LogResetResponse = 0x76,
        LogDeviceReport = 0x77,
        LogMemoryRequest = 0x78,
        LogMemoryResponse = 0x79,
    }
}


/// size of the sub-header module payloads start with
pub const HEADER_SIZE: usize = 3;

/**
    decoded unit of one protocol exchange

    payload is opaque to the frame and may be empty. Module messages start it with a 3 bytes sub-header whose meaning depends on the verb:
    - register verbs: `[tag, start, count]`
    - sub-message verbs: `[request, kind, target]`
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    module: ModuleId,
    command: Command,
    payload: heapless::Vec<u8, MAX_PAYLOAD>,
}

impl Envelope {
    pub fn new(module: ModuleId, command: Command, payload: &[u8]) -> Result<Self, FrameError> {
        if !module.is_known()
            {return Err(FrameError::UnknownModule(module.into()))}
        let payload = heapless::Vec::from_slice(payload)
            .map_err(|_| FrameError::OversizeFrame)?;
        Ok(Self {module, command, payload})
    }
    /// build from a sub-header and the data following it
    pub fn with_header(module: ModuleId, command: Command, header: [u8; HEADER_SIZE], body: &[u8]) -> Result<Self, FrameError> {
        let mut payload = heapless::Vec::<u8, MAX_PAYLOAD>::new();
        payload.extend_from_slice(&header).map_err(|_| FrameError::OversizeFrame)?;
        payload.extend_from_slice(body).map_err(|_| FrameError::OversizeFrame)?;
        Self::new(module, command, &payload)
    }

    pub fn module(&self) -> ModuleId {self.module}
    pub fn command(&self) -> Command {self.command}
    pub fn payload(&self) -> &[u8] {&self.payload}

    /// first 3 bytes of the payload, `None` if the payload is shorter
    pub fn header(&self) -> Option<[u8; HEADER_SIZE]> {
        match self.payload.as_slice() {
            &[a, b, c, ..] => Some([a, b, c]),
            _ => None,
        }
    }
    /// payload following the sub-header, empty if there is no sub-header
    pub fn body(&self) -> &[u8] {
        self.payload.get(HEADER_SIZE ..).unwrap_or(&[])
    }
}
