/*!
    firmware upgrade messages

    upgrade messages use the [Verb::Upgrade] command with the sub-header `[request, kind, target]`: `kind` is the message type, `request` the message type it answers (itself in requests), `target` the board type. The body following the sub-header is one of the packed little endian structs of this module.

    | request | body | response body |
    |---------|------|---------------|
    | query   | -    | [ResponseBody] + running [Version] |
    | start   | [StartBody] | [ResponseBody] |
    | data    | [DataHeader] + frame bytes | [ResponseBody] |
    | stop    | [StopBody] | [ResponseBody] |
    | reset   | -    | [ResponseBody] |
*/

use thiserror::Error;
use zerocopy::{FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned};
use zerocopy::byteorder::little_endian::{U16, U32};

use crate::{
    wire_enum,
    frame::FrameError,
    command::{Envelope, Command, Direction, Verb, ModuleId, MessageType},
    version::Version,
    };


/// largest firmware frame
pub const MAX_FRAME_SIZE: usize = 128;
/// value of [StopBody::finish] closing a successful transfer
pub const FINISH: u16 = 0x1010;

wire_enum! {
    /// outcome of an upgrade request, as sent in responses
    pub enum ResponseStatus: u16 else Unknown {
        Success = 0x0101,
        StatusSequence = 0x0202,
        Version = 0x0203,
        FrameSizeCount = 0x0204,
        TotalSize = 0x0205,
        DataRequest = 0x0206,
        FinishChecksum = 0x0207,
        Storage = 0x0208,
        Timeout = 0x0209,
    }
}

wire_enum! {
    /// state of the receiving board, as sent in responses
    pub enum UpgradeStatus: u32 else Unknown {
        Reserved = 0x0800,
        /// no session
        Ready = 0x0801,
        /// session accepted, waiting for the first frame
        Start = 0x0802,
        /// frames being received
        Upgrade = 0x0803,
        /// final checksum being verified
        Verify = 0x0804,
    }
}

/// reason an upgrade request or session failed
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UpgradeFailure {
    #[error("request not allowed in current upgrade state")]
    StatusSequence,
    #[error("image version incompatible with running version")]
    Version,
    #[error("invalid frame size or count")]
    FrameSizeCount,
    #[error("invalid total size or missing frames")]
    TotalSize,
    #[error("unexpected or corrupted data frame")]
    DataRequest,
    #[error("image checksum mismatch")]
    FinishChecksum,
    #[error("image storage failed")]
    Storage,
    #[error("upgrade session timed out")]
    Timeout,
}
impl UpgradeFailure {
    pub fn status(self) -> ResponseStatus {
        match self {
            Self::StatusSequence => ResponseStatus::StatusSequence,
            Self::Version => ResponseStatus::Version,
            Self::FrameSizeCount => ResponseStatus::FrameSizeCount,
            Self::TotalSize => ResponseStatus::TotalSize,
            Self::DataRequest => ResponseStatus::DataRequest,
            Self::FinishChecksum => ResponseStatus::FinishChecksum,
            Self::Storage => ResponseStatus::Storage,
            Self::Timeout => ResponseStatus::Timeout,
        }
    }
    /// failure reported by a response status, `None` for success. Unknown codes are reported as a sequence error
    pub fn from_status(status: ResponseStatus) -> Option<Self> {
        Some(match status {
            ResponseStatus::Success => return None,
            ResponseStatus::StatusSequence => Self::StatusSequence,
            ResponseStatus::Version => Self::Version,
            ResponseStatus::FrameSizeCount => Self::FrameSizeCount,
            ResponseStatus::TotalSize => Self::TotalSize,
            ResponseStatus::DataRequest => Self::DataRequest,
            ResponseStatus::FinishChecksum => Self::FinishChecksum,
            ResponseStatus::Storage => Self::Storage,
            ResponseStatus::Timeout => Self::Timeout,
            ResponseStatus::Unknown(_) => Self::StatusSequence,
        })
    }
}


/// start request: declares the image about to be sent
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct StartBody {
    pub version: Version,
    pub total_size: U32,
    pub frame_size: U16,
    pub frame_count: U16,
}
/// data request header, followed by the frame bytes
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct DataHeader {
    pub index: U16,
    /// checksum of this frame's bytes
    pub crc: U16,
}
/// stop request: closes the transfer
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct StopBody {
    /// [FINISH] when the sender has sent all frames
    pub finish: U16,
    /// checksum of the whole image
    pub crc: U16,
}
/// body of every upgrade response
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct ResponseBody {
    /// [UpgradeStatus] after processing the request
    pub state: U32,
    /// [ResponseStatus] of the request
    pub status: U16,
    /// frames received so far, that is the index of the next frame expected
    pub frame_count: U16,
}
impl ResponseBody {
    pub fn new(state: UpgradeStatus, status: ResponseStatus, frame_count: u16) -> Self {
        Self {
            state: U32::new(state.into()),
            status: U16::new(status.into()),
            frame_count: U16::new(frame_count),
        }
    }
    pub fn state(&self) -> UpgradeStatus {self.state.get().into()}
    pub fn status(&self) -> ResponseStatus {self.status.get().into()}
    pub fn frame_count(&self) -> u16 {self.frame_count.get()}
}


/// upgrade request received by a board
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpgradeRequest<'d> {
    Query,
    Start(StartBody),
    Data {index: u16, crc: u16, bytes: &'d [u8]},
    Stop(StopBody),
    Reset,
}
impl<'d> UpgradeRequest<'d> {
    /// message type carried in the sub-header
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Query => MessageType::UpgradeQueryRequest,
            Self::Start(_) => MessageType::UpgradeStartRequest,
            Self::Data {..} => MessageType::UpgradeDataRequest,
            Self::Stop(_) => MessageType::UpgradeStopRequest,
            Self::Reset => MessageType::UpgradeResetRequest,
        }
    }
    /**
        decode a request body

        a malformed body fails with the status its request would have failed with
    */
    pub fn parse(kind: MessageType, body: &'d [u8]) -> Result<Self, UpgradeFailure> {
        match kind {
            MessageType::UpgradeQueryRequest => Ok(Self::Query),
            MessageType::UpgradeResetRequest => Ok(Self::Reset),
            MessageType::UpgradeStartRequest => StartBody::read_from_bytes(body)
                .map(Self::Start)
                .map_err(|_| UpgradeFailure::FrameSizeCount),
            MessageType::UpgradeDataRequest => {
                let (header, bytes) = DataHeader::ref_from_prefix(body)
                    .map_err(|_| UpgradeFailure::DataRequest)?;
                Ok(Self::Data {index: header.index.get(), crc: header.crc.get(), bytes})
            },
            MessageType::UpgradeStopRequest => StopBody::read_from_bytes(body)
                .map(Self::Stop)
                .map_err(|_| UpgradeFailure::FinishChecksum),
            _ => Err(UpgradeFailure::StatusSequence),
        }
    }
    /// envelope carrying this request to a board
    pub fn encode(&self, module: ModuleId, target: u8) -> Result<Envelope, FrameError> {
        let kind = u8::from(self.kind());
        let header = [kind, kind, target];
        let command = Command::request(Verb::Upgrade);
        match self {
            Self::Query | Self::Reset => Envelope::with_header(module, command, header, &[]),
            Self::Start(body) => Envelope::with_header(module, command, header, body.as_bytes()),
            Self::Stop(body) => Envelope::with_header(module, command, header, body.as_bytes()),
            Self::Data {index, crc, bytes} => {
                let mut body = heapless::Vec::<u8, {crate::frame::MAX_PAYLOAD}>::new();
                let data = DataHeader {index: U16::new(*index), crc: U16::new(*crc)};
                body.extend_from_slice(data.as_bytes()).map_err(|_| FrameError::OversizeFrame)?;
                body.extend_from_slice(bytes).map_err(|_| FrameError::OversizeFrame)?;
                Envelope::with_header(module, command, header, &body)
            },
        }
    }
}

/// message type answering a request
pub fn response_kind(request: MessageType) -> MessageType {
    match request {
        MessageType::UpgradeQueryRequest => MessageType::UpgradeQueryResponse,
        MessageType::UpgradeStartRequest => MessageType::UpgradeStartResponse,
        MessageType::UpgradeDataRequest => MessageType::UpgradeDataResponse,
        MessageType::UpgradeStopRequest => MessageType::UpgradeStopResponse,
        other => other,
    }
}

/// upgrade response received from a board
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UpgradeResponse {
    /// request answered
    pub request: MessageType,
    pub body: ResponseBody,
    /// running version, only in query responses
    pub version: Option<Version>,
}
impl UpgradeResponse {
    /// envelope answering `request` from a board
    pub fn encode(&self, module: ModuleId, target: u8) -> Result<Envelope, FrameError> {
        let header = [self.request.into(), response_kind(self.request).into(), target];
        let command = Command::new(Direction::Response, Verb::Upgrade);
        let mut body = heapless::Vec::<u8, {size_of::<ResponseBody>() + size_of::<Version>()}>::new();
        body.extend_from_slice(self.body.as_bytes()).map_err(|_| FrameError::OversizeFrame)?;
        if let Some(version) = &self.version {
            body.extend_from_slice(version).map_err(|_| FrameError::OversizeFrame)?;
        }
        Envelope::with_header(module, command, header, &body)
    }
    /// decode a response envelope, `None` if it is not a well formed upgrade response
    pub fn decode(envelope: &Envelope) -> Option<Self> {
        if envelope.command() != Command::new(Direction::Response, Verb::Upgrade)
            {return None}
        let [request, kind, _] = envelope.header()?;
        let request = MessageType::from(request);
        if MessageType::from(kind) != response_kind(request)
            {return None}
        let (body, rest) = ResponseBody::read_from_prefix(envelope.body()).ok()?;
        let version = match request {
            MessageType::UpgradeQueryRequest => Some(Version::read_from_bytes(rest).ok()?),
            _ => None,
        };
        Some(Self {request, body, version})
    }
}
