/*!
    board log messages

    log messages use the [Verb::Notify] command with the sub-header `[request, kind, direction]`: `kind` is the message type, `request` the message type it answers (itself in requests and reports), `direction` the [LogDirection] of the board's log output.

    requests carry no body. Responses and device reports carry a [LogHeader] followed by at most [MAX_LOG_DATA] log bytes.
*/

use zerocopy::{FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned};
use zerocopy::byteorder::little_endian::U16;

use crate::{
    wire_enum,
    frame::FrameError,
    command::{Envelope, Command, Direction, Verb, ModuleId, MessageType},
    };


/// largest log chunk in one message
pub const MAX_LOG_DATA: usize = 125;

wire_enum! {
    /// where a board writes its log
    pub enum LogDirection: u8 else Unknown {
        Flash = 0,
        Console = 1,
    }
}

wire_enum! {
    /// outcome of a log request
    pub enum LogStatus: u8 else Unknown {
        Failed = 0,
        Success = 1,
        /// last chunk of the log memory was sent
        Finished = 2,
    }
}

/// header of log responses and reports, followed by `length` log bytes
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct LogHeader {
    /// [LogStatus] of the request
    pub status: u8,
    pub log_type: u8,
    /// position of the chunk in the log memory
    pub offset: U16,
    pub length: u8,
}


/// log request received by a board
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LogRequest {
    SetDirection(LogDirection),
    Query,
    Reset,
    /// next chunk of the log memory
    Memory,
}
impl LogRequest {
    /// message type carried in the sub-header
    pub fn kind(&self) -> MessageType {
        match self {
            Self::SetDirection(_) => MessageType::LogSetDirectionRequest,
            Self::Query => MessageType::LogQueryRequest,
            Self::Reset => MessageType::LogResetRequest,
            Self::Memory => MessageType::LogMemoryRequest,
        }
    }
    /// decode a request envelope, `None` if it is not a log request
    pub fn decode(envelope: &Envelope) -> Option<Self> {
        if envelope.command() != Command::request(Verb::Notify)
            {return None}
        let [request, kind, direction] = envelope.header()?;
        if request != kind
            {return None}
        match MessageType::from(kind) {
            MessageType::LogSetDirectionRequest => match LogDirection::from(direction) {
                LogDirection::Unknown(_) => None,
                direction => Some(Self::SetDirection(direction)),
            },
            MessageType::LogQueryRequest => Some(Self::Query),
            MessageType::LogResetRequest => Some(Self::Reset),
            MessageType::LogMemoryRequest => Some(Self::Memory),
            _ => None,
        }
    }
    /// envelope carrying this request to a board
    pub fn encode(&self, module: ModuleId) -> Result<Envelope, FrameError> {
        let kind = u8::from(self.kind());
        let direction = match self {
            Self::SetDirection(direction) => u8::from(*direction),
            _ => 0,
        };
        Envelope::with_header(module, Command::request(Verb::Notify), [kind, kind, direction], &[])
    }
}

/// message type answering a log request
pub fn response_kind(request: MessageType) -> MessageType {
    match request {
        MessageType::LogSetDirectionRequest => MessageType::LogSetDirectionResponse,
        MessageType::LogQueryRequest => MessageType::LogQueryResponse,
        MessageType::LogResetRequest => MessageType::LogResetResponse,
        MessageType::LogMemoryRequest => MessageType::LogMemoryResponse,
        other => other,
    }
}

/// log response or spontaneous device report sent by a board
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogResponse {
    /// request answered, [MessageType::LogDeviceReport] for reports
    pub request: MessageType,
    pub direction: LogDirection,
    pub status: LogStatus,
    pub log_type: u8,
    pub offset: u16,
    pub data: heapless::Vec<u8, MAX_LOG_DATA>,
}
impl LogResponse {
    pub fn encode(&self, module: ModuleId) -> Result<Envelope, FrameError> {
        let header = [self.request.into(), response_kind(self.request).into(), self.direction.into()];
        let command = Command::new(Direction::Response, Verb::Notify);
        let chunk = LogHeader {
            status: self.status.into(),
            log_type: self.log_type,
            offset: U16::new(self.offset),
            length: self.data.len() as u8,
        };
        let mut body = heapless::Vec::<u8, {size_of::<LogHeader>() + MAX_LOG_DATA}>::new();
        body.extend_from_slice(chunk.as_bytes()).map_err(|_| FrameError::OversizeFrame)?;
        body.extend_from_slice(&self.data).map_err(|_| FrameError::OversizeFrame)?;
        Envelope::with_header(module, command, header, &body)
    }
    /// decode a response envelope, `None` if it is not a well formed log response
    pub fn decode(envelope: &Envelope) -> Option<Self> {
        if envelope.command() != Command::new(Direction::Response, Verb::Notify)
            {return None}
        let [request, kind, direction] = envelope.header()?;
        let request = MessageType::from(request);
        let is_log = matches!(request,
            MessageType::LogSetDirectionRequest
            | MessageType::LogQueryRequest
            | MessageType::LogResetRequest
            | MessageType::LogMemoryRequest
            | MessageType::LogDeviceReport);
        if !is_log || MessageType::from(kind) != response_kind(request)
            {return None}
        let (chunk, rest) = LogHeader::read_from_prefix(envelope.body()).ok()?;
        let data = rest.get(.. usize::from(chunk.length))?;
        Some(Self {
            request,
            direction: direction.into(),
            status: chunk.status.into(),
            log_type: chunk.log_type,
            offset: chunk.offset.get(),
            data: heapless::Vec::from_slice(data).ok()?,
        })
    }
}
