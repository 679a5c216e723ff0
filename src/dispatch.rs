/*!
    route decoded envelopes to the module handlers of a board

    a board serves one or more modules, each by a [Handler]. The [Dispatcher] picks the handler by module id and verb, and returns the envelope to send back if any.
*/

use core::time::Duration;
use log::*;

use crate::{
    mutex::BusyMutex,
    frame::MAX_PAYLOAD,
    command::{Envelope, Command, Direction, Verb, ModuleId, MessageType, HEADER_SIZE},
    registers::{Bank, Schema},
    marshal::{self, RegisterError},
    coordinator::{Coordinator, ImageStorage},
    upgrade::{UpgradeRequest, UpgradeResponse},
    };


/// server of one module
pub trait Handler {
    fn module(&self) -> ModuleId;
    /// true if this handler processes the given verb
    fn accepts(&self, verb: Verb) -> bool;
    /// process a request addressed to this module, returning the reply if any
    fn handle(&mut self, now: Duration, request: &Envelope) -> Option<Envelope>;
    /// time based housekeeping
    fn poll(&mut self, _now: Duration) {}
}

/// set of handlers of a board
pub struct Dispatcher<'h, const N: usize> {
    handlers: heapless::Vec<&'h mut dyn Handler, N>,
}
impl<'h, const N: usize> Dispatcher<'h, N> {
    pub fn new() -> Self {
        Self {handlers: heapless::Vec::new()}
    }
    /// add a handler, giving it back if the dispatcher is full
    pub fn add(&mut self, handler: &'h mut dyn Handler) -> Result<(), &'h mut dyn Handler> {
        self.handlers.push(handler)
    }
    /**
        process a received envelope

        requests for modules not served here are ignored, as they belong to other boards on the bus. Responses and exceptions are ignored too. A served module receiving a verb it does not handle answers with an exception.
    */
    pub fn dispatch(&mut self, now: Duration, envelope: &Envelope) -> Option<Envelope> {
        let command = envelope.command();
        if command.direction() != Direction::Request {
            debug!("ignore {:?} from {:?}", command, envelope.module());
            return None;
        }
        let mut served = false;
        for handler in self.handlers.iter_mut() {
            if handler.module() != envelope.module()
                {continue}
            served = true;
            if handler.accepts(command.verb()) {
                debug!("dispatch {:?} to {:?}", command.verb(), envelope.module());
                return handler.handle(now, envelope);
            }
        }
        if served {
            warn!("{:?} does not handle {:?}", envelope.module(), command.verb());
            return exception(envelope, RegisterError::InvalidCommand);
        }
        None
    }
    pub fn poll(&mut self, now: Duration) {
        for handler in self.handlers.iter_mut() {
            handler.poll(now);
        }
    }
}
impl<const N: usize> Default for Dispatcher<'_, N> {
    fn default() -> Self {Self::new()}
}

/**
    exception reply to a request

    the request's sub-header is echoed, zero padded if the request is too short to have one, followed by the `[parse, command, data]` status bytes
*/
pub fn exception(request: &Envelope, error: RegisterError) -> Option<Envelope> {
    let code = error.code();
    let status = match error {
        RegisterError::InvalidCommand | RegisterError::Busy => [0, code, 0],
        _ => [0, 0, code],
    };
    reply(request, request.command().exception(), &status)
}

fn reply(request: &Envelope, command: Command, body: &[u8]) -> Option<Envelope> {
    Envelope::with_header(request.module(), command, echo(request), body)
        .inspect_err(|error| warn!("cannot build reply: {}", error))
        .ok()
}

fn echo(request: &Envelope) -> [u8; HEADER_SIZE] {
    let payload = request.payload();
    let size = payload.len().min(HEADER_SIZE);
    let mut header = [0; HEADER_SIZE];
    header[.. size].copy_from_slice(&payload[.. size]);
    header
}

/// error of a request too short to carry a sub-header
fn missing_header(request: &Envelope) -> RegisterError {
    RegisterError::SizeMismatch {expected: HEADER_SIZE, found: request.payload().len()}
}

/// register data a reply can carry after its sub-header
const REPLY_DATA: usize = MAX_PAYLOAD - HEADER_SIZE;


/**
    serve the registers of a module from its bank

    the request sub-header is `[tag, start, count]`, echoed in the response. The bank is only ever try-locked: a request finding it locked by the application is answered with a busy exception. A read whose data would not fit in the reply is answered with a payload overflow exception.
*/
pub struct RegisterHandler<'b, const N: usize> {
    module: ModuleId,
    schema: &'static Schema,
    bank: &'b BusyMutex<Bank<N>>,
}
impl<'b, const N: usize> RegisterHandler<'b, N> {
    pub fn new(module: ModuleId, schema: &'static Schema, bank: &'b BusyMutex<Bank<N>>) -> Self {
        Self {module, schema, bank}
    }
    fn process(&mut self, request: &Envelope) -> Result<Option<Envelope>, RegisterError> {
        let [_, start, count] = request.header().ok_or_else(|| missing_header(request))?;
        let (start, count) = (usize::from(start), usize::from(count));
        let mut bank = self.bank.try_lock().ok_or(RegisterError::Busy)?;
        let response = request.command().response();
        match request.command().verb() {
            Verb::Read | Verb::MultiRead => {
                let data = marshal::read_range(self.schema, &bank[..], start, count)?;
                if data.len() > REPLY_DATA
                    {return Err(RegisterError::PayloadOverflow)}
                Ok(reply(request, response, &data))
            },
            Verb::Write | Verb::MultiWrite => {
                marshal::write_range(self.schema, &mut bank[..], start, count, request.body())?;
                Ok(reply(request, response, &[]))
            },
            Verb::Compare => {
                let equal = marshal::compare_range(self.schema, &bank[..], start, count, request.body())?;
                Ok(reply(request, response, &[u8::from(equal)]))
            },
            _ => Err(RegisterError::InvalidCommand),
        }
    }
}
impl<const N: usize> Handler for RegisterHandler<'_, N> {
    fn module(&self) -> ModuleId {self.module}
    fn accepts(&self, verb: Verb) -> bool {verb.is_register()}
    fn handle(&mut self, _now: Duration, request: &Envelope) -> Option<Envelope> {
        match self.process(request) {
            Ok(reply) => reply,
            Err(error) => {
                debug!("register request refused: {}", error);
                exception(request, error)
            },
        }
    }
}


/**
    serve firmware upgrade requests for a module

    requests are `[request, kind, target]` sub-messages, those for an other board type are ignored
*/
pub struct UpgradeHandler<S> {
    module: ModuleId,
    target: u8,
    coordinator: Coordinator<S>,
}
impl<S: ImageStorage> UpgradeHandler<S> {
    pub fn new(module: ModuleId, target: u8, coordinator: Coordinator<S>) -> Self {
        Self {module, target, coordinator}
    }
    pub fn coordinator(&self) -> &Coordinator<S> {&self.coordinator}
    pub fn coordinator_mut(&mut self) -> &mut Coordinator<S> {&mut self.coordinator}
}
impl<S: ImageStorage> Handler for UpgradeHandler<S> {
    fn module(&self) -> ModuleId {self.module}
    fn accepts(&self, verb: Verb) -> bool {verb == Verb::Upgrade}
    fn handle(&mut self, now: Duration, request: &Envelope) -> Option<Envelope> {
        let Some([_, kind, target]) = request.header() else {
            debug!("upgrade request without sub-header");
            return exception(request, missing_header(request));
        };
        if target != self.target {
            debug!("ignore upgrade for board type {}", target);
            return None;
        }
        let kind = MessageType::from(kind);
        let response: UpgradeResponse = match UpgradeRequest::parse(kind, request.body()) {
            Ok(message) => self.coordinator.handle(now, &message),
            Err(failure) => {
                warn!("malformed upgrade request {:?}", kind);
                self.coordinator.respond(kind, Err(failure))
            },
        };
        response.encode(self.module, self.target)
            .inspect_err(|error| warn!("cannot build upgrade response: {}", error))
            .ok()
    }
    fn poll(&mut self, now: Duration) {
        self.coordinator.poll(now);
    }
}
