/*!
    firmware upgrade session on the receiving board

    ```text
    Idle --start--> AwaitingStart --data--> Transferring --stop--> Verifying --> Idle(success)
      ^                   |                      |                     |
      +------ abort, timeout, storage failure, failed verification ----+
    ```

    frames must arrive in index order, each one is written to storage at `index * frame_size` and folded into a running checksum compared to the sender's at stop. The image is only committed once every frame is received and the whole image checksum matches.
*/

use core::time::Duration;
use log::*;

use crate::{
    checksum::{checksum, Running},
    command::MessageType,
    version::{Version, is_compatible},
    upgrade::*,
    };


/// persistent region receiving the image
pub trait ImageStorage {
    type Error: core::fmt::Debug;
    /// largest image the region can hold
    fn capacity(&self) -> usize;
    /// make the region ready to receive an image of the given size
    fn prepare(&mut self, size: usize) -> Result<(), Self::Error>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error>;
    /// flag the received image as valid, only called after verification
    fn commit(&mut self) -> Result<(), Self::Error>;
    /// give up the image being received
    fn abort(&mut self) {}
}

/// settings of the upgrade coordinator
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UpgradeConfig {
    /// session is aborted when no request comes for this long
    pub timeout: Duration,
    /// largest frame accepted, at most [MAX_FRAME_SIZE]
    pub max_frame_size: u16,
}
impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_frame_size: MAX_FRAME_SIZE as u16,
        }
    }
}

/// state of the coordinator
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// no session, with the outcome of the last one if any
    Idle(Option<Result<(), UpgradeFailure>>),
    AwaitingStart,
    Transferring,
    Verifying,
}
impl State {
    /// state reported on the wire
    pub fn status(self) -> UpgradeStatus {
        match self {
            Self::Idle(_) => UpgradeStatus::Ready,
            Self::AwaitingStart => UpgradeStatus::Start,
            Self::Transferring => UpgradeStatus::Upgrade,
            Self::Verifying => UpgradeStatus::Verify,
        }
    }
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle(_))
    }
}

#[derive(Debug)]
struct Session {
    version: Version,
    total_size: u32,
    frame_size: u16,
    frame_count: u16,
    /// frames received, also index of the next frame expected
    received: u16,
    crc: Running,
}
impl Session {
    /// bytes expected in the given frame
    fn frame_len(&self, index: u16) -> usize {
        if index + 1 == self.frame_count
            {self.total_size as usize - usize::from(index) * usize::from(self.frame_size)}
        else
            {usize::from(self.frame_size)}
    }
}

/**
    receiving side of the upgrade protocol

    owns the storage the image is written to. Time is given by the caller as a monotonic timestamp with every request and in [Self::poll].
*/
pub struct Coordinator<S> {
    storage: S,
    running: Version,
    config: UpgradeConfig,
    state: State,
    session: Option<Session>,
    activity: Duration,
}
impl<S: ImageStorage> Coordinator<S> {
    /// coordinator of a board running firmware version `running`
    pub fn new(storage: S, running: Version, config: UpgradeConfig) -> Self {
        Self {
            storage,
            running,
            config,
            state: State::Idle(None),
            session: None,
            activity: Duration::ZERO,
        }
    }
    pub fn state(&self) -> State {self.state}
    pub fn running(&self) -> &Version {&self.running}
    pub fn storage(&self) -> &S {&self.storage}
    pub fn storage_mut(&mut self) -> &mut S {&mut self.storage}
    /// frames accepted in the current session
    pub fn frames_received(&self) -> u16 {
        self.session.as_ref().map_or(0, |session| session.received)
    }
    /// version of the image being received
    pub fn incoming(&self) -> Option<&Version> {
        self.session.as_ref().map(|session| &session.version)
    }

    /// process a request and build the response
    pub fn handle(&mut self, now: Duration, request: &UpgradeRequest<'_>) -> UpgradeResponse {
        let result = match request {
            UpgradeRequest::Query => Ok(()),
            UpgradeRequest::Reset => {self.reset(); Ok(())},
            UpgradeRequest::Start(body) => self.start(now, body),
            UpgradeRequest::Data {index, crc, bytes} => self.data(now, *index, *crc, bytes),
            UpgradeRequest::Stop(body) => self.stop(now, body),
        };
        self.respond(request.kind(), result)
    }
    /// response to a request that produced the given result
    pub fn respond(&self, request: MessageType, result: Result<(), UpgradeFailure>) -> UpgradeResponse {
        let status = match result {
            Ok(()) => ResponseStatus::Success,
            Err(failure) => failure.status(),
        };
        UpgradeResponse {
            request,
            body: ResponseBody::new(self.state.status(), status, self.frames_received()),
            version: (request == MessageType::UpgradeQueryRequest).then_some(self.running),
        }
    }

    /// abort the session if it has been inactive for too long
    pub fn poll(&mut self, now: Duration) -> Option<UpgradeFailure> {
        if self.state.is_idle() || now.saturating_sub(self.activity) <= self.config.timeout
            {return None}
        warn!("upgrade session timed out after {} frames", self.frames_received());
        self.abort(UpgradeFailure::Timeout);
        Some(UpgradeFailure::Timeout)
    }

    /// drop any session, the image received so far is discarded
    pub fn reset(&mut self) {
        if !self.state.is_idle() {
            info!("upgrade session reset");
            self.storage.abort();
        }
        self.session = None;
        self.state = State::Idle(None);
    }

    fn abort(&mut self, failure: UpgradeFailure) -> UpgradeFailure {
        self.storage.abort();
        self.session = None;
        self.state = State::Idle(Some(Err(failure)));
        failure
    }

    /// negotiate a new session
    pub fn start(&mut self, now: Duration, body: &StartBody) -> Result<(), UpgradeFailure> {
        if !self.state.is_idle() {
            warn!("upgrade start refused, a session is active");
            return Err(UpgradeFailure::StatusSequence);
        }
        let total_size = body.total_size.get();
        let frame_size = body.frame_size.get();
        let frame_count = body.frame_count.get();
        debug!("upgrade start: {} bytes in {} frames of {}", total_size, frame_count, frame_size);

        let failure = if total_size == 0 || total_size as usize > self.storage.capacity() {
            Some(UpgradeFailure::TotalSize)
        }
        else if frame_size == 0
            || frame_size > self.config.max_frame_size.min(MAX_FRAME_SIZE as u16)
            || frame_count == 0
            || u32::from(frame_count - 1) * u32::from(frame_size) >= total_size
            || u32::from(frame_count) * u32::from(frame_size) < total_size {
            Some(UpgradeFailure::FrameSizeCount)
        }
        else if !is_compatible(&body.version, &self.running) {
            Some(UpgradeFailure::Version)
        }
        else {None};
        if let Some(failure) = failure {
            warn!("upgrade start refused: {}", failure);
            self.state = State::Idle(Some(Err(failure)));
            return Err(failure);
        }

        self.state = State::AwaitingStart;
        if let Err(error) = self.storage.prepare(total_size as usize) {
            warn!("image storage could not be prepared: {:?}", error);
            return Err(self.abort(UpgradeFailure::Storage));
        }
        self.session = Some(Session {
            version: body.version,
            total_size,
            frame_size,
            frame_count,
            received: 0,
            crc: Running::new(),
        });
        self.activity = now;
        info!("upgrade session started");
        Ok(())
    }

    /**
        receive one frame

        a duplicate of an accepted frame is ignored. A corrupted, misplaced or ill-sized frame is refused without affecting the session, the response then tells which frame is expected.
    */
    pub fn data(&mut self, now: Duration, index: u16, crc: u16, bytes: &[u8]) -> Result<(), UpgradeFailure> {
        let Some(session) = self.session.as_mut()
            else {return Err(UpgradeFailure::StatusSequence)};
        if !matches!(self.state, State::AwaitingStart | State::Transferring)
            {return Err(UpgradeFailure::StatusSequence)}
        self.activity = now;

        if index < session.received {
            debug!("upgrade frame {} received again", index);
            return Ok(());
        }
        if index > session.received || index >= session.frame_count {
            warn!("upgrade frame {} received while expecting {}", index, session.received);
            return Err(UpgradeFailure::DataRequest);
        }
        if bytes.len() != session.frame_len(index) {
            warn!("upgrade frame {} has {} bytes instead of {}", index, bytes.len(), session.frame_len(index));
            return Err(UpgradeFailure::DataRequest);
        }
        if checksum(bytes) != crc {
            warn!("upgrade frame {} corrupted", index);
            return Err(UpgradeFailure::DataRequest);
        }

        let offset = usize::from(index) * usize::from(session.frame_size);
        if let Err(error) = self.storage.write(offset, bytes) {
            warn!("image storage write failed: {:?}", error);
            return Err(self.abort(UpgradeFailure::Storage));
        }
        session.crc.update(bytes);
        session.received += 1;
        self.state = State::Transferring;
        Ok(())
    }

    /// close the transfer, verify and commit the image
    pub fn stop(&mut self, now: Duration, body: &StopBody) -> Result<(), UpgradeFailure> {
        let Some(session) = self.session.as_ref()
            else {return Err(UpgradeFailure::StatusSequence)};
        self.activity = now;
        self.state = State::Verifying;

        if body.finish.get() != FINISH || session.received != session.frame_count {
            warn!("upgrade stopped with {} of {} frames", session.received, session.frame_count);
            return Err(self.abort(UpgradeFailure::TotalSize));
        }
        if session.crc.value() != body.crc.get() {
            warn!("upgrade image checksum mismatch");
            return Err(self.abort(UpgradeFailure::FinishChecksum));
        }
        if let Err(error) = self.storage.commit() {
            warn!("image storage commit failed: {:?}", error);
            return Err(self.abort(UpgradeFailure::Storage));
        }
        info!("upgrade image of {} bytes committed", session.total_size);
        self.session = None;
        self.state = State::Idle(Some(Ok(())));
        Ok(())
    }
}
