use log::*;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    checksum::checksum,
    command::ModuleId,
    registers::{U16, U32},
    version::Version,
    upgrade::{
        UpgradeRequest, UpgradeResponse, UpgradeFailure, UpgradeStatus,
        StartBody, StopBody, MAX_FRAME_SIZE, FINISH,
        },
    };
use super::{Error, Link};


/// frames sent again in a row before giving up a transfer
const FRAME_RETRIES: u8 = 8;

/**
    firmware upgrade client for one board type, this is a lightweight reference to [Link]

    requests go through `module` and name the board type `target` in their sub-header
*/
pub struct Upgrader<'l, S> {
    link: &'l Link<S>,
    module: ModuleId,
    target: u8,
    frame_size: u16,
}
impl<'l, S: AsyncRead + AsyncWrite + Unpin + Send> Upgrader<'l, S> {
    pub fn new(link: &'l Link<S>, module: ModuleId, target: u8) -> Self {
        Self {link, module, target, frame_size: MAX_FRAME_SIZE as u16}
    }
    /// split images in frames of the given size, clamped to `1 ..= MAX_FRAME_SIZE`
    pub fn with_frame_size(self, frame_size: u16) -> Self {
        Self {frame_size: frame_size.clamp(1, MAX_FRAME_SIZE as u16), .. self}
    }
    pub fn frame_size(&self) -> u16 {self.frame_size}

    /// upgrade state and running firmware version of the board
    pub async fn query(&self) -> Result<(UpgradeStatus, Version), Error> {
        let response = self.exchange(&UpgradeRequest::Query).await?;
        let version = response.version
            .ok_or(Error::Unexpected("query response without version"))?;
        Ok((response.body.state(), version))
    }
    /// drop any session in progress on the board
    pub async fn reset(&self) -> Result<(), Error> {
        let response = self.exchange(&UpgradeRequest::Reset).await?;
        check(&response)
    }

    /**
        send a whole firmware image

        The board checks the image `version` against its running version before accepting the transfer. Frames it reports as missing or corrupted are sent again, the transfer fails when the board does not make progress.
    */
    pub async fn upgrade(&self, image: &[u8], version: Version) -> Result<(), Error> {
        let frame_size = usize::from(self.frame_size);
        let total_size = u32::try_from(image.len())
            .map_err(|_| UpgradeFailure::TotalSize)?;
        let frame_count = u16::try_from(image.len().div_ceil(frame_size))
            .map_err(|_| UpgradeFailure::FrameSizeCount)?;
        info!("upgrade {:?} target {}: {} bytes in {} frames", self.module, self.target, total_size, frame_count);

        let start = StartBody {
            version,
            total_size: U32::new(total_size),
            frame_size: U16::new(self.frame_size),
            frame_count: U16::new(frame_count),
        };
        check(&self.exchange(&UpgradeRequest::Start(start)).await?)?;

        let mut next = 0;
        let mut stalled = 0;
        while next < frame_count {
            let bytes = image.chunks(frame_size)
                .nth(usize::from(next))
                .ok_or(Error::Unexpected("frame index out of image"))?;
            let request = UpgradeRequest::Data {index: next, crc: checksum(bytes), bytes};
            let response = self.exchange(&request).await?;
            match UpgradeFailure::from_status(response.body.status()) {
                None | Some(UpgradeFailure::DataRequest) => {},
                Some(failure) => return Err(failure.into()),
            }
            let expected = response.body.frame_count();
            if expected > frame_count
                {return Err(Error::Unexpected("board expects a frame beyond the image"))}
            if expected > next {
                stalled = 0;
            }
            else {
                stalled += 1;
                debug!("board expects frame {} after sending {}", expected, next);
                if stalled > FRAME_RETRIES
                    {return Err(UpgradeFailure::DataRequest.into())}
            }
            next = expected;
        }

        let stop = StopBody {finish: U16::new(FINISH), crc: U16::new(checksum(image))};
        check(&self.exchange(&UpgradeRequest::Stop(stop)).await?)?;
        info!("upgrade {:?} target {} done", self.module, self.target);
        Ok(())
    }

    async fn exchange(&self, request: &UpgradeRequest<'_>) -> Result<UpgradeResponse, Error> {
        let envelope = request.encode(self.module, self.target)?;
        let response = UpgradeResponse::decode(&self.link.request(&envelope).await?)
            .ok_or(Error::Unexpected("malformed upgrade response"))?;
        if response.request != request.kind()
            {return Err(Error::Unexpected("upgrade response to an other request"))}
        Ok(response)
    }
}

fn check(response: &UpgradeResponse) -> Result<(), Error> {
    match UpgradeFailure::from_status(response.body.status()) {
        None => Ok(()),
        Some(failure) => Err(failure.into()),
    }
}
