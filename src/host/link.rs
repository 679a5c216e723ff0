use std::{
    collections::VecDeque,
    path::Path,
    };
use std::sync::atomic::{AtomicU8, Ordering::Relaxed};
use log::*;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt},
    time::Instant,
    };
use serial2_tokio::{SerialPort, CharSize, StopBits, Parity};

use crate::{
    mutex::BusyMutex,
    frame::{self, FrameReader, MAX_ENCODED},
    command::{Envelope, Direction, ModuleId},
    registers::Schema,
    };
use super::{Error, LinkConfig, Device, Upgrader};


/**
    request/response exchanges with the devices on a byte stream

    Only one exchange is in flight at a time, concurrent requests from several tasks wait for each other.
*/
pub struct Link<S> {
    transport: BusyMutex<Transport<S>>,
    config: LinkConfig,
    tag: AtomicU8,
}
struct Transport<S> {
    stream: S,
    reader: FrameReader,
    /// frames decoded but not yet consumed
    received: VecDeque<Envelope>,
}

impl Link<SerialPort> {
    /// open a serial port file with the given settings, in 8 bits without parity
    pub fn open(path: impl AsRef<Path>, config: LinkConfig) -> Result<Self, Error> {
        let port = SerialPort::open(path, |mut settings: serial2_tokio::Settings| {
                settings.set_raw();
                settings.set_baud_rate(config.baud)?;
                settings.set_char_size(CharSize::Bits8);
                settings.set_stop_bits(StopBits::One);
                settings.set_parity(Parity::None);
                Ok(settings)
                })?;
        Ok(Self::new(port, config))
    }
}
impl<S: AsyncRead + AsyncWrite + Unpin + Send> Link<S> {
    pub fn new(stream: S, config: LinkConfig) -> Self {
        Self {
            transport: BusyMutex::new(Transport {
                stream,
                reader: FrameReader::new(),
                received: VecDeque::new(),
                }),
            config,
            tag: AtomicU8::new(0),
        }
    }
    pub fn config(&self) -> &LinkConfig {&self.config}
    /// fresh tag to identify a register request's response
    pub fn tag(&self) -> u8 {
        self.tag.fetch_add(1, Relaxed)
    }
    /// access the registers of a module
    pub fn device(&self, module: ModuleId, schema: &'static Schema) -> Device<'_, S> {
        Device::new(self, module, schema)
    }
    /// upgrade the firmware of a board type through a module
    pub fn upgrader(&self, module: ModuleId, target: u8) -> Upgrader<'_, S> {
        Upgrader::new(self, module, target)
    }

    /// send an envelope without waiting for any response
    pub async fn send(&self, envelope: &Envelope) -> Result<(), Error> {
        self.transport.lock().await.send(envelope).await
    }
    /// wait for the next envelope received
    pub async fn receive(&self) -> Result<Envelope, Error> {
        let mut transport = self.transport.lock().await;
        tokio::time::timeout(self.config.timeout, transport.receive()).await
            .map_err(|_| Error::Timeout)?
    }
    /**
        send a request and wait for its response

        the response is recognized by its module, verb and first sub-header byte. Other frames received meanwhile are dropped. The request is sent again when no response arrives in time, up to the configured number of retries.

        An exception response is reported as [Error::Exception]
    */
    pub async fn request(&self, request: &Envelope) -> Result<Envelope, Error> {
        let mut transport = self.transport.lock().await;
        transport.received.clear();
        for attempt in 0 ..= self.config.retries {
            if attempt != 0
                {debug!("no response to {:?}, retry {}", request.command(), attempt)}
            transport.send(request).await?;
            let deadline = Instant::now() + self.config.timeout;
            while let Ok(received) = tokio::time::timeout_at(deadline, transport.receive()).await {
                let response = received?;
                if !answers(request, &response) {
                    debug!("drop unrelated {:?} from {:?}", response.command(), response.module());
                    continue
                }
                if response.command().direction() == Direction::Exception {
                    let status = <[u8; 3]>::try_from(response.body())
                        .map_err(|_| Error::Unexpected("malformed exception status"))?;
                    return Err(Error::Exception(status));
                }
                return Ok(response);
            }
        }
        Err(Error::Timeout)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), Error> {
        self.stream.write_all(&frame::encode(envelope)).await?;
        self.stream.flush().await?;
        Ok(())
    }
    async fn receive(&mut self) -> Result<Envelope, Error> {
        let mut buffer = [0u8; MAX_ENCODED];
        loop {
            if let Some(envelope) = self.received.pop_front()
                {return Ok(envelope)}
            let size = self.stream.read(&mut buffer).await?;
            if size == 0
                {return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())}
            for decoded in self.reader.feed(&buffer[.. size]) {
                match decoded {
                    Ok(envelope) => self.received.push_back(envelope),
                    Err(error) => debug!("drop frame: {}", error),
                }
            }
        }
    }
}

/// true if `response` is the answer to `request`
fn answers(request: &Envelope, response: &Envelope) -> bool {
    response.module() == request.module()
    && response.command().verb() == request.command().verb()
    && response.command().direction() != Direction::Request
    && response.header().map(|header| header[0]) == request.header().map(|header| header[0])
}
