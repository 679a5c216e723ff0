/*!
    device side serving loop

    reads the bus, reassembles frames, dispatches them to the board's handlers and writes replies back. Works over any [embedded_io_async] stream, like an async UART.
*/

use core::time::Duration;
use embedded_io_async::{Read, Write};
use log::*;

use crate::{
    frame::{self, FrameReader},
    dispatch::Dispatcher,
    };


/// monotonic time source of the board
pub trait Clock {
    /// time elapsed since an arbitrary fixed origin
    fn now(&self) -> Duration;
}
impl<F: Fn() -> Duration> Clock for F {
    fn now(&self) -> Duration {self()}
}

/// bytes read from the bus at once
const CHUNK: usize = 64;

/**
    serve requests until the bus reaches its end

    handlers timeouts are polled each time bytes arrive. Corrupted frames are dropped silently, the reader resynchronizes on the next start marker.
*/
pub async fn serve<B, C, const N: usize>(bus: &mut B, dispatcher: &mut Dispatcher<'_, N>, clock: &C) -> Result<(), B::Error>
where
    B: Read + Write,
    C: Clock,
{
    let mut reader = FrameReader::new();
    let mut receive = [0u8; CHUNK];
    loop {
        let size = bus.read(&mut receive).await?;
        if size == 0 {
            debug!("bus closed");
            return Ok(());
        }
        let now = clock.now();
        dispatcher.poll(now);
        for received in reader.feed(&receive[.. size]) {
            let envelope = match received {
                Ok(envelope) => envelope,
                Err(error) => {
                    debug!("drop frame: {}", error);
                    continue
                },
            };
            if let Some(reply) = dispatcher.dispatch(now, &envelope) {
                bus.write_all(&frame::encode(&reply)).await?;
                bus.flush().await?;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_io_async::ErrorType;
    use crate::{
        BusyMutex,
        command::{Envelope, Command, Verb, ModuleId},
        dispatch::RegisterHandler,
        ble,
        };

    /// bus replaying recorded bytes and recording replies
    struct Replay<'d> {
        input: &'d [u8],
        output: heapless::Vec<u8, 1024>,
    }
    impl ErrorType for Replay<'_> {
        type Error = Infallible;
    }
    impl Read for Replay<'_> {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            // deliver a few bytes at a time to exercise reassembly
            let size = buf.len().min(self.input.len()).min(5);
            buf[.. size].copy_from_slice(&self.input[.. size]);
            self.input = &self.input[size ..];
            Ok(size)
        }
    }
    impl Write for Replay<'_> {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            let size = buf.len().min(self.output.capacity() - self.output.len());
            let _ = self.output.extend_from_slice(&buf[.. size]);
            Ok(size)
        }
        async fn flush(&mut self) -> Result<(), Infallible> {Ok(())}
    }

    #[tokio::test]
    async fn serve_until_closed() {
        let bank = BusyMutex::new(ble::BleBank::new());
        bank.try_lock().unwrap().set(ble::ID_NUM, 0x42);
        let mut handler = RegisterHandler::new(ModuleId::Ble, &ble::SCHEMA, &bank);
        let mut dispatcher = Dispatcher::<1>::new();
        assert!(dispatcher.add(&mut handler).is_ok());

        let request = Envelope::with_header(ModuleId::Ble, Command::request(Verb::Read), [5, 0, 1], &[]).unwrap();
        let mut input = heapless::Vec::<u8, 256>::new();
        // garbage, a corrupted frame, then a valid one
        input.extend_from_slice(&[0x00, 0x12, frame::START, 0x60, 0x01]).unwrap();
        input.extend_from_slice(&frame::encode(&request)).unwrap();

        let mut bus = Replay {input: &input, output: heapless::Vec::new()};
        serve(&mut bus, &mut dispatcher, &|| Duration::ZERO).await.unwrap();

        let mut reader = FrameReader::new();
        let mut replies = reader.feed(&bus.output);
        let reply = replies.next().unwrap().unwrap();
        assert_eq!(reply.payload(), &[5, 0, 1, 0x42]);
        assert!(replies.next().is_none());
    }
}
