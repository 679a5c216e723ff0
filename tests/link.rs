use std::{
    sync::{Arc, Mutex},
    time::Duration,
    };
use futures_concurrency::future::Race;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    time::Instant,
    };

use ppxbus::{
    BusyMutex, Envelope, Command, Verb, ModuleId,
    frame::{self, FrameReader},
    registers::{U16, I16},
    region::{self, RegionBank, RunMode},
    ble::{self, BleBank, LedMessage},
    version::version,
    upgrade::{UpgradeFailure, UpgradeStatus},
    coordinator::{Coordinator, ImageStorage, UpgradeConfig},
    dispatch::{Dispatcher, RegisterHandler, UpgradeHandler},
    marshal::RegisterError,
    host::*,
    };


/// board type answering upgrades
const TARGET: u8 = 2;
const RUNNING: &str = "PPX_MCB_V1.0.3";

/// image storage shared with the test
#[derive(Clone, Default)]
struct Flash(Arc<Mutex<Vec<u8>>>);
impl ImageStorage for Flash {
    type Error = ();
    fn capacity(&self) -> usize {4096}
    fn prepare(&mut self, size: usize) -> Result<(), ()> {
        let mut image = self.0.lock().map_err(|_| ())?;
        image.clear();
        image.resize(size, 0xff);
        Ok(())
    }
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), ()> {
        let mut image = self.0.lock().map_err(|_| ())?;
        image.get_mut(offset .. offset + data.len()).ok_or(())?.copy_from_slice(data);
        Ok(())
    }
    fn commit(&mut self) -> Result<(), ()> {Ok(())}
}

/// state of the simulated board
#[derive(Default)]
struct Board {
    region: BusyMutex<RegionBank>,
    ble: BusyMutex<BleBank>,
    flash: Flash,
}

/// serve the board on its end of the stream, the way a device firmware does
async fn serve(mut stream: DuplexStream, dispatcher: &mut Dispatcher<'_, 3>) {
    let origin = Instant::now();
    let mut reader = FrameReader::new();
    let mut buffer = [0; 64];
    loop {
        let size = stream.read(&mut buffer).await.expect("board stream failed");
        if size == 0
            {break}
        let now = origin.elapsed();
        dispatcher.poll(now);
        for received in reader.feed(&buffer[.. size]) {
            let Ok(envelope) = received
                else {continue};
            if let Some(reply) = dispatcher.dispatch(now, &envelope) {
                stream.write_all(&frame::encode(&reply)).await.expect("board stream failed");
            }
        }
    }
}

fn test<T, F>(board: &Board, test: T)
where
    T: FnOnce(Arc<Link<DuplexStream>>) -> F,
    F: Future,
{
    let _ = env_logger::builder().is_test(true).try_init();
    tokio::runtime::Runtime::new()
    .expect("failed to create runtime")
    .block_on(async move {
        let (host, device) = tokio::io::duplex(1024);
        let config = LinkConfig {timeout: Duration::from_millis(100), .. Default::default()};
        let link = Arc::new(Link::new(host, config));

        let mut motor = RegisterHandler::new(ModuleId::Motor, &region::SCHEMA, &board.region);
        let mut light = RegisterHandler::new(ModuleId::Ble, &ble::SCHEMA, &board.ble);
        let mut upgrade = UpgradeHandler::new(ModuleId::Motor, TARGET, Coordinator::new(
            board.flash.clone(),
            version(RUNNING).unwrap(),
            UpgradeConfig::default(),
            ));
        let mut dispatcher = Dispatcher::new();
        assert!(dispatcher.add(&mut motor).is_ok());
        assert!(dispatcher.add(&mut light).is_ok());
        assert!(dispatcher.add(&mut upgrade).is_ok());
        (
            async {
                tokio::time::timeout(Duration::from_secs(10), test(link.clone()))
                .await.expect("aborted test because took too long");
            },
            serve(device, &mut dispatcher),
        ).race().await;
    });
}


#[test]
fn registers() {
    let board = Board::default();
    board.region.try_lock().unwrap().set(region::BUS_VOLTAGE, U16::new(48_000));
    test(&board, |link| async move {
        let motor = link.device(ModuleId::Motor, &region::SCHEMA);

        assert_eq!(motor.read(region::index::BUS_VOLTAGE, 1).await.unwrap().as_slice(), &48_000u16.to_le_bytes());
        motor.write(region::index::GEAR, 2, &[3, 0x10, 0]).await.unwrap();
        assert!(motor.compare(region::index::GEAR, 2, &[3, 0x10, 0]).await.unwrap());
        assert!(! motor.compare(region::index::GEAR, 2, &[4, 0x10, 0]).await.unwrap());

        // whole runs through local banks
        let mut local = RegionBank::new();
        local.set(region::TARGET_SPEED, I16::new(-250));
        local.set_run_mode(RunMode::Run);
        motor.store(&local, region::index::RUN_MODE, 3).await.unwrap();
        let mut copy = RegionBank::new();
        motor.fetch(&mut copy, region::index::ID_NUM, 36).await.unwrap();
        assert_eq!(copy.get(region::TARGET_SPEED).get(), -250);
        assert_eq!(copy.run_mode(), RunMode::Run);
        assert_eq!(copy.get(region::BUS_VOLTAGE).get(), 48_000);
    });
    let bank = board.region.try_lock().unwrap();
    assert_eq!(bank.get(region::GEAR), 0);
    assert_eq!(bank.get(region::TARGET_SPEED).get(), -250);
}

#[test]
fn bit_packed_register() {
    let board = Board::default();
    test(&board, |link| async move {
        let light = link.device(ModuleId::Ble, &ble::SCHEMA);
        let message = LedMessage::default()
            .with(ble::led::BRIGHTNESS, 5).unwrap()
            .with(ble::led::DIGITAL, 0x42).unwrap();
        let mut local = BleBank::new();
        local.set_led(message);
        light.store(&local, ble::index::LED_MSG, 1).await.unwrap();

        let data = light.read(ble::index::LED_MSG, 1).await.unwrap();
        assert_eq!(data.len(), 17);
        assert_eq!(data[1], 5);
        assert_eq!(data[7], 0x42);

        // a sub-field value too large for its bits is refused by the board
        let mut data = data;
        data[1] = 8;
        assert!(matches!(
            light.write(ble::index::LED_MSG, 1, &data).await,
            Err(Error::Exception([0, 0, code])) if code == RegisterError::BitOverflow.code(),
            ));
    });
    assert_eq!(board.ble.try_lock().unwrap().led().get(ble::led::DIGITAL), 0x42);
}

#[test]
fn refusals() {
    let board = Board::default();
    test(&board, |link| async move {
        let motor = link.device(ModuleId::Motor, &region::SCHEMA);
        // checked before sending
        assert!(matches!(
            motor.read(region::index::RSVD_DATA, 2).await,
            Err(Error::Register(RegisterError::OutOfRange {..})),
            ));
        assert!(matches!(
            motor.write(region::index::GEAR, 1, &[1, 2]).await,
            Err(Error::Register(RegisterError::SizeMismatch {expected: 1, found: 2})),
            ));
        // checked by the board
        let request = Envelope::with_header(ModuleId::Motor, Command::request(Verb::MultiRead), [7, 36, 2], &[]).unwrap();
        assert!(matches!(
            link.request(&request).await,
            Err(Error::Exception([0, 0, code])) if code == RegisterError::OutOfRange {start: 36, count: 2}.code(),
            ));
        // no board serves this module
        let absent = link.device(ModuleId::Battery, &region::SCHEMA);
        assert!(matches!(absent.read(region::index::ID_NUM, 1).await, Err(Error::Timeout)));
    });
}

#[test]
fn busy_bank() {
    let board = Board::default();
    let bank = &board.region;
    test(&board, |link| async move {
        let motor = link.device(ModuleId::Motor, &region::SCHEMA);
        let guard = bank.try_lock().unwrap();
        assert!(matches!(
            motor.read(region::index::GEAR, 1).await,
            Err(Error::Exception([0, code, 0])) if code == RegisterError::Busy.code(),
            ));
        drop(guard);
        motor.read(region::index::GEAR, 1).await.unwrap();
    });
}

#[test]
fn upgrade() {
    let board = Board::default();
    let image = (0 .. 300u32).map(|i| (i * 7) as u8).collect::<Vec<u8>>();
    test(&board, |link| {
        let image = image.clone();
        async move {
            let upgrader = link.upgrader(ModuleId::Motor, TARGET);
            let (state, running) = upgrader.query().await.unwrap();
            assert_eq!(state, UpgradeStatus::Ready);
            assert_eq!(running, version(RUNNING).unwrap());

            upgrader.upgrade(&image, version("PPX_MCB_V1.1.0").unwrap()).await.unwrap();
            assert_eq!(upgrader.query().await.unwrap().0, UpgradeStatus::Ready);

            // images older than the running firmware are refused
            assert!(matches!(
                upgrader.upgrade(&image, version("PPX_MCB_V1.0.2").unwrap()).await,
                Err(Error::Upgrade(UpgradeFailure::Version)),
                ));
            upgrader.reset().await.unwrap();
        }
    });
    assert_eq!(*board.flash.0.lock().unwrap(), image);
}

#[test]
fn upgrade_small_frames() {
    let board = Board::default();
    let image = vec![0xa5; 100];
    test(&board, |link| {
        let image = image.clone();
        async move {
            let upgrader = link.upgrader(ModuleId::Motor, TARGET).with_frame_size(33);
            upgrader.upgrade(&image, version(RUNNING).unwrap()).await.unwrap();
        }
    });
    assert_eq!(*board.flash.0.lock().unwrap(), image);
}
