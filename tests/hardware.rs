//! tests against a motor controller board wired to `/dev/ttyUSB0`, run with `cargo test --features host -- --ignored`

use std::{
    sync::Arc,
    time::Duration,
    };
use serial_test::serial;
use serial2_tokio::SerialPort;

use ppxbus::{
    ModuleId,
    region::{self, RegionBank},
    upgrade::UpgradeStatus,
    host::*,
    };


fn test<T, F>(test: T)
where
    T: FnOnce(Arc<Link<SerialPort>>) -> F,
    F: Future,
{
    let _ = env_logger::builder().is_test(true).try_init();
    tokio::runtime::Runtime::new()
    .expect("failed to create runtime")
    .block_on(async move {
        let link = Arc::new(Link::open("/dev/ttyUSB0", LinkConfig::default()) .expect("failed to open serial port"));
        tokio::time::timeout(Duration::from_secs(10), test(link))
        .await.expect("aborted test because took too long");
    });
}

#[test]
#[serial]
#[ignore]
fn identification() {
    test(|link| async move {
        let motor = link.device(ModuleId::Motor, &region::SCHEMA);
        let mut bank = RegionBank::new();
        motor.fetch(&mut bank, region::index::ID_NUM, 5).await.unwrap();
        assert_ne!(bank.get(region::SW_VERSION), [0; 20]);
    });
}

#[test]
#[serial]
#[ignore]
fn upgrade_ready() {
    test(|link| async move {
        let (state, running) = link.upgrader(ModuleId::Motor, 2).query().await.unwrap();
        assert_eq!(state, UpgradeStatus::Ready);
        assert_ne!(running, [0; 20]);
    });
}
