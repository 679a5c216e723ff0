/*!
    register table of the BLE peripheral board

    besides identity and status, the board drives the dashboard display through a bit-packed LED word
*/

use bitflags::bitflags;
use crate::registers::{
    Register, Schema, Field, Width, Bank, BitField, BitLayout,
    packed, U16, U32, U64,
    };


/// register indices
pub mod index {
    pub const ID_NUM: u8 = 0;
    pub const MODEL: u8 = 1;
    pub const SERIAL_NUM: u8 = 2;
    pub const HW_VERSION: u8 = 3;
    pub const SW_VERSION: u8 = 4;
    pub const STATUS: u8 = 5;
    pub const LDR_VALUE: u8 = 6;
    pub const IO_STATUS: u8 = 7;
    pub const LED_MSG: u8 = 8;
    pub const CARD_ID: u8 = 9;
    pub const DAT_SETTING: u8 = 10;
}

/// sub-fields of the LED display word
pub mod led {
    use crate::registers::BitField;

    /// display on
    pub const SCREEN_ON: BitField = BitField::new(0, 1);
    /// brightness level 0-7
    pub const BRIGHTNESS: BitField = SCREEN_ON.next(3);
    /// blink period in steps of 200ms
    pub const BLINK_PERIOD: BitField = BRIGHTNESS.next(4);
    pub const BLINK_DUTY: BitField = BLINK_PERIOD.next(4);
    /// blink enable, one bit per display element
    pub const BLINK_ENABLE: BitField = BLINK_DUTY.next(8);
    pub const ERROR_FLAG: BitField = BLINK_ENABLE.next(2);
    /// error code 0-F
    pub const ERROR_CODE: BitField = ERROR_FLAG.next(4);
    /// battery state of charge 0-100
    pub const DIGITAL: BitField = ERROR_CODE.next(7);
    /// 0 off, 1 white, 2 red
    pub const LOGO: BitField = DIGITAL.next(2);
    /// 0 off, 1 white, 2 green
    pub const RIM: BitField = LOGO.next(2);
    /// 0 off, 1 white, 2 red
    pub const READY_GO: BitField = RIM.next(2);
    /// 0 off, 1 white, 2 orange
    pub const TURN_LEFT: BitField = READY_GO.next(2);
    /// 0 off, 1 white, 2 orange
    pub const TURN_RIGHT: BitField = TURN_LEFT.next(2);
    /// 0 off, 1 blue, 2 red
    pub const RING: BitField = TURN_RIGHT.next(2);
    pub const RESERVED: BitField = RING.next(19);
}

/// the LED display word: 64 bits stored, each sub-field sent as its own integer
pub const LED_LAYOUT: BitLayout = BitLayout {
    word: 8,
    fields: &[
        led::SCREEN_ON,
        led::BRIGHTNESS,
        led::BLINK_PERIOD,
        led::BLINK_DUTY,
        led::BLINK_ENABLE,
        led::ERROR_FLAG,
        led::ERROR_CODE,
        led::DIGITAL,
        led::LOGO,
        led::RIM,
        led::READY_GO,
        led::TURN_LEFT,
        led::TURN_RIGHT,
        led::RING,
        led::RESERVED,
        ],
    };

const FIELDS: [Field; 11] = packed([
    Width::U8,          // id number
    Width::Bytes(8),    // model
    Width::Bytes(26),   // serial number
    Width::U8,          // hardware version
    Width::Bytes(20),   // software version
    Width::U32,         // status
    Width::U16,         // light sensor
    Width::U16,         // io pins
    Width::BitPacked(&LED_LAYOUT),
    Width::U32,         // nfc card id
    Width::U32,         // data setting
    ]);

/// BLE peripheral register table
pub const SCHEMA: Schema = Schema::new(&FIELDS);
/// bytes of the BLE peripheral bank
pub const SIZE: usize = SCHEMA.size();
/// BLE peripheral state record
pub type BleBank = Bank<SIZE>;

const fn at<T>(index: u8) -> Register<T> {Register::of(&SCHEMA, index as usize)}

pub const ID_NUM: Register<u8> = at(index::ID_NUM);
pub const SW_VERSION: Register<[u8; 20]> = at(index::SW_VERSION);
pub const STATUS: Register<U32> = at(index::STATUS);
pub const LDR_VALUE: Register<U16> = at(index::LDR_VALUE);
pub const IO_STATUS: Register<U16> = at(index::IO_STATUS);
pub const LED_MSG: Register<U64> = at(index::LED_MSG);
pub const CARD_ID: Register<U32> = at(index::CARD_ID);
pub const DAT_SETTING: Register<U32> = at(index::DAT_SETTING);


/// value of the LED display word, with sub-field accessors
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LedMessage(pub u64);
impl LedMessage {
    pub fn get(self, field: BitField) -> u64 {
        field.get(self.0)
    }
    /// set a sub-field, `None` if the value does not fit
    pub fn with(self, field: BitField, value: u64) -> Option<Self> {
        field.fits(value).then(|| Self(field.set(self.0, value)))
    }
}

bitflags! {
    /// status register: events in the low half, failures in the high half
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Status: u32 {
        const NFC_DETECT = 1 << 0;
        const NFC_READ = 1 << 1;
        const CARD_VALID = 1 << 2;
        const CARD_INVALID = 1 << 3;
        const SOS_KEY = 1 << 4;
        const BLE_CONNECTED = 1 << 5;

        const LED_INIT_FAIL = 1 << 16;
        const NFC_INIT_FAIL = 1 << 17;
        const NFC_READ_FAIL = 1 << 18;
    }
}

bitflags! {
    /// data setting register: requests in the low half, answers in the high half
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DataSetting: u32 {
        const NFC_BIND = 1 << 0;
        const NFC_UNBIND = 1 << 1;
        const NFC_WRITE = 1 << 2;
        const SERIAL_WRITE = 1 << 3;

        const NFC_BIND_DONE = 1 << 16;
        const NFC_BIND_FAIL = 1 << 17;
        const NFC_UNBIND_DONE = 1 << 18;
        const NFC_UNBIND_FAIL = 1 << 19;
        const NFC_WRITE_DONE = 1 << 20;
        const SERIAL_WRITE_DONE = 1 << 21;
    }
}

impl BleBank {
    pub fn led(&self) -> LedMessage {
        LedMessage(self.get(LED_MSG).get())
    }
    pub fn set_led(&mut self, led: LedMessage) {
        self.set(LED_MSG, U64::new(led.0))
    }
    pub fn status(&self) -> Status {
        Status::from_bits_retain(self.get(STATUS).get())
    }
    pub fn data_setting(&self) -> DataSetting {
        DataSetting::from_bits_retain(self.get(DAT_SETTING).get())
    }
}
