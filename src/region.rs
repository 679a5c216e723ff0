/*!
    register table of the motor controller

    identity, live telemetry and settings of the motor controller board, in register index order
*/

use bitflags::bitflags;
use crate::{
    wire_enum,
    registers::{Register, Schema, Field, Width, Bank, packed, U16, I16, U32, I32},
    };


/// register indices
pub mod index {
    pub const ID_NUM: u8 = 0;
    pub const MODEL: u8 = 1;
    pub const SERIAL_NUM: u8 = 2;
    pub const HW_VERSION: u8 = 3;
    pub const SW_VERSION: u8 = 4;
    pub const RIM_STATE: u8 = 5;
    pub const MCU_ERRCODE: u8 = 6;
    pub const CTRL_MODEL: u8 = 7;
    pub const SPEED_REF: u8 = 8;
    pub const MOTOR_SPEED: u8 = 9;
    pub const BUS_VOLTAGE: u8 = 10;
    pub const BUS_CURRENT: u8 = 11;
    pub const PHASE_CURRENT_A: u8 = 12;
    pub const PHASE_CURRENT_B: u8 = 13;
    pub const PHASE_CURRENT_C: u8 = 14;
    pub const HALL_STATE: u8 = 15;
    pub const PI_VQ: u8 = 16;
    pub const PI_IQ: u8 = 17;
    pub const BRAKE_STATE: u8 = 18;
    pub const IMU_PITCH: u8 = 19;
    pub const IMU_ROLL: u8 = 20;
    pub const IMU_ACC: u8 = 21;
    pub const BRAKE_MILEAGE: u8 = 22;
    pub const MOTOR_ANGLE: u8 = 23;
    pub const SINGLE_MILEAGE: u8 = 24;
    pub const ANGULAR_SPEED: u8 = 25;
    pub const RT_SETTING: u8 = 26;
    pub const RUN_MODE: u8 = 27;
    pub const GEAR: u8 = 28;
    pub const TARGET_SPEED: u8 = 29;
    pub const RATED_VOLTAGE: u8 = 30;
    pub const RATED_CURRENT: u8 = 31;
    pub const MAX_VOLTAGE: u8 = 32;
    pub const MIN_VOLTAGE: u8 = 33;
    pub const ACCELERATION: u8 = 34;
    pub const DAT_SETTING: u8 = 35;
    pub const RSVD_DATA: u8 = 36;
}

const FIELDS: [Field; 37] = packed([
    Width::U8,          // id number
    Width::Bytes(8),    // model
    Width::Bytes(26),   // serial number
    Width::U16,         // hardware version
    Width::Bytes(20),   // software version
    Width::U8,          // rim state
    Width::U32,         // mcu error code
    Width::U8,          // control model
    Width::I16,         // speed reference
    Width::I16,         // motor speed
    Width::U16,         // bus voltage
    Width::U16,         // bus current
    Width::I16,         // phase currents
    Width::I16,
    Width::I16,
    Width::U8,          // hall state
    Width::I16,         // pi vq
    Width::I16,         // pi iq
    Width::U8,          // brake state
    Width::I16,         // imu pitch
    Width::I16,         // imu roll
    Width::U8,          // imu acceleration
    Width::U8,          // brake mileage
    Width::I32,         // motor angle
    Width::U32,         // single trip mileage
    Width::I16,         // angular speed
    Width::U16,         // real time setting
    Width::U8,          // run mode
    Width::U8,          // gear
    Width::I16,         // target speed
    Width::U16,         // rated voltage
    Width::U16,         // rated current
    Width::U16,         // max voltage
    Width::U16,         // min voltage
    Width::U32,         // acceleration
    Width::U32,         // data setting
    Width::U32,         // reserved
    ]);

/// motor controller register table
pub const SCHEMA: Schema = Schema::new(&FIELDS);
/// bytes of the motor controller bank
pub const SIZE: usize = SCHEMA.size();
/// motor controller state record
pub type RegionBank = Bank<SIZE>;

const fn at<T>(index: u8) -> Register<T> {Register::of(&SCHEMA, index as usize)}

pub const ID_NUM: Register<u8> = at(index::ID_NUM);
pub const MODEL: Register<[u8; 8]> = at(index::MODEL);
pub const SERIAL_NUM: Register<[u8; 26]> = at(index::SERIAL_NUM);
pub const HW_VERSION: Register<U16> = at(index::HW_VERSION);
pub const SW_VERSION: Register<[u8; 20]> = at(index::SW_VERSION);
pub const RIM_STATE: Register<u8> = at(index::RIM_STATE);
pub const MCU_ERRCODE: Register<U32> = at(index::MCU_ERRCODE);
pub const SPEED_REF: Register<I16> = at(index::SPEED_REF);
pub const MOTOR_SPEED: Register<I16> = at(index::MOTOR_SPEED);
pub const BUS_VOLTAGE: Register<U16> = at(index::BUS_VOLTAGE);
pub const BUS_CURRENT: Register<U16> = at(index::BUS_CURRENT);
pub const BRAKE_STATE: Register<u8> = at(index::BRAKE_STATE);
pub const IMU_PITCH: Register<I16> = at(index::IMU_PITCH);
pub const IMU_ROLL: Register<I16> = at(index::IMU_ROLL);
pub const MOTOR_ANGLE: Register<I32> = at(index::MOTOR_ANGLE);
pub const SINGLE_MILEAGE: Register<U32> = at(index::SINGLE_MILEAGE);
pub const RT_SETTING: Register<U16> = at(index::RT_SETTING);
pub const RUN_MODE: Register<u8> = at(index::RUN_MODE);
pub const GEAR: Register<u8> = at(index::GEAR);
pub const TARGET_SPEED: Register<I16> = at(index::TARGET_SPEED);
pub const DAT_SETTING: Register<U32> = at(index::DAT_SETTING);


bitflags! {
    /// events reported by the rim light state register
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RimState: u8 {
        const DOWNHILL = 0x04;
        const SEAT = 0x08;
        const TILT_8DEG = 0x10;
        const CRASH = 0x20;
        const BUMP = 0x40;
        const TURN = 0x80;
    }
}

bitflags! {
    /**
        data setting register

        the low half holds requests from the central controller, the high half holds the motor controller's answers
    */
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DataSetting: u32 {
        const CHARGER_CHECK = 1 << 0;
        const IMU_OPEN = 1 << 1;
        const IMU_CALIBRATE = 1 << 2;
        const UPGRADE_MODE = 1 << 3;
        const SERIAL_WRITE = 1 << 4;
        const MOTOR_TEST = 1 << 5;
        const ACC_CALIBRATE = 1 << 6;

        const CHARGER_CHECK_DONE = 1 << 16;
        const IMU_OPEN_DONE = 1 << 17;
        const IMU_CALIBRATE_DONE = 1 << 18;
        const UPGRADE_MODE_REFUSED = 1 << 19;
        const ACC_CALIBRATE_SIDE = 1 << 20;
        const ACC_CALIBRATE_DONE = 1 << 21;
    }
}

bitflags! {
    /// real time setting register: lights and error clearing
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RtSetting: u16 {
        const BRAKE_LED = 1 << 0;
        const TAIL_LED = 1 << 1;
        const RIGHT_LED = 1 << 2;
        const LEFT_LED = 1 << 3;
        const CLEAR_ERRCODE = 1 << 15;
    }
}

wire_enum! {
    /// content of the run mode register
    pub enum RunMode: u8 else Unknown {
        Idle = 0,
        Set = 1,
        Run = 2,
        Lock = 3,
        Aid = 4,
        Brake = 5,
        Upgrade = 6,
        Test = 7,
    }
}

impl RegionBank {
    pub fn rim_state(&self) -> RimState {
        RimState::from_bits_retain(self.get(RIM_STATE))
    }
    pub fn data_setting(&self) -> DataSetting {
        DataSetting::from_bits_retain(self.get(DAT_SETTING).get())
    }
    pub fn set_data_setting(&mut self, flags: DataSetting) {
        self.set(DAT_SETTING, U32::new(flags.bits()))
    }
    pub fn rt_setting(&self) -> RtSetting {
        RtSetting::from_bits_retain(self.get(RT_SETTING).get())
    }
    pub fn run_mode(&self) -> RunMode {
        RunMode::from(self.get(RUN_MODE))
    }
    pub fn set_run_mode(&mut self, mode: RunMode) {
        self.set(RUN_MODE, mode.into())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::{read_range, write_range};

    #[test]
    fn layout() {
        assert_eq!(SCHEMA.len(), 37);
        assert_eq!(SIZE, 125);
        assert_eq!(HW_VERSION.offset(), 35);
        assert_eq!(SW_VERSION.offset(), 37);
        assert_eq!(BUS_VOLTAGE.offset(), 67);
        assert_eq!(DAT_SETTING.offset(), 117);
        // whole table fits one response
        assert_eq!(read_range(&SCHEMA, &RegionBank::new()[..], 0, 37).map(|d| d.len()), Ok(SIZE));
    }

    #[test]
    fn telemetry_access() {
        let mut bank = RegionBank::new();
        bank.set(BUS_VOLTAGE, U16::new(48_200));
        bank.set(MOTOR_SPEED, I16::new(-320));
        let data = read_range(&SCHEMA, &bank[..], index::MOTOR_SPEED.into(), 2).unwrap();
        assert_eq!(data.as_slice(), &[0xc0, 0xfe, 0x48, 0xbc]);

        write_range(&SCHEMA, &mut bank[..], index::RT_SETTING.into(), 2, &[0x05, 0x80, 6]).unwrap();
        assert_eq!(bank.rt_setting(), RtSetting::BRAKE_LED | RtSetting::RIGHT_LED | RtSetting::CLEAR_ERRCODE);
        assert_eq!(bank.run_mode(), RunMode::Upgrade);
    }

    #[test]
    fn flags() {
        let mut bank = RegionBank::new();
        bank.set_data_setting(DataSetting::IMU_OPEN | DataSetting::IMU_OPEN_DONE);
        assert_eq!(bank[117 .. 121], [0x02, 0x00, 0x02, 0x00]);
        assert!(bank.data_setting().contains(DataSetting::IMU_OPEN_DONE));
        bank[RIM_STATE.offset()] = 0x48;
        assert_eq!(bank.rim_state(), RimState::SEAT | RimState::BUMP);
    }
}
