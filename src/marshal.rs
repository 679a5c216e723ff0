/*!
    copy contiguous register runs between a bank and wire data

    wire data of a run is the concatenation of its registers' wire forms with no padding. Plain registers are copied as-is, bit-packed registers expand each sub-field to its own little endian integer.
*/

use crate::{
    frame::MAX_PAYLOAD,
    registers::{Schema, Field, Width, BitLayout, BitField},
    };
use thiserror::Error;


/// wire data of a register run, bounded by the payload budget
pub type Data = heapless::Vec<u8, MAX_PAYLOAD>;

/// error raised by register accesses
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegisterError {
    /// requested run is empty or exceeds the register table
    #[error("registers {start}..+{count} out of table")]
    OutOfRange {start: usize, count: usize},
    /// run does not fit in a payload
    #[error("register run exceeds payload capacity")]
    PayloadOverflow,
    /// data size does not match the requested run
    #[error("data has {found} bytes but the register run needs {expected}")]
    SizeMismatch {expected: usize, found: usize},
    /// value does not fit its bit-packed sub-field
    #[error("value exceeds its bit field")]
    BitOverflow,
    /// bank is smaller than its schema
    #[error("bank smaller than its register table")]
    BankTooSmall,
    /// bank is locked by an other access
    #[error("register bank busy")]
    Busy,
    /// command byte is not a register access
    #[error("invalid register command")]
    InvalidCommand,
}
impl RegisterError {
    /// status byte sent back in exception responses
    pub fn code(self) -> u8 {
        match self {
            Self::InvalidCommand => 1,
            Self::OutOfRange {..} => 2,
            Self::SizeMismatch {..} => 3,
            Self::PayloadOverflow => 4,
            Self::BitOverflow => 5,
            Self::BankTooSmall => 6,
            Self::Busy => 7,
        }
    }
}


/// wire size of a register run
pub fn wire_size(fields: &[Field]) -> usize {
    fields.iter().map(|field| field.width.wire()).sum()
}

fn fields(schema: &Schema, bank: usize, start: usize, count: usize) -> Result<&'static [Field], RegisterError> {
    if bank < schema.size()
        {return Err(RegisterError::BankTooSmall)}
    let fields = schema.range(start, count)
        .ok_or(RegisterError::OutOfRange {start, count})?;
    if wire_size(fields) > MAX_PAYLOAD
        {return Err(RegisterError::PayloadOverflow)}
    Ok(fields)
}

/// little endian integer of up to 8 bytes
fn load(bytes: &[u8]) -> u64 {
    bytes.iter().rev().fold(0, |word, &byte| (word << 8) | u64::from(byte))
}
fn store(bytes: &mut [u8], word: u64) {
    let len = bytes.len();
    bytes.copy_from_slice(&word.to_le_bytes()[.. len]);
}

/// iterate the sub-field values carried by the wire form of a bit-packed register
fn unpack<'d>(layout: &'static BitLayout, data: &'d [u8]) -> impl Iterator<Item=(BitField, u64)> + 'd {
    layout.fields.iter().scan(0, move |cursor, &bits| {
        let value = load(&data[*cursor ..][.. bits.wire()]);
        *cursor += bits.wire();
        Some((bits, value))
    })
}


/**
    serialize registers `start .. start+count` of a bank

    the bank is not modified, a failed read produces no data
*/
pub fn read_range(schema: &Schema, bank: &[u8], start: usize, count: usize) -> Result<Data, RegisterError> {
    let fields = fields(schema, bank.len(), start, count)?;
    let mut data = Data::new();
    for field in fields {
        let stored = &bank[field.offset ..][.. field.width.storage()];
        match field.width {
            Width::BitPacked(layout) => {
                let word = load(stored);
                for bits in layout.fields {
                    data.extend_from_slice(&bits.get(word).to_le_bytes()[.. bits.wire()])
                        .map_err(|_| RegisterError::PayloadOverflow)?;
                }
            },
            _ => data.extend_from_slice(stored)
                .map_err(|_| RegisterError::PayloadOverflow)?,
        }
    }
    Ok(data)
}

/**
    deserialize wire data into registers `start .. start+count` of a bank

    all checks happen before the first byte is written, so the bank is either fully updated or left untouched
*/
pub fn write_range(schema: &Schema, bank: &mut [u8], start: usize, count: usize, data: &[u8]) -> Result<(), RegisterError> {
    if data.len() > MAX_PAYLOAD
        {return Err(RegisterError::PayloadOverflow)}
    let fields = fields(schema, bank.len(), start, count)?;
    let expected = wire_size(fields);
    if data.len() != expected
        {return Err(RegisterError::SizeMismatch {expected, found: data.len()})}

    // validate
    let mut cursor = 0;
    for field in fields {
        let wire = &data[cursor ..][.. field.width.wire()];
        if let Width::BitPacked(layout) = field.width {
            if unpack(layout, wire).any(|(bits, value)| !bits.fits(value))
                {return Err(RegisterError::BitOverflow)}
        }
        cursor += wire.len();
    }
    // commit
    let mut cursor = 0;
    for field in fields {
        let wire = &data[cursor ..][.. field.width.wire()];
        let stored = &mut bank[field.offset ..][.. field.width.storage()];
        match field.width {
            Width::BitPacked(layout) => {
                let word = unpack(layout, wire)
                    .fold(load(stored), |word, (bits, value)| bits.set(word, value));
                store(stored, word);
            },
            _ => stored.copy_from_slice(wire),
        }
        cursor += wire.len();
    }
    Ok(())
}

/// true if the wire data equals the current content of registers `start .. start+count`
pub fn compare_range(schema: &Schema, bank: &[u8], start: usize, count: usize, data: &[u8]) -> Result<bool, RegisterError> {
    let current = read_range(schema, bank, start, count)?;
    if data.len() != current.len()
        {return Err(RegisterError::SizeMismatch {expected: current.len(), found: data.len()})}
    Ok(current.as_slice() == data)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::packed;

    const FLAGS: BitLayout = BitLayout {
        word: 4,
        fields: &[BitField::new(0, 1), BitField::new(1, 3), BitField::new(4, 12), BitField::new(16, 9)],
        };
    const FIELDS: [Field; 5] = packed([
        Width::U8,
        Width::U16,
        Width::Bytes(6),
        Width::BitPacked(&FLAGS),
        Width::I32,
        ]);
    const SCHEMA: Schema = Schema::new(&FIELDS);
    const SIZE: usize = SCHEMA.size();

    #[test]
    fn round_trip() {
        let data = [
            0x11,
            0x22, 0x33,
            b'a', b'b', b'c', 0, 0, 0,
            1,  5,  0xff, 0x0f,  0x00, 0x01,
            0xfe, 0xff, 0xff, 0xff,
            ];
        let mut bank = [0; SIZE];
        write_range(&SCHEMA, &mut bank, 0, 5, &data).unwrap();
        // bit-packed word stored compactly
        assert_eq!(bank[9 .. 13], (1u32 | 5<<1 | 0xfff<<4 | 0x100<<16).to_le_bytes());
        assert_eq!(read_range(&SCHEMA, &bank, 0, 5).unwrap().as_slice(), &data[..]);
        assert_eq!(read_range(&SCHEMA, &bank, 1, 1).unwrap().as_slice(), &[0x22, 0x33]);
        assert_eq!(compare_range(&SCHEMA, &bank, 0, 5, &data), Ok(true));
        assert_eq!(compare_range(&SCHEMA, &bank, 0, 1, &[0x12]), Ok(false));
    }

    #[test]
    fn reserved_bits_preserved() {
        let mut bank = [0; SIZE];
        bank[9 .. 13].copy_from_slice(&0xfe00_0000u32.to_le_bytes());
        write_range(&SCHEMA, &mut bank, 3, 1, &[0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(bank[9 .. 13], 0xfe00_0000u32.to_le_bytes());
    }

    #[test]
    fn out_of_range() {
        let mut bank = [0; SIZE];
        assert_eq!(read_range(&SCHEMA, &bank, 4, 2), Err(RegisterError::OutOfRange {start: 4, count: 2}));
        assert_eq!(read_range(&SCHEMA, &bank, 0, 0), Err(RegisterError::OutOfRange {start: 0, count: 0}));
        assert_eq!(write_range(&SCHEMA, &mut bank, 5, 1, &[0]), Err(RegisterError::OutOfRange {start: 5, count: 1}));
        assert_eq!(read_range(&SCHEMA, &bank[.. 4], 0, 1), Err(RegisterError::BankTooSmall));
    }

    #[test]
    fn write_is_atomic() {
        let mut bank = [0; SIZE];
        // wrong size
        assert_eq!(
            write_range(&SCHEMA, &mut bank, 0, 2, &[1, 2]),
            Err(RegisterError::SizeMismatch {expected: 3, found: 2}),
            );
        // last sub-field too wide, after plain registers that would have been written
        let data = [1, 2, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x00, 0x02];
        assert_eq!(write_range(&SCHEMA, &mut bank, 0, 4, &data), Err(RegisterError::BitOverflow));
        assert_eq!(bank, [0; SIZE]);
    }

    #[test]
    fn payload_overflow() {
        const BIG: [Field; 2] = packed([Width::Bytes(150), Width::Bytes(50)]);
        const SCHEMA: Schema = Schema::new(&BIG);
        let mut bank = [0; 200];
        assert_eq!(read_range(&SCHEMA, &bank, 0, 1).map(|d| d.len()), Ok(150));
        assert_eq!(read_range(&SCHEMA, &bank, 0, 2), Err(RegisterError::PayloadOverflow));
        assert_eq!(write_range(&SCHEMA, &mut bank, 0, 2, &[0; 200]), Err(RegisterError::PayloadOverflow));
    }

    /// copy every register range of a table from a filled bank to a blank one through the wire format
    fn transfer_ranges(schema: &Schema, size: usize) {
        let mut filled = [0u8; 256];
        for (i, byte) in filled.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(37).wrapping_add(11) | 1;
        }
        let source = &filled[.. size];
        for start in 0 .. schema.len() {
            for count in 1 ..= schema.len() - start {
                let fields = schema.range(start, count).unwrap();
                let data = read_range(schema, source, start, count).unwrap();
                assert_eq!(data.len(), wire_size(fields));

                let mut blank = [0u8; 256];
                write_range(schema, &mut blank[.. size], start, count, &data).unwrap();
                let first = fields[0].offset;
                let last = fields[count-1].offset + fields[count-1].width.storage();
                for field in fields {
                    let span = field.offset .. field.offset + field.width.storage();
                    assert_eq!(blank[span.clone()], source[span], "register range {} +{}", start, count);
                }
                assert!(blank[.. first].iter().all(|&byte| byte == 0));
                assert!(blank[last ..].iter().all(|&byte| byte == 0));
            }
        }
    }

    #[test]
    fn every_range_transfers() {
        transfer_ranges(&crate::region::SCHEMA, crate::region::SIZE);
        transfer_ranges(&crate::ble::SCHEMA, crate::ble::SIZE);
    }
}
