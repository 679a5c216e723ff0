/*!
    typed view over a module's state record

    a module's state is a packed little endian byte image (a [Bank]). A [Schema] cuts it into indexed registers, each with a [Width] telling how many bytes it occupies in the bank and on the wire. [Register] constants give typed access to the same bytes from the module's own code.
*/

use core::{
    marker::PhantomData,
    ops::{Deref, DerefMut},
    };
use zerocopy::{FromBytes, IntoBytes, Immutable};

pub use zerocopy::byteorder::little_endian::{U16, I16, U32, I32, U64};


/**
    a register is a typed pointer in a bank.

    it only holds the offset of the starting byte of the referenced value, hence can be created, copied or destroyed at no cost. Multi-byte values must use the little endian types of this module so the bank keeps its wire layout whatever the target.
*/
#[derive(PartialEq, Eq, Hash)]
pub struct Register<T> {
    offset: usize,
    ty: PhantomData<T>,
}
impl<T> Register<T> {
    /// create a register from its starting byte
    pub const fn new(offset: usize) -> Self {
        Self{offset, ty: PhantomData}
    }
    /**
        register at the given index of a schema

        fails const evaluation if the schema field does not store exactly a `T`
    */
    pub const fn of(schema: &Schema, index: usize) -> Self {
        let field = schema.fields[index];
        if field.width.storage() != size_of::<T>()
            {panic!("register type does not match schema width")}
        Self::new(field.offset)
    }
    /// starting byte in the bank
    pub const fn offset(&self) -> usize {self.offset}
    pub const fn size(&self) -> usize {size_of::<T>()}
}
impl<T> Clone for Register<T> {
    fn clone(&self) -> Self {
        Self::new(self.offset)
    }
}
impl<T> Copy for Register<T> {}
impl<T> core::fmt::Debug for Register<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Register({:#x})", self.offset)
    }
}


/// live byte image of a module's state record
#[derive(Clone, PartialEq, Eq)]
pub struct Bank<const N: usize> {
    buffer: [u8; N],
}
impl<const N: usize> Bank<N> {
    /// zero initialized bank
    pub const fn new() -> Self {
        Self {buffer: [0; N]}
    }
    pub const fn size(&self) -> usize {N}

    /**
        read a value from the bank

        # Panics
        if the register does not lie within the bank, which is a mistake in the register constants
    */
    pub fn get<T: FromBytes>(&self, register: Register<T>) -> T {
        match T::read_from_prefix(&self.buffer[register.offset() ..]) {
            Ok((value, _)) => value,
            Err(_) => panic!("register {:?} outside bank", register),
        }
    }
    /**
        write a value in the bank

        # Panics
        if the register does not lie within the bank, which is a mistake in the register constants
    */
    pub fn set<T: IntoBytes + Immutable>(&mut self, register: Register<T>, value: T) {
        self.buffer[register.offset() ..][.. register.size()]
            .copy_from_slice(value.as_bytes());
    }
}
impl<const N: usize> Default for Bank<N> {
    fn default() -> Self {Self::new()}
}
impl<const N: usize> Deref for Bank<N> {
    type Target = [u8; N];
    fn deref(&self) -> &Self::Target {&self.buffer}
}
impl<const N: usize> DerefMut for Bank<N> {
    fn deref_mut(&mut self) -> &mut Self::Target {&mut self.buffer}
}


/// sub-field of a bit-packed word, bits are counted from the least significant
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BitField {
    pub offset: u32,
    pub width: u32,
}
impl BitField {
    pub const fn new(offset: u32, width: u32) -> Self {
        Self {offset, width}
    }
    /// bit field following this one
    pub const fn next(self, width: u32) -> Self {
        Self::new(self.offset + self.width, width)
    }
    pub const fn mask(self) -> u64 {
        if self.width >= u64::BITS {u64::MAX}
        else {(1 << self.width) - 1}
    }
    /// true if value can be stored in this field without truncation
    pub const fn fits(self, value: u64) -> bool {
        value & !self.mask() == 0
    }
    pub const fn get(self, word: u64) -> u64 {
        (word >> self.offset) & self.mask()
    }
    /// replace the field's bits in word, value bits above the field width are discarded
    pub const fn set(self, word: u64, value: u64) -> u64 {
        (word & !(self.mask() << self.offset)) | ((value & self.mask()) << self.offset)
    }
    /// number of bytes the field expands to on the wire
    pub const fn wire(self) -> usize {
        self.width.div_ceil(8) as usize
    }
}

/// layout of a bit-packed register: its storage word and its sub-fields in wire order
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BitLayout {
    /// bytes of the storage word
    pub word: usize,
    pub fields: &'static [BitField],
}
impl BitLayout {
    /// sum of the sub-fields' wire widths
    pub const fn wire(&self) -> usize {
        let mut size = 0;
        let mut i = 0;
        while i < self.fields.len() {
            size += self.fields[i].wire();
            i += 1;
        }
        size
    }
    /// panics if the sub-fields do not fit the word or overlap each other
    const fn validate(&self) {
        if self.word == 0 || self.word > size_of::<u64>()
            {panic!("bit-packed word must be 1 to 8 bytes")}
        let bits = (self.word * 8) as u32;
        let mut end = 0;
        let mut i = 0;
        while i < self.fields.len() {
            let field = self.fields[i];
            if field.width == 0
                {panic!("empty bit field")}
            if field.offset < end
                {panic!("bit fields overlap or are not in ascending order")}
            end = field.offset + field.width;
            if end > bits
                {panic!("bit field exceeds its word")}
            i += 1;
        }
    }
}


/// size and kind of a register
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    /// opaque byte array, like a fixed size string
    Bytes(usize),
    /// integer word cut in sub-fields, each sent as its own little endian integer
    BitPacked(&'static BitLayout),
}
impl Width {
    /// bytes occupied in the bank
    pub const fn storage(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
            Self::Bytes(size) => size,
            Self::BitPacked(layout) => layout.word,
        }
    }
    /// bytes occupied on the wire
    pub const fn wire(self) -> usize {
        match self {
            Self::BitPacked(layout) => layout.wire(),
            other => other.storage(),
        }
    }
}

/// register of a schema: where it lies in the bank and how it is encoded
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    pub offset: usize,
    pub width: Width,
}

/**
    layout all fields back to back starting at offset 0, like a packed C struct

    meant to build schema tables in const items
*/
pub const fn packed<const N: usize>(widths: [Width; N]) -> [Field; N] {
    let mut fields = [Field {offset: 0, width: Width::U8}; N];
    let mut offset = 0;
    let mut i = 0;
    while i < N {
        fields[i] = Field {offset, width: widths[i]};
        offset += widths[i].storage();
        i += 1;
    }
    fields
}


/**
    ordered register table of a module

    register index `i` is `fields[i]`. Fields must be in increasing offset order and must not overlap, this is checked by [Schema::new] so declaring a wrong schema in a const item fails the build.
*/
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    fields: &'static [Field],
    size: usize,
}
impl Schema {
    pub const fn new(fields: &'static [Field]) -> Self {
        let mut end = 0;
        let mut i = 0;
        while i < fields.len() {
            let field = fields[i];
            if field.offset < end
                {panic!("schema fields overlap or are not in ascending order")}
            if let Width::BitPacked(layout) = field.width
                {layout.validate()}
            end = field.offset + field.width.storage();
            i += 1;
        }
        if fields.len() > u8::MAX as usize + 1
            {panic!("register index must fit in a byte")}
        Self {fields, size: end}
    }
    /// number of registers
    pub const fn len(&self) -> usize {self.fields.len()}
    pub const fn is_empty(&self) -> bool {self.fields.is_empty()}
    /// minimum bank size to hold all registers
    pub const fn size(&self) -> usize {self.size}
    pub const fn fields(&self) -> &'static [Field] {self.fields}
    pub fn field(&self, index: usize) -> Option<Field> {
        self.fields.get(index).copied()
    }
    /// fields of registers `start .. start+count`, `None` if the range is empty or exceeds the table
    pub fn range(&self, start: usize, count: usize) -> Option<&'static [Field]> {
        if count == 0
            {return None}
        self.fields.get(start .. start.checked_add(count)?)
    }
}
