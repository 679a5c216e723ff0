/*!
    wire frame codec

    a frame is `START | escaped(module, command, length, payload, checksum_lo, checksum_hi) | END`

    Marker bytes appearing inside the frame content are replaced by a two bytes substitute. As the substitutes' first byte would then be ambiguous, any literal occurence of it is escaped again with a second level substitute. Decoding undoes them in reverse order.

    | literal | escaped |
    |---------|---------|
    | `A5`    | `AB BA` |
    | `AB`    | `AB BB` |
    | `55`    | `CD DC` |
    | `CD`    | `CD DD` |
*/
use log::*;
use thiserror::Error;

use crate::{
    checksum::checksum,
    command::{Envelope, Command, ModuleId},
    };


/// first byte of every frame
pub const START: u8 = 0xa5;
/// last byte of every frame
pub const END: u8 = 0x55;
/// marker reserved inside module payloads, not escaped by frames
pub const DATA_TAG: u8 = 0x33;

/// prefix of substitutes for [START]
pub const START_ESCAPE: u8 = 0xab;
/// `START_ESCAPE START_SUBSTITUTE` stands for [START]
pub const START_SUBSTITUTE: u8 = 0xba;
/// `START_ESCAPE START_LITERAL` stands for [START_ESCAPE]
pub const START_LITERAL: u8 = 0xbb;

/// prefix of substitutes for [END]
pub const END_ESCAPE: u8 = 0xcd;
/// `END_ESCAPE END_SUBSTITUTE` stands for [END]
pub const END_SUBSTITUTE: u8 = 0xdc;
/// `END_ESCAPE END_LITERAL` stands for [END_ESCAPE]
pub const END_LITERAL: u8 = 0xdd;

/// shortest frame sent by the boards, their shortest message has a 2 bytes payload
pub const MIN_FRAME: usize = 9;
/// largest frame content once unescaped, markers included
pub const MAX_FRAME: usize = 256;
/// largest envelope payload
pub const MAX_PAYLOAD: usize = 187;
/// module, command, length
const HEADER: usize = 3;
/// checksum
const TRAILER: usize = 2;
/// shortest frame decodable: an empty payload
const MIN_DECODED: usize = 2 + HEADER + TRAILER;
/// largest unescaped content of a valid frame
const MAX_CONTENT: usize = HEADER + MAX_PAYLOAD + TRAILER;
/// largest escaped frame a valid envelope can produce: every content byte doubled
pub const MAX_ENCODED: usize = 2 + 2 * MAX_CONTENT;

/// buffer able to hold any encoded frame
pub type Encoded = heapless::Vec<u8, MAX_ENCODED>;


/// malformed or corrupted wire data, the frame is dropped
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is shorter than its minimum or declared size")]
    Truncated,
    #[error("frame delimiters are absent or misplaced")]
    BadDelimiter,
    #[error("invalid escape sequence in frame")]
    BadEscape,
    #[error("checksum mismatch, expected {expected:#06x} found {found:#06x}")]
    ChecksumMismatch {expected: u16, found: u16},
    #[error("frame exceeds maximum size")]
    OversizeFrame,
    #[error("unexpected bytes after frame checksum")]
    LengthMismatch,
    #[error("unknown module identifier {0:#04x}")]
    UnknownModule(u8),
}


/// append the escaped form of `data` to `out`
pub fn escape<const N: usize>(data: &[u8], out: &mut heapless::Vec<u8, N>) -> Result<(), FrameError> {
    for &byte in data {
        let pushed = match byte {
            START => out.extend_from_slice(&[START_ESCAPE, START_SUBSTITUTE]).is_ok(),
            START_ESCAPE => out.extend_from_slice(&[START_ESCAPE, START_LITERAL]).is_ok(),
            END => out.extend_from_slice(&[END_ESCAPE, END_SUBSTITUTE]).is_ok(),
            END_ESCAPE => out.extend_from_slice(&[END_ESCAPE, END_LITERAL]).is_ok(),
            _ => out.push(byte).is_ok(),
        };
        if !pushed
            {return Err(FrameError::OversizeFrame)}
    }
    Ok(())
}

/// append the unescaped form of `data` to `out`
pub fn unescape<const N: usize>(data: &[u8], out: &mut heapless::Vec<u8, N>) -> Result<(), FrameError> {
    let mut bytes = data.iter().copied();
    while let Some(byte) = bytes.next() {
        let literal = match byte {
            START | END => return Err(FrameError::BadDelimiter),
            START_ESCAPE => match bytes.next() {
                Some(START_SUBSTITUTE) => START,
                Some(START_LITERAL) => START_ESCAPE,
                _ => return Err(FrameError::BadEscape),
            },
            END_ESCAPE => match bytes.next() {
                Some(END_SUBSTITUTE) => END,
                Some(END_LITERAL) => END_ESCAPE,
                _ => return Err(FrameError::BadEscape),
            },
            _ => byte,
        };
        out.push(literal).map_err(|_| FrameError::OversizeFrame)?;
    }
    Ok(())
}

/// format an envelope to a wire frame
pub fn encode(envelope: &Envelope) -> Encoded {
    let payload = envelope.payload();
    let mut content = heapless::Vec::<u8, MAX_CONTENT>::new();
    // envelope payload is bounded, so neither buffer can overflow
    let _ = content.extend_from_slice(&[
        envelope.module().into(),
        envelope.command().bits(),
        payload.len() as u8,
        ]);
    let _ = content.extend_from_slice(payload);
    let _ = content.extend_from_slice(&checksum(&content).to_le_bytes());

    let mut frame = Encoded::new();
    let _ = frame.push(START);
    let escaped = escape(&content, &mut frame);
    debug_assert!(escaped.is_ok(), "frame buffer too small for envelope");
    let _ = frame.push(END);
    frame
}

/// parse one complete wire frame, delimiters included
pub fn decode(raw: &[u8]) -> Result<Envelope, FrameError> {
    if raw.len() < MIN_DECODED
        {return Err(FrameError::Truncated)}
    if raw.len() > MAX_ENCODED
        {return Err(FrameError::OversizeFrame)}
    let [START, inner @ .., END] = raw
        else {return Err(FrameError::BadDelimiter)};

    let mut content = heapless::Vec::<u8, MAX_FRAME>::new();
    unescape(inner, &mut content)?;
    if content.len() < HEADER + TRAILER
        {return Err(FrameError::Truncated)}

    let size = usize::from(content[2]);
    if size > MAX_PAYLOAD
        {return Err(FrameError::OversizeFrame)}
    let end = HEADER + size;
    if content.len() < end + TRAILER
        {return Err(FrameError::Truncated)}
    if content.len() > end + TRAILER
        {return Err(FrameError::LengthMismatch)}

    let found = u16::from_le_bytes([content[end], content[end+1]]);
    let expected = checksum(&content[.. end]);
    if found != expected
        {return Err(FrameError::ChecksumMismatch {expected, found})}

    Envelope::new(
        ModuleId::from(content[0]),
        Command::from_bits(content[1]),
        &content[HEADER .. end],
        )
}


/**
    reassemble frames from a byte stream

    bytes outside a frame are dropped, a start marker always begins a new frame so the reader resynchronizes after any corruption
*/
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Encoded,
    collecting: bool,
}
impl FrameReader {
    pub fn new() -> Self {
        Self {buffer: Encoded::new(), collecting: false}
    }
    /// feed one byte, returns the decoding result when it completes a frame
    pub fn push(&mut self, byte: u8) -> Option<Result<Envelope, FrameError>> {
        match byte {
            START => {
                if self.collecting {
                    debug!("resync, dropping {} bytes of unterminated frame", self.buffer.len());
                }
                self.buffer.clear();
                let _ = self.buffer.push(START);
                self.collecting = true;
                None
            },
            END if self.collecting => {
                self.collecting = false;
                let result = match self.buffer.push(END) {
                    Ok(()) => decode(&self.buffer),
                    Err(_) => Err(FrameError::OversizeFrame),
                };
                self.buffer.clear();
                Some(result)
            },
            _ if self.collecting => {
                if self.buffer.push(byte).is_err() {
                    self.collecting = false;
                    self.buffer.clear();
                    return Some(Err(FrameError::OversizeFrame))
                }
                None
            },
            _ => None,
        }
    }
    /// feed a chunk of bytes, yielding every frame it completes
    pub fn feed<'r>(&'r mut self, bytes: &'r [u8]) -> impl Iterator<Item = Result<Envelope, FrameError>> + 'r {
        bytes.iter().filter_map(move |&byte| self.push(byte))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Verb, Direction};

    const MARKERS: [u8; 5] = [START, END, START_ESCAPE, END_ESCAPE, DATA_TAG];

    fn envelope(payload: &[u8]) -> Envelope {
        Envelope::new(ModuleId::Motor, Command::request(Verb::MultiWrite), payload).unwrap()
    }

    #[test]
    fn layout() {
        let frame = encode(&envelope(&[0x00, 0x0a, 0x01]));
        let crc = checksum(&[0x20, 0x04, 0x03, 0x00, 0x0a, 0x01]).to_le_bytes();
        let mut expected = heapless::Vec::<u8, 16>::new();
        expected.extend_from_slice(&[START, 0x20, 0x04, 0x03, 0x00, 0x0a, 0x01]).unwrap();
        escape(&crc, &mut expected).unwrap();
        expected.push(END).unwrap();
        assert_eq!(&frame[..], &expected[..]);
        assert!(frame.len() >= MIN_FRAME);
    }

    #[test]
    fn second_level_escapes() {
        let mut out = heapless::Vec::<u8, 32>::new();
        escape(&[START_ESCAPE, START_SUBSTITUTE], &mut out).unwrap();
        assert_eq!(&out[..], &[0xab, 0xbb, 0xba]);
        out.clear();
        escape(&[END_ESCAPE, END_SUBSTITUTE], &mut out).unwrap();
        assert_eq!(&out[..], &[0xcd, 0xdd, 0xdc]);
        out.clear();
        escape(&[START, END, DATA_TAG], &mut out).unwrap();
        assert_eq!(&out[..], &[0xab, 0xba, 0xcd, 0xdc, 0x33]);
    }

    #[test]
    fn escaping_reversible() {
        // every sequence of 4 bytes taken among markers and their substitutes
        let alphabet = [START, END, START_ESCAPE, END_ESCAPE, START_SUBSTITUTE, START_LITERAL, END_SUBSTITUTE, END_LITERAL, 0x00];
        for a in alphabet { for b in alphabet { for c in alphabet { for d in alphabet {
            let data = [a, b, c, d];
            let mut escaped = heapless::Vec::<u8, 8>::new();
            escape(&data, &mut escaped).unwrap();
            assert!(!escaped.contains(&START) && !escaped.contains(&END));
            let mut restored = heapless::Vec::<u8, 8>::new();
            unescape(&escaped, &mut restored).unwrap();
            assert_eq!(&restored[..], &data[..]);
        }}}}
        // long runs
        let run = [START; 90];
        let mut escaped = heapless::Vec::<u8, 180>::new();
        escape(&run, &mut escaped).unwrap();
        let mut restored = heapless::Vec::<u8, 90>::new();
        unescape(&escaped, &mut restored).unwrap();
        assert_eq!(&restored[..], &run[..]);
    }

    #[test]
    fn round_trip() {
        for size in [0, 1, 2, 3, 4, 17, 128, MAX_PAYLOAD] {
            for seed in 0 .. 8usize {
                let payload: heapless::Vec<u8, MAX_PAYLOAD> = (0 .. size)
                    .map(|i| if (i + seed) % 3 == 0 {MARKERS[(i + seed) % MARKERS.len()]} else {(i * 31 + seed) as u8})
                    .collect();
                let original = envelope(&payload);
                assert_eq!(decode(&encode(&original)), Ok(original));
            }
        }
        // worst case: every byte escaped
        let original = Envelope::new(ModuleId::Ble, Command::new(Direction::Exception, Verb::Read), &[START; MAX_PAYLOAD]).unwrap();
        let frame = encode(&original);
        assert!(frame.len() > MAX_FRAME);
        assert_eq!(decode(&frame), Ok(original));
    }

    #[test]
    fn single_bit_flips_detected() {
        let frame = encode(&envelope(&[0x01, START, 0x02, END, 0xab, 0x10, 0x77]));
        for position in 1 .. frame.len() - 1 {
            for bit in 0 .. 8 {
                let mut corrupted = frame.clone();
                corrupted[position] ^= 1 << bit;
                assert!(decode(&corrupted).is_err(), "flip at byte {} bit {} undetected", position, bit);
            }
        }
    }

    #[test]
    fn short_payloads() {
        // shortest frame sent by the boards: 2 bytes payload
        let content = [0x20, 0x01, 0x02, 0x00, 0x01];
        let mut raw = heapless::Vec::<u8, 32>::new();
        raw.push(START).unwrap();
        escape(&content, &mut raw).unwrap();
        escape(&checksum(&content).to_le_bytes(), &mut raw).unwrap();
        raw.push(END).unwrap();
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded.payload(), &[0x00, 0x01]);
        assert_eq!(decoded.header(), None);

        for payload in [&[][..], &[START], &[END, 0x01]] {
            let original = envelope(payload);
            assert_eq!(decode(&encode(&original)), Ok(original));
        }
        // a frame too short to hold its length and checksum
        assert_eq!(decode(&[START, 0x20, 0x01, 0x00, 0x00, END]), Err(FrameError::Truncated));
    }

    #[test]
    fn errors() {
        let frame = encode(&envelope(&[1, 2, 3]));

        assert_eq!(decode(&frame[.. 6]), Err(FrameError::Truncated));
        assert_eq!(decode(&[]), Err(FrameError::Truncated));
        assert_eq!(decode(&frame[1 ..]), Err(FrameError::BadDelimiter));
        assert_eq!(decode(&frame[.. frame.len()-1]), Err(FrameError::BadDelimiter));

        let mut corrupted = frame.clone();
        corrupted[4] ^= 0x40;
        assert!(matches!(decode(&corrupted), Err(FrameError::ChecksumMismatch {..})));

        // bare marker inside the frame
        let mut corrupted = frame.clone();
        corrupted[5] = START;
        assert_eq!(decode(&corrupted), Err(FrameError::BadDelimiter));
        // escape prefix without valid successor
        let mut corrupted = frame.clone();
        corrupted[5] = START_ESCAPE;
        assert_eq!(decode(&corrupted), Err(FrameError::BadEscape));

        // length field above the payload limit
        let mut content = heapless::Vec::<u8, 256>::new();
        content.extend_from_slice(&[0x20, 0x01, 200]).unwrap();
        content.extend_from_slice(&[0; 200]).unwrap();
        let crc = checksum(&content).to_le_bytes();
        content.extend_from_slice(&crc).unwrap();
        let mut raw = heapless::Vec::<u8, 512>::new();
        raw.push(START).unwrap();
        escape(&content, &mut raw).unwrap();
        raw.push(END).unwrap();
        assert_eq!(decode(&raw), Err(FrameError::OversizeFrame));

        // checksum valid but module unknown
        let content = [0x21, 0x01, 0x03, 0, 0, 0];
        let crc = checksum(&content).to_le_bytes();
        let mut raw = heapless::Vec::<u8, 32>::new();
        raw.push(START).unwrap();
        escape(&content, &mut raw).unwrap();
        escape(&crc, &mut raw).unwrap();
        raw.push(END).unwrap();
        assert_eq!(decode(&raw), Err(FrameError::UnknownModule(0x21)));

        // declared length shorter than content
        let content = [0x20, 0x01, 0x03, 0, 0, 0, 0];
        let crc = checksum(&content[.. 6]).to_le_bytes();
        let mut raw = heapless::Vec::<u8, 32>::new();
        raw.push(START).unwrap();
        escape(&content, &mut raw).unwrap();
        escape(&crc, &mut raw).unwrap();
        raw.push(END).unwrap();
        assert_eq!(decode(&raw), Err(FrameError::LengthMismatch));
    }

    #[test]
    fn reader_resync() {
        let first = envelope(&[1, START, 3]);
        let second = envelope(&[4, 5, END, 7]);
        let mut stream = heapless::Vec::<u8, 128>::new();
        // garbage, then a frame cut in the middle, then two good frames
        stream.extend_from_slice(&[0x00, END, 0x42]).unwrap();
        stream.extend_from_slice(&encode(&first)[.. 5]).unwrap();
        stream.extend_from_slice(&encode(&first)).unwrap();
        stream.extend_from_slice(&encode(&second)).unwrap();

        let mut reader = FrameReader::new();
        let mut frames = reader.feed(&stream);
        assert_eq!(frames.next(), Some(Ok(first)));
        assert_eq!(frames.next(), Some(Ok(second)));
        assert_eq!(frames.next(), None);
    }

    #[test]
    fn reader_reports_corruption() {
        let mut frame = encode(&envelope(&[1, 2, 3]));
        frame[4] ^= 0x01;
        let mut reader = FrameReader::new();
        let results: heapless::Vec<_, 4> = reader.feed(&frame).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(FrameError::ChecksumMismatch {..})));

        // reader recovers on the next frame
        let good = envelope(&[4, 5, 6]);
        assert_eq!(reader.feed(&encode(&good)).next(), Some(Ok(good)));
    }
}
