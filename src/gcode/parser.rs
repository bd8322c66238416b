//! Single-pass G-code line scanner.
//!
//! A line looks like `N12 G1 X10.5 Y-3 F600*78 ; comment`. Words are a
//! letter followed by a signed decimal. Values are accumulated digit by
//! digit, so malformed numbers degrade to whatever digits were seen instead
//! of failing. Commands listed in [`STRING_COMMANDS`] take the rest of the
//! line as a text argument.
//!
//! Unit scaling (G20/G21) and, for absolute moves, coordinate offsets are
//! applied here, so a [`Block`] always carries machine millimetres.

use super::LineBuffer;
use super::block::{Block, Code, UpdateMask};
use crate::motion::{AXIS_COUNT, AxisId};
use thiserror::Error;

pub const MM_PER_INCH: f32 = 25.4;

/// Commands whose remaining text is a file name or message.
pub const STRING_COMMANDS: &[(Code, i32)] = &[
    (Code::M, 23),
    (Code::M, 28),
    (Code::M, 30),
    (Code::M, 32),
    (Code::M, 36),
    (Code::M, 117),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("checksum mismatch on line {line}: sent {expected:?}, computed {computed}")]
    Checksum { line: i32, expected: Option<u32>, computed: u8 },
    #[error("line {line} is longer than {max} characters")]
    LineTooLong { line: i32, max: usize },
}

impl ParseError {
    /// Line number to ask the host to resend.
    pub fn line(&self) -> i32 {
        match self {
            ParseError::Checksum { line, .. } | ParseError::LineTooLong { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Positioning {
    #[default]
    Absolute,
    Relative,
}

/// XOR of every byte, as used by `*` checksums.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Num,
    Cmd(Code),
    Axis(AxisId),
    F,
    I,
    J,
    K,
    P,
    Q,
    R,
    S,
}

impl Field {
    fn for_letter(c: u8) -> Option<Self> {
        if let Some(code) = Code::from_letter(c) {
            return Some(Field::Cmd(code));
        }
        if let Some(id) = AxisId::from_letter(char::from(c)) {
            return Some(Field::Axis(id));
        }
        Some(match c.to_ascii_uppercase() {
            b'N' => Field::Num,
            b'F' => Field::F,
            b'I' => Field::I,
            b'J' => Field::J,
            b'K' => Field::K,
            b'P' => Field::P,
            b'Q' => Field::Q,
            b'R' => Field::R,
            b'S' => Field::S,
            _ => return None,
        })
    }

    fn is_integer(self) -> bool {
        matches!(self, Field::Num | Field::Cmd(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Invalid,
    Integer,
    Float,
    FloatFrac,
    Done,
}

/// Value being accumulated for one word.
#[derive(Debug, Clone, Copy)]
struct Word {
    field: Field,
    scan: Scan,
    negative: bool,
    whole: i64,
    frac: i64,
    frac_digits: u32,
}

/// Fraction digits beyond this are ignored.
const MAX_FRAC_DIGITS: u32 = 9;

impl Word {
    fn new(field: Field) -> Self {
        Self {
            field,
            scan: Scan::Invalid,
            negative: false,
            whole: 0,
            frac: 0,
            frac_digits: 0,
        }
    }

    fn feed(&mut self, c: u8) {
        match (self.scan, c) {
            (Scan::Done, _) => {}
            (Scan::Invalid, b'-') => self.negative = !self.negative,
            (Scan::Invalid, b'+') => {}
            (Scan::Invalid | Scan::Integer | Scan::Float, b'0'..=b'9') => {
                self.whole = self.whole.saturating_mul(10).saturating_add(i64::from(c - b'0'));
                if self.scan == Scan::Invalid {
                    self.scan = if self.field.is_integer() { Scan::Integer } else { Scan::Float };
                }
            }
            (Scan::FloatFrac, b'0'..=b'9') => {
                if self.frac_digits < MAX_FRAC_DIGITS {
                    self.frac = self.frac * 10 + i64::from(c - b'0');
                    self.frac_digits += 1;
                }
            }
            (Scan::Invalid | Scan::Float, b'.') if !self.field.is_integer() => {
                self.scan = Scan::FloatFrac;
            }
            // Anything else ends the number; later digits are ignored.
            _ => {
                if self.scan != Scan::Invalid {
                    self.scan = Scan::Done;
                }
            }
        }
    }

    fn has_digits(&self) -> bool {
        self.scan != Scan::Invalid || self.frac_digits > 0
    }

    fn float(&self) -> f32 {
        let mut value = self.whole as f64;
        if self.frac_digits > 0 {
            value += self.frac as f64 / 10f64.powi(self.frac_digits as i32);
        }
        if self.negative {
            value = -value;
        }
        value as f32
    }

    fn integer(&self) -> i32 {
        let value = self.whole.clamp(0, i64::from(i32::MAX)) as i32;
        if self.negative { -value } else { value }
    }
}

/// Modal parser state: unit scale and positioning mode.
#[derive(Debug, Clone)]
pub struct Parser {
    units_to_mm: f32,
    positioning: Positioning,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            units_to_mm: 1.0,
            positioning: Positioning::Absolute,
        }
    }

    pub fn units_to_mm(&self) -> f32 {
        self.units_to_mm
    }

    pub fn set_inches(&mut self, inches: bool) {
        self.units_to_mm = if inches { MM_PER_INCH } else { 1.0 };
    }

    pub fn positioning(&self) -> Positioning {
        self.positioning
    }

    pub fn set_positioning(&mut self, positioning: Positioning) {
        self.positioning = positioning;
    }

    /// Parse a completed line buffer, reporting truncation as an error.
    pub fn parse_buffer(
        &self,
        line: &LineBuffer,
        offsets: &[f32; AXIS_COUNT],
    ) -> Result<Block, ParseError> {
        let block = self.parse(line.as_bytes(), offsets)?;
        if line.overflowed() {
            return Err(ParseError::LineTooLong {
                line: block.num.unwrap_or_default(),
                max: super::GCODE_LINE_MAX,
            });
        }
        Ok(block)
    }

    /// Parse one line (without its terminator). `offsets` maps user to
    /// machine coordinates and is only applied to absolute moves.
    pub fn parse(&self, line: &[u8], offsets: &[f32; AXIS_COUNT]) -> Result<Block, ParseError> {
        let line = match line.iter().position(|&b| b == b';') {
            Some(comment) => &line[..comment],
            None => line,
        };
        let (payload, sum) = split_checksum(line);

        let mut block = Block {
            relative: self.positioning == Positioning::Relative,
            ..Block::default()
        };
        let mut word: Option<Word> = None;

        for (i, &c) in payload.iter().enumerate() {
            if c.is_ascii_alphabetic() || c.is_ascii_whitespace() {
                if store(&mut block, word.take()) {
                    take_string(&mut block, &payload[i..]);
                    break;
                }
                if c.is_ascii_alphabetic() {
                    word = Field::for_letter(c).map(Word::new);
                }
            } else if let Some(w) = word.as_mut() {
                w.feed(c);
            }
        }
        store(&mut block, word.take());

        self.scale(&mut block, offsets);

        if let Some((expected, computed)) = sum {
            if expected != Some(u32::from(computed)) {
                return Err(ParseError::Checksum {
                    line: block.num.unwrap_or_default(),
                    expected,
                    computed,
                });
            }
        }
        Ok(block)
    }

    fn scale(&self, block: &mut Block, offsets: &[f32; AXIS_COUNT]) {
        let units = self.units_to_mm;
        let is_move = block.code == Some(Code::G) && (0..=3).contains(&block.cmd);
        for id in block.update_mask.axes() {
            let value = &mut block.axis[id.index()];
            *value *= units;
            if is_move && !block.relative {
                *value += offsets[id.index()];
            }
        }
        block.f *= units;
        block.i *= units;
        block.j *= units;
        block.k *= units;
    }
}

/// Split the line at its first `*`. Returns the payload and, when a
/// checksum was sent, the sent value (`None` if it is not a number) and
/// the computed one.
fn split_checksum(line: &[u8]) -> (&[u8], Option<(Option<u32>, u8)>) {
    let Some(star) = line.iter().position(|&b| b == b'*') else {
        return (line, None);
    };
    let payload = &line[..star];
    let trailer = line[star + 1..].trim_ascii();
    let sent = (!trailer.is_empty() && trailer.iter().all(u8::is_ascii_digit)).then(|| {
        trailer
            .iter()
            .fold(0u32, |acc, d| acc.saturating_mul(10).saturating_add(u32::from(d - b'0')))
    });
    (payload, Some((sent, checksum(payload))))
}

/// Commit a finished word to the block. Returns true when the word
/// completed a command that takes the rest of the line as text.
fn store(block: &mut Block, word: Option<Word>) -> bool {
    let Some(word) = word else {
        return false;
    };
    if !word.has_digits() {
        return false;
    }
    let value = word.float();
    let mask = match word.field {
        Field::Num => {
            block.num = Some(word.integer());
            return false;
        }
        Field::Cmd(code) => {
            block.code = Some(code);
            block.cmd = word.integer();
            return STRING_COMMANDS.contains(&(code, block.cmd));
        }
        Field::Axis(id) => {
            block.axis[id.index()] = value;
            UpdateMask::axis(id)
        }
        Field::F => {
            block.f = value;
            UpdateMask::F
        }
        Field::I => {
            block.i = value;
            UpdateMask::I
        }
        Field::J => {
            block.j = value;
            UpdateMask::J
        }
        Field::K => {
            block.k = value;
            UpdateMask::K
        }
        Field::P => {
            block.p = value;
            UpdateMask::P
        }
        Field::Q => {
            block.q = value;
            UpdateMask::Q
        }
        Field::R => {
            block.r = value;
            UpdateMask::R
        }
        Field::S => {
            block.s = value;
            UpdateMask::S
        }
    };
    block.update_mask.insert(mask);
    false
}

fn take_string(block: &mut Block, rest: &[u8]) {
    block.string.clear();
    for &b in rest.trim_ascii() {
        if b.is_ascii() && block.string.push(char::from(b)).is_err() {
            break;
        }
    }
    if !block.string.is_empty() {
        block.update_mask.insert(UpdateMask::STRING);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO: [f32; AXIS_COUNT] = [0.0; AXIS_COUNT];

    fn parse(line: &str) -> Result<Block, ParseError> {
        Parser::new().parse(line.as_bytes(), &ZERO)
    }

    fn with_checksum(line: &str) -> String {
        format!("{}*{}", line, checksum(line.as_bytes()))
    }

    #[test]
    fn parses_words() {
        let b = parse("N7 G1 X10 Y-2.5 Z.5 E0.125 F600").unwrap();
        assert_eq!(b.num, Some(7));
        assert!(b.is(Code::G, 1));
        assert_eq!(b.axis, [10.0, -2.5, 0.5, 0.125]);
        assert_eq!(b.f, 600.0);
        assert!(b.has(UpdateMask::F));
        assert!(!b.has(UpdateMask::S));
        assert_eq!(b.update_mask.axes().count(), 4);
    }

    #[test]
    fn lowercase_and_no_spaces() {
        let b = parse("g1x5y6").unwrap();
        assert!(b.is(Code::G, 1));
        assert_eq!(b.axis[0], 5.0);
        assert_eq!(b.axis[1], 6.0);
    }

    #[test]
    fn comments_are_dropped() {
        let b = parse("G28 X0 ; home X only").unwrap();
        assert!(b.is(Code::G, 28));
        assert!(b.update_mask.has_axis(AxisId::X));
        assert!(!b.update_mask.has_axis(AxisId::Y));
        let b = parse("; just a comment").unwrap();
        assert_eq!(b.code, None);
    }

    #[test]
    fn malformed_numbers_do_not_panic() {
        let b = parse("G1 X1.2.3 Y-- Z99999999999999999999 E").unwrap();
        assert!((b.axis[0] - 1.2).abs() < 1e-6);
        assert_eq!(b.axis[1], 0.0);
        assert!(!b.update_mask.has_axis(AxisId::Y));
        assert!(b.axis[2] > 1e18);
        assert!(!b.update_mask.has_axis(AxisId::E));
    }

    #[test]
    fn checksum_round_trip() {
        let line = "N1 G1 X10.5 Y20 F100";
        let plain = parse(line).unwrap();
        let summed = parse(&with_checksum(line)).unwrap();
        assert_eq!(plain, summed);
    }

    #[test]
    fn any_single_bit_flip_requests_resend() {
        let line = "N42 G1 X10.5 Y-20 F100";
        let sum = checksum(line.as_bytes());
        for pos in 0..line.len() {
            for bit in 0..8 {
                let mut bytes = line.as_bytes().to_vec();
                bytes[pos] ^= 1 << bit;
                bytes.extend_from_slice(format!("*{}", sum).as_bytes());
                let result = Parser::new().parse(&bytes, &ZERO);
                assert!(
                    matches!(result, Err(ParseError::Checksum { .. })),
                    "flip bit {bit} of byte {pos} was accepted"
                );
            }
        }
    }

    #[test]
    fn damaged_checksum_is_never_ignored() {
        let line = "N7 G1 X10";
        let signed = with_checksum(line);
        let star = line.len();
        for pos in star + 1..signed.len() {
            for bit in 0..8 {
                let mut bytes = signed.as_bytes().to_vec();
                bytes[pos] ^= 1 << bit;
                let result = Parser::new().parse(&bytes, &ZERO);
                assert!(
                    matches!(result, Err(ParseError::Checksum { line: 7, .. })),
                    "flip bit {bit} of checksum byte {pos} was accepted"
                );
            }
        }
        for bad in ["N7 G1 X10*", "N7 G1 X10*x6", "N7 G1 X10* ", "N7 G1 X10*1*2"] {
            assert!(
                matches!(parse(bad), Err(ParseError::Checksum { line: 7, expected: None, .. })),
                "{bad} was accepted"
            );
        }
    }

    #[test]
    fn resend_carries_line_number() {
        let err = parse("N9 M114*0").unwrap_err();
        assert_eq!(err.line(), 9);
    }

    #[test]
    fn star_inside_comment_is_not_a_checksum() {
        let b = parse("G1 X1 ; a * b").unwrap();
        assert!(b.is(Code::G, 1));
        let b = parse("G1 X1 ; note *12").unwrap();
        assert_eq!(b.axis[0], 1.0);
        let b = parse(&format!("{} ; note *12", with_checksum("N2 G1 X1"))).unwrap();
        assert_eq!(b.num, Some(2));
    }

    #[test]
    fn string_commands_take_rest_of_line() {
        let b = parse("M117 Hello World").unwrap();
        assert!(b.is(Code::M, 117));
        assert_eq!(b.text(), Some("Hello World"));

        let b = parse(&with_checksum("N3 M23 part.gco")).unwrap();
        assert!(b.is(Code::M, 23));
        assert_eq!(b.text(), Some("part.gco"));

        // X here belongs to the message, not an axis.
        let b = parse("M117 X marks the spot").unwrap();
        assert!(!b.update_mask.any_axis());
        assert_eq!(b.text(), Some("X marks the spot"));

        let b = parse("M26 S100").unwrap();
        assert_eq!(b.text(), None);
        assert_eq!(b.s, 100.0);
    }

    #[test]
    fn units_and_offsets_apply_at_parse_time() {
        let mut parser = Parser::new();
        parser.set_inches(true);
        let offsets = [1.0, 2.0, 3.0, 0.0];

        let b = parser.parse(b"G1 X1 Z1 F10", &offsets).unwrap();
        assert!((b.axis[0] - 26.4).abs() < 1e-4);
        assert!((b.axis[2] - 28.4).abs() < 1e-4);
        assert!((b.f - 254.0).abs() < 1e-3);

        // Set-position words stay in user units.
        let b = parser.parse(b"G92 X1", &offsets).unwrap();
        assert!((b.axis[0] - 25.4).abs() < 1e-4);

        parser.set_inches(false);
        parser.set_positioning(Positioning::Relative);
        let b = parser.parse(b"G1 X1", &offsets).unwrap();
        assert!(b.relative);
        assert_eq!(b.axis[0], 1.0);
    }

    #[test]
    fn overflowed_buffer_is_rejected() {
        let mut line = LineBuffer::new();
        for b in b"N5 G1 X1 " {
            line.push(*b);
        }
        for _ in 0..super::super::GCODE_LINE_MAX {
            line.push(b'0');
        }
        line.push(b'\n');
        let err = Parser::new().parse_buffer(&line, &ZERO).unwrap_err();
        assert!(matches!(err, ParseError::LineTooLong { line: 5, .. }));
    }
}
