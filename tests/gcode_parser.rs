// Parser behavior seen from outside the crate: checksums, classification, units

use brundle_rs::gcode::{Block, Code, LineBuffer, ParseError, Parser, Positioning, UpdateMask, checksum};
use brundle_rs::motion::AxisId;

const NO_OFFSET: [f32; 4] = [0.0; 4];

fn parse(parser: &Parser, line: &str) -> Result<Block, ParseError> {
    parser.parse(line.as_bytes(), &NO_OFFSET)
}

fn signed(body: &str) -> String {
    format!("{}*{}", body, checksum(body.as_bytes()))
}

#[test]
fn checksum_is_xor_of_bytes_before_star() {
    assert_eq!(checksum(b""), 0);
    assert_eq!(checksum(b"N1 G28"), b'N' ^ b'1' ^ b' ' ^ b'G' ^ b'2' ^ b'8');
    let parser = Parser::new();
    let block = parse(&parser, &signed("N1 G28")).unwrap();
    assert!(block.is(Code::G, 28));
    assert_eq!(block.num, Some(1));
}

#[test]
fn wrong_checksum_reports_line_for_resend() {
    let parser = Parser::new();
    let body = "N42 G1 X10 Y20";
    let bad = format!("{}*{}", body, checksum(body.as_bytes()).wrapping_add(1));
    match parse(&parser, &bad) {
        Err(ParseError::Checksum { line, .. }) => assert_eq!(line, 42),
        other => panic!("expected checksum error, got {:?}", other),
    }
}

#[test]
fn every_bit_flip_in_a_signed_line_is_caught() {
    let parser = Parser::new();
    let line = signed("N7 G1 X12.5 Y-3 F1500");
    let star = line.find('*').unwrap();
    for i in (0..line.len()).filter(|&i| i != star) {
        for bit in 0..8 {
            let mut bytes = line.clone().into_bytes();
            bytes[i] ^= 1 << bit;
            // A flip that opens a comment drops the checksum with it.
            if i < star && bytes[i] == b';' {
                continue;
            }
            assert!(
                parser.parse(&bytes, &NO_OFFSET).is_err(),
                "flip of bit {} at {} went unnoticed",
                bit,
                i
            );
        }
    }
}

#[test]
fn garbled_checksum_trailer_is_rejected() {
    let parser = Parser::new();
    for line in ["N7 G1 X10*x6", "N7 G1 X10*", "N7 G1 X10*1 6"] {
        match parser.parse(line.as_bytes(), &NO_OFFSET) {
            Err(ParseError::Checksum { line, .. }) => assert_eq!(line, 7),
            other => panic!("{:?} accepted as {:?}", line, other),
        }
    }
}

#[test]
fn buffered_and_immediate_classification() {
    let parser = Parser::new();
    for line in ["G0 X1", "G1 Y2", "G2 X1 I1", "G3 X1 J1", "G28", "G29", "G30", "G31", "G32", "T1"] {
        assert!(parse(&parser, line).unwrap().is_buffered(), "{} should queue", line);
    }
    for line in ["G4 P10", "G20", "G21", "G90", "G91", "G92 X0", "M0", "M17", "M112", "M114", "M115", "M999"] {
        assert!(!parse(&parser, line).unwrap().is_buffered(), "{} should run at once", line);
    }
}

#[test]
fn inch_mode_scales_axes_and_feed() {
    let mut parser = Parser::new();
    parser.set_inches(true);
    let block = parse(&parser, "G1 X1 Y-2 F10 P3").unwrap();
    assert!((block.axis[AxisId::X.index()] - 25.4).abs() < 1e-4);
    assert!((block.axis[AxisId::Y.index()] + 50.8).abs() < 1e-4);
    assert!((block.f - 254.0).abs() < 1e-3);
    // Tool parameters are not lengths.
    assert_eq!(block.p, 3.0);
}

#[test]
fn relative_mode_is_captured_per_block() {
    let mut parser = Parser::new();
    parser.set_positioning(Positioning::Relative);
    let offsets = [100.0, 0.0, 0.0, 0.0];
    let block = parser.parse(b"G1 X5", &offsets).unwrap();
    assert!(block.relative);
    // Offsets only apply to absolute targets.
    assert_eq!(block.axis[0], 5.0);
    parser.set_positioning(Positioning::Absolute);
    let block = parser.parse(b"G1 X5", &offsets).unwrap();
    assert!(!block.relative);
    assert_eq!(block.axis[0], 105.0);
}

#[test]
fn file_commands_keep_their_argument() {
    let parser = Parser::new();
    let block = parse(&parser, "M23 job-42.gcode").unwrap();
    assert!(block.has(UpdateMask::STRING));
    assert_eq!(block.text(), Some("job-42.gcode"));

    let block = parse(&parser, "M117 Hello, X1 Y2").unwrap();
    assert_eq!(block.text(), Some("Hello, X1 Y2"));
    assert!(!block.update_mask.any_axis());
}

#[test]
fn streamed_bytes_become_lines() {
    let parser = Parser::new();
    let mut line = LineBuffer::new();
    let mut blocks = Vec::new();
    for &b in b"\r\n  G28 X\r\nM114\nG1 X-1.5 ; go\n" {
        if line.push(b) {
            blocks.push(parser.parse_buffer(&line, &NO_OFFSET).unwrap());
            line.clear();
        }
    }
    assert_eq!(blocks.len(), 3);
    assert!(blocks[0].is(Code::G, 28));
    assert!(blocks[1].is(Code::M, 114));
    assert_eq!(blocks[2].axis[0], -1.5);
}

#[test]
fn garbage_never_panics() {
    let parser = Parser::new();
    for line in ["", "*", "**12", "G", "X--.-.5", "N*3", "GGGG1", ";;;", "M23", "\u{7f}\u{1}", "G1 X1e9999"] {
        let _ = parse(&parser, line);
    }
}
