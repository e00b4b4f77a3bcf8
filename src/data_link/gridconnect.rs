//! Gridconnect text encoding of CAN frames.
//!
//! A frame is written as `:` + type + hex identifier + `N` (or `R` for a
//! remote frame) + hex data + `;`, where type is `X` for a 29-bit and `S`
//! for an 11-bit identifier:
//!
//! ```text
//! :X195B4123N0102030405060708;
//! :S7FFR;
//! ```

use std::fmt::Write as _;

use crate::error::{LcbError, Result};
use crate::physical::can::{CanFrame, CAN_MAX_DLEN};

/// Frame start delimiter.
pub const GC_START: u8 = b':';
/// Frame end delimiter.
pub const GC_END: u8 = b';';

fn hex_value(c: u8) -> Option<u32> {
    (c as char).to_digit(16)
}

/// Parses the text between the delimiters of one gridconnect frame.
pub fn parse(text: &[u8]) -> Result<CanFrame> {
    let (&kind, rest) = text
        .split_first()
        .ok_or(LcbError::MalformedFrame("empty frame"))?;
    let (extended, max_id_digits) = match kind.to_ascii_uppercase() {
        b'X' => (true, 8),
        b'S' => (false, 3),
        _ => return Err(LcbError::MalformedFrame("unknown frame type")),
    };

    let split = rest
        .iter()
        .position(|c| matches!(c.to_ascii_uppercase(), b'N' | b'R'))
        .ok_or(LcbError::MalformedFrame("missing N/R separator"))?;
    let (id_digits, tail) = rest.split_at(split);
    let remote = tail[0].to_ascii_uppercase() == b'R';
    let data_digits = &tail[1..];

    if id_digits.is_empty() || id_digits.len() > max_id_digits {
        return Err(LcbError::MalformedFrame("bad identifier length"));
    }
    let mut id = 0u32;
    for &c in id_digits {
        let v = hex_value(c).ok_or(LcbError::MalformedFrame("bad hex digit in identifier"))?;
        id = (id << 4) | v;
    }

    if data_digits.len() % 2 != 0 {
        return Err(LcbError::MalformedFrame("odd number of data digits"));
    }
    if data_digits.len() / 2 > CAN_MAX_DLEN {
        return Err(LcbError::MalformedFrame("more than 8 data bytes"));
    }
    let mut data = [0u8; CAN_MAX_DLEN];
    for (i, pair) in data_digits.chunks_exact(2).enumerate() {
        let hi = hex_value(pair[0]).ok_or(LcbError::MalformedFrame("bad hex digit in data"))?;
        let lo = hex_value(pair[1]).ok_or(LcbError::MalformedFrame("bad hex digit in data"))?;
        data[i] = ((hi << 4) | lo) as u8;
    }
    let data = &data[..data_digits.len() / 2];

    let frame = if extended {
        CanFrame::new_extended(id, data)?
    } else {
        CanFrame::new_standard(id, data)?
    };
    Ok(if remote { frame.into_remote() } else { frame })
}

/// Renders a frame including both delimiters.
///
/// With `double_bytes` every character is emitted twice, as some serial
/// bridges expect.
pub fn render(frame: &CanFrame, double_bytes: bool) -> Vec<u8> {
    let mut text = String::with_capacity(28);
    text.push(GC_START as char);
    if frame.is_extended() {
        let _ = write!(text, "X{:08X}", frame.id());
    } else {
        let _ = write!(text, "S{:03X}", frame.id());
    }
    text.push(if frame.is_remote() { 'R' } else { 'N' });
    for b in frame.data() {
        let _ = write!(text, "{:02X}", b);
    }
    text.push(GC_END as char);

    if double_bytes {
        text.bytes().flat_map(|c| [c, c]).collect()
    } else {
        text.into_bytes()
    }
}
