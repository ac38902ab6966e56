//! IMEI login frame codec (C2, §4.2).

use super::framing::FramingBuffer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImeiResult {
    NeedMore,
    Frame { digits: String, consumed: usize },
    /// The length prefix is out of the 15-17 range: this isn't an IMEI frame.
    NotImei,
    Malformed,
}

const MIN_IMEI_LEN: u16 = 15;
const MAX_IMEI_LEN: u16 = 17;

/// Try-parse order per §4.2: only attempted once, at session start.
pub fn try_parse_imei(buf: &FramingBuffer) -> ImeiResult {
    if buf.len() < 2 {
        return ImeiResult::NeedMore;
    }
    let n = buf.read_u16_be(0).expect("checked len >= 2");
    if !(MIN_IMEI_LEN..=MAX_IMEI_LEN).contains(&n) {
        return ImeiResult::NotImei;
    }
    let n = n as usize;
    if buf.len() < 2 + n {
        return ImeiResult::NeedMore;
    }
    let digits_bytes = buf.peek(2, n).expect("checked len >= 2+n");
    if !digits_bytes.iter().all(|b| b.is_ascii_digit()) {
        return ImeiResult::Malformed;
    }
    let digits = String::from_utf8(digits_bytes.to_vec()).expect("validated ascii digits");
    ImeiResult::Frame {
        digits,
        consumed: 2 + n,
    }
}
