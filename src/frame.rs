//! FRN20 response frames
//!
//! All multi-byte fields are big endian and every frame ends with a
//! [`crc8`](crate::crc::crc8) over the bytes before it.
//!
//! Flow frame (5 bytes):
//! - 0..2: raw flow count
//! - 2..4: reserved
//! - 4: CRC
//!
//! Parameter frame (41 bytes):
//! - 4..6: unit code
//! - 6..8: full-scale range
//! - 8..10: zero offset
//! - 10..12: medium conversion coefficient
//! - 16..20: minimum output voltage (mV)
//! - 20..24: maximum output voltage (mV)
//! - 29..33: product id, ASCII
//! - 40: CRC
//!
//! The remaining bytes are reserved.

use crate::crc::crc8;

/// Length of the flow frame
pub const FLOW_FRAME_LEN: usize = 5;

/// Length of the parameter frame
pub const PARAM_FRAME_LEN: usize = 41;

/// Product id storage, ASCII plus a NUL terminator
pub const PRODUCT_ID_LEN: usize = 5;

const UNIT_OFFSET: usize = 4;
const RANGE_OFFSET: usize = 6;
const ZERO_OFFSET: usize = 8;
const COEFF_OFFSET: usize = 10;
const VOUT_MIN_OFFSET: usize = 16;
const VOUT_MAX_OFFSET: usize = 20;
const PRODUCT_ID_OFFSET: usize = 29;

/// Frame decoding error
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Trailing CRC does not match the frame contents
    CrcMismatch {
        /// CRC carried by the frame
        expected: u8,
        /// CRC computed over the frame
        computed: u8,
    },
    /// Unit code other than mL/min or L/min
    InvalidUnit(u16),
    /// Medium coefficient of zero, the flow cannot be scaled
    ZeroCoefficient,
}

/// Flow unit reported by the sensor
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Unit {
    MilliLitersPerMinute = 0x15,
    LitersPerMinute = 0x16,
}

impl Unit {
    /// Code used in the parameter frame
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Unit::MilliLitersPerMinute => "mL/min",
            Unit::LitersPerMinute => "L/min",
        }
    }
}

impl TryFrom<u16> for Unit {
    type Error = FrameError;

    fn try_from(code: u16) -> Result<Self, FrameError> {
        match code {
            0x15 => Ok(Unit::MilliLitersPerMinute),
            0x16 => Ok(Unit::LitersPerMinute),
            other => Err(FrameError::InvalidUnit(other)),
        }
    }
}

/// Calibration parameters read from the sensor
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Params {
    pub unit: Unit,
    /// Full-scale range in `unit`
    pub range: u16,
    /// Raw count at zero flow
    pub offset: u16,
    /// Raw counts per `unit`
    pub medium_coeff: u16,
    pub vout_min_mv: u32,
    pub vout_max_mv: u32,
    /// ASCII, NUL terminated
    pub product_id: [u8; PRODUCT_ID_LEN],
    /// CRC byte the frame carried
    pub crc: u8,
}

impl Params {
    /// Product id as text, `None` if it is not ASCII
    pub fn product_id(&self) -> Option<&str> {
        let end = self
            .product_id
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PRODUCT_ID_LEN);
        let id = &self.product_id[..end];
        if id.is_ascii() {
            core::str::from_utf8(id).ok()
        } else {
            None
        }
    }

    /// Scale a raw flow count with these parameters
    pub fn mass_flow(&self, raw: u16) -> Result<f32, FrameError> {
        mass_flow(raw, self)
    }
}

#[inline]
fn be_u16(frame: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([frame[at], frame[at + 1]])
}

#[inline]
fn be_u32(frame: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]])
}

/// Check the trailing CRC of `frame`. Empty frames pass.
pub fn verify(frame: &[u8]) -> Result<(), FrameError> {
    let Some((&expected, body)) = frame.split_last() else {
        return Ok(());
    };
    let computed = crc8(body);
    if computed == expected {
        Ok(())
    } else {
        Err(FrameError::CrcMismatch { expected, computed })
    }
}

/// Write the CRC of everything before the last byte into the last byte
pub fn seal(frame: &mut [u8]) {
    if let Some((last, body)) = frame.split_last_mut() {
        *last = crc8(body);
    }
}

/// Decode a parameter frame.
///
/// Rejects frames with a bad CRC and frames whose unit code is unknown.
pub fn decode_params(frame: &[u8; PARAM_FRAME_LEN]) -> Result<Params, FrameError> {
    verify(frame)?;

    let unit = Unit::try_from(be_u16(frame, UNIT_OFFSET))?;

    let mut product_id = [0u8; PRODUCT_ID_LEN];
    product_id[..PRODUCT_ID_LEN - 1]
        .copy_from_slice(&frame[PRODUCT_ID_OFFSET..PRODUCT_ID_OFFSET + PRODUCT_ID_LEN - 1]);

    Ok(Params {
        unit,
        range: be_u16(frame, RANGE_OFFSET),
        offset: be_u16(frame, ZERO_OFFSET),
        medium_coeff: be_u16(frame, COEFF_OFFSET),
        vout_min_mv: be_u32(frame, VOUT_MIN_OFFSET),
        vout_max_mv: be_u32(frame, VOUT_MAX_OFFSET),
        product_id,
        crc: frame[PARAM_FRAME_LEN - 1],
    })
}

/// Decode a flow frame into the raw flow count
pub fn decode_flow(frame: &[u8; FLOW_FRAME_LEN]) -> Result<u16, FrameError> {
    verify(frame)?;
    Ok(be_u16(frame, 0))
}

/// `(raw - offset) / medium_coeff`
pub fn mass_flow(raw: u16, params: &Params) -> Result<f32, FrameError> {
    if params.medium_coeff == 0 {
        return Err(FrameError::ZeroCoefficient);
    }
    let delta = i32::from(raw) - i32::from(params.offset);
    Ok(delta as f32 / f32::from(params.medium_coeff))
}

/// Build a parameter frame. The CRC is computed, `params.crc` is ignored.
pub fn encode_params(params: &Params) -> [u8; PARAM_FRAME_LEN] {
    let mut frame = [0u8; PARAM_FRAME_LEN];
    frame[UNIT_OFFSET..UNIT_OFFSET + 2].copy_from_slice(&params.unit.code().to_be_bytes());
    frame[RANGE_OFFSET..RANGE_OFFSET + 2].copy_from_slice(&params.range.to_be_bytes());
    frame[ZERO_OFFSET..ZERO_OFFSET + 2].copy_from_slice(&params.offset.to_be_bytes());
    frame[COEFF_OFFSET..COEFF_OFFSET + 2].copy_from_slice(&params.medium_coeff.to_be_bytes());
    frame[VOUT_MIN_OFFSET..VOUT_MIN_OFFSET + 4].copy_from_slice(&params.vout_min_mv.to_be_bytes());
    frame[VOUT_MAX_OFFSET..VOUT_MAX_OFFSET + 4].copy_from_slice(&params.vout_max_mv.to_be_bytes());
    frame[PRODUCT_ID_OFFSET..PRODUCT_ID_OFFSET + PRODUCT_ID_LEN - 1]
        .copy_from_slice(&params.product_id[..PRODUCT_ID_LEN - 1]);
    seal(&mut frame);
    frame
}

/// Build a flow frame carrying `raw`
pub fn encode_flow(raw: u16) -> [u8; FLOW_FRAME_LEN] {
    let mut frame = [0u8; FLOW_FRAME_LEN];
    frame[..2].copy_from_slice(&raw.to_be_bytes());
    seal(&mut frame);
    frame
}
