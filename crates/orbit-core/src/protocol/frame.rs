//! Binary codec for the device's fixed-size report protocol.
//!
//! Wire format (both directions):
//! ```text
//! [report_id:1][device_index:1][feature_index:1][function<<4 | sw_id:1][params:N]
//! ```
//! Two report sizes exist: short reports (report id `0x10`, 3 parameter bytes,
//! 7 bytes total) and long reports (report id `0x11`, 16 parameter bytes,
//! 20 bytes total).  There is no length field – the report id alone determines
//! the frame length.
//!
//! The software-id nibble (`sw_id`) is the correlation tag: requests carry a
//! tag in `1..=15` and the device echoes it in the response.  Unsolicited
//! notifications (battery events, host changes, diverted buttons) arrive with
//! `sw_id == 0`, which is why tag 0 is never allocated to a request.
//!
//! A device-side failure is reported as a frame whose `feature_index` is
//! `0xFF`; the original feature index, function/tag byte, and an error code
//! follow in the parameter area.
//!
//! Decoding never panics: every inconsistency is returned as a typed
//! [`MalformedFrame`] so a corrupt or spoofed report can be logged and dropped
//! without taking the session down.

use thiserror::Error;

/// Report id of a short (7-byte) report.
pub const SHORT_REPORT_ID: u8 = 0x10;
/// Report id of a long (20-byte) report.
pub const LONG_REPORT_ID: u8 = 0x11;

/// Total length of a short report.
pub const SHORT_REPORT_LEN: usize = 7;
/// Total length of a long report.
pub const LONG_REPORT_LEN: usize = 20;

/// Parameter bytes carried by a short report.
pub const SHORT_PARAM_LEN: usize = 3;
/// Parameter bytes carried by a long report.
pub const LONG_PARAM_LEN: usize = 16;

/// `feature_index` value marking a device error report.
pub const ERROR_FEATURE_INDEX: u8 = 0xFF;

/// Software id reserved for unsolicited notifications.
pub const NOTIFICATION_SW_ID: u8 = 0;

/// Errors produced when an inbound byte sequence is not a valid report.
///
/// All variants are recoverable: the caller logs and drops the frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedFrame {
    /// The buffer is empty; not even a report id is present.
    #[error("empty frame")]
    Empty,

    /// The first byte is not a known report id.
    #[error("unknown report id 0x{0:02X}")]
    UnknownReportId(u8),

    /// The buffer is shorter than the length its report id demands.
    #[error("report 0x{report:02X} needs {needed} bytes, got {available}")]
    Truncated {
        report: u8,
        needed: usize,
        available: usize,
    },

    /// The buffer is longer than the length its report id demands.
    ///
    /// Reports are fixed-size; trailing bytes mean the frame boundary was
    /// lost, so the whole buffer is rejected rather than silently split.
    #[error("report 0x{report:02X} is {needed} bytes, got {available} (trailing data)")]
    TrailingData {
        report: u8,
        needed: usize,
        available: usize,
    },
}

/// Which of the two fixed report sizes a frame uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// 7-byte report, 3 parameter bytes.
    Short,
    /// 20-byte report, 16 parameter bytes.
    Long,
}

impl ReportKind {
    /// The report id byte for this kind.
    pub fn report_id(self) -> u8 {
        match self {
            ReportKind::Short => SHORT_REPORT_ID,
            ReportKind::Long => LONG_REPORT_ID,
        }
    }

    /// Total encoded length for this kind.
    pub fn total_len(self) -> usize {
        match self {
            ReportKind::Short => SHORT_REPORT_LEN,
            ReportKind::Long => LONG_REPORT_LEN,
        }
    }

    /// Number of parameter bytes carried by this kind.
    pub fn param_len(self) -> usize {
        match self {
            ReportKind::Short => SHORT_PARAM_LEN,
            ReportKind::Long => LONG_PARAM_LEN,
        }
    }

    /// Picks the smallest report kind that can carry `param_count` bytes.
    pub fn for_params(param_count: usize) -> ReportKind {
        if param_count <= SHORT_PARAM_LEN {
            ReportKind::Short
        } else {
            ReportKind::Long
        }
    }
}

/// One protocol frame in either direction.
///
/// Parameters are stored in a fixed 16-byte array; a short report only uses
/// the first three bytes and the remainder must be zero for the re-encoding
/// round trip to be byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub report: ReportKind,
    /// Receiver slot (0x01..0x06) or 0xFF for a directly attached device.
    pub device_index: u8,
    /// Per-session feature index from the feature table.
    pub feature_index: u8,
    /// Function number within the feature (upper nibble on the wire).
    pub function: u8,
    /// Correlation tag (lower nibble on the wire); 0 for notifications.
    pub sw_id: u8,
    pub params: [u8; LONG_PARAM_LEN],
}

impl Frame {
    /// Builds an outbound request frame, choosing the report size from the
    /// parameter count.  Parameters beyond what the chosen report carries are
    /// truncated by `params.len()` having already been bounded by the caller;
    /// the function/tag nibbles are masked to 4 bits.
    pub fn request(device_index: u8, feature_index: u8, function: u8, sw_id: u8, params: &[u8]) -> Frame {
        let report = ReportKind::for_params(params.len());
        let mut buf = [0u8; LONG_PARAM_LEN];
        let len = params.len().min(report.param_len());
        buf[..len].copy_from_slice(&params[..len]);
        Frame {
            report,
            device_index,
            feature_index,
            function: function & 0x0F,
            sw_id: sw_id & 0x0F,
            params: buf,
        }
    }

    /// Encodes this frame to its fixed-size wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.report.total_len());
        buf.push(self.report.report_id());
        buf.push(self.device_index);
        buf.push(self.feature_index);
        buf.push((self.function << 4) | (self.sw_id & 0x0F));
        buf.extend_from_slice(&self.params[..self.report.param_len()]);
        buf
    }
}

/// Error codes a device embeds in an error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    NoError,
    UnknownFunction,
    FunctionNotAvailable,
    InvalidArgument,
    NotSupported,
    OutOfRange,
    Busy,
    ConnectionFailed,
    InvalidAddress,
    /// A code outside the documented table; the raw value is preserved.
    Other(u8),
}

impl DeviceErrorCode {
    pub fn from_raw(code: u8) -> DeviceErrorCode {
        match code {
            0x00 => DeviceErrorCode::NoError,
            0x01 => DeviceErrorCode::UnknownFunction,
            0x02 => DeviceErrorCode::FunctionNotAvailable,
            0x03 => DeviceErrorCode::InvalidArgument,
            0x04 => DeviceErrorCode::NotSupported,
            0x05 => DeviceErrorCode::OutOfRange,
            0x06 => DeviceErrorCode::Busy,
            0x07 => DeviceErrorCode::ConnectionFailed,
            0x08 => DeviceErrorCode::InvalidAddress,
            other => DeviceErrorCode::Other(other),
        }
    }
}

/// A decoded inbound frame, classified by what it means to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Echo of a request: `sw_id` is the tag the request carried.
    Response(Frame),
    /// Unsolicited device event (`sw_id == 0`).
    Notification(Frame),
    /// The device rejected a request.
    DeviceError {
        device_index: u8,
        /// Feature index of the request that failed.
        feature_index: u8,
        /// Function nibble of the request that failed.
        function: u8,
        /// Tag of the request that failed, so it can be matched in-flight.
        sw_id: u8,
        code: DeviceErrorCode,
    },
}

/// Decodes one inbound report.
///
/// The buffer must contain exactly one report: the report id byte determines
/// the expected length and both a short buffer and trailing bytes are
/// rejected.  A decoded frame re-encodes to bytes identical to the input.
///
/// # Errors
///
/// Returns [`MalformedFrame`] if the bytes cannot be a valid report.
pub fn decode_report(bytes: &[u8]) -> Result<InboundFrame, MalformedFrame> {
    let report_id = *bytes.first().ok_or(MalformedFrame::Empty)?;
    let report = match report_id {
        SHORT_REPORT_ID => ReportKind::Short,
        LONG_REPORT_ID => ReportKind::Long,
        other => return Err(MalformedFrame::UnknownReportId(other)),
    };

    let needed = report.total_len();
    if bytes.len() < needed {
        return Err(MalformedFrame::Truncated {
            report: report_id,
            needed,
            available: bytes.len(),
        });
    }
    if bytes.len() > needed {
        return Err(MalformedFrame::TrailingData {
            report: report_id,
            needed,
            available: bytes.len(),
        });
    }

    let device_index = bytes[1];
    let feature_index = bytes[2];
    let function = bytes[3] >> 4;
    let sw_id = bytes[3] & 0x0F;

    if feature_index == ERROR_FEATURE_INDEX {
        // Error report layout: byte 3 is the failed request's feature index,
        // byte 4 its function/tag byte, byte 5 the error code.
        return Ok(InboundFrame::DeviceError {
            device_index,
            feature_index: bytes[3],
            function: bytes[4] >> 4,
            sw_id: bytes[4] & 0x0F,
            code: DeviceErrorCode::from_raw(bytes[5]),
        });
    }

    let mut params = [0u8; LONG_PARAM_LEN];
    params[..report.param_len()].copy_from_slice(&bytes[4..needed]);

    let frame = Frame {
        report,
        device_index,
        feature_index,
        function,
        sw_id,
        params,
    };

    if sw_id == NOTIFICATION_SW_ID {
        Ok(InboundFrame::Notification(frame))
    } else {
        Ok(InboundFrame::Response(frame))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
