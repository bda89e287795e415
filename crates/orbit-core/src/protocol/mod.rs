//! Device wire protocol: report codec, feature table, request tags.

pub mod features;
pub mod frame;
pub mod table;
pub mod tag;

pub use frame::{decode_report, DeviceErrorCode, Frame, InboundFrame, MalformedFrame, ReportKind};
pub use table::FeatureTable;
pub use tag::TagAllocator;
