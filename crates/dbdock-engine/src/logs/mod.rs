//! Container log ingestion: wire decoding, line assembly, bounded storage and
//! the per-instance streaming tasks that tie them together.

mod frame;
mod lines;
mod ring;
mod store;
mod stream;

pub use frame::{encode_frame, Frame, FrameAnomaly, FrameDemuxer, FrameError, StreamSource, HEADER_LEN, MAX_FRAME_LEN};
pub use lines::LineAssembler;
pub use ring::RingBuffer;
pub use store::LogStore;
pub use stream::{CancelToken, LogStreamManager, StreamEnd, StreamInfo};
