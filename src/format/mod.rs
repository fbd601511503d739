//! On-disk byte formats for segment files.
//!
//! All serialization lives here, separate from the operational logic that
//! manages segments. Multi-byte integers are little-endian throughout.
//!
//! - `frame`: length-prefixed frames (entry, index, commit) with 8-byte
//!   alignment padding and a payload checksum
//! - `header`: the fixed segment file header

pub(crate) mod frame;
pub(crate) mod header;

pub(crate) use frame::{
    decode_index_payload, encoded_frame_size, read_frame_header, verify_payload,
    write_commit_frame, write_frame, write_index_frame, FrameHeader, FrameType, FRAME_HEADER_LEN,
};
pub(crate) use header::{
    read_file_header, validate_file_header, write_file_header, FILE_HEADER_LEN,
};
