//!
//! Splitting a multi-frame transfer's payload and CRC into the byte sequences for each frame
//!

use alloc::vec::Vec;

use canadensis_core::TransferId;

use crate::data::{make_tail_byte, round_frame_payload_up};

/// One frame's worth of bytes (not including the tail byte) and whether it is the last frame of
/// the transfer
struct Chunk<'a> {
    bytes: &'a [u8],
    padding: usize,
    end_of_transfer: bool,
}

/// Splits `payload` and its trailing 2-byte transfer CRC (low byte first) into the frame
/// payloads (including tail bytes) of a multi-frame transfer
///
/// Frames before the last are always exactly `presentation_mtu` content bytes long and need no
/// padding. The last frame holds whatever payload and/or CRC bytes remain, padded with zeros up
/// to its DLC bucket; when real payload bytes and CRC bytes land in the same last frame, the
/// padding sits between them, not after the CRC.
pub fn build_frames(
    payload: &[u8],
    crc_bytes: [u8; 2],
    presentation_mtu: usize,
    transfer_id: TransferId,
) -> Vec<(Vec<u8>, bool)> {
    let mut offset = 0;
    let mut crc_emitted = 0;
    let mut chunks: Vec<Vec<u8>> = Vec::new();

    while (payload.len() - offset) + (2 - crc_emitted) > presentation_mtu {
        let take_payload = presentation_mtu.min(payload.len() - offset);
        let take_crc = presentation_mtu - take_payload;
        let mut data = Vec::with_capacity(presentation_mtu);
        data.extend_from_slice(&payload[offset..offset + take_payload]);
        data.extend_from_slice(&crc_bytes[crc_emitted..crc_emitted + take_crc]);
        offset += take_payload;
        crc_emitted += take_crc;
        chunks.push(data);
    }

    let remaining_payload = &payload[offset..];
    let remaining_crc = &crc_bytes[crc_emitted..];
    let content_len = remaining_payload.len() + remaining_crc.len();
    let bucket = round_frame_payload_up(content_len + 1);
    let padding = bucket - 1 - content_len;
    let mut last = Vec::with_capacity(bucket - 1);
    last.extend_from_slice(remaining_payload);
    last.resize(last.len() + padding, 0);
    last.extend_from_slice(remaining_crc);
    chunks.push(last);

    let last_index = chunks.len() - 1;
    let mut toggle = true;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, mut data)| {
            let sof = i == 0;
            let eof = i == last_index;
            data.push(make_tail_byte(sof, eof, toggle, transfer_id));
            toggle = !toggle;
            (data, eof)
        })
        .collect()
}
