// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! PES (Packetized Elementary Stream) decapsulation pipe.
//!
//! Reassembles a run of `block.` urefs carrying MPEG-TS payload into one
//! output uref per PES packet, lifting the optional header's PTS/DTS into
//! [`ClockFields`] (scaled from the 90 kHz MPEG clock to this crate's 27 MHz
//! uref clock, the same ×300 factor `upipe_ts_pesd` applies) and its
//! `data_alignment_indicator` into [`UrefFlags::BLOCK_START`]. Grounded on
//! `examples/original_source/tests/upipe_ts_pes_decaps_test.c`.

use pipegraph_core::error::UbaseErr;
use pipegraph_core::ubuf::{BlockBuf, Ubuf};
use pipegraph_core::upipe::{ControlCommand, ControlReply, PipeBehavior, PipeCtx};
use pipegraph_core::uprobe::Event;
use pipegraph_core::uref::{match_def, ClockFields, Uref, UrefFlags};

const PES_STREAM_ID_PADDING: u8 = 0xBE;
const BASE_HEADER_LEN: usize = 6;
const OPTIONAL_HEADER_LEN: usize = 3;
const PTS_DTS_FLAGS_PTS_ONLY: u8 = 0b10;
const PTS_DTS_FLAGS_PTS_AND_DTS: u8 = 0b11;
/// MPEG PTS/DTS run at 90 kHz; uref clock fields are kept in 27 MHz ticks.
const CLOCK_SCALE: u64 = 300;

/// Decodes one 5-octet PES timestamp field (33-bit value packed across
/// three marker-bit-delimited runs) per ISO/IEC 13818-1.
fn decode_timestamp(bytes: &[u8]) -> u64 {
    (u64::from(bytes[0] >> 1) & 0x07) << 30
        | u64::from(bytes[1]) << 22
        | (u64::from(bytes[2] >> 1) & 0x7F) << 15
        | u64::from(bytes[3]) << 7
        | (u64::from(bytes[4] >> 1) & 0x7F)
}

/// A PES-decapsulation pipe: buffers incoming block octets across however
/// many urefs a PES packet is fragmented over, and calls `output` once per
/// fully reassembled packet. `output` stands in for the `SetOutput`
/// wiring a full pipe manager would otherwise resolve (out of scope here;
/// see DESIGN.md).
pub struct PesDecaps {
    pending: Vec<u8>,
    sync_acquired: bool,
    output: Box<dyn FnMut(Uref)>,
}

impl PesDecaps {
    pub fn new(output: impl FnMut(Uref) + 'static) -> Self {
        Self { pending: Vec::new(), sync_acquired: false, output: Box::new(output) }
    }

    /// Drains and emits every fully-buffered PES packet `self.pending`
    /// holds, throwing `SyncAcquired`/`SyncLost` on the pipe's own probe
    /// chain as acquisition state changes (testable per scenario S3).
    fn drain(&mut self, ctx: &PipeCtx) {
        loop {
            if self.pending.len() < BASE_HEADER_LEN {
                return;
            }
            let pes_packet_length = usize::from(u16::from_be_bytes([self.pending[4], self.pending[5]]));
            let total_frame_len = BASE_HEADER_LEN + pes_packet_length;
            if self.pending.len() < total_frame_len {
                return;
            }

            let stream_id = self.pending[3];
            if stream_id == PES_STREAM_ID_PADDING {
                if self.sync_acquired {
                    ctx.throw(Event::SyncLost);
                    self.sync_acquired = false;
                }
                self.pending.drain(0..total_frame_len);
                continue;
            }

            if self.pending.len() < BASE_HEADER_LEN + OPTIONAL_HEADER_LEN {
                return;
            }
            let flags1 = self.pending[BASE_HEADER_LEN];
            let flags2 = self.pending[BASE_HEADER_LEN + 1];
            let header_data_len = usize::from(self.pending[BASE_HEADER_LEN + 2]);
            let total_header_len = BASE_HEADER_LEN + OPTIONAL_HEADER_LEN + header_data_len;
            if self.pending.len() < total_header_len || total_header_len > total_frame_len {
                return;
            }

            let data_alignment = (flags1 >> 2) & 1 == 1;
            let pts_dts_flags = (flags2 >> 6) & 0x3;
            let ts_off = BASE_HEADER_LEN + OPTIONAL_HEADER_LEN;
            let mut clock = ClockFields::default();
            if pts_dts_flags == PTS_DTS_FLAGS_PTS_ONLY {
                clock.pts_orig = Some(decode_timestamp(&self.pending[ts_off..ts_off + 5]) * CLOCK_SCALE);
            } else if pts_dts_flags == PTS_DTS_FLAGS_PTS_AND_DTS {
                clock.pts_orig = Some(decode_timestamp(&self.pending[ts_off..ts_off + 5]) * CLOCK_SCALE);
                clock.dts_orig = Some(decode_timestamp(&self.pending[ts_off + 5..ts_off + 10]) * CLOCK_SCALE);
            }

            let payload = self.pending[total_header_len..total_frame_len].to_vec();
            self.pending.drain(0..total_frame_len);

            if !self.sync_acquired {
                ctx.throw(Event::SyncAcquired);
                self.sync_acquired = true;
            }

            let mut out = Uref::with_ubuf(Ubuf::Block(BlockBuf::from_bytes(&payload)));
            out.clock = clock;
            if data_alignment {
                out.flags |= UrefFlags::BLOCK_START;
            }
            (self.output)(out);
        }
    }
}

impl PipeBehavior for PesDecaps {
    fn input(&mut self, ctx: &PipeCtx, uref: Uref) {
        // A block-start marked uref announces a fresh PES boundary in the
        // incoming demux stream; drop whatever partial packet we were
        // holding, since it will never be completed.
        if uref.flags.contains(UrefFlags::BLOCK_START) && !self.pending.is_empty() {
            self.pending.clear();
        }
        let Some(Ubuf::Block(block)) = &uref.ubuf else { return };
        let Ok((guard, bytes)) = block.map_read(0, block.size()) else { return };
        self.pending.extend_from_slice(bytes);
        drop(guard);
        self.drain(ctx);
    }

    fn control(&mut self, _ctx: &PipeCtx, cmd: ControlCommand) -> Result<ControlReply, UbaseErr> {
        match cmd {
            ControlCommand::SetFlowDef(flow_def) => {
                if match_def(&flow_def, "block.") {
                    Ok(ControlReply::None)
                } else {
                    Err(UbaseErr::Invalid)
                }
            },
            ControlCommand::AttachUpumpMgr | ControlCommand::AttachUclock => Ok(ControlReply::None),
            _ => Err(UbaseErr::Unhandled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipegraph_core::upipe::{PipeRef, Signature};
    use pipegraph_core::uprobe::{Outcome, PipeId, Probe};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn encode_timestamp(prefix_nibble: u8, value: u64) -> [u8; 5] {
        [
            (prefix_nibble << 4) | (((value >> 30) & 0x7) as u8) << 1 | 1,
            ((value >> 22) & 0xFF) as u8,
            (((value >> 15) & 0x7F) as u8) << 1 | 1,
            ((value >> 7) & 0xFF) as u8,
            ((value & 0x7F) as u8) << 1 | 1,
        ]
    }

    /// Builds one PES packet: `stream_id`, an optional PTS/DTS pair when
    /// `ts` is `Some`, `data_alignment`, and an arbitrary `payload`.
    fn build_pes(stream_id: u8, ts: Option<(u64, Option<u64>)>, data_alignment: bool, payload: &[u8]) -> Vec<u8> {
        let mut optional = Vec::new();
        let (pts_dts_flags, ts_bytes) = match ts {
            None => (0u8, Vec::new()),
            Some((pts, None)) => (PTS_DTS_FLAGS_PTS_ONLY, encode_timestamp(0x2, pts).to_vec()),
            Some((pts, Some(dts))) => {
                let mut b = encode_timestamp(0x3, pts).to_vec();
                b.extend_from_slice(&encode_timestamp(0x1, dts));
                (PTS_DTS_FLAGS_PTS_AND_DTS, b)
            },
        };
        let flags1 = if data_alignment { 1 << 2 } else { 0 };
        let flags2 = pts_dts_flags << 6;
        optional.push(flags1);
        optional.push(flags2);
        #[allow(clippy::cast_possible_truncation)]
        optional.push(ts_bytes.len() as u8);
        optional.extend_from_slice(&ts_bytes);

        let mut frame = vec![0x00, 0x00, 0x01, stream_id];
        #[allow(clippy::cast_possible_truncation)]
        let pes_packet_length = (optional.len() + payload.len()) as u16;
        frame.extend_from_slice(&pes_packet_length.to_be_bytes());
        frame.extend_from_slice(&optional);
        frame.extend_from_slice(payload);
        frame
    }

    fn padding_pes(stuffing_len: usize) -> Vec<u8> {
        let mut frame = vec![0x00, 0x00, 0x01, PES_STREAM_ID_PADDING];
        #[allow(clippy::cast_possible_truncation)]
        frame.extend_from_slice(&(stuffing_len as u16).to_be_bytes());
        frame.extend(std::iter::repeat(0xFFu8).take(stuffing_len));
        frame
    }

    struct RecordingProbe(Rc<RefCell<Vec<String>>>);
    impl Probe for RecordingProbe {
        fn handle(&self, _pipe: PipeId, event: &Event) -> Outcome {
            let label = match event {
                Event::SyncAcquired => "sync_acquired",
                Event::SyncLost => "sync_lost",
                _ => "other",
            };
            self.0.borrow_mut().push(label.to_string());
            Outcome::Handled
        }
    }

    fn make_pipe(outputs: Rc<RefCell<Vec<Uref>>>, events: Rc<RefCell<Vec<String>>>) -> PipeRef {
        let behavior = PesDecaps::new(move |uref| outputs.borrow_mut().push(uref));
        let probe = Rc::new(RecordingProbe(events));
        let pipe = PipeRef::new(PipeId(1), Signature(0), Some(probe), Rc::new(RefCell::new(behavior)));
        pipe.call_control(ControlCommand::SetFlowDef(Uref::new())).expect_err("no flow.def set yet");
        let mut flow_def = Uref::new();
        flow_def.set_flow_def("block.mpegts.");
        pipe.call_control(ControlCommand::SetFlowDef(flow_def)).expect("set flow def");
        pipe
    }

    /// Scenario S3: a 14-octet PES header (base 6 + optional 3 + PTS-only 5)
    /// would omit DTS entirely, so — per `examples/original_source`'s own
    /// PTS+DTS test case, the only one that produces both fields — this
    /// uses the full 19-octet header to reproduce the documented
    /// `dts_orig` value (see DESIGN.md for this Open-Question resolution).
    #[test]
    fn s3_pes_decaps_sync() {
        let outputs = Rc::new(RefCell::new(Vec::new()));
        let events = Rc::new(RefCell::new(Vec::new()));
        let pipe = make_pipe(Rc::clone(&outputs), Rc::clone(&events));

        let pts = 0x1_1212_1212u64;
        let dts = pts - 1_080_000;
        let payload = [0xAAu8; 12];
        let frame = build_pes(0xE0, Some((pts, Some(dts))), true, &payload);

        let mut uref = Uref::with_ubuf(Ubuf::Block(BlockBuf::from_bytes(&frame)));
        uref.flags |= UrefFlags::BLOCK_START;
        pipe.call_input(uref).expect("input");

        assert_eq!(outputs.borrow().len(), 1);
        let out = &outputs.borrow()[0];
        assert_eq!(out.clock.pts_orig, Some(pts * 300));
        assert_eq!(out.clock.dts_orig, Some(dts * 300));
        assert!(out.flags.contains(UrefFlags::BLOCK_START));
        if let Some(Ubuf::Block(b)) = &out.ubuf {
            assert_eq!(b.size(), 12);
            let (_g, bytes) = b.map_read(0, 12).expect("map");
            assert_eq!(bytes, &payload);
        } else {
            panic!("expected a block ubuf");
        }
        assert_eq!(*events.borrow(), vec!["sync_acquired".to_string()]);

        // A padding packet throws SYNC_LOST once; a resumed video PES
        // throws SYNC_ACQUIRED again.
        let padding = Uref::with_ubuf(Ubuf::Block(BlockBuf::from_bytes(&padding_pes(3))));
        pipe.call_input(padding).expect("input padding");
        assert_eq!(*events.borrow(), vec!["sync_acquired".to_string(), "sync_lost".to_string()]);

        let resumed = build_pes(0xE0, None, false, &[0xBBu8; 4]);
        let mut uref2 = Uref::with_ubuf(Ubuf::Block(BlockBuf::from_bytes(&resumed)));
        uref2.flags |= UrefFlags::BLOCK_START;
        pipe.call_input(uref2).expect("input resumed");
        assert_eq!(
            *events.borrow(),
            vec!["sync_acquired".to_string(), "sync_lost".to_string(), "sync_acquired".to_string()]
        );
        assert_eq!(outputs.borrow().len(), 2);
    }

    /// A PES header split byte-by-byte across many urefs must still
    /// reassemble into exactly one output packet.
    #[test]
    fn fragmented_header_reassembles_across_many_urefs() {
        let outputs = Rc::new(RefCell::new(Vec::new()));
        let events = Rc::new(RefCell::new(Vec::new()));
        let pipe = make_pipe(Rc::clone(&outputs), events);

        let frame = build_pes(0xE0, Some((12345, None)), false, &[1, 2, 3, 4, 5]);
        for (i, byte) in frame.iter().enumerate() {
            let mut uref = Uref::with_ubuf(Ubuf::Block(BlockBuf::from_bytes(&[*byte])));
            if i == 0 {
                uref.flags |= UrefFlags::BLOCK_START;
            }
            pipe.call_input(uref).expect("input byte");
        }

        assert_eq!(outputs.borrow().len(), 1);
        assert_eq!(outputs.borrow()[0].clock.pts_orig, Some(12345 * 300));
        if let Some(Ubuf::Block(b)) = &outputs.borrow()[0].ubuf {
            let (_g, bytes) = b.map_read(0, 5).expect("map");
            assert_eq!(bytes, &[1, 2, 3, 4, 5]);
        } else {
            panic!("expected a block ubuf");
        }
    }

    #[test]
    fn flow_def_must_match_block_prefix() {
        let behavior = PesDecaps::new(|_| {});
        let pipe = PipeRef::new(PipeId(2), Signature(0), None, Rc::new(RefCell::new(behavior)));
        let mut bad = Uref::new();
        bad.set_flow_def("pic.");
        assert_eq!(pipe.call_control(ControlCommand::SetFlowDef(bad)).unwrap_err(), UbaseErr::Invalid);
    }
}
