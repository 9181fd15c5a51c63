// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Cross-blend audio-mixing pipe (bin/sub-pipe pattern, component J).
//!
//! A [`CrossBlend`] parent owns a list of [`CrossBlendInput`] sub-pipes, at
//! most two of which matter at a time: `current` (the active source) and
//! `previous` (the source being faded out). Allocating a new sub-pipe
//! demotes the existing `current` to `previous` — throwing `SinkEnd` on any
//! sub-pipe that was already `previous` — and resets the fade. Each uref
//! delivered to `current` is blended sample-by-sample against whatever
//! `previous` has retained (`dst = dst*crossblend + src*(1-crossblend)`,
//! where `dst` is `current` and `src` is `previous`, so the fade starts
//! almost entirely `previous` and ends almost entirely `current`;
//! `crossblend` stepping up by `step = UCLOCK_FREQ/rate/period` per sample
//! consumed) until `crossblend` reaches 1, at which point `previous`
//! receives its own `SinkEnd` and is dropped. Grounded on
//! `examples/original_source/lib/upipe-modules/upipe_cross_blend.c`.
//!
//! Two simplifications from the original (recorded in DESIGN.md): sample
//! rate, channel layout and fade period are fixed at [`CrossBlend::new`]
//! instead of renegotiated per sub-pipe at runtime, and output is a plain
//! `FnMut(Uref)` sink rather than a `SetOutput(PipeId)`-resolved pipe
//! reference, since `pipegraph-core` has no pipe-id registry to resolve
//! one against.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use pipegraph_core::error::UbaseErr;
use pipegraph_core::subpipe::SubPipeList;
use pipegraph_core::ubuf::{SampleFormat, SoundBuf, Ubuf};
use pipegraph_core::upipe::{ControlCommand, ControlReply, PipeBehavior, PipeCtx, PipeRef, Signature};
use pipegraph_core::uprobe::{Event, PipeId, Probe};
use pipegraph_core::uref::{match_def, Uref};

const CROSS_BLEND_SIGNATURE: Signature = Signature::from_fourcc(*b"xbln");
/// §3's clock domain frequency; the original's timestamps and this crate's
/// `ClockFields` share it.
const UCLOCK_FREQ: u64 = 27_000_000;
/// Default fade period: a fifth of a second, matching the original's
/// `CROSSBLEND_PERIOD`.
pub const CROSSBLEND_PERIOD: u64 = UCLOCK_FREQ / 5;

struct Slot {
    pipe: PipeRef,
    /// One ring buffer per channel, in arrival order. Only meaningful while
    /// this slot is `previous` — a `current` slot's queue is always empty.
    retained: Vec<VecDeque<f32>>,
}

struct CrossBlendShared {
    channels: Vec<String>,
    rate: u32,
    step: f64,
    crossblend: f64,
    current: Option<Slot>,
    previous: Option<Slot>,
    output: Box<dyn FnMut(Uref)>,
}

fn extract_samples(uref: &Uref, channels: &[String]) -> Option<Vec<Vec<f32>>> {
    let Ubuf::Sound(sound) = uref.ubuf.as_ref()? else { return None };
    channels
        .iter()
        .map(|ch| {
            let idx = sound.channels.iter().position(|c| c == ch)?;
            Some(sound.data[idx].chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect())
        })
        .collect()
}

fn build_sound_uref(channels: &[String], rate: u32, samples: &[Vec<f32>]) -> Uref {
    let n = samples.first().map_or(0, Vec::len);
    #[allow(clippy::cast_possible_truncation)]
    let mut sound = SoundBuf::alloc(channels.to_vec(), SampleFormat::F32, rate, n as u32, 4);
    for (i, ch) in channels.iter().enumerate() {
        let (_guard, buf) = sound.map_channel_write(ch).expect("channel was just allocated");
        for (j, v) in samples[i].iter().enumerate() {
            buf[j * 4..j * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
    }
    let mut uref = Uref::with_ubuf(Ubuf::Sound(sound));
    uref.set_flow_def("sound.f32.");
    uref
}

/// One input of a cross-blend: forwards to [`CrossBlend`]'s shared state,
/// which decides whether this sub-pipe is currently `current`, `previous`,
/// or neither (already superseded, and so silently dropped).
pub struct CrossBlendInput {
    shared: Rc<RefCell<CrossBlendShared>>,
}

impl PipeBehavior for CrossBlendInput {
    fn input(&mut self, ctx: &PipeCtx, uref: Uref) {
        let mut shared = self.shared.borrow_mut();
        let channels = shared.channels.clone();
        let Some(samples) = extract_samples(&uref, &channels) else { return };

        let is_current = shared.current.as_ref().is_some_and(|s| s.pipe.id() == ctx.id);
        if is_current {
            let n = samples.first().map_or(0, Vec::len);
            let mut out = vec![Vec::with_capacity(n); channels.len()];
            for i in 0..n {
                let have_previous_sample = shared.crossblend < 1.0
                    && shared.previous.as_ref().is_some_and(|p| p.retained[0].front().is_some());
                if have_previous_sample {
                    let crossblend = shared.crossblend;
                    for (c, out_c) in out.iter_mut().enumerate() {
                        let prev_sample = shared.previous.as_mut().expect("checked above").retained[c]
                            .pop_front()
                            .expect("checked above");
                        #[allow(clippy::cast_possible_truncation)]
                        let weight = crossblend as f32;
                        out_c.push(samples[c][i].mul_add(weight, prev_sample * (1.0 - weight)));
                    }
                    shared.crossblend += shared.step;
                    if shared.crossblend >= 1.0 {
                        if let Some(prev) = shared.previous.take() {
                            prev.pipe.throw(Event::SinkEnd);
                        }
                    }
                } else {
                    for (c, out_c) in out.iter_mut().enumerate() {
                        out_c.push(samples[c][i]);
                    }
                }
            }
            let rate = shared.rate;
            let result = build_sound_uref(&channels, rate, &out);
            (shared.output)(result);
        } else if shared.previous.as_ref().is_some_and(|s| s.pipe.id() == ctx.id) {
            if let Some(prev) = shared.previous.as_mut() {
                for (c, chan_samples) in samples.into_iter().enumerate() {
                    prev.retained[c].extend(chan_samples);
                }
            }
        }
        // Neither current nor previous: a sub-pipe superseded twice over.
        // Dropped, matching the original's silent-drop for a dead input.
    }

    fn control(&mut self, _ctx: &PipeCtx, cmd: ControlCommand) -> Result<ControlReply, UbaseErr> {
        match cmd {
            ControlCommand::SetFlowDef(flow_def) => {
                if match_def(&flow_def, "sound.f32.") {
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

/// The cross-blend parent: owns the shared fade state and the sub-pipe
/// list that keeps every allocated input alive.
pub struct CrossBlend {
    shared: Rc<RefCell<CrossBlendShared>>,
    sub_pipes: SubPipeList,
}

impl CrossBlend {
    #[must_use]
    pub fn new(channels: Vec<String>, rate: u32, period: u64, output: impl FnMut(Uref) + 'static) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let step = UCLOCK_FREQ as f64 / (f64::from(rate) * period as f64);
        let shared = CrossBlendShared {
            channels,
            rate,
            step,
            crossblend: 0.0,
            current: None,
            previous: None,
            output: Box::new(output),
        };
        Self { shared: Rc::new(RefCell::new(shared)), sub_pipes: SubPipeList::new() }
    }

    /// Allocates a new input sub-pipe. Demotes the existing `current` to
    /// `previous`, throwing `SinkEnd` first on any sub-pipe that was
    /// already `previous` (the original's allocation-time demotion rule).
    pub fn add_input(&mut self, id: PipeId, probe: Option<Rc<dyn Probe>>) -> PipeRef {
        let behavior = Rc::new(RefCell::new(CrossBlendInput { shared: Rc::clone(&self.shared) }));
        let pipe = PipeRef::new(id, CROSS_BLEND_SIGNATURE, probe, behavior);

        {
            let mut shared = self.shared.borrow_mut();
            let channel_count = shared.channels.len();
            if let Some(prev) = shared.previous.take() {
                prev.pipe.throw(Event::SinkEnd);
            }
            if let Some(cur) = shared.current.take() {
                shared.previous = Some(cur);
            }
            shared.current = Some(Slot { pipe: pipe.clone(), retained: vec![VecDeque::new(); channel_count] });
            shared.crossblend = 0.0;
        }

        self.sub_pipes.add(pipe.clone());
        pipe
    }

    #[must_use]
    pub fn input_count(&self) -> usize {
        self.sub_pipes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipegraph_core::uprobe::{Outcome, Probe};
    use std::cell::RefCell as StdRefCell;

    fn channels() -> Vec<String> {
        vec!["l".to_string(), "r".to_string()]
    }

    fn configure(pipe: &PipeRef) {
        let mut flow_def = Uref::new();
        flow_def.set_flow_def("sound.f32.");
        pipe.call_control(ControlCommand::SetFlowDef(flow_def)).expect("set flow def");
    }

    fn push_uref(pipe: &PipeRef, values: &[[f32; 2]]) {
        let l: Vec<f32> = values.iter().map(|v| v[0]).collect();
        let r: Vec<f32> = values.iter().map(|v| v[1]).collect();
        let uref = build_sound_uref(&channels(), 80, &[l, r]);
        pipe.call_input(uref).expect("input");
    }

    struct RecordingProbe(Rc<StdRefCell<Vec<(PipeId, String)>>>);
    impl Probe for RecordingProbe {
        fn handle(&self, pipe: PipeId, event: &Event) -> Outcome {
            if matches!(event, Event::SinkEnd) {
                self.0.borrow_mut().push((pipe, "sink_end".to_string()));
            }
            Outcome::Handled
        }
    }

    /// Scenario S4, first half: with no `previous`, input A passes straight
    /// through and the sink observes strictly decreasing values.
    #[test]
    fn solo_current_input_passes_through_unblended() {
        let outputs = Rc::new(RefCell::new(Vec::new()));
        let outputs_sink = Rc::clone(&outputs);
        let mut blend = CrossBlend::new(channels(), 80, CROSSBLEND_PERIOD, move |uref| outputs_sink.borrow_mut().push(uref));

        let a = blend.add_input(PipeId(1), None);
        configure(&a);

        for i in 0..5u32 {
            #[allow(clippy::cast_precision_loss)]
            let base = 1000.0 - (i * 4) as f32;
            push_uref(&a, &[[base, base + 100.0], [base - 1.0, base + 99.0], [base - 2.0, base + 98.0], [base - 3.0, base + 97.0]]);
        }

        let mut plane0 = Vec::new();
        for out in outputs.borrow().iter() {
            plane0.extend(extract_samples(out, &channels()).expect("sound")[0].clone());
        }
        assert_eq!(plane0.len(), 20);
        for w in plane0.windows(2) {
            assert!(w[0] > w[1], "expected strictly decreasing samples, got {w:?}");
        }
    }

    /// Scenario S4, second half: once B supersedes A, the sink observes
    /// cross-faded values strictly between A's and B's, and A emits
    /// `SinkEnd` exactly once, the moment `crossblend` reaches 1.
    #[test]
    fn cross_fade_blends_then_ends_previous_exactly_once() {
        const A_L: f32 = 500.0;
        const A_R: f32 = 600.0;
        const B_L: f32 = 2000.0;
        const B_R: f32 = 2100.0;

        let outputs = Rc::new(RefCell::new(Vec::new()));
        let outputs_sink = Rc::clone(&outputs);
        let events = Rc::new(StdRefCell::new(Vec::new()));
        let mut blend = CrossBlend::new(channels(), 80, CROSSBLEND_PERIOD, move |uref| outputs_sink.borrow_mut().push(uref));

        let a = blend.add_input(PipeId(1), Some(Rc::new(RecordingProbe(Rc::clone(&events)))));
        configure(&a);

        let b = blend.add_input(PipeId(2), Some(Rc::new(RecordingProbe(Rc::clone(&events)))));
        configure(&b);
        assert_eq!(blend.input_count(), 2);

        // Feed `a` (now `previous`) 16 retained samples up front, exactly
        // the count `step = 1/16` needs to drive crossblend from 0 to 1.
        for _ in 0..4 {
            push_uref(&a, &[[A_L, A_R]; 4]);
        }
        assert!(outputs.borrow().is_empty(), "previous-input pushes produce no output");

        let mut first_blended_l = None;
        let mut last_blended_l = None;
        for i in 0..5u32 {
            push_uref(&b, &[[B_L, B_R]; 4]);
            let out = outputs.borrow().last().cloned().expect("one output per current push");
            let samples = extract_samples(&out, &channels()).expect("sound");
            if i < 4 {
                for &v in &samples[0] {
                    assert!(v > A_L.min(B_L) && v < A_L.max(B_L), "sample {v} outside blend interval");
                }
                for &v in &samples[1] {
                    assert!(v > A_R.min(B_R) && v < A_R.max(B_R), "sample {v} outside blend interval");
                }
                if first_blended_l.is_none() {
                    first_blended_l = Some(samples[0][0]);
                }
                last_blended_l = Some(*samples[0].last().expect("non-empty"));
            } else {
                // Previous is exhausted and gone; pure passthrough of B.
                assert!(samples[0].iter().all(|&v| (v - B_L).abs() < f32::EPSILON));
            }
        }

        // The fade must trend from A toward B, not the reverse: the first
        // blended sample sits closer to A, the last blended sample closer
        // to B (`crossblend` only ever increases from 0 toward 1).
        let first = first_blended_l.expect("at least one blended sample");
        let last = last_blended_l.expect("at least one blended sample");
        assert!(
            (first - A_L).abs() < (first - B_L).abs(),
            "first blended sample {first} should sit closer to A ({A_L}) than B ({B_L})"
        );
        assert!(
            (last - B_L).abs() < (last - A_L).abs(),
            "last blended sample {last} should sit closer to B ({B_L}) than A ({A_L})"
        );

        assert_eq!(outputs.borrow().len(), 5);
        let sink_ends: Vec<_> = events.borrow().iter().filter(|(id, _)| *id == PipeId(1)).collect();
        assert_eq!(sink_ends.len(), 1, "A must emit SinkEnd exactly once");
    }

    #[test]
    fn flow_def_must_be_sound_f32() {
        let mut blend = CrossBlend::new(channels(), 80, CROSSBLEND_PERIOD, |_| {});
        let a = blend.add_input(PipeId(1), None);
        let mut bad = Uref::new();
        bad.set_flow_def("pic.");
        assert_eq!(a.call_control(ControlCommand::SetFlowDef(bad)).unwrap_err(), UbaseErr::Invalid);
    }
}
