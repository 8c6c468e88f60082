//! Output-side demand accounting.
//!
//! Mechanical bookkeeping only: whether to invoke the behavior's
//! `handle_demand` callback, and which upstream inputs an auto-demand
//! filter must top up, is decided here; invoking the callback itself
//! and sending the resulting messages is the owning `ElementActor`'s
//! job. Credit bookkeeping in the same shape as a playback cursor
//! tracked against a producer rate, applied here to demand tracked
//! against `preferred_size`.

use crate::error::{Error, Result};
use crate::pad::{Direction, Mode, PadRef, PadSet};

/// What the caller must do after [`handle_demand`] returns.
#[derive(Debug, Default)]
pub struct DemandOutcome {
    /// `true` if `handle_demand(ref, total, unit, ctx)` should be
    /// invoked now.
    pub invoke_callback: bool,
    /// The pad's new total outstanding demand, for the callback's `size`
    /// argument.
    pub total: i64,
    /// Auto-demand top-ups to send upstream: `(input pad, amount)`.
    pub auto_demand_requests: Vec<(PadRef, u64)>,
}

/// Applies an incoming demand of `size` units to `pad_ref`, an output
/// pad. Rejects push-mode or non-output pads, since push outputs ignore
/// demand entirely (spec.md §4.4 step 1).
///
/// Auto-demand coupling (step 3, the gating condition spec.md §9 flags
/// as an Open Question in the source): this implementation treats an
/// input's "outstanding demand" as its PullBuffer's `current_size` —
/// the buffered data actually available to the filter — since that is
/// the only observable, testable notion of "depleted" vs. "full" an
/// input exposes. An input is topped up when its `current_size` has
/// fallen to `preferred_size / 2` or below, and every other
/// demand-linked input still has `current_size > 0`.
pub fn handle_demand(pad_set: &mut PadSet, pad_ref: PadRef, size: u64) -> Result<DemandOutcome> {
    let demand_pads = {
        let pad = pad_set.get_mut(pad_ref).ok_or_else(|| Error::LinkError {
            reason: format!("unknown pad {pad_ref}"),
        })?;

        if pad.direction != Direction::Output || pad.mode == Mode::Push {
            return Err(Error::InvalidMessage {
                msg: "demand".into(),
                mode: format!("{:?}/{:?}", pad.direction, pad.mode),
            });
        }

        pad.demand += size as i64;
        pad.demand_pads.clone()
    };

    let total = pad_set
        .get(pad_ref)
        .expect("pad just looked up above")
        .demand;

    let mut auto_demand_requests = Vec::new();
    if !demand_pads.is_empty() {
        let readings: Vec<(PadRef, u64, u64)> = demand_pads
            .iter()
            .filter_map(|&input_ref| {
                let input = pad_set.get(input_ref)?;
                let buffer = input.buffer.as_ref()?;
                Some((input_ref, buffer.current_size(), buffer.preferred_size()))
            })
            .collect();

        for &(input_ref, current_size, preferred_size) in &readings {
            let is_low = current_size <= preferred_size / 2;
            let others_positive = readings
                .iter()
                .filter(|(other_ref, ..)| *other_ref != input_ref)
                .all(|(_, other_size, _)| *other_size > 0);

            if is_low && others_positive {
                auto_demand_requests.push((input_ref, preferred_size));
            }
        }
    }

    let end_of_stream = pad_set
        .get(pad_ref)
        .expect("pad just looked up above")
        .end_of_stream;

    Ok(DemandOutcome {
        invoke_callback: total > 0 && !end_of_stream,
        total,
        auto_demand_requests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pad::{Availability, Caps, DemandUnit, PadOptions, PadTemplate};
    use crate::pull_buffer::{BufferCountMetric, PullBuffer, ToiletOptions};

    fn output_template(name: &'static str, demand_pads: Vec<&'static str>) -> PadTemplate {
        PadTemplate {
            name,
            direction: Direction::Output,
            mode: Mode::Pull,
            demand_unit: DemandUnit::Buffers,
            availability: Availability::Always,
            accepted_caps: Box::new(|_: &Caps| true),
            pad_options: PadOptions::default(),
            demand_pads,
        }
    }

    fn input_template(name: &'static str) -> PadTemplate {
        PadTemplate {
            name,
            direction: Direction::Input,
            mode: Mode::Pull,
            demand_unit: DemandUnit::Buffers,
            availability: Availability::Always,
            accepted_caps: Box::new(|_: &Caps| true),
            pad_options: PadOptions::default(),
            demand_pads: Vec::new(),
        }
    }

    fn with_buffer(set: &mut PadSet, pad_ref: PadRef, preferred: u64, filled: u64) {
        let (mut buffer, _initial) = PullBuffer::new(preferred, preferred / 4, Box::new(BufferCountMetric), None::<ToiletOptions>);
        if filled > 0 {
            buffer
                .store(
                    pad_ref,
                    crate::pull_buffer::StoreKind::Buffers(crate::pull_buffer::BufferBatch(
                        (0..filled).map(|_| bytes::Bytes::new()).collect(),
                    )),
                )
                .unwrap();
        }
        set.get_mut(pad_ref).unwrap().buffer = Some(buffer);
    }

    #[test]
    fn push_output_ignores_demand() {
        let mut set = PadSet::new(vec![PadTemplate {
            mode: Mode::Push,
            ..output_template("src", Vec::new())
        }]);
        let err = handle_demand(&mut set, PadRef::Static("src"), 10).unwrap_err();
        assert!(matches!(err, Error::InvalidMessage { .. }));
    }

    #[test]
    fn auto_demand_tops_up_depleted_input() {
        let mut set = PadSet::new(vec![
            output_template("out", vec!["i1", "i2"]),
            input_template("i1"),
            input_template("i2"),
        ]);
        with_buffer(&mut set, PadRef::Static("i1"), 100, 5); // depleted
        with_buffer(&mut set, PadRef::Static("i2"), 100, 80); // full

        let outcome = handle_demand(&mut set, PadRef::Static("out"), 10).unwrap();
        assert_eq!(outcome.auto_demand_requests, vec![(PadRef::Static("i1"), 100)]);
    }
}
