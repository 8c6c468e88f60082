//! Pad model and linking protocol.
//!
//! A pad is a typed, directional endpoint owned by exactly one element.
//! `PadSet` is the per-element registry of pads, generalized from the
//! teacher's `StreamRegistry` keyed-lookup shape
//! (`packages/thaumic-core/src/stream/manager.rs`) to the sum-typed
//! `PadRef` key spec.md §3/§9 calls for (static pads keyed by name,
//! dynamic pads keyed by `(name, generation)`).

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::pull_buffer::{ByteCountMetric, BufferCountMetric, Metric, PullBuffer, ToiletOptions};

/// Default `preferred_size` for a pull input pad counting whole buffers,
/// used when neither the template's [`PadOptions`] nor a negotiated
/// value overrides it (spec.md §4.3: "`preferred_size` (default from the
/// unit's metric)").
const DEFAULT_PREFERRED_SIZE_BUFFERS: u64 = 100;

/// Default `preferred_size` for a pull input pad counting bytes.
const DEFAULT_PREFERRED_SIZE_BYTES: u64 = 64 * 1024;

/// Overflow thresholds applied to a toilet-mode buffer whose template
/// didn't declare explicit ones — generous enough to only catch a
/// genuinely runaway push producer.
const DEFAULT_TOILET_WARN_MULTIPLE: u64 = 4;
const DEFAULT_TOILET_FAIL_MULTIPLE: u64 = 8;

/// Data flow direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Receives buffers/caps/events, issues demand (if pull).
    Input,
    /// Produces buffers/caps/events, receives demand (if pull).
    Output,
}

/// Flow-control mode of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Data flows without per-buffer permission.
    Push,
    /// Data flows only against outstanding demand (credit).
    Pull,
}

/// The metric demand is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DemandUnit {
    /// Demand counts whole buffers.
    Buffers,
    /// Demand counts bytes of payload.
    Bytes,
}

/// A pad's identity: a static name, or a dynamic `(name, generation)`
/// pair allocated by [`PadSet::get_pad_ref`].
///
/// Static pad refs equal their `name`; dynamic refs are instances,
/// distinguished by an incrementing generation counter so a removed and
/// re-requested pad under the same name never aliases the old instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadRef {
    /// A pad declared at element-construction time.
    Static(&'static str),
    /// A pad allocated on request, identified by its declared name and
    /// an instance generation.
    Dynamic(&'static str, u64),
}

impl PadRef {
    /// The declared name this ref was allocated under, regardless of
    /// whether it's static or dynamic.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Static(name) | Self::Dynamic(name, _) => name,
        }
    }
}

impl std::fmt::Display for PadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(name) => write!(f, "{name}"),
            Self::Dynamic(name, gen) => write!(f, "{name}[{gen}]"),
        }
    }
}

/// The remote endpoint a pad is linked to: just an address and a ref —
/// the peer's element owns its own side of the link, this is a weak
/// reference per spec.md §3 "Ownership".
#[derive(Debug, Clone)]
pub struct PeerHandle {
    /// Address of the peer element's mailbox.
    pub address: crate::element::ElementAddress,
    /// The peer's own ref for the linked pad.
    pub pad_ref: PadRef,
}

/// Availability declared for a pad at element-definition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Exists for the lifetime of the element.
    Always,
    /// Allocated on request via [`PadSet::get_pad_ref`].
    OnRequest,
}

/// Static declaration of a pad template, known before any instance is
/// created. `accepted_caps` is a predicate supplied by the element
/// (caps-matching DSL internals are out of scope per spec.md §1 — this
/// crate only ever calls the predicate).
pub struct PadTemplate {
    /// Declared name.
    pub name: &'static str,
    /// Input or output.
    pub direction: Direction,
    /// Push or pull.
    pub mode: Mode,
    /// Unit this pad counts its own demand in.
    pub demand_unit: DemandUnit,
    /// Always or on-request.
    pub availability: Availability,
    /// Returns `true` if the given caps are acceptable on this pad.
    pub accepted_caps: Box<dyn Fn(&Caps) -> bool + Send + Sync>,
    /// Per-pad PullBuffer tuning, used only when `mode == Mode::Pull` and
    /// `direction == Direction::Input`.
    pub pad_options: PadOptions,
    /// Output pads this (input) pad's demand should replenish, or input
    /// pads this (output) pad gates — the auto-demand coupling of
    /// spec.md §4.4 step 3.
    pub demand_pads: Vec<&'static str>,
}

/// Opaque format descriptor negotiated between linked pads. The concrete
/// representation is a host/element concern (spec.md §1): the core only
/// stores it and runs the `accepted_caps` predicate over it.
#[derive(Clone)]
pub struct Caps(pub std::sync::Arc<dyn std::any::Any + Send + Sync>);

impl Caps {
    /// Wraps an arbitrary format descriptor as `Caps`.
    pub fn new<T: std::any::Any + Send + Sync>(value: T) -> Self {
        Self(std::sync::Arc::new(value))
    }

    /// Downcasts back to the concrete format descriptor type.
    #[must_use]
    pub fn downcast_ref<T: std::any::Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl std::fmt::Debug for Caps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Caps(..)")
    }
}

/// Tuning knobs for a pull input pad's [`PullBuffer`].
#[derive(Debug, Clone, Default)]
pub struct PadOptions {
    /// Overrides the metric's default preferred queue size.
    pub preferred_size: Option<u64>,
    /// Overrides the default `min_demand` (otherwise `preferred_size / 4`).
    pub min_demand: Option<u64>,
    /// Overflow thresholds applied once the pad switches into toilet mode.
    pub toilet: Option<ToiletOptions>,
}

/// A live pad instance.
pub struct Pad {
    /// Static name or `(name, generation)`.
    pub pad_ref: PadRef,
    pub direction: Direction,
    pub mode: Mode,
    pub demand_unit: DemandUnit,
    pub other_demand_unit: Option<DemandUnit>,
    /// Last-negotiated format, if any.
    pub caps: Option<Caps>,
    /// Remote endpoint, once linked.
    pub peer: Option<PeerHandle>,
    /// Pull-mode input pads embed a PullBuffer; everything else does
    /// not (spec.md §3 "buffer: for a pull input pad").
    pub buffer: Option<PullBuffer>,
    /// Signed demand credit. Meaningful on output pads and pull input
    /// pads; unused on push input pads.
    pub demand: i64,
    /// For auto-demand filters: the set of output-side pads whose
    /// downstream demand gates this input.
    pub demand_pads: Vec<PadRef>,
    pub start_of_stream: bool,
    pub end_of_stream: bool,
    pub pad_options: PadOptions,
}

impl Pad {
    fn new(
        pad_ref: PadRef,
        template_direction: Direction,
        template_mode: Mode,
        demand_unit: DemandUnit,
        demand_pads: Vec<PadRef>,
        pad_options: PadOptions,
    ) -> Self {
        Self {
            pad_ref,
            direction: template_direction,
            mode: template_mode,
            demand_unit,
            other_demand_unit: None,
            caps: None,
            peer: None,
            buffer: None,
            demand: 0,
            demand_pads,
            start_of_stream: false,
            end_of_stream: false,
            pad_options,
        }
    }

    /// `true` once this pad has an active peer.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.peer.is_some()
    }
}

/// Outcome of resolving a link attempt, returned to the caller of
/// [`PadSet::handle_link`].
pub struct LinkResolution {
    /// The local pad's resolved ref (freshly allocated if dynamic).
    pub local_ref: PadRef,
    /// Whether the peer (a push output into a pull input) must be told
    /// to announce push mode, which arms toilet mode on this side.
    pub announce_push_to_peer: bool,
    /// The initial demand a freshly-constructed (non-toilet) PullBuffer
    /// wants sent upstream immediately (spec.md §4.3 "On construction,
    /// immediately issues an initial demand of `preferred_size`
    /// upstream"). `None` if this link didn't create a pull buffer, or
    /// created one in toilet mode.
    pub initial_demand: Option<u64>,
}

/// The `preferred_size` a pull input pad's buffer uses absent an
/// explicit override, scaled to the unit it counts in.
fn default_preferred_size(unit: DemandUnit, opts: &PadOptions) -> u64 {
    opts.preferred_size.unwrap_or(match unit {
        DemandUnit::Buffers => DEFAULT_PREFERRED_SIZE_BUFFERS,
        DemandUnit::Bytes => DEFAULT_PREFERRED_SIZE_BYTES,
    })
}

/// Builds `pad`'s embedded PullBuffer and returns the initial upstream
/// demand it wants issued, if any (spec.md §4.3).
fn instantiate_pull_buffer(pad: &mut Pad, toilet: Option<ToiletOptions>) -> Option<u64> {
    let preferred = default_preferred_size(pad.demand_unit, &pad.pad_options);
    let min_demand = pad.pad_options.min_demand.unwrap_or(preferred / 4).max(1);
    let metric: Box<dyn Metric> = match pad.demand_unit {
        DemandUnit::Buffers => Box::new(BufferCountMetric),
        DemandUnit::Bytes => Box::new(ByteCountMetric),
    };
    let (buffer, initial) = PullBuffer::new(preferred, min_demand, metric, toilet);
    pad.buffer = Some(buffer);
    (toilet.is_none() && initial > 0).then_some(initial)
}

/// Per-element registry of pads, exclusively owned by that element's
/// [`crate::element::ElementActor`] (spec.md §3 Ownership, §5 "PullBuffer
/// is exclusively owned").
pub struct PadSet {
    templates: HashMap<&'static str, PadTemplate>,
    pads: HashMap<PadRef, Pad>,
    next_generation: HashMap<&'static str, u64>,
    linking_finished: bool,
}

impl PadSet {
    /// Builds a pad set from an element's static declarations. Static
    /// (`Availability::Always`) templates get an instance immediately;
    /// on-request templates wait for [`PadSet::get_pad_ref`].
    #[must_use]
    pub fn new(templates: Vec<PadTemplate>) -> Self {
        let mut set = Self {
            templates: HashMap::new(),
            pads: HashMap::new(),
            next_generation: HashMap::new(),
            linking_finished: false,
        };
        let mut pending = Vec::new();
        for template in templates {
            if template.availability == Availability::Always {
                pending.push(template.name);
            }
            set.templates.insert(template.name, template);
        }
        for name in pending {
            let pad_ref = PadRef::Static(name);
            set.instantiate(pad_ref, name);
        }
        set
    }

    fn instantiate(&mut self, pad_ref: PadRef, template_name: &'static str) {
        let template = self
            .templates
            .get(template_name)
            .expect("template must be registered before instantiation");
        let demand_pads = template
            .demand_pads
            .iter()
            .map(|&name| PadRef::Static(name))
            .collect();
        let pad = Pad::new(
            pad_ref,
            template.direction,
            template.mode,
            template.demand_unit,
            demand_pads,
            template.pad_options.clone(),
        );
        self.pads.insert(pad_ref, pad);
    }

    /// Returns `name` for a static pad, or allocates a fresh `(name,
    /// generation)` ref for an on-request template and instantiates it.
    pub fn get_pad_ref(&mut self, name: &'static str) -> Result<PadRef> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| Error::LinkError {
                reason: format!("unknown pad template {name}"),
            })?;
        let pad_ref = match template.availability {
            Availability::Always => PadRef::Static(name),
            Availability::OnRequest => {
                let gen = self.next_generation.entry(name).or_insert(0);
                let pad_ref = PadRef::Dynamic(name, *gen);
                *gen += 1;
                pad_ref
            }
        };
        if !self.pads.contains_key(&pad_ref) {
            self.instantiate(pad_ref, name);
        }
        Ok(pad_ref)
    }

    /// Runs the accepted-caps predicate declared for `pad_ref`'s
    /// template (see the comment in `instantiate` for why this goes
    /// through the template rather than the pad's own stored closure).
    #[must_use]
    pub fn pad_accepts(&self, pad_ref: PadRef, caps: &Caps) -> bool {
        self.templates
            .get(pad_ref.name())
            .is_some_and(|t| (t.accepted_caps)(caps))
    }

    /// Looks up a live pad.
    #[must_use]
    pub fn get(&self, pad_ref: PadRef) -> Option<&Pad> {
        self.pads.get(&pad_ref)
    }

    /// Looks up a live pad mutably.
    pub fn get_mut(&mut self, pad_ref: PadRef) -> Option<&mut Pad> {
        self.pads.get_mut(&pad_ref)
    }

    /// Resolves a link attempt: validates mode/unit/caps compatibility,
    /// stores the peer, and returns whether the peer must be told to
    /// switch to push mode (push-output into pull-input creates a
    /// toilet on this side). `pad_ref` must already have been resolved
    /// by the caller (via [`PadSet::get_pad_ref`]) — this function
    /// doesn't allocate a fresh dynamic-pad generation itself, since
    /// doing so here as well as at the call site would link a
    /// different pad instance than the one the caller inspected.
    ///
    /// Mode compatibility (spec.md §4.2), keyed on this pad's own
    /// direction (read off `pad_ref` rather than trusted from a
    /// separate parameter, since the two can never legitimately
    /// disagree):
    ///
    /// | output | input | result                                   |
    /// |--------|-------|-------------------------------------------|
    /// | push   | push  | valid, no backpressure                    |
    /// | pull   | pull  | valid, credit-based                       |
    /// | push   | pull  | valid, receiver becomes toilet + announces |
    /// | pull   | push  | invalid                                    |
    pub fn handle_link(
        &mut self,
        pad_ref: PadRef,
        peer_mode: Mode,
        peer_demand_unit: DemandUnit,
        peer: PeerHandle,
        offered_caps: Option<&Caps>,
    ) -> Result<LinkResolution> {
        if let Some(caps) = offered_caps {
            if !self.pad_accepts(pad_ref, caps) {
                return Err(Error::LinkError {
                    reason: format!("caps rejected by {pad_ref}"),
                });
            }
        }

        let pad = self.pads.get_mut(&pad_ref).ok_or_else(|| Error::LinkError {
            reason: format!("unknown pad {pad_ref}"),
        })?;

        if pad.is_linked() {
            return Err(Error::LinkError {
                reason: format!("{pad_ref} already linked"),
            });
        }

        let this_direction = pad.direction;

        let announce_push_to_peer = match (this_direction, pad.mode, peer_mode) {
            (Direction::Input, Mode::Pull, Mode::Pull) => false,
            (Direction::Input, Mode::Pull, Mode::Push) => {
                // Push output feeding a pull input: this side becomes a
                // toilet-mode PullBuffer and tells the peer to announce
                // push mode so the peer knows not to expect demand.
                true
            }
            (Direction::Output, Mode::Push, Mode::Push) => false,
            (Direction::Output, Mode::Pull, Mode::Pull) => false,
            (Direction::Input, Mode::Push, Mode::Push) => false,
            (Direction::Output, Mode::Push, Mode::Pull) => false,
            (Direction::Input, Mode::Push, Mode::Pull) | (Direction::Output, Mode::Pull, Mode::Push) => {
                return Err(Error::LinkError {
                    reason: "pull output cannot feed a push input".into(),
                });
            }
        };

        pad.other_demand_unit = Some(peer_demand_unit);
        pad.peer = Some(peer);

        // A pull input pad needs its PullBuffer the moment it's linked:
        // there is no separate "activate" step, and data may start
        // arriving as soon as this call returns. Toilet mode is decided
        // right here from the peer's mode we were just told, rather than
        // waiting on the `push_mode_announcement` round-trip — that
        // message still goes out (below) for protocol parity with
        // spec.md §4.1's message entry point, but correctness never
        // depends on its delivery order.
        let initial_demand = if this_direction == Direction::Input && pad.mode == Mode::Pull {
            let toilet = if peer_mode == Mode::Push {
                Some(pad.pad_options.toilet.unwrap_or_else(|| {
                    let preferred = default_preferred_size(pad.demand_unit, &pad.pad_options);
                    ToiletOptions {
                        warn_level: preferred * DEFAULT_TOILET_WARN_MULTIPLE,
                        fail_level: preferred * DEFAULT_TOILET_FAIL_MULTIPLE,
                    }
                }))
            } else {
                None
            };
            Some(instantiate_pull_buffer(pad, toilet))
        } else {
            None
        }
        .flatten();

        Ok(LinkResolution {
            local_ref: pad_ref,
            announce_push_to_peer,
            initial_demand,
        })
    }

    /// Signals that no more links will be added in this batch; the
    /// runtime may now emit `handle_pad_added` for dynamic pads created
    /// during it.
    pub fn linking_finished(&mut self) {
        self.linking_finished = true;
    }

    /// `true` once [`PadSet::linking_finished`] has been called.
    #[must_use]
    pub fn is_linking_finished(&self) -> bool {
        self.linking_finished
    }

    /// Clears a pad's peer and any buffered data, idempotently.
    pub fn handle_unlink(&mut self, pad_ref: PadRef) {
        if let Some(pad) = self.pads.get_mut(&pad_ref) {
            pad.peer = None;
            pad.buffer = None;
            pad.start_of_stream = false;
            pad.end_of_stream = false;
        }
    }

    /// Called on receiving a push-mode announcement from the peer of a
    /// pull input pad: switches its embedded PullBuffer into toilet
    /// mode. No-op if the pad has no buffer yet — the caller is
    /// expected to have already constructed one via
    /// [`Pad::buffer`] before linking completes, since the PullBuffer
    /// issues its initial demand on construction.
    pub fn enable_toilet_if_pull(&mut self, pad_ref: PadRef, toilet: ToiletOptions) {
        if let Some(pad) = self.pads.get_mut(&pad_ref) {
            if let Some(buffer) = pad.buffer.as_mut() {
                buffer.enable_toilet(toilet);
            }
        }
    }

    /// All currently-live pad refs.
    pub fn refs(&self) -> impl Iterator<Item = PadRef> + '_ {
        self.pads.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &'static str, direction: Direction, mode: Mode) -> PadTemplate {
        PadTemplate {
            name,
            direction,
            mode,
            demand_unit: DemandUnit::Buffers,
            availability: Availability::Always,
            accepted_caps: Box::new(|_| true),
            pad_options: PadOptions::default(),
            demand_pads: Vec::new(),
        }
    }

    #[test]
    fn static_pad_ref_equals_name() {
        let set = PadSet::new(vec![template("sink", Direction::Input, Mode::Push)]);
        assert!(set.get(PadRef::Static("sink")).is_some());
    }

    #[test]
    fn dynamic_pad_allocates_fresh_generation_each_time() {
        let mut set = PadSet::new(vec![PadTemplate {
            availability: Availability::OnRequest,
            ..template("request_src", Direction::Output, Mode::Push)
        }]);
        let first = set.get_pad_ref("request_src").unwrap();
        set.handle_unlink(first);
        let second = set.get_pad_ref("request_src").unwrap();
        assert_ne!(first, second, "a fresh get_pad_ref call is a new instance");
    }

    #[test]
    fn linking_same_pad_twice_fails() {
        let mut set = PadSet::new(vec![template("sink", Direction::Input, Mode::Push)]);
        let peer = PeerHandle {
            address: crate::element::ElementAddress::for_test(),
            pad_ref: PadRef::Static("src"),
        };
        let pad_ref = set.get_pad_ref("sink").unwrap();
        set.handle_link(pad_ref, Mode::Push, DemandUnit::Buffers, peer.clone(), None)
            .unwrap();
        let err = set
            .handle_link(pad_ref, Mode::Push, DemandUnit::Buffers, peer, None)
            .unwrap_err();
        assert!(matches!(err, Error::LinkError { .. }));
    }

    #[test]
    fn pull_output_into_push_input_is_rejected() {
        let mut set = PadSet::new(vec![template("sink", Direction::Input, Mode::Push)]);
        let peer = PeerHandle {
            address: crate::element::ElementAddress::for_test(),
            pad_ref: PadRef::Static("src"),
        };
        let pad_ref = set.get_pad_ref("sink").unwrap();
        let err = set
            .handle_link(pad_ref, Mode::Pull, DemandUnit::Buffers, peer, None)
            .unwrap_err();
        assert!(matches!(err, Error::LinkError { .. }));
    }

    #[test]
    fn push_output_into_pull_input_requests_announcement() {
        let mut set = PadSet::new(vec![template("sink", Direction::Input, Mode::Pull)]);
        let peer = PeerHandle {
            address: crate::element::ElementAddress::for_test(),
            pad_ref: PadRef::Static("src"),
        };
        let pad_ref = set.get_pad_ref("sink").unwrap();
        let resolution = set
            .handle_link(pad_ref, Mode::Push, DemandUnit::Buffers, peer, None)
            .unwrap();
        assert!(resolution.announce_push_to_peer);
    }
}
