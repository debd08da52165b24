// Slot pipeline: resolving a whole palette in one deterministic pass.
//
// Per palette, the shared lookups are built once: the inversion table from
// the palette's root inversion, and the ornament table (if the palette has
// ornament settings). Then each slot, in declaration order:
//
// 1. chord.rs resolves the slot's basic chord (or rest)
// 2. a rest stops here: it has no sub-events and no envelopes
// 3. otherwise the chord becomes a single sub-event spanning the slot, which
//    ornament.rs replaces with the ornament's sub-events if one is selected
// 4. envelope.rs spreads the four controller sequences across the slot,
//    threading the carry state from the previous slot
//
// The first failing slot aborts the pass; the error carries its index. The
// carry state lives only for the duration of `resolve_palette`.

use crate::chord::{BasicChordEvent, check_midi_value, resolve_chord};
use crate::envelope::{CarryState, ControllerEnvelopes, distribute};
use crate::error::{PaletteError, ResolveError};
use crate::inversion::InversionTable;
use crate::ornament::{BasicSubEvent, OrnamentTable, expand_ornament};
use crate::palette::{Palette, SlotParameters};
use serde::Serialize;
use tracing::debug;

/// What one slot sounds like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SlotEvent {
    Rest {
        duration_ms: u32,
    },
    Chord {
        duration_ms: u32,
        /// Pitch-bend range in semitones, if the slot sets one.
        pitch_wheel_deviation: Option<u8>,
        /// Consecutive sub-events; their durations sum to `duration_ms`.
        sub_events: Vec<BasicSubEvent>,
    },
}

impl SlotEvent {
    pub fn duration_ms(&self) -> u32 {
        match self {
            SlotEvent::Rest { duration_ms } | SlotEvent::Chord { duration_ms, .. } => *duration_ms,
        }
    }

    pub fn sub_events(&self) -> &[BasicSubEvent] {
        match self {
            SlotEvent::Rest { .. } => &[],
            SlotEvent::Chord { sub_events, .. } => sub_events,
        }
    }
}

/// Fully resolved output for one palette slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSlot {
    pub index: usize,
    pub event: SlotEvent,
    pub envelopes: ControllerEnvelopes,
}

/// The per-palette lookups shared by every slot.
#[derive(Debug, Clone)]
pub struct SlotPipeline {
    inversions: InversionTable,
    ornaments: Option<OrnamentTable>,
}

impl SlotPipeline {
    pub fn new(inversions: InversionTable, ornaments: Option<OrnamentTable>) -> Self {
        SlotPipeline {
            inversions,
            ornaments,
        }
    }

    /// Build the lookups for a palette.
    pub fn for_palette(palette: &Palette) -> Result<Self, PaletteError> {
        let inversions = InversionTable::new(&palette.root_inversion);
        let ornaments = palette
            .ornaments
            .as_ref()
            .map(OrnamentTable::resolve)
            .transpose()?;
        Ok(SlotPipeline::new(inversions, ornaments))
    }

    /// Resolve one slot given the carry state left by the previous one.
    pub fn resolve_slot(
        &self,
        index: usize,
        slot: &SlotParameters,
        carry: CarryState,
    ) -> Result<(ResolvedSlot, CarryState), ResolveError> {
        for (parameter, value) in [
            ("bank", slot.bank),
            ("patch", slot.patch),
            ("pitch wheel deviation", slot.pitch_wheel_deviation),
        ] {
            if let Some(value) = value {
                check_midi_value(parameter, value)?;
            }
        }

        let (duration_ms, chord_off, chord) = match resolve_chord(&slot.chord, &self.inversions)? {
            BasicChordEvent::Rest { duration_ms } => {
                let resolved = ResolvedSlot {
                    index,
                    event: SlotEvent::Rest { duration_ms },
                    envelopes: ControllerEnvelopes::default(),
                };
                return Ok((resolved, carry));
            }
            BasicChordEvent::Chord {
                duration_ms,
                chord_off,
                chord,
            } => (duration_ms, chord_off, chord),
        };

        let whole = BasicSubEvent {
            duration_ms,
            bank: slot.bank,
            patch: slot.patch,
            chord_off,
            pitches: chord.pitches,
            velocities: chord.velocities,
        };
        let sub_events = if slot.ornament > 0 {
            let table = self
                .ornaments
                .as_ref()
                .ok_or(ResolveError::MissingOrnamentTable {
                    number: slot.ornament,
                })?;
            expand_ornament(table, slot.ornament, slot.ornament_min_ms, &whole)?
        } else {
            vec![whole]
        };

        let (envelopes, carry) = distribute(&slot.envelopes, duration_ms, carry)?;
        let resolved = ResolvedSlot {
            index,
            event: SlotEvent::Chord {
                duration_ms,
                pitch_wheel_deviation: slot.pitch_wheel_deviation,
                sub_events,
            },
            envelopes,
        };
        Ok((resolved, carry))
    }

    /// Resolve a sequence of slots in order, starting from an empty carry.
    pub fn resolve_all(&self, slots: &[SlotParameters]) -> Result<Vec<ResolvedSlot>, PaletteError> {
        let mut carry = CarryState::default();
        let mut resolved = Vec::with_capacity(slots.len());
        for (index, slot) in slots.iter().enumerate() {
            let (out, next) = self
                .resolve_slot(index, slot, carry)
                .map_err(|source| PaletteError::Slot {
                    slot: index,
                    source,
                })?;
            debug!(
                slot = index,
                duration_ms = out.event.duration_ms(),
                sub_events = out.event.sub_events().len(),
                "slot resolved"
            );
            carry = next;
            resolved.push(out);
        }
        Ok(resolved)
    }
}

/// Resolve every slot of a palette.
pub fn resolve_palette(palette: &Palette) -> Result<Vec<ResolvedSlot>, PaletteError> {
    SlotPipeline::for_palette(palette)?.resolve_all(&palette.slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Controller, EnvelopeSegment};
    use crate::palette::{BasicChordParameters, OrnamentSettings};

    fn triad_palette(slots: Vec<SlotParameters>) -> Palette {
        Palette::new(vec![4, 3], slots)
    }

    #[test]
    fn test_plain_chord_is_one_sub_event() {
        let palette = triad_palette(vec![
            SlotParameters::new(BasicChordParameters::new(500, 60, 80, 3))
                .with_program(Some(0), Some(19)),
        ]);
        let slots = resolve_palette(&palette).unwrap();
        assert_eq!(slots.len(), 1);
        let subs = slots[0].event.sub_events();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].duration_ms, 500);
        assert_eq!(subs[0].pitches, vec![60, 64, 67]);
        assert_eq!(subs[0].velocities, vec![80, 80, 80]);
        assert_eq!(subs[0].bank, Some(0));
        assert_eq!(subs[0].patch, Some(19));
        assert!(slots[0].envelopes.is_empty());
    }

    #[test]
    fn test_rest_has_no_envelopes_and_keeps_carry() {
        let palette = triad_palette(vec![
            SlotParameters::new(BasicChordParameters::new(100, 60, 80, 1))
                .with_envelope(Controller::Pan, vec![10]),
            SlotParameters::new(BasicChordParameters::rest(100))
                .with_envelope(Controller::Pan, vec![90]),
            SlotParameters::new(BasicChordParameters::new(100, 60, 80, 1))
                .with_envelope(Controller::Pan, vec![10]),
        ]);
        let slots = resolve_palette(&palette).unwrap();
        assert_eq!(slots[1].event, SlotEvent::Rest { duration_ms: 100 });
        assert!(slots[1].envelopes.is_empty());
        // Pan is still 10 from slot 0, so slot 2 sends nothing.
        assert!(slots[2].envelopes.get(Controller::Pan).is_none());
    }

    #[test]
    fn test_carry_resets_per_pass() {
        let palette = triad_palette(vec![
            SlotParameters::new(BasicChordParameters::new(100, 60, 80, 1))
                .with_envelope(Controller::Expression, vec![100]),
        ]);
        let first = resolve_palette(&palette).unwrap();
        let second = resolve_palette(&palette).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            second[0].envelopes.get(Controller::Expression).unwrap(),
            &[EnvelopeSegment::new(100, 100)][..]
        );
    }

    #[test]
    fn test_ornamented_slot() {
        let ornaments = OrnamentSettings {
            root_inversion: vec![],
            basic_chords: vec![
                BasicChordParameters::new(1, 0, 0, 1),
                BasicChordParameters::new(1, 2, 0, 1),
                BasicChordParameters::new(2, 0, 0, 1),
            ],
            banks: vec![],
            patches: vec![Some(3)],
            values: vec![vec![1, 2, 3]],
        };
        let palette = Palette::new(
            vec![],
            vec![SlotParameters::new(BasicChordParameters::new(400, 62, 70, 1)).with_ornament(1, 1)],
        )
        .with_ornaments(ornaments);
        let slots = resolve_palette(&palette).unwrap();
        let subs = slots[0].event.sub_events();
        let durations: Vec<u32> = subs.iter().map(|s| s.duration_ms).collect();
        assert_eq!(durations, vec![100, 100, 200]);
        let pitches: Vec<u8> = subs.iter().map(|s| s.pitches[0]).collect();
        assert_eq!(pitches, vec![62, 64, 62]);
        // Ornament velocities are 0, normalized to 1, then added.
        assert!(subs.iter().all(|s| s.velocities == vec![71]));
        assert_eq!(subs[0].patch, Some(3));
        assert_eq!(subs[1].patch, None);
    }

    #[test]
    fn test_ornament_without_table() {
        let palette = triad_palette(vec![
            SlotParameters::new(BasicChordParameters::new(100, 60, 80, 1)),
            SlotParameters::new(BasicChordParameters::new(100, 60, 80, 1)).with_ornament(2, 1),
        ]);
        let err = resolve_palette(&palette).unwrap_err();
        assert_eq!(err.slot(), Some(1));
        assert_eq!(
            err.resolve_error(),
            Some(&ResolveError::MissingOrnamentTable { number: 2 })
        );
    }

    #[test]
    fn test_rest_ignores_ornament() {
        let palette = triad_palette(vec![
            SlotParameters::new(BasicChordParameters::rest(100)).with_ornament(5, 1),
        ]);
        let slots = resolve_palette(&palette).unwrap();
        assert!(slots[0].event.sub_events().is_empty());
    }

    #[test]
    fn test_error_names_slot() {
        let palette = triad_palette(vec![
            SlotParameters::new(BasicChordParameters::new(100, 60, 80, 3)),
            SlotParameters::new(BasicChordParameters::new(100, 60, 80, 3).with_inversion(7)),
        ]);
        let err = resolve_palette(&palette).unwrap_err();
        assert_eq!(err.slot(), Some(1));
        assert_eq!(
            err.to_string(),
            "slot 1: inversion index 7 out of range (table has 2 rows)"
        );
    }

    #[test]
    fn test_short_slot_envelope_is_precondition() {
        let palette = triad_palette(vec![
            SlotParameters::new(BasicChordParameters::new(2, 60, 80, 1))
                .with_envelope(Controller::PitchWheel, vec![0, 64, 127]),
        ]);
        let err = resolve_palette(&palette).unwrap_err();
        assert_eq!(
            err.resolve_error().map(ResolveError::kind),
            Some(crate::error::ErrorKind::Precondition)
        );
    }

    #[test]
    fn test_out_of_range_program_values_rejected() {
        let chord = BasicChordParameters::new(100, 60, 80, 1);
        let mut deviation = SlotParameters::new(chord.clone());
        deviation.pitch_wheel_deviation = Some(250);
        let cases = [
            (SlotParameters::new(chord.clone()).with_program(Some(200), None), "bank"),
            (SlotParameters::new(chord.clone()).with_program(None, Some(130)), "patch"),
            (deviation, "pitch wheel deviation"),
        ];
        for (slot, name) in cases {
            let palette = triad_palette(vec![SlotParameters::new(chord.clone()), slot]);
            let err = resolve_palette(&palette).unwrap_err();
            assert_eq!(err.slot(), Some(1));
            assert!(
                matches!(
                    err.resolve_error(),
                    Some(ResolveError::Configuration { parameter, .. }) if *parameter == name
                ),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn test_program_values_at_limit_accepted() {
        let mut slot = SlotParameters::new(BasicChordParameters::new(100, 60, 80, 1))
            .with_program(Some(127), Some(127));
        slot.pitch_wheel_deviation = Some(127);
        assert!(resolve_palette(&triad_palette(vec![slot])).is_ok());
    }

    #[test]
    fn test_rest_with_bad_patch_rejected() {
        let palette = triad_palette(vec![
            SlotParameters::new(BasicChordParameters::rest(100)).with_program(None, Some(128)),
        ]);
        let err = resolve_palette(&palette).unwrap_err();
        assert_eq!(err.to_string(), "slot 0: invalid patch: 128 exceeds 127");
    }

    #[test]
    fn test_bad_ornament_chord_reported_before_slots() {
        let ornaments = OrnamentSettings {
            root_inversion: vec![],
            basic_chords: vec![BasicChordParameters::new(1, 200, 0, 1)],
            banks: vec![],
            patches: vec![],
            values: vec![vec![1]],
        };
        let palette = triad_palette(vec![]).with_ornaments(ornaments);
        let err = resolve_palette(&palette).unwrap_err();
        assert!(matches!(err, PaletteError::OrnamentChord { index: 0, .. }));
    }
}
