// Palette description: the per-slot parameters the engine consumes.
//
// A palette is an ordered list of slots plus the settings shared by the whole
// slot group: the root interval sequence that all slot inversions derive from,
// and (optionally) an ornament table. Everything here is plain immutable data;
// range checking happens during resolution (chord.rs, envelope.rs), which
// reports the offending parameter by name.
//
// Palettes can be built in code or loaded from JSON. Most fields have serde
// defaults so a palette file only needs to spell out what it uses:
//
//   {
//     "root_inversion": [4, 3, 5],
//     "slots": [
//       { "duration_ms": 500, "root_pitch": 60, "velocity": 80, "density": 3 },
//       { "duration_ms": 250, "density": 0 }
//     ]
//   }
//
// See pipeline.rs for how a palette is resolved.

use crate::envelope::Controller;
use crate::error::PaletteError;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_density() -> u8 {
    1
}

fn default_chord_off() -> bool {
    true
}

fn default_vertical_velocity_factor() -> f64 {
    1.0
}

fn default_ornament_min_ms() -> u32 {
    1
}

/// The chord-defining parameters of a slot or of an ornament basic chord.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicChordParameters {
    /// Duration in milliseconds. Must be positive.
    pub duration_ms: u32,
    /// MIDI pitch of the lowest note (0-127).
    #[serde(default)]
    pub root_pitch: u8,
    /// Velocity of the root note (0-127). 0 is played as 1.
    #[serde(default)]
    pub velocity: u8,
    /// Number of simultaneous pitches. 0 is a rest.
    #[serde(default = "default_density")]
    pub density: u8,
    /// Whether the chord releases its notes at the end of its duration.
    #[serde(default = "default_chord_off")]
    pub chord_off: bool,
    /// Row of the palette's inversion table used to stack the chord.
    #[serde(default)]
    pub inversion_index: usize,
    /// Ratio between the top and bottom velocities of the chord. 1.0 gives
    /// every note the root velocity.
    #[serde(default = "default_vertical_velocity_factor")]
    pub vertical_velocity_factor: f64,
}

impl BasicChordParameters {
    pub fn new(duration_ms: u32, root_pitch: u8, velocity: u8, density: u8) -> Self {
        BasicChordParameters {
            duration_ms,
            root_pitch,
            velocity,
            density,
            chord_off: true,
            inversion_index: 0,
            vertical_velocity_factor: 1.0,
        }
    }

    pub fn rest(duration_ms: u32) -> Self {
        BasicChordParameters::new(duration_ms, 0, 0, 0)
    }

    pub fn with_inversion(mut self, inversion_index: usize) -> Self {
        self.inversion_index = inversion_index;
        self
    }

    pub fn with_vertical_velocity_factor(mut self, factor: f64) -> Self {
        self.vertical_velocity_factor = factor;
        self
    }
}

/// Controller value sequences for one slot. An empty sequence means the slot
/// sends nothing for that controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerValues {
    pub pitch_wheel: Vec<u8>,
    pub pan: Vec<u8>,
    pub modulation: Vec<u8>,
    pub expression: Vec<u8>,
}

impl ControllerValues {
    pub fn get(&self, controller: Controller) -> &[u8] {
        match controller {
            Controller::PitchWheel => &self.pitch_wheel,
            Controller::Pan => &self.pan,
            Controller::Modulation => &self.modulation,
            Controller::Expression => &self.expression,
        }
    }

    pub fn get_mut(&mut self, controller: Controller) -> &mut Vec<u8> {
        match controller {
            Controller::PitchWheel => &mut self.pitch_wheel,
            Controller::Pan => &mut self.pan,
            Controller::Modulation => &mut self.modulation,
            Controller::Expression => &mut self.expression,
        }
    }
}

/// Everything a single palette slot declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotParameters {
    #[serde(flatten)]
    pub chord: BasicChordParameters,
    /// Bank select sent before the slot's first note.
    #[serde(default)]
    pub bank: Option<u8>,
    /// Program change sent before the slot's first note.
    #[serde(default)]
    pub patch: Option<u8>,
    /// Pitch-bend range in semitones.
    #[serde(default)]
    pub pitch_wheel_deviation: Option<u8>,
    /// 1-based ornament number, 0 for none.
    #[serde(default)]
    pub ornament: usize,
    /// Shortest sub-event an ornament may be squeezed into.
    #[serde(default = "default_ornament_min_ms")]
    pub ornament_min_ms: u32,
    #[serde(default)]
    pub envelopes: ControllerValues,
}

impl SlotParameters {
    pub fn new(chord: BasicChordParameters) -> Self {
        SlotParameters {
            chord,
            bank: None,
            patch: None,
            pitch_wheel_deviation: None,
            ornament: 0,
            ornament_min_ms: default_ornament_min_ms(),
            envelopes: ControllerValues::default(),
        }
    }

    pub fn with_ornament(mut self, ornament: usize, min_ms: u32) -> Self {
        self.ornament = ornament;
        self.ornament_min_ms = min_ms;
        self
    }

    pub fn with_program(mut self, bank: Option<u8>, patch: Option<u8>) -> Self {
        self.bank = bank;
        self.patch = patch;
        self
    }

    pub fn with_envelope(mut self, controller: Controller, values: Vec<u8>) -> Self {
        *self.envelopes.get_mut(controller) = values;
        self
    }
}

/// An ornament table as authored: its own basic chords (resolved with its own
/// root inversion), optional bank/patch per basic chord, and the ornament
/// value sequences. `values[k]` is ornament number `k + 1`; each entry is a
/// 1-based index into `basic_chords`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrnamentSettings {
    #[serde(default)]
    pub root_inversion: Vec<u8>,
    pub basic_chords: Vec<BasicChordParameters>,
    /// Bank per basic chord. May be shorter than `basic_chords`; missing or
    /// null entries inherit from the ornamented slot.
    #[serde(default)]
    pub banks: Vec<Option<u8>>,
    /// Patch per basic chord, same conventions as `banks`.
    #[serde(default)]
    pub patches: Vec<Option<u8>>,
    pub values: Vec<Vec<usize>>,
}

/// A complete palette: one slot group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    #[serde(default)]
    pub name: String,
    /// Intervals (semitones, bottom to top) from which every slot's
    /// inversion is derived.
    #[serde(default)]
    pub root_inversion: Vec<u8>,
    pub slots: Vec<SlotParameters>,
    #[serde(default)]
    pub ornaments: Option<OrnamentSettings>,
}

impl Palette {
    pub fn new(root_inversion: Vec<u8>, slots: Vec<SlotParameters>) -> Self {
        Palette {
            name: String::new(),
            root_inversion,
            slots,
            ornaments: None,
        }
    }

    pub fn with_ornaments(mut self, ornaments: OrnamentSettings) -> Self {
        self.ornaments = Some(ornaments);
        self
    }

    /// Parse a palette from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, PaletteError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a palette from a JSON file.
    pub fn load(path: &Path) -> Result<Self, PaletteError> {
        let data = std::fs::read_to_string(path)?;
        Palette::from_json(&data)
    }

    /// Total duration of all slots in milliseconds.
    pub fn total_duration_ms(&self) -> u64 {
        self.slots.iter().map(|s| s.chord.duration_ms as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let palette = Palette::from_json(
            r#"{ "slots": [ { "duration_ms": 300, "root_pitch": 60, "velocity": 90 } ] }"#,
        )
        .unwrap();
        let slot = &palette.slots[0];
        assert_eq!(slot.chord.density, 1);
        assert!(slot.chord.chord_off);
        assert_eq!(slot.chord.vertical_velocity_factor, 1.0);
        assert_eq!(slot.ornament, 0);
        assert_eq!(slot.ornament_min_ms, 1);
        assert_eq!(slot.bank, None);
        assert!(slot.envelopes.pan.is_empty());
        assert!(palette.root_inversion.is_empty());
        assert!(palette.ornaments.is_none());
    }

    #[test]
    fn test_sparse_bank_list() {
        let palette = Palette::from_json(
            r#"{
                "slots": [],
                "ornaments": {
                    "basic_chords": [ { "duration_ms": 1 }, { "duration_ms": 2 } ],
                    "banks": [ null, 3 ],
                    "values": [ [1, 2] ]
                }
            }"#,
        )
        .unwrap();
        let ornaments = palette.ornaments.unwrap();
        assert_eq!(ornaments.banks, vec![None, Some(3)]);
        assert!(ornaments.patches.is_empty());
        assert_eq!(ornaments.values, vec![vec![1, 2]]);
    }

    #[test]
    fn test_envelopes_from_json() {
        let palette = Palette::from_json(
            r#"{ "slots": [ { "duration_ms": 100, "envelopes": { "pan": [0, 127] } } ] }"#,
        )
        .unwrap();
        let envelopes = &palette.slots[0].envelopes;
        assert_eq!(envelopes.get(Controller::Pan), &[0, 127]);
        assert!(envelopes.get(Controller::Expression).is_empty());
    }

    #[test]
    fn test_malformed_json_is_error() {
        let err = Palette::from_json(r#"{ "slots": [ { "root_pitch": 60 } ] }"#).unwrap_err();
        assert!(matches!(err, PaletteError::Json(_)));
    }

    #[test]
    fn test_total_duration() {
        let palette = Palette::new(
            vec![],
            vec![
                SlotParameters::new(BasicChordParameters::new(250, 60, 64, 1)),
                SlotParameters::new(BasicChordParameters::rest(750)),
            ],
        );
        assert_eq!(palette.total_duration_ms(), 1000);
    }
}
