// Basic chord resolution: scalar slot parameters to concrete pitches and
// velocities.
//
// A chord is stacked upward from its root pitch using the first density-1
// intervals of the selected inversion row. Velocities are spread
// "geometrically" across the chord: the vertical velocity factor is the ratio
// between the top and bottom velocities, interpolated linearly in between.
//
// Invariants of every resolved chord:
// - pitches.len() == velocities.len() == density
// - every pitch is in 0..=127 (stacking clamps at the top)
// - every velocity is in 1..=127 (0 would be a note-off on the wire)
//
// Used by pipeline.rs for palette slots and by ornament.rs for the ornament's
// own basic chords.

use crate::error::ResolveError;
use crate::inversion::InversionTable;
use crate::palette::BasicChordParameters;
use serde::Serialize;

/// Highest MIDI data value.
pub const MIDI_MAX: u8 = 127;

/// Pitches and velocities of a sounding chord, bottom to top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedChord {
    pub pitches: Vec<u8>,
    pub velocities: Vec<u8>,
}

/// A resolved basic chord: either silence or a chord with its timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BasicChordEvent {
    Rest {
        duration_ms: u32,
    },
    Chord {
        duration_ms: u32,
        chord_off: bool,
        chord: ResolvedChord,
    },
}

impl BasicChordEvent {
    pub fn duration_ms(&self) -> u32 {
        match self {
            BasicChordEvent::Rest { duration_ms } | BasicChordEvent::Chord { duration_ms, .. } => {
                *duration_ms
            }
        }
    }
}

/// Map velocity 0 to 1; everything else is unchanged.
pub fn normalize_velocity(velocity: u8) -> u8 {
    velocity.max(1)
}

/// Resolve one basic chord against the slot group's inversion table.
pub fn resolve_chord(
    params: &BasicChordParameters,
    inversions: &InversionTable,
) -> Result<BasicChordEvent, ResolveError> {
    if params.duration_ms == 0 {
        return Err(ResolveError::config("duration", "must be at least 1ms"));
    }
    if params.density == 0 {
        return Ok(BasicChordEvent::Rest {
            duration_ms: params.duration_ms,
        });
    }
    check_midi_value("root pitch", params.root_pitch)?;
    check_midi_value("velocity", params.velocity)?;
    let factor = params.vertical_velocity_factor;
    if !factor.is_finite() || factor < 0.0 {
        return Err(ResolveError::config(
            "vertical velocity factor",
            format!("{factor} is not a non-negative number"),
        ));
    }

    let density = params.density as usize;
    let pitches = if density == 1 {
        vec![params.root_pitch]
    } else {
        let row = inversions.row(params.inversion_index)?;
        let needed = density - 1;
        if row.len() < needed {
            return Err(ResolveError::InversionTooShort {
                density: params.density,
                needed,
                available: row.len(),
            });
        }
        stack_pitches(params.root_pitch, &row[..needed])
    };
    let velocities = spread_velocities(params.velocity, factor, density);

    Ok(BasicChordEvent::Chord {
        duration_ms: params.duration_ms,
        chord_off: params.chord_off,
        chord: ResolvedChord {
            pitches,
            velocities,
        },
    })
}

/// Stack intervals upward from `root`, clamping at 127.
pub fn stack_pitches(root: u8, intervals: &[u8]) -> Vec<u8> {
    let mut pitches = Vec::with_capacity(intervals.len() + 1);
    let mut current = root.min(MIDI_MAX);
    pitches.push(current);
    for &interval in intervals {
        current = (current as u16 + interval as u16).min(MIDI_MAX as u16) as u8;
        pitches.push(current);
    }
    pitches
}

/// Velocities for a chord of `density` notes, bottom to top.
///
/// With a factor of 1 (or a single note) every note gets the root velocity.
/// Otherwise the bottom velocity is `root / factor` when the factor raises
/// the top, or `root` itself when it lowers it, and the top is
/// `bottom * factor`.
pub fn spread_velocities(root: u8, factor: f64, density: usize) -> Vec<u8> {
    if density <= 1 || factor == 1.0 {
        return vec![normalize_velocity(root); density];
    }
    let bottom = if factor > 1.0 {
        root as f64 / factor
    } else {
        root as f64
    };
    let top = bottom * factor;
    let step = (top - bottom) / (density - 1) as f64;
    (0..density)
        .map(|i| {
            let v = (bottom + step * i as f64).round().clamp(0.0, MIDI_MAX as f64);
            normalize_velocity(v as u8)
        })
        .collect()
}

/// Reject a MIDI data value above 127, naming the parameter.
pub(crate) fn check_midi_value(parameter: &'static str, value: u8) -> Result<(), ResolveError> {
    if value > MIDI_MAX {
        return Err(ResolveError::config(
            parameter,
            format!("{value} exceeds {MIDI_MAX}"),
        ));
    }
    Ok(())
}
