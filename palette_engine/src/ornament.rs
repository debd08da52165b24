// Ornament expansion: replacing a slot's chord with a timed micro-sequence.
//
// An ornament table is a second, independent set of basic chords (resolved
// with the ornament's own inversion table) plus numbered value sequences.
// Ornament number k selects `values[k - 1]`, a list of 1-based indices into
// the ornament's basic chords. Expanding a slot with ornament k produces one
// sub-event per index:
//
// - durations: the ornament chords' authored durations are treated as
//   relative weights and fitted to the slot's duration, never below the
//   slot's ornament minimum (see `fit_durations`)
// - pitches/velocities: every ornament pitch is added to every slot pitch
//   (ornament chords are usually authored relative to 0), velocities likewise
// - bank/patch: taken from the ornament table per chord, falling back to the
//   slot's own for the first sub-event, then thinned so a value is only sent
//   when it changes
//
// Used by pipeline.rs. Rest slots are never ornamented.

use crate::chord::{BasicChordEvent, MIDI_MAX, check_midi_value, resolve_chord};
use crate::error::{PaletteError, ResolveError};
use crate::inversion::InversionTable;
use crate::palette::OrnamentSettings;
use serde::Serialize;
use tracing::debug;

/// The atomic output unit: one chord (or silence) with its own timing and
/// optional program change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasicSubEvent {
    pub duration_ms: u32,
    pub bank: Option<u8>,
    pub patch: Option<u8>,
    pub chord_off: bool,
    /// Empty for a silent sub-event.
    pub pitches: Vec<u8>,
    pub velocities: Vec<u8>,
}

impl BasicSubEvent {
    pub fn is_rest(&self) -> bool {
        self.pitches.is_empty()
    }
}

/// A resolved ornament table.
#[derive(Debug, Clone, PartialEq)]
pub struct OrnamentTable {
    chords: Vec<BasicChordEvent>,
    banks: Vec<Option<u8>>,
    patches: Vec<Option<u8>>,
    values: Vec<Vec<usize>>,
}

impl OrnamentTable {
    pub fn new(
        chords: Vec<BasicChordEvent>,
        banks: Vec<Option<u8>>,
        patches: Vec<Option<u8>>,
        values: Vec<Vec<usize>>,
    ) -> Self {
        OrnamentTable {
            chords,
            banks,
            patches,
            values,
        }
    }

    /// Resolve every basic chord of an authored ornament table and check its
    /// bank/patch lists.
    pub fn resolve(settings: &OrnamentSettings) -> Result<Self, PaletteError> {
        let inversions = InversionTable::new(&settings.root_inversion);
        let chords = settings
            .basic_chords
            .iter()
            .enumerate()
            .map(|(index, params)| {
                resolve_chord(params, &inversions)
                    .map_err(|source| PaletteError::OrnamentChord { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (parameter, values) in [("bank", &settings.banks), ("patch", &settings.patches)] {
            for (index, value) in values.iter().enumerate() {
                if let Some(value) = *value {
                    check_midi_value(parameter, value)
                        .map_err(|source| PaletteError::OrnamentChord { index, source })?;
                }
            }
        }
        Ok(OrnamentTable::new(
            chords,
            settings.banks.clone(),
            settings.patches.clone(),
            settings.values.clone(),
        ))
    }

    /// Number of ornaments (value sequences) in the table.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value sequence of a 1-based ornament number.
    fn sequence(&self, number: usize) -> Result<&[usize], ResolveError> {
        let sequence = number
            .checked_sub(1)
            .and_then(|i| self.values.get(i))
            .ok_or(ResolveError::UnknownOrnament {
                number,
                available: self.values.len(),
            })?;
        if sequence.is_empty() {
            return Err(ResolveError::EmptyOrnament { number });
        }
        Ok(sequence)
    }

    /// The basic chord selected by a 1-based ornament value.
    fn chord(&self, number: usize, value: usize) -> Result<&BasicChordEvent, ResolveError> {
        value
            .checked_sub(1)
            .and_then(|i| self.chords.get(i))
            .ok_or(ResolveError::OrnamentValueOutOfRange {
                number,
                value,
                available: self.chords.len(),
            })
    }
}

/// Expand `root` (an unornamented chord spanning the whole slot) with
/// ornament `number`.
pub fn expand_ornament(
    table: &OrnamentTable,
    number: usize,
    min_ms: u32,
    root: &BasicSubEvent,
) -> Result<Vec<BasicSubEvent>, ResolveError> {
    if root.is_rest() {
        return Err(ResolveError::Precondition(
            "a rest cannot be ornamented".into(),
        ));
    }
    if min_ms == 0 {
        return Err(ResolveError::config(
            "ornament minimum duration",
            "must be at least 1ms",
        ));
    }

    let sequence = table.sequence(number)?;
    let mut relative = Vec::with_capacity(sequence.len());
    let mut sub_events = Vec::with_capacity(sequence.len());
    for &value in sequence {
        let chord = table.chord(number, value)?;
        relative.push(chord.duration_ms());
        let index = value - 1;
        let (chord_off, pitches, velocities) = match chord {
            BasicChordEvent::Rest { .. } => (false, Vec::new(), Vec::new()),
            BasicChordEvent::Chord {
                chord_off, chord, ..
            } => {
                let (pitches, velocities) = combine(root, &chord.pitches, &chord.velocities);
                (*chord_off, pitches, velocities)
            }
        };
        sub_events.push(BasicSubEvent {
            duration_ms: 0,
            bank: table.banks.get(index).copied().flatten(),
            patch: table.patches.get(index).copied().flatten(),
            chord_off,
            pitches,
            velocities,
        });
    }

    let durations = fit_durations(&relative, root.duration_ms, min_ms).ok_or(
        ResolveError::OrnamentTooLong {
            number,
            count: relative.len(),
            min_ms,
            duration_ms: root.duration_ms,
        },
    )?;
    for (sub_event, duration_ms) in sub_events.iter_mut().zip(durations) {
        sub_event.duration_ms = duration_ms;
    }

    thin_repeats(sub_events.iter_mut().map(|s| &mut s.bank), root.bank);
    thin_repeats(sub_events.iter_mut().map(|s| &mut s.patch), root.patch);
    Ok(sub_events)
}

/// Cross every root pitch with every ornament pitch (root-major order), and
/// the parallel velocities the same way.
///
/// Ornament velocities were normalized when their chords were resolved, so an
/// authored 0 still adds 1: an ornament never leaves the root velocity
/// unchanged.
fn combine(root: &BasicSubEvent, pitches: &[u8], velocities: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let size = root.pitches.len() * pitches.len();
    let mut out_pitches = Vec::with_capacity(size);
    let mut out_velocities = Vec::with_capacity(size);
    for (&root_pitch, &root_velocity) in root.pitches.iter().zip(&root.velocities) {
        for (&pitch, &velocity) in pitches.iter().zip(velocities) {
            out_pitches.push((root_pitch as u16 + pitch as u16).min(MIDI_MAX as u16) as u8);
            out_velocities.push(
                (root_velocity as u16 + velocity as u16).clamp(1, MIDI_MAX as u16) as u8,
            );
        }
    }
    (out_pitches, out_velocities)
}

/// Give the first entry `fallback` if it has nothing, then drop every value
/// that repeats the last one sent.
fn thin_repeats<'a>(values: impl Iterator<Item = &'a mut Option<u8>>, fallback: Option<u8>) {
    let mut previous = None;
    for (i, value) in values.enumerate() {
        if i == 0 && value.is_none() {
            *value = fallback;
        }
        match *value {
            Some(v) if previous == Some(v) => *value = None,
            Some(v) => previous = Some(v),
            None => {}
        }
    }
}

/// Fit relative durations to `target` ms with every share at least `min_ms`.
///
/// Shares are proportional to `relative`. A share that would fall below the
/// minimum is pinned to it and the rest of the pool is shared out again among
/// the others, until nothing new is pinned. Every share but the last is then
/// rounded to the nearest millisecond and the last takes the remainder. If
/// rounding leaves a share short, it borrows from the longest one.
///
/// Returns `None` when `relative` is empty or `relative.len() * min_ms`
/// exceeds `target`.
pub fn fit_durations(relative: &[u32], target: u32, min_ms: u32) -> Option<Vec<u32>> {
    let n = relative.len();
    if n == 0 || n as u64 * min_ms as u64 > target as u64 {
        return None;
    }

    let min = min_ms as f64;
    let mut pinned = vec![false; n];
    let mut shares = vec![0.0f64; n];
    loop {
        let pinned_count = pinned.iter().filter(|&&p| p).count();
        let pool = target as f64 - pinned_count as f64 * min;
        let free_weight: u64 = relative
            .iter()
            .zip(&pinned)
            .filter(|&(_, &p)| !p)
            .map(|(&r, _)| r as u64)
            .sum();

        let mut newly_pinned = false;
        for i in 0..n {
            if pinned[i] {
                shares[i] = min;
                continue;
            }
            let share = if free_weight == 0 {
                0.0
            } else {
                pool * relative[i] as f64 / free_weight as f64
            };
            if share < min {
                pinned[i] = true;
                newly_pinned = true;
                shares[i] = min;
            } else {
                shares[i] = share;
            }
        }
        if !newly_pinned {
            break;
        }
    }

    let mut durations: Vec<i64> = shares[..n - 1].iter().map(|s| s.round() as i64).collect();
    let assigned: i64 = durations.iter().sum();
    durations.push(target as i64 - assigned);

    let min = min_ms as i64;
    while let Some(short) = durations.iter().position(|&d| d < min) {
        let (donor, &longest) = durations
            .iter()
            .enumerate()
            .max_by_key(|&(i, &d)| (d, std::cmp::Reverse(i)))?;
        let moved = (min - durations[short]).min(longest - min);
        debug!(short, donor, moved, "ornament duration below minimum after rounding");
        durations[donor] -= moved;
        durations[short] += moved;
    }

    Some(durations.into_iter().map(|d| d as u32).collect())
}
