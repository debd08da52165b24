// MIDI output from resolved palettes.
//
// Converts the pipeline's resolved slots into a Standard MIDI File (SMF) for
// playback and inspection. Slots are laid end to end on one track; one tick
// is one millisecond (1000 ticks per quarter note at 60 BPM), so slot and
// segment durations map to ticks unchanged.
//
// Per chord slot:
// - pitch-wheel deviation as RPN 0 (CC 101, CC 100, data entry CC 6), only
//   when it differs from the last one sent
// - one controller message at the start of every envelope segment (pitch
//   wheel as 14-bit pitch bend, pan CC 10, modulation CC 1, expression CC 11)
// - per sub-event: bank select (CC 0) and program change when present, then
//   note-ons; note-offs at the end of the sub-event
//
// A sub-event without chord-off is legato: its notes are held, across rests
// and slot boundaries, until the next sounding sub-event starts or the track
// ends.
//
// Uses the `midly` crate for MIDI writing. Output is SMF Format 0.

use crate::envelope::Controller;
use crate::pipeline::{ResolvedSlot, SlotEvent};
use midly::{
    Format, Header, MetaMessage, MidiMessage, PitchBend, Smf, Timing, Track, TrackEvent,
    TrackEventKind,
    num::{u4, u7, u14, u15, u24, u28},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 1000;

/// Microseconds per quarter note: 60 BPM, so one tick is one millisecond.
const TEMPO_MICROSECONDS: u32 = 1_000_000;

const CC_BANK_SELECT: u8 = 0;
const CC_MODULATION: u8 = 1;
const CC_DATA_ENTRY: u8 = 6;
const CC_PAN: u8 = 10;
const CC_EXPRESSION: u8 = 11;
const CC_RPN_LSB: u8 = 100;
const CC_RPN_MSB: u8 = 101;

/// Serializer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    /// MIDI channel (0-15).
    pub channel: u8,
    pub track_name: String,
}

impl Default for MidiConfig {
    fn default() -> Self {
        MidiConfig {
            channel: 0,
            track_name: "Palette".to_string(),
        }
    }
}

impl MidiConfig {
    pub fn load(path: &Path) -> Result<Self, MidiError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[derive(Debug, Error)]
pub enum MidiError {
    #[error("MIDI channel {0} out of range (0-15)")]
    InvalidChannel(u8),
    #[error("failed to write MIDI: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse MIDI config: {0}")]
    Config(#[from] serde_json::Error),
}

/// Serialize resolved slots and write them to a file.
pub fn write_midi(slots: &[ResolvedSlot], config: &MidiConfig, path: &Path) -> Result<(), MidiError> {
    let buf = palette_to_bytes(slots, config)?;
    std::fs::write(path, &buf)?;
    Ok(())
}

/// Serialize resolved slots to SMF bytes.
pub fn palette_to_bytes(slots: &[ResolvedSlot], config: &MidiConfig) -> Result<Vec<u8>, MidiError> {
    let smf = palette_to_smf(slots, config)?;
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

/// Ordering of messages that share a tick: releases first, then controls,
/// then new notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Release,
    Control,
    Attack,
}

/// A message at an absolute tick.
struct Timed {
    tick: u32,
    phase: Phase,
    message: MidiMessage,
}

/// Convert resolved slots to an in-memory SMF.
pub fn palette_to_smf<'a>(
    slots: &[ResolvedSlot],
    config: &'a MidiConfig,
) -> Result<Smf<'a>, MidiError> {
    if config.channel > 15 {
        return Err(MidiError::InvalidChannel(config.channel));
    }
    let channel = u4::new(config.channel);

    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    let mut timeline: Vec<Timed> = Vec::new();
    let mut slot_start: u32 = 0;
    let mut deviation_sent: Option<u8> = None;
    // Pitches of legato sub-events still sounding.
    let mut held: Vec<u8> = Vec::new();

    for slot in slots {
        if let SlotEvent::Chord {
            pitch_wheel_deviation,
            sub_events,
            ..
        } = &slot.event
        {
            if let Some(deviation) = *pitch_wheel_deviation {
                if deviation_sent != Some(deviation) {
                    for (controller, value) in [(CC_RPN_MSB, 0), (CC_RPN_LSB, 0), (CC_DATA_ENTRY, deviation)] {
                        timeline.push(control(slot_start, controller, value));
                    }
                    deviation_sent = Some(deviation);
                }
            }

            for (controller, segments) in slot.envelopes.iter() {
                let mut tick = slot_start;
                for segment in segments {
                    timeline.push(controller_message(tick, controller, segment.value));
                    tick += segment.duration_ms;
                }
            }

            let mut tick = slot_start;
            for sub in sub_events {
                if let Some(bank) = sub.bank {
                    timeline.push(control(tick, CC_BANK_SELECT, bank));
                }
                if let Some(patch) = sub.patch {
                    timeline.push(Timed {
                        tick,
                        phase: Phase::Control,
                        message: MidiMessage::ProgramChange {
                            program: u7::new(patch),
                        },
                    });
                }
                if !sub.is_rest() {
                    timeline.extend(held.drain(..).map(|pitch| note_off(tick, pitch)));
                }
                for (&pitch, &velocity) in sub.pitches.iter().zip(&sub.velocities) {
                    timeline.push(Timed {
                        tick,
                        phase: Phase::Attack,
                        message: MidiMessage::NoteOn {
                            key: u7::new(pitch),
                            vel: u7::new(velocity),
                        },
                    });
                }
                if sub.chord_off {
                    let release = tick + sub.duration_ms;
                    timeline.extend(sub.pitches.iter().map(|&pitch| note_off(release, pitch)));
                } else {
                    held.extend_from_slice(&sub.pitches);
                }
                tick += sub.duration_ms;
            }
        }
        slot_start += slot.event.duration_ms();
    }
    timeline.extend(held.drain(..).map(|pitch| note_off(slot_start, pitch)));

    timeline.sort_by_key(|t| (t.tick, t.phase));

    let mut track: Track<'a> = Vec::with_capacity(timeline.len() + 3);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(config.track_name.as_bytes())),
    });
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(TEMPO_MICROSECONDS))),
    });

    let mut last_tick: u32 = 0;
    for timed in timeline {
        track.push(TrackEvent {
            delta: u28::new(timed.tick - last_tick),
            kind: TrackEventKind::Midi {
                channel,
                message: timed.message,
            },
        });
        last_tick = timed.tick;
    }

    // End of track marks the end of the last slot, rests included.
    track.push(TrackEvent {
        delta: u28::new(slot_start - last_tick),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    smf.tracks.push(track);
    Ok(smf)
}

fn control(tick: u32, controller: u8, value: u8) -> Timed {
    Timed {
        tick,
        phase: Phase::Control,
        message: MidiMessage::Controller {
            controller: u7::new(controller),
            value: u7::new(value),
        },
    }
}

fn note_off(tick: u32, pitch: u8) -> Timed {
    Timed {
        tick,
        phase: Phase::Release,
        message: MidiMessage::NoteOff {
            key: u7::new(pitch),
            vel: u7::new(0),
        },
    }
}

fn controller_message(tick: u32, controller: Controller, value: u8) -> Timed {
    match controller {
        Controller::PitchWheel => Timed {
            tick,
            phase: Phase::Control,
            message: MidiMessage::PitchBend {
                bend: PitchBend(u14::new((value as u16) << 7)),
            },
        },
        Controller::Pan => control(tick, CC_PAN, value),
        Controller::Modulation => control(tick, CC_MODULATION, value),
        Controller::Expression => control(tick, CC_EXPRESSION, value),
    }
}
