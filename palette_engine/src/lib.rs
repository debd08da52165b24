// Palette Engine
//
// Expands a composition palette (per-slot parameter lists: durations, root
// pitches, velocities, densities, inversions, controller curves, ornament
// references) into fully resolved, timed MIDI events. The engine is a pure,
// synchronous data transformation: it is handed a palette, produces every
// slot's output in one pass, and does no I/O of its own.
//
// Architecture:
// - palette.rs: Slot/ornament parameter model, JSON loading
// - inversion.rs: Inversion tables derived from a root interval sequence
// - chord.rs: Basic chord resolution (pitch stacking, velocity spread)
// - ornament.rs: Ornament expansion (duration fitting, pitch/velocity
//   combination, bank/patch thinning)
// - envelope.rs: Controller envelope quantization, agglomeration, carry state
// - pipeline.rs: Per-slot orchestration of the stages above
// - midi.rs: Standard MIDI File output from resolved slots
// - error.rs: Error types shared by all stages
//
// Resolution is deterministic: the same palette always produces the same
// output.

pub mod chord;
pub mod envelope;
pub mod error;
pub mod inversion;
pub mod midi;
pub mod ornament;
pub mod palette;
pub mod pipeline;

pub use error::{ErrorKind, PaletteError, ResolveError};
pub use palette::{BasicChordParameters, ControllerValues, OrnamentSettings, Palette, SlotParameters};
pub use pipeline::{ResolvedSlot, SlotEvent, resolve_palette};
