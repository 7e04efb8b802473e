//! Kiosk player
//!
//! Plays tagged clips from a media catalog on an external player, following
//! a repeating recipe of tags and supervising each player process group.

pub mod catalog;
pub mod daemon;
pub mod layers;
pub mod player;
pub mod probe;
pub mod process;
pub mod sequencer;
pub mod startup;
pub mod supervisor;

pub use kiosk_player_config as config;
pub use kiosk_player_config::Config;
pub use catalog::{Catalog, CatalogError, Category, ClipRecord};
pub use daemon::{Daemon, DaemonError, DispatchStats};
pub use layers::{LayerAllocator, LayerSlot};
pub use player::{build_player_command, format_position, PlayerInvocation};
pub use probe::{parse_ffprobe_duration, DurationProbe, FfprobeDuration, FixedDurations, ProbeError};
pub use process::{sweep_by_name, ProcessGroup, ProcessRegistry, TerminationError};
pub use sequencer::{Recipe, RecipeError, RecipeSequencer, RecipeStep, Tick};
pub use startup::{
    check_media_root, check_player_available, check_probe_available, resolve_executable,
    run_startup_checks, StartupError,
};
pub use supervisor::{
    resolve_entry, EntryOutcome, EntryReport, LaunchError, PlaybackContext, PlaybackReport,
    PlaybackState, Playlist, ResolvedEntry, StopReason, Supervisor,
};
