pub mod assets;
pub mod metronome;
pub mod scheduler;
pub mod score_ops;
pub mod session;
pub mod synth;
pub mod tempo;
pub mod time;

pub use assets::{AssetError, AssetLibrary, AssetProvider};
pub use scheduler::{
    DispatchStats, KeyEvent, LiveNote, Scheduler, SchedulerConfig, SchedulerError, TickReport,
    TransportState, TransportUpdate,
};
pub use score_ops::{COUNTDOWN_BARS, playable_window_in_bars, total_duration_in_bars};
pub use session::{RenderOptions, Session, SessionOptions, render_offline, render_to_file};
pub use synth::{Envelope, LiveEnvelope, SynthSettings};
pub use tempo::TempoMap;
pub use time::{
    MusicalPosition, PixelScale, TimeError, bars_to_milliseconds, bars_to_pixel_distance,
    milliseconds_to_bars, pixel_distance_to_bars,
};

pub use meloskia_decode::{decode_file, load_asset};
pub use meloskia_engine::EngineOptions;
pub use meloskia_project::{
    AssetKind, KeysState, Note, Pitch, ProjectError, Score, SongAsset, Voice, load_score,
    save_score, songs,
};
pub use meloskia_render::{OfflineGraph, write_wav};
pub use meloskia_transport::{AudioArc, AudioBuffer, MetronomeDivision, PlayMode};
