//! Domain models for the Speech2Text platform

mod diarization;
mod media;
mod plan;
mod subscription;
mod transcription;
mod usage;
mod user;
mod whisper;

pub use diarization::*;
pub use media::*;
pub use plan::*;
pub use subscription::*;
pub use transcription::*;
pub use usage::*;
pub use user::*;
pub use whisper::*;
