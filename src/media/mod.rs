//! Media stages behind the job pipeline: fetch the source, turn it into
//! speech-ready audio, hand it to a speech-to-text backend.

pub mod convert;
pub mod download;
pub mod transcribe;

pub use convert::{validate_audio, AudioConverter};
pub use download::{download_media, CommandDownloader};
pub use transcribe::{CommandTranscriber, Transcriber};
