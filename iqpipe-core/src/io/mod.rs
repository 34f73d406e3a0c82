//! Source and sink interfaces consumed by the pipeline workers.

pub mod input;
pub mod output;

pub use input::{create_source, FileSource, InputSource, ToneSource};
pub use output::{create_writer, FileWriter, RawFileWriter, Rf64FileWriter, WavFileWriter};
