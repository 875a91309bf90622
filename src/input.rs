use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use oggvorbis::source::{ByteSource, Seekable, Sequential};

/// Byte source handed to the reader, movable into the decode thread.
pub type Input = Box<dyn ByteSource + Send>;

pub fn is_pipe<P: AsRef<Path>>(input_path: P) -> bool {
    input_path.as_ref().to_string_lossy() == "-"
}

/// Opens a file as a seekable source, or stdin for "-" as a sequential one.
pub fn open_input<P: AsRef<Path>>(input_path: P) -> Result<Input> {
    let input_path = input_path.as_ref();

    if is_pipe(input_path) {
        log::debug!("Reading from stdin, seeking disabled");
        return Ok(Box::new(Sequential::new(io::stdin())));
    }

    let file = File::open(input_path)
        .with_context(|| format!("Failed to open {}", input_path.display()))?;
    Ok(Box::new(Seekable::new(BufReader::new(file))))
}
