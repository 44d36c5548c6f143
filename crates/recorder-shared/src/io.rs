//! Output stream seam between the sink and the muxer

use std::io::{Seek, Write};

/// A seekable byte stream the muxer writes the container into
pub trait WritableStream: Write + Seek + Send {}

impl<T: Write + Seek + Send> WritableStream for T {}
