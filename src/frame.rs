// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Output framing for protocol 4 and up.

use std::io;
use std::mem;
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{FRAME, FRAME_HEADER_SIZE, FRAME_SIZE_TARGET};

/// A writer that can group its output into FRAME regions.
///
/// While framing is active, writes are buffered; `commit_frame` flushes the
/// buffer as one FRAME once it has reached the target size.  Frames never
/// split an opcode because the pickler only commits between values.
pub struct Framer<W> {
    writer: W,
    frame: Option<Vec<u8>>,
}

impl<W: io::Write> Framer<W> {
    pub fn new(writer: W) -> Framer<W> {
        Framer { writer, frame: None }
    }

    pub fn is_framing(&self) -> bool {
        self.frame.is_some()
    }

    pub fn start_framing(&mut self) {
        self.frame = Some(Vec::with_capacity(FRAME_SIZE_TARGET));
    }

    /// Write out the current frame if it is large enough, or unconditionally
    /// with `force`.  Empty frames are never written.
    pub fn commit_frame(&mut self, force: bool) -> io::Result<()> {
        let ready = match self.frame {
            Some(ref buf) => !buf.is_empty() && (force || buf.len() >= FRAME_SIZE_TARGET),
            None => false,
        };
        if ready {
            let buf = self.frame.as_mut().map(mem::take).unwrap_or_default();
            log::trace!("committing frame of {} bytes", buf.len());
            let mut header = [FRAME; FRAME_HEADER_SIZE];
            LittleEndian::write_u64(&mut header[1..], buf.len() as u64);
            self.writer.write_all(&header)?;
            self.writer.write_all(&buf)?;
            if let Some(ref mut frame) = self.frame {
                // Reuse the allocation for the next frame.
                *frame = buf;
                frame.clear();
            }
        }
        Ok(())
    }

    /// Flush the last frame and stop framing.
    pub fn end_framing(&mut self) -> io::Result<()> {
        self.commit_frame(true)?;
        self.frame = None;
        Ok(())
    }

    /// Drop the buffered frame without writing it.
    pub fn abort_framing(&mut self) {
        if let Some(ref frame) = self.frame {
            log::debug!("discarding {} buffered bytes", frame.len());
        }
        self.frame = None;
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: io::Write> io::Write for Framer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.frame {
            Some(ref mut frame) => {
                frame.extend_from_slice(buf);
                Ok(buf.len())
            }
            None => self.writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
