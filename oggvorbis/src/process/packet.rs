use std::collections::VecDeque;

use log::{Level, trace};

use crate::log_or_err;
use crate::process::page::Page;
use crate::utils::errors::{Error, Result};

/// A complete codec packet reassembled from one or more page segments.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub data: Vec<u8>,
    pub serial: u32,
    /// First packet of its logical stream.
    pub first_in_stream: bool,
    /// Last packet of its logical stream.
    pub last_in_stream: bool,
    /// Granule position of the page this packet completes, set only on the
    /// last packet completed on that page.
    pub granule: Option<u64>,
    /// Offset of the page on which the packet completed.
    pub page_offset: u64,
    /// Offset just past that page.
    pub page_end: u64,
}

/// Insertion-ordered map from stream serial number to per-stream state.
///
/// Files rarely carry more than a handful of logical streams, so a linear
/// scan over a vector keeps iteration in the order streams were discovered.
#[derive(Debug, Clone)]
pub struct StreamMap<V> {
    entries: Vec<(u32, V)>,
}

impl<V> Default for StreamMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> StreamMap<V> {
    pub fn get(&self, serial: u32) -> Option<&V> {
        self.entries
            .iter()
            .find(|(s, _)| *s == serial)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, serial: u32) -> Option<&mut V> {
        self.entries
            .iter_mut()
            .find(|(s, _)| *s == serial)
            .map(|(_, v)| v)
    }

    pub fn get_or_insert_with(&mut self, serial: u32, default: impl FnOnce() -> V) -> &mut V {
        let index = match self.entries.iter().position(|(s, _)| *s == serial) {
            Some(index) => index,
            None => {
                self.entries.push((serial, default()));
                self.entries.len() - 1
            }
        };

        &mut self.entries[index].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &V)> {
        self.entries.iter().map(|(s, v)| (*s, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut V)> {
        self.entries.iter_mut().map(|(s, v)| (*s, v))
    }
}

#[derive(Debug)]
struct Continuation {
    partial: Option<Vec<u8>>,
    next_sequence: Option<u32>,
    in_sync: bool,
}

impl Continuation {
    fn new(in_sync: bool) -> Self {
        Self {
            partial: None,
            next_sequence: None,
            in_sync,
        }
    }
}

/// Reassembles packets from pages, one continuation buffer per logical stream.
#[derive(Debug)]
pub struct PacketAssembler {
    streams: StreamMap<Continuation>,
    pub(crate) fail_level: Level,
}

impl Default for PacketAssembler {
    fn default() -> Self {
        Self {
            streams: StreamMap::default(),
            fail_level: Level::Error,
        }
    }
}

impl PacketAssembler {
    pub fn set_fail_level(&mut self, level: Level) {
        self.fail_level = level;
    }

    /// Forgets every open continuation buffer after the page reader moved.
    ///
    /// Until a stream is seen again, a leading continued fragment on its next
    /// page is dropped instead of being reported as corruption.
    pub fn reset(&mut self) {
        for (_, state) in self.streams.iter_mut() {
            state.partial = None;
            state.next_sequence = None;
            state.in_sync = false;
        }
    }

    /// Forgets the continuation state of one stream.
    pub fn reset_stream(&mut self, serial: u32) {
        if let Some(state) = self.streams.get_mut(serial) {
            state.partial = None;
            state.next_sequence = None;
            state.in_sync = false;
        }
    }

    /// Whether a packet of this stream is waiting for its next page.
    pub fn has_partial(&self, serial: u32) -> bool {
        self.streams
            .get(serial)
            .is_some_and(|s| s.partial.is_some())
    }

    /// Splits a page into packets, appending completed ones to `out`.
    pub fn push_page(&mut self, page: &Page, out: &mut VecDeque<Packet>) -> Result<()> {
        let serial = page.serial;
        let state = self
            .streams
            .get_or_insert_with(serial, || Continuation::new(page.is_first()));

        if let Some(expected) = state.next_sequence {
            if page.sequence != expected && state.in_sync {
                let lost = state.partial.take().map_or(0, |p| p.len());
                state.in_sync = false;
                log_or_err!(
                    self,
                    Level::Warn,
                    Error::malformed_page(format!(
                        "serial {serial:#010X}: expected page {expected}, found {} ({lost} buffered bytes dropped)",
                        page.sequence
                    ))
                );
            }
        }
        state.next_sequence = Some(page.sequence.wrapping_add(1));

        let mut skipping = false;
        let mut buf = match state.partial.take() {
            Some(partial) if page.is_continued() => partial,
            Some(partial) => {
                let lost = partial.len();
                log_or_err!(
                    self,
                    Level::Warn,
                    Error::malformed_page(format!(
                        "serial {serial:#010X}: page {} does not continue an open packet ({lost} bytes dropped)",
                        page.sequence
                    ))
                );
                Vec::new()
            }
            None if page.is_continued() => {
                if state.in_sync {
                    return Err(Error::malformed_page(format!(
                        "serial {serial:#010X}: page {} continues a packet that was never started",
                        page.sequence
                    )));
                }
                skipping = true;
                Vec::new()
            }
            None => Vec::new(),
        };
        state.in_sync = true;

        let last_complete = page.segment_table.iter().rposition(|&lacing| lacing < 255);
        let mut cursor = 0;
        let mut first_on_page = true;

        for (i, &lacing) in page.segment_table.iter().enumerate() {
            let segment = &page.body[cursor..cursor + lacing as usize];
            cursor += lacing as usize;

            if !skipping {
                buf.extend_from_slice(segment);
            }
            if lacing == 255 {
                continue;
            }

            if skipping {
                trace!("serial {serial:#010X}: dropped leading fragment after resync");
                skipping = false;
                continue;
            }

            let closes_page = Some(i) == last_complete;
            out.push_back(Packet {
                data: std::mem::take(&mut buf),
                serial,
                first_in_stream: page.is_first() && first_on_page,
                last_in_stream: page.is_last() && closes_page,
                granule: if closes_page { page.granule() } else { None },
                page_offset: page.offset,
                page_end: page.end_offset(),
            });
            first_on_page = false;
        }

        if skipping {
            state.in_sync = false;
        } else if page.segment_table.last() == Some(&255) {
            state.partial = Some(buf);
        }

        Ok(())
    }
}
