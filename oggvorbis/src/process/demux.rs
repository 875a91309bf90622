use std::collections::VecDeque;

use log::{Level, debug, trace, warn};

use crate::process::header::{
    Comments, HeaderParser, PACKET_IDENTIFICATION, SetupState, has_preamble,
};
use crate::process::packet::{Packet, PacketAssembler};
use crate::process::page::{Page, PageReader};
use crate::process::reader::ReaderOptions;
use crate::source::ByteSource;
use crate::utils::errors::{Error, Result};

/// Where audio data of the selected stream begins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStart {
    /// Offset of the page on which the setup header completes.
    pub page_offset: u64,
    /// Packets of that page still to be dropped when it is reread from its
    /// start. A leading continued fragment is not counted.
    pub skip: usize,
    /// Offset just past that page.
    pub data_start: u64,
}

/// Splits a byte source into the packets of one selected Vorbis stream.
///
/// Pages of every other logical stream are still assembled so that their
/// framing stays in sync, but their packets are discarded.
#[derive(Debug)]
pub struct Demuxer<S: ByteSource> {
    pub(crate) pages: PageReader<S>,
    assembler: PacketAssembler,
    scratch: VecDeque<Packet>,
    queue: VecDeque<Packet>,
    selected: Option<u32>,
    audio_start: AudioStart,
    skip_packets: usize,
    ended: bool,
}

impl<S: ByteSource> Demuxer<S> {
    /// Selects the first Vorbis stream and parses its three header packets.
    ///
    /// Audio packets that share a page with the setup header are kept for
    /// [`next_packet`](Self::next_packet).
    pub fn open(source: S, options: &ReaderOptions) -> Result<(Self, SetupState, Comments)> {
        let mut pages = PageReader::new(source)?;
        pages.set_fail_level(options.fail_level);
        pages.set_resync_window(options.resync_window);

        let mut assembler = PacketAssembler::default();
        assembler.set_fail_level(options.fail_level);

        let mut demux = Self {
            pages,
            assembler,
            scratch: VecDeque::new(),
            queue: VecDeque::new(),
            selected: None,
            audio_start: AudioStart::default(),
            skip_packets: 0,
            ended: false,
        };

        let mut parser = HeaderParser::default();
        let mut index = 0;

        while !parser.is_complete() {
            let page = demux.pages.next_page()?.ok_or(Error::UnexpectedEndOfInput)?;
            if demux.selected.is_none() && !page.is_first() {
                return Err(Error::UnsupportedStream(format!(
                    "no Vorbis stream begins before the page at offset {}",
                    page.offset
                )));
            }

            demux.push_page(&page)?;

            let mut on_page = 0;
            let mut stream_ended = false;
            while let Some(packet) = demux.scratch.pop_front() {
                if demux.selected.is_none() && packet.first_in_stream {
                    if has_preamble(&packet.data, PACKET_IDENTIFICATION) {
                        debug!("selected Vorbis stream {:#010X}", packet.serial);
                        demux.selected = Some(packet.serial);
                    } else {
                        debug!("ignoring logical stream {:#010X}", packet.serial);
                    }
                }
                if Some(packet.serial) != demux.selected {
                    continue;
                }

                if parser.is_complete() {
                    demux.queue.push_back(packet);
                    continue;
                }

                parser.parse_header(index, &packet.data)?;
                index += 1;
                on_page += 1;
                stream_ended |= packet.last_in_stream;

                if parser.is_complete() {
                    demux.audio_start = AudioStart {
                        page_offset: packet.page_offset,
                        skip: on_page - usize::from(page.is_continued()),
                        data_start: packet.page_end,
                    };
                    debug!("audio data starts at {:?}", demux.audio_start);
                }
            }

            if stream_ended {
                break;
            }
        }

        let (setup, comments) = parser.finish()?;
        Ok((demux, setup, comments))
    }

    /// Serial number of the selected stream.
    pub fn serial(&self) -> u32 {
        self.selected.unwrap_or_default()
    }

    pub fn audio_start(&self) -> AudioStart {
        self.audio_start
    }

    pub fn is_seekable(&self) -> bool {
        self.pages.is_seekable()
    }

    pub fn byte_len(&mut self) -> Result<u64> {
        self.pages.byte_len()
    }

    pub fn set_fail_level(&mut self, level: Level) {
        self.pages.set_fail_level(level);
        self.assembler.set_fail_level(level);
    }

    pub fn into_inner(self) -> S {
        self.pages.into_inner()
    }

    fn push_page(&mut self, page: &Page) -> Result<()> {
        match self.assembler.push_page(page, &mut self.scratch) {
            Err(e) if self.selected != Some(page.serial) => {
                warn!("logical stream {:#010X}: {e}", page.serial);
                self.assembler.reset_stream(page.serial);
                Ok(())
            }
            other => other,
        }
    }

    fn take_selected(&mut self) {
        while let Some(packet) = self.scratch.pop_front() {
            if Some(packet.serial) != self.selected {
                continue;
            }
            if self.skip_packets > 0 {
                self.skip_packets -= 1;
                continue;
            }

            trace!(
                "packet: {} bytes, granule {:?}, page {}",
                packet.data.len(),
                packet.granule,
                packet.page_offset
            );
            self.queue.push_back(packet);
        }
    }

    /// Next packet of the selected stream, `None` once its last page was read
    /// or the source ended. Chained streams after it are not followed.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.queue.pop_front() {
                if packet.last_in_stream {
                    self.ended = true;
                    self.queue.clear();
                }
                return Ok(Some(packet));
            }

            if self.ended {
                return Ok(None);
            }

            let Some(page) = self.pages.next_page()? else {
                return Ok(None);
            };
            self.push_page(&page)?;
            self.take_selected();
        }
    }

    /// Reads pages up to and including the next one of the selected stream,
    /// leaving the packets completed on it queued.
    pub fn load_next_page(&mut self) -> Result<Option<Page>> {
        loop {
            let Some(page) = self.pages.next_page()? else {
                return Ok(None);
            };
            self.push_page(&page)?;
            self.take_selected();

            if Some(page.serial) == self.selected {
                return Ok(Some(page));
            }
        }
    }

    /// Removes every queued packet.
    pub fn drain_queue(&mut self) -> impl Iterator<Item = Packet> + '_ {
        self.queue.drain(..)
    }

    /// Jumps to a byte offset, dropping every partially assembled packet.
    pub fn reposition(&mut self, offset: u64) -> Result<()> {
        self.pages.reposition(offset)?;
        self.assembler.reset();
        self.scratch.clear();
        self.queue.clear();
        self.skip_packets = 0;
        self.ended = false;
        Ok(())
    }

    /// Rewinds to the first audio packet of the selected stream.
    pub fn rewind_to_audio(&mut self) -> Result<()> {
        self.reposition(self.audio_start.page_offset)?;
        self.skip_packets = self.audio_start.skip;
        Ok(())
    }
}
