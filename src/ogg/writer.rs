use super::page::{Page, MAX_SEGMENTS};

/// Builds pages for one stream from a sequence of packets.
///
/// Packets are laced into segments; a page is emitted whenever its
/// segment table fills, and on `flush`. The page granule position is
/// that of the last packet completing on the page, or -1 when none does.
pub struct PageWriter {
    serial: u32,
    sequence: u32,
    segments: Vec<u8>,
    body: Vec<u8>,
    /// Granule of the last packet completed on the pending page
    granule_pos: i64,
    /// Pending page continues a packet from the previous page
    continued: bool,
    /// The stream's first packet was marked beginning-of-stream
    bos: bool,
    /// An end-of-stream packet completed on the pending page
    eos: bool,
}

impl PageWriter {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
            segments: Vec::new(),
            body: Vec::new(),
            granule_pos: -1,
            continued: false,
            bos: false,
            eos: false,
        }
    }

    /// Lace one packet into the pending page, returning any pages that
    /// filled up along the way.
    pub fn add_packet(&mut self, data: &[u8], granule_pos: i64, bos: bool, eos: bool) -> Vec<Page> {
        if bos && self.sequence == 0 && self.segments.is_empty() {
            self.bos = true;
        }

        let mut emitted = Vec::new();
        let n_full = data.len() / 255;
        let mut cursor = 0;
        for i in 0..=n_full {
            if self.segments.len() == MAX_SEGMENTS {
                // Page full; if part of this packet is already laced the
                // next page continues it.
                let continued_next = i > 0;
                emitted.push(self.emit(continued_next));
            }
            let lace = if i < n_full { 255 } else { (data.len() % 255) as u8 };
            self.segments.push(lace);
            self.body.extend_from_slice(&data[cursor..cursor + lace as usize]);
            cursor += lace as usize;
        }

        self.granule_pos = granule_pos;
        if eos {
            self.eos = true;
        }
        emitted
    }

    /// Emit the pending page, if any.
    pub fn flush(&mut self) -> Option<Page> {
        if self.segments.is_empty() {
            return None;
        }
        Some(self.emit(false))
    }

    fn emit(&mut self, continued_next: bool) -> Page {
        let page = Page {
            offset: 0,
            granule_pos: self.granule_pos,
            serial: self.serial,
            sequence: self.sequence,
            continued: self.continued,
            bos: self.bos && self.sequence == 0,
            eos: self.eos,
            segment_table: std::mem::take(&mut self.segments),
            body: std::mem::take(&mut self.body),
        };
        self.sequence += 1;
        self.continued = continued_next;
        self.granule_pos = -1;
        self.eos = false;
        page
    }
}
