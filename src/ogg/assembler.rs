use log::warn;

use super::page::Page;

/// One packet drained from a stream of pages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub eos: bool,
}

/// Reassembles packets from the pages of a single stream, following the
/// lacing rules: segments of 255 bytes continue a packet, a shorter
/// segment (including zero) terminates it, and a packet may span pages
/// when its page carries the `continued` flag.
#[derive(Debug, Default)]
pub struct PacketAssembler {
    partial: Vec<u8>,
    /// A packet is open from a previous page
    mid_packet: bool,
}

impl PacketAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one page; returns the packets that complete on it.
    pub fn submit(&mut self, page: &Page) -> Vec<Packet> {
        let mut packets = Vec::new();

        if self.mid_packet && !page.continued {
            // The stream skipped the rest of a spanning packet (a dropped
            // or corrupt page); the partial data is undecodable.
            warn!(
                "Dropping {} byte partial packet in stream serialno={}",
                self.partial.len(),
                page.serial
            );
            self.partial.clear();
            self.mid_packet = false;
        }
        let mut skip_leading = !self.mid_packet && page.continued;

        let mut cursor = 0;
        let n_segments = page.segment_table.len();
        for (i, &lace) in page.segment_table.iter().enumerate() {
            let len = lace as usize;
            let segment = &page.body[cursor..cursor + len];
            cursor += len;

            if skip_leading {
                // Continuation of a packet whose start we never saw.
                if lace < 255 {
                    skip_leading = false;
                }
                continue;
            }

            self.partial.extend_from_slice(segment);
            if lace < 255 {
                let data = std::mem::take(&mut self.partial);
                let eos = page.eos && i == n_segments - 1;
                packets.push(Packet { data, eos });
                self.mid_packet = false;
            } else {
                self.mid_packet = true;
            }
        }

        packets
    }
}
