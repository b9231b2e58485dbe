use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Sizes of the last compress/decompress operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompressionStats {
    pub original_size: usize,
    pub compressed_size: usize,
    pub compression_ratio: f64,
}

/// Static Huffman coder. The frequency table travels in a header so the
/// decoder rebuilds the identical tree:
/// `[unique_byte_count:1][(byte:1, freq:4 BE) * count][packed codewords]`
/// with a count byte of 0 standing for 256.
pub struct HuffmanCompressor {
    stats: CompressionStats,
}

enum Node {
    Leaf(u8),
    Branch(Box<Node>, Box<Node>),
}

struct HeapEntry {
    freq: u64,
    seq: u64,
    node: Node,
}

// Min-heap order on (frequency, insertion sequence). The sequence keeps
// tie-breaking identical on both ends of the link.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.freq, self.seq).cmp(&(other.freq, other.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.freq == other.freq && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

fn build_tree(entries: Vec<(u8, u64)>) -> Node {
    let mut heap = BinaryHeap::with_capacity(entries.len());
    let mut seq = 0u64;
    for (byte, freq) in entries {
        heap.push(Reverse(HeapEntry {
            freq,
            seq,
            node: Node::Leaf(byte),
        }));
        seq += 1;
    }

    while heap.len() > 1 {
        let Reverse(left) = heap.pop().expect("heap has two entries");
        let Reverse(right) = heap.pop().expect("heap has two entries");
        heap.push(Reverse(HeapEntry {
            freq: left.freq + right.freq,
            seq,
            node: Node::Branch(Box::new(left.node), Box::new(right.node)),
        }));
        seq += 1;
    }

    heap.pop().expect("heap has one entry").0.node
}

fn assign_codes(node: &Node, prefix: &mut Vec<u8>, codes: &mut [Vec<u8>; 256]) {
    match node {
        Node::Leaf(byte) => {
            // A one-symbol tree still needs a nonempty code.
            if prefix.is_empty() {
                codes[*byte as usize] = vec![0];
            } else {
                codes[*byte as usize] = prefix.clone();
            }
        }
        Node::Branch(left, right) => {
            prefix.push(0);
            assign_codes(left, prefix, codes);
            prefix.pop();
            prefix.push(1);
            assign_codes(right, prefix, codes);
            prefix.pop();
        }
    }
}

impl HuffmanCompressor {
    pub fn new() -> Self {
        Self {
            stats: CompressionStats::default(),
        }
    }

    pub fn compress(&mut self, data: &[u8]) -> Vec<u8> {
        if data.is_empty() {
            self.stats = CompressionStats::default();
            return Vec::new();
        }

        // Histogram in first-appearance order; the header is written in the
        // same order so both ends feed the heap identically.
        let mut counts = [0u64; 256];
        let mut order: Vec<u8> = Vec::new();
        for &byte in data {
            if counts[byte as usize] == 0 {
                order.push(byte);
            }
            counts[byte as usize] += 1;
        }

        let entries: Vec<(u8, u64)> =
            order.iter().map(|&b| (b, counts[b as usize])).collect();
        let root = build_tree(entries);

        let mut codes: [Vec<u8>; 256] = std::array::from_fn(|_| Vec::new());
        assign_codes(&root, &mut Vec::new(), &mut codes);

        let mut out = Vec::with_capacity(1 + order.len() * 5 + data.len() / 2);
        out.push(if order.len() == 256 { 0 } else { order.len() as u8 });
        for &byte in &order {
            out.push(byte);
            let mut freq = [0u8; 4];
            BigEndian::write_u32(&mut freq, counts[byte as usize] as u32);
            out.extend_from_slice(&freq);
        }

        let mut acc = 0u8;
        let mut nbits = 0u8;
        for &byte in data {
            for &bit in &codes[byte as usize] {
                acc = (acc << 1) | bit;
                nbits += 1;
                if nbits == 8 {
                    out.push(acc);
                    acc = 0;
                    nbits = 0;
                }
            }
        }
        if nbits > 0 {
            out.push(acc << (8 - nbits));
        }

        self.stats = CompressionStats {
            original_size: data.len(),
            compressed_size: out.len(),
            compression_ratio: out.len() as f64 / data.len() as f64,
        };
        info!(
            "compressed {} bytes to {} bytes (ratio {:.2})",
            data.len(),
            out.len(),
            self.stats.compression_ratio
        );

        out
    }

    pub fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            self.stats = CompressionStats::default();
            return Ok(Vec::new());
        }

        let unique = match data[0] {
            0 => 256usize,
            n => n as usize,
        };
        let header_size = 1 + unique * 5;
        if data.len() < header_size {
            return Err(Error::Compression("malformed header"));
        }

        let mut entries: Vec<(u8, u64)> = Vec::with_capacity(unique);
        let mut total: u64 = 0;
        for i in 0..unique {
            let offset = 1 + i * 5;
            let byte = data[offset];
            let freq = BigEndian::read_u32(&data[offset + 1..offset + 5]) as u64;
            if freq == 0 {
                return Err(Error::Compression("malformed header"));
            }
            total += freq;
            entries.push((byte, freq));
        }

        let root = build_tree(entries);
        let body = &data[header_size..];
        let mut out = Vec::with_capacity(total as usize);

        if let Node::Leaf(byte) = root {
            // Degenerate tree: every symbol is one `0` bit.
            if (body.len() as u64) * 8 < total {
                return Err(Error::Compression("corrupt stream"));
            }
            out.resize(total as usize, byte);
        } else {
            let mut node = &root;
            'bits: for &packed in body {
                for shift in (0..8).rev() {
                    let bit = (packed >> shift) & 1;
                    node = match node {
                        Node::Branch(left, right) => {
                            if bit == 0 {
                                left
                            } else {
                                right
                            }
                        }
                        Node::Leaf(_) => unreachable!("walk restarts at the root"),
                    };
                    if let Node::Leaf(byte) = node {
                        out.push(*byte);
                        node = &root;
                        // Remaining bits are tail padding once every symbol
                        // is out.
                        if out.len() as u64 == total {
                            break 'bits;
                        }
                    }
                }
            }
            if (out.len() as u64) < total {
                return Err(Error::Compression("corrupt stream"));
            }
        }

        self.stats = CompressionStats {
            original_size: out.len(),
            compressed_size: data.len(),
            compression_ratio: data.len() as f64 / out.len() as f64,
        };
        debug!("decompressed {} bytes to {} bytes", data.len(), out.len());

        Ok(out)
    }

    pub fn stats(&self) -> CompressionStats {
        self.stats
    }
}

impl Default for HuffmanCompressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(data: &[u8]) {
        let mut compressor = HuffmanCompressor::new();
        let compressed = compressor.compress(data);
        let back = compressor.decompress(&compressed).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn empty_input_stays_empty() {
        let mut compressor = HuffmanCompressor::new();
        assert!(compressor.compress(b"").is_empty());
        assert!(compressor.decompress(b"").unwrap().is_empty());
    }

    #[test]
    fn ascii_round_trip() {
        round_trip(b"the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn single_byte_round_trip() {
        round_trip(b"A");
    }

    #[test]
    fn all_identical_bytes_round_trip() {
        round_trip(&[0x55u8; 300]);
    }

    #[test]
    fn full_byte_range_round_trip() {
        let data: Vec<u8> = (0..=255u8).collect();
        round_trip(&data);
    }

    #[test]
    fn repeated_data_shrinks() {
        let data = vec![0u8; 1024];
        let mut compressor = HuffmanCompressor::new();
        let compressed = compressor.compress(&data);
        assert!(compressed.len() < 200, "got {} bytes", compressed.len());
        assert_eq!(compressor.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn identical_histograms_build_identical_output() {
        let data = b"abracadabra".repeat(7);
        let mut a = HuffmanCompressor::new();
        let mut b = HuffmanCompressor::new();
        assert_eq!(a.compress(&data), b.compress(&data));
    }

    #[test]
    fn padding_never_emits_extra_symbols() {
        // Two symbols with equal weight get one-bit codes, so the zero-bit
        // tail would decode as more symbols without the frequency totals.
        let data = b"abab";
        round_trip(data);
    }

    #[test]
    fn stats_track_the_last_operation() {
        let data = b"hello hello hello";
        let mut compressor = HuffmanCompressor::new();
        let compressed = compressor.compress(data);
        let stats = compressor.stats();
        assert_eq!(stats.original_size, data.len());
        assert_eq!(stats.compressed_size, compressed.len());
        assert!(stats.compression_ratio > 0.0);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let mut compressor = HuffmanCompressor::new();
        // Claims 9 table entries but carries none.
        let result = compressor.decompress(&[9u8, 1, 2]);
        assert!(matches!(result, Err(Error::Compression("malformed header"))));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let mut compressor = HuffmanCompressor::new();
        let compressed = compressor.compress(&[0x11u8; 64]);
        // Drop the packed codewords, keep the header.
        let truncated = &compressed[..compressed.len() - 1];
        assert!(compressor.decompress(truncated).is_err());
    }
}
