//! Multi-packet stream framing (C2, spec §4.2).
//!
//! Payloads larger than one LoRa packet are split into a sequence of
//! packets, each carrying a 10-byte header and a trailing CRC16, plus a
//! CRC32 over the whole reassembled payload. An optional XOR-parity FEC
//! layer groups every `k` data packets with one parity packet so a single
//! packet lost per group can be reconstructed without a retransmit.

use crc::{Crc, CRC_16_IBM_3740, CRC_32_ISO_HDLC};

use crate::error::{PackError, UnpackError};

const MAGIC_DATA: u16 = 0xDA7A;
const MAGIC_PARITY: u16 = 0xDA7B;
const HEADER_SIZE: usize = 10;
const CRC16_SIZE: usize = 2;
const CRC32_SIZE: usize = 4;

/// Maximum size of one on-air stream packet (spec §4.2, matches [`crate::frame::LORA_MAX_PAYLOAD`]).
pub const LORA_MAX_PACKET: usize = 250;
/// Payload bytes available per packet once the header and CRC16 trailer are subtracted.
pub const MAX_PAYLOAD_PER_PACKET: usize = LORA_MAX_PACKET - HEADER_SIZE - CRC16_SIZE;
/// Default number of data packets covered by one XOR parity packet.
pub const DEFAULT_FEC_BLOCK_SIZE: usize = 4;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamPacket {
    pub total_len: u32,
    pub seq: u16,
    pub count: u16,
    pub payload: Vec<u8>,
}

fn encode_packet(magic: u16, total_len: u32, seq: u16, count: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC16_SIZE);
    out.extend_from_slice(&magic.to_be_bytes());
    out.extend_from_slice(&total_len.to_be_bytes());
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(payload);
    let trailer = crc16(&out);
    out.extend_from_slice(&trailer.to_be_bytes());
    out
}

struct DecodedPacket {
    magic: u16,
    total_len: u32,
    seq: u16,
    count: u16,
    payload: Vec<u8>,
}

fn decode_packet(packet: &[u8]) -> Result<DecodedPacket, UnpackError> {
    if packet.len() < HEADER_SIZE + CRC16_SIZE {
        return Err(UnpackError::ShortPacket(packet.len()));
    }
    let (body, trailer) = packet.split_at(packet.len() - CRC16_SIZE);
    let expected = u16::from_be_bytes([trailer[0], trailer[1]]);
    let computed = crc16(body);
    if expected != computed {
        return Err(UnpackError::Crc16Fail { expected, computed });
    }

    let magic = u16::from_be_bytes([body[0], body[1]]);
    if magic != MAGIC_DATA && magic != MAGIC_PARITY {
        return Err(UnpackError::BadMagic(magic));
    }
    let total_len = u32::from_be_bytes([body[2], body[3], body[4], body[5]]);
    let seq = u16::from_be_bytes([body[6], body[7]]);
    let count = u16::from_be_bytes([body[8], body[9]]);
    let payload = body[HEADER_SIZE..].to_vec();

    Ok(DecodedPacket { magic, total_len, seq, count, payload })
}

/// Split `data` into one or more stream packets, each under [`LORA_MAX_PACKET`].
///
/// A CRC32 of `data` is appended before splitting so [`unpack_stream`] can
/// validate the whole reassembled payload, not just individual packets.
pub fn pack_stream(data: &[u8]) -> Result<Vec<Vec<u8>>, PackError> {
    if data.is_empty() {
        return Err(PackError::PackEmpty);
    }
    let mut with_crc = data.to_vec();
    with_crc.extend_from_slice(&crc32(data).to_be_bytes());

    let total_len = u32::try_from(with_crc.len()).map_err(|_| PackError::PackTooLarge(with_crc.len() as u64))?;
    let chunks: Vec<&[u8]> = with_crc.chunks(MAX_PAYLOAD_PER_PACKET).collect();
    let count = u16::try_from(chunks.len()).map_err(|_| PackError::PackTooMany(chunks.len() as u32))?;

    Ok(chunks
        .iter()
        .enumerate()
        .map(|(seq, chunk)| encode_packet(MAGIC_DATA, total_len, seq as u16, count, chunk))
        .collect())
}

/// Parse and validate a single stream packet.
pub fn unpack_packet(packet: &[u8]) -> Result<StreamPacket, UnpackError> {
    let decoded = decode_packet(packet)?;
    Ok(StreamPacket {
        total_len: decoded.total_len,
        seq: decoded.seq,
        count: decoded.count,
        payload: decoded.payload,
    })
}

/// Reassemble a complete set of stream packets back into the original payload.
///
/// `packets` must contain exactly `count` entries with distinct sequence
/// numbers 0..count and a consistent `total_len`; the trailing CRC32 is
/// verified and stripped before returning.
pub fn unpack_stream(packets: &[Vec<u8>]) -> Result<Vec<u8>, UnpackError> {
    if packets.is_empty() {
        return Err(UnpackError::ShortPacket(0));
    }
    let parsed: Vec<StreamPacket> =
        packets.iter().map(|p| unpack_packet(p)).collect::<Result<_, _>>()?;

    let total_len = parsed[0].total_len;
    let count = parsed[0].count;
    if parsed.iter().any(|p| p.total_len != total_len || p.count != count) {
        return Err(UnpackError::SizeMismatch);
    }

    let mut by_seq: Vec<Option<&StreamPacket>> = vec![None; count as usize];
    for p in &parsed {
        if p.seq as usize >= by_seq.len() {
            return Err(UnpackError::SizeMismatch);
        }
        if by_seq[p.seq as usize].is_some() {
            return Err(UnpackError::Duplicate(p.seq));
        }
        by_seq[p.seq as usize] = Some(p);
    }

    let missing: Vec<u16> = by_seq
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_none())
        .map(|(seq, _)| seq as u16)
        .collect();
    if !missing.is_empty() {
        return Err(UnpackError::Missing(missing));
    }

    let mut assembled = Vec::with_capacity(total_len as usize);
    for p in by_seq.into_iter().flatten() {
        assembled.extend_from_slice(&p.payload);
    }
    if assembled.len() != total_len as usize {
        return Err(UnpackError::SizeMismatch);
    }

    let split_at = assembled.len() - CRC32_SIZE;
    let (payload, trailer) = assembled.split_at(split_at);
    let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32(payload);
    if expected != computed {
        return Err(UnpackError::Crc32Fail { expected, computed });
    }

    Ok(payload.to_vec())
}

/// XOR two same-length (or implicitly zero-padded) byte slices.
pub fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| a.get(i).copied().unwrap_or(0) ^ b.get(i).copied().unwrap_or(0))
        .collect()
}

/// Like [`pack_stream`] but interleaves one XOR-parity packet after every
/// `block_size` data packets, letting [`unpack_stream_with_fec`] recover a
/// single lost packet per group without a retransmit (spec §4.2 FEC).
pub fn pack_stream_with_fec(data: &[u8], block_size: usize) -> Result<Vec<Vec<u8>>, PackError> {
    let block_size = block_size.max(1);
    let data_packets = pack_stream(data)?;
    let total_len = data_packets[0][2..6].try_into().map(u32::from_be_bytes).unwrap();
    let count = data_packets.len() as u16;

    let mut out = Vec::with_capacity(data_packets.len() + data_packets.len() / block_size + 1);
    for (group_idx, group) in data_packets.chunks(block_size).enumerate() {
        out.extend(group.iter().cloned());
        let parity_payload = group
            .iter()
            .map(|pkt| &pkt[HEADER_SIZE..pkt.len() - CRC16_SIZE])
            .fold(Vec::new(), |acc, chunk| xor_bytes(&acc, chunk));
        out.push(encode_packet(
            MAGIC_PARITY,
            total_len,
            group_idx as u16,
            count,
            &parity_payload,
        ));
    }
    Ok(out)
}

/// Reassemble data packed with [`pack_stream_with_fec`], recovering at
/// most one missing data packet per `block_size` group from its parity
/// packet. `received` need not be in order and may omit up to one data
/// packet per group.
pub fn unpack_stream_with_fec(
    received: &[Vec<u8>],
    block_size: usize,
) -> Result<Vec<u8>, UnpackError> {
    let block_size = block_size.max(1);
    let decoded: Vec<DecodedPacket> =
        received.iter().map(|p| decode_packet(p)).collect::<Result<_, _>>()?;

    let count = decoded
        .iter()
        .find(|p| p.magic == MAGIC_DATA)
        .map(|p| p.count)
        .ok_or(UnpackError::Missing(vec![]))?;
    let total_len = decoded[0].total_len;

    let mut data_by_seq: Vec<Option<Vec<u8>>> = vec![None; count as usize];
    let mut parity_by_group: std::collections::HashMap<u16, Vec<u8>> = std::collections::HashMap::new();

    for p in &decoded {
        match p.magic {
            MAGIC_DATA => data_by_seq[p.seq as usize] = Some(p.payload.clone()),
            MAGIC_PARITY => {
                parity_by_group.insert(p.seq, p.payload.clone());
            }
            _ => {}
        }
    }

    for (group_idx, group) in (0..count).collect::<Vec<_>>().chunks(block_size).enumerate() {
        let missing: Vec<u16> = group
            .iter()
            .filter(|&&seq| data_by_seq[seq as usize].is_none())
            .copied()
            .collect();
        if missing.len() > 1 {
            continue; // unrecoverable from this group's parity; surfaced below as Missing
        }
        if missing.len() == 1 {
            if let Some(parity) = parity_by_group.get(&(group_idx as u16)) {
                let mut reconstructed = parity.clone();
                for &seq in group {
                    if seq != missing[0] {
                        if let Some(chunk) = &data_by_seq[seq as usize] {
                            reconstructed = xor_bytes(&reconstructed, chunk);
                        }
                    }
                }
                data_by_seq[missing[0] as usize] = Some(reconstructed);
            }
        }
    }

    let still_missing: Vec<u16> = data_by_seq
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_none())
        .map(|(seq, _)| seq as u16)
        .collect();
    if !still_missing.is_empty() {
        return Err(UnpackError::Missing(still_missing));
    }

    let mut assembled = Vec::with_capacity(total_len as usize);
    for chunk in data_by_seq.into_iter().flatten() {
        assembled.extend_from_slice(&chunk);
    }
    let split_at = assembled.len().saturating_sub(CRC32_SIZE);
    let (payload, trailer) = assembled.split_at(split_at);
    let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32(payload);
    if expected != computed {
        return Err(UnpackError::Crc32Fail { expected, computed });
    }
    Ok(payload.to_vec())
}

/// Reassembles packets arriving out of order and over time, evicting
/// streams that have been incomplete for longer than `timeout`.
pub struct PacketAssembler {
    timeout: std::time::Duration,
    pending: std::collections::HashMap<(u32, u16), PendingStream>,
}

struct PendingStream {
    by_seq: std::collections::HashMap<u16, Vec<u8>>,
    last_seen: std::time::Instant,
}

impl PacketAssembler {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self { timeout, pending: std::collections::HashMap::new() }
    }

    /// Feed one packet in. Returns the reassembled payload once every
    /// packet of its stream has arrived. A packet arriving for a
    /// sequence number already stored replaces it (idempotent, per
    /// spec §4.2) rather than producing a `Duplicate` error.
    pub fn add_packet(&mut self, packet: &[u8]) -> Result<Option<Vec<u8>>, UnpackError> {
        self.evict_expired();

        let decoded = unpack_packet(packet)?;
        let key = (decoded.total_len, decoded.count);
        let entry = self.pending.entry(key).or_insert_with(|| PendingStream {
            by_seq: std::collections::HashMap::new(),
            last_seen: std::time::Instant::now(),
        });
        entry.by_seq.insert(decoded.seq, packet.to_vec());
        entry.last_seen = std::time::Instant::now();

        if entry.by_seq.len() < decoded.count as usize {
            return Ok(None);
        }

        let entry = self.pending.remove(&key).unwrap();
        let mut packets: Vec<(u16, Vec<u8>)> = entry.by_seq.into_iter().collect();
        packets.sort_by_key(|(seq, _)| *seq);
        let packets: Vec<Vec<u8>> = packets.into_iter().map(|(_, p)| p).collect();
        unpack_stream(&packets).map(Some)
    }

    fn evict_expired(&mut self) {
        let timeout = self.timeout;
        self.pending.retain(|_, stream| stream.last_seen.elapsed() < timeout);
    }

    pub fn pending_streams(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack_round_trip() {
        let data = vec![42u8; 600];
        let packets = pack_stream(&data).unwrap();
        assert!(packets.len() > 1);
        for p in &packets {
            assert!(p.len() <= LORA_MAX_PACKET);
        }
        assert_eq!(unpack_stream(&packets).unwrap(), data);
    }

    #[test]
    fn empty_data_is_rejected() {
        assert_eq!(pack_stream(&[]), Err(PackError::PackEmpty));
    }

    #[test]
    fn out_of_order_packets_reassemble() {
        let data = b"small payload under one packet".to_vec();
        let mut packets = pack_stream(&data).unwrap();
        packets.reverse();
        assert_eq!(unpack_stream(&packets).unwrap(), data);
    }

    #[test]
    fn missing_packet_is_detected() {
        let data = vec![7u8; 600];
        let mut packets = pack_stream(&data).unwrap();
        packets.remove(1);
        assert!(matches!(unpack_stream(&packets), Err(UnpackError::Missing(_))));
    }

    #[test]
    fn corrupted_packet_fails_crc16() {
        let data = b"hello stream".to_vec();
        let mut packets = pack_stream(&data).unwrap();
        let last = packets[0].len() - 1;
        packets[0][last] ^= 0xFF;
        assert!(matches!(unpack_packet(&packets[0]), Err(UnpackError::Crc16Fail { .. })));
    }

    #[test]
    fn fec_recovers_one_lost_packet_per_group() {
        let data = vec![9u8; 900];
        let packets = pack_stream_with_fec(&data, 2).unwrap();
        let mut received = packets.clone();
        received.remove(0); // drop first data packet of the first group
        assert_eq!(unpack_stream_with_fec(&received, 2).unwrap(), data);
    }

    #[test]
    fn fec_cannot_recover_two_losses_in_one_group() {
        let data = vec![9u8; 900];
        let packets = pack_stream_with_fec(&data, 2).unwrap();
        let mut received = packets.clone();
        received.remove(1); // second packet of first group (data)
        received.remove(0); // first packet of first group (data)
        assert!(matches!(
            unpack_stream_with_fec(&received, 2),
            Err(UnpackError::Missing(_))
        ));
    }

    #[test]
    fn assembler_reassembles_across_add_calls() {
        let data = vec![3u8; 600];
        let packets = pack_stream(&data).unwrap();
        let mut assembler = PacketAssembler::new(std::time::Duration::from_secs(30));
        assert_eq!(assembler.add_packet(&packets[0]).unwrap(), None);
        assert_eq!(assembler.add_packet(&packets[1]).unwrap(), Some(data));
    }

    #[test]
    fn assembler_treats_duplicate_packet_as_idempotent_replacement() {
        let data = vec![5u8; 600];
        let packets = pack_stream(&data).unwrap();
        let mut assembler = PacketAssembler::new(std::time::Duration::from_secs(30));
        assert_eq!(assembler.add_packet(&packets[0]).unwrap(), None);
        // Re-deliver packet 0 before packet 1 ever arrives; this must not
        // count as two distinct sequence numbers toward completion.
        assert_eq!(assembler.add_packet(&packets[0]).unwrap(), None);
        assert_eq!(assembler.add_packet(&packets[1]).unwrap(), Some(data));
    }

    #[test]
    fn xor_bytes_is_its_own_inverse() {
        let a = vec![1, 2, 3];
        let b = vec![4, 5, 6, 7];
        let x = xor_bytes(&a, &b);
        assert_eq!(xor_bytes(&x, &b)[..3], a[..]);
    }
}
