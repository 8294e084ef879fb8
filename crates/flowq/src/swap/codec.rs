use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc64fast_nvme::Digest;

use crate::config::FlowFileId;
use crate::error::{QueueError, QueueResult};
use crate::flowfile::{ContentClaim, FlowFileRecord, ResourceClaim};

pub const SWAP_FILE_MAGIC: u64 = 0x464C_4F57_5153_5731; // "FLOWQSW1"
pub const SWAP_FILE_VERSION: u32 = 1;
pub const SWAP_FILE_HEADER_LEN: usize = 40;

/// Strings longer than this are rejected during decode. The cap bounds
/// allocation when a header validates but a length field is garbage.
const MAX_STRING_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapFileHeader {
    pub record_count: u32,
    pub total_bytes: u64,
    pub max_record_id: u64,
}

impl SwapFileHeader {
    pub fn write_into(&self, dst: &mut [u8]) {
        use byteorder::ByteOrder;
        LittleEndian::write_u64(&mut dst[0..8], SWAP_FILE_MAGIC);
        LittleEndian::write_u32(&mut dst[8..12], SWAP_FILE_VERSION);
        LittleEndian::write_u32(&mut dst[12..16], SWAP_FILE_HEADER_LEN as u32);
        LittleEndian::write_u32(&mut dst[16..20], self.record_count);
        LittleEndian::write_u32(&mut dst[20..24], 0); // reserved
        LittleEndian::write_u64(&mut dst[24..32], self.total_bytes);
        LittleEndian::write_u64(&mut dst[32..40], self.max_record_id);
    }

    pub fn read_from(src: &[u8]) -> QueueResult<Self> {
        use byteorder::ByteOrder;
        if src.len() < SWAP_FILE_HEADER_LEN {
            return Err(QueueError::corrupt("swap file header truncated"));
        }
        let magic = LittleEndian::read_u64(&src[0..8]);
        if magic != SWAP_FILE_MAGIC {
            return Err(QueueError::corrupt("invalid swap file magic"));
        }
        let version = LittleEndian::read_u32(&src[8..12]);
        if version != SWAP_FILE_VERSION {
            return Err(QueueError::corrupt(format!(
                "unsupported swap file version: {version}"
            )));
        }
        let header_len = LittleEndian::read_u32(&src[12..16]) as usize;
        if header_len != SWAP_FILE_HEADER_LEN {
            return Err(QueueError::corrupt("unexpected swap file header len"));
        }
        let record_count = LittleEndian::read_u32(&src[16..20]);
        let total_bytes = LittleEndian::read_u64(&src[24..32]);
        let max_record_id = LittleEndian::read_u64(&src[32..40]);
        Ok(Self {
            record_count,
            total_bytes,
            max_record_id,
        })
    }

    pub fn max_flowfile_id(&self) -> Option<FlowFileId> {
        if self.record_count == 0 {
            None
        } else {
            Some(FlowFileId::new(self.max_record_id))
        }
    }
}

pub fn crc64(bytes: &[u8]) -> u64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut digest = Digest::new();
    digest.write(bytes);
    digest.sum64()
}

/// Serializes a batch into a complete swap file image: header, records,
/// trailing CRC-64 over everything before it.
pub fn encode_batch(records: &[Arc<FlowFileRecord>]) -> Vec<u8> {
    let header = SwapFileHeader {
        record_count: records.len() as u32,
        total_bytes: records.iter().map(|record| record.size()).sum(),
        max_record_id: records
            .iter()
            .map(|record| record.id().as_u64())
            .max()
            .unwrap_or(0),
    };

    let mut buf = vec![0_u8; SWAP_FILE_HEADER_LEN];
    header.write_into(&mut buf[..SWAP_FILE_HEADER_LEN]);
    for record in records {
        write_record(&mut buf, record);
    }
    let checksum = crc64(&buf);
    buf.write_u64::<LittleEndian>(checksum).expect("vec write");
    buf
}

/// Decodes a complete swap file image, validating magic, version and CRC.
pub fn decode_batch(bytes: &[u8]) -> QueueResult<Vec<Arc<FlowFileRecord>>> {
    if bytes.len() < SWAP_FILE_HEADER_LEN + 8 {
        return Err(QueueError::corrupt("swap file truncated"));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 8);
    let expected = u64::from_le_bytes(trailer.try_into().expect("8-byte trailer"));
    let actual = crc64(body);
    if expected != actual {
        return Err(QueueError::corrupt(format!(
            "swap file checksum mismatch: expected {expected:#018x}, found {actual:#018x}"
        )));
    }

    let header = SwapFileHeader::read_from(body)?;
    let mut cursor = Cursor::new(&body[SWAP_FILE_HEADER_LEN..]);
    let mut records = Vec::with_capacity(header.record_count as usize);
    for _ in 0..header.record_count {
        records.push(Arc::new(read_record(&mut cursor)?));
    }
    Ok(records)
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    buf.write_u32::<LittleEndian>(value.len() as u32)
        .expect("vec write");
    buf.extend_from_slice(value.as_bytes());
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> QueueResult<String> {
    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| QueueError::corrupt("swap record truncated"))? as usize;
    if len > MAX_STRING_LEN {
        return Err(QueueError::corrupt(format!(
            "swap record string too long: {len}"
        )));
    }
    let mut bytes = vec![0_u8; len];
    std::io::Read::read_exact(cursor, &mut bytes)
        .map_err(|_| QueueError::corrupt("swap record truncated"))?;
    String::from_utf8(bytes).map_err(|_| QueueError::corrupt("swap record string not UTF-8"))
}

fn write_record(buf: &mut Vec<u8>, record: &FlowFileRecord) {
    buf.write_u64::<LittleEndian>(record.id().as_u64())
        .expect("vec write");
    buf.write_i64::<LittleEndian>(record.entry_date_ms())
        .expect("vec write");
    buf.write_i64::<LittleEndian>(record.lineage_start_ms())
        .expect("vec write");
    buf.write_i64::<LittleEndian>(record.penalty_expiration_ms())
        .expect("vec write");
    buf.write_u64::<LittleEndian>(record.size()).expect("vec write");
    buf.write_u64::<LittleEndian>(record.content_claim_offset())
        .expect("vec write");

    match record.content_claim() {
        Some(claim) => {
            buf.push(1);
            write_string(buf, &claim.resource_claim.container);
            write_string(buf, &claim.resource_claim.section);
            write_string(buf, &claim.resource_claim.id);
            buf.write_u64::<LittleEndian>(claim.offset).expect("vec write");
        }
        None => buf.push(0),
    }

    buf.write_u32::<LittleEndian>(record.attributes().len() as u32)
        .expect("vec write");
    // Sorted so an identical batch always encodes to identical bytes.
    let mut attributes: Vec<_> = record.attributes().iter().collect();
    attributes.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (key, value) in attributes {
        write_string(buf, key);
        write_string(buf, value);
    }
}

fn read_record(cursor: &mut Cursor<&[u8]>) -> QueueResult<FlowFileRecord> {
    let truncated = |_| QueueError::corrupt("swap record truncated");

    let id = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
    let entry_date_ms = cursor.read_i64::<LittleEndian>().map_err(truncated)?;
    let lineage_start_ms = cursor.read_i64::<LittleEndian>().map_err(truncated)?;
    let penalty_expiration_ms = cursor.read_i64::<LittleEndian>().map_err(truncated)?;
    let size = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
    let content_claim_offset = cursor.read_u64::<LittleEndian>().map_err(truncated)?;

    let mut builder = FlowFileRecord::builder(FlowFileId::new(id))
        .entry_date_ms(entry_date_ms)
        .lineage_start_ms(lineage_start_ms)
        .penalty_expiration_ms(penalty_expiration_ms)
        .size(size);

    let claim_flag = cursor.read_u8().map_err(truncated)?;
    match claim_flag {
        0 => {}
        1 => {
            let container = read_string(cursor)?;
            let section = read_string(cursor)?;
            let resource_id = read_string(cursor)?;
            let claim_offset = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
            let claim = ContentClaim::new(
                Arc::new(ResourceClaim::new(container, section, resource_id)),
                claim_offset,
            );
            builder = builder.content_claim(claim, content_claim_offset);
        }
        other => {
            return Err(QueueError::corrupt(format!(
                "invalid content claim flag: {other}"
            )));
        }
    }

    let attribute_count = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
    let mut attributes = HashMap::with_capacity(attribute_count.min(1024) as usize);
    for _ in 0..attribute_count {
        let key = read_string(cursor)?;
        let value = read_string(cursor)?;
        attributes.insert(key, value);
    }

    Ok(builder.attributes(attributes).build())
}
