//! Fast-path decode table construction.
//!
//! Each placed entry names a specialized decoder and packs the field's
//! offset, presence, submessage index and expected wire tag into one
//! 64-bit word:
//!
//! ```text
//!                  48                32                16                 0
//! |--------|--------|--------|--------|--------|--------|--------|--------|
//! |   offset (16)   |case offset (16) |presence| submsg |  exp. tag (16)  |
//! |--------|--------|--------|--------|--------|--------|--------|--------|
//! ```
//!
//! `presence` is a hasbit position, or the field number for oneof members.
//! Fields that cannot be packed simply fall back to the generic decoder.

use crate::descriptor::{FieldDef, FieldType, MsgId};
use crate::layout::classify::{classify, FieldClass};
use crate::layout::file::FileLayout;
use crate::minitable::{FieldMode, PointerWidth, LABEL_FLAG_IS_PACKED};

pub const GENERIC_DECODER: &str = "_upb_FastDecoder_DecodeGeneric";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableEntry {
    pub symbol: String,
    pub data: u64,
}

impl TableEntry {
    fn generic() -> TableEntry {
        TableEntry {
            symbol: GENERIC_DECODER.to_string(),
            data: 0,
        }
    }

    pub fn is_generic(&self) -> bool {
        self.symbol == GENERIC_DECODER
    }
}

/// The wire tag as it appears on the wire: a little-endian varint of
/// `(number << 3) | wire_type`, packed into the low bytes of a u64.
pub fn encoded_tag(field: &FieldDef, class: &FieldClass) -> u64 {
    let mut value = ((field.number as u32) << 3) | class.wire_type as u32;
    let mut bytes = [0u8; 8];
    let mut i = 0;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            bytes[i] = byte;
            break;
        }
        bytes[i] = byte | 0x80;
        i += 1;
    }
    u64::from_le_bytes(bytes)
}

/// Dispatch slot for a tag, or `None` when the tag needs more than two
/// varint bytes.
pub fn table_slot(tag: u64) -> Option<usize> {
    if tag > 0x7fff {
        return None;
    }
    Some(((tag & 0xf8) >> 3) as usize)
}

fn type_mnemonic(descriptor_type: u8) -> Option<&'static str> {
    match FieldType::from_descriptor_number(descriptor_type)? {
        FieldType::Bool => Some("b1"),
        // Closed enums need value validation the fast path cannot do.
        FieldType::Enum => None,
        FieldType::Int32 | FieldType::UInt32 => Some("v4"),
        FieldType::Int64 | FieldType::UInt64 => Some("v8"),
        FieldType::Fixed32 | FieldType::SFixed32 | FieldType::Float => Some("f4"),
        FieldType::Fixed64 | FieldType::SFixed64 | FieldType::Double => Some("f8"),
        FieldType::SInt32 => Some("z4"),
        FieldType::SInt64 => Some("z8"),
        FieldType::String => Some("s"),
        FieldType::Bytes => Some("b"),
        FieldType::Message => Some("m"),
        FieldType::Group => None,
        _ => None,
    }
}

fn try_fill_entry(
    layout: &FileLayout,
    msg_id: MsgId,
    field: &FieldDef,
    tag: u64,
) -> Option<TableEntry> {
    let record = layout.field(msg_id, field.number, PointerWidth::W64);
    let mnemonic = type_mnemonic(record.descriptor_type)?;

    let cardinality = match record.mode {
        FieldMode::Map => return None,
        FieldMode::Array => {
            if record.label_flags & LABEL_FLAG_IS_PACKED != 0 {
                "p"
            } else {
                "r"
            }
        }
        FieldMode::Scalar => {
            if record.presence < 0 {
                "o"
            } else {
                "s"
            }
        }
    };

    let mut data = (record.offset as u64) << 48 | tag;

    if let Some(case_offset) = record.oneof_case_offset() {
        if case_offset as u64 > 0xffff || field.number >= 256 {
            return None;
        }
        data |= (field.number as u64) << 24;
        data |= (case_offset as u64) << 32;
    } else {
        // Hasbit position, or a high unused bit when there is none.
        let mut hasbit: u64 = 63;
        if record.presence > 0 {
            hasbit = record.presence as u64;
            if hasbit > 31 {
                return None;
            }
        }
        data |= hasbit << 24;
    }

    let tag_bytes = if tag > 0xff { "2" } else { "1" };

    let symbol = if record.descriptor_type == FieldType::Message.descriptor_number() {
        let index = record.submsg_index? as u64;
        if index > 255 {
            return None;
        }
        data |= index << 16;

        // The sub-message size is only known when it lives in this file.
        let pool = layout.pool();
        let sub = field.msg_type.expect("message field without submessage");
        let mut size_ceil = "max".to_string();
        if pool.message(sub).file == layout.file_id() {
            let size = layout.mini_table(sub, PointerWidth::W64).size as usize + 8;
            for ceiling in [64usize, 128, 192, 256] {
                if size <= ceiling {
                    size_ceil = ceiling.to_string();
                    break;
                }
            }
        }
        format!(
            "upb_p{}{}_{}bt_max{}b",
            cardinality, mnemonic, tag_bytes, size_ceil
        )
    } else {
        format!("upb_p{}{}_{}bt", cardinality, mnemonic, tag_bytes)
    };

    Some(TableEntry { symbol, data })
}

/// Build the dispatch table for one message. Fields claim slots in hotness
/// order: required first, then ascending field number. The table doubles
/// until the hottest placed slot fits, so its size is a power of two.
pub fn fast_decode_table(layout: &FileLayout, msg_id: MsgId) -> Vec<TableEntry> {
    let pool = layout.pool();
    let msg = pool.message(msg_id);
    let mut fields: Vec<&FieldDef> = msg.fields.iter().collect();
    fields.sort_by_key(|f| (!f.is_required(), f.number));

    let mut table: Vec<TableEntry> = Vec::new();
    for field in fields {
        let class = classify(pool, Some(msg), field);
        let tag = encoded_tag(field, &class);
        let slot = match table_slot(tag) {
            Some(slot) => slot,
            None => continue,
        };
        let entry = match try_fill_entry(layout, msg_id, field, tag) {
            Some(entry) => entry,
            None => continue,
        };
        while slot >= table.len() {
            let size = (table.len() * 2).max(1);
            table.resize(size, TableEntry::generic());
        }
        if !table[slot].is_generic() {
            // A hotter field already claimed this slot.
            continue;
        }
        table[slot] = entry;
    }
    table
}

/// The `table_mask` stored in the mini-table: `(size - 1) << 3` so the
/// runtime can mask a raw tag byte, or 255 for empty or single-slot tables.
pub fn table_mask(table_len: usize) -> u8 {
    if table_len > 1 {
        debug_assert!(table_len.is_power_of_two() && table_len <= 32);
        (((table_len - 1) << 3) & 0xff) as u8
    } else {
        0xff
    }
}
