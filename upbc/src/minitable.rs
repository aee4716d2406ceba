//! Computed mini-table records.
//!
//! These mirror the statically-initialized structures the upb runtime
//! consumes (`upb_MiniTable`, `upb_MiniTable_Field`, ...). The generator
//! computes one instance per message and platform width; the source
//! emitter serializes them as C initializers.

use crate::descriptor::{EnumId, MsgId};

/// How field data is stored in the message struct.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FieldMode {
    Map = 0,
    Array = 1,
    Scalar = 2,
}

/// Label flag bits, OR-ed into the packed mode byte above the mode.
pub const LABEL_FLAG_IS_PACKED: u8 = 4;
pub const LABEL_FLAG_IS_EXTENSION: u8 = 8;
/// The stored representation is the alternate of the declared one
/// (proto2 string stored as bytes, open enum stored as int32).
pub const LABEL_FLAG_IS_ALTERNATE: u8 = 16;

/// Storage representation of one field slot.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FieldRep {
    OneByte = 0,
    FourByte = 1,
    StringView = 2,
    EightByte = 3,
}

pub const FIELD_REP_SHIFT: u8 = 6;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PointerWidth {
    W32,
    W64,
}

impl PointerWidth {
    pub fn pointer_size(self) -> u16 {
        match self {
            PointerWidth::W32 => 4,
            PointerWidth::W64 => 8,
        }
    }
}

impl FieldRep {
    /// Size and alignment of this representation for a pointer width.
    pub fn size_align(self, width: PointerWidth) -> (u16, u16) {
        match (self, width) {
            (FieldRep::OneByte, _) => (1, 1),
            (FieldRep::FourByte, _) => (4, 4),
            (FieldRep::EightByte, _) => (8, 8),
            (FieldRep::StringView, PointerWidth::W32) => (8, 4),
            (FieldRep::StringView, PointerWidth::W64) => (16, 8),
        }
    }
}

/// One field record of a message mini-table, for one platform width.
#[derive(Clone, Debug)]
pub struct MiniTableField {
    pub number: i32,
    pub offset: u16,
    /// Positive: hasbit position (index + 1). Negative: `!case_offset` for
    /// oneof members. Zero: implicit presence.
    pub presence: i16,
    pub submsg_index: Option<u16>,
    pub descriptor_type: u8,
    pub mode: FieldMode,
    pub rep: FieldRep,
    pub label_flags: u8,
}

impl MiniTableField {
    /// Hasbit index (0-based) when this field tracks presence in a hasbit.
    pub fn hasbit_index(&self) -> Option<u16> {
        if self.presence > 0 {
            Some(self.presence as u16 - 1)
        } else {
            None
        }
    }

    /// Case-slot byte offset when this field is a oneof member.
    pub fn oneof_case_offset(&self) -> Option<u16> {
        if self.presence < 0 {
            Some(!(self.presence as i32) as u16)
        } else {
            None
        }
    }

    /// The packed mode byte consumed by the runtime.
    pub fn mode_byte(&self) -> u8 {
        self.mode as u8 | self.label_flags | (self.rep as u8) << FIELD_REP_SHIFT
    }
}

/// A referenced sub-table: either a message or a closed enum.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Sub {
    Message(MsgId),
    Enum(EnumId),
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ExtMode {
    NonExtendable,
    Extendable,
    MessageSet,
}

impl ExtMode {
    pub fn symbol(self) -> &'static str {
        match self {
            ExtMode::NonExtendable => "kUpb_ExtMode_NonExtendable",
            ExtMode::Extendable => "kUpb_ExtMode_Extendable",
            ExtMode::MessageSet => "kUpb_ExtMode_IsMessageSet",
        }
    }
}

/// Mini-table of one message for one platform width. Fields are ordered by
/// field number so the runtime can binary-search past the dense prefix.
#[derive(Clone, Debug)]
pub struct MiniTable {
    pub size: u16,
    pub fields: Vec<MiniTableField>,
    pub required_count: u8,
    pub dense_below: u8,
    pub ext_mode: ExtMode,
}

impl MiniTable {
    pub fn field_by_number(&self, number: i32) -> Option<&MiniTableField> {
        self.fields.iter().find(|f| f.number == number)
    }
}

/// Closed-enum mini-table: a dense bitset for small values plus a sorted
/// vector of values the bitset cannot cover.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumMiniTable {
    pub mask_limit: u32,
    pub value_count: u32,
    pub data: Vec<u32>,
}

impl EnumMiniTable {
    pub fn build(values: &[i32]) -> EnumMiniTable {
        let mask_limit: u32 = if values.iter().any(|&v| (0..64).contains(&v)) {
            64
        } else {
            0
        };
        let mut data = vec![0u32; (mask_limit / 32) as usize];
        let mut large: Vec<u32> = Vec::new();
        for &v in values {
            if v >= 0 && (v as u32) < mask_limit {
                data[(v / 32) as usize] |= 1u32 << (v % 32);
            } else {
                large.push(v as u32);
            }
        }
        large.sort_unstable();
        large.dedup();
        let value_count = large.len() as u32;
        data.extend(large);
        EnumMiniTable {
            mask_limit,
            value_count,
            data,
        }
    }

    pub fn contains(&self, value: i32) -> bool {
        if value >= 0 && (value as u32) < self.mask_limit {
            self.data[(value / 32) as usize] & (1u32 << (value % 32)) != 0
        } else {
            self.data[(self.mask_limit / 32) as usize..].contains(&(value as u32))
        }
    }
}

/// Extension record: one field layout plus the extendee and optional sub.
/// Extensions live outside the message struct, so a single record serves
/// both platform widths.
#[derive(Clone, Debug)]
pub struct ExtensionTable {
    pub field: MiniTableField,
    pub extendee: MsgId,
    pub sub: Option<Sub>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_table_masks_small_values() {
        let mt = EnumMiniTable::build(&[0, 1, 5, 63]);
        assert_eq!(mt.mask_limit, 64);
        assert_eq!(mt.value_count, 0);
        assert_eq!(mt.data, vec![0b100011, 1 << 31]);
        assert!(mt.contains(5));
        assert!(!mt.contains(6));
    }

    #[test]
    fn enum_table_collects_large_and_negative_values() {
        let mt = EnumMiniTable::build(&[0, 100, -1]);
        assert_eq!(mt.mask_limit, 64);
        assert_eq!(mt.value_count, 2);
        assert_eq!(mt.data[2..], [100, u32::MAX][..]);
        assert!(mt.contains(100));
        assert!(mt.contains(-1));
        assert!(!mt.contains(101));
    }

    #[test]
    fn enum_table_without_small_values_has_no_mask() {
        let mt = EnumMiniTable::build(&[1000, 2000]);
        assert_eq!(mt.mask_limit, 0);
        assert_eq!(mt.data, vec![1000, 2000]);
    }

    #[test]
    fn mode_byte_packs_mode_flags_and_rep() {
        let field = MiniTableField {
            number: 1,
            offset: 8,
            presence: 0,
            submsg_index: None,
            descriptor_type: 5,
            mode: FieldMode::Array,
            rep: FieldRep::FourByte,
            label_flags: LABEL_FLAG_IS_PACKED,
        };
        assert_eq!(field.mode_byte(), 1 | 4 | (1 << 6));
    }

    #[test]
    fn presence_helpers_decode_both_encodings() {
        let mut field = MiniTableField {
            number: 1,
            offset: 0,
            presence: 3,
            submsg_index: None,
            descriptor_type: 8,
            mode: FieldMode::Scalar,
            rep: FieldRep::OneByte,
            label_flags: 0,
        };
        assert_eq!(field.hasbit_index(), Some(2));
        assert_eq!(field.oneof_case_offset(), None);

        field.presence = !(12i32) as i16;
        assert_eq!(field.hasbit_index(), None);
        assert_eq!(field.oneof_case_offset(), Some(12));
    }
}
