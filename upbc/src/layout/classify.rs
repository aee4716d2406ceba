//! Field classification: the canonical category tuple every later stage
//! (layout, fast table, emission) consumes.

use crate::descriptor::{DescriptorPool, FieldDef, FieldType, MessageDef, Syntax};
use crate::minitable::{
    FieldMode, FieldRep, LABEL_FLAG_IS_ALTERNATE, LABEL_FLAG_IS_EXTENSION, LABEL_FLAG_IS_PACKED,
};

pub const WIRE_VARINT: u8 = 0;
pub const WIRE_FIXED64: u8 = 1;
pub const WIRE_DELIMITED: u8 = 2;
pub const WIRE_START_GROUP: u8 = 3;
pub const WIRE_FIXED32: u8 = 5;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PresenceKind {
    Implicit,
    Hasbit,
    OneofCase,
    /// Presence is the non-null submessage pointer; no hasbit is spent.
    SubMessage,
}

#[derive(Copy, Clone, Debug)]
pub struct FieldClass {
    pub mode: FieldMode,
    pub rep32: FieldRep,
    pub rep64: FieldRep,
    pub presence: PresenceKind,
    pub label_flags: u8,
    /// Descriptor type after storage rewrites (proto2 string -> bytes,
    /// open enum -> int32).
    pub descriptor_type: u8,
    pub wire_type: u8,
}

impl FieldClass {
    pub fn rep(&self, width: crate::minitable::PointerWidth) -> FieldRep {
        match width {
            crate::minitable::PointerWidth::W32 => self.rep32,
            crate::minitable::PointerWidth::W64 => self.rep64,
        }
    }

    /// String views and pointers: decoded hottest, placed first in their
    /// alignment bucket.
    pub fn is_hot(&self) -> bool {
        self.mode != FieldMode::Scalar
            || matches!(self.rep64, FieldRep::StringView)
            || self.pointer_rep()
    }

    /// True when the slot holds a pointer (submessage, array or map).
    pub fn pointer_rep(&self) -> bool {
        self.rep32 == FieldRep::FourByte && self.rep64 == FieldRep::EightByte
    }
}

fn scalar_rep(ty: FieldType) -> (FieldRep, FieldRep) {
    match ty {
        FieldType::Bool => (FieldRep::OneByte, FieldRep::OneByte),
        FieldType::Float
        | FieldType::Fixed32
        | FieldType::SFixed32
        | FieldType::Int32
        | FieldType::UInt32
        | FieldType::SInt32
        | FieldType::Enum => (FieldRep::FourByte, FieldRep::FourByte),
        FieldType::Double
        | FieldType::Fixed64
        | FieldType::SFixed64
        | FieldType::Int64
        | FieldType::UInt64
        | FieldType::SInt64 => (FieldRep::EightByte, FieldRep::EightByte),
        FieldType::String | FieldType::Bytes => (FieldRep::StringView, FieldRep::StringView),
        FieldType::Message | FieldType::Group => (FieldRep::FourByte, FieldRep::EightByte),
    }
}

fn wire_type_of(field: &FieldDef) -> u8 {
    if field.packed {
        return WIRE_DELIMITED;
    }
    match field.field_type {
        FieldType::Int32
        | FieldType::Int64
        | FieldType::UInt32
        | FieldType::UInt64
        | FieldType::SInt32
        | FieldType::SInt64
        | FieldType::Bool
        | FieldType::Enum => WIRE_VARINT,
        FieldType::Fixed64 | FieldType::SFixed64 | FieldType::Double => WIRE_FIXED64,
        FieldType::String | FieldType::Bytes | FieldType::Message => WIRE_DELIMITED,
        FieldType::Group => WIRE_START_GROUP,
        FieldType::Fixed32 | FieldType::SFixed32 | FieldType::Float => WIRE_FIXED32,
    }
}

/// Derive the category tuple for one field. `msg` is the containing message
/// for regular fields and `None` for extensions (which cannot be oneof
/// members).
pub fn classify(pool: &DescriptorPool, msg: Option<&MessageDef>, field: &FieldDef) -> FieldClass {
    let syntax = pool.syntax_of(field.file);
    let in_real_oneof = msg
        .and_then(|m| m.real_oneof_of(field))
        .is_some();

    let mode = if field.is_map(pool) {
        FieldMode::Map
    } else if field.is_repeated() {
        FieldMode::Array
    } else {
        FieldMode::Scalar
    };

    let (rep32, rep64) = match mode {
        // Arrays and maps are a single pointer to out-of-line storage.
        FieldMode::Map | FieldMode::Array => (FieldRep::FourByte, FieldRep::EightByte),
        FieldMode::Scalar => scalar_rep(field.field_type),
    };

    let presence = if mode != FieldMode::Scalar {
        PresenceKind::Implicit
    } else if in_real_oneof {
        PresenceKind::OneofCase
    } else if field.field_type.is_message() {
        PresenceKind::SubMessage
    } else if syntax == Syntax::Proto2 || field.proto3_optional {
        PresenceKind::Hasbit
    } else {
        PresenceKind::Implicit
    };

    let mut label_flags = 0u8;
    if field.packed {
        label_flags |= LABEL_FLAG_IS_PACKED;
    }
    if field.is_extension {
        label_flags |= LABEL_FLAG_IS_EXTENSION;
    }

    // Storage rewrites: the runtime validates UTF-8 only for `String`, and
    // validates enum ranges only for closed enums, so proto2 strings are
    // stored as bytes and open enums as plain int32.
    let mut descriptor_type = field.field_type.descriptor_number();
    if field.field_type == FieldType::String && syntax == Syntax::Proto2 {
        descriptor_type = FieldType::Bytes.descriptor_number();
        label_flags |= LABEL_FLAG_IS_ALTERNATE;
    }
    if field.field_type == FieldType::Enum {
        let open = field
            .enum_type
            .map(|e| !pool.enum_is_closed(e))
            .unwrap_or(false);
        if open {
            descriptor_type = FieldType::Int32.descriptor_number();
            label_flags |= LABEL_FLAG_IS_ALTERNATE;
        }
    }

    FieldClass {
        mode,
        rep32,
        rep64,
        presence,
        label_flags,
        descriptor_type,
        wire_type: wire_type_of(field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DescriptorPool, Label};
    use prost_types::field_descriptor_proto::{Label as PLabel, Type as PType};
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};

    fn pool_with(syntax: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorPool {
        let msg = DescriptorProto {
            name: Some("M".to_string()),
            field: fields,
            ..Default::default()
        };
        let file = FileDescriptorProto {
            name: Some("t.proto".to_string()),
            syntax: Some(syntax.to_string()),
            message_type: vec![msg],
            ..Default::default()
        };
        DescriptorPool::build(&FileDescriptorSet { file: vec![file] }).unwrap()
    }

    fn field(name: &str, number: i32, ty: PType, label: PLabel) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            r#type: Some(ty as i32),
            label: Some(label as i32),
            ..Default::default()
        }
    }

    #[test]
    fn proto3_singular_scalar_is_implicit() {
        let pool = pool_with("proto3", vec![field("x", 1, PType::Int32, PLabel::Optional)]);
        let m = pool.message(pool.find_message("M").unwrap());
        let class = classify(&pool, Some(m), &m.fields[0]);
        assert_eq!(class.presence, PresenceKind::Implicit);
        assert_eq!(class.mode, FieldMode::Scalar);
        assert_eq!(class.rep64, FieldRep::FourByte);
    }

    #[test]
    fn proto2_singular_scalar_gets_hasbit() {
        let pool = pool_with("proto2", vec![field("x", 1, PType::Int32, PLabel::Optional)]);
        let m = pool.message(pool.find_message("M").unwrap());
        let class = classify(&pool, Some(m), &m.fields[0]);
        assert_eq!(class.presence, PresenceKind::Hasbit);
    }

    #[test]
    fn proto2_string_is_stored_as_bytes() {
        let pool = pool_with("proto2", vec![field("s", 1, PType::String, PLabel::Optional)]);
        let m = pool.message(pool.find_message("M").unwrap());
        let class = classify(&pool, Some(m), &m.fields[0]);
        assert_eq!(class.descriptor_type, FieldType::Bytes.descriptor_number());
        assert_ne!(class.label_flags & LABEL_FLAG_IS_ALTERNATE, 0);
        assert_eq!(class.rep64, FieldRep::StringView);
    }

    #[test]
    fn repeated_fields_are_pointer_arrays() {
        let pool = pool_with("proto3", vec![field("xs", 1, PType::Int64, PLabel::Repeated)]);
        let m = pool.message(pool.find_message("M").unwrap());
        let class = classify(&pool, Some(m), &m.fields[0]);
        assert_eq!(class.mode, FieldMode::Array);
        assert!(class.pointer_rep());
        assert_eq!(class.presence, PresenceKind::Implicit);
        assert_ne!(class.label_flags & LABEL_FLAG_IS_PACKED, 0);
        assert_eq!(class.wire_type, WIRE_DELIMITED);
    }

    #[test]
    fn open_enum_rewrites_to_int32() {
        let e = prost_types::EnumDescriptorProto {
            name: Some("E".to_string()),
            value: vec![prost_types::EnumValueDescriptorProto {
                name: Some("Z".to_string()),
                number: Some(0),
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut f = field("e", 1, PType::Enum, PLabel::Optional);
        f.type_name = Some(".E".to_string());
        let msg = DescriptorProto {
            name: Some("M".to_string()),
            field: vec![f],
            ..Default::default()
        };
        let file = FileDescriptorProto {
            name: Some("t.proto".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![msg],
            enum_type: vec![e],
            ..Default::default()
        };
        let pool = DescriptorPool::build(&FileDescriptorSet { file: vec![file] }).unwrap();
        let m = pool.message(pool.find_message("M").unwrap());
        let class = classify(&pool, Some(m), &m.fields[0]);
        assert_eq!(class.descriptor_type, FieldType::Int32.descriptor_number());
        assert_ne!(class.label_flags & LABEL_FLAG_IS_ALTERNATE, 0);
    }

    #[test]
    fn required_label_survives_into_def() {
        let pool = pool_with("proto2", vec![field("x", 1, PType::Int32, PLabel::Required)]);
        let m = pool.message(pool.find_message("M").unwrap());
        assert_eq!(m.fields[0].label, Label::Required);
    }
}
