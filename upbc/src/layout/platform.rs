//! Per-platform message layout: offsets, hasbits and oneof case slots for
//! one pointer width.
//!
//! The algorithm is deterministic. Hasbits and case slots occupy a byte
//! prefix; field data is placed in alignment buckets, largest first, with
//! string views and pointers leading their bucket.

use crate::descriptor::{DescriptorPool, MessageDef, MsgId};
use crate::layout::classify::{classify, FieldClass, PresenceKind};
use crate::minitable::{ExtMode, MiniTable, MiniTableField, PointerWidth, Sub};
use std::collections::HashMap;

fn align_up(offset: u32, align: u32) -> u32 {
    (offset + align - 1) / align * align
}

/// What a placement item stands for: a plain field or a oneof union slot.
#[derive(Copy, Clone, Debug)]
enum Target {
    Field(usize),
    Oneof(usize),
}

struct Item {
    target: Target,
    size: u16,
    align: u16,
    hot: bool,
    number: i32,
}

/// Sub-table references of a message, in field-number order. `submsg_index`
/// on a field record indexes into exactly this sequence; both platform
/// widths share it.
pub fn sub_references(pool: &DescriptorPool, msg: &MessageDef) -> Vec<(i32, Sub)> {
    let mut order: Vec<usize> = (0..msg.fields.len()).collect();
    order.sort_by_key(|&i| msg.fields[i].number);

    let mut subs = Vec::new();
    for &i in &order {
        let field = &msg.fields[i];
        if let Some(m) = field.msg_type {
            subs.push((field.number, Sub::Message(m)));
        } else if let Some(e) = field.enum_type {
            if pool.enum_is_closed(e) {
                subs.push((field.number, Sub::Enum(e)));
            }
        }
    }
    subs
}

/// Compute the mini-table of one message for one pointer width.
pub fn build_message(pool: &DescriptorPool, msg_id: MsgId, width: PointerWidth) -> MiniTable {
    let msg = pool.message(msg_id);
    let count = msg.fields.len();
    let classes: Vec<FieldClass> = msg
        .fields
        .iter()
        .map(|f| classify(pool, Some(msg), f))
        .collect();

    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by_key(|&i| msg.fields[i].number);

    // Hasbit positions start at 1; position 0 is the "no presence" sentinel.
    // Required fields claim the lowest positions.
    let mut presence = vec![0i16; count];
    let mut hasbit_count: u32 = 0;
    for pass in 0..2 {
        for &i in &order {
            let required = msg.fields[i].is_required();
            if classes[i].presence != PresenceKind::Hasbit {
                continue;
            }
            if (pass == 0) != required {
                continue;
            }
            hasbit_count += 1;
            presence[i] = hasbit_count as i16;
        }
    }

    let mut cursor: u32 = if hasbit_count > 0 {
        (hasbit_count + 1).div_ceil(8)
    } else {
        0
    };

    // One 32-bit case slot per declared oneof, in declaration order.
    let real_oneofs: Vec<usize> = msg.real_oneofs().map(|(i, _)| i).collect();
    let mut case_offsets: HashMap<usize, u32> = HashMap::new();
    if !real_oneofs.is_empty() {
        cursor = align_up(cursor, 4);
        for &oi in &real_oneofs {
            case_offsets.insert(oi, cursor);
            cursor += 4;
        }
    }
    for (i, field) in msg.fields.iter().enumerate() {
        if let Some(oi) = msg.real_oneof_of(field) {
            let case_offset = case_offsets[&oi];
            assert!(case_offset <= i16::MAX as u32, "case offset overflow in {}", msg.full_name);
            presence[i] = !(case_offset as i32) as i16;
        }
    }

    // Placement items: every non-oneof field, plus one union slot per oneof
    // sized and aligned for its largest member.
    let mut items: Vec<Item> = Vec::new();
    for &i in &order {
        if msg.real_oneof_of(&msg.fields[i]).is_some() {
            continue;
        }
        let (size, align) = classes[i].rep(width).size_align(width);
        items.push(Item {
            target: Target::Field(i),
            size,
            align,
            hot: classes[i].is_hot(),
            number: msg.fields[i].number,
        });
    }
    for &oi in &real_oneofs {
        let members = &msg.oneofs[oi].fields;
        if members.is_empty() {
            continue;
        }
        let mut size = 0u16;
        let mut align = 1u16;
        let mut hot = false;
        let mut number = i32::MAX;
        for &fi in members {
            let (s, a) = classes[fi].rep(width).size_align(width);
            size = size.max(s);
            align = align.max(a);
            hot = hot || classes[fi].is_hot();
            number = number.min(msg.fields[fi].number);
        }
        items.push(Item {
            target: Target::Oneof(oi),
            size,
            align,
            hot,
            number,
        });
    }

    // Alignment buckets, largest first; hot items lead, then field number.
    let mut field_offsets = vec![0u32; count];
    let mut oneof_offsets: HashMap<usize, u32> = HashMap::new();
    for bucket_align in [8u16, 4, 2, 1] {
        let mut bucket: Vec<&Item> = items.iter().filter(|it| it.align == bucket_align).collect();
        bucket.sort_by_key(|it| (!it.hot, it.number));
        for item in bucket {
            cursor = align_up(cursor, item.align as u32);
            match item.target {
                Target::Field(i) => field_offsets[i] = cursor,
                Target::Oneof(oi) => {
                    oneof_offsets.insert(oi, cursor);
                }
            }
            cursor += item.size as u32;
        }
    }
    for (i, field) in msg.fields.iter().enumerate() {
        if let Some(oi) = msg.real_oneof_of(field) {
            field_offsets[i] = oneof_offsets[&oi];
        }
    }

    let size = align_up(cursor, width.pointer_size() as u32);
    assert!(size <= u16::MAX as u32, "message {} exceeds layout size limit", msg.full_name);

    let sub_index: HashMap<i32, u16> = sub_references(pool, msg)
        .iter()
        .enumerate()
        .map(|(idx, (number, _))| (*number, idx as u16))
        .collect();

    let mut fields = Vec::with_capacity(count);
    for &i in &order {
        let field = &msg.fields[i];
        fields.push(MiniTableField {
            number: field.number,
            offset: field_offsets[i] as u16,
            presence: presence[i],
            submsg_index: sub_index.get(&field.number).copied(),
            descriptor_type: classes[i].descriptor_type,
            mode: classes[i].mode,
            rep: classes[i].rep(width),
            label_flags: classes[i].label_flags,
        });
    }

    let required_count = msg.fields.iter().filter(|f| f.is_required()).count();
    let mut dense_below = 0u8;
    for (idx, field) in fields.iter().enumerate() {
        if field.number == idx as i32 + 1 && idx < u8::MAX as usize {
            dense_below = idx as u8 + 1;
        } else {
            break;
        }
    }

    let ext_mode = if msg.message_set_wire_format {
        ExtMode::MessageSet
    } else if msg.extendable {
        ExtMode::Extendable
    } else {
        ExtMode::NonExtendable
    };

    let table = MiniTable {
        size: size as u16,
        fields,
        required_count: required_count.min(u8::MAX as usize) as u8,
        dense_below,
        ext_mode,
    };
    check_invariants(pool, msg, &table, width, hasbit_count);
    table
}

/// Layout invariants. A failure here is a generator bug, so abort.
fn check_invariants(
    pool: &DescriptorPool,
    msg: &MessageDef,
    table: &MiniTable,
    width: PointerWidth,
    hasbit_count: u32,
) {
    let hasbit_bytes = if hasbit_count > 0 {
        (hasbit_count + 1).div_ceil(8)
    } else {
        0
    };

    let mut ranges: Vec<(u32, u32)> = Vec::new();
    let mut seen_hasbits: Vec<i16> = Vec::new();
    for record in &table.fields {
        let field = msg.field_by_number(record.number).unwrap();
        let class = classify(pool, Some(msg), field);
        let (size, align) = class.rep(width).size_align(width);
        assert!(
            record.offset as u32 % align as u32 == 0,
            "misaligned field {}.{}",
            msg.full_name,
            field.name
        );
        if record.presence > 0 {
            assert!(
                (record.presence as u32) < 8 * hasbit_bytes + 1,
                "hasbit out of prefix for {}.{}",
                msg.full_name,
                field.name
            );
            assert!(
                !seen_hasbits.contains(&record.presence),
                "duplicate hasbit in {}",
                msg.full_name
            );
            seen_hasbits.push(record.presence);
        }
        if msg.real_oneof_of(field).is_none() {
            ranges.push((record.offset as u32, record.offset as u32 + size as u32));
        }
    }

    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(
            pair[0].1 <= pair[1].0,
            "overlapping fields in {}",
            msg.full_name
        );
    }

    for (_, oneof) in msg.real_oneofs() {
        let mut offsets = oneof.fields.iter().map(|&fi| {
            let number = msg.fields[fi].number;
            table.field_by_number(number).unwrap().offset
        });
        let first = offsets.next();
        assert!(
            offsets.all(|o| Some(o) == first),
            "oneof members of {} do not share a slot",
            msg.full_name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorPool;
    use prost_types::field_descriptor_proto::{Label as PLabel, Type as PType};
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    };

    fn field(name: &str, number: i32, ty: PType, label: PLabel) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            r#type: Some(ty as i32),
            label: Some(label as i32),
            ..Default::default()
        }
    }

    fn build_pool(syntax: &str, msg: DescriptorProto) -> DescriptorPool {
        let file = FileDescriptorProto {
            name: Some("t.proto".to_string()),
            syntax: Some(syntax.to_string()),
            message_type: vec![msg],
            ..Default::default()
        };
        DescriptorPool::build(&FileDescriptorSet { file: vec![file] }).unwrap()
    }

    #[test]
    fn empty_message_has_no_fields() {
        let pool = build_pool(
            "proto3",
            DescriptorProto {
                name: Some("M".to_string()),
                ..Default::default()
            },
        );
        let id = pool.find_message("M").unwrap();
        let mt = build_message(&pool, id, PointerWidth::W64);
        assert_eq!(mt.fields.len(), 0);
        assert_eq!(mt.dense_below, 0);
        assert_eq!(mt.required_count, 0);
    }

    #[test]
    fn required_int32_claims_first_hasbit() {
        let pool = build_pool(
            "proto2",
            DescriptorProto {
                name: Some("M".to_string()),
                field: vec![field("x", 1, PType::Int32, PLabel::Required)],
                ..Default::default()
            },
        );
        let id = pool.find_message("M").unwrap();
        let mt = build_message(&pool, id, PointerWidth::W64);
        let f = mt.field_by_number(1).unwrap();
        assert_eq!(f.hasbit_index(), Some(0));
        assert_eq!(f.presence, 1);
        assert_eq!(f.offset % 4, 0);
        assert_eq!(mt.required_count, 1);
        assert_eq!(mt.dense_below, 1);
    }

    #[test]
    fn required_fields_take_lowest_hasbits() {
        let pool = build_pool(
            "proto2",
            DescriptorProto {
                name: Some("M".to_string()),
                field: vec![
                    field("a", 1, PType::Int32, PLabel::Optional),
                    field("b", 2, PType::Int32, PLabel::Required),
                    field("c", 3, PType::Int32, PLabel::Optional),
                ],
                ..Default::default()
            },
        );
        let id = pool.find_message("M").unwrap();
        let mt = build_message(&pool, id, PointerWidth::W64);
        assert_eq!(mt.field_by_number(2).unwrap().presence, 1);
        assert_eq!(mt.field_by_number(1).unwrap().presence, 2);
        assert_eq!(mt.field_by_number(3).unwrap().presence, 3);
    }

    #[test]
    fn oneof_members_share_a_string_sized_slot() {
        let mut a = field("a", 1, PType::Int32, PLabel::Optional);
        a.oneof_index = Some(0);
        let mut b = field("b", 2, PType::String, PLabel::Optional);
        b.oneof_index = Some(0);
        let pool = build_pool(
            "proto3",
            DescriptorProto {
                name: Some("M".to_string()),
                field: vec![a, b],
                oneof_decl: vec![prost_types::OneofDescriptorProto {
                    name: Some("o".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        let id = pool.find_message("M").unwrap();

        for width in [PointerWidth::W32, PointerWidth::W64] {
            let mt = build_message(&pool, id, width);
            let fa = mt.field_by_number(1).unwrap();
            let fb = mt.field_by_number(2).unwrap();
            assert_eq!(fa.offset, fb.offset);
            assert_eq!(fa.oneof_case_offset(), fb.oneof_case_offset());
            assert_eq!(fa.oneof_case_offset(), Some(0));
        }

        // The union slot must hold a string view on either width.
        let mt64 = build_message(&pool, id, PointerWidth::W64);
        assert!(mt64.size >= mt64.field_by_number(2).unwrap().offset + 16);
    }

    #[test]
    fn buckets_place_large_alignments_first() {
        let pool = build_pool(
            "proto3",
            DescriptorProto {
                name: Some("M".to_string()),
                field: vec![
                    field("flag", 1, PType::Bool, PLabel::Optional),
                    field("count", 2, PType::Int32, PLabel::Optional),
                    field("stamp", 3, PType::Fixed64, PLabel::Optional),
                ],
                ..Default::default()
            },
        );
        let id = pool.find_message("M").unwrap();
        let mt = build_message(&pool, id, PointerWidth::W64);
        let stamp = mt.field_by_number(3).unwrap().offset;
        let count = mt.field_by_number(2).unwrap().offset;
        let flag = mt.field_by_number(1).unwrap().offset;
        assert!(stamp < count && count < flag);
        assert_eq!(stamp % 8, 0);
        assert_eq!(mt.size % 8, 0);
    }

    #[test]
    fn string_fields_lead_their_bucket() {
        let pool = build_pool(
            "proto3",
            DescriptorProto {
                name: Some("M".to_string()),
                field: vec![
                    field("num", 1, PType::Int64, PLabel::Optional),
                    field("name", 2, PType::String, PLabel::Optional),
                ],
                ..Default::default()
            },
        );
        let id = pool.find_message("M").unwrap();
        let mt = build_message(&pool, id, PointerWidth::W64);
        // Both land in the 8-aligned bucket on 64-bit; the string view wins.
        assert!(mt.field_by_number(2).unwrap().offset < mt.field_by_number(1).unwrap().offset);
    }

    #[test]
    fn offsets_differ_only_by_pointer_effects() {
        let mut child = field("child", 1, PType::Message, PLabel::Optional);
        child.type_name = Some(".M".to_string());
        let pool = build_pool(
            "proto3",
            DescriptorProto {
                name: Some("M".to_string()),
                field: vec![child, field("n", 2, PType::Int32, PLabel::Optional)],
                ..Default::default()
            },
        );
        let id = pool.find_message("M").unwrap();
        let mt32 = build_message(&pool, id, PointerWidth::W32);
        let mt64 = build_message(&pool, id, PointerWidth::W64);
        assert_eq!(mt32.field_by_number(1).unwrap().offset, 0);
        assert_eq!(mt64.field_by_number(1).unwrap().offset, 0);
        assert_eq!(mt32.field_by_number(2).unwrap().offset, 4);
        assert_eq!(mt64.field_by_number(2).unwrap().offset, 8);
        assert_eq!(mt32.size, 8);
        assert_eq!(mt64.size, 16);
    }

    #[test]
    fn dense_below_stops_at_first_gap() {
        let pool = build_pool(
            "proto3",
            DescriptorProto {
                name: Some("M".to_string()),
                field: vec![
                    field("a", 1, PType::Int32, PLabel::Optional),
                    field("b", 2, PType::Int32, PLabel::Optional),
                    field("c", 5, PType::Int32, PLabel::Optional),
                ],
                ..Default::default()
            },
        );
        let id = pool.find_message("M").unwrap();
        let mt = build_message(&pool, id, PointerWidth::W64);
        assert_eq!(mt.dense_below, 2);
    }

    #[test]
    fn sub_references_follow_field_number_order() {
        let inner = DescriptorProto {
            name: Some("Inner".to_string()),
            ..Default::default()
        };
        let mut x = field("x", 3, PType::Message, PLabel::Optional);
        x.type_name = Some(".Outer.Inner".to_string());
        let mut y = field("y", 1, PType::Message, PLabel::Optional);
        y.type_name = Some(".Outer.Inner".to_string());
        let outer = DescriptorProto {
            name: Some("Outer".to_string()),
            field: vec![x, y],
            nested_type: vec![inner],
            ..Default::default()
        };
        let pool = build_pool("proto3", outer);
        let id = pool.find_message("Outer").unwrap();
        let msg = pool.message(id);
        let subs = sub_references(&pool, msg);
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].0, 1);
        assert_eq!(subs[1].0, 3);

        let mt = build_message(&pool, id, PointerWidth::W64);
        assert_eq!(mt.field_by_number(1).unwrap().submsg_index, Some(0));
        assert_eq!(mt.field_by_number(3).unwrap().submsg_index, Some(1));
    }
}
