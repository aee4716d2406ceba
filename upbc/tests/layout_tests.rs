/* Layout invariant tests
 *
 * These check the quantified layout properties over a deliberately messy
 * schema: alignment, range disjointness, hasbit assignment, oneof slot
 * sharing and fast-table well-formedness, on both pointer widths.
 */

use prost_types::field_descriptor_proto::{Label as PLabel, Type as PType};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    OneofDescriptorProto,
};
use upbc::descriptor::{DescriptorPool, FileId, MsgId};
use upbc::layout::classify::classify;
use upbc::layout::fasttable::{encoded_tag, fast_decode_table, table_slot};
use upbc::layout::FileLayout;
use upbc::minitable::PointerWidth;

fn field(name: &str, number: i32, ty: PType, label: PLabel) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        r#type: Some(ty as i32),
        label: Some(label as i32),
        ..Default::default()
    }
}

/* A proto2 message exercising every representation: a oneof, required and
 * optional scalars, strings, a submessage, and repeated fields. */
fn messy_file() -> FileDescriptorProto {
    let mut in_oneof_a = field("oa", 9, PType::Double, PLabel::Optional);
    in_oneof_a.oneof_index = Some(0);
    let mut in_oneof_b = field("ob", 10, PType::String, PLabel::Optional);
    in_oneof_b.oneof_index = Some(0);
    let mut child = field("child", 6, PType::Message, PLabel::Optional);
    child.type_name = Some(".pkg.Big.Sub".to_string());

    let sub = DescriptorProto {
        name: Some("Sub".to_string()),
        field: vec![field("n", 1, PType::Int32, PLabel::Optional)],
        ..Default::default()
    };
    let big = DescriptorProto {
        name: Some("Big".to_string()),
        field: vec![
            field("req_a", 1, PType::Int64, PLabel::Required),
            field("opt_b", 2, PType::Bool, PLabel::Optional),
            field("name", 3, PType::String, PLabel::Optional),
            field("req_c", 4, PType::Fixed32, PLabel::Required),
            field("xs", 5, PType::Int32, PLabel::Repeated),
            child,
            field("half", 7, PType::Float, PLabel::Optional),
            field("big", 8, PType::Uint64, PLabel::Optional),
            in_oneof_a,
            in_oneof_b,
        ],
        nested_type: vec![sub],
        oneof_decl: vec![OneofDescriptorProto {
            name: Some("choice".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    };
    FileDescriptorProto {
        name: Some("messy.proto".to_string()),
        package: Some("pkg".to_string()),
        message_type: vec![big],
        ..Default::default()
    }
}

fn build() -> (DescriptorPool, MsgId) {
    let pool = DescriptorPool::build(&FileDescriptorSet { file: vec![messy_file()] }).unwrap();
    let id = pool.find_message("pkg.Big").unwrap();
    (pool, id)
}

#[test]
fn every_field_is_naturally_aligned() {
    let (pool, id) = build();
    let msg = pool.message(id);
    for width in [PointerWidth::W32, PointerWidth::W64] {
        let layout = FileLayout::build(&pool, FileId(0));
        let mt = layout.mini_table(id, width);
        for record in &mt.fields {
            let def = msg.field_by_number(record.number).unwrap();
            let class = classify(&pool, Some(msg), def);
            let (_, align) = class.rep(width).size_align(width);
            assert_eq!(
                record.offset % align,
                0,
                "field {} misaligned on {:?}",
                def.name,
                width
            );
        }
        assert_eq!(mt.size % width.pointer_size(), 0);
    }
}

#[test]
fn non_oneof_field_ranges_are_disjoint() {
    let (pool, id) = build();
    let msg = pool.message(id);
    for width in [PointerWidth::W32, PointerWidth::W64] {
        let layout = FileLayout::build(&pool, FileId(0));
        let mt = layout.mini_table(id, width);
        let mut ranges: Vec<(u16, u16, i32)> = Vec::new();
        for record in &mt.fields {
            let def = msg.field_by_number(record.number).unwrap();
            if msg.real_oneof_of(def).is_some() {
                continue;
            }
            let class = classify(&pool, Some(msg), def);
            let (size, _) = class.rep(width).size_align(width);
            ranges.push((record.offset, record.offset + size, record.number));
        }
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(
                pair[0].1 <= pair[1].0,
                "fields {} and {} overlap on {:?}",
                pair[0].2,
                pair[1].2,
                width
            );
        }
    }
}

#[test]
fn hasbits_form_a_zero_based_prefix_with_required_first() {
    let (pool, id) = build();
    let layout = FileLayout::build(&pool, FileId(0));
    let mt = layout.mini_table(id, PointerWidth::W64);

    let mut indices: Vec<u16> = mt.fields.iter().filter_map(|f| f.hasbit_index()).collect();
    indices.sort_unstable();
    let expected: Vec<u16> = (0..indices.len() as u16).collect();
    assert_eq!(indices, expected, "hasbit indices must form [0..k)");

    /* required fields occupy [0..r) */
    let msg = pool.message(id);
    let mut required: Vec<u16> = mt
        .fields
        .iter()
        .filter(|f| msg.field_by_number(f.number).unwrap().is_required())
        .filter_map(|f| f.hasbit_index())
        .collect();
    required.sort_unstable();
    assert_eq!(required, vec![0, 1]);
    assert_eq!(mt.required_count, 2);
}

#[test]
fn oneof_members_share_offset_and_prefix_case_slot() {
    let (pool, id) = build();
    for width in [PointerWidth::W32, PointerWidth::W64] {
        let layout = FileLayout::build(&pool, FileId(0));
        let mt = layout.mini_table(id, width);
        let oa = mt.field_by_number(9).unwrap();
        let ob = mt.field_by_number(10).unwrap();
        assert_eq!(oa.offset, ob.offset);
        assert_eq!(oa.oneof_case_offset(), ob.oneof_case_offset());

        /* the case slot sits in the presence prefix, before all field data */
        let case_offset = oa.oneof_case_offset().unwrap();
        for record in &mt.fields {
            assert!(record.offset >= case_offset + 4 || record.offset == oa.offset);
        }
    }
}

#[test]
fn dense_below_counts_the_contiguous_prefix() {
    let (pool, id) = build();
    let layout = FileLayout::build(&pool, FileId(0));
    let mt = layout.mini_table(id, PointerWidth::W64);
    /* numbers are 1..10 contiguous */
    assert_eq!(mt.dense_below, 10);
}

#[test]
fn size_is_monotonic_in_field_count() {
    let mut previous = (0u16, 0u16);
    for count in 1..=6 {
        let fields: Vec<FieldDescriptorProto> = (1..=count)
            .map(|i| field(&format!("f{}", i), i, PType::Int32, PLabel::Optional))
            .collect();
        let msg = DescriptorProto {
            name: Some("M".to_string()),
            field: fields,
            ..Default::default()
        };
        let file = FileDescriptorProto {
            name: Some("t.proto".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![msg],
            ..Default::default()
        };
        let pool = DescriptorPool::build(&FileDescriptorSet { file: vec![file] }).unwrap();
        let layout = FileLayout::build(&pool, FileId(0));
        let id = pool.find_message("M").unwrap();
        let sizes = (
            layout.mini_table(id, PointerWidth::W32).size,
            layout.mini_table(id, PointerWidth::W64).size,
        );
        assert!(sizes.0 >= previous.0 && sizes.1 >= previous.1);
        previous = sizes;
    }
}

#[test]
fn fast_table_is_well_formed() {
    let (pool, id) = build();
    let msg = pool.message(id);
    let layout = FileLayout::build(&pool, FileId(0));
    let table = fast_decode_table(&layout, id);

    assert!(table.len().is_power_of_two());
    assert!(table.len() <= 32);

    /* every placed entry sits in the slot derived from its encoded tag */
    for def in &msg.fields {
        let class = classify(&pool, Some(msg), def);
        let tag = encoded_tag(def, &class);
        let Some(slot) = table_slot(tag) else { continue };
        if slot < table.len() && !table[slot].is_generic() {
            assert_eq!(
                table[slot].data & 0xffff,
                tag & 0xffff,
                "slot {} holds a foreign tag",
                slot
            );
        }
    }

    /* unplaced slots hold the zero-data generic sentinel */
    for entry in table.iter().filter(|e| e.is_generic()) {
        assert_eq!(entry.data, 0);
    }
}

#[test]
fn layouts_are_stable_across_pool_rebuilds() {
    let (pool_a, id_a) = build();
    let (pool_b, id_b) = build();
    let layout_a = FileLayout::build(&pool_a, FileId(0));
    let layout_b = FileLayout::build(&pool_b, FileId(0));
    for width in [PointerWidth::W32, PointerWidth::W64] {
        let mt_a = layout_a.mini_table(id_a, width);
        let mt_b = layout_b.mini_table(id_b, width);
        assert_eq!(mt_a.size, mt_b.size);
        for (fa, fb) in mt_a.fields.iter().zip(&mt_b.fields) {
            assert_eq!(fa.number, fb.number);
            assert_eq!(fa.offset, fb.offset);
            assert_eq!(fa.presence, fb.presence);
        }
    }
}
