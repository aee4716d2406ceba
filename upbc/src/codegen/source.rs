//! Mini-table emission: the `.upb.c` artifact.
//!
//! The layout records are serialized as statically-initialized C structures
//! the runtime links against. Mode bytes are spelled with symbolic
//! constants so the output stays debuggable; the values are identical to
//! the runtime's packed byte.

use crate::codegen::names::{
    emit_file_warning, enum_init, extension_layout_name, file_layout_name, header_filename,
    message_init, message_name,
};
use crate::descriptor::{DescriptorPool, MsgId, Syntax};
use crate::layout::fasttable::{fast_decode_table, table_mask};
use crate::layout::file::FileLayout;
use crate::minitable::{FieldMode, FieldRep, MiniTableField, Sub};
use crate::minitable::{
    LABEL_FLAG_IS_ALTERNATE, LABEL_FLAG_IS_EXTENSION, LABEL_FLAG_IS_PACKED,
};
use std::collections::BTreeMap;
use std::fmt::Write;

const MESSAGES_INIT: &str = "messages_layout";
const ENUMS_INIT: &str = "enums_layout";
const EXTENSIONS_INIT: &str = "extensions_layout";

/// Symbolic initializer for the packed mode byte. The 32-bit and 64-bit
/// records differ only in representation, and only for pointers.
fn mode_init(field32: &MiniTableField, field64: &MiniTableField) -> String {
    let mut out = match field64.mode {
        FieldMode::Map => "kUpb_FieldMode_Map",
        FieldMode::Array => "kUpb_FieldMode_Array",
        FieldMode::Scalar => "kUpb_FieldMode_Scalar",
    }
    .to_string();

    if field64.label_flags & LABEL_FLAG_IS_PACKED != 0 {
        out.push_str(" | kUpb_LabelFlags_IsPacked");
    }
    if field64.label_flags & LABEL_FLAG_IS_EXTENSION != 0 {
        out.push_str(" | kUpb_LabelFlags_IsExtension");
    }
    if field64.label_flags & LABEL_FLAG_IS_ALTERNATE != 0 {
        out.push_str(" | kUpb_LabelFlags_IsAlternate");
    }

    let rep = match (field32.rep, field64.rep) {
        (FieldRep::OneByte, _) => "kUpb_FieldRep_1Byte".to_string(),
        (FieldRep::FourByte, FieldRep::FourByte) => "kUpb_FieldRep_4Byte".to_string(),
        (FieldRep::FourByte, _) => {
            "UPB_SIZE(kUpb_FieldRep_4Byte, kUpb_FieldRep_8Byte)".to_string()
        }
        (FieldRep::StringView, _) => "kUpb_FieldRep_StringView".to_string(),
        (FieldRep::EightByte, _) => "kUpb_FieldRep_8Byte".to_string(),
    };

    write!(out, " | ({} << kUpb_FieldRep_Shift)", rep).unwrap();
    out
}

fn write_field(field32: &MiniTableField, field64: &MiniTableField, out: &mut String) {
    let submsg = match field64.submsg_index {
        Some(index) => index.to_string(),
        None => "kUpb_NoSub".to_string(),
    };
    write!(
        out,
        "{{{}, UPB_SIZE({}, {}), UPB_SIZE({}, {}), {}, {}, {}}}",
        field64.number,
        field32.offset,
        field64.offset,
        field32.presence,
        field64.presence,
        submsg,
        field64.descriptor_type,
        mode_init(field32, field64)
    )
    .unwrap();
}

fn sub_initializer(pool: &DescriptorPool, sub: &Sub) -> String {
    match sub {
        Sub::Message(m) => format!("{{.submsg = &{}}}", message_init(pool.message(*m))),
        Sub::Enum(e) => format!("{{.subenum = &{}}}", enum_init(pool, *e)),
    }
}

fn write_message(layout: &FileLayout, msg_id: MsgId, fasttable_enabled: bool, out: &mut String) {
    let pool = layout.pool();
    let msg = pool.message(msg_id);
    let msg_name = message_name(msg);
    let tables = layout.tables(msg_id);

    let mut submsgs_ref = "NULL".to_string();
    if !tables.subs.is_empty() {
        let array_name = format!("{}_submsgs", msg_name);
        write!(
            out,
            "static const upb_MiniTable_Sub {}[{}] = {{\n",
            array_name,
            tables.subs.len()
        )
        .unwrap();
        for sub in &tables.subs {
            write!(out, "  {},\n", sub_initializer(pool, sub)).unwrap();
        }
        out.push_str("};\n\n");
        submsgs_ref = format!("&{}[0]", array_name);
    }

    let mut fields_ref = "NULL".to_string();
    if !tables.mt64.fields.is_empty() {
        let array_name = format!("{}__fields", msg_name);
        write!(
            out,
            "static const upb_MiniTable_Field {}[{}] = {{\n",
            array_name,
            tables.mt64.fields.len()
        )
        .unwrap();
        for (field32, field64) in tables.mt32.fields.iter().zip(&tables.mt64.fields) {
            out.push_str("  ");
            write_field(field32, field64, out);
            out.push_str(",\n");
        }
        out.push_str("};\n\n");
        fields_ref = format!("&{}[0]", array_name);
    }

    let table = if fasttable_enabled {
        fast_decode_table(layout, msg_id)
    } else {
        Vec::new()
    };
    let mask = table_mask(table.len());

    write!(out, "const upb_MiniTable {} = {{\n", message_init(msg)).unwrap();
    write!(out, "  {},\n", submsgs_ref).unwrap();
    write!(out, "  {},\n", fields_ref).unwrap();
    write!(
        out,
        "  UPB_SIZE({}, {}), {}, {}, {}, {}, {},\n",
        tables.mt32.size,
        tables.mt64.size,
        tables.mt64.fields.len(),
        tables.mt64.ext_mode.symbol(),
        tables.mt64.dense_below,
        mask,
        tables.mt64.required_count
    )
    .unwrap();
    if !table.is_empty() {
        out.push_str("  UPB_FASTTABLE_INIT({\n");
        for entry in &table {
            write!(out, "    {{0x{:016x}, &{}}},\n", entry.data, entry.symbol).unwrap();
        }
        out.push_str("  }),\n");
    }
    out.push_str("};\n\n");
}

fn write_messages(layout: &FileLayout, fasttable_enabled: bool, out: &mut String) -> usize {
    let pool = layout.pool();
    if layout.messages().is_empty() {
        return 0;
    }

    for &msg_id in layout.messages() {
        write_message(layout, msg_id, fasttable_enabled, out);
    }

    write!(
        out,
        "static const upb_MiniTable *{}[{}] = {{\n",
        MESSAGES_INIT,
        layout.messages().len()
    )
    .unwrap();
    for &msg_id in layout.messages() {
        write!(out, "  &{},\n", message_init(pool.message(msg_id))).unwrap();
    }
    out.push_str("};\n\n");
    layout.messages().len()
}

fn write_extensions(layout: &FileLayout, out: &mut String) -> usize {
    let pool = layout.pool();
    let count = layout.extensions().count();
    if count == 0 {
        return 0;
    }

    // Mini-tables referenced by the extension records, ordered by name.
    let mut forward: BTreeMap<String, MsgId> = BTreeMap::new();
    for (ext, table) in layout.extensions() {
        let extendee = table.extendee;
        forward.insert(pool.message(extendee).full_name.clone(), extendee);
        if let Some(m) = ext.msg_type {
            forward.insert(pool.message(m).full_name.clone(), m);
        }
    }
    for &msg_id in forward.values() {
        write!(out, "extern const upb_MiniTable {};\n", message_init(pool.message(msg_id))).unwrap();
    }

    for (ext, table) in layout.extensions() {
        write!(
            out,
            "const upb_MiniTable_Extension {} = {{\n  ",
            extension_layout_name(pool, ext)
        )
        .unwrap();
        write_field(&table.field, &table.field, out);
        out.push_str(",\n");
        write!(out, "  &{},\n", message_init(pool.message(table.extendee))).unwrap();
        let sub = match &table.sub {
            Some(sub) => sub_initializer(pool, sub),
            None => "{.submsg = NULL}".to_string(),
        };
        write!(out, "  {},\n}};\n", sub).unwrap();
    }

    write!(
        out,
        "\nstatic const upb_MiniTable_Extension *{}[{}] = {{\n",
        EXTENSIONS_INIT, count
    )
    .unwrap();
    for (ext, _) in layout.extensions() {
        write!(out, "  &{},\n", extension_layout_name(pool, ext)).unwrap();
    }
    out.push_str("};\n\n");
    count
}

fn write_enums(layout: &FileLayout, out: &mut String) -> usize {
    let pool = layout.pool();
    if pool.syntax_of(layout.file_id()) != Syntax::Proto2 {
        return 0;
    }

    for &enum_id in layout.enums() {
        let table = layout.enum_table(enum_id).expect("missing enum table");
        write!(out, "const upb_MiniTable_Enum {} = {{\n", enum_init(pool, enum_id)).unwrap();
        write!(out, "  {},\n", table.mask_limit).unwrap();
        write!(out, "  {},\n", table.value_count).unwrap();
        out.push_str("  {\n");
        for word in &table.data {
            write!(out, "    0x{:x},\n", word).unwrap();
        }
        out.push_str("  },\n};\n\n");
    }

    if !layout.enums().is_empty() {
        write!(
            out,
            "static const upb_MiniTable_Enum *{}[{}] = {{\n",
            ENUMS_INIT,
            layout.enums().len()
        )
        .unwrap();
        for &enum_id in layout.enums() {
            write!(out, "  &{},\n", enum_init(pool, enum_id)).unwrap();
        }
        out.push_str("};\n\n");
    }

    layout.enums().len()
}

/// Emit the complete `.upb.c` text for one file.
pub fn write_source(layout: &FileLayout, fasttable_enabled: bool) -> String {
    let pool = layout.pool();
    let file = pool.file(layout.file_id());
    let mut out = String::new();

    emit_file_warning(&file.name, &mut out);
    write!(
        out,
        "#include <stddef.h>\n\
         #include \"upb/internal/array.h\"\n\
         #include \"upb/msg_internal.h\"\n\
         #include \"{}\"\n",
        header_filename(&file.name)
    )
    .unwrap();
    for dep in &file.dependencies {
        write!(out, "#include \"{}\"\n", header_filename(dep)).unwrap();
    }
    out.push_str("\n#include \"upb/port_def.inc\"\n\n");

    let msg_count = write_messages(layout, fasttable_enabled, &mut out);
    let ext_count = write_extensions(layout, &mut out);
    let enum_count = write_enums(layout, &mut out);

    write!(out, "const upb_MiniTable_File {} = {{\n", file_layout_name(&file.name)).unwrap();
    write!(out, "  {},\n", if msg_count > 0 { MESSAGES_INIT } else { "NULL" }).unwrap();
    write!(out, "  {},\n", if enum_count > 0 { ENUMS_INIT } else { "NULL" }).unwrap();
    write!(out, "  {},\n", if ext_count > 0 { EXTENSIONS_INIT } else { "NULL" }).unwrap();
    write!(out, "  {},\n", msg_count).unwrap();
    write!(out, "  {},\n", enum_count).unwrap();
    write!(out, "  {},\n", ext_count).unwrap();
    out.push_str("};\n\n");

    out.push_str("#include \"upb/port_undef.inc\"\n\n");
    out
}
