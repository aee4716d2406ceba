//! Inline accessor emission: the `.upb.h` artifact.
//!
//! Accessors read and write raw message memory through the offsets the
//! layout computed; nothing here consults the mini-tables at runtime.

use crate::codegen::names::{
    c_escape, create_field_name_map, emit_file_warning, enum_init, extension_ident_base,
    extension_layout_name, file_layout_name, header_filename, message_init, message_name,
    oneof_full_ident, resolve_field_name, to_c_ident, to_preproc, upb_size, FieldNameMap,
};
use crate::descriptor::{
    DescriptorPool, FieldDef, FieldType, FileId, MessageDef, MsgId, Syntax,
};
use crate::layout::file::{FileLayout, MessageTables};
use crate::minitable::PointerWidth;
use std::collections::BTreeMap;
use std::fmt::Write;

/// C-level value category of a field, following protobuf cpp_type.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum CppKind {
    Message,
    Bool,
    Float,
    Double,
    Int32,
    UInt32,
    Int64,
    UInt64,
    String,
    Enum,
}

fn cpp_kind(field: &FieldDef) -> CppKind {
    match field.field_type {
        FieldType::Message | FieldType::Group => CppKind::Message,
        FieldType::Bool => CppKind::Bool,
        FieldType::Float => CppKind::Float,
        FieldType::Double => CppKind::Double,
        FieldType::Int32 | FieldType::SInt32 | FieldType::SFixed32 => CppKind::Int32,
        FieldType::UInt32 | FieldType::Fixed32 => CppKind::UInt32,
        FieldType::Int64 | FieldType::SInt64 | FieldType::SFixed64 => CppKind::Int64,
        FieldType::UInt64 | FieldType::Fixed64 => CppKind::UInt64,
        FieldType::String | FieldType::Bytes => CppKind::String,
        FieldType::Enum => CppKind::Enum,
    }
}

fn c_type_internal(
    pool: &DescriptorPool,
    current_file: FileId,
    field: &FieldDef,
    is_const: bool,
) -> String {
    let maybe_const = if is_const { "const " } else { "" };
    match cpp_kind(field) {
        CppKind::Message => {
            let sub = pool.message(field.msg_type.expect("message field without type"));
            let maybe_struct = if sub.file != current_file { "struct " } else { "" };
            format!("{}{}{}*", maybe_const, maybe_struct, message_name(sub))
        }
        CppKind::Bool => "bool".to_string(),
        CppKind::Float => "float".to_string(),
        CppKind::Int32 | CppKind::Enum => "int32_t".to_string(),
        CppKind::UInt32 => "uint32_t".to_string(),
        CppKind::Double => "double".to_string(),
        CppKind::Int64 => "int64_t".to_string(),
        CppKind::UInt64 => "uint64_t".to_string(),
        CppKind::String => "upb_StringView".to_string(),
    }
}

fn c_type(pool: &DescriptorPool, current_file: FileId, field: &FieldDef) -> String {
    c_type_internal(pool, current_file, field, false)
}

fn c_type_const(pool: &DescriptorPool, current_file: FileId, field: &FieldDef) -> String {
    c_type_internal(pool, current_file, field, true)
}

/// Element size log2 used by the array resize/append hooks.
fn size_lg2(field: &FieldDef) -> &'static str {
    match cpp_kind(field) {
        CppKind::Message => "UPB_SIZE(2, 3)",
        CppKind::Enum => "2",
        CppKind::Bool => "1",
        CppKind::Float => "2",
        CppKind::Int32 => "2",
        CppKind::UInt32 => "2",
        CppKind::Double => "3",
        CppKind::Int64 => "3",
        CppKind::UInt64 => "3",
        CppKind::String => "UPB_SIZE(3, 4)",
    }
}

fn default_enum_number(pool: &DescriptorPool, field: &FieldDef) -> i32 {
    let enum_def = pool.enum_def(field.enum_type.expect("enum field without type"));
    match &field.default_value {
        Some(name) => enum_def.value_number(name).unwrap_or(0),
        None => enum_def.default_number(),
    }
}

fn has_non_zero_default(pool: &DescriptorPool, field: &FieldDef) -> bool {
    let raw = field.default_value.as_deref();
    match cpp_kind(field) {
        CppKind::Message => false,
        CppKind::String => raw.map(|s| !s.is_empty()).unwrap_or(false),
        CppKind::Bool => raw == Some("true"),
        CppKind::Enum => default_enum_number(pool, field) != 0,
        CppKind::Float | CppKind::Double => raw
            .and_then(|s| s.parse::<f64>().ok())
            .map(|v| v != 0.0)
            .unwrap_or(false),
        _ => raw
            .and_then(|s| s.parse::<i128>().ok())
            .map(|v| v != 0)
            .unwrap_or(false),
    }
}

fn field_default(pool: &DescriptorPool, field: &FieldDef) -> String {
    let raw = field.default_value.as_deref();
    match cpp_kind(field) {
        CppKind::Message => "NULL".to_string(),
        CppKind::String => {
            // A bytes default arrives already C-escaped in the descriptor.
            let value = match (field.field_type, raw) {
                (FieldType::Bytes, Some(s)) => s.to_string(),
                (_, Some(s)) => c_escape(s),
                (_, None) => String::new(),
            };
            format!("upb_StringView_FromString(\"{}\")", value)
        }
        CppKind::Bool => if raw == Some("true") { "true" } else { "false" }.to_string(),
        CppKind::Enum => default_enum_number(pool, field).to_string(),
        CppKind::Float => match raw {
            Some("inf") => "kUpb_FltInfinity".to_string(),
            Some("-inf") => "-kUpb_FltInfinity".to_string(),
            Some(v) => v.to_string(),
            None => "0".to_string(),
        },
        CppKind::Double => match raw {
            Some("inf") => "kUpb_Infinity".to_string(),
            Some("-inf") => "-kUpb_Infinity".to_string(),
            Some(v) => v.to_string(),
            None => "0".to_string(),
        },
        CppKind::Int32 => format!("_upb_Int32_FromI({})", raw.unwrap_or("0")),
        CppKind::Int64 => format!("_upb_Int64_FromLL({}ll)", raw.unwrap_or("0")),
        CppKind::UInt32 => format!("_upb_UInt32_FromU({}u)", raw.unwrap_or("0")),
        CppKind::UInt64 => format!("_upb_UInt64_FromULL({}ull)", raw.unwrap_or("0")),
    }
}

fn field_offset(tables: &MessageTables, number: i32) -> String {
    let f32_ = tables.mt32.field_by_number(number).expect("field record");
    let f64_ = tables.mt64.field_by_number(number).expect("field record");
    upb_size(f32_.offset, f64_.offset)
}

fn case_offset_str(tables: &MessageTables, msg: &MessageDef, oneof_index: usize) -> String {
    let offset = tables.oneof_case_offset(msg, oneof_index);
    upb_size(offset, offset)
}

fn hasbit(tables: &MessageTables, number: i32) -> Option<i16> {
    let record = tables.mt64.field_by_number(number)?;
    if record.presence > 0 {
        Some(record.presence)
    } else {
        None
    }
}

struct MsgCtx<'a> {
    pool: &'a DescriptorPool,
    file: FileId,
    msg: &'a MessageDef,
    msg_id: MsgId,
    msg_name: String,
    tables: &'a MessageTables,
    names: FieldNameMap,
}

fn emit_message_functions(ctx: &MsgCtx, out: &mut String) {
    let name = &ctx.msg_name;
    let init = message_init(ctx.msg);
    write!(
        out,
        "UPB_INLINE {name}* {name}_new(upb_Arena* arena) {{\n\
         \x20 return ({name}*)_upb_Message_New(&{init}, arena);\n\
         }}\n\
         UPB_INLINE {name}* {name}_parse(const char* buf, size_t size, upb_Arena* arena) {{\n\
         \x20 {name}* ret = {name}_new(arena);\n\
         \x20 if (!ret) return NULL;\n\
         \x20 if (upb_Decode(buf, size, ret, &{init}, NULL, 0, arena) != kUpb_DecodeStatus_Ok) {{\n\
         \x20   return NULL;\n\
         \x20 }}\n\
         \x20 return ret;\n\
         }}\n\
         UPB_INLINE {name}* {name}_parse_ex(const char* buf, size_t size,\n\
         \x20                          const upb_ExtensionRegistry* extreg,\n\
         \x20                          int options, upb_Arena* arena) {{\n\
         \x20 {name}* ret = {name}_new(arena);\n\
         \x20 if (!ret) return NULL;\n\
         \x20 if (upb_Decode(buf, size, ret, &{init}, extreg, options, arena) !=\n\
         \x20     kUpb_DecodeStatus_Ok) {{\n\
         \x20   return NULL;\n\
         \x20 }}\n\
         \x20 return ret;\n\
         }}\n\
         UPB_INLINE char* {name}_serialize(const {name}* msg, upb_Arena* arena, size_t* len) {{\n\
         \x20 char* ptr;\n\
         \x20 (void)upb_Encode(msg, &{init}, 0, arena, &ptr, len);\n\
         \x20 return ptr;\n\
         }}\n\
         UPB_INLINE char* {name}_serialize_ex(const {name}* msg, int options,\n\
         \x20                                upb_Arena* arena, size_t* len) {{\n\
         \x20 char* ptr;\n\
         \x20 (void)upb_Encode(msg, &{init}, options, arena, &ptr, len);\n\
         \x20 return ptr;\n\
         }}\n",
        name = name,
        init = init
    )
    .unwrap();
}

fn emit_oneof(ctx: &MsgCtx, oneof_index: usize, out: &mut String) {
    let oneof = &ctx.msg.oneofs[oneof_index];
    let full = oneof_full_ident(ctx.pool, ctx.msg_id, oneof_index);
    out.push_str("typedef enum {\n");
    for &fi in &oneof.fields {
        let field = &ctx.msg.fields[fi];
        write!(out, "  {}_{} = {},\n", full, field.name, field.number).unwrap();
    }
    write!(out, "  {full}_NOT_SET = 0\n}} {full}_oneofcases;\n", full = full).unwrap();
    write!(
        out,
        "UPB_INLINE {full}_oneofcases {msg}_{o}_case(const {msg}* msg) {{\n\
         \x20 return ({full}_oneofcases)*UPB_PTR_AT(msg, {off}, int32_t);\n\
         }}\n",
        full = full,
        msg = ctx.msg_name,
        o = oneof.name,
        off = case_offset_str(ctx.tables, ctx.msg, oneof_index)
    )
    .unwrap();
}

fn emit_hazzer(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    let name = resolve_field_name(field, &ctx.names);
    let msg_name = &ctx.msg_name;
    if let Some(bit) = hasbit(ctx.tables, field.number) {
        write!(
            out,
            "UPB_INLINE bool {msg}_has_{f}(const {msg}* msg) {{\n\
             \x20 return _upb_hasbit(msg, {bit});\n\
             }}\n",
            msg = msg_name,
            f = name,
            bit = bit
        )
        .unwrap();
    } else if let Some(oi) = ctx.msg.real_oneof_of(field) {
        write!(
            out,
            "UPB_INLINE bool {msg}_has_{f}(const {msg}* msg) {{\n\
             \x20 return _upb_getoneofcase(msg, {off}) == {num};\n\
             }}\n",
            msg = msg_name,
            f = name,
            off = case_offset_str(ctx.tables, ctx.msg, oi),
            num = field.number
        )
        .unwrap();
    } else if field.msg_type.is_some() {
        write!(
            out,
            "UPB_INLINE bool {msg}_has_{f}(const {msg}* msg) {{\n\
             \x20 return _upb_has_submsg_nohasbit(msg, {off});\n\
             }}\n",
            msg = msg_name,
            f = name,
            off = field_offset(ctx.tables, field.number)
        )
        .unwrap();
    }
}

fn emit_clear(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    if ctx.msg.map_entry {
        // Map entry keys and values cannot be cleared.
        return;
    }
    let name = resolve_field_name(field, &ctx.names);
    let msg_name = &ctx.msg_name;
    let offset = field_offset(ctx.tables, field.number);

    if let Some(oi) = ctx.msg.real_oneof_of(field) {
        let default = if cpp_kind(field) == CppKind::String {
            "upb_StringView_FromDataAndSize(NULL, 0)"
        } else {
            "0"
        };
        write!(
            out,
            "UPB_INLINE void {msg}_clear_{f}(const {msg}* msg) {{\n\
             \x20 UPB_WRITE_ONEOF(msg, {ty}, {off}, {default}, {case_off}, {oneof}_NOT_SET);\n\
             }}\n",
            msg = msg_name,
            f = name,
            ty = c_type(ctx.pool, ctx.file, field),
            off = offset,
            default = default,
            case_off = case_offset_str(ctx.tables, ctx.msg, oi),
            oneof = oneof_full_ident(ctx.pool, ctx.msg_id, oi)
        )
        .unwrap();
        return;
    }

    let clearhas = hasbit(ctx.tables, field.number)
        .map(|bit| format!("\n  _upb_clearhas(msg, {});", bit))
        .unwrap_or_default();
    if field.msg_type.is_some() {
        write!(
            out,
            "UPB_INLINE void {msg}_clear_{f}(const {msg}* msg) {{\n\
             \x20 *UPB_PTR_AT(msg, {off}, const upb_Message*) = NULL;{clearhas}\n\
             }}\n",
            msg = msg_name,
            f = name,
            off = offset,
            clearhas = clearhas
        )
        .unwrap();
    } else {
        let zero = if cpp_kind(field) == CppKind::String {
            "upb_StringView_FromDataAndSize(NULL, 0)"
        } else {
            "0"
        };
        write!(
            out,
            "UPB_INLINE void {msg}_clear_{f}(const {msg}* msg) {{\n\
             \x20 *UPB_PTR_AT(msg, {off}, {ty}) = {zero};{clearhas}\n\
             }}\n",
            msg = msg_name,
            f = name,
            off = offset,
            ty = c_type(ctx.pool, ctx.file, field),
            zero = zero,
            clearhas = clearhas
        )
        .unwrap();
    }
}

fn emit_repeated_clear(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    write!(
        out,
        "UPB_INLINE void {msg}_clear_{f}(const {msg}* msg) {{\n\
         \x20 _upb_array_detach(msg, {off});\n\
         }}\n",
        msg = ctx.msg_name,
        f = resolve_field_name(field, &ctx.names),
        off = field_offset(ctx.tables, field.number)
    )
    .unwrap();
}

fn map_helper_size(field: &FieldDef, expr: &str) -> String {
    if cpp_kind(field) == CppKind::String {
        "0".to_string()
    } else {
        format!("sizeof({})", expr)
    }
}

fn emit_map_getters(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    let entry = ctx.pool.message(field.msg_type.expect("map without entry"));
    let key = entry.field_by_number(1).expect("map entry key");
    let val = entry.field_by_number(2).expect("map entry value");
    let name = resolve_field_name(field, &ctx.names);
    let msg_name = &ctx.msg_name;
    let offset = field_offset(ctx.tables, field.number);
    write!(
        out,
        "UPB_INLINE size_t {msg}_{f}_size(const {msg}* msg) {{\n\
         \x20 return _upb_msg_map_size(msg, {off});\n\
         }}\n\
         UPB_INLINE bool {msg}_{f}_get(const {msg}* msg, {kt} key, {vt}* val) {{\n\
         \x20 return _upb_msg_map_get(msg, {off}, &key, {ks}, val, {vs});\n\
         }}\n\
         UPB_INLINE {ct} {msg}_{f}_next(const {msg}* msg, size_t* iter) {{\n\
         \x20 return ({ct})_upb_msg_map_next(msg, {off}, iter);\n\
         }}\n",
        msg = msg_name,
        f = name,
        off = offset,
        kt = c_type(ctx.pool, ctx.file, key),
        vt = c_type(ctx.pool, ctx.file, val),
        ks = map_helper_size(key, "key"),
        vs = map_helper_size(val, "*val"),
        ct = c_type_const(ctx.pool, ctx.file, field)
    )
    .unwrap();
}

fn emit_map_entry_getters(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    write!(
        out,
        "UPB_INLINE {ct} {msg}_{f}(const {msg}* msg) {{\n\
         \x20 {ty} ret;\n\
         \x20 _upb_msg_map_{f}(msg, &ret, {size});\n\
         \x20 return ret;\n\
         }}\n",
        ct = c_type_const(ctx.pool, ctx.file, field),
        msg = ctx.msg_name,
        f = field.name,
        ty = c_type(ctx.pool, ctx.file, field),
        size = map_helper_size(field, "ret")
    )
    .unwrap();
}

fn emit_repeated_getters(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    write!(
        out,
        "UPB_INLINE {ct} const* {msg}_{f}(const {msg}* msg, size_t* len) {{\n\
         \x20 return ({ct} const*)_upb_array_accessor(msg, {off}, len);\n\
         }}\n",
        ct = c_type_const(ctx.pool, ctx.file, field),
        msg = ctx.msg_name,
        f = resolve_field_name(field, &ctx.names),
        off = field_offset(ctx.tables, field.number)
    )
    .unwrap();
}

fn emit_oneof_getter(ctx: &MsgCtx, field: &FieldDef, oneof_index: usize, out: &mut String) {
    write!(
        out,
        "UPB_INLINE {ct} {msg}_{f}(const {msg}* msg) {{\n\
         \x20 return UPB_READ_ONEOF(msg, {ct}, {off}, {case_off}, {num}, {default});\n\
         }}\n",
        ct = c_type_const(ctx.pool, ctx.file, field),
        msg = ctx.msg_name,
        f = resolve_field_name(field, &ctx.names),
        off = field_offset(ctx.tables, field.number),
        case_off = case_offset_str(ctx.tables, ctx.msg, oneof_index),
        num = field.number,
        default = field_default(ctx.pool, field)
    )
    .unwrap();
}

fn emit_scalar_getter(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    let name = resolve_field_name(field, &ctx.names);
    let ct = c_type_const(ctx.pool, ctx.file, field);
    let offset = field_offset(ctx.tables, field.number);
    if has_non_zero_default(ctx.pool, field) {
        write!(
            out,
            "UPB_INLINE {ct} {msg}_{f}(const {msg}* msg) {{\n\
             \x20 return {msg}_has_{f}(msg) ? *UPB_PTR_AT(msg, {off}, {ct}) : {default};\n\
             }}\n",
            ct = ct,
            msg = ctx.msg_name,
            f = name,
            off = offset,
            default = field_default(ctx.pool, field)
        )
        .unwrap();
    } else {
        write!(
            out,
            "UPB_INLINE {ct} {msg}_{f}(const {msg}* msg) {{\n\
             \x20 return *UPB_PTR_AT(msg, {off}, {ct});\n\
             }}\n",
            ct = ct,
            msg = ctx.msg_name,
            f = name,
            off = offset
        )
        .unwrap();
    }
}

fn emit_getters(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    if field.is_map(ctx.pool) {
        emit_map_getters(ctx, field, out);
    } else if ctx.msg.map_entry {
        emit_map_entry_getters(ctx, field, out);
    } else if field.is_repeated() {
        emit_repeated_getters(ctx, field, out);
    } else if let Some(oi) = ctx.msg.real_oneof_of(field) {
        emit_oneof_getter(ctx, field, oi, out);
    } else {
        emit_scalar_getter(ctx, field, out);
    }
}

fn emit_map_setters(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    let entry = ctx.pool.message(field.msg_type.expect("map without entry"));
    let key = entry.field_by_number(1).expect("map entry key");
    let val = entry.field_by_number(2).expect("map entry value");
    let name = resolve_field_name(field, &ctx.names);
    let msg_name = &ctx.msg_name;
    let offset = field_offset(ctx.tables, field.number);
    write!(
        out,
        "UPB_INLINE void {msg}_{f}_clear({msg}* msg) {{ _upb_msg_map_clear(msg, {off}); }}\n\
         UPB_INLINE bool {msg}_{f}_set({msg}* msg, {kt} key, {vt} val, upb_Arena* a) {{\n\
         \x20 return _upb_msg_map_set(msg, {off}, &key, {ks}, &val, {vs}, a);\n\
         }}\n\
         UPB_INLINE bool {msg}_{f}_delete({msg}* msg, {kt} key) {{\n\
         \x20 return _upb_msg_map_delete(msg, {off}, &key, {ks});\n\
         }}\n\
         UPB_INLINE {ty} {msg}_{f}_nextmutable({msg}* msg, size_t* iter) {{\n\
         \x20 return ({ty})_upb_msg_map_next(msg, {off}, iter);\n\
         }}\n",
        msg = msg_name,
        f = name,
        off = offset,
        kt = c_type(ctx.pool, ctx.file, key),
        vt = c_type(ctx.pool, ctx.file, val),
        ks = map_helper_size(key, "key"),
        vs = map_helper_size(val, "val"),
        ty = c_type(ctx.pool, ctx.file, field)
    )
    .unwrap();
}

fn emit_repeated_setters(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    let name = resolve_field_name(field, &ctx.names);
    let msg_name = &ctx.msg_name;
    let offset = field_offset(ctx.tables, field.number);
    let ty = c_type(ctx.pool, ctx.file, field);
    write!(
        out,
        "UPB_INLINE {ty}* {msg}_mutable_{f}({msg}* msg, size_t* len) {{\n\
         \x20 return ({ty}*)_upb_array_mutable_accessor(msg, {off}, len);\n\
         }}\n\
         UPB_INLINE {ty}* {msg}_resize_{f}({msg}* msg, size_t len, upb_Arena* arena) {{\n\
         \x20 return ({ty}*)_upb_Array_Resize_accessor2(msg, {off}, len, {lg2}, arena);\n\
         }}\n",
        ty = ty,
        msg = msg_name,
        f = name,
        off = offset,
        lg2 = size_lg2(field)
    )
    .unwrap();
    if cpp_kind(field) == CppKind::Message {
        let sub = ctx.pool.message(field.msg_type.expect("message field without type"));
        write!(
            out,
            "UPB_INLINE struct {sub}* {msg}_add_{f}({msg}* msg, upb_Arena* arena) {{\n\
             \x20 struct {sub}* sub = (struct {sub}*)_upb_Message_New(&{sub_init}, arena);\n\
             \x20 bool ok = _upb_Array_Append_accessor2(msg, {off}, {lg2}, &sub, arena);\n\
             \x20 if (!ok) return NULL;\n\
             \x20 return sub;\n\
             }}\n",
            sub = message_name(sub),
            sub_init = message_init(sub),
            msg = msg_name,
            f = name,
            off = offset,
            lg2 = size_lg2(field)
        )
        .unwrap();
    } else {
        write!(
            out,
            "UPB_INLINE bool {msg}_add_{f}({msg}* msg, {ty} val, upb_Arena* arena) {{\n\
             \x20 return _upb_Array_Append_accessor2(msg, {off}, {lg2}, &val, arena);\n\
             }}\n",
            msg = msg_name,
            f = name,
            ty = ty,
            off = offset,
            lg2 = size_lg2(field)
        )
        .unwrap();
    }
}

fn emit_nonrepeated_setters(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    if ctx.msg.map_entry && field.number == 1 {
        // Map keys cannot be mutated once inserted.
        return;
    }
    let name = resolve_field_name(field, &ctx.names);
    let msg_name = &ctx.msg_name;
    let ty = c_type(ctx.pool, ctx.file, field);
    write!(
        out,
        "UPB_INLINE void {msg}_set_{f}({msg} *msg, {ty} value) {{\n",
        msg = msg_name,
        f = name,
        ty = ty
    )
    .unwrap();

    if ctx.msg.map_entry && field.number == 2 {
        let size = if cpp_kind(field) == CppKind::String {
            "0".to_string()
        } else {
            format!("sizeof({})", ty)
        };
        write!(out, "  _upb_msg_map_set_value(msg, &value, {});\n}}\n", size).unwrap();
    } else if let Some(oi) = ctx.msg.real_oneof_of(field) {
        write!(
            out,
            "  UPB_WRITE_ONEOF(msg, {ty}, {off}, value, {case_off}, {num});\n}}\n",
            ty = ty,
            off = field_offset(ctx.tables, field.number),
            case_off = case_offset_str(ctx.tables, ctx.msg, oi),
            num = field.number
        )
        .unwrap();
    } else {
        if let Some(bit) = hasbit(ctx.tables, field.number) {
            write!(out, "  _upb_sethas(msg, {});\n", bit).unwrap();
        }
        write!(
            out,
            "  *UPB_PTR_AT(msg, {off}, {ty}) = value;\n}}\n",
            off = field_offset(ctx.tables, field.number),
            ty = ty
        )
        .unwrap();
    }

    // Submessage fields also get a mutable accessor that creates the child
    // on first touch.
    if cpp_kind(field) == CppKind::Message && !ctx.msg.map_entry {
        let sub = ctx.pool.message(field.msg_type.expect("message field without type"));
        write!(
            out,
            "UPB_INLINE struct {sub}* {msg}_mutable_{f}({msg}* msg, upb_Arena* arena) {{\n\
             \x20 struct {sub}* sub = (struct {sub}*){msg}_{f}(msg);\n\
             \x20 if (sub == NULL) {{\n\
             \x20   sub = (struct {sub}*)_upb_Message_New(&{sub_init}, arena);\n\
             \x20   if (!sub) return NULL;\n\
             \x20   {msg}_set_{f}(msg, sub);\n\
             \x20 }}\n\
             \x20 return sub;\n\
             }}\n",
            sub = message_name(sub),
            sub_init = message_init(sub),
            msg = msg_name,
            f = name
        )
        .unwrap();
    }
}

fn emit_setters(ctx: &MsgCtx, field: &FieldDef, out: &mut String) {
    if field.is_map(ctx.pool) {
        emit_map_setters(ctx, field, out);
    } else if field.is_repeated() {
        emit_repeated_setters(ctx, field, out);
    } else {
        emit_nonrepeated_setters(ctx, field, out);
    }
}

fn emit_message(layout: &FileLayout, msg_id: MsgId, out: &mut String) {
    let pool = layout.pool();
    let msg = pool.message(msg_id);
    let ctx = MsgCtx {
        pool,
        file: layout.file_id(),
        msg,
        msg_id,
        msg_name: message_name(msg),
        tables: layout.tables(msg_id),
        names: create_field_name_map(msg),
    };

    write!(out, "/* {} */\n\n", msg.full_name).unwrap();
    if !msg.map_entry {
        emit_message_functions(&ctx, out);
    }

    for (oi, _) in msg.real_oneofs() {
        emit_oneof(&ctx, oi, out);
    }

    let mut order: Vec<&FieldDef> = msg.fields.iter().collect();
    order.sort_by_key(|f| f.number);
    for field in &order {
        emit_hazzer(&ctx, field, out);
        if field.is_repeated() {
            emit_repeated_clear(&ctx, field, out);
        } else {
            emit_clear(&ctx, field, out);
        }
        emit_getters(&ctx, field, out);
    }

    out.push('\n');

    for field in &order {
        emit_setters(&ctx, field, out);
    }

    out.push('\n');
}

fn emit_extension(layout: &FileLayout, ext: &FieldDef, out: &mut String) {
    let pool = layout.pool();
    let base = extension_ident_base(pool, ext);
    let extendee = message_name(pool.message(ext.extendee.expect("extension without extendee")));
    let ext_layout = extension_layout_name(pool, ext);
    write!(
        out,
        "UPB_INLINE bool {base}_has_{f}(const struct {ee}* msg) {{\n\
         \x20 return _upb_Message_Getext(msg, &{ext}) != NULL;\n\
         }}\n\
         UPB_INLINE void {base}_clear_{f}(struct {ee}* msg) {{\n\
         \x20 _upb_Message_Clearext(msg, &{ext});\n\
         }}\n",
        base = base,
        f = ext.name,
        ee = extendee,
        ext = ext_layout
    )
    .unwrap();

    if ext.is_repeated() {
        // Repeated extension accessors go through reflection; none here.
    } else if ext.msg_type.is_some() {
        let ct = c_type_const(pool, layout.file_id(), ext);
        write!(
            out,
            "UPB_INLINE {ct} {base}_{f}(const struct {ee}* msg) {{\n\
             \x20 const upb_Message_Extension* ext = _upb_Message_Getext(msg, &{ext});\n\
             \x20 UPB_ASSERT(ext);\n\
             \x20 return *UPB_PTR_AT(&ext->data, 0, {ct});\n\
             }}\n\
             UPB_INLINE void {base}_set_{f}(struct {ee}* msg, {ct} ext, upb_Arena* arena) {{\n\
             \x20 const upb_Message_Extension* msg_ext =\n\
             \x20     _upb_Message_GetOrCreateExtension(msg, &{ext}, arena);\n\
             \x20 UPB_ASSERT(msg_ext);\n\
             \x20 *UPB_PTR_AT(&msg_ext->data, 0, {ct}) = ext;\n\
             }}\n",
            ct = ct,
            base = base,
            f = ext.name,
            ee = extendee,
            ext = ext_layout
        )
        .unwrap();
    } else {
        let ct = c_type_const(pool, layout.file_id(), ext);
        write!(
            out,
            "UPB_INLINE {ct} {base}_{f}(const struct {ee}* msg) {{\n\
             \x20 const upb_Message_Extension* ext = _upb_Message_Getext(msg, &{ext});\n\
             \x20 return ext ? *UPB_PTR_AT(&ext->data, 0, {ct}) : {default};\n\
             }}\n\
             UPB_INLINE void {base}_set_{f}(struct {ee}* msg, {ct} ext, upb_Arena* arena) {{\n\
             \x20 const upb_Message_Extension* msg_ext =\n\
             \x20     _upb_Message_GetOrCreateExtension(msg, &{ext}, arena);\n\
             \x20 UPB_ASSERT(msg_ext);\n\
             \x20 *UPB_PTR_AT(&msg_ext->data, 0, {ct}) = ext;\n\
             }}\n",
            ct = ct,
            base = base,
            f = ext.name,
            ee = extendee,
            ext = ext_layout,
            default = field_default(pool, ext)
        )
        .unwrap();
    }
}

fn emit_maxopt(layout: &FileLayout, out: &mut String) {
    let pool = layout.pool();
    let mut max32 = 0u16;
    let mut max64 = 0u16;
    let mut max32_name = None;
    let mut max64_name = None;
    for &msg_id in layout.messages() {
        let msg = pool.message(msg_id);
        if !msg.name.ends_with("Options") {
            continue;
        }
        let size32 = layout.mini_table(msg_id, PointerWidth::W32).size;
        let size64 = layout.mini_table(msg_id, PointerWidth::W64).size;
        if size32 > max32 {
            max32 = size32;
            max32_name = Some(msg.full_name.clone());
        }
        if size64 > max64 {
            max64 = size64;
            max64_name = Some(msg.full_name.clone());
        }
    }
    if let (Some(n32), Some(n64)) = (max32_name, max64_name) {
        write!(
            out,
            "/* Max size 32 is {} */\n/* Max size 64 is {} */\n\
             #define _UPB_MAXOPT_SIZE UPB_SIZE({}, {})\n\n",
            n32, n64, max32, max64
        )
        .unwrap();
    }
}

/// Emit the complete `.upb.h` text for one file.
pub fn write_header(layout: &FileLayout) -> String {
    let pool = layout.pool();
    let file = pool.file(layout.file_id());
    let mut out = String::new();

    emit_file_warning(&file.name, &mut out);
    write!(
        out,
        "#ifndef {guard}_UPB_H_\n\
         #define {guard}_UPB_H_\n\n\
         #include \"upb/decode.h\"\n\
         #include \"upb/decode_fast.h\"\n\
         #include \"upb/encode.h\"\n\n\
         #include \"upb/internal/array.h\"\n\
         #include \"upb/msg_internal.h\"\n",
        guard = to_preproc(&file.name)
    )
    .unwrap();

    for (i, dep) in file.public_dependencies.iter().enumerate() {
        if i == 0 {
            out.push_str("/* Public Imports. */\n");
        }
        write!(out, "#include \"{}\"\n", header_filename(dep)).unwrap();
        if i == file.public_dependencies.len() - 1 {
            out.push('\n');
        }
    }

    out.push_str(
        "#include \"upb/port_def.inc\"\n\
         \n\
         #ifdef __cplusplus\n\
         extern \"C\" {\n\
         #endif\n\
         \n",
    );

    // Forward declarations for this file's types.
    for &msg_id in layout.messages() {
        let name = message_name(pool.message(msg_id));
        write!(out, "typedef struct {name} {name};\n", name = name).unwrap();
    }
    for &msg_id in layout.messages() {
        write!(out, "extern const upb_MiniTable {};\n", message_init(pool.message(msg_id))).unwrap();
    }
    for (ext, _) in layout.extensions() {
        write!(
            out,
            "extern const upb_MiniTable_Extension {};\n",
            extension_layout_name(pool, ext)
        )
        .unwrap();
    }

    // Types from other files used as submessages or extendees, ordered by
    // full name.
    let mut foreign: BTreeMap<String, MsgId> = BTreeMap::new();
    for &msg_id in layout.messages() {
        for field in &pool.message(msg_id).fields {
            if let Some(sub) = field.msg_type {
                if pool.message(sub).file != layout.file_id() {
                    foreign.insert(pool.message(sub).full_name.clone(), sub);
                }
            }
        }
    }
    for (ext, _) in layout.extensions() {
        let extendee = ext.extendee.expect("extension without extendee");
        if pool.message(extendee).file != layout.file_id() {
            foreign.insert(pool.message(extendee).full_name.clone(), extendee);
        }
    }
    for &msg_id in foreign.values() {
        write!(out, "struct {};\n", message_name(pool.message(msg_id))).unwrap();
    }
    for &msg_id in foreign.values() {
        write!(out, "extern const upb_MiniTable {};\n", message_init(pool.message(msg_id))).unwrap();
    }

    if !layout.messages().is_empty() {
        out.push('\n');
    }

    for &enum_id in layout.enums() {
        let enum_def = pool.enum_def(enum_id);
        out.push_str("typedef enum {\n");
        let mut values: Vec<_> = enum_def.values.iter().collect();
        values.sort_by_key(|v| v.number);
        for (i, value) in values.iter().enumerate() {
            write!(out, "  {} = {}", to_c_ident(&value.full_name), value.number).unwrap();
            if i != values.len() - 1 {
                out.push(',');
            }
            out.push('\n');
        }
        write!(out, "}} {};\n\n", to_c_ident(&enum_def.full_name)).unwrap();
    }

    out.push('\n');

    if file.syntax == Syntax::Proto2 {
        for &enum_id in layout.enums() {
            write!(out, "extern const upb_MiniTable_Enum {};\n", enum_init(pool, enum_id)).unwrap();
        }
    }

    out.push('\n');
    for &msg_id in layout.messages() {
        emit_message(layout, msg_id, &mut out);
    }

    for (ext, _) in layout.extensions() {
        emit_extension(layout, ext, &mut out);
    }

    write!(out, "extern const upb_MiniTable_File {};\n\n", file_layout_name(&file.name)).unwrap();

    if file.name == "google/protobuf/descriptor.proto" {
        emit_maxopt(layout, &mut out);
    }

    write!(
        out,
        "#ifdef __cplusplus\n\
         }}  /* extern \"C\" */\n\
         #endif\n\
         \n\
         #include \"upb/port_undef.inc\"\n\
         \n\
         #endif  /* {}_UPB_H_ */\n",
        to_preproc(&file.name)
    )
    .unwrap();

    out
}
