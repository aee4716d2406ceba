//! Symbol naming for generated C code: identifier mangling, accessor-name
//! collision resolution, file banners and preprocessor guards.

use crate::descriptor::{DescriptorPool, EnumId, FieldDef, MessageDef, MsgId};
use std::collections::HashMap;
use std::fmt::Write;

/* Accessor prefixes that can collide with a sibling field's plain name;
 * a field named e.g. "clear_foo" next to a field "foo" gets a trailing
 * underscore in its accessors. */
const ACCESSOR_PREFIXES: [&str; 6] = ["clear_", "delete_", "add_", "resize_", "set_", "has_"];

pub fn to_c_ident(name: &str) -> String {
  name.replace(['.', '/', '-'], "_")
}

pub fn to_preproc(name: &str) -> String {
  to_c_ident(name).to_uppercase()
}

pub fn strip_extension(file_name: &str) -> &str {
  file_name.strip_suffix(".proto").unwrap_or(file_name)
}

pub fn header_filename(file_name: &str) -> String {
  format!("{}.upb.h", strip_extension(file_name))
}

pub fn source_filename(file_name: &str) -> String {
  format!("{}.upb.c", strip_extension(file_name))
}

pub fn message_name(msg: &MessageDef) -> String {
  to_c_ident(&msg.full_name)
}

pub fn message_init(msg: &MessageDef) -> String {
  format!("{}_msg_init", message_name(msg))
}

pub fn enum_init(pool: &DescriptorPool, id: EnumId) -> String {
  format!("{}_enum_init", to_c_ident(&pool.enum_def(id).full_name))
}

pub fn file_layout_name(file_name: &str) -> String {
  format!("{}_upb_file_layout", to_c_ident(file_name))
}

pub fn extension_ident_base(pool: &DescriptorPool, ext: &FieldDef) -> String {
  match ext.extension_scope {
    Some(scope) => message_name(pool.message(scope)),
    None => to_c_ident(&pool.file(ext.file).package),
  }
}

pub fn extension_layout_name(pool: &DescriptorPool, ext: &FieldDef) -> String {
  format!("{}_{}_ext", extension_ident_base(pool, ext), ext.name)
}

pub fn oneof_full_ident(pool: &DescriptorPool, msg: MsgId, oneof_index: usize) -> String {
  to_c_ident(&pool.message(msg).oneofs[oneof_index].full_name)
}

/* "generated file" banner placed at the top of both artifacts */
pub fn emit_file_warning(file_name: &str, out: &mut String) {
  write!(
    out,
    "/* This file was generated by upbc (the upb compiler) from the input\n\
     \x20* file:\n\
     \x20*\n\
     \x20*     {}\n\
     \x20*\n\
     \x20* Do not edit -- your changes will be discarded when the file is\n\
     \x20* regenerated. */\n\n",
    file_name
  )
  .unwrap();
}

pub fn upb_size(v32: impl std::fmt::Display, v64: impl std::fmt::Display) -> String {
  format!("UPB_SIZE({}, {})", v32, v64)
}

/// Per-message map used to disambiguate accessor names.
pub type FieldNameMap = HashMap<String, ()>;

pub fn create_field_name_map(msg: &MessageDef) -> FieldNameMap {
  msg.fields.iter().map(|f| (f.name.clone(), ())).collect()
}

/// The accessor-visible name of a field, suffixed when it would shadow a
/// generated accessor of a sibling field.
pub fn resolve_field_name(field: &FieldDef, names: &FieldNameMap) -> String {
  for prefix in ACCESSOR_PREFIXES {
    if let Some(rest) = field.name.strip_prefix(prefix) {
      if names.contains_key(rest) {
        return format!("{}_", field.name);
      }
    }
  }
  field.name.clone()
}

/* C string literal escaping in the style of absl::CEscape */
pub fn c_escape(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for byte in value.bytes() {
    match byte {
      b'\n' => out.push_str("\\n"),
      b'\r' => out.push_str("\\r"),
      b'\t' => out.push_str("\\t"),
      b'"' => out.push_str("\\\""),
      b'\'' => out.push_str("\\'"),
      b'\\' => out.push_str("\\\\"),
      0x20..=0x7e => out.push(byte as char),
      _ => {
        write!(out, "\\{:03o}", byte).unwrap();
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::descriptor::{FieldType, FileId, Label};

  fn named_field(name: &str) -> FieldDef {
    FieldDef {
      name: name.to_string(),
      number: 1,
      label: Label::Optional,
      field_type: FieldType::Int32,
      msg_type: None,
      enum_type: None,
      oneof: None,
      proto3_optional: false,
      packed: false,
      default_value: None,
      is_extension: false,
      extendee: None,
      extension_scope: None,
      file: FileId(0),
    }
  }

  #[test]
  fn c_ident_replaces_separators() {
    assert_eq!(to_c_ident("google.protobuf.Any"), "google_protobuf_Any");
    assert_eq!(to_preproc("google/protobuf/any.proto"), "GOOGLE_PROTOBUF_ANY_PROTO");
  }

  #[test]
  fn filenames_swap_proto_suffix() {
    assert_eq!(header_filename("dir/foo.proto"), "dir/foo.upb.h");
    assert_eq!(source_filename("dir/foo.proto"), "dir/foo.upb.c");
  }

  #[test]
  fn colliding_accessor_names_get_a_suffix() {
    let mut names = FieldNameMap::new();
    names.insert("foo".to_string(), ());
    names.insert("clear_foo".to_string(), ());

    assert_eq!(resolve_field_name(&named_field("clear_foo"), &names), "clear_foo_");
    assert_eq!(resolve_field_name(&named_field("foo"), &names), "foo");
    /* no "bar" sibling, so no suffix */
    assert_eq!(resolve_field_name(&named_field("set_bar"), &names), "set_bar");
  }

  #[test]
  fn escapes_c_string_literals() {
    assert_eq!(c_escape("a\"b\\c\n"), "a\\\"b\\\\c\\n");
    assert_eq!(c_escape("\x01"), "\\001");
  }
}
