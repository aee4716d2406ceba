//! Resolved view over a `google.protobuf.FileDescriptorSet`.
//!
//! The pool indexes every message and enum transitively (nested types and
//! synthetic map entries included) and resolves field type references up
//! front, so layout and emission never touch raw descriptor protos.

use prost_types::field_descriptor_proto;
use prost_types::{DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorSet};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FileId(pub usize);

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MsgId(pub usize);

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EnumId(pub usize);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("file '{file}' is missing a name")]
    MissingFileName { file: usize },

    #[error("field '{field}' references unknown type '{type_name}'")]
    UnresolvedTypeName { field: String, type_name: String },

    #[error("field '{field}' has message type but no type name")]
    MissingTypeName { field: String },

    #[error("duplicate type name '{0}' in descriptor set")]
    DuplicateTypeName(String),
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Syntax {
    Proto2,
    Proto3,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Label {
    Optional,
    Required,
    Repeated,
}

/// The protobuf field kind, numbered as in descriptor.proto.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FieldType {
    Double,
    Float,
    Int64,
    UInt64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Group,
    Message,
    Bytes,
    UInt32,
    Enum,
    SFixed32,
    SFixed64,
    SInt32,
    SInt64,
}

impl FieldType {
    pub fn descriptor_number(self) -> u8 {
        match self {
            FieldType::Double => 1,
            FieldType::Float => 2,
            FieldType::Int64 => 3,
            FieldType::UInt64 => 4,
            FieldType::Int32 => 5,
            FieldType::Fixed64 => 6,
            FieldType::Fixed32 => 7,
            FieldType::Bool => 8,
            FieldType::String => 9,
            FieldType::Group => 10,
            FieldType::Message => 11,
            FieldType::Bytes => 12,
            FieldType::UInt32 => 13,
            FieldType::Enum => 14,
            FieldType::SFixed32 => 15,
            FieldType::SFixed64 => 16,
            FieldType::SInt32 => 17,
            FieldType::SInt64 => 18,
        }
    }

    pub fn from_descriptor_number(number: u8) -> Option<FieldType> {
        Some(match number {
            1 => FieldType::Double,
            2 => FieldType::Float,
            3 => FieldType::Int64,
            4 => FieldType::UInt64,
            5 => FieldType::Int32,
            6 => FieldType::Fixed64,
            7 => FieldType::Fixed32,
            8 => FieldType::Bool,
            9 => FieldType::String,
            10 => FieldType::Group,
            11 => FieldType::Message,
            12 => FieldType::Bytes,
            13 => FieldType::UInt32,
            14 => FieldType::Enum,
            15 => FieldType::SFixed32,
            16 => FieldType::SFixed64,
            17 => FieldType::SInt32,
            18 => FieldType::SInt64,
            _ => return None,
        })
    }

    pub fn is_message(self) -> bool {
        matches!(self, FieldType::Message | FieldType::Group)
    }

    /// True for types that may appear in a packed repeated field.
    pub fn is_packable(self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group
        )
    }
}

#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub number: i32,
    pub label: Label,
    pub field_type: FieldType,
    pub msg_type: Option<MsgId>,
    pub enum_type: Option<EnumId>,
    /// Index into the containing message's `oneofs`, synthetic ones included.
    pub oneof: Option<usize>,
    pub proto3_optional: bool,
    pub packed: bool,
    pub default_value: Option<String>,
    pub is_extension: bool,
    pub extendee: Option<MsgId>,
    pub extension_scope: Option<MsgId>,
    pub file: FileId,
}

impl FieldDef {
    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated
    }

    pub fn is_required(&self) -> bool {
        self.label == Label::Required
    }

    pub fn is_map(&self, pool: &DescriptorPool) -> bool {
        self.is_repeated()
            && self
                .msg_type
                .map(|m| pool.message(m).map_entry)
                .unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct OneofDef {
    pub name: String,
    pub full_name: String,
    /// Synthetic oneofs exist only to model proto3 `optional` fields.
    pub synthetic: bool,
    /// Indices into the containing message's `fields`.
    pub fields: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct MessageDef {
    pub full_name: String,
    pub name: String,
    pub file: FileId,
    pub fields: Vec<FieldDef>,
    pub oneofs: Vec<OneofDef>,
    pub map_entry: bool,
    pub extendable: bool,
    pub message_set_wire_format: bool,
}

impl MessageDef {
    /// Declared (non-synthetic) oneofs with their indices.
    pub fn real_oneofs(&self) -> impl Iterator<Item = (usize, &OneofDef)> {
        self.oneofs
            .iter()
            .enumerate()
            .filter(|(_, o)| !o.synthetic)
    }

    /// The declared oneof containing `field`, ignoring synthetic oneofs.
    pub fn real_oneof_of(&self, field: &FieldDef) -> Option<usize> {
        let idx = field.oneof?;
        if self.oneofs[idx].synthetic {
            None
        } else {
            Some(idx)
        }
    }

    pub fn field_by_number(&self, number: i32) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.number == number)
    }

    pub fn map_key(&self) -> Option<&FieldDef> {
        if self.map_entry {
            self.field_by_number(1)
        } else {
            None
        }
    }

    pub fn map_value(&self) -> Option<&FieldDef> {
        if self.map_entry {
            self.field_by_number(2)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnumValueDef {
    pub name: String,
    /// Scoped like C++ enum values: package (or containing message), then name.
    pub full_name: String,
    pub number: i32,
}

#[derive(Clone, Debug)]
pub struct EnumDef {
    pub full_name: String,
    pub name: String,
    pub file: FileId,
    pub values: Vec<EnumValueDef>,
}

impl EnumDef {
    pub fn value_number(&self, name: &str) -> Option<i32> {
        self.values.iter().find(|v| v.name == name).map(|v| v.number)
    }

    /// The default for fields of this enum type when none is declared.
    pub fn default_number(&self) -> i32 {
        self.values.first().map(|v| v.number).unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
pub struct FileDef {
    pub name: String,
    pub package: String,
    pub syntax: Syntax,
    pub dependencies: Vec<String>,
    pub public_dependencies: Vec<String>,
    /// Every message in the file, nested and map-entry types included,
    /// in declaration order (parent before nested).
    pub messages: Vec<MsgId>,
    pub enums: Vec<EnumId>,
    /// Extension fields declared at file scope or inside a message.
    pub extensions: Vec<FieldDef>,
}

#[derive(Debug)]
pub struct DescriptorPool {
    files: Vec<FileDef>,
    messages: Vec<MessageDef>,
    enums: Vec<EnumDef>,
    message_index: HashMap<String, MsgId>,
    enum_index: HashMap<String, EnumId>,
}

impl DescriptorPool {
    pub fn build(set: &FileDescriptorSet) -> Result<Self, PoolError> {
        let mut pool = DescriptorPool {
            files: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
            message_index: HashMap::new(),
            enum_index: HashMap::new(),
        };

        // First pass: register every message and enum name so field type
        // references resolve regardless of declaration order.
        let mut msg_protos: Vec<(MsgId, &DescriptorProto)> = Vec::new();
        let mut ext_protos: Vec<(FileId, Option<MsgId>, &FieldDescriptorProto)> = Vec::new();

        for (index, fdp) in set.file.iter().enumerate() {
            if fdp.name.is_none() {
                return Err(PoolError::MissingFileName { file: index });
            }
            let file_id = FileId(pool.files.len());
            let syntax = match fdp.syntax() {
                "proto3" => Syntax::Proto3,
                _ => Syntax::Proto2,
            };
            let mut file = FileDef {
                name: fdp.name().to_string(),
                package: fdp.package().to_string(),
                syntax,
                dependencies: fdp.dependency.clone(),
                public_dependencies: fdp
                    .public_dependency
                    .iter()
                    .filter_map(|i| fdp.dependency.get(*i as usize).cloned())
                    .collect(),
                messages: Vec::new(),
                enums: Vec::new(),
                extensions: Vec::new(),
            };

            let scope = fdp.package().to_string();
            for m in &fdp.message_type {
                pool.register_message(&scope, m, file_id, &mut file, &mut msg_protos, &mut ext_protos)?;
            }
            for e in &fdp.enum_type {
                pool.register_enum(&scope, e, file_id, &mut file)?;
            }
            for ext in &fdp.extension {
                ext_protos.push((file_id, None, ext));
            }
            pool.files.push(file);
        }

        // Second pass: resolve fields now that every type name is known.
        for (msg_id, proto) in &msg_protos {
            let file_id = pool.messages[msg_id.0].file;
            let mut fields = Vec::with_capacity(proto.field.len());
            for f in &proto.field {
                fields.push(pool.build_field(f, file_id, None, None)?);
            }

            // Mark synthetic oneofs and wire up membership.
            let mut oneofs = pool.messages[msg_id.0].oneofs.clone();
            for (idx, field) in fields.iter().enumerate() {
                if let Some(oi) = field.oneof {
                    oneofs[oi].fields.push(idx);
                }
            }
            for oneof in &mut oneofs {
                oneof.synthetic = !oneof.fields.is_empty()
                    && oneof
                        .fields
                        .iter()
                        .all(|&fi| fields[fi].proto3_optional);
            }

            let msg = &mut pool.messages[msg_id.0];
            msg.fields = fields;
            msg.oneofs = oneofs;
        }

        for (file_id, scope, proto) in &ext_protos {
            let ext = pool.build_field(proto, *file_id, Some(true), *scope)?;
            pool.files[file_id.0].extensions.push(ext);
        }

        Ok(pool)
    }

    fn register_message<'a>(
        &mut self,
        scope: &str,
        proto: &'a DescriptorProto,
        file_id: FileId,
        file: &mut FileDef,
        msg_protos: &mut Vec<(MsgId, &'a DescriptorProto)>,
        ext_protos: &mut Vec<(FileId, Option<MsgId>, &'a FieldDescriptorProto)>,
    ) -> Result<MsgId, PoolError> {
        let full_name = join_scope(scope, proto.name());
        let msg_id = MsgId(self.messages.len());
        if self
            .message_index
            .insert(full_name.clone(), msg_id)
            .is_some()
        {
            return Err(PoolError::DuplicateTypeName(full_name));
        }

        let options = proto.options.as_ref();
        let oneofs = proto
            .oneof_decl
            .iter()
            .map(|o| OneofDef {
                name: o.name().to_string(),
                full_name: format!("{}.{}", full_name, o.name()),
                synthetic: false,
                fields: Vec::new(),
            })
            .collect();

        self.messages.push(MessageDef {
            full_name: full_name.clone(),
            name: proto.name().to_string(),
            file: file_id,
            fields: Vec::new(),
            oneofs,
            map_entry: options.map(|o| o.map_entry()).unwrap_or(false),
            extendable: !proto.extension_range.is_empty(),
            message_set_wire_format: options
                .map(|o| o.message_set_wire_format())
                .unwrap_or(false),
        });
        file.messages.push(msg_id);
        msg_protos.push((msg_id, proto));

        for nested in &proto.nested_type {
            self.register_message(&full_name, nested, file_id, file, msg_protos, ext_protos)?;
        }
        for e in &proto.enum_type {
            self.register_enum(&full_name, e, file_id, file)?;
        }
        for ext in &proto.extension {
            ext_protos.push((file_id, Some(msg_id), ext));
        }

        Ok(msg_id)
    }

    fn register_enum(
        &mut self,
        scope: &str,
        proto: &EnumDescriptorProto,
        file_id: FileId,
        file: &mut FileDef,
    ) -> Result<EnumId, PoolError> {
        let full_name = join_scope(scope, proto.name());
        let enum_id = EnumId(self.enums.len());
        if self.enum_index.insert(full_name.clone(), enum_id).is_some() {
            return Err(PoolError::DuplicateTypeName(full_name));
        }

        let values = proto
            .value
            .iter()
            .map(|v| EnumValueDef {
                name: v.name().to_string(),
                full_name: join_scope(scope, v.name()),
                number: v.number(),
            })
            .collect();

        self.enums.push(EnumDef {
            full_name,
            name: proto.name().to_string(),
            file: file_id,
            values,
        });
        file.enums.push(enum_id);
        Ok(enum_id)
    }

    fn build_field(
        &self,
        proto: &FieldDescriptorProto,
        file_id: FileId,
        force_extension: Option<bool>,
        extension_scope: Option<MsgId>,
    ) -> Result<FieldDef, PoolError> {
        let field_type = convert_type(proto.r#type());
        let label = match proto.label() {
            field_descriptor_proto::Label::Required => Label::Required,
            field_descriptor_proto::Label::Repeated => Label::Repeated,
            field_descriptor_proto::Label::Optional => Label::Optional,
        };

        let mut msg_type = None;
        let mut enum_type = None;
        if field_type.is_message() {
            let name = strip_leading_dot(proto.type_name());
            if name.is_empty() {
                return Err(PoolError::MissingTypeName {
                    field: proto.name().to_string(),
                });
            }
            msg_type = Some(self.find_message(name).ok_or_else(|| {
                PoolError::UnresolvedTypeName {
                    field: proto.name().to_string(),
                    type_name: name.to_string(),
                }
            })?);
        } else if field_type == FieldType::Enum {
            let name = strip_leading_dot(proto.type_name());
            enum_type = Some(self.find_enum(name).ok_or_else(|| {
                PoolError::UnresolvedTypeName {
                    field: proto.name().to_string(),
                    type_name: name.to_string(),
                }
            })?);
        }

        let is_extension = force_extension.unwrap_or(false) || proto.extendee.is_some();
        let extendee = if is_extension {
            let name = strip_leading_dot(proto.extendee());
            Some(self.find_message(name).ok_or_else(|| {
                PoolError::UnresolvedTypeName {
                    field: proto.name().to_string(),
                    type_name: name.to_string(),
                }
            })?)
        } else {
            None
        };

        let syntax = self.files[file_id.0].syntax;
        let packed_option = proto.options.as_ref().and_then(|o| o.packed);
        let packed = label == Label::Repeated
            && field_type.is_packable()
            && packed_option.unwrap_or(syntax == Syntax::Proto3);

        Ok(FieldDef {
            name: proto.name().to_string(),
            number: proto.number(),
            label,
            field_type,
            msg_type,
            enum_type,
            oneof: proto.oneof_index.map(|i| i as usize),
            proto3_optional: proto.proto3_optional(),
            packed,
            default_value: proto.default_value.clone(),
            is_extension,
            extendee,
            extension_scope,
            file: file_id,
        })
    }

    pub fn files(&self) -> impl Iterator<Item = (FileId, &FileDef)> {
        self.files.iter().enumerate().map(|(i, f)| (FileId(i), f))
    }

    pub fn file(&self, id: FileId) -> &FileDef {
        &self.files[id.0]
    }

    pub fn find_file(&self, name: &str) -> Option<FileId> {
        self.files
            .iter()
            .position(|f| f.name == name)
            .map(FileId)
    }

    pub fn message(&self, id: MsgId) -> &MessageDef {
        &self.messages[id.0]
    }

    pub fn enum_def(&self, id: EnumId) -> &EnumDef {
        &self.enums[id.0]
    }

    pub fn find_message(&self, full_name: &str) -> Option<MsgId> {
        self.message_index.get(full_name).copied()
    }

    pub fn find_enum(&self, full_name: &str) -> Option<EnumId> {
        self.enum_index.get(full_name).copied()
    }

    /// True when the enum does not accept arbitrary values (proto2 semantics).
    pub fn enum_is_closed(&self, id: EnumId) -> bool {
        self.files[self.enum_def(id).file.0].syntax == Syntax::Proto2
    }

    pub fn syntax_of(&self, id: FileId) -> Syntax {
        self.files[id.0].syntax
    }
}

fn join_scope(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn strip_leading_dot(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

fn convert_type(ty: field_descriptor_proto::Type) -> FieldType {
    use field_descriptor_proto::Type;
    match ty {
        Type::Double => FieldType::Double,
        Type::Float => FieldType::Float,
        Type::Int64 => FieldType::Int64,
        Type::Uint64 => FieldType::UInt64,
        Type::Int32 => FieldType::Int32,
        Type::Fixed64 => FieldType::Fixed64,
        Type::Fixed32 => FieldType::Fixed32,
        Type::Bool => FieldType::Bool,
        Type::String => FieldType::String,
        Type::Group => FieldType::Group,
        Type::Message => FieldType::Message,
        Type::Bytes => FieldType::Bytes,
        Type::Uint32 => FieldType::UInt32,
        Type::Enum => FieldType::Enum,
        Type::Sfixed32 => FieldType::SFixed32,
        Type::Sfixed64 => FieldType::SFixed64,
        Type::Sint32 => FieldType::SInt32,
        Type::Sint64 => FieldType::SInt64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::FileDescriptorProto;

    fn field(name: &str, number: i32, ty: field_descriptor_proto::Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(field_descriptor_proto::Label::Optional as i32),
            r#type: Some(ty as i32),
            ..Default::default()
        }
    }

    fn file_set(files: Vec<FileDescriptorProto>) -> FileDescriptorSet {
        FileDescriptorSet { file: files }
    }

    #[test]
    fn resolves_nested_message_references() {
        let inner = DescriptorProto {
            name: Some("Inner".to_string()),
            ..Default::default()
        };
        let mut f = field("child", 1, field_descriptor_proto::Type::Message);
        f.type_name = Some(".pkg.Outer.Inner".to_string());
        let outer = DescriptorProto {
            name: Some("Outer".to_string()),
            field: vec![f],
            nested_type: vec![inner],
            ..Default::default()
        };
        let fdp = FileDescriptorProto {
            name: Some("test.proto".to_string()),
            package: Some("pkg".to_string()),
            message_type: vec![outer],
            ..Default::default()
        };

        let pool = DescriptorPool::build(&file_set(vec![fdp])).unwrap();
        let outer_id = pool.find_message("pkg.Outer").unwrap();
        let inner_id = pool.find_message("pkg.Outer.Inner").unwrap();
        let outer = pool.message(outer_id);
        assert_eq!(outer.fields[0].msg_type, Some(inner_id));
        assert_eq!(pool.file(outer.file).messages.len(), 2);
    }

    #[test]
    fn proto3_scalars_default_to_packed() {
        let mut f = field("xs", 1, field_descriptor_proto::Type::Int32);
        f.label = Some(field_descriptor_proto::Label::Repeated as i32);
        let msg = DescriptorProto {
            name: Some("M".to_string()),
            field: vec![f],
            ..Default::default()
        };
        let fdp = FileDescriptorProto {
            name: Some("p3.proto".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![msg],
            ..Default::default()
        };

        let pool = DescriptorPool::build(&file_set(vec![fdp])).unwrap();
        let m = pool.message(pool.find_message("M").unwrap());
        assert!(m.fields[0].packed);
    }

    #[test]
    fn proto2_repeated_scalars_are_unpacked_by_default() {
        let mut f = field("xs", 1, field_descriptor_proto::Type::Int32);
        f.label = Some(field_descriptor_proto::Label::Repeated as i32);
        let msg = DescriptorProto {
            name: Some("M".to_string()),
            field: vec![f],
            ..Default::default()
        };
        let fdp = FileDescriptorProto {
            name: Some("p2.proto".to_string()),
            message_type: vec![msg],
            ..Default::default()
        };

        let pool = DescriptorPool::build(&file_set(vec![fdp])).unwrap();
        let m = pool.message(pool.find_message("M").unwrap());
        assert!(!m.fields[0].packed);
    }

    #[test]
    fn synthetic_oneofs_are_not_real() {
        let mut f = field("opt", 1, field_descriptor_proto::Type::Int32);
        f.proto3_optional = Some(true);
        f.oneof_index = Some(0);
        let msg = DescriptorProto {
            name: Some("M".to_string()),
            field: vec![f],
            oneof_decl: vec![prost_types::OneofDescriptorProto {
                name: Some("_opt".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let fdp = FileDescriptorProto {
            name: Some("p3.proto".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![msg],
            ..Default::default()
        };

        let pool = DescriptorPool::build(&file_set(vec![fdp])).unwrap();
        let m = pool.message(pool.find_message("M").unwrap());
        assert_eq!(m.real_oneofs().count(), 0);
        assert_eq!(m.real_oneof_of(&m.fields[0]), None);
        assert_eq!(m.fields[0].oneof, Some(0));
    }

    #[test]
    fn enum_value_full_names_use_parent_scope() {
        let e = EnumDescriptorProto {
            name: Some("Color".to_string()),
            value: vec![prost_types::EnumValueDescriptorProto {
                name: Some("RED".to_string()),
                number: Some(0),
                ..Default::default()
            }],
            ..Default::default()
        };
        let fdp = FileDescriptorProto {
            name: Some("colors.proto".to_string()),
            package: Some("pkg".to_string()),
            enum_type: vec![e],
            ..Default::default()
        };

        let pool = DescriptorPool::build(&file_set(vec![fdp])).unwrap();
        let id = pool.find_enum("pkg.Color").unwrap();
        assert_eq!(pool.enum_def(id).values[0].full_name, "pkg.RED");
    }
}
