//! File-level layout: both platform widths for every message in a file,
//! plus enum and extension mini-tables, with deterministic orderings.

use crate::descriptor::{DescriptorPool, EnumId, FieldDef, FileId, MessageDef, MsgId};
use crate::layout::classify::classify;
use crate::layout::platform::{build_message, sub_references};
use crate::minitable::{
    EnumMiniTable, ExtensionTable, MiniTable, MiniTableField, PointerWidth, Sub,
};
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct MessageTables {
    pub mt32: MiniTable,
    pub mt64: MiniTable,
    /// Shared by both widths; `submsg_index` fields index into it.
    pub subs: Vec<Sub>,
}

impl MessageTables {
    pub fn mini_table(&self, width: PointerWidth) -> &MiniTable {
        match width {
            PointerWidth::W32 => &self.mt32,
            PointerWidth::W64 => &self.mt64,
        }
    }

    /// Case-slot offset of a declared oneof (identical on both widths).
    pub fn oneof_case_offset(&self, msg: &MessageDef, oneof_index: usize) -> u16 {
        let member = msg.oneofs[oneof_index]
            .fields
            .first()
            .expect("oneof with no members");
        let number = msg.fields[*member].number;
        self.mt64
            .field_by_number(number)
            .and_then(|f| f.oneof_case_offset())
            .expect("oneof member without case offset")
    }
}

#[derive(Debug)]
pub struct FileLayout<'a> {
    pool: &'a DescriptorPool,
    file: FileId,
    messages: Vec<MsgId>,
    enums: Vec<EnumId>,
    /// Indices into the file's extension list, sorted by full name.
    extensions: Vec<usize>,
    tables: BTreeMap<MsgId, MessageTables>,
    enum_tables: BTreeMap<EnumId, EnumMiniTable>,
    ext_tables: BTreeMap<usize, ExtensionTable>,
}

impl<'a> FileLayout<'a> {
    pub fn build(pool: &'a DescriptorPool, file: FileId) -> FileLayout<'a> {
        let file_def = pool.file(file);

        let mut messages = file_def.messages.clone();
        messages.sort_by(|a, b| pool.message(*a).full_name.cmp(&pool.message(*b).full_name));

        let mut enums = file_def.enums.clone();
        enums.sort_by(|a, b| pool.enum_def(*a).full_name.cmp(&pool.enum_def(*b).full_name));

        let mut extensions: Vec<usize> = (0..file_def.extensions.len()).collect();
        extensions.sort_by_key(|&i| extension_full_name(pool, &file_def.extensions[i]));

        let mut tables = BTreeMap::new();
        for &msg_id in &messages {
            let msg = pool.message(msg_id);
            tables.insert(
                msg_id,
                MessageTables {
                    mt32: build_message(pool, msg_id, PointerWidth::W32),
                    mt64: build_message(pool, msg_id, PointerWidth::W64),
                    subs: sub_references(pool, msg).into_iter().map(|(_, s)| s).collect(),
                },
            );
        }

        let mut enum_tables = BTreeMap::new();
        if pool.syntax_of(file) == crate::descriptor::Syntax::Proto2 {
            for &enum_id in &enums {
                let values: Vec<i32> = pool
                    .enum_def(enum_id)
                    .values
                    .iter()
                    .map(|v| v.number)
                    .collect();
                enum_tables.insert(enum_id, EnumMiniTable::build(&values));
            }
        }

        let mut ext_tables = BTreeMap::new();
        for &i in &extensions {
            ext_tables.insert(i, build_extension(pool, &file_def.extensions[i]));
        }

        FileLayout {
            pool,
            file,
            messages,
            enums,
            extensions,
            tables,
            enum_tables,
            ext_tables,
        }
    }

    pub fn pool(&self) -> &'a DescriptorPool {
        self.pool
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    /// Messages of the file, sorted by fully-qualified name.
    pub fn messages(&self) -> &[MsgId] {
        &self.messages
    }

    /// Enums of the file, sorted by fully-qualified name.
    pub fn enums(&self) -> &[EnumId] {
        &self.enums
    }

    /// Extensions of the file, sorted by fully-qualified name.
    pub fn extensions(&self) -> impl Iterator<Item = (&FieldDef, &ExtensionTable)> {
        let file_def = self.pool.file(self.file);
        self.extensions
            .iter()
            .map(move |&i| (&file_def.extensions[i], &self.ext_tables[&i]))
    }

    pub fn tables(&self, msg: MsgId) -> &MessageTables {
        &self.tables[&msg]
    }

    pub fn mini_table(&self, msg: MsgId, width: PointerWidth) -> &MiniTable {
        self.tables(msg).mini_table(width)
    }

    pub fn enum_table(&self, id: EnumId) -> Option<&EnumMiniTable> {
        self.enum_tables.get(&id)
    }

    pub fn field(&self, msg: MsgId, number: i32, width: PointerWidth) -> &MiniTableField {
        self.mini_table(msg, width)
            .field_by_number(number)
            .expect("field not in mini-table")
    }
}

/// Full name of an extension field: its scope, then its name.
pub fn extension_full_name(pool: &DescriptorPool, ext: &FieldDef) -> String {
    let scope = match ext.extension_scope {
        Some(m) => pool.message(m).full_name.clone(),
        None => pool.file(ext.file).package.clone(),
    };
    if scope.is_empty() {
        ext.name.clone()
    } else {
        format!("{}.{}", scope, ext.name)
    }
}

fn build_extension(pool: &DescriptorPool, ext: &FieldDef) -> ExtensionTable {
    let class = classify(pool, None, ext);
    let sub = if let Some(m) = ext.msg_type {
        Some(Sub::Message(m))
    } else {
        ext.enum_type
            .filter(|&e| pool.enum_is_closed(e))
            .map(Sub::Enum)
    };

    // Extension data lives out of line, so the record carries no offset or
    // hasbit; a message-typed extension points at its sub through index 0.
    ExtensionTable {
        field: MiniTableField {
            number: ext.number,
            offset: 0,
            presence: 0,
            submsg_index: if ext.msg_type.is_some() { Some(0) } else { None },
            descriptor_type: class.descriptor_type,
            mode: class.mode,
            rep: class.rep64,
            label_flags: class.label_flags,
        },
        extendee: ext.extendee.expect("extension without extendee"),
        sub,
    }
}
