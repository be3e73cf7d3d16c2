//! Top-level class file container.
//!
//! Parses the fixed header, the constant pool and the field, method and
//! attribute tables, and serialises them back byte-for-byte.
use bitflags::bitflags;
use log::warn;

use crate::attributes::{parse_attributes, serialize_attributes, Attribute, CodeAttribute};
use crate::constant_pool::ConstantPool;
use crate::descriptor::fqcn;
use crate::error::ParseError;
use crate::reader::{ClassReader, ClassWriter};

/// Values of magic bytes of a JVM class file.
const CLASS_FILE_MAGIC: u32 = 0xCAFE_BABE;

bitflags! {
    /// Class, field and method access flags. `SUPER` and `SYNCHRONIZED`
    /// share a bit; which reading applies depends on the holder.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const _ = !0;
    }
}

impl AccessFlags {
    /// Human-readable modifier list for diagnostics.
    pub fn description(&self) -> String {
        let mut modifiers = Vec::new();
        if self.contains(Self::PUBLIC) {
            modifiers.push("public");
        }
        if self.contains(Self::PRIVATE) {
            modifiers.push("private");
        }
        if self.contains(Self::PROTECTED) {
            modifiers.push("protected");
        }
        if self.contains(Self::STATIC) {
            modifiers.push("static");
        }
        if self.contains(Self::FINAL) {
            modifiers.push("final");
        }
        if self.contains(Self::SYNCHRONIZED) {
            modifiers.push("synchronized");
        }
        if self.contains(Self::VOLATILE) {
            modifiers.push("volatile");
        }
        if self.contains(Self::TRANSIENT) {
            modifiers.push("transient");
        }
        if self.contains(Self::NATIVE) {
            modifiers.push("native");
        }
        if self.contains(Self::INTERFACE) {
            modifiers.push("interface");
        }
        if self.contains(Self::ABSTRACT) {
            modifiers.push("abstract");
        }
        if self.contains(Self::STRICT) {
            modifiers.push("strict");
        }
        modifiers.join(" ")
    }
}

/// A field or method entry. Both share the same layout.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub access_flags: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl MemberInfo {
    fn parse(reader: &mut ClassReader, pool: &ConstantPool) -> Result<Self, ParseError> {
        Ok(Self {
            access_flags: AccessFlags::from_bits_retain(reader.u2()?),
            name_index: reader.u2()?,
            descriptor_index: reader.u2()?,
            attributes: parse_attributes(reader, pool)?,
        })
    }

    fn serialize(&self, writer: &mut ClassWriter) {
        writer.put_u2(self.access_flags.bits());
        writer.put_u2(self.name_index);
        writer.put_u2(self.descriptor_index);
        serialize_attributes(&self.attributes, writer);
    }

    pub fn name(&self, pool: &ConstantPool) -> Result<String, ParseError> {
        pool.utf8(self.name_index)
    }

    pub fn descriptor(&self, pool: &ConstantPool) -> Result<String, ParseError> {
        pool.utf8(self.descriptor_index)
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(AccessFlags::STATIC)
    }

    /// The member's `Code` attribute, if any. Abstract and native
    /// methods have none.
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(Attribute::as_code)
    }
}

/// A decoded Java class file.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: AccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Decode a class file image.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut reader = ClassReader::new(data);
        let magic = reader.u4()?;
        if magic != CLASS_FILE_MAGIC {
            return Err(ParseError::BadMagic(magic));
        }
        let minor_version = reader.u2()?;
        let major_version = reader.u2()?;
        let constant_pool = ConstantPool::parse(&mut reader)?;
        let access_flags = AccessFlags::from_bits_retain(reader.u2()?);
        let this_class = reader.u2()?;
        let super_class = reader.u2()?;

        let interface_count = reader.u2()? as usize;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            interfaces.push(reader.u2()?);
        }

        let field_count = reader.u2()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(MemberInfo::parse(&mut reader, &constant_pool)?);
        }

        let method_count = reader.u2()? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            methods.push(MemberInfo::parse(&mut reader, &constant_pool)?);
        }

        let attributes = parse_attributes(&mut reader, &constant_pool)?;

        if reader.remaining() != 0 {
            warn!(
                "{} trailing bytes after class file structure",
                reader.remaining()
            );
        }

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Encode this class back into bytes. For any well-formed input,
    /// `serialize(parse(bytes)) == bytes`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = ClassWriter::new();
        writer.put_u4(CLASS_FILE_MAGIC);
        writer.put_u2(self.minor_version);
        writer.put_u2(self.major_version);
        self.constant_pool.serialize(&mut writer);
        writer.put_u2(self.access_flags.bits());
        writer.put_u2(self.this_class);
        writer.put_u2(self.super_class);
        writer.put_u2(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            writer.put_u2(*interface);
        }
        writer.put_u2(self.fields.len() as u16);
        for field in &self.fields {
            field.serialize(&mut writer);
        }
        writer.put_u2(self.methods.len() as u16);
        for method in &self.methods {
            method.serialize(&mut writer);
        }
        serialize_attributes(&self.attributes, &mut writer);
        writer.into_bytes()
    }

    /// Internal (slash-separated) name of this class.
    pub fn class_name(&self) -> Result<String, ParseError> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Dotted name of this class.
    pub fn class_fqcn(&self) -> Result<String, ParseError> {
        Ok(fqcn(&self.class_name()?))
    }

    /// Dotted name of the superclass; `None` for `java/lang/Object`.
    pub fn super_fqcn(&self) -> Result<Option<String>, ParseError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        Ok(Some(fqcn(&self.constant_pool.class_name(self.super_class)?)))
    }

    /// The name behind a `SourceFile` attribute, if present.
    pub fn source_file(&self) -> Option<String> {
        self.attributes.iter().find_map(|attribute| match attribute {
            Attribute::SourceFile {
                sourcefile_index, ..
            } => self.constant_pool.utf8(*sourcefile_index).ok(),
            _ => None,
        })
    }
}
