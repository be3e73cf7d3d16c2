//! Attribute decoding and encoding.
//!
//! Attributes are dispatched by the UTF-8 name their `name_index` points
//! at. The decoder is strict: unrecognised names fail, and every
//! attribute must consume exactly its declared length. Each decoded
//! attribute keeps its `name_index` so the encoder reproduces the
//! original bytes.
use crate::constant_pool::ConstantPool;
use crate::error::ParseError;
use crate::reader::{ClassReader, ClassWriter};

/// One row of a `Code` attribute's exception table. `catch_type == 0`
/// marks a catch-all (finally) row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

impl ExceptionEntry {
    fn parse(reader: &mut ClassReader) -> Result<Self, ParseError> {
        Ok(Self {
            start_pc: reader.u2()?,
            end_pc: reader.u2()?,
            handler_pc: reader.u2()?,
            catch_type: reader.u2()?,
        })
    }

    fn serialize(&self, writer: &mut ClassWriter) {
        writer.put_u2(self.start_pc);
        writer.put_u2(self.end_pc);
        writer.put_u2(self.handler_pc);
        writer.put_u2(self.catch_type);
    }
}

/// The body of a `Code` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub name_index: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes: Vec<Attribute>,
}

/// A single verification type in a stack map frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object { cpool_index: u16 },
    Uninitialized { offset: u16 },
}

impl VerificationType {
    fn parse(reader: &mut ClassReader) -> Result<Self, ParseError> {
        let tag = reader.u1()?;
        Ok(match tag {
            0 => Self::Top,
            1 => Self::Integer,
            2 => Self::Float,
            3 => Self::Double,
            4 => Self::Long,
            5 => Self::Null,
            6 => Self::UninitializedThis,
            7 => Self::Object {
                cpool_index: reader.u2()?,
            },
            8 => Self::Uninitialized {
                offset: reader.u2()?,
            },
            other => return Err(ParseError::UnknownVariableInfo(other)),
        })
    }

    fn serialize(&self, writer: &mut ClassWriter) {
        match self {
            Self::Top => writer.put_u1(0),
            Self::Integer => writer.put_u1(1),
            Self::Float => writer.put_u1(2),
            Self::Double => writer.put_u1(3),
            Self::Long => writer.put_u1(4),
            Self::Null => writer.put_u1(5),
            Self::UninitializedThis => writer.put_u1(6),
            Self::Object { cpool_index } => {
                writer.put_u1(7);
                writer.put_u2(*cpool_index);
            }
            Self::Uninitialized { offset } => {
                writer.put_u1(8);
                writer.put_u2(*offset);
            }
        }
    }

    fn parse_list(reader: &mut ClassReader, count: usize) -> Result<Vec<Self>, ParseError> {
        let mut list = Vec::with_capacity(count);
        for _ in 0..count {
            list.push(Self::parse(reader)?);
        }
        Ok(list)
    }
}

/// Stack map frames, keyed by the frame-type byte ranges of the format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    Same {
        frame_type: u8,
    },
    SameLocals1StackItem {
        frame_type: u8,
        stack: VerificationType,
    },
    SameLocals1StackItemExtended {
        offset_delta: u16,
        stack: VerificationType,
    },
    Chop {
        frame_type: u8,
        offset_delta: u16,
    },
    SameExtended {
        offset_delta: u16,
    },
    Append {
        frame_type: u8,
        offset_delta: u16,
        locals: Vec<VerificationType>,
    },
    Full {
        offset_delta: u16,
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

impl StackMapFrame {
    fn parse(reader: &mut ClassReader) -> Result<Self, ParseError> {
        let frame_type = reader.u1()?;
        Ok(match frame_type {
            0..=63 => Self::Same { frame_type },
            64..=127 => Self::SameLocals1StackItem {
                frame_type,
                stack: VerificationType::parse(reader)?,
            },
            247 => Self::SameLocals1StackItemExtended {
                offset_delta: reader.u2()?,
                stack: VerificationType::parse(reader)?,
            },
            248..=250 => Self::Chop {
                frame_type,
                offset_delta: reader.u2()?,
            },
            251 => Self::SameExtended {
                offset_delta: reader.u2()?,
            },
            252..=254 => {
                let offset_delta = reader.u2()?;
                let locals =
                    VerificationType::parse_list(reader, (frame_type - 251) as usize)?;
                Self::Append {
                    frame_type,
                    offset_delta,
                    locals,
                }
            }
            255 => {
                let offset_delta = reader.u2()?;
                let num_locals = reader.u2()? as usize;
                let locals = VerificationType::parse_list(reader, num_locals)?;
                let num_stack = reader.u2()? as usize;
                let stack = VerificationType::parse_list(reader, num_stack)?;
                Self::Full {
                    offset_delta,
                    locals,
                    stack,
                }
            }
            other => return Err(ParseError::UnknownStackFrame(other)),
        })
    }

    fn serialize(&self, writer: &mut ClassWriter) {
        match self {
            Self::Same { frame_type } => writer.put_u1(*frame_type),
            Self::SameLocals1StackItem { frame_type, stack } => {
                writer.put_u1(*frame_type);
                stack.serialize(writer);
            }
            Self::SameLocals1StackItemExtended {
                offset_delta,
                stack,
            } => {
                writer.put_u1(247);
                writer.put_u2(*offset_delta);
                stack.serialize(writer);
            }
            Self::Chop {
                frame_type,
                offset_delta,
            } => {
                writer.put_u1(*frame_type);
                writer.put_u2(*offset_delta);
            }
            Self::SameExtended { offset_delta } => {
                writer.put_u1(251);
                writer.put_u2(*offset_delta);
            }
            Self::Append {
                frame_type,
                offset_delta,
                locals,
            } => {
                writer.put_u1(*frame_type);
                writer.put_u2(*offset_delta);
                for local in locals {
                    local.serialize(writer);
                }
            }
            Self::Full {
                offset_delta,
                locals,
                stack,
            } => {
                writer.put_u1(255);
                writer.put_u2(*offset_delta);
                writer.put_u2(locals.len() as u16);
                for local in locals {
                    local.serialize(writer);
                }
                writer.put_u2(stack.len() as u16);
                for item in stack {
                    item.serialize(writer);
                }
            }
        }
    }
}

/// Annotation element values, themselves tag-dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementValue {
    Const {
        tag: char,
        const_value_index: u16,
    },
    EnumConst {
        type_name_index: u16,
        const_name_index: u16,
    },
    ClassInfo {
        class_info_index: u16,
    },
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}

impl ElementValue {
    fn parse(reader: &mut ClassReader) -> Result<Self, ParseError> {
        let tag = reader.u1()? as char;
        Ok(match tag {
            'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' | 's' => Self::Const {
                tag,
                const_value_index: reader.u2()?,
            },
            'e' => Self::EnumConst {
                type_name_index: reader.u2()?,
                const_name_index: reader.u2()?,
            },
            'c' => Self::ClassInfo {
                class_info_index: reader.u2()?,
            },
            '@' => Self::Annotation(Annotation::parse(reader)?),
            '[' => {
                let count = reader.u2()? as usize;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(Self::parse(reader)?);
                }
                Self::Array(values)
            }
            other => return Err(ParseError::UnknownElementValue(other)),
        })
    }

    fn serialize(&self, writer: &mut ClassWriter) {
        match self {
            Self::Const {
                tag,
                const_value_index,
            } => {
                writer.put_u1(*tag as u8);
                writer.put_u2(*const_value_index);
            }
            Self::EnumConst {
                type_name_index,
                const_name_index,
            } => {
                writer.put_u1(b'e');
                writer.put_u2(*type_name_index);
                writer.put_u2(*const_name_index);
            }
            Self::ClassInfo { class_info_index } => {
                writer.put_u1(b'c');
                writer.put_u2(*class_info_index);
            }
            Self::Annotation(annotation) => {
                writer.put_u1(b'@');
                annotation.serialize(writer);
            }
            Self::Array(values) => {
                writer.put_u1(b'[');
                writer.put_u2(values.len() as u16);
                for value in values {
                    value.serialize(writer);
                }
            }
        }
    }
}

/// A single annotation: a type plus named element values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub type_index: u16,
    pub element_value_pairs: Vec<(u16, ElementValue)>,
}

impl Annotation {
    fn parse(reader: &mut ClassReader) -> Result<Self, ParseError> {
        let type_index = reader.u2()?;
        let count = reader.u2()? as usize;
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let element_name_index = reader.u2()?;
            pairs.push((element_name_index, ElementValue::parse(reader)?));
        }
        Ok(Self {
            type_index,
            element_value_pairs: pairs,
        })
    }

    fn serialize(&self, writer: &mut ClassWriter) {
        writer.put_u2(self.type_index);
        writer.put_u2(self.element_value_pairs.len() as u16);
        for (name_index, value) in &self.element_value_pairs {
            writer.put_u2(*name_index);
            value.serialize(writer);
        }
    }

    fn parse_list(reader: &mut ClassReader) -> Result<Vec<Self>, ParseError> {
        let count = reader.u2()? as usize;
        let mut list = Vec::with_capacity(count);
        for _ in 0..count {
            list.push(Self::parse(reader)?);
        }
        Ok(list)
    }

    fn serialize_list(list: &[Self], writer: &mut ClassWriter) {
        writer.put_u2(list.len() as u16);
        for annotation in list {
            annotation.serialize(writer);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClass {
    pub inner_class_info_index: u16,
    pub outer_class_info_index: u16,
    pub inner_name_index: u16,
    pub inner_class_access_flags: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

impl LocalVariable {
    fn parse(reader: &mut ClassReader) -> Result<Self, ParseError> {
        Ok(Self {
            start_pc: reader.u2()?,
            length: reader.u2()?,
            name_index: reader.u2()?,
            descriptor_index: reader.u2()?,
            index: reader.u2()?,
        })
    }

    fn serialize(&self, writer: &mut ClassWriter) {
        writer.put_u2(self.start_pc);
        writer.put_u2(self.length);
        writer.put_u2(self.name_index);
        writer.put_u2(self.descriptor_index);
        writer.put_u2(self.index);
    }
}

/// A decoded attribute. Variants carry their `name_index` so encoding
/// reproduces the exact bytes that were read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    SourceFile {
        name_index: u16,
        sourcefile_index: u16,
    },
    ConstantValue {
        name_index: u16,
        constant_value_index: u16,
    },
    Code(CodeAttribute),
    Exceptions {
        name_index: u16,
        exception_index_table: Vec<u16>,
    },
    InnerClasses {
        name_index: u16,
        classes: Vec<InnerClass>,
    },
    Synthetic {
        name_index: u16,
    },
    Deprecated {
        name_index: u16,
    },
    LineNumberTable {
        name_index: u16,
        table: Vec<LineNumber>,
    },
    LocalVariableTable {
        name_index: u16,
        table: Vec<LocalVariable>,
    },
    LocalVariableTypeTable {
        name_index: u16,
        table: Vec<LocalVariable>,
    },
    StackMapTable {
        name_index: u16,
        entries: Vec<StackMapFrame>,
    },
    EnclosingMethod {
        name_index: u16,
        class_index: u16,
        method_index: u16,
    },
    Signature {
        name_index: u16,
        signature_index: u16,
    },
    SourceDebugExtension {
        name_index: u16,
        debug_extension: Vec<u8>,
    },
    RuntimeVisibleAnnotations {
        name_index: u16,
        annotations: Vec<Annotation>,
    },
    RuntimeInvisibleAnnotations {
        name_index: u16,
        annotations: Vec<Annotation>,
    },
    RuntimeVisibleParameterAnnotations {
        name_index: u16,
        parameter_annotations: Vec<Vec<Annotation>>,
    },
    RuntimeInvisibleParameterAnnotations {
        name_index: u16,
        parameter_annotations: Vec<Vec<Annotation>>,
    },
    AnnotationDefault {
        name_index: u16,
        default_value: ElementValue,
    },
}

impl Attribute {
    /// The pool index of this attribute's name.
    pub fn name_index(&self) -> u16 {
        match self {
            Self::SourceFile { name_index, .. }
            | Self::ConstantValue { name_index, .. }
            | Self::Exceptions { name_index, .. }
            | Self::InnerClasses { name_index, .. }
            | Self::Synthetic { name_index }
            | Self::Deprecated { name_index }
            | Self::LineNumberTable { name_index, .. }
            | Self::LocalVariableTable { name_index, .. }
            | Self::LocalVariableTypeTable { name_index, .. }
            | Self::StackMapTable { name_index, .. }
            | Self::EnclosingMethod { name_index, .. }
            | Self::Signature { name_index, .. }
            | Self::SourceDebugExtension { name_index, .. }
            | Self::RuntimeVisibleAnnotations { name_index, .. }
            | Self::RuntimeInvisibleAnnotations { name_index, .. }
            | Self::RuntimeVisibleParameterAnnotations { name_index, .. }
            | Self::RuntimeInvisibleParameterAnnotations { name_index, .. }
            | Self::AnnotationDefault { name_index, .. } => *name_index,
            Self::Code(code) => code.name_index,
        }
    }

    /// Borrow this attribute's `Code` body, if that is what it is.
    pub fn as_code(&self) -> Option<&CodeAttribute> {
        match self {
            Self::Code(code) => Some(code),
            _ => None,
        }
    }
}

fn parse_parameter_annotations(
    reader: &mut ClassReader,
) -> Result<Vec<Vec<Annotation>>, ParseError> {
    let num_parameters = reader.u1()? as usize;
    let mut parameter_annotations = Vec::with_capacity(num_parameters);
    for _ in 0..num_parameters {
        parameter_annotations.push(Annotation::parse_list(reader)?);
    }
    Ok(parameter_annotations)
}

fn serialize_parameter_annotations(
    parameter_annotations: &[Vec<Annotation>],
    writer: &mut ClassWriter,
) {
    writer.put_u1(parameter_annotations.len() as u8);
    for annotations in parameter_annotations {
        Annotation::serialize_list(annotations, writer);
    }
}

/// Parse one attribute, dispatching on the name behind `name_index`.
fn parse_attribute(
    reader: &mut ClassReader,
    pool: &ConstantPool,
) -> Result<Attribute, ParseError> {
    let name_index = reader.u2()?;
    let name = pool.utf8(name_index)?;
    let declared = reader.u4()?;
    let start = reader.position();

    let attribute = match name.as_str() {
        "SourceFile" => Attribute::SourceFile {
            name_index,
            sourcefile_index: reader.u2()?,
        },
        "ConstantValue" => Attribute::ConstantValue {
            name_index,
            constant_value_index: reader.u2()?,
        },
        "Code" => {
            let max_stack = reader.u2()?;
            let max_locals = reader.u2()?;
            let code_length = reader.u4()? as usize;
            let code = reader.bytes(code_length)?;
            let exception_count = reader.u2()? as usize;
            let mut exception_table = Vec::with_capacity(exception_count);
            for _ in 0..exception_count {
                exception_table.push(ExceptionEntry::parse(reader)?);
            }
            let attributes = parse_attributes(reader, pool)?;
            Attribute::Code(CodeAttribute {
                name_index,
                max_stack,
                max_locals,
                code,
                exception_table,
                attributes,
            })
        }
        "Exceptions" => {
            let count = reader.u2()? as usize;
            let mut table = Vec::with_capacity(count);
            for _ in 0..count {
                table.push(reader.u2()?);
            }
            Attribute::Exceptions {
                name_index,
                exception_index_table: table,
            }
        }
        "InnerClasses" => {
            let count = reader.u2()? as usize;
            let mut classes = Vec::with_capacity(count);
            for _ in 0..count {
                classes.push(InnerClass {
                    inner_class_info_index: reader.u2()?,
                    outer_class_info_index: reader.u2()?,
                    inner_name_index: reader.u2()?,
                    inner_class_access_flags: reader.u2()?,
                });
            }
            Attribute::InnerClasses {
                name_index,
                classes,
            }
        }
        "Synthetic" => Attribute::Synthetic { name_index },
        "Deprecated" => Attribute::Deprecated { name_index },
        "LineNumberTable" => {
            let count = reader.u2()? as usize;
            let mut table = Vec::with_capacity(count);
            for _ in 0..count {
                table.push(LineNumber {
                    start_pc: reader.u2()?,
                    line_number: reader.u2()?,
                });
            }
            Attribute::LineNumberTable { name_index, table }
        }
        "LocalVariableTable" => {
            let count = reader.u2()? as usize;
            let mut table = Vec::with_capacity(count);
            for _ in 0..count {
                table.push(LocalVariable::parse(reader)?);
            }
            Attribute::LocalVariableTable { name_index, table }
        }
        "LocalVariableTypeTable" => {
            let count = reader.u2()? as usize;
            let mut table = Vec::with_capacity(count);
            for _ in 0..count {
                table.push(LocalVariable::parse(reader)?);
            }
            Attribute::LocalVariableTypeTable { name_index, table }
        }
        "StackMapTable" => {
            let count = reader.u2()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(StackMapFrame::parse(reader)?);
            }
            Attribute::StackMapTable {
                name_index,
                entries,
            }
        }
        "EnclosingMethod" => Attribute::EnclosingMethod {
            name_index,
            class_index: reader.u2()?,
            method_index: reader.u2()?,
        },
        "Signature" => Attribute::Signature {
            name_index,
            signature_index: reader.u2()?,
        },
        "SourceDebugExtension" => Attribute::SourceDebugExtension {
            name_index,
            debug_extension: reader.bytes(declared as usize)?,
        },
        "RuntimeVisibleAnnotations" => Attribute::RuntimeVisibleAnnotations {
            name_index,
            annotations: Annotation::parse_list(reader)?,
        },
        "RuntimeInvisibleAnnotations" => Attribute::RuntimeInvisibleAnnotations {
            name_index,
            annotations: Annotation::parse_list(reader)?,
        },
        "RuntimeVisibleParameterAnnotations" => {
            Attribute::RuntimeVisibleParameterAnnotations {
                name_index,
                parameter_annotations: parse_parameter_annotations(reader)?,
            }
        }
        "RuntimeInvisibleParameterAnnotations" => {
            Attribute::RuntimeInvisibleParameterAnnotations {
                name_index,
                parameter_annotations: parse_parameter_annotations(reader)?,
            }
        }
        "AnnotationDefault" => Attribute::AnnotationDefault {
            name_index,
            default_value: ElementValue::parse(reader)?,
        },
        _ => return Err(ParseError::UnknownAttribute(name)),
    };

    let consumed = (reader.position() - start) as u32;
    if consumed != declared {
        return Err(ParseError::AttributeLengthMismatch {
            name,
            declared,
            consumed,
        });
    }
    Ok(attribute)
}

/// Parse a length-prefixed attribute table.
pub fn parse_attributes(
    reader: &mut ClassReader,
    pool: &ConstantPool,
) -> Result<Vec<Attribute>, ParseError> {
    let count = reader.u2()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        attributes.push(parse_attribute(reader, pool)?);
    }
    Ok(attributes)
}

/// Encode the payload of one attribute, without its name/length header.
fn serialize_payload(attribute: &Attribute, writer: &mut ClassWriter) {
    match attribute {
        Attribute::SourceFile {
            sourcefile_index, ..
        } => writer.put_u2(*sourcefile_index),
        Attribute::ConstantValue {
            constant_value_index,
            ..
        } => writer.put_u2(*constant_value_index),
        Attribute::Code(code) => {
            writer.put_u2(code.max_stack);
            writer.put_u2(code.max_locals);
            writer.put_u4(code.code.len() as u32);
            writer.put_bytes(&code.code);
            writer.put_u2(code.exception_table.len() as u16);
            for entry in &code.exception_table {
                entry.serialize(writer);
            }
            serialize_attributes(&code.attributes, writer);
        }
        Attribute::Exceptions {
            exception_index_table,
            ..
        } => {
            writer.put_u2(exception_index_table.len() as u16);
            for index in exception_index_table {
                writer.put_u2(*index);
            }
        }
        Attribute::InnerClasses { classes, .. } => {
            writer.put_u2(classes.len() as u16);
            for class in classes {
                writer.put_u2(class.inner_class_info_index);
                writer.put_u2(class.outer_class_info_index);
                writer.put_u2(class.inner_name_index);
                writer.put_u2(class.inner_class_access_flags);
            }
        }
        Attribute::Synthetic { .. } | Attribute::Deprecated { .. } => {}
        Attribute::LineNumberTable { table, .. } => {
            writer.put_u2(table.len() as u16);
            for line in table {
                writer.put_u2(line.start_pc);
                writer.put_u2(line.line_number);
            }
        }
        Attribute::LocalVariableTable { table, .. }
        | Attribute::LocalVariableTypeTable { table, .. } => {
            writer.put_u2(table.len() as u16);
            for variable in table {
                variable.serialize(writer);
            }
        }
        Attribute::StackMapTable { entries, .. } => {
            writer.put_u2(entries.len() as u16);
            for entry in entries {
                entry.serialize(writer);
            }
        }
        Attribute::EnclosingMethod {
            class_index,
            method_index,
            ..
        } => {
            writer.put_u2(*class_index);
            writer.put_u2(*method_index);
        }
        Attribute::Signature {
            signature_index, ..
        } => writer.put_u2(*signature_index),
        Attribute::SourceDebugExtension {
            debug_extension, ..
        } => writer.put_bytes(debug_extension),
        Attribute::RuntimeVisibleAnnotations { annotations, .. }
        | Attribute::RuntimeInvisibleAnnotations { annotations, .. } => {
            Annotation::serialize_list(annotations, writer);
        }
        Attribute::RuntimeVisibleParameterAnnotations {
            parameter_annotations,
            ..
        }
        | Attribute::RuntimeInvisibleParameterAnnotations {
            parameter_annotations,
            ..
        } => serialize_parameter_annotations(parameter_annotations, writer),
        Attribute::AnnotationDefault { default_value, .. } => {
            default_value.serialize(writer);
        }
    }
}

/// Encode a length-prefixed attribute table. Payload lengths are
/// recomputed from content; the strict length check at parse time
/// guarantees they match the declared lengths of the input.
pub fn serialize_attributes(attributes: &[Attribute], writer: &mut ClassWriter) {
    writer.put_u2(attributes.len() as u16);
    for attribute in attributes {
        writer.put_u2(attribute.name_index());
        let mut payload = ClassWriter::new();
        serialize_payload(attribute, &mut payload);
        let payload = payload.into_bytes();
        writer.put_u4(payload.len() as u32);
        writer.put_bytes(&payload);
    }
}
