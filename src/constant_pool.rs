//! Constant pool decoding, encoding and index resolution.
//!
//! The pool is a 1-based arena of tagged entries that reference each
//! other by index. `Long` and `Double` occupy two slots; the slot after
//! them is a gap that must never be referenced directly.
use crate::error::ParseError;
use crate::reader::{ClassReader, ClassWriter};

/// Constant pool entry tags.
const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELD_REF: u8 = 9;
const TAG_METHOD_REF: u8 = 10;
const TAG_INTERFACE_METHOD_REF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;

/// One constant pool entry. Numeric entries keep the raw big-endian bit
/// pattern so re-encoding is byte-exact even for odd NaN payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpInfo {
    Utf8 {
        bytes: Vec<u8>,
    },
    Integer {
        value: i32,
    },
    Float {
        bits: u32,
    },
    Long {
        value: i64,
    },
    Double {
        bits: u64,
    },
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    FieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    MethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
}

impl CpInfo {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Utf8 { .. } => TAG_UTF8,
            Self::Integer { .. } => TAG_INTEGER,
            Self::Float { .. } => TAG_FLOAT,
            Self::Long { .. } => TAG_LONG,
            Self::Double { .. } => TAG_DOUBLE,
            Self::Class { .. } => TAG_CLASS,
            Self::String { .. } => TAG_STRING,
            Self::FieldRef { .. } => TAG_FIELD_REF,
            Self::MethodRef { .. } => TAG_METHOD_REF,
            Self::InterfaceMethodRef { .. } => TAG_INTERFACE_METHOD_REF,
            Self::NameAndType { .. } => TAG_NAME_AND_TYPE,
        }
    }

    /// Whether this entry occupies two pool slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, Self::Long { .. } | Self::Double { .. })
    }
}

/// The decoded constant pool. Slot 0 and the slot after each `Long` or
/// `Double` hold `None`.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Option<CpInfo>>,
}

impl ConstantPool {
    pub fn parse(reader: &mut ClassReader) -> Result<Self, ParseError> {
        let count = reader.u2()? as usize;
        let mut entries: Vec<Option<CpInfo>> = vec![None; count];
        let mut index = 1;
        while index < count {
            let tag = reader.u1()?;
            let entry = match tag {
                TAG_UTF8 => {
                    let length = reader.u2()? as usize;
                    CpInfo::Utf8 {
                        bytes: reader.bytes(length)?,
                    }
                }
                TAG_INTEGER => CpInfo::Integer {
                    value: reader.s4()?,
                },
                TAG_FLOAT => CpInfo::Float { bits: reader.u4()? },
                TAG_LONG => CpInfo::Long { value: reader.s8()? },
                TAG_DOUBLE => {
                    let hi = reader.u4()? as u64;
                    let lo = reader.u4()? as u64;
                    CpInfo::Double {
                        bits: (hi << 32) | lo,
                    }
                }
                TAG_CLASS => CpInfo::Class {
                    name_index: reader.u2()?,
                },
                TAG_STRING => CpInfo::String {
                    string_index: reader.u2()?,
                },
                TAG_FIELD_REF => CpInfo::FieldRef {
                    class_index: reader.u2()?,
                    name_and_type_index: reader.u2()?,
                },
                TAG_METHOD_REF => CpInfo::MethodRef {
                    class_index: reader.u2()?,
                    name_and_type_index: reader.u2()?,
                },
                TAG_INTERFACE_METHOD_REF => CpInfo::InterfaceMethodRef {
                    class_index: reader.u2()?,
                    name_and_type_index: reader.u2()?,
                },
                TAG_NAME_AND_TYPE => CpInfo::NameAndType {
                    name_index: reader.u2()?,
                    descriptor_index: reader.u2()?,
                },
                other => return Err(ParseError::UnknownTag(other)),
            };
            // Wide entries leave a gap slot behind them.
            let step = if entry.is_wide() { 2 } else { 1 };
            entries[index] = Some(entry);
            index += step;
        }
        Ok(Self { entries })
    }

    pub fn serialize(&self, writer: &mut ClassWriter) {
        writer.put_u2(self.entries.len() as u16);
        for entry in self.entries.iter().flatten() {
            writer.put_u1(entry.tag());
            match entry {
                CpInfo::Utf8 { bytes } => {
                    writer.put_u2(bytes.len() as u16);
                    writer.put_bytes(bytes);
                }
                CpInfo::Integer { value } => writer.put_s4(*value),
                CpInfo::Float { bits } => writer.put_u4(*bits),
                CpInfo::Long { value } => writer.put_s8(*value),
                CpInfo::Double { bits } => {
                    writer.put_u4((bits >> 32) as u32);
                    writer.put_u4(*bits as u32);
                }
                CpInfo::Class { name_index } => writer.put_u2(*name_index),
                CpInfo::String { string_index } => writer.put_u2(*string_index),
                CpInfo::FieldRef {
                    class_index,
                    name_and_type_index,
                }
                | CpInfo::MethodRef {
                    class_index,
                    name_and_type_index,
                }
                | CpInfo::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    writer.put_u2(*class_index);
                    writer.put_u2(*name_and_type_index);
                }
                CpInfo::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    writer.put_u2(*name_index);
                    writer.put_u2(*descriptor_index);
                }
            }
        }
    }

    /// Number of slots, i.e. `constant_pool_count`.
    pub fn slot_count(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Fetch entry `index` (1-based). Index 0, out-of-range indices and
    /// the gap slots after wide entries are all `BadIndex`.
    pub fn get(&self, index: u16) -> Result<&CpInfo, ParseError> {
        self.entries
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(ParseError::BadIndex(index))
    }

    /// The UTF-8 text at `index`.
    pub fn utf8(&self, index: u16) -> Result<String, ParseError> {
        match self.get(index)? {
            CpInfo::Utf8 { bytes } => Ok(String::from_utf8_lossy(bytes).into_owned()),
            _ => Err(ParseError::WrongConstantKind {
                index,
                wanted: "Utf8",
            }),
        }
    }

    /// The internal (slash-separated) name of the `Class` entry at `index`.
    pub fn class_name(&self, index: u16) -> Result<String, ParseError> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.utf8(*name_index),
            _ => Err(ParseError::WrongConstantKind {
                index,
                wanted: "Class",
            }),
        }
    }

    /// Resolve a `NameAndType` entry into `(name, descriptor)` text.
    pub fn name_and_type(&self, index: u16) -> Result<(String, String), ParseError> {
        match self.get(index)? {
            CpInfo::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(ParseError::WrongConstantKind {
                index,
                wanted: "NameAndType",
            }),
        }
    }

    /// Resolve a field, method or interface-method reference into
    /// `(class_index, name_and_type_index)`.
    pub fn member_ref(&self, index: u16) -> Result<(u16, u16), ParseError> {
        match self.get(index)? {
            CpInfo::FieldRef {
                class_index,
                name_and_type_index,
            }
            | CpInfo::MethodRef {
                class_index,
                name_and_type_index,
            }
            | CpInfo::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => Ok((*class_index, *name_and_type_index)),
            _ => Err(ParseError::WrongConstantKind {
                index,
                wanted: "FieldRef/MethodRef/InterfaceMethodRef",
            }),
        }
    }
}

#[cfg(test)]
impl ConstantPool {
    /// Assemble a pool directly from slots; slot 0 must be `None`.
    pub(crate) fn from_entries(entries: Vec<Option<CpInfo>>) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pool_bytes() -> Vec<u8> {
        let mut w = ClassWriter::new();
        w.put_u2(8); // constant_pool_count: seven slots in use, one a gap
        w.put_u1(TAG_UTF8);
        w.put_u2(2);
        w.put_bytes(b"Hi");
        w.put_u1(TAG_INTEGER);
        w.put_s4(-42);
        w.put_u1(TAG_LONG);
        w.put_s8(1 << 40); // occupies slots 3 and 4
        w.put_u1(TAG_CLASS);
        w.put_u2(1);
        w.put_u1(TAG_NAME_AND_TYPE);
        w.put_u2(1);
        w.put_u2(1);
        w.put_u1(TAG_METHOD_REF);
        w.put_u2(5);
        w.put_u2(6);
        w.into_bytes()
    }

    #[test]
    fn parses_entries_with_a_gap_after_long() {
        let data = sample_pool_bytes();
        let mut r = ClassReader::new(&data);
        let pool = ConstantPool::parse(&mut r).unwrap();
        assert_eq!(pool.slot_count(), 8);
        assert_eq!(pool.utf8(1).unwrap(), "Hi");
        assert_eq!(pool.get(2).unwrap(), &CpInfo::Integer { value: -42 });
        assert_eq!(pool.get(3).unwrap(), &CpInfo::Long { value: 1 << 40 });
        // Slot 4 is the gap behind the long.
        assert_eq!(pool.get(4), Err(ParseError::BadIndex(4)));
        assert_eq!(pool.class_name(5).unwrap(), "Hi");
        assert_eq!(
            pool.name_and_type(6).unwrap(),
            ("Hi".to_string(), "Hi".to_string())
        );
        assert_eq!(pool.member_ref(7).unwrap(), (5, 6));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn serialization_is_byte_identical() {
        let data = sample_pool_bytes();
        let mut r = ClassReader::new(&data);
        let pool = ConstantPool::parse(&mut r).unwrap();
        let mut w = ClassWriter::new();
        pool.serialize(&mut w);
        assert_eq!(w.into_bytes(), data);
    }

    #[test]
    fn double_bits_round_trip_exactly() {
        let mut w = ClassWriter::new();
        w.put_u2(3);
        w.put_u1(TAG_DOUBLE);
        w.put_u4(0x7FF8_0000);
        w.put_u4(0x0000_0001); // NaN with a payload bit set
        let data = w.into_bytes();

        let mut r = ClassReader::new(&data);
        let pool = ConstantPool::parse(&mut r).unwrap();
        assert_eq!(
            pool.get(1).unwrap(),
            &CpInfo::Double {
                bits: 0x7FF8_0000_0000_0001
            }
        );
        let mut out = ClassWriter::new();
        pool.serialize(&mut out);
        assert_eq!(out.into_bytes(), data);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut w = ClassWriter::new();
        w.put_u2(2);
        w.put_u1(13);
        let data = w.into_bytes();
        let mut r = ClassReader::new(&data);
        assert_eq!(
            ConstantPool::parse(&mut r).unwrap_err(),
            ParseError::UnknownTag(13)
        );
    }

    #[test]
    fn index_zero_is_invalid() {
        let data = sample_pool_bytes();
        let mut r = ClassReader::new(&data);
        let pool = ConstantPool::parse(&mut r).unwrap();
        assert_eq!(pool.get(0), Err(ParseError::BadIndex(0)));
        assert_eq!(pool.get(99), Err(ParseError::BadIndex(99)));
    }

    #[test]
    fn wrong_kind_lookups_report_the_wanted_kind() {
        let data = sample_pool_bytes();
        let mut r = ClassReader::new(&data);
        let pool = ConstantPool::parse(&mut r).unwrap();
        assert!(matches!(
            pool.utf8(2),
            Err(ParseError::WrongConstantKind { wanted: "Utf8", .. })
        ));
        assert!(matches!(
            pool.class_name(1),
            Err(ParseError::WrongConstantKind { wanted: "Class", .. })
        ));
    }
}
