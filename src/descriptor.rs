//! Field and method type descriptors.
//!
//! Descriptors are the textual type encoding used inside class files
//! (`I`, `[Ljava/lang/String;`, `(IJ)V`, ...). The translator needs them
//! for argument counts, field sizes and for mangling overloaded method
//! names into host-visible identifiers.
use std::fmt;

use regex::Regex;

use crate::error::ParseError;

/// Default size of an object reference, overridable per run.
pub const DEFAULT_POINTER_SIZE: u32 = 8;

/// A parsed field descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Class(String),
    Array(Box<Descriptor>),
}

impl Descriptor {
    /// Size in bytes of a field of this type. Booleans occupy four bytes
    /// (ints are used internally for booleans); classes and arrays size
    /// as a pointer.
    pub fn size_in_bytes(&self, pointer_size: u32) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Char => 1,
            Self::Short => 2,
            Self::Int | Self::Boolean | Self::Float => 4,
            Self::Long | Self::Double => 8,
            Self::Class(_) | Self::Array(_) => pointer_size,
        }
    }

    /// The host-side type name used by dispatcher `isinstance` checks.
    pub fn host_type_name(&self) -> String {
        match self {
            Self::Byte | Self::Short | Self::Int | Self::Long => "int".to_string(),
            Self::Char => "str".to_string(),
            Self::Float | Self::Double => "float".to_string(),
            Self::Boolean => "bool".to_string(),
            Self::Class(name) => fqcn(name),
            Self::Array(_) => "list".to_string(),
        }
    }

    /// The mangled encoding of this descriptor as it appears inside a
    /// host-visible method name: primitive codes bracketed by `_`,
    /// `/` package separators doubled, each array level spelt `_array_`.
    pub fn mangled(&self) -> String {
        match self {
            Self::Byte => "_B_".to_string(),
            Self::Char => "_C_".to_string(),
            Self::Double => "_D_".to_string(),
            Self::Float => "_F_".to_string(),
            Self::Int => "_I_".to_string(),
            Self::Long => "_J_".to_string(),
            Self::Short => "_S_".to_string(),
            Self::Boolean => "_Z_".to_string(),
            Self::Class(name) => name.replace('/', "__"),
            Self::Array(inner) => format!("_array_{}", inner.mangled()),
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte => write!(f, "B"),
            Self::Char => write!(f, "C"),
            Self::Double => write!(f, "D"),
            Self::Float => write!(f, "F"),
            Self::Int => write!(f, "I"),
            Self::Long => write!(f, "J"),
            Self::Short => write!(f, "S"),
            Self::Boolean => write!(f, "Z"),
            Self::Class(name) => write!(f, "L{name};"),
            Self::Array(inner) => write!(f, "[{inner}"),
        }
    }
}

/// Convert an internal class name to its dotted form.
pub fn fqcn(name: &str) -> String {
    name.replace('/', ".")
}

fn bad(s: &str) -> ParseError {
    ParseError::BadDescriptor(s.to_string())
}

/// Consume one field descriptor from the front of `s`, returning the
/// parsed type and the unconsumed tail.
fn take_field(s: &str) -> Result<(Descriptor, &str), ParseError> {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, 'B')) => Ok((Descriptor::Byte, &s[1..])),
        Some((_, 'C')) => Ok((Descriptor::Char, &s[1..])),
        Some((_, 'D')) => Ok((Descriptor::Double, &s[1..])),
        Some((_, 'F')) => Ok((Descriptor::Float, &s[1..])),
        Some((_, 'I')) => Ok((Descriptor::Int, &s[1..])),
        Some((_, 'J')) => Ok((Descriptor::Long, &s[1..])),
        Some((_, 'S')) => Ok((Descriptor::Short, &s[1..])),
        Some((_, 'Z')) => Ok((Descriptor::Boolean, &s[1..])),
        Some((_, 'L')) => {
            let end = s.find(';').ok_or_else(|| bad(s))?;
            if end == 1 {
                return Err(bad(s));
            }
            Ok((Descriptor::Class(s[1..end].to_string()), &s[end + 1..]))
        }
        Some((_, '[')) => {
            let (component, rest) = take_field(&s[1..])?;
            Ok((Descriptor::Array(Box::new(component)), rest))
        }
        _ => Err(bad(s)),
    }
}

/// Parse a field descriptor. The whole string must be consumed.
pub fn parse_field(s: &str) -> Result<Descriptor, ParseError> {
    let (descriptor, rest) = take_field(s)?;
    if !rest.is_empty() {
        return Err(bad(s));
    }
    Ok(descriptor)
}

/// Parse a method descriptor into its parameter list and return type
/// (`None` for void).
pub fn parse_method(s: &str) -> Result<(Vec<Descriptor>, Option<Descriptor>), ParseError> {
    let re = Regex::new(r"^\(([^)]*)\)(.+)$").unwrap();
    let caps = re.captures(s).ok_or_else(|| bad(s))?;
    let mut param_str = caps.get(1).map_or("", |m| m.as_str());
    let return_str = caps.get(2).map_or("", |m| m.as_str());

    let mut params = Vec::new();
    while !param_str.is_empty() {
        let (descriptor, rest) = take_field(param_str).map_err(|_| bad(s))?;
        params.push(descriptor);
        param_str = rest;
    }

    let ret = if return_str == "V" {
        None
    } else {
        let (descriptor, rest) = take_field(return_str).map_err(|_| bad(s))?;
        if !rest.is_empty() {
            return Err(bad(s));
        }
        Some(descriptor)
    };
    Ok((params, ret))
}

/// Number of parameters declared by a method descriptor.
pub fn parameter_count(s: &str) -> Result<usize, ParseError> {
    Ok(parse_method(s)?.0.len())
}

/// Rename the special initialiser methods the way the host runtime
/// expects them.
fn rename_special(name: &str) -> &str {
    match name {
        "<init>" => "__init__",
        "<clinit>" => "__clinit__",
        other => other,
    }
}

/// Mangle a method name with its parameter descriptors so that every
/// overload gets a distinct host-visible identifier. A method without
/// parameters keeps the bare (renamed) name.
pub fn mangle_method_name(name: &str, params: &[Descriptor]) -> String {
    let base = rename_special(name);
    if params.is_empty() {
        return base.to_string();
    }
    let suffix: Vec<String> = params.iter().map(Descriptor::mangled).collect();
    format!("{base}___{}", suffix.join("___"))
}

/// Mangle a member name given its raw descriptor string: methods gain
/// the parameter suffix, fields keep their name.
pub fn mangle_member_name(name: &str, descriptor: &str) -> Result<String, ParseError> {
    if descriptor.starts_with('(') {
        let (params, _) = parse_method(descriptor)?;
        Ok(mangle_method_name(name, &params))
    } else {
        Ok(rename_special(name).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitives_and_classes() {
        assert_eq!(parse_field("I").unwrap(), Descriptor::Int);
        assert_eq!(
            parse_field("Ljava/lang/String;").unwrap(),
            Descriptor::Class("java/lang/String".to_string())
        );
        assert_eq!(
            parse_field("[[J").unwrap(),
            Descriptor::Array(Box::new(Descriptor::Array(Box::new(Descriptor::Long))))
        );
    }

    #[test]
    fn rejects_malformed_descriptors() {
        for s in ["", "Q", "Ljava/lang/String", "L;", "I;", "[", "(I"] {
            assert!(
                matches!(parse_field(s), Err(ParseError::BadDescriptor(_))),
                "{s:?} should not parse"
            );
        }
        assert!(parse_method("(I").is_err());
        assert!(parse_method("(Q)V").is_err());
        assert!(parse_method("(I)VV").is_err());
    }

    #[test]
    fn descriptor_strings_round_trip() {
        for s in [
            "I",
            "Z",
            "[B",
            "[[D",
            "Ljava/lang/Object;",
            "[Ljava/util/Map;",
        ] {
            assert_eq!(parse_field(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn method_descriptors_split_params_and_return() {
        let (params, ret) = parse_method("(I[JLjava/lang/String;)V").unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params[0], Descriptor::Int);
        assert_eq!(
            params[2],
            Descriptor::Class("java/lang/String".to_string())
        );
        assert!(ret.is_none());

        let (params, ret) = parse_method("()[I").unwrap();
        assert!(params.is_empty());
        assert_eq!(
            ret.unwrap(),
            Descriptor::Array(Box::new(Descriptor::Int))
        );
    }

    #[test]
    fn sizes_follow_the_field_table() {
        assert_eq!(parse_field("B").unwrap().size_in_bytes(8), 1);
        assert_eq!(parse_field("S").unwrap().size_in_bytes(8), 2);
        assert_eq!(parse_field("Z").unwrap().size_in_bytes(8), 4);
        assert_eq!(parse_field("D").unwrap().size_in_bytes(8), 8);
        assert_eq!(parse_field("Ljava/lang/Object;").unwrap().size_in_bytes(4), 4);
        assert_eq!(parse_field("[[I").unwrap().size_in_bytes(8), 8);
    }

    #[test]
    fn mangling_distinguishes_overloads() {
        let a = mangle_member_name("get", "(I)Ljava/lang/Object;").unwrap();
        let b = mangle_member_name("get", "(Ljava/lang/String;)Ljava/lang/Object;").unwrap();
        let c = mangle_member_name("get", "([I)V").unwrap();
        let d = mangle_member_name("get", "()V").unwrap();
        assert_eq!(a, "get____I_");
        assert_eq!(b, "get___java__lang__String");
        assert_eq!(c, "get____array__I_");
        assert_eq!(d, "get");
        let all = [&a, &b, &c, &d];
        for (i, x) in all.iter().enumerate() {
            for y in &all[i + 1..] {
                assert_ne!(x, y);
            }
        }
    }

    #[test]
    fn initialisers_are_renamed() {
        assert_eq!(mangle_member_name("<init>", "()V").unwrap(), "__init__");
        assert_eq!(
            mangle_member_name("<init>", "(J)V").unwrap(),
            "__init_____J_"
        );
        assert_eq!(
            mangle_member_name("<clinit>", "()V").unwrap(),
            "__clinit__"
        );
    }

    #[test]
    fn host_type_names_for_dispatch() {
        assert_eq!(parse_field("I").unwrap().host_type_name(), "int");
        assert_eq!(parse_field("C").unwrap().host_type_name(), "str");
        assert_eq!(parse_field("Z").unwrap().host_type_name(), "bool");
        assert_eq!(parse_field("[I").unwrap().host_type_name(), "list");
        assert_eq!(
            parse_field("Ljava/lang/String;").unwrap().host_type_name(),
            "java.lang.String"
        );
    }
}
