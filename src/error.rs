//! Error types for class-file decoding and bytecode translation.
use thiserror::Error;

/// `ParseError` covers every failure the class-file decoder can hit.
/// The decoder fails fast: no recovery or resynchronisation is attempted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("truncated input: needed {needed} more bytes, {remaining} remaining")]
    TruncatedInput { needed: usize, remaining: usize },

    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("unknown constant pool tag {0}")]
    UnknownTag(u8),

    #[error("unknown attribute {0:?}")]
    UnknownAttribute(String),

    #[error("unknown element value tag {0:?}")]
    UnknownElementValue(char),

    #[error("unknown stack map frame type {0}")]
    UnknownStackFrame(u8),

    #[error("unknown verification type tag {0}")]
    UnknownVariableInfo(u8),

    #[error("bad descriptor {0:?}")]
    BadDescriptor(String),

    #[error("attribute {name} declared {declared} bytes but consumed {consumed}")]
    AttributeLengthMismatch {
        name: String,
        declared: u32,
        consumed: u32,
    },

    #[error("constant pool index {0} is out of range or refers to a gap slot")]
    BadIndex(u16),

    #[error("constant pool entry {index} has unexpected kind, wanted {wanted}")]
    WrongConstantKind { index: u16, wanted: &'static str },
}

/// `TranslateError` covers failures while emitting target bytecode.
/// A failing method produces no output at all.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("operand {0} does not fit in 16 bits")]
    ValueOverflow(u32),

    #[error("instruction {0} is not implemented")]
    NotImplemented(&'static str),

    #[error("unknown opcode byte {0:#04x}")]
    UnknownOpcode(u8),

    #[error("branch target {0} was never bound to an emitted position")]
    UnresolvedTarget(u32),

    #[error("label {0:?} still has unresolved jump sites")]
    UnresolvedLabel(String),

    #[error("block bookkeeping underflow in {0}")]
    BlockUnderflow(&'static str),

    #[error("constant pool entry {0} cannot be loaded as a target constant")]
    UnsupportedConstant(u16),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("translation of {class}.{method} failed: {source}")]
    Method {
        class: String,
        method: String,
        #[source]
        source: Box<TranslateError>,
    },
}

impl TranslateError {
    /// Attach class and method context to an error bubbling out of a
    /// per-method translation.
    pub fn in_method(self, class: &str, method: &str) -> Self {
        Self::Method {
            class: class.to_string(),
            method: method.to_string(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_context_wraps_underlying_error() {
        let err = TranslateError::NotImplemented("wide").in_method("Foo", "bar");
        let msg = err.to_string();
        assert!(msg.contains("Foo.bar"));
        match err {
            TranslateError::Method { source, .. } => {
                assert!(matches!(*source, TranslateError::NotImplemented("wide")));
            }
            _ => panic!("expected method context"),
        }
    }

    #[test]
    fn parse_errors_format_their_payload() {
        let err = ParseError::UnknownAttribute("Mystery".to_string());
        assert!(err.to_string().contains("Mystery"));
        let err = ParseError::BadMagic(0xDEAD_BEEF);
        assert!(err.to_string().contains("0xdeadbeef"));
    }
}
