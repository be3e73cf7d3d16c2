//! Translation of JVM method bytecode into target bytecode.
//!
//! One `MethodTranslator` walks one method's code stream in file order,
//! consulting the constant pool and driving a `TargetWriter`. Source
//! positions become numeric labels so branches can refer to positions
//! the walk has not reached yet; the flat exception table is rebuilt
//! into nested setup/pop-block frames as the walk crosses row
//! boundaries.
use std::collections::HashMap;

use log::debug;

use crate::attributes::{CodeAttribute, ExceptionEntry};
use crate::bytecode::OpCode;
use crate::classfile::{ClassFile, MemberInfo};
use crate::constant_pool::{ConstantPool, CpInfo};
use crate::descriptor::{self, fqcn};
use crate::dispatch::{self, Dispatcher};
use crate::error::{ParseError, TranslateError};
use crate::target::{CodeBlob, CompareKind, TargetConst, TargetWriter};

/// A translated method, ready for the host runtime.
#[derive(Debug, Clone)]
pub struct TranslatedMethod {
    pub java_name: String,
    pub mangled_name: String,
    pub descriptor: String,
    pub is_static: bool,
    pub parameter_count: usize,
    pub blob: CodeBlob,
}

/// A translated class: its routines, overload dispatchers, static
/// field slots and the external names the loader must resolve.
#[derive(Debug, Clone)]
pub struct TranslatedClass {
    pub class_name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub static_fields: Vec<String>,
    pub methods: Vec<TranslatedMethod>,
    pub dispatchers: Vec<Dispatcher>,
    pub external_names: Vec<String>,
}

/// Base classes whose initialisation calls are elided; the host's
/// skeleton library stands in for them.
const ELIDED_BASE_CLASSES: [&str; 2] = ["java.lang.Object", "java.lang.Exception"];

fn signed2(args: &[u8]) -> i32 {
    i16::from_be_bytes([args[0], args[1]]) as i32
}

fn signed4(args: &[u8]) -> i32 {
    i32::from_be_bytes([args[0], args[1], args[2], args[3]])
}

fn u16_of(args: &[u8]) -> u16 {
    u16::from_be_bytes([args[0], args[1]])
}

/// Invent variable names for the emitted routine's local slots.
pub(crate) fn make_varnames(nlocals: u16, is_static: bool) -> Vec<String> {
    let mut names = Vec::with_capacity(nlocals as usize);
    if nlocals > 0 {
        names.push(if is_static { "cls" } else { "self" }.to_string());
    }
    for index in 1..nlocals {
        names.push(format!("_l{index}"));
    }
    names
}

/// Load a class object onto the stack. Classes in the same package as
/// `this_class` resolve through a single global; anything else walks
/// its dotted path attribute by attribute.
pub(crate) fn load_class_name(
    this_class: &str,
    full_class_name: &str,
    writer: &mut TargetWriter,
) -> Result<(), TranslateError> {
    let this_parts: Vec<&str> = this_class.split('.').collect();
    let parts: Vec<&str> = full_class_name.split('.').collect();
    if parts[..parts.len() - 1] != this_parts[..this_parts.len() - 1] {
        writer.use_external_name(full_class_name);
        writer.load_global(parts[0])?;
        for part in &parts[1..] {
            writer.load_attr(part)?;
        }
    } else {
        writer.load_global(parts[parts.len() - 1])?;
    }
    Ok(())
}

/// A resolved field/method reference from the constant pool.
struct MemberTarget {
    class_name: String,
    member_name: String,
    mangled_name: String,
    parameter_count: usize,
}

fn resolve_member(pool: &ConstantPool, index: u16) -> Result<MemberTarget, TranslateError> {
    let (class_index, nat_index) = pool.member_ref(index)?;
    let class_name = fqcn(&pool.class_name(class_index)?);
    let (member_name, descriptor) = pool.name_and_type(nat_index)?;
    let mangled_name = descriptor::mangle_member_name(&member_name, &descriptor)?;
    let parameter_count = if descriptor.starts_with('(') {
        descriptor::parameter_count(&descriptor)?
    } else {
        0
    };
    Ok(MemberTarget {
        class_name,
        member_name,
        mangled_name,
        parameter_count,
    })
}

/// Default element value for the primitive array kinds of `newarray`.
fn default_for_atype(atype: u8) -> TargetConst {
    match atype {
        4 | 8 | 9 | 10 | 11 => TargetConst::Int(0), // bool, byte, short, int, long
        5 => TargetConst::Str(String::new()),       // char
        6 | 7 => TargetConst::Float(0.0),           // float, double
        _ => TargetConst::Null,
    }
}

/// Exception table rows indexed by start, end and handler position.
/// Row order within each bucket follows the reversed table, since later
/// rows cover wider ranges than earlier ones.
struct ExceptionIndex {
    rows: Vec<ExceptionEntry>,
    starts: HashMap<u16, Vec<usize>>,
    ends: HashMap<u16, Vec<usize>>,
    handlers: HashMap<u16, Vec<usize>>,
}

impl ExceptionIndex {
    /// Build the index, merging catch-all rows that share a handler.
    /// Compilers split one source finally block into several rows; the
    /// widest start/end pair recovers the original region.
    fn build(table: &[ExceptionEntry]) -> Self {
        let mut index = Self {
            rows: Vec::new(),
            starts: HashMap::new(),
            ends: HashMap::new(),
            handlers: HashMap::new(),
        };
        for entry in table.iter().rev() {
            let mut row = entry.clone();
            if row.catch_type == 0 {
                let existing = index
                    .handlers
                    .get(&row.handler_pc)
                    .map(|ids| ids.as_slice())
                    .unwrap_or(&[]);
                if let Some(&previous) = existing
                    .iter()
                    .find(|&&id| index.rows[id].catch_type == 0)
                {
                    let absorbed = index.rows[previous].clone();
                    row.start_pc = row.start_pc.min(absorbed.start_pc);
                    row.end_pc = row.end_pc.max(absorbed.end_pc);
                    index.remove(previous, &absorbed);
                }
            }
            let id = index.rows.len();
            index.rows.push(row.clone());
            index.starts.entry(row.start_pc).or_default().push(id);
            index.ends.entry(row.end_pc).or_default().push(id);
            index.handlers.entry(row.handler_pc).or_default().push(id);
        }
        index
    }

    fn remove(&mut self, id: usize, row: &ExceptionEntry) {
        if let Some(ids) = self.starts.get_mut(&row.start_pc) {
            ids.retain(|&other| other != id);
        }
        if let Some(ids) = self.ends.get_mut(&row.end_pc) {
            ids.retain(|&other| other != id);
        }
        if let Some(ids) = self.handlers.get_mut(&row.handler_pc) {
            ids.retain(|&other| other != id);
        }
    }

    fn at(&self, bucket: &HashMap<u16, Vec<usize>>, pc: u16) -> Vec<usize> {
        bucket.get(&pc).cloned().unwrap_or_default()
    }
}

/// Translator for one method body.
struct MethodTranslator<'a> {
    class_file: &'a ClassFile,
    this_class: String,
    writer: TargetWriter,
    in_finally: bool,
}

impl<'a> MethodTranslator<'a> {
    fn new(class_file: &'a ClassFile, this_class: String) -> Self {
        Self {
            class_file,
            this_class,
            writer: TargetWriter::new(),
            in_finally: false,
        }
    }

    fn pool(&self) -> &ConstantPool {
        &self.class_file.constant_pool
    }

    /// Walk the method's code stream. Methods without code (abstract,
    /// native) become a routine that returns null.
    fn process(&mut self, code_attr: Option<&CodeAttribute>) -> Result<(), TranslateError> {
        let Some(attr) = code_attr else {
            self.writer.load_const(TargetConst::Null)?;
            self.writer.return_value();
            return Ok(());
        };

        let code = &attr.code;
        let index = ExceptionIndex::build(&attr.exception_table);

        let mut java_position = 0usize;
        while java_position < code.len() {
            let pc = java_position as u16;
            self.writer.bind_label(java_position as u32)?;

            // Open frames for every region starting here.
            let starts = index.at(&index.starts, pc);
            for &id in &starts {
                let row = &index.rows[id];
                if row.catch_type == 0 {
                    self.writer.setup_finally(row.handler_pc as u32)?;
                } else {
                    self.writer.setup_except(row.handler_pc as u32)?;
                }
            }
            if !starts.is_empty() {
                self.in_finally = false;
            }

            // A handler beginning here closes its setup frame and, for
            // typed catches, filters the raised exception.
            for id in index.at(&index.handlers, pc) {
                self.writer.end_exception()?;
                let row = &index.rows[id];
                if row.catch_type == 0 {
                    self.in_finally = true;
                } else {
                    let name = fqcn(&self.pool().class_name(row.catch_type)?);
                    self.start_handler(&name)?;
                }
            }

            let opcode = OpCode::from_byte(code[java_position])?;
            let consumed = self.dispatch(opcode, code, java_position)?;
            let next_java_position = java_position + 1 + consumed;

            for id in index.at(&index.ends, next_java_position as u16) {
                if index.rows[id].catch_type != 0 {
                    self.writer.pop_block();
                }
            }

            java_position = next_java_position;
        }

        self.writer.end_exceptions()
    }

    /// Emitted at the entry of a typed catch handler. The raised value
    /// arrives wrapped; test the wrapper, unwrap, test the declared
    /// class, and re-raise on either mismatch.
    fn start_handler(&mut self, exc_name: &str) -> Result<(), TranslateError> {
        let w = &mut self.writer;
        w.use_external_name(exc_name);
        w.rot_two(); //                        Stack: raised, exception
        w.dup_top(); //                        Stack: raised, exception, exception
        w.load_global("Exception")?;
        w.compare_op(CompareKind::ExceptionMatch)?;
        w.jump_to_label(Some(false), "next")?;
        w.pop_top(); //                        Stack: raised, exception
        w.dup_top();
        w.load_attr("args")?;
        w.load_const(TargetConst::Int(0))?;
        w.binary_subscr(); //                  Stack: raised, exception, wrapped
        load_class_name(&self.this_class, exc_name, w)?;
        w.load_global("isinstance")?;
        w.rot_three(); //                      Stack: ..., isinstance, wrapped, class
        w.call_function(2)?;
        w.jump_to_label(Some(true), "handler")?;
        w.start_label("next")?;
        w.pop_top();
        w.rot_two();
        w.end_finally(); //                    not ours; re-raise
        w.start_label("handler")?;
        w.pop_top(); //                        Stack: raised, exception
        Ok(())
    }

    /// Translate one instruction, returning the number of operand
    /// bytes consumed.
    fn dispatch(
        &mut self,
        opcode: OpCode,
        code: &[u8],
        pc: usize,
    ) -> Result<usize, TranslateError> {
        match opcode.operand_count() {
            Some(count) => {
                if pc + 1 + count > code.len() {
                    return Err(ParseError::TruncatedInput {
                        needed: count,
                        remaining: code.len() - pc - 1,
                    }
                    .into());
                }
                let args = &code[pc + 1..pc + 1 + count];
                self.translate_fixed(opcode, args, pc)?;
                Ok(count)
            }
            None => match opcode {
                OpCode::TableSwitch => self.tableswitch(code, pc),
                OpCode::LookupSwitch => self.lookupswitch(code, pc),
                _ => Err(TranslateError::NotImplemented(opcode.mnemonic())),
            },
        }
    }

    fn translate_fixed(
        &mut self,
        opcode: OpCode,
        args: &[u8],
        pc: usize,
    ) -> Result<(), TranslateError> {
        use OpCode::*;
        let w = &mut self.writer;
        match opcode {
            Nop => {}

            // Constants.
            AconstNull => w.load_const(TargetConst::Null)?,
            IconstM1 => w.load_const(TargetConst::Int(-1))?,
            Iconst0 | Lconst0 => w.load_const(TargetConst::Int(0))?,
            Iconst1 | Lconst1 => w.load_const(TargetConst::Int(1))?,
            Iconst2 => w.load_const(TargetConst::Int(2))?,
            Iconst3 => w.load_const(TargetConst::Int(3))?,
            Iconst4 => w.load_const(TargetConst::Int(4))?,
            Iconst5 => w.load_const(TargetConst::Int(5))?,
            Fconst0 | Dconst0 => w.load_const(TargetConst::Float(0.0))?,
            Fconst1 | Dconst1 => w.load_const(TargetConst::Float(1.0))?,
            Fconst2 => w.load_const(TargetConst::Float(2.0))?,
            BiPush => w.load_const(TargetConst::Int(args[0] as i8 as i64))?,
            SiPush => w.load_const(TargetConst::Int(signed2(args) as i64))?,
            Ldc => self.load_constant(args[0] as u16)?,
            LdcW | Ldc2W => self.load_constant(u16_of(args))?,

            // Locals.
            Iload | Lload | Fload | Dload | Aload => w.load_fast(args[0] as u16)?,
            Iload0 | Lload0 | Fload0 | Dload0 | Aload0 => w.load_fast(0)?,
            Iload1 | Lload1 | Fload1 | Dload1 | Aload1 => w.load_fast(1)?,
            Iload2 | Lload2 | Fload2 | Dload2 | Aload2 => w.load_fast(2)?,
            Iload3 | Lload3 | Fload3 | Dload3 | Aload3 => w.load_fast(3)?,
            Istore | Lstore | Fstore | Dstore | Astore => w.store_fast(args[0] as u16)?,
            Istore0 | Lstore0 | Fstore0 | Dstore0 | Astore0 => w.store_fast(0)?,
            Istore1 | Lstore1 | Fstore1 | Dstore1 | Astore1 => w.store_fast(1)?,
            Istore2 | Lstore2 | Fstore2 | Dstore2 | Astore2 => w.store_fast(2)?,
            Istore3 | Lstore3 | Fstore3 | Dstore3 | Astore3 => w.store_fast(3)?,

            // Array element access; no bounds or type checks.
            IAload | LAload | FAload | DAload | AAload | BAload | CAload | SAload => {
                w.binary_subscr();
            }
            IAstore | LAstore | FAstore | DAstore | AAstore | BAstore | CAstore | SAstore => {
                // Stack: arrayref, index, value
                w.rot_three(); // Stack: value, arrayref, index
                w.store_subscr();
            }

            // Operand stack shuffling. Value-width distinctions between
            // the one- and two-slot variants collapse on the target.
            Pop | Pop2 => w.pop_top(),
            Dup | Dup2 => w.dup_top(),
            DupX1 | Dup2X1 => {
                w.dup_top();
                w.rot_three();
            }
            DupX2 | Dup2X2 => {
                w.dup_top();
                w.rot_four();
            }
            Swap => w.rot_two(),

            // Arithmetic; numeric kinds collapse to the target's own.
            IAdd | LAdd | FAdd | DAdd => w.binary_add(),
            ISub | LSub | FSub | DSub => w.binary_subtract(),
            IMul | LMul | FMul | DMul => w.binary_multiply(),
            IDiv | LDiv | FDiv | DDiv => w.binary_divide(),
            IRem | LRem | FRem | DRem => w.binary_modulo(),
            INeg | LNeg | FNeg | DNeg => w.unary_negative(),
            IShl | LShl => w.binary_lshift(),
            // The logical shifts fold into the arithmetic one.
            IShr | LShr | IUShr | LUShr => w.binary_rshift(),
            IAnd | LAnd => w.binary_and(),
            IOr | LOr => w.binary_or(),
            IXor | LXor => w.binary_xor(),
            IInc => {
                let slot = args[0] as u16;
                w.load_fast(slot)?;
                w.load_const(TargetConst::Int(args[1] as i8 as i64))?;
                w.binary_add();
                w.store_fast(slot)?;
            }

            // Conversions. Integral widths are not modelled, so most
            // of these keep the value as it is.
            I2L | L2I | I2B | I2C | I2S | F2D | D2F => {}
            I2F | I2D | L2F | L2D => {
                w.load_global("float")?;
                w.rot_two();
                w.call_function(1)?;
            }
            F2I | F2L | D2I | D2L => {
                w.load_global("int")?;
                w.rot_two();
                w.call_function(1)?;
            }

            // Three-way comparisons.
            LCmp | FCmpL | FCmpG | DCmpL | DCmpG => self.three_way_compare()?,

            // Conditional branches.
            IfEq => self.if_zero(args, pc, CompareKind::Eq)?,
            IfNe => self.if_zero(args, pc, CompareKind::Ne)?,
            IfLt => self.if_zero(args, pc, CompareKind::Lt)?,
            IfGe => self.if_zero(args, pc, CompareKind::Ge)?,
            IfGt => self.if_zero(args, pc, CompareKind::Gt)?,
            IfLe => self.if_zero(args, pc, CompareKind::Le)?,
            IfICmpEq => self.if_compare(args, pc, CompareKind::Eq)?,
            IfICmpNe => self.if_compare(args, pc, CompareKind::Ne)?,
            IfICmpLt => self.if_compare(args, pc, CompareKind::Lt)?,
            IfICmpGe => self.if_compare(args, pc, CompareKind::Ge)?,
            IfICmpGt => self.if_compare(args, pc, CompareKind::Gt)?,
            IfICmpLe => self.if_compare(args, pc, CompareKind::Le)?,
            IfACmpEq => self.if_compare(args, pc, CompareKind::Is)?,
            IfACmpNe => self.if_compare(args, pc, CompareKind::IsNot)?,
            IfNull => {
                self.writer.load_const(TargetConst::Null)?;
                self.if_compare(args, pc, CompareKind::Is)?;
            }
            IfNonNull => {
                self.writer.load_const(TargetConst::Null)?;
                self.if_compare(args, pc, CompareKind::IsNot)?;
            }

            // Unconditional control transfer.
            Goto => {
                let target = (pc as i64 + signed2(args) as i64) as u32;
                w.jump_absolute_label(target)?;
            }
            GotoW => {
                let target = (pc as i64 + signed4(args) as i64) as u32;
                w.jump_absolute_label(target)?;
            }
            Jsr => {
                let target = (pc as i64 + signed2(args) as i64) as u32;
                w.load_const_ret((pc + 3) as u32)?;
                w.jump_absolute_label(target)?;
            }
            JsrW => {
                let target = (pc as i64 + signed4(args) as i64) as u32;
                w.load_const_ret((pc + 5) as u32)?;
                w.jump_absolute_label(target)?;
            }
            Ret => {
                w.ret(args[0] as u16)?;
                // The subroutine is over, so the finally handler is too.
                self.in_finally = false;
            }

            // Returns.
            IReturn | LReturn | FReturn | DReturn | AReturn => w.return_value(),
            Return => {
                w.load_const(TargetConst::Null)?;
                w.return_value();
            }

            // Field access.
            GetField => {
                let target = resolve_member(&self.class_file.constant_pool, u16_of(args))?;
                w.load_attr(&target.mangled_name)?;
            }
            PutField => {
                let target = resolve_member(&self.class_file.constant_pool, u16_of(args))?;
                w.rot_two();
                w.store_attr(&target.mangled_name)?;
            }
            GetStatic => {
                let target = resolve_member(&self.class_file.constant_pool, u16_of(args))?;
                w.use_external_name(&target.class_name);
                load_class_name(&self.this_class, &target.class_name, w)?;
                w.load_attr(&target.mangled_name)?;
            }
            PutStatic => {
                let target = resolve_member(&self.class_file.constant_pool, u16_of(args))?;
                w.use_external_name(&target.class_name);
                load_class_name(&self.this_class, &target.class_name, w)?;
                w.store_attr(&target.mangled_name)?;
            }

            // Method invocation.
            InvokeVirtual => {
                let target = resolve_member(self.pool(), u16_of(args))?;
                self.invoke_with_receiver(&target, target.parameter_count)?;
            }
            InvokeInterface => {
                // The embedded count is nargs plus one for the receiver;
                // the trailing zero byte is padding.
                let target = resolve_member(self.pool(), u16_of(args))?;
                let count = (args[2] as usize).saturating_sub(1);
                self.invoke_with_receiver(&target, count)?;
            }
            InvokeSpecial => {
                let target = resolve_member(self.pool(), u16_of(args))?;
                let w = &mut self.writer;
                // Fold the receiver into the argument tuple.
                w.build_tuple(target.parameter_count as u16 + 1)?;
                if !ELIDED_BASE_CLASSES.contains(&target.class_name.as_str()) {
                    w.use_external_name(&target.class_name);
                    load_class_name(&self.this_class, &target.class_name, w)?;
                    self.invoke(&target.mangled_name)?;
                }
                if target.member_name == "<init>" {
                    // Discard the initialiser's null return.
                    self.writer.pop_top();
                }
            }
            InvokeStatic => {
                let target = resolve_member(self.pool(), u16_of(args))?;
                let w = &mut self.writer;
                w.build_tuple(target.parameter_count as u16)?;
                if !ELIDED_BASE_CLASSES.contains(&target.class_name.as_str()) {
                    w.use_external_name(&target.class_name);
                    load_class_name(&self.this_class, &target.class_name, w)?;
                    self.invoke(&target.mangled_name)?;
                }
            }

            // Object and array creation.
            New => {
                let name = fqcn(&self.pool().class_name(u16_of(args))?);
                let w = &mut self.writer;
                w.use_external_name(&name);
                w.load_global("object")?;
                w.load_attr("__new__")?;
                load_class_name(&self.this_class, &name, w)?;
                w.call_function(1)?;
            }
            NewArray => {
                let default_value = default_for_atype(args[0]);
                self.emit_newarray(default_value)?;
            }
            ANewArray => {
                // Element type is not used to shape the list.
                self.pool().class_name(u16_of(args))?;
                self.emit_newarray(TargetConst::Null)?;
            }
            MultiANewArray => {
                self.pool().class_name(u16_of(args))?;
                let dimensions = args[2];
                self.emit_multianewarray(dimensions)?;
            }
            ArrayLength => {
                w.load_global("len")?; // Stack: arrayref, len
                w.rot_two(); //           Stack: len, arrayref
                w.call_function(1)?;
            }

            AThrow => {
                // Null on the stack does not become the null-pointer
                // error the source machine would raise.
                if self.in_finally {
                    w.end_finally();
                } else {
                    w.load_global("Exception")?; // Stack: objectref, Exception
                    w.rot_two(); //                Stack: Exception, objectref
                    w.call_function(1)?; //        Stack: exception
                    w.raise_varargs(1)?;
                }
            }

            CheckCast => self.checkcast(u16_of(args))?,
            InstanceOf => {
                let name = fqcn(&self.pool().class_name(u16_of(args))?);
                let w = &mut self.writer;
                w.use_external_name(&name);
                w.load_global("isinstance")?; // Stack: objectref, isinstance
                w.rot_two(); //                  Stack: isinstance, objectref
                load_class_name(&self.this_class, &name, w)?;
                w.call_function(2)?;
            }

            // Synchronisation is not enforced.
            MonitorEnter | MonitorExit => {}

            Wide => return Err(TranslateError::NotImplemented("wide")),
            TableSwitch | LookupSwitch => unreachable!("variable-length opcodes"),
        }
        Ok(())
    }

    fn load_constant(&mut self, index: u16) -> Result<(), TranslateError> {
        let entry = self.pool().get(index)?.clone();
        let w = &mut self.writer;
        match entry {
            CpInfo::Integer { value } => w.load_const(TargetConst::Int(value as i64))?,
            CpInfo::Long { value } => w.load_const(TargetConst::Int(value))?,
            CpInfo::Float { bits } => {
                w.load_const(TargetConst::Float(f32::from_bits(bits) as f64))?;
            }
            CpInfo::Double { bits } => {
                w.load_const(TargetConst::Float(f64::from_bits(bits)))?;
            }
            CpInfo::String { string_index } => {
                // Wrap raw text in the host's String class.
                let text = self.pool().utf8(string_index)?;
                let w = &mut self.writer;
                w.use_external_name("java.lang.String");
                w.load_global("java")?;
                w.load_attr("lang")?;
                w.load_attr("String")?;
                w.load_const(TargetConst::Str(text))?;
                w.call_function(1)?;
            }
            _ => return Err(TranslateError::UnsupportedConstant(index)),
        }
        Ok(())
    }

    /// Compare + branch with cleanup pops on both paths. Conditional
    /// jumps peek, so each path pops the comparison result itself.
    fn if_compare(
        &mut self,
        args: &[u8],
        pc: usize,
        op: CompareKind,
    ) -> Result<(), TranslateError> {
        let target = (pc as i64 + signed2(args) as i64) as u32;
        let w = &mut self.writer;
        w.compare_op(op)?;
        w.jump_to_label(Some(false), "next")?;
        w.pop_top();
        w.jump_absolute_label(target)?;
        w.start_label("next")?;
        w.pop_top();
        Ok(())
    }

    /// The single-operand conditionals compare against zero.
    fn if_zero(&mut self, args: &[u8], pc: usize, op: CompareKind) -> Result<(), TranslateError> {
        self.writer.load_const(TargetConst::Int(0))?;
        self.if_compare(args, pc, op)
    }

    /// Collapse a two-value comparison to -1/0/1. Greater branches
    /// first, then equality, leaving the ordering constant on top.
    fn three_way_compare(&mut self) -> Result<(), TranslateError> {
        let w = &mut self.writer;
        w.dup_topx(2)?; //                  Stack: a, b, a, b
        w.compare_op(CompareKind::Gt)?; //  Stack: a, b, result
        w.jump_to_label(Some(false), "equals")?;
        w.pop_top();
        w.pop_top();
        w.pop_top();
        w.load_const(TargetConst::Int(1))?;
        w.jump_to_label(None, "next")?;
        w.start_label("equals")?;
        w.pop_top(); //                     Stack: a, b
        w.dup_topx(2)?;
        w.compare_op(CompareKind::Eq)?;
        w.jump_to_label(Some(false), "less")?;
        w.pop_top();
        w.pop_top();
        w.pop_top();
        w.load_const(TargetConst::Int(0))?;
        w.jump_to_label(None, "next")?;
        w.start_label("less")?;
        w.pop_top();
        w.pop_top();
        w.pop_top();
        w.load_const(TargetConst::Int(-1))?;
        w.start_label("next")?;
        Ok(())
    }

    /// Invocation tail once the argument tuple sits under the callable
    /// owner: fetch the routine, put the tuple back on top, call.
    fn invoke(&mut self, mangled_name: &str) -> Result<(), TranslateError> {
        let w = &mut self.writer;
        w.load_attr(mangled_name)?; // Stack: tuple, method
        w.rot_two(); //                Stack: method, tuple
        w.call_function_var(0)?; //    Stack: result
        Ok(())
    }

    /// Virtual/interface call: tuple the arguments, dispatch through
    /// the receiver's attribute.
    fn invoke_with_receiver(
        &mut self,
        target: &MemberTarget,
        count: usize,
    ) -> Result<(), TranslateError> {
        let w = &mut self.writer;
        // Stack: objectref, arg1, ..., argN
        w.build_tuple(count as u16)?; // Stack: objectref, tuple
        w.rot_two(); //                  Stack: tuple, objectref
        self.invoke(&target.mangled_name)
    }

    /// Fill a fresh list with `count` copies of the default value.
    /// Stack on entry: count; on exit: list.
    fn emit_newarray(&mut self, default_value: TargetConst) -> Result<(), TranslateError> {
        let w = &mut self.writer;
        w.build_list(0)?; //           Stack: count, list
        w.rot_two(); //                Stack: list, count
        w.setup_loop()?;
        w.load_global("range")?;
        w.load_const(TargetConst::Int(0))?; // Stack: list, count, range, 0
        w.rot_three(); //              Stack: list, 0, count, range
        w.rot_three(); //              Stack: list, range, 0, count
        w.call_function(2)?; //        Stack: list, range_list
        w.get_iter(); //               Stack: list, iter
        w.for_iter()?; //              Stack: list, iter, value
        w.pop_top(); //                Stack: list, iter
        w.rot_two(); //                Stack: iter, list
        w.dup_top(); //                Stack: iter, list, list
        w.load_attr("append")?; //     Stack: iter, list, append
        w.load_const(default_value)?;
        w.call_function(1)?; //        Stack: iter, list, result
        w.pop_top(); //                Stack: iter, list
        w.rot_two(); //                Stack: list, iter
        w.end_loop()
    }

    /// Nested list construction for `multianewarray`: the innermost
    /// dimension is built first, then copied outwards level by level.
    fn emit_multianewarray(&mut self, dimensions: u8) -> Result<(), TranslateError> {
        // Stack: count1, ..., countN
        self.emit_newarray(TargetConst::Null)?;
        let w = &mut self.writer;
        for _ in 1..dimensions {
            w.rot_two(); //            Stack: ..., list, count
            w.build_list(0)?; //       Stack: ..., list, count, new
            w.rot_three(); //          Stack: ..., new, list, count
            w.setup_loop()?;
            w.load_const(TargetConst::Int(0))?;
            w.rot_two(); //            Stack: ..., new, list, 0, count
            w.load_global("range")?;
            w.rot_three(); //          Stack: ..., new, list, range, 0, count
            w.call_function(2)?; //    Stack: ..., new, list, range_list
            w.get_iter(); //           Stack: ..., new, list, iter
            w.for_iter()?; //          Stack: ..., new, list, iter, value
            w.pop_top(); //            Stack: ..., new, list, iter
            w.rot_three(); //          Stack: ..., iter, new, list
            w.slice_0(); //            Stack: ..., iter, new, copy
            w.dup_top(); //            Stack: ..., iter, new, copy, copy
            w.rot_three(); //          Stack: ..., iter, copy, new, copy
            w.rot_two(); //            Stack: ..., iter, copy, copy, new
            w.dup_top(); //            Stack: ..., iter, copy, copy, new, new
            w.load_attr("append")?; // Stack: ..., iter, copy, copy, new, append
            w.rot_three(); //          Stack: ..., iter, copy, append, copy, new
            w.rot_three(); //          Stack: ..., iter, copy, new, append, copy
            w.call_function(1)?; //    Stack: ..., iter, copy, new, result
            w.pop_top(); //            Stack: ..., iter, copy, new
            w.rot_two(); //            Stack: ..., iter, new, copy
            w.rot_three(); //          Stack: ..., copy, iter, new
            w.rot_three(); //          Stack: ..., new, copy, iter
            w.end_loop()?;
            w.pop_top(); //            Stack: ..., new
        }
        Ok(())
    }

    /// Instance check that raises the host's ClassCastException when
    /// the value is neither null nor of the named class.
    fn checkcast(&mut self, index: u16) -> Result<(), TranslateError> {
        let target_name = fqcn(&self.pool().class_name(index)?);
        let this_class = self.this_class.clone();
        let w = &mut self.writer;
        w.use_external_name(&target_name);
        w.dup_top(); //                Stack: objectref, objectref
        w.load_const(TargetConst::Null)?;
        w.compare_op(CompareKind::Is)?;
        w.jump_to_label(Some(true), "next")?;
        w.pop_top();
        w.dup_top();
        w.load_global("isinstance")?;
        w.rot_two(); //                Stack: objectref, isinstance, objectref
        load_class_name(&this_class, &target_name, w)?;
        w.call_function(2)?; //        Stack: objectref, result
        w.jump_to_label(Some(true), "next")?;
        w.pop_top();
        w.pop_top();
        w.use_external_name("java.lang.ClassCastException");
        load_class_name(&this_class, "java.lang.ClassCastException", w)?;
        w.call_function(0)?; //        Stack: exception
        w.load_global("Exception")?;
        w.rot_two();
        w.call_function(1)?;
        w.raise_varargs(1)?;
        w.start_label("next")?;
        w.pop_top(); //                Stack: objectref
        Ok(())
    }

    /// Linear dispatch for `tableswitch`: one compare-and-jump per
    /// consecutive key, then the default.
    fn tableswitch(&mut self, code: &[u8], pc: usize) -> Result<usize, TranslateError> {
        let padding = (4 - ((pc + 1) % 4)) % 4;
        let base = pc + 1 + padding;
        if base + 12 > code.len() {
            return Err(ParseError::TruncatedInput {
                needed: 12,
                remaining: code.len().saturating_sub(base),
            }
            .into());
        }
        let default = signed4(&code[base..base + 4]);
        let low = signed4(&code[base + 4..base + 8]);
        let high = signed4(&code[base + 8..base + 12]);
        let count = (high as i64 - low as i64 + 1) as usize;
        let mut offset_index = base + 12;
        if offset_index + count * 4 > code.len() {
            return Err(ParseError::TruncatedInput {
                needed: count * 4,
                remaining: code.len().saturating_sub(offset_index),
            }
            .into());
        }
        for key in low..=high {
            let offset = signed4(&code[offset_index..offset_index + 4]);
            let target = (pc as i64 + offset as i64) as u32;
            self.switch_case(TargetConst::Int(key as i64), target)?;
            offset_index += 4;
        }
        let target = (pc as i64 + default as i64) as u32;
        self.writer.jump_absolute_label(target)?;
        Ok(offset_index - pc - 1)
    }

    /// Linear dispatch for `lookupswitch` key/offset pairs.
    fn lookupswitch(&mut self, code: &[u8], pc: usize) -> Result<usize, TranslateError> {
        let padding = (4 - ((pc + 1) % 4)) % 4;
        let base = pc + 1 + padding;
        if base + 8 > code.len() {
            return Err(ParseError::TruncatedInput {
                needed: 8,
                remaining: code.len().saturating_sub(base),
            }
            .into());
        }
        let default = signed4(&code[base..base + 4]);
        let npairs = signed4(&code[base + 4..base + 8]) as usize;
        let mut pair_index = base + 8;
        if pair_index + npairs * 8 > code.len() {
            return Err(ParseError::TruncatedInput {
                needed: npairs * 8,
                remaining: code.len().saturating_sub(pair_index),
            }
            .into());
        }
        for _ in 0..npairs {
            let key = signed4(&code[pair_index..pair_index + 4]);
            let offset = signed4(&code[pair_index + 4..pair_index + 8]);
            let target = (pc as i64 + offset as i64) as u32;
            self.switch_case(TargetConst::Int(key as i64), target)?;
            pair_index += 8;
        }
        let target = (pc as i64 + default as i64) as u32;
        self.writer.jump_absolute_label(target)?;
        Ok(pair_index - pc - 1)
    }

    fn switch_case(&mut self, key: TargetConst, target: u32) -> Result<(), TranslateError> {
        let w = &mut self.writer;
        w.dup_top(); //                Stack: key, key
        w.load_const(key)?; //         Stack: key, key, case
        w.compare_op(CompareKind::Eq)?;
        w.jump_to_label(Some(false), "end")?;
        w.pop_top(); //                Stack: key
        w.pop_top(); //                Stack:
        w.jump_absolute_label(target)?;
        w.start_label("end")?;
        w.pop_top(); //                Stack: key
        Ok(())
    }
}

/// Translates every method of one class.
pub struct ClassTranslator<'a> {
    class_file: &'a ClassFile,
    filename: String,
}

impl<'a> ClassTranslator<'a> {
    pub fn new(class_file: &'a ClassFile) -> Self {
        let filename = class_file.source_file().unwrap_or_default();
        Self {
            class_file,
            filename,
        }
    }

    /// Translate the whole class: every method, the overload
    /// dispatchers, static field slots and external references.
    pub fn translate(&self) -> Result<TranslatedClass, TranslateError> {
        let pool = &self.class_file.constant_pool;
        let class_name = self.class_file.class_fqcn()?;

        let mut methods = Vec::with_capacity(self.class_file.methods.len());
        let mut external_names: Vec<String> = Vec::new();
        for method in &self.class_file.methods {
            let method_name = method.name(pool).unwrap_or_else(|_| "<unknown>".into());
            let translated = self
                .translate_method(method)
                .map_err(|error| error.in_method(&class_name, &method_name))?;
            debug!(
                "translated {class_name}.{method_name} -> {} ({} bytes)",
                translated.mangled_name,
                translated.blob.code.len()
            );
            for name in &translated.blob.external_names {
                if !external_names.contains(name) {
                    external_names.push(name.clone());
                }
            }
            methods.push(translated);
        }

        let mut static_fields = Vec::new();
        for field in &self.class_file.fields {
            if field.is_static() {
                static_fields.push(field.name(pool)?);
            }
        }

        let dispatchers = dispatch::make_dispatchers(&class_name, &self.filename, &methods)?;

        let super_name = self.class_file.super_fqcn()?;
        if let Some(name) = &super_name {
            if !external_names.contains(name) {
                external_names.push(name.clone());
            }
        }
        let mut interfaces = Vec::with_capacity(self.class_file.interfaces.len());
        for index in &self.class_file.interfaces {
            let name = fqcn(&pool.class_name(*index)?);
            if !external_names.contains(&name) {
                external_names.push(name.clone());
            }
            interfaces.push(name);
        }

        Ok(TranslatedClass {
            class_name,
            super_name,
            interfaces,
            static_fields,
            methods,
            dispatchers,
            external_names,
        })
    }

    /// Translate one method into a finished routine.
    pub fn translate_method(
        &self,
        method: &MemberInfo,
    ) -> Result<TranslatedMethod, TranslateError> {
        let pool = &self.class_file.constant_pool;
        let java_name = method.name(pool)?;
        let descriptor_text = method.descriptor(pool)?;
        let (params, _) = descriptor::parse_method(&descriptor_text)?;
        let mangled_name = descriptor::mangle_method_name(&java_name, &params);
        // Initialisers dispatch through the instance even when the
        // static flag is present.
        let is_static = java_name != "<init>" && method.is_static();
        let argcount = params.len() + usize::from(!is_static);

        let this_class = self.class_file.class_fqcn()?;
        let mut translator = MethodTranslator::new(self.class_file, this_class);
        translator.process(method.code())?;

        let nlocals = translator.writer.nlocals().max(argcount as u16);
        let varnames = make_varnames(nlocals, is_static);
        let blob =
            translator
                .writer
                .finish(&mangled_name, &self.filename, argcount as u16, varnames)?;

        Ok(TranslatedMethod {
            java_name,
            mangled_name,
            descriptor: descriptor_text,
            is_static,
            parameter_count: params.len(),
            blob,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attribute;
    use crate::classfile::AccessFlags;
    use crate::target::{disassemble, TargetOp};

    /// A class file with one method and a pool assembled from parts:
    /// slots 1..=n hold the given UTF-8 strings, then a class entry for
    /// the method's owner.
    fn class_with_method(
        descriptor: &str,
        code: Vec<u8>,
        exception_table: Vec<ExceptionEntry>,
        extra: Vec<Option<CpInfo>>,
    ) -> ClassFile {
        let mut entries: Vec<Option<CpInfo>> = vec![
            None,
            Some(CpInfo::Utf8 {
                bytes: b"Sample".to_vec(),
            }),
            Some(CpInfo::Class { name_index: 1 }),
            Some(CpInfo::Utf8 {
                bytes: b"run".to_vec(),
            }),
            Some(CpInfo::Utf8 {
                bytes: descriptor.as_bytes().to_vec(),
            }),
        ];
        entries.extend(extra);
        let pool = ConstantPool::from_entries(entries);
        let method = MemberInfo {
            access_flags: AccessFlags::PUBLIC | AccessFlags::STATIC,
            name_index: 3,
            descriptor_index: 4,
            attributes: vec![Attribute::Code(CodeAttribute {
                name_index: 0,
                max_stack: 4,
                max_locals: 4,
                code,
                exception_table,
                attributes: vec![],
            })],
        };
        ClassFile {
            minor_version: 0,
            major_version: 49,
            constant_pool: pool,
            access_flags: AccessFlags::PUBLIC,
            this_class: 2,
            super_class: 0,
            interfaces: vec![],
            fields: vec![],
            methods: vec![method],
            attributes: vec![],
        }
    }

    fn translate_single(class: &ClassFile) -> CodeBlob {
        let translator = ClassTranslator::new(class);
        translator
            .translate_method(&class.methods[0])
            .unwrap()
            .blob
    }

    fn opcodes(blob: &CodeBlob) -> Vec<TargetOp> {
        disassemble(&blob.code).into_iter().map(|(_, op, _)| op).collect()
    }

    #[test]
    fn default_constructor_elides_the_base_initialiser() {
        let data = crate::classfile::tests::empty_class_bytes();
        let class = ClassFile::parse(&data).unwrap();
        let translated = ClassTranslator::new(&class).translate().unwrap();
        assert_eq!(translated.class_name, "Empty");
        assert_eq!(translated.methods[0].mangled_name, "__init__");

        let ops = opcodes(&translated.methods[0].blob);
        assert_eq!(
            ops,
            vec![
                TargetOp::LoadFast,   // aload_0
                TargetOp::BuildTuple, // fold receiver into argument tuple
                TargetOp::PopTop,     // java.lang.Object init elided
                TargetOp::LoadConst,  // null
                TargetOp::ReturnValue,
            ]
        );
    }

    #[test]
    fn integer_addition_becomes_two_loads_and_an_add() {
        // iconst_2; iconst_3; iadd; ireturn
        let class = class_with_method("()I", vec![0x05, 0x06, 0x60, 0xAC], vec![], vec![]);
        let blob = translate_single(&class);
        assert_eq!(
            opcodes(&blob),
            vec![
                TargetOp::LoadConst,
                TargetOp::LoadConst,
                TargetOp::BinaryAdd,
                TargetOp::ReturnValue,
            ]
        );
        assert_eq!(
            blob.constants,
            vec![TargetConst::Int(2), TargetConst::Int(3)]
        );
        assert_eq!(blob.max_stack, 2);
    }

    #[test]
    fn long_comparison_produces_the_ordering_constants() {
        // lload_0; lload_2; lcmp; ireturn
        let class = class_with_method("(JJ)I", vec![0x1E, 0x20, 0x94, 0xAC], vec![], vec![]);
        let blob = translate_single(&class);
        let ordering: Vec<i64> = blob
            .constants
            .iter()
            .filter_map(|constant| match constant {
                TargetConst::Int(value) => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(ordering, vec![1, 0, -1]);

        let listing = disassemble(&blob.code);
        let compares: Vec<u16> = listing
            .iter()
            .filter(|(_, op, _)| *op == TargetOp::CompareOp)
            .map(|(_, _, operand)| operand.unwrap())
            .collect();
        assert_eq!(
            compares,
            vec![CompareKind::Gt as u16, CompareKind::Eq as u16]
        );
        // Both branch-if-false offsets land inside the emitted body.
        for (position, op, operand) in &listing {
            if *op == TargetOp::JumpIfFalse || *op == TargetOp::JumpForward {
                let landing = position + 3 + operand.unwrap() as usize;
                assert!(landing <= blob.code.len());
            }
        }
    }

    #[test]
    fn branch_targets_resolve_through_the_position_mapping() {
        // iconst_0; goto +4; nop; iconst_0; return
        let class = class_with_method(
            "()V",
            vec![0x03, 0xA7, 0x00, 0x04, 0x00, 0x03, 0xB1],
            vec![],
            vec![],
        );
        let blob = translate_single(&class);
        let listing = disassemble(&blob.code);
        // goto 1+4=5 lands on the second iconst_0; nop emits nothing,
        // so that is the LoadConst directly after the jump.
        let (jump_position, _, operand) = *listing
            .iter()
            .find(|(_, op, _)| *op == TargetOp::JumpAbsolute)
            .unwrap();
        assert_eq!(operand.unwrap() as usize, jump_position + 3);
    }

    #[test]
    fn try_catch_opens_a_frame_and_emits_the_handler_prologue() {
        // iconst_0; ireturn; iconst_1; ireturn with a typed handler
        // covering [0, 2) and entered at 2.
        let class = class_with_method(
            "()I",
            vec![0x03, 0xAC, 0x04, 0xAC],
            vec![ExceptionEntry {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 2,
                catch_type: 6,
            }],
            vec![
                Some(CpInfo::Utf8 {
                    bytes: b"java/lang/Exception".to_vec(),
                }),
                Some(CpInfo::Class { name_index: 5 }),
            ],
        );
        let blob = translate_single(&class);
        let listing = disassemble(&blob.code);

        assert_eq!(listing[0].1, TargetOp::SetupExcept);
        let ops = opcodes(&blob);
        assert!(ops.contains(&TargetOp::EndFinally), "re-raise path");
        let matches: Vec<u16> = listing
            .iter()
            .filter(|(_, op, _)| *op == TargetOp::CompareOp)
            .map(|(_, _, operand)| operand.unwrap())
            .collect();
        assert!(matches.contains(&(CompareKind::ExceptionMatch as u16)));

        // The setup operand points at the handler's emitted position:
        // the delta plus the three-byte setup reaches the prologue.
        let handler_delta = listing[0].2.unwrap() as usize;
        let handler_position = 3 + handler_delta;
        assert_eq!(listing.iter().find(|(p, _, _)| *p == handler_position).map(|e| e.1),
            Some(TargetOp::RotTwo));
    }

    #[test]
    fn catch_all_rows_sharing_a_handler_merge_into_one_frame() {
        // Two finally rows with one handler collapse to a single
        // setup_finally covering the widest range.
        let code = vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xB1];
        let class = class_with_method(
            "()V",
            code,
            vec![
                ExceptionEntry {
                    start_pc: 0,
                    end_pc: 2,
                    handler_pc: 6,
                    catch_type: 0,
                },
                ExceptionEntry {
                    start_pc: 0,
                    end_pc: 4,
                    handler_pc: 6,
                    catch_type: 0,
                },
            ],
            vec![],
        );
        let blob = translate_single(&class);
        let setups = opcodes(&blob)
            .into_iter()
            .filter(|op| *op == TargetOp::SetupFinally)
            .count();
        assert_eq!(setups, 1);
    }

    #[test]
    fn lookupswitch_emits_one_compare_chain_per_pair() {
        // iconst_0 at 0, lookupswitch at 1: padding 2, default +29,
        // pairs (10 -> +27), (20 -> +28); ireturn at 28, 29, 30.
        let mut code = vec![0x03, 0xAB, 0x00, 0x00];
        code.extend_from_slice(&29i32.to_be_bytes());
        code.extend_from_slice(&2i32.to_be_bytes());
        code.extend_from_slice(&10i32.to_be_bytes());
        code.extend_from_slice(&27i32.to_be_bytes());
        code.extend_from_slice(&20i32.to_be_bytes());
        code.extend_from_slice(&28i32.to_be_bytes());
        code.extend_from_slice(&[0xAC, 0xAC, 0xAC]);
        let class = class_with_method("()I", code, vec![], vec![]);
        let blob = translate_single(&class);
        let listing = disassemble(&blob.code);

        let case_constants: Vec<i64> = blob
            .constants
            .iter()
            .filter_map(|constant| match constant {
                TargetConst::Int(value) => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(case_constants, vec![0, 10, 20]);

        // Three absolute jumps: case A, case B, default, each landing
        // on one of the three emitted returns.
        let return_positions: Vec<usize> = listing
            .iter()
            .filter(|(_, op, _)| *op == TargetOp::ReturnValue)
            .map(|(position, _, _)| *position)
            .collect();
        assert_eq!(return_positions.len(), 3);
        let jumps: Vec<usize> = listing
            .iter()
            .filter(|(_, op, _)| *op == TargetOp::JumpAbsolute)
            .map(|(_, _, operand)| operand.unwrap() as usize)
            .collect();
        assert_eq!(jumps.len(), 3);
        for target in jumps {
            assert!(return_positions.contains(&target));
        }
    }

    #[test]
    fn subroutine_addresses_dispatch_back_to_their_return_site() {
        // jsr +4; return; astore_1; ret 1
        let class = class_with_method(
            "()V",
            vec![0xA8, 0x00, 0x04, 0xB1, 0x4C, 0xA9, 0x01],
            vec![],
            vec![],
        );
        let blob = translate_single(&class);
        let listing = disassemble(&blob.code);

        // The return-address constant resolves to the emitted position
        // of the instruction after the jsr (the return at pc 3).
        let addresses: Vec<i64> = blob
            .constants
            .iter()
            .filter_map(|constant| match constant {
                TargetConst::Int(value) => Some(*value),
                _ => None,
            })
            .collect();
        assert!(!addresses.is_empty());
        let return_address = addresses[0] as usize;
        assert_eq!(
            listing
                .iter()
                .find(|(position, _, _)| *position == return_address)
                .map(|entry| entry.1),
            Some(TargetOp::LoadConst) // return emits load_const(null) first
        );
        // The dispatch chain jumps to exactly that address.
        let dispatch_jump = listing
            .iter()
            .filter(|(_, op, _)| *op == TargetOp::JumpAbsolute)
            .any(|(_, _, operand)| operand.unwrap() as usize == return_address);
        assert!(dispatch_jump);
    }

    #[test]
    fn instance_methods_count_the_receiver_in_argcount() {
        let mut class = class_with_method("(I)I", vec![0x1B, 0xAC], vec![], vec![]);
        class.methods[0].access_flags = AccessFlags::PUBLIC;
        let translator = ClassTranslator::new(&class);
        let translated = translator.translate_method(&class.methods[0]).unwrap();
        assert!(!translated.is_static);
        assert_eq!(translated.blob.argcount, 2);
        assert_eq!(translated.blob.varnames[0], "self");
        assert_eq!(translated.mangled_name, "run____I_");
    }

    #[test]
    fn athrow_inside_a_finally_handler_re_raises() {
        // Region [0,2) with catch-all handler at 2; the handler body
        // rethrows: nop; nop; athrow; return
        let class = class_with_method(
            "()V",
            vec![0x00, 0x00, 0xBF, 0xB1],
            vec![ExceptionEntry {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 2,
                catch_type: 0,
            }],
            vec![],
        );
        let blob = translate_single(&class);
        let ops = opcodes(&blob);
        assert!(ops.contains(&TargetOp::EndFinally));
        assert!(!ops.contains(&TargetOp::RaiseVarargs));
    }

    #[test]
    fn translation_failures_carry_class_and_method_context() {
        // wide is not supported
        let class = class_with_method("()V", vec![0xC4, 0x84, 0x01, 0x00, 0x01, 0xB1], vec![], vec![]);
        let error = ClassTranslator::new(&class).translate().unwrap_err();
        match error {
            TranslateError::Method { class, method, source } => {
                assert_eq!(class, "Sample");
                assert_eq!(method, "run");
                assert!(matches!(*source, TranslateError::NotImplemented("wide")));
            }
            other => panic!("expected method context, got {other}"),
        }
    }

    #[test]
    fn static_fields_and_interfaces_are_collected() {
        let mut class = class_with_method("()V", vec![0xB1], vec![], vec![
            Some(CpInfo::Utf8 { bytes: b"java/lang/Runnable".to_vec() }),
            Some(CpInfo::Class { name_index: 5 }),
            Some(CpInfo::Utf8 { bytes: b"COUNT".to_vec() }),
            Some(CpInfo::Utf8 { bytes: b"I".to_vec() }),
        ]);
        class.interfaces = vec![6];
        class.fields = vec![MemberInfo {
            access_flags: AccessFlags::PUBLIC | AccessFlags::STATIC,
            name_index: 7,
            descriptor_index: 8,
            attributes: vec![],
        }];
        let translated = ClassTranslator::new(&class).translate().unwrap();
        assert_eq!(translated.interfaces, vec!["java.lang.Runnable"]);
        assert_eq!(translated.static_fields, vec!["COUNT"]);
        assert!(translated
            .external_names
            .contains(&"java.lang.Runnable".to_string()));
    }
}
