//! Target VM bytecode emission.
//!
//! The target is a stack machine whose instructions are one opcode byte
//! optionally followed by a 16-bit little-endian operand (opcodes at or
//! above `HAVE_OPERAND` take one). Conditional jumps peek at the top of
//! the stack without popping it; the emitted choreography cleans up with
//! explicit pops on both paths.
//!
//! `TargetWriter` accumulates instructions for one routine and resolves
//! forward references afterwards: named labels for local control flow,
//! and numeric labels (source bytecode positions) for branch targets and
//! exception handlers that are only known once the walk reaches them.
use std::collections::HashMap;

use log::trace;

use crate::error::TranslateError;

/// Opcodes at or above this value carry a 16-bit operand.
pub const HAVE_OPERAND: u8 = 90;

/// The target machine's opcode repertoire.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TargetOp {
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    RotFour = 5,
    UnaryNegative = 11,
    BinaryMultiply = 20,
    BinaryDivide = 21,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    SliceZero = 30,
    SliceOne = 31,
    StoreSubscr = 60,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    GetIter = 68,
    BreakLoop = 80,
    ReturnValue = 83,
    PopBlock = 87,
    EndFinally = 88,
    UnpackSequence = 92,
    ForIter = 93,
    StoreAttr = 95,
    DupTopX = 99,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    LoadAttr = 106,
    CompareOp = 107,
    JumpForward = 110,
    JumpIfFalse = 111,
    JumpIfTrue = 112,
    JumpAbsolute = 113,
    LoadGlobal = 116,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    RaiseVarargs = 130,
    CallFunction = 131,
    CallFunctionVar = 140,
}

impl TargetOp {
    pub fn has_operand(self) -> bool {
        self as u8 >= HAVE_OPERAND
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::PopTop,
            2 => Self::RotTwo,
            3 => Self::RotThree,
            4 => Self::DupTop,
            5 => Self::RotFour,
            11 => Self::UnaryNegative,
            20 => Self::BinaryMultiply,
            21 => Self::BinaryDivide,
            22 => Self::BinaryModulo,
            23 => Self::BinaryAdd,
            24 => Self::BinarySubtract,
            25 => Self::BinarySubscr,
            30 => Self::SliceZero,
            31 => Self::SliceOne,
            60 => Self::StoreSubscr,
            62 => Self::BinaryLshift,
            63 => Self::BinaryRshift,
            64 => Self::BinaryAnd,
            65 => Self::BinaryXor,
            66 => Self::BinaryOr,
            68 => Self::GetIter,
            80 => Self::BreakLoop,
            83 => Self::ReturnValue,
            87 => Self::PopBlock,
            88 => Self::EndFinally,
            92 => Self::UnpackSequence,
            93 => Self::ForIter,
            95 => Self::StoreAttr,
            99 => Self::DupTopX,
            100 => Self::LoadConst,
            101 => Self::LoadName,
            102 => Self::BuildTuple,
            103 => Self::BuildList,
            106 => Self::LoadAttr,
            107 => Self::CompareOp,
            110 => Self::JumpForward,
            111 => Self::JumpIfFalse,
            112 => Self::JumpIfTrue,
            113 => Self::JumpAbsolute,
            116 => Self::LoadGlobal,
            120 => Self::SetupLoop,
            121 => Self::SetupExcept,
            122 => Self::SetupFinally,
            124 => Self::LoadFast,
            125 => Self::StoreFast,
            130 => Self::RaiseVarargs,
            131 => Self::CallFunction,
            140 => Self::CallFunctionVar,
            _ => return None,
        })
    }
}

/// Comparison operators for `CompareOp`, numbered per the target's
/// comparison table.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompareKind {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
    Is = 6,
    IsNot = 7,
    ExceptionMatch = 8,
}

/// Numeric labels name source-bytecode positions; they are bound to
/// emitted positions as the translator's walk reaches them.
pub type Label = u32;

/// A constant in a routine's constant table. Floats compare and hash by
/// bit pattern so interning is well defined.
#[derive(Debug, Clone)]
pub enum TargetConst {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    /// A return address recorded by a subroutine call; replaced by the
    /// label's bound position when the routine is finished.
    ReturnAddress(Label),
}

impl PartialEq for TargetConst {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::ReturnAddress(a), Self::ReturnAddress(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TargetConst {}

impl std::hash::Hash for TargetConst {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Str(v) => v.hash(state),
            Self::ReturnAddress(v) => v.hash(state),
        }
    }
}

/// Everything the host runtime needs to wrap an emitted routine as a
/// callable: the code bytes plus its constant, name and variable tables
/// and the stack bound.
#[derive(Debug, Clone)]
pub struct CodeBlob {
    pub name: String,
    pub filename: String,
    pub argcount: u16,
    pub nlocals: u16,
    pub max_stack: u16,
    pub code: Vec<u8>,
    pub constants: Vec<TargetConst>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub external_names: Vec<String>,
}

/// A target bytecode writer for one routine.
pub struct TargetWriter {
    output: Vec<u8>,

    // Loop starts and block starts, stacked as regions nest.
    loops: Vec<usize>,
    blocks: Vec<usize>,

    // Exception frames whose handler addresses are not yet known.
    exception_handlers: Vec<Label>,
    exception_offsets: Vec<(usize, Label, usize)>,

    // Pending named-label jumps: (jump site, following position).
    jumps: HashMap<String, Vec<(usize, usize)>>,

    // Numeric label bindings and absolute-jump sites awaiting them.
    labels: HashMap<Label, u16>,
    pending_absolute: HashMap<Label, Vec<usize>>,

    stack_depth: i32,
    max_stack_depth: i32,
    max_locals: u16,

    constants: Vec<TargetConst>,
    constant_index: HashMap<TargetConst, u16>,
    names: Vec<String>,
    name_index: HashMap<String, u16>,

    // Return-address constants recorded by subroutine calls, in order.
    return_constants: Vec<Label>,

    external_names: Vec<String>,
}

impl Default for TargetWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetWriter {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            loops: Vec::new(),
            blocks: Vec::new(),
            exception_handlers: Vec::new(),
            exception_offsets: Vec::new(),
            jumps: HashMap::new(),
            labels: HashMap::new(),
            pending_absolute: HashMap::new(),
            stack_depth: 0,
            max_stack_depth: 0,
            max_locals: 0,
            constants: Vec::new(),
            constant_index: HashMap::new(),
            names: Vec::new(),
            name_index: HashMap::new(),
            return_constants: Vec::new(),
            external_names: Vec::new(),
        }
    }

    /// Current emit position.
    pub fn position(&self) -> usize {
        self.output.len()
    }

    fn emit(&mut self, op: TargetOp) {
        self.output.push(op as u8);
    }

    fn write_value(&mut self, value: u32) -> Result<(), TranslateError> {
        if value > 0xFFFF {
            return Err(TranslateError::ValueOverflow(value));
        }
        self.output.push((value & 0xFF) as u8);
        self.output.push((value >> 8) as u8);
        Ok(())
    }

    fn rewrite_value(&mut self, site: usize, value: u32) -> Result<(), TranslateError> {
        if value > 0xFFFF {
            return Err(TranslateError::ValueOverflow(value));
        }
        self.output[site] = (value & 0xFF) as u8;
        self.output[site + 1] = (value >> 8) as u8;
        Ok(())
    }

    fn update_stack_depth(&mut self, change: i32) {
        self.stack_depth += change;
        if self.stack_depth > self.max_stack_depth {
            self.max_stack_depth = self.stack_depth;
        }
    }

    fn update_locals(&mut self, index: u16) {
        if index > self.max_locals {
            self.max_locals = index;
        }
    }

    fn intern_constant(&mut self, value: TargetConst) -> u16 {
        if let Some(index) = self.constant_index.get(&value) {
            return *index;
        }
        let index = self.constants.len() as u16;
        self.constants.push(value.clone());
        self.constant_index.insert(value, index);
        index
    }

    fn intern_name(&mut self, name: &str) -> u16 {
        if let Some(index) = self.name_index.get(name) {
            return *index;
        }
        let index = self.names.len() as u16;
        self.names.push(name.to_string());
        self.name_index.insert(name.to_string(), index);
        index
    }

    /// Record a name the routine expects to find in its global scope.
    pub fn use_external_name(&mut self, name: &str) {
        self.external_names.push(name.to_string());
    }

    /// Local-variable count implied by the slots touched so far.
    pub fn nlocals(&self) -> u16 {
        self.max_locals + 1
    }

    // Numeric labels.

    /// Bind `label` to the current position, patching every absolute
    /// jump already emitted against it.
    pub fn bind_label(&mut self, label: Label) -> Result<(), TranslateError> {
        let position = self.position();
        if position > 0xFFFF {
            return Err(TranslateError::ValueOverflow(position as u32));
        }
        self.labels.insert(label, position as u16);
        if let Some(sites) = self.pending_absolute.remove(&label) {
            for site in sites {
                self.rewrite_value(site, position as u32)?;
            }
        }
        Ok(())
    }

    pub fn label_position(&self, label: Label) -> Option<u16> {
        self.labels.get(&label).copied()
    }

    /// Absolute jump to a numeric label, patched later if the label is
    /// not bound yet.
    pub fn jump_absolute_label(&mut self, label: Label) -> Result<(), TranslateError> {
        self.emit(TargetOp::JumpAbsolute);
        match self.labels.get(&label) {
            Some(position) => {
                let position = *position as u32;
                self.write_value(position)
            }
            None => {
                let site = self.position();
                self.pending_absolute.entry(label).or_default().push(site);
                self.write_value(0)
            }
        }
    }

    // Named labels for local control flow.

    /// Emit a jump to a named label: unconditional for `None`, branch on
    /// truth/falsity for `Some(true)` / `Some(false)`.
    pub fn jump_to_label(
        &mut self,
        status: Option<bool>,
        name: &str,
    ) -> Result<(), TranslateError> {
        let jump_instruction = self.position();
        match status {
            None => self.jump_forward(0)?,
            Some(true) => self.jump_if_true(0)?,
            Some(false) => self.jump_if_false(0)?,
        }
        let following = self.position();
        self.jumps
            .entry(name.to_string())
            .or_default()
            .push((jump_instruction, following));
        Ok(())
    }

    /// Resolve every pending jump to the named label against the
    /// current position.
    pub fn start_label(&mut self, name: &str) -> Result<(), TranslateError> {
        let pending = self
            .jumps
            .remove(name)
            .ok_or_else(|| TranslateError::UnresolvedLabel(name.to_string()))?;
        let position = self.position();
        for (jump_instruction, following) in pending {
            self.rewrite_value(jump_instruction + 1, (position - following) as u32)?;
        }
        Ok(())
    }

    // Loop and exception framing.

    pub fn setup_loop(&mut self) -> Result<(), TranslateError> {
        self.loops.push(self.position());
        self.emit(TargetOp::SetupLoop);
        self.write_value(0) // patched by end_loop
    }

    pub fn for_iter(&mut self) -> Result<(), TranslateError> {
        self.blocks.push(self.position());
        self.emit(TargetOp::ForIter);
        self.write_value(0)?; // patched by end_loop
        self.update_stack_depth(1);
        Ok(())
    }

    pub fn end_loop(&mut self) -> Result<(), TranslateError> {
        let loop_start = self
            .loops
            .pop()
            .ok_or(TranslateError::BlockUnderflow("end_loop"))?;
        let iter_start = self
            .blocks
            .pop()
            .ok_or(TranslateError::BlockUnderflow("end_loop"))?;
        self.jump_absolute(iter_start as u32)?;
        // The framing instructions are three bytes long; deltas are
        // relative to the instruction that follows them.
        let position = self.position();
        self.rewrite_value(iter_start + 1, (position - iter_start - 3) as u32)?;
        self.pop_block();
        let position = self.position();
        self.rewrite_value(loop_start + 1, (position - loop_start - 3) as u32)
    }

    pub fn break_loop(&mut self) -> Result<(), TranslateError> {
        let target = *self
            .blocks
            .last()
            .ok_or(TranslateError::BlockUnderflow("break_loop"))?;
        self.emit(TargetOp::BreakLoop);
        self.jump_absolute(target as u32)
    }

    pub fn setup_except(&mut self, target: Label) -> Result<(), TranslateError> {
        self.blocks.push(self.position());
        self.exception_handlers.push(target);
        self.emit(TargetOp::SetupExcept);
        self.write_value(0) // patched by end_exceptions
    }

    pub fn setup_finally(&mut self, target: Label) -> Result<(), TranslateError> {
        self.blocks.push(self.position());
        self.exception_handlers.push(target);
        self.emit(TargetOp::SetupFinally);
        self.write_value(0) // patched by end_exceptions
    }

    /// Close the innermost exception frame, deferring the handler
    /// offset until `end_exceptions`.
    pub fn end_exception(&mut self) -> Result<(), TranslateError> {
        let start = self
            .blocks
            .pop()
            .ok_or(TranslateError::BlockUnderflow("end_exception"))?;
        let target = self
            .exception_handlers
            .pop()
            .ok_or(TranslateError::BlockUnderflow("end_exception"))?;
        self.exception_offsets.push((start + 1, target, start));
        Ok(())
    }

    /// Patch every deferred handler offset. Called once after the last
    /// source instruction, when all handler positions are bound.
    pub fn end_exceptions(&mut self) -> Result<(), TranslateError> {
        let offsets = std::mem::take(&mut self.exception_offsets);
        for (site, target, start) in offsets {
            let position = self
                .label_position(target)
                .ok_or(TranslateError::UnresolvedTarget(target))? as usize;
            self.rewrite_value(site, (position - start - 3) as u32)?;
        }
        Ok(())
    }

    // Loads and stores.

    pub fn load_const(&mut self, value: TargetConst) -> Result<(), TranslateError> {
        self.emit(TargetOp::LoadConst);
        let index = self.intern_constant(value);
        self.write_value(index as u32)?;
        self.update_stack_depth(1);
        Ok(())
    }

    /// Load a return-address constant recorded for subroutine dispatch.
    pub fn load_const_ret(&mut self, label: Label) -> Result<(), TranslateError> {
        self.return_constants.push(label);
        self.load_const(TargetConst::ReturnAddress(label))
    }

    /// Dispatch on a return address held in local `index`: compare it
    /// against every recorded return-address constant and jump to the
    /// matching target. Jump targets must be known in advance here, so
    /// the runtime value cannot be jumped to directly.
    pub fn ret(&mut self, index: u16) -> Result<(), TranslateError> {
        self.load_fast(index)?;
        let candidates = self.return_constants.clone();
        for label in candidates {
            self.dup_top(); //                 Stack: addr, addr
            self.load_const(TargetConst::ReturnAddress(label))?;
            self.compare_op(CompareKind::Eq)?; // Stack: addr, result
            self.jump_to_label(Some(false), "ret_next")?;
            self.pop_top(); //                 Stack: addr
            self.pop_top(); //                 Stack:
            self.jump_absolute_label(label)?;
            self.start_label("ret_next")?;
            self.pop_top(); //                 Stack: addr
        }
        // No recorded address matched; well-formed input never gets here.
        self.pop_top();
        Ok(())
    }

    pub fn load_global(&mut self, name: &str) -> Result<(), TranslateError> {
        self.emit(TargetOp::LoadGlobal);
        let index = self.intern_name(name);
        self.write_value(index as u32)?;
        self.update_stack_depth(1);
        Ok(())
    }

    pub fn load_attr(&mut self, name: &str) -> Result<(), TranslateError> {
        self.emit(TargetOp::LoadAttr);
        let index = self.intern_name(name);
        self.write_value(index as u32)
    }

    pub fn load_name(&mut self, name: &str) -> Result<(), TranslateError> {
        self.emit(TargetOp::LoadName);
        let index = self.intern_name(name);
        self.write_value(index as u32)?;
        self.update_stack_depth(1);
        Ok(())
    }

    pub fn load_fast(&mut self, index: u16) -> Result<(), TranslateError> {
        self.emit(TargetOp::LoadFast);
        self.write_value(index as u32)?;
        self.update_stack_depth(1);
        self.update_locals(index);
        Ok(())
    }

    pub fn store_attr(&mut self, name: &str) -> Result<(), TranslateError> {
        self.emit(TargetOp::StoreAttr);
        let index = self.intern_name(name);
        self.write_value(index as u32)?;
        self.update_stack_depth(-1);
        Ok(())
    }

    pub fn store_fast(&mut self, index: u16) -> Result<(), TranslateError> {
        self.emit(TargetOp::StoreFast);
        self.write_value(index as u32)?;
        self.update_stack_depth(-1);
        self.update_locals(index);
        Ok(())
    }

    // Jumps with explicit operands.

    pub fn jump_forward(&mut self, offset: u32) -> Result<(), TranslateError> {
        self.emit(TargetOp::JumpForward);
        self.write_value(offset)
    }

    pub fn jump_if_true(&mut self, offset: u32) -> Result<(), TranslateError> {
        self.emit(TargetOp::JumpIfTrue);
        self.write_value(offset)
    }

    pub fn jump_if_false(&mut self, offset: u32) -> Result<(), TranslateError> {
        self.emit(TargetOp::JumpIfFalse);
        self.write_value(offset)
    }

    pub fn jump_absolute(&mut self, address: u32) -> Result<(), TranslateError> {
        self.emit(TargetOp::JumpAbsolute);
        self.write_value(address)
    }

    // Stack manipulation and calls.

    pub fn build_tuple(&mut self, count: u16) -> Result<(), TranslateError> {
        self.emit(TargetOp::BuildTuple);
        self.write_value(count as u32)?;
        self.update_stack_depth(-(count as i32 - 1));
        Ok(())
    }

    pub fn build_list(&mut self, count: u16) -> Result<(), TranslateError> {
        self.emit(TargetOp::BuildList);
        self.write_value(count as u32)?;
        self.update_stack_depth(-(count as i32 - 1));
        Ok(())
    }

    pub fn pop_top(&mut self) {
        self.emit(TargetOp::PopTop);
        self.update_stack_depth(-1);
    }

    pub fn dup_top(&mut self) {
        self.emit(TargetOp::DupTop);
        self.update_stack_depth(1);
    }

    pub fn dup_topx(&mut self, count: u16) -> Result<(), TranslateError> {
        self.emit(TargetOp::DupTopX);
        self.write_value(count as u32)?;
        self.update_stack_depth(count as i32);
        Ok(())
    }

    pub fn rot_two(&mut self) {
        self.emit(TargetOp::RotTwo);
    }

    pub fn rot_three(&mut self) {
        self.emit(TargetOp::RotThree);
    }

    pub fn rot_four(&mut self) {
        self.emit(TargetOp::RotFour);
    }

    pub fn call_function(&mut self, count: u16) -> Result<(), TranslateError> {
        self.emit(TargetOp::CallFunction);
        self.write_value(count as u32)?;
        self.update_stack_depth(-(count as i32));
        Ok(())
    }

    /// Call with a trailing argument tuple on the stack.
    pub fn call_function_var(&mut self, count: u16) -> Result<(), TranslateError> {
        self.emit(TargetOp::CallFunctionVar);
        self.write_value(count as u32)?;
        self.update_stack_depth(-(count as i32) - 1);
        Ok(())
    }

    pub fn unpack_sequence(&mut self, count: u16) -> Result<(), TranslateError> {
        self.emit(TargetOp::UnpackSequence);
        self.write_value(count as u32)
    }

    // Arithmetic and comparison.

    pub fn binary_add(&mut self) {
        self.emit(TargetOp::BinaryAdd);
        self.update_stack_depth(-1);
    }

    pub fn binary_subtract(&mut self) {
        self.emit(TargetOp::BinarySubtract);
        self.update_stack_depth(-1);
    }

    pub fn binary_multiply(&mut self) {
        self.emit(TargetOp::BinaryMultiply);
        self.update_stack_depth(-1);
    }

    pub fn binary_divide(&mut self) {
        self.emit(TargetOp::BinaryDivide);
        self.update_stack_depth(-1);
    }

    pub fn binary_modulo(&mut self) {
        self.emit(TargetOp::BinaryModulo);
        self.update_stack_depth(-1);
    }

    pub fn binary_subscr(&mut self) {
        self.emit(TargetOp::BinarySubscr);
        self.update_stack_depth(-1);
    }

    pub fn binary_and(&mut self) {
        self.emit(TargetOp::BinaryAnd);
        self.update_stack_depth(-1);
    }

    pub fn binary_or(&mut self) {
        self.emit(TargetOp::BinaryOr);
        self.update_stack_depth(-1);
    }

    pub fn binary_xor(&mut self) {
        self.emit(TargetOp::BinaryXor);
        self.update_stack_depth(-1);
    }

    pub fn binary_lshift(&mut self) {
        self.emit(TargetOp::BinaryLshift);
        self.update_stack_depth(-1);
    }

    pub fn binary_rshift(&mut self) {
        self.emit(TargetOp::BinaryRshift);
        self.update_stack_depth(-1);
    }

    pub fn store_subscr(&mut self) {
        self.emit(TargetOp::StoreSubscr);
        self.update_stack_depth(-3);
    }

    pub fn unary_negative(&mut self) {
        self.emit(TargetOp::UnaryNegative);
    }

    pub fn slice_0(&mut self) {
        self.emit(TargetOp::SliceZero);
    }

    pub fn slice_1(&mut self) {
        self.emit(TargetOp::SliceOne);
    }

    pub fn compare_op(&mut self, op: CompareKind) -> Result<(), TranslateError> {
        self.emit(TargetOp::CompareOp);
        self.write_value(op as u32)?;
        self.update_stack_depth(-1);
        Ok(())
    }

    // Flow termination.

    pub fn get_iter(&mut self) {
        self.emit(TargetOp::GetIter);
    }

    pub fn return_value(&mut self) {
        self.emit(TargetOp::ReturnValue);
        self.update_stack_depth(-1);
    }

    pub fn raise_varargs(&mut self, count: u16) -> Result<(), TranslateError> {
        self.emit(TargetOp::RaiseVarargs);
        self.write_value(count as u32)
    }

    pub fn pop_block(&mut self) {
        self.emit(TargetOp::PopBlock);
    }

    pub fn end_finally(&mut self) {
        self.emit(TargetOp::EndFinally);
    }

    /// Finalise the routine. Every label and exception offset must be
    /// resolved by now; return-address constants are rewritten to the
    /// positions their labels were bound to.
    pub fn finish(
        mut self,
        name: &str,
        filename: &str,
        argcount: u16,
        varnames: Vec<String>,
    ) -> Result<CodeBlob, TranslateError> {
        if let Some(label) = self.jumps.keys().next() {
            return Err(TranslateError::UnresolvedLabel(label.clone()));
        }
        if let Some(label) = self.pending_absolute.keys().next() {
            return Err(TranslateError::UnresolvedTarget(*label));
        }
        if !self.exception_offsets.is_empty() || !self.exception_handlers.is_empty() {
            return Err(TranslateError::BlockUnderflow("finish"));
        }

        let mut constants = Vec::with_capacity(self.constants.len());
        for constant in std::mem::take(&mut self.constants) {
            constants.push(match constant {
                TargetConst::ReturnAddress(label) => {
                    let position = self
                        .label_position(label)
                        .ok_or(TranslateError::UnresolvedTarget(label))?;
                    TargetConst::Int(position as i64)
                }
                other => other,
            });
        }

        trace!(
            "finished {name}: {} bytes, {} constants, {} names, stack bound {}",
            self.output.len(),
            constants.len(),
            self.names.len(),
            self.max_stack_depth
        );

        Ok(CodeBlob {
            name: name.to_string(),
            filename: filename.to_string(),
            argcount,
            nlocals: self.max_locals + 1,
            max_stack: self.max_stack_depth.max(0) as u16,
            code: self.output,
            constants,
            names: self.names,
            varnames,
            external_names: self.external_names,
        })
    }
}

/// Decode an emitted stream into `(position, opcode, operand)` triples.
/// Diagnostics and tests use this to check patched offsets.
pub fn disassemble(code: &[u8]) -> Vec<(usize, TargetOp, Option<u16>)> {
    let mut out = Vec::new();
    let mut position = 0;
    while position < code.len() {
        let Some(op) = TargetOp::from_byte(code[position]) else {
            break;
        };
        if op.has_operand() {
            let operand = u16::from_le_bytes([code[position + 1], code[position + 2]]);
            out.push((position, op, Some(operand)));
            position += 3;
        } else {
            out.push((position, op, None));
            position += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_threshold_splits_the_repertoire() {
        assert!(!TargetOp::PopTop.has_operand());
        assert!(!TargetOp::EndFinally.has_operand());
        assert!(TargetOp::UnpackSequence.has_operand());
        assert!(TargetOp::LoadConst.has_operand());
        assert!(TargetOp::CallFunctionVar.has_operand());
    }

    #[test]
    fn forward_named_label_gets_a_relative_offset() {
        let mut w = TargetWriter::new();
        w.load_const(TargetConst::Int(1)).unwrap();
        w.jump_to_label(Some(false), "skip").unwrap();
        let following = w.position();
        w.pop_top();
        w.pop_top();
        w.start_label("skip").unwrap();
        let target = w.position();
        w.pop_top();
        let blob = w.finish("t", "t.java", 0, vec![]).unwrap();

        let listing = disassemble(&blob.code);
        let (_, op, operand) = listing[1];
        assert_eq!(op, TargetOp::JumpIfFalse);
        assert_eq!(operand, Some((target - following) as u16));
    }

    #[test]
    fn absolute_label_jump_is_patched_when_bound() {
        let mut w = TargetWriter::new();
        w.jump_absolute_label(40).unwrap();
        w.pop_top();
        w.bind_label(40).unwrap();
        let bound = w.position();
        w.return_value();
        let blob = w.finish("t", "t.java", 0, vec![]).unwrap();

        let listing = disassemble(&blob.code);
        assert_eq!(listing[0].1, TargetOp::JumpAbsolute);
        assert_eq!(listing[0].2, Some(bound as u16));
    }

    #[test]
    fn backward_absolute_label_is_written_immediately() {
        let mut w = TargetWriter::new();
        w.bind_label(0).unwrap();
        w.pop_top();
        w.jump_absolute_label(0).unwrap();
        let blob = w.finish("t", "t.java", 0, vec![]).unwrap();
        let listing = disassemble(&blob.code);
        assert_eq!(listing[1].2, Some(0));
    }

    #[test]
    fn unbound_label_fails_at_finish() {
        let mut w = TargetWriter::new();
        w.jump_absolute_label(99).unwrap();
        assert!(matches!(
            w.finish("t", "t.java", 0, vec![]),
            Err(TranslateError::UnresolvedTarget(99))
        ));
    }

    #[test]
    fn exception_setup_offsets_point_at_their_handlers() {
        let mut w = TargetWriter::new();
        let setup_position = w.position();
        w.setup_except(8).unwrap();
        w.load_const(TargetConst::Int(0)).unwrap();
        w.pop_top();
        w.end_exception().unwrap();
        w.bind_label(8).unwrap();
        let handler = w.position();
        w.pop_top();
        w.end_exceptions().unwrap();
        let blob = w.finish("t", "t.java", 0, vec![]).unwrap();

        let listing = disassemble(&blob.code);
        assert_eq!(listing[0].1, TargetOp::SetupExcept);
        assert_eq!(listing[0].2, Some((handler - setup_position - 3) as u16));
    }

    #[test]
    fn constants_and_names_intern_in_insertion_order() {
        let mut w = TargetWriter::new();
        w.load_const(TargetConst::Int(5)).unwrap();
        w.load_const(TargetConst::Str("x".into())).unwrap();
        w.load_const(TargetConst::Int(5)).unwrap();
        w.load_global("len").unwrap();
        w.load_attr("append").unwrap();
        w.load_global("len").unwrap();
        w.return_value();
        let blob = w.finish("t", "t.java", 0, vec![]).unwrap();

        assert_eq!(
            blob.constants,
            vec![TargetConst::Int(5), TargetConst::Str("x".into())]
        );
        assert_eq!(blob.names, vec!["len".to_string(), "append".to_string()]);

        let listing = disassemble(&blob.code);
        assert_eq!(listing[0].2, Some(0));
        assert_eq!(listing[2].2, Some(0)); // the re-used Int(5)
    }

    #[test]
    fn negative_zero_interns_apart_from_zero() {
        let mut w = TargetWriter::new();
        w.load_const(TargetConst::Float(0.0)).unwrap();
        w.load_const(TargetConst::Float(-0.0)).unwrap();
        let blob = w.finish("t", "t.java", 0, vec![]).unwrap();
        assert_eq!(blob.constants.len(), 2);
    }

    #[test]
    fn stack_depth_bound_tracks_the_high_water_mark() {
        let mut w = TargetWriter::new();
        w.load_const(TargetConst::Int(1)).unwrap();
        w.load_const(TargetConst::Int(2)).unwrap();
        w.load_const(TargetConst::Int(3)).unwrap();
        w.build_tuple(3).unwrap();
        w.return_value();
        let blob = w.finish("t", "t.java", 0, vec![]).unwrap();
        assert_eq!(blob.max_stack, 3);
    }

    #[test]
    fn locals_bound_comes_from_the_highest_slot() {
        let mut w = TargetWriter::new();
        w.load_fast(0).unwrap();
        w.store_fast(4).unwrap();
        let blob = w.finish("t", "t.java", 1, vec![]).unwrap();
        assert_eq!(blob.nlocals, 5);
    }

    #[test]
    fn oversized_operands_are_rejected() {
        let mut w = TargetWriter::new();
        assert!(matches!(
            w.write_value(0x1_0000),
            Err(TranslateError::ValueOverflow(0x1_0000))
        ));
        w.write_value(0xFFFF).unwrap();
    }

    #[test]
    fn return_address_constants_resolve_to_bound_positions() {
        let mut w = TargetWriter::new();
        w.load_const_ret(12).unwrap();
        w.store_fast(1).unwrap();
        w.bind_label(12).unwrap();
        let bound = w.position();
        w.ret(1).unwrap();
        w.return_value();
        let blob = w.finish("t", "t.java", 0, vec![]).unwrap();
        assert_eq!(blob.constants[0], TargetConst::Int(bound as i64));
    }

    #[test]
    fn loop_frames_patch_their_deltas() {
        let mut w = TargetWriter::new();
        w.build_list(0).unwrap();
        w.setup_loop().unwrap();
        w.load_global("range").unwrap();
        w.load_const(TargetConst::Int(3)).unwrap();
        w.call_function(1).unwrap();
        w.get_iter();
        let iter_position = w.position();
        w.for_iter().unwrap();
        w.pop_top();
        w.end_loop().unwrap();
        let blob = w.finish("t", "t.java", 0, vec![]).unwrap();

        let listing = disassemble(&blob.code);
        let (for_position, op, operand) = *listing
            .iter()
            .find(|(_, op, _)| *op == TargetOp::ForIter)
            .unwrap();
        assert_eq!(for_position, iter_position);
        assert_eq!(op, TargetOp::ForIter);
        // The loop body jumps back to for_iter; its exhaustion delta
        // lands just past that jump and the trailing pop_block.
        let jump_back = listing
            .iter()
            .find(|(_, op, _)| *op == TargetOp::JumpAbsolute)
            .unwrap();
        assert_eq!(jump_back.2, Some(iter_position as u16));
        let delta = operand.unwrap() as usize;
        assert!(iter_position + 3 + delta <= blob.code.len());
    }
}
