//! Decode Java class files and translate their bytecode for a simpler
//! stack-based virtual machine.
//!
//! The decoder (`classfile`, `constant_pool`, `attributes`) round-trips
//! class images byte-for-byte. The translator (`translate`, `target`)
//! rewrites each method's stack code into the target machine's
//! repertoire, rebuilding structured exception regions from the flat
//! handler table and patching branch offsets that are only known once
//! later instructions have been emitted. `dispatch` adds the per-name
//! trampolines that pick between overloads at call time, and `jar`
//! feeds whole archives through the decoder.
pub mod attributes;
pub mod bytecode;
pub mod classfile;
pub mod constant_pool;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod jar;
pub mod reader;
pub mod target;
pub mod translate;
