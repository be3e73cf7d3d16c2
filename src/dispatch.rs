//! Overload dispatchers.
//!
//! Java exposes several methods under one name; the host runtime sees
//! one mangled routine per overload. For every Java-visible name this
//! module produces either an alias (single overload) or a trampoline
//! routine that inspects the runtime argument types and forwards to
//! the first overload whose parameter types all match.
use log::trace;

use crate::descriptor;
use crate::error::TranslateError;
use crate::target::{CodeBlob, CompareKind, TargetConst, TargetWriter};
use crate::translate::{load_class_name, make_varnames, TranslatedMethod};

/// How a Java-visible name reaches its overloads.
#[derive(Debug, Clone)]
pub enum Dispatcher {
    /// One overload: the visible name is simply the mangled routine.
    Alias { name: String, target: String },
    /// Several overloads: a trampoline picks one at call time.
    Trampoline { name: String, blob: CodeBlob },
}

impl Dispatcher {
    pub fn name(&self) -> &str {
        match self {
            Self::Alias { name, .. } => name,
            Self::Trampoline { name, .. } => name,
        }
    }
}

/// The local slot holding the match flag inside a trampoline: slot 1
/// for static dispatch (arguments sit in slot 0), slot 2 otherwise
/// (receiver in 0, arguments in 1).
fn found_slot(is_static: bool) -> u16 {
    if is_static {
        1
    } else {
        2
    }
}

/// Build dispatchers for every Java-visible method name of a class.
/// Class initialisers never dispatch; they are invoked by the loader.
pub fn make_dispatchers(
    class_name: &str,
    filename: &str,
    methods: &[TranslatedMethod],
) -> Result<Vec<Dispatcher>, TranslateError> {
    let mut groups: Vec<(String, Vec<&TranslatedMethod>)> = Vec::new();
    for method in methods {
        if method.java_name == "<clinit>" {
            continue;
        }
        let visible = if method.java_name == "<init>" {
            "__init__".to_string()
        } else {
            method.java_name.clone()
        };
        match groups.iter_mut().find(|(name, _)| *name == visible) {
            Some((_, members)) => members.push(method),
            None => groups.push((visible, vec![method])),
        }
    }

    let mut dispatchers = Vec::with_capacity(groups.len());
    for (name, members) in groups {
        if members.len() == 1 {
            dispatchers.push(Dispatcher::Alias {
                name,
                target: members[0].mangled_name.clone(),
            });
            continue;
        }
        trace!("dispatching {} overloads of {class_name}.{name}", members.len());
        let blob = make_trampoline(class_name, filename, &name, &members)?;
        dispatchers.push(Dispatcher::Trampoline { name, blob });
    }
    Ok(dispatchers)
}

/// Emit the trampoline body. For each candidate overload: pair the
/// argument tuple with the candidate's parameter types, walk the
/// pairs, and bail to the next candidate when an argument is missing,
/// a parameter type is unknown, or an `isinstance` check fails.
fn make_trampoline(
    class_name: &str,
    filename: &str,
    name: &str,
    members: &[&TranslatedMethod],
) -> Result<CodeBlob, TranslateError> {
    let mut w = TargetWriter::new();
    // Constructors dispatch through the instance even when flagged
    // static; otherwise one static overload makes the set static.
    let is_static = name != "__init__" && members.iter().any(|m| m.is_static);
    let found = found_slot(is_static);

    for member in members {
        let (params, _) = descriptor::parse_method(&member.descriptor)?;

        if is_static {
            w.load_fast(0)?; //               Stack: arguments
        } else {
            w.load_fast(1)?;
        }
        w.setup_loop()?;
        w.load_const(TargetConst::Int(1))?;
        w.store_fast(found)?; //              found = 1

        // The candidate's parameter types, paired against the
        // arguments below.
        for param in &params {
            w.load_global(&param.host_type_name())?;
        }
        w.build_list(params.len() as u16)?; // Stack: arguments, types
        w.load_const(TargetConst::Null)?;
        w.rot_three(); //                     Stack: null, arguments, types
        w.build_tuple(3)?;
        w.load_global("map")?;
        w.rot_two();
        w.call_function_var(0)?; //           Stack: pairs
        w.get_iter(); //                      Stack: iter
        w.for_iter()?; //                     Stack: iter, (argument, type)
        w.unpack_sequence(2)?; //             Stack: iter, type, argument
        w.dup_top();
        w.load_const(TargetConst::Null)?;
        w.compare_op(CompareKind::Is)?;
        // Fewer arguments than parameters: no match.
        w.jump_to_label(Some(false), "present")?;
        w.pop_top();
        w.pop_top();
        w.pop_top(); //                       Stack: iter
        w.load_const(TargetConst::Int(0))?;
        w.store_fast(found)?; //              found = 0
        w.break_loop()?;
        w.start_label("present")?;
        w.pop_top(); //                       Stack: iter, type, argument
        w.rot_two(); //                       Stack: iter, argument, type
        w.dup_top();
        w.load_const(TargetConst::Null)?;
        w.compare_op(CompareKind::Is)?;
        // More arguments than parameters: no match.
        w.jump_to_label(Some(false), "present")?;
        w.pop_top();
        w.pop_top();
        w.pop_top(); //                       Stack: iter
        w.load_const(TargetConst::Int(0))?;
        w.store_fast(found)?;
        w.break_loop()?;
        w.start_label("present")?;
        w.pop_top(); //                       Stack: iter, argument, type
        w.build_tuple(2)?;
        w.load_global("isinstance")?;
        w.rot_two();
        w.call_function_var(0)?; //           Stack: iter, result
        w.jump_to_label(Some(true), "match")?;
        w.pop_top();
        w.load_const(TargetConst::Int(0))?;
        w.store_fast(found)?;
        w.break_loop()?;
        w.start_label("match")?;
        w.pop_top(); //                       Stack: iter
        w.end_loop()?;

        // Every pair matched; forward the call.
        w.load_fast(found)?;
        w.jump_to_label(Some(false), "failed")?;
        w.pop_top();
        if is_static {
            w.load_fast(0)?; //               Stack: arguments
            load_class_name(class_name, class_name, &mut w)?;
        } else {
            w.load_fast(1)?; //               Stack: arguments
            w.load_fast(0)?; //               Stack: arguments, self
        }
        w.load_attr(&member.mangled_name)?; // Stack: arguments, method
        w.rot_two(); //                       Stack: method, arguments
        w.call_function_var(0)?;
        w.return_value();
        w.start_label("failed")?;
        w.pop_top();
    }

    // No overload matched.
    w.load_const(TargetConst::Str("No matching method".to_string()))?;
    w.raise_varargs(1)?;
    w.load_const(TargetConst::Null)?;
    w.return_value();

    let argcount = if is_static { 0 } else { 1 };
    let nlocals = w.nlocals();
    let varnames = make_varnames(nlocals, is_static);
    w.finish(name, filename, argcount, varnames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{disassemble, TargetOp};

    fn method(java_name: &str, descriptor: &str, is_static: bool) -> TranslatedMethod {
        let (params, _) = descriptor::parse_method(descriptor).unwrap();
        let mangled_name = descriptor::mangle_method_name(java_name, &params);
        let blob = TargetWriter::new()
            .finish(&mangled_name, "T.java", 0, vec![])
            .unwrap();
        TranslatedMethod {
            java_name: java_name.to_string(),
            mangled_name,
            descriptor: descriptor.to_string(),
            is_static,
            parameter_count: params.len(),
            blob,
        }
    }

    #[test]
    fn single_overload_becomes_an_alias() {
        let methods = vec![method("run", "()V", false)];
        let dispatchers = make_dispatchers("T", "T.java", &methods).unwrap();
        assert_eq!(dispatchers.len(), 1);
        match &dispatchers[0] {
            Dispatcher::Alias { name, target } => {
                assert_eq!(name, "run");
                assert_eq!(target, "run");
            }
            other => panic!("expected alias, got {other:?}"),
        }
    }

    #[test]
    fn overload_sets_get_a_trampoline() {
        let methods = vec![
            method("get", "(I)I", false),
            method("get", "(Ljava/lang/String;)I", false),
        ];
        let dispatchers = make_dispatchers("T", "T.java", &methods).unwrap();
        assert_eq!(dispatchers.len(), 1);
        let blob = match &dispatchers[0] {
            Dispatcher::Trampoline { name, blob } => {
                assert_eq!(name, "get");
                blob
            }
            other => panic!("expected trampoline, got {other:?}"),
        };

        // The type-matching loop leans on the host's map and
        // isinstance plus both mangled overload names.
        assert!(blob.names.contains(&"map".to_string()));
        assert!(blob.names.contains(&"isinstance".to_string()));
        assert!(blob.names.contains(&"get____I_".to_string()));
        assert!(blob
            .names
            .contains(&"get___java__lang__String".to_string()));
        assert!(blob.names.contains(&"int".to_string()));
        assert!(blob.names.contains(&"java.lang.String".to_string()));

        // Instance dispatch: one declared parameter (the receiver).
        assert_eq!(blob.argcount, 1);
        assert_eq!(blob.varnames[0], "self");

        let ops: Vec<TargetOp> = disassemble(&blob.code)
            .into_iter()
            .map(|(_, op, _)| op)
            .collect();
        assert!(ops.contains(&TargetOp::ForIter));
        assert!(ops.contains(&TargetOp::UnpackSequence));
        assert!(ops.contains(&TargetOp::BreakLoop));
        assert!(ops.contains(&TargetOp::RaiseVarargs));
    }

    #[test]
    fn mangled_names_stay_unique_across_an_overload_set() {
        let methods = [
            method("get", "()V", false),
            method("get", "(I)I", false),
            method("get", "(J)I", false),
            method("get", "([I)I", false),
            method("get", "(Ljava/lang/String;I)I", false),
            method("get", "(ILjava/lang/String;)I", false),
        ];
        for (i, a) in methods.iter().enumerate() {
            for b in &methods[i + 1..] {
                assert_ne!(a.mangled_name, b.mangled_name);
            }
        }
    }

    #[test]
    fn static_overloads_dispatch_through_the_class() {
        let methods = vec![
            method("of", "(I)LBox;", true),
            method("of", "(D)LBox;", true),
        ];
        let dispatchers = make_dispatchers("Box", "Box.java", &methods).unwrap();
        let blob = match &dispatchers[0] {
            Dispatcher::Trampoline { blob, .. } => blob,
            other => panic!("expected trampoline, got {other:?}"),
        };
        assert_eq!(blob.argcount, 0);
        assert_eq!(blob.varnames[0], "cls");
        // Same-package class loads resolve through the bare name.
        assert!(blob.names.contains(&"Box".to_string()));
    }

    #[test]
    fn constructors_group_under_the_initialiser_name() {
        let methods = vec![
            method("<init>", "()V", false),
            method("<init>", "(I)V", false),
        ];
        let dispatchers = make_dispatchers("T", "T.java", &methods).unwrap();
        assert_eq!(dispatchers[0].name(), "__init__");
        assert!(matches!(dispatchers[0], Dispatcher::Trampoline { .. }));
    }

    #[test]
    fn class_initialisers_are_not_dispatched() {
        let methods = vec![method("<clinit>", "()V", true)];
        let dispatchers = make_dispatchers("T", "T.java", &methods).unwrap();
        assert!(dispatchers.is_empty());
    }
}
