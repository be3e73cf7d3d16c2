use std::env;
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use log::{error, info, warn};

use crema::classfile::ClassFile;
use crema::jar;
use crema::translate::ClassTranslator;

/// Translate one decoded class and report what came out. When the raw
/// input bytes are at hand, check the decode-encode round trip too.
fn translate_class(origin: &str, class: &ClassFile, data: Option<&[u8]>) -> bool {
    if data.is_some_and(|data| class.serialize() != data) {
        warn!("{origin}: re-encoded image differs from input");
    }
    match ClassTranslator::new(class).translate() {
        Ok(translated) => {
            let code_bytes: usize = translated
                .methods
                .iter()
                .map(|method| method.blob.code.len())
                .sum();
            info!(
                "{}: {} methods, {} dispatchers, {} external names, {code_bytes} bytes of code",
                translated.class_name,
                translated.methods.len(),
                translated.dispatchers.len(),
                translated.external_names.len(),
            );
            true
        }
        Err(err) => {
            error!("{origin}: {err}");
            false
        }
    }
}

fn process(path: &Path) -> bool {
    if path.extension().is_some_and(|ext| ext == "jar") {
        let classes = match jar::jar_classes(path) {
            Ok(classes) => classes,
            Err(err) => {
                error!("{}: {err}", path.display());
                return false;
            }
        };
        let mut ok = true;
        for (entry, class) in classes {
            ok &= translate_class(&entry, &class, None);
        }
        ok
    } else {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) => {
                error!("{}: {err}", path.display());
                return false;
            }
        };
        let class = match ClassFile::parse(&data) {
            Ok(class) => class,
            Err(err) => {
                error!("{}: {err}", path.display());
                return false;
            }
        };
        translate_class(&path.display().to_string(), &class, Some(&data))
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: crema <class-or-jar> ...");
        return ExitCode::FAILURE;
    }
    let mut ok = true;
    for path in &paths {
        ok &= process(Path::new(path));
    }
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
