//! Resolves a CLI `PATH` argument to a list of `.jack` inputs, and runs
//! Tokenizer -> SymbolTable -> CompilationEngine -> VmWriter over each,
//! one sibling `.vm` file at a time.

use crate::engine::CompilationEngine;
use crate::error::{CompileError, Result};
use crate::tokenizer::Tokenizer;
use crate::vm_writer::VmWriter;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Compile every `.jack` file found at `path`, returning the number of
/// files successfully compiled. `path` may be a single `.jack` file or a
/// directory; directories are scanned at their top level only, not
/// recursively.
pub fn run(path: &Path) -> Result<usize> {
    let inputs = collect_inputs(path)?;
    let mut compiled = 0;
    for input in &inputs {
        compile_file(input)?;
        compiled += 1;
    }
    Ok(compiled)
}

fn collect_inputs(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_dir() {
        let mut files = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let p = entry.path();
            if p.is_file() && p.extension().is_some_and(|e| e == "jack") {
                files.push(p);
            }
        }
        files.sort();
        Ok(files)
    } else {
        Ok(vec![path.to_path_buf()])
    }
}

/// Compile one `.jack` file to its sibling `.vm` file. On any fatal
/// error the partially-written output is removed rather than left
/// truncated on disk.
fn compile_file(input: &Path) -> Result<()> {
    let output_path = input.with_extension("vm");
    tracing::info!(file = %input.display(), "compiling");

    let source = fs::read_to_string(input)?;
    let result = (|| -> Result<()> {
        let tokenizer = Tokenizer::new(&source)?;
        let file = File::create(&output_path)?;
        let writer = VmWriter::new(file);
        let mut engine = CompilationEngine::new(tokenizer, writer);
        engine.compile_class()
    })();

    if let Err(err) = &result {
        tracing::debug!(file = %input.display(), error = %err, "compilation failed, removing partial output");
        let _ = fs::remove_file(&output_path);
    }
    result
}

/// Validate that `path` exists before handing it to [`run`], so the CLI
/// can report a clean I/O error rather than an empty-directory no-op.
pub fn validate_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(CompileError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_jack(dir: &Path, name: &str, body: &str) -> PathBuf {
        let p = dir.join(name);
        let mut f = File::create(&p).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        p
    }

    #[test]
    fn compiles_single_file_to_sibling_vm() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_jack(
            dir.path(),
            "Main.jack",
            "class Main { function void main() { return; } }",
        );
        let compiled = run(&input).unwrap();
        assert_eq!(compiled, 1);
        let vm = fs::read_to_string(dir.path().join("Main.vm")).unwrap();
        assert_eq!(vm, "function Main.main 0\npush constant 0\nreturn\n");
    }

    #[test]
    fn directory_scan_is_top_level_only() {
        let dir = tempfile::tempdir().unwrap();
        write_jack(
            dir.path(),
            "A.jack",
            "class A { function void f() { return; } }",
        );
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        write_jack(
            &nested,
            "B.jack",
            "class B { function void f() { return; } }",
        );

        let compiled = run(dir.path()).unwrap();
        assert_eq!(compiled, 1);
        assert!(dir.path().join("A.vm").exists());
        assert!(!nested.join("B.vm").exists());
    }

    #[test]
    fn fatal_error_leaves_no_partial_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_jack(dir.path(), "Bad.jack", "class Bad { let x = 1; }");
        let err = run(&input).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Structural { .. } | CompileError::Semantic { .. }
        ));
        assert!(!dir.path().join("Bad.vm").exists());
    }

    #[test]
    fn missing_path_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("Nope.jack");
        let err = validate_path(&missing).unwrap_err();
        assert!(matches!(err, CompileError::Io(_)));
    }
}
