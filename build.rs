use std::{env, path::PathBuf};

const DYLIB_SOURCE: &str = "test-dylib/hello.c";
const DYLIB_NAME: &str = "libdlinject_hello.so";

/// Builds the fixture library the injection tests load into a child process.
fn compile_test_dylib(out_dir: &PathBuf) -> Result<PathBuf, String> {
    let output = out_dir.join(DYLIB_NAME);
    let compiler = cc::Build::new()
        .cargo_metadata(false)
        .try_get_compiler()
        .map_err(|e| e.to_string())?;
    let mut cmd = compiler.to_command();
    cmd.arg("-shared")
        .arg("-fPIC")
        .arg("-O1")
        .arg("-o")
        .arg(&output)
        .arg(DYLIB_SOURCE);
    let status = cmd
        .status()
        .map_err(|e| format!("could not run {:?}: {e}", compiler.path()))?;
    if !status.success() {
        return Err(format!("{cmd:?} exited with {status}"));
    }
    Ok(output)
}

fn main() {
    println!("cargo:rerun-if-changed={DYLIB_SOURCE}");
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("linux") {
        return;
    }
    let Some(out_dir) = env::var_os("OUT_DIR").map(PathBuf::from) else {
        return;
    };
    match compile_test_dylib(&out_dir) {
        Ok(path) => println!("cargo:rustc-env=DLINJECT_TEST_DYLIB={}", path.display()),
        Err(e) => println!("cargo:warning=test dylib not built, injection fixture tests will skip: {e}"),
    }
}
