//! Build script for llama-bridge.
//!
//! The default build uses the in-process stub backend and links nothing.
//! With the `native` feature, the crate links a prebuilt shim library
//! (`libllama-bridge`) that wraps llama.cpp behind four C entry points:
//!
//! ```text
//! int64_t llama_bridge_init(const char* path, int n_threads, int n_ctx);
//! char*   llama_bridge_generate(int64_t ctx, const char* prompt, int n_predict, float temperature);
//! void    llama_bridge_string_free(char* s);
//! void    llama_bridge_free(int64_t ctx);
//! ```
//!
//! Point `LLAMA_BRIDGE_LIB_DIR` at the directory holding the library
//! (for Android, the per-ABI `jniLibs` output of the NDK build).

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=LLAMA_BRIDGE_LIB_DIR");

    if std::env::var_os("CARGO_FEATURE_NATIVE").is_some() {
        match std::env::var("LLAMA_BRIDGE_LIB_DIR") {
            Ok(dir) => println!("cargo:rustc-link-search=native={dir}"),
            Err(_) => println!(
                "cargo:warning=native feature enabled without LLAMA_BRIDGE_LIB_DIR; relying on the default linker search path"
            ),
        }
        println!("cargo:rustc-link-lib=dylib=llama-bridge");
    }
}
