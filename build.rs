// Link search path for the DeepStream metadata library.
fn main() {
    println!("cargo:rerun-if-env-changed=DEEPSTREAM_LIB_DIR");
    if std::env::var_os("CARGO_FEATURE_DEEPSTREAM").is_none() {
        return;
    }
    let dir = std::env::var("DEEPSTREAM_LIB_DIR")
        .unwrap_or_else(|_| "/opt/nvidia/deepstream/deepstream/lib".to_string());
    println!("cargo:rustc-link-search=native={dir}");
}
