/// Builds the gRPC client and server code for `proto/flake.proto`.
///
/// Generated modules land in `OUT_DIR` together with an encoded file
/// descriptor set, which the server registers for gRPC reflection.
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("flake");
///     pub const FILE_DESCRIPTOR_SET: &[u8] =
///         tonic::include_file_descriptor_set!("flake_descriptor");
/// }
/// ```
///
/// # Panics
///
/// Panics if code generation fails.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("flake_descriptor.bin");

    println!("cargo:rerun-if-changed=proto/flake.proto");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/flake.proto"], &["proto"])
        .unwrap();
}
