/// Builds the gRPC client and server code for `proto/blobrelay.proto` using
/// `tonic-prost-build`.
///
/// # Byte Field Optimization
///
/// Every binary field on the wire is marked with `.bytes(...)` so it is
/// deserialized as `Bytes` (from the `bytes` crate) instead of `Vec<u8>`.
/// Payloads can be several kilobytes each, and `Bytes` lets the relay hand a
/// decoded frame to the store and back out again without copying.
///
/// # Output
///
/// Generated code is included via:
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("blobrelay.v1");
/// }
/// ```
///
/// A file descriptor set is also emitted for gRPC reflection.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("blobrelay_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([
            ".blobrelay.v1.StoreRequest.encoded_payload",
            ".blobrelay.v1.StoreResponse.id",
            ".blobrelay.v1.RetrieveResponse.payload",
        ])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/blobrelay.proto"], &["proto"])
        .unwrap();
}
