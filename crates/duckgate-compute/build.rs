use std::env;

fn main() {
    // SAFETY: build scripts are single-threaded.
    unsafe {
        env::set_var("PROTOC", protobuf_src::protoc());
    }

    tonic_build::configure()
        .emit_rerun_if_changed(false)
        .compile_protos(&["proto/compute.proto"], &["proto"])
        .unwrap();

    println!("cargo:rerun-if-changed=proto/compute.proto");
}
