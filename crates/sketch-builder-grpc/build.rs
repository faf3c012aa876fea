// Uses protox (pure Rust protobuf compiler) to avoid requiring an external protoc binary
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // protox doesn't emit rerun-if-changed on its own
    println!("cargo:rerun-if-changed=proto/sketch_builder.proto");

    let file_descriptors = protox::compile(["proto/sketch_builder.proto"], ["proto"])?;
    tonic_build::configure()
        .build_server(true)
        .build_client(true) // Used by the CLI and the tests
        .compile_fds(file_descriptors)?;
    Ok(())
}
