fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/remote_exec.proto");
    tonic_build::compile_protos("proto/remote_exec.proto")?;
    Ok(())
}
