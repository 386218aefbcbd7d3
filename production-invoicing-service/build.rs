use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    let mut includes = vec![PathBuf::from("../proto")];

    // Fall back to the vendored protoc (and its well-known types) when the
    // host has none configured.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", protoc);
        }
        if let Ok(include) = protoc_bin_vendored::include_path() {
            includes.push(include);
        }
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("production_invoicing_descriptor.bin"))
        .compile_protos(
            &["../proto/millwork/production_invoicing/v1/production_invoicing.proto"],
            includes.as_slice(),
        )?;

    println!(
        "cargo:rerun-if-changed=../proto/millwork/production_invoicing/v1/production_invoicing.proto"
    );

    Ok(())
}
