//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "build"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Build metadata emission for version reporting."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Source tarballs carry no git metadata; vergen falls back to idempotent values.
    EmitBuilder::builder()
        .all_build()
        .all_cargo()
        .all_git()
        .emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=UPKEEP_GIT_OVERRIDE");
    Ok(())
}
