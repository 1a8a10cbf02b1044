use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    let build_id = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| format!("{:x}-{:x}", d.as_secs(), d.subsec_nanos()))
        .unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=WAYPOINT_BUILD_ID={build_id}");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
}
