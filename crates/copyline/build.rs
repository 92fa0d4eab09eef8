// Build provenance for `copyline version --extended`.
fn main() {
    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    // Cargo exposes each enabled feature as CARGO_FEATURE_<NAME>.
    let mut features: Vec<String> = std::env::vars()
        .filter_map(|(key, _)| {
            key.strip_prefix("CARGO_FEATURE_")
                .map(|name| name.to_ascii_lowercase().replace('_', "-"))
        })
        .collect();
    features.sort();

    println!("cargo:rustc-env=COPYLINE_BUILD_TARGET={target}");
    println!("cargo:rustc-env=COPYLINE_BUILD_PROFILE={profile}");
    println!("cargo:rustc-env=COPYLINE_BUILD_FEATURES={}", features.join(","));
    println!("cargo:rerun-if-changed=build.rs");
}
