fn main() {
    println!("cargo:rerun-if-env-changed=EJABBERD_RECONCILE_VERSION");
    if let Ok(version) = std::env::var("EJABBERD_RECONCILE_VERSION") {
        println!("cargo:rustc-env=CARGO_PKG_VERSION={version}");
    }
}
