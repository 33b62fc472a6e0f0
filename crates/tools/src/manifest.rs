//! The bundled tool manifests.

use std::sync::LazyLock;

use toolwright_core::tool::Manifest;

const M365_MANIFEST_JSON: &str = include_str!("m365/manifest.json");
const POSTGRES_MANIFEST_JSON: &str = include_str!("postgres/manifest.json");

static M365_MANIFEST: LazyLock<Manifest> = LazyLock::new(|| {
    serde_json::from_str(M365_MANIFEST_JSON).expect("bundled m365 manifest is valid")
});
static POSTGRES_MANIFEST: LazyLock<Manifest> = LazyLock::new(|| {
    serde_json::from_str(POSTGRES_MANIFEST_JSON).expect("bundled postgres manifest is valid")
});

pub const M365_NAMESPACE: &str = "m365";
pub const POSTGRES_NAMESPACE: &str = "postgres";

/// A fresh copy of the `m365` manifest.
pub fn m365_manifest() -> Manifest {
    M365_MANIFEST.clone()
}

/// A fresh copy of the `postgres` manifest, all nine tools.
pub fn postgres_manifest() -> Manifest {
    POSTGRES_MANIFEST.clone()
}
