//! Direct dependencies of `package.json` manifests

use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use stackscore_core::{Error, Result};
use std::fs;
use std::path::Path;

const MANIFEST_NAME: &str = "package.json";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    dependencies: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    dev_dependencies: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    peer_dependencies: IndexMap<String, serde_json::Value>,
}

impl Manifest {
    fn names(&self) -> impl Iterator<Item = &String> {
        self.dependencies
            .keys()
            .chain(self.dev_dependencies.keys())
            .chain(self.peer_dependencies.keys())
    }
}

/// Union of `dependencies`, `devDependencies` and `peerDependencies` across
/// every manifest, in first-seen order.
pub fn read_direct_deps<P: AsRef<Path>>(paths: &[P]) -> Result<IndexSet<String>> {
    let mut deps = IndexSet::new();

    for path in paths {
        let path = path.as_ref();
        let is_manifest = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(MANIFEST_NAME));
        if !is_manifest {
            return Err(Error::manifest(
                path,
                format!("You should provide a {MANIFEST_NAME}"),
            ));
        }

        let contents =
            fs::read(path).map_err(|e| Error::file_system(path, "read manifest", e))?;
        let manifest: Manifest = serde_json::from_slice(&contents)
            .map_err(|e| Error::manifest(path, e.to_string()))?;

        deps.extend(manifest.names().cloned());
    }

    Ok(deps)
}
