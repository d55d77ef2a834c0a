#![allow(dead_code)]

#[path = "../../src/pki_generator.rs"]
pub mod pki_generator;

use pki_generator::{Issued, Pki};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A root, intermediate and leaf hierarchy plus a scratch directory for targets.
pub struct Workspace {
    pub dir: TempDir,
    pub root: Issued,
    pub intermediate: Issued,
    pub leaf: Issued,
}

impl Workspace {
    pub fn new(leaf_cn: &str) -> Self {
        let pki = Pki::new();
        let root = pki.root("Integration Root CA").unwrap();
        let intermediate = pki.intermediate("Integration Intermediate CA", &root).unwrap();
        let leaf = pki.leaf(leaf_cn, &intermediate).unwrap();
        Workspace {
            dir: TempDir::new().unwrap(),
            root,
            intermediate,
            leaf,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

pub fn pem(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap()
}

/// `field = '''<pem>'''` for embedding material in TOML.
pub fn toml_literal(field: &str, content: &str) -> String {
    format!("{} = '''\n{}'''\n", field, content)
}

pub fn toml_path(field: &str, path: &Path) -> String {
    format!("{} = \"{}\"\n", field, path.display())
}
