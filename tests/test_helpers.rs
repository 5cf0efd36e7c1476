// Test helpers for isolated testing
// Provides a fake Nix install and a scripted Runner so the packaging
// pipeline can run without Nix, rpmbuild or the Apple packaging tools
#![allow(dead_code)]

use nix2pkg::config::Settings;
use nix2pkg::{Result, Runner, ToolCommand, ToolOutput};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const HASH_C: &str = "cccccccccccccccccccccccccccccccc";
pub const HASH_D: &str = "dddddddddddddddddddddddddddddddd";

/// Isolated Nix install using temporary directories
/// Automatically cleaned up when dropped (RAII pattern)
///
/// Layout:
/// - temp/
///   - nix/store/   (fake store paths)
///   - home/        (HOME for profile links)
///   - work/        (specs, build results, output)
pub struct TestStore {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub store: PathBuf,
    pub home: PathBuf,
    pub work: PathBuf,
}

impl TestStore {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("nix");
        let store = root.join("store");
        let home = temp_dir.path().join("home");
        let work = temp_dir.path().join("work");

        fs::create_dir_all(&store).unwrap();
        fs::create_dir_all(&home).unwrap();
        fs::create_dir_all(&work).unwrap();

        Self {
            temp_dir,
            root,
            store,
            home,
            work,
        }
    }

    /// Settings pointing at this store, on an x86_64 host
    pub fn settings(&self) -> Settings {
        let vars: HashMap<&str, String> = HashMap::from([
            ("HOME", self.home.display().to_string()),
            ("NIX2PKG_ROOT", self.root.display().to_string()),
            ("NIX2PKG_ARCH", "x86_64".to_string()),
            ("NIX2PKG_NIX_PACKAGE", format!("{}-nix-2.19.2", HASH_D)),
        ]);
        Settings::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    /// Create a store directory `<hash>-<name>` with a file inside
    pub fn add_store_path(&self, hash: &str, name: &str) -> PathBuf {
        let path = self.store.join(format!("{}-{}", hash, name));
        fs::create_dir_all(path.join("bin")).unwrap();
        fs::write(path.join("bin").join(name), format!("#!/bin/sh\necho {}\n", name)).unwrap();
        path
    }

    /// Create a plain-file store entry `<hash>-<name>`
    pub fn add_store_file(&self, hash: &str, name: &str) -> PathBuf {
        let path = self.store.join(format!("{}-{}", hash, name));
        fs::write(&path, "export FOO=1\n").unwrap();
        path
    }

    /// Minimal nixpkgs checkout under the work directory
    pub fn nixpkgs_root(&self) -> PathBuf {
        let root = self.work.join("nix_repo/nixpkgs-test");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("default.nix"), "{}").unwrap();
        root
    }

    /// Spec files written so far, sorted
    pub fn spec_files(&self) -> Vec<PathBuf> {
        let dir = self.work.join("packages");
        if !dir.exists() {
            return vec![];
        }
        let mut specs: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "spec"))
            .collect();
        specs.sort();
        specs
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Runner that answers Nix queries from tables and fakes the packaging tools
#[derive(Default)]
pub struct FakeRunner {
    /// `nix-store --query --requisites <path>` answers, keyed by path
    pub requisites: HashMap<String, Vec<PathBuf>>,
    /// `nix-store --query --references <path>` answers, keyed by path
    pub references: HashMap<String, Vec<PathBuf>>,
    /// Store path each build attribute produces
    pub build_outputs: HashMap<String, PathBuf>,
    /// rpmbuild fails for spec files whose name contains this
    pub fail_rpm_for: Option<String>,
    pub fail_pkgbuild: bool,
    pub fail_productbuild: bool,
    pub calls: RefCell<Vec<ToolCommand>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `attr` as building `output`, whose closure is `closure`
    pub fn with_build(mut self, attr: &str, output: &Path, closure: &[&Path]) -> Self {
        self.build_outputs
            .insert(attr.to_string(), output.to_path_buf());
        self.requisites.insert(
            output.display().to_string(),
            closure.iter().map(|p| p.to_path_buf()).collect(),
        );
        self
    }

    pub fn with_references(mut self, path: &Path, refs: &[&Path]) -> Self {
        self.references.insert(
            path.display().to_string(),
            refs.iter().map(|p| p.to_path_buf()).collect(),
        );
        self
    }

    /// Command lines of every call of `program`
    pub fn calls_to(&self, program: &str) -> Vec<ToolCommand> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.program_name() == program)
            .cloned()
            .collect()
    }

    fn arg_after<'c>(cmd: &'c ToolCommand, flag: &str) -> Option<&'c str> {
        let args = cmd.get_args();
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    fn ok(stdout: String) -> ToolOutput {
        ToolOutput {
            code: Some(0),
            stdout,
            stderr: String::new(),
        }
    }

    fn failed() -> ToolOutput {
        ToolOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "fake failure".to_string(),
        }
    }

    fn fake_rpmbuild(&self, cmd: &ToolCommand) -> bool {
        let args = cmd.get_args();
        let spec = PathBuf::from(args.last().unwrap());
        let spec_name = spec.file_name().unwrap().to_string_lossy().into_owned();
        if let Some(fail) = &self.fail_rpm_for {
            if spec_name.contains(fail.as_str()) {
                return false;
            }
        }

        let arch = Self::arg_after(cmd, "--target").unwrap();
        let rpmdir = args
            .iter()
            .find_map(|a| a.strip_prefix("_rpmdir "))
            .unwrap();
        let contents = fs::read_to_string(&spec).unwrap();
        let name = contents
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("Name: "))
            .unwrap();
        let out = Path::new(rpmdir).join(arch);
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join(format!("{}-1-0.{}.rpm", name, arch)), "rpm").unwrap();
        true
    }

    fn fake_nix_build(&self, cmd: &ToolCommand) -> bool {
        let attr = cmd.get_args().last().unwrap();
        let out_link = Self::arg_after(cmd, "-o").unwrap();
        match self.build_outputs.get(attr) {
            Some(output) => {
                std::os::unix::fs::symlink(output, out_link).unwrap();
                true
            }
            None => false,
        }
    }
}

impl Runner for FakeRunner {
    fn query(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
        self.calls.borrow_mut().push(cmd.clone());
        let args = cmd.get_args();
        let output = match (cmd.program_name(), args.get(1).map(String::as_str)) {
            ("nix-store", Some(kind @ ("--requisites" | "--references"))) => {
                let table = if kind == "--requisites" {
                    &self.requisites
                } else {
                    &self.references
                };
                let paths = table.get(args[2].as_str()).cloned().unwrap_or_default();
                let lines: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                Self::ok(lines.join("\n"))
            }
            _ => Self::ok(String::new()),
        };
        Ok(output)
    }

    fn build(&self, cmd: &ToolCommand) -> Result<bool> {
        self.calls.borrow_mut().push(cmd.clone());
        let ok = match cmd.program_name() {
            "nix" => self.fake_nix_build(cmd),
            "rpmbuild" => self.fake_rpmbuild(cmd),
            _ => true,
        };
        Ok(ok)
    }

    fn assemble(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
        self.calls.borrow_mut().push(cmd.clone());
        let fail = match cmd.program_name() {
            "pkgbuild" => self.fail_pkgbuild,
            "productbuild" => self.fail_productbuild,
            _ => false,
        };
        if fail {
            return Ok(Self::failed());
        }
        if let Some(target) = cmd.get_args().last() {
            if target.ends_with(".pkg") {
                fs::write(target, "xar").unwrap();
            }
        }
        Ok(Self::ok(String::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_creates_directories() {
        let env = TestStore::new();
        assert!(env.store.exists());
        assert!(env.home.exists());
        assert!(env.work.exists());
    }

    #[test]
    fn test_store_cleanup() {
        let store_path = {
            let env = TestStore::new();
            env.store.clone()
        };
        assert!(!store_path.exists());
    }

    #[test]
    fn test_settings_point_at_store() {
        let env = TestStore::new();
        let settings = env.settings();
        assert_eq!(settings.layout.store(), env.store);
        assert_eq!(settings.home, env.home);
    }
}
