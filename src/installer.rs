//! Runtime bootstrap and removal.
//!
//! `prepare` unpacks a binary Nix release archive and moves its store into
//! the install root; `destroy` takes everything back out again.
//!
//! ```text
//! <work>/nix-2.19.2-aarch64-darwin.tar.xz     archive (downloaded or given)
//! <work>/nix-2.19.2-aarch64-darwin/           extracted, removed afterwards
//!   .reginfo                                  fed to nix-store --load-db
//!   store/<hash>-<name>/                      moved into <root>/store
//! ```

use crate::config::Settings;
use crate::error::{Nix2PkgError, Result};
use crate::nix::Nix;
use crate::paths::NIX_CONF_CONTENTS;
use crate::process::{Runner, ToolCommand};
use anyhow::Context;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const ARCHIVE_EXTENSION: &str = ".tar.xz";

/// Upper bound on `chown -R` over the whole store
pub const OWN_STORE_TIMEOUT: Duration = Duration::from_secs(300);

/// Directory an archive extracts to, next to the archive in `work_dir`
pub fn extracted_dir(archive: &Path, work_dir: &Path) -> Result<PathBuf> {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name
        .strip_suffix(ARCHIVE_EXTENSION)
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| Nix2PkgError::WrongArchiveType(archive.to_path_buf()))?;
    Ok(work_dir.join(stem))
}

/// Everything `destroy` would delete, split by where it lives
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovalPlan {
    pub home_files: Vec<PathBuf>,
    pub state_dirs: Vec<PathBuf>,
    pub store_entries: Vec<PathBuf>,
}

impl RemovalPlan {
    pub fn is_empty(&self) -> bool {
        self.home_files.is_empty() && self.state_dirs.is_empty() && self.store_entries.is_empty()
    }
}

pub struct Installer<'a> {
    runner: &'a dyn Runner,
    settings: &'a Settings,
}

impl<'a> Installer<'a> {
    pub fn new(runner: &'a dyn Runner, settings: &'a Settings) -> Self {
        Self { runner, settings }
    }

    /// Extract `archive` into `work_dir` with `tar -xJf`, returning the extracted directory
    pub fn untar_archive(&self, archive: &Path, work_dir: &Path) -> Result<PathBuf> {
        let extracted = extracted_dir(archive, work_dir)?;
        if extracted.exists() {
            debug!("Removing previous extraction: {}", extracted.display());
            fs::remove_dir_all(&extracted)
                .with_context(|| format!("Failed to remove {}", extracted.display()))?;
        }
        fs::create_dir_all(work_dir)?;

        let cmd = ToolCommand::new("tar")
            .arg("-xJf")
            .arg_path(archive)
            .arg("-C")
            .arg_path(work_dir);
        if !self.runner.build(&cmd)? {
            return Err(Nix2PkgError::ToolFailed {
                program: "tar".to_string(),
                code: 1,
            });
        }
        if !extracted.is_dir() {
            return Err(anyhow::anyhow!(
                "Archive did not extract to {}",
                extracted.display()
            )
            .into());
        }
        Ok(extracted)
    }

    /// Move the extracted store into the install root and write `nix.conf`
    pub fn install_files(&self, extracted: &Path) -> Result<()> {
        let layout = &self.settings.layout;
        if !layout.root().is_dir() {
            return Err(Nix2PkgError::NixMissing(layout.root().to_path_buf()));
        }

        let config_file = layout.config_file();
        if let Some(parent) = config_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&config_file, NIX_CONF_CONTENTS)
            .with_context(|| format!("Failed to write {}", config_file.display()))?;

        let store = layout.store();
        if store.is_dir() {
            debug!("Store directory already exists");
        } else {
            fs::create_dir(&store)
                .with_context(|| format!("Failed to create store: {}", store.display()))?;
            info!("Created store directory {}", store.display());
        }

        let fresh = extracted.join("store");
        let mut entries: Vec<PathBuf> = fs::read_dir(&fresh)
            .with_context(|| format!("Failed to read {}", fresh.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        entries.sort();

        for entry in entries {
            let Some(name) = entry.file_name() else {
                continue;
            };
            let dest = store.join(name);
            if dest.symlink_metadata().is_ok() {
                debug!("Already exists: {}", dest.display());
                continue;
            }
            self.move_entry(&entry, &dest)?;
        }

        for entry in store_entries(&store)? {
            if let Err(e) = set_tree_mode(&entry, 0o555) {
                debug!("chmod 555 failed on {}: {}", entry.display(), e);
            }
        }
        Ok(())
    }

    fn move_entry(&self, src: &Path, dest: &Path) -> Result<()> {
        if fs::rename(src, dest).is_ok() {
            return Ok(());
        }
        // rename fails across filesystems
        let cmd = ToolCommand::new("mv").arg_path(src).arg_path(dest);
        if !self.runner.build(&cmd)? {
            return Err(Nix2PkgError::ToolFailed {
                program: "mv".to_string(),
                code: 1,
            });
        }
        Ok(())
    }

    /// Full bootstrap from an archive; the extracted tree is always removed
    pub fn install(&self, nix: &Nix<'_>, archive: &Path, work_dir: &Path) -> Result<()> {
        let extracted = extracted_dir(archive, work_dir)?;
        let result = self
            .untar_archive(archive, work_dir)
            .and_then(|dir| {
                self.install_files(&dir)?;
                nix.initial_setup(&dir)
            });
        clean_install_files(&extracted, None);
        result
    }

    /// What `removal` would delete right now
    pub fn removal_plan(&self) -> Result<RemovalPlan> {
        let mut plan = RemovalPlan::default();
        let channels = self.settings.user_channels();
        if channels.exists() {
            plan.home_files.push(channels);
        }
        let profile = self.settings.user_profile();
        if profile
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
        {
            plan.home_files.push(profile);
        }
        let defexpr = self.settings.user_defexpr();
        if defexpr.is_dir() {
            plan.home_files.push(defexpr);
        }

        for dir in [self.settings.layout.var(), self.settings.layout.conf()] {
            if dir.exists() {
                plan.state_dirs.push(dir);
            }
        }

        let store = self.settings.layout.store();
        if store.is_dir() {
            plan.store_entries = store_entries(&store)?;
        }
        Ok(plan)
    }

    /// Delete the runtime, its state and the user's profile links.
    ///
    /// Individual failures are logged and skipped; returns the number of
    /// paths that could not be removed.
    pub fn removal(&self) -> Result<usize> {
        let plan = self.removal_plan()?;
        let mut failed = 0;

        info!("Removing Nix files in home directory");
        for path in &plan.home_files {
            failed += usize::from(!remove_path(path));
        }

        info!("Removing state and config directories");
        for dir in &plan.state_dirs {
            failed += usize::from(!remove_path(dir));
        }

        info!("Removing {} store entries", plan.store_entries.len());
        for entry in &plan.store_entries {
            if let Err(e) = add_tree_write(entry) {
                debug!("chmod +w failed on {}: {}", entry.display(), e);
            }
            failed += usize::from(!remove_path(entry));
        }
        Ok(failed)
    }

    /// Hand the store to `user:wheel` so rpmbuild/pkgbuild can read it
    pub fn own_store(&self, user: &str) -> Result<bool> {
        let cmd = ToolCommand::new("sudo")
            .args(["chown", "-H", "-R"])
            .arg(format!("{}:wheel", user))
            .arg_path(&self.settings.layout.store())
            .timeout(OWN_STORE_TIMEOUT);
        info!("Changing store owner to {}", user);
        Ok(self.runner.assemble(&cmd)?.success())
    }
}

/// Remove the extracted tree and, when given, the downloaded archive
pub fn clean_install_files(extracted: &Path, archive: Option<&Path>) {
    if extracted.exists() {
        let _ = add_tree_write(extracted);
        if let Err(e) = fs::remove_dir_all(extracted) {
            warn!("Failed to remove {}: {}", extracted.display(), e);
        }
    }
    if let Some(archive) = archive {
        if archive.exists() {
            if let Err(e) = fs::remove_file(archive) {
                warn!("Failed to remove {}: {}", archive.display(), e);
            }
        }
    }
}

fn store_entries(store: &Path) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(store)
        .with_context(|| format!("Failed to read store: {}", store.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    Ok(entries)
}

/// `chmod -R <mode>`, leaving symlinks alone
fn set_tree_mode(root: &Path, mode: u32) -> std::io::Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_symlink() {
            continue;
        }
        fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// `chmod -R u+w`, leaving symlinks alone
fn add_tree_write(root: &Path) -> std::io::Result<()> {
    if root.symlink_metadata()?.file_type().is_symlink() {
        return Ok(());
    }
    // Parents first so their children become reachable for writing
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_symlink() {
            continue;
        }
        let mut perms = entry.metadata().map_err(std::io::Error::other)?.permissions();
        perms.set_mode(perms.mode() | 0o200);
        fs::set_permissions(entry.path(), perms)?;
    }
    Ok(())
}

fn remove_path(path: &Path) -> bool {
    let result = match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return true,
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::NixLayout;
    use crate::platform::HostArch;
    use crate::process::ToolOutput;
    use std::cell::RefCell;

    struct Recorder {
        ok: bool,
        calls: RefCell<Vec<String>>,
    }

    impl Recorder {
        fn new(ok: bool) -> Self {
            Self {
                ok,
                calls: RefCell::new(vec![]),
            }
        }
    }

    impl Runner for Recorder {
        fn query(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
            self.calls.borrow_mut().push(cmd.command_line());
            Ok(ToolOutput {
                code: Some(if self.ok { 0 } else { 1 }),
                ..ToolOutput::default()
            })
        }

        fn build(&self, cmd: &ToolCommand) -> Result<bool> {
            self.calls.borrow_mut().push(cmd.command_line());
            Ok(self.ok)
        }

        fn assemble(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
            self.query(cmd)
        }
    }

    fn settings(root: &Path, home: &Path) -> Settings {
        Settings {
            arch: HostArch::Aarch64,
            layout: NixLayout::new(root, "aaa-nix", "bbb-cacert"),
            home: home.to_path_buf(),
            proxy: None,
            release_url: None,
        }
    }

    #[test]
    fn test_extracted_dir_requires_tar_xz() {
        let work = Path::new("/work");
        assert_eq!(
            extracted_dir(Path::new("/dl/nix-2.19.tar.xz"), work).unwrap(),
            PathBuf::from("/work/nix-2.19")
        );
        assert!(matches!(
            extracted_dir(Path::new("/dl/nix-2.19.tar.gz"), work),
            Err(Nix2PkgError::WrongArchiveType(_))
        ));
        assert!(matches!(
            extracted_dir(Path::new("/dl/.tar.xz"), work),
            Err(Nix2PkgError::WrongArchiveType(_))
        ));
    }

    #[test]
    fn test_untar_rejects_wrong_extension_before_running_tar() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Recorder::new(true);
        let settings = settings(dir.path(), dir.path());
        let installer = Installer::new(&runner, &settings);
        assert!(installer.untar_archive(Path::new("nix.zip"), dir.path()).is_err());
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_untar_command() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Recorder::new(false);
        let settings = settings(dir.path(), dir.path());
        let installer = Installer::new(&runner, &settings);
        let archive = dir.path().join("nix.tar.xz");
        assert!(matches!(
            installer.untar_archive(&archive, dir.path()),
            Err(Nix2PkgError::ToolFailed { .. })
        ));
        assert_eq!(
            runner.calls.borrow()[0],
            format!("tar -xJf {} -C {}", archive.display(), dir.path().display())
        );
    }

    #[test]
    fn test_install_files_requires_root() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Recorder::new(true);
        let settings = settings(&dir.path().join("missing"), dir.path());
        let installer = Installer::new(&runner, &settings);
        assert!(matches!(
            installer.install_files(dir.path()),
            Err(Nix2PkgError::NixMissing(_))
        ));
    }

    #[test]
    fn test_install_files_moves_new_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nix");
        fs::create_dir_all(root.join("store/existing-pkg")).unwrap();
        fs::write(root.join("store/existing-pkg/marker"), "old").unwrap();

        let extracted = dir.path().join("nix-release");
        fs::create_dir_all(extracted.join("store/existing-pkg")).unwrap();
        fs::write(extracted.join("store/existing-pkg/marker"), "new").unwrap();
        fs::create_dir_all(extracted.join("store/fresh-pkg/bin")).unwrap();
        fs::write(extracted.join("store/fresh-pkg/bin/tool"), "x").unwrap();

        let runner = Recorder::new(true);
        let settings = settings(&root, dir.path());
        let installer = Installer::new(&runner, &settings);
        installer.install_files(&extracted).unwrap();

        assert_eq!(
            fs::read_to_string(root.join("conf/nix/nix.conf")).unwrap(),
            "build-users-group ="
        );
        assert_eq!(fs::read_to_string(root.join("store/existing-pkg/marker")).unwrap(), "old");
        assert!(root.join("store/fresh-pkg/bin/tool").is_file());
        assert!(!extracted.join("store/fresh-pkg").exists());

        let mode = fs::metadata(root.join("store/fresh-pkg/bin/tool"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o555);

        // Leave the sandbox removable
        add_tree_write(&root.join("store/fresh-pkg")).unwrap();
        add_tree_write(&root.join("store/existing-pkg")).unwrap();
    }

    #[test]
    fn test_removal_plan_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nix");
        let home = dir.path().join("home");
        fs::create_dir_all(home.join(".nix-defexpr/channels")).unwrap();
        fs::write(home.join(".nix-channels"), "").unwrap();
        std::os::unix::fs::symlink("/nowhere", home.join(".nix-profile")).unwrap();
        fs::create_dir_all(root.join("var/nix/profiles")).unwrap();
        fs::create_dir_all(root.join("conf/nix")).unwrap();
        fs::create_dir_all(root.join("store/aaa-pkg/lib")).unwrap();
        fs::write(root.join("store/aaa-pkg/lib/libx.dylib"), "").unwrap();
        set_tree_mode(&root.join("store/aaa-pkg"), 0o555).unwrap();

        let runner = Recorder::new(true);
        let settings = settings(&root, &home);
        let installer = Installer::new(&runner, &settings);

        let plan = installer.removal_plan().unwrap();
        assert_eq!(plan.home_files.len(), 3);
        assert_eq!(plan.state_dirs, vec![root.join("var"), root.join("conf")]);
        assert_eq!(plan.store_entries, vec![root.join("store/aaa-pkg")]);

        assert_eq!(installer.removal().unwrap(), 0);
        assert!(installer.removal_plan().unwrap().is_empty());
        assert!(root.join("store").is_dir());
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_own_store_command() {
        let runner = Recorder::new(true);
        let settings = settings(Path::new("/nix"), Path::new("/home/me"));
        let installer = Installer::new(&runner, &settings);
        assert!(installer.own_store("builder").unwrap());
        assert_eq!(
            runner.calls.borrow()[0],
            "sudo chown -H -R builder:wheel /nix/store"
        );
    }

    #[test]
    fn test_clean_install_files() {
        let dir = tempfile::tempdir().unwrap();
        let extracted = dir.path().join("nix-release");
        fs::create_dir_all(extracted.join("store")).unwrap();
        let archive = dir.path().join("nix-release.tar.xz");
        fs::write(&archive, "").unwrap();

        clean_install_files(&extracted, None);
        assert!(!extracted.exists());
        assert!(archive.exists());

        clean_install_files(&extracted, Some(&archive));
        assert!(!archive.exists());
    }
}
