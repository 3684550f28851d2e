//! End-to-end coverage of the `ouifs-admin` CLI driving a real on-disk
//! image: init, populate through the core directly, then exercise every
//! subcommand against it. Grounded on the teacher's own
//! `assert_cmd`-based `tests/integration.rs`, scaled down from a FUSE mount
//! harness to plain subprocess invocations since there is no mountpoint to
//! stand up here.

use std::process::Command;

use assert_cmd::cargo::CommandCargoExt;
use ouifs_core::Ufs;
use tempfile::NamedTempFile;

struct Hooks;
impl ouifs_core::VfsHooks for Hooks {
    fn freeze_fs(&mut self) -> std::io::Result<()> {
        Ok(())
    }
    fn thaw_fs(&mut self) -> std::io::Result<()> {
        Ok(())
    }
    fn foreach_cached_inode(&mut self, _f: &mut dyn FnMut(ouifs_core::InodeNum)) {}
    fn invalidate_page_cache(&mut self, _ino: ouifs_core::InodeNum) {}
    fn refill_inode_metadata(&mut self, _ino: ouifs_core::InodeNum) {}
    fn shrink_dentry_cache(&mut self) {}
    fn evict_unused_inodes(&mut self) {}
}

fn admin(device: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("ouifs-admin").unwrap();
    cmd.arg(device);
    cmd
}

#[test]
fn init_formats_a_fresh_image() {
    let img = NamedTempFile::new().unwrap();
    let out = admin(img.path())
        .args(["init", "--size", "4194304", "--inodes", "128"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(std::fs::metadata(img.path()).unwrap().len() >= 4194304);
}

#[test]
fn ls_lists_a_populated_root() {
    let img = NamedTempFile::new().unwrap();
    let path = img.path().to_path_buf();
    std::fs::remove_file(&path).unwrap();
    let fs = Ufs::format(&path, 4 * 1024 * 1024, 128, Hooks).unwrap();
    let root = fs.root();
    let a = fs.create(root, "a.txt").unwrap();
    fs.write(a, 0, b"hello").unwrap();
    fs.mkdir(root, "sub").unwrap();
    drop(fs);

    let out = admin(&path).args(["ls", "/"]).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("a.txt"));
    assert!(stdout.contains("sub/"));
}

#[test]
fn cat_prints_file_contents() {
    let img = NamedTempFile::new().unwrap();
    let path = img.path().to_path_buf();
    std::fs::remove_file(&path).unwrap();
    let fs = Ufs::format(&path, 4 * 1024 * 1024, 128, Hooks).unwrap();
    let root = fs.root();
    let a = fs.create(root, "a.txt").unwrap();
    fs.write(a, 0, b"hello, world").unwrap();
    drop(fs);

    let out = admin(&path).args(["cat", "/a.txt"]).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"hello, world");
}

#[test]
fn snapshot_create_then_list_then_delete() {
    let img = NamedTempFile::new().unwrap();
    let path = img.path().to_path_buf();
    std::fs::remove_file(&path).unwrap();
    Ufs::format(&path, 4 * 1024 * 1024, 128, Hooks).unwrap();

    let out = admin(&path).args(["snapshot", "create"]).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("created snapshot 1"));

    let out = admin(&path).args(["snapshot", "list"]).output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).starts_with("1: "));

    let out = admin(&path).args(["snapshot", "delete", "1"]).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let out = admin(&path).args(["snapshot", "list"]).output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).is_empty());
}

#[test]
fn snapshot_restore_brings_back_deleted_file() {
    let img = NamedTempFile::new().unwrap();
    let path = img.path().to_path_buf();
    std::fs::remove_file(&path).unwrap();
    let fs = Ufs::format(&path, 4 * 1024 * 1024, 128, Hooks).unwrap();
    let root = fs.root();
    fs.create(root, "keep.txt").unwrap();
    drop(fs);

    admin(&path).args(["snapshot", "create", "--id", "7"]).output().unwrap();

    let fs = Ufs::open(&path, true, Hooks).unwrap();
    fs.unlink(fs.root(), "keep.txt").unwrap();
    drop(fs);

    let out = admin(&path).args(["ls", "/"]).output().unwrap();
    assert!(!String::from_utf8_lossy(&out.stdout).contains("keep.txt"));

    let out = admin(&path).args(["snapshot", "restore", "7"]).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let out = admin(&path).args(["ls", "/"]).output().unwrap();
    assert!(String::from_utf8_lossy(&out.stdout).contains("keep.txt"));
}

#[test]
fn stat_reports_size_and_kind() {
    let img = NamedTempFile::new().unwrap();
    let path = img.path().to_path_buf();
    std::fs::remove_file(&path).unwrap();
    let fs = Ufs::format(&path, 4 * 1024 * 1024, 128, Hooks).unwrap();
    let root = fs.root();
    let a = fs.create(root, "a.txt").unwrap();
    fs.write(a, 0, b"12345").unwrap();
    drop(fs);

    let out = admin(&path).args(["stat", "/a.txt"]).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("kind:   file"));
    assert!(stdout.contains("size:   5"));
}
