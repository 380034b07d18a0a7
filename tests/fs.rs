//! Engine-level scenarios against images in a temporary directory.

use logfs::fs::{FileSystem, FsError};
use logfs::layout::{BLOCK_SIZE, CR_SIZE, DIR_ENTRIES, NDIRECT, SHARD_INODES, T_DIR, T_FILE};
use std::mem::size_of;
use std::path::PathBuf;
use tempfile::TempDir;

fn new_image(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    (dir, path)
}

#[test]
fn fresh_image_has_root() {
    let (_dir, path) = new_image("fresh.img");
    let mut fs = FileSystem::open(&path).unwrap();

    let stat = fs.stat(0).unwrap();
    assert_eq!(stat.itype, T_DIR);
    assert_eq!(stat.size, BLOCK_SIZE as i32);

    assert_eq!(fs.lookup(0, b".").unwrap(), 0);
    assert_eq!(fs.lookup(0, b"..").unwrap(), 0);

    // CR, root block, root inode, shard 0.
    let expected = CR_SIZE
        + BLOCK_SIZE
        + size_of::<logfs::layout::Inode>()
        + size_of::<logfs::layout::ImapShard>();
    assert_eq!(fs.end_of_log(), expected as i32);
}

#[test]
fn creat_assigns_smallest_inum() {
    let (_dir, path) = new_image("inums.img");
    let mut fs = FileSystem::open(&path).unwrap();

    fs.creat(0, T_DIR, b"a").unwrap();
    fs.creat(0, T_FILE, b"b").unwrap();
    assert_eq!(fs.lookup(0, b"a").unwrap(), 1);
    assert_eq!(fs.lookup(0, b"b").unwrap(), 2);

    // Freeing inum 1 makes it the next assignment even with 2 still live.
    fs.unlink(0, b"a").unwrap();
    fs.creat(0, T_FILE, b"c").unwrap();
    assert_eq!(fs.lookup(0, b"c").unwrap(), 1);
    assert_eq!(fs.lookup(0, b"b").unwrap(), 2);
}

#[test]
fn subdirectory_dots() {
    let (_dir, path) = new_image("dots.img");
    let mut fs = FileSystem::open(&path).unwrap();

    fs.creat(0, T_DIR, b"a").unwrap();
    let inum = fs.lookup(0, b"a").unwrap();
    let stat = fs.stat(inum).unwrap();
    assert_eq!(stat.itype, T_DIR);
    assert_eq!(stat.size, BLOCK_SIZE as i32);

    assert_eq!(fs.lookup(inum, b".").unwrap(), inum);
    assert_eq!(fs.lookup(inum, b"..").unwrap(), 0);
}

#[test]
fn write_read_roundtrip() {
    let (_dir, path) = new_image("rw.img");
    let mut fs = FileSystem::open(&path).unwrap();

    fs.creat(0, T_FILE, b"f").unwrap();
    let inum = fs.lookup(0, b"f").unwrap();

    let x = [0xab; BLOCK_SIZE];
    fs.write(inum, 0, &x).unwrap();
    let mut buf = [0; BLOCK_SIZE];
    fs.read(inum, 0, &mut buf).unwrap();
    assert_eq!(buf, x);

    let stat = fs.stat(inum).unwrap();
    assert_eq!(stat.itype, T_FILE);
    assert_eq!(stat.size, BLOCK_SIZE as i32);
}

#[test]
fn sparse_write_sets_size_from_block_index() {
    let (_dir, path) = new_image("sparse.img");
    let mut fs = FileSystem::open(&path).unwrap();

    fs.creat(0, T_FILE, b"f").unwrap();
    let inum = fs.lookup(0, b"f").unwrap();

    let x = [0xab; BLOCK_SIZE];
    let y = [0xcd; BLOCK_SIZE];
    fs.write(inum, 0, &x).unwrap();
    fs.write(inum, 3, &y).unwrap();
    assert_eq!(fs.stat(inum).unwrap().size, 4 * BLOCK_SIZE as i32);

    let mut buf = [0; BLOCK_SIZE];
    fs.read(inum, 3, &mut buf).unwrap();
    assert_eq!(buf, y);
    fs.read(inum, 0, &mut buf).unwrap();
    assert_eq!(buf, x);

    // A never-written slot reads back as success without touching the
    // caller's buffer.
    let mut buf = [0x55; BLOCK_SIZE];
    fs.read(inum, 1, &mut buf).unwrap();
    assert_eq!(buf, [0x55; BLOCK_SIZE]);
}

#[test]
fn rejects_bad_arguments() {
    let (_dir, path) = new_image("args.img");
    let mut fs = FileSystem::open(&path).unwrap();

    assert!(matches!(fs.stat(-1), Err(FsError::InvalidArgument)));
    assert!(matches!(fs.stat(4096), Err(FsError::InvalidArgument)));
    assert!(matches!(fs.stat(55), Err(FsError::NotFound)));

    fs.creat(0, T_FILE, b"f").unwrap();
    let inum = fs.lookup(0, b"f").unwrap();
    let block = [0; BLOCK_SIZE];
    assert!(matches!(
        fs.write(inum, NDIRECT as i32, &block),
        Err(FsError::InvalidArgument)
    ));
    assert!(matches!(
        fs.write(inum, -1, &block),
        Err(FsError::InvalidArgument)
    ));
    let mut buf = [0; BLOCK_SIZE];
    assert!(matches!(
        fs.read(inum, NDIRECT as i32, &mut buf),
        Err(FsError::InvalidArgument)
    ));

    // Directories take no direct writes, and files resolve no names.
    assert!(matches!(fs.write(0, 0, &block), Err(FsError::TypeMismatch)));
    assert!(matches!(fs.lookup(inum, b"x"), Err(FsError::TypeMismatch)));
    assert!(matches!(
        fs.creat(inum, T_FILE, b"x"),
        Err(FsError::TypeMismatch)
    ));

    let long = [b'n'; 28];
    assert!(matches!(
        fs.creat(0, T_FILE, &long),
        Err(FsError::InvalidArgument)
    ));
    assert!(matches!(fs.creat(0, 7, b"t"), Err(FsError::InvalidArgument)));
}

#[test]
fn creat_and_unlink_are_idempotent() {
    let (_dir, path) = new_image("idem.img");
    let mut fs = FileSystem::open(&path).unwrap();

    fs.creat(0, T_DIR, b"a").unwrap();
    let inum = fs.lookup(0, b"a").unwrap();
    // A second create of the same name changes nothing, whatever the type.
    fs.creat(0, T_DIR, b"a").unwrap();
    fs.creat(0, T_FILE, b"a").unwrap();
    assert_eq!(fs.lookup(0, b"a").unwrap(), inum);
    assert_eq!(fs.stat(inum).unwrap().itype, T_DIR);

    fs.unlink(0, b"a").unwrap();
    fs.unlink(0, b"a").unwrap();
    assert!(matches!(fs.lookup(0, b"a"), Err(FsError::NotFound)));
}

#[test]
fn unlink_refuses_populated_directory() {
    let (_dir, path) = new_image("nonempty.img");
    let mut fs = FileSystem::open(&path).unwrap();

    fs.creat(0, T_DIR, b"x").unwrap();
    let x = fs.lookup(0, b"x").unwrap();
    fs.creat(x, T_FILE, b"f").unwrap();

    assert!(matches!(fs.unlink(0, b"x"), Err(FsError::NotEmpty)));
    fs.unlink(x, b"f").unwrap();
    fs.unlink(0, b"x").unwrap();
    assert!(matches!(fs.lookup(0, b"x"), Err(FsError::NotFound)));
}

#[test]
fn unlink_drops_emptied_shard() {
    let (_dir, path) = new_image("shards.img");
    let mut fs = FileSystem::open(&path).unwrap();

    // Inums 1..=16; the last one opens shard 1.
    for i in 1..=SHARD_INODES {
        let name = format!("f{i}");
        fs.creat(0, T_FILE, name.as_bytes()).unwrap();
    }
    let last = format!("f{SHARD_INODES}");
    let inum = fs.lookup(0, last.as_bytes()).unwrap();
    assert_eq!(inum, SHARD_INODES as i32);

    fs.unlink(0, last.as_bytes()).unwrap();
    assert!(matches!(fs.stat(inum), Err(FsError::NotFound)));

    // The slot is reassigned through a fresh shard.
    fs.creat(0, T_FILE, b"again").unwrap();
    assert_eq!(fs.lookup(0, b"again").unwrap(), inum);
}

#[test]
fn directory_grows_block_by_block() {
    let (_dir, path) = new_image("grow.img");
    let mut fs = FileSystem::open(&path).unwrap();

    // Block 0 already holds "." and "..": filling it takes 126 entries.
    for i in 0..DIR_ENTRIES - 2 {
        let name = format!("f{i}");
        fs.creat(0, T_FILE, name.as_bytes()).unwrap();
    }
    assert_eq!(fs.stat(0).unwrap().size, BLOCK_SIZE as i32);

    fs.creat(0, T_FILE, b"spill").unwrap();
    assert_eq!(fs.stat(0).unwrap().size, 2 * BLOCK_SIZE as i32);
    assert!(fs.lookup(0, b"spill").unwrap() > 0);
}

#[test]
fn directory_fills_up() {
    let (_dir, path) = new_image("full.img");
    let mut fs = FileSystem::open(&path).unwrap();

    let capacity = NDIRECT * DIR_ENTRIES - 2;
    for i in 0..capacity {
        let name = format!("f{i}");
        fs.creat(0, T_FILE, name.as_bytes()).unwrap();
    }
    assert_eq!(fs.stat(0).unwrap().size, (NDIRECT * BLOCK_SIZE) as i32);
    assert!(matches!(
        fs.creat(0, T_FILE, b"overflow"),
        Err(FsError::Capacity)
    ));

    // Freeing any entry makes room again.
    fs.unlink(0, b"f0").unwrap();
    fs.creat(0, T_FILE, b"overflow").unwrap();
    assert!(fs.lookup(0, b"overflow").unwrap() > 0);
}

#[test]
fn reopen_recovers_from_checkpoint() {
    let (_dir, path) = new_image("reopen.img");
    let x = [0xab; BLOCK_SIZE];
    let inum;
    {
        let mut fs = FileSystem::open(&path).unwrap();
        fs.creat(0, T_DIR, b"a").unwrap();
        fs.creat(0, T_FILE, b"f").unwrap();
        inum = fs.lookup(0, b"f").unwrap();
        fs.write(inum, 0, &x).unwrap();
    }

    let mut fs = FileSystem::open(&path).unwrap();
    assert_eq!(fs.lookup(0, b"a").unwrap(), 1);
    assert_eq!(fs.lookup(0, b"f").unwrap(), inum);
    let stat = fs.stat(inum).unwrap();
    assert_eq!(stat.itype, T_FILE);
    assert_eq!(stat.size, BLOCK_SIZE as i32);
    let mut buf = [0; BLOCK_SIZE];
    fs.read(inum, 0, &mut buf).unwrap();
    assert_eq!(buf, x);

    // The log tail carries over; appends keep going forward.
    let before = fs.end_of_log();
    fs.write(inum, 1, &x).unwrap();
    assert!(fs.end_of_log() > before);
    assert!(before >= CR_SIZE as i32);
}
