//! End-to-end lifecycle: init, add a large binary, remove it, restore it.

mod common;

use common::{commit_file, commit_removal, setup_repo, write_file};
use snow::model::tree::FlattenOpts;
use snow::repository::commit_op::CommitOptions;
use snow::{CheckoutOptions, Repository};

/// A 4 MB pseudo-PSD payload, deterministic but not all-zero.
fn large_payload() -> Vec<u8> {
    (0..4 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect()
}

#[test]
fn add_and_remove_large_file() {
    let (dir, mut repo) = setup_repo();
    let root_hash = repo.head().expect("head after init").target;
    let payload = large_payload();

    // Commit the texture.
    let add_hash = commit_file(&dir, &mut repo, "texture.psd", &payload, "add texture.psd");
    assert_ne!(add_hash, root_hash, "HEAD advanced");
    assert_eq!(repo.head().expect("head").target, add_hash);

    // The object landed under objects/, named after its fingerprint with
    // the original extension, and the worktree still has the file.
    let commit = repo.commit_by_hash(&add_hash).expect("commit");
    let files = commit.root.get_all_tree_files(FlattenOpts {
        entire_hierarchy: true,
        include_dirs: false,
    });
    let blob_hash = files
        .get("texture.psd")
        .and_then(|e| e.hash())
        .expect("tracked with fingerprint");
    let object_path = repo.odb().store().object_path(&blob_hash, ".psd");
    assert!(object_path.is_file(), "{}", object_path.display());
    assert_eq!(
        std::fs::read(dir.path().join("texture.psd")).expect("worktree file"),
        payload
    );

    // Remove it in a follow-up commit.
    let rm_hash = commit_removal(&dir, &mut repo, "texture.psd", "Remove texture");
    assert!(!dir.path().join("texture.psd").exists());
    let rm_commit = repo.commit_by_hash(&rm_hash).expect("commit");
    assert!(rm_commit.root.find("texture.psd").is_none());

    // Two commits since the root.
    assert_eq!(rm_commit.parents, vec![add_hash]);
    let add_commit = repo.commit_by_hash(&add_hash).expect("commit");
    assert_eq!(add_commit.parents, vec![root_hash]);
}

#[test]
fn restore_previous_commit_brings_content_back() {
    let (dir, mut repo) = setup_repo();
    let payload = large_payload();
    commit_file(&dir, &mut repo, "texture.psd", &payload, "add texture.psd");
    commit_removal(&dir, &mut repo, "texture.psd", "Remove texture");
    assert!(!dir.path().join("texture.psd").exists());

    // Check out the parent of HEAD: the texture reappears, byte-identical.
    repo.checkout("HEAD~1", CheckoutOptions::default())
        .expect("checkout");
    assert_eq!(
        std::fs::read(dir.path().join("texture.psd")).expect("restored"),
        payload
    );
}

#[test]
fn init_commit_open_roundtrip() {
    let (dir, repo) = setup_repo();
    drop(repo);

    let reopened = Repository::open(dir.path()).expect("open");
    assert_eq!(reopened.commits().len(), 1);
    let root = reopened
        .commits()
        .values()
        .next()
        .expect("one commit");
    assert!(root.is_root());
    assert_eq!(root.message, "Created project");
    let head = reopened.head().expect("head");
    assert_eq!(head.name, "Main");
    assert_eq!(head.target, root.hash);
}

#[test]
fn commit_roundtrips_with_millisecond_dates() {
    let (dir, mut repo) = setup_repo();
    let hash = commit_file(&dir, &mut repo, "a.psd", b"a", "add a");
    let in_memory = repo.commit_by_hash(&hash).expect("commit").clone();

    let reopened = Repository::open(dir.path()).expect("open");
    let from_disk = reopened.commit_by_hash(&hash).expect("commit");
    assert_eq!(from_disk.hash, in_memory.hash);
    assert_eq!(from_disk.message, in_memory.message);
    assert_eq!(
        from_disk.date.timestamp_millis(),
        in_memory.date.timestamp_millis()
    );
    assert_eq!(from_disk.root, in_memory.root);
}

#[test]
fn staged_then_unstaged_file_never_enters_history() {
    let (dir, mut repo) = setup_repo();
    write_file(dir.path(), "transient.psd", b"here and gone");
    repo.index_mut()
        .add_files(dir.path(), ["transient.psd"])
        .expect("add");
    repo.index_mut()
        .delete_files(dir.path(), ["transient.psd"])
        .expect("rm");
    let hash = repo
        .create_commit("net zero", CommitOptions::allow_empty())
        .expect("commit");
    let commit = repo.commit_by_hash(&hash).expect("commit");
    assert!(commit.root.find("transient.psd").is_none());
}

#[test]
fn every_tracked_file_has_its_object() {
    let (dir, mut repo) = setup_repo();
    commit_file(&dir, &mut repo, "models/hero/hero.blend", b"hero", "hero");
    commit_file(&dir, &mut repo, "texture.psd", b"px", "texture");

    for commit in repo.commits().values() {
        let files = commit.root.get_all_tree_files(FlattenOpts {
            entire_hierarchy: true,
            include_dirs: false,
        });
        for (rel, entry) in files {
            let hash = entry.hash().expect("fingerprint");
            assert!(
                repo.odb().contains_object(&hash),
                "missing object for {rel}"
            );
        }
    }
}
