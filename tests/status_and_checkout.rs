//! Status boundary behaviors and checkout safety.

mod common;

use common::{commit_file, setup_repo, write_file};
use snow::iocx::{IoContext, TrashBin};
use snow::{CheckoutOptions, ResetFlags, StatusFilter, WtStatus};
use std::sync::{Arc, Mutex};

#[test]
fn checkout_head_with_no_flags_is_observably_nothing() {
    let (dir, mut repo) = setup_repo();
    commit_file(&dir, &mut repo, "texture.psd", b"pixels", "add texture");
    write_file(dir.path(), "untracked.blend", b"wip");
    let head_before = repo.head().expect("head").clone();

    repo.checkout("HEAD", CheckoutOptions::default())
        .expect("checkout");

    assert_eq!(repo.head(), Some(&head_before));
    assert_eq!(
        std::fs::read(dir.path().join("texture.psd")).expect("tracked"),
        b"pixels"
    );
    assert_eq!(
        std::fs::read(dir.path().join("untracked.blend")).expect("untracked"),
        b"wip"
    );
}

#[test]
fn same_size_mtime_bump_needs_hash_proof() {
    let (dir, mut repo) = setup_repo();
    commit_file(&dir, &mut repo, "texture.psd", b"same-bytes", "add");

    // Touch without changing content: must NOT report modified.
    snow::fsutil::utimes(&dir.path().join("texture.psd"), 4_000_000_000_000)
        .expect("utimes");
    let clean = repo
        .get_status(StatusFilter::DEFAULT, None)
        .expect("status");
    assert!(clean.is_empty(), "{clean:?}");

    // Same size, new content, bumped mtime: must report modified.
    write_file(dir.path(), "texture.psd", b"new!-bytes");
    snow::fsutil::utimes(&dir.path().join("texture.psd"), 4_100_000_000_000)
        .expect("utimes");
    let dirty = repo
        .get_status(StatusFilter::DEFAULT, None)
        .expect("status");
    assert_eq!(dirty.len(), 1, "{dirty:?}");
    assert_eq!(dirty[0].rel, "texture.psd");
    assert_eq!(dirty[0].status, WtStatus::Modified);
}

#[test]
fn touched_large_files_skip_status_time_hashing() {
    let (dir, mut repo) = setup_repo();
    // Both past the 20 MiB block-hash limit: a text-typed manifest (whose
    // default mode hash-compares) and a binary asset.
    let payload = vec![9u8; 21 * 1024 * 1024];
    commit_file(&dir, &mut repo, "manifest.json", &payload, "add manifest");
    commit_file(&dir, &mut repo, "backdrop.psd", &payload, "add backdrop");

    snow::fsutil::utimes(&dir.path().join("manifest.json"), 4_000_000_000_000)
        .expect("utimes");
    snow::fsutil::utimes(&dir.path().join("backdrop.psd"), 4_000_000_000_000)
        .expect("utimes");

    // No explicit detection bits: extension defaults decide per file.
    let filter = StatusFilter::NEW | StatusFilter::MODIFIED | StatusFilter::DELETED;
    let report = repo.get_status(filter, None).expect("status");
    let rels: Vec<&str> = report.iter().map(|e| e.rel.as_str()).collect();

    // The text-typed file's mode defers the hash to the commit path, so an
    // mtime-only bump reads as unmodified; the binary asset's mode flags
    // mtime changes past the block limit without hashing.
    assert!(
        !rels.contains(&"manifest.json"),
        "mtime-only bump must stay clean: {report:?}"
    );
    assert!(rels.contains(&"backdrop.psd"), "{report:?}");
    assert_eq!(report[0].status, WtStatus::Modified);
}

#[test]
fn in_place_reset_trashes_unknown_content() {
    let (dir, mut repo) = setup_repo();
    commit_file(&dir, &mut repo, "texture.psd", b"committed", "add");
    write_file(dir.path(), "texture.psd", b"unsaved masterpiece");

    let trashed = Arc::new(Mutex::new(Vec::new()));
    let sink = trashed.clone();
    let iocx = IoContext::with_trash(TrashBin::Callback(Box::new(move |paths| {
        sink.lock().expect("lock").extend_from_slice(paths);
        Ok(())
    })));

    repo.checkout_with("HEAD", CheckoutOptions::default(), &iocx)
        .expect("checkout");

    // The overwrite happened, but the unsaved bytes went to the trash
    // first rather than being destroyed.
    assert_eq!(
        std::fs::read(dir.path().join("texture.psd")).expect("restored"),
        b"committed"
    );
    assert_eq!(trashed.lock().expect("lock").len(), 1);
}

#[test]
fn full_reset_with_snowignore_keeps_ignored_trees() {
    let (dir, mut repo) = setup_repo();
    commit_file(&dir, &mut repo, "texture.psd", b"px", "add");
    write_file(dir.path(), ".snowignore", b"renders\n");
    write_file(dir.path(), "renders/frame-0001.exr", b"frame");
    write_file(dir.path(), "renders/frame-0002.exr", b"frame");

    let iocx = IoContext::with_trash(TrashBin::Callback(Box::new(|_| Ok(()))));
    repo.checkout_with(
        "HEAD",
        CheckoutOptions {
            reset: ResetFlags::ALL,
            detach: false,
        },
        &iocx,
    )
    .expect("checkout");

    assert!(
        dir.path().join("renders/frame-0001.exr").is_file(),
        "ignored render output must survive a full reset"
    );
}

#[test]
fn status_default_hides_ignored_cruft() {
    let (dir, mut repo) = setup_repo();
    commit_file(&dir, &mut repo, "texture.psd", b"px", "add");
    write_file(dir.path(), ".DS_Store", b"cruft");
    write_file(dir.path(), "scene.blend1", b"autosave");

    let report = repo
        .get_status(StatusFilter::DEFAULT, None)
        .expect("status");
    assert!(report.is_empty(), "{report:?}");

    let tagged = repo
        .get_status(StatusFilter::DEFAULT | StatusFilter::IGNORED, None)
        .expect("status");
    let ignored: Vec<&str> = tagged
        .iter()
        .filter(|e| e.status == WtStatus::Ignored)
        .map(|e| e.rel.as_str())
        .collect();
    assert!(ignored.contains(&".DS_Store"), "{ignored:?}");
    assert!(ignored.contains(&"scene.blend1"), "{ignored:?}");
}
