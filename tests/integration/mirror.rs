// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{policy_for, snapshot_tree, Machine, RepoFixture, RepoKind};

use anyhow::Result;
use indicatif::ProgressBar;
use oxisync::{
    vcs::{LibGitMirror, SystemMirror, ORIGIN},
    Backend, KeyCipher, MirrorAccess, MirrorRepository, SecretKey, SyncEngine, SyncError,
    SyncOutcome,
};
use pretty_assertions::assert_eq;
use std::{
    fs::{create_dir_all, read_to_string, write},
    process::Command,
};

fn clone_into(machine: &Machine, url: &str) -> Result<LibGitMirror> {
    Ok(LibGitMirror::try_clone(
        url,
        machine.mirror.as_path(),
        "main",
        ProgressBar::hidden(),
    )?)
}

fn system_clone_into(machine: &Machine, url: &str) -> Result<SystemMirror> {
    Ok(SystemMirror::try_clone(
        url,
        machine.mirror.as_path(),
        "main",
        ProgressBar::hidden(),
    )?)
}

fn has_git_binary() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

#[test]
fn push_from_one_machine_then_pull_on_another() -> Result<()> {
    let remote_dir = tempfile::tempdir()?;
    let remote = RepoFixture::new(remote_dir.path(), RepoKind::Bare)?;
    let url = remote.url();

    let a = Machine::new()?;
    a.write_live("opencode.json", r#"{"theme":"dark"}"#)?;
    a.write_live("agent/review.md", "# review")?;
    let skill = a.root.external_roots[0].path.join("pdf");
    create_dir_all(&skill)?;
    write(skill.join("SKILL.md"), "# pdf")?;

    let ctx_a = a.context(policy_for(&url));
    let mut engine_a = SyncEngine::new(&ctx_a, clone_into(&a, &url)?)?;
    assert!(matches!(engine_a.push()?, SyncOutcome::Pushed { .. }));
    assert_eq!(engine_a.push()?, SyncOutcome::UpToDate);

    let b = Machine::new()?;
    let ctx_b = b.context(policy_for(&url));
    let mut engine_b = SyncEngine::new(&ctx_b, clone_into(&b, &url)?)?;
    engine_b.import_from_mirror()?;
    assert_eq!(read_to_string(b.live("opencode.json"))?, r#"{"theme":"dark"}"#);
    assert_eq!(
        read_to_string(b.root.external_roots[0].path.join("pdf").join("SKILL.md"))?,
        "# pdf"
    );

    a.write_live("agent/review.md", "# stricter review")?;
    assert!(matches!(engine_a.push()?, SyncOutcome::Pushed { .. }));
    engine_b.pull()?;
    assert_eq!(read_to_string(b.live("agent/review.md"))?, "# stricter review");

    let state = engine_b.get_state()?;
    assert!(state.is_clean);
    assert!(!state.has_local_changes);
    assert!(state.conflicts.is_empty());
    assert_eq!(state.branch.as_deref(), Some("main"));
    assert_eq!((state.ahead, state.behind), (0, 0));
    assert_eq!(state.changed_files().count(), 0);

    Ok(())
}

fn resolve_diverging_edits<R, F>(clone: F) -> Result<()>
where
    R: MirrorRepository,
    F: Fn(&Machine, &str) -> Result<R>,
{
    let remote_dir = tempfile::tempdir()?;
    let remote = RepoFixture::new(remote_dir.path(), RepoKind::Bare)?;
    let url = remote.url();

    let a = Machine::new()?;
    a.write_live("opencode.json", "{}\n")?;
    let ctx_a = a.context(policy_for(&url));
    let mut engine_a = SyncEngine::new(&ctx_a, clone(&a, &url)?)?;
    engine_a.push()?;

    let b = Machine::new()?;
    let ctx_b = b.context(policy_for(&url));
    let mut engine_b = SyncEngine::new(&ctx_b, clone(&b, &url)?)?;
    engine_b.import_from_mirror()?;

    a.write_live("opencode.json", "{\"theme\":\"dark\"}\n")?;
    engine_a.push()?;

    b.write_live("opencode.json", "{\"theme\":\"light\"}\n")?;
    engine_b.snapshot("local edit")?;

    let result = engine_b.pull();
    assert!(
        matches!(result, Err(SyncError::Conflict { ref files }) if files == &["opencode.json".to_string()])
    );
    assert!(read_to_string(b.mirror.join("opencode.json"))?.contains("<<<<<<<"));
    assert_eq!(read_to_string(b.live("opencode.json"))?, "{\"theme\":\"light\"}\n");

    // INVARIANT: A later engine still sees the merge in progress.
    let reopened = Backend::LibGit.open(b.mirror.as_path())?;
    let state = SyncEngine::new(&ctx_b, reopened)?.get_state()?;
    assert_eq!(state.conflicts, vec!["opencode.json".to_string()]);
    assert!(matches!(engine_b.push(), Err(SyncError::Conflict { .. })));

    write(b.mirror.join("opencode.json"), "{\"theme\":\"dusk\"}\n")?;
    assert!(matches!(engine_b.push()?, SyncOutcome::Pushed { .. }));
    assert_eq!(read_to_string(b.live("opencode.json"))?, "{\"theme\":\"dusk\"}\n");
    assert!(engine_b.get_state()?.conflicts.is_empty());
    assert!(engine_b.get_state()?.is_clean);

    engine_a.pull()?;
    assert_eq!(read_to_string(a.live("opencode.json"))?, "{\"theme\":\"dusk\"}\n");
    assert_eq!(engine_a.push()?, SyncOutcome::UpToDate);

    Ok(())
}

#[test]
fn diverging_edits_conflict_then_resolve() -> Result<()> {
    resolve_diverging_edits(clone_into)
}

#[test]
fn diverging_edits_conflict_then_resolve_with_git_binary() -> Result<()> {
    if !has_git_binary() {
        return Ok(());
    }

    resolve_diverging_edits(system_clone_into)
}

#[test]
fn encrypted_push_is_up_to_date_on_repeat() -> Result<()> {
    let remote_dir = tempfile::tempdir()?;
    let remote = RepoFixture::new(remote_dir.path(), RepoKind::Bare)?;
    let url = remote.url();

    let machine = Machine::new()?;
    machine.write_live("opencode.json", "{}")?;
    write(machine.root.auth_file(), r#"{"anthropic":{"key":"sk-blah"}}"#)?;
    let mut policy = policy_for(&url);
    policy.encryption.enabled = true;
    policy.sync.include_auth = true;
    let ctx = machine
        .context(policy)
        .with_cipher(KeyCipher::new(&SecretKey::generate()));
    let mut engine = SyncEngine::new(&ctx, clone_into(&machine, &url)?)?;

    assert!(matches!(engine.push()?, SyncOutcome::Pushed { .. }));
    let pushed = snapshot_tree(machine.mirror.as_path())?;
    assert!(pushed.contains_key("auth.json.enc"));

    assert_eq!(engine.push()?, SyncOutcome::UpToDate);
    assert_eq!(snapshot_tree(machine.mirror.as_path())?, pushed);

    Ok(())
}

#[test]
fn initial_commit_is_pushed_later() -> Result<()> {
    let remote_dir = tempfile::tempdir()?;
    let remote = RepoFixture::new(remote_dir.path(), RepoKind::Bare)?;
    let url = remote.url();

    let a = Machine::new()?;
    a.write_live("AGENTS.md", "# agents")?;
    let repo = LibGitMirror::try_init(a.mirror.as_path(), "main")?;
    repo.add_remote(ORIGIN, &url)?;
    let ctx_a = a.context(policy_for(&url));
    let mut engine_a = SyncEngine::new(&ctx_a, repo)?;
    assert!(engine_a.snapshot("Initial commit")?.is_some());
    assert_eq!(engine_a.get_state()?.ahead, 1);

    assert_eq!(engine_a.push()?, SyncOutcome::Resumed { ahead: 1 });
    assert_eq!(engine_a.get_state()?.ahead, 0);
    assert_eq!(engine_a.push()?, SyncOutcome::UpToDate);

    let b = Machine::new()?;
    let ctx_b = b.context(policy_for(&url));
    SyncEngine::new(&ctx_b, clone_into(&b, &url)?)?.import_from_mirror()?;
    assert_eq!(read_to_string(b.live("AGENTS.md"))?, "# agents");

    Ok(())
}

#[test]
fn rebind_and_diff_through_libgit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    fixture.stage_and_commit("opencode.json", "{}\n")?;

    let mirror = LibGitMirror::try_open(dir.path())?;
    mirror.add_remote(ORIGIN, "https://blah.org/old.git")?;
    mirror.set_remote_url(ORIGIN, "https://blah.org/new.git")?;
    assert_eq!(mirror.remote_url(ORIGIN)?, "https://blah.org/new.git");
    assert!(mirror.set_remote_url("upstream", "https://blah.org/new.git").is_err());

    assert_eq!(mirror.diff()?, "");
    write(dir.path().join("opencode.json"), "{\"theme\":\"dark\"}\n")?;
    write(dir.path().join("AGENTS.md"), "# agents\n")?;
    let patch = mirror.diff()?;
    assert!(patch.contains("-{}"));
    assert!(patch.contains("+{\"theme\":\"dark\"}"));
    assert!(patch.contains("+# agents"));

    if !has_git_binary() {
        return Ok(());
    }

    let system = SystemMirror::try_open(dir.path())?;
    let patch = system.diff()?;
    assert!(patch.contains("+{\"theme\":\"dark\"}"));
    assert!(patch.contains("+# agents"));
    system.set_remote_url(ORIGIN, "https://blah.org/newer.git")?;
    assert_eq!(system.remote_url(ORIGIN)?, "https://blah.org/newer.git");

    Ok(())
}

#[test]
fn clone_applies_existing_remote_content() -> Result<()> {
    let remote_dir = tempfile::tempdir()?;
    let remote = RepoFixture::new(remote_dir.path(), RepoKind::Bare)?;
    remote.stage_and_commit("themes/dark.json", r#"{"name":"dark"}"#)?;
    remote.stage_and_commit("claude-skills/pdf/SKILL.md", "# pdf")?;

    let machine = Machine::new()?;
    let url = remote.url();
    let ctx = machine.context(policy_for(&url));
    let engine = SyncEngine::new(&ctx, clone_into(&machine, &url)?)?;
    engine.import_from_mirror()?;

    assert_eq!(
        read_to_string(machine.live("themes/dark.json"))?,
        r#"{"name":"dark"}"#
    );
    assert_eq!(
        read_to_string(machine.root.external_roots[0].path.join("pdf").join("SKILL.md"))?,
        "# pdf"
    );

    Ok(())
}

#[test]
fn open_existing_working_copy_with_either_backend() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    fixture.stage_and_commit("AGENTS.md", "# agents")?;

    let mirror = Backend::LibGit.open(dir.path())?;
    assert!(mirror.is_clean()?);
    assert_eq!(mirror.branch()?, "main");

    write(dir.path().join("opencode.json"), "{}")?;
    assert_eq!(mirror.status()?.untracked, vec!["opencode.json".to_string()]);

    if !has_git_binary() {
        return Ok(());
    }

    let system = SystemMirror::try_open(dir.path())?;
    assert_eq!(system.branch()?, "main");
    let status = system.status()?;
    assert_eq!(status.untracked, vec!["opencode.json".to_string()]);
    assert!(system.has_changes()?);

    system.add_all()?;
    system.commit("chore: add opencode.json")?;
    assert!(system.is_clean()?);
    assert!(mirror.is_clean()?);

    Ok(())
}
