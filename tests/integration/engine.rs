// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{policy_for, snapshot_tree, Machine};

use anyhow::Result;
use indoc::indoc;
use oxisync::{
    KeyCipher, MirrorRepository, NoopCipher, RepoStatus, SecretKey, SyncEngine, SyncError,
    SyncOutcome, VcsError,
};
use pretty_assertions::assert_eq;
use std::{
    cell::RefCell,
    fs::{create_dir_all, read, read_to_string, write},
};

const URL: &str = "https://blah.org/opencode-config.git";

/// Scripted mirror repository that records every call.
#[derive(Debug, Default)]
struct FakeMirror {
    status: RefCell<RepoStatus>,
    pull_error: RefCell<Option<VcsError>>,
    push_error: RefCell<Option<VcsError>>,
    calls: RefCell<Vec<&'static str>>,
}

impl FakeMirror {
    fn clean() -> Self {
        Self {
            status: RefCell::new(RepoStatus {
                branch: Some("main".into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn dirty(files: &[&str]) -> Self {
        let fake = Self::clean();
        fake.status.borrow_mut().modified = files.iter().map(ToString::to_string).collect();
        fake
    }

    fn merging(conflicted: &[&str]) -> Self {
        let fake = Self::clean();
        {
            let mut status = fake.status.borrow_mut();
            status.merging = true;
            status.conflicted = conflicted.iter().map(ToString::to_string).collect();
        }
        fake
    }

    fn failing_pull(self, error: VcsError) -> Self {
        self.pull_error.replace(Some(error));
        self
    }

    fn failing_push(self, error: VcsError) -> Self {
        self.push_error.replace(Some(error));
        self
    }

    fn record(&self, call: &'static str) {
        self.calls.borrow_mut().push(call);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }
}

impl MirrorRepository for FakeMirror {
    fn add_remote(&self, _name: &str, _url: &str) -> oxisync::vcs::Result<()> {
        self.record("add_remote");
        Ok(())
    }

    fn remote_url(&self, _name: &str) -> oxisync::vcs::Result<String> {
        Ok(URL.into())
    }

    fn set_remote_url(&self, _name: &str, _url: &str) -> oxisync::vcs::Result<()> {
        self.record("set_remote_url");
        Ok(())
    }

    fn status(&self) -> oxisync::vcs::Result<RepoStatus> {
        self.record("status");
        Ok(self.status.borrow().clone())
    }

    fn add_all(&self) -> oxisync::vcs::Result<()> {
        self.record("add_all");
        Ok(())
    }

    fn commit(&self, _message: &str) -> oxisync::vcs::Result<()> {
        self.record("commit");
        let mut status = self.status.borrow_mut();
        status.modified.clear();
        status.conflicted.clear();
        status.merging = false;
        status.ahead += 1;
        Ok(())
    }

    fn diff(&self) -> oxisync::vcs::Result<String> {
        self.record("diff");
        Ok("+{}\n".into())
    }

    fn push(&self) -> oxisync::vcs::Result<()> {
        self.record("push");
        self.push_error.take().map_or(Ok(()), Err)?;
        self.status.borrow_mut().ahead = 0;
        Ok(())
    }

    fn force_push(&self) -> oxisync::vcs::Result<()> {
        self.record("force_push");
        Ok(())
    }

    fn pull(&self) -> oxisync::vcs::Result<()> {
        self.record("pull");
        self.pull_error.take().map_or(Ok(()), Err)
    }

    fn fetch(&self) -> oxisync::vcs::Result<()> {
        self.record("fetch");
        Ok(())
    }

    fn branch(&self) -> oxisync::vcs::Result<String> {
        Ok("main".into())
    }
}

#[test]
fn local_changes_block_sync_before_network() -> Result<()> {
    let machine = Machine::new()?;
    let ctx = machine.context(policy_for(URL));
    let mut engine = SyncEngine::new(&ctx, FakeMirror::dirty(&["opencode.json"]))?;

    let result = engine.sync();
    assert!(
        matches!(result, Err(SyncError::LocalChanges { ref files }) if files == &["opencode.json".to_string()])
    );
    assert_eq!(engine.repository().calls(), vec!["status"]);

    Ok(())
}

#[test]
fn conflict_aborts_sync_before_push() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("opencode.json", "{}")?;
    let ctx = machine.context(policy_for(URL));
    let conflicted = vec!["agent/review.md".to_string(), "opencode.json".to_string()];
    let fake = FakeMirror::clean().failing_pull(VcsError::Conflict {
        files: conflicted.clone(),
    });
    let mut engine = SyncEngine::new(&ctx, fake)?;

    match engine.sync() {
        Err(SyncError::Conflict { files }) => assert_eq!(files, conflicted),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(engine.repository().calls(), vec!["status", "pull"]);
    assert!(!machine.mirror.join("opencode.json").exists());

    let state = engine.get_state()?;
    assert_eq!(state.conflicts, conflicted);
    assert!(!state.can_pull());

    Ok(())
}

#[test]
fn auth_failure_on_push_is_distinguished() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("opencode.json", "{}")?;
    let ctx = machine.context(policy_for(URL));
    let fake = FakeMirror::dirty(&["opencode.json"]).failing_push(VcsError::Auth {
        remote: "origin".into(),
        message: "invalid credentials".into(),
    });
    let mut engine = SyncEngine::new(&ctx, fake)?;

    let result = engine.push();
    assert!(matches!(result, Err(SyncError::Auth { ref remote, .. }) if remote == "origin"));
    assert_eq!(
        engine.repository().calls(),
        vec!["status", "status", "add_all", "commit", "push"]
    );

    Ok(())
}

#[test]
fn clean_mirror_after_export_is_up_to_date() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("AGENTS.md", "# agents")?;
    let ctx = machine.context(policy_for(URL));
    let mut engine = SyncEngine::new(&ctx, FakeMirror::clean())?;

    assert_eq!(engine.sync()?, SyncOutcome::UpToDate);
    assert_eq!(
        engine.repository().calls(),
        vec!["status", "pull", "status", "status", "status"]
    );
    assert_eq!(read_to_string(machine.mirror.join("AGENTS.md"))?, "# agents");

    Ok(())
}

#[test]
fn export_applies_exclusions() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("agent/a.json", "{}")?;
    machine.write_live("agent/secrets/b.log", "x")?;
    let mut policy = policy_for(URL);
    policy.sync.exclude = vec!["*.log".into()];
    let ctx = machine.context(policy);

    SyncEngine::new(&ctx, FakeMirror::clean())?.export_to_mirror()?;
    let mirror = snapshot_tree(machine.mirror.as_path())?;
    assert_eq!(mirror.keys().collect::<Vec<_>>(), vec!["agent/a.json"]);

    Ok(())
}

#[test]
fn export_is_idempotent() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("opencode.json", r#"{"theme":"dark"}"#)?;
    machine.write_live("command/test.md", "run the tests")?;
    machine.write_live("plugin/node_modules/dep/index.js", "module.exports = {}")?;
    let ctx = machine.context(policy_for(URL));
    let engine = SyncEngine::new(&ctx, FakeMirror::clean())?;

    engine.export_to_mirror()?;
    let first = snapshot_tree(machine.mirror.as_path())?;
    engine.export_to_mirror()?;
    let second = snapshot_tree(machine.mirror.as_path())?;

    assert_eq!(first, second);
    assert_eq!(
        first.keys().collect::<Vec<_>>(),
        vec!["command/test.md", "opencode.json"]
    );

    Ok(())
}

#[test]
fn export_then_import_round_trip() -> Result<()> {
    let source = Machine::new()?;
    source.write_live("opencode.json", r#"{"theme":"dark"}"#)?;
    source.write_live("mode/plan.md", "# plan")?;
    let skill = source.root.external_roots[0].path.join("pdf");
    create_dir_all(&skill)?;
    write(skill.join("SKILL.md"), "# pdf")?;

    #[cfg(unix)]
    {
        use std::{fs::set_permissions, fs::Permissions, os::unix::fs::PermissionsExt};
        set_permissions(source.live("mode/plan.md"), Permissions::from_mode(0o600))?;
    }

    let ctx = source.context(policy_for(URL));
    SyncEngine::new(&ctx, FakeMirror::clean())?.export_to_mirror()?;

    // INVARIANT: Fresh live tree, same mirror.
    let target = Machine::new()?;
    let target_ctx =
        oxisync::SyncContext::new(target.root.clone(), source.mirror.clone(), policy_for(URL));
    SyncEngine::new(&target_ctx, FakeMirror::clean())?.import_from_mirror()?;

    assert_eq!(read(target.live("opencode.json"))?, br#"{"theme":"dark"}"#.to_vec());
    assert_eq!(read(target.live("mode/plan.md"))?, b"# plan".to_vec());
    assert_eq!(
        read_to_string(target.root.external_roots[0].path.join("pdf").join("SKILL.md"))?,
        "# pdf"
    );

    #[cfg(unix)]
    {
        use std::{fs::metadata, os::unix::fs::PermissionsExt};
        assert_eq!(
            metadata(target.live("mode/plan.md"))?.permissions().mode() & 0o777,
            0o600
        );
    }

    Ok(())
}

#[test]
fn import_skips_excluded_paths() -> Result<()> {
    let machine = Machine::new()?;
    create_dir_all(machine.mirror.join("agent"))?;
    write(machine.mirror.join("agent").join("review.md"), "# review")?;
    write(machine.mirror.join("agent").join("debug.log"), "noise")?;
    let mut policy = policy_for(URL);
    policy.sync.exclude = vec!["*.log".into()];
    let ctx = machine.context(policy);

    SyncEngine::new(&ctx, FakeMirror::clean())?.import_from_mirror()?;
    assert!(machine.live("agent/review.md").exists());
    assert!(!machine.live("agent/debug.log").exists());

    Ok(())
}

#[test]
fn encrypted_credentials_round_trip() -> Result<()> {
    let plaintext = br#"{"anthropic":{"type":"api","key":"sk-blah"}}"#;
    let key = SecretKey::generate();

    let source = Machine::new()?;
    write(source.root.auth_file(), plaintext)?;
    let mut policy = policy_for(URL);
    policy.encryption.enabled = true;
    policy.sync.include_auth = true;
    let ctx = source
        .context(policy.clone())
        .with_cipher(KeyCipher::new(&key));
    SyncEngine::new(&ctx, FakeMirror::clean())?.export_to_mirror()?;

    let artifact = read(source.mirror.join("auth.json.enc"))?;
    assert_ne!(artifact, plaintext.to_vec());
    assert!(!source.mirror.join("auth.json").exists());

    let target = Machine::new()?;
    let target_ctx = oxisync::SyncContext::new(target.root.clone(), source.mirror.clone(), policy)
        .with_cipher(KeyCipher::new(&key));
    SyncEngine::new(&target_ctx, FakeMirror::clean())?.import_from_mirror()?;

    assert_eq!(read(target.root.auth_file())?, plaintext.to_vec());
    assert!(!target.live("auth.json.enc").exists());

    Ok(())
}

#[test]
fn enabled_category_without_cipher_writes_nothing() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("opencode.json", "{}")?;
    write(machine.root.mcp_auth_file(), "{}")?;
    let mut policy = policy_for(URL);
    policy.encryption.enabled = true;
    policy.sync.include_mcp_auth = true;
    let ctx = machine.context(policy);

    let result = SyncEngine::new(&ctx, FakeMirror::clean())?.export_to_mirror();
    assert!(matches!(result, Err(SyncError::NotConfigured { .. })));
    assert!(snapshot_tree(machine.mirror.as_path())?.is_empty());

    Ok(())
}

#[test]
fn unencrypted_category_is_a_policy_violation() -> Result<()> {
    let machine = Machine::new()?;
    let mut policy = policy_for(URL);
    policy.sync.include_auth = true;
    let ctx = machine.context(policy);

    let result = SyncEngine::new(&ctx, FakeMirror::clean());
    assert!(matches!(result, Err(SyncError::Policy(_))));
    assert!(!machine.mirror.as_path().exists());

    Ok(())
}

#[test]
fn disabled_category_artifact_leaves_live_file_alone() -> Result<()> {
    let machine = Machine::new()?;
    create_dir_all(machine.mirror.as_path())?;
    write(machine.mirror.join("auth.json.enc"), "opaque blob from a prior run")?;
    write(machine.root.auth_file(), "local credentials")?;
    let mut policy = policy_for(URL);
    policy.encryption.enabled = true;
    let ctx = machine.context(policy).with_cipher(NoopCipher);

    SyncEngine::new(&ctx, FakeMirror::clean())?.import_from_mirror()?;
    assert_eq!(read_to_string(machine.root.auth_file())?, "local credentials");
    assert!(!machine.live("auth.json.enc").exists());

    Ok(())
}

#[test]
fn state_reports_repository_signals_and_inventory() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("opencode.json", "{}")?;
    let ctx = machine.context(policy_for(URL));
    let fake = FakeMirror::dirty(&["opencode.json"]);
    fake.status.borrow_mut().ahead = 2;
    let engine = SyncEngine::new(&ctx, fake)?;

    let state = engine.get_state()?;
    assert!(!state.is_clean);
    assert!(state.has_local_changes);
    assert_eq!(state.branch.as_deref(), Some("main"));
    assert_eq!(state.ahead, 2);
    assert_eq!(state.files.len(), 1);
    assert!(state.files[0].is_new);
    assert!(state.conflicts.is_empty());

    Ok(())
}

#[test]
fn failed_push_is_resumed_on_retry() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("opencode.json", "{}")?;
    let ctx = machine.context(policy_for(URL));
    let fake = FakeMirror::dirty(&["opencode.json"]).failing_push(VcsError::Rejected {
        remote: "origin".into(),
        message: "refs/heads/main: connection reset".into(),
    });
    let mut engine = SyncEngine::new(&ctx, fake)?;

    assert!(matches!(engine.push(), Err(SyncError::Vcs(VcsError::Rejected { .. }))));
    assert_eq!(engine.repository().status.borrow().ahead, 1);

    assert_eq!(engine.push()?, SyncOutcome::Resumed { ahead: 1 });
    assert_eq!(
        engine.repository().calls()[5..],
        ["status", "status", "status", "push"]
    );
    assert_eq!(engine.push()?, SyncOutcome::UpToDate);

    Ok(())
}

#[test]
fn force_push_without_new_commit_overwrites() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("opencode.json", "{}")?;
    let ctx = machine.context(policy_for(URL));
    let engine = SyncEngine::new(&ctx, FakeMirror::clean())?;

    assert_eq!(engine.force_push()?, SyncOutcome::Overwritten);
    assert_eq!(engine.repository().calls(), vec!["status", "force_push"]);

    let engine = SyncEngine::new(&ctx, FakeMirror::dirty(&["opencode.json"]))?;
    assert!(matches!(engine.force_push()?, SyncOutcome::Pushed { .. }));

    Ok(())
}

#[test]
fn encrypted_export_is_idempotent() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("opencode.json", "{}")?;
    write(machine.root.auth_file(), r#"{"anthropic":{"key":"sk-blah"}}"#)?;
    let mut policy = policy_for(URL);
    policy.encryption.enabled = true;
    policy.sync.include_auth = true;
    let ctx = machine
        .context(policy)
        .with_cipher(KeyCipher::new(&SecretKey::generate()));
    let engine = SyncEngine::new(&ctx, FakeMirror::clean())?;

    engine.export_to_mirror()?;
    let first = snapshot_tree(machine.mirror.as_path())?;
    engine.export_to_mirror()?;
    let second = snapshot_tree(machine.mirror.as_path())?;

    assert_eq!(first, second);
    assert!(first.contains_key("auth.json.enc"));

    Ok(())
}

#[test]
fn unresolved_markers_block_push() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("opencode.json", r#"{"theme":"light"}"#)?;
    create_dir_all(machine.mirror.as_path())?;
    write(
        machine.mirror.join("opencode.json"),
        indoc! {r#"
            <<<<<<< HEAD
            {"theme":"light"}
            =======
            {"theme":"dark"}
            >>>>>>> origin/main
        "#},
    )?;
    let ctx = machine.context(policy_for(URL));
    let mut engine = SyncEngine::new(&ctx, FakeMirror::merging(&["opencode.json"]))?;

    match engine.push() {
        Err(SyncError::Conflict { files }) => assert_eq!(files, vec!["opencode.json".to_string()]),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(engine.repository().calls(), vec!["status"]);
    assert_eq!(read_to_string(machine.live("opencode.json"))?, r#"{"theme":"light"}"#);

    let result = engine.sync();
    assert!(matches!(result, Err(SyncError::Conflict { .. })));
    assert_eq!(engine.repository().calls(), vec!["status", "status"]);

    Ok(())
}

#[test]
fn resolved_merge_is_committed_imported_and_pushed() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("opencode.json", r#"{"theme":"light"}"#)?;
    create_dir_all(machine.mirror.as_path())?;
    write(machine.mirror.join("opencode.json"), r#"{"theme":"dark"}"#)?;
    let ctx = machine.context(policy_for(URL));
    let mut engine = SyncEngine::new(&ctx, FakeMirror::merging(&["opencode.json"]))?;

    assert!(matches!(engine.push()?, SyncOutcome::Pushed { .. }));
    assert_eq!(
        engine.repository().calls(),
        vec!["status", "add_all", "commit", "push"]
    );
    assert_eq!(read_to_string(machine.live("opencode.json"))?, r#"{"theme":"dark"}"#);
    assert!(engine.get_state()?.conflicts.is_empty());

    Ok(())
}

#[test]
fn state_reports_conflicts_left_by_earlier_run() -> Result<()> {
    let machine = Machine::new()?;
    let ctx = machine.context(policy_for(URL));
    let engine = SyncEngine::new(&ctx, FakeMirror::merging(&["opencode.json", "agent/a.md"]))?;

    let state = engine.get_state()?;
    assert_eq!(
        state.conflicts,
        vec!["agent/a.md".to_string(), "opencode.json".to_string()]
    );
    assert!(!state.is_clean);
    assert!(!state.can_pull());

    Ok(())
}

#[test]
fn diff_exports_before_comparing() -> Result<()> {
    let machine = Machine::new()?;
    machine.write_live("opencode.json", "{}")?;
    let ctx = machine.context(policy_for(URL));
    let engine = SyncEngine::new(&ctx, FakeMirror::clean())?;

    assert_eq!(engine.diff()?, "+{}\n");
    assert_eq!(engine.repository().calls(), vec!["diff"]);
    assert_eq!(read_to_string(machine.mirror.join("opencode.json"))?, "{}");

    Ok(())
}
