// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use oxisync::{
    sync::{hostname, link_message, SyncOutcome},
    vcs::ORIGIN,
    AnyMirror, Backend, ConfigurationRoot, KeyCipher, MirrorRepository, MirrorRoot,
    PolicyViolation, SecretKey, SyncContext, SyncEngine, SyncError, SyncPolicy, ToolDirs,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::ProgressBar;
use inquire::Confirm;
use std::{
    env,
    fmt::Display,
    path::{Path, PathBuf},
    process::{self, exit},
    time,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "oxisync [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Git implementation to drive the mirror with.
    #[arg(long, value_enum, default_value_t = BackendArg::Libgit, global = true)]
    pub backend: BackendArg,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let backend = Backend::from(self.backend);
        match self.command {
            Command::Init(opts) => run_init(backend, opts),
            Command::Clone(opts) => run_clone(backend, opts),
            Command::Link(opts) => run_link(backend, opts),
            Command::Rebind(opts) => run_rebind(backend, opts),
            Command::Push => run_push(backend),
            Command::Pull => run_pull(backend),
            Command::Sync => run_sync(backend),
            Command::Status => run_status(backend),
            Command::Diff => run_diff(backend),
            Command::Doctor => run_doctor(backend),
            Command::ForcePush(opts) => run_force_push(backend, opts),
            Command::Key(command) => run_key(command),
            Command::Config(command) => run_config(command),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    /// In-process libgit2.
    Libgit,

    /// External git binary.
    System,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Libgit => Self::LibGit,
            BackendArg::System => Self::System,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Initialize mirror from local configuration.
    #[command(override_usage = "oxisync init [options] <url>")]
    Init(InitOptions),

    /// Clone existing mirror and apply it to local configuration.
    #[command(override_usage = "oxisync clone [options] [<url>]")]
    Clone(CloneOptions),

    /// Create mirror for configured remote, and overwrite it with local
    /// configuration.
    #[command(override_usage = "oxisync link [options] <url>")]
    Link(LinkOptions),

    /// Point existing mirror at another remote.
    #[command(override_usage = "oxisync rebind <url>")]
    Rebind(RebindOptions),

    /// Copy local configuration into mirror, commit, and push.
    Push,

    /// Pull mirror and apply it to local configuration.
    Pull,

    /// Pull, then push.
    Sync,

    /// Show sync status.
    Status,

    /// Show uncommitted mirror changes as a patch.
    Diff,

    /// Diagnose setup problems.
    Doctor,

    /// Overwrite remote with local configuration.
    ForcePush(ForcePushOptions),

    /// Manage encryption key.
    #[command(subcommand)]
    Key(KeyCommand),

    /// Inspect and change configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// URL of remote to mirror through.
    #[arg(required = true, value_name = "url")]
    pub url: String,

    /// Branch to sync on.
    #[arg(short, long, value_name = "branch")]
    pub branch: Option<String>,

    /// Enable encryption of credential files.
    #[arg(short, long)]
    pub encrypt: bool,

    /// Sync provider credentials (auth.json), requires encryption.
    #[arg(long, requires = "encrypt")]
    pub include_auth: bool,

    /// Sync MCP server credentials (mcp-auth.json), requires encryption.
    #[arg(long, requires = "encrypt")]
    pub include_mcp_auth: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CloneOptions {
    /// URL of remote to clone, defaults to configured URL.
    #[arg(value_name = "url")]
    pub url: Option<String>,

    /// Branch to check out.
    #[arg(short, long, value_name = "branch")]
    pub branch: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LinkOptions {
    /// URL of remote to overwrite.
    #[arg(required = true, value_name = "url")]
    pub url: String,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RebindOptions {
    /// URL of new remote.
    #[arg(required = true, value_name = "url")]
    pub url: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ForcePushOptions {
    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum KeyCommand {
    /// Generate new encryption key.
    Generate {
        /// Replace existing key.
        #[arg(short, long)]
        force: bool,
    },

    /// Replace encryption key and enable encryption.
    Regen {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Print encryption key for transfer to another machine.
    Export,

    /// Store encryption key from another machine.
    Import {
        /// Hex-encoded key.
        #[arg(value_name = "key")]
        key: String,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print configuration.
    Show,

    /// Print path to configuration file.
    Path,

    /// Set one configuration value, e.g., `sync.include_auth true`.
    Set {
        #[arg(value_name = "key")]
        key: String,

        #[arg(value_name = "value")]
        value: String,
    },

    /// Open configuration in $VISUAL or $EDITOR, then validate it.
    Edit,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = Cli::parse().run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_init(backend: Backend, opts: InitOptions) -> Result<()> {
    let dirs = ToolDirs::try_default()?;
    let mirror = dirs.mirror_root();
    if mirror.join(".git").exists() {
        bail!("mirror already initialized at {:?}", mirror.as_path().display());
    }

    let mut policy = SyncPolicy::load(dirs.config_file())?.unwrap_or_default();
    policy.repo.url = opts.url;
    if let Some(branch) = opts.branch {
        policy.repo.branch = branch;
    }
    policy.encryption.enabled |= opts.encrypt;
    policy.sync.include_auth |= opts.include_auth;
    policy.sync.include_mcp_auth |= opts.include_mcp_auth;
    policy.validate()?;

    if policy.encryption.enabled {
        let key_file = key_path(&dirs, &policy);
        if !key_file.exists() {
            SecretKey::generate().save(&key_file)?;
            warn!("generated new key at {:?}, back it up with `oxisync key export`", key_file.display());
        }
    }
    policy.save(dirs.config_file())?;

    let repo = backend.init(mirror.as_path(), &policy.repo.branch)?;
    repo.add_remote(ORIGIN, &policy.repo.url)?;

    let ctx = context(&dirs, policy)?;
    let engine = SyncEngine::new(&ctx, repo)?;
    engine.snapshot(&format!("Initial commit from {}", hostname()))?;
    info!("mirror initialized, push it with `oxisync push`");

    Ok(())
}

fn run_clone(backend: Backend, opts: CloneOptions) -> Result<()> {
    let dirs = ToolDirs::try_default()?;
    let mirror = dirs.mirror_root();
    if mirror.join(".git").exists() {
        bail!("mirror already exists at {:?}, use `oxisync pull`", mirror.as_path().display());
    }

    let mut policy = SyncPolicy::load(dirs.config_file())?.unwrap_or_default();
    if let Some(url) = opts.url {
        policy.repo.url = url;
    }
    if let Some(branch) = opts.branch {
        policy.repo.branch = branch;
    }
    if policy.repo.url.is_empty() {
        bail!("no remote URL given or configured");
    }
    policy.save(dirs.config_file())?;

    let repo = backend.clone_from(
        &policy.repo.url,
        mirror.as_path(),
        &policy.repo.branch,
        ProgressBar::new_spinner(),
    )?;

    let ctx = context(&dirs, policy)?;
    let engine = SyncEngine::new(&ctx, repo)?;
    engine.import_from_mirror()?;
    info!("configuration applied, keep it current with `oxisync sync`");

    Ok(())
}

fn run_link(backend: Backend, opts: LinkOptions) -> Result<()> {
    let dirs = ToolDirs::try_default()?;
    let mirror = dirs.mirror_root();
    if mirror.join(".git").exists() {
        bail!(
            "mirror already exists at {:?}, use `oxisync rebind` to change its remote",
            mirror.as_path().display()
        );
    }

    let mut policy = require_policy(&dirs)?;
    policy.repo.url = opts.url;
    policy.validate()?;

    warn!("everything on {} will be replaced by local configuration", policy.repo.url);
    if !opts.yes && !confirm("Overwrite remote with local configuration?")? {
        info!("link cancelled");
        return Ok(());
    }
    policy.save(dirs.config_file())?;

    let repo = backend.init(mirror.as_path(), &policy.repo.branch)?;
    repo.add_remote(ORIGIN, &policy.repo.url)?;

    let ctx = context(&dirs, policy)?;
    let engine = SyncEngine::new(&ctx, repo)?;
    engine.snapshot(&link_message())?;

    let bar = spinner("force pushing to remote");
    let outcome = engine.force_push();
    bar.finish_and_clear();
    report(explain(outcome, &ctx.mirror)?);
    info!("mirror linked to {}", ctx.policy.repo.url);

    Ok(())
}

fn run_rebind(backend: Backend, opts: RebindOptions) -> Result<()> {
    let dirs = ToolDirs::try_default()?;
    let mirror = dirs.mirror_root();
    if !mirror.join(".git").exists() {
        bail!(
            "no mirror at {:?}, run `oxisync init` or `oxisync clone` first",
            mirror.as_path().display()
        );
    }

    let mut policy = require_policy(&dirs)?;
    let repo = backend.open(mirror.as_path())?;
    let current = repo.remote_url(ORIGIN).ok();
    if current.as_deref() == Some(opts.url.as_str()) && policy.repo.url == opts.url {
        info!("mirror already syncs with {}", opts.url);
        return Ok(());
    }

    match current {
        Some(_) => repo.set_remote_url(ORIGIN, &opts.url)?,
        None => repo.add_remote(ORIGIN, &opts.url)?,
    }
    policy.repo.url = opts.url;
    policy.save(dirs.config_file())?;
    info!("mirror now syncs with {}, run `oxisync sync` to catch up", policy.repo.url);

    Ok(())
}

fn run_push(backend: Backend) -> Result<()> {
    let (ctx, bar) = (load_context()?, spinner("pushing to remote"));
    let mut engine = SyncEngine::new(&ctx, open(backend, &ctx, &bar)?)?;
    let outcome = engine.push();
    bar.finish_and_clear();
    report(explain(outcome, &ctx.mirror)?);

    Ok(())
}

fn run_pull(backend: Backend) -> Result<()> {
    let (ctx, bar) = (load_context()?, spinner("pulling from remote"));
    let mut engine = SyncEngine::new(&ctx, open(backend, &ctx, &bar)?)?;
    let outcome = engine.pull();
    bar.finish_and_clear();
    explain(outcome, &ctx.mirror)?;
    info!("configuration is up to date with remote");

    Ok(())
}

fn run_sync(backend: Backend) -> Result<()> {
    let (ctx, bar) = (load_context()?, spinner("syncing with remote"));
    let mut engine = SyncEngine::new(&ctx, open(backend, &ctx, &bar)?)?;
    let outcome = engine.sync();
    bar.finish_and_clear();
    report(explain(outcome, &ctx.mirror)?);

    Ok(())
}

fn run_force_push(backend: Backend, opts: ForcePushOptions) -> Result<()> {
    let ctx = load_context()?;
    if !opts.yes && !confirm("Overwrite remote with local configuration?")? {
        info!("force push cancelled");
        return Ok(());
    }

    let bar = spinner("force pushing to remote");
    let engine = SyncEngine::new(&ctx, open(backend, &ctx, &bar)?)?;
    let outcome = engine.force_push();
    bar.finish_and_clear();
    report(explain(outcome, &ctx.mirror)?);

    Ok(())
}

fn run_status(backend: Backend) -> Result<()> {
    let ctx = load_context()?;
    let engine = SyncEngine::new(&ctx, open(backend, &ctx, &ProgressBar::hidden())?)?;
    let state = engine.get_state()?;

    println!(
        "branch: {} (ahead {}, behind {})",
        state.branch.as_deref().unwrap_or("<detached>"),
        state.ahead,
        state.behind
    );
    println!("mirror clean: {}", state.is_clean);
    println!("uncommitted mirror changes: {}", state.has_local_changes);
    println!("tracked files: {}", state.files.len());

    for file in state.changed_files() {
        let mark = if file.is_deleted {
            "deleted "
        } else if file.is_new {
            "new     "
        } else {
            "modified"
        };
        println!("  {mark} {}", file.rel_path.display());
    }

    for conflict in &state.conflicts {
        println!("  conflict {conflict}");
    }

    if !state.conflicts.is_empty() {
        warn!(
            "resolve the conflict markers in {:?}, then run `oxisync push`",
            ctx.mirror.as_path().display()
        );
    }

    Ok(())
}

fn run_diff(backend: Backend) -> Result<()> {
    let ctx = load_context()?;
    let engine = SyncEngine::new(&ctx, open(backend, &ctx, &ProgressBar::hidden())?)?;
    let patch = engine.diff()?;
    if patch.is_empty() {
        info!("mirror matches local configuration");
    } else {
        print!("{patch}");
    }

    Ok(())
}

/// Tally of failed checks.
#[derive(Debug, Default)]
struct Checkup {
    issues: usize,
}

impl Checkup {
    fn check(&mut self, passed: bool, what: impl Display, hint: impl Display) -> bool {
        if passed {
            info!("ok: {what}");
        } else {
            self.issues += 1;
            warn!("{what}: {hint}");
        }
        passed
    }

    fn finish(self) -> Result<()> {
        match self.issues {
            0 => {
                info!("no issues found");
                Ok(())
            }
            issues => bail!("found {issues} issue(s)"),
        }
    }
}

fn run_doctor(backend: Backend) -> Result<()> {
    let dirs = ToolDirs::try_default()?;
    let root = ConfigurationRoot::try_default()?;
    let mut checkup = Checkup::default();

    checkup.check(
        root.config_dir.is_dir(),
        format!("configuration directory {:?}", root.config_dir.display()),
        "not found, is OpenCode installed?",
    );
    checkup.check(
        root.data_dir.is_dir(),
        format!("data directory {:?}", root.data_dir.display()),
        "not found, credentials cannot be synced",
    );

    let policy = match SyncPolicy::load(dirs.config_file()) {
        Ok(Some(policy)) => policy,
        Ok(None) => {
            checkup.check(false, "configuration", "not found, run `oxisync init` or `oxisync clone`");
            return checkup.finish();
        }
        Err(error) => {
            checkup.check(false, "configuration", error);
            return checkup.finish();
        }
    };
    let validity = policy.validate();
    checkup.check(
        validity.is_ok(),
        format!("configuration {:?}", dirs.config_file().display()),
        validity.err().map(|error| error.to_string()).unwrap_or_default(),
    );

    if policy.encryption.enabled {
        let key_file = key_path(&dirs, &policy);
        let key = SecretKey::load(&key_file).map(|key| KeyCipher::new(&key));
        checkup.check(
            key.is_ok(),
            format!("encryption key {:?}", key_file.display()),
            "unusable, run `oxisync key import` or `oxisync key regen`",
        );
    }

    let mirror = dirs.mirror_root();
    if !checkup.check(
        mirror.join(".git").exists(),
        format!("mirror {:?}", mirror.as_path().display()),
        "not found, run `oxisync init` or `oxisync clone`",
    ) {
        return checkup.finish();
    }

    let repo = match backend.open(mirror.as_path()) {
        Ok(repo) => repo,
        Err(error) => {
            checkup.check(false, "mirror repository", error);
            return checkup.finish();
        }
    };

    match repo.remote_url(ORIGIN) {
        Ok(url) => {
            checkup.check(
                url == policy.repo.url,
                format!("remote {url}"),
                format!("differs from configured {}, run `oxisync rebind`", policy.repo.url),
            );
            let fetched = repo.fetch();
            checkup.check(
                fetched.is_ok(),
                "remote connectivity",
                fetched.err().map(|error| error.to_string()).unwrap_or_default(),
            );
        }
        Err(error) => {
            checkup.check(false, "remote", format!("{error}, run `oxisync rebind <url>`"));
        }
    }

    match repo.status() {
        Ok(status) => {
            let branch = status.branch.clone().unwrap_or_default();
            checkup.check(
                branch == policy.repo.branch,
                format!("branch {branch:?}"),
                format!("configured branch is {:?}", policy.repo.branch),
            );
            checkup.check(
                !status.merging,
                "merge state",
                "merge in progress, resolve the conflict markers, then run `oxisync push`",
            );
            checkup.check(
                !status.has_changes() || status.merging,
                "working tree",
                "uncommitted changes, run `oxisync push`",
            );
            checkup.check(
                status.ahead == 0,
                "unpushed commits",
                format!("{} commit(s) ahead, run `oxisync push`", status.ahead),
            );
            checkup.check(
                status.behind == 0,
                "remote commits",
                format!("{} commit(s) behind, run `oxisync pull`", status.behind),
            );
        }
        Err(error) => {
            checkup.check(false, "mirror status", error);
        }
    }

    checkup.finish()
}

fn run_key(command: KeyCommand) -> Result<()> {
    let dirs = ToolDirs::try_default()?;
    let loaded = SyncPolicy::load(dirs.config_file())?;
    let key_file = key_path(&dirs, loaded.as_ref().unwrap_or(&SyncPolicy::default()));

    match command {
        KeyCommand::Generate { force } => {
            if key_file.exists() && !force {
                bail!("key already exists at {:?}, pass --force to replace it", key_file.display());
            }
            SecretKey::generate().save(&key_file)?;
            info!("generated key at {:?}", key_file.display());
        }
        KeyCommand::Regen { yes } => {
            warn!("artifacts sealed with the current key can no longer be decrypted");
            if !yes && !confirm("Replace encryption key?")? {
                info!("key regeneration cancelled");
                return Ok(());
            }

            SecretKey::generate().save(&key_file)?;
            if let Some(mut policy) = loaded {
                policy.encryption.enabled = true;
                policy.save(dirs.config_file())?;
            }
            warn!(
                "generated key at {:?}, run `oxisync push`, then `oxisync key import` it on every other machine",
                key_file.display()
            );
        }
        KeyCommand::Export => {
            let key = SecretKey::load(&key_file)?;
            println!("{key}");
        }
        KeyCommand::Import { key } => {
            let key = key.trim().parse::<SecretKey>()?;
            key.save(&key_file)?;
            info!("stored key at {:?}", key_file.display());
        }
    }

    Ok(())
}

fn run_config(command: ConfigCommand) -> Result<()> {
    let dirs = ToolDirs::try_default()?;
    match command {
        ConfigCommand::Show => {
            let policy = SyncPolicy::load(dirs.config_file())?
                .ok_or_else(|| anyhow!("no configuration found, run `oxisync init` first"))?;
            print!("{policy}");
        }
        ConfigCommand::Path => println!("{}", dirs.config_file().display()),
        ConfigCommand::Set { key, value } => {
            let mut policy = SyncPolicy::load(dirs.config_file())?.unwrap_or_default();
            policy.set(&key, &value)?;
            check_policy(&policy)?;
            policy.save(dirs.config_file())?;
            info!("set {key} = {value:?}");
        }
        ConfigCommand::Edit => {
            let path = dirs.config_file();
            if !path.exists() {
                SyncPolicy::default().save(&path)?;
            }
            edit(&path)?;

            let policy = require_policy(&dirs)?;
            check_policy(&policy)?;
            info!("configuration is valid");
        }
    }

    Ok(())
}

// INVARIANT: Missing URL is tolerated while the configuration is still being
// filled in.
fn check_policy(policy: &SyncPolicy) -> Result<()> {
    match policy.validate() {
        Ok(()) => Ok(()),
        Err(PolicyViolation::MissingUrl) => {
            warn!("{}", PolicyViolation::MissingUrl);
            Ok(())
        }
        Err(violation) => Err(violation.into()),
    }
}

fn edit(path: &Path) -> Result<()> {
    let editor = env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| "vi".into());
    let mut words = editor.split_whitespace();
    let program = words.next().ok_or_else(|| anyhow!("editor command is empty"))?;

    let status = process::Command::new(program)
        .args(words)
        .arg(path)
        .status()
        .with_context(|| format!("failed to launch editor {editor:?}"))?;
    if !status.success() {
        bail!("editor {editor:?} exited with {status}");
    }

    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    Ok(Confirm::new(prompt).with_default(false).prompt()?)
}

fn key_path(dirs: &ToolDirs, policy: &SyncPolicy) -> PathBuf {
    policy
        .encryption
        .key_file
        .clone()
        .unwrap_or_else(|| dirs.key_file())
}

fn require_policy(dirs: &ToolDirs) -> Result<SyncPolicy> {
    SyncPolicy::load(dirs.config_file())?
        .ok_or_else(|| anyhow!("no configuration found, run `oxisync init` first"))
}

fn load_context() -> Result<SyncContext> {
    let dirs = ToolDirs::try_default()?;
    let policy = require_policy(&dirs)?;
    context(&dirs, policy)
}

fn context(dirs: &ToolDirs, policy: SyncPolicy) -> Result<SyncContext> {
    let key_file = key_path(dirs, &policy);
    let encrypted = policy.encryption.enabled;
    let ctx = SyncContext::new(ConfigurationRoot::try_default()?, dirs.mirror_root(), policy);
    if !encrypted {
        return Ok(ctx);
    }

    let key = SecretKey::load(&key_file).with_context(|| {
        format!(
            "encryption is enabled, but no usable key at {:?}, use `oxisync key import`",
            key_file.display()
        )
    })?;
    Ok(ctx.with_cipher(KeyCipher::new(&key)))
}

fn open(backend: Backend, ctx: &SyncContext, bar: &ProgressBar) -> Result<AnyMirror> {
    let repo = match backend.open(ctx.mirror.as_path())? {
        AnyMirror::LibGit(mirror) => AnyMirror::LibGit(mirror.with_progress(bar.clone())),
        repo => repo,
    };

    Ok(repo)
}

fn spinner(message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_message(message);
    bar.enable_steady_tick(time::Duration::from_millis(100));
    bar
}

fn report(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::UpToDate => info!("no changes to push"),
        SyncOutcome::Pushed { message } => info!("pushed: {message}"),
        SyncOutcome::Resumed { ahead } => info!("pushed {ahead} earlier commit(s)"),
        SyncOutcome::Overwritten => info!("remote overwritten with existing mirror history"),
    }
}

fn explain<T>(outcome: Result<T, SyncError>, mirror: &MirrorRoot) -> Result<T> {
    match outcome {
        Err(SyncError::Auth { ref remote, .. }) => {
            warn!("check the credentials used for {remote}, e.g., SSH keys or a credential helper");
        }
        Err(SyncError::Conflict { ref files }) => {
            warn!(
                "resolve the conflict markers in {} file(s) under {:?}, then run `oxisync push`",
                files.len(),
                mirror.as_path().display()
            );
        }
        Err(SyncError::LocalChanges { .. }) => {
            warn!("the mirror has uncommitted changes, run `oxisync push` or discard them first");
        }
        _ => {}
    }

    Ok(outcome?)
}
