//! pqvault: post-quantum credential vault and encrypted archive CLI
//!
//! Commands:
//!   config show                         - display the active configuration
//!   user create|verify|list             - manage credential records
//!   user passwd|resume                  - rotate a master password across all archives
//!   user upgrade                        - rewrite a v2 or v1 record as v3
//!   archive create|list|ls|add|extract|rm
//!   archive verify|diagnose|repair|discard|reset
//!
//! Every archive command first verifies the user's password against the
//! credential vault.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::{Path, PathBuf};

use pqvault_archive::{AddOutcome, Archive, ArchiveStore};
use pqvault_core::config::PqvConfig;
use pqvault_core::fs::expand_tilde;
use pqvault_credentials::{CredentialVault, RotationReport};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pqvault",
    version,
    about = "Post-quantum credential vault and encrypted archives",
    long_about = "pqvault: manage Kyber-protected user credentials and password-encrypted file archives"
)]
struct Cli {
    /// Path to pqvault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "PQVAULT_CONFIG",
        default_value = "~/.config/pqvault/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging] level
    #[arg(long, env = "PQVAULT_LOG")]
    log: Option<String>,

    /// Log format; overrides [logging] format
    #[arg(long, env = "PQVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Credential records
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Encrypted file archives
    Archive {
        #[command(subcommand)]
        action: ArchiveAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Args, Debug)]
struct PasswordArg {
    /// Password (prompted for when omitted)
    #[arg(long, env = "PQVAULT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Args, Debug)]
struct NewPasswordArg {
    /// New password (prompted for twice when omitted)
    #[arg(long, env = "PQVAULT_NEW_PASSWORD", hide_env_values = true)]
    new_password: Option<String>,
}

#[derive(Subcommand, Debug)]
enum UserAction {
    /// Create a credential record
    Create {
        username: String,
        #[command(flatten)]
        password: NewPasswordArg,
    },

    /// Check a password against the stored record
    Verify {
        username: String,
        #[command(flatten)]
        password: PasswordArg,
    },

    /// List known users and their record format
    List,

    /// Change the master password and re-key every archive the user owns
    Passwd {
        username: String,
        #[command(flatten)]
        password: PasswordArg,
        #[command(flatten)]
        new_password: NewPasswordArg,
    },

    /// Finish a rotation that left some archives under the old password
    Resume {
        username: String,
        #[command(flatten)]
        password: PasswordArg,
        #[command(flatten)]
        new_password: NewPasswordArg,
    },

    /// Rewrite an older (v2 or legacy v1) record in the current format
    Upgrade {
        username: String,
        #[command(flatten)]
        password: PasswordArg,
    },
}

#[derive(Args, Debug)]
struct UserArgs {
    /// Archive owner
    #[arg(long, short = 'u', env = "PQVAULT_USER")]
    user: String,
    #[command(flatten)]
    password: PasswordArg,
}

#[derive(Args, Debug)]
struct ArchiveArgs {
    #[command(flatten)]
    owner: UserArgs,
    /// Archive name
    archive: String,
}

#[derive(Subcommand, Debug)]
enum ArchiveAction {
    /// Create a new empty archive
    Create {
        #[command(flatten)]
        target: ArchiveArgs,
    },

    /// List the user's archives
    List {
        #[command(flatten)]
        owner: UserArgs,
    },

    /// List the entries of an archive
    Ls {
        #[command(flatten)]
        target: ArchiveArgs,
    },

    /// Add (or replace) a file
    Add {
        #[command(flatten)]
        target: ArchiveArgs,
        /// Local file to store
        file: PathBuf,
        /// Store under this name instead of the file name
        #[arg(long)]
        name: Option<String>,
    },

    /// Extract an entry to a file or directory
    Extract {
        #[command(flatten)]
        target: ArchiveArgs,
        /// Entry name (case-insensitive if unambiguous)
        entry: String,
        /// Output file or directory
        #[arg(default_value = ".")]
        output: PathBuf,
    },

    /// Remove an entry
    Rm {
        #[command(flatten)]
        target: ArchiveArgs,
        entry: String,
    },

    /// Check every entry hash; exits non-zero on any mismatch
    Verify {
        #[command(flatten)]
        target: ArchiveArgs,
    },

    /// Report damaged entries without changing anything
    Diagnose {
        #[command(flatten)]
        target: ArchiveArgs,
    },

    /// Quarantine damaged entries and drop entries without a name
    Repair {
        #[command(flatten)]
        target: ArchiveArgs,
    },

    /// Permanently delete quarantined entries
    Discard {
        #[command(flatten)]
        target: ArchiveArgs,
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Delete all contents and start over empty
    Reset {
        #[command(flatten)]
        target: ArchiveArgs,
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = PqvConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.as_deref().unwrap_or(config.logging.level.as_str());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.logging.format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(level, &format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "pqvault starting"
    );

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
        Commands::User { action } => cmd_user(&config, action, cli.json),
        Commands::Archive { action } => cmd_archive(&config, action, cli.json),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Passwords ─────────────────────────────────────────────────────────────────

fn read_password(arg: &PasswordArg, prompt: &str) -> Result<SecretString> {
    match &arg.password {
        Some(p) => Ok(SecretString::from(p.clone())),
        None => {
            let entered = rpassword::prompt_password(prompt).context("reading password")?;
            Ok(SecretString::from(entered))
        }
    }
}

fn read_new_password(arg: &NewPasswordArg) -> Result<SecretString> {
    let password = match &arg.new_password {
        Some(p) => p.clone(),
        None => {
            let first = rpassword::prompt_password("New password: ").context("reading password")?;
            let second =
                rpassword::prompt_password("Repeat new password: ").context("reading password")?;
            if first != second {
                anyhow::bail!("passwords do not match");
            }
            first
        }
    };
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }
    Ok(SecretString::from(password))
}

// ── `pqvault config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &PqvConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `pqvault user ...` ────────────────────────────────────────────────────────

fn cmd_user(config: &PqvConfig, action: UserAction, json: bool) -> Result<()> {
    let vault = CredentialVault::open(config).context("opening credential vault")?;

    match action {
        UserAction::Create { username, password } => {
            let password = read_new_password(&password)?;
            vault.create_user(&username, &password)?;
            println!("created user {username}");
        }
        UserAction::Verify { username, password } => {
            let password = read_password(&password, "Password: ")?;
            if !vault.verify_password(&username, &password)? {
                anyhow::bail!("password does not match for {username}");
            }
            println!("password ok");
        }
        UserAction::List => {
            let names = vault.usernames()?;
            if names.is_empty() {
                println!("no users in {}", vault.users_dir().display());
            }
            for name in names {
                match vault.read_record(&name) {
                    Ok(record) => println!("{name:<24} {}", record.kind()),
                    Err(e) => println!("{name:<24} unreadable: {e}"),
                }
            }
        }
        UserAction::Passwd {
            username,
            password,
            new_password,
        } => {
            let old = read_password(&password, "Current password: ")?;
            let new = read_new_password(&new_password)?;
            let store = ArchiveStore::from_config(config);
            let report = vault.change_master_password(&store, &username, &old, &new)?;
            print_rotation(&report, json)?;
        }
        UserAction::Resume {
            username,
            password,
            new_password,
        } => {
            let old = read_password(&password, "Previous password: ")?;
            let new = read_new_password(&new_password)?;
            let store = ArchiveStore::from_config(config);
            let report = vault.resume_rotation(&store, &username, &old, &new)?;
            print_rotation(&report, json)?;
        }
        UserAction::Upgrade { username, password } => {
            let password = read_password(&password, "Password: ")?;
            if vault.upgrade_legacy_record(&username, &password)? {
                println!("upgraded {username} to the current record format");
            } else {
                println!("{username} already uses the current record format");
            }
        }
    }
    Ok(())
}

fn print_rotation(report: &RotationReport, json: bool) -> Result<()> {
    if json {
        print_json(report)?;
    } else {
        println!("credential record updated");
        for name in &report.rotated {
            println!("  rotated          {name}");
        }
        for name in &report.already_current {
            println!("  already current  {name}");
        }
        for (name, reason) in &report.failed {
            println!("  FAILED           {name}: {reason}");
        }
    }
    if !report.is_complete() {
        anyhow::bail!(
            "{} archive(s) still use the old password; fix the cause and run `pqvault user resume`",
            report.failed.len()
        );
    }
    Ok(())
}

// ── `pqvault archive ...` ─────────────────────────────────────────────────────

/// Verify the owner against the vault and return the password.
fn authenticate(vault: &CredentialVault, owner: &UserArgs) -> Result<SecretString> {
    let password = read_password(&owner.password, "Password: ")?;
    vault
        .authenticate(&owner.user, &password)
        .with_context(|| format!("authenticating {}", owner.user))?;
    Ok(password)
}

fn load_archive(vault: &CredentialVault, store: &ArchiveStore, target: &ArchiveArgs) -> Result<Archive> {
    let password = authenticate(vault, &target.owner)?;
    let mut archive = store.open(&target.owner.user, &target.archive)?;
    if !archive.exists() {
        anyhow::bail!("archive not found: {}", archive.id());
    }
    archive
        .load(&password)
        .with_context(|| format!("loading archive {}", archive.id()))?;
    Ok(archive)
}

fn cmd_archive(config: &PqvConfig, action: ArchiveAction, json: bool) -> Result<()> {
    let vault = CredentialVault::open(config).context("opening credential vault")?;
    let store = ArchiveStore::from_config(config);

    match action {
        ArchiveAction::Create { target } => {
            let password = authenticate(&vault, &target.owner)?;
            let archive = store.create_new(&target.owner.user, &target.archive, &password)?;
            println!("created {}", archive.path().display());
        }
        ArchiveAction::List { owner } => {
            authenticate(&vault, &owner)?;
            let known = vault.usernames()?;
            for name in store.find_user_archives_among(&owner.user, &known)? {
                println!("{name}");
            }
        }
        ArchiveAction::Ls { target } => {
            let archive = load_archive(&vault, &store, &target)?;
            if json {
                return print_json(&archive.stats());
            }
            for entry in archive.file_list() {
                let hash = entry.hash.get(..12).unwrap_or(entry.hash.as_str());
                println!(
                    "{:>12}  {}  {}  {}",
                    entry.size, entry.timestamp, hash, entry.name
                );
            }
            let stats = archive.stats();
            println!(
                "{} file(s), {} bytes, last modified {}",
                stats.total_files,
                stats.total_size,
                stats.last_modified.as_deref().unwrap_or("never")
            );
            let quarantined = archive.quarantined();
            if !quarantined.is_empty() {
                println!("{} quarantined: {}", quarantined.len(), quarantined.join(", "));
            }
        }
        ArchiveAction::Add { target, file, name } => {
            let mut archive = load_archive(&vault, &store, &target)?;
            let outcome = archive
                .add_file(&file, name.as_deref())
                .with_context(|| format!("adding {}", file.display()))?;
            match outcome {
                AddOutcome::Inserted => println!("added {}", file.display()),
                AddOutcome::Replaced => println!("replaced {}", file.display()),
            }
        }
        ArchiveAction::Extract {
            target,
            entry,
            output,
        } => {
            let archive = load_archive(&vault, &store, &target)?;
            let written = archive.extract(&entry, &output)?;
            println!("extracted {entry} -> {}", written.display());
        }
        ArchiveAction::Rm { target, entry } => {
            let mut archive = load_archive(&vault, &store, &target)?;
            let removed = archive.remove_file(&entry)?;
            println!("removed {}", removed.name);
        }
        ArchiveAction::Verify { target } => {
            let archive = load_archive(&vault, &store, &target)?;
            if !archive.verify_integrity() {
                anyhow::bail!(
                    "integrity check failed for {}; run `pqvault archive diagnose`",
                    archive.id()
                );
            }
            println!("{}: all entries verified", archive.id());
        }
        ArchiveAction::Diagnose { target } => {
            let archive = load_archive(&vault, &store, &target)?;
            let report = archive.diagnose()?;
            if json {
                return print_json(&report);
            }
            println!("entries:          {}", report.total_entries);
            println!("legacy format:    {}", report.legacy_format);
            print_names("size mismatch:   ", &report.size_mismatches);
            print_names("hash mismatch:   ", &report.hash_mismatches);
            print_names("empty but sized: ", &report.empty_but_sized);
            print_names("quarantined:     ", &report.quarantined);
            if report.empty_names > 0 {
                println!("empty names:      {}", report.empty_names);
            }
            if report.is_healthy() {
                println!("healthy");
            } else {
                println!("damaged; `pqvault archive repair` quarantines the affected entries");
            }
        }
        ArchiveAction::Repair { target } => {
            let mut archive = load_archive(&vault, &store, &target)?;
            let report = archive.repair()?;
            if json {
                print_json(&report)?;
            } else if !report.changed() {
                println!("nothing to repair");
            } else {
                println!("dropped {} unnamed entries", report.dropped_empty_names);
                print_names("quarantined:     ", &report.quarantined);
            }
        }
        ArchiveAction::Discard { target, yes } => {
            if !yes {
                anyhow::bail!("discarding quarantined entries is permanent; pass --yes to confirm");
            }
            let mut archive = load_archive(&vault, &store, &target)?;
            let count = archive.discard_quarantined()?;
            println!("discarded {count} quarantined entries");
        }
        ArchiveAction::Reset { target, yes } => {
            if !yes {
                anyhow::bail!("reset deletes every entry; pass --yes to confirm");
            }
            let password = authenticate(&vault, &target.owner)?;
            let mut archive = store.open(&target.owner.user, &target.archive)?;
            archive.reset(&password)?;
            println!("reset {}", archive.id());
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("serializing report to JSON")?;
    println!("{rendered}");
    Ok(())
}

fn print_names(label: &str, names: &[String]) {
    if !names.is_empty() {
        println!("{label} {}", names.join(", "));
    }
}
