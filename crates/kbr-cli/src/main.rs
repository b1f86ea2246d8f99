//! kbr: keychain backup envelope tool
//!
//! Commands:
//!   inspect <file>        - print the container structure, no decryption
//!   restore <file>        - restore into an in-memory store, JSON report on stdout
//!   make-fixture <file>   - write a small self-consistent test container
//!
//! The core takes the buffer, unlock material, and store as explicit
//! parameters; this binary is just an external caller wired to the
//! filesystem and the terminal.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;

use kbr_codec::{
    item_digest, parse_envelope, write_envelope, BackupEnvelope, ClassKeyEntry, EncodedItem,
    ItemMetadataKey,
};
use kbr_core::{ClassId, ContainerType, Uuid16, WrapType};
use kbr_crypto::{
    generate_class_key, generate_item_key, seal_blob, wrap_class_key, wrap_item_key, BlobRole,
    ClassKey, KeyProvider, StandardProvider,
};
use kbr_restore::{restore, MemoryStore, RestoreOptions};

#[derive(Parser, Debug)]
#[command(
    name = "kbr",
    version,
    about = "keychain backup envelope codec and restore tool",
    long_about = "kbr: parse, inspect, and restore keychain backup envelopes. \
                  Restores run against an in-memory item store and emit a JSON report."
)]
struct Cli {
    /// Log level filter (RUST_LOG overrides this)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the envelope structure without decrypting anything
    Inspect {
        /// Backup container file
        file: PathBuf,
    },

    /// Restore a container into an in-memory store and print the report
    Restore {
        /// Backup container file
        file: PathBuf,
        /// Read the unlock passphrase from this file instead of prompting
        #[arg(long)]
        passphrase_file: Option<PathBuf>,
        /// Decode worker threads (0 = serial)
        #[arg(long, short = 'j', default_value_t = 0)]
        jobs: usize,
    },

    /// Write a small self-consistent test container (passphrase: "fixture")
    #[command(name = "make-fixture")]
    MakeFixture {
        /// Output path
        out: PathBuf,
        /// Number of items
        #[arg(long, default_value_t = 3)]
        items: usize,
        /// Give one item a mismatched declared/actual keyclass
        #[arg(long)]
        with_mismatch: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Inspect { file } => inspect(&file),
        Commands::Restore { file, passphrase_file, jobs } => {
            run_restore(&file, passphrase_file.as_deref(), jobs)
        }
        Commands::MakeFixture { out, items, with_mismatch } => {
            make_fixture(&out, items, with_mismatch)
        }
    }
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

// ── inspect ───────────────────────────────────────────────────────────────────

fn inspect(file: &Path) -> Result<()> {
    let bytes =
        fs::read(file).with_context(|| format!("reading container: {}", file.display()))?;
    let env = parse_envelope(&bytes)
        .with_context(|| format!("parsing container: {}", file.display()))?;

    let kind = match env.container_type {
        ContainerType::Full => "full backup",
        ContainerType::Incremental => "incremental backup",
    };
    println!("container {} ({kind}, version {})", env.uuid, env.version);
    println!("integrity key: {} bytes", env.integrity_key.len());

    println!("class keys: {}", env.class_keys.len());
    for entry in &env.class_keys {
        match entry.wrap {
            WrapType::None => {
                println!("  class {:<2} wrap=none        always available", entry.class.0);
            }
            WrapType::Passphrase => println!(
                "  class {:<2} wrap=passphrase salt={}B iterations={}",
                entry.class.0,
                entry.salt.as_ref().map_or(0, Vec::len),
                entry.iterations.unwrap_or(0),
            ),
            WrapType::Asymmetric => {
                println!("  class {:<2} wrap=asymmetric (external unwrap required)", entry.class.0);
            }
        }
    }

    println!("items: {}", env.items.len());
    for (i, item) in env.items.iter().enumerate() {
        let mk = &item.metadata_key;
        let consistency = if mk.is_consistent() { "" } else { "  [INCONSISTENT]" };
        let mut wrappings = Vec::new();
        if mk.backup_wrapped_key.is_some() {
            wrappings.push("backup-wrapped");
        }
        if mk.aks_wrapped_key.is_some() {
            wrappings.push("aks-wrapped");
        }
        println!(
            "  [{i}] {} class {} keyclass {}/{} {}{consistency}",
            item.digest.short(),
            item.class.0,
            mk.keyclass.0,
            mk.actual_keyclass.0,
            wrappings.join("+"),
        );
        if let Some(bag) = &mk.bag_uuid {
            println!("      bag {bag}");
        }
    }
    Ok(())
}

// ── restore ───────────────────────────────────────────────────────────────────

fn run_restore(file: &Path, passphrase_file: Option<&Path>, jobs: usize) -> Result<()> {
    let bytes =
        fs::read(file).with_context(|| format!("reading container: {}", file.display()))?;
    let secret = read_passphrase(passphrase_file)?;

    let mut store = MemoryStore::new();
    let options = RestoreOptions { parallelism: jobs, cancel: None };
    let report = restore(&bytes, &secret, &StandardProvider, &mut store, &options)
        .with_context(|| format!("restoring {}", file.display()))?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.totals.skipped() > 0 {
        tracing::warn!(
            restored = report.totals.restored(),
            skipped = report.totals.skipped(),
            "restore finished with skipped items"
        );
    }
    Ok(())
}

fn read_passphrase(passphrase_file: Option<&Path>) -> Result<SecretString> {
    match passphrase_file {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading passphrase file: {}", path.display()))?;
            Ok(SecretString::from(raw.trim_end_matches(['\r', '\n']).to_string()))
        }
        None => {
            let raw = rpassword::prompt_password("backup passphrase: ")
                .context("reading passphrase from terminal")?;
            Ok(SecretString::from(raw))
        }
    }
}

// ── make-fixture ──────────────────────────────────────────────────────────────

const FIXTURE_PASSPHRASE: &str = "fixture";
const FIXTURE_ITERATIONS: u32 = 10_000;

fn make_fixture(out: &Path, items: usize, with_mismatch: bool) -> Result<()> {
    let k6 = generate_class_key();
    let k11 = generate_class_key();

    let mut fixture_items = Vec::with_capacity(items);
    for i in 0..items {
        let (declared, actual, key): (u32, u32, &ClassKey) = if with_mismatch && i == 0 {
            // the historical defect: declares 6, wrapped under 11
            (6, 11, &k11)
        } else if i % 2 == 0 {
            (6, 6, &k6)
        } else {
            (11, 11, &k11)
        };
        fixture_items.push(fixture_item(declared, actual, key, i)?);
    }

    let env = BackupEnvelope {
        version: 3,
        container_type: ContainerType::Full,
        uuid: Uuid16([0xF1; 16]),
        integrity_key: vec![0u8; 40],
        class_keys: vec![fixture_passphrase_entry(6, &k6)?, fixture_plain_entry(11, &k11)],
        items: fixture_items,
    };

    let bytes = write_envelope(&env);
    fs::write(out, &bytes).with_context(|| format!("writing fixture: {}", out.display()))?;
    println!(
        "wrote {} ({} bytes, {} items, passphrase {FIXTURE_PASSPHRASE:?})",
        out.display(),
        bytes.len(),
        env.items.len(),
    );
    Ok(())
}

fn fixture_passphrase_entry(class: u32, key: &ClassKey) -> Result<ClassKeyEntry> {
    let salt = vec![class as u8; 20];
    let kek = StandardProvider.derive_key(
        &SecretString::from(FIXTURE_PASSPHRASE),
        &salt,
        FIXTURE_ITERATIONS,
    );
    Ok(ClassKeyEntry {
        uuid: Uuid16([class as u8; 16]),
        class: ClassId(class),
        wrap: WrapType::Passphrase,
        salt: Some(salt),
        iterations: Some(FIXTURE_ITERATIONS),
        wrapped_key: Some(wrap_class_key(&kek, key)?),
        plain_key: None,
    })
}

fn fixture_plain_entry(class: u32, key: &ClassKey) -> ClassKeyEntry {
    ClassKeyEntry {
        uuid: Uuid16([class as u8; 16]),
        class: ClassId(class),
        wrap: WrapType::None,
        salt: None,
        iterations: None,
        wrapped_key: None,
        plain_key: Some(key.as_bytes().to_vec()),
    }
}

fn fixture_item(
    declared: u32,
    actual: u32,
    wrap_under: &ClassKey,
    index: usize,
) -> Result<EncodedItem> {
    let attrs = serde_json::json!({
        "svce": "fixture-service",
        "acct": format!("account-{index}"),
        "agrp": "com.example.fixture",
    })
    .to_string()
    .into_bytes();
    let digest = item_digest(&attrs);
    let item_key = generate_item_key();

    Ok(EncodedItem {
        class: ClassId(declared),
        digest,
        metadata_key: ItemMetadataKey {
            keyclass: ClassId(declared),
            actual_keyclass: ClassId(actual),
            bag_uuid: None,
            aks_wrapped_key: None,
            backup_wrapped_key: Some(wrap_item_key(wrap_under, &item_key)?),
        },
        attributes: seal_blob(&item_key, &digest, BlobRole::Attributes, &attrs)?,
        secret_data: seal_blob(
            &item_key,
            &digest,
            BlobRole::SecretData,
            format!("fixture-secret-{index}").as_bytes(),
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fixture_roundtrips_through_restore() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fixture.kbb");

        make_fixture(&path, 3, true).unwrap();

        let bytes = fs::read(&path).unwrap();
        let mut store = MemoryStore::new();
        let report = restore(
            &bytes,
            &SecretString::from(FIXTURE_PASSPHRASE),
            &StandardProvider,
            &mut store,
            &RestoreOptions::default(),
        )
        .unwrap();

        assert_eq!(report.totals.inserted, 3);
        assert_eq!(report.items.iter().filter(|i| i.healed.is_some()).count(), 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn inspect_handles_fixture() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fixture.kbb");
        make_fixture(&path, 2, false).unwrap();
        inspect(&path).unwrap();
    }
}
