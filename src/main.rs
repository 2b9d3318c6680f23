mod config;
mod error;
mod identity;
mod locator;
mod patch;
mod platform;
mod reconcile;
mod rules;
mod scrub;
mod version;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use config::Config;
use error::Result;
use identity::IdentitySet;
use locator::{InstallationLocator, PathRole};
use patch::PatchEngine;
use platform::Platform;
use reconcile::StoreReconciler;
use rules::ScriptTarget;
use scrub::UsageScrubber;
use version::{GateVerdict, VersionGate};

fn main() {
    env_logger::init();
    match run() {
        Err(e) => {
            eprintln!("Error: {e}");
            pause();
            std::process::exit(1);
        }
        Ok(ok) => {
            if ok {
                println!("\nReset completed.");
            } else {
                println!("\nReset finished with errors; see the lines above.");
            }
            pause();
        }
    }
}

/// Runs the reset end to end. Unsupported platform, config failure and path
/// resolution abort; every later step reports and continues best-effort.
fn run() -> Result<bool> {
    let platform = Platform::current()?;
    let config_path = Config::default_path(platform)?;
    let mut config = Config::load_or_init(platform, &config_path)?;
    let mut locator = InstallationLocator::new(platform, &mut config, config_path);

    let document_store = resolve(&mut locator, PathRole::DocumentStore)?;
    let kv_store = resolve(&mut locator, PathRole::KvStore)?;
    let app_root = resolve(&mut locator, PathRole::AppRoot)?;
    let machine_id_file = resolve(&mut locator, PathRole::MachineIdFile)?;

    let patches_ok = apply_patches(platform, &mut locator, &app_root);
    drop(locator);

    println!("\nGenerating new identity...");
    let ids = IdentitySet::generate();
    for (key, value) in ids.entries() {
        println!("  {key}: {value}");
    }

    let reconciler = StoreReconciler {
        platform,
        document_store: document_store.clone(),
        kv_store: kv_store.clone(),
        machine_id_file,
    };
    let report = reconciler.commit(&ids);
    println!("Document store: {}", report.document);
    println!("Key-value store: {}", report.kv);
    println!("Machine-id file: {}", report.machine_id_file);
    println!("System identity store: {}", report.system);

    println!("\nClearing usage-tracking entries...");
    let scrub = UsageScrubber {
        document_store,
        kv_store,
    }
    .scrub();
    println!(
        "Removed {} document entries, {} key-value entries",
        scrub.document_removed, scrub.kv_removed
    );

    if !patches_ok {
        println!("Note: one or more script patches did not apply.");
    }
    Ok(report.succeeded())
}

fn resolve(locator: &mut InstallationLocator, role: PathRole) -> Result<PathBuf> {
    let found = locator.resolve(role)?;
    log::debug!(
        "{} resolved to {} ({:?})",
        found.role.config_key(),
        found.value.display(),
        found.source
    );
    Ok(found.value)
}

/// Version-gated script patching. Failures are reported per script and never
/// abort the reset.
fn apply_patches(platform: Platform, locator: &mut InstallationLocator, app_root: &Path) -> bool {
    let pkg_path = app_root.join("package.json");
    let version = match version::app_version(&pkg_path) {
        Ok(v) => v,
        Err(e) => {
            println!("Could not read app version: {e}");
            return false;
        }
    };
    println!("Found app version {version}");

    let mut gate = VersionGate::new();
    match gate.classify(&version) {
        Ok(GateVerdict::AtOrAboveThreshold) => {
            println!("Version supports machine-id patching");
        }
        Ok(GateVerdict::BelowThreshold) => {
            println!(
                "Version below {}; main.js left untouched",
                version::MIN_PATCH_VERSION
            );
        }
        Err(e) => {
            println!("Could not classify version: {e}");
            return false;
        }
    }

    let sets = match rules::sets_for(&version) {
        Ok(sets) => sets,
        Err(e) => {
            println!("Could not select patch rules: {e}");
            return false;
        }
    };

    let mut all_ok = true;
    for set in sets {
        let target = match set.target {
            ScriptTarget::MainJs => Some(app_root.join("out").join("main.js")),
            ScriptTarget::Workbench => match locator.workbench_candidates() {
                Ok(candidates) => {
                    let chosen = choose_script(candidates);
                    if let Err(e) = locator.record_app_root(&chosen) {
                        log::warn!("could not record install root: {e}");
                    }
                    Some(chosen)
                }
                Err(e) => {
                    println!("Workbench script not found: {e}");
                    None
                }
            },
        };
        let Some(target) = target else {
            all_ok = false;
            continue;
        };

        println!("Patching {}", target.display());
        let engine = PatchEngine::new(set.backup);
        match engine.apply(&target, platform, &set.rules) {
            Ok(patch_report) => {
                println!("  {} replacement(s) applied", patch_report.replacements);
                if let Some(backup) = patch_report.backup.backup {
                    println!(
                        "  backup of {}: {}",
                        patch_report.backup.original.display(),
                        backup.display()
                    );
                }
            }
            Err(e) => {
                println!("  patch failed: {e}");
                all_ok = false;
            }
        }
    }
    all_ok
}

/// With a single match the choice is obvious; several ambiguous installs are
/// listed for explicit selection, defaulting to the first.
fn choose_script(candidates: Vec<PathBuf>) -> PathBuf {
    if candidates.len() == 1 {
        return candidates.into_iter().next().unwrap_or_default();
    }
    println!("Multiple scripts found:");
    for (i, path) in candidates.iter().enumerate() {
        println!("  [{}] {}", i + 1, path.display());
    }
    print!("Select the file to modify (1-{}): ", candidates.len());
    let _ = io::stdout().flush();
    let mut line = String::new();
    let _ = io::stdin().read_line(&mut line);
    let index = line
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=candidates.len()).contains(n))
        .map(|n| n - 1)
        .unwrap_or(0);
    candidates.into_iter().nth(index).unwrap_or_default()
}

fn pause() {
    print!("\nPress Enter to exit...");
    let _ = io::stdout().flush();
    let _ = io::stdin().read_line(&mut String::new());
}
