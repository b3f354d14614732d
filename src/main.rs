use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ledger_acl::attestation::UnavailablePlatform;
use ledger_acl::{fs_guard, AclConfig, Gateway, Identity, MemoryStore};

// Defensive limits for operator-supplied files.
const MAX_JSON_BYTES: u64 = 1024 * 1024; // 1MB
const MAX_PEM_BYTES: u64 = 64 * 1024; // 64KB

#[derive(Parser)]
#[command(
    name = "ledger-acl",
    about = "Ledger access control administration",
    version
)]
struct Cli {
    /// State snapshot (created on first write)
    #[arg(long, global = true, default_value = "ledger-acl.state.json")]
    state: PathBuf,

    /// Config JSON (table names, guarded actions, auth scheme)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (-v, -vv, -vvv). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the ledger identity for a certificate or raw fingerprint
    Fingerprint {
        /// PEM certificate file
        #[arg(long, conflicts_with = "hex", required_unless_present = "hex")]
        cert: Option<PathBuf>,

        /// 64 hex digits, with or without colons
        #[arg(long)]
        hex: Option<String>,
    },

    /// Role administration
    #[command(subcommand)]
    Role(RoleCmd),

    /// Exit non-zero unless IDENTITY may perform ACTION
    Check { identity: String, action: String },

    /// Processor allow-list
    #[command(subcommand)]
    Policy(PolicyCmd),

    /// Registered processors
    #[command(subcommand)]
    Processor(ProcessorCmd),

    /// Per-user policy documents
    #[command(subcommand)]
    UserPolicy(UserPolicyCmd),
}

#[derive(Subcommand)]
enum RoleCmd {
    /// Create or replace a role
    Define {
        role: String,
        #[arg(required = true)]
        actions: Vec<String>,
    },
    /// Delete a role definition
    Remove { role: String },
    Assign { identity: String, role: String },
    Unassign { identity: String, role: String },
    /// List an identity's roles and the actions they grant
    Show { identity: String },
}

#[derive(Subcommand)]
enum PolicyCmd {
    /// Replace the allow-list from a JSON file
    Set {
        file: PathBuf,
        /// Identity performing the change; must hold the policy write action
        #[arg(long)]
        caller: String,
    },
    Show,
}

#[derive(Subcommand)]
enum ProcessorCmd {
    /// Exit non-zero unless IDENTITY is a currently trusted processor
    Status { identity: String },
    /// List registered processors and whether each is trusted
    List,
}

#[derive(Subcommand)]
enum UserPolicyCmd {
    Set {
        /// Identity the policy applies to
        user: String,
        policy: String,
        /// Identity performing the change; must hold the user policy write action
        #[arg(long)]
        caller: String,
    },
    Show { identity: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Offline helper: touches neither the config nor the state file.
    if let Cmd::Fingerprint { cert, hex } = &cli.cmd {
        return fingerprint(cert.as_deref(), hex.as_deref());
    }

    let config = AclConfig::load(cli.config.as_deref())?;
    let gateway = Gateway::new(&config, Arc::new(UnavailablePlatform));
    let mut store = MemoryStore::load(&cli.state)
        .with_context(|| format!("loading state {}", cli.state.display()))?;

    let changed = match cli.cmd {
        Cmd::Fingerprint { .. } => false,
        Cmd::Role(cmd) => role(&gateway, &mut store, cmd)?,
        Cmd::Check { identity, action } => {
            let id = identity_arg(&identity)?;
            gateway.authorize(&store, &id, &action)?;
            println!("✓ {id} may perform {action}");
            false
        }
        Cmd::Policy(cmd) => policy(&gateway, &mut store, cmd)?,
        Cmd::Processor(cmd) => processor(&gateway, &store, cmd)?,
        Cmd::UserPolicy(cmd) => user_policy(&gateway, &mut store, cmd)?,
    };

    if changed {
        store
            .save(&cli.state)
            .with_context(|| format!("saving state {}", cli.state.display()))?;
        tracing::info!(
            state = %cli.state.display(),
            version = store.current_version(),
            "state saved"
        );
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn identity_arg(s: &str) -> Result<Identity> {
    Identity::new(s).with_context(|| format!("invalid identity {s:?}"))
}

fn read_json(path: &Path) -> Result<Value> {
    let bytes = fs_guard::read_bounded(path, MAX_JSON_BYTES)?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

fn fingerprint(cert: Option<&Path>, hex: Option<&str>) -> Result<()> {
    let id = match (cert, hex) {
        (Some(path), _) => {
            let pem = fs_guard::read_bounded(path, MAX_PEM_BYTES)?;
            let pem = String::from_utf8(pem).context("certificate is not UTF-8")?;
            Identity::from_certificate_pem(&pem)?
        }
        (None, Some(hex)) => Identity::from_fingerprint_hex(hex)?,
        (None, None) => return Err(anyhow!("one of --cert or --hex is required")),
    };
    println!("{id}");
    Ok(())
}

fn role(gateway: &Gateway, store: &mut MemoryStore, cmd: RoleCmd) -> Result<bool> {
    match cmd {
        RoleCmd::Define { role, actions } => {
            store.transact(|tx| gateway.define_role(tx, &role, &actions))?;
            println!("✓ role {role} defined ({} actions)", actions.len());
        }
        RoleCmd::Remove { role } => {
            if !store.transact(|tx| gateway.rbac().remove_role(tx, &role))? {
                return Err(anyhow!("role {role} is not defined"));
            }
            println!("✓ role {role} removed");
        }
        RoleCmd::Assign { identity, role } => {
            let id = identity_arg(&identity)?;
            store.transact(|tx| gateway.assign_role(tx, &id, &role))?;
            println!("✓ {id} assigned {role}");
        }
        RoleCmd::Unassign { identity, role } => {
            let id = identity_arg(&identity)?;
            if !store.transact(|tx| gateway.rbac().unassign_role(tx, &id, &role))? {
                return Err(anyhow!("{id} does not hold role {role}"));
            }
            println!("✓ {id} unassigned {role}");
        }
        RoleCmd::Show { identity } => {
            let id = identity_arg(&identity)?;
            let rbac = gateway.rbac();
            let roles = rbac.roles_of(&*store, &id)?;
            if roles.is_empty() {
                println!("{id}: no roles");
            }
            for r in roles {
                match rbac.role_actions(&*store, &r)? {
                    Some(actions) => {
                        let actions: Vec<_> = actions.into_iter().collect();
                        println!("{r}: {}", actions.join(", "));
                    }
                    None => println!("{r}: (undefined)"),
                }
            }
            return Ok(false);
        }
    }
    Ok(true)
}

fn policy(gateway: &Gateway, store: &mut MemoryStore, cmd: PolicyCmd) -> Result<bool> {
    match cmd {
        PolicyCmd::Set { file, caller } => {
            let caller = identity_arg(&caller)?;
            let body = read_json(&file)?;
            let policy = store.transact(|tx| gateway.set_attestation_policy(tx, &caller, &body))?;
            println!(
                "✓ policy set: did={} feed={} min svn={} ({} measurements, {} policies)",
                policy.uvm_endorsements.did,
                policy.uvm_endorsements.feed,
                policy.uvm_endorsements.svn,
                policy.measurement.len(),
                policy.policy.len()
            );
            Ok(true)
        }
        PolicyCmd::Show => {
            let policy = gateway.attestation_policy(&*store)?;
            println!("{}", serde_json::to_string_pretty(&policy)?);
            Ok(false)
        }
    }
}

fn processor(gateway: &Gateway, store: &MemoryStore, cmd: ProcessorCmd) -> Result<bool> {
    let registry = gateway.registry();
    match cmd {
        ProcessorCmd::Status { identity } => {
            let id = identity_arg(&identity)?;
            let record = registry
                .check(store, &id)
                .map_err(|e| anyhow!("✗ {id} is not trusted: {e}"))?;
            println!("✓ {id} is trusted");
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        ProcessorCmd::List => {
            for id in registry.registered(store)? {
                match registry.check(store, &id) {
                    Ok(_) => println!("{id}\ttrusted"),
                    Err(e) => println!("{id}\tuntrusted ({e})"),
                }
            }
        }
    }
    Ok(false)
}

fn user_policy(gateway: &Gateway, store: &mut MemoryStore, cmd: UserPolicyCmd) -> Result<bool> {
    match cmd {
        UserPolicyCmd::Set {
            user,
            policy,
            caller,
        } => {
            let caller = identity_arg(&caller)?;
            let body = serde_json::json!({ "cert": &user, "policy": &policy });
            store.transact(|tx| gateway.set_user_policy(tx, &caller, &body))?;
            println!("✓ policy stored for {user}");
            Ok(true)
        }
        UserPolicyCmd::Show { identity } => {
            let id = identity_arg(&identity)?;
            println!("{}", gateway.user_policy(store, &id)?);
            Ok(false)
        }
    }
}
