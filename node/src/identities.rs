//! # Local Identities
//!
//! The sled-backed identity store under `--data-dir`, and the `identity`
//! and `turn` subcommands that manage it.

use anyhow::{anyhow, bail, Context, Result};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use websign_protocol::config::TurnServerSetting;
use websign_protocol::identity::{
    CreateOptions, Identity, IdentityStore, KeyValueStorage, SledStorage,
};

use crate::cli::{IdentityCommand, TurnCommand};

/// Open (creating if needed) the storage under `data_dir`.
pub fn open_storage(data_dir: &Path) -> Result<Arc<dyn KeyValueStorage>> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let path = data_dir.join("identities");
    let storage = SledStorage::open(&path)
        .with_context(|| format!("failed to open identity store at {}", path.display()))?;
    Ok(Arc::new(storage))
}

pub fn open_store(storage: Arc<dyn KeyValueStorage>) -> Result<IdentityStore> {
    IdentityStore::open(storage).context("failed to load identities")
}

/// Find one identity by full fingerprint or by a prefix only it matches.
pub fn resolve(store: &IdentityStore, id: &str) -> Result<Identity> {
    if let Some(identity) = store.get(id) {
        return Ok(identity);
    }
    let mut matches = store.find_by_prefix(id);
    match matches.len() {
        0 => bail!("no identity matches {id:?}"),
        1 => Ok(matches.remove(0)),
        n => bail!("{n} identities match {id:?}; use more of the fingerprint"),
    }
}

pub async fn run(command: IdentityCommand, store: &IdentityStore) -> Result<()> {
    match command {
        IdentityCommand::List => {
            if store.is_empty() {
                eprintln!("No identities yet. Create one with `websign identity create`.");
            }
            for identity in store.list() {
                println!("{}  {}", identity.id, identity.name.as_deref().unwrap_or("-"));
            }
        }
        IdentityCommand::Create { name, prefix } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            let watcher = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });
            if let Some(prefix) = &prefix {
                eprintln!("Searching for a fingerprint starting with {prefix:?} (Ctrl+C to stop)...");
            }
            let created = store
                .create(CreateOptions {
                    name,
                    prefix,
                    cancel,
                })
                .await;
            watcher.abort();
            let identity = created.context("failed to create identity")?;
            println!("{}", identity.id);
        }
        IdentityCommand::Import { key } => {
            let raw = if key == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("failed to read key from stdin")?;
                buf
            } else {
                key
            };
            let identity = store.import_existing(&raw).context("failed to import key")?;
            println!("{}", identity.id);
        }
        IdentityCommand::Rename { id, name } => {
            let identity = resolve(store, &id)?;
            let renamed = store.rename(identity.id.as_str(), name)?;
            println!("{}  {}", renamed.id, renamed.display_name());
        }
        IdentityCommand::Delete { id } => {
            let identity = resolve(store, &id)?;
            store.delete(identity.id.as_str())?;
            eprintln!("Deleted {}", identity.id);
        }
        IdentityCommand::Export { id } => {
            let identity = resolve(store, &id)?;
            eprintln!("This output contains a private key. Anyone holding it is you.");
            println!("{}", store.export(identity.id.as_str())?);
        }
    }
    Ok(())
}

pub fn run_turn(command: TurnCommand, storage: &dyn KeyValueStorage) -> Result<()> {
    match command {
        TurnCommand::Show => match TurnServerSetting::load(storage)? {
            TurnServerSetting::None => println!("none"),
            TurnServerSetting::Turn { url, username, .. } => println!("{url} (user {username})"),
        },
        TurnCommand::Set {
            url,
            username,
            password,
        } => {
            if !url.starts_with("turn:") && !url.starts_with("turns:") {
                return Err(anyhow!("TURN urls start with turn: or turns:, got {url:?}"));
            }
            TurnServerSetting::Turn {
                url,
                username,
                password,
            }
            .save(storage)?;
        }
        TurnCommand::Clear => TurnServerSetting::None.save(storage)?,
    }
    storage.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use websign_protocol::identity::MemoryStorage;

    fn store() -> IdentityStore {
        IdentityStore::open(Arc::new(MemoryStorage::new())).unwrap()
    }

    #[tokio::test]
    async fn resolves_by_fingerprint_or_unique_prefix() {
        let store = store();
        let created = store.create(CreateOptions::default()).await.unwrap();
        let full = created.id.to_string();

        assert_eq!(resolve(&store, &full).unwrap().id, created.id);
        assert_eq!(resolve(&store, &full[..6]).unwrap().id, created.id);
        assert!(resolve(&store, "0").is_err());
    }

    #[tokio::test]
    async fn ambiguous_prefix_is_refused() {
        let store = store();
        let a = store
            .create(CreateOptions {
                prefix: Some("z".into()),
                ..CreateOptions::default()
            })
            .await
            .unwrap();
        store
            .create(CreateOptions {
                prefix: Some("z".into()),
                ..CreateOptions::default()
            })
            .await
            .unwrap();

        let err = resolve(&store, "z").unwrap_err();
        assert!(err.to_string().contains("2 identities"), "{err}");
        assert_eq!(resolve(&store, a.id.as_str()).unwrap().id, a.id);
    }

    #[test]
    fn turn_setting_round_trips_through_storage() {
        let storage = MemoryStorage::new();
        run_turn(
            TurnCommand::Set {
                url: "turn:turn.example:3478".into(),
                username: "u".into(),
                password: "p".into(),
            },
            &storage,
        )
        .unwrap();
        assert!(matches!(
            TurnServerSetting::load(&storage).unwrap(),
            TurnServerSetting::Turn { .. }
        ));

        run_turn(TurnCommand::Clear, &storage).unwrap();
        assert_eq!(TurnServerSetting::load(&storage).unwrap(), TurnServerSetting::None);
        assert!(storage.is_empty());
    }

    #[test]
    fn stun_url_is_not_a_turn_server() {
        let storage = MemoryStorage::new();
        let result = run_turn(
            TurnCommand::Set {
                url: "stun:stun.example:3478".into(),
                username: "u".into(),
                password: "p".into(),
            },
            &storage,
        );
        assert!(result.is_err());
    }
}
