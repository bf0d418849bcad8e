//! Persistence of account credentials for the node side.
//!
//! The controller hands account keys to nodes through named secrets grouped
//! by namespace. [`FileSecretStore`] keeps each secret as a TOML file under
//! `<root>/<namespace>/<name>.toml`; an existing secret is left untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use thiserror::Error;
use tracing::info;

/// Template for the default secret name; `{}` is the account name.
pub const SECRET_NAME_TEMPLATE: &str = "azure-storage-account-{}-secret";

const DATA_SECTION: &str = "data";

/// Default secret name for `account`.
#[must_use]
pub fn default_secret_name(account: &str) -> String {
    SECRET_NAME_TEMPLATE.replace("{}", account)
}

/// Secret to persist.
#[derive(Clone, Eq, PartialEq)]
pub struct AccountSecret {
    /// Secret name.
    pub name: String,
    /// Namespace holding the secret.
    pub namespace: String,
    /// Key/value payload.
    pub data: BTreeMap<String, String>,
}

impl fmt::Debug for AccountSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSecret")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Result of [`SecretStore::store`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreOutcome {
    /// A new secret was written.
    Created,
    /// A secret with the same name already existed and was kept.
    AlreadyExists,
}

/// Errors raised while persisting a secret.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    /// The secret name or namespace cannot be used as a file name.
    #[error("invalid secret {field} {value:?}")]
    InvalidName {
        /// Which field was rejected.
        field: &'static str,
        /// Rejected value.
        value: String,
    },
    /// File system access failed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// The payload could not be rendered.
    #[error("failed to render secret {name}: {message}")]
    Render {
        /// Secret name.
        name: String,
        /// Human-readable error message.
        message: String,
    },
}

/// Destination for persisted account credentials.
pub trait SecretStore: Send + Sync {
    /// Persists `secret` unless one with the same name already exists.
    ///
    /// # Errors
    ///
    /// Returns [`SecretStoreError`] when the secret cannot be written.
    fn store(&self, secret: &AccountSecret) -> Result<StoreOutcome, SecretStoreError>;
}

/// Stores secrets as TOML files below a root directory.
#[derive(Clone, Debug)]
pub struct FileSecretStore {
    root: Utf8PathBuf,
}

impl FileSecretStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path where `secret` is stored.
    #[must_use]
    pub fn path_for(&self, namespace: &str, name: &str) -> Utf8PathBuf {
        self.root.join(namespace).join(format!("{name}.toml"))
    }
}

fn check_component(field: &'static str, value: &str) -> Result<(), SecretStoreError> {
    let usable = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\']);
    if usable {
        Ok(())
    } else {
        Err(SecretStoreError::InvalidName {
            field,
            value: value.to_owned(),
        })
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> SecretStoreError {
    SecretStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn render(secret: &AccountSecret) -> Result<String, SecretStoreError> {
    let data: toml::value::Table = secret
        .data
        .iter()
        .map(|(key, value)| (key.clone(), toml::Value::String(value.clone())))
        .collect();
    let mut root = toml::value::Table::new();
    root.insert(String::from("name"), toml::Value::String(secret.name.clone()));
    root.insert(
        String::from("namespace"),
        toml::Value::String(secret.namespace.clone()),
    );
    root.insert(String::from(DATA_SECTION), toml::Value::Table(data));
    toml::to_string_pretty(&toml::Value::Table(root)).map_err(|err| SecretStoreError::Render {
        name: secret.name.clone(),
        message: err.to_string(),
    })
}

impl SecretStore for FileSecretStore {
    fn store(&self, secret: &AccountSecret) -> Result<StoreOutcome, SecretStoreError> {
        check_component("namespace", &secret.namespace)?;
        check_component("name", &secret.name)?;

        let dir_path = self.root.join(&secret.namespace);
        Dir::create_ambient_dir_all(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;
        let dir = Dir::open_ambient_dir(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;

        let file_name = format!("{}.toml", secret.name);
        let path = dir_path.join(&file_name);
        if dir.try_exists(&file_name).map_err(|err| io_error(&path, &err))? {
            info!(
                name = %secret.name,
                namespace = %secret.namespace,
                "secret already exists, keeping it"
            );
            return Ok(StoreOutcome::AlreadyExists);
        }

        let rendered = render(secret)?;
        dir.write(&file_name, rendered)
            .map_err(|err| io_error(&path, &err))?;
        info!(
            name = %secret.name,
            namespace = %secret.namespace,
            "stored account secret"
        );
        Ok(StoreOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct StoreFixture {
        _tmp: TempDir,
        root: Utf8PathBuf,
        store: FileSecretStore,
    }

    #[fixture]
    fn store_fixture() -> StoreFixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().join("secrets"))
            .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
        let store = FileSecretStore::new(root.clone());
        StoreFixture {
            _tmp: tmp,
            root,
            store,
        }
    }

    fn secret(name: &str, key: &str) -> AccountSecret {
        AccountSecret {
            name: name.to_owned(),
            namespace: String::from("team-a"),
            data: BTreeMap::from([
                (String::from("azurestorageaccountname"), String::from("acct")),
                (String::from("azurestorageaccountkey"), key.to_owned()),
            ]),
        }
    }

    fn read(path: &Utf8Path) -> toml::Value {
        let parent = path
            .parent()
            .unwrap_or_else(|| panic!("secret path without parent: {path}"));
        let name = path
            .file_name()
            .unwrap_or_else(|| panic!("secret path without name: {path}"));
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .unwrap_or_else(|err| panic!("open {parent}: {err}"));
        let contents = dir
            .read_to_string(name)
            .unwrap_or_else(|err| panic!("read {path}: {err}"));
        toml::from_str(&contents).unwrap_or_else(|err| panic!("parse {path}: {err}"))
    }

    #[test]
    fn default_name_embeds_account() {
        assert_eq!(default_secret_name("acct"), "azure-storage-account-acct-secret");
    }

    #[rstest]
    fn store_writes_payload(store_fixture: StoreFixture) {
        let outcome = store_fixture
            .store
            .store(&secret("s1", "a2V5"))
            .unwrap_or_else(|err| panic!("store: {err}"));
        assert_eq!(outcome, StoreOutcome::Created);

        let path = store_fixture.store.path_for("team-a", "s1");
        assert!(path.starts_with(&store_fixture.root));
        let value = read(&path);
        let key = value
            .get(DATA_SECTION)
            .and_then(|data| data.get("azurestorageaccountkey"))
            .and_then(toml::Value::as_str);
        assert_eq!(key, Some("a2V5"));
        assert_eq!(value.get("namespace").and_then(toml::Value::as_str), Some("team-a"));
    }

    #[rstest]
    fn existing_secret_is_kept(store_fixture: StoreFixture) {
        store_fixture
            .store
            .store(&secret("s1", "Zmlyc3Q="))
            .unwrap_or_else(|err| panic!("seed: {err}"));

        let outcome = store_fixture
            .store
            .store(&secret("s1", "c2Vjb25k"))
            .unwrap_or_else(|err| panic!("store: {err}"));

        assert_eq!(outcome, StoreOutcome::AlreadyExists);
        let value = read(&store_fixture.store.path_for("team-a", "s1"));
        let key = value
            .get(DATA_SECTION)
            .and_then(|data| data.get("azurestorageaccountkey"))
            .and_then(toml::Value::as_str);
        assert_eq!(key, Some("Zmlyc3Q="));
    }

    #[rstest]
    #[case("..", "s1")]
    #[case("team-a", "../escape")]
    #[case("", "s1")]
    fn unusable_names_are_rejected(
        store_fixture: StoreFixture,
        #[case] namespace: &str,
        #[case] name: &str,
    ) {
        let candidate = AccountSecret {
            namespace: namespace.to_owned(),
            ..secret(name, "a2V5")
        };
        let err = store_fixture
            .store
            .store(&candidate)
            .expect_err("name should be rejected");
        assert!(matches!(err, SecretStoreError::InvalidName { .. }));
    }

    #[test]
    fn debug_output_hides_values() {
        let rendered = format!("{:?}", secret("s1", "c3VwZXJzZWNyZXQ="));
        assert!(!rendered.contains("c3VwZXJzZWNyZXQ="));
        assert!(rendered.contains("azurestorageaccountkey"));
    }
}
