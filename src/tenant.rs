use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::engine::Engine;
use crate::limits::*;
use crate::maintenance;
use crate::notify::NotifyHub;

/// One marketplace per database name. Each gets its own Engine, WAL and
/// compactor; nothing is shared between them.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily open the marketplace for a database name.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        let safe_name = file_stem(tenant).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty tenant name")
        })?;

        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // The entry lock keeps two first connections from opening the same WAL twice.
        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::new(wal_path, Arc::new(NotifyHub::new()))?);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            maintenance::run_compactor(compactor, threshold).await;
        });
        tracing::info!("opened marketplace {safe_name}");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

/// Database name reduced to characters safe in a file name.
fn file_stem(tenant: &str) -> Option<String> {
    let safe: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    (!safe.is_empty()).then_some(safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NewUser;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staydb_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn new_user(id: Ulid, email: &str) -> NewUser {
        NewUser {
            id,
            email: email.into(),
            first_name: "Kiran".into(),
            last_name: "Shah".into(),
            phone: None,
            is_host: false,
        }
    }

    #[tokio::test]
    async fn marketplaces_are_isolated() {
        let tm = TenantManager::new(test_data_dir("isolation"), 1000);
        let a = tm.get_or_create("mumbai").unwrap();
        let b = tm.get_or_create("delhi").unwrap();

        let id = Ulid::new();
        a.register_user(new_user(id, "kiran@example.com")).await.unwrap();
        // Same id and email are free in the other marketplace.
        b.register_user(new_user(id, "kiran@example.com")).await.unwrap();

        let other = Ulid::new();
        a.register_user(new_user(other, "other@example.com")).await.unwrap();
        assert_eq!(a.list_users().len(), 2);
        assert_eq!(b.list_users().len(), 1);
    }

    #[tokio::test]
    async fn created_lazily() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        let _engine = tm.get_or_create("goa_rentals").unwrap();
        assert!(dir.join("goa_rentals.wal").exists());
    }

    #[tokio::test]
    async fn same_engine_returned() {
        let tm = TenantManager::new(test_data_dir("same_engine"), 1000);
        let e1 = tm.get_or_create("foo").unwrap();
        let e2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[tokio::test]
    async fn names_are_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);

        let _engine = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        assert!(tm.get_or_create("../..").is_err());

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[test]
    fn file_stems() {
        assert_eq!(file_stem("my-db_1").as_deref(), Some("my-db_1"));
        assert_eq!(file_stem("a/b.c").as_deref(), Some("abc"));
        assert_eq!(file_stem("./"), None);
    }
}
