use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::store::WalStore;

pub type TenantEngine = Engine<WalStore>;

/// Manages per-tenant engines. Each tenant gets its own engine, WAL and compactor.
/// Tenant = database name from the pgwire connection, reduced to its file-safe form,
/// so names that land on the same WAL file share one engine.
pub struct TenantManager {
    engines: DashMap<String, Arc<OnceCell<Arc<TenantEngine>>>>,
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

    /// Get or lazily create an engine for the given tenant.
    pub async fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<TenantEngine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Only characters safe in a file name reach the data dir.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        if let Some(cell) = self.engines.get(&safe_name)
            && let Some(engine) = cell.get()
        {
            return Ok(engine.clone());
        }
        if self.engines.len() >= MAX_TENANTS && !self.engines.contains_key(&safe_name) {
            return Err(std::io::Error::other("too many tenants"));
        }

        // The shard lock covers only the slot lookup; the replay runs under the cell.
        let cell = self.engines.entry(safe_name.clone()).or_default().clone();
        let engine = cell
            .get_or_try_init(|| self.load(safe_name.clone()))
            .await?
            .clone();
        Ok(engine)
    }

    async fn load(&self, safe_name: String) -> std::io::Result<Arc<TenantEngine>> {
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let store = tokio::task::spawn_blocking(move || WalStore::open(wal_path))
            .await
            .map_err(std::io::Error::other)??;
        let engine = Arc::new(Engine::new(store));
        tokio::spawn(compactor::run_compactor(
            engine.clone(),
            self.compact_threshold,
        ));
        info!(tenant = %safe_name, "tenant loaded");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{NewAppointment, NewClient, NewProfessional};
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("cadence_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn tenants_do_not_share_calendars() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000);

        let eng_a = tm.get_or_create("tenant_a").await.unwrap();
        let eng_b = tm.get_or_create("tenant_b").await.unwrap();

        // The same email is free in each tenant.
        let new = || NewProfessional {
            name: "Ana".into(),
            email: "ana@clinic.test".into(),
            ..Default::default()
        };
        let p = eng_a.register_professional(new()).await.unwrap();
        eng_b.register_professional(new()).await.unwrap();

        let c = eng_a
            .register_client(NewClient {
                professional_id: p.id,
                name: "Marta".into(),
                email: None,
                phone: None,
            })
            .await
            .unwrap();
        eng_a
            .create_appointment(NewAppointment {
                professional_id: p.id,
                client_id: c.id,
                date: "2030-01-07".into(),
                start: "10:00".into(),
                duration_minutes: 60,
                price: None,
                note: None,
            })
            .await
            .unwrap();

        // Tenant B has never heard of tenant A's professional.
        assert!(eng_b.list_clients(p.id).await.unwrap().is_empty());
        let date = chrono::NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        eng_b.check_availability(p.id, date, "10:00", 60).await.unwrap();
        assert!(eng_a.check_availability(p.id, date, "10:00", 60).await.is_err());
    }

    #[tokio::test]
    async fn wal_file_appears_on_first_use() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_db").await.unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn repeated_lookups_share_one_engine() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000);

        let eng1 = tm.get_or_create("foo").await.unwrap();
        let eng2 = tm.get_or_create("foo").await.unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_names_are_made_file_safe() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);

        let _eng = tm.get_or_create("../evil").await.unwrap();
        assert!(dir.join("evil.wal").exists());

        assert!(tm.get_or_create("../..").await.is_err());
    }

    #[tokio::test]
    async fn names_sharing_a_wal_file_share_one_engine() {
        let dir = test_data_dir("alias");
        let tm = TenantManager::new(dir.clone(), 1000);

        let plain = tm.get_or_create("clinic").await.unwrap();
        let noisy = tm.get_or_create("clinic!").await.unwrap();
        assert!(Arc::ptr_eq(&plain, &noisy));

        let p = plain
            .register_professional(NewProfessional {
                name: "Ana".into(),
                email: "ana@clinic.test".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let c = plain
            .register_client(NewClient {
                professional_id: p.id,
                name: "Marta".into(),
                email: None,
                phone: None,
            })
            .await
            .unwrap();
        let slot = || NewAppointment {
            professional_id: p.id,
            client_id: c.id,
            date: "2030-01-07".into(),
            start: "10:00".into(),
            duration_minutes: 60,
            price: None,
            note: None,
        };
        plain.create_appointment(slot()).await.unwrap();
        assert!(matches!(
            noisy.create_appointment(slot()).await,
            Err(crate::engine::EngineError::Conflict(_))
        ));

        let files: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![std::ffi::OsString::from("clinic.wal")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_lookups_open_the_wal_once() {
        let dir = test_data_dir("concurrent_open");
        let tm = Arc::new(TenantManager::new(dir, 1000));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tm = tm.clone();
                tokio::spawn(async move { tm.get_or_create("busy").await.unwrap() })
            })
            .collect();
        let mut engines = Vec::new();
        for h in handles {
            engines.push(h.await.unwrap());
        }
        assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
    }

    #[tokio::test]
    async fn overlong_tenant_name_is_rejected() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).await.err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_is_capped() {
        let dir = test_data_dir("count_limit");
        let tm = TenantManager::new(dir, 1000);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).await.unwrap();
        }
        let err = tm.get_or_create("one_more").await.err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
