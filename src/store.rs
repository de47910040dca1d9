use crate::{
    error::AppResult,
    records::TrustRecordSet,
    types::{Fingerprint, FingerprintPolicy, Origin, ParsedCertificate},
};
use rustls_pki_types::CertificateDer;
use std::{
    fs,
    io::{ErrorKind as IoErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};
use tempfile::NamedTempFile;

pub type SharedTrustStore = Arc<RwLock<TrustDecisionStore>>;

/// What happened when the persisted trust state was read at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { records: usize },
    /// No file yet, the first run.
    Missing,
    Unreadable { reason: String },
    Corrupt { reason: String },
}

impl LoadOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            LoadOutcome::Unreadable { .. } | LoadOutcome::Corrupt { .. }
        )
    }
}

/// Trust-on-first-use decisions keyed by origin, backed by a JSON file.
///
/// Lookups and [`add`](Self::add) only touch memory. Nothing reaches the disk
/// until [`save`](Self::save) is called.
#[derive(Debug)]
pub struct TrustDecisionStore {
    path: PathBuf,
    policy: FingerprintPolicy,
    records: TrustRecordSet,
    load_outcome: LoadOutcome,
}

impl TrustDecisionStore {
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        Self::load_with_policy(path, FingerprintPolicy::default())
    }

    /// Reads the trust file at `path`. Never fails: an absent, unreadable or
    /// corrupt file yields an empty store and a [`LoadOutcome`] saying why.
    pub fn load_with_policy<P: AsRef<Path>>(path: P, policy: FingerprintPolicy) -> Self {
        let path = path.as_ref().to_path_buf();

        let (records, load_outcome) = match fs::read(&path) {
            Ok(bytes) => match TrustRecordSet::try_deserialize(&bytes) {
                Ok(records) => {
                    info!("Loaded {} trusted origin(s) from {:?}", records.len(), path);
                    let count = records.len();
                    (records, LoadOutcome::Loaded { records: count })
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!("Ignoring corrupt trust store {:?}: {}", path, reason);
                    (TrustRecordSet::default(), LoadOutcome::Corrupt { reason })
                }
            },
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                info!("No trust store at {:?}, starting empty", path);
                (TrustRecordSet::default(), LoadOutcome::Missing)
            }
            Err(e) => {
                warn!("Cannot read trust store {:?}: {}", path, e);
                (
                    TrustRecordSet::default(),
                    LoadOutcome::Unreadable {
                        reason: e.to_string(),
                    },
                )
            }
        };

        Self {
            path,
            policy,
            records,
            load_outcome,
        }
    }

    pub fn into_shared(self) -> SharedTrustStore {
        Arc::new(RwLock::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> FingerprintPolicy {
        self.policy
    }

    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.load_outcome
    }

    pub fn records(&self) -> &TrustRecordSet {
        &self.records
    }

    pub fn fingerprint(&self, certificate: &CertificateDer<'_>) -> AppResult<Fingerprint> {
        Ok(ParsedCertificate::from_der(certificate)?.fingerprint(self.policy))
    }

    /// True iff `origin` has a record matching this exact certificate.
    ///
    /// Malformed certificate bytes are an error, not an untrusted certificate.
    pub fn is_trusted(&self, origin: &Origin, certificate: &CertificateDer<'_>) -> AppResult<bool> {
        let fingerprint = self.fingerprint(certificate)?;
        Ok(self.records.get(origin) == Some(&fingerprint))
    }

    /// True iff any certificate was ever trusted for `origin`.
    pub fn is_existing(&self, origin: &Origin) -> bool {
        self.records.get(origin).is_some()
    }

    pub fn trusted_fingerprint(&self, origin: &Origin) -> Option<&Fingerprint> {
        self.records.get(origin)
    }

    /// Trusts `certificate` for `origin`, replacing any earlier decision.
    pub fn add(&mut self, origin: &Origin, certificate: &CertificateDer<'_>) -> AppResult<()> {
        let fingerprint = self.fingerprint(certificate)?;

        match self.records.set(origin.clone(), fingerprint.clone()) {
            Some(previous) if previous == fingerprint => {
                trace!("{} already trusts {}", origin, fingerprint);
            }
            Some(previous) => {
                info!("Replaced trust for {}: {} -> {}", origin, previous, fingerprint);
            }
            None => {
                info!("Trusted {} for {}", fingerprint, origin);
            }
        }
        Ok(())
    }

    /// Drops the decision for `origin`. Persisted by the next save.
    pub fn forget(&mut self, origin: &Origin) -> bool {
        let removed = self.records.remove(origin).is_some();
        if removed {
            info!("Forgot trust for {}", origin);
        }
        removed
    }

    /// Encodes the current records for writing without holding the store.
    pub fn snapshot(&self) -> AppResult<TrustSnapshot> {
        Ok(TrustSnapshot {
            path: self.path.clone(),
            bytes: self.records.serialize()?,
        })
    }

    pub fn save(&self) -> AppResult<()> {
        self.snapshot()?.write()
    }
}

/// Serialized trust records bound for a file.
#[derive(Clone, Debug)]
pub struct TrustSnapshot {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl TrustSnapshot {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes to a temporary file beside the target, then renames it over the target.
    pub fn write(&self) -> AppResult<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut temp_file = NamedTempFile::new_in(parent)?;
        temp_file.write_all(&self.bytes)?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(&self.path)?;

        debug!("Saved trust store to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{error::ErrorReason, test_utils};
    use rcgen::KeyPair;
    use std::{sync::Barrier, thread};
    use tempfile::TempDir;

    fn origin(s: &str) -> Origin {
        s.parse().unwrap()
    }

    fn store_in(dir: &TempDir) -> TrustDecisionStore {
        TrustDecisionStore::load(dir.path().join("certificate.json"))
    }

    #[test]
    fn unseen_origin_is_neither_trusted_nor_existing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let o = origin("https://a.example");

        assert_eq!(store.load_outcome(), &LoadOutcome::Missing);
        assert!(!store.is_trusted(&o, &test_utils::certificate("a.example")).unwrap());
        assert!(!store.is_existing(&o));
    }

    #[test]
    fn add_is_visible_immediately_but_not_durable() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let o = origin("https://a.example");
        let cert = test_utils::certificate("a.example");

        store.add(&o, &cert).unwrap();
        assert!(store.is_trusted(&o, &cert).unwrap());

        let reloaded = store_in(&dir);
        assert!(!reloaded.is_trusted(&o, &cert).unwrap());
        assert!(!dir.path().join("certificate.json").exists());
    }

    #[test]
    fn saved_decisions_survive_reload() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let o = origin("https://a.example:443");
        let cert = test_utils::certificate("a.example");

        store.add(&o, &cert).unwrap();
        store.save().unwrap();

        let reloaded = store_in(&dir);
        assert_eq!(reloaded.load_outcome(), &LoadOutcome::Loaded { records: 1 });
        assert!(reloaded.is_trusted(&o, &cert).unwrap());
        assert!(reloaded.is_existing(&o));
    }

    #[test]
    fn newer_certificate_replaces_older_one() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let o = origin("https://a.example");
        let c1 = test_utils::certificate("a.example");
        let c2 = test_utils::certificate("a.example");

        store.add(&o, &c1).unwrap();
        store.add(&o, &c2).unwrap();
        store.save().unwrap();

        for store in [store, store_in(&dir)] {
            assert!(!store.is_trusted(&o, &c1).unwrap());
            assert!(store.is_trusted(&o, &c2).unwrap());
            assert!(store.is_existing(&o));
            assert_eq!(store.records().len(), 1);
        }
    }

    #[test]
    fn repeated_add_is_idempotent() {
        let cert = test_utils::certificate("a.example");
        let o = origin("https://a.example");

        let once = TempDir::new().unwrap();
        let mut store = store_in(&once);
        store.add(&o, &cert).unwrap();
        store.save().unwrap();

        let twice = TempDir::new().unwrap();
        let mut store = store_in(&twice);
        store.add(&o, &cert).unwrap();
        store.add(&o, &cert).unwrap();
        store.save().unwrap();

        assert_eq!(
            fs::read(once.path().join("certificate.json")).unwrap(),
            fs::read(twice.path().join("certificate.json")).unwrap()
        );
    }

    #[test]
    fn ports_are_trusted_separately() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let cert = test_utils::certificate("a.example");

        store.add(&origin("https://a.example"), &cert).unwrap();
        assert!(!store.is_existing(&origin("https://a.example:8443")));
        assert!(!store
            .is_trusted(&origin("https://a.example:8443"), &cert)
            .unwrap());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certificate.json");
        fs::write(&path, b"{\"https://a.example:443\": \"sha256:AQ").unwrap();

        let store = TrustDecisionStore::load(&path);
        assert!(matches!(store.load_outcome(), LoadOutcome::Corrupt { .. }));
        assert!(store.load_outcome().is_degraded());
        assert!(store.records().is_empty());
        assert!(!store.is_existing(&origin("https://a.example")));
    }

    #[test]
    fn unreadable_path_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = TrustDecisionStore::load(dir.path());

        assert!(matches!(
            store.load_outcome(),
            LoadOutcome::Unreadable { .. }
        ));
        assert!(store.records().is_empty());
    }

    #[test]
    fn malformed_certificate_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let o = origin("https://a.example");
        let garbage = CertificateDer::from(b"definitely not DER".to_vec());

        let err = store.is_trusted(&o, &garbage).unwrap_err();
        assert!(matches!(err.reason(), ErrorReason::InvalidCertificate));
        assert!(store.add(&o, &garbage).is_err());
        assert!(!store.is_existing(&o));
    }

    #[test]
    fn save_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-directory");
        fs::write(&blocker, b"").unwrap();

        let mut store = TrustDecisionStore::load(blocker.join("certificate.json"));
        store
            .add(&origin("https://a.example"), &test_utils::certificate("a.example"))
            .unwrap();

        assert!(store.save().is_err());
    }

    #[test]
    fn save_replaces_the_file_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certificate.json");
        let mut store = TrustDecisionStore::load(&path);
        let o = origin("https://a.example");

        store.add(&o, &test_utils::certificate("a.example")).unwrap();
        store.save().unwrap();
        let first = fs::read(&path).unwrap();

        store.add(&o, &test_utils::certificate("a.example")).unwrap();
        store.save().unwrap();
        let second = fs::read(&path).unwrap();

        assert_ne!(first, second);
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("certificate.json")]);
    }

    #[test]
    fn save_creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("certificate.json");
        let mut store = TrustDecisionStore::load(&path);
        let o = origin("https://a.example");
        let cert = test_utils::certificate("a.example");

        store.add(&o, &cert).unwrap();
        store.save().unwrap();

        assert!(TrustDecisionStore::load(&path).is_trusted(&o, &cert).unwrap());
    }

    #[test]
    fn forget_removes_the_record_once_saved() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let o = origin("https://a.example");
        let cert = test_utils::certificate("a.example");

        store.add(&o, &cert).unwrap();
        store.save().unwrap();
        assert!(store.forget(&o));
        assert!(!store.forget(&o));
        store.save().unwrap();

        assert!(!store_in(&dir).is_existing(&o));
    }

    #[test]
    fn public_key_policy_accepts_renewal_with_same_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certificate.json");
        let key_pair = KeyPair::generate().unwrap();
        let original = test_utils::self_signed(&key_pair, "a.example", "Dev CA");
        let renewed = test_utils::self_signed(&key_pair, "a.example", "Dev CA 2");
        let o = origin("https://a.example");

        let mut pinned = TrustDecisionStore::load_with_policy(&path, FingerprintPolicy::PublicKey);
        pinned.add(&o, &original).unwrap();
        assert!(pinned.is_trusted(&o, &renewed).unwrap());

        let mut strict = TrustDecisionStore::load_with_policy(&path, FingerprintPolicy::Certificate);
        strict.add(&o, &original).unwrap();
        assert!(!strict.is_trusted(&o, &renewed).unwrap());
    }

    #[test]
    fn records_from_another_policy_never_match() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certificate.json");
        let o = origin("https://a.example");
        let cert = test_utils::certificate("a.example");

        let mut strict = TrustDecisionStore::load_with_policy(&path, FingerprintPolicy::Certificate);
        strict.add(&o, &cert).unwrap();
        strict.save().unwrap();

        let pinned = TrustDecisionStore::load_with_policy(&path, FingerprintPolicy::PublicKey);
        assert!(pinned.is_existing(&o));
        assert!(!pinned.is_trusted(&o, &cert).unwrap());
    }

    #[test]
    fn concurrent_reads_do_not_block_each_other() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let a = origin("https://a.example");
        let b = origin("https://b.example");
        let cert_a = test_utils::certificate("a.example");
        let cert_b = test_utils::certificate("b.example");
        store.add(&a, &cert_a).unwrap();
        store.add(&b, &cert_b).unwrap();
        let shared = store.into_shared();

        // A read guard held elsewhere must not keep readers out.
        let held = shared.read().unwrap();
        assert!(shared.try_read().is_ok());

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [(a, cert_a), (b, cert_b)]
            .into_iter()
            .map(|(origin, cert)| {
                let shared = shared.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let guard = shared.read().unwrap();
                    barrier.wait();
                    (0..100).all(|_| {
                        guard.is_existing(&origin) && guard.is_trusted(&origin, &cert).unwrap()
                    })
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert!(held.is_existing(&origin("https://a.example")));
    }
}
