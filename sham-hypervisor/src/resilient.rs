//! Connection handle that reopens and retries once on failure.
//!
//! Every hypervisor call goes through a single retry combinator: if the call
//! fails with anything other than a not-found error, the connection is
//! reopened with the original URI and the call is made once more on the new
//! connection. A failure of the retried call, or of the reopen itself, is
//! returned to the caller.
//!
//! The connection lives in one slot shared by every pool, volume and VM
//! handle created from the same manager. The slot is only replaced when it
//! still holds the connection that failed, so several callers failing at
//! once reopen the connection a single time.
//!
//! Creating a volume or defining a domain is not safe to blindly re-issue:
//! the first attempt may have reached the hypervisor before the fault. Those
//! calls refuse a name that is already taken before submitting anything, so
//! an object found after a failed attempt can only be the one this call
//! made. The retry then checks, on the fresh connection, whether the object
//! exists and only re-issues the call if it does not.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{HypervisorError, ObjectKind, Result};
use crate::traits::{Connector, HypervisorConnection, RawVolume};
use crate::xml::{DomainDescriptor, VolumeDescriptor};

type SharedConnection = Arc<dyn HypervisorConnection>;

/// Resilient handle over a hypervisor connection.
pub struct ResilientConnection {
    uri: String,
    connector: Arc<dyn Connector>,
    slot: RwLock<SharedConnection>,
    reconnects: AtomicU64,
}

impl ResilientConnection {
    /// Open the initial connection.
    #[instrument(skip(connector))]
    pub async fn open(uri: &str, connector: Arc<dyn Connector>) -> Result<Self> {
        info!(uri = %uri, "Connecting to hypervisor");

        let connection = connector.open(uri).await?;

        info!("Connected to hypervisor");

        Ok(Self {
            uri: uri.to_string(),
            connector,
            slot: RwLock::new(connection),
            reconnects: AtomicU64::new(0),
        })
    }

    /// URI used for the initial connection and every reopen.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// How many times the connection has been replaced.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    async fn current(&self) -> SharedConnection {
        self.slot.read().await.clone()
    }

    /// Replace `failed` with a fresh connection, unless someone already did.
    async fn reconnect(&self, failed: &SharedConnection) -> Result<SharedConnection> {
        let mut slot = self.slot.write().await;

        if !same_connection(&slot, failed) {
            debug!("Connection already replaced by another caller");
            return Ok(slot.clone());
        }

        let fresh = self.connector.open(&self.uri).await?;
        *slot = fresh.clone();
        self.reconnects.fetch_add(1, Ordering::Relaxed);

        info!(uri = %self.uri, "Reconnected to hypervisor");
        Ok(fresh)
    }

    /// Run `call`, and on a non-not-found failure reconnect and run it once more.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Fn(SharedConnection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let connection = self.current().await;

        match call(connection.clone()).await {
            Err(err) if !err.is_not_found() => {
                warn!(operation, error = %err, "Hypervisor call failed, reconnecting and retrying");
                let fresh = self.reconnect(&connection).await?;
                call(fresh).await
            }
            result => result,
        }
    }

    /// Create-style variant of `with_retry`.
    ///
    /// Fails with `AlreadyExists` before calling anything if `exists` finds
    /// `name`. After a failed attempt and a reconnect, `call` is only
    /// re-issued if `exists` reports that the attempt left nothing behind.
    async fn with_checked_retry<F, Fut, E, EFut>(
        &self,
        operation: &'static str,
        kind: ObjectKind,
        name: &str,
        call: F,
        exists: E,
    ) -> Result<()>
    where
        F: Fn(SharedConnection) -> Fut,
        Fut: Future<Output = Result<()>>,
        E: Fn(SharedConnection) -> EFut,
        EFut: Future<Output = Result<()>>,
    {
        match self.with_retry(operation, &exists).await {
            Ok(()) => return Err(HypervisorError::already_exists(kind, name)),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let connection = self.current().await;

        match call(connection.clone()).await {
            Err(err) if !err.is_not_found() => {
                warn!(operation, error = %err, "Hypervisor call failed, reconnecting and retrying");
                let fresh = self.reconnect(&connection).await?;

                match exists(fresh.clone()).await {
                    Ok(()) => {
                        info!(operation, "Object exists after reconnect, not re-issuing");
                        Ok(())
                    }
                    Err(lookup) if lookup.is_not_found() => call(fresh).await,
                    Err(lookup) => Err(lookup),
                }
            }
            result => result,
        }
    }

    // =========================================================================
    // Storage
    // =========================================================================

    pub async fn list_storage_pools(&self) -> Result<Vec<String>> {
        self.with_retry("list_storage_pools", |c| async move { c.list_storage_pools().await })
            .await
    }

    pub async fn list_volume_names(&self, pool: &str) -> Result<Vec<String>> {
        self.with_retry("list_volume_names", |c| async move { c.list_volume_names(pool).await })
            .await
    }

    pub async fn lookup_volume(&self, pool: &str, name: &str) -> Result<RawVolume> {
        self.with_retry("lookup_volume", |c| async move { c.lookup_volume(pool, name).await })
            .await
    }

    pub async fn lookup_volume_by_path(&self, path: &str) -> Result<RawVolume> {
        self.with_retry("lookup_volume_by_path", |c| async move {
            c.lookup_volume_by_path(path).await
        })
        .await
    }

    /// Create a volume.
    ///
    /// Fails with `AlreadyExists` if the pool already holds a volume with
    /// that name. Not re-issued if the volume exists after a reconnect.
    pub async fn create_volume(&self, pool: &str, descriptor: &VolumeDescriptor) -> Result<()> {
        let xml = descriptor.to_xml()?;
        let xml = xml.as_str();
        let name = descriptor.name.as_str();

        self.with_checked_retry(
            "create_volume",
            ObjectKind::StorageVolume,
            name,
            |c| async move { c.create_volume(pool, xml).await },
            |c| async move { c.lookup_volume(pool, name).await.map(|_| ()) },
        )
        .await
    }

    pub async fn wipe_volume(&self, pool: &str, name: &str) -> Result<()> {
        self.with_retry("wipe_volume", |c| async move { c.wipe_volume(pool, name).await })
            .await
    }

    pub async fn delete_volume(&self, pool: &str, name: &str) -> Result<()> {
        self.with_retry("delete_volume", |c| async move { c.delete_volume(pool, name).await })
            .await
    }

    // =========================================================================
    // Domains
    // =========================================================================

    pub async fn list_domains(&self) -> Result<Vec<String>> {
        self.with_retry("list_domains", |c| async move { c.list_domains().await })
            .await
    }

    pub async fn domain_xml(&self, name: &str) -> Result<String> {
        self.with_retry("domain_xml", |c| async move { c.domain_xml(name).await })
            .await
    }

    /// Define a new domain.
    ///
    /// Fails with `AlreadyExists` if a domain with that name is defined. Not
    /// re-issued if the domain exists after a reconnect.
    pub async fn define_domain(&self, descriptor: &DomainDescriptor) -> Result<()> {
        let xml = descriptor.to_xml()?;
        let xml = xml.as_str();
        let name = descriptor.name.as_str();

        debug!(xml = %xml, "Generated domain XML");

        self.with_checked_retry(
            "define_domain",
            ObjectKind::Domain,
            name,
            |c| async move { c.define_domain(xml).await },
            |c| async move { c.domain_xml(name).await.map(|_| ()) },
        )
        .await
    }

    pub async fn start_domain(&self, name: &str) -> Result<()> {
        self.with_retry("start_domain", |c| async move { c.start_domain(name).await })
            .await
    }

    pub async fn destroy_domain(&self, name: &str) -> Result<()> {
        self.with_retry("destroy_domain", |c| async move { c.destroy_domain(name).await })
            .await
    }

    pub async fn undefine_domain(&self, name: &str) -> Result<()> {
        self.with_retry("undefine_domain", |c| async move { c.undefine_domain(name).await })
            .await
    }

    pub async fn domain_state(&self, name: &str) -> Result<u32> {
        self.with_retry("domain_state", |c| async move { c.domain_state(name).await })
            .await
    }

    // =========================================================================
    // Host
    // =========================================================================

    pub async fn free_memory(&self) -> Result<u64> {
        self.with_retry("free_memory", |c| async move { c.free_memory().await })
            .await
    }
}

fn same_connection(a: &SharedConnection, b: &SharedConnection) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
