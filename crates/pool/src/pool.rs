//! The client pool: a fixed, ordered set of members with round-robin
//! acquisition.

use gemrelay_config::{ClientConfig, RemoteConfig};
use gemrelay_core::error::PoolError;
use gemrelay_core::remote::RemoteBackend;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use crate::member::PoolMember;

pub struct ClientPool {
    members: Vec<Arc<PoolMember>>,
    by_id: HashMap<String, Arc<PoolMember>>,
    cursor: AtomicUsize,
}

impl ClientPool {
    /// Build a pool from members in their configured order.
    pub fn new(members: Vec<PoolMember>) -> Result<Self, PoolError> {
        if members.is_empty() {
            return Err(PoolError::NoClients);
        }

        let members: Vec<Arc<PoolMember>> = members.into_iter().map(Arc::new).collect();
        let mut by_id = HashMap::with_capacity(members.len());
        for member in &members {
            by_id
                .entry(member.id().to_string())
                .or_insert_with(|| Arc::clone(member));
        }

        Ok(Self {
            members,
            by_id,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Build one member per configured client; `factory` supplies each
    /// member's backend.
    pub fn from_config<F>(remote: &RemoteConfig, factory: F) -> Result<Self, PoolError>
    where
        F: Fn(&ClientConfig) -> Arc<dyn RemoteBackend>,
    {
        let options = remote.connect_options();
        let members = remote
            .clients
            .iter()
            .map(|client| {
                PoolMember::new(
                    client.id.clone(),
                    client.credentials(),
                    options.clone(),
                    factory(client),
                )
            })
            .collect();
        Self::new(members)
    }

    /// Bring up every member that is not live yet, concurrently.
    ///
    /// One member failing does not stop the others; all failures are
    /// reported together. Safe to call repeatedly.
    pub async fn init(&self) -> Result<(), PoolError> {
        let results =
            futures::future::join_all(self.members.iter().map(|member| member.init())).await;

        let failures: Vec<_> = self
            .members
            .iter()
            .zip(results)
            .filter_map(|(member, result)| result.err().map(|e| (member.id().to_string(), e)))
            .collect();

        if failures.is_empty() {
            info!(clients = self.members.len(), "Client pool ready");
            Ok(())
        } else {
            Err(PoolError::InitFailed(failures))
        }
    }

    /// Fetch a member by id, or the next one in rotation.
    pub fn acquire(&self, id: Option<&str>) -> Result<Arc<PoolMember>, PoolError> {
        if let Some(id) = id {
            return self
                .by_id
                .get(id)
                .cloned()
                .ok_or_else(|| PoolError::UnknownClient(id.to_string()));
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.members.len();
        let member = Arc::clone(&self.members[index]);
        debug!(client = %member.id(), "Acquired client by rotation");
        Ok(member)
    }

    /// Liveness of every member, by id.
    pub fn status(&self) -> BTreeMap<String, bool> {
        self.members
            .iter()
            .map(|m| (m.id().to_string(), m.is_live()))
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.id().to_string()).collect()
    }

    pub fn members(&self) -> &[Arc<PoolMember>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
